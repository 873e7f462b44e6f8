use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};
use tronsnap::{AcquireConfig, ExecutionStage, RetryPolicy, SnapshotAcquirer, StageOutcome};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Stage {
    /// List, download and extract
    All,
    /// Print the available backups and the latest archive URL
    List,
    /// Download the latest archive without extracting it
    Download,
}

impl From<Stage> for ExecutionStage {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::All => ExecutionStage::All,
            Stage::List => ExecutionStage::ListOnly,
            Stage::Download => ExecutionStage::DownloadOnly,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "tronsnap")]
#[command(about = "Download and stage the latest TRON lite full node snapshot", long_about = None)]
#[command(version)]
struct Args {
    /// Mirror index URL listing backupYYYYMMDD directories
    #[arg(long, default_value = "http://34.86.86.229/")]
    index_url: String,

    /// Where the archive is downloaded before extraction
    #[arg(long, default_value = "/tmp/LiteFullNode_output-directory.tgz")]
    archive: PathBuf,

    /// Node data directory to populate
    #[arg(short, long, default_value = "/home/java-tron/output-directory")]
    output: PathBuf,

    /// Which stages to run
    #[arg(long, value_enum, default_value_t = Stage::All)]
    stage: Stage,

    /// Total attempts for each network operation
    #[arg(long, default_value_t = 4)]
    retries: usize,

    /// Delay before the first retry (e.g. "500ms", "2s")
    #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
    retry_delay: Duration,

    /// Upper bound for the delay between retries
    #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
    max_retry_delay: Duration,

    /// TCP connect timeout
    #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
    connect_timeout: Duration,

    /// Abandon (and retry) a transfer that sends nothing for this long
    #[arg(long, default_value = "60s", value_parser = humantime::parse_duration)]
    read_timeout: Duration,

    /// Re-download even if the output already holds the latest backup
    #[arg(long)]
    force: bool,

    /// Keep the archive after a successful extraction
    #[arg(long)]
    keep_archive: bool,

    /// Disable progress bars
    #[arg(short, long)]
    quiet: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    // Initialize tracing; stdout is reserved for the resulting path
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("tronsnap={}", log_level))
        .with_writer(std::io::stderr)
        .init();

    info!("🚀 tronsnap - TRON lite full node snapshot acquirer");
    info!("Index: {}", args.index_url);
    info!("Output directory: {:?}", args.output);

    let config = AcquireConfig {
        retry: RetryPolicy {
            max_attempts: args.retries.max(1),
            base_delay: args.retry_delay,
            max_delay: args.max_retry_delay,
        },
        connect_timeout: args.connect_timeout,
        read_timeout: args.read_timeout,
        force: args.force,
        keep_archive: args.keep_archive,
        show_progress: !args.quiet && atty::is(atty::Stream::Stderr),
        ..AcquireConfig::default()
    };
    let acquirer = SnapshotAcquirer::new(config)?;

    let run = acquirer.run(
        args.stage.into(),
        &args.index_url,
        &args.archive,
        &args.output,
    );

    // Dropping `run` on Ctrl-C runs every cleanup guard it holds. Returning
    // (rather than exiting) lets the runtime wait for an in-flight extraction
    // task to observe the cancellation and remove its staging directory.
    let outcome = tokio::select! {
        outcome = run => Some(outcome),
        Ok(()) = tokio::signal::ctrl_c() => None,
    };
    let Some(outcome) = outcome else {
        warn!("Interrupted, partial downloads and extractions were discarded");
        return Ok(ExitCode::from(130));
    };

    match outcome {
        Ok(StageOutcome::Listed { candidates, latest }) => {
            for backup in &candidates {
                println!("{}", backup);
            }
            println!("{}", latest.archive_url);
        }
        Ok(StageOutcome::Downloaded(archive)) => {
            info!("✅ Archive saved ({} bytes)", archive.size);
            println!("{}", archive.path.display());
        }
        Ok(StageOutcome::Extracted(dataset)) => {
            info!("✅ Snapshot {} ready", dataset.backup);
            println!("{}", dataset.path.display());
        }
        Err(e) => {
            error!(kind = e.kind(), "❌ Error: {}", e);
            return Ok(ExitCode::FAILURE);
        }
    }
    Ok(ExitCode::SUCCESS)
}
