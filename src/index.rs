//! Mirror index fetching.

use crate::error::AcquireError;
use crate::listing::parse_listing;
use crate::retry::{is_transient_status, with_retry, Failure};
use crate::types::{AcquireConfig, BackupId};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::collections::BTreeSet;
use tracing::info;

/// Downloads the mirror's index page and returns the backups it lists.
///
/// # Arguments
///
/// * `client` - Shared HTTP client
/// * `index_url` - URL of the directory listing
/// * `config` - Acquisition configuration (retry policy, index timeout)
///
/// # Returns
///
/// The deduplicated set of valid backups, possibly empty, or a
/// [`AcquireError::Discovery`] when the page cannot be fetched or is not a
/// text listing.
pub(crate) async fn list_candidates(
    client: &Client,
    index_url: &str,
    config: &AcquireConfig,
) -> Result<BTreeSet<BackupId>, AcquireError> {
    info!("Retrieving backup index from {}", index_url);

    let body = with_retry(&config.retry, "index fetch", || {
        fetch_index_once(client, index_url, config)
    })
    .await?;

    let candidates = parse_listing(&body);
    info!(
        "Found {} backup(s) in index: {}",
        candidates.len(),
        candidates
            .iter()
            .map(BackupId::name)
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(candidates)
}

async fn fetch_index_once(
    client: &Client,
    index_url: &str,
    config: &AcquireConfig,
) -> Result<String, Failure> {
    let response = client
        .get(index_url)
        .timeout(config.index_timeout)
        .send()
        .await
        .map_err(|e| Failure::Transient(AcquireError::discovery(index_url, e)))?;

    // Check HTTP status code
    let status = response.status();
    if !status.is_success() {
        let e = AcquireError::discovery(index_url, format!("HTTP {}", status));
        return Err(if is_transient_status(status) {
            Failure::Transient(e)
        } else {
            Failure::Permanent(e)
        });
    }

    if let Some(content_type) = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    {
        if !is_listing_content_type(content_type) {
            return Err(Failure::Permanent(AcquireError::discovery(
                index_url,
                format!("unexpected content type '{}'", content_type),
            )));
        }
    }

    let body = response
        .text()
        .await
        .map_err(|e| Failure::Transient(AcquireError::discovery(index_url, e)))?;

    if body.trim().is_empty() {
        return Err(Failure::Permanent(AcquireError::discovery(
            index_url,
            "index page is empty",
        )));
    }

    Ok(body)
}

/// Directory listings are served as HTML or plain text.
fn is_listing_content_type(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    mime.starts_with("text/") || mime == "application/xhtml+xml"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RetryPolicy;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_config() -> AcquireConfig {
        AcquireConfig {
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(0),
                max_delay: Duration::from_millis(0),
            },
            ..AcquireConfig::default()
        }
    }

    fn html(body: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/html")
    }

    #[tokio::test]
    async fn test_list_candidates_ignores_junk() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(html(
                "<a>backup20250601</a> <a>backup20250715</a> junk backup2025 backup20250601",
            ))
            .mount(&mock_server)
            .await;

        let url = format!("{}/", mock_server.uri());
        let candidates = list_candidates(&Client::new(), &url, &fast_config())
            .await
            .unwrap();

        let names: Vec<_> = candidates.iter().map(BackupId::name).collect();
        assert_eq!(names, vec!["backup20250601", "backup20250715"]);
    }

    #[tokio::test]
    async fn test_list_candidates_retries_server_errors() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .respond_with(html("backup20250101"))
            .mount(&mock_server)
            .await;

        let candidates = list_candidates(&Client::new(), &mock_server.uri(), &fast_config())
            .await
            .unwrap();
        assert_eq!(candidates.len(), 1);
    }

    #[tokio::test]
    async fn test_list_candidates_surfaces_exhaustion() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .expect(3)
            .mount(&mock_server)
            .await;

        let result = list_candidates(&Client::new(), &mock_server.uri(), &fast_config()).await;
        assert!(matches!(result, Err(AcquireError::Discovery { .. })));
    }

    #[tokio::test]
    async fn test_list_candidates_does_not_retry_not_found() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&mock_server)
            .await;

        let result = list_candidates(&Client::new(), &mock_server.uri(), &fast_config()).await;
        assert!(matches!(result, Err(AcquireError::Discovery { .. })));
    }

    #[tokio::test]
    async fn test_list_candidates_rejects_binary_content() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(b"backup20250101".to_vec(), "application/octet-stream"),
            )
            .mount(&mock_server)
            .await;

        let result = list_candidates(&Client::new(), &mock_server.uri(), &fast_config()).await;
        assert!(matches!(result, Err(AcquireError::Discovery { .. })));
    }

    #[tokio::test]
    async fn test_list_candidates_rejects_empty_body() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(html("  \n"))
            .mount(&mock_server)
            .await;

        let result = list_candidates(&Client::new(), &mock_server.uri(), &fast_config()).await;
        assert!(matches!(result, Err(AcquireError::Discovery { .. })));
    }

    #[tokio::test]
    async fn test_list_candidates_unreachable() {
        let result = list_candidates(
            &Client::new(),
            "http://127.0.0.1:9/",
            &fast_config(),
        )
        .await;
        assert!(matches!(result, Err(AcquireError::Discovery { .. })));
    }

    #[test]
    fn test_listing_content_types() {
        assert!(is_listing_content_type("text/html; charset=utf-8"));
        assert!(is_listing_content_type("text/plain"));
        assert!(is_listing_content_type("TEXT/HTML"));
        assert!(!is_listing_content_type("application/gzip"));
    }
}
