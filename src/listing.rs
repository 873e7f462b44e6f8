//! Backup name tokenizer and latest-backup selection.
//!
//! The mirror's index page is not a stable API. Only tokens of the form
//! `backup` followed by exactly eight digits that form a valid `YYYYMMDD`
//! calendar date are trusted; everything else in the page is ignored.

use crate::error::AcquireError;
use crate::types::{BackupId, BACKUP_PREFIX};
use chrono::NaiveDate;
use std::collections::BTreeSet;
use tracing::debug;

const DATE_DIGITS: usize = 8;

/// Extracts every well-formed backup identifier from arbitrary page text.
///
/// A token matches when:
/// - the character before `backup` is not an ASCII alphanumeric or `_`,
/// - exactly eight ASCII digits follow (a ninth digit rejects the token),
/// - the digits parse as a real calendar date.
pub fn parse_listing(text: &str) -> BTreeSet<BackupId> {
    let bytes = text.as_bytes();
    let prefix = BACKUP_PREFIX.as_bytes();
    let mut found = BTreeSet::new();
    let mut pos = 0;

    while let Some(offset) = find(&bytes[pos..], prefix) {
        let start = pos + offset;
        let digits_start = start + prefix.len();
        pos = digits_start;

        if start > 0 && is_word_byte(bytes[start - 1]) {
            continue;
        }

        let digits_end = digits_start + DATE_DIGITS;
        if digits_end > bytes.len()
            || !bytes[digits_start..digits_end]
                .iter()
                .all(u8::is_ascii_digit)
        {
            continue;
        }
        if bytes.get(digits_end).is_some_and(u8::is_ascii_digit) {
            continue;
        }

        match parse_date(&bytes[digits_start..digits_end]) {
            Some(date) => {
                found.insert(BackupId::new(date));
            }
            None => debug!(
                "Ignoring backup token with invalid date: {}",
                &text[start..digits_end]
            ),
        }
        pos = digits_end;
    }

    found
}

/// Returns the candidate with the latest calendar date.
pub fn select_latest(
    candidates: &BTreeSet<BackupId>,
    index_url: &str,
) -> Result<BackupId, AcquireError> {
    candidates
        .iter()
        .max()
        .copied()
        .ok_or_else(|| AcquireError::NoBackupAvailable(index_url.to_string()))
}

/// Parses eight ASCII digits as `YYYYMMDD`.
fn parse_date(digits: &[u8]) -> Option<NaiveDate> {
    let num = |range: std::ops::Range<usize>| {
        digits[range]
            .iter()
            .fold(0u32, |acc, d| acc * 10 + u32::from(d - b'0'))
    };
    NaiveDate::from_ymd_opt(num(0..4) as i32, num(4..6), num(6..8))
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> BackupId {
        BackupId::new(NaiveDate::parse_from_str(s, "%Y%m%d").unwrap())
    }

    fn names(set: &BTreeSet<BackupId>) -> Vec<String> {
        set.iter().map(BackupId::name).collect()
    }

    #[test]
    fn test_parse_nginx_autoindex() {
        let page = r#"<html><head><title>Index of /</title></head><body>
<h1>Index of /</h1><hr><pre><a href="../">../</a>
<a href="backup20250601/">backup20250601/</a>    01-Jun-2025 02:10    -
<a href="backup20250715/">backup20250715/</a>    15-Jul-2025 02:11    -
<a href="logs/">logs/</a>                         15-Jul-2025 02:11    -
</pre><hr></body></html>"#;

        assert_eq!(
            names(&parse_listing(page)),
            vec!["backup20250601", "backup20250715"]
        );
    }

    #[test]
    fn test_parse_mixed_tokens_keeps_only_valid_and_dedups() {
        let page = "backup20240101 backup20240101 backup2024010 backup202401011 \
                    oldbackup20240202 backup_20240303 backup20241340 backup20230229 \
                    BACKUP20240404 backup20240505.tgz (backup20240606)";

        assert_eq!(
            names(&parse_listing(page)),
            vec!["backup20240101", "backup20240505", "backup20240606"]
        );
    }

    #[test]
    fn test_parse_leap_day() {
        let set = parse_listing("backup20240229 backup20250229");
        assert_eq!(names(&set), vec!["backup20240229"]);
    }

    #[test]
    fn test_parse_truncated_at_end_of_text() {
        assert!(parse_listing("junk backup2025").is_empty());
        assert!(parse_listing("").is_empty());
    }

    #[test]
    fn test_parse_handles_non_ascii_text() {
        let set = parse_listing("résumé → backup20250101 ✓");
        assert_eq!(names(&set), vec!["backup20250101"]);
    }

    #[test]
    fn test_select_latest_uses_calendar_order() {
        let candidates: BTreeSet<_> = ["20240101", "20241231", "20240601"]
            .into_iter()
            .map(id)
            .collect();

        let latest = select_latest(&candidates, "http://host/").unwrap();
        assert_eq!(latest.name(), "backup20241231");
    }

    #[test]
    fn test_select_latest_across_year_boundary() {
        let candidates: BTreeSet<_> = ["20241231", "20250101"].into_iter().map(id).collect();
        assert_eq!(
            select_latest(&candidates, "http://host/").unwrap(),
            id("20250101")
        );
    }

    #[test]
    fn test_select_latest_empty() {
        let result = select_latest(&BTreeSet::new(), "http://host/");
        assert!(matches!(result, Err(AcquireError::NoBackupAvailable(_))));
    }
}
