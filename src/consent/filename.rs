//! Capture file naming.
//!
//! Capture files follow `YYYYMMDDHHMMSS_<name>[_<n>].jpg`:
//! - 14 decimal digits, local time at capture
//! - `<name>`: one or more characters from `[a-z0-9_]`; `unknown` is
//!   reserved for unnamed captures
//! - optional `_<n>` with n >= 2 disambiguates colliding timestamps
//!
//! Files that do not match this grammar are ignored by the registry.

use chrono::NaiveDateTime;

pub const FILE_EXTENSION: &str = ".jpg";
const TIMESTAMP_LENGTH: usize = 14;
const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Name used when consent was detected without a recognizable name.
pub const UNKNOWN_NAME: &str = "unknown";

/// A parsed capture filename.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ParsedCapture {
    pub timestamp: String,
    pub name: String,
    pub suffix: Option<u32>,
}

/// Normalizes a spoken or transcribed name into a filename-safe token:
/// lowercase `[a-z0-9_]`, spaces and punctuation collapsed to single
/// underscores. Empty or unusable input maps to "unknown".
pub fn sanitize_name(name: Option<&str>) -> String {
    let Some(name) = name else {
        return UNKNOWN_NAME.to_string();
    };

    let lowered = name.to_lowercase();
    let mapped: String = lowered
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let collapsed: String = mapped
        .split('_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_");

    if collapsed.is_empty() {
        UNKNOWN_NAME.to_string()
    } else {
        collapsed
    }
}

/// Builds a capture filename for the given sanitized name and timestamp,
/// with an optional collision suffix (n >= 2).
pub fn capture_filename(name: &str, timestamp: &NaiveDateTime, suffix: Option<u32>) -> String {
    let stamp = timestamp.format(TIMESTAMP_FORMAT);
    match suffix {
        Some(n) => format!("{stamp}_{name}_{n}{FILE_EXTENSION}"),
        None => format!("{stamp}_{name}{FILE_EXTENSION}"),
    }
}

/// Parses a capture filename. Returns None for anything outside the grammar.
pub fn parse_capture_filename(filename: &str) -> Option<ParsedCapture> {
    let stem = filename.strip_suffix(FILE_EXTENSION)?;

    if stem.len() < TIMESTAMP_LENGTH + 2 {
        return None;
    }

    let (timestamp, rest) = stem.split_at(TIMESTAMP_LENGTH);
    if !timestamp.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let rest = rest.strip_prefix('_')?;
    if rest.is_empty() {
        return None;
    }

    if !rest
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
    {
        return None;
    }

    // A trailing `_<n>` with n >= 2 is a collision suffix, not part of the
    // name. A name may itself end in digits ("agent7"), so the suffix is
    // only split off when an underscore separates it.
    let (name, suffix) = match rest.rsplit_once('_') {
        Some((head, tail)) if !head.is_empty() => match tail.parse::<u32>() {
            Ok(n) if n >= 2 && !tail.starts_with('0') => (head.to_string(), Some(n)),
            _ => (rest.to_string(), None),
        },
        _ => (rest.to_string(), None),
    };

    if name.is_empty() {
        return None;
    }

    Some(ParsedCapture {
        timestamp: timestamp.to_string(),
        name,
        suffix,
    })
}

/// Extracts the person name from a capture path, if it parses.
pub fn name_from_path(path: &std::path::Path) -> Option<String> {
    let filename = path.file_name()?.to_str()?;
    parse_capture_filename(filename).map(|parsed| parsed.name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::path::Path;

    fn stamp() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 14)
            .unwrap()
            .and_hms_opt(15, 9, 26)
            .unwrap()
    }

    #[test]
    fn test_sanitize_none_is_unknown() {
        assert_eq!(sanitize_name(None), "unknown");
    }

    #[test]
    fn test_sanitize_empty_is_unknown() {
        assert_eq!(sanitize_name(Some("")), "unknown");
        assert_eq!(sanitize_name(Some("   ")), "unknown");
        assert_eq!(sanitize_name(Some("!!!")), "unknown");
    }

    #[test]
    fn test_sanitize_lowercases() {
        assert_eq!(sanitize_name(Some("Alice")), "alice");
        assert_eq!(sanitize_name(Some("ALICE")), "alice");
    }

    #[test]
    fn test_sanitize_spaces_to_underscores() {
        assert_eq!(sanitize_name(Some("Mary Jane")), "mary_jane");
        assert_eq!(sanitize_name(Some("  Mary   Jane  ")), "mary_jane");
    }

    #[test]
    fn test_sanitize_strips_punctuation() {
        assert_eq!(sanitize_name(Some("O'Brien")), "o_brien");
        assert_eq!(sanitize_name(Some("José")), "jos");
    }

    #[test]
    fn test_sanitize_collapses_underscores() {
        assert_eq!(sanitize_name(Some("a__b___c")), "a_b_c");
        assert_eq!(sanitize_name(Some("_alice_")), "alice");
    }

    #[test]
    fn test_sanitize_keeps_digits() {
        assert_eq!(sanitize_name(Some("agent 7")), "agent_7");
    }

    #[test]
    fn test_capture_filename_plain() {
        assert_eq!(
            capture_filename("alice", &stamp(), None),
            "20250314150926_alice.jpg"
        );
    }

    #[test]
    fn test_capture_filename_with_suffix() {
        assert_eq!(
            capture_filename("alice", &stamp(), Some(2)),
            "20250314150926_alice_2.jpg"
        );
    }

    #[test]
    fn test_parse_roundtrip_plain() {
        let parsed = parse_capture_filename("20250314150926_alice.jpg").unwrap();
        assert_eq!(parsed.timestamp, "20250314150926");
        assert_eq!(parsed.name, "alice");
        assert_eq!(parsed.suffix, None);
    }

    #[test]
    fn test_parse_roundtrip_suffix() {
        let parsed = parse_capture_filename("20250314150926_alice_3.jpg").unwrap();
        assert_eq!(parsed.name, "alice");
        assert_eq!(parsed.suffix, Some(3));
    }

    #[test]
    fn test_parse_multiword_name() {
        let parsed = parse_capture_filename("20250314150926_mary_jane.jpg").unwrap();
        assert_eq!(parsed.name, "mary_jane");
        assert_eq!(parsed.suffix, None);
    }

    #[test]
    fn test_parse_name_ending_in_digits() {
        // "agent7" has no separating underscore before the digits.
        let parsed = parse_capture_filename("20250314150926_agent7.jpg").unwrap();
        assert_eq!(parsed.name, "agent7");
        assert_eq!(parsed.suffix, None);
    }

    #[test]
    fn test_parse_suffix_one_is_part_of_name() {
        // n >= 2 in the grammar; "_1" stays part of the name.
        let parsed = parse_capture_filename("20250314150926_alice_1.jpg").unwrap();
        assert_eq!(parsed.name, "alice_1");
        assert_eq!(parsed.suffix, None);
    }

    #[test]
    fn test_parse_rejects_bad_extension() {
        assert!(parse_capture_filename("20250314150926_alice.png").is_none());
        assert!(parse_capture_filename("20250314150926_alice").is_none());
    }

    #[test]
    fn test_parse_rejects_short_timestamp() {
        assert!(parse_capture_filename("2025031415092_alice.jpg").is_none());
    }

    #[test]
    fn test_parse_rejects_non_digit_timestamp() {
        assert!(parse_capture_filename("2025031415092x_alice.jpg").is_none());
    }

    #[test]
    fn test_parse_rejects_missing_separator() {
        assert!(parse_capture_filename("20250314150926alice.jpg").is_none());
    }

    #[test]
    fn test_parse_rejects_empty_name() {
        assert!(parse_capture_filename("20250314150926_.jpg").is_none());
    }

    #[test]
    fn test_parse_rejects_uppercase_name() {
        assert!(parse_capture_filename("20250314150926_Alice.jpg").is_none());
    }

    #[test]
    fn test_parse_unknown_reserved_name() {
        let parsed = parse_capture_filename("20250314150926_unknown.jpg").unwrap();
        assert_eq!(parsed.name, "unknown");
    }

    #[test]
    fn test_name_from_path() {
        let path = Path::new("/var/captures/20250314150926_alice_2.jpg");
        assert_eq!(name_from_path(path), Some("alice".to_string()));

        let bad = Path::new("/var/captures/readme.txt");
        assert_eq!(name_from_path(bad), None);
    }
}
