//! Format auto-detection: scores candidate formats against headers and/or the first
//! N lines of an input source. See SPEC_FULL.md §4.1.

use super::{w3c, Format};
use std::collections::HashMap;
use std::fmt;

/// Cap on how many lines the detector will try before giving up (SPEC_FULL.md §4.1).
pub const MAX_DETECTION_LINES: usize = 100_000;

#[derive(Debug, Default, Clone)]
pub struct W3cDetectionConfig {
    pub field_renames: HashMap<String, String>,
    pub custom_regexes: HashMap<String, String>,
    pub time_taken_is_ms: bool,
}

#[derive(Debug)]
pub enum DetectionError {
    /// No registered, auto-detectable format matched any sampled line. Fatal per
    /// SPEC_FULL.md §7.
    NoFormatMatched,
    /// A custom W3C field regex was invalid or lacked a named capture group.
    InvalidW3cConfig(w3c::W3cBuildError),
}

impl fmt::Display for DetectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectionError::NoFormatMatched => {
                write!(f, "could not detect a log format from the input")
            }
            DetectionError::InvalidW3cConfig(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for DetectionError {}

/// Result of a successful detection: the chosen format plus an optional warning to
/// surface through the ambient logging facility (SPEC_FULL.md §10.2).
pub struct Detection {
    pub format: Box<dyn Format>,
    pub warning: Option<String>,
}

/// Detect the format of an input source.
///
/// `header_lines` are the leading `#`-prefixed lines collected before the first
/// ordinary line (used to build the W3C-extended family, if a `#Fields:` header is
/// present). `sample_lines` are the lines tried one by one, up to
/// `MAX_DETECTION_LINES`.
pub fn detect_format(
    header_lines: &[String],
    sample_lines: &[String],
    w3c_config: &W3cDetectionConfig,
) -> Result<Detection, DetectionError> {
    let mut candidates: Vec<Box<dyn Format>> = super::builtin_formats()
        .into_iter()
        .filter(|f| f.auto_detectable())
        .collect();

    let is_iis_hint = header_lines.iter().any(|l| w3c::looks_like_iis_comment(l));
    if let Some(header_fields) = header_lines.iter().find_map(|l| w3c::parse_fields_header(l)) {
        let w3c_fmt = w3c::W3cFormat::build(
            "w3c_extended",
            &header_fields,
            &w3c::base_fields(),
            &w3c_config.field_renames,
            &w3c_config.custom_regexes,
            w3c_config.time_taken_is_ms,
        )
        .map_err(DetectionError::InvalidW3cConfig)?;
        candidates.push(Box::new(w3c_fmt));

        let iis_fmt = w3c::W3cFormat::build(
            "iis",
            &header_fields,
            &w3c::iis_fields(),
            &w3c_config.field_renames,
            &w3c_config.custom_regexes,
            w3c_config.time_taken_is_ms,
        )
        .map_err(DetectionError::InvalidW3cConfig)?;
        candidates.push(Box::new(iis_fmt));

        let cloudfront_fmt = super::CloudFrontFormat::build(
            &header_fields,
            &w3c_config.field_renames,
            &w3c_config.custom_regexes,
            w3c_config.time_taken_is_ms,
        )
        .map_err(DetectionError::InvalidW3cConfig)?;
        candidates.push(Box::new(cloudfront_fmt));

        let incapsula_fmt = super::IncapsulaW3cFormat::build(
            &header_fields,
            &w3c_config.field_renames,
            &w3c_config.custom_regexes,
            w3c_config.time_taken_is_ms,
        )
        .map_err(DetectionError::InvalidW3cConfig)?;
        candidates.push(Box::new(incapsula_fmt));

        let shoutcast_fmt = super::ShoutcastFormat::build(
            &header_fields,
            &w3c_config.field_renames,
            &w3c_config.custom_regexes,
            w3c_config.time_taken_is_ms,
        )
        .map_err(DetectionError::InvalidW3cConfig)?;
        candidates.push(Box::new(shoutcast_fmt));
    }

    // Line-outer, format-inner: test every candidate against the first sample line,
    // then the second, and so on, stopping at the first line any candidate matches.
    // This mirrors check_format/detect_format's per-line scan rather than scanning
    // each format across the whole sample in turn, so a format that would match a
    // later line never shadows one that already matched an earlier line.
    let mut best: Option<(usize, usize)> = None;
    for (checked, line) in sample_lines.iter().enumerate() {
        if checked >= MAX_DETECTION_LINES {
            break;
        }
        for (idx, candidate) in candidates.iter().enumerate() {
            if let Some((_, group_count)) = candidate.match_line(line) {
                let is_better = match best {
                    None => true,
                    Some((_, best_groups)) => group_count > best_groups,
                };
                if is_better {
                    best = Some((idx, group_count));
                }
            }
        }
        if best.is_some() {
            break;
        }
    }

    let (winner_idx, _) = best.ok_or(DetectionError::NoFormatMatched)?;
    let format = candidates.into_iter().nth(winner_idx).unwrap();

    let warning = if format.time_taken_needs_ms_warning() && !w3c_config.time_taken_is_ms && is_iis_hint {
        Some(
            "time-taken field is present without --w3c-time-taken-millisecs on what looks like an IIS log; values will be interpreted as seconds"
                .to_string(),
        )
    } else {
        None
    };

    Ok(Detection { format, warning })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_common_log_format() {
        let lines = vec![
            r#"127.0.0.1 - frank [10/Oct/2000:13:55:36 -0700] "GET /apache_pb.gif HTTP/1.0" 200 2326"#
                .to_string(),
        ];
        let detection = detect_format(&[], &lines, &W3cDetectionConfig::default()).unwrap();
        assert_eq!(detection.format.name(), "common");
        assert!(detection.warning.is_none());
    }

    #[test]
    fn detects_combined_over_common_via_group_count() {
        let lines = vec![
            r#"127.0.0.1 - - [10/Oct/2000:13:55:36 -0700] "GET / HTTP/1.1" 200 512 "https://ref.example/" "Mozilla/5.0""#
                .to_string(),
        ];
        let detection = detect_format(&[], &lines, &W3cDetectionConfig::default()).unwrap();
        assert_eq!(detection.format.name(), "ncsa_extended");
    }

    #[test]
    fn iis_header_wins_over_generic_w3c_extended() {
        let header = vec![
            "#Software: Microsoft IIS 7.5".to_string(),
            "#Fields: date time c-ip cs-method cs-uri-stem sc-status sc-win32-status".to_string(),
        ];
        let lines = vec!["2024-01-01 00:00:00 10.0.0.1 GET /a 200 0".to_string()];
        let detection = detect_format(&header, &lines, &W3cDetectionConfig::default()).unwrap();
        assert_eq!(detection.format.name(), "iis");
    }

    #[test]
    fn warns_when_time_taken_present_without_millisecs_on_iis_log() {
        let header = vec![
            "#Software: Microsoft IIS 7.5".to_string(),
            "#Fields: date time c-ip cs-method cs-uri-stem time-taken sc-status".to_string(),
        ];
        let lines = vec!["2024-01-01 00:00:00 10.0.0.1 GET /a 15 200".to_string()];
        let detection = detect_format(&header, &lines, &W3cDetectionConfig::default()).unwrap();
        assert!(detection.warning.is_some());
    }

    #[test]
    fn no_match_is_an_error() {
        let lines = vec!["not a log line at all".to_string()];
        let result = detect_format(&[], &lines, &W3cDetectionConfig::default());
        assert!(matches!(result, Err(DetectionError::NoFormatMatched)));
    }

    #[test]
    fn first_matching_line_wins_over_a_better_match_later_in_the_sample() {
        // The first line only ever matches `common`; a later, more heavily captured
        // `ncsa_extended`-shaped line must not steal the win, since detection stops at
        // the first line any candidate matches.
        let lines = vec![
            r#"127.0.0.1 - frank [10/Oct/2000:13:55:36 -0700] "GET /apache_pb.gif HTTP/1.0" 200 2326"#
                .to_string(),
            r#"127.0.0.1 - - [10/Oct/2000:13:55:37 -0700] "GET / HTTP/1.1" 200 512 "https://ref.example/" "Mozilla/5.0""#
                .to_string(),
        ];
        let detection = detect_format(&[], &lines, &W3cDetectionConfig::default()).unwrap();
        assert_eq!(detection.format.name(), "common");
    }

    #[test]
    fn garbage_lines_before_real_data_are_skipped_without_affecting_the_winner() {
        let lines = vec![
            "not a log line at all".to_string(),
            "# a comment some exporters prepend".to_string(),
            r#"127.0.0.1 - - [10/Oct/2000:13:55:36 -0700] "GET / HTTP/1.1" 200 512 "https://ref.example/" "Mozilla/5.0""#
                .to_string(),
        ];
        let detection = detect_format(&[], &lines, &W3cDetectionConfig::default()).unwrap();
        assert_eq!(detection.format.name(), "ncsa_extended");
    }

    #[test]
    fn ovh_is_never_proposed_by_detection() {
        let lines = vec![r#"{"client_ip":"1.2.3.4","http_method":"GET","url":"/a","status_code":"200"}"#.to_string()];
        // ovh is structurally close to nginx_json's field names but uses different
        // keys, so it simply won't match either -- the point under test is that it is
        // excluded from the candidate list regardless.
        let result = detect_format(&[], &lines, &W3cDetectionConfig::default());
        assert!(matches!(result, Err(DetectionError::NoFormatMatched)));
    }
}
