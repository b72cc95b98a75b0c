//! The W3C-extended family: `w3c_extended` and `iis`, whose line regex is built at
//! runtime from a `#Fields:` header rather than fixed at registration time.
//! See SPEC_FULL.md §4.1.

use super::{Fields, Format};
use regex::Regex;
use std::collections::HashMap;
use std::fmt;

/// Known W3C field name -> (canonical Hit field, regex fragment for its value).
/// Fields not in this table still have to match structurally (so the line regex
/// lines up token-for-token with the header), but are captured in a non-counting
/// group — this is the mechanism that lets `iis`'s extra `sc-win32-status` entry win
/// the detector's max-group tie-break over the generic table (SPEC_FULL.md §4.1).
fn base_known_fields() -> HashMap<&'static str, (&'static str, &'static str)> {
    HashMap::from([
        ("date", ("date_part", r"\S+")),
        ("time", ("time_part", r"\S+")),
        ("c-ip", ("ip", r"\S+")),
        ("cs-method", ("method", r"\S+")),
        ("cs-uri-stem", ("path", r"\S+")),
        ("cs-uri-query", ("query_string", r"\S+")),
        ("sc-status", ("status", r"\d+")),
        ("time-taken", ("time_taken", r"\S+")),
        ("cs(User-Agent)", ("user_agent", r"\S+")),
        ("cs(Referer)", ("referrer", r"\S+")),
        ("sc-bytes", ("length", r"\d+")),
        ("cs-host", ("host", r"\S+")),
        ("s-port", ("port", r"\d+")),
    ])
}

/// `iis`'s field table: the base table plus `sc-win32-status`, an IIS-only field that
/// is otherwise never consumed — its sole purpose is to give `iis` one more named
/// group than `w3c_extended` on headers both formats would otherwise match identically.
fn iis_known_fields() -> HashMap<&'static str, (&'static str, &'static str)> {
    let mut table = base_known_fields();
    table.insert("sc-win32-status", ("__win32_status", r"\d+"));
    table
}

#[derive(Debug)]
pub enum W3cBuildError {
    EmptyHeader,
    CustomRegexMissingNamedGroup(String),
    InvalidRegex(String, regex::Error),
}

impl fmt::Display for W3cBuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            W3cBuildError::EmptyHeader => write!(f, "W3C #Fields: header has no fields"),
            W3cBuildError::CustomRegexMissingNamedGroup(field) => write!(
                f,
                "custom regex for field '{field}' must contain at least one named capture group"
            ),
            W3cBuildError::InvalidRegex(field, err) => {
                write!(f, "invalid regex for field '{field}': {err}")
            }
        }
    }
}

impl std::error::Error for W3cBuildError {}

fn sanitize_group_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// A W3C-extended format instance, built from one `#Fields:` header.
pub struct W3cFormat {
    name: String,
    regex: Regex,
    time_taken_is_ms: bool,
    has_time_taken: bool,
}

impl W3cFormat {
    /// Build from the whitespace-split field names of a `#Fields:` header line.
    ///
    /// `known_fields` selects the variant's field table (base for `w3c_extended`, the
    /// win32-status-aware table for `iis`). `field_renames` implements
    /// `--w3c-map-field my-name=date`: header token `my-name` is treated as `date` for
    /// table lookup. `custom_regexes` implements `--w3c-field-regex name=re`: a
    /// self-contained regex fragment (must carry its own named group) that replaces or
    /// adds an entry for `name`.
    pub fn build(
        name: &str,
        header_fields: &[String],
        known_fields: &HashMap<&'static str, (&'static str, &'static str)>,
        field_renames: &HashMap<String, String>,
        custom_regexes: &HashMap<String, String>,
        time_taken_is_ms: bool,
    ) -> Result<Self, W3cBuildError> {
        Self::build_with_unknown_pattern(
            name,
            header_fields,
            known_fields,
            field_renames,
            custom_regexes,
            time_taken_is_ms,
            r"(?:\S+)",
        )
    }

    /// Like `build`, but lets a W3C subvariant override the fallback pattern used for
    /// header fields absent from `known_fields` (e.g. `incapsula_w3c`'s fields are all
    /// double-quoted, so its unknown-field fallback must consume the quotes too).
    #[allow(clippy::too_many_arguments)]
    pub fn build_with_unknown_pattern(
        name: &str,
        header_fields: &[String],
        known_fields: &HashMap<&'static str, (&'static str, &'static str)>,
        field_renames: &HashMap<String, String>,
        custom_regexes: &HashMap<String, String>,
        time_taken_is_ms: bool,
        unknown_field_pattern: &str,
    ) -> Result<Self, W3cBuildError> {
        if header_fields.is_empty() {
            return Err(W3cBuildError::EmptyHeader);
        }

        for (field, pattern) in custom_regexes {
            let compiled = Regex::new(pattern)
                .map_err(|e| W3cBuildError::InvalidRegex(field.clone(), e))?;
            if compiled.capture_names().flatten().count() == 0 {
                return Err(W3cBuildError::CustomRegexMissingNamedGroup(field.clone()));
            }
        }

        let mut has_time_taken = false;
        let mut fragments = Vec::with_capacity(header_fields.len());
        for header_field in header_fields {
            let lookup_key = field_renames
                .get(header_field)
                .map(|s| s.as_str())
                .unwrap_or(header_field.as_str());

            if let Some(custom) = custom_regexes.get(lookup_key) {
                fragments.push(custom.clone());
                continue;
            }

            if lookup_key == "time-taken" {
                has_time_taken = true;
            }

            match known_fields.get(lookup_key) {
                Some((canonical, value_pattern)) if canonical.is_empty() => {
                    // Self-contained fragment: it already carries its own named
                    // group(s) (possibly more than one), so it is used verbatim
                    // rather than wrapped in another capture.
                    fragments.push(value_pattern.to_string());
                }
                Some((canonical, value_pattern)) => {
                    fragments.push(format!("(?P<{canonical}>{value_pattern})"));
                }
                None => {
                    // Unknown field: match structurally but don't capture, so it can
                    // never win a group-count tie-break.
                    let _ = sanitize_group_name(header_field);
                    fragments.push(unknown_field_pattern.to_string());
                }
            }
        }

        let pattern = format!("^{}$", fragments.join(r"\s+"));
        let regex = Regex::new(&pattern).map_err(|e| W3cBuildError::InvalidRegex(name.into(), e))?;

        Ok(Self {
            name: name.to_string(),
            regex,
            time_taken_is_ms,
            has_time_taken,
        })
    }

    pub fn has_time_taken(&self) -> bool {
        self.has_time_taken
    }
}

impl Format for W3cFormat {
    fn name(&self) -> &str {
        &self.name
    }

    fn match_line(&self, line: &str) -> Option<(Fields, usize)> {
        if line.starts_with('#') {
            return None;
        }
        let caps = self.regex.captures(line)?;
        let mut fields = Fields::new();
        let mut group_count = 0;
        for group_name in self.regex.capture_names().flatten() {
            if let Some(m) = caps.name(group_name) {
                fields.insert(group_name.to_string(), m.as_str().to_string());
                group_count += 1;
            }
        }

        let date = match (fields.get("date_part"), fields.get("time_part")) {
            (Some(d), Some(t)) => Some(format!("{d} {t}")),
            (Some(d), None) => Some(d.clone()),
            (None, Some(t)) => Some(t.clone()),
            (None, None) => None,
        };
        if let Some(date) = date {
            fields.insert("date".to_string(), date);
        }

        if let Some(time_taken) = fields.get("time_taken").cloned() {
            let key = if self.time_taken_is_ms { "gt_ms" } else { "gt_s" };
            fields.insert(key.to_string(), time_taken);
        }

        Some((fields, group_count))
    }

    fn date_format(&self) -> &str {
        "%Y-%m-%d %H:%M:%S"
    }

    fn time_taken_needs_ms_warning(&self) -> bool {
        self.has_time_taken
    }

    fn regex_source(&self) -> Option<String> {
        Some(self.regex.as_str().to_string())
    }
}

/// Parse a `#Fields: ...` header line's field list. Returns `None` if `line` is not a
/// `#Fields:` header.
pub fn parse_fields_header(line: &str) -> Option<Vec<String>> {
    line.strip_prefix("#Fields: ")
        .map(|rest| rest.split_whitespace().map(str::to_string).collect())
}

/// Whether a non-`#Fields` comment line hints at an IIS-produced log, for the
/// detector's "warn when time-taken is present without the milliseconds option and the
/// header indicates an IIS server" check (SPEC_FULL.md §4.1).
pub fn looks_like_iis_comment(line: &str) -> bool {
    line.starts_with('#') && !line.starts_with("#Fields:") && line.to_lowercase().contains("iis")
}

pub fn base_fields() -> HashMap<&'static str, (&'static str, &'static str)> {
    base_known_fields()
}

pub fn iis_fields() -> HashMap<&'static str, (&'static str, &'static str)> {
    iis_known_fields()
}
