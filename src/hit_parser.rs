//! Per-line Hit assembly: field extraction, enrichment, and date normalization.
//! See SPEC_FULL.md §4.2.

use std::collections::{HashMap, HashSet};

use url::form_urlencoded;

use crate::error::Rejection;
use crate::filters::{self, FilterConfig};
use crate::formats::Format;
use crate::hit::Hit;
use crate::timestamp;

/// Query-string-terminated path suffixes that mark a replay-mode tracker request
/// (SPEC_FULL.md §4.2). A single user-supplied suffix replaces this list entirely.
pub const DEFAULT_REPLAY_SUFFIXES: &[&str] = &["piwik.php", "ppms.php", "/js/", "/js/tracker.php"];

/// Query parameters that carry a timestamp value and must be shifted by the same
/// offset applied to `cdt`, so replayed visits stay internally consistent
/// (SPEC_FULL.md §4.2).
const REPLAY_TIMESTAMP_ARGS: &[&str] = &["_idts", "_viewts", "_ects", "_refts"];

#[derive(Debug, Clone)]
pub struct ParseConfig {
    pub regex_group_to_visit_cvars_map: HashMap<String, String>,
    pub regex_group_to_page_cvars_map: HashMap<String, String>,
    pub regex_groups_to_ignore: HashSet<String>,
    pub force_lowercase_path: bool,
    pub strip_query_string: bool,
    /// Separator inserted between `path` and `query_string` when a format has no
    /// distinct query-string capture and the raw path must be split on it, and when
    /// request_builder re-synthesizes the live-tracking URL (SPEC_FULL.md §6,
    /// `--query-string-delimiter`). Default `?`, matching the original tool.
    pub query_string_delimiter: String,
    pub log_hostname: Option<String>,
    pub replay_tracking: bool,
    pub replay_suffix: Option<String>,
    pub seconds_to_add_to_date: i64,
    pub timezone: Option<String>,
    pub track_http_method: bool,
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            regex_group_to_visit_cvars_map: HashMap::new(),
            regex_group_to_page_cvars_map: HashMap::new(),
            regex_groups_to_ignore: HashSet::new(),
            force_lowercase_path: false,
            strip_query_string: false,
            query_string_delimiter: "?".to_string(),
            log_hostname: None,
            replay_tracking: false,
            replay_suffix: None,
            seconds_to_add_to_date: 0,
            timezone: None,
            track_http_method: false,
        }
    }
}

impl ParseConfig {
    fn replay_suffixes(&self) -> Vec<&str> {
        match &self.replay_suffix {
            Some(s) => vec![s.as_str()],
            None => DEFAULT_REPLAY_SUFFIXES.to_vec(),
        }
    }
}

/// Build one Hit from a single already-format-matched line.
///
/// `fields` is the canonical field map produced by `Format::match_line`. Runs, in
/// order: custom-variable enrichment, ignored-group removal, canonical field
/// extraction, filter stages 1-7, date parsing, filter stage 8. Returns `Rejection`
/// for a format/date mismatch or any filter-chain rejection.
#[allow(clippy::too_many_arguments)]
pub fn parse_line(
    mut fields: crate::formats::Fields,
    format: &dyn Format,
    filename: Option<&str>,
    lineno: usize,
    parse_config: &ParseConfig,
    filter_config: &FilterConfig,
) -> Result<Hit, Rejection> {
    for ignored in &parse_config.regex_groups_to_ignore {
        fields.shift_remove(ignored);
    }

    let mut hit = Hit::new(filename.map(str::to_string), lineno);
    extract_canonical_fields(&mut hit, &fields, parse_config);

    filters::apply_pre_date(&mut hit, filter_config)?;

    if parse_config.replay_tracking {
        apply_replay_enrichment(&mut hit, parse_config)?;
    }

    let date_str = fields.get("date").ok_or(Rejection::Invalid)?;
    hit.date = Some(
        timestamp::parse_and_normalize(
            date_str,
            format.date_format(),
            parse_config.timezone.as_deref(),
            parse_config.seconds_to_add_to_date,
        )
        .map_err(|_| Rejection::Invalid)?,
    );

    filters::apply_post_date(&hit, filter_config)?;

    Ok(hit)
}

fn populate_cvars(hit: &mut Hit, fields: &crate::formats::Fields, config: &ParseConfig) {
    for (group, cvar_name) in &config.regex_group_to_visit_cvars_map {
        if let Some(value) = fields.get(group) {
            if value != "-" {
                hit.visit_cvars.insert(cvar_name.clone(), value.clone());
            }
        }
    }
    for (group, cvar_name) in &config.regex_group_to_page_cvars_map {
        if let Some(value) = fields.get(group) {
            if value != "-" {
                hit.page_cvars.insert(cvar_name.clone(), value.clone());
            }
        }
    }
}

fn strip_quotes(s: &str) -> &str {
    s.strip_prefix('"').and_then(|s| s.strip_suffix('"')).unwrap_or(s)
}

fn dash_to_empty(s: &str) -> &str {
    if s == "-" {
        ""
    } else {
        s
    }
}

fn extract_canonical_fields(hit: &mut Hit, fields: &crate::formats::Fields, config: &ParseConfig) {
    hit.ip = fields.get("ip").cloned().unwrap_or_default();

    hit.host = fields
        .get("host")
        .map(|h| h.to_lowercase().trim_end_matches('.').to_string())
        .or_else(|| config.log_hostname.clone());

    let raw_path = fields.get("path").cloned().unwrap_or_default();
    let (mut path, mut query_string) = match raw_path.split_once(config.query_string_delimiter.as_str()) {
        Some((p, q)) => (p.to_string(), q.to_string()),
        None => (raw_path.clone(), String::new()),
    };
    if let Some(qs) = fields.get("query_string") {
        if query_string.is_empty() {
            query_string = dash_to_empty(qs).to_string();
        }
    }
    if query_string == "-" {
        query_string = String::new();
    }
    let mut full_path = raw_path;
    if config.force_lowercase_path {
        path = path.to_lowercase();
        full_path = full_path.to_lowercase();
    }
    hit.extension = path
        .rsplit('.')
        .next()
        .filter(|ext| path.contains('.'))
        .unwrap_or("")
        .to_lowercase();
    if config.strip_query_string {
        query_string.clear();
    }
    hit.path = path;
    hit.query_string = query_string;
    hit.full_path = full_path;

    hit.referrer = dash_to_empty(strip_quotes(fields.get("referrer").map(String::as_str).unwrap_or(""))).to_string();
    hit.user_agent =
        dash_to_empty(strip_quotes(fields.get("user_agent").map(String::as_str).unwrap_or(""))).to_string();

    hit.status = fields.get("status").cloned().unwrap_or_default();
    hit.length = fields
        .get("length")
        .map(|s| dash_to_empty(s))
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);

    hit.generation_time_milli = fields
        .get("gt_ms")
        .and_then(|s| s.parse::<u64>().ok())
        .or_else(|| fields.get("gt_us").and_then(|s| s.parse::<u64>().ok()).map(|us| us / 1000))
        .or_else(|| fields.get("gt_s").and_then(|s| s.parse::<u64>().ok()).map(|s| s * 1000));

    hit.method = fields.get("method").cloned();
    if config.track_http_method {
        if let Some(method) = hit.method.as_deref() {
            if method != "-" {
                hit.page_cvars.insert("HTTP-method".to_string(), method.to_string());
            }
        }
    }
    hit.userid = fields
        .get("userid")
        .map(|s| dash_to_empty(s))
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    hit.event_category = fields.get("event_category").cloned();
    hit.event_action = fields.get("event_action").cloned();
    hit.event_name = fields.get("event_name").cloned();

    populate_cvars(hit, fields, config);
}

/// Replay-mode enrichment (SPEC_FULL.md §4.2): requires a non-empty query string and a
/// matching path suffix, then parses the query string into `hit.args`, requiring
/// `idsite`. Adjusts timestamp-valued args by the configured date offset.
fn apply_replay_enrichment(hit: &mut Hit, config: &ParseConfig) -> Result<(), Rejection> {
    if hit.query_string.is_empty() {
        return Err(Rejection::Invalid);
    }
    let path_matches = config
        .replay_suffixes()
        .iter()
        .any(|suffix| hit.full_path.ends_with(suffix) || hit.path.ends_with(suffix));
    if !path_matches {
        return Err(Rejection::Invalid);
    }

    for (key, value) in form_urlencoded::parse(hit.query_string.as_bytes()) {
        hit.args.insert(key.into_owned(), value.into_owned());
    }
    if !hit.args.contains_key("idsite") {
        return Err(Rejection::Invalid);
    }

    if config.seconds_to_add_to_date != 0 {
        for key in REPLAY_TIMESTAMP_ARGS {
            if let Some(value) = hit.args.get(*key).cloned() {
                if let Ok(ts) = value.parse::<i64>() {
                    hit.args
                        .insert(key.to_string(), (ts + config.seconds_to_add_to_date).to_string());
                }
            }
        }
    }

    Ok(())
}
