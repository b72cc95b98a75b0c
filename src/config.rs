//! Merges the parsed CLI flags (and an optional JSON config file) into the validated
//! `Config` that every other module is built from. See SPEC_FULL.md §6 and §10.3.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::cli::Cli;
use crate::error::Fatal;
use crate::filters::FilterConfig;
use crate::formats::{self, CustomRegexFormat, Format, W3cDetectionConfig};
use crate::hit_parser::ParseConfig;
use crate::http_client::HttpClientConfig;
use crate::recorder::{RecorderConfig, SendMode};
use crate::request_builder::RequestBuilderConfig;

/// How sites are resolved for incoming hits (SPEC_FULL.md §4.4).
pub enum SiteSelection {
    Static(String),
    Dynamic,
}

/// Which format parses each input line (SPEC_FULL.md §4.1).
pub enum FormatSelection {
    Auto,
    Named(String),
    Custom(Box<dyn Format>),
}

/// The fully merged and validated run configuration.
pub struct Config {
    pub files: Vec<String>,
    pub skip: usize,
    pub debug: u8,
    pub debug_request_limit: Option<usize>,
    pub dry_run: bool,
    pub dump_log_regex: bool,
    pub output: Option<PathBuf>,

    pub site_selection: SiteSelection,
    pub replay_tracking: bool,

    pub format_selection: FormatSelection,
    pub w3c_detection: W3cDetectionConfig,
    pub w3c_fields_header: Option<String>,

    pub recorder: RecorderConfig,
    pub http_client: HttpClientConfig,
    pub filter: FilterConfig,
    pub parse: ParseConfig,
    pub request_builder: RequestBuilderConfig,
}

/// Mirrors `Cli` with every field optional, for the `--config <path>` JSON layer. CLI
/// flags that were actually given on the command line win; everything else falls back
/// to whatever the file supplies (SPEC_FULL.md §10.3).
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "snake_case")]
struct FileConfig {
    files: Option<Vec<String>>,
    debug: Option<u8>,
    debug_request_limit: Option<usize>,
    sleep_between_requests_ms: Option<f64>,
    piwik_url: Option<String>,
    piwik_api_url: Option<String>,
    tracker_endpoint_path: Option<String>,
    dry_run: Option<bool>,
    site_id: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    auth_user: Option<String>,
    auth_password: Option<String>,
    hostnames: Option<Vec<String>>,
    excluded_paths: Option<Vec<String>>,
    included_paths: Option<Vec<String>>,
    excluded_useragents: Option<Vec<String>>,
    enable_static: Option<bool>,
    enable_bots: Option<bool>,
    enable_http_errors: Option<bool>,
    enable_http_redirects: Option<bool>,
    reverse_dns: Option<bool>,
    strip_query_string: Option<bool>,
    query_string_delimiter: Option<String>,
    force_lowercase_path: Option<bool>,
    log_format_name: Option<String>,
    log_format_regex: Option<String>,
    log_date_format: Option<String>,
    log_hostname: Option<String>,
    skip: Option<usize>,
    recorders: Option<usize>,
    recorder_max_payload_size: Option<usize>,
    replay_tracking: Option<bool>,
    replay_tracking_expected_tracker_file: Option<String>,
    disable_bulk_tracking: Option<bool>,
    download_extensions: Option<Vec<String>>,
    extra_download_extensions: Option<Vec<String>>,
    custom_w3c_fields: Option<Vec<String>>,
    w3c_time_taken_in_millisecs: Option<bool>,
    w3c_fields: Option<String>,
    w3c_field_regexes: Option<Vec<String>>,
    title_category_delimiter: Option<String>,
    regex_groups_to_ignore: Option<Vec<String>>,
    regex_group_to_visit_cvars_map: Option<Vec<String>>,
    regex_group_to_page_cvars_map: Option<Vec<String>>,
    track_http_method: Option<bool>,
    max_attempts: Option<u32>,
    delay_after_failure: Option<u64>,
    request_timeout: Option<u64>,
    include_host: Option<Vec<String>>,
    exclude_host: Option<Vec<String>>,
    exclude_older_than: Option<String>,
    exclude_newer_than: Option<String>,
    seconds_to_add_to_date: Option<i64>,
    accept_invalid_ssl_certificate: Option<bool>,
}

fn load_file_config(path: &Path) -> Result<FileConfig, Fatal> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Fatal::new(format!("failed to read config file '{}': {e}", path.display())))?;
    serde_json::from_str(&text)
        .map_err(|e| Fatal::new(format!("config file '{}' is not valid: {e}", path.display())))
}

fn opt<T>(cli: Option<T>, file: Option<T>) -> Option<T> {
    cli.or(file)
}

fn vec_or(cli: Vec<String>, file: Option<Vec<String>>) -> Vec<String> {
    if cli.is_empty() {
        file.unwrap_or_default()
    } else {
        cli
    }
}

fn bool_or(cli: bool, file: Option<bool>) -> bool {
    cli || file.unwrap_or(false)
}

fn num_or<T: PartialEq + Copy>(cli: T, default: T, file: Option<T>) -> T {
    if cli != default {
        cli
    } else {
        file.unwrap_or(default)
    }
}

/// Splits a `KEY=VALUE` list into a map, for flags like `--regex-group-to-visit-cvar`.
fn parse_kv_pairs(pairs: &[String], flag: &str) -> Result<HashMap<String, String>, Fatal> {
    let mut map = HashMap::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| Fatal::new(format!("{flag} expects KEY=VALUE, got '{pair}'")))?;
        map.insert(key.to_string(), value.to_string());
    }
    Ok(map)
}

fn load_path_list(path: &Path) -> Result<Vec<String>, Fatal> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Fatal::new(format!("failed to read '{}': {e}", path.display())))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Expands glob patterns in the file list (the literal `-` stdin sentinel passes
/// through untouched), then sorts and dedups.
fn expand_files(raw: &[String]) -> Result<Vec<String>, Fatal> {
    let mut out = Vec::new();
    for pattern in raw {
        if pattern == "-" {
            out.push(pattern.clone());
            continue;
        }
        if pattern.contains(['*', '?', '[']) {
            let matched: Vec<String> = glob::glob(pattern)
                .map_err(|e| Fatal::new(format!("invalid glob '{pattern}': {e}")))?
                .filter_map(|entry| entry.ok())
                .map(|p| p.to_string_lossy().into_owned())
                .collect();
            if matched.is_empty() {
                return Err(Fatal::new(format!("glob '{pattern}' matched no files")));
            }
            out.extend(matched);
        } else {
            out.push(pattern.clone());
        }
    }
    out.sort();
    out.dedup();
    Ok(out)
}

fn parse_boundary_date(s: &str, flag: &str) -> Result<DateTime<Utc>, Fatal> {
    DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S %z")
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            Fatal::new(format!(
                "{flag} '{s}' is not a valid date (expected 'YYYY-MM-DD HH:MM:SS +0000'): {e}"
            ))
        })
}

impl Config {
    /// Build and validate a `Config` from parsed CLI flags, optionally layering an
    /// `--config` JSON file underneath them.
    pub fn build(cli: Cli) -> Result<Config, Fatal> {
        let file = match &cli.config {
            Some(path) => load_file_config(path)?,
            None => FileConfig::default(),
        };

        let files_raw = if cli.files.is_empty() {
            file.files.clone().unwrap_or_default()
        } else {
            cli.files.clone()
        };
        if files_raw.is_empty() {
            return Err(Fatal::new("no input files given"));
        }
        let files = expand_files(&files_raw)?;

        let piwik_url = opt(cli.piwik_url.clone(), file.piwik_url.clone())
            .ok_or_else(|| Fatal::new("--url is required (or set piwik_url in the config file)"))?;

        let dry_run = bool_or(cli.dry_run, file.dry_run);
        let replay_tracking = bool_or(cli.replay_tracking, file.replay_tracking);

        let site_selection = match opt(cli.site_id.clone(), file.site_id.clone()) {
            Some(id) => SiteSelection::Static(id),
            None => SiteSelection::Dynamic,
        };

        let log_format_regex = opt(cli.log_format_regex.clone(), file.log_format_regex.clone());
        let log_format_name = opt(cli.log_format_name.clone(), file.log_format_name.clone());
        let log_date_format = opt(cli.log_date_format.clone(), file.log_date_format.clone());
        let format_selection = if let Some(pattern) = &log_format_regex {
            let date_format = log_date_format
                .clone()
                .ok_or_else(|| Fatal::new("--log-format-regex requires --log-date-format"))?;
            let custom = CustomRegexFormat::new(pattern, date_format)
                .map_err(|e| Fatal::new(format!("invalid --log-format-regex: {e}")))?;
            FormatSelection::Custom(Box::new(custom))
        } else if let Some(name) = &log_format_name {
            if formats::lookup(name).is_none() {
                return Err(Fatal::new(format!("unknown log format '{name}'")));
            }
            FormatSelection::Named(name.clone())
        } else {
            FormatSelection::Auto
        };

        let custom_w3c_fields = vec_or(cli.custom_w3c_fields.clone(), file.custom_w3c_fields.clone());
        let w3c_field_regexes = vec_or(cli.w3c_field_regexes.clone(), file.w3c_field_regexes.clone());
        let w3c_detection = W3cDetectionConfig {
            field_renames: parse_kv_pairs(&custom_w3c_fields, "--w3c-map-field")?,
            custom_regexes: parse_kv_pairs(&w3c_field_regexes, "--w3c-field-regex")?,
            time_taken_is_ms: bool_or(cli.w3c_time_taken_in_millisecs, file.w3c_time_taken_in_millisecs),
        };
        let w3c_fields_header = opt(cli.w3c_fields.clone(), file.w3c_fields.clone());

        let recorders = num_or(cli.recorders, None, file.recorders).unwrap_or_else(num_cpus::get);
        if recorders == 0 {
            return Err(Fatal::new("--recorders must be at least 1"));
        }
        let recorder_max_payload_size = num_or(cli.recorder_max_payload_size, 95, file.recorder_max_payload_size);
        let disable_bulk_tracking = bool_or(cli.disable_bulk_tracking, file.disable_bulk_tracking);
        let mode = if dry_run {
            SendMode::Dry
        } else if disable_bulk_tracking {
            SendMode::Single
        } else {
            SendMode::Bulk { max_payload_size: recorder_max_payload_size }
        };
        let sleep_between_requests_ms =
            opt(cli.sleep_between_requests_ms, file.sleep_between_requests_ms).unwrap_or(0.0);
        let recorder = RecorderConfig {
            num_workers: recorders,
            mode,
            sleep_between_requests: Duration::from_secs_f64(sleep_between_requests_ms.max(0.0) / 1000.0),
            replay_tracking,
        };

        let max_attempts = num_or(cli.max_attempts, 3, file.max_attempts).max(1);
        let delay_after_failure = num_or(cli.delay_after_failure, 2, file.delay_after_failure);
        let request_timeout = num_or(cli.request_timeout, 300, file.request_timeout);
        let debug = num_or(cli.debug, 0, file.debug);

        let http_client = HttpClientConfig {
            piwik_url,
            piwik_api_url: opt(cli.piwik_api_url.clone(), file.piwik_api_url.clone()),
            tracker_endpoint_path: {
                let v = cli.tracker_endpoint_path.clone();
                if v != "/ppms.php" {
                    v
                } else {
                    file.tracker_endpoint_path.clone().unwrap_or(v)
                }
            },
            auth_user: opt(cli.auth_user.clone(), file.auth_user.clone()),
            auth_password: opt(cli.auth_password.clone(), file.auth_password.clone()),
            client_id: opt(cli.client_id.clone(), file.client_id.clone()),
            client_secret: opt(cli.client_secret.clone(), file.client_secret.clone()),
            max_attempts,
            delay_after_failure: Duration::from_secs(delay_after_failure),
            request_timeout: Duration::from_secs(request_timeout),
            accept_invalid_ssl_certificate: bool_or(
                cli.accept_invalid_ssl_certificate,
                file.accept_invalid_ssl_certificate,
            ),
            verbosity: debug,
        };

        let mut excluded_paths = vec_or(cli.excluded_paths.clone(), file.excluded_paths.clone());
        if let Some(path) = &cli.exclude_path_from {
            excluded_paths.extend(load_path_list(path)?);
        }
        let mut included_paths = vec_or(cli.included_paths.clone(), file.included_paths.clone());
        if let Some(path) = &cli.include_path_from {
            included_paths.extend(load_path_list(path)?);
        }

        let download_extensions = opt(cli.download_extensions.clone(), file.download_extensions.clone())
            .map(|v| v.into_iter().collect::<HashSet<_>>());
        let extra_download_extensions: HashSet<String> =
            vec_or(cli.extra_download_extensions.clone(), file.extra_download_extensions.clone())
                .into_iter()
                .collect();

        let exclude_older_than = match opt(cli.exclude_older_than.clone(), file.exclude_older_than.clone()) {
            Some(s) => Some(parse_boundary_date(&s, "--exclude-older-than")?),
            None => None,
        };
        let exclude_newer_than = match opt(cli.exclude_newer_than.clone(), file.exclude_newer_than.clone()) {
            Some(s) => Some(parse_boundary_date(&s, "--exclude-newer-than")?),
            None => None,
        };

        let filter = FilterConfig {
            hostnames: vec_or(cli.hostnames.clone(), file.hostnames.clone()),
            enable_static: bool_or(cli.enable_static, file.enable_static),
            download_extensions,
            extra_download_extensions,
            excluded_useragents: vec_or(cli.excluded_useragents.clone(), file.excluded_useragents.clone()),
            enable_bots: bool_or(cli.enable_bots, file.enable_bots),
            enable_http_errors: bool_or(cli.enable_http_errors, file.enable_http_errors),
            enable_http_redirects: bool_or(cli.enable_http_redirects, file.enable_http_redirects),
            excluded_paths,
            included_paths,
            exclude_host: vec_or(cli.exclude_host.clone(), file.exclude_host.clone()).into_iter().collect(),
            include_host: vec_or(cli.include_host.clone(), file.include_host.clone()).into_iter().collect(),
            exclude_older_than,
            exclude_newer_than,
            replay_tracking,
        };

        let seconds_to_add_to_date = num_or(cli.seconds_to_add_to_date, 0, file.seconds_to_add_to_date);
        let parse = ParseConfig {
            regex_group_to_visit_cvars_map: parse_kv_pairs(
                &vec_or(cli.regex_group_to_visit_cvars_map.clone(), file.regex_group_to_visit_cvars_map.clone()),
                "--regex-group-to-visit-cvar",
            )?,
            regex_group_to_page_cvars_map: parse_kv_pairs(
                &vec_or(cli.regex_group_to_page_cvars_map.clone(), file.regex_group_to_page_cvars_map.clone()),
                "--regex-group-to-page-cvar",
            )?,
            regex_groups_to_ignore: vec_or(cli.regex_groups_to_ignore.clone(), file.regex_groups_to_ignore.clone())
                .into_iter()
                .collect(),
            force_lowercase_path: bool_or(cli.force_lowercase_path, file.force_lowercase_path),
            strip_query_string: bool_or(cli.strip_query_string, file.strip_query_string),
            query_string_delimiter: {
                let v = cli.query_string_delimiter.clone();
                if v != "?" {
                    v
                } else {
                    file.query_string_delimiter.clone().unwrap_or(v)
                }
            },
            log_hostname: opt(cli.log_hostname.clone(), file.log_hostname.clone()),
            replay_tracking,
            replay_suffix: opt(
                cli.replay_tracking_expected_tracker_file.clone(),
                file.replay_tracking_expected_tracker_file.clone(),
            ),
            seconds_to_add_to_date,
            timezone: None,
            track_http_method: bool_or(cli.track_http_method, file.track_http_method),
        };

        let request_builder = RequestBuilderConfig {
            replay_tracking,
            enable_bots: filter.enable_bots,
            reverse_dns_enabled: bool_or(cli.reverse_dns, file.reverse_dns),
            tracker_debug: cli.debug_tracker,
            title_delimiter: {
                let v = cli.title_category_delimiter.clone();
                if v != "/" {
                    v
                } else {
                    file.title_category_delimiter.clone().unwrap_or(v)
                }
            },
            query_string_delimiter: parse.query_string_delimiter.clone(),
            ..RequestBuilderConfig::default()
        };

        Ok(Config {
            files,
            skip: num_or(cli.skip, 0, file.skip),
            debug,
            debug_request_limit: opt(cli.debug_request_limit, file.debug_request_limit),
            dry_run,
            dump_log_regex: cli.dump_log_regex,
            output: cli.output.clone(),
            site_selection,
            replay_tracking,
            format_selection,
            w3c_detection,
            w3c_fields_header,
            recorder,
            http_client,
            filter,
            parse,
            request_builder,
        })
    }
}
