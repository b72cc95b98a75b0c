//! Command-line surface: flags mirror the configuration options in SPEC_FULL.md §6,
//! plus the handful of out-of-scope items (input files, path-list files, optional
//! config file) that only the CLI is allowed to handle (SPEC_FULL.md §10.5).

use std::path::PathBuf;

use clap::{ArgAction, Parser};

#[derive(Parser, Debug)]
#[command(name = "logship", about = "Replays web server access logs as analytics tracker hits")]
pub struct Cli {
    /// Input log files, or `-` for stdin. Globs are expanded and sorted.
    #[arg(required = true)]
    pub files: Vec<String>,

    /// Load defaults from a JSON config file; CLI flags override its values.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(short = 'd', long, action = ArgAction::Count)]
    pub debug: u8,

    #[arg(long, hide = true)]
    pub debug_tracker: bool,

    /// Stop after this many hits have been dispatched to recorders.
    #[arg(long)]
    pub debug_request_limit: Option<usize>,

    #[arg(long)]
    pub sleep_between_requests_ms: Option<f64>,

    /// Your analytics server URL, e.g. https://example.piwik.pro/
    #[arg(long = "url")]
    pub piwik_url: Option<String>,

    /// Management-API base URL, if it differs from --url.
    #[arg(long = "api-url")]
    pub piwik_api_url: Option<String>,

    #[arg(long, default_value = "/ppms.php")]
    pub tracker_endpoint_path: String,

    /// Perform a trial run: parse, filter, and resolve, but do not send any requests.
    #[arg(long)]
    pub dry_run: bool,

    /// Track all hits to this site id; skips per-hostname site resolution.
    #[arg(long = "idsite")]
    pub site_id: Option<String>,

    #[arg(long = "client-id")]
    pub client_id: Option<String>,

    #[arg(long = "client-secret")]
    pub client_secret: Option<String>,

    #[arg(long = "auth-user")]
    pub auth_user: Option<String>,

    #[arg(long = "auth-password")]
    pub auth_password: Option<String>,

    /// Accepted hostname glob. May be specified multiple times.
    #[arg(long = "hostname")]
    pub hostnames: Vec<String>,

    /// Path glob to exclude. May be specified multiple times.
    #[arg(long = "exclude-path")]
    pub excluded_paths: Vec<String>,

    /// File with one path glob to exclude per line.
    #[arg(long)]
    pub exclude_path_from: Option<PathBuf>,

    /// Path glob to include. May be specified multiple times.
    #[arg(long = "include-path")]
    pub included_paths: Vec<String>,

    /// File with one path glob to include per line.
    #[arg(long)]
    pub include_path_from: Option<PathBuf>,

    /// Extra user-agent substring to exclude, beyond the built-in bot list.
    #[arg(long = "useragent-exclude")]
    pub excluded_useragents: Vec<String>,

    #[arg(long)]
    pub enable_static: bool,

    #[arg(long)]
    pub enable_bots: bool,

    #[arg(long)]
    pub enable_http_errors: bool,

    #[arg(long)]
    pub enable_http_redirects: bool,

    #[arg(long = "enable-reverse-dns")]
    pub reverse_dns: bool,

    #[arg(long)]
    pub strip_query_string: bool,

    /// Separator between path and query string, both when splitting a raw path that
    /// has no distinct query-string field and when re-synthesizing a live-tracking URL.
    #[arg(long, default_value = "?")]
    pub query_string_delimiter: String,

    #[arg(long)]
    pub force_lowercase_path: bool,

    /// Built-in format name (overrides auto-detection).
    #[arg(long)]
    pub log_format_name: Option<String>,

    /// Named-group regex used to parse log lines. Overrides --log-format-name.
    #[arg(long)]
    pub log_format_regex: Option<String>,

    /// strptime-style format string for --log-format-regex's `date` group.
    #[arg(long)]
    pub log_date_format: Option<String>,

    /// Force this hostname for formats that don't capture one.
    #[arg(long)]
    pub log_hostname: Option<String>,

    /// Skip this many leading lines of each input file.
    #[arg(long, default_value_t = 0)]
    pub skip: usize,

    /// Number of concurrent recorder workers. Defaults to the number of CPUs.
    #[arg(long)]
    pub recorders: Option<usize>,

    #[arg(long, default_value_t = 95)]
    pub recorder_max_payload_size: usize,

    #[arg(long)]
    pub replay_tracking: bool,

    #[arg(long)]
    pub replay_tracking_expected_tracker_file: Option<String>,

    #[arg(long)]
    pub disable_bulk_tracking: bool,

    /// Override the set of download extensions entirely (format: pdf,doc,...).
    #[arg(long, value_delimiter = ',')]
    pub download_extensions: Option<Vec<String>>,

    /// Add extensions to the default download set.
    #[arg(long = "add-download-extensions", value_delimiter = ',')]
    pub extra_download_extensions: Vec<String>,

    /// Map a custom W3C field to a canonical one, e.g. `my-date=date`.
    #[arg(long = "w3c-map-field")]
    pub custom_w3c_fields: Vec<String>,

    #[arg(long)]
    pub w3c_time_taken_in_millisecs: bool,

    /// Explicit `#Fields:` header line, for files that don't carry one.
    #[arg(long)]
    pub w3c_fields: Option<String>,

    /// Custom regex for a W3C field, e.g. `sc-win32-status=(?P<win32_status>\S+)`.
    #[arg(long)]
    pub w3c_field_regexes: Vec<String>,

    #[arg(long, default_value = "/")]
    pub title_category_delimiter: String,

    /// Print the selected format's regex/header and exit.
    #[arg(long)]
    pub dump_log_regex: bool,

    #[arg(long, value_delimiter = ',')]
    pub regex_groups_to_ignore: Vec<String>,

    /// Route a regex group into a visit-scope custom variable, e.g. `userid=User Name`.
    #[arg(long = "regex-group-to-visit-cvar")]
    pub regex_group_to_visit_cvars_map: Vec<String>,

    /// Route a regex group into a page-scope custom variable.
    #[arg(long = "regex-group-to-page-cvar")]
    pub regex_group_to_page_cvars_map: Vec<String>,

    /// Track the request's HTTP method as a page-scope custom variable, when the
    /// selected format captures one.
    #[arg(long)]
    pub track_http_method: bool,

    #[arg(long = "retry-max-attempts", default_value_t = 3)]
    pub max_attempts: u32,

    #[arg(long = "retry-delay", default_value_t = 2)]
    pub delay_after_failure: u64,

    #[arg(long, default_value_t = 300)]
    pub request_timeout: u64,

    #[arg(long)]
    pub include_host: Vec<String>,

    #[arg(long)]
    pub exclude_host: Vec<String>,

    /// Ignore hits older than this date. Format: `YYYY-MM-DD HH:MM:SS +0000`.
    #[arg(long)]
    pub exclude_older_than: Option<String>,

    /// Ignore hits newer than this date. Same format as --exclude-older-than.
    #[arg(long)]
    pub exclude_newer_than: Option<String>,

    #[arg(long = "add-to-date", default_value_t = 0)]
    pub seconds_to_add_to_date: i64,

    #[arg(long)]
    pub accept_invalid_ssl_certificate: bool,

    /// Redirect the progress/summary output to this file instead of stdout.
    #[arg(long)]
    pub output: Option<PathBuf>,
}
