//! The format registry: a closed set of named log-line parsers, plus the detector
//! that picks one of them for a given input source. See SPEC_FULL.md §4.1.

mod custom;
mod detector;
mod json_formats;
mod regex_formats;
mod w3c;
mod w3c_variants;

pub use custom::CustomRegexFormat;
pub use detector::{detect_format, Detection, DetectionError, W3cDetectionConfig, MAX_DETECTION_LINES};
pub use w3c::{base_fields as w3c_base_fields, parse_fields_header, W3cBuildError, W3cFormat};
pub use w3c_variants::{CloudFrontFormat, IncapsulaW3cFormat, ShoutcastFormat};

use indexmap::IndexMap;

/// A single matched line: the canonical field name is the key (`ip`, `path`, `status`,
/// …, matching the `Hit` fields in SPEC_FULL.md §3), the value is the raw captured text.
pub type Fields = IndexMap<String, String>;

/// Common capability set every registered format exposes (SPEC_FULL.md §3 "Format").
pub trait Format: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the detector is allowed to propose this format automatically. The
    /// `ovh` JSON variant is the one built-in exception (SPEC_FULL.md §3).
    fn auto_detectable(&self) -> bool {
        true
    }

    /// Attempt to match a single line, returning the captured canonical fields and a
    /// group count used for detector tie-breaking. `None` means the line does not
    /// belong to this format.
    fn match_line(&self, line: &str) -> Option<(Fields, usize)>;

    /// `strptime`-equivalent format string used to parse the `date`/`time` fields this
    /// format produced (chrono format syntax). Structured formats that emit an
    /// already-parsed timestamp return an empty string; the caller must branch on that.
    fn date_format(&self) -> &str;

    /// Whether this format instance has a `time-taken` field that, on an IIS-looking
    /// header, warrants the "without --w3c-time-taken-millisecs" detector warning
    /// (SPEC_FULL.md §4.1). Only the W3C-extended family overrides this.
    fn time_taken_needs_ms_warning(&self) -> bool {
        false
    }

    /// The underlying regex source, if this format is regex-backed. Used by
    /// `--dump-log-regex`; structured (JSON) formats return `None`.
    fn regex_source(&self) -> Option<String> {
        None
    }
}

pub use json_formats::{NginxJsonFormat, OvhFormat};
pub use regex_formats::{
    CommonCompleteFormat, CommonFormat, CommonVhostFormat, ElbFormat, GandiFormat, HaproxyFormat,
    Icecast2Format, NcsaExtendedFormat, S3Format,
};

/// Build the registry of built-in formats in registration order. Order matters for the
/// detector's tie-break-by-registration-order rule (SPEC_FULL.md §8 invariant 6).
/// The W3C-extended family (`w3c_extended`, `iis`, `amazon_cloudfront`, `incapsula_w3c`,
/// `shoutcast`) is not registered here: its regex is built per-input from a `#Fields:`
/// header, so the detector constructs those candidates itself (see `detector.rs`).
pub fn builtin_formats() -> Vec<Box<dyn Format>> {
    vec![
        Box::new(CommonFormat),
        Box::new(CommonVhostFormat),
        Box::new(NcsaExtendedFormat),
        Box::new(CommonCompleteFormat),
        Box::new(Icecast2Format),
        Box::new(S3Format),
        Box::new(ElbFormat),
        Box::new(HaproxyFormat),
        Box::new(GandiFormat),
        Box::new(NginxJsonFormat),
        Box::new(OvhFormat),
    ]
}

/// Look up a built-in format by its registered name, for `--log-format-name`.
pub fn lookup(name: &str) -> Option<Box<dyn Format>> {
    builtin_formats().into_iter().find(|f| f.name() == name)
}
