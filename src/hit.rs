//! The normalized log line: a `Hit`.
//!
//! Built by the format parser, mutated by enrichment and the filter chain, then handed
//! immutably to a single recorder worker. See SPEC_FULL.md §3.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

/// One normalized access-log line, ready for filtering, resolution, and request
/// building. Fields mirror the data model in SPEC_FULL.md §3.
#[derive(Debug, Clone)]
pub struct Hit {
    pub filename: Option<String>,
    pub lineno: usize,

    pub date: Option<DateTime<Utc>>,
    pub ip: String,
    pub host: Option<String>,

    pub path: String,
    pub query_string: String,
    pub full_path: String,
    pub extension: String,

    pub referrer: String,
    pub user_agent: String,

    pub status: String,
    pub length: u64,
    pub generation_time_milli: Option<u64>,

    pub method: Option<String>,
    pub userid: Option<String>,
    pub event_category: Option<String>,
    pub event_action: Option<String>,
    pub event_name: Option<String>,

    pub is_download: bool,
    pub is_robot: bool,
    pub is_error: bool,
    pub is_redirect: bool,

    /// Tracker parameters. In replay mode, populated from the original query string.
    /// Otherwise built up by the request builder.
    pub args: IndexMap<String, String>,

    /// Custom variables enriched from regex-group mappings or filter tagging (e.g. the
    /// bot filter's `Bot=<user agent>` entry), keyed by name, in insertion order. Visit
    /// scope and page scope are kept separate because they serialize to distinct
    /// tracker parameters (`_cvar` / `cvar`, SPEC_FULL.md §4.5 rule 4).
    pub visit_cvars: IndexMap<String, String>,
    pub page_cvars: IndexMap<String, String>,
}

impl Hit {
    pub fn new(filename: Option<String>, lineno: usize) -> Self {
        Self {
            filename,
            lineno,
            date: None,
            ip: String::new(),
            host: None,
            path: String::new(),
            query_string: String::new(),
            full_path: String::new(),
            extension: String::new(),
            referrer: String::new(),
            user_agent: String::new(),
            status: String::new(),
            length: 0,
            generation_time_milli: None,
            method: None,
            userid: None,
            event_category: None,
            event_action: None,
            event_name: None,
            is_download: false,
            is_robot: false,
            is_error: false,
            is_redirect: false,
            args: IndexMap::new(),
            visit_cvars: IndexMap::new(),
            page_cvars: IndexMap::new(),
        }
    }

    /// First character of `status`, used by the error/redirect filters.
    pub fn status_class(&self) -> Option<char> {
        self.status.chars().next()
    }

    /// Identity string used for visitor-shard hashing. Non-replay mode always hashes
    /// `ip`; replay mode prefers `uid`, then `cid`, then `_id`, then `cip`, falling back
    /// to `ip` when none of the tracker args are present (original: `get_visitor_id_hash`).
    pub fn visitor_identity(&self, replay_tracking: bool) -> &str {
        if replay_tracking {
            for key in ["uid", "cid", "_id", "cip"] {
                if let Some(v) = self.args.get(key) {
                    if !v.is_empty() {
                        return v;
                    }
                }
            }
        }
        &self.ip
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visitor_identity_prefers_uid_in_replay_mode() {
        let mut hit = Hit::new(None, 1);
        hit.ip = "127.0.0.1".into();
        hit.args.insert("cid".into(), "abc123".into());
        hit.args.insert("uid".into(), "alice".into());
        assert_eq!(hit.visitor_identity(true), "alice");
    }

    #[test]
    fn visitor_identity_falls_back_to_ip_without_replay_args() {
        let mut hit = Hit::new(None, 1);
        hit.ip = "127.0.0.1".into();
        assert_eq!(hit.visitor_identity(true), "127.0.0.1");
        assert_eq!(hit.visitor_identity(false), "127.0.0.1");
    }

    #[test]
    fn status_class_reads_first_digit() {
        let mut hit = Hit::new(None, 1);
        hit.status = "404".into();
        assert_eq!(hit.status_class(), Some('4'));
    }
}
