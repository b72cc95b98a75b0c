//! The regex-based NCSA/Combined/Icecast/S3/ELB/HAProxy/Gandi format family.
//!
//! Each variant is a single fixed `Regex` compiled once (via `once_cell::sync::Lazy`)
//! with named capture groups matching the canonical field names consumed by the Hit
//! Parser (SPEC_FULL.md §4.2). Group count for detector tie-breaking is simply the
//! number of named groups the regex defines, since every group here maps to a real
//! canonical field (unlike the W3C family's "unknown field" groups — see `w3c.rs`).

use super::{Fields, Format};
use once_cell::sync::Lazy;
use regex::Regex;

fn extract(re: &Regex, line: &str) -> Option<(Fields, usize)> {
    let caps = re.captures(line)?;
    let mut fields = Fields::new();
    for name in re.capture_names().flatten() {
        if let Some(m) = caps.name(name) {
            fields.insert(name.to_string(), m.as_str().to_string());
        }
    }
    let group_count = re.capture_names().flatten().count();
    Some((fields, group_count))
}

/// NCSA Common Log Format.
pub struct CommonFormat;

static COMMON_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^(?P<ip>\S+) \S+ (?P<userid>\S+) \[(?P<date>[^\]]+)\] "(?P<method>\S+) (?P<path>\S+) (?P<protocol>[^"]+)" (?P<status>\d+) (?P<length>\S+)$"#,
    )
    .expect("static common regex")
});

impl Format for CommonFormat {
    fn name(&self) -> &str {
        "common"
    }

    fn match_line(&self, line: &str) -> Option<(Fields, usize)> {
        extract(&COMMON_RE, line)
    }

    fn date_format(&self) -> &str {
        "%d/%b/%Y:%H:%M:%S %z"
    }

    fn regex_source(&self) -> Option<String> {
        Some(COMMON_RE.as_str().to_string())
    }
}

/// `common`, prefixed with `host:port` (virtual-host logs).
pub struct CommonVhostFormat;

static COMMON_VHOST_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^(?P<host>\S+?):(?P<port>\d+) (?P<ip>\S+) \S+ (?P<userid>\S+) \[(?P<date>[^\]]+)\] "(?P<method>\S+) (?P<path>\S+) (?P<protocol>[^"]+)" (?P<status>\d+) (?P<length>\S+)$"#,
    )
    .expect("static common_vhost regex")
});

impl Format for CommonVhostFormat {
    fn name(&self) -> &str {
        "common_vhost"
    }

    fn match_line(&self, line: &str) -> Option<(Fields, usize)> {
        extract(&COMMON_VHOST_RE, line)
    }

    fn date_format(&self) -> &str {
        "%d/%b/%Y:%H:%M:%S %z"
    }

    fn regex_source(&self) -> Option<String> {
        Some(COMMON_VHOST_RE.as_str().to_string())
    }
}

/// Combined Log Format: `common` plus trailing quoted referrer and user agent.
pub struct NcsaExtendedFormat;

static NCSA_EXTENDED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^(?P<ip>\S+) \S+ (?P<userid>\S+) \[(?P<date>[^\]]+)\] "(?P<method>\S+) (?P<path>\S+) (?P<protocol>[^"]+)" (?P<status>\d+) (?P<length>\S+) "(?P<referrer>[^"]*)" "(?P<user_agent>[^"]*)"$"#,
    )
    .expect("static ncsa_extended regex")
});

impl Format for NcsaExtendedFormat {
    fn name(&self) -> &str {
        "ncsa_extended"
    }

    fn match_line(&self, line: &str) -> Option<(Fields, usize)> {
        extract(&NCSA_EXTENDED_RE, line)
    }

    fn date_format(&self) -> &str {
        "%d/%b/%Y:%H:%M:%S %z"
    }

    fn regex_source(&self) -> Option<String> {
        Some(NCSA_EXTENDED_RE.as_str().to_string())
    }
}

/// `ncsa_extended`, prefixed with a vhost segment.
pub struct CommonCompleteFormat;

static COMMON_COMPLETE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^(?P<host>\S+?):(?P<port>\d+) (?P<ip>\S+) \S+ (?P<userid>\S+) \[(?P<date>[^\]]+)\] "(?P<method>\S+) (?P<path>\S+) (?P<protocol>[^"]+)" (?P<status>\d+) (?P<length>\S+) "(?P<referrer>[^"]*)" "(?P<user_agent>[^"]*)"$"#,
    )
    .expect("static common_complete regex")
});

impl Format for CommonCompleteFormat {
    fn name(&self) -> &str {
        "common_complete"
    }

    fn match_line(&self, line: &str) -> Option<(Fields, usize)> {
        extract(&COMMON_COMPLETE_RE, line)
    }

    fn date_format(&self) -> &str {
        "%d/%b/%Y:%H:%M:%S %z"
    }

    fn regex_source(&self) -> Option<String> {
        Some(COMMON_COMPLETE_RE.as_str().to_string())
    }
}

/// Icecast2 streaming-server combined variant: `ncsa_extended` plus a trailing
/// stream-duration field (seconds), exposed as `gt_s` for the generation-time
/// derivation in the Hit Parser.
pub struct Icecast2Format;

static ICECAST2_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^(?P<ip>\S+) \S+ (?P<userid>\S+) \[(?P<date>[^\]]+)\] "(?P<method>\S+) (?P<path>\S+) (?P<protocol>[^"]+)" (?P<status>\d+) (?P<length>\S+) "(?P<referrer>[^"]*)" "(?P<user_agent>[^"]*)" (?P<gt_s>\d+)$"#,
    )
    .expect("static icecast2 regex")
});

impl Format for Icecast2Format {
    fn name(&self) -> &str {
        "icecast2"
    }

    fn match_line(&self, line: &str) -> Option<(Fields, usize)> {
        extract(&ICECAST2_RE, line)
    }

    fn date_format(&self) -> &str {
        "%d/%b/%Y:%H:%M:%S %z"
    }

    fn regex_source(&self) -> Option<String> {
        Some(ICECAST2_RE.as_str().to_string())
    }
}

/// Amazon S3 server-access-log format: Apache-combined-shaped (one bracketed
/// `date tz` token, a quoted `method path protocol` request line, quoted
/// referrer/user-agent), prefixed by the bucket owner/name and interleaved with
/// S3-specific accounting fields (request id, operation, key, error code, object
/// size, turn-around time) that this format has no use for and leaves uncaptured.
pub struct S3Format;

static S3_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^\S+ (?P<host>\S+) \[(?P<date>[^\]]+)\] (?P<ip>[\w*.:-]+) (?P<userid>\S+) \S+ \S+ \S+ "(?P<method>\S+) (?P<path>.*?) \S+" (?P<status>\d+) \S+ (?P<length>\S+) \S+ \S+ \S+ "(?P<referrer>[^"]*)" "(?P<user_agent>[^"]*)"$"#,
    )
    .expect("static s3 regex")
});

impl Format for S3Format {
    fn name(&self) -> &str {
        "s3"
    }

    fn match_line(&self, line: &str) -> Option<(Fields, usize)> {
        extract(&S3_RE, line)
    }

    fn date_format(&self) -> &str {
        "%d/%b/%Y:%H:%M:%S %z"
    }

    fn regex_source(&self) -> Option<String> {
        Some(S3_RE.as_str().to_string())
    }
}

/// Amazon Elastic Load Balancer access-log format: ISO-8601 timestamp (fractional
/// seconds and the trailing zone letter discarded — ELB always logs in UTC), client
/// and backend endpoints, processing-time fields, and a quoted
/// `method scheme://host:port/path protocol` request line.
pub struct ElbFormat;

static ELB_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^(?:\S+ )?(?P<date>[0-9-]+T[0-9:]+)\.\S+ \S+ (?P<ip>[\w*.:-]+):\d+ \S+:\d+ \S+ (?P<gt_s>\S+) \S+ (?P<status>\d+) \S+ \S+ (?P<length>\S+) "\S+ \w+://(?P<host>[\w\-.]*):\d+(?P<path>/\S*) [^"]+" "(?P<user_agent>[^"]+)" \S+ \S+$"#,
    )
    .expect("static elb regex")
});

impl Format for ElbFormat {
    fn name(&self) -> &str {
        "elb"
    }

    fn match_line(&self, line: &str) -> Option<(Fields, usize)> {
        extract(&ELB_RE, line)
    }

    fn date_format(&self) -> &str {
        "%Y-%m-%dT%H:%M:%S"
    }

    fn regex_source(&self) -> Option<String> {
        Some(ELB_RE.as_str().to_string())
    }
}

/// HAProxy HTTP log format: deliberately loose (`.*` around the fields HAProxy's own
/// layout varies on), anchored only on the pieces every HAProxy log line carries —
/// the client IP before a colon, a bracketed date, a 3-digit status, a byte count,
/// and the quoted `method path` request line.
pub struct HaproxyFormat;

static HAPROXY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^.*: (?P<ip>[\w*.]+).*\[(?P<date>[^\]]*)\].* (?P<status>\d{3}) (?P<length>\d+) -.*"(?P<method>\S+) (?P<path>\S+).*$"#,
    )
    .expect("static haproxy regex")
});

impl Format for HaproxyFormat {
    fn name(&self) -> &str {
        "haproxy"
    }

    fn match_line(&self, line: &str) -> Option<(Fields, usize)> {
        extract(&HAPROXY_RE, line)
    }

    fn date_format(&self) -> &str {
        "%d/%b/%Y:%H:%M:%S.%f"
    }

    fn regex_source(&self) -> Option<String> {
        Some(HAPROXY_RE.as_str().to_string())
    }
}

/// Gandi Simple Hosting access-log format: a leading vhost and IP, then a
/// `common`-like body with the generation time (in a unit Gandi does not fix, hence
/// the permissive character class) parenthesized ahead of the quoted request line.
pub struct GandiFormat;

static GANDI_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^(?P<host>[0-9a-zA-Z\-_.]+) (?P<ip>[a-zA-Z0-9.]+) \S+ (?P<userid>\S+) \[(?P<date>[^\]]+)\] \((?P<gt_s>[0-9a-zA-Z\s]*)\) "(?P<method>[A-Z]+) (?P<path>\S+) \S+" (?P<status>[0-9]+) (?P<length>\S+) "(?P<referrer>\S+)" "(?P<user_agent>[^"]+)"$"#,
    )
    .expect("static gandi regex")
});

impl Format for GandiFormat {
    fn name(&self) -> &str {
        "gandi"
    }

    fn match_line(&self, line: &str) -> Option<(Fields, usize)> {
        extract(&GANDI_RE, line)
    }

    fn date_format(&self) -> &str {
        "%d/%b/%Y:%H:%M:%S"
    }

    fn regex_source(&self) -> Option<String> {
        Some(GANDI_RE.as_str().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_matches_apache_sample_line() {
        let line = r#"127.0.0.1 - frank [10/Oct/2000:13:55:36 -0700] "GET /apache_pb.gif HTTP/1.0" 200 2326"#;
        let (fields, groups) = CommonFormat.match_line(line).expect("should match");
        assert_eq!(fields.get("ip").unwrap(), "127.0.0.1");
        assert_eq!(fields.get("path").unwrap(), "/apache_pb.gif");
        assert_eq!(fields.get("status").unwrap(), "200");
        assert_eq!(fields.get("date").unwrap(), "10/Oct/2000:13:55:36 -0700");
        assert!(groups >= 7);
    }

    #[test]
    fn ncsa_extended_captures_referrer_and_user_agent() {
        let line = r#"127.0.0.1 - - [10/Oct/2000:13:55:36 -0700] "GET / HTTP/1.1" 200 512 "https://ref.example/" "Mozilla/5.0""#;
        let (fields, _) = NcsaExtendedFormat.match_line(line).expect("should match");
        assert_eq!(fields.get("referrer").unwrap(), "https://ref.example/");
        assert_eq!(fields.get("user_agent").unwrap(), "Mozilla/5.0");
    }

    #[test]
    fn common_does_not_match_combined_line() {
        let line = r#"127.0.0.1 - - [10/Oct/2000:13:55:36 -0700] "GET / HTTP/1.1" 200 512 "https://ref.example/" "Mozilla/5.0""#;
        assert!(CommonFormat.match_line(line).is_none());
    }

    #[test]
    fn s3_matches_apache_combined_shaped_sample_line() {
        let line = r#"79a5 my-bucket [06/Feb/2019:00:00:38 +0000] 192.0.2.3 79a5 3E57427F33A59 REST.GET.OBJECT key.txt "GET /my-bucket/key.txt HTTP/1.1" 200 - 2326 2326 18 7 "-" "S3Console/0.4""#;
        let (fields, groups) = S3Format.match_line(line).expect("should match");
        assert_eq!(fields.get("host").unwrap(), "my-bucket");
        assert_eq!(fields.get("ip").unwrap(), "192.0.2.3");
        assert_eq!(fields.get("method").unwrap(), "GET");
        assert_eq!(fields.get("path").unwrap(), "/my-bucket/key.txt");
        assert_eq!(fields.get("status").unwrap(), "200");
        assert_eq!(fields.get("length").unwrap(), "2326");
        assert_eq!(fields.get("user_agent").unwrap(), "S3Console/0.4");
        assert_eq!(fields.get("date").unwrap(), "06/Feb/2019:00:00:38 +0000");
        assert!(groups >= 9);
    }

    #[test]
    fn elb_matches_sample_line() {
        let line = r#"2015-05-13T23:39:43.945958Z my-loadbalancer 192.0.2.1:2817 10.0.0.1:80 0.000086 0.001048 0.001043 200 200 0 57 "GET http://www.example.com:80/ HTTP/1.1" "curl/7.38.0" - -"#;
        let (fields, _) = ElbFormat.match_line(line).expect("should match");
        assert_eq!(fields.get("ip").unwrap(), "192.0.2.1");
        assert_eq!(fields.get("host").unwrap(), "www.example.com");
        assert_eq!(fields.get("path").unwrap(), "/");
        assert_eq!(fields.get("status").unwrap(), "200");
        assert_eq!(fields.get("user_agent").unwrap(), "curl/7.38.0");
        assert_eq!(fields.get("date").unwrap(), "2015-05-13T23:39:43");
    }

    #[test]
    fn haproxy_matches_sample_line() {
        let line = r#"Feb  6 12:14:14 localhost haproxy[14389]: 127.0.0.1:33317 [06/Feb/2009:12:14:14.655] http-in static/srv1 10/0/0/1/11 200 2750 - - ---- 1/1/1/1/0 0/0 "GET /index.html HTTP/1.1""#;
        let (fields, _) = HaproxyFormat.match_line(line).expect("should match");
        assert_eq!(fields.get("ip").unwrap(), "127.0.0.1");
        assert_eq!(fields.get("status").unwrap(), "200");
        assert_eq!(fields.get("length").unwrap(), "2750");
        assert_eq!(fields.get("method").unwrap(), "GET");
        assert_eq!(fields.get("path").unwrap(), "/index.html");
        assert_eq!(fields.get("date").unwrap(), "06/Feb/2009:12:14:14.655");
    }

    #[test]
    fn gandi_matches_sample_line() {
        let line = r#"example.com 192.0.2.4 - frank [10/Oct/2000:13:55:36 -0700] (42) "GET /a.html HTTP/1.1" 200 512 "https://ref.example/" "Mozilla/5.0""#;
        let (fields, _) = GandiFormat.match_line(line).expect("should match");
        assert_eq!(fields.get("host").unwrap(), "example.com");
        assert_eq!(fields.get("ip").unwrap(), "192.0.2.4");
        assert_eq!(fields.get("gt_s").unwrap(), "42");
        assert_eq!(fields.get("path").unwrap(), "/a.html");
        assert_eq!(fields.get("status").unwrap(), "200");
        assert_eq!(fields.get("referrer").unwrap(), "https://ref.example/");
    }
}
