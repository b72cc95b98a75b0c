//! Transforms a resolved Hit into a tracker request argument map via an ordered rule
//! chain, then flattens PHP-style bracket keys into real JSON nesting for bulk
//! transport. See SPEC_FULL.md §4.5.

use indexmap::IndexMap;
use serde_json::{Map as JsonMap, Value};

use crate::hit::Hit;

/// `(hit, path, site_id, main_url)`, per SPEC_FULL.md §3 "HitArgsConfig".
pub struct HitArgsConfig<'a> {
    pub hit: &'a Hit,
    pub site_id: &'a str,
    pub main_url: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct RequestBuilderConfig {
    pub replay_tracking: bool,
    pub enable_bots: bool,
    pub reverse_dns_enabled: bool,
    pub tracker_debug: bool,
    pub title_delimiter: String,
    pub url_scheme_default: String,
    pub max_url_len: usize,
    /// Separator re-inserted between `path` and `query_string` when synthesizing the
    /// live-tracking URL (SPEC_FULL.md §6, `--query-string-delimiter`). Default `?`.
    pub query_string_delimiter: String,
}

impl Default for RequestBuilderConfig {
    fn default() -> Self {
        Self {
            replay_tracking: false,
            enable_bots: false,
            reverse_dns_enabled: false,
            tracker_debug: false,
            title_delimiter: " / ".to_string(),
            url_scheme_default: "https".to_string(),
            max_url_len: 1024,
            query_string_delimiter: "?".to_string(),
        }
    }
}

const TRACKING_CLIENT_NAME: &str = "wla";
const TRACKING_CLIENT_VERSION: &str = "4.1.0";

/// The final tracker request argument map, ready for URL-encoding (single mode) or
/// JSON serialization (bulk mode). Values are JSON so deep-array flattening can
/// produce real nested structures (SPEC_FULL.md §4.5 final paragraph).
pub type BuiltArgs = IndexMap<String, Value>;

/// Run the full rule chain, then deep-array-flatten the result.
pub fn build(config: &HitArgsConfig, rb_config: &RequestBuilderConfig) -> BuiltArgs {
    let mut flat: IndexMap<String, String> = base_args(config);

    rule_replay(&mut flat, config, rb_config);
    rule_hit_args(&mut flat, config, rb_config);
    rule_title(&mut flat, config, rb_config);
    rule_misc(&mut flat, config, rb_config);

    flatten_deep_arrays(&flat)
}

fn base_args(config: &HitArgsConfig) -> IndexMap<String, String> {
    let mut args = IndexMap::new();
    args.insert("rec".to_string(), "1".to_string());
    args.insert("apiv".to_string(), "1".to_string());
    args.insert("cip".to_string(), config.hit.ip.clone());
    if let Some(date) = config.hit.date {
        args.insert("cdt".to_string(), date.format("%Y-%m-%d %H:%M:%S").to_string());
    }
    args.insert("idsite".to_string(), config.site_id.to_string());
    args.insert("queuedtracking".to_string(), "0".to_string());
    args.insert("ua".to_string(), config.hit.user_agent.clone());
    args
}

/// Rebuilds the URL path from `hit.path` and `hit.query_string` rather than
/// trusting `hit.full_path`'s original separator, so `--query-string-delimiter`
/// and `--strip-query-string` both take effect here (SPEC_FULL.md §4.2/§4.5).
fn path_with_query_string(hit: &Hit, delimiter: &str) -> String {
    if hit.query_string.is_empty() {
        hit.path.clone()
    } else {
        format!("{}{}{}", hit.path, delimiter, hit.query_string)
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        s.chars().take(max_len).collect()
    }
}

/// Rule 1: replay-mode `rec=0`, or URL/referrer synthesis for live replay.
fn rule_replay(flat: &mut IndexMap<String, String>, config: &HitArgsConfig, rb_config: &RequestBuilderConfig) {
    if rb_config.replay_tracking {
        flat.insert("rec".to_string(), "0".to_string());
        // The "dp" (reverse-DNS suppression) flag only applies to a live hit; replay
        // mode takes its argument set verbatim from the original query string below.
        return;
    }

    flat.insert(
        "dp".to_string(),
        if rb_config.reverse_dns_enabled { "0" } else { "1" }.to_string(),
    );

    let path = path_with_query_string(config.hit, &rb_config.query_string_delimiter);
    let url = match config.main_url {
        Some(main_url) => format!("{}{}", main_url.trim_end_matches('/'), path),
        None => {
            let host = config.hit.host.as_deref().unwrap_or("");
            format!("{}://{}{}", rb_config.url_scheme_default, host, path)
        }
    };
    flat.insert("url".to_string(), truncate(&url, rb_config.max_url_len));
    flat.insert("urlref".to_string(), truncate(&config.hit.referrer, rb_config.max_url_len));
}

/// Rule 2: merge the Hit's own args (replay mode's parsed query string, or any
/// regex-group-derived args), download tagging, bot tagging.
fn rule_hit_args(flat: &mut IndexMap<String, String>, config: &HitArgsConfig, rb_config: &RequestBuilderConfig) {
    for (key, value) in &config.hit.args {
        if key == "idsite" {
            continue;
        }
        flat.insert(key.clone(), value.clone());
    }

    if config.hit.is_download {
        if let Some(url) = flat.get("url").cloned() {
            flat.insert("download".to_string(), url);
        }
    }

    if rb_config.enable_bots {
        flat.insert("bots".to_string(), "1".to_string());
    }
}

/// Rule 3: error/redirect title. Both flags independently route to the same branch
/// (SPEC_FULL.md §4.5 rule 3 / §11 — the source's duplicated-operand defect is not
/// reproduced).
fn rule_title(flat: &mut IndexMap<String, String>, config: &HitArgsConfig, rb_config: &RequestBuilderConfig) {
    if !(config.hit.is_error || config.hit.is_redirect) {
        return;
    }
    let url = flat.get("url").cloned().unwrap_or_default();
    let urlref = flat.get("urlref").cloned().unwrap_or_default();
    let delim = &rb_config.title_delimiter;

    let mut title = format!(
        "{}{delim}URL = {}",
        config.hit.status,
        urlencoding_encode(&url),
    );
    if !urlref.is_empty() {
        title.push_str(&format!("{delim}From = {}", urlencoding_encode(&urlref)));
    }
    flat.insert("action_name".to_string(), title);
}

fn urlencoding_encode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

/// Rule 4: generation time, event fields, bandwidth, custom variables, tracking
/// client identity, debug flag.
fn rule_misc(flat: &mut IndexMap<String, String>, config: &HitArgsConfig, rb_config: &RequestBuilderConfig) {
    let hit = config.hit;

    if let Some(gt_ms) = hit.generation_time_milli {
        flat.insert("gt_ms".to_string(), gt_ms.to_string());
    }
    if let Some(category) = &hit.event_category {
        flat.insert("e_c".to_string(), category.clone());
    }
    if let Some(action) = &hit.event_action {
        flat.insert("e_a".to_string(), action.clone());
    }
    if let Some(name) = &hit.event_name {
        flat.insert("e_n".to_string(), name.clone());
    }
    flat.insert("bw_bytes".to_string(), hit.length.to_string());

    if !hit.page_cvars.is_empty() {
        flat.insert("cvar".to_string(), cvars_to_json(&hit.page_cvars));
    }
    if !hit.visit_cvars.is_empty() {
        flat.insert("_cvar".to_string(), cvars_to_json(&hit.visit_cvars));
    }

    if !rb_config.replay_tracking {
        flat.insert("ts_n".to_string(), TRACKING_CLIENT_NAME.to_string());
        flat.insert("ts_v".to_string(), TRACKING_CLIENT_VERSION.to_string());
    }

    if rb_config.tracker_debug {
        flat.insert("debug".to_string(), "1".to_string());
    }
}

fn cvars_to_json(cvars: &IndexMap<String, String>) -> String {
    let mut obj = JsonMap::new();
    for (idx, (name, value)) in cvars.iter().enumerate() {
        obj.insert(
            (idx + 1).to_string(),
            Value::Array(vec![Value::String(name.clone()), Value::String(value.clone())]),
        );
    }
    Value::Object(obj).to_string()
}

/// "PHP deep array" flattening (SPEC_FULL.md §4.5 final paragraph, §8 invariant 5):
/// navigate bracket-suffixed keys (`a[b][c][]`) into a tree of JSON objects, with an
/// empty bracket segment meaning "append", then convert any object subtree whose keys
/// are contiguous integers from 0 into a JSON array.
pub fn flatten_deep_arrays(flat: &IndexMap<String, String>) -> BuiltArgs {
    let mut tree: IndexMap<String, Value> = IndexMap::new();

    for (key, value) in flat {
        let (base, segments) = split_bracket_key(key);
        if segments.is_empty() {
            tree.insert(base.to_string(), Value::String(value.clone()));
            continue;
        }
        let root = tree
            .entry(base.to_string())
            .or_insert_with(|| Value::Object(JsonMap::new()));
        insert_path(root, &segments, value.clone());
    }

    tree.into_iter().map(|(k, v)| (k, arrayify(v))).collect()
}

/// Split `a[b][c][]` into `("a", ["b", "c", ""])`. A key with no brackets returns an
/// empty segment list.
fn split_bracket_key(key: &str) -> (&str, Vec<&str>) {
    let Some(first_bracket) = key.find('[') else {
        return (key, Vec::new());
    };
    let base = &key[..first_bracket];
    let mut segments = Vec::new();
    let mut rest = &key[first_bracket..];
    while let Some(stripped) = rest.strip_prefix('[') {
        let Some(close) = stripped.find(']') else { break };
        segments.push(&stripped[..close]);
        rest = &stripped[close + 1..];
    }
    (base, segments)
}

fn insert_path(node: &mut Value, segments: &[&str], value: String) {
    if !node.is_object() {
        *node = Value::Object(JsonMap::new());
    }
    let obj = node.as_object_mut().unwrap();

    let (segment, rest) = (segments[0], &segments[1..]);
    let key = if segment.is_empty() {
        // Append: next free non-negative integer key at this level.
        next_free_index(obj).to_string()
    } else {
        segment.to_string()
    };

    if rest.is_empty() {
        obj.insert(key, Value::String(value));
    } else {
        let child = obj.entry(key).or_insert_with(|| Value::Object(JsonMap::new()));
        insert_path(child, rest, value);
    }
}

fn next_free_index(obj: &JsonMap<String, Value>) -> usize {
    let mut idx = 0;
    while obj.contains_key(&idx.to_string()) {
        idx += 1;
    }
    idx
}

/// Recursively convert any JSON object whose keys are exactly `{"0", "1", ..., "n-1"}`
/// into a JSON array, preserving insertion-independent positional order.
fn arrayify(value: Value) -> Value {
    match value {
        Value::Object(obj) => {
            let converted: JsonMap<String, Value> =
                obj.into_iter().map(|(k, v)| (k, arrayify(v))).collect();
            if is_contiguous_int_keyed(&converted) {
                let mut items: Vec<(usize, Value)> = converted
                    .into_iter()
                    .map(|(k, v)| (k.parse::<usize>().unwrap(), v))
                    .collect();
                items.sort_by_key(|(idx, _)| *idx);
                Value::Array(items.into_iter().map(|(_, v)| v).collect())
            } else {
                Value::Object(converted)
            }
        }
        other => other,
    }
}

fn is_contiguous_int_keyed(obj: &JsonMap<String, Value>) -> bool {
    if obj.is_empty() {
        return false;
    }
    let mut indices: Vec<usize> = Vec::with_capacity(obj.len());
    for key in obj.keys() {
        match key.parse::<usize>() {
            Ok(n) => indices.push(n),
            Err(_) => return false,
        }
    }
    indices.sort_unstable();
    indices.iter().enumerate().all(|(i, &n)| i == n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn sample_hit() -> Hit {
        let mut hit = Hit::new(None, 1);
        hit.ip = "127.0.0.1".to_string();
        hit.date = Some(Utc.with_ymd_and_hms(2000, 10, 10, 20, 55, 36).unwrap());
        hit.path = "/apache_pb.gif".to_string();
        hit.full_path = "/apache_pb.gif".to_string();
        hit.status = "200".to_string();
        hit.extension = "gif".to_string();
        hit
    }

    #[test]
    fn boundary_scenario_1_common_log_with_static_download() {
        let mut hit = sample_hit();
        hit.is_download = true;
        let config = HitArgsConfig {
            hit: &hit,
            site_id: "7",
            main_url: Some("https://p.example/"),
        };
        let built = build(&config, &RequestBuilderConfig::default());
        assert_eq!(built.get("idsite").unwrap(), "7");
        assert_eq!(built.get("cip").unwrap(), "127.0.0.1");
        assert_eq!(built.get("url").unwrap(), "https://p.example/apache_pb.gif");
        assert_eq!(built.get("download").unwrap(), "https://p.example/apache_pb.gif");
        assert_eq!(built.get("cdt").unwrap(), "2000-10-10 20:55:36");
    }

    #[test]
    fn live_url_rejoins_path_and_query_string_with_configured_delimiter() {
        let mut hit = sample_hit();
        hit.path = "/search".to_string();
        hit.query_string = "q=rust".to_string();
        let config = HitArgsConfig {
            hit: &hit,
            site_id: "7",
            main_url: Some("https://p.example/"),
        };
        let rb_config = RequestBuilderConfig { query_string_delimiter: "#".to_string(), ..Default::default() };
        let built = build(&config, &rb_config);
        assert_eq!(built.get("url").unwrap(), "https://p.example/search#q=rust");
    }

    #[test]
    fn strip_query_string_drops_it_from_the_synthesized_url() {
        let mut hit = sample_hit();
        hit.path = "/search".to_string();
        hit.query_string = String::new();
        let config = HitArgsConfig {
            hit: &hit,
            site_id: "7",
            main_url: Some("https://p.example/"),
        };
        let built = build(&config, &RequestBuilderConfig::default());
        assert_eq!(built.get("url").unwrap(), "https://p.example/search");
    }

    #[test]
    fn replay_mode_sets_rec_zero_and_keeps_parsed_args() {
        let mut hit = sample_hit();
        hit.args.insert("idsite".to_string(), "3".to_string());
        hit.args.insert("url".to_string(), "http://a/b".to_string());
        hit.args.insert("uid".to_string(), "alice".to_string());
        let config = HitArgsConfig {
            hit: &hit,
            site_id: "3",
            main_url: None,
        };
        let rb_config = RequestBuilderConfig {
            replay_tracking: true,
            ..Default::default()
        };
        let built = build(&config, &rb_config);
        assert_eq!(built.get("rec").unwrap(), "0");
        assert_eq!(built.get("idsite").unwrap(), "3");
        assert_eq!(built.get("uid").unwrap(), "alice");
        assert!(!built.contains_key("ts_n"));
    }

    #[test]
    fn bot_tracking_sets_bots_flag_and_visit_cvar_survives_as_json() {
        let mut hit = sample_hit();
        hit.is_robot = true;
        hit.user_agent = "Googlebot/2.1".to_string();
        hit.visit_cvars.insert("Bot".to_string(), "Googlebot/2.1".to_string());
        let config = HitArgsConfig {
            hit: &hit,
            site_id: "1",
            main_url: Some("https://p.example/"),
        };
        let rb_config = RequestBuilderConfig {
            enable_bots: true,
            ..Default::default()
        };
        let built = build(&config, &rb_config);
        assert_eq!(built.get("bots").unwrap(), "1");
        let cvar: Value = serde_json::from_str(built.get("_cvar").unwrap().as_str().unwrap()).unwrap();
        assert_eq!(cvar["1"][0], "Bot");
        assert_eq!(cvar["1"][1], "Googlebot/2.1");
    }

    #[test]
    fn error_title_includes_from_only_when_referrer_present() {
        let mut hit = sample_hit();
        hit.is_error = true;
        hit.status = "404".to_string();
        let config = HitArgsConfig {
            hit: &hit,
            site_id: "1",
            main_url: Some("https://p.example/"),
        };
        let built = build(&config, &RequestBuilderConfig::default());
        let title = built.get("action_name").unwrap().as_str().unwrap();
        assert!(title.starts_with("404"));
        assert!(!title.contains("From ="));
    }

    #[test]
    fn deep_array_flattening_builds_nested_list() {
        let mut flat = IndexMap::new();
        flat.insert("_cvar[1][]".to_string(), "Bot".to_string());
        flat.insert("_cvar[2][]".to_string(), "Googlebot".to_string());
        let built = flatten_deep_arrays(&flat);
        let cvar = built.get("_cvar").unwrap();
        assert_eq!(cvar.as_object().unwrap()["1"], Value::Array(vec![Value::String("Bot".into())]));
        assert_eq!(
            cvar.as_object().unwrap()["2"],
            Value::Array(vec![Value::String("Googlebot".into())])
        );
    }

    #[test]
    fn deep_array_flattening_converts_contiguous_int_keys_to_array() {
        let mut flat = IndexMap::new();
        flat.insert("a[0]".to_string(), "x".to_string());
        flat.insert("a[1]".to_string(), "y".to_string());
        let built = flatten_deep_arrays(&flat);
        assert_eq!(
            built.get("a").unwrap(),
            &Value::Array(vec![Value::String("x".into()), Value::String("y".into())])
        );
    }

    #[test]
    fn plain_keys_are_left_as_string_values() {
        let mut flat = IndexMap::new();
        flat.insert("idsite".to_string(), "7".to_string());
        let built = flatten_deep_arrays(&flat);
        assert_eq!(built.get("idsite").unwrap(), &Value::String("7".to_string()));
    }

    proptest! {
        // SPEC_FULL.md §8 invariant 5: the flattener is a left inverse of PHP-style
        // urlencoded array serialization for string-leaved structures -- encoding a
        // list as `a[0]=..&a[1]=..&...` and flattening it back yields the same list,
        // regardless of the contiguous values chosen or the number of elements.
        #[test]
        fn prop_flatten_reconstructs_serialized_list(values in prop::collection::vec("[a-z0-9]{0,8}", 1..6)) {
            let mut flat = IndexMap::new();
            for (idx, value) in values.iter().enumerate() {
                flat.insert(format!("a[{idx}]"), value.clone());
            }
            let built = flatten_deep_arrays(&flat);
            let expected = Value::Array(values.into_iter().map(Value::String).collect());
            prop_assert_eq!(built.get("a").unwrap(), &expected);
        }
    }
}
