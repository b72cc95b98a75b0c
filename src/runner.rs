//! Pipeline orchestration: wires format selection, the per-line parser, the
//! recorder pool, and the progress monitor into one run. See SPEC_FULL.md §5.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::bounded;

use crate::config::{Config, FormatSelection, SiteSelection};
use crate::error::{Fatal, Rejection};
use crate::formats::{self, Format};
use crate::hit::Hit;
use crate::hit_parser;
use crate::http_client::HttpClient;
use crate::platform::{Ctrl, ProgressSink, SafeStderr, SafeStdout, SignalHandler};
use crate::readers::InputSource;
use crate::recorder::RecorderPool;
use crate::resolver::{DynamicResolver, Resolver, StaticResolver};
use crate::stats::{Monitor, Statistics};

/// How many leading lines (after any `--skip`) are buffered in memory to run format
/// detection and the host-field probe against. Comfortably above what any real
/// `#Fields:` header or format signature needs, well below the detector's own
/// 100,000-line matching cap (SPEC_FULL.md §4.1).
const SAMPLE_LINES: usize = 500;

const MONITOR_CADENCE: Duration = Duration::from_secs(5);

/// Reads lines for one input source: first replays any lines already consumed during
/// format detection, then continues from the underlying reader.
struct LineFeed {
    buffered: VecDeque<String>,
    source: InputSource,
}

impl LineFeed {
    fn next_line(&mut self) -> Result<Option<String>, Fatal> {
        if let Some(line) = self.buffered.pop_front() {
            return Ok(Some(line));
        }
        self.source.read_line().map_err(|e| Fatal::new(e.to_string()))
    }
}

/// Skips `n` lines of `source`, discarding them without counting them in any statistic.
fn skip_lines(source: &mut InputSource, n: usize) -> Result<(), Fatal> {
    for _ in 0..n {
        if source.read_line().map_err(|e| Fatal::new(e.to_string()))?.is_none() {
            break;
        }
    }
    Ok(())
}

/// Reads up to `SAMPLE_LINES` lines from `source` without discarding them; the caller
/// replays them through the real parse loop afterwards.
fn collect_sample(source: &mut InputSource) -> Result<Vec<String>, Fatal> {
    let mut lines = Vec::new();
    for _ in 0..SAMPLE_LINES {
        match source.read_line().map_err(|e| Fatal::new(e.to_string()))? {
            Some(line) => lines.push(line),
            None => break,
        }
    }
    Ok(lines)
}

/// Whether any sampled line, once matched, produced a `host` field.
fn sample_has_host_field(format: &dyn Format, sample: &[String]) -> bool {
    sample
        .iter()
        .find_map(|line| format.match_line(line))
        .map(|(fields, _)| fields.contains_key("host"))
        .unwrap_or(false)
}

fn build_resolver(
    site_selection: &SiteSelection,
    client: &HttpClient,
    dry_run: bool,
    replay_tracking: bool,
) -> Result<Resolver, Fatal> {
    match site_selection {
        SiteSelection::Static(site_id) => {
            let skip_fetch = dry_run || replay_tracking;
            Ok(Resolver::Static(StaticResolver::new(site_id.clone(), client, skip_fetch)?))
        }
        SiteSelection::Dynamic => Ok(Resolver::Dynamic(DynamicResolver::new(replay_tracking))),
    }
}

/// Run the full pipeline against the given configuration and return the final summary
/// text. Any fatal condition (startup validation, detector failure, a 400 from the
/// tracker, retries exhausted) short-circuits with `Err`; the caller is responsible
/// for printing `Fatal::diagnostic()` and exiting non-zero.
pub fn run(config: Config) -> Result<String, Fatal> {
    let Config {
        files,
        skip,
        debug,
        debug_request_limit,
        dry_run,
        dump_log_regex,
        output,
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
    } = config;

    let (ctrl_tx, ctrl_rx) = bounded::<Ctrl>(16);
    let _signals = SignalHandler::new(ctrl_tx).ok();

    let mut first_source = InputSource::open(&files[0]).map_err(|e| Fatal::new(e.to_string()))?;
    skip_lines(&mut first_source, skip)?;
    let consumed = collect_sample(&mut first_source)?;
    let mut header_lines: Vec<String> = consumed.iter().filter(|l| l.starts_with('#')).cloned().collect();
    if header_lines.is_empty() {
        if let Some(header) = &w3c_fields_header {
            header_lines.push(format!("#Fields: {header}"));
        }
    }
    let sample_lines: Vec<String> = consumed.iter().filter(|l| !l.starts_with('#')).cloned().collect();

    let (format, warning): (Box<dyn Format>, Option<String>) = match format_selection {
        FormatSelection::Custom(boxed) => (boxed, None),
        FormatSelection::Named(name) => (
            formats::lookup(&name).expect("format name was validated when the config was built"),
            None,
        ),
        FormatSelection::Auto => {
            let detection = formats::detect_format(&header_lines, &sample_lines, &w3c_detection)
                .map_err(|e| Fatal::new(e.to_string()))?;
            (detection.format, detection.warning)
        }
    };

    let mut stderr = SafeStderr::new();
    if let Some(w) = warning {
        let _ = stderr.writeln(&format!("warning: {w}"));
    }
    if debug > 0 {
        let _ = stderr.writeln(&format!("debug: selected log format '{}'", format.name()));
    }

    if dump_log_regex {
        let mut stdout = SafeStdout::new();
        let _ = stdout.writeln(&format!("format: {}", format.name()));
        match format.regex_source() {
            Some(pattern) => {
                let _ = stdout.writeln(&format!("regex: {pattern}"));
            }
            None => {
                let _ = stdout.writeln("regex: <structured format, no single-line regex>");
            }
        }
        let _ = stdout.flush();
        return Ok(String::new());
    }

    let format_has_host = sample_has_host_field(format.as_ref(), &sample_lines);
    Resolver::validate_host_requirement(format_has_host, parse.log_hostname.as_deref(), replay_tracking)?;

    let stats = Arc::new(Statistics::new());
    let client = Arc::new(HttpClient::new(http_client).map_err(|e| Fatal::new(e.to_string()))?);
    let resolver = Arc::new(build_resolver(&site_selection, &client, dry_run, replay_tracking)?);
    let rb_config = Arc::new(request_builder);

    let recorder_pool = RecorderPool::start(recorder.clone(), resolver, client, rb_config, stats.clone());
    let monitor = Monitor::spawn(stats.clone(), MONITOR_CADENCE, output.clone());

    let flush_threshold = match recorder.mode {
        crate::recorder::SendMode::Bulk { max_payload_size } => max_payload_size * recorder.num_workers,
        _ => 95 * recorder.num_workers,
    };

    let outcome = process_files(
        &files,
        skip,
        consumed.into(),
        first_source,
        format.as_ref(),
        &parse,
        &filter,
        &stats,
        &recorder_pool,
        flush_threshold,
        debug_request_limit,
        &ctrl_rx,
        output.as_deref(),
    );

    let wait_result = recorder_pool.wait_empty();
    monitor.stop();
    let shutdown_result = recorder_pool.shutdown();

    outcome?;
    wait_result?;
    shutdown_result?;

    let summary = stats.summary();
    let mut sink = ProgressSink::new(output.as_deref()).map_err(|e| Fatal::new(e.to_string()))?;
    sink.writeln(&summary).map_err(|e| Fatal::new(e.to_string()))?;

    Ok(summary)
}

#[allow(clippy::too_many_arguments)]
fn process_files(
    files: &[String],
    skip: usize,
    first_consumed: VecDeque<String>,
    first_source: InputSource,
    format: &dyn Format,
    parse: &hit_parser::ParseConfig,
    filter: &crate::filters::FilterConfig,
    stats: &Arc<Statistics>,
    recorder_pool: &RecorderPool,
    flush_threshold: usize,
    debug_request_limit: Option<usize>,
    ctrl_rx: &crossbeam_channel::Receiver<Ctrl>,
    output: Option<&Path>,
) -> Result<(), Fatal> {
    let mut first_consumed = Some(first_consumed);
    let mut first_source = Some(first_source);

    let mut buffer: Vec<Hit> = Vec::with_capacity(flush_threshold);
    let mut dispatched = 0usize;
    let mut shutting_down = false;

    for (idx, path) in files.iter().enumerate() {
        if shutting_down {
            break;
        }

        let mut feed = if idx == 0 {
            LineFeed {
                buffered: first_consumed.take().unwrap_or_default(),
                source: first_source.take().expect("first source only taken once"),
            }
        } else {
            let mut source = InputSource::open(path).map_err(|e| Fatal::new(e.to_string()))?;
            skip_lines(&mut source, skip)?;
            LineFeed { buffered: VecDeque::new(), source }
        };

        let filename = feed.source.filename.clone();
        let mut lineno = 0usize;

        loop {
            if let Ok(ctrl) = ctrl_rx.try_recv() {
                match ctrl {
                    Ctrl::Shutdown { .. } => shutting_down = true,
                    Ctrl::PrintStats => {
                        if let Ok(mut sink) = ProgressSink::new(output) {
                            let _ = sink.writeln(&stats.summary());
                        }
                    }
                }
            }
            if shutting_down {
                break;
            }

            let Some(line) = feed.next_line()? else {
                break;
            };
            lineno += 1;

            if line.starts_with('#') {
                continue;
            }

            match format.match_line(&line) {
                None => stats.incr_invalid(),
                Some((fields, _)) => {
                    match hit_parser::parse_line(fields, format, filename.as_deref(), lineno, parse, filter) {
                        Ok(hit) => {
                            stats.incr_parsed();
                            buffer.push(hit);
                            if buffer.len() >= flush_threshold {
                                dispatch_batch(recorder_pool, &mut buffer, &mut dispatched)?;
                                if let Some(limit) = debug_request_limit {
                                    if dispatched >= limit {
                                        shutting_down = true;
                                        break;
                                    }
                                }
                            }
                        }
                        Err(Rejection::Invalid) => stats.incr_invalid(),
                        Err(Rejection::Filtered) => stats.incr_filtered(),
                        Err(Rejection::NoSite) => stats.incr_no_site(),
                    }
                }
            }
        }
    }

    dispatch_batch(recorder_pool, &mut buffer, &mut dispatched)?;
    Ok(())
}

fn dispatch_batch(recorder_pool: &RecorderPool, buffer: &mut Vec<Hit>, dispatched: &mut usize) -> Result<(), Fatal> {
    if buffer.is_empty() {
        return Ok(());
    }
    *dispatched += buffer.len();
    let batch = std::mem::take(buffer);
    recorder_pool.dispatch(batch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_feed_replays_buffered_lines_before_the_source() {
        let mut feed_buffer: VecDeque<String> = VecDeque::new();
        feed_buffer.push_back("first".to_string());
        feed_buffer.push_back("second".to_string());
        assert_eq!(feed_buffer.pop_front(), Some("first".to_string()));
        assert_eq!(feed_buffer.pop_front(), Some("second".to_string()));
        assert_eq!(feed_buffer.pop_front(), None);
    }

    #[test]
    fn sample_has_host_field_detects_vhost_format() {
        let format = crate::formats::CommonVhostFormat;
        let sample = vec!["example.com:80 1.2.3.4 - - [10/Oct/2000:13:55:36 -0700] \"GET /a HTTP/1.0\" 200 10".to_string()];
        assert!(sample_has_host_field(&format, &sample));
    }

    #[test]
    fn sample_has_host_field_false_for_plain_common() {
        let format = crate::formats::CommonFormat;
        let sample =
            vec!["1.2.3.4 - - [10/Oct/2000:13:55:36 -0700] \"GET /a HTTP/1.0\" 200 10".to_string()];
        assert!(!sample_has_host_field(&format, &sample));
    }
}
