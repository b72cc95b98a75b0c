//! Thread-safe run counters and the periodic progress monitor. See SPEC_FULL.md §4.8.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use crate::platform::ProgressSink;

/// The fixed counter set (SPEC_FULL.md §3 "Counter set"). Incremented without locks;
/// read without synchronization by the monitor, which does not need exact precision.
#[derive(Debug, Default)]
pub struct Statistics {
    pub lines_parsed: AtomicU64,
    pub lines_recorded: AtomicU64,
    pub lines_downloads: AtomicU64,
    pub lines_invalid: AtomicU64,
    pub lines_filtered: AtomicU64,
    pub lines_no_site: AtomicU64,
    pub lines_uploaded: AtomicU64,
    ignored_hostnames: Mutex<HashSet<String>>,
    start: std::sync::OnceLock<Instant>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StatsSnapshot {
    pub lines_parsed: u64,
    pub lines_recorded: u64,
    pub lines_downloads: u64,
    pub lines_invalid: u64,
    pub lines_filtered: u64,
    pub lines_no_site: u64,
    pub lines_uploaded: u64,
}

impl Statistics {
    pub fn new() -> Self {
        let stats = Self::default();
        let _ = stats.start.set(Instant::now());
        stats
    }

    pub fn incr_parsed(&self) {
        self.lines_parsed.fetch_add(1, Ordering::Relaxed);
    }
    pub fn incr_recorded(&self) {
        self.incr_recorded_by(1);
    }
    pub fn incr_recorded_by(&self, n: u64) {
        self.lines_recorded.fetch_add(n, Ordering::Relaxed);
    }
    pub fn incr_downloads(&self) {
        self.incr_downloads_by(1);
    }
    pub fn incr_downloads_by(&self, n: u64) {
        self.lines_downloads.fetch_add(n, Ordering::Relaxed);
    }
    pub fn incr_invalid(&self) {
        self.lines_invalid.fetch_add(1, Ordering::Relaxed);
    }
    pub fn incr_filtered(&self) {
        self.lines_filtered.fetch_add(1, Ordering::Relaxed);
    }
    pub fn incr_no_site(&self) {
        self.lines_no_site.fetch_add(1, Ordering::Relaxed);
    }
    pub fn incr_uploaded_by(&self, n: u64) {
        self.lines_uploaded.fetch_add(n, Ordering::Relaxed);
    }

    /// Records a hostname (or the resolver's no-hostname sentinel) that could not be
    /// mapped to a site, for the final summary's distinct-ignored-hostname set.
    pub fn record_ignored_hostname(&self, hostname: String) {
        self.ignored_hostnames.lock().unwrap().insert(hostname);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            lines_parsed: self.lines_parsed.load(Ordering::Relaxed),
            lines_recorded: self.lines_recorded.load(Ordering::Relaxed),
            lines_downloads: self.lines_downloads.load(Ordering::Relaxed),
            lines_invalid: self.lines_invalid.load(Ordering::Relaxed),
            lines_filtered: self.lines_filtered.load(Ordering::Relaxed),
            lines_no_site: self.lines_no_site.load(Ordering::Relaxed),
            lines_uploaded: self.lines_uploaded.load(Ordering::Relaxed),
        }
    }

    pub fn ignored_hostnames(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self.ignored_hostnames.lock().unwrap().iter().cloned().collect();
        hosts.sort();
        hosts
    }

    fn elapsed(&self) -> Duration {
        self.start.get().map(|s| s.elapsed()).unwrap_or_default()
    }

    /// Final summary text, printed once by the CLI after the run ends.
    pub fn summary(&self) -> String {
        let s = self.snapshot();
        let elapsed = self.elapsed().as_secs_f64().max(0.001);
        // "ignored" has no counter of its own; like the summary this is ported from, it's
        // the sum of every rejection bucket that isn't a download.
        let ignored = s.lines_invalid + s.lines_filtered + s.lines_no_site;
        let mut out = format!(
            "{} lines parsed, {} recorded, {} uploaded in {:.1}s ({:.1} lines/sec)\n\
             downloads: {}  ignored: {}  invalid: {}  filtered: {}  no-site: {}",
            s.lines_parsed,
            s.lines_recorded,
            s.lines_uploaded,
            elapsed,
            s.lines_parsed as f64 / elapsed,
            s.lines_downloads,
            ignored,
            s.lines_invalid,
            s.lines_filtered,
            s.lines_no_site,
        );
        let hosts = self.ignored_hostnames();
        if !hosts.is_empty() {
            out.push_str(&format!("\nignored hostnames: {}", hosts.join(", ")));
        }
        out
    }
}

/// Periodic progress monitor: prints parsed/recorded totals and rates at a fixed
/// cadence until told to stop (SPEC_FULL.md §4.8, §5 "one monitor thread").
pub struct Monitor {
    stop: std::sync::Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Monitor {
    /// `output` mirrors `--output`: `None` prints to stdout, `Some(path)` redirects
    /// every progress line (and, separately, the final summary) to that file instead.
    pub fn spawn(stats: std::sync::Arc<Statistics>, cadence: Duration, output: Option<PathBuf>) -> Self {
        let stop = std::sync::Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let handle = thread::spawn(move || {
            let mut sink = match ProgressSink::new(output.as_deref()) {
                Ok(sink) => sink,
                Err(_) => return,
            };
            let mut last = StatsSnapshot::default();
            let mut last_tick = Instant::now();
            while !stop_flag.load(Ordering::Relaxed) {
                thread::sleep(cadence);
                if stop_flag.load(Ordering::Relaxed) {
                    break;
                }
                let current = stats.snapshot();
                let tick_elapsed = last_tick.elapsed().as_secs_f64().max(0.001);
                let current_rate = (current.lines_parsed.saturating_sub(last.lines_parsed)) as f64 / tick_elapsed;
                let avg_rate = current.lines_parsed as f64 / stats.elapsed().as_secs_f64().max(0.001);
                let _ = sink.writeln(&format!(
                    "parsed={} recorded={} avg_rate={:.1}/s rate={:.1}/s",
                    current.lines_parsed, current.lines_recorded, avg_rate, current_rate
                ));
                last = current;
                last_tick = Instant::now();
            }
        });
        Self { stop, handle: Some(handle) }
    }

    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment_independently() {
        let stats = Statistics::new();
        stats.incr_parsed();
        stats.incr_parsed();
        stats.incr_recorded();
        let snap = stats.snapshot();
        assert_eq!(snap.lines_parsed, 2);
        assert_eq!(snap.lines_recorded, 1);
        assert_eq!(snap.lines_invalid, 0);
    }

    #[test]
    fn ignored_hostnames_are_deduplicated_and_sorted() {
        let stats = Statistics::new();
        stats.record_ignored_hostname("b.example".to_string());
        stats.record_ignored_hostname("a.example".to_string());
        stats.record_ignored_hostname("b.example".to_string());
        assert_eq!(stats.ignored_hostnames(), vec!["a.example", "b.example"]);
    }

    #[test]
    fn summary_includes_all_counters() {
        let stats = Statistics::new();
        stats.incr_parsed();
        stats.incr_no_site();
        let summary = stats.summary();
        assert!(summary.contains("1 lines parsed"));
        assert!(summary.contains("no-site: 1"));
    }
}
