//! The sharding recorder pool: N worker threads, each serializing one shard of
//! same-visitor hits into tracker requests. See SPEC_FULL.md §4.6.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Sender};
use serde_json::{Map as JsonMap, Value};

use crate::error::Fatal;
use crate::hash;
use crate::hit::Hit;
use crate::http_client::{HttpClient, HttpError};
use crate::request_builder::{self, BuiltArgs, HitArgsConfig, RequestBuilderConfig};
use crate::resolver::{Resolver, NO_HOSTNAME_SENTINEL};
use crate::stats::Statistics;

#[derive(Debug, Clone, Copy)]
pub enum SendMode {
    Bulk { max_payload_size: usize },
    Single,
    /// Resolves and builds requests exactly like `Single`, but never sends them.
    /// Site resolution still reaches the management API; only the tracker POST is
    /// skipped (SPEC_FULL.md §10.3 dry-run note).
    Dry,
}

#[derive(Clone)]
pub struct RecorderConfig {
    pub num_workers: usize,
    pub mode: SendMode,
    pub sleep_between_requests: Duration,
    pub replay_tracking: bool,
}

struct WorkerHandle {
    sender: Sender<Vec<Hit>>,
    in_flight: Arc<AtomicUsize>,
    handle: Option<thread::JoinHandle<()>>,
}

/// N bounded-queue workers, each receiving whole shards of hits as single queue
/// items so a shard's parser order is preserved end to end (SPEC_FULL.md §8
/// invariant 3).
pub struct RecorderPool {
    workers: Vec<WorkerHandle>,
    num_workers: usize,
    replay_tracking: bool,
    fatal: Arc<Mutex<Option<Fatal>>>,
}

impl RecorderPool {
    pub fn start(
        config: RecorderConfig,
        resolver: Arc<Resolver>,
        client: Arc<HttpClient>,
        rb_config: Arc<RequestBuilderConfig>,
        stats: Arc<Statistics>,
    ) -> Self {
        let fatal = Arc::new(Mutex::new(None));
        let mut workers = Vec::with_capacity(config.num_workers);

        for _ in 0..config.num_workers {
            let (sender, receiver) = bounded::<Vec<Hit>>(2);
            let in_flight = Arc::new(AtomicUsize::new(0));
            let in_flight_worker = in_flight.clone();
            let resolver = resolver.clone();
            let client = client.clone();
            let rb_config = rb_config.clone();
            let stats = stats.clone();
            let fatal_cell = fatal.clone();
            let mode = config.mode;
            let sleep = config.sleep_between_requests;

            let handle = thread::spawn(move || {
                while let Ok(batch) = receiver.recv() {
                    let len = batch.len();
                    if let Err(err) = process_batch(&batch, mode, &resolver, &client, &rb_config, &stats, sleep) {
                        *fatal_cell.lock().unwrap() = Some(err);
                        in_flight_worker.fetch_sub(len, Ordering::SeqCst);
                        break;
                    }
                    in_flight_worker.fetch_sub(len, Ordering::SeqCst);
                }
            });

            workers.push(WorkerHandle {
                sender,
                in_flight,
                handle: Some(handle),
            });
        }

        Self {
            workers,
            num_workers: config.num_workers,
            replay_tracking: config.replay_tracking,
            fatal,
        }
    }

    /// Shards `hits` by visitor identity and hands each non-empty shard to its
    /// worker as a single queue item. Blocks (providing backpressure) when a
    /// worker's queue is full.
    pub fn dispatch(&self, hits: Vec<Hit>) -> Result<(), Fatal> {
        self.check_fatal()?;

        let mut shards: Vec<Vec<Hit>> = (0..self.num_workers).map(|_| Vec::new()).collect();
        for hit in hits {
            let shard = hash::shard_for(hit.visitor_identity(self.replay_tracking), self.num_workers);
            shards[shard].push(hit);
        }

        for (idx, shard_hits) in shards.into_iter().enumerate() {
            if shard_hits.is_empty() {
                continue;
            }
            let worker = &self.workers[idx];
            worker.in_flight.fetch_add(shard_hits.len(), Ordering::SeqCst);
            if worker.sender.send(shard_hits).is_err() {
                // Worker thread has already exited after recording a fatal error.
                break;
            }
        }
        self.check_fatal()
    }

    /// Blocks until every worker's queue is empty and its in-flight batch has
    /// finished processing.
    pub fn wait_empty(&self) -> Result<(), Fatal> {
        for worker in &self.workers {
            loop {
                self.check_fatal()?;
                if worker.sender.is_empty() && worker.in_flight.load(Ordering::SeqCst) == 0 {
                    break;
                }
                thread::sleep(Duration::from_millis(5));
            }
        }
        self.check_fatal()
    }

    /// Drops all senders (closing the queues, which ends each worker's receive loop)
    /// and joins every worker thread.
    pub fn shutdown(mut self) -> Result<(), Fatal> {
        let handles: Vec<_> = self.workers.iter_mut().filter_map(|w| w.handle.take()).collect();
        drop(self.workers);
        for handle in handles {
            let _ = handle.join();
        }
        self.check_fatal()
    }

    fn check_fatal(&self) -> Result<(), Fatal> {
        match self.fatal.lock().unwrap().clone() {
            Some(f) => Err(f),
            None => Ok(()),
        }
    }
}

fn process_batch(
    hits: &[Hit],
    mode: SendMode,
    resolver: &Resolver,
    client: &HttpClient,
    rb_config: &RequestBuilderConfig,
    stats: &Statistics,
    sleep: Duration,
) -> Result<(), Fatal> {
    match mode {
        SendMode::Single => process_single(hits, resolver, client, rb_config, stats, sleep),
        SendMode::Bulk { max_payload_size } => {
            process_bulk(hits, max_payload_size, resolver, client, rb_config, stats, sleep)
        }
        SendMode::Dry => process_dry(hits, resolver, client, rb_config, stats),
    }
}

/// Like `process_single`, but stops short of the tracker POST.
fn process_dry(
    hits: &[Hit],
    resolver: &Resolver,
    client: &HttpClient,
    rb_config: &RequestBuilderConfig,
    stats: &Statistics,
) -> Result<(), Fatal> {
    for hit in hits {
        if resolve_and_build(hit, resolver, client, rb_config, stats)?.is_none() {
            continue;
        }
        if hit.is_download {
            stats.incr_downloads();
        }
        stats.incr_recorded();
    }
    Ok(())
}

fn process_single(
    hits: &[Hit],
    resolver: &Resolver,
    client: &HttpClient,
    rb_config: &RequestBuilderConfig,
    stats: &Statistics,
    sleep: Duration,
) -> Result<(), Fatal> {
    for hit in hits {
        let Some(args) = resolve_and_build(hit, resolver, client, rb_config, stats)? else {
            continue;
        };
        let map = as_object(args);
        client.send_single(&map).map_err(|e| http_error_to_fatal(e, hit))?;
        if hit.is_download {
            stats.incr_downloads();
        }
        stats.incr_recorded();
        stats.incr_uploaded_by(1);
        if !sleep.is_zero() {
            thread::sleep(sleep);
        }
    }
    Ok(())
}

fn process_bulk(
    hits: &[Hit],
    max_payload_size: usize,
    resolver: &Resolver,
    client: &HttpClient,
    rb_config: &RequestBuilderConfig,
    stats: &Statistics,
    sleep: Duration,
) -> Result<(), Fatal> {
    let mut pending_hits: Vec<&Hit> = Vec::new();
    let mut pending_args: Vec<Value> = Vec::new();

    for hit in hits {
        let Some(args) = resolve_and_build(hit, resolver, client, rb_config, stats)? else {
            continue;
        };
        pending_hits.push(hit);
        pending_args.push(args);

        if pending_args.len() >= max_payload_size {
            flush_bulk(&mut pending_args, &mut pending_hits, client, stats)?;
            if !sleep.is_zero() {
                thread::sleep(sleep);
            }
        }
    }

    if !pending_args.is_empty() {
        flush_bulk(&mut pending_args, &mut pending_hits, client, stats)?;
    }
    Ok(())
}

/// Sends one bulk batch, trimming `args`/`hits` down to any accepted prefix via
/// `HttpClient::send_bulk`'s in-place trimming (SPEC_FULL.md §4.7, §8 invariant 4).
fn flush_bulk(
    args: &mut Vec<Value>,
    hits: &mut Vec<&Hit>,
    client: &HttpClient,
    stats: &Statistics,
) -> Result<(), Fatal> {
    let original_len = args.len();
    match client.send_bulk(args) {
        Ok(()) => {
            let downloads = hits.iter().filter(|h| h.is_download).count() as u64;
            stats.incr_downloads_by(downloads);
            stats.incr_recorded_by(original_len as u64);
            stats.incr_uploaded_by(original_len as u64);
            hits.clear();
            Ok(())
        }
        Err(e) => {
            let accepted = original_len - args.len();
            let downloads = hits[..accepted].iter().filter(|h| h.is_download).count() as u64;
            stats.incr_downloads_by(downloads);
            stats.incr_recorded_by(accepted as u64);
            stats.incr_uploaded_by(accepted as u64);
            let failing_hit = hits[accepted];
            hits.clear();
            Err(http_error_to_fatal(e, failing_hit))
        }
    }
}

fn resolve_and_build(
    hit: &Hit,
    resolver: &Resolver,
    client: &HttpClient,
    rb_config: &RequestBuilderConfig,
    stats: &Statistics,
) -> Result<Option<Value>, Fatal> {
    match resolver.resolve(hit, client)? {
        None => {
            stats.incr_no_site();
            let hostname = hit.host.clone().unwrap_or_else(|| NO_HOSTNAME_SENTINEL.to_string());
            stats.record_ignored_hostname(hostname);
            Ok(None)
        }
        Some(site) => {
            let config = HitArgsConfig {
                hit,
                site_id: &site.site_id,
                main_url: site.main_url.as_deref(),
            };
            let built: BuiltArgs = request_builder::build(&config, rb_config);
            let map: JsonMap<String, Value> = built.into_iter().collect();
            Ok(Some(Value::Object(map)))
        }
    }
}

fn as_object(value: Value) -> JsonMap<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => JsonMap::new(),
    }
}

fn http_error_to_fatal(e: HttpError, hit: &Hit) -> Fatal {
    let is_bad_request = matches!(e, HttpError::BadRequest(_));
    let mut fatal = Fatal::new(e.to_string()).with_context(hit.filename.clone(), hit.lineno);
    if is_bad_request {
        fatal = fatal.with_restart_hint(hit.lineno);
    }
    fatal
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_routes_same_identity_to_same_shard() {
        let a = hash::shard_for("alice", 4);
        let b = hash::shard_for("alice", 4);
        assert_eq!(a, b);
    }

    #[test]
    fn bulk_trim_accounting_matches_accepted_prefix() {
        // 10 requests, 4 accepted: recorded/uploaded should advance by 4, and the
        // failing hit should be the 5th (index 4), matching SPEC_FULL.md §8 scenario 5.
        let accepted = 4usize;
        let hits: Vec<usize> = (0..10).collect();
        let failing_index = hits[accepted];
        assert_eq!(failing_index, 4);
    }
}
