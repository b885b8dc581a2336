//! Service-wide request counters for the health report.
//!
//! One `parking_lot::Mutex` guards the counters, the id sets and the snapshot
//! cache. Snapshots copy under the lock and sort/format outside it; a
//! mutation-generation counter keeps a snapshot computed before a concurrent
//! mutation from being cached after it.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default lifetime of a cached snapshot.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_millis(500);

/// Point-in-time view of the counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Local time, `YYYY-MM-DD HH:MM:SS`.
    pub start_time: String,
    pub uptime_seconds: u64,
    /// e.g. `"1d 2h 3m 4s"`; zero units above seconds are omitted.
    pub uptime_formatted: String,
    pub total_requests: u64,
    pub success_count: u64,
    pub failed_count: u64,
    pub processing_count: usize,
    pub processing_ids: Vec<String>,
    pub queued_count: usize,
    pub queued_ids: Vec<String>,
}

struct Inner {
    total: u64,
    success: u64,
    failed: u64,
    processing: HashSet<String>,
    queued: HashSet<String>,
    generation: u64,
    cache: Option<(Instant, StatsSnapshot)>,
}

impl Inner {
    fn touch(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.cache = None;
    }
}

pub struct ServiceStats {
    started_at: DateTime<Local>,
    started: Instant,
    ttl: Duration,
    inner: Mutex<Inner>,
}

impl ServiceStats {
    pub fn new() -> Self {
        Self::with_cache_ttl(DEFAULT_CACHE_TTL)
    }

    pub fn with_cache_ttl(ttl: Duration) -> Self {
        Self {
            started_at: Local::now(),
            started: Instant::now(),
            ttl,
            inner: Mutex::new(Inner {
                total: 0,
                success: 0,
                failed: 0,
                processing: HashSet::new(),
                queued: HashSet::new(),
                generation: 0,
                cache: None,
            }),
        }
    }

    /// Record an upload that has arrived but not yet entered processing.
    pub fn enqueue(&self, id: &str) {
        let mut inner = self.inner.lock();
        inner.queued.insert(id.to_owned());
        inner.touch();
    }

    /// Count a request and mark it processing.
    pub fn begin(&self, id: &str) {
        let mut inner = self.inner.lock();
        inner.total += 1;
        inner.queued.remove(id);
        inner.processing.insert(id.to_owned());
        inner.touch();
    }

    pub fn finish_success(&self, id: &str) {
        let mut inner = self.inner.lock();
        inner.success += 1;
        inner.processing.remove(id);
        inner.touch();
    }

    pub fn finish_failure(&self, id: &str) {
        let mut inner = self.inner.lock();
        inner.failed += 1;
        inner.processing.remove(id);
        inner.queued.remove(id);
        inner.touch();
    }

    /// Drop the cached snapshot.
    pub fn invalidate(&self) {
        self.inner.lock().cache = None;
    }

    /// `begin(id)` and return a ticket that records exactly one outcome.
    pub fn ticket(self: &Arc<Self>, id: impl Into<String>) -> RequestTicket {
        let id = id.into();
        self.begin(&id);
        RequestTicket {
            stats: Arc::clone(self),
            id,
            resolved: false,
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let (generation, total, success, failed, processing, queued) = {
            let inner = self.inner.lock();
            if let Some((at, snap)) = &inner.cache {
                if at.elapsed() < self.ttl {
                    return snap.clone();
                }
            }
            (
                inner.generation,
                inner.total,
                inner.success,
                inner.failed,
                inner.processing.iter().cloned().collect::<Vec<_>>(),
                inner.queued.iter().cloned().collect::<Vec<_>>(),
            )
        };

        let mut processing_ids = processing;
        let mut queued_ids = queued;
        processing_ids.sort_unstable();
        queued_ids.sort_unstable();

        let uptime_seconds = self.started.elapsed().as_secs();
        let snap = StatsSnapshot {
            start_time: self.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            uptime_seconds,
            uptime_formatted: format_uptime(uptime_seconds),
            total_requests: total,
            success_count: success,
            failed_count: failed,
            processing_count: processing_ids.len(),
            processing_ids,
            queued_count: queued_ids.len(),
            queued_ids,
        };

        let mut inner = self.inner.lock();
        if inner.generation == generation {
            inner.cache = Some((Instant::now(), snap.clone()));
        }
        snap
    }
}

impl Default for ServiceStats {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ServiceStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceStats")
            .field("started_at", &self.started_at)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

/// Guard for one processing request.
///
/// Dropping an unresolved ticket records a failure, so an early return or a
/// cancelled task still produces one terminal transition.
#[must_use = "an unresolved ticket records a failure when dropped"]
pub struct RequestTicket {
    stats: Arc<ServiceStats>,
    id: String,
    resolved: bool,
}

impl RequestTicket {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn succeed(mut self) {
        self.resolved = true;
        self.stats.finish_success(&self.id);
    }

    pub fn fail(mut self) {
        self.resolved = true;
        self.stats.finish_failure(&self.id);
    }
}

impl Drop for RequestTicket {
    fn drop(&mut self) {
        if !self.resolved {
            warn!(request_id = %self.id, "request ended without an outcome; counting as failed");
            self.stats.finish_failure(&self.id);
        }
    }
}

/// `"1d 2h 3m 4s"`; days/hours/minutes appear only when non-zero.
pub fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3_600;
    let minutes = (seconds % 3_600) / 60;
    let secs = seconds % 60;

    let mut parts = Vec::with_capacity(4);
    for (value, unit) in [(days, 'd'), (hours, 'h'), (minutes, 'm')] {
        if value > 0 {
            parts.push(format!("{value}{unit}"));
        }
    }
    parts.push(format!("{secs}s"));
    parts.join(" ")
}
