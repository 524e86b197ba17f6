use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Process-wide counters for monitoring.
#[derive(Clone)]
pub struct Metrics {
    pub users_registered: Arc<AtomicU64>,
    pub logins: Arc<AtomicU64>,
    pub failed_logins: Arc<AtomicU64>,
    pub cases_created: Arc<AtomicU64>,
    pub documents_generated: Arc<AtomicU64>,
    pub hashes_registered: Arc<AtomicU64>,
    pub secure_entries: Arc<AtomicU64>,
    pub start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            users_registered: Arc::new(AtomicU64::new(0)),
            logins: Arc::new(AtomicU64::new(0)),
            failed_logins: Arc::new(AtomicU64::new(0)),
            cases_created: Arc::new(AtomicU64::new(0)),
            documents_generated: Arc::new(AtomicU64::new(0)),
            hashes_registered: Arc::new(AtomicU64::new(0)),
            secure_entries: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
        }
    }

    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            users_registered: self.users_registered.load(Ordering::Relaxed),
            logins: self.logins.load(Ordering::Relaxed),
            failed_logins: self.failed_logins.load(Ordering::Relaxed),
            cases_created: self.cases_created.load(Ordering::Relaxed),
            documents_generated: self.documents_generated.load(Ordering::Relaxed),
            hashes_registered: self.hashes_registered.load(Ordering::Relaxed),
            secure_entries: self.secure_entries.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
pub struct MetricsSnapshot {
    pub users_registered: u64,
    pub logins: u64,
    pub failed_logins: u64,
    pub cases_created: u64,
    pub documents_generated: u64,
    pub hashes_registered: u64,
    pub secure_entries: u64,
    pub uptime_seconds: u64,
}

impl MetricsSnapshot {
    /// Prometheus text exposition: `(name, help, type, value)` per series.
    pub fn series(&self) -> [(&'static str, &'static str, &'static str, u64); 8] {
        [
            ("casewatch_users_registered", "Users registered", "counter", self.users_registered),
            ("casewatch_logins", "Successful logins", "counter", self.logins),
            ("casewatch_failed_logins", "Rejected login attempts", "counter", self.failed_logins),
            ("casewatch_cases_created", "Cases created", "counter", self.cases_created),
            ("casewatch_documents_generated", "Case reports generated", "counter", self.documents_generated),
            ("casewatch_hashes_registered", "Document hashes registered on chain", "counter", self.hashes_registered),
            ("casewatch_secure_entries", "Anonymous secure entries received", "counter", self.secure_entries),
            ("casewatch_uptime_seconds", "Uptime seconds", "gauge", self.uptime_seconds),
        ]
    }
}
