//! Replication metrics
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! embedding application installs a recorder.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Instant;

pub const MERGES: &str = "varsync.merges.total";
pub const ENTRIES_ACCEPTED: &str = "varsync.entries.accepted";
pub const ENTRIES_DISCARDED: &str = "varsync.entries.discarded";
pub const CONFLICTS: &str = "varsync.conflicts.total";
pub const VIOLATIONS: &str = "varsync.violations.total";
pub const BATCHES_SENT: &str = "varsync.batches.sent";
pub const HANDSHAKES: &str = "varsync.handshakes.total";
pub const MERGE_DURATION: &str = "varsync.merge.duration_ms";

/// Register metric descriptions with the installed recorder
pub fn init_metrics() {
    describe_counter!(MERGES, "Remote batches merged, labelled by role");
    describe_counter!(ENTRIES_ACCEPTED, "Remote entries accepted into the registry");
    describe_counter!(ENTRIES_DISCARDED, "Remote entries discarded as stale");
    describe_counter!(CONFLICTS, "Merges aborted by a lock version conflict");
    describe_counter!(VIOLATIONS, "Remote entries dropped for breaking role invariants");
    describe_counter!(BATCHES_SENT, "Outgoing envelopes, labelled by kind");
    describe_counter!(HANDSHAKES, "Handshake outcomes, labelled by outcome");
    describe_histogram!(MERGE_DURATION, "Time spent merging one remote batch in milliseconds");
}

/// Per-session switch in front of the global recorder
#[derive(Debug, Clone, Copy)]
pub struct SyncMetrics {
    enabled: bool,
}

impl SyncMetrics {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn merged(&self, role: &'static str, accepted: usize, discarded: usize) {
        if !self.enabled {
            return;
        }
        counter!(MERGES, "role" => role).increment(1);
        counter!(ENTRIES_ACCEPTED, "role" => role).increment(accepted as u64);
        counter!(ENTRIES_DISCARDED, "role" => role).increment(discarded as u64);
    }

    pub fn conflict(&self) {
        if self.enabled {
            counter!(CONFLICTS).increment(1);
        }
    }

    pub fn violations(&self, count: usize) {
        if self.enabled && count > 0 {
            counter!(VIOLATIONS).increment(count as u64);
        }
    }

    pub fn batch_sent(&self, kind: &'static str) {
        if self.enabled {
            counter!(BATCHES_SENT, "kind" => kind).increment(1);
        }
    }

    pub fn handshake(&self, outcome: &'static str) {
        if self.enabled {
            counter!(HANDSHAKES, "outcome" => outcome).increment(1);
        }
    }

    pub fn timer(&self) -> Option<Timer> {
        self.enabled.then(|| Timer::new(MERGE_DURATION))
    }
}

/// Records elapsed milliseconds into a histogram when stopped
pub struct Timer {
    name: &'static str,
    start: Instant,
}

impl Timer {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            start: Instant::now(),
        }
    }

    pub fn stop(self) {
        let duration = self.start.elapsed();
        histogram!(self.name).record(duration.as_secs_f64() * 1000.0);
    }
}
