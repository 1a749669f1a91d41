//! Process-wide ingestion counters.
//! Read by the `status` command; cheap enough to bump from every cycle.
use std::sync::atomic::{AtomicU64, Ordering};

static POLLS: AtomicU64 = AtomicU64::new(0);
static PROVIDER_FAILURES: AtomicU64 = AtomicU64::new(0);
static ROWS_WRITTEN: AtomicU64 = AtomicU64::new(0);
static THROTTLED_CYCLES: AtomicU64 = AtomicU64::new(0);
static UNCHANGED_NODES: AtomicU64 = AtomicU64::new(0);
static IO_FAILURES: AtomicU64 = AtomicU64::new(0);
static MALFORMED_SKIPPED: AtomicU64 = AtomicU64::new(0);
static ROWS_TRIMMED: AtomicU64 = AtomicU64::new(0);

pub fn inc_polls() {
    POLLS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_provider_failures() {
    PROVIDER_FAILURES.fetch_add(1, Ordering::Relaxed);
}
pub fn add_rows_written(n: usize) {
    ROWS_WRITTEN.fetch_add(n as u64, Ordering::Relaxed);
}
pub fn inc_throttled_cycles() {
    THROTTLED_CYCLES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_unchanged_nodes() {
    UNCHANGED_NODES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_io_failures() {
    IO_FAILURES.fetch_add(1, Ordering::Relaxed);
}
pub fn add_malformed_skipped(n: usize) {
    MALFORMED_SKIPPED.fetch_add(n as u64, Ordering::Relaxed);
}
pub fn add_rows_trimmed(n: usize) {
    ROWS_TRIMMED.fetch_add(n as u64, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub polls: u64,
    pub provider_failures: u64,
    pub rows_written: u64,
    pub throttled_cycles: u64,
    pub unchanged_nodes: u64,
    pub io_failures: u64,
    pub malformed_skipped: u64,
    pub rows_trimmed: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        polls: POLLS.load(Ordering::Relaxed),
        provider_failures: PROVIDER_FAILURES.load(Ordering::Relaxed),
        rows_written: ROWS_WRITTEN.load(Ordering::Relaxed),
        throttled_cycles: THROTTLED_CYCLES.load(Ordering::Relaxed),
        unchanged_nodes: UNCHANGED_NODES.load(Ordering::Relaxed),
        io_failures: IO_FAILURES.load(Ordering::Relaxed),
        malformed_skipped: MALFORMED_SKIPPED.load(Ordering::Relaxed),
        rows_trimmed: ROWS_TRIMMED.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Counters are process-wide and other tests bump them too, so only
    // monotonic deltas are asserted.
    #[test]
    fn counters_only_move_forward() {
        let before = snapshot();
        inc_polls();
        add_rows_written(3);
        add_malformed_skipped(2);
        let after = snapshot();
        assert!(after.polls > before.polls);
        assert!(after.rows_written >= before.rows_written + 3);
        assert!(after.malformed_skipped >= before.malformed_skipped + 2);
    }
}
