use std::sync::atomic::{AtomicU64, Ordering};

/// Operational counters for one block store.
///
/// All counters are monotonically increasing and cheap to bump from any
/// thread.
#[derive(Debug, Default)]
pub struct Stats {
    pub puts: AtomicU64,
    pub gets: AtomicU64,
    pub memtable_hits: AtomicU64,
    pub table_hits: AtomicU64,
    pub misses: AtomicU64,
    pub flushes: AtomicU64,
    pub persists_skipped: AtomicU64,
    pub physical_reads: AtomicU64,
    pub conjoins: AtomicU64,
    pub commits: AtomicU64,
    pub cas_failures: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// One-line human-readable summary.
    pub fn summary(&self) -> String {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        format!(
            "puts: {}, gets: {} (mem {}, table {}, miss {}), flushes: {} ({} skipped), \
             physical reads: {}, conjoins: {}, commits: {} ({} cas failures)",
            get(&self.puts),
            get(&self.gets),
            get(&self.memtable_hits),
            get(&self.table_hits),
            get(&self.misses),
            get(&self.flushes),
            get(&self.persists_skipped),
            get(&self.physical_reads),
            get(&self.conjoins),
            get(&self.commits),
            get(&self.cas_failures),
        )
    }
}
