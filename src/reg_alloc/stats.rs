//! Allocation counters.
//!
//! Counters are collected per compilation in [AllocStats] and merged into a
//! [StatsAggregator] once the compilation is done. They carry no correctness
//! weight.

use std::{
    fmt,
    sync::{Mutex, OnceLock, PoisonError},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocStats {
    pub phi_resolution_moves: u64,
    pub stack_to_stack_moves: u64,
    pub resolution_moves: u64,
    pub moves_requiring_temporary: u64,
    pub phi_hints_set: u64,
    pub spill_moves_eliminated: u64,
    pub phi_resolution_moves_preserved: u64,
    pub spill_stores_inserted: u64,
}

impl AllocStats {
    pub fn new() -> Self { Self::default() }

    pub fn merge(&mut self, other: &AllocStats) {
        self.phi_resolution_moves += other.phi_resolution_moves;
        self.stack_to_stack_moves += other.stack_to_stack_moves;
        self.resolution_moves += other.resolution_moves;
        self.moves_requiring_temporary += other.moves_requiring_temporary;
        self.phi_hints_set += other.phi_hints_set;
        self.spill_moves_eliminated += other.spill_moves_eliminated;
        self.phi_resolution_moves_preserved += other.phi_resolution_moves_preserved;
        self.spill_stores_inserted += other.spill_stores_inserted;
    }

    /// All the counters with their names.
    pub fn counters(&self) -> [(&'static str, u64); 8] {
        [
            ("phi resolution moves", self.phi_resolution_moves),
            ("stack-to-stack moves", self.stack_to_stack_moves),
            ("resolution moves", self.resolution_moves),
            ("moves requiring temporary", self.moves_requiring_temporary),
            ("phi hints set", self.phi_hints_set),
            ("spill moves eliminated", self.spill_moves_eliminated),
            (
                "phi resolution moves preserved",
                self.phi_resolution_moves_preserved,
            ),
            ("spill stores inserted", self.spill_stores_inserted),
        ]
    }
}

impl fmt::Display for AllocStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in self.counters() {
            writeln!(f, "{:>32}: {}", name, value)?;
        }
        Ok(())
    }
}

#[derive(Default)]
struct Aggregated {
    stats: AllocStats,
    compilations: u64,
}

/// The process-wide sink of the counters.
#[derive(Default)]
pub struct StatsAggregator {
    inner: Mutex<Aggregated>,
}

impl StatsAggregator {
    pub fn new() -> Self { Self::default() }

    /// Add the counters of one finished compilation.
    pub fn merge(&self, stats: &AllocStats) {
        // a panic elsewhere does not invalidate plain counters
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.stats.merge(stats);
        inner.compilations += 1;
    }

    pub fn snapshot(&self) -> AllocStats {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stats
    }

    /// The number of merged compilations.
    pub fn compilations(&self) -> u64 {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .compilations
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        *inner = Aggregated::default();
    }
}

/// The aggregator shared by the whole process.
pub fn global() -> &'static StatsAggregator {
    static GLOBAL: OnceLock<StatsAggregator> = OnceLock::new();
    GLOBAL.get_or_init(StatsAggregator::new)
}
