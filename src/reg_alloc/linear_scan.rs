//! The linear scan driver.
//!
//! [LinearScan] holds the state of one allocation. The phases are methods
//! implemented next to their analyses, `run` chains them:
//!
//! number → liveness → build intervals → walk → resolve data flow → eliminate
//! spill moves → assign locations → merge statistics.

use log::debug;

use super::{
    liveness_analysis::{self, BlockInOut},
    stats::{self, AllocStats, StatsAggregator},
    walker::{IntervalWalk, SpillingWalker},
    InstructionNumbering,
    IntervalStore,
    LinearScanConfig,
    RegAllocError,
    RegAllocResult,
};
use crate::{
    collections::storage::ArenaPtr,
    lir::{LirBlock, LirContext, LirFunc},
};

pub struct LinearScan<'a> {
    pub(super) ctx: &'a mut LirContext,
    pub(super) func: LirFunc,
    pub(super) config: LinearScanConfig,

    pub(super) numbering: InstructionNumbering,
    pub(super) liveness: BlockInOut,
    pub(super) intervals: IntervalStore,

    pub(super) stats: AllocStats,
}

impl<'a> LinearScan<'a> {
    pub fn new(ctx: &'a mut LirContext, func: LirFunc, config: LinearScanConfig) -> Self {
        let first_vreg = ctx.vreg_count();
        Self {
            ctx,
            func,
            config,
            numbering: InstructionNumbering::default(),
            liveness: BlockInOut::default(),
            intervals: IntervalStore::new(first_vreg),
            stats: AllocStats::default(),
        }
    }

    /// Allocate `func` with the reference walker and merge the counters into
    /// the process-wide aggregator.
    pub fn allocate(
        ctx: &'a mut LirContext,
        func: LirFunc,
        config: LinearScanConfig,
    ) -> RegAllocResult<AllocStats> {
        LinearScan::new(ctx, func, config).run(&mut SpillingWalker::new(), stats::global())
    }

    /// Run all the phases.
    ///
    /// On success every variable of the function is replaced by a register
    /// or a stack slot, and the counters are merged into `aggregator`.
    pub fn run(
        mut self,
        walker: &mut dyn IntervalWalk,
        aggregator: &StatsAggregator,
    ) -> RegAllocResult<AllocStats> {
        debug!("linear scan on {}", self.func.name(self.ctx));

        let split = self.func.split_critical_edges(self.ctx);
        if split > 0 {
            debug!("split {} critical edges", split);
        }

        self.number_instructions()?;
        self.compute_liveness()?;
        self.build_intervals()?;

        debug!("walking {} intervals", self.intervals.len());
        walker.walk(&mut self)?;

        if self.config.detailed_asserts {
            self.verify_intervals()?;
        }

        self.resolve_data_flow()?;
        self.eliminate_spill_moves()?;
        self.assign_locations()?;

        self.ctx.reserve_vregs(self.intervals.vreg_count());

        aggregator.merge(&self.stats);
        debug!("linear scan done\n{}", self.stats);

        Ok(self.stats)
    }

    pub fn ctx(&self) -> &LirContext { &*self.ctx }

    pub fn ctx_mut(&mut self) -> &mut LirContext { &mut *self.ctx }

    pub fn func(&self) -> LirFunc { self.func }

    pub fn config(&self) -> &LinearScanConfig { &self.config }

    pub fn numbering(&self) -> &InstructionNumbering { &self.numbering }

    pub fn liveness(&self) -> &BlockInOut { &self.liveness }

    pub fn intervals(&self) -> &IntervalStore { &self.intervals }

    pub fn intervals_mut(&mut self) -> &mut IntervalStore { &mut self.intervals }

    pub fn stats(&self) -> &AllocStats { &self.stats }

    pub fn compute_liveness(&mut self) -> RegAllocResult<()> {
        self.liveness = liveness_analysis::analyze_on_function(self.ctx, self.func)?;
        Ok(())
    }

    pub(super) fn first_lir_instruction_id(&self, block: LirBlock) -> RegAllocResult<u32> {
        self.numbering
            .first_id(block)
            .ok_or_else(|| self.malformed(block, "block is not numbered"))
    }

    pub(super) fn last_lir_instruction_id(&self, block: LirBlock) -> RegAllocResult<u32> {
        self.numbering
            .last_id(block)
            .ok_or_else(|| self.malformed(block, "block is not numbered"))
    }

    pub(super) fn malformed(&self, block: LirBlock, reason: &'static str) -> RegAllocError {
        RegAllocError::MalformedBlock {
            block: block.label(self.ctx).to_string(),
            reason,
        }
    }

    /// Check the split children of every interval after the walk.
    ///
    /// Children are inside the lifetime of their parent, pairwise disjoint,
    /// and every non-empty interval has a location.
    pub fn verify_intervals(&self) -> RegAllocResult<()> {
        let store = &self.intervals;
        for parent in store.parents() {
            let data = parent.deref(store);
            if data.is_empty() && data.split_children().is_empty() {
                continue;
            }

            let mut family: Vec<_> = std::iter::once(parent)
                .chain(data.split_children().iter().copied())
                .filter(|id| !id.deref(store).is_empty())
                .collect();
            family.sort_by_key(|id| id.deref(store).from());

            for pair in family.windows(2) {
                let (a, b) = (pair[0].deref(store), pair[1].deref(store));
                if a.to() > b.from() {
                    return Err(RegAllocError::IntervalInvariant {
                        operand: data.operand(),
                        reason: "split children overlap",
                    });
                }
            }

            for id in family {
                let interval = id.deref(store);
                if interval.location().is_none() {
                    return Err(RegAllocError::UnassignedLocation {
                        operand: interval.operand(),
                    });
                }
                if !interval.is_split_parent() && store.split_parent(id) != parent {
                    return Err(RegAllocError::IntervalInvariant {
                        operand: interval.operand(),
                        reason: "split child registered under another parent",
                    });
                }
            }
        }
        Ok(())
    }
}
