//! # Interval Walk
//!
//! The walk assigns a location to every interval. It is a seam: anything
//! implementing [IntervalWalk] can drive the allocation, tests may even place
//! intervals by hand.
//!
//! [SpillingWalker] is the reference walk. Intervals are handled in the order
//! of their start. An interval takes its hinted register if that register is
//! free for the whole interval, otherwise the register free the longest. When
//! no register lasts, the interval keeps the register up to the conflict and
//! the rest goes to the spill slot. A spilled part is reloaded right before
//! its next use requiring a register.

use std::{cmp::Reverse, collections::BTreeMap, collections::BinaryHeap};

use log::{debug, trace};
use rustc_hash::FxHashMap;

use super::{
    interval::{IntervalId, IntervalStore, RegisterPriority, SpillState},
    LinearScan,
    MoveResolver,
    RegAllocError,
    RegAllocResult,
};
use crate::{
    collections::storage::ArenaPtr,
    lir::{Location, Operand, PReg},
};

pub trait IntervalWalk {
    /// Assign a location to every non-empty interval of `alloc`.
    fn walk(&mut self, alloc: &mut LinearScan<'_>) -> RegAllocResult<()>;
}

/// Update the spill state of the parent of `id` when a part of it goes to
/// memory.
///
/// Spilled once, the store happens at the split. Spilled twice, the value is
/// stored once at its definition instead.
pub fn change_spill_state(store: &mut IntervalStore, id: IntervalId) {
    match store.spill_state(id) {
        SpillState::NoSpillStore => store.set_spill_state(id, SpillState::OneSpillStore),
        SpillState::OneSpillStore => store.set_spill_state(id, SpillState::StoreAtDefinition),
        // values without a known definition, arguments in memory and redefined
        // values keep theirs
        SpillState::NoDefinitionFound
        | SpillState::StoreAtDefinition
        | SpillState::StartInMemory
        | SpillState::NoOptimization => {}
    }
}

#[derive(Default)]
pub struct SpillingWalker {
    /// Ordered by start, then by creation.
    unhandled: BinaryHeap<Reverse<(u32, IntervalId)>>,
    /// The intervals holding each register.
    assigned: FxHashMap<PReg, Vec<IntervalId>>,
    /// Moves between split parts, keyed by the op id they go before.
    split_moves: BTreeMap<u32, Vec<(IntervalId, IntervalId)>>,
}

impl SpillingWalker {
    pub fn new() -> Self { Self::default() }

    fn free_until(&self, store: &IntervalStore, reg: PReg, current: IntervalId) -> u32 {
        let current = current.deref(store);

        let fixed = store.interval_for(Operand::Fixed(reg));
        let holders = self.assigned.get(&reg).into_iter().flatten().copied();

        fixed
            .into_iter()
            .chain(holders)
            .filter_map(|other| other.deref(store).first_intersection(current))
            .min()
            .unwrap_or(u32::MAX)
    }

    fn assign_reg(&mut self, store: &mut IntervalStore, id: IntervalId, reg: PReg) {
        store.set_location(id, Location::Reg(reg));
        self.assigned.entry(reg).or_default().push(id);
        trace!("assign {} to {}", id.deref(store).operand(), reg);
    }

    fn allocate(&mut self, alloc: &mut LinearScan<'_>, current: IntervalId) -> RegAllocResult<()> {
        let (kind, from, to) = {
            let interval = current.deref(&alloc.intervals);
            (interval.kind(), interval.from(), interval.to())
        };

        let free: Vec<(PReg, u32)> = alloc
            .config
            .allocatable_regs_of(kind)
            .map(|reg| (reg, self.free_until(&alloc.intervals, reg, current)))
            .collect();

        if let Some(Location::Reg(hinted)) = alloc
            .intervals
            .location_hint(current, true)
            .and_then(|hint| alloc.intervals.location(hint))
        {
            if free
                .iter()
                .any(|(reg, until)| *reg == hinted && *until >= to)
            {
                self.assign_reg(&mut alloc.intervals, current, hinted);
                return Ok(());
            }
        }

        let mut best: Option<(PReg, u32)> = None;
        for (reg, until) in free {
            if best.map_or(true, |(_, best_until)| until > best_until) {
                best = Some((reg, until));
            }
        }

        match best {
            Some((reg, until)) if until >= to => {
                self.assign_reg(&mut alloc.intervals, current, reg);
            }
            Some((reg, until)) => {
                let split_pos = split_position(alloc, until);
                if split_pos > from {
                    let child = alloc.intervals.split(current, split_pos)?;
                    self.assign_reg(&mut alloc.intervals, current, reg);
                    self.spill(alloc, child)?;
                    if !alloc.numbering.is_block_begin(split_pos) {
                        self.record_split_move(split_pos, current, child);
                    }
                } else {
                    self.spill(alloc, current)?;
                }
            }
            None => self.spill(alloc, current)?,
        }
        Ok(())
    }

    fn spill(&mut self, alloc: &mut LinearScan<'_>, id: IntervalId) -> RegAllocResult<()> {
        let slot = alloc.intervals.assign_spill_slot(id);
        alloc.intervals.set_location(id, Location::Stack(slot));
        change_spill_state(&mut alloc.intervals, id);

        trace!("spill {} to {}", id.deref(&alloc.intervals), slot);

        let (from, to, next_use) = {
            let interval = id.deref(&alloc.intervals);
            let from = interval.from();
            (
                from,
                interval.to(),
                interval.next_usage(RegisterPriority::MustHaveRegister, from),
            )
        };
        let Some(use_pos) = next_use else {
            return Ok(());
        };

        let reload_pos = if alloc.numbering.is_block_begin(use_pos) {
            use_pos
        } else {
            use_pos - 1
        };
        if reload_pos <= from || reload_pos >= to {
            return Ok(());
        }

        let reload = alloc.intervals.split(id, reload_pos)?;
        if !alloc.numbering.is_block_begin(reload_pos) {
            self.record_split_move(reload_pos, id, reload);
        }
        self.unhandled
            .push(Reverse((reload.deref(&alloc.intervals).from(), reload)));

        trace!("reload {} at {}", reload.deref(&alloc.intervals).operand(), reload_pos);
        Ok(())
    }

    fn record_split_move(&mut self, split_pos: u32, from: IntervalId, to: IntervalId) {
        self.split_moves
            .entry(split_pos + 1)
            .or_default()
            .push((from, to));
    }

    /// Insert the moves between split parts, last position first so the
    /// indices of the earlier positions stay valid.
    fn insert_split_moves(&mut self, alloc: &mut LinearScan<'_>) -> RegAllocResult<()> {
        let split_moves = std::mem::take(&mut self.split_moves);

        for (op_id, moves) in split_moves.into_iter().rev() {
            let Some(block) = alloc.numbering.block_for_id(op_id) else {
                let operand = moves
                    .first()
                    .map_or(Operand::Const(0), |(from, _)| from.deref(&alloc.intervals).operand());
                return Err(RegAllocError::IntervalInvariant {
                    operand,
                    reason: "split position outside of the function",
                });
            };
            let first = alloc.first_lir_instruction_id(block)?;
            let index = ((op_id - first) / 2) as usize;

            let mut resolver = MoveResolver::new();
            resolver.set_insert_position(block, index);
            for (from, to) in moves {
                if alloc.intervals.location(from) != alloc.intervals.location(to) {
                    resolver.add_mapping(from, to);
                }
            }
            if resolver.has_mappings() {
                resolver.resolve_and_append_moves(alloc.ctx, &mut alloc.intervals, &mut alloc.stats)?;
            }
        }
        Ok(())
    }
}

/// The position to split before a conflict at `pos`.
///
/// Block begins are taken as they are, data-flow resolution connects the
/// parts. Inside a block the split happens at the odd position right before
/// the instruction, never between a terminator and the next label.
fn split_position(alloc: &LinearScan<'_>, pos: u32) -> u32 {
    if pos == 0 || alloc.numbering.is_block_begin(pos) {
        return pos;
    }
    let split_pos = (pos - 1) | 1;
    if alloc.numbering.is_block_begin(split_pos + 1) {
        split_pos.saturating_sub(2)
    } else {
        split_pos
    }
}

impl IntervalWalk for SpillingWalker {
    fn walk(&mut self, alloc: &mut LinearScan<'_>) -> RegAllocResult<()> {
        self.unhandled.clear();
        self.assigned.clear();
        self.split_moves.clear();

        for id in alloc.intervals.parents().collect::<Vec<_>>() {
            let interval = id.deref(&alloc.intervals);
            if interval.is_fixed() || interval.is_empty() || interval.location().is_some() {
                continue;
            }
            self.unhandled.push(Reverse((interval.from(), id)));
        }

        while let Some(Reverse((_, current))) = self.unhandled.pop() {
            self.allocate(alloc, current)?;
        }

        debug!(
            "walk done, {} moves between split parts",
            self.split_moves.values().map(Vec::len).sum::<usize>()
        );
        self.insert_split_moves(alloc)
    }
}
