//! # Move Resolver
//!
//! Turns a set of parallel moves, one per destination, into a sequence of
//! moves that never overwrites a location before it is read. A move is
//! emitted as soon as its destination is no longer the source of a pending
//! move. When only cycles are left, one register source is saved to a stack
//! temporary and the cycle is broken through it.

use log::trace;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::{
    interval::{IntervalId, IntervalStore},
    AllocStats,
    RegAllocError,
    RegAllocResult,
};
use crate::{
    collections::storage::ArenaPtr,
    lir::{InsertionBuffer, LirBlock, LirContext, LirInst, Location, Operand},
};

/// The source of a pending move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveSource {
    Interval(IntervalId),
    Const(i64),
}

#[derive(Debug, Default)]
pub struct MoveResolver {
    insert_position: Option<(LirBlock, usize)>,

    mapping_from: SmallVec<[MoveSource; 4]>,
    mapping_to: SmallVec<[IntervalId; 4]>,
}

impl MoveResolver {
    pub fn new() -> Self { Self::default() }

    /// Set where the moves go: before the instruction at `index` of `block`.
    pub fn set_insert_position(&mut self, block: LirBlock, index: usize) {
        self.insert_position = Some((block, index));
    }

    pub fn insert_position(&self) -> Option<(LirBlock, usize)> { self.insert_position }

    pub fn add_mapping(&mut self, from: IntervalId, to: IntervalId) {
        self.mapping_from.push(MoveSource::Interval(from));
        self.mapping_to.push(to);
    }

    pub fn add_const_mapping(&mut self, value: i64, to: IntervalId) {
        self.mapping_from.push(MoveSource::Const(value));
        self.mapping_to.push(to);
    }

    pub fn has_mappings(&self) -> bool { !self.mapping_to.is_empty() }

    /// The pending moves, in the order they were added.
    pub fn mappings(&self) -> impl Iterator<Item = (MoveSource, IntervalId)> + '_ {
        self.mapping_from
            .iter()
            .copied()
            .zip(self.mapping_to.iter().copied())
    }

    pub fn clear(&mut self) {
        self.mapping_from.clear();
        self.mapping_to.clear();
    }

    fn source_location(
        &self,
        store: &IntervalStore,
        index: usize,
    ) -> RegAllocResult<Option<Location>> {
        match self.mapping_from[index] {
            MoveSource::Interval(from) => store.try_location(from).map(Some),
            MoveSource::Const(_) => Ok(None),
        }
    }

    fn check_multiple_writes(
        &self,
        ctx: &LirContext,
        store: &IntervalStore,
        block: LirBlock,
    ) -> RegAllocResult<()> {
        let mut written: SmallVec<[Location; 8]> = SmallVec::new();
        for to in self.mapping_to.iter().copied() {
            let location = store.try_location(to)?;
            if written.contains(&location) {
                return Err(RegAllocError::MultipleWrites {
                    block: block.label(ctx).to_string(),
                    location,
                });
            }
            written.push(location);
        }
        Ok(())
    }

    /// Emit all the pending moves at the insert position.
    pub fn resolve_and_append_moves(
        &mut self,
        ctx: &mut LirContext,
        store: &mut IntervalStore,
        stats: &mut AllocStats,
    ) -> RegAllocResult<()> {
        if !self.has_mappings() {
            return Ok(());
        }
        let Some((block, index)) = self.insert_position else {
            return Err(RegAllocError::IntervalInvariant {
                operand: self.mapping_to[0].deref(store).operand(),
                reason: "moves without an insert position",
            });
        };

        self.check_multiple_writes(ctx, store, block)?;

        // how many pending moves read each location
        let mut blocked: FxHashMap<Location, u32> = FxHashMap::default();
        for i in 0..self.mapping_from.len() {
            if let Some(location) = self.source_location(store, i)? {
                *blocked.entry(location).or_default() += 1;
            }
        }

        let mut buffer = InsertionBuffer::new(block);

        while self.has_mappings() {
            let mut processed = false;
            let mut spill_candidate = None;

            for i in (0..self.mapping_to.len()).rev() {
                let to = self.mapping_to[i];
                let to_location = store.try_location(to)?;
                let from_location = self.source_location(store, i)?;

                let readers = blocked.get(&to_location).copied().unwrap_or(0);
                let safe = readers == 0 || (readers == 1 && from_location == Some(to_location));

                if safe {
                    let from = self.mapping_from.remove(i);
                    self.mapping_to.remove(i);
                    if let Some(location) = from_location {
                        unblock(&mut blocked, location, store, to)?;
                    }
                    if from_location != Some(to_location) {
                        append_move(ctx, store, stats, &mut buffer, index, from, to);
                    }
                    processed = true;
                } else if spill_candidate.is_none()
                    && from_location.map_or(false, |location| location.is_reg())
                {
                    spill_candidate = Some(i);
                }
            }

            if !processed {
                // only cycles left
                let candidate = spill_candidate
                    .or_else(|| {
                        self.mapping_from
                            .iter()
                            .position(|from| matches!(from, MoveSource::Interval(_)))
                    })
                    .ok_or(RegAllocError::IntervalInvariant {
                        operand: self.mapping_to[0].deref(store).operand(),
                        reason: "blocked moves without an interval source",
                    })?;
                self.break_cycle(ctx, store, stats, &mut buffer, index, &mut blocked, candidate)?;
            }
        }

        buffer.finish(ctx);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn break_cycle(
        &mut self,
        ctx: &mut LirContext,
        store: &mut IntervalStore,
        stats: &mut AllocStats,
        buffer: &mut InsertionBuffer,
        index: usize,
        blocked: &mut FxHashMap<Location, u32>,
        candidate: usize,
    ) -> RegAllocResult<()> {
        let MoveSource::Interval(from) = self.mapping_from[candidate] else {
            unreachable!("constants never block a move")
        };
        let from_location = store.try_location(from)?;

        let temp = store.create_derived(from);
        let slot = if from_location.is_reg() {
            // the value's own spill slot is free to hold it
            store.assign_spill_slot(from)
        } else {
            store.new_spill_slot()
        };
        let temp_location = Location::Stack(slot);
        store.set_location(temp, temp_location);

        append_move(ctx, store, stats, buffer, index, MoveSource::Interval(from), temp);

        unblock(blocked, from_location, store, temp)?;
        *blocked.entry(temp_location).or_default() += 1;
        self.mapping_from[candidate] = MoveSource::Interval(temp);
        stats.moves_requiring_temporary += 1;

        trace!(
            "break cycle at {}: {} saved to {}",
            buffer.block().label(ctx),
            from_location,
            temp_location
        );
        Ok(())
    }
}

/// One move reading `location` less is pending.
fn unblock(
    blocked: &mut FxHashMap<Location, u32>,
    location: Location,
    store: &IntervalStore,
    to: IntervalId,
) -> RegAllocResult<()> {
    match blocked.get_mut(&location) {
        Some(count) if *count > 0 => {
            *count -= 1;
            Ok(())
        }
        _ => Err(RegAllocError::IntervalInvariant {
            operand: to.deref(store).operand(),
            reason: "move source is not counted as blocked",
        }),
    }
}

fn append_move(
    ctx: &mut LirContext,
    store: &IntervalStore,
    stats: &mut AllocStats,
    buffer: &mut InsertionBuffer,
    index: usize,
    from: MoveSource,
    to: IntervalId,
) {
    let dst = to.deref(store).operand();
    let src = match from {
        MoveSource::Interval(from) => from.deref(store).operand(),
        MoveSource::Const(value) => Operand::Const(value),
    };
    let inst = LirInst::mov(ctx, dst, src);
    buffer.append(index, inst);
    stats.resolution_moves += 1;

    trace!("insert move {} <- {} at {}", dst, src, index);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lir::{PReg, RegKind, StackSlot};

    fn reg(num: u8) -> Location { Location::Reg(PReg::new(num, RegKind::General)) }

    fn interval(ctx: &mut LirContext, store: &mut IntervalStore, location: Location) -> IntervalId {
        let vreg = ctx.new_vreg(RegKind::General);
        let id = store.get_or_create(Operand::Var(vreg));
        store.set_location(id, location);
        id
    }

    fn setup() -> (LirContext, LirBlock) {
        let mut ctx = LirContext::new();
        let block = LirBlock::new(&mut ctx, "bb0", 1.0);
        let label = LirInst::label(&mut ctx, Vec::new());
        let ret = LirInst::ret(&mut ctx, Vec::new());
        block.push_inst(&mut ctx, label);
        block.push_inst(&mut ctx, ret);
        (ctx, block)
    }

    fn moves(ctx: &LirContext, block: LirBlock) -> Vec<(Operand, Operand)> {
        block
            .insts(ctx)
            .iter()
            .filter_map(|inst| inst.as_move(ctx))
            .collect()
    }

    #[test]
    fn test_move_chain() {
        let (mut ctx, block) = setup();
        let mut store = IntervalStore::new(ctx.vreg_count());
        let mut stats = AllocStats::default();

        // r1 <- r0, r2 <- r1
        let a = interval(&mut ctx, &mut store, reg(0));
        let b = interval(&mut ctx, &mut store, reg(1));
        let b2 = interval(&mut ctx, &mut store, reg(1));
        let c = interval(&mut ctx, &mut store, reg(2));

        let mut resolver = MoveResolver::new();
        resolver.set_insert_position(block, 1);
        resolver.add_mapping(a, b2);
        resolver.add_mapping(b, c);
        resolver
            .resolve_and_append_moves(&mut ctx, &mut store, &mut stats)
            .unwrap();

        let operand = |id: IntervalId| id.deref(&store).operand();
        assert_eq!(
            moves(&ctx, block),
            vec![(operand(c), operand(b)), (operand(b2), operand(a))]
        );
        assert_eq!(stats.resolution_moves, 2);
        assert_eq!(stats.moves_requiring_temporary, 0);
        assert!(!resolver.has_mappings());
        assert_eq!(block.insts(&ctx).len(), 4);
    }

    #[test]
    fn test_move_swap() {
        let (mut ctx, block) = setup();
        let mut store = IntervalStore::new(ctx.vreg_count());
        let mut stats = AllocStats::default();

        // r1 <- r0, r0 <- r1
        let a = interval(&mut ctx, &mut store, reg(0));
        let b = interval(&mut ctx, &mut store, reg(1));
        let x = interval(&mut ctx, &mut store, reg(1));
        let y = interval(&mut ctx, &mut store, reg(0));

        let mut resolver = MoveResolver::new();
        resolver.set_insert_position(block, 1);
        resolver.add_mapping(a, x);
        resolver.add_mapping(b, y);
        resolver
            .resolve_and_append_moves(&mut ctx, &mut store, &mut stats)
            .unwrap();

        assert_eq!(stats.moves_requiring_temporary, 1);
        assert_eq!(stats.resolution_moves, 3);

        // simulate the moves on the locations
        let mut values: FxHashMap<Location, &str> = FxHashMap::default();
        values.insert(reg(0), "a");
        values.insert(reg(1), "b");
        for (dst, src) in moves(&ctx, block) {
            let src = store.try_location(store.interval_for(src).unwrap()).unwrap();
            let dst = store.try_location(store.interval_for(dst).unwrap()).unwrap();
            let value = values[&src];
            values.insert(dst, value);
        }
        assert_eq!(values[&reg(1)], "a");
        assert_eq!(values[&reg(0)], "b");

        // the temporary is a new interval, the mapped ones keep their locations
        assert_eq!(store.len(), 5);
        assert_eq!(store.location(a), Some(reg(0)));
        assert_eq!(store.location(b), Some(reg(1)));
        assert_eq!(store.location(x), Some(reg(1)));
        assert_eq!(store.location(y), Some(reg(0)));
    }

    #[test]
    fn test_unblock_uncounted_location() {
        let (mut ctx, _) = setup();
        let mut store = IntervalStore::new(ctx.vreg_count());
        let a = interval(&mut ctx, &mut store, reg(0));

        let mut blocked: FxHashMap<Location, u32> = FxHashMap::default();
        blocked.insert(reg(0), 1);
        unblock(&mut blocked, reg(0), &store, a).unwrap();
        assert_eq!(blocked[&reg(0)], 0);

        assert!(matches!(
            unblock(&mut blocked, reg(0), &store, a),
            Err(RegAllocError::IntervalInvariant { .. })
        ));
        assert!(matches!(
            unblock(&mut blocked, reg(1), &store, a),
            Err(RegAllocError::IntervalInvariant { .. })
        ));
    }

    #[test]
    fn test_const_and_self_moves() {
        let (mut ctx, block) = setup();
        let mut store = IntervalStore::new(ctx.vreg_count());
        let mut stats = AllocStats::default();

        let a = interval(&mut ctx, &mut store, reg(0));
        let same = interval(&mut ctx, &mut store, reg(0));
        let slot = interval(&mut ctx, &mut store, Location::Stack(StackSlot::Local(0)));

        let mut resolver = MoveResolver::new();
        resolver.set_insert_position(block, 1);
        resolver.add_mapping(a, same);
        resolver.add_const_mapping(5, slot);
        resolver
            .resolve_and_append_moves(&mut ctx, &mut store, &mut stats)
            .unwrap();

        assert_eq!(
            moves(&ctx, block),
            vec![(slot.deref(&store).operand(), Operand::Const(5))]
        );
        assert_eq!(stats.resolution_moves, 1);
    }

    #[test]
    fn test_multiple_writes() {
        let (mut ctx, block) = setup();
        let mut store = IntervalStore::new(ctx.vreg_count());
        let mut stats = AllocStats::default();

        let a = interval(&mut ctx, &mut store, reg(0));
        let b = interval(&mut ctx, &mut store, reg(1));
        let x = interval(&mut ctx, &mut store, reg(2));
        let y = interval(&mut ctx, &mut store, reg(2));

        let mut resolver = MoveResolver::new();
        resolver.set_insert_position(block, 1);
        resolver.add_mapping(a, x);
        resolver.add_mapping(b, y);

        let result = resolver.resolve_and_append_moves(&mut ctx, &mut store, &mut stats);
        assert!(matches!(
            result,
            Err(RegAllocError::MultipleWrites { location, .. }) if location == reg(2)
        ));
        // nothing is emitted on failure
        assert_eq!(block.insts(&ctx).len(), 2);
    }
}
