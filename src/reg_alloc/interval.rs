//! # Interval Store
//!
//! An [Interval] is the live range of one variable or fixed register. When a
//! single location cannot serve the whole range, the allocator splits it into
//! children, each with its own location. Children are kept as a flat list on
//! the split parent, hints and parents are plain handles into the store.

use core::fmt;

use rustc_hash::FxHashMap;

use super::{RegAllocError, RegAllocResult};
use crate::{
    collections::storage::{Arena, ArenaPtr, BaseArena, BaseArenaPtr},
    impl_arena,
    lir::{Location, Operand, OperandMode, RegKind, StackSlot, VReg},
};

/// Left-closed right-open range
/// [from, to)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub from: u32,
    pub to: u32,
}

impl Range {
    pub fn new(from: u32, to: u32) -> Self { Self { from, to } }

    pub fn contains(&self, pos: u32) -> bool { self.from <= pos && pos < self.to }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.from, self.to)
    }
}

/// How urgently a use position needs a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RegisterPriority {
    /// No special reason for the value to be in a register.
    None,
    /// The value is live at the end of a loop.
    LiveAtLoopEnd,
    /// A register is preferred, but memory is fine.
    ShouldHaveRegister,
    /// The operand must be in a register.
    MustHaveRegister,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsePosition {
    pub pos: u32,
    pub priority: RegisterPriority,
}

/// How the value of a split parent reaches its spill slot.
///
/// `NoDefinitionFound → NoSpillStore → OneSpillStore → StoreAtDefinition`,
/// with `StartInMemory` for values living in memory from the start and
/// `NoOptimization` for values defined more than once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SpillState {
    /// No definition seen yet, also the state of phi values.
    NoDefinitionFound,
    /// One definition, never spilled.
    NoSpillStore,
    /// Spilled once, the store happens at the spill position.
    OneSpillStore,
    /// Spilled more than once, store once right after the definition.
    StoreAtDefinition,
    /// The value lives in its spill slot from the start.
    StartInMemory,
    /// More than one definition, the spill slot is never known to be valid.
    NoOptimization,
}

pub struct Interval {
    operand: Operand,
    kind: RegKind,

    /// Sorted, disjoint and non-adjacent.
    ranges: Vec<Range>,
    /// Sorted by position, at most one entry per position.
    use_positions: Vec<UsePosition>,

    location: Option<Location>,
    location_hint: Option<IntervalId>,

    /// `None` for split parents.
    split_parent: Option<IntervalId>,
    /// Only filled on split parents, in creation order.
    split_children: Vec<IntervalId>,

    // The spill fields are only meaningful on split parents.
    spill_slot: Option<StackSlot>,
    spill_state: SpillState,
    spill_definition_pos: Option<u32>,
}

impl Interval {
    fn new(operand: Operand, kind: RegKind) -> Self {
        let location = match operand {
            Operand::Fixed(preg) => Some(Location::Reg(preg)),
            _ => None,
        };
        Self {
            operand,
            kind,
            ranges: Vec::new(),
            use_positions: Vec::new(),
            location,
            location_hint: None,
            split_parent: None,
            split_children: Vec::new(),
            spill_slot: None,
            spill_state: SpillState::NoDefinitionFound,
            spill_definition_pos: None,
        }
    }

    pub fn operand(&self) -> Operand { self.operand }

    pub fn kind(&self) -> RegKind { self.kind }

    pub fn is_fixed(&self) -> bool { self.operand.is_fixed() }

    pub fn is_split_parent(&self) -> bool { self.split_parent.is_none() }

    pub fn is_empty(&self) -> bool { self.ranges.is_empty() }

    /// The start of the first range, `u32::MAX` for an empty interval.
    pub fn from(&self) -> u32 { self.ranges.first().map_or(u32::MAX, |range| range.from) }

    /// The end of the last range, `0` for an empty interval.
    pub fn to(&self) -> u32 { self.ranges.last().map_or(0, |range| range.to) }

    pub fn ranges(&self) -> &[Range] { &self.ranges }

    pub fn use_positions(&self) -> &[UsePosition] { &self.use_positions }

    pub fn location(&self) -> Option<Location> { self.location }

    pub fn set_location(&mut self, location: Location) { self.location = Some(location); }

    pub fn split_children(&self) -> &[IntervalId] { &self.split_children }

    /// Check if the interval is live at `pos`, holes excluded.
    pub fn covers(&self, pos: u32) -> bool { self.ranges.iter().any(|range| range.contains(pos)) }

    /// Check if the whole-interval bounds include `op_id` in the given mode.
    ///
    /// Outputs are not valid at the end of an interval, inputs and temps are.
    pub fn covers_op(&self, op_id: u32, mode: OperandMode) -> bool {
        let to_offset = match mode {
            OperandMode::Def => 0,
            OperandMode::Use | OperandMode::Temp => 1,
        };
        !self.is_empty() && self.from() <= op_id && op_id < self.to() + to_offset
    }

    /// The first use position at or after `from` with at least `priority`.
    pub fn next_usage(&self, priority: RegisterPriority, from: u32) -> Option<u32> {
        self.use_positions
            .iter()
            .find(|usage| usage.pos >= from && usage.priority >= priority)
            .map(|usage| usage.pos)
    }

    /// The first position where both intervals are live.
    pub fn first_intersection(&self, other: &Interval) -> Option<u32> {
        let mut i = 0;
        let mut j = 0;
        while i < self.ranges.len() && j < other.ranges.len() {
            let a = self.ranges[i];
            let b = other.ranges[j];
            if a.to <= b.from {
                i += 1;
            } else if b.to <= a.from {
                j += 1;
            } else {
                return Some(a.from.max(b.from));
            }
        }
        None
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.operand)?;
        if let Some(location) = self.location {
            write!(f, " -> {}", location)?;
        }
        write!(f, " ")?;
        for range in self.ranges.iter() {
            write!(f, "{}", range)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IntervalId(BaseArenaPtr<Interval>);

impl IntervalId {
    pub fn index(self) -> usize { self.0.id() }
}

/// All the intervals of one allocation.
pub struct IntervalStore {
    intervals: BaseArena<Interval>,
    by_operand: FxHashMap<Operand, IntervalId>,

    /// The next virtual register number for split children and temporaries.
    next_vreg: u32,
    next_spill_slot: u32,
}

impl_arena!(IntervalStore, Interval, IntervalId, intervals);

impl IntervalStore {
    /// Create an empty store minting variables from `first_vreg` on.
    pub fn new(first_vreg: u32) -> Self {
        Self {
            intervals: BaseArena::default(),
            by_operand: FxHashMap::default(),
            next_vreg: first_vreg,
            next_spill_slot: 0,
        }
    }

    /// The number of virtual registers in use, including minted ones.
    pub fn vreg_count(&self) -> u32 { self.next_vreg }

    pub fn len(&self) -> usize { self.intervals.len() }

    pub fn is_empty(&self) -> bool { self.intervals.is_empty() }

    /// All the intervals, children included, in creation order.
    pub fn ids(&self) -> impl Iterator<Item = IntervalId> + '_ {
        self.intervals.iter().map(|(ptr, _)| IntervalId(ptr))
    }

    /// All the split parents, in creation order.
    pub fn parents(&self) -> impl Iterator<Item = IntervalId> + '_ {
        self.intervals
            .iter()
            .filter(|(_, interval)| interval.is_split_parent())
            .map(|(ptr, _)| IntervalId(ptr))
    }

    pub fn interval_for(&self, operand: Operand) -> Option<IntervalId> {
        self.by_operand.get(&operand).copied()
    }

    pub fn try_interval_for(&self, operand: Operand) -> RegAllocResult<IntervalId> {
        self.interval_for(operand)
            .ok_or(RegAllocError::UnknownOperand(operand))
    }

    /// Get the interval of a variable or fixed register, creating an empty
    /// one on first sight.
    ///
    /// Minted variables are always numbered above every variable seen here.
    pub fn get_or_create(&mut self, operand: Operand) -> IntervalId {
        if let Some(id) = self.interval_for(operand) {
            return id;
        }
        if let Operand::Var(vreg) = operand {
            self.next_vreg = self.next_vreg.max(vreg.num() + 1);
        }
        let kind = match operand {
            Operand::Var(vreg) => vreg.kind(),
            Operand::Fixed(preg) => preg.kind(),
            // only variables and registers get intervals, keep the kind neutral
            Operand::Stack(_) | Operand::Const(_) => RegKind::General,
        };
        let id = self.alloc(Interval::new(operand, kind));
        self.by_operand.insert(operand, id);
        id
    }

    /// Create a standalone interval for a fresh variable of `source`'s kind.
    pub fn create_derived(&mut self, source: IntervalId) -> IntervalId {
        let kind = source.deref(self).kind;
        let operand = self.new_var(kind);
        let id = self.alloc(Interval::new(operand, kind));
        self.by_operand.insert(operand, id);
        id
    }

    /// A variable without an interval yet.
    fn new_var(&mut self, kind: RegKind) -> Operand {
        loop {
            let operand = Operand::Var(VReg::new(self.next_vreg, kind));
            self.next_vreg += 1;
            if !self.by_operand.contains_key(&operand) {
                return operand;
            }
        }
    }

    pub fn new_spill_slot(&mut self) -> StackSlot {
        let slot = StackSlot::Local(self.next_spill_slot);
        self.next_spill_slot += 1;
        slot
    }

    pub fn split_parent(&self, id: IntervalId) -> IntervalId { id.deref(self).split_parent.unwrap_or(id) }

    pub fn location(&self, id: IntervalId) -> Option<Location> { id.deref(self).location }

    pub fn try_location(&self, id: IntervalId) -> RegAllocResult<Location> {
        let interval = id.deref(self);
        interval
            .location
            .ok_or(RegAllocError::UnassignedLocation {
                operand: interval.operand,
            })
    }

    pub fn set_location(&mut self, id: IntervalId, location: Location) {
        id.deref_mut(self).location = Some(location);
    }

    /// Add `[from, to)` in front of the interval.
    ///
    /// Intervals are built back to front, so the range either joins the first
    /// range or becomes the new first one.
    pub fn add_range(&mut self, id: IntervalId, from: u32, to: u32) {
        debug_assert!(from < to, "invalid range [{}, {})", from, to);
        let ranges = &mut id.deref_mut(self).ranges;
        match ranges.first_mut() {
            Some(first) if first.from <= to => {
                first.from = first.from.min(from);
                first.to = first.to.max(to);
            }
            _ => ranges.insert(0, Range::new(from, to)),
        }
    }

    /// Move the start of the first range to a definition.
    pub fn set_from(&mut self, id: IntervalId, from: u32) {
        if let Some(first) = id.deref_mut(self).ranges.first_mut() {
            first.from = from;
        }
    }

    /// Record a use position, keeping the higher priority of two uses at the
    /// same position.
    pub fn add_use_pos(&mut self, id: IntervalId, pos: u32, priority: RegisterPriority) {
        let uses = &mut id.deref_mut(self).use_positions;
        match uses.binary_search_by_key(&pos, |usage| usage.pos) {
            Ok(index) => {
                if uses[index].priority < priority {
                    uses[index].priority = priority;
                }
            }
            Err(index) => uses.insert(index, UsePosition { pos, priority }),
        }
    }

    pub fn set_location_hint(&mut self, id: IntervalId, hint: IntervalId) {
        id.deref_mut(self).location_hint = Some(hint);
    }

    /// Get the preferred interval.
    ///
    /// With `search_split_child`, only an interval holding a register is
    /// returned: the hint itself, or the first of its split children with a
    /// register.
    pub fn location_hint(&self, id: IntervalId, search_split_child: bool) -> Option<IntervalId> {
        let hint = id.deref(self).location_hint?;
        if !search_split_child {
            return Some(hint);
        }

        let has_reg = |candidate: IntervalId| {
            candidate
                .deref(self)
                .location
                .map_or(false, |location| location.is_reg())
        };

        if has_reg(hint) {
            return Some(hint);
        }
        hint.deref(self)
            .split_children
            .iter()
            .copied()
            .find(|child| has_reg(*child))
    }

    /// Split the interval at `pos`.
    ///
    /// The interval keeps everything before `pos`, the returned child, a new
    /// variable registered under the same parent, gets the rest and is hinted
    /// to the parent.
    pub fn split(&mut self, id: IntervalId, pos: u32) -> RegAllocResult<IntervalId> {
        let (operand, kind) = {
            let interval = id.deref(self);
            if pos <= interval.from() || pos >= interval.to() {
                return Err(RegAllocError::IntervalInvariant {
                    operand: interval.operand,
                    reason: "split position outside of the interval",
                });
            }
            (interval.operand, interval.kind)
        };
        if operand.is_fixed() {
            return Err(RegAllocError::IntervalInvariant {
                operand,
                reason: "fixed intervals are never split",
            });
        }

        let parent = self.split_parent(id);
        let child_operand = self.new_var(kind);

        let interval = id.deref_mut(self);

        let mut child_ranges = Vec::new();
        let mut kept_ranges = Vec::new();
        for range in interval.ranges.drain(..) {
            if range.to <= pos {
                kept_ranges.push(range);
            } else if range.from >= pos {
                child_ranges.push(range);
            } else {
                kept_ranges.push(Range::new(range.from, pos));
                child_ranges.push(Range::new(pos, range.to));
            }
        }
        interval.ranges = kept_ranges;

        let split_at = interval.use_positions.partition_point(|usage| usage.pos < pos);
        let child_uses = interval.use_positions.split_off(split_at);

        let mut child = Interval::new(child_operand, kind);
        child.ranges = child_ranges;
        child.use_positions = child_uses;
        child.split_parent = Some(parent);
        child.location_hint = Some(parent);

        let child = self.alloc(child);
        self.by_operand.insert(child_operand, child);
        parent.deref_mut(self).split_children.push(child);

        Ok(child)
    }

    /// Find the split child of `parent` valid at `op_id`.
    ///
    /// An unsplit interval is its own child. Otherwise exactly one of the
    /// parent and its children must cover the position.
    pub fn split_child_at_op_id(
        &self,
        parent: IntervalId,
        op_id: u32,
        mode: OperandMode,
    ) -> RegAllocResult<IntervalId> {
        let data = parent.deref(self);
        if data.split_children.is_empty() {
            return Ok(parent);
        }

        let mut found = None;
        for candidate in std::iter::once(parent).chain(data.split_children.iter().copied()) {
            if candidate.deref(self).covers_op(op_id, mode) {
                if found.is_some() {
                    return Err(RegAllocError::AmbiguousSplitChild {
                        operand: data.operand,
                        op_id,
                    });
                }
                found = Some(candidate);
            }
        }

        found.ok_or(RegAllocError::NoSplitChild {
            operand: data.operand,
            op_id,
        })
    }

    pub fn spill_slot(&self, id: IntervalId) -> Option<StackSlot> {
        self.split_parent(id).deref(self).spill_slot
    }

    pub fn set_spill_slot(&mut self, id: IntervalId, slot: StackSlot) {
        let parent = self.split_parent(id);
        parent.deref_mut(self).spill_slot = Some(slot);
    }

    /// Get the spill slot shared by all the children, allocating it on first
    /// request.
    pub fn assign_spill_slot(&mut self, id: IntervalId) -> StackSlot {
        if let Some(slot) = self.spill_slot(id) {
            return slot;
        }
        let slot = self.new_spill_slot();
        self.set_spill_slot(id, slot);
        slot
    }

    pub fn spill_state(&self, id: IntervalId) -> SpillState {
        self.split_parent(id).deref(self).spill_state
    }

    pub fn set_spill_state(&mut self, id: IntervalId, state: SpillState) {
        let parent = self.split_parent(id);
        parent.deref_mut(self).spill_state = state;
    }

    pub fn spill_definition_pos(&self, id: IntervalId) -> Option<u32> {
        self.split_parent(id).deref(self).spill_definition_pos
    }

    pub fn set_spill_definition_pos(&mut self, id: IntervalId, pos: u32) {
        let parent = self.split_parent(id);
        parent.deref_mut(self).spill_definition_pos = Some(pos);
    }

    /// Check if the spill slot holds the value for the whole lifetime.
    pub fn always_in_memory(&self, id: IntervalId) -> bool {
        matches!(
            self.spill_state(id),
            SpillState::StoreAtDefinition | SpillState::StartInMemory
        )
    }

    pub fn display(&self) -> String {
        let mut s = String::new();
        for parent in self.parents() {
            s.push_str(&format!("{}\n", parent.deref(self)));
            for child in parent.deref(self).split_children.iter() {
                s.push_str(&format!("  {}\n", child.deref(self)));
            }
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::{IntervalStore, Range, RegisterPriority, SpillState};
    use crate::{
        collections::storage::ArenaPtr,
        lir::{Location, Operand, OperandMode, PReg, RegKind, StackSlot, VReg},
        reg_alloc::RegAllocError,
    };

    fn var(num: u32) -> Operand { Operand::Var(VReg::new(num, RegKind::General)) }

    #[test]
    fn test_ranges_built_backwards() {
        let mut store = IntervalStore::new(10);
        let id = store.get_or_create(var(0));

        store.add_range(id, 20, 26);
        store.add_range(id, 16, 20);
        store.add_range(id, 4, 10);

        let interval = id.deref(&store);
        assert_eq!(interval.ranges(), &[Range::new(4, 10), Range::new(16, 26)]);
        assert_eq!(interval.from(), 4);
        assert_eq!(interval.to(), 26);
        assert!(interval.covers(8));
        assert!(!interval.covers(12));
        assert!(interval.covers_op(26, OperandMode::Use));
        assert!(!interval.covers_op(26, OperandMode::Def));
    }

    #[test]
    fn test_use_positions() {
        let mut store = IntervalStore::new(1);
        let id = store.get_or_create(var(0));

        store.add_use_pos(id, 8, RegisterPriority::None);
        store.add_use_pos(id, 4, RegisterPriority::MustHaveRegister);
        store.add_use_pos(id, 8, RegisterPriority::ShouldHaveRegister);

        let interval = id.deref(&store);
        assert_eq!(interval.use_positions().len(), 2);
        assert_eq!(
            interval.next_usage(RegisterPriority::ShouldHaveRegister, 5),
            Some(8)
        );
        assert_eq!(
            interval.next_usage(RegisterPriority::MustHaveRegister, 5),
            None
        );
    }

    #[test]
    fn test_split_and_lookup() {
        let mut store = IntervalStore::new(5);
        let parent = store.get_or_create(var(0));
        store.add_range(parent, 20, 30);
        store.add_range(parent, 2, 12);
        store.add_use_pos(parent, 2, RegisterPriority::MustHaveRegister);
        store.add_use_pos(parent, 24, RegisterPriority::MustHaveRegister);

        let child = store.split(parent, 9).unwrap();

        assert_eq!(parent.deref(&store).ranges(), &[Range::new(2, 9)]);
        assert_eq!(
            child.deref(&store).ranges(),
            &[Range::new(9, 12), Range::new(20, 30)]
        );
        assert_eq!(child.deref(&store).use_positions().len(), 1);
        assert_eq!(store.split_parent(child), parent);
        assert_eq!(store.location_hint(child, false), Some(parent));
        assert_eq!(
            child.deref(&store).operand(),
            Operand::Var(VReg::new(5, RegKind::General))
        );
        assert_eq!(store.vreg_count(), 6);

        // outputs exclude the end of the parent, inputs include it
        assert_eq!(
            store.split_child_at_op_id(parent, 8, OperandMode::Def).unwrap(),
            parent
        );
        assert_eq!(
            store.split_child_at_op_id(parent, 9, OperandMode::Def).unwrap(),
            child
        );
        assert_eq!(
            store.split_child_at_op_id(parent, 10, OperandMode::Use).unwrap(),
            child
        );
        assert!(matches!(
            store.split_child_at_op_id(parent, 40, OperandMode::Def),
            Err(RegAllocError::NoSplitChild { op_id: 40, .. })
        ));
        // both the parent end and the child start match an input at 9
        assert!(matches!(
            store.split_child_at_op_id(parent, 9, OperandMode::Use),
            Err(RegAllocError::AmbiguousSplitChild { .. })
        ));
    }

    #[test]
    fn test_split_outside() {
        let mut store = IntervalStore::new(1);
        let id = store.get_or_create(var(0));
        store.add_range(id, 4, 8);

        assert!(store.split(id, 4).is_err());
        assert!(store.split(id, 8).is_err());
    }

    #[test]
    fn test_hint_search_split_child() {
        let mut store = IntervalStore::new(3);
        let a = store.get_or_create(var(0));
        let b = store.get_or_create(var(1));
        store.add_range(b, 0, 20);
        store.add_range(a, 22, 30);
        store.set_location_hint(a, b);

        let b_child = store.split(b, 11).unwrap();
        store.set_location(b, Location::Stack(StackSlot::Local(0)));
        assert_eq!(store.location_hint(a, true), None);

        let reg = PReg::new(3, RegKind::General);
        store.set_location(b_child, Location::Reg(reg));
        assert_eq!(store.location_hint(a, true), Some(b_child));
        assert_eq!(store.location_hint(a, false), Some(b));
    }

    #[test]
    fn test_spill_state_on_parent() {
        let mut store = IntervalStore::new(1);
        let parent = store.get_or_create(var(0));
        store.add_range(parent, 0, 10);
        let child = store.split(parent, 5).unwrap();

        assert_eq!(store.assign_spill_slot(child), StackSlot::Local(0));
        assert_eq!(store.spill_slot(parent), Some(StackSlot::Local(0)));

        assert!(!store.always_in_memory(child));
        store.set_spill_state(child, SpillState::StoreAtDefinition);
        assert_eq!(store.spill_state(parent), SpillState::StoreAtDefinition);
        assert!(store.always_in_memory(child));
    }

    #[test]
    fn test_minted_vars_are_fresh() {
        let mut store = IntervalStore::new(0);
        let a = store.get_or_create(var(0));
        let b = store.get_or_create(var(2));
        store.add_range(b, 0, 10);

        let temp = store.create_derived(a);
        assert_ne!(temp, a);
        assert_eq!(temp.deref(&store).operand(), var(3));
        assert_eq!(store.interval_for(var(0)), Some(a));

        let child = store.split(b, 4).unwrap();
        assert_eq!(child.deref(&store).operand(), var(4));
        assert_eq!(store.vreg_count(), 5);
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn test_fixed_interval() {
        let mut store = IntervalStore::new(1);
        let reg = PReg::new(0, RegKind::Float);
        let id = store.get_or_create(Operand::Fixed(reg));

        assert_eq!(store.location(id), Some(Location::Reg(reg)));
        assert_eq!(id.deref(&store).kind(), RegKind::Float);
        assert_eq!(store.get_or_create(Operand::Fixed(reg)), id);
    }
}
