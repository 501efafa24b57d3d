//! # Lifetime Analysis
//!
//! Numbers the instructions and builds the intervals, walking the blocks and
//! their instructions back to front. Definitions shorten the range opened by
//! later uses; values live at the end of a block cover the whole block.
//!
//! Register hints are attached on the way. A move hints its destination to
//! its source. In SSA mode a phi value and the source coming from its most
//! frequent predecessor hint each other.

use log::trace;
use rustc_hash::FxHashMap;

use super::{
    interval::{IntervalId, RegisterPriority, SpillState},
    LinearScan,
    RegAllocError,
    RegAllocResult,
};
use crate::{
    collections::storage::ArenaPtr,
    lir::{LirBlock, LirInst, Location, Operand, OperandMode},
};

/// The mapping between op ids and instructions.
///
/// Op ids are even, `2 * k` for the k-th instruction in layout order.
/// Instructions inserted later have no id.
#[derive(Debug, Default)]
pub struct InstructionNumbering {
    insts: Vec<LirInst>,
    blocks: Vec<LirBlock>,
    block_ids: FxHashMap<LirBlock, (u32, u32)>,
}

impl InstructionNumbering {
    pub fn len(&self) -> usize { self.insts.len() }

    pub fn is_empty(&self) -> bool { self.insts.is_empty() }

    pub fn inst_for_id(&self, op_id: u32) -> Option<LirInst> {
        if op_id & 1 != 0 {
            return None;
        }
        self.insts.get((op_id / 2) as usize).copied()
    }

    /// The block of an op id. Odd positions belong to the block of the
    /// instruction before them.
    pub fn block_for_id(&self, op_id: u32) -> Option<LirBlock> {
        self.blocks.get((op_id / 2) as usize).copied()
    }

    pub fn first_id(&self, block: LirBlock) -> Option<u32> {
        self.block_ids.get(&block).map(|(first, _)| *first)
    }

    pub fn last_id(&self, block: LirBlock) -> Option<u32> {
        self.block_ids.get(&block).map(|(_, last)| *last)
    }

    pub fn is_block_begin(&self, op_id: u32) -> bool {
        self.block_for_id(op_id)
            .and_then(|block| self.first_id(block))
            .map_or(false, |first| first == op_id)
    }

    /// One past the largest op id.
    pub fn max_op_id(&self) -> u32 { (self.insts.len() * 2) as u32 }
}

impl LinearScan<'_> {
    /// Give every instruction its op id and check the shape of the blocks.
    pub fn number_instructions(&mut self) -> RegAllocResult<()> {
        self.func.finalize_cfg(self.ctx);

        let mut numbering = InstructionNumbering::default();
        let mut op_id = 0;

        for block in self.func.blocks(self.ctx).to_vec() {
            self.check_block_shape(block)?;

            let first = op_id;
            for inst in block.insts(self.ctx).to_vec() {
                inst.set_id(self.ctx, Some(op_id));
                numbering.insts.push(inst);
                numbering.blocks.push(block);
                op_id += 2;
            }
            numbering.block_ids.insert(block, (first, op_id - 2));
        }

        trace!("numbered {} instructions", numbering.len());
        self.numbering = numbering;
        Ok(())
    }

    fn check_block_shape(&self, block: LirBlock) -> RegAllocResult<()> {
        let ctx = &*self.ctx;
        let insts = block.insts(ctx);

        let (Some(first), Some(last)) = (insts.first(), insts.last()) else {
            return Err(self.malformed(block, "empty block"));
        };
        if !first.is_label(ctx) {
            return Err(self.malformed(block, "block does not start with a label"));
        }
        if insts.len() < 2 || !last.is_terminator(ctx) {
            return Err(self.malformed(block, "block does not end with a terminator"));
        }
        if insts[1..insts.len() - 1]
            .iter()
            .any(|inst| inst.is_label(ctx) || inst.is_terminator(ctx))
        {
            return Err(self.malformed(block, "label or terminator inside a block"));
        }
        if first.is_phi_in(ctx) {
            if !self.config.ssa {
                return Err(self.malformed(block, "phi values outside of SSA mode"));
            }
            if block.preds(ctx).len() < 2 {
                return Err(self.malformed(block, "phi values at a block without a merge"));
            }
        }
        Ok(())
    }

    /// The index of the first instruction spill move elimination looks at.
    ///
    /// Labels define phi values in SSA mode, so they are included.
    pub fn first_instruction_of_interest(&self) -> usize {
        if self.config.ssa {
            0
        } else {
            1
        }
    }

    /// Variables and allocatable registers get intervals.
    pub fn is_processed(&self, operand: Operand) -> bool {
        match operand {
            Operand::Var(_) => true,
            Operand::Fixed(reg) => self.config.is_allocatable(reg),
            Operand::Stack(_) | Operand::Const(_) => false,
        }
    }

    pub fn build_intervals(&mut self) -> RegAllocResult<()> {
        let blocks = self.func.blocks(self.ctx).to_vec();

        for block in blocks.iter().rev().copied() {
            let block_from = self.first_lir_instruction_id(block)?;
            let block_to = self.last_lir_instruction_id(block)?;

            let succs = block.succs(self.ctx);
            let is_loop_end = succs.len() == 1
                && succs[0].linear_scan_number(self.ctx) <= block.linear_scan_number(self.ctx);

            // values live at the end cover the whole block, definitions
            // shorten the range later
            for vreg in self.liveness.sorted_out(block) {
                let operand = Operand::Var(vreg);
                self.add_use(operand, block_from, block_to + 2, RegisterPriority::None);
                if is_loop_end {
                    let id = self.intervals.get_or_create(operand);
                    self.intervals
                        .add_use_pos(id, block_to + 1, RegisterPriority::LiveAtLoopEnd);
                }
            }

            for inst in block.insts(self.ctx).to_vec().into_iter().rev() {
                let op_id = inst
                    .id(self.ctx)
                    .ok_or_else(|| self.malformed(block, "instruction without an op id"))?;

                if inst.destroys_caller_saved(self.ctx) {
                    for reg in self.config.caller_saved_regs.clone() {
                        self.add_temp(Operand::Fixed(reg), op_id, RegisterPriority::None);
                    }
                    trace!("op {} destroys all caller-saved registers", op_id);
                }

                let output_priority = self.register_priority_of_output_operand(inst);
                for operand in inst.outputs(self.ctx) {
                    if self.is_processed(operand) {
                        self.add_def(operand, inst, output_priority)?;
                        self.record_register_hint(inst, operand, OperandMode::Def, true);
                    }
                }

                for operand in inst.temps(self.ctx) {
                    if self.is_processed(operand) {
                        self.add_temp(operand, op_id, RegisterPriority::MustHaveRegister);
                        self.record_register_hint(inst, operand, OperandMode::Temp, false);
                    }
                }

                // outgoing phi values stay alive until the jump is done
                let (input_to, input_priority) = if inst.is_jump(self.ctx) {
                    (op_id + 1, RegisterPriority::ShouldHaveRegister)
                } else {
                    (op_id, self.register_priority_of_input_operand(inst))
                };
                for operand in inst.inputs(self.ctx) {
                    if self.is_processed(operand) {
                        self.add_use(operand, block_from, input_to, input_priority);
                        self.record_register_hint(inst, operand, OperandMode::Use, false);
                    }
                }

                self.handle_incoming_argument(inst);
            }
        }

        self.finish_phi_spill_states();
        Ok(())
    }

    /// Phi values defined at a label get their spill state only now, once
    /// every definition is known.
    fn finish_phi_spill_states(&mut self) {
        let phis: Vec<IntervalId> = self
            .intervals
            .parents()
            .filter(|id| {
                self.intervals.spill_state(*id) == SpillState::NoDefinitionFound
                    && self.intervals.spill_definition_pos(*id).is_some()
            })
            .collect();

        for id in phis {
            self.intervals.set_spill_state(id, SpillState::NoSpillStore);
            trace!("phi {} can be stored at its label", id.deref(&self.intervals).operand());
        }
    }

    pub fn add_use(&mut self, operand: Operand, from: u32, to: u32, priority: RegisterPriority) {
        if !self.is_processed(operand) {
            return;
        }
        let id = self.intervals.get_or_create(operand);
        self.intervals.add_range(id, from, to);
        // use positions are at even ids
        self.intervals.add_use_pos(id, to & !1, priority);

        trace!("add use: {} from {} to {} ({:?})", operand, from, to, priority);
    }

    pub fn add_temp(&mut self, operand: Operand, temp_pos: u32, priority: RegisterPriority) {
        if !self.is_processed(operand) {
            return;
        }
        let id = self.intervals.get_or_create(operand);
        self.intervals.add_range(id, temp_pos, temp_pos + 1);
        self.intervals.add_use_pos(id, temp_pos, priority);

        trace!("add temp: {} at {} ({:?})", operand, temp_pos, priority);
    }

    pub fn add_def(
        &mut self,
        operand: Operand,
        inst: LirInst,
        priority: RegisterPriority,
    ) -> RegAllocResult<()> {
        if !self.is_processed(operand) {
            return Ok(());
        }
        let def_pos = inst.id(self.ctx).ok_or(RegAllocError::IntervalInvariant {
            operand,
            reason: "definition without an op id",
        })?;

        let id = self.intervals.get_or_create(operand);
        let first_from = id.deref(&self.intervals).ranges().first().map(|r| r.from);

        match first_from {
            Some(from) if from <= def_pos => {
                // the range opened by a use starts at the block begin until
                // the definition is met
                self.intervals.set_from(id, def_pos);
            }
            _ => {
                // dead value, make a vacuous interval
                self.intervals.add_range(id, def_pos, def_pos + 1);
                trace!("def of {} at {} occurs without use", operand, def_pos);
            }
        }
        self.intervals.add_use_pos(id, def_pos, priority);

        if operand.is_var() {
            self.change_spill_definition_pos(inst, id, def_pos)?;
        }

        trace!("add def: {} at {} ({:?})", operand, def_pos, priority);
        Ok(())
    }

    /// Track the definitions of a variable for spill store placement.
    ///
    /// Labels record their position but leave the state alone, the state of
    /// phi values is set once all the intervals are built.
    pub fn change_spill_definition_pos(
        &mut self,
        inst: LirInst,
        id: IntervalId,
        def_pos: u32,
    ) -> RegAllocResult<()> {
        match self.intervals.spill_state(id) {
            SpillState::NoDefinitionFound => {
                self.intervals.set_spill_definition_pos(id, def_pos);
                if !inst.is_label(self.ctx) {
                    self.intervals.set_spill_state(id, SpillState::NoSpillStore);
                }
            }
            SpillState::NoSpillStore => {
                let spill_pos = self.intervals.spill_definition_pos(id).unwrap_or(def_pos);
                // two definitions right after each other are one definition
                if def_pos + 2 < spill_pos {
                    self.intervals.set_spill_state(id, SpillState::NoOptimization);
                }
            }
            SpillState::StartInMemory => {
                self.intervals.set_spill_state(id, SpillState::NoOptimization);
            }
            SpillState::NoOptimization => {}
            SpillState::OneSpillStore | SpillState::StoreAtDefinition => {
                return Err(RegAllocError::IntervalInvariant {
                    operand: id.deref(&self.intervals).operand(),
                    reason: "spill state set before the intervals are built",
                });
            }
        }
        Ok(())
    }

    /// Determines the register priority for an instruction's output operand.
    pub fn register_priority_of_output_operand(&self, inst: LirInst) -> RegisterPriority {
        if let Some((_, Operand::Stack(slot))) = inst.as_move(self.ctx) {
            if slot.is_incoming() {
                return RegisterPriority::None;
            }
        }
        // phi values are fixed up by resolution moves anyway
        if self.config.ssa && inst.is_phi_in(self.ctx) {
            return RegisterPriority::None;
        }
        RegisterPriority::MustHaveRegister
    }

    /// Determines the register priority for an instruction's input operand.
    pub fn register_priority_of_input_operand(&self, inst: LirInst) -> RegisterPriority {
        if inst.as_move(self.ctx).is_some() {
            // a move can read from memory
            RegisterPriority::ShouldHaveRegister
        } else {
            RegisterPriority::MustHaveRegister
        }
    }

    /// A move from an argument in the caller's frame lets the destination
    /// live in that slot from the start.
    fn handle_incoming_argument(&mut self, inst: LirInst) {
        let Some((dst @ Operand::Var(_), Operand::Stack(slot))) = inst.as_move(self.ctx) else {
            return;
        };
        if !slot.is_incoming() {
            return;
        }
        let Some(id) = self.intervals.interval_for(dst) else {
            return;
        };
        self.intervals.set_spill_slot(id, slot);
        self.intervals.set_location(id, Location::Stack(slot));
        self.intervals.set_spill_state(id, SpillState::StartInMemory);

        trace!("argument {} starts in {}", dst, slot);
    }

    /// Record register hints for `operand` of `inst`.
    ///
    /// The generic hints come first. At the definition of a phi value in SSA
    /// mode, the phi and its source from the most frequent predecessor are
    /// hinted to each other.
    pub fn record_register_hint(
        &mut self,
        inst: LirInst,
        operand: Operand,
        mode: OperandMode,
        hint_at_def: bool,
    ) {
        self.record_generic_hint(inst, operand, hint_at_def);

        if self.config.ssa && hint_at_def && mode == OperandMode::Def && inst.is_phi_in(self.ctx) {
            self.record_phi_hint(inst, operand);
        }
    }

    fn record_generic_hint(&mut self, inst: LirInst, operand: Operand, hint_at_def: bool) {
        let Some((dst, src)) = inst.as_move(self.ctx) else {
            return;
        };
        if !self.is_processed(dst) || !self.is_processed(src) {
            return;
        }
        let target = if hint_at_def { dst } else { src };
        if target != operand {
            return;
        }

        let from = self.intervals.get_or_create(src);
        let to = self.intervals.get_or_create(dst);
        self.intervals.set_location_hint(to, from);

        trace!("op {:?}: hint from {} to {}", inst.id(self.ctx), src, dst);
    }

    fn record_phi_hint(&mut self, label: LirInst, operand: Operand) {
        let Some(block) = label
            .id(self.ctx)
            .and_then(|op_id| self.numbering.block_for_id(op_id))
        else {
            return;
        };
        let Some(index) = label
            .phi_in(self.ctx)
            .iter()
            .position(|phi| *phi == operand)
        else {
            return;
        };

        let mut selected: Option<(LirBlock, Operand)> = None;
        for pred in block.preds(self.ctx).iter().copied() {
            let Some(value) = pred
                .last_inst(self.ctx)
                .and_then(|jump| jump.phi_out(self.ctx))
                .and_then(|values| values.get(index).copied())
            else {
                continue;
            };
            if !value.is_var_or_fixed() || !self.is_processed(value) {
                continue;
            }
            // a value live at the merge does not die into the phi
            if let Operand::Var(vreg) = value {
                if self.liveness.is_live_in(block, vreg) {
                    continue;
                }
            }

            let better = match selected {
                None => true,
                Some((best, _)) => {
                    let (freq, best_freq) = (pred.frequency(self.ctx), best.frequency(self.ctx));
                    freq > best_freq || (freq == best_freq && pred.id() < best.id())
                }
            };
            if better {
                selected = Some((pred, value));
            }
        }

        let Some((pred, source)) = selected else {
            return;
        };

        let to = self.intervals.get_or_create(operand);
        let from = self.intervals.get_or_create(source);
        set_hint(&mut self.intervals, to, from);
        set_hint(&mut self.intervals, from, to);
        self.stats.phi_hints_set += 1;

        trace!(
            "phi hint between {} and {} from {}",
            operand,
            source,
            pred.label(self.ctx)
        );
    }
}

/// Hint `target` to `source` unless it already has a hint starting no later
/// than `target` itself.
pub fn set_hint(store: &mut super::IntervalStore, target: IntervalId, source: IntervalId) {
    let replace = match store.location_hint(target, false) {
        None => true,
        Some(current) => current.deref(store).from() > target.deref(store).from(),
    };
    if replace {
        store.set_location_hint(target, source);
    }
}
