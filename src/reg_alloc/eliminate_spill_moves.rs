//! # Spill Move Elimination
//!
//! A value spilled more than once is stored to its spill slot right after its
//! definition, and the slot stays valid for the rest of its life. Moves into
//! the memory parts of such a value are then redundant and removed, except a
//! move that is the only definition of a phi value on its edge.

use log::{debug, trace};

use super::{interval::IntervalId, LinearScan, RegAllocError, RegAllocResult, SpillState};
use crate::{
    collections::storage::ArenaPtr,
    lir::{LirBlock, LirInst, Location, Operand},
};

impl LinearScan<'_> {
    /// The generic test: the destination of `inst` lives in memory, and its
    /// spill slot holds the value for the whole lifetime.
    pub fn can_eliminate_spill_move_generic(&self, inst: LirInst) -> bool {
        let Some((dst, _)) = inst.as_move(self.ctx) else {
            return false;
        };
        let Some(interval) = self.intervals.interval_for(dst) else {
            return false;
        };
        let in_memory = self
            .intervals
            .location(interval)
            .map_or(false, |location| location.is_stack());

        in_memory && self.intervals.always_in_memory(interval)
    }

    /// Check if a move in `block` into `interval` feeds a phi value defined
    /// at the label of the only successor.
    pub fn is_phi_resolution_move(&self, block: LirBlock, interval: IntervalId) -> bool {
        let data = interval.deref(&self.intervals);
        if !data.is_split_parent() {
            return false;
        }
        // phi values start at a label, always even
        let from = data.from();
        if from & 1 != 0 {
            return false;
        }

        let succs = block.succs(self.ctx);
        if succs.len() != 1 {
            return false;
        }

        let is_label = self
            .numbering
            .inst_for_id(from)
            .map_or(false, |inst| inst.is_label(self.ctx));

        is_label && self.numbering.block_for_id(from) == Some(succs[0])
    }

    /// The generic test refined by the phi check in SSA mode.
    pub fn can_eliminate_spill_move(&self, block: LirBlock, inst: LirInst) -> bool {
        if !self.can_eliminate_spill_move_generic(inst) {
            return false;
        }
        !(self.config.ssa && self.is_phi_resolution_move_of(block, inst))
    }

    fn is_phi_resolution_move_of(&self, block: LirBlock, inst: LirInst) -> bool {
        inst.as_move(self.ctx)
            .and_then(|(dst, _)| self.intervals.interval_for(dst))
            .map_or(false, |interval| self.is_phi_resolution_move(block, interval))
    }

    pub fn eliminate_spill_moves(&mut self) -> RegAllocResult<()> {
        let mut stored_at_def: Vec<(u32, IntervalId)> = Vec::new();
        for parent in self.intervals.parents() {
            if self.intervals.spill_state(parent) != SpillState::StoreAtDefinition {
                continue;
            }
            let def_pos = self.intervals.spill_definition_pos(parent).ok_or(
                RegAllocError::IntervalInvariant {
                    operand: parent.deref(&self.intervals).operand(),
                    reason: "stored at a definition that is not known",
                },
            )?;
            stored_at_def.push((def_pos, parent));
        }
        stored_at_def.sort();
        let mut pending = stored_at_def.into_iter().peekable();

        let first_of_interest = self.first_instruction_of_interest();

        for block in self.func.blocks(self.ctx).to_vec() {
            let insts = block.insts(self.ctx).to_vec();
            let mut kept = Vec::with_capacity(insts.len());

            for (index, inst) in insts.into_iter().enumerate() {
                if index < first_of_interest {
                    kept.push(inst);
                    continue;
                }

                let Some(op_id) = inst.id(self.ctx) else {
                    if self.can_eliminate_spill_move_generic(inst) {
                        if self.config.ssa && self.is_phi_resolution_move_of(block, inst) {
                            self.stats.phi_resolution_moves_preserved += 1;
                            trace!(
                                "keep phi resolution move {}",
                                inst.display(self.ctx)
                            );
                        } else {
                            self.stats.spill_moves_eliminated += 1;
                            trace!("eliminate spill move {}", inst.display(self.ctx));
                            continue;
                        }
                    }
                    kept.push(inst);
                    continue;
                };

                kept.push(inst);

                while let Some((def_pos, parent)) = pending.next_if(|(pos, _)| *pos <= op_id) {
                    if def_pos < op_id {
                        return Err(RegAllocError::IntervalInvariant {
                            operand: parent.deref(&self.intervals).operand(),
                            reason: "definition stored at is not an instruction of interest",
                        });
                    }
                    if let Some(store) = self.spill_store_at_definition(parent, op_id)? {
                        kept.push(store);
                    }
                }
            }

            block.set_insts(self.ctx, kept);
        }

        debug!(
            "spill moves: {} eliminated, {} phi resolution moves kept, {} stores inserted",
            self.stats.spill_moves_eliminated,
            self.stats.phi_resolution_moves_preserved,
            self.stats.spill_stores_inserted
        );
        Ok(())
    }

    /// The store of `parent` into its spill slot right after its definition.
    fn spill_store_at_definition(
        &mut self,
        parent: IntervalId,
        op_id: u32,
    ) -> RegAllocResult<Option<LirInst>> {
        let operand = parent.deref(&self.intervals).operand();
        let from_location = self.intervals.try_location(parent)?;
        let slot = self
            .intervals
            .spill_slot(parent)
            .ok_or(RegAllocError::IntervalInvariant {
                operand,
                reason: "stored at definition without a spill slot",
            })?;

        let to_location = Location::Stack(slot);
        if from_location == to_location {
            return Ok(None);
        }
        if !from_location.is_reg() {
            return Err(RegAllocError::InvalidSpillStore { operand, op_id });
        }

        let store = LirInst::mov(self.ctx, Operand::from(to_location), Operand::from(from_location));
        self.stats.spill_stores_inserted += 1;
        trace!("store {} to {} after op {}", operand, slot, op_id);

        Ok(Some(store))
    }
}
