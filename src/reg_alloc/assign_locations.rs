//! # Location Assignment
//!
//! The last phase: every variable operand is replaced by the location of its
//! split child at the instruction. Moves that end up copying a location to
//! itself are dropped.

use log::debug;

use super::{IntervalStore, LinearScan, RegAllocError, RegAllocResult};
use crate::lir::{Location, Operand, OperandMode};

/// The location of `operand` at `op_id`.
///
/// Instructions inserted by the allocator have no id, their operands already
/// name the exact split child.
fn location_at(
    intervals: &IntervalStore,
    operand: Operand,
    op_id: Option<u32>,
    mode: OperandMode,
) -> RegAllocResult<Location> {
    let id = intervals.try_interval_for(operand)?;
    let child = match op_id {
        Some(op_id) => intervals.split_child_at_op_id(intervals.split_parent(id), op_id, mode)?,
        None => id,
    };
    intervals.try_location(child)
}

impl LinearScan<'_> {
    pub fn assign_locations(&mut self) -> RegAllocResult<()> {
        let blocks = self.func.blocks(self.ctx).to_vec();

        // all the outgoing phi values must be resolved by now
        for block in blocks.iter().copied() {
            let Some(jump) = block.last_inst(self.ctx) else {
                continue;
            };
            if let Some(values) = jump.phi_out(self.ctx).filter(|values| !values.is_empty()) {
                let target = jump.succs(self.ctx)[0];
                let phi_in = target
                    .first_inst(self.ctx)
                    .map_or(0, |label| label.phi_in(self.ctx).len());
                return Err(RegAllocError::PhiArityMismatch {
                    block: target.label(self.ctx).to_string(),
                    pred: block.label(self.ctx).to_string(),
                    phi_in,
                    phi_out: values.len(),
                });
            }
        }

        let mut removed = 0;
        for block in blocks {
            if let Some(label) = block.first_inst(self.ctx) {
                label.clear_phi_in(self.ctx);
            }

            let insts = block.insts(self.ctx).to_vec();
            let mut kept = Vec::with_capacity(insts.len());

            for inst in insts {
                let op_id = inst.id(self.ctx);
                let intervals = &self.intervals;
                let mut failure = None;

                inst.map_operands(self.ctx, |operand, mode| {
                    if failure.is_some() || !operand.is_var() {
                        return operand;
                    }
                    match location_at(intervals, operand, op_id, mode) {
                        Ok(location) => Operand::from(location),
                        Err(err) => {
                            failure = Some(err);
                            operand
                        }
                    }
                });
                if let Some(err) = failure {
                    return Err(err);
                }

                if let Some((dst, src)) = inst.as_move(self.ctx) {
                    if dst == src {
                        removed += 1;
                        continue;
                    }
                }
                kept.push(inst);
            }

            block.set_insts(self.ctx, kept);
        }

        debug!("locations assigned, {} self moves removed", removed);
        Ok(())
    }
}
