//! # Data-Flow Resolution
//!
//! After the walk, a value may sit in different locations at the two ends of
//! a control flow edge. This phase collects the moves fixing that up for
//! every edge, including the moves materializing the phi values of a merge,
//! and hands them to the [MoveResolver].

use log::{debug, trace};
use rustc_hash::FxHashSet;

use super::{LinearScan, MoveResolver, RegAllocError, RegAllocResult};
use crate::lir::{LirBlock, Operand, OperandMode};

impl LinearScan<'_> {
    /// Collect the moves of the edge from `from` to `to` into `resolver`.
    ///
    /// `via` is an empty block between the two, resolved together with the
    /// edge. The phi values of `to` are resolved only at a merge, and only
    /// once: the outgoing values of the jump are consumed afterwards.
    pub fn resolve_collect_mappings(
        &mut self,
        from: LirBlock,
        to: LirBlock,
        via: Option<LirBlock>,
        resolver: &mut MoveResolver,
    ) -> RegAllocResult<()> {
        let from_last = self.last_lir_instruction_id(from)?;
        let to_first = self.first_lir_instruction_id(to)?;

        // values live at the start of `to`, phi values are defined there
        for vreg in self.liveness.sorted_in(to) {
            let parent = self.intervals.try_interval_for(Operand::Var(vreg))?;
            let from_child =
                self.intervals
                    .split_child_at_op_id(parent, from_last + 1, OperandMode::Def)?;
            let to_child = self
                .intervals
                .split_child_at_op_id(parent, to_first, OperandMode::Def)?;

            if from_child != to_child
                && self.intervals.try_location(from_child)? != self.intervals.try_location(to_child)?
            {
                resolver.add_mapping(from_child, to_child);
                trace!(
                    "edge {} -> {}: {} changes location",
                    from.label(self.ctx),
                    to.label(self.ctx),
                    vreg
                );
            }
        }

        if to.preds(self.ctx).len() > 1 {
            self.resolve_phi_mappings(from, to, via, resolver)?;
        }
        Ok(())
    }

    fn resolve_phi_mappings(
        &mut self,
        from: LirBlock,
        to: LirBlock,
        via: Option<LirBlock>,
        resolver: &mut MoveResolver,
    ) -> RegAllocResult<()> {
        let phi_block = via.unwrap_or(from);
        let to_first = self.first_lir_instruction_id(to)?;

        let Some(jump) = phi_block.last_inst(self.ctx) else {
            return Err(self.malformed(phi_block, "empty block"));
        };
        if jump.is_phi_out_consumed(self.ctx) {
            return Ok(());
        }

        let phi_out_id = match via {
            // one past the predecessor, the empty block defines nothing
            Some(_) => self.last_lir_instruction_id(from)? + 1,
            None => jump
                .id(self.ctx)
                .ok_or_else(|| self.malformed(phi_block, "jump without an op id"))?,
        };

        let phi_in = to
            .first_inst(self.ctx)
            .map(|label| label.phi_in(self.ctx).to_vec())
            .unwrap_or_default();
        let phi_out = jump
            .phi_out(self.ctx)
            .map(<[Operand]>::to_vec)
            .unwrap_or_default();

        if phi_in.len() != phi_out.len() {
            return Err(RegAllocError::PhiArityMismatch {
                block: to.label(self.ctx).to_string(),
                pred: phi_block.label(self.ctx).to_string(),
                phi_in: phi_in.len(),
                phi_out: phi_out.len(),
            });
        }

        for (phi, value) in phi_in.into_iter().zip(phi_out) {
            if !phi.is_var() {
                return Err(self.invalid_phi_value(to, phi));
            }
            let to_parent = self.intervals.try_interval_for(phi)?;
            let to_child = self
                .intervals
                .split_child_at_op_id(to_parent, to_first, OperandMode::Def)?;

            match value {
                Operand::Const(imm) => {
                    resolver.add_const_mapping(imm, to_child);
                    self.stats.phi_resolution_moves += 1;
                    trace!("phi {} <- #{} from {}", phi, imm, phi_block.label(self.ctx));
                }
                Operand::Var(_) => {
                    let from_parent = self.intervals.try_interval_for(value)?;
                    let from_child = self.intervals.split_child_at_op_id(
                        from_parent,
                        phi_out_id,
                        OperandMode::Def,
                    )?;

                    let from_location = self.intervals.try_location(from_child)?;
                    let to_location = self.intervals.try_location(to_child)?;
                    if from_child != to_child && from_location != to_location {
                        resolver.add_mapping(from_child, to_child);
                        self.stats.phi_resolution_moves += 1;
                        if from_location.is_stack() && to_location.is_stack() {
                            self.stats.stack_to_stack_moves += 1;
                        }
                        trace!(
                            "phi {} <- {} from {}: {} to {}",
                            phi,
                            value,
                            phi_block.label(self.ctx),
                            from_location,
                            to_location
                        );
                    }
                }
                Operand::Fixed(_) | Operand::Stack(_) => {
                    return Err(self.invalid_phi_value(to, value));
                }
            }
        }

        jump.consume_phi_out(self.ctx);
        Ok(())
    }

    fn invalid_phi_value(&self, block: LirBlock, operand: Operand) -> RegAllocError {
        RegAllocError::InvalidPhiValue {
            block: block.label(self.ctx).to_string(),
            operand,
        }
    }

    /// Choose where the moves of the edge go.
    ///
    /// The end of `from` if it has a single successor, otherwise the start of
    /// `to`, which then must have a single predecessor.
    fn resolve_find_insert_pos(
        &self,
        from: LirBlock,
        to: LirBlock,
        resolver: &mut MoveResolver,
    ) -> RegAllocResult<()> {
        if from.succs(self.ctx).len() <= 1 {
            let insts = from.insts(self.ctx);
            let at_jump = insts.last().map_or(false, |inst| inst.is_jump(self.ctx));
            let index = if at_jump {
                insts.len() - 1
            } else {
                insts.len()
            };
            resolver.set_insert_position(from, index);
        } else {
            if to.preds(self.ctx).len() != 1 {
                return Err(RegAllocError::UnsplitCriticalEdge {
                    from: from.label(self.ctx).to_string(),
                    to: to.label(self.ctx).to_string(),
                });
            }
            // after the label
            resolver.set_insert_position(to, 1);
        }
        Ok(())
    }

    fn append_resolved_moves(&mut self, resolver: &mut MoveResolver) -> RegAllocResult<()> {
        resolver.resolve_and_append_moves(self.ctx, &mut self.intervals, &mut self.stats)
    }

    /// Insert the moves of every control flow edge.
    pub fn resolve_data_flow(&mut self) -> RegAllocResult<()> {
        let blocks = self.func.blocks(self.ctx).to_vec();
        let mut resolver = MoveResolver::new();
        let mut completed: FxHashSet<LirBlock> = FxHashSet::default();

        // an empty block between two others is resolved as one edge
        for block in blocks.iter().copied() {
            if block.preds(self.ctx).len() != 1
                || block.succs(self.ctx).len() != 1
                || block.size(self.ctx) != 2
            {
                continue;
            }
            let pred = block.preds(self.ctx)[0];
            let succ = block.succs(self.ctx)[0];
            if completed.contains(&pred) || completed.contains(&succ) {
                continue;
            }
            completed.insert(block);

            self.resolve_collect_mappings(pred, succ, Some(block), &mut resolver)?;
            if resolver.has_mappings() {
                resolver.set_insert_position(block, 1);
                self.append_resolved_moves(&mut resolver)?;
            }
        }

        for from in blocks.iter().copied() {
            if completed.contains(&from) {
                continue;
            }
            let mut resolved = completed.clone();
            for to in from.succs(self.ctx).to_vec() {
                // duplicated edges are resolved once
                if !resolved.insert(to) {
                    continue;
                }
                self.resolve_collect_mappings(from, to, None, &mut resolver)?;
                if resolver.has_mappings() {
                    self.resolve_find_insert_pos(from, to, &mut resolver)?;
                    self.append_resolved_moves(&mut resolver)?;
                }
            }
        }

        debug!(
            "data flow resolved: {} moves, {} for phi values",
            self.stats.resolution_moves, self.stats.phi_resolution_moves
        );
        Ok(())
    }
}
