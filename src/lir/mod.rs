//! # Low-level IR
//!
//! The block-structured LIR the allocator works on. Every block starts with a
//! label and ends with a terminator; SSA merges are expressed by the phi-in
//! list of a label and the phi-out list of the jumps into it.
//!
//! - `regs`: Physical and virtual registers, stack slots and locations.
//! - `inst`: Instructions and operands.
//! - `block`: Basic blocks.
//! - `func`: Functions, the block layout and critical edge splitting.
//! - `context`: Arena storage of one compilation unit.

mod block;
mod context;
mod func;
mod inst;
mod regs;

pub use block::{LirBlock, LirBlockData};
pub use context::{DisplayLirContext, LirContext};
pub use func::{DisplayLirFunc, LirFunc, LirFuncData};
pub use inst::{DisplayLirInst, LirInst, LirInstData, LirInstKind, Operand, OperandMode, PhiOut};
pub use regs::{Location, PReg, RegKind, StackSlot, VReg};

/// Pending insertions into the instruction list of one block.
///
/// Indices refer to the list before any insertion, instructions inserted at
/// the same index keep the order they were appended in.
pub struct InsertionBuffer {
    block: LirBlock,
    pending: Vec<(usize, LirInst)>,
}

impl InsertionBuffer {
    pub fn new(block: LirBlock) -> Self {
        Self {
            block,
            pending: Vec::new(),
        }
    }

    pub fn block(&self) -> LirBlock { self.block }

    pub fn is_empty(&self) -> bool { self.pending.is_empty() }

    pub fn append(&mut self, index: usize, inst: LirInst) { self.pending.push((index, inst)); }

    /// Splice all the pending instructions into the block.
    pub fn finish(self, ctx: &mut LirContext) {
        if self.pending.is_empty() {
            return;
        }

        let mut pending = self.pending;
        // stable, so equal indices keep the append order
        pending.sort_by_key(|(index, _)| *index);

        let old = self.block.insts(ctx).to_vec();
        let mut insts = Vec::with_capacity(old.len() + pending.len());
        let mut pending = pending.into_iter().peekable();

        for (index, inst) in old.into_iter().enumerate() {
            while let Some((_, new_inst)) = pending.next_if(|(at, _)| *at <= index) {
                insts.push(new_inst);
            }
            insts.push(inst);
        }
        insts.extend(pending.map(|(_, inst)| inst));

        self.block.set_insts(ctx, insts);
    }
}
