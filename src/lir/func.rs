use core::fmt;

use super::{block::LirBlock, context::LirContext, inst::LirInst};
use crate::{
    collections::storage::{Arena, ArenaPtr, BaseArenaPtr},
    utils::cfg::{CfgInfo, CfgRegion},
};

pub struct LirFuncData {
    self_ptr: LirFunc,
    name: String,
    /// The block layout, which is also the linear scan order.
    blocks: Vec<LirBlock>,
}

impl LirFuncData {
    pub fn self_ptr(&self) -> LirFunc { self.self_ptr }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LirFunc(pub(super) BaseArenaPtr<LirFuncData>);

impl LirFunc {
    pub fn new(ctx: &mut LirContext, name: impl Into<String>) -> Self {
        ctx.alloc_with(|self_ptr| LirFuncData {
            self_ptr,
            name: name.into(),
            blocks: Vec::new(),
        })
    }

    pub fn name(self, ctx: &LirContext) -> &str { &self.deref(ctx).name }

    pub fn blocks(self, ctx: &LirContext) -> &[LirBlock] { &self.deref(ctx).blocks }

    /// The entry block is the first block in the layout.
    pub fn entry(self, ctx: &LirContext) -> Option<LirBlock> {
        self.deref(ctx).blocks.first().copied()
    }

    pub fn push_block(self, ctx: &mut LirContext, block: LirBlock) {
        block.set_parent(ctx, Some(self));
        self.deref_mut(ctx).blocks.push(block);
    }

    fn insert_block(self, ctx: &mut LirContext, index: usize, block: LirBlock) {
        block.set_parent(ctx, Some(self));
        self.deref_mut(ctx).blocks.insert(index, block);
    }

    /// Compute the successors and predecessors of every block.
    ///
    /// Must be called after the function is built and after any change of the
    /// control flow. Predecessors are listed in layout order.
    pub fn finalize_cfg(self, ctx: &mut LirContext) {
        let blocks = self.blocks(ctx).to_vec();
        for (number, block) in blocks.iter().enumerate() {
            block.set_linear_scan_number(ctx, number);
        }

        if blocks.is_empty() {
            return;
        }

        let cfg: CfgInfo<LirBlock> = self.cfg_info(ctx);

        for block in blocks.iter().copied() {
            let succs = cfg.succs(block).to_vec();
            let mut preds = cfg.preds(block).to_vec();
            preds.sort_by_key(|pred| pred.linear_scan_number(ctx));
            block.set_edges(ctx, succs, preds);
        }
    }

    /// Split every critical edge by a block holding only a label and a jump.
    ///
    /// Edges into phi-merge blocks are left alone, the source of such an edge
    /// cannot provide the outgoing phi values.
    ///
    /// # Returns
    ///
    /// The number of inserted blocks.
    pub fn split_critical_edges(self, ctx: &mut LirContext) -> usize {
        self.finalize_cfg(ctx);

        let cfg: CfgInfo<LirBlock> = self.cfg_info(ctx);
        let edges: Vec<(LirBlock, LirBlock)> = cfg
            .edges()
            .filter(|(from, to)| {
                let is_phi_target = to
                    .first_inst(ctx)
                    .map_or(false, |inst| inst.is_phi_in(ctx));
                cfg.is_critical_edge(*from, *to) && !is_phi_target
            })
            .collect();

        for (idx, (from, to)) in edges.iter().copied().enumerate() {
            let label = format!("{}_{}_split{}", from.label(ctx), to.label(ctx), idx);
            let frequency = from.frequency(ctx).min(to.frequency(ctx));
            let mid = LirBlock::new(ctx, label, frequency);

            let label_inst = LirInst::label(ctx, Vec::new());
            let jump_inst = LirInst::jump(ctx, to, Vec::new());
            mid.push_inst(ctx, label_inst);
            mid.push_inst(ctx, jump_inst);

            if let Some(terminator) = from.last_inst(ctx) {
                terminator.replace_succ(ctx, to, mid);
            }

            let position = self
                .blocks(ctx)
                .iter()
                .position(|block| *block == to)
                .unwrap_or(self.blocks(ctx).len());
            self.insert_block(ctx, position, mid);
        }

        if !edges.is_empty() {
            self.finalize_cfg(ctx);
        }

        edges.len()
    }

    pub fn display(self, ctx: &LirContext) -> DisplayLirFunc { DisplayLirFunc { ctx, func: self } }
}

impl CfgRegion for LirFunc {
    type Node = LirBlock;

    fn entry_node(self, arena: &Self::A) -> Option<Self::Node> { self.entry(arena) }
}

pub struct DisplayLirFunc<'a> {
    ctx: &'a LirContext,
    func: LirFunc,
}

impl fmt::Display for DisplayLirFunc<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ctx = self.ctx;
        writeln!(f, "func {}:", self.func.name(ctx))?;
        for block in self.func.blocks(ctx).iter().copied() {
            write!(f, "  {} (freq {}", block.label(ctx), block.frequency(ctx))?;
            if !block.preds(ctx).is_empty() {
                write!(f, ", preds")?;
                for pred in block.preds(ctx) {
                    write!(f, " {}", pred.label(ctx))?;
                }
            }
            writeln!(f, "):")?;
            for inst in block.insts(ctx).iter().copied() {
                writeln!(f, "    {}", inst.display(ctx))?;
            }
        }
        Ok(())
    }
}
