use super::{context::LirContext, func::LirFunc, inst::LirInst};
use crate::{
    collections::storage::{Arena, ArenaPtr, BaseArenaPtr},
    utils::cfg::CfgNode,
};

pub struct LirBlockData {
    label: String,
    insts: Vec<LirInst>,

    /// Successors without duplicates, filled by [LirFunc::finalize_cfg].
    succs: Vec<LirBlock>,
    /// Predecessors in layout order, filled by [LirFunc::finalize_cfg].
    preds: Vec<LirBlock>,

    /// Relative execution frequency, only used as a heuristic weight.
    frequency: f64,
    /// Position in the layout of the parent function.
    linear_scan_number: usize,

    parent: Option<LirFunc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LirBlock(pub(super) BaseArenaPtr<LirBlockData>);

impl LirBlock {
    pub fn new(ctx: &mut LirContext, label: impl Into<String>, frequency: f64) -> Self {
        ctx.alloc(LirBlockData {
            label: label.into(),
            insts: Vec::new(),
            succs: Vec::new(),
            preds: Vec::new(),
            frequency,
            linear_scan_number: 0,
            parent: None,
        })
    }

    /// The arena index of the block, stable for the whole compilation.
    pub fn id(self) -> usize { self.0.id() }

    pub fn label(self, ctx: &LirContext) -> &str { &self.deref(ctx).label }

    pub fn frequency(self, ctx: &LirContext) -> f64 { self.deref(ctx).frequency }

    pub fn set_frequency(self, ctx: &mut LirContext, frequency: f64) {
        self.deref_mut(ctx).frequency = frequency;
    }

    pub fn linear_scan_number(self, ctx: &LirContext) -> usize {
        self.deref(ctx).linear_scan_number
    }

    pub(super) fn set_linear_scan_number(self, ctx: &mut LirContext, number: usize) {
        self.deref_mut(ctx).linear_scan_number = number;
    }

    pub fn parent(self, ctx: &LirContext) -> Option<LirFunc> { self.deref(ctx).parent }

    pub(super) fn set_parent(self, ctx: &mut LirContext, parent: Option<LirFunc>) {
        self.deref_mut(ctx).parent = parent;
    }

    pub fn insts(self, ctx: &LirContext) -> &[LirInst] { &self.deref(ctx).insts }

    pub fn size(self, ctx: &LirContext) -> usize { self.deref(ctx).insts.len() }

    pub fn push_inst(self, ctx: &mut LirContext, inst: LirInst) {
        self.deref_mut(ctx).insts.push(inst);
    }

    /// Replace the whole instruction list, e.g., after a pass rewrote it.
    pub fn set_insts(self, ctx: &mut LirContext, insts: Vec<LirInst>) {
        self.deref_mut(ctx).insts = insts;
    }

    pub fn first_inst(self, ctx: &LirContext) -> Option<LirInst> {
        self.deref(ctx).insts.first().copied()
    }

    pub fn last_inst(self, ctx: &LirContext) -> Option<LirInst> {
        self.deref(ctx).insts.last().copied()
    }

    pub fn succs(self, ctx: &LirContext) -> &[LirBlock] { &self.deref(ctx).succs }

    pub fn preds(self, ctx: &LirContext) -> &[LirBlock] { &self.deref(ctx).preds }

    pub(super) fn set_edges(self, ctx: &mut LirContext, succs: Vec<LirBlock>, preds: Vec<LirBlock>) {
        let data = self.deref_mut(ctx);
        data.succs = succs;
        data.preds = preds;
    }
}

impl CfgNode for LirBlock {
    type Region = LirFunc;

    fn targets(self, arena: &Self::A) -> Vec<Self> {
        self.last_inst(arena)
            .map(|inst| inst.succs(arena))
            .unwrap_or_default()
    }
}
