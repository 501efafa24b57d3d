use rustc_hash::{FxHashMap, FxHashSet};

use super::{block_defuse_analysis, RegAllocError, RegAllocResult};
use crate::lir::{LirBlock, LirContext, LirFunc, Operand, VReg};

/// Live-in and live-out variables of every block.
#[derive(Debug, Clone, Default)]
pub struct BlockInOut {
    pub in_: FxHashMap<LirBlock, FxHashSet<VReg>>,
    pub out: FxHashMap<LirBlock, FxHashSet<VReg>>,
}

impl BlockInOut {
    pub fn new() -> Self { Self::default() }

    pub fn in_(&self, block: LirBlock) -> Option<&FxHashSet<VReg>> { self.in_.get(&block) }

    pub fn out(&self, block: LirBlock) -> Option<&FxHashSet<VReg>> { self.out.get(&block) }

    pub fn is_live_in(&self, block: LirBlock, vreg: VReg) -> bool {
        self.in_
            .get(&block)
            .map_or(false, |live| live.contains(&vreg))
    }

    /// The live-in variables ordered by number.
    pub fn sorted_in(&self, block: LirBlock) -> Vec<VReg> { sorted(self.in_.get(&block)) }

    /// The live-out variables ordered by number.
    pub fn sorted_out(&self, block: LirBlock) -> Vec<VReg> { sorted(self.out.get(&block)) }

    pub fn display(&self, ctx: &LirContext, func: LirFunc) -> String {
        let mut s = String::new();

        for block in func.blocks(ctx).iter().copied() {
            s.push_str(&format!("{} in: ", block.label(ctx)));
            for vreg in self.sorted_in(block) {
                s.push_str(&format!("{}, ", vreg));
            }
            s.push_str(" out: ");
            for vreg in self.sorted_out(block) {
                s.push_str(&format!("{}, ", vreg));
            }
            s.push('\n');
        }

        s
    }
}

fn sorted(set: Option<&FxHashSet<VReg>>) -> Vec<VReg> {
    let mut vregs: Vec<VReg> = set.into_iter().flatten().copied().collect();
    vregs.sort();
    vregs
}

/// Compute liveness by a backward fixpoint.
///
/// The control flow information of `func` must be finalized. A variable live
/// at the entry is used without a definition, which is fatal.
pub fn analyze_on_function(ctx: &LirContext, func: LirFunc) -> RegAllocResult<BlockInOut> {
    let def_uses = block_defuse_analysis::analyze_on_function(ctx, func);
    let blocks = func.blocks(ctx);

    let mut in_: FxHashMap<LirBlock, FxHashSet<VReg>> = FxHashMap::default();
    let mut out: FxHashMap<LirBlock, FxHashSet<VReg>> = FxHashMap::default();

    for block in blocks.iter().copied() {
        in_.insert(block, FxHashSet::default());
        out.insert(block, FxHashSet::default());
    }

    let empty = FxHashSet::default();

    let mut changed = true;
    while changed {
        changed = false;

        for block in blocks.iter().rev().copied() {
            let mut out_set = FxHashSet::default();

            // out[B] = U in[S] for all S in succ[B]
            for succ in block.succs(ctx) {
                if let Some(succ_in) = in_.get(succ) {
                    out_set.extend(succ_in.iter().copied());
                }
            }

            // in[B] = use[B] U (out[B] - def[B])
            let uses = def_uses.uses(block).unwrap_or(&empty);
            let defs = def_uses.defs(block).unwrap_or(&empty);
            let mut in_set: FxHashSet<VReg> = uses.clone();
            in_set.extend(out_set.difference(defs).copied());

            if in_[&block] != in_set {
                in_.insert(block, in_set);
                changed = true;
            }

            if out[&block] != out_set {
                out.insert(block, out_set);
                changed = true;
            }
        }
    }

    let in_out = BlockInOut { in_, out };

    if let Some(entry) = func.entry(ctx) {
        if let Some(vreg) = in_out.sorted_in(entry).first() {
            return Err(RegAllocError::EntryLiveIn {
                block: entry.label(ctx).to_string(),
                operand: Operand::Var(*vreg),
            });
        }
    }

    Ok(in_out)
}
