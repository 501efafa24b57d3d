use rustc_hash::{FxHashMap, FxHashSet};

use crate::lir::{LirBlock, LirContext, LirFunc, VReg};

/// Upward-exposed uses and definitions of every block.
///
/// Only variables are tracked. The phi-in of a label defines its values, the
/// phi-out of a jump uses them.
#[derive(Debug, Clone, Default)]
pub struct BlockDefUse {
    pub uses: FxHashMap<LirBlock, FxHashSet<VReg>>,
    pub defs: FxHashMap<LirBlock, FxHashSet<VReg>>,
}

impl BlockDefUse {
    pub fn new() -> Self { Self::default() }

    pub fn uses(&self, block: LirBlock) -> Option<&FxHashSet<VReg>> { self.uses.get(&block) }

    pub fn defs(&self, block: LirBlock) -> Option<&FxHashSet<VReg>> { self.defs.get(&block) }

    pub fn display(&self, ctx: &LirContext) -> String {
        let mut s = String::new();

        for (block, uses) in &self.uses {
            s.push_str(&format!("{} uses: ", block.label(ctx)));
            for vreg in sorted(uses) {
                s.push_str(&format!("{}, ", vreg));
            }
            s.push('\n');
        }

        for (block, defs) in &self.defs {
            s.push_str(&format!("{} defs: ", block.label(ctx)));
            for vreg in sorted(defs) {
                s.push_str(&format!("{}, ", vreg));
            }
            s.push('\n');
        }

        s
    }
}

fn sorted(set: &FxHashSet<VReg>) -> Vec<VReg> {
    let mut vregs: Vec<VReg> = set.iter().copied().collect();
    vregs.sort();
    vregs
}

pub fn analyze_on_function(ctx: &LirContext, func: LirFunc) -> BlockDefUse {
    let mut defuse = BlockDefUse::new();

    for block in func.blocks(ctx).iter().copied() {
        let mut uses = FxHashSet::default();
        let mut defs = FxHashSet::default();

        for inst in block.insts(ctx).iter().copied() {
            for vreg in inst
                .inputs(ctx)
                .into_iter()
                .chain(inst.temps(ctx))
                .filter_map(|operand| operand.as_var())
            {
                if !defs.contains(&vreg) {
                    uses.insert(vreg);
                }
            }
            for vreg in inst
                .outputs(ctx)
                .into_iter()
                .filter_map(|operand| operand.as_var())
            {
                defs.insert(vreg);
            }
        }

        defuse.uses.insert(block, uses);
        defuse.defs.insert(block, defs);
    }

    defuse
}
