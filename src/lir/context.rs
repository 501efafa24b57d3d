use core::fmt;

use super::{
    block::{LirBlock, LirBlockData},
    func::{LirFunc, LirFuncData},
    inst::{LirInst, LirInstData},
    regs::{RegKind, VReg},
};
use crate::{collections::storage::BaseArena, impl_arena};

/// The storage of one compilation unit.
///
/// All the instructions, blocks and functions live here, handles are indices
/// into the arenas. Nothing is shared between two contexts, so independent
/// compilations can run on different threads.
#[derive(Default)]
pub struct LirContext {
    pub(super) insts: BaseArena<LirInstData>,
    pub(super) blocks: BaseArena<LirBlockData>,
    pub(super) funcs: BaseArena<LirFuncData>,

    vreg_counter: u32,
}

impl_arena!(LirContext, LirInstData, LirInst, insts);
impl_arena!(LirContext, LirBlockData, LirBlock, blocks);
impl_arena!(LirContext, LirFuncData, LirFunc, funcs);

impl LirContext {
    pub fn new() -> Self { Self::default() }

    pub fn new_vreg(&mut self, kind: RegKind) -> VReg {
        let vreg = VReg::new(self.vreg_counter, kind);
        self.vreg_counter += 1;
        vreg
    }

    /// The number of virtual registers created so far.
    pub fn vreg_count(&self) -> u32 { self.vreg_counter }

    /// Make sure the next virtual register is numbered at least `count`.
    pub fn reserve_vregs(&mut self, count: u32) {
        self.vreg_counter = self.vreg_counter.max(count);
    }

    pub fn funcs(&self) -> impl Iterator<Item = LirFunc> + '_ {
        self.funcs.iter().map(|(_, data)| data.self_ptr())
    }

    pub fn display(&self) -> DisplayLirContext { DisplayLirContext { ctx: self } }
}

pub struct DisplayLirContext<'a> {
    ctx: &'a LirContext,
}

impl fmt::Display for DisplayLirContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for func in self.ctx.funcs() {
            write!(f, "{}", func.display(self.ctx))?;
        }
        Ok(())
    }
}
