use core::fmt;

use super::{
    block::LirBlock,
    context::LirContext,
    regs::{Location, PReg, StackSlot, VReg},
};
use crate::collections::storage::{Arena, ArenaPtr, BaseArenaPtr};

/// An operand of a LIR instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    /// A virtual register, to be replaced by a location.
    Var(VReg),
    /// A physical register fixed by the instruction (e.g., calling convention).
    Fixed(PReg),
    /// A stack slot fixed by the instruction.
    Stack(StackSlot),
    /// An immediate.
    Const(i64),
}

impl Operand {
    pub fn is_var(&self) -> bool { matches!(self, Operand::Var(_)) }

    pub fn is_fixed(&self) -> bool { matches!(self, Operand::Fixed(_)) }

    pub fn is_const(&self) -> bool { matches!(self, Operand::Const(_)) }

    /// Variables and physical registers are the operands with intervals.
    pub fn is_var_or_fixed(&self) -> bool { matches!(self, Operand::Var(_) | Operand::Fixed(_)) }

    pub fn as_var(&self) -> Option<VReg> {
        match self {
            Operand::Var(vreg) => Some(*vreg),
            _ => None,
        }
    }
}

impl From<VReg> for Operand {
    fn from(vreg: VReg) -> Self { Self::Var(vreg) }
}

impl From<PReg> for Operand {
    fn from(preg: PReg) -> Self { Self::Fixed(preg) }
}

impl From<StackSlot> for Operand {
    fn from(slot: StackSlot) -> Self { Self::Stack(slot) }
}

impl From<Location> for Operand {
    fn from(location: Location) -> Self {
        match location {
            Location::Reg(preg) => Self::Fixed(preg),
            Location::Stack(slot) => Self::Stack(slot),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Var(vreg) => write!(f, "{}", vreg),
            Operand::Fixed(preg) => write!(f, "{}", preg),
            Operand::Stack(slot) => write!(f, "{}", slot),
            Operand::Const(imm) => write!(f, "#{}", imm),
        }
    }
}

/// How an instruction accesses an operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandMode {
    /// Read at the instruction.
    Use,
    /// Written and discarded within the instruction.
    Temp,
    /// Written by the instruction.
    Def,
}

/// The outgoing phi values of a jump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhiOut {
    /// One value per phi of the target, in the order of the target's phi-in.
    Values(Vec<Operand>),
    /// The values have been turned into moves by data-flow resolution.
    Consumed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LirInstKind {
    /// The first instruction of every block.
    ///
    /// A non-empty `phi_in` makes the block a phi-merge point, the label
    /// defines the phi values.
    Label { phi_in: Vec<Operand> },
    Jump {
        target: LirBlock,
        phi_out: PhiOut,
    },
    Branch {
        cond: Operand,
        then_block: LirBlock,
        else_block: LirBlock,
    },
    Move {
        dst: Operand,
        src: Operand,
    },
    /// A generic operation.
    ///
    /// `clobbers` marks a call-like operation destroying all caller-saved
    /// registers.
    Op {
        name: String,
        defs: Vec<Operand>,
        uses: Vec<Operand>,
        temps: Vec<Operand>,
        clobbers: bool,
    },
    Return { uses: Vec<Operand> },
}

pub struct LirInstData {
    /// The op id, assigned by numbering. Instructions inserted by the
    /// allocator have no id.
    id: Option<u32>,
    kind: LirInstKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LirInst(pub(super) BaseArenaPtr<LirInstData>);

impl LirInst {
    pub fn new(ctx: &mut LirContext, kind: LirInstKind) -> Self {
        ctx.alloc(LirInstData { id: None, kind })
    }

    pub fn label(ctx: &mut LirContext, phi_in: Vec<Operand>) -> Self {
        Self::new(ctx, LirInstKind::Label { phi_in })
    }

    pub fn jump(ctx: &mut LirContext, target: LirBlock, phi_out: Vec<Operand>) -> Self {
        Self::new(
            ctx,
            LirInstKind::Jump {
                target,
                phi_out: PhiOut::Values(phi_out),
            },
        )
    }

    pub fn branch(
        ctx: &mut LirContext,
        cond: impl Into<Operand>,
        then_block: LirBlock,
        else_block: LirBlock,
    ) -> Self {
        Self::new(
            ctx,
            LirInstKind::Branch {
                cond: cond.into(),
                then_block,
                else_block,
            },
        )
    }

    pub fn mov(ctx: &mut LirContext, dst: impl Into<Operand>, src: impl Into<Operand>) -> Self {
        Self::new(
            ctx,
            LirInstKind::Move {
                dst: dst.into(),
                src: src.into(),
            },
        )
    }

    pub fn op(
        ctx: &mut LirContext,
        name: impl Into<String>,
        defs: Vec<Operand>,
        uses: Vec<Operand>,
    ) -> Self {
        Self::new(
            ctx,
            LirInstKind::Op {
                name: name.into(),
                defs,
                uses,
                temps: Vec::new(),
                clobbers: false,
            },
        )
    }

    /// A call-like operation destroying the caller-saved registers.
    pub fn call(
        ctx: &mut LirContext,
        name: impl Into<String>,
        defs: Vec<Operand>,
        uses: Vec<Operand>,
    ) -> Self {
        Self::new(
            ctx,
            LirInstKind::Op {
                name: name.into(),
                defs,
                uses,
                temps: Vec::new(),
                clobbers: true,
            },
        )
    }

    pub fn ret(ctx: &mut LirContext, uses: Vec<Operand>) -> Self {
        Self::new(ctx, LirInstKind::Return { uses })
    }

    pub fn id(self, ctx: &LirContext) -> Option<u32> { self.deref(ctx).id }

    pub fn set_id(self, ctx: &mut LirContext, id: Option<u32>) { self.deref_mut(ctx).id = id; }

    pub fn kind(self, ctx: &LirContext) -> &LirInstKind { &self.deref(ctx).kind }

    pub fn kind_mut(self, ctx: &mut LirContext) -> &mut LirInstKind { &mut self.deref_mut(ctx).kind }

    pub fn is_label(self, ctx: &LirContext) -> bool {
        matches!(self.kind(ctx), LirInstKind::Label { .. })
    }

    /// Check if the instruction is a label defining phi values.
    pub fn is_phi_in(self, ctx: &LirContext) -> bool {
        matches!(self.kind(ctx), LirInstKind::Label { phi_in } if !phi_in.is_empty())
    }

    pub fn is_jump(self, ctx: &LirContext) -> bool {
        matches!(self.kind(ctx), LirInstKind::Jump { .. })
    }

    pub fn is_terminator(self, ctx: &LirContext) -> bool {
        matches!(
            self.kind(ctx),
            LirInstKind::Jump { .. } | LirInstKind::Branch { .. } | LirInstKind::Return { .. }
        )
    }

    /// Get `(dst, src)` if the instruction is a move.
    pub fn as_move(self, ctx: &LirContext) -> Option<(Operand, Operand)> {
        match self.kind(ctx) {
            LirInstKind::Move { dst, src } => Some((*dst, *src)),
            _ => None,
        }
    }

    pub fn destroys_caller_saved(self, ctx: &LirContext) -> bool {
        matches!(self.kind(ctx), LirInstKind::Op { clobbers: true, .. })
    }

    /// The phi values defined by a label, empty for other instructions.
    pub fn phi_in(self, ctx: &LirContext) -> &[Operand] {
        match self.kind(ctx) {
            LirInstKind::Label { phi_in } => phi_in,
            _ => &[],
        }
    }

    /// The outgoing phi values of a jump.
    ///
    /// # Returns
    ///
    /// - `Some(values)`: The instruction is a jump whose values are not yet
    ///   consumed.
    /// - `None`: Not a jump, or the values are consumed.
    pub fn phi_out(self, ctx: &LirContext) -> Option<&[Operand]> {
        match self.kind(ctx) {
            LirInstKind::Jump {
                phi_out: PhiOut::Values(values),
                ..
            } => Some(values),
            _ => None,
        }
    }

    pub fn is_phi_out_consumed(self, ctx: &LirContext) -> bool {
        matches!(
            self.kind(ctx),
            LirInstKind::Jump {
                phi_out: PhiOut::Consumed,
                ..
            }
        )
    }

    /// Mark the outgoing phi values of a jump as consumed.
    pub fn consume_phi_out(self, ctx: &mut LirContext) {
        if let LirInstKind::Jump { phi_out, .. } = self.kind_mut(ctx) {
            *phi_out = PhiOut::Consumed;
        }
    }

    pub fn clear_phi_in(self, ctx: &mut LirContext) {
        if let LirInstKind::Label { phi_in } = self.kind_mut(ctx) {
            phi_in.clear();
        }
    }

    pub fn succs(self, ctx: &LirContext) -> Vec<LirBlock> {
        match self.kind(ctx) {
            LirInstKind::Jump { target, .. } => vec![*target],
            LirInstKind::Branch {
                then_block,
                else_block,
                ..
            } => vec![*then_block, *else_block],
            _ => Vec::new(),
        }
    }

    /// Redirect the edge to `old` towards `new`.
    pub fn replace_succ(self, ctx: &mut LirContext, old: LirBlock, new: LirBlock) {
        match self.kind_mut(ctx) {
            LirInstKind::Jump { target, .. } => {
                if *target == old {
                    *target = new;
                }
            }
            LirInstKind::Branch {
                then_block,
                else_block,
                ..
            } => {
                if *then_block == old {
                    *then_block = new;
                }
                if *else_block == old {
                    *else_block = new;
                }
            }
            _ => {}
        }
    }

    /// The operands written by the instruction.
    pub fn outputs(self, ctx: &LirContext) -> Vec<Operand> {
        match self.kind(ctx) {
            LirInstKind::Label { phi_in } => phi_in.clone(),
            LirInstKind::Move { dst, .. } => vec![*dst],
            LirInstKind::Op { defs, .. } => defs.clone(),
            _ => Vec::new(),
        }
    }

    pub fn temps(self, ctx: &LirContext) -> Vec<Operand> {
        match self.kind(ctx) {
            LirInstKind::Op { temps, .. } => temps.clone(),
            _ => Vec::new(),
        }
    }

    /// The operands read by the instruction.
    pub fn inputs(self, ctx: &LirContext) -> Vec<Operand> {
        match self.kind(ctx) {
            LirInstKind::Jump {
                phi_out: PhiOut::Values(values),
                ..
            } => values.clone(),
            LirInstKind::Branch { cond, .. } => vec![*cond],
            LirInstKind::Move { src, .. } => vec![*src],
            LirInstKind::Op { uses, .. } => uses.clone(),
            LirInstKind::Return { uses } => uses.clone(),
            _ => Vec::new(),
        }
    }

    /// Rewrite every operand of the instruction in place.
    pub fn map_operands<F>(self, ctx: &mut LirContext, mut f: F)
    where
        F: FnMut(Operand, OperandMode) -> Operand,
    {
        match self.kind_mut(ctx) {
            LirInstKind::Label { phi_in } => map_all(phi_in, OperandMode::Def, &mut f),
            LirInstKind::Jump {
                phi_out: PhiOut::Values(values),
                ..
            } => map_all(values, OperandMode::Use, &mut f),
            LirInstKind::Jump { .. } => {}
            LirInstKind::Branch { cond, .. } => *cond = f(*cond, OperandMode::Use),
            LirInstKind::Move { dst, src } => {
                *src = f(*src, OperandMode::Use);
                *dst = f(*dst, OperandMode::Def);
            }
            LirInstKind::Op {
                defs, uses, temps, ..
            } => {
                map_all(uses, OperandMode::Use, &mut f);
                map_all(temps, OperandMode::Temp, &mut f);
                map_all(defs, OperandMode::Def, &mut f);
            }
            LirInstKind::Return { uses } => map_all(uses, OperandMode::Use, &mut f),
        }
    }

    pub fn display(self, ctx: &LirContext) -> DisplayLirInst { DisplayLirInst { ctx, inst: self } }
}

fn map_all<F>(operands: &mut [Operand], mode: OperandMode, f: &mut F)
where
    F: FnMut(Operand, OperandMode) -> Operand,
{
    for operand in operands.iter_mut() {
        *operand = f(*operand, mode);
    }
}

pub struct DisplayLirInst<'a> {
    ctx: &'a LirContext,
    inst: LirInst,
}

fn write_list(f: &mut fmt::Formatter<'_>, operands: &[Operand]) -> fmt::Result {
    for (i, operand) in operands.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", operand)?;
    }
    Ok(())
}

impl fmt::Display for DisplayLirInst<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ctx = self.ctx;
        match self.inst.id(ctx) {
            Some(id) => write!(f, "{:>4}  ", id)?,
            None => write!(f, "   -  ")?,
        }
        match self.inst.kind(ctx) {
            LirInstKind::Label { phi_in } => {
                write!(f, "label")?;
                if !phi_in.is_empty() {
                    write!(f, " phi(")?;
                    write_list(f, phi_in)?;
                    write!(f, ")")?;
                }
                Ok(())
            }
            LirInstKind::Jump { target, phi_out } => {
                write!(f, "jump {}", target.label(ctx))?;
                match phi_out {
                    PhiOut::Values(values) if !values.is_empty() => {
                        write!(f, " phi(")?;
                        write_list(f, values)?;
                        write!(f, ")")
                    }
                    _ => Ok(()),
                }
            }
            LirInstKind::Branch {
                cond,
                then_block,
                else_block,
            } => write!(
                f,
                "branch {}, {}, {}",
                cond,
                then_block.label(ctx),
                else_block.label(ctx)
            ),
            LirInstKind::Move { dst, src } => write!(f, "move {}, {}", dst, src),
            LirInstKind::Op {
                name,
                defs,
                uses,
                temps,
                clobbers,
            } => {
                write_list(f, defs)?;
                if !defs.is_empty() {
                    write!(f, " = ")?;
                }
                write!(f, "{} ", name)?;
                write_list(f, uses)?;
                if !temps.is_empty() {
                    write!(f, " temp(")?;
                    write_list(f, temps)?;
                    write!(f, ")")?;
                }
                if *clobbers {
                    write!(f, " clobbers")?;
                }
                Ok(())
            }
            LirInstKind::Return { uses } => {
                write!(f, "return ")?;
                write_list(f, uses)
            }
        }
    }
}
