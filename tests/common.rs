#![allow(dead_code)]

use linscan::{
    lir::{LirBlock, LirContext, LirFunc, LirInst, Location, Operand, PReg, RegKind, StackSlot, VReg},
    reg_alloc::{IntervalWalk, LinearScan, LinearScanConfig, RegAllocResult},
};

pub fn reg(num: u8) -> PReg { PReg::new(num, RegKind::General) }

pub fn var(ctx: &mut LirContext) -> VReg { ctx.new_vreg(RegKind::General) }

pub fn new_block(ctx: &mut LirContext, func: LirFunc, label: &str, frequency: f64) -> LirBlock {
    let block = LirBlock::new(ctx, label, frequency);
    func.push_block(ctx, block);
    block
}

pub fn fill(ctx: &mut LirContext, block: LirBlock, insts: Vec<LirInst>) {
    for inst in insts {
        block.push_inst(ctx, inst);
    }
}

/// Only the given general registers, none of them caller-saved.
pub fn config_with(regs: &[u8]) -> LinearScanConfig {
    LinearScanConfig {
        ssa: true,
        allocatable_regs: regs.iter().copied().map(reg).collect(),
        caller_saved_regs: Vec::new(),
        detailed_asserts: true,
    }
}

/// A walk placing the intervals by hand.
pub struct HandWalk<F>(pub F);

impl<F> IntervalWalk for HandWalk<F>
where
    F: FnMut(&mut LinearScan<'_>) -> RegAllocResult<()>,
{
    fn walk(&mut self, alloc: &mut LinearScan<'_>) -> RegAllocResult<()> { (self.0)(alloc) }
}

pub fn hand_walk<F>(f: F) -> HandWalk<F>
where
    F: FnMut(&mut LinearScan<'_>) -> RegAllocResult<()>,
{
    HandWalk(f)
}

/// Run the phases up to the walk.
pub fn walk_with<'a>(
    ctx: &'a mut LirContext,
    func: LirFunc,
    config: LinearScanConfig,
    walker: &mut dyn IntervalWalk,
) -> RegAllocResult<LinearScan<'a>> {
    let mut alloc = LinearScan::new(ctx, func, config);
    alloc.number_instructions()?;
    alloc.compute_liveness()?;
    alloc.build_intervals()?;
    walker.walk(&mut alloc)?;
    Ok(alloc)
}

/// Run the phases up to data-flow resolution.
pub fn resolve_with<'a>(
    ctx: &'a mut LirContext,
    func: LirFunc,
    config: LinearScanConfig,
    walker: &mut dyn IntervalWalk,
) -> RegAllocResult<LinearScan<'a>> {
    let mut alloc = walk_with(ctx, func, config, walker)?;
    alloc.resolve_data_flow()?;
    Ok(alloc)
}

/// Put each variable in its location, unknown variables are skipped.
pub fn place(alloc: &mut LinearScan<'_>, placement: &[(VReg, Location)]) -> RegAllocResult<()> {
    let store = alloc.intervals_mut();
    for (vreg, location) in placement.iter().copied() {
        let Some(id) = store.interval_for(Operand::Var(vreg)) else {
            continue;
        };
        store.set_location(id, location);
        if let Location::Stack(slot) = location {
            store.set_spill_slot(id, slot);
        }
    }
    Ok(())
}

pub fn in_reg(num: u8) -> Location { Location::Reg(reg(num)) }

pub fn in_slot(num: u32) -> Location { Location::Stack(StackSlot::Local(num)) }

/// The moves inserted by the allocator into `block`.
pub fn inserted_moves(ctx: &LirContext, block: LirBlock) -> Vec<(Operand, Operand)> {
    block
        .insts(ctx)
        .iter()
        .filter(|inst| inst.id(ctx).is_none())
        .filter_map(|inst| inst.as_move(ctx))
        .collect()
}

pub fn assert_no_vars(ctx: &LirContext, func: LirFunc) {
    for block in func.blocks(ctx) {
        for inst in block.insts(ctx) {
            let operands = inst
                .inputs(ctx)
                .into_iter()
                .chain(inst.outputs(ctx))
                .chain(inst.temps(ctx));
            for operand in operands {
                assert!(
                    !operand.is_var(),
                    "variable {} left in {}",
                    operand,
                    inst.display(ctx)
                );
            }
        }
    }
}

pub struct Diamond {
    pub ctx: LirContext,
    pub func: LirFunc,
    pub entry: LirBlock,
    pub left: LirBlock,
    pub right: LirBlock,
    pub merge: LirBlock,
    pub cond: VReg,
    pub x1: VReg,
    pub v: VReg,
}

/// entry → {left, right} → merge, with `v = phi(x1 from left, 5 from right)`.
pub fn diamond() -> Diamond {
    diamond_with(0.9, 0.1, |_, x1| (Operand::Var(x1), Operand::Const(5)))
}

/// The diamond with custom frequencies and phi-out values, `values` gets the
/// context and `x1` and returns the left and right values.
pub fn diamond_with<F>(left_freq: f64, right_freq: f64, values: F) -> Diamond
where
    F: FnOnce(&mut LirContext, VReg) -> (Operand, Operand),
{
    let mut ctx = LirContext::new();
    let func = LirFunc::new(&mut ctx, "diamond");

    let entry = new_block(&mut ctx, func, "entry", 1.0);
    let left = new_block(&mut ctx, func, "left", left_freq);
    let right = new_block(&mut ctx, func, "right", right_freq);
    let merge = new_block(&mut ctx, func, "merge", 1.0);

    let cond = var(&mut ctx);
    let x1 = var(&mut ctx);
    let v = var(&mut ctx);

    let (left_value, right_value) = values(&mut ctx, x1);

    let insts = vec![
        LirInst::label(&mut ctx, Vec::new()),
        LirInst::op(&mut ctx, "cond", vec![Operand::Var(cond)], Vec::new()),
        LirInst::branch(&mut ctx, cond, left, right),
    ];
    fill(&mut ctx, entry, insts);

    let insts = vec![
        LirInst::label(&mut ctx, Vec::new()),
        LirInst::op(&mut ctx, "load", vec![Operand::Var(x1)], Vec::new()),
        LirInst::jump(&mut ctx, merge, vec![left_value]),
    ];
    fill(&mut ctx, left, insts);

    let insts = vec![
        LirInst::label(&mut ctx, Vec::new()),
        LirInst::jump(&mut ctx, merge, vec![right_value]),
    ];
    fill(&mut ctx, right, insts);

    let insts = vec![
        LirInst::label(&mut ctx, vec![Operand::Var(v)]),
        LirInst::ret(&mut ctx, vec![Operand::Var(v)]),
    ];
    fill(&mut ctx, merge, insts);

    func.finalize_cfg(&mut ctx);

    Diamond {
        ctx,
        func,
        entry,
        left,
        right,
        merge,
        cond,
        x1,
        v,
    }
}

/// The diamond where the right predecessor passes no phi value.
pub fn mismatched_arity() -> Diamond {
    let mut diamond = diamond();
    let right = diamond.right;
    let jump = LirInst::jump(&mut diamond.ctx, diamond.merge, Vec::new());
    let label = right.first_inst(&diamond.ctx).unwrap();
    right.set_insts(&mut diamond.ctx, vec![label, jump]);
    diamond.func.finalize_cfg(&mut diamond.ctx);
    diamond
}

pub struct Loop {
    pub ctx: LirContext,
    pub func: LirFunc,
    pub entry: LirBlock,
    pub header: LirBlock,
    pub body: LirBlock,
    pub exit: LirBlock,
    pub i0: VReg,
    pub i: VReg,
    pub i2: VReg,
}

/// A counting loop, `i = phi(i0 from entry, i2 from body)`.
pub fn counting_loop() -> Loop {
    let mut ctx = LirContext::new();
    let func = LirFunc::new(&mut ctx, "loop");

    let entry = new_block(&mut ctx, func, "entry", 1.0);
    let header = new_block(&mut ctx, func, "header", 10.0);
    let body = new_block(&mut ctx, func, "body", 9.0);
    let exit = new_block(&mut ctx, func, "exit", 1.0);

    let i0 = var(&mut ctx);
    let i = var(&mut ctx);
    let c = var(&mut ctx);
    let i2 = var(&mut ctx);

    let insts = vec![
        LirInst::label(&mut ctx, Vec::new()),
        LirInst::op(&mut ctx, "zero", vec![Operand::Var(i0)], Vec::new()),
        LirInst::jump(&mut ctx, header, vec![Operand::Var(i0)]),
    ];
    fill(&mut ctx, entry, insts);

    let insts = vec![
        LirInst::label(&mut ctx, vec![Operand::Var(i)]),
        LirInst::op(&mut ctx, "cmp", vec![Operand::Var(c)], vec![Operand::Var(i)]),
        LirInst::branch(&mut ctx, c, body, exit),
    ];
    fill(&mut ctx, header, insts);

    let insts = vec![
        LirInst::label(&mut ctx, Vec::new()),
        LirInst::op(&mut ctx, "inc", vec![Operand::Var(i2)], vec![Operand::Var(i)]),
        LirInst::jump(&mut ctx, header, vec![Operand::Var(i2)]),
    ];
    fill(&mut ctx, body, insts);

    let insts = vec![
        LirInst::label(&mut ctx, Vec::new()),
        LirInst::ret(&mut ctx, vec![Operand::Var(i)]),
    ];
    fill(&mut ctx, exit, insts);

    func.finalize_cfg(&mut ctx);

    Loop {
        ctx,
        func,
        entry,
        header,
        body,
        exit,
        i0,
        i,
        i2,
    }
}

pub struct CriticalEdge {
    pub ctx: LirContext,
    pub func: LirFunc,
    pub entry: LirBlock,
    pub then: LirBlock,
    pub join: LirBlock,
    pub a: VReg,
    pub c: VReg,
}

/// `entry` branches to `then` and straight to `join`, `then` falls into
/// `join`. The edge from `entry` to `join` is critical.
pub fn critical_edge() -> CriticalEdge {
    let mut ctx = LirContext::new();
    let func = LirFunc::new(&mut ctx, "critical");

    let entry = new_block(&mut ctx, func, "entry", 1.0);
    let then = new_block(&mut ctx, func, "then", 0.5);
    let join = new_block(&mut ctx, func, "join", 1.0);

    let a = var(&mut ctx);
    let c = var(&mut ctx);

    let insts = vec![
        LirInst::label(&mut ctx, Vec::new()),
        LirInst::op(&mut ctx, "def", vec![Operand::Var(a)], Vec::new()),
        LirInst::op(&mut ctx, "cond", vec![Operand::Var(c)], Vec::new()),
        LirInst::branch(&mut ctx, c, then, join),
    ];
    fill(&mut ctx, entry, insts);

    let insts = vec![
        LirInst::label(&mut ctx, Vec::new()),
        LirInst::call(&mut ctx, "call", Vec::new(), Vec::new()),
        LirInst::jump(&mut ctx, join, Vec::new()),
    ];
    fill(&mut ctx, then, insts);

    let insts = vec![
        LirInst::label(&mut ctx, Vec::new()),
        LirInst::ret(&mut ctx, vec![Operand::Var(a)]),
    ];
    fill(&mut ctx, join, insts);

    func.finalize_cfg(&mut ctx);

    CriticalEdge {
        ctx,
        func,
        entry,
        then,
        join,
        a,
        c,
    }
}
