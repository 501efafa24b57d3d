//! The allocator demo executable.
//!
//! Builds a diamond merging a variable and a constant into one phi value,
//! allocates it and prints the function before and after.

use clap::{Arg, ArgAction, Command};
use linscan::{
    lir::{LirBlock, LirContext, LirFunc, LirInst, Operand, RegKind},
    reg_alloc::{stats, LinearScan, LinearScanConfig, SpillingWalker},
};

fn diamond(ctx: &mut LirContext) -> LirFunc {
    let func = LirFunc::new(ctx, "diamond");

    let entry = LirBlock::new(ctx, "entry", 1.0);
    let left = LirBlock::new(ctx, "left", 0.9);
    let right = LirBlock::new(ctx, "right", 0.1);
    let merge = LirBlock::new(ctx, "merge", 1.0);

    let cond = ctx.new_vreg(RegKind::General);
    let x1 = ctx.new_vreg(RegKind::General);
    let v = ctx.new_vreg(RegKind::General);

    let insts = [
        LirInst::label(ctx, Vec::new()),
        LirInst::op(ctx, "cond", vec![Operand::Var(cond)], Vec::new()),
        LirInst::branch(ctx, cond, left, right),
    ];
    for inst in insts {
        entry.push_inst(ctx, inst);
    }

    let insts = [
        LirInst::label(ctx, Vec::new()),
        LirInst::op(ctx, "load", vec![Operand::Var(x1)], Vec::new()),
        LirInst::jump(ctx, merge, vec![Operand::Var(x1)]),
    ];
    for inst in insts {
        left.push_inst(ctx, inst);
    }

    let insts = [
        LirInst::label(ctx, Vec::new()),
        LirInst::jump(ctx, merge, vec![Operand::Const(5)]),
    ];
    for inst in insts {
        right.push_inst(ctx, inst);
    }

    let insts = [
        LirInst::label(ctx, vec![Operand::Var(v)]),
        LirInst::ret(ctx, vec![Operand::Var(v)]),
    ];
    for inst in insts {
        merge.push_inst(ctx, inst);
    }

    for block in [entry, left, right, merge] {
        func.push_block(ctx, block);
    }
    func.finalize_cfg(ctx);

    func
}

fn main() {
    let matches = Command::new("lsra")
        .about("Linear scan register allocation on a sample function")
        .args(LinearScanConfig::cli_args())
        .arg(
            Arg::new("intervals")
                .long("intervals")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let config = LinearScanConfig::from_arg_matches(&matches);

    let mut ctx = LirContext::new();
    let func = diamond(&mut ctx);

    println!("{}", func.display(&ctx));

    if matches.get_flag("intervals") {
        // the analyses alone, to show the intervals before the walk
        let mut preview = LinearScan::new(&mut ctx, func, config.clone());
        let built = preview
            .number_instructions()
            .and_then(|_| preview.compute_liveness())
            .and_then(|_| preview.build_intervals());
        match built {
            Ok(()) => println!("{}", preview.intervals().display()),
            Err(err) => {
                eprintln!("error: {}", err);
                std::process::exit(1);
            }
        }
    }

    let alloc = LinearScan::new(&mut ctx, func, config);
    match alloc.run(&mut SpillingWalker::new(), stats::global()) {
        Ok(stats) => {
            println!("{}", func.display(&ctx));
            print!("{}", stats);
        }
        Err(err) => {
            eprintln!("error: {}", err);
            std::process::exit(1);
        }
    }
}
