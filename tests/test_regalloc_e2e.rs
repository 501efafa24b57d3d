mod common;

use common::{
    assert_no_vars,
    config_with,
    counting_loop,
    critical_edge,
    diamond,
    fill,
    inserted_moves,
    new_block,
    reg,
    var,
};
use linscan::{
    lir::{LirContext, LirFunc, LirInst, LirInstKind, Operand},
    reg_alloc::{LinearScan, LinearScanConfig, SpillingWalker, StatsAggregator},
};

#[test]
fn test_diamond() {
    let mut d = diamond();
    println!("{}", d.func.display(&d.ctx));

    let aggregator = StatsAggregator::new();
    let stats = LinearScan::new(&mut d.ctx, d.func, LinearScanConfig::default())
        .run(&mut SpillingWalker::new(), &aggregator)
        .unwrap();

    println!("{}", d.func.display(&d.ctx));
    println!("{}", stats);
    assert_no_vars(&d.ctx, d.func);

    let r0 = Operand::Fixed(reg(0));

    // x1 and v share a register, only the constant needs a move
    assert!(inserted_moves(&d.ctx, d.left).is_empty());
    assert_eq!(
        inserted_moves(&d.ctx, d.right),
        vec![(r0, Operand::Const(5))]
    );
    let load = d.left.insts(&d.ctx)[1];
    assert_eq!(load.outputs(&d.ctx), vec![r0]);

    let label = d.merge.first_inst(&d.ctx).unwrap();
    assert!(label.phi_in(&d.ctx).is_empty());
    let ret = d.merge.last_inst(&d.ctx).unwrap();
    assert_eq!(ret.inputs(&d.ctx), vec![r0]);

    assert_eq!(stats.phi_hints_set, 1);
    assert_eq!(stats.phi_resolution_moves, 1);
    assert_eq!(stats.resolution_moves, 1);
    assert_eq!(stats.spill_moves_eliminated, 0);
    assert_eq!(stats.phi_resolution_moves_preserved, 0);

    assert_eq!(aggregator.compilations(), 1);
    assert_eq!(aggregator.snapshot(), stats);
}

#[test]
fn test_counting_loop() {
    let mut l = counting_loop();
    let mut config = LinearScanConfig::default();
    config.detailed_asserts = true;

    let stats = LinearScan::new(&mut l.ctx, l.func, config)
        .run(&mut SpillingWalker::new(), &StatsAggregator::new())
        .unwrap();

    println!("{}", l.func.display(&l.ctx));
    assert_no_vars(&l.ctx, l.func);

    // the hint puts `i` and its increment in one register
    assert_eq!(stats.phi_hints_set, 1);
    assert_eq!(stats.resolution_moves, 0);

    let inc = l.body.insts(&l.ctx)[1];
    let cmp = l.header.insts(&l.ctx)[1];
    assert_eq!(inc.outputs(&l.ctx), cmp.inputs(&l.ctx));
}

#[test]
fn test_counting_loop_with_one_register() {
    let mut l = counting_loop();

    let stats = LinearScan::new(&mut l.ctx, l.func, config_with(&[0]))
        .run(&mut SpillingWalker::new(), &StatsAggregator::new())
        .unwrap();

    println!("{}", l.func.display(&l.ctx));
    assert_no_vars(&l.ctx, l.func);
    assert_eq!(stats.resolution_moves, 0);

    // the condition has no register left
    let branch = l.header.last_inst(&l.ctx).unwrap();
    match branch.kind(&l.ctx) {
        LirInstKind::Branch { cond, .. } => assert!(matches!(cond, Operand::Stack(_))),
        kind => panic!("unexpected terminator {:?}", kind),
    }
}

#[test]
fn test_spill_under_pressure() {
    let mut ctx = LirContext::new();
    let func = LirFunc::new(&mut ctx, "pressure");
    let entry = new_block(&mut ctx, func, "entry", 1.0);

    let a = var(&mut ctx);
    let b = var(&mut ctx);
    let c = var(&mut ctx);

    let insts = vec![
        LirInst::label(&mut ctx, Vec::new()),
        LirInst::op(&mut ctx, "def", vec![Operand::Var(a)], Vec::new()),
        LirInst::op(&mut ctx, "def", vec![Operand::Var(b)], Vec::new()),
        LirInst::op(&mut ctx, "def", vec![Operand::Var(c)], Vec::new()),
        LirInst::op(
            &mut ctx,
            "sum",
            Vec::new(),
            vec![Operand::Var(a), Operand::Var(b), Operand::Var(c)],
        ),
        LirInst::ret(&mut ctx, Vec::new()),
    ];
    fill(&mut ctx, entry, insts);

    LinearScan::new(&mut ctx, func, config_with(&[0, 1]))
        .run(&mut SpillingWalker::new(), &StatsAggregator::new())
        .unwrap();

    println!("{}", func.display(&ctx));
    assert_no_vars(&ctx, func);

    let sum = entry.insts(&ctx)[4];
    assert_eq!(
        sum.inputs(&ctx)[..2],
        [Operand::Fixed(reg(0)), Operand::Fixed(reg(1))]
    );
    assert!(matches!(sum.inputs(&ctx)[2], Operand::Stack(_)));
}

#[test]
fn test_value_across_call() {
    let mut e = critical_edge();

    LinearScan::new(&mut e.ctx, e.func, LinearScanConfig::default())
        .run(&mut SpillingWalker::new(), &StatsAggregator::new())
        .unwrap();

    println!("{}", e.func.display(&e.ctx));
    assert_no_vars(&e.ctx, e.func);

    // the first register not destroyed by the call
    let ret = e.join.last_inst(&e.ctx).unwrap();
    assert_eq!(ret.inputs(&e.ctx), vec![Operand::Fixed(reg(4))]);
    assert_eq!(e.func.blocks(&e.ctx).len(), 4);
}

#[test]
fn test_allocated_function_is_stable() {
    let mut d = diamond();

    LinearScan::new(&mut d.ctx, d.func, LinearScanConfig::default())
        .run(&mut SpillingWalker::new(), &StatsAggregator::new())
        .unwrap();

    // the phi values are gone, nothing is left to allocate
    let stats = LinearScan::new(&mut d.ctx, d.func, LinearScanConfig::default())
        .run(&mut SpillingWalker::new(), &StatsAggregator::new())
        .unwrap();
    assert_eq!(stats.resolution_moves, 0);
    assert_eq!(stats.phi_resolution_moves, 0);
    assert_no_vars(&d.ctx, d.func);
}
