use pretty_assertions::assert_eq;

use super::{materialize, WorkerBody};
use crate::config::DswpConfig;
use crate::error::DswpError;
use crate::ir::{BinOp, BlockId, InstrKind, Module, Ty, Value};
use crate::partition::{DependenceGraph, PartitionPlan};
use crate::replace::synthesize;
use crate::test_helpers::{block_named, context, names, sum_loop, t, term, SumLoop};

/// Synthesize the replacement and materialize `thread`'s worker.
fn split_one(
    fx: &mut SumLoop,
    plan: &PartitionPlan,
    config: &DswpConfig,
    thread: u32,
) -> Result<WorkerBody, DswpError> {
    let ctx = context(&fx.module, fx.func, &fx.lp, &fx.deps, plan, config);
    let replacement = synthesize(&mut fx.module, &ctx).unwrap();
    materialize(&mut fx.module, &ctx, &replacement, t(thread))
}

fn block_names(m: &Module, body: &WorkerBody) -> Vec<String> {
    m.func(body.func)
        .blocks
        .iter()
        .map(|&b| m.block(b).name.clone())
        .collect()
}

fn phi_incoming(m: &Module, block: BlockId) -> Vec<(Value, BlockId)> {
    let first = m.block(block).instrs[0];
    match &m.instr(first).kind {
        InstrKind::Phi { incoming } => incoming.clone(),
        other => panic!("expected φ, found {other:?}"),
    }
}

#[test]
fn accumulator_worker_shape() {
    let mut fx = sum_loop();
    let plan = fx.two_stage_plan();
    let body = split_one(&mut fx, &plan, &DswpConfig::default(), 1).unwrap();
    let m = &fx.module;

    assert_eq!(
        block_names(m, &body),
        vec!["new-entry", "header_1", "body_1", "new-exit"]
    );
    assert_eq!(m.func(body.func).name, "0_subloop_1");
    assert_eq!(m.func(body.func).entry(), Some(body.entry));

    // Only the accumulator stage and the terminators are cloned.
    let header_1 = block_named(m, body.func, "header_1");
    let body_1 = block_named(m, body.func, "body_1");
    assert_eq!(names(m, header_1)[0], "acc_1");
    assert_eq!(m.block(header_1).instrs.len(), 2);
    assert_eq!(names(m, body_1)[..2], ["t_1".to_owned(), "acc_next_1".to_owned()]);
    assert_eq!(body.clones.len(), 5);
    assert!(!body.clones.contains_key(&fx.i));
    assert_eq!(body.originals[&body.clones[&fx.t]], fx.t);
}

#[test]
fn entry_unpacks_live_ins_before_branch() {
    let mut fx = sum_loop();
    let plan = fx.two_stage_plan();
    let body = split_one(&mut fx, &plan, &DswpConfig::default(), 0).unwrap();
    let m = &fx.module;

    let entry = m.block(body.entry);
    assert_eq!(
        names(m, body.entry)[..5],
        [
            "args".to_owned(),
            "arg0_arg".to_owned(),
            "arg0_val".to_owned(),
            "arg1_arg".to_owned(),
            "arg1_val".to_owned(),
        ]
    );
    assert_eq!(entry.instrs.len(), 6);
    let header_0 = block_named(m, body.func, "header_0");
    assert_eq!(m.successors(body.entry).as_slice(), &[header_0]);

    let args = entry.instrs[0];
    assert_eq!(
        m.instr(args).kind,
        InstrKind::Cast {
            value: m.param(body.func, 0)
        }
    );
}

#[test]
fn live_in_operands_read_unpacked_values() {
    let mut fx = sum_loop();
    let plan = fx.two_stage_plan();
    let body = split_one(&mut fx, &plan, &DswpConfig::default(), 0).unwrap();
    let m = &fx.module;

    let cond_0 = body.clones[&fx.cond];
    let n_val = m.block(body.entry).instrs[2];
    assert_eq!(
        m.instr(cond_0).kind,
        InstrKind::Cmp {
            pred: crate::ir::CmpPred::Slt,
            lhs: Value::Instr(body.clones[&fx.i]),
            rhs: Value::Instr(n_val),
        }
    );
}

#[test]
fn branch_to_irrelevant_block_falls_back_to_post_dominator() {
    // Thread 1 never touches `latch`; body_1 jumps straight back to header_1.
    let mut fx = sum_loop();
    let plan = fx.two_stage_plan();
    let body = split_one(&mut fx, &plan, &DswpConfig::default(), 1).unwrap();
    let m = &fx.module;

    let body_1 = block_named(m, body.func, "body_1");
    let header_1 = block_named(m, body.func, "header_1");
    assert_eq!(m.successors(body_1).as_slice(), &[header_1]);
    assert_eq!(
        m.successors(header_1).as_slice(),
        &[body_1, body.exit]
    );
}

#[test]
fn phi_from_irrelevant_block_falls_back_to_dominator() {
    let mut fx = sum_loop();
    let plan = fx.two_stage_plan();
    let body = split_one(&mut fx, &plan, &DswpConfig::default(), 1).unwrap();
    let m = &fx.module;

    let header_1 = block_named(m, body.func, "header_1");
    let body_1 = block_named(m, body.func, "body_1");
    assert_eq!(
        phi_incoming(m, header_1),
        vec![
            (Value::i64(0), body.entry),
            (Value::Instr(body.clones[&fx.acc_next]), body_1),
        ]
    );
}

#[test]
fn induction_worker_keeps_its_latch() {
    let mut fx = sum_loop();
    let plan = fx.two_stage_plan();
    let body = split_one(&mut fx, &plan, &DswpConfig::default(), 0).unwrap();
    let m = &fx.module;

    assert_eq!(
        block_names(m, &body),
        vec!["new-entry", "header_0", "body_0", "latch_0", "new-exit"]
    );
    let latch_0 = block_named(m, body.func, "latch_0");
    let header_0 = block_named(m, body.func, "header_0");
    assert_eq!(m.successors(latch_0).as_slice(), &[header_0]);
    assert_eq!(
        phi_incoming(m, header_0)[1],
        (Value::Instr(body.clones[&fx.i_next]), latch_0)
    );
}

#[test]
fn owner_of_live_out_stores_it() {
    let mut fx = sum_loop();
    let plan = fx.two_stage_plan();
    let body = split_one(&mut fx, &plan, &DswpConfig::default(), 1).unwrap();
    let m = &fx.module;

    assert_eq!(
        names(m, body.exit)[..2],
        ["outs".to_owned(), "acc_outptr".to_owned()]
    );
    assert_eq!(body.live_out_stores.len(), 1);
    let InstrKind::Store { value, .. } = m.instr(body.live_out_stores[0]).kind else {
        panic!("live-out store is not a store");
    };
    assert_eq!(value, Value::Instr(body.clones[&fx.acc]));
    assert_eq!(
        m.instr(*m.block(body.exit).instrs.last().unwrap()).kind,
        InstrKind::Ret {
            value: Some(Value::Null)
        }
    );
}

#[test]
fn thread_without_live_outs_only_returns() {
    let mut fx = sum_loop();
    let plan = fx.two_stage_plan();
    let body = split_one(&mut fx, &plan, &DswpConfig::default(), 0).unwrap();
    assert!(body.live_out_stores.is_empty());
    assert_eq!(fx.module.block(body.exit).instrs.len(), 1);
}

#[test]
fn each_live_out_has_a_single_writer() {
    let mut fx = sum_loop();
    // Make `i` escape too, so both threads own a live-out.
    let pos = fx.module.block(fx.exit).instrs.len() - 1;
    fx.module.insert_instr(
        fx.exit,
        pos,
        InstrKind::Binary {
            op: BinOp::Add,
            lhs: Value::Instr(fx.i),
            rhs: Value::Instr(fx.acc),
        },
        Ty::I64,
        Some("mix".to_owned()),
    );
    let plan = fx.two_stage_plan();
    let config = DswpConfig::default();
    let ctx = context(&fx.module, fx.func, &fx.lp, &fx.deps, &plan, &config);
    let replacement = synthesize(&mut fx.module, &ctx).unwrap();
    let bodies: Vec<WorkerBody> = ctx
        .threads()
        .map(|thread| materialize(&mut fx.module, &ctx, &replacement, thread).unwrap())
        .collect();

    let mut writers = vec![0; ctx.live.live_out.len()];
    for body in &bodies {
        for &store in &body.live_out_stores {
            let InstrKind::Store { ptr, .. } = fx.module.instr(store).kind else {
                panic!("not a store");
            };
            let InstrKind::FieldAddr { field, .. } = fx.module.instr(ptr.as_instr().unwrap()).kind
            else {
                panic!("store does not target a field");
            };
            writers[field as usize] += 1;
        }
    }
    assert_eq!(writers, vec![1, 1]);
    assert_eq!(bodies[0].live_out_stores.len(), 1);
    assert_eq!(bodies[1].live_out_stores.len(), 1);
}

#[test]
fn trace_hook_is_called_first() {
    let mut fx = sum_loop();
    let plan = fx.two_stage_plan();
    let config = DswpConfig::default().with_trace_hook("showPlace");
    let body = split_one(&mut fx, &plan, &config, 1).unwrap();
    let m = &fx.module;

    let hook = m.function_by_name("showPlace").unwrap();
    let first = m.block(body.entry).instrs[0];
    assert_eq!(
        m.instr(first).kind,
        InstrKind::Call {
            callee: Value::Func(hook),
            args: vec![],
        }
    );
    assert_eq!(m.instr(m.block(body.entry).instrs[1]).name.as_deref(), Some("args"));
}

// ── Failures ────────────────────────────────────────────────────────

#[test]
fn thread_with_no_sccs_is_empty() {
    let mut fx = sum_loop();
    let plan = fx.single_stage_plan();
    let err = split_one(&mut fx, &plan, &DswpConfig::default(), 1).unwrap_err();
    assert_eq!(err, DswpError::EmptyPartition { thread: t(1) });
}

#[test]
fn header_must_be_relevant() {
    let mut fx = sum_loop();
    // Without dependence edges, thread 1 only touches `body`.
    fx.deps = DependenceGraph::new();
    let mut plan = PartitionPlan::new(2);
    plan.add_scc(
        t(0),
        [
            fx.i,
            fx.acc,
            fx.cond,
            fx.acc_next,
            fx.i_next,
            fx.header_br,
            fx.body_br,
            fx.latch_br,
        ],
    )
    .unwrap();
    plan.add_scc(t(1), [fx.t]).unwrap();

    let err = split_one(&mut fx, &plan, &DswpConfig::default(), 1).unwrap_err();
    assert!(matches!(
        err,
        DswpError::InvariantViolation { ref message } if message.contains("not relevant to thread 1")
    ));
}

#[test]
fn branch_leaving_loop_elsewhere_is_rejected() {
    let mut fx = sum_loop();
    let bail = fx.module.add_block(fx.func, "bail");
    term(&mut fx.module, bail, InstrKind::Ret { value: Some(Value::i64(-1)) });
    fx.module.instr_mut(fx.latch_br).kind = InstrKind::Br { target: bail };

    let plan = fx.two_stage_plan();
    let err = split_one(&mut fx, &plan, &DswpConfig::default(), 0).unwrap_err();
    assert_eq!(err, DswpError::UnexpectedBranchTarget { block: bail });
}

#[test]
fn post_dominator_chain_ending_early_is_broken() {
    let mut fx = sum_loop();
    // `latch` no longer reaches anything, so its post-dominator is the
    // function boundary.
    fx.module.instr_mut(fx.latch_br).kind = InstrKind::Unreachable;

    let plan = fx.two_stage_plan();
    let err = split_one(&mut fx, &plan, &DswpConfig::default(), 1).unwrap_err();
    assert_eq!(err, DswpError::BrokenPostDominance { block: fx.latch });
}

#[test]
fn dominator_chain_ending_early_is_broken() {
    let mut fx = sum_loop();
    // An unreachable predecessor of the header has no dominator.
    let orphan = fx.module.add_block(fx.func, "orphan");
    term(&mut fx.module, orphan, InstrKind::Br { target: fx.header });
    if let InstrKind::Phi { incoming } = &mut fx.module.instr_mut(fx.acc).kind {
        incoming.push((Value::i64(0), orphan));
    }

    let plan = fx.two_stage_plan();
    let err = split_one(&mut fx, &plan, &DswpConfig::default(), 1).unwrap_err();
    assert_eq!(err, DswpError::BrokenDominance { block: orphan });
}

#[test]
fn loaded_field_disagreeing_with_live_in_is_a_type_mismatch() {
    let mut fx = sum_loop();
    let plan = fx.two_stage_plan();
    let config = DswpConfig::default();
    let mut ctx = context(&fx.module, fx.func, &fx.lp, &fx.deps, &plan, &config);
    let replacement = synthesize(&mut fx.module, &ctx).unwrap();

    ctx.live.live_in[0] = Value::i32(7);
    let err = materialize(&mut fx.module, &ctx, &replacement, t(0)).unwrap_err();
    assert_eq!(
        err,
        DswpError::TypeMismatch {
            value: "7".to_owned(),
            expected: Ty::I32,
            found: Ty::I64,
        }
    );
}

#[test]
fn loop_instruction_without_scc_is_rejected() {
    let mut fx = sum_loop();
    let mut plan = PartitionPlan::new(2);
    plan.add_scc(
        t(0),
        [
            fx.i,
            fx.cond,
            fx.i_next,
            fx.header_br,
            fx.body_br,
            fx.latch_br,
        ],
    )
    .unwrap();
    plan.add_scc(t(1), [fx.acc, fx.t]).unwrap();

    let err = split_one(&mut fx, &plan, &DswpConfig::default(), 1).unwrap_err();
    assert!(matches!(
        err,
        DswpError::InvariantViolation { ref message } if message.contains("`acc_next`")
    ));
}

#[test]
fn worker_is_filled_only_once() {
    let mut fx = sum_loop();
    let plan = fx.two_stage_plan();
    let config = DswpConfig::default();
    let ctx = context(&fx.module, fx.func, &fx.lp, &fx.deps, &plan, &config);
    let replacement = synthesize(&mut fx.module, &ctx).unwrap();

    materialize(&mut fx.module, &ctx, &replacement, t(0)).unwrap();
    let err = materialize(&mut fx.module, &ctx, &replacement, t(0)).unwrap_err();
    assert!(matches!(err, DswpError::InvariantViolation { .. }));
}
