//! Shared test utilities for the split phases.
//!
//! The workhorse is [`sum_loop`], a counted reduction loop split into an
//! induction-variable stage and an accumulator stage. Only compiled in
//! test builds.

use crate::config::DswpConfig;
use crate::graph::DominanceInfo;
use crate::ir::{BinOp, BlockId, CmpPred, FuncId, InstrId, InstrKind, Module, Ty, Value};
use crate::live::compute_live_sets;
use crate::partition::{DepKind, DependenceGraph, Loop, PartitionPlan, ThreadId};
use crate::pass::SplitContext;

/// Shorthand for `ThreadId::new(n)`.
pub(crate) fn t(n: u32) -> ThreadId {
    ThreadId::new(n)
}

/// Append a named value-producing instruction.
pub(crate) fn def(m: &mut Module, block: BlockId, name: &str, kind: InstrKind, ty: Ty) -> InstrId {
    m.append_instr(block, kind, ty, Some(name.to_owned()))
}

/// Append a terminator or other void instruction.
pub(crate) fn term(m: &mut Module, block: BlockId, kind: InstrKind) -> InstrId {
    m.append_instr(block, kind, Ty::Void, None)
}

/// ```text
/// fn sum(n: i64, k: i64) -> i64
/// entry:
///   br header
/// header:
///   %i = phi [0, entry], [%i_next, latch]
///   %acc = phi [0, entry], [%acc_next, latch]
///   %cond = icmp slt %i, %n
///   br %cond, body, exit
/// body:
///   %t = mul %i, %k
///   %acc_next = add %acc, %t
///   %i_next = add %i, 1
///   br latch
/// latch:
///   br header
/// exit:
///   ret %acc
/// ```
#[allow(dead_code, reason = "not every test reads every handle")]
pub(crate) struct SumLoop {
    pub module: Module,
    pub func: FuncId,
    pub entry: BlockId,
    pub header: BlockId,
    pub body: BlockId,
    pub latch: BlockId,
    pub exit: BlockId,
    pub i: InstrId,
    pub acc: InstrId,
    pub cond: InstrId,
    pub header_br: InstrId,
    pub t: InstrId,
    pub acc_next: InstrId,
    pub i_next: InstrId,
    pub body_br: InstrId,
    pub latch_br: InstrId,
    pub ret: InstrId,
    pub lp: Loop,
    pub deps: DependenceGraph,
}

pub(crate) fn sum_loop() -> SumLoop {
    let mut m = Module::new();
    let func = m.define_function("sum", vec![Ty::I64, Ty::I64], Ty::I64);
    let n = m.param(func, 0);
    let k = m.param(func, 1);

    let entry = m.add_block(func, "entry");
    let header = m.add_block(func, "header");
    let body = m.add_block(func, "body");
    let latch = m.add_block(func, "latch");
    let exit = m.add_block(func, "exit");

    term(&mut m, entry, InstrKind::Br { target: header });

    // φ incoming values are patched once the latch values exist.
    let i = def(
        &mut m,
        header,
        "i",
        InstrKind::Phi {
            incoming: vec![(Value::i64(0), entry)],
        },
        Ty::I64,
    );
    let acc = def(
        &mut m,
        header,
        "acc",
        InstrKind::Phi {
            incoming: vec![(Value::i64(0), entry)],
        },
        Ty::I64,
    );
    let cond = def(
        &mut m,
        header,
        "cond",
        InstrKind::Cmp {
            pred: CmpPred::Slt,
            lhs: Value::Instr(i),
            rhs: n,
        },
        Ty::I1,
    );
    let header_br = term(
        &mut m,
        header,
        InstrKind::CondBr {
            cond: Value::Instr(cond),
            then_block: body,
            else_block: exit,
        },
    );

    let t = def(
        &mut m,
        body,
        "t",
        InstrKind::Binary {
            op: BinOp::Mul,
            lhs: Value::Instr(i),
            rhs: k,
        },
        Ty::I64,
    );
    let acc_next = def(
        &mut m,
        body,
        "acc_next",
        InstrKind::Binary {
            op: BinOp::Add,
            lhs: Value::Instr(acc),
            rhs: Value::Instr(t),
        },
        Ty::I64,
    );
    let i_next = def(
        &mut m,
        body,
        "i_next",
        InstrKind::Binary {
            op: BinOp::Add,
            lhs: Value::Instr(i),
            rhs: Value::i64(1),
        },
        Ty::I64,
    );
    let body_br = term(&mut m, body, InstrKind::Br { target: latch });
    let latch_br = term(&mut m, latch, InstrKind::Br { target: header });
    let ret = term(
        &mut m,
        exit,
        InstrKind::Ret {
            value: Some(Value::Instr(acc)),
        },
    );

    for (phi, next) in [(i, i_next), (acc, acc_next)] {
        if let InstrKind::Phi { incoming } = &mut m.instr_mut(phi).kind {
            incoming.push((Value::Instr(next), latch));
        }
    }

    let lp = Loop::new(header, entry, exit, vec![header, body, latch]);

    let mut deps = DependenceGraph::new();
    deps.add_edge(i_next, i, DepKind::Register);
    deps.add_edge(i, i_next, DepKind::Register);
    deps.add_edge(i, cond, DepKind::Register);
    deps.add_edge(cond, header_br, DepKind::Register);
    deps.add_edge(i, t, DepKind::Register);
    deps.add_edge(t, acc_next, DepKind::Register);
    deps.add_edge(acc, acc_next, DepKind::Register);
    deps.add_edge(acc_next, acc, DepKind::Register);
    for guarded in [t, acc_next, i_next, body_br] {
        deps.add_edge(header_br, guarded, DepKind::Control);
    }

    SumLoop {
        module: m,
        func,
        entry,
        header,
        body,
        latch,
        exit,
        i,
        acc,
        cond,
        header_br,
        t,
        acc_next,
        i_next,
        body_br,
        latch_br,
        ret,
        lp,
        deps,
    }
}

impl SumLoop {
    /// Induction stage plus every terminator on thread 0, accumulator
    /// stage on thread 1.
    pub(crate) fn two_stage_plan(&self) -> PartitionPlan {
        let mut plan = PartitionPlan::new(2);
        plan.add_scc(
            t(0),
            [
                self.i,
                self.cond,
                self.i_next,
                self.header_br,
                self.body_br,
                self.latch_br,
            ],
        )
        .unwrap();
        plan.add_scc(t(1), [self.acc, self.t, self.acc_next]).unwrap();
        plan
    }

    /// Every SCC on thread 0; thread 1 gets nothing.
    pub(crate) fn single_stage_plan(&self) -> PartitionPlan {
        let mut plan = PartitionPlan::new(2);
        plan.add_scc(
            t(0),
            [
                self.i,
                self.cond,
                self.i_next,
                self.header_br,
                self.body_br,
                self.latch_br,
            ],
        )
        .unwrap();
        plan.add_scc(t(0), [self.acc, self.t, self.acc_next]).unwrap();
        plan
    }
}

/// Build a context by hand, the way [`DswpPass`](crate::pass::DswpPass)
/// does, so phases can be driven one at a time.
pub(crate) fn context<'a>(
    module: &Module,
    func: FuncId,
    lp: &'a Loop,
    deps: &'a DependenceGraph,
    plan: &'a PartitionPlan,
    config: &'a DswpConfig,
) -> SplitContext<'a> {
    SplitContext {
        func,
        lp,
        deps,
        plan,
        config,
        loop_id: 0,
        thread_count: u32::try_from(config.threads).unwrap(),
        live: compute_live_sets(module, lp).unwrap(),
        dom: DominanceInfo::compute(module, func),
        walk_cap: module.func(func).blocks.len() + 1,
    }
}

/// Instructions of `block`, rendered through the printer's value names.
pub(crate) fn names(m: &Module, block: BlockId) -> Vec<String> {
    m.block(block)
        .instrs
        .iter()
        .map(|&id| m.value_name(Value::Instr(id)))
        .collect()
}

/// Find a block of `func` by name.
pub(crate) fn block_named(m: &Module, func: FuncId, name: &str) -> BlockId {
    *m.func(func)
        .blocks
        .iter()
        .find(|&&b| m.block(b).name == name)
        .unwrap_or_else(|| panic!("no block `{name}` in `{}`", m.func(func).name))
}
