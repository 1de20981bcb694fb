//! Replacement block synthesis.
//!
//! Builds the block that stands in for the loop in the original function:
//!
//! ```text
//! loop-replace:
//!   %argstruct = alloca argstruct_N_ty
//!   store livein_i -> field i            ; one per live-in
//!   call sync_init()
//!   %cast = cast %argstruct to ptr
//!   call sync_delegate(t, N_subloop_t, %cast)  ; one per thread
//!   call sync_join()
//!   %out = fieldaddr %argstruct, k        ; only with live-outs
//!   %liveout_j_load = load field j of %out
//!   br exit
//! ```
//!
//! Every edge from outside the loop into the header is redirected here,
//! and every use of a live-out outside the loop reads the reloaded value.
//! The loop blocks themselves stay in place, unreachable from the entry.

use crate::error::DswpError;
use crate::ir::{BlockId, FuncId, InstrId, InstrKind, Module, Ty, Value};
use crate::layout::Layouts;
use crate::pass::SplitContext;
use crate::subst::Substitution;

/// What the synthesizer created.
#[derive(Clone, Debug)]
pub struct Replacement {
    /// The block replacing the loop entry.
    pub block: BlockId,
    /// Worker function per thread slot, indexed by thread.
    pub workers: Vec<FuncId>,
    pub layouts: Layouts,
    /// Outside edges retargeted from the header to `block`.
    pub redirected_edges: usize,
}

/// Build the replacement block, the worker declarations and the layouts.
///
/// # Errors
///
/// `InvariantViolation` if the exit block is inside the loop or not part of
/// the function, if an exit φ has more than one incoming edge from the
/// loop, or if a worker name is already taken.
pub(crate) fn synthesize(
    module: &mut Module,
    ctx: &SplitContext<'_>,
) -> Result<Replacement, DswpError> {
    let exit = ctx.lp.exit();
    if ctx.lp.contains(exit) {
        return Err(DswpError::invariant(format!(
            "exit block `{}` is inside the loop",
            module.block(exit).name
        )));
    }
    let Some(exit_pos) = module.func(ctx.func).blocks.iter().position(|&b| b == exit) else {
        return Err(DswpError::invariant(format!(
            "exit block `{}` does not belong to `{}`",
            module.block(exit).name,
            module.func(ctx.func).name
        )));
    };

    check_exit_phis(module, ctx)?;

    let block = module.insert_block_at(ctx.func, exit_pos, "loop-replace");
    let redirected_edges = redirect_entry_edges(module, ctx, block);
    retarget_exit_phis(module, ctx, block);

    let workers = declare_workers(module, ctx)?;
    let layouts = Layouts::build(module, ctx.loop_id, &ctx.live);

    let arg_struct = marshal_live_ins(module, ctx, block, &layouts);
    emit_dispatch(module, ctx, block, arg_struct, &workers);
    if !ctx.live.live_out.is_empty() {
        unmarshal_live_outs(module, ctx, block, arg_struct, &layouts);
    }
    module.append_instr(block, InstrKind::Br { target: exit }, Ty::Void, None);

    tracing::debug!(
        loop_id = ctx.loop_id,
        redirected_edges,
        workers = workers.len(),
        live_in = ctx.live.live_in.len(),
        live_out = ctx.live.live_out.len(),
        "synthesized replacement block"
    );

    Ok(Replacement {
        block,
        workers,
        layouts,
        redirected_edges,
    })
}

/// Point every outside branch to the header at `replacement` instead.
/// Back edges inside the loop keep targeting the header.
fn redirect_entry_edges(module: &mut Module, ctx: &SplitContext<'_>, replacement: BlockId) -> usize {
    let header = ctx.lp.header();
    let mut redirected = 0;
    for block in module.func(ctx.func).blocks.clone() {
        if block == replacement || ctx.lp.contains(block) {
            continue;
        }
        let Some(term) = module.terminator(block) else {
            continue;
        };
        module.instr_mut(term).kind.for_each_successor_mut(|target| {
            if *target == header {
                *target = replacement;
                redirected += 1;
            }
        });
    }
    redirected
}

/// The replacement block becomes the exit's single predecessor from the
/// loop region, so an exit φ can keep at most one incoming edge from it.
fn check_exit_phis(module: &Module, ctx: &SplitContext<'_>) -> Result<(), DswpError> {
    for &id in &module.block(ctx.lp.exit()).instrs {
        let InstrKind::Phi { incoming } = &module.instr(id).kind else {
            continue;
        };
        let from_loop = incoming
            .iter()
            .filter(|(_, pred)| ctx.lp.contains(*pred))
            .count();
        if from_loop > 1 {
            return Err(DswpError::invariant(format!(
                "exit φ `{}` has {from_loop} incoming edges from the loop",
                module.value_name(Value::Instr(id))
            )));
        }
    }
    Ok(())
}

/// Exit φ-nodes fed from inside the loop are now fed from `replacement`,
/// the exit's only predecessor from the former loop region.
fn retarget_exit_phis(module: &mut Module, ctx: &SplitContext<'_>, replacement: BlockId) {
    for id in module.block(ctx.lp.exit()).instrs.clone() {
        if let InstrKind::Phi { incoming } = &mut module.instr_mut(id).kind {
            for (_, pred) in incoming.iter_mut() {
                if ctx.lp.contains(*pred) {
                    *pred = replacement;
                }
            }
        }
    }
}

/// One `ptr -> ptr` worker per thread slot, named `{loop}_subloop_{thread}`.
fn declare_workers(module: &mut Module, ctx: &SplitContext<'_>) -> Result<Vec<FuncId>, DswpError> {
    ctx.threads()
        .map(|thread| {
            let name = format!("{}_subloop_{}", ctx.loop_id, thread);
            if module.function_by_name(&name).is_some() {
                return Err(DswpError::invariant(format!(
                    "worker function `{name}` already exists"
                )));
            }
            Ok(module.define_function(name, vec![Ty::Ptr], Ty::Ptr))
        })
        .collect()
}

/// Allocate the argument structure and store every live-in into its field.
/// The output region is left uninitialized.
fn marshal_live_ins(
    module: &mut Module,
    ctx: &SplitContext<'_>,
    block: BlockId,
    layouts: &Layouts,
) -> InstrId {
    let arg_struct = module.append_instr(
        block,
        InstrKind::Alloca {
            ty: Ty::Struct(layouts.arg),
        },
        Ty::Ptr,
        Some("argstruct".to_owned()),
    );
    for (i, &value) in ctx.live.live_in.iter().enumerate() {
        let name = module.value_name(value);
        let addr = module.append_instr(
            block,
            InstrKind::FieldAddr {
                base: Value::Instr(arg_struct),
                layout: layouts.arg,
                field: Layouts::field_index(i),
            },
            Ty::Ptr,
            Some(format!("{name}_argptr")),
        );
        module.append_instr(
            block,
            InstrKind::Store {
                value,
                ptr: Value::Instr(addr),
            },
            Ty::Void,
            None,
        );
    }
    arg_struct
}

/// `init`, one `dispatch` per worker, then `join`.
fn emit_dispatch(
    module: &mut Module,
    ctx: &SplitContext<'_>,
    block: BlockId,
    arg_struct: InstrId,
    workers: &[FuncId],
) {
    let runtime = &ctx.config.runtime;
    let init = module.get_or_declare(&runtime.init, vec![], Ty::Void);
    let dispatch = module.get_or_declare(&runtime.dispatch, vec![Ty::I32, Ty::Ptr, Ty::Ptr], Ty::Void);
    let join = module.get_or_declare(&runtime.join, vec![], Ty::Void);

    module.append_instr(
        block,
        InstrKind::Call {
            callee: Value::Func(init),
            args: vec![],
        },
        Ty::Void,
        None,
    );

    let shared = module.append_instr(
        block,
        InstrKind::Cast {
            value: Value::Instr(arg_struct),
        },
        Ty::Ptr,
        Some(format!("argstruct_{}_cast", ctx.loop_id)),
    );

    for (thread, &worker) in ctx.threads().zip(workers) {
        module.append_instr(
            block,
            InstrKind::Call {
                callee: Value::Func(dispatch),
                args: vec![
                    Value::i32(i64::from(thread.raw())),
                    Value::Func(worker),
                    Value::Instr(shared),
                ],
            },
            Ty::Void,
            None,
        );
    }

    module.append_instr(
        block,
        InstrKind::Call {
            callee: Value::Func(join),
            args: vec![],
        },
        Ty::Void,
        None,
    );
}

/// Reload each live-out from the output region and rewrite its uses in
/// blocks outside the loop.
fn unmarshal_live_outs(
    module: &mut Module,
    ctx: &SplitContext<'_>,
    block: BlockId,
    arg_struct: InstrId,
    layouts: &Layouts,
) {
    let out = module.append_instr(
        block,
        InstrKind::FieldAddr {
            base: Value::Instr(arg_struct),
            layout: layouts.arg,
            field: layouts.out_field(),
        },
        Ty::Ptr,
        Some("load_outs".to_owned()),
    );

    let mut replacements = Substitution::new();
    for (j, &live_out) in ctx.live.live_out.iter().enumerate() {
        let value = Value::Instr(live_out);
        let name = module.value_name(value);
        let ty = module.value_type(value);
        let addr = module.append_instr(
            block,
            InstrKind::FieldAddr {
                base: Value::Instr(out),
                layout: layouts.out,
                field: Layouts::field_index(j),
            },
            Ty::Ptr,
            Some(format!("{name}_ptr")),
        );
        let load = module.append_instr(
            block,
            InstrKind::Load {
                ptr: Value::Instr(addr),
            },
            ty,
            Some(format!("{name}_load")),
        );
        replacements.insert(value, Value::Instr(load));
    }

    let outside: Vec<InstrId> = module
        .func(ctx.func)
        .blocks
        .iter()
        .filter(|&&b| b != block && !ctx.lp.contains(b))
        .flat_map(|&b| module.block(b).instrs.iter().copied())
        .collect();
    let rewritten = replacements.apply(module, outside);
    tracing::debug!(rewritten, "rewrote live-out uses after the loop");
}
