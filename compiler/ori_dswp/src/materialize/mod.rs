//! Worker function materialization.
//!
//! Fills the body of one worker from the loop blocks its partition touches.
//! The result is a self-contained function:
//!
//! ```text
//! new-entry:
//!   %args = cast %arg0 to ptr
//!   %x_val = load field i of %args   ; one per live-in
//!   br header_T
//! header_T: ...                      ; clones of the relevant blocks
//! new-exit:
//!   store %y_T -> output field j     ; live-outs owned by thread T
//!   ret null
//! ```
//!
//! # Algorithm
//!
//! 1. Collect the loop blocks holding this thread's instructions or any of
//!    their dependencies.
//! 2. Create the skeleton: entry, one block per relevant block, exit. The
//!    preheader maps to the entry and the loop exit to the exit.
//! 3. Clone the thread's instructions plus every terminator, block by block.
//!    Branch targets missing from the worker are replaced by their nearest
//!    cloned post-dominator; φ predecessors by their nearest cloned
//!    dominator.
//! 4. Unpack live-ins from the argument structure in the entry block.
//! 5. Rewrite operands of the clones through the substitution table, which
//!    by now holds every original → clone and live-in → load pair.
//! 6. Store the thread's live-outs before the final return.
//!
//! Instructions owned by other threads are not cloned. Operands that still
//! name them after step 5 are expected to have been redirected by the
//! upstream synchronization phase.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::DswpError;
use crate::graph::walk_up;
use crate::ir::{BlockId, FuncId, InstrId, InstrKind, Module, Ty, Value};
use crate::layout::Layouts;
use crate::partition::ThreadId;
use crate::pass::SplitContext;
use crate::replace::Replacement;
use crate::subst::Substitution;

/// A materialized worker.
#[derive(Clone, Debug)]
pub struct WorkerBody {
    pub thread: ThreadId,
    pub func: FuncId,
    pub entry: BlockId,
    pub exit: BlockId,
    /// Loop block → its clone. Also maps the preheader to `entry` and the
    /// loop exit to `exit`.
    pub block_map: FxHashMap<BlockId, BlockId>,
    /// Original instruction → clone.
    pub clones: FxHashMap<InstrId, InstrId>,
    /// Clone → original instruction.
    pub originals: FxHashMap<InstrId, InstrId>,
    /// Stores into the output region, in live-out order.
    pub live_out_stores: Vec<InstrId>,
}

/// Fill in the worker of `thread`.
///
/// # Errors
///
/// - `EmptyPartition` if the thread touches no loop block.
/// - `UnexpectedBranchTarget` if a cloned terminator leaves the loop
///   anywhere but the exit.
/// - `BrokenPostDominance` / `BrokenDominance` if a fallback walk runs out.
/// - `TypeMismatch` if the argument layout disagrees with a live-in.
/// - `InvariantViolation` for an irrelevant header, an instruction without
///   SCC, or a worker that is not an empty one-argument function.
pub(crate) fn materialize(
    module: &mut Module,
    ctx: &SplitContext<'_>,
    replacement: &Replacement,
    thread: ThreadId,
) -> Result<WorkerBody, DswpError> {
    let Some(&func) = replacement.workers.get(thread.index()) else {
        return Err(DswpError::invariant(format!("no worker declared for thread {thread}")));
    };
    if !module.func(func).blocks.is_empty() {
        return Err(DswpError::invariant(format!(
            "worker `{}` already has a body",
            module.func(func).name
        )));
    }
    if module.func(func).params.len() != 1 {
        return Err(DswpError::invariant(format!(
            "worker `{}` must take exactly one argument",
            module.func(func).name
        )));
    }

    let relevant = relevant_blocks(module, ctx, thread)?;
    let mut body = build_skeleton(module, ctx, func, thread, &relevant);

    let mut subst = Substitution::new();
    let cloned = clone_filtered(module, ctx, thread, &relevant, &mut body, &mut subst)?;

    let args = unpack_arguments(module, ctx, &replacement.layouts, &body, &mut subst)?;
    let rewritten = subst.apply(module, cloned.iter().copied());

    body.live_out_stores =
        store_live_outs(module, ctx, &replacement.layouts, &body, args, &subst)?;

    tracing::debug!(
        worker = %module.func(func).name,
        %thread,
        blocks = relevant.len(),
        cloned = cloned.len(),
        rewritten,
        stores = body.live_out_stores.len(),
        "materialized worker"
    );
    tracing::trace!("{}", module.display_function(func));

    Ok(body)
}

/// Loop blocks owning an instruction of `thread`, or a dependency of one,
/// in loop order.
fn relevant_blocks(
    module: &Module,
    ctx: &SplitContext<'_>,
    thread: ThreadId,
) -> Result<Vec<BlockId>, DswpError> {
    let mut relevant = FxHashSet::default();
    for &scc in ctx.plan.part(thread) {
        for &instr in ctx.plan.members(scc) {
            if let Some(block) = module.instr(instr).block {
                relevant.insert(block);
            }
            for edge in ctx.deps.dependencies_of(instr) {
                if let Some(block) = module.instr(edge.dependency).block {
                    tracing::trace!(
                        dependent = %edge.dependent,
                        dependency = %edge.dependency,
                        kind = ?edge.kind,
                        "dependency pulls in {block}"
                    );
                    relevant.insert(block);
                }
            }
        }
    }

    // Blocks outside the loop only contribute live-ins, which arrive
    // through the argument structure.
    let ordered: Vec<BlockId> = ctx
        .lp
        .blocks()
        .iter()
        .copied()
        .filter(|b| relevant.contains(b))
        .collect();

    if ordered.is_empty() {
        return Err(DswpError::EmptyPartition { thread });
    }
    if !relevant.contains(&ctx.lp.header()) {
        return Err(DswpError::invariant(format!(
            "loop header `{}` is not relevant to thread {thread}",
            module.block(ctx.lp.header()).name
        )));
    }
    Ok(ordered)
}

/// Entry, one fresh block per relevant block, exit; entry jumps to the
/// header clone and exit returns null.
fn build_skeleton(
    module: &mut Module,
    ctx: &SplitContext<'_>,
    func: FuncId,
    thread: ThreadId,
    relevant: &[BlockId],
) -> WorkerBody {
    let entry = module.add_block(func, "new-entry");
    let mut block_map = FxHashMap::default();
    for &block in relevant {
        let name = format!("{}_{}", module.block(block).name, thread);
        block_map.insert(block, module.add_block(func, name));
    }
    let exit = module.add_block(func, "new-exit");
    block_map.insert(ctx.lp.preheader(), entry);
    block_map.insert(ctx.lp.exit(), exit);

    // relevant_blocks guarantees the header is present.
    let header = block_map[&ctx.lp.header()];
    module.append_instr(entry, InstrKind::Br { target: header }, Ty::Void, None);
    module.append_instr(
        exit,
        InstrKind::Ret {
            value: Some(Value::Null),
        },
        Ty::Void,
        None,
    );

    WorkerBody {
        thread,
        func,
        entry,
        exit,
        block_map,
        clones: FxHashMap::default(),
        originals: FxHashMap::default(),
        live_out_stores: Vec::new(),
    }
}

/// Clone the thread's instructions and all terminators into the skeleton,
/// remapping block references as we go. Returns the clones in order.
fn clone_filtered(
    module: &mut Module,
    ctx: &SplitContext<'_>,
    thread: ThreadId,
    relevant: &[BlockId],
    body: &mut WorkerBody,
    subst: &mut Substitution,
) -> Result<Vec<InstrId>, DswpError> {
    let mut cloned = Vec::new();
    for &block in relevant {
        let new_block = body.block_map[&block];
        for id in module.block(block).instrs.clone() {
            let original = module.instr(id);
            if !original.kind.is_terminator() {
                match ctx.plan.thread_of_instr(id) {
                    Some(owner) if owner == thread => {}
                    Some(_) => continue,
                    None => {
                        return Err(DswpError::invariant(format!(
                            "`{}` in loop block `{}` belongs to no SCC",
                            module.value_name(Value::Instr(id)),
                            module.block(block).name
                        )));
                    }
                }
            }

            let mut kind = original.kind.clone();
            let ty = original.ty;
            let name = original.name.as_ref().map(|n| format!("{n}_{thread}"));
            remap_successors(&mut kind, ctx, &body.block_map)?;
            remap_phi_predecessors(&mut kind, ctx, &body.block_map)?;

            let clone = module.append_instr(new_block, kind, ty, name);
            body.clones.insert(id, clone);
            body.originals.insert(clone, id);
            subst.insert(Value::Instr(id), Value::Instr(clone));
            cloned.push(clone);
        }
    }
    Ok(cloned)
}

/// Point each successor at its clone, or at the nearest post-dominator
/// that has one.
fn remap_successors(
    kind: &mut InstrKind,
    ctx: &SplitContext<'_>,
    block_map: &FxHashMap<BlockId, BlockId>,
) -> Result<(), DswpError> {
    kind.try_for_each_successor_mut(|target| {
        let original = *target;
        if original != ctx.lp.exit() && !ctx.lp.contains(original) {
            return Err(DswpError::UnexpectedBranchTarget { block: original });
        }
        *target = walk_up(
            original,
            ctx.walk_cap,
            |b| ctx.dom.ipdom(b),
            |b| block_map.get(&b).copied(),
        )
        .map_err(|block| DswpError::BrokenPostDominance { block })?;
        Ok(())
    })
}

/// Point each φ predecessor at its clone, or at the nearest dominator that
/// has one. Incoming values are rewritten later with everything else.
fn remap_phi_predecessors(
    kind: &mut InstrKind,
    ctx: &SplitContext<'_>,
    block_map: &FxHashMap<BlockId, BlockId>,
) -> Result<(), DswpError> {
    let InstrKind::Phi { incoming } = kind else {
        return Ok(());
    };
    for (_, pred) in incoming.iter_mut() {
        *pred = walk_up(
            *pred,
            ctx.walk_cap,
            |b| ctx.dom.idom(b),
            |b| block_map.get(&b).copied(),
        )
        .map_err(|block| DswpError::BrokenDominance { block })?;
    }
    Ok(())
}

/// Cast the worker's parameter to the argument layout and load every
/// live-in, in layout order, just before the jump into the header.
/// Returns the cast pointer.
fn unpack_arguments(
    module: &mut Module,
    ctx: &SplitContext<'_>,
    layouts: &Layouts,
    body: &WorkerBody,
    subst: &mut Substitution,
) -> Result<InstrId, DswpError> {
    let entry = body.entry;

    if let Some(hook) = &ctx.config.trace_hook {
        let hook = module.get_or_declare(hook, vec![], Ty::Void);
        module.insert_before_terminator(
            entry,
            InstrKind::Call {
                callee: Value::Func(hook),
                args: vec![],
            },
            Ty::Void,
            None,
        );
    }

    let param = module.param(body.func, 0);
    let args = module.insert_before_terminator(
        entry,
        InstrKind::Cast { value: param },
        Ty::Ptr,
        Some("args".to_owned()),
    );

    for (j, &live_in) in ctx.live.live_in.iter().enumerate() {
        let name = module.value_name(live_in);
        let Some(&field_ty) = module.struct_def(layouts.arg).fields.get(j) else {
            return Err(DswpError::invariant(format!(
                "argument layout has no field for live-in `{name}`"
            )));
        };
        let addr = module.insert_before_terminator(
            entry,
            InstrKind::FieldAddr {
                base: Value::Instr(args),
                layout: layouts.arg,
                field: Layouts::field_index(j),
            },
            Ty::Ptr,
            Some(format!("{name}_arg")),
        );
        let load = module.insert_before_terminator(
            entry,
            InstrKind::Load {
                ptr: Value::Instr(addr),
            },
            field_ty,
            Some(format!("{name}_val")),
        );
        // The layout is built from these live-ins, so only a layout that
        // drifted from the live sets can trip this.
        let loaded = module.value_type(Value::Instr(load));
        let declared = module.value_type(live_in);
        if loaded != declared {
            return Err(DswpError::TypeMismatch {
                value: name,
                expected: declared,
                found: loaded,
            });
        }
        subst.insert(live_in, Value::Instr(load));
    }

    Ok(args)
}

/// Store every live-out owned by this thread into the output region,
/// right before the final return.
fn store_live_outs(
    module: &mut Module,
    ctx: &SplitContext<'_>,
    layouts: &Layouts,
    body: &WorkerBody,
    args: InstrId,
    subst: &Substitution,
) -> Result<Vec<InstrId>, DswpError> {
    let owned: Vec<(usize, InstrId)> = ctx
        .live
        .live_out
        .iter()
        .copied()
        .enumerate()
        .filter(|&(_, id)| ctx.plan.thread_of_instr(id) == Some(body.thread))
        .collect();
    if owned.is_empty() {
        return Ok(Vec::new());
    }

    let outs = module.insert_before_terminator(
        body.exit,
        InstrKind::FieldAddr {
            base: Value::Instr(args),
            layout: layouts.arg,
            field: layouts.out_field(),
        },
        Ty::Ptr,
        Some("outs".to_owned()),
    );

    let mut stores = Vec::with_capacity(owned.len());
    for (j, id) in owned {
        let name = module.value_name(Value::Instr(id));
        let Some(local) = subst.get(Value::Instr(id)) else {
            return Err(DswpError::invariant(format!(
                "live-out `{name}` belongs to thread {} but was never cloned into it",
                body.thread
            )));
        };
        let addr = module.insert_before_terminator(
            body.exit,
            InstrKind::FieldAddr {
                base: Value::Instr(outs),
                layout: layouts.out,
                field: Layouts::field_index(j),
            },
            Ty::Ptr,
            Some(format!("{name}_outptr")),
        );
        stores.push(module.insert_before_terminator(
            body.exit,
            InstrKind::Store {
                value: local,
                ptr: Value::Instr(addr),
            },
            Ty::Void,
            None,
        ));
    }
    Ok(stores)
}

#[cfg(test)]
mod tests;
