//! Structural checks over a rewritten function.
//!
//! Run after a split on the original function and every worker. Catches
//! the mistakes a rewrite can introduce without type information:
//! dangling block references, misplaced terminators, parameters leaking
//! across function boundaries.

use rustc_hash::FxHashSet;

use crate::error::DswpError;
use crate::ir::{BlockId, FuncId, InstrKind, Module, Value};

/// Verify the block structure of `func`.
///
/// # Errors
///
/// `InvariantViolation` describing the first problem found.
pub fn verify_function(module: &Module, func: FuncId) -> Result<(), DswpError> {
    let f = module.func(func);
    let fail = |what: String| Err(DswpError::invariant(format!("in `{}`: {what}", f.name)));

    if f.external {
        if !f.blocks.is_empty() {
            return fail("declaration has blocks".to_owned());
        }
        return Ok(());
    }
    if f.blocks.is_empty() {
        return fail("function has no blocks".to_owned());
    }

    let own: FxHashSet<BlockId> = f.blocks.iter().copied().collect();
    if own.len() != f.blocks.len() {
        return fail("a block appears twice in the layout".to_owned());
    }

    for &block in &f.blocks {
        let b = module.block(block);
        if b.func != func {
            return fail(format!("block `{}` belongs to another function", b.name));
        }
        let Some((&last, body)) = b.instrs.split_last() else {
            return fail(format!("block `{}` is empty", b.name));
        };
        if !module.instr(last).kind.is_terminator() {
            return fail(format!("block `{}` does not end in a terminator", b.name));
        }
        if let Some(&early) = body.iter().find(|&&id| module.instr(id).kind.is_terminator()) {
            return fail(format!(
                "block `{}` has terminator {early} before its end",
                b.name
            ));
        }

        for &id in &b.instrs {
            let instr = module.instr(id);
            if instr.block != Some(block) {
                return fail(format!("{id} is listed in `{}` but placed elsewhere", b.name));
            }
            for target in instr.kind.successors() {
                if !own.contains(&target) {
                    return fail(format!(
                        "`{}` branches to `{}` outside the function",
                        b.name,
                        module.block(target).name
                    ));
                }
            }
            if let InstrKind::Phi { incoming } = &instr.kind {
                if let Some(&(_, pred)) = incoming.iter().find(|(_, p)| !own.contains(p)) {
                    return fail(format!(
                        "φ {id} names predecessor `{}` outside the function",
                        module.block(pred).name
                    ));
                }
                for (i, &(value, pred)) in incoming.iter().enumerate() {
                    let clash = incoming[..i].iter().any(|&(v, p)| p == pred && v != value);
                    if clash {
                        return fail(format!(
                            "φ {id} names predecessor `{}` twice with different values",
                            module.block(pred).name
                        ));
                    }
                }
            }
            for op in instr.kind.operands() {
                if let Value::Param { func: owner, index } = op {
                    if owner != func {
                        return fail(format!(
                            "{id} reads parameter {index} of `{}`",
                            module.func(owner).name
                        ));
                    }
                }
            }
        }
    }

    Ok(())
}
