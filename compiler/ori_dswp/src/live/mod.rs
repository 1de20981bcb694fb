//! Live-variable sets of a loop region.
//!
//! Computes three ordered, duplicate-free lists:
//!
//! - **defined**: instructions inside the loop that produce a value
//! - **live-out**: defined values with at least one user outside the loop
//! - **live-in**: instruction results and parameters read inside the loop
//!   but defined outside it
//!
//! # Algorithm
//!
//! Two forward scans over the loop blocks, not a dataflow fixpoint:
//!
//! 1. Every value-producing instruction joins `defined`. Its users are
//!    looked up in a [`UseIndex`]; the first user outside the loop puts it
//!    into `live_out` (once).
//! 2. Every variable operand that is not in `defined` joins `live_in` the
//!    first time it is seen.
//!
//! This is a syntactic approximation. It is exact for loops whose only
//! entry is the header; irreducible loops are out of scope.

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::error::DswpError;
use crate::ir::{InstrId, Module, Value};
use crate::partition::Loop;

/// Def-use index: for each variable value, the instructions reading it.
///
/// Built by scanning the whole instruction arena, detached instructions
/// included, so that uses outside any block are visible to callers.
pub struct UseIndex {
    users: FxHashMap<Value, SmallVec<[InstrId; 4]>>,
}

impl UseIndex {
    pub fn build(module: &Module) -> Self {
        let mut users: FxHashMap<Value, SmallVec<[InstrId; 4]>> = FxHashMap::default();
        for id in module.instr_ids() {
            for op in module.instr(id).kind.operands() {
                if !op.is_variable() {
                    continue;
                }
                let list = users.entry(op).or_default();
                // An instruction reading a value twice is one user.
                if list.last() != Some(&id) {
                    list.push(id);
                }
            }
        }
        Self { users }
    }

    /// Instructions reading `value`, in arena order.
    pub fn users(&self, value: Value) -> &[InstrId] {
        self.users.get(&value).map_or(&[], |list| list.as_slice())
    }
}

/// Result of [`compute_live_sets`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LiveSets {
    /// Value-producing loop instructions, in definition order.
    pub defined: Vec<InstrId>,
    /// Values flowing into the loop, in first-use order.
    pub live_in: Vec<Value>,
    /// Loop values used after the loop, in definition order.
    pub live_out: Vec<InstrId>,
}

/// Compute the live sets of `lp`.
///
/// # Errors
///
/// `MalformedUse` if a value defined in the loop is read by an instruction
/// that is not placed in any block.
pub fn compute_live_sets(module: &Module, lp: &Loop) -> Result<LiveSets, DswpError> {
    let uses = UseIndex::build(module);
    let mut sets = LiveSets::default();

    // Pass 1: definitions and escaping values.
    let mut defined = FxHashSet::default();
    for &block in lp.blocks() {
        for &id in &module.block(block).instrs {
            if module.instr(id).has_result() {
                sets.defined.push(id);
                defined.insert(id);
            }

            let mut escapes = false;
            for &user in uses.users(Value::Instr(id)) {
                let Some(user_block) = module.instr(user).block else {
                    return Err(DswpError::MalformedUse {
                        value: module.value_name(Value::Instr(id)),
                    });
                };
                if !escapes && !lp.contains(user_block) {
                    sets.live_out.push(id);
                    escapes = true;
                }
            }
        }
    }

    // Pass 2: values read in the loop but defined elsewhere.
    let mut seen = FxHashSet::default();
    for &block in lp.blocks() {
        for &id in &module.block(block).instrs {
            for op in module.instr(id).kind.operands() {
                if !op.is_variable() {
                    continue;
                }
                if op.as_instr().is_some_and(|def| defined.contains(&def)) {
                    continue;
                }
                if seen.insert(op) {
                    sets.live_in.push(op);
                }
            }
        }
    }

    tracing::debug!(
        defined = sets.defined.len(),
        live_in = sets.live_in.len(),
        live_out = sets.live_out.len(),
        "computed loop live sets"
    );

    Ok(sets)
}
