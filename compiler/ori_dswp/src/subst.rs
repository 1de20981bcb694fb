//! Value substitution tables.
//!
//! Both halves of the split rewrite operands through a map built ahead of
//! time: the replacement block maps live-outs to their reloaded values,
//! and each worker maps originals to clones and live-ins to unpacked
//! loads. Building the whole map first and rewriting second keeps the
//! rewrite from observing half-cloned state.

use rustc_hash::FxHashMap;

use crate::ir::{InstrId, Module, Value};

/// Original value → replacement value.
#[derive(Clone, Debug, Default)]
pub struct Substitution {
    map: FxHashMap<Value, Value>,
}

impl Substitution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, from: Value, to: Value) {
        self.map.insert(from, to);
    }

    pub fn get(&self, value: Value) -> Option<Value> {
        self.map.get(&value).copied()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Rewrite every operand of `instrs` found in the table. Returns the
    /// number of operand slots changed.
    pub fn apply(&self, module: &mut Module, instrs: impl IntoIterator<Item = InstrId>) -> usize {
        if self.map.is_empty() {
            return 0;
        }
        let mut rewritten = 0;
        for id in instrs {
            module.instr_mut(id).kind.for_each_operand_mut(|op| {
                if let Some(&new) = self.map.get(op) {
                    *op = new;
                    rewritten += 1;
                }
            });
        }
        rewritten
    }
}
