//! Loop-splitting IR: an SSA basic-block representation owned by a [`Module`].
//!
//! Every function, block, instruction and aggregate layout lives in a
//! module-wide arena and is addressed by a stable `u32` index. Passes never
//! hold references into the arena across mutations; they copy IDs, look the
//! node up, and write back. Cloning a loop body into a worker function is
//! therefore a plain push onto the instruction arena followed by a relink
//! pass over the new IDs.
//!
//! # Architecture
//!
//! - **[`Module`]**: owns the arenas and the editing API
//! - **[`Function`]**: signature plus block layout order
//! - **[`Block`]**: ordered instruction list; the last slot holds the terminator
//! - **[`Instr`]**: an operation, its result type and its owning block
//! - **[`Value`]**: an operand (instruction result, parameter, constant or function)
//!
//! Terminators are ordinary instructions ([`InstrKind::is_terminator`]) so the
//! upstream partition can name them like any other instruction.

use std::fmt;

use smallvec::{smallvec, SmallVec};

// ── ID newtypes ─────────────────────────────────────────────────────

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
        #[repr(transparent)]
        pub struct $name(u32);

        impl $name {
            /// Create an ID from a raw arena index.
            #[inline]
            pub fn new(raw: u32) -> Self {
                Self(raw)
            }

            /// Get the raw `u32` value.
            #[inline]
            pub fn raw(self) -> u32 {
                self.0
            }

            /// Get the index as `usize` (for indexing into arenas).
            #[inline]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", $prefix, self.0)
            }
        }
    };
}

define_id!(
    /// Function ID within a [`Module`].
    FuncId,
    "fn"
);
define_id!(
    /// Basic block ID within a [`Module`]. Unique across all functions.
    BlockId,
    "bb"
);
define_id!(
    /// Instruction ID within a [`Module`]. Unique across all functions.
    InstrId,
    "i"
);
define_id!(
    /// Named aggregate layout ID within a [`Module`].
    StructId,
    "struct"
);

fn next_id(len: usize, what: &str) -> u32 {
    u32::try_from(len).unwrap_or_else(|_| panic!("{what} count exceeds u32::MAX"))
}

// ── Types ───────────────────────────────────────────────────────────

/// Value type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum Ty {
    Void,
    /// Integer of the given bit width.
    Int(u8),
    Float,
    /// Opaque pointer.
    Ptr,
    /// Named aggregate from the module's struct registry.
    Struct(StructId),
}

impl Ty {
    pub const I1: Ty = Ty::Int(1);
    pub const I32: Ty = Ty::Int(32);
    pub const I64: Ty = Ty::Int(64);
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Void => f.write_str("void"),
            Ty::Int(bits) => write!(f, "i{bits}"),
            Ty::Float => f.write_str("f64"),
            Ty::Ptr => f.write_str("ptr"),
            Ty::Struct(id) => write!(f, "%{id}"),
        }
    }
}

// ── Values ──────────────────────────────────────────────────────────

/// An instruction operand.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum Value {
    /// Result of an instruction.
    Instr(InstrId),
    /// Formal parameter `index` of `func`.
    Param { func: FuncId, index: u32 },
    /// Integer constant.
    Int { value: i64, ty: Ty },
    /// Null pointer constant.
    Null,
    /// Address of a function.
    Func(FuncId),
}

impl Value {
    /// Shorthand for an `i32` constant.
    pub fn i32(value: i64) -> Self {
        Value::Int { value, ty: Ty::I32 }
    }

    /// Shorthand for an `i64` constant.
    pub fn i64(value: i64) -> Self {
        Value::Int { value, ty: Ty::I64 }
    }

    /// The defining instruction, if this value is an instruction result.
    pub fn as_instr(self) -> Option<InstrId> {
        match self {
            Value::Instr(id) => Some(id),
            _ => None,
        }
    }

    /// Instruction results and parameters carry data between program points;
    /// constants and function addresses do not.
    pub fn is_variable(self) -> bool {
        matches!(self, Value::Instr(_) | Value::Param { .. })
    }
}

// ── Operations ──────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    SDiv,
    And,
    Or,
    Xor,
    Shl,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum CmpPred {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
}

// ── Instructions ────────────────────────────────────────────────────

/// What an instruction does.
///
/// Block references (`Br`, `CondBr`, `Switch` targets and `Phi` incoming
/// blocks) are not [`Value`]s; they are reached through
/// [`successors`](Self::successors) and the φ accessors instead.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum InstrKind {
    Binary {
        op: BinOp,
        lhs: Value,
        rhs: Value,
    },
    Cmp {
        pred: CmpPred,
        lhs: Value,
        rhs: Value,
    },
    /// SSA merge: one `(value, predecessor)` pair per incoming edge.
    Phi {
        incoming: Vec<(Value, BlockId)>,
    },
    /// Stack slot for one value of `ty`. Result is a pointer.
    Alloca {
        ty: Ty,
    },
    Load {
        ptr: Value,
    },
    Store {
        value: Value,
        ptr: Value,
    },
    /// Address of field `field` of the `layout` aggregate at `base`.
    FieldAddr {
        base: Value,
        layout: StructId,
        field: u32,
    },
    /// Pointer cast to the instruction's result type.
    Cast {
        value: Value,
    },
    Call {
        callee: Value,
        args: Vec<Value>,
    },

    // ── Terminators ─────────────────────────────────────────────
    Br {
        target: BlockId,
    },
    CondBr {
        cond: Value,
        then_block: BlockId,
        else_block: BlockId,
    },
    Switch {
        value: Value,
        cases: Vec<(i64, BlockId)>,
        default: BlockId,
    },
    Ret {
        value: Option<Value>,
    },
    Unreachable,
}

impl InstrKind {
    /// Returns `true` for instructions that end a block.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstrKind::Br { .. }
                | InstrKind::CondBr { .. }
                | InstrKind::Switch { .. }
                | InstrKind::Ret { .. }
                | InstrKind::Unreachable
        )
    }

    /// Returns all values read by this instruction, in operand order.
    ///
    /// φ incoming values are included; φ incoming blocks and branch targets
    /// are not.
    pub fn operands(&self) -> SmallVec<[Value; 4]> {
        match self {
            InstrKind::Binary { lhs, rhs, .. } | InstrKind::Cmp { lhs, rhs, .. } => {
                smallvec![*lhs, *rhs]
            }
            InstrKind::Phi { incoming } => incoming.iter().map(|&(v, _)| v).collect(),
            InstrKind::Alloca { .. } | InstrKind::Br { .. } | InstrKind::Unreachable => {
                SmallVec::new()
            }
            InstrKind::Load { ptr } => smallvec![*ptr],
            InstrKind::Store { value, ptr } => smallvec![*value, *ptr],
            InstrKind::FieldAddr { base, .. } => smallvec![*base],
            InstrKind::Cast { value } => smallvec![*value],
            InstrKind::Call { callee, args } => {
                let mut ops = SmallVec::with_capacity(1 + args.len());
                ops.push(*callee);
                ops.extend_from_slice(args);
                ops
            }
            InstrKind::CondBr { cond, .. } => smallvec![*cond],
            InstrKind::Switch { value, .. } => smallvec![*value],
            InstrKind::Ret { value } => value.iter().copied().collect(),
        }
    }

    /// Apply `f` to every operand slot (the same slots [`operands`](Self::operands) reads).
    pub fn for_each_operand_mut(&mut self, mut f: impl FnMut(&mut Value)) {
        match self {
            InstrKind::Binary { lhs, rhs, .. } | InstrKind::Cmp { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            InstrKind::Phi { incoming } => {
                for (v, _) in incoming {
                    f(v);
                }
            }
            InstrKind::Alloca { .. } | InstrKind::Br { .. } | InstrKind::Unreachable => {}
            InstrKind::Load { ptr } => f(ptr),
            InstrKind::Store { value, ptr } => {
                f(value);
                f(ptr);
            }
            InstrKind::FieldAddr { base, .. } => f(base),
            InstrKind::Cast { value } => f(value),
            InstrKind::Call { callee, args } => {
                f(callee);
                for a in args {
                    f(a);
                }
            }
            InstrKind::CondBr { cond, .. } => f(cond),
            InstrKind::Switch { value, .. } => f(value),
            InstrKind::Ret { value } => {
                if let Some(v) = value {
                    f(v);
                }
            }
        }
    }

    /// Successor blocks of a terminator; empty for everything else.
    ///
    /// Duplicates are kept (a `CondBr` with both arms on one block yields it
    /// twice) so callers can rewrite slot by slot.
    pub fn successors(&self) -> SmallVec<[BlockId; 4]> {
        match self {
            InstrKind::Br { target } => smallvec![*target],
            InstrKind::CondBr {
                then_block,
                else_block,
                ..
            } => smallvec![*then_block, *else_block],
            InstrKind::Switch { cases, default, .. } => {
                let mut targets = SmallVec::with_capacity(cases.len() + 1);
                for &(_, b) in cases {
                    targets.push(b);
                }
                targets.push(*default);
                targets
            }
            _ => SmallVec::new(),
        }
    }

    /// Apply `f` to every successor slot of a terminator.
    pub fn for_each_successor_mut(&mut self, mut f: impl FnMut(&mut BlockId)) {
        match self {
            InstrKind::Br { target } => f(target),
            InstrKind::CondBr {
                then_block,
                else_block,
                ..
            } => {
                f(then_block);
                f(else_block);
            }
            InstrKind::Switch { cases, default, .. } => {
                for (_, b) in cases {
                    f(b);
                }
                f(default);
            }
            _ => {}
        }
    }

    /// Fallible variant of [`for_each_successor_mut`](Self::for_each_successor_mut).
    /// Stops at the first error; earlier slots keep their new value.
    pub fn try_for_each_successor_mut<E>(
        &mut self,
        mut f: impl FnMut(&mut BlockId) -> Result<(), E>,
    ) -> Result<(), E> {
        let mut result = Ok(());
        self.for_each_successor_mut(|b| {
            if result.is_ok() {
                result = f(b);
            }
        });
        result
    }
}

/// A single instruction in the module arena.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub struct Instr {
    /// Owning block. `None` only for detached instructions.
    pub block: Option<BlockId>,
    pub kind: InstrKind,
    /// Result type; `Ty::Void` when the instruction produces no value.
    pub ty: Ty,
    pub name: Option<String>,
}

impl Instr {
    /// Returns `true` if this instruction defines a value.
    pub fn has_result(&self) -> bool {
        self.ty != Ty::Void
    }
}

// ── Blocks, functions, layouts ──────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub struct Block {
    pub name: String,
    pub func: FuncId,
    /// Instructions in execution order. The terminator, if any, is last.
    pub instrs: Vec<InstrId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub struct Function {
    pub name: String,
    pub params: Vec<Ty>,
    pub ret: Ty,
    /// Blocks in layout order. `blocks[0]` is the entry.
    pub blocks: Vec<BlockId>,
    /// Declaration only (runtime entry points); never has blocks.
    pub external: bool,
}

impl Function {
    pub fn entry(&self) -> Option<BlockId> {
        self.blocks.first().copied()
    }
}

/// A named aggregate with ordered fields.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub struct StructDef {
    pub name: String,
    pub fields: Vec<Ty>,
}

// ── Module ──────────────────────────────────────────────────────────

/// A compilation unit: the arenas for every IR node.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub struct Module {
    funcs: Vec<Function>,
    blocks: Vec<Block>,
    instrs: Vec<Instr>,
    structs: Vec<StructDef>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Lookup ──────────────────────────────────────────────────

    #[inline]
    pub fn func(&self, id: FuncId) -> &Function {
        &self.funcs[id.index()]
    }

    #[inline]
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    #[inline]
    pub fn instr(&self, id: InstrId) -> &Instr {
        &self.instrs[id.index()]
    }

    #[inline]
    pub fn instr_mut(&mut self, id: InstrId) -> &mut Instr {
        &mut self.instrs[id.index()]
    }

    #[inline]
    pub fn struct_def(&self, id: StructId) -> &StructDef {
        &self.structs[id.index()]
    }

    /// All instruction IDs in the arena, attached or not.
    pub fn instr_ids(&self) -> impl Iterator<Item = InstrId> {
        (0..self.instrs.len()).map(|i| InstrId::new(next_id(i, "instruction")))
    }

    pub fn function_by_name(&self, name: &str) -> Option<FuncId> {
        self.funcs
            .iter()
            .position(|f| f.name == name)
            .map(|i| FuncId::new(next_id(i, "function")))
    }

    /// The block's terminator, if its last instruction is one.
    pub fn terminator(&self, block: BlockId) -> Option<InstrId> {
        let last = *self.block(block).instrs.last()?;
        self.instr(last).kind.is_terminator().then_some(last)
    }

    /// Successor blocks of `block` (through its terminator).
    pub fn successors(&self, block: BlockId) -> SmallVec<[BlockId; 4]> {
        self.terminator(block)
            .map(|t| self.instr(t).kind.successors())
            .unwrap_or_default()
    }

    /// The type a value has when used as an operand.
    pub fn value_type(&self, value: Value) -> Ty {
        match value {
            Value::Instr(id) => self.instr(id).ty,
            Value::Param { func, index } => self.func(func).params[index as usize],
            Value::Int { ty, .. } => ty,
            Value::Null | Value::Func(_) => Ty::Ptr,
        }
    }

    /// Human-readable name for a value, used when deriving names of
    /// generated instructions.
    pub fn value_name(&self, value: Value) -> String {
        match value {
            Value::Instr(id) => self
                .instr(id)
                .name
                .clone()
                .unwrap_or_else(|| format!("v{}", id.raw())),
            Value::Param { index, .. } => format!("arg{index}"),
            Value::Int { value, .. } => value.to_string(),
            Value::Null => "null".to_owned(),
            Value::Func(id) => self.func(id).name.clone(),
        }
    }

    // ── Construction ────────────────────────────────────────────

    /// Add a function with a body to be filled in.
    pub fn define_function(&mut self, name: impl Into<String>, params: Vec<Ty>, ret: Ty) -> FuncId {
        self.push_function(name.into(), params, ret, false)
    }

    /// Add an external declaration.
    pub fn declare_function(
        &mut self,
        name: impl Into<String>,
        params: Vec<Ty>,
        ret: Ty,
    ) -> FuncId {
        self.push_function(name.into(), params, ret, true)
    }

    /// Look a function up by name, declaring it when absent.
    pub fn get_or_declare(&mut self, name: &str, params: Vec<Ty>, ret: Ty) -> FuncId {
        match self.function_by_name(name) {
            Some(id) => id,
            None => self.declare_function(name, params, ret),
        }
    }

    fn push_function(&mut self, name: String, params: Vec<Ty>, ret: Ty, external: bool) -> FuncId {
        let id = FuncId::new(next_id(self.funcs.len(), "function"));
        self.funcs.push(Function {
            name,
            params,
            ret,
            blocks: Vec::new(),
            external,
        });
        id
    }

    pub fn param(&self, func: FuncId, index: u32) -> Value {
        debug_assert!((index as usize) < self.func(func).params.len());
        Value::Param { func, index }
    }

    pub fn add_struct(&mut self, name: impl Into<String>, fields: Vec<Ty>) -> StructId {
        let id = StructId::new(next_id(self.structs.len(), "struct"));
        self.structs.push(StructDef {
            name: name.into(),
            fields,
        });
        id
    }

    /// Append an empty block to the end of `func`'s layout.
    pub fn add_block(&mut self, func: FuncId, name: impl Into<String>) -> BlockId {
        let pos = self.func(func).blocks.len();
        self.insert_block_at(func, pos, name)
    }

    /// Insert an empty block at layout position `pos` of `func`.
    pub fn insert_block_at(&mut self, func: FuncId, pos: usize, name: impl Into<String>) -> BlockId {
        let id = BlockId::new(next_id(self.blocks.len(), "block"));
        self.blocks.push(Block {
            name: name.into(),
            func,
            instrs: Vec::new(),
        });
        self.funcs[func.index()].blocks.insert(pos, id);
        id
    }

    /// Append an instruction to the end of `block`.
    pub fn append_instr(
        &mut self,
        block: BlockId,
        kind: InstrKind,
        ty: Ty,
        name: Option<String>,
    ) -> InstrId {
        let pos = self.block(block).instrs.len();
        self.insert_instr(block, pos, kind, ty, name)
    }

    /// Insert an instruction at position `pos` of `block`.
    pub fn insert_instr(
        &mut self,
        block: BlockId,
        pos: usize,
        kind: InstrKind,
        ty: Ty,
        name: Option<String>,
    ) -> InstrId {
        let id = self.push_detached(Instr {
            block: None,
            kind,
            ty,
            name,
        });
        self.instrs[id.index()].block = Some(block);
        self.blocks[block.index()].instrs.insert(pos, id);
        id
    }

    /// Insert an instruction right before `block`'s terminator, or at the
    /// end when the block has none yet.
    pub fn insert_before_terminator(
        &mut self,
        block: BlockId,
        kind: InstrKind,
        ty: Ty,
        name: Option<String>,
    ) -> InstrId {
        let len = self.block(block).instrs.len();
        let pos = if self.terminator(block).is_some() {
            len - 1
        } else {
            len
        };
        self.insert_instr(block, pos, kind, ty, name)
    }

    /// Push an instruction into the arena without placing it in a block.
    pub fn push_detached(&mut self, instr: Instr) -> InstrId {
        let id = InstrId::new(next_id(self.instrs.len(), "instruction"));
        self.instrs.push(instr);
        id
    }
}

#[cfg(test)]
mod tests;
