//! Textual dump of IR functions, used by trace logging and test failure
//! messages.
//!
//! ```text
//! define ptr @0_subloop_1(ptr %arg0) {
//! new-entry:
//!   %args = cast ptr %arg0
//!   br label %header_1
//! ...
//! }
//! ```

use std::fmt;

use crate::ir::{BinOp, BlockId, CmpPred, FuncId, Instr, InstrKind, Module, Ty, Value};

/// `Display` adapter returned by [`Module::display_function`].
pub struct FunctionDisplay<'a> {
    module: &'a Module,
    func: FuncId,
}

impl Module {
    pub fn display_function(&self, func: FuncId) -> FunctionDisplay<'_> {
        FunctionDisplay { module: self, func }
    }
}

impl fmt::Display for FunctionDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.module;
        let func = m.func(self.func);
        let keyword = if func.external { "declare" } else { "define" };
        write!(f, "{keyword} ")?;
        fmt_ty(m, func.ret, f)?;
        write!(f, " @{}(", func.name)?;
        for (i, &ty) in func.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            fmt_ty(m, ty, f)?;
            write!(f, " %arg{i}")?;
        }
        f.write_str(")")?;
        if func.external {
            return writeln!(f);
        }
        writeln!(f, " {{")?;
        for &block in &func.blocks {
            writeln!(f, "{}:", m.block(block).name)?;
            for &id in &m.block(block).instrs {
                f.write_str("  ")?;
                let instr = m.instr(id);
                if instr.has_result() {
                    write!(f, "%{} = ", m.value_name(Value::Instr(id)))?;
                }
                fmt_instr(m, instr, f)?;
                writeln!(f)?;
            }
        }
        writeln!(f, "}}")
    }
}

fn fmt_ty(m: &Module, ty: Ty, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match ty {
        Ty::Struct(id) => write!(f, "%{}", m.struct_def(id).name),
        other => write!(f, "{other}"),
    }
}

fn fmt_value(m: &Module, value: Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match value {
        Value::Instr(_) | Value::Param { .. } => write!(f, "%{}", m.value_name(value)),
        Value::Int { value, ty } => {
            fmt_ty(m, ty, f)?;
            write!(f, " {value}")
        }
        Value::Null => f.write_str("null"),
        Value::Func(id) => write!(f, "@{}", m.func(id).name),
    }
}

fn fmt_values(m: &Module, values: &[Value], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, &v) in values.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        fmt_value(m, v, f)?;
    }
    Ok(())
}

fn binop_name(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "add",
        BinOp::Sub => "sub",
        BinOp::Mul => "mul",
        BinOp::SDiv => "sdiv",
        BinOp::And => "and",
        BinOp::Or => "or",
        BinOp::Xor => "xor",
        BinOp::Shl => "shl",
    }
}

fn pred_name(pred: CmpPred) -> &'static str {
    match pred {
        CmpPred::Eq => "eq",
        CmpPred::Ne => "ne",
        CmpPred::Slt => "slt",
        CmpPred::Sle => "sle",
        CmpPred::Sgt => "sgt",
        CmpPred::Sge => "sge",
    }
}

fn fmt_instr(m: &Module, instr: &Instr, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let label = move |b: BlockId| m.block(b).name.as_str();
    match &instr.kind {
        InstrKind::Binary { op, lhs, rhs } => {
            write!(f, "{} ", binop_name(*op))?;
            fmt_values(m, &[*lhs, *rhs], f)
        }
        InstrKind::Cmp { pred, lhs, rhs } => {
            write!(f, "icmp {} ", pred_name(*pred))?;
            fmt_values(m, &[*lhs, *rhs], f)
        }
        InstrKind::Phi { incoming } => {
            f.write_str("phi ")?;
            fmt_ty(m, instr.ty, f)?;
            for (i, &(v, pred)) in incoming.iter().enumerate() {
                f.write_str(if i == 0 { " [" } else { ", [" })?;
                fmt_value(m, v, f)?;
                write!(f, ", %{}]", label(pred))?;
            }
            Ok(())
        }
        InstrKind::Alloca { ty } => {
            f.write_str("alloca ")?;
            fmt_ty(m, *ty, f)
        }
        InstrKind::Load { ptr } => {
            f.write_str("load ")?;
            fmt_ty(m, instr.ty, f)?;
            f.write_str(", ")?;
            fmt_value(m, *ptr, f)
        }
        InstrKind::Store { value, ptr } => {
            f.write_str("store ")?;
            fmt_values(m, &[*value, *ptr], f)
        }
        InstrKind::FieldAddr { base, layout, field } => {
            write!(f, "fieldaddr %{}, ", m.struct_def(*layout).name)?;
            fmt_value(m, *base, f)?;
            write!(f, ", {field}")
        }
        InstrKind::Cast { value } => {
            f.write_str("cast ")?;
            fmt_ty(m, instr.ty, f)?;
            f.write_str(" ")?;
            fmt_value(m, *value, f)
        }
        InstrKind::Call { callee, args } => {
            f.write_str("call ")?;
            fmt_value(m, *callee, f)?;
            f.write_str("(")?;
            fmt_values(m, args, f)?;
            f.write_str(")")
        }
        InstrKind::Br { target } => write!(f, "br label %{}", label(*target)),
        InstrKind::CondBr {
            cond,
            then_block,
            else_block,
        } => {
            f.write_str("br ")?;
            fmt_value(m, *cond, f)?;
            write!(
                f,
                ", label %{}, label %{}",
                label(*then_block),
                label(*else_block)
            )
        }
        InstrKind::Switch {
            value,
            cases,
            default,
        } => {
            f.write_str("switch ")?;
            fmt_value(m, *value, f)?;
            write!(f, ", label %{} [", label(*default))?;
            for (value, target) in cases {
                write!(f, " {value}: %{}", label(*target))?;
            }
            f.write_str(" ]")
        }
        InstrKind::Ret { value: Some(v) } => {
            f.write_str("ret ")?;
            fmt_value(m, *v, f)
        }
        InstrKind::Ret { value: None } => f.write_str("ret void"),
        InstrKind::Unreachable => f.write_str("unreachable"),
    }
}
