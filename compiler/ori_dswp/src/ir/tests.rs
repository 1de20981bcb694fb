use pretty_assertions::assert_eq;

use super::{BlockId, Instr, InstrKind, Module, Ty, Value};
use crate::test_helpers::sum_loop;

#[test]
fn ids_display_with_prefix() {
    assert_eq!(super::FuncId::new(3).to_string(), "fn3");
    assert_eq!(BlockId::new(0).to_string(), "bb0");
    assert_eq!(super::InstrId::new(12).to_string(), "i12");
}

#[test]
fn terminator_is_last_instruction() {
    let fx = sum_loop();
    assert_eq!(fx.module.terminator(fx.header), Some(fx.header_br));
    assert_eq!(fx.module.terminator(fx.latch), Some(fx.latch_br));
}

#[test]
fn block_without_terminator_has_none() {
    let mut m = Module::new();
    let f = m.define_function("f", vec![], Ty::Void);
    let b = m.add_block(f, "b");
    assert_eq!(m.terminator(b), None);
    m.append_instr(b, InstrKind::Alloca { ty: Ty::I32 }, Ty::Ptr, None);
    assert_eq!(m.terminator(b), None);
}

#[test]
fn condbr_with_equal_arms_keeps_both_slots() {
    let kind = InstrKind::CondBr {
        cond: Value::Null,
        then_block: BlockId::new(4),
        else_block: BlockId::new(4),
    };
    assert_eq!(kind.successors().as_slice(), &[BlockId::new(4), BlockId::new(4)]);
}

#[test]
fn switch_successors_end_with_default() {
    let mut kind = InstrKind::Switch {
        value: Value::i32(0),
        cases: vec![(0, BlockId::new(1)), (1, BlockId::new(2))],
        default: BlockId::new(3),
    };
    assert_eq!(
        kind.successors().as_slice(),
        &[BlockId::new(1), BlockId::new(2), BlockId::new(3)]
    );

    kind.for_each_successor_mut(|b| *b = BlockId::new(b.raw() + 10));
    assert_eq!(
        kind.successors().as_slice(),
        &[BlockId::new(11), BlockId::new(12), BlockId::new(13)]
    );
}

#[test]
fn try_successor_rewrite_stops_at_first_error() {
    let mut kind = InstrKind::CondBr {
        cond: Value::Null,
        then_block: BlockId::new(1),
        else_block: BlockId::new(2),
    };
    let result = kind.try_for_each_successor_mut(|b| {
        if *b == BlockId::new(2) {
            return Err(*b);
        }
        *b = BlockId::new(9);
        Ok(())
    });
    assert_eq!(result, Err(BlockId::new(2)));
    assert_eq!(
        kind.successors().as_slice(),
        &[BlockId::new(9), BlockId::new(2)]
    );
}

#[test]
fn operands_skip_block_references() {
    let kind = InstrKind::Phi {
        incoming: vec![(Value::i64(0), BlockId::new(0)), (Value::Null, BlockId::new(1))],
    };
    assert_eq!(kind.operands().as_slice(), &[Value::i64(0), Value::Null]);

    let call = InstrKind::Call {
        callee: Value::Null,
        args: vec![Value::i32(1), Value::i32(2)],
    };
    assert_eq!(call.operands().len(), 3);
    assert!(InstrKind::Br {
        target: BlockId::new(0)
    }
    .operands()
    .is_empty());
}

#[test]
fn operand_rewrite_visits_every_slot() {
    let mut kind = InstrKind::Store {
        value: Value::i64(1),
        ptr: Value::i64(1),
    };
    let mut seen = 0;
    kind.for_each_operand_mut(|v| {
        seen += 1;
        *v = Value::Null;
    });
    assert_eq!(seen, 2);
    assert_eq!(kind.operands().as_slice(), &[Value::Null, Value::Null]);
}

#[test]
fn value_types_and_names() {
    let fx = sum_loop();
    let m = &fx.module;
    assert_eq!(m.value_type(Value::Instr(fx.cond)), Ty::I1);
    assert_eq!(m.value_type(m.param(fx.func, 1)), Ty::I64);
    assert_eq!(m.value_type(Value::Null), Ty::Ptr);
    assert_eq!(m.value_name(Value::Instr(fx.acc)), "acc");
    assert_eq!(m.value_name(m.param(fx.func, 0)), "arg0");
    assert_eq!(m.value_name(Value::Instr(fx.ret)), format!("v{}", fx.ret.raw()));
}

#[test]
fn insert_block_at_keeps_layout_order() {
    let mut fx = sum_loop();
    let pos = fx
        .module
        .func(fx.func)
        .blocks
        .iter()
        .position(|&b| b == fx.exit)
        .unwrap();
    let r = fx.module.insert_block_at(fx.func, pos, "loop-replace");
    let layout = &fx.module.func(fx.func).blocks;
    assert_eq!(layout[pos], r);
    assert_eq!(layout[pos + 1], fx.exit);
    assert_eq!(fx.module.block(r).func, fx.func);
}

#[test]
fn insert_before_terminator_lands_before_branch() {
    let mut fx = sum_loop();
    let id = fx.module.insert_before_terminator(
        fx.latch,
        InstrKind::Alloca { ty: Ty::I64 },
        Ty::Ptr,
        Some("slot".to_owned()),
    );
    assert_eq!(fx.module.block(fx.latch).instrs, vec![id, fx.latch_br]);
    assert_eq!(fx.module.instr(id).block, Some(fx.latch));
}

#[test]
fn detached_instruction_has_no_block() {
    let mut m = Module::new();
    let id = m.push_detached(Instr {
        block: None,
        kind: InstrKind::Unreachable,
        ty: Ty::Void,
        name: None,
    });
    assert_eq!(m.instr(id).block, None);
    assert_eq!(m.instr_ids().count(), 1);
}

#[test]
fn get_or_declare_reuses_existing_function() {
    let mut m = Module::new();
    let first = m.get_or_declare("sync_init", vec![], Ty::Void);
    let second = m.get_or_declare("sync_init", vec![], Ty::Void);
    assert_eq!(first, second);
    assert!(m.func(first).external);
    assert_eq!(m.function_by_name("sync_join"), None);
}

// Serde roundtrip (cache feature)

#[cfg(feature = "cache")]
#[test]
fn module_survives_cache_roundtrip() {
    let fx = sum_loop();
    let bytes =
        bincode::serialize(&fx.module).unwrap_or_else(|e| panic!("serialize failed: {e}"));
    let restored: Module =
        bincode::deserialize(&bytes).unwrap_or_else(|e| panic!("deserialize failed: {e}"));
    assert_eq!(restored, fx.module);
}
