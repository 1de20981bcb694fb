//! Shared-memory layouts exchanged between the dispatcher and workers.
//!
//! ```text
//! argstruct_N_ty = { livein_0, livein_1, ..., livein_k-1, outstruct_N_ty }
//! outstruct_N_ty = { liveout_0, ..., liveout_m-1 }
//! ```
//!
//! The live-in order is fixed once here and shared by every thread. The
//! output region is embedded as the trailing field so one pointer reaches
//! both halves.

use crate::ir::{Module, StructId, Ty, Value};
use crate::live::LiveSets;

/// The argument and output layouts of one split loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Layouts {
    /// Live-ins followed by the embedded output region.
    pub arg: StructId,
    /// Live-outs, in live-out order.
    pub out: StructId,
    live_in_count: u32,
}

impl Layouts {
    /// Register both layouts for loop number `loop_id`.
    pub fn build(module: &mut Module, loop_id: u32, live: &LiveSets) -> Self {
        let out_fields: Vec<Ty> = live
            .live_out
            .iter()
            .map(|&id| module.value_type(Value::Instr(id)))
            .collect();
        let out = module.add_struct(format!("outstruct_{loop_id}_ty"), out_fields);

        let mut arg_fields: Vec<Ty> = live
            .live_in
            .iter()
            .map(|&v| module.value_type(v))
            .collect();
        let live_in_count = u32::try_from(arg_fields.len())
            .unwrap_or_else(|_| panic!("live-in count exceeds u32::MAX"));
        arg_fields.push(Ty::Struct(out));
        let arg = module.add_struct(format!("argstruct_{loop_id}_ty"), arg_fields);

        Self {
            arg,
            out,
            live_in_count,
        }
    }

    /// Field of the argument layout holding the output region.
    pub fn out_field(&self) -> u32 {
        self.live_in_count
    }

    /// Field number of the `index`-th entry of either layout.
    pub fn field_index(index: usize) -> u32 {
        u32::try_from(index).unwrap_or_else(|_| panic!("field index exceeds u32::MAX"))
    }
}
