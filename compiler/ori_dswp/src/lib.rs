//! Loop splitting for decoupled software pipelining.
//!
//! This crate is the final code-generation step of the DSWP pipeline. Given
//! a loop, its dependence graph, and a partition of the loop's SCCs onto
//! worker threads, it rewrites the IR so the loop runs as a set of
//! concurrently dispatched worker functions:
//!
//! - **Live sets** ([`compute_live_sets`]): values entering and leaving
//!   the loop, which become the fields of the shared argument structure.
//! - **Replacement** ([`replace`]): a block standing in for the loop that
//!   marshals live-ins, dispatches the workers through the runtime, waits
//!   for them, and reloads live-outs.
//! - **Materialization** ([`materialize`]): one function per thread
//!   holding a filtered copy of the loop, with branch targets and φ
//!   predecessors remapped onto its partial CFG.
//!
//! [`DswpPass`] ties the phases together and is the entry point:
//!
//! ```ignore
//! let mut pass = DswpPass::new(DswpConfig::new(2));
//! let split = pass.split_loop(&mut module, func, &lp, &deps, &plan)?;
//! ```
//!
//! # Crate Dependencies
//!
//! Standalone: the IR ([`ir`]) is owned here and upstream analyses hand
//! over plain IDs. Cross-thread synchronization of values (queues between
//! producer and consumer stages) is inserted by an earlier phase.

pub mod config;
pub mod error;
pub mod graph;
pub mod ir;
pub mod layout;
pub mod live;
pub mod materialize;
pub mod partition;
pub mod pass;
pub mod printer;
pub mod replace;
pub mod subst;
pub mod verify;

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "tests use unwrap to panic on unexpected state")]
pub(crate) mod test_helpers;

pub use config::{DswpConfig, RuntimeEntryPoints};
pub use error::DswpError;
pub use graph::{DominanceInfo, DominatorTree, PostDominatorTree};
pub use ir::{
    BinOp, Block, BlockId, CmpPred, FuncId, Function, Instr, InstrId, InstrKind, Module,
    StructDef, StructId, Ty, Value,
};
pub use layout::Layouts;
pub use live::{compute_live_sets, LiveSets, UseIndex};
pub use materialize::WorkerBody;
pub use partition::{DepEdge, DepKind, DependenceGraph, Loop, PartitionPlan, SccId, ThreadId};
pub use pass::{DswpPass, LoopSplit};
pub use replace::Replacement;
pub use subst::Substitution;
pub use verify::verify_function;

use std::sync::Once;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for debug output.
///
/// Call this once at startup. Safe to call multiple times.
/// Enable with `RUST_LOG=ori_dswp=debug`, or `RUST_LOG=ori_dswp=trace` to
/// also dump every rewritten function.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        // Only initialize if RUST_LOG is set
        if std::env::var("RUST_LOG").is_ok() {
            let filter = EnvFilter::from_default_env();
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_level(true))
                .with(filter)
                .init();
        }
    });
}
