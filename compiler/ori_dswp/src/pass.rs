//! The loop-splitting pass and its per-loop context.
//!
//! [`DswpPass`] lives for a whole compilation unit and numbers the loops it
//! splits, so generated names never collide. Each call to
//! [`split_loop`](DswpPass::split_loop) builds a [`SplitContext`] holding
//! everything the phases share, runs them in order, and drops it:
//!
//! 1. live-variable analysis and dominance (read-only over the function)
//! 2. replacement block, worker declarations, layouts
//! 3. one worker body per thread
//! 4. structural verification (optional)

use rustc_hash::FxHashMap;

use crate::config::DswpConfig;
use crate::error::DswpError;
use crate::graph::DominanceInfo;
use crate::ir::{BlockId, FuncId, InstrId, Module, Value};
use crate::layout::Layouts;
use crate::live::{compute_live_sets, LiveSets};
use crate::materialize::{materialize, WorkerBody};
use crate::partition::{DependenceGraph, Loop, PartitionPlan, ThreadId};
use crate::replace::synthesize;
use crate::verify::verify_function;

/// State shared by the phases of one loop transformation.
pub(crate) struct SplitContext<'a> {
    pub(crate) func: FuncId,
    pub(crate) lp: &'a Loop,
    pub(crate) deps: &'a DependenceGraph,
    pub(crate) plan: &'a PartitionPlan,
    pub(crate) config: &'a DswpConfig,
    pub(crate) loop_id: u32,
    pub(crate) thread_count: u32,
    pub(crate) live: LiveSets,
    pub(crate) dom: DominanceInfo,
    /// Step cap for dominator / post-dominator fallback walks.
    pub(crate) walk_cap: usize,
}

impl SplitContext<'_> {
    pub(crate) fn threads(&self) -> impl Iterator<Item = ThreadId> {
        (0..self.thread_count).map(ThreadId::new)
    }
}

/// Summary of one split loop.
#[derive(Clone, Debug)]
pub struct LoopSplit {
    /// Per-compilation-unit loop number used in generated names.
    pub loop_id: u32,
    pub replace_block: BlockId,
    /// Worker bodies, indexed by thread.
    pub workers: Vec<WorkerBody>,
    pub layouts: Layouts,
    pub live: LiveSets,
}

impl LoopSplit {
    /// Worker functions, indexed by thread.
    pub fn worker_funcs(&self) -> impl Iterator<Item = FuncId> + '_ {
        self.workers.iter().map(|w| w.func)
    }

    /// The thread whose worker contains `clone`.
    pub fn owner_of_clone(&self, clone: InstrId) -> Option<ThreadId> {
        self.workers
            .iter()
            .find(|w| w.originals.contains_key(&clone))
            .map(|w| w.thread)
    }

    /// Original instruction → clone, for every thread.
    pub fn clones_by_thread(&self) -> FxHashMap<ThreadId, &FxHashMap<InstrId, InstrId>> {
        self.workers.iter().map(|w| (w.thread, &w.clones)).collect()
    }
}

/// Splits partitioned loops into concurrently running workers.
#[derive(Debug, Default)]
pub struct DswpPass {
    config: DswpConfig,
    loop_counter: u32,
}

impl DswpPass {
    pub fn new(config: DswpConfig) -> Self {
        Self {
            config,
            loop_counter: 0,
        }
    }

    pub fn config(&self) -> &DswpConfig {
        &self.config
    }

    /// Number of loops this pass has numbered so far.
    pub fn loops_split(&self) -> u32 {
        self.loop_counter
    }

    /// Rewrite `lp` in `func` so its body runs on the configured number of
    /// workers according to `plan`.
    ///
    /// # Errors
    ///
    /// Any [`DswpError`]. The module may be partially rewritten when an
    /// error is returned; callers are expected to abort.
    pub fn split_loop(
        &mut self,
        module: &mut Module,
        func: FuncId,
        lp: &Loop,
        deps: &DependenceGraph,
        plan: &PartitionPlan,
    ) -> Result<LoopSplit, DswpError> {
        let thread_count = check_preconditions(module, func, lp, plan, &self.config)?;

        let loop_id = self.loop_counter;
        self.loop_counter += 1;

        tracing::debug!(
            func = %module.func(func).name,
            loop_id,
            header = %module.block(lp.header()).name,
            threads = thread_count,
            "splitting loop"
        );

        let live = compute_live_sets(module, lp)?;
        for &id in &live.live_out {
            if plan.thread_of_instr(id).is_none() {
                return Err(DswpError::invariant(format!(
                    "live-out `{}` belongs to no SCC",
                    module.value_name(Value::Instr(id))
                )));
            }
        }
        let dom = DominanceInfo::compute(module, func);

        let ctx = SplitContext {
            func,
            lp,
            deps,
            plan,
            config: &self.config,
            loop_id,
            thread_count,
            live,
            dom,
            walk_cap: module.func(func).blocks.len() + 1,
        };

        let replacement = synthesize(module, &ctx)?;
        let workers = ctx
            .threads()
            .map(|thread| materialize(module, &ctx, &replacement, thread))
            .collect::<Result<Vec<_>, _>>()?;

        if self.config.verify {
            verify_function(module, func)?;
            for worker in &workers {
                verify_function(module, worker.func)?;
            }
        }

        tracing::trace!("{}", module.display_function(func));

        Ok(LoopSplit {
            loop_id,
            replace_block: replacement.block,
            workers,
            layouts: replacement.layouts,
            live: ctx.live,
        })
    }
}

/// Checks that must hold before anything is mutated. Returns the thread
/// count as `u32`.
fn check_preconditions(
    module: &Module,
    func: FuncId,
    lp: &Loop,
    plan: &PartitionPlan,
    config: &DswpConfig,
) -> Result<u32, DswpError> {
    let f = module.func(func);
    if f.external {
        return Err(DswpError::invariant(format!(
            "`{}` is a declaration and has no loop to split",
            f.name
        )));
    }
    if config.threads == 0 {
        return Err(DswpError::invariant("thread count must be positive"));
    }
    if plan.thread_count() != config.threads {
        return Err(DswpError::invariant(format!(
            "partition has {} threads, configuration expects {}",
            plan.thread_count(),
            config.threads
        )));
    }
    let thread_count = u32::try_from(config.threads)
        .map_err(|_| DswpError::invariant("thread count exceeds u32::MAX"))?;

    for (role, block) in [
        ("header", lp.header()),
        ("preheader", lp.preheader()),
        ("exit", lp.exit()),
    ] {
        if module.block(block).func != func {
            return Err(DswpError::invariant(format!(
                "loop {role} `{}` is not in `{}`",
                module.block(block).name,
                f.name
            )));
        }
    }
    if let Some(&stray) = lp.blocks().iter().find(|&&b| module.block(b).func != func) {
        return Err(DswpError::invariant(format!(
            "loop block `{}` is not in `{}`",
            module.block(stray).name,
            f.name
        )));
    }
    if !lp.contains(lp.header()) {
        return Err(DswpError::invariant("loop does not contain its header"));
    }
    if lp.contains(lp.preheader()) {
        return Err(DswpError::invariant("loop preheader is inside the loop"));
    }

    Ok(thread_count)
}
