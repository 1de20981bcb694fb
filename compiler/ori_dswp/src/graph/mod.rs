//! CFG analyses shared by the split phases: block indexing, traversal
//! orders, dominator and post-dominator trees, and the capped ancestor
//! walk used to remap edges onto a worker's partial CFG.
//!
//! Both trees are built with the Cooper-Harvey-Kennedy iterative
//! algorithm. The post-dominator tree runs the same algorithm on the
//! reversed CFG rooted at a virtual exit that every returning block
//! flows into, so functions with several `Ret`/`Unreachable` blocks still
//! get a single tree.
//!
//! Reference: Cooper, Harvey, Kennedy, "A Simple, Fast Dominance Algorithm" (2001)

use rustc_hash::FxHashMap;

use crate::ir::{BlockId, FuncId, Module};

/// Dense view of one function's CFG.
///
/// Blocks are numbered by layout position so the analyses can use plain
/// vectors. Edges to blocks of other functions are dropped.
pub(crate) struct CfgIndex {
    pub(crate) blocks: Vec<BlockId>,
    pub(crate) pos: FxHashMap<BlockId, usize>,
    pub(crate) succs: Vec<Vec<usize>>,
    pub(crate) preds: Vec<Vec<usize>>,
}

impl CfgIndex {
    pub(crate) fn build(module: &Module, func: FuncId) -> Self {
        let blocks = module.func(func).blocks.clone();
        let pos: FxHashMap<BlockId, usize> =
            blocks.iter().enumerate().map(|(i, &b)| (b, i)).collect();
        let n = blocks.len();
        let mut succs: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut preds: Vec<Vec<usize>> = vec![Vec::new(); n];

        for (idx, &block) in blocks.iter().enumerate() {
            for succ in module.successors(block) {
                let Some(&succ_idx) = pos.get(&succ) else {
                    continue;
                };
                // Deduplicate: a CondBr with both arms on one block is one edge.
                if !succs[idx].contains(&succ_idx) {
                    succs[idx].push(succ_idx);
                    preds[succ_idx].push(idx);
                }
            }
        }

        Self {
            blocks,
            pos,
            succs,
            preds,
        }
    }
}

/// Postorder over `succs` starting at `root`.
///
/// Iterative DFS with an explicit stack; only reachable nodes appear.
pub(crate) fn compute_postorder(root: usize, succs: &[Vec<usize>]) -> Vec<usize> {
    let n = succs.len();
    let mut visited = vec![false; n];
    let mut postorder = Vec::with_capacity(n);

    // (node, children_processed)
    let mut stack: Vec<(usize, bool)> = vec![(root, false)];

    while let Some(&mut (node, ref mut children_done)) = stack.last_mut() {
        if *children_done {
            postorder.push(node);
            stack.pop();
            continue;
        }
        *children_done = true;

        if node >= n || visited[node] {
            stack.pop();
            continue;
        }
        visited[node] = true;

        for &succ in &succs[node] {
            if succ < n && !visited[succ] {
                stack.push((succ, false));
            }
        }
    }

    postorder
}

/// CHK fixpoint. Returns `idom[node]`; the root maps to itself and
/// unreachable nodes to `None`.
fn compute_idoms(root: usize, succs: &[Vec<usize>], preds: &[Vec<usize>]) -> Vec<Option<usize>> {
    let n = succs.len();
    let mut rpo = compute_postorder(root, succs);
    rpo.reverse();

    let mut rpo_pos = vec![usize::MAX; n];
    for (p, &node) in rpo.iter().enumerate() {
        rpo_pos[node] = p;
    }

    let mut idom: Vec<Option<usize>> = vec![None; n];
    idom[root] = Some(root);

    let mut changed = true;
    while changed {
        changed = false;
        for &node in rpo.iter().skip(1) {
            let mut processed = preds[node].iter().copied().filter(|&p| idom[p].is_some());
            let Some(first) = processed.next() else {
                continue;
            };
            let new_idom = processed.fold(first, |acc, p| intersect(p, acc, &idom, &rpo_pos));
            if idom[node] != Some(new_idom) {
                idom[node] = Some(new_idom);
                changed = true;
            }
        }
    }

    idom
}

/// CHK intersect: walk two fingers upward until they meet.
fn intersect(mut a: usize, mut b: usize, idom: &[Option<usize>], rpo_pos: &[usize]) -> usize {
    while a != b {
        while rpo_pos[a] > rpo_pos[b] {
            let Some(next) = idom[a] else {
                debug_assert!(false, "intersect: broken idom chain at {a}");
                return a;
            };
            a = next;
        }
        while rpo_pos[b] > rpo_pos[a] {
            let Some(next) = idom[b] else {
                debug_assert!(false, "intersect: broken idom chain at {b}");
                return b;
            };
            b = next;
        }
    }
    a
}

/// Dominator tree of one function.
pub struct DominatorTree {
    blocks: Vec<BlockId>,
    pos: FxHashMap<BlockId, usize>,
    idom: Vec<Option<usize>>,
}

impl DominatorTree {
    pub fn build(module: &Module, func: FuncId) -> Self {
        let cfg = CfgIndex::build(module, func);
        let idom = if cfg.blocks.is_empty() {
            Vec::new()
        } else {
            compute_idoms(0, &cfg.succs, &cfg.preds)
        };
        Self {
            blocks: cfg.blocks,
            pos: cfg.pos,
            idom,
        }
    }

    /// Immediate dominator of `block`. `None` for the entry block,
    /// unreachable blocks and blocks of other functions.
    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        let idx = *self.pos.get(&block)?;
        match self.idom[idx] {
            Some(dom) if dom != idx => Some(self.blocks[dom]),
            _ => None,
        }
    }

    /// Does `a` dominate `b`? A block dominates itself.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        let mut current = b;
        loop {
            if current == a {
                return true;
            }
            match self.idom(current) {
                Some(dom) => current = dom,
                None => return false,
            }
        }
    }
}

/// Post-dominator tree of one function.
pub struct PostDominatorTree {
    blocks: Vec<BlockId>,
    pos: FxHashMap<BlockId, usize>,
    /// Indexed by block position; the virtual exit sits at `blocks.len()`.
    ipdom: Vec<Option<usize>>,
}

impl PostDominatorTree {
    pub fn build(module: &Module, func: FuncId) -> Self {
        let cfg = CfgIndex::build(module, func);
        let n = cfg.blocks.len();
        let virtual_exit = n;

        // Reverse CFG: forward predecessors become successors.
        let mut rsuccs: Vec<Vec<usize>> = cfg.preds.clone();
        let mut rpreds: Vec<Vec<usize>> = cfg.succs.clone();
        rsuccs.push(Vec::new());
        rpreds.push(Vec::new());
        for (idx, succs) in cfg.succs.iter().enumerate() {
            if succs.is_empty() {
                rsuccs[virtual_exit].push(idx);
                rpreds[idx].push(virtual_exit);
            }
        }

        let ipdom = compute_idoms(virtual_exit, &rsuccs, &rpreds);
        Self {
            blocks: cfg.blocks,
            pos: cfg.pos,
            ipdom,
        }
    }

    /// Immediate post-dominator of `block`. `None` when the nearest
    /// post-dominator is the function boundary, or `block` never reaches
    /// an exit.
    pub fn ipdom(&self, block: BlockId) -> Option<BlockId> {
        let idx = *self.pos.get(&block)?;
        match self.ipdom[idx] {
            Some(p) if p != idx && p < self.blocks.len() => Some(self.blocks[p]),
            _ => None,
        }
    }

    /// Does `a` post-dominate `b`? A block post-dominates itself.
    pub fn post_dominates(&self, a: BlockId, b: BlockId) -> bool {
        let mut current = b;
        loop {
            if current == a {
                return true;
            }
            match self.ipdom(current) {
                Some(p) => current = p,
                None => return false,
            }
        }
    }
}

/// Immediate dominator and post-dominator for every block of a function.
pub struct DominanceInfo {
    pub dom: DominatorTree,
    pub postdom: PostDominatorTree,
}

impl DominanceInfo {
    pub fn compute(module: &Module, func: FuncId) -> Self {
        let info = Self {
            dom: DominatorTree::build(module, func),
            postdom: PostDominatorTree::build(module, func),
        };
        tracing::debug!(
            func = %module.func(func).name,
            blocks = info.dom.blocks.len(),
            "computed dominance"
        );
        info
    }

    #[inline]
    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        self.dom.idom(block)
    }

    #[inline]
    pub fn ipdom(&self, block: BlockId) -> Option<BlockId> {
        self.postdom.ipdom(block)
    }
}

/// Walk from `start` through `parent` until `lookup` yields something.
///
/// `start` itself is tried first. Gives up after `max_steps` parent hops
/// so a cyclic or corrupted parent relation cannot hang the pass.
///
/// # Errors
///
/// Returns the last block visited when the chain ends (no parent) or the
/// step cap is hit.
pub(crate) fn walk_up<T>(
    start: BlockId,
    max_steps: usize,
    parent: impl Fn(BlockId) -> Option<BlockId>,
    lookup: impl Fn(BlockId) -> Option<T>,
) -> Result<T, BlockId> {
    let mut current = start;
    for _ in 0..=max_steps {
        if let Some(found) = lookup(current) {
            return Ok(found);
        }
        match parent(current) {
            Some(next) => current = next,
            None => return Err(current),
        }
    }
    Err(current)
}
