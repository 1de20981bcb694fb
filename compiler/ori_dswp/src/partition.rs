//! Upstream inputs: the loop region, the dependence graph, and the
//! SCC-to-thread partition.
//!
//! All three are produced by earlier analyses and are read-only here.
//! Nothing in this module checks that the partition respects the
//! dependence graph; it only enforces the bookkeeping invariants the
//! split relies on (one SCC per instruction, one thread per SCC).

use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::DswpError;
use crate::ir::{BlockId, InstrId};

// ── Loop region ─────────────────────────────────────────────────────

/// The loop being split.
#[derive(Clone, Debug)]
pub struct Loop {
    header: BlockId,
    preheader: BlockId,
    exit: BlockId,
    blocks: Vec<BlockId>,
    members: FxHashSet<BlockId>,
}

impl Loop {
    /// `preheader` is the unique predecessor outside the loop and `exit`
    /// the unique block control reaches when leaving it. `blocks` lists
    /// the members; its order drives every traversal of the loop body.
    pub fn new(header: BlockId, preheader: BlockId, exit: BlockId, blocks: Vec<BlockId>) -> Self {
        let members = blocks.iter().copied().collect();
        Self {
            header,
            preheader,
            exit,
            blocks,
            members,
        }
    }

    pub fn header(&self) -> BlockId {
        self.header
    }

    pub fn preheader(&self) -> BlockId {
        self.preheader
    }

    pub fn exit(&self) -> BlockId {
        self.exit
    }

    pub fn blocks(&self) -> &[BlockId] {
        &self.blocks
    }

    #[inline]
    pub fn contains(&self, block: BlockId) -> bool {
        self.members.contains(&block)
    }
}

// ── Dependence graph ────────────────────────────────────────────────

/// Why one instruction depends on another.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DepKind {
    /// SSA def-use through a register.
    Register,
    /// Ordering through memory (true, anti or output dependence).
    Memory,
    /// Execution guarded by a branch.
    Control,
}

/// `dependent` must observe the effect of `dependency`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DepEdge {
    pub dependency: InstrId,
    pub dependent: InstrId,
    pub kind: DepKind,
}

/// Dependence edges with a reverse index from each instruction to the
/// edges naming its dependencies.
#[derive(Clone, Debug, Default)]
pub struct DependenceGraph {
    edges: Vec<DepEdge>,
    rev: FxHashMap<InstrId, Vec<usize>>,
}

impl DependenceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_edge(&mut self, dependency: InstrId, dependent: InstrId, kind: DepKind) {
        let idx = self.edges.len();
        self.edges.push(DepEdge {
            dependency,
            dependent,
            kind,
        });
        self.rev.entry(dependent).or_default().push(idx);
    }

    pub fn edges(&self) -> &[DepEdge] {
        &self.edges
    }

    /// Edges whose head is `instr`: the instructions it depends on.
    pub fn dependencies_of(&self, instr: InstrId) -> impl Iterator<Item = &DepEdge> {
        self.rev
            .get(&instr)
            .into_iter()
            .flatten()
            .map(|&idx| &self.edges[idx])
    }
}

// ── Partition ───────────────────────────────────────────────────────

/// Strongly connected component ID.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct SccId(u32);

impl SccId {
    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Worker thread slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ThreadId(u32);

impl ThreadId {
    #[inline]
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// SCC membership and thread assignment.
///
/// `assigned[scc]` is the thread running `scc`; `parts[thread]` lists the
/// SCCs of `thread` in assignment order.
#[derive(Clone, Debug)]
pub struct PartitionPlan {
    scc_of: FxHashMap<InstrId, SccId>,
    members: Vec<Vec<InstrId>>,
    assigned: Vec<ThreadId>,
    parts: Vec<Vec<SccId>>,
}

impl PartitionPlan {
    pub fn new(threads: usize) -> Self {
        Self {
            scc_of: FxHashMap::default(),
            members: Vec::new(),
            assigned: Vec::new(),
            parts: vec![Vec::new(); threads],
        }
    }

    /// Register an SCC made of `members` and assign it to `thread`.
    ///
    /// # Errors
    ///
    /// `InvariantViolation` if `thread` is out of range or an instruction
    /// already belongs to another SCC.
    pub fn add_scc(
        &mut self,
        thread: ThreadId,
        members: impl IntoIterator<Item = InstrId>,
    ) -> Result<SccId, DswpError> {
        if thread.index() >= self.parts.len() {
            return Err(DswpError::invariant(format!(
                "SCC assigned to thread {thread}, but only {} threads exist",
                self.parts.len()
            )));
        }
        let scc = SccId(
            u32::try_from(self.members.len())
                .map_err(|_| DswpError::invariant("SCC count exceeds u32::MAX"))?,
        );
        let members: Vec<InstrId> = members.into_iter().collect();
        // Validate everything before touching the maps so a rejected SCC
        // leaves the plan as it was.
        let mut seen = FxHashSet::default();
        for &instr in &members {
            if let Some(prev) = self.scc_of.get(&instr) {
                return Err(DswpError::invariant(format!(
                    "{instr} belongs to SCC {} and SCC {}",
                    prev.raw(),
                    scc.raw()
                )));
            }
            if !seen.insert(instr) {
                return Err(DswpError::invariant(format!(
                    "{instr} is listed twice in SCC {}",
                    scc.raw()
                )));
            }
        }
        for &instr in &members {
            self.scc_of.insert(instr, scc);
        }
        self.members.push(members);
        self.assigned.push(thread);
        self.parts[thread.index()].push(scc);
        Ok(scc)
    }

    pub fn thread_count(&self) -> usize {
        self.parts.len()
    }

    pub fn scc_of(&self, instr: InstrId) -> Option<SccId> {
        self.scc_of.get(&instr).copied()
    }

    pub fn members(&self, scc: SccId) -> &[InstrId] {
        &self.members[scc.index()]
    }

    pub fn assigned(&self, scc: SccId) -> ThreadId {
        self.assigned[scc.index()]
    }

    /// SCCs assigned to `thread`.
    pub fn part(&self, thread: ThreadId) -> &[SccId] {
        &self.parts[thread.index()]
    }

    /// The thread owning `instr`'s SCC.
    pub fn thread_of_instr(&self, instr: InstrId) -> Option<ThreadId> {
        self.scc_of(instr).map(|scc| self.assigned(scc))
    }
}
