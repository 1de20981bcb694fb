//! Structural failures of the loop-splitting phase.
//!
//! Every variant means the upstream analyses handed over something
//! malformed. None of them are recoverable: the caller abandons the loop
//! and reports the message.

use crate::ir::{BlockId, Ty};
use crate::partition::ThreadId;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DswpError {
    /// A structural precondition of the loop or the partition does not hold.
    #[error("invariant violation: {message}")]
    InvariantViolation { message: String },

    /// No SCC assigned to `thread` touches any loop block.
    #[error("thread {thread} has no relevant blocks")]
    EmptyPartition { thread: ThreadId },

    /// The post-dominator chain from `block` ran out before reaching a
    /// block cloned into the worker.
    #[error("post-dominator chain from {block} ends before reaching a cloned block")]
    BrokenPostDominance { block: BlockId },

    /// The dominator chain from `block` ran out before reaching a block
    /// cloned into the worker.
    #[error("dominator chain from {block} ends before reaching a cloned block")]
    BrokenDominance { block: BlockId },

    /// A live-in loaded from the argument structure has the wrong type.
    #[error("broken type for live-in `{value}`: argument layout holds {expected}, value is {found}")]
    TypeMismatch {
        value: String,
        expected: Ty,
        found: Ty,
    },

    /// A loop value is used by an instruction that is not placed in a block.
    #[error("`{value}` is used by an instruction outside any block")]
    MalformedUse { value: String },

    /// A loop terminator jumps out of the loop somewhere other than the exit.
    #[error("branch to {block}, which is outside the loop and is not its exit")]
    UnexpectedBranchTarget { block: BlockId },
}

impl DswpError {
    pub(crate) fn invariant(message: impl Into<String>) -> Self {
        DswpError::InvariantViolation {
            message: message.into(),
        }
    }
}
