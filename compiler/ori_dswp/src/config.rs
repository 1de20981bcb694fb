//! Configuration for the loop-splitting pass.
//!
//! # Usage
//!
//! ```ignore
//! use ori_dswp::{DswpConfig, DswpPass};
//!
//! let config = DswpConfig::new(4).with_trace_hook("showPlace");
//! let mut pass = DswpPass::new(config);
//! ```

/// Names of the runtime functions the generated code calls.
///
/// The entry points are looked up in the module by name and declared with
/// the fixed signatures below when missing:
///
/// - `init: () -> void`
/// - `dispatch: (i32 thread, ptr worker, ptr args) -> void`
/// - `join: () -> void`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeEntryPoints {
    pub init: String,
    pub dispatch: String,
    pub join: String,
}

impl Default for RuntimeEntryPoints {
    fn default() -> Self {
        Self {
            init: "sync_init".to_owned(),
            dispatch: "sync_delegate".to_owned(),
            join: "sync_join".to_owned(),
        }
    }
}

/// Loop-splitting configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DswpConfig {
    /// Number of worker function slots generated per loop.
    pub threads: usize,
    /// Runtime dispatch contract.
    pub runtime: RuntimeEntryPoints,
    /// Zero-argument function called on entry to every worker, if set.
    pub trace_hook: Option<String>,
    /// Run the structural verifier over every function the split touched.
    pub verify: bool,
}

impl Default for DswpConfig {
    fn default() -> Self {
        Self {
            threads: 2,
            runtime: RuntimeEntryPoints::default(),
            trace_hook: None,
            verify: true,
        }
    }
}

impl DswpConfig {
    /// Create a configuration for `threads` workers.
    #[must_use]
    pub fn new(threads: usize) -> Self {
        Self {
            threads,
            ..Self::default()
        }
    }

    /// Override the runtime entry point names.
    #[must_use]
    pub fn with_runtime(mut self, runtime: RuntimeEntryPoints) -> Self {
        self.runtime = runtime;
        self
    }

    /// Call `hook` at the start of every worker.
    #[must_use]
    pub fn with_trace_hook(mut self, hook: impl Into<String>) -> Self {
        self.trace_hook = Some(hook.into());
        self
    }

    /// Enable or disable post-split verification.
    #[must_use]
    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }
}
