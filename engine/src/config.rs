//! Engine-wide tuning knobs.
//!
//! A plain `serde`-derived struct with a `Default` impl, since this crate
//! has no on-disk config file of its own to load — callers construct one
//! in code and pass it to `Root::with_options`.

use serde_derive::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineOptions {
    /// Run the Undo Cache GC sweep after every successful root commit.
    /// Disabling this is only useful for benchmarking raw commit
    /// throughput; production callers should leave it on.
    pub gc_on_commit: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions { gc_on_commit: true }
    }
}
