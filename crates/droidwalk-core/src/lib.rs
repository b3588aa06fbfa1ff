//! # droidwalk-core - Core Domain Types
//!
//! Foundation crate for droidwalk. Provides the exploration graph, UI snapshot
//! descriptors, run verdicts, error handling and logging setup.
//!
//! This crate has **zero internal dependencies** -- it only depends on external
//! crates (serde, chrono, thiserror, regex, tracing).
//!
//! ## Public API
//!
//! ### Exploration Graph (`graph`)
//! - [`ExplorationGraph`] - Package → activity → element graph with visit state
//! - [`GraphNode`], [`NodeKind`] - Tagged node variants
//! - [`DELIMITER`] - Separator inside element ids
//!
//! ### Snapshots (`snapshot`)
//! - [`UiElement`] - One interactive widget
//! - [`Bounds`] - Screen rectangle with centre computation
//!
//! ### Domain Types (`types`)
//! - [`DeviceInfo`], [`DeviceRole`] - Connected devices and their role
//! - [`Verdict`], [`FailureCause`], [`AttemptOutcome`] - Attempt classification
//! - [`RunRecord`] - Result of one (application, attempt, device)
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Error enum with transient / attempt-fatal / fatal classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ## Prelude
//!
//! Import commonly used types with:
//! ```rust
//! use droidwalk_core::prelude::*;
//! ```

pub mod diagram;
pub mod error;
pub mod graph;
pub mod logging;
pub mod prelude;
pub mod snapshot;
pub mod types;

// Re-export commonly used types at crate root for convenience
pub use error::{Error, Result, ResultExt};
pub use graph::{
    element_id, element_suffix, owning_activity, ActivityNode, ElementNode, ExplorationGraph,
    GraphNode, NodeId, NodeKind, PackageNode, DELIMITER,
};
pub use snapshot::{Bounds, UiElement};
pub use types::{
    api_level, AttemptOutcome, DeviceInfo, DeviceRole, FailureCause, RunRecord, Verdict,
};
