//! Picker DAG
//!
//! The dependency graph engine of the pipeline. A set of [`StageSpec`]s is
//! validated once into a [`StageGraph`]; the orchestrator then drives each
//! symbol's [`RunState`] through it with [`StageGraph::ready_stages`].
//!
//! # Example
//!
//! ```
//! use picker_artifact::PayloadKind;
//! use picker_dag::{RunState, StageGraph, StageSpec};
//!
//! let graph = StageGraph::new([
//!     StageSpec::new("fetch", "file_adapter", PayloadKind::RawDocument),
//!     StageSpec::new("clean", "text_cleaner", PayloadKind::CleanText).after(["fetch"]),
//! ])
//! .unwrap();
//! assert_eq!(graph.ready_stages(&RunState::new()), vec!["fetch"]);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod error;
mod graph;
mod spec;

pub use error::DagError;
pub use graph::{RunState, StageGraph};
pub use picker_artifact::StageStatus;
pub use spec::StageSpec;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
