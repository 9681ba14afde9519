//! Picker Store
//!
//! Durable, content-addressed cache of per-(symbol, stage) outputs used for
//! incremental re-runs, plus persistence of run records.
//!
//! - [`ArtifactStore`]: the contract the orchestrator consumes
//! - [`MemoryArtifactStore`]: `DashMap` backed, for tests and one-shot runs
//! - [`FsArtifactStore`]: JSON files with atomic renames behind a moka cache

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod error;
mod fs;
mod locks;
mod memory;
mod store;

pub use error::StoreError;
pub use fs::FsArtifactStore;
pub use memory::MemoryArtifactStore;
pub use store::{ArtifactStore, PutOutcome};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
