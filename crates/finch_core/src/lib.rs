//! # Finch Core
//! [![Crates.io](https://img.shields.io/crates/v/finch_core.svg)](https://crates.io/crates/finch_core)
//! [![Docs](https://docs.rs/finch_core/badge.svg)](https://docs.rs/finch_core/)
//!
//! Types and traits for the ecosystem.
//!
//! Defines the data model shared by the orchestrator, the platform client and the backends.
//!
//! - **[`WorkspaceHandle`](workspace::WorkspaceHandle)**: The resolved identity of a remote ML workspace. Passed explicitly to every call.
//! - **[`ComputeClusterHandle`](compute::ComputeClusterHandle)**: A snapshot of an autoscaling compute cluster.
//! - **[`JobDescriptor`](job::JobDescriptor)**: Everything needed to launch a distributed training job.
//! - **[`RunHandle`](run::RunHandle)**: A submitted run whose status only ever moves forward.
//! - **[`MetricsTable`](report::MetricsTable)**: The parsed per-class classification report of a finished run.
//! - **[`PlatformServices`](traits::PlatformServices)**: The set of backends the orchestration is generic over.

pub mod compute;
pub mod constants;
pub mod error;
pub mod job;
pub mod report;
pub mod run;
pub mod snapshot;
pub mod traits;
pub mod workspace;

pub mod prelude {
    pub use super::compute::*;
    pub use super::constants::*;
    pub use super::error::*;
    pub use super::job::*;
    pub use super::report::*;
    pub use super::run::*;
    pub use super::snapshot::*;
    pub use super::traits::*;
    pub use super::workspace::*;
}
