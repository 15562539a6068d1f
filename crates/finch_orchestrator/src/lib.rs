//! # Finch Orchestrator
//! [![Crates.io](https://img.shields.io/crates/v/finch_orchestrator.svg)](https://crates.io/crates/finch_orchestrator)
//! [![Docs](https://docs.rs/finch_orchestrator/badge.svg)](https://docs.rs/finch_orchestrator/)
//!
//! Sequential orchestration of a distributed training job against any [`PlatformServices`].
//!
//! Each step is usable on its own:
//!
//! * [`WorkspaceResolver`]: credential file + explicit parameters, get-or-create.
//! * [`ComputeProvisioner`]: get-or-create of an autoscaling cluster, polled until ready.
//! * [`JobSubmitter`]: snapshot upload with blob dedup, then submission.
//! * [`RunMonitor`]: `poll`/`wait` with forward-only status, log streaming.
//! * [`ResultRetriever`]: artifact download under a [`RetrievalPolicy`].
//!
//! [`Pipeline`] chains them and renders the classification report.
//!
//! ## Example
//!
//! ```no_run
//! use finch_orchestrator::prelude::*;
//! use finch_platform_mock::InMemoryPlatform;
//!
//! # async fn run() -> Result<(), OrchestrationError> {
//! let workspace = WorkspaceRef {
//!     region: Some("eastus".into()),
//!     ..Default::default()
//! };
//! let cluster = ClusterSpec::new(defaults::CLUSTER_NAME, defaults::VM_SIZE, defaults::NODE_COUNT)?;
//!
//! let outcome = Pipeline::new(InMemoryPlatform::new(), PipelineConfig::new(workspace, cluster))
//!     .run()
//!     .await?;
//! println!("{}", outcome.report);
//! # Ok(())
//! # }
//! ```
//!
//! [`PlatformServices`]: finch_core::traits::PlatformServices

pub mod error;
pub mod monitor;
pub mod pipeline;
pub mod provisioner;
pub mod resolver;
pub mod retriever;
pub mod services;
pub mod submitter;

pub use error::OrchestrationError;
pub use monitor::{LOG_DRAIN_GRACE, RunMonitor, drain_forwarder};
pub use pipeline::{Pipeline, PipelineConfig, PipelineOutcome};
pub use provisioner::ComputeProvisioner;
pub use resolver::WorkspaceResolver;
pub use retriever::{DownloadReport, ResultRetriever, RetrievalPolicy};
pub use services::CoreServices;
pub use submitter::JobSubmitter;

pub mod prelude {
    pub use super::{
        ComputeProvisioner, CoreServices, DownloadReport, JobSubmitter, LOG_DRAIN_GRACE, OrchestrationError,
        Pipeline, PipelineConfig, PipelineOutcome, ResultRetriever, RetrievalPolicy, RunMonitor, WorkspaceResolver,
        drain_forwarder,
    };
    pub use finch_core::prelude::*;
}
