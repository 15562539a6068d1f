//! # Finch
//! [![License](https://img.shields.io/badge/license-MIT%2FApache-blue.svg)](https://github.com/finch-ml/finch#license)
//! [![Crates.io](https://img.shields.io/crates/v/finch.svg)](https://crates.io/crates/finch)
//! [![Docs](https://docs.rs/finch/badge.svg)](https://docs.rs/finch/)
//!
//! Runs a distributed fine-tuning job on a managed ML platform: resolve the workspace, get or
//! create an autoscaling GPU cluster, package the training code, submit, wait, download the
//! outputs and render the classification report.
//!
//! This crate is the entry point. It re-exports the domain types and the orchestrator, and
//! optionally the platform client and artifact stores via feature flags.
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | **`client`** | HTTP/WebSocket client for the platform API (`finch_client`). |
//! | **`fs`** | Local filesystem artifact store and job packager (`finch_fs`). |
//! | **`opendal`** | Artifact store over OpenDAL, e.g. Azure Blob Storage (`finch_opendal`). |
//! | **`mock`** | In-memory platform for tests and dry runs (`finch_platform_mock`). |
//!
//! ## Example
//!
//! ```toml
//! [dependencies]
//! finch = { version = "0.3", features = ["client"] }
//! ```
//!
//! ```rust,ignore
//! use finch::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = FinchClient::new("https://ml.example.com/api", std::env::var("FINCH_TOKEN").ok());
//!
//!     let workspace = WorkspaceRef {
//!         region: Some("eastus".into()),
//!         ..Default::default()
//!     };
//!     let cluster = ClusterSpec::new(defaults::CLUSTER_NAME, defaults::VM_SIZE, defaults::NODE_COUNT)?;
//!
//!     let outcome = Pipeline::new(client, PipelineConfig::new(workspace, cluster)).run().await?;
//!     println!("{}", outcome.report);
//!     Ok(())
//! }
//! ```

pub use finch_core::*;

pub mod orchestrator {
    pub use finch_orchestrator::*;
}

#[cfg(feature = "client")]
pub mod client {
    pub use finch_client::*;
}

#[cfg(feature = "fs")]
pub mod fs {
    pub use finch_fs::*;
}

#[cfg(feature = "opendal")]
pub mod opendal {
    pub use finch_opendal::*;
}

#[cfg(feature = "mock")]
pub mod mock {
    pub use finch_platform_mock::*;
}

pub mod prelude {
    pub use finch_orchestrator::prelude::*;

    #[cfg(feature = "client")]
    pub use finch_client::FinchClient;

    #[cfg(feature = "fs")]
    pub use finch_fs::{FileSystemArtifactStore, JobPackager};

    #[cfg(feature = "opendal")]
    pub use finch_opendal::OpendalArtifactStore;

    #[cfg(feature = "mock")]
    pub use finch_platform_mock::InMemoryPlatform;
}
