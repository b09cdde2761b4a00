//! # hotloop - Stage-based manifest deployment
//!
//! hotloop rolls Kubernetes/OpenShift manifests into a cluster one stage at
//! a time. A stage file lists what to do; each stage may run a delegated
//! command or shell script, patch and apply a manifest (or kustomization),
//! and then block on wait conditions.
//!
//! ## Quick Start
//!
//! ```no_run
//! use hotloop::prelude::*;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let stages = StageLoader::new().load_file(Path::new("stages.yaml"))?;
//!
//! let context = ExecutionContext::system();
//! let delegate = Arc::new(LocalDelegate::new(context.clone()));
//! let executor = StageExecutor::from_config(&config, context, delegate)?;
//! executor.execute(&stages)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Stage loading**: schema validation, run conditions, one level of
//!   nested stage groups
//! - **YAML patching**: path expressions with `where` document selectors,
//!   idempotent and multi-document aware
//! - **Idempotent apply**: skips unchanged manifests, retries transient
//!   cluster errors with backoff, keeps success and failure artifacts
//! - **Waits**: retried commands and single-pod phase polling

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod executor;
pub mod infrastructure;
pub mod patch;
pub mod pipeline;

// Prelude module for common imports
pub mod prelude;

// Re-export commonly used types
pub use executor::{
    ApplyPolicy, ApplyRequest, ApplyResult, ApplyState, ApplyTarget, ArtifactMode, CancellationToken,
    CommandWait, ErrorClassifier, ExecutionContext, LocalDelegate, ManifestApplier, PhaseWait,
    StageExecutor, StageReport, StepDelegate, WaitEngine, WaitOutcome,
};
pub use infrastructure::{ClusterCli, Config, LabelSelector, MetricsCollector};
pub use patch::{PatchResult, PathExpr, YamlPatcher};
pub use pipeline::{
    FailureReport, Patch, PipelineError, PipelineResult, Stage, StageAction, StageLoader,
    ValidationError, Validate, WhereClause,
};

/// Version of the hotloop crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
