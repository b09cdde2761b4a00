//! Prelude module for common imports

pub use crate::pipeline::errors::{FailureReport, PipelineError, ValidationError};
pub use crate::pipeline::loader::StageLoader;
pub use crate::pipeline::stage::{Patch, Stage, WhereClause};
pub use crate::pipeline::types::{PipelineResult, StageAction, Validate};

pub use crate::patch::{PatchResult, YamlPatcher};

pub use crate::executor::{
    ApplyRequest, ApplyTarget, CancellationToken, CommandWait, ExecutionContext, LocalDelegate,
    ManifestApplier, PhaseWait, StageExecutor, StepDelegate, WaitEngine,
};

pub use crate::infrastructure::{ClusterCli, Config, LabelSelector, MetricsCollector};
