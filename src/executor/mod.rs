//! Execution layer
//!
//! Subprocess plumbing, manifest apply, wait engines and the stage executor
//! that drives them.

mod apply;
mod artifacts;
mod backoff;
mod classify;
mod local;
mod process;
mod traits;
mod wait;

#[cfg(test)]
pub(crate) mod testing;

pub use apply::{ApplyPolicy, ApplyRequest, ApplyResult, ApplyState, ApplyTarget, ManifestApplier};
pub use artifacts::{ArtifactMode, ArtifactStore, Artifacts, CommandLog, timestamp};
pub use backoff::Backoff;
pub use classify::{CLASSIFIER_VERSION, ErrorClass, ErrorClassifier, ErrorContext};
pub use local::{ExecutorConfig, LocalDelegate, StageExecutor, StageReport, StepDelegate};
pub use process::SystemRunner;
pub use traits::{
    CancellationToken, Clock, CommandOutput, CommandRunner, CommandSpec, ExecutionContext, SystemClock,
};
pub use wait::{CommandWait, PhaseWait, WaitEngine, WaitOutcome, WaitStatus};
