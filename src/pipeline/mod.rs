//! Pipeline domain types and logic

pub mod condition;
pub mod errors;
pub mod loader;
pub mod stage;
pub mod types;

pub use condition::{all_truthy, is_truthy};
pub use errors::{FailureReport, PipelineError, ValidationError};
pub use loader::StageLoader;
pub use stage::{ALLOWED_STAGE_KEYS, Patch, Stage, WhereClause};
pub use types::{PipelineResult, StageAction, Validate};
