//! Structured, conditioned mutation of YAML manifests

pub mod document;
pub mod path;
pub mod patcher;

pub use path::{PathExpr, Segment};
pub use patcher::{PatchResult, YamlPatcher, parse_documents, render_documents};
