//! Core types for pipeline domain
//!
//! This module contains the outcome types shared by the executor and the
//! CLI.

#![allow(clippy::must_use_candidate)]

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for pipeline operations
pub type PipelineResult<T> = std::result::Result<T, super::errors::PipelineError>;

/// Kind of work performed for a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageAction {
    /// A delegated command ran
    Command,
    /// A delegated shell script ran
    Shell,
    /// A plain manifest was processed
    StaticManifest,
    /// A manifest rendered from a template was processed
    TemplateManifest,
    /// A kustomization directory was applied
    Kustomization,
    /// Wait conditions were satisfied
    Wait,
    /// The stage had nothing to do
    NoAction,
}

impl StageAction {
    /// Returns true if the action touched the cluster
    pub fn is_cluster_action(&self) -> bool {
        matches!(
            self,
            Self::StaticManifest | Self::TemplateManifest | Self::Kustomization
        )
    }
}

impl fmt::Display for StageAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Command => "command",
            Self::Shell => "shell",
            Self::StaticManifest => "static_manifest",
            Self::TemplateManifest => "template_manifest",
            Self::Kustomization => "kustomization",
            Self::Wait => "wait",
            Self::NoAction => "no_action",
        };
        f.write_str(text)
    }
}

/// Trait for types that can be validated
#[allow(clippy::missing_errors_doc)]
pub trait Validate {
    /// Type of validation error
    type Error;

    /// Validates this type
    fn validate(&self) -> std::result::Result<(), Self::Error>;
}
