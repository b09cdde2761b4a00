//! Classification of cluster command failures
//!
//! A single versioned table decides which stderr texts are transient (worth
//! retrying) for apply and for wait commands. Everything unmatched is fatal.

use crate::pipeline::ValidationError;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Version of the built-in rule table, bumped whenever a rule changes
pub const CLASSIFIER_VERSION: u32 = 1;

/// Where a command failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorContext {
    /// Applying a manifest or kustomization
    Apply,
    /// Running a wait command or querying a resource
    Wait,
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Apply => f.write_str("apply"),
            Self::Wait => f.write_str("wait"),
        }
    }
}

/// Outcome of classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorClass {
    /// Matched the named rule; retrying may help
    Transient {
        /// Name of the matching rule
        rule: String,
    },
    /// No rule matched
    Fatal,
}

impl ErrorClass {
    /// Returns true for transient errors
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

const APPLY_AND_WAIT: &[ErrorContext] = &[ErrorContext::Apply, ErrorContext::Wait];
const WAIT_ONLY: &[ErrorContext] = &[ErrorContext::Wait];

const BUILTIN_RULES: &[(&str, &str, &[ErrorContext])] = &[
    (
        "webhook-no-endpoints",
        r"failed calling webhook.*no endpoints available",
        APPLY_AND_WAIT,
    ),
    (
        "api-connect-refused",
        r"tcp.*:\d+: connect: connection refused",
        APPLY_AND_WAIT,
    ),
    (
        "api-server-refused",
        r"connection to the server .* was refused",
        APPLY_AND_WAIT,
    ),
    (
        "condition-timed-out",
        r"timed out waiting for the condition",
        APPLY_AND_WAIT,
    ),
    ("no-matching-resources", r"no matching resources found", WAIT_ONLY),
    ("not-found", r"NotFound", WAIT_ONLY),
];

#[derive(Debug, Clone)]
struct Rule {
    name: String,
    regex: Regex,
    contexts: Vec<ErrorContext>,
}

fn compile(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}

static BUILTIN: Lazy<Vec<Rule>> = Lazy::new(|| {
    BUILTIN_RULES
        .iter()
        .map(|(name, pattern, contexts)| Rule {
            name: (*name).to_string(),
            regex: compile(pattern).unwrap(),
            contexts: contexts.to_vec(),
        })
        .collect()
});

/// Decides whether a failed command's stderr is worth retrying
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    rules: Vec<Rule>,
}

impl ErrorClassifier {
    /// Creates a classifier with the built-in rules only
    #[must_use]
    pub fn new() -> Self {
        Self {
            rules: BUILTIN.clone(),
        }
    }

    /// Adds extra case-insensitive patterns for one context
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidConfig`] if a pattern does not compile.
    pub fn with_extra_patterns(
        mut self,
        context: ErrorContext,
        patterns: &[String],
    ) -> Result<Self, ValidationError> {
        for (i, pattern) in patterns.iter().enumerate() {
            let regex = compile(pattern).map_err(|e| ValidationError::InvalidConfig {
                field: format!("classifier.extra_{context}_patterns[{i}]"),
                reason: e.to_string(),
            })?;
            self.rules.push(Rule {
                name: format!("extra-{context}-{}", i + 1),
                regex,
                contexts: vec![context],
            });
        }
        Ok(self)
    }

    /// Classifies stderr produced in `context`
    #[must_use]
    pub fn classify(&self, context: ErrorContext, stderr: &str) -> ErrorClass {
        self.rules
            .iter()
            .filter(|rule| rule.contexts.contains(&context))
            .find(|rule| rule.regex.is_match(stderr))
            .map_or(ErrorClass::Fatal, |rule| ErrorClass::Transient {
                rule: rule.name.clone(),
            })
    }

    /// Shorthand for `classify(..).is_retryable()`
    #[must_use]
    pub fn is_retryable(&self, context: ErrorContext, stderr: &str) -> bool {
        self.classify(context, stderr).is_retryable()
    }

    /// Version of the built-in table
    #[must_use]
    pub fn version(&self) -> u32 {
        CLASSIFIER_VERSION
    }

    /// Names of every rule, built-in first
    #[must_use]
    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|rule| rule.name.as_str()).collect()
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}
