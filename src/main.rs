//! hotloop - stage-based manifest deployment
//!
//! ## Commands
//!
//! - `hotloop load` - Validate a stage file
//! - `hotloop patch` - Patch a YAML file in place
//! - `hotloop apply` - Apply a manifest or kustomization
//! - `hotloop wait` - Retry a command until it succeeds
//! - `hotloop wait-pod` - Wait for a pod to finish
//! - `hotloop run` - Execute a stage file
//! - `hotloop completions` - Generate shell completions
//!
//! ## Quick Start
//!
//! ```bash
//! # Check what a stage file would do
//! hotloop load stages.yaml
//!
//! # Deploy
//! hotloop --config hotloop.yaml run stages.yaml
//!
//! # Generate shell completions
//! hotloop completions bash > /etc/bash_completion.d/hotloop
//! ```

use std::process::ExitCode;

mod cli;

fn main() -> ExitCode {
    match cli::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            if std::env::var("HOTLOOP_VERBOSE").is_ok() {
                eprintln!("{e:?}");
            }
            ExitCode::FAILURE
        }
    }
}
