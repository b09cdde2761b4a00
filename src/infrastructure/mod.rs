//! Infrastructure layer
//!
//! This module contains external integrations and adapters.

mod cluster;
mod config;
mod logging;
mod metrics;
mod signal;

pub use cluster::{ClusterCli, LabelSelector, PodPhase, PodStatus, parse_pod_list};
pub use config::{ApplyConfig, ClassifierConfig, Config, PodWaitConfig, WaitConfig};
pub use logging::init_logging;
pub use metrics::{MetricsCollector, RetryMetrics, RunSummary};
pub use signal::cancel_on_ctrl_c;
