//! Metrics collection
//!
//! Aggregates apply retry statistics across a pipeline run.

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Retries spent on one apply
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryMetrics {
    /// Stage name
    pub stage: String,
    /// Manifest path or kustomization source
    pub resource: String,
    /// Retries after the first attempt
    pub retry_count: u32,
    /// Time spent until success
    pub retry_time: Duration,
}

/// Totals for a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Identifier of the run
    pub run_id: Uuid,
    /// Applies that needed at least one retry
    pub retried_applies: usize,
    /// Sum of all retries
    pub total_retries: u32,
    /// Sum of all retry time
    pub total_retry_time: Duration,
    /// Individual records, in recording order
    pub records: Vec<RetryMetrics>,
}

/// Metrics collector for a pipeline run
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    run_id: Uuid,
    records: Arc<RwLock<Vec<RetryMetrics>>>,
}

impl MetricsCollector {
    /// Creates a collector with a fresh run id
    #[must_use]
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            records: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Identifier of this run
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Records one apply's retries
    pub fn record(&self, metrics: RetryMetrics) {
        tracing::info!(
            run_id = %self.run_id,
            stage = %metrics.stage,
            resource = %metrics.resource,
            retry_count = metrics.retry_count,
            retry_time_secs = metrics.retry_time.as_secs_f64(),
            "Apply needed retries"
        );
        self.records.write().push(metrics);
    }

    /// Records belonging to `stage`
    #[must_use]
    pub fn for_stage(&self, stage: &str) -> Vec<RetryMetrics> {
        self.records
            .read()
            .iter()
            .filter(|record| record.stage == stage)
            .cloned()
            .collect()
    }

    /// Every record
    #[must_use]
    pub fn get_all(&self) -> Vec<RetryMetrics> {
        self.records.read().clone()
    }

    /// Totals across the run
    #[must_use]
    pub fn summary(&self) -> RunSummary {
        let records = self.get_all();
        RunSummary {
            run_id: self.run_id,
            retried_applies: records.len(),
            total_retries: records.iter().map(|r| r.retry_count).sum(),
            total_retry_time: records.iter().map(|r| r.retry_time).sum(),
            records,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
