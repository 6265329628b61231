//! Metrics for the normalization and export pipeline.
//!
//! Recording goes through the `metrics` facade; nothing is exported unless
//! the host process installs a recorder.

use std::fmt;

/// Enum representing all metric names used in the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Flow metrics
    FlowRuns,
    FlowCancelled,

    // Normalize metrics
    NormalizeStageFailures,
    NormalizeShortCircuits,
    NormalizeDuration,

    // Export metrics
    ExportAttempts,
    ExportDuration,
    ExportBytes,
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MetricName::FlowRuns => "diamond_runs_total",
            MetricName::FlowCancelled => "diamond_runs_cancelled_total",
            MetricName::NormalizeStageFailures => "diamond_stage_failures_total",
            MetricName::NormalizeShortCircuits => "diamond_stage_short_circuits_total",
            MetricName::NormalizeDuration => "diamond_normalize_duration_seconds",
            MetricName::ExportAttempts => "diamond_exports_total",
            MetricName::ExportDuration => "diamond_export_duration_seconds",
            MetricName::ExportBytes => "diamond_export_bytes",
        };
        write!(f, "{}", name)
    }
}

pub mod flow {
    use super::MetricName;

    /// Record a finished run by its terminal status
    pub fn run_finished(status: &str) {
        ::metrics::counter!(MetricName::FlowRuns.to_string(), "status" => status.to_string()).increment(1);
    }

    pub fn run_cancelled(phase: &str) {
        ::metrics::counter!(MetricName::FlowCancelled.to_string(), "phase" => phase.to_string()).increment(1);
    }
}

pub mod normalize {
    use super::MetricName;

    pub fn stage_failed(stage: &str) {
        ::metrics::counter!(MetricName::NormalizeStageFailures.to_string(), "stage" => stage.to_string()).increment(1);
    }

    pub fn short_circuited(stage: &str) {
        ::metrics::counter!(MetricName::NormalizeShortCircuits.to_string(), "stage" => stage.to_string()).increment(1);
    }

    pub fn duration(secs: f64) {
        ::metrics::histogram!(MetricName::NormalizeDuration.to_string()).record(secs);
    }
}

pub mod export {
    use super::MetricName;

    /// Record one sink invocation; `result` is "success" or "error"
    pub fn attempted(format: &str, result: &str) {
        ::metrics::counter!(
            MetricName::ExportAttempts.to_string(),
            "format" => format.to_string(),
            "result" => result.to_string()
        )
        .increment(1);
    }

    pub fn duration(format: &str, secs: f64) {
        ::metrics::histogram!(MetricName::ExportDuration.to_string(), "format" => format.to_string()).record(secs);
    }

    pub fn bytes_written(format: &str, bytes: u64) {
        ::metrics::histogram!(MetricName::ExportBytes.to_string(), "format" => format.to_string()).record(bytes as f64);
    }
}
