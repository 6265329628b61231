// Observability: metrics recorded through the `metrics` facade

pub mod metrics;

pub use metrics::MetricName;
