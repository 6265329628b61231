// Game-log pipeline: normalization, export, and the flow that ties them together

pub mod orchestrator;
pub mod processing;

pub use orchestrator::{FlowState, GameFlowManager, Phase, RunOutcome, RunStatus};
pub use processing::export::{DispatchReport, ExportSink, ExportTarget, SinkRegistry};
pub use processing::normalize::{FnStage, Normalizer, NormalizerRun, StageOutcome, TransformStage};
