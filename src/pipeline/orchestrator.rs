//! Top-level flow: load raw input, normalize it, export it.
//!
//! Each run keeps its own state trail, so one manager can serve concurrent
//! runs. A run never returns an error; everything that went wrong is carried
//! in the [`RunOutcome`].

use chrono::Utc;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::app::ports::{FileStorePort, Locator, ProvenanceEntry, ProvenancePort};
use crate::config::AppConfig;
use crate::constants::{META_SOURCE, STAGING_DATA_DIR};
use crate::domain::{NormalizedRecord, Payload};
use crate::error::{ConfigError, DispatchError, FlowError, PipelineError};
use crate::identity::fingerprint;
use crate::observability::metrics;
use crate::pipeline::processing::export::{Artifact, DispatchReport, ExportTarget, SinkRegistry};
use crate::pipeline::processing::normalize::Normalizer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Phase {
    Load,
    Normalize,
    Export,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Load => "load",
            Phase::Normalize => "normalize",
            Phase::Export => "export",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    Success,
    Partial,
    Failure,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Failure => "failure",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FlowState {
    Idle,
    Loading,
    Normalizing,
    Exporting,
    Done(RunStatus),
}

/// Everything a caller needs to know about one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub status: RunStatus,
    /// Phase the run died in; `None` unless the status is `Failure`.
    pub failed_phase: Option<Phase>,
    /// States visited, in order, from `Idle` to `Done`.
    pub states: Vec<FlowState>,
    pub record: Option<Arc<NormalizedRecord>>,
    pub report: Option<DispatchReport>,
    pub errors: Vec<FlowError>,
    pub warnings: Vec<String>,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    pub fn artifacts(&self) -> Vec<&Artifact> {
        self.report
            .iter()
            .flat_map(|report| report.succeeded().map(|(_, artifact)| artifact))
            .collect()
    }

    /// Formats that failed, with the reason, in request order.
    pub fn failed_formats(&self) -> Vec<(&str, &DispatchError)> {
        self.report
            .iter()
            .flat_map(|report| report.failed())
            .collect()
    }
}

/// Per-run bookkeeping; never shared between runs.
struct RunTrace {
    states: Vec<FlowState>,
    errors: Vec<FlowError>,
    warnings: Vec<String>,
}

impl RunTrace {
    fn new() -> Self {
        Self {
            states: vec![FlowState::Idle],
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn enter(&mut self, state: FlowState) {
        self.states.push(state);
    }

    fn fail(mut self, phase: Phase, err: FlowError) -> RunOutcome {
        error!("Run failed during {}: {}", phase, err);
        self.errors.push(err);
        self.finish(RunStatus::Failure, Some(phase), None, None)
    }

    fn finish(
        mut self,
        status: RunStatus,
        failed_phase: Option<Phase>,
        record: Option<Arc<NormalizedRecord>>,
        report: Option<DispatchReport>,
    ) -> RunOutcome {
        self.states.push(FlowState::Done(status));
        metrics::flow::run_finished(status.as_str());
        RunOutcome {
            status,
            failed_phase,
            states: self.states,
            record,
            report,
            errors: self.errors,
            warnings: self.warnings,
        }
    }
}

fn cancelled(trace: RunTrace, phase: Phase) -> RunOutcome {
    warn!("Run cancelled before {}", phase);
    metrics::flow::run_cancelled(&phase.to_string());
    trace.fail(phase, FlowError::Cancelled { phase })
}

pub struct GameFlowManager {
    files: Arc<dyn FileStorePort>,
    normalizer: Arc<Normalizer>,
    sinks: Arc<SinkRegistry>,
    provenance: Option<Arc<dyn ProvenancePort>>,
    output_dir: PathBuf,
    app_name: String,
    app_version: String,
}

impl GameFlowManager {
    pub fn new(
        files: Arc<dyn FileStorePort>,
        normalizer: Arc<Normalizer>,
        sinks: Arc<SinkRegistry>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            files,
            normalizer,
            sinks,
            provenance: None,
            output_dir: output_dir.into(),
            app_name: env!("CARGO_PKG_NAME").to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Manager writing into the configured staging directory and stamping
    /// provenance with the configured app metadata.
    pub fn from_config(
        config: &AppConfig,
        files: Arc<dyn FileStorePort>,
        normalizer: Arc<Normalizer>,
        sinks: Arc<SinkRegistry>,
    ) -> Result<Self, ConfigError> {
        let output_dir = config.get_path(STAGING_DATA_DIR)?.to_path_buf();
        Ok(Self::new(files, normalizer, sinks, output_dir).with_app(config.app_name(), config.app_version()))
    }

    pub fn with_provenance(mut self, recorder: Arc<dyn ProvenancePort>) -> Self {
        self.provenance = Some(recorder);
        self
    }

    pub fn with_app(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.app_name = name.into();
        self.app_version = version.into();
        self
    }

    pub fn normalizer(&self) -> &Arc<Normalizer> {
        &self.normalizer
    }

    pub fn sinks(&self) -> &Arc<SinkRegistry> {
        &self.sinks
    }

    pub fn output_dir(&self) -> &PathBuf {
        &self.output_dir
    }

    pub async fn run(&self, source: &Locator, formats: &[String]) -> RunOutcome {
        self.run_with_cancel(source, formats, &CancellationToken::new()).await
    }

    /// Run load → normalize → export, checking `cancel` before each phase,
    /// between stages and before each sink starts.
    #[instrument(skip(self, formats, cancel), fields(source = %source))]
    pub async fn run_with_cancel(
        &self,
        source: &Locator,
        formats: &[String],
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let mut trace = RunTrace::new();

        if cancel.is_cancelled() {
            return cancelled(trace, Phase::Load);
        }
        trace.enter(FlowState::Loading);
        let text = match self.files.load_text(source).await {
            Ok(text) => text,
            Err(e) => {
                return trace.fail(
                    Phase::Load,
                    FlowError::SourceUnavailable {
                        locator: source.to_string(),
                        reason: e.to_string(),
                    },
                );
            }
        };
        info!("Loaded {} bytes from {}", text.len(), source);

        if cancel.is_cancelled() {
            return cancelled(trace, Phase::Normalize);
        }
        trace.enter(FlowState::Normalizing);
        let normalizer = self.normalizer.clone();
        let stage_cancel = cancel.clone();
        let normalized =
            tokio::task::spawn_blocking(move || normalizer.execute(Payload::Text(text), &stage_cancel)).await;
        let (stages, record) = match normalized {
            Ok(run) => match run.result {
                Ok(record) => (run.stages, record),
                Err(PipelineError::Cancelled { index }) => {
                    info!("Normalization stopped before stage {}", index);
                    return cancelled(trace, Phase::Normalize);
                }
                Err(e) => return trace.fail(Phase::Normalize, FlowError::Pipeline(e)),
            },
            Err(join_err) => {
                return trace.fail(
                    Phase::Normalize,
                    FlowError::Aborted {
                        phase: Phase::Normalize,
                        reason: join_err.to_string(),
                    },
                );
            }
        };
        let record = Arc::new(record.to_builder().meta(META_SOURCE, source.to_string()).build());
        info!(
            "Normalized {} tokens into {} events",
            record.tokens().len(),
            record.events().len()
        );

        if cancel.is_cancelled() {
            return cancelled(trace, Phase::Export);
        }
        trace.enter(FlowState::Exporting);
        let target = ExportTarget::new(&self.output_dir, source.stem());
        let report = self
            .sinks
            .dispatch_with_cancel(record.clone(), formats, &target, cancel)
            .await;

        for (format, err) in report.failed() {
            trace.errors.push(FlowError::Dispatch {
                format: format.to_string(),
                source: err.clone(),
            });
        }

        let status = if report.all_succeeded() {
            RunStatus::Success
        } else if report.any_succeeded() {
            RunStatus::Partial
        } else {
            RunStatus::Failure
        };

        if status != RunStatus::Failure {
            if let Some(warning) = self.record_provenance(source, &stages, &record, &report).await {
                trace.warnings.push(warning);
            }
        }

        let failed_phase = (status == RunStatus::Failure).then_some(Phase::Export);
        info!("Run finished: {}", status.as_str());
        trace.finish(status, failed_phase, Some(record), Some(report))
    }

    /// Returns a warning when provenance could not be recorded.
    async fn record_provenance(
        &self,
        source: &Locator,
        stages: &[String],
        record: &NormalizedRecord,
        report: &DispatchReport,
    ) -> Option<String> {
        let recorder = self.provenance.as_ref()?;

        let bytes = match record.canonical_json() {
            Ok(bytes) => bytes,
            Err(e) => return Some(FlowError::Provenance(e.to_string()).to_string()),
        };
        let record_sha256 = fingerprint(&bytes);
        let run_id = Uuid::new_v5(
            &Uuid::NAMESPACE_OID,
            format!("{}|{}", source, record_sha256).as_bytes(),
        )
        .to_string();

        let entry = ProvenanceEntry {
            run_id,
            app_name: self.app_name.clone(),
            app_version: self.app_version.clone(),
            source: source.to_string(),
            stages: stages.to_vec(),
            record_sha256,
            artifacts: report.succeeded().map(|(_, a)| a.path.clone()).collect(),
            recorded_at: Utc::now(),
        };

        match recorder.record(&entry).await {
            Ok(()) => None,
            Err(e) => {
                warn!("Failed to record provenance: {}", e);
                Some(FlowError::Provenance(e).to_string())
            }
        }
    }
}
