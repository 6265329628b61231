use std::sync::{Arc, RwLock};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::constants::META_SHORT_CIRCUITED_BY;
use crate::domain::{NormalizedRecord, Payload, PayloadKind};
use crate::error::{PipelineError, StageError};
use crate::identity::IdGenerator;
use crate::observability::metrics;

pub mod normalizers;

pub use normalizers::{EventNormalizer, FieldNormalizer, FnStage, LineFilter};

/// What a stage hands back to the pipeline fold.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    /// Pass the payload on to the next stage.
    Continue(Payload),
    /// Stop here; later stages are unnecessary for this input.
    Halt(NormalizedRecord),
}

/// One pluggable normalization step.
///
/// Stages must be deterministic: the same input (and the same injected
/// configuration) always yields the same output.
pub trait TransformStage: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this stage can consume a payload of `kind`.
    fn accepts(&self, kind: PayloadKind) -> bool;

    fn output_kind(&self) -> PayloadKind;

    fn apply(&self, input: Payload) -> Result<StageOutcome, StageError>;
}

/// One fold over the chain, with the stage names it was run against.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizerRun {
    pub stages: Vec<String>,
    pub result: Result<NormalizedRecord, PipelineError>,
}

/// Ordered list of stages folded over one raw input per run.
#[derive(Default)]
pub struct Normalizer {
    stages: RwLock<Vec<Arc<dyn TransformStage>>>,
}

impl Normalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a stage to the end of the chain. Compatibility with the previous
    /// stage is checked when the pipeline runs, not here.
    pub fn append_stage(&self, stage: Arc<dyn TransformStage>) {
        debug!("Appending stage {}", stage.name());
        self.stages
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(stage);
    }

    /// The standard game-log chain: line filter, team, player, event.
    pub fn game_log(ids: Arc<dyn IdGenerator>) -> Self {
        Self::new()
            .with_stage(LineFilter::new())
            .with_stage(FieldNormalizer::team(ids.clone()))
            .with_stage(FieldNormalizer::player(ids))
            .with_stage(EventNormalizer::new())
    }

    pub fn with_stage(self, stage: impl TransformStage + 'static) -> Self {
        self.append_stage(Arc::new(stage));
        self
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.snapshot().iter().map(|s| s.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<dyn TransformStage>> {
        self.stages
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Check the declared kinds of the current chain for an input of `input`
    /// without running anything.
    pub fn validate_chain(&self, input: PayloadKind) -> Result<(), PipelineError> {
        let stages = self.snapshot();
        let mut kind = input;
        for (index, stage) in stages.iter().enumerate() {
            if !stage.accepts(kind) {
                return Err(PipelineError::IncompatibleStage {
                    index,
                    stage: stage.name().to_string(),
                    found: kind,
                });
            }
            kind = stage.output_kind();
        }
        if kind != PayloadKind::Record {
            return Err(PipelineError::Unshaped {
                found: kind,
                stage_count: stages.len(),
            });
        }
        Ok(())
    }

    /// Fold `raw` through every stage registered at call time.
    pub fn run(&self, raw: Payload) -> Result<NormalizedRecord, PipelineError> {
        self.execute(raw, &CancellationToken::new()).result
    }

    /// Like [`Normalizer::run`], stopping before the next stage once `cancel` fires.
    pub fn run_with_cancel(&self, raw: Payload, cancel: &CancellationToken) -> Result<NormalizedRecord, PipelineError> {
        self.execute(raw, cancel).result
    }

    /// Fold `raw` through one snapshot of the chain and report which stages
    /// that snapshot held.
    #[instrument(skip(self, raw, cancel), fields(input_kind = ?raw.kind()))]
    pub fn execute(&self, raw: Payload, cancel: &CancellationToken) -> NormalizerRun {
        let stages = self.snapshot();
        let result = Self::fold(&stages, raw, cancel);
        NormalizerRun {
            stages: stages.iter().map(|s| s.name().to_string()).collect(),
            result,
        }
    }

    fn fold(
        stages: &[Arc<dyn TransformStage>],
        raw: Payload,
        cancel: &CancellationToken,
    ) -> Result<NormalizedRecord, PipelineError> {
        let started = Instant::now();
        let mut current = raw;

        for (index, stage) in stages.iter().enumerate() {
            if cancel.is_cancelled() {
                info!("Normalization cancelled before stage {} ({})", index, stage.name());
                return Err(PipelineError::Cancelled { index });
            }

            let kind = current.kind();
            if !stage.accepts(kind) {
                warn!("Stage {} ({}) cannot accept {:?}", index, stage.name(), kind);
                return Err(PipelineError::IncompatibleStage {
                    index,
                    stage: stage.name().to_string(),
                    found: kind,
                });
            }

            match stage.apply(current) {
                Ok(StageOutcome::Continue(next)) => {
                    debug!("Stage {} ({}) produced {:?}", index, stage.name(), next.kind());
                    current = next;
                }
                Ok(StageOutcome::Halt(record)) => {
                    info!("Stage {} ({}) short-circuited the pipeline", index, stage.name());
                    metrics::normalize::short_circuited(stage.name());
                    metrics::normalize::duration(started.elapsed().as_secs_f64());
                    return Ok(record
                        .to_builder()
                        .meta(META_SHORT_CIRCUITED_BY, stage.name())
                        .build());
                }
                Err(cause) => {
                    warn!("Stage {} ({}) failed: {}", index, stage.name(), cause);
                    metrics::normalize::stage_failed(stage.name());
                    return Err(PipelineError::Stage {
                        failed_stage_index: index,
                        failed_stage_name: stage.name().to_string(),
                        cause,
                    });
                }
            }
        }

        metrics::normalize::duration(started.elapsed().as_secs_f64());
        match current {
            Payload::Record(record) => Ok(record),
            other => Err(PipelineError::Unshaped {
                found: other.kind(),
                stage_count: stages.len(),
            }),
        }
    }
}
