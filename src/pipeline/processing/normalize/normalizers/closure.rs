use crate::domain::{Payload, PayloadKind};
use crate::error::StageError;
use crate::pipeline::processing::normalize::{StageOutcome, TransformStage};

type StageFn = dyn Fn(Payload) -> Result<StageOutcome, StageError> + Send + Sync;

/// Adapts a closure into a stage with a fixed input and output kind.
pub struct FnStage {
    name: String,
    input: PayloadKind,
    output: PayloadKind,
    f: Box<StageFn>,
}

impl FnStage {
    pub fn new<F>(name: impl Into<String>, input: PayloadKind, output: PayloadKind, f: F) -> Self
    where
        F: Fn(Payload) -> Result<StageOutcome, StageError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            input,
            output,
            f: Box::new(f),
        }
    }
}

impl TransformStage for FnStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts(&self, kind: PayloadKind) -> bool {
        kind == self.input
    }

    fn output_kind(&self) -> PayloadKind {
        self.output
    }

    fn apply(&self, input: Payload) -> Result<StageOutcome, StageError> {
        (self.f)(input)
    }
}
