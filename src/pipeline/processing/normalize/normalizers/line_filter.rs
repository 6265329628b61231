use crate::domain::{NormalizedRecord, Payload, PayloadKind};
use crate::error::StageError;
use crate::pipeline::processing::normalize::{StageOutcome, TransformStage};

/// Drops blank and comment lines from raw text. When nothing is left the
/// pipeline is halted with an empty record instead of failing later stages.
pub struct LineFilter {
    comment_prefix: String,
}

impl LineFilter {
    pub fn new() -> Self {
        Self::with_comment_prefix("#")
    }

    pub fn with_comment_prefix(prefix: impl Into<String>) -> Self {
        Self {
            comment_prefix: prefix.into(),
        }
    }
}

impl Default for LineFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformStage for LineFilter {
    fn name(&self) -> &str {
        "line-filter"
    }

    fn accepts(&self, kind: PayloadKind) -> bool {
        kind == PayloadKind::Text
    }

    fn output_kind(&self) -> PayloadKind {
        PayloadKind::Text
    }

    fn apply(&self, input: Payload) -> Result<StageOutcome, StageError> {
        let Payload::Text(text) = input else {
            return Err(StageError::new(self.name(), "expected raw text", "<record>"));
        };

        let kept: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with(self.comment_prefix.as_str()))
            .collect();

        if kept.is_empty() {
            let record = NormalizedRecord::builder()
                .warning("no content lines after filtering")
                .build();
            return Ok(StageOutcome::Halt(record));
        }

        Ok(StageOutcome::Continue(Payload::Text(kept.join("\n"))))
    }
}
