use once_cell::sync::Lazy;
use regex::Regex;

use super::base::split_token;
use crate::constants::EVENT_KEY;
use crate::domain::{Event, Payload, PayloadKind};
use crate::error::StageError;
use crate::pipeline::processing::normalize::{StageOutcome, TransformStage};

static EVENT_KIND_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("valid event kind regex"));

// Metadata fields copied onto every event when present
const CONTEXT_FIELDS: [&str; 4] = ["team", "team_id", "player", "player_id"];

/// Turns every `EVENT:<Kind>` token into an [`Event`], attaching whatever
/// team and player context earlier stages resolved.
pub struct EventNormalizer;

impl EventNormalizer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for EventNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformStage for EventNormalizer {
    fn name(&self) -> &str {
        "event-normalize"
    }

    fn accepts(&self, kind: PayloadKind) -> bool {
        kind == PayloadKind::Record
    }

    fn output_kind(&self) -> PayloadKind {
        PayloadKind::Record
    }

    fn apply(&self, input: Payload) -> Result<StageOutcome, StageError> {
        let Payload::Record(record) = input else {
            return Err(StageError::new(self.name(), "expected a record", "<text>"));
        };

        let mut events = Vec::new();
        for token in record.tokens() {
            let Some((key, kind)) = split_token(token) else {
                continue;
            };
            if key != EVENT_KEY {
                continue;
            }
            if !EVENT_KIND_RE.is_match(kind) {
                return Err(StageError::new(
                    self.name(),
                    "event kind must be alphanumeric and start with a letter",
                    token.as_str(),
                ));
            }

            let event = CONTEXT_FIELDS
                .iter()
                .filter_map(|field| record.metadata().get(*field).map(|v| (*field, v.clone())))
                .fold(Event::new(kind), |event, (field, value)| event.with_attribute(field, value));
            events.push(event);
        }

        let builder = events
            .into_iter()
            .fold(record.to_builder(), |builder, event| builder.event(event));
        Ok(StageOutcome::Continue(builder.bump_transform_count().build().into()))
    }
}
