use std::collections::HashMap;
use std::sync::Arc;

use super::base::{split_token, tokenize};
use crate::constants::{PLAYER_KEY, TEAM_KEY};
use crate::domain::{NormalizedRecord, Payload, PayloadKind};
use crate::error::StageError;
use crate::identity::IdGenerator;
use crate::pipeline::processing::normalize::{StageOutcome, TransformStage};

/// Canonicalizes one `KEY:value` field (team, player, ...) and attaches a
/// stable id for it.
///
/// Accepts raw text as well as records, so it can open a chain: text is
/// tokenized into a fresh record first. The canonical name lands in metadata
/// under the lower-cased key, the id under `<key>_id`.
pub struct FieldNormalizer {
    name: String,
    key: String,
    aliases: HashMap<String, String>,
    ids: Arc<dyn IdGenerator>,
}

impl FieldNormalizer {
    pub fn new(name: impl Into<String>, key: impl Into<String>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            aliases: HashMap::new(),
            ids,
        }
    }

    pub fn team(ids: Arc<dyn IdGenerator>) -> Self {
        Self::new("team-normalize", TEAM_KEY, ids)
    }

    pub fn player(ids: Arc<dyn IdGenerator>) -> Self {
        Self::new("player-normalize", PLAYER_KEY, ids)
    }

    /// Map a spelling (matched case-insensitively) onto its canonical name.
    pub fn with_alias(mut self, alias: &str, canonical: impl Into<String>) -> Self {
        self.aliases.insert(alias.to_lowercase(), canonical.into());
        self
    }

    pub fn with_aliases<I, A, C>(self, aliases: I) -> Self
    where
        I: IntoIterator<Item = (A, C)>,
        A: AsRef<str>,
        C: Into<String>,
    {
        aliases
            .into_iter()
            .fold(self, |stage, (alias, canonical)| stage.with_alias(alias.as_ref(), canonical))
    }

    fn canonicalize(&self, value: &str) -> String {
        self.aliases
            .get(&value.to_lowercase())
            .cloned()
            .unwrap_or_else(|| value.to_string())
    }
}

impl TransformStage for FieldNormalizer {
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts(&self, kind: PayloadKind) -> bool {
        matches!(kind, PayloadKind::Text | PayloadKind::Record)
    }

    fn output_kind(&self) -> PayloadKind {
        PayloadKind::Record
    }

    fn apply(&self, input: Payload) -> Result<StageOutcome, StageError> {
        let record = match input {
            Payload::Text(text) => NormalizedRecord::builder().tokens(tokenize(&text)).build(),
            Payload::Record(record) => record,
        };

        let mut values = Vec::new();
        for token in record.tokens() {
            if let Some((key, value)) = split_token(token) {
                if key != self.key {
                    continue;
                }
                if value.is_empty() {
                    return Err(StageError::new(
                        &self.name,
                        format!("{} token has no value", self.key),
                        token.as_str(),
                    ));
                }
                values.push(value.to_string());
            }
        }

        let field = self.key.to_lowercase();
        let mut builder = record.to_builder();
        match values.split_first() {
            None => {
                builder = builder.warning(format!("no {} token found", self.key));
            }
            Some((first, rest)) => {
                let canonical = self.canonicalize(first);
                let id = self.ids.generate_id(&format!("{}:{}", field, canonical));
                builder = builder
                    .meta(field.clone(), canonical.clone())
                    .meta(format!("{}_id", field), id);
                if rest.iter().any(|other| self.canonicalize(other) != canonical) {
                    builder = builder.warning(format!(
                        "multiple {} tokens; kept '{}'",
                        self.key, canonical
                    ));
                }
            }
        }

        Ok(StageOutcome::Continue(builder.bump_transform_count().build().into()))
    }
}
