use std::path::Path;

use crate::constants::JSON_FORMAT;
use crate::domain::NormalizedRecord;
use crate::error::ExportError;
use crate::pipeline::processing::export::{atomic_write, Artifact, ExportSink};

/// Pretty-printed JSON of the whole record.
#[derive(Debug, Default, Clone)]
pub struct JsonSink;

impl JsonSink {
    pub fn new() -> Self {
        Self
    }
}

impl ExportSink for JsonSink {
    fn format(&self) -> &str {
        JSON_FORMAT
    }

    fn extension(&self) -> &str {
        "json"
    }

    fn export(&self, record: &NormalizedRecord, destination: &Path) -> Result<Artifact, ExportError> {
        let mut bytes = serde_json::to_vec_pretty(record).map_err(|e| ExportError::SerializationFailure {
            format: JSON_FORMAT.to_string(),
            reason: e.to_string(),
        })?;
        bytes.push(b'\n');

        let bytes_written = atomic_write(destination, &bytes)?;
        Ok(Artifact {
            format: JSON_FORMAT.to_string(),
            path: destination.to_path_buf(),
            bytes_written,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Event;
    use tempfile::tempdir;

    #[test]
    fn test_json_round_trips_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("game.json");
        let record = NormalizedRecord::builder()
            .token("EVENT:HomeRun")
            .event(Event::new("HomeRun").with_attribute("player", "Ortiz"))
            .meta("source", "e1.txt")
            .build();

        let artifact = JsonSink::new().export(&record, &path).unwrap();

        let parsed: NormalizedRecord = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(parsed, record);
        assert_eq!(artifact.format, "json");
        assert!(artifact.bytes_written > 0);
    }
}
