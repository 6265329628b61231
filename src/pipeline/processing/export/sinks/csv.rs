use serde_json::Value;
use std::collections::BTreeSet;
use std::path::Path;

use crate::constants::CSV_FORMAT;
use crate::domain::NormalizedRecord;
use crate::error::ExportError;
use crate::pipeline::processing::export::{atomic_write, Artifact, ExportSink};

// Leading columns of every row, ahead of the sorted attribute columns
const RESERVED_COLUMNS: [&str; 2] = ["index", "kind"];

/// One row per event: `index,kind,<attribute columns>`.
///
/// Attribute columns are the sorted union of every event's attribute keys;
/// missing attributes are empty cells. Nested arrays and objects have no
/// CSV encoding and fail the export.
#[derive(Debug, Default, Clone)]
pub struct CsvSink;

impl CsvSink {
    pub fn new() -> Self {
        Self
    }

    fn render(record: &NormalizedRecord) -> Result<String, ExportError> {
        let columns: BTreeSet<&str> = record
            .events()
            .iter()
            .flat_map(|event| event.attributes.keys().map(String::as_str))
            .collect();
        if let Some(reserved) = RESERVED_COLUMNS.iter().find(|c| columns.contains(**c)) {
            return Err(ExportError::SerializationFailure {
                format: CSV_FORMAT.to_string(),
                reason: format!("attribute '{}' clashes with a fixed CSV column", reserved),
            });
        }

        let mut out = String::new();
        let header: Vec<String> = RESERVED_COLUMNS
            .into_iter()
            .chain(columns.iter().copied())
            .map(escape)
            .collect();
        out.push_str(&header.join(","));
        out.push_str("\r\n");

        for (index, event) in record.events().iter().enumerate() {
            let mut row = vec![index.to_string(), escape(&event.kind)];
            for column in &columns {
                let cell = match event.attributes.get(*column) {
                    None | Some(Value::Null) => String::new(),
                    Some(Value::String(s)) => escape(s),
                    Some(Value::Bool(b)) => b.to_string(),
                    Some(Value::Number(n)) => n.to_string(),
                    Some(Value::Array(_)) | Some(Value::Object(_)) => {
                        return Err(ExportError::SerializationFailure {
                            format: CSV_FORMAT.to_string(),
                            reason: format!(
                                "attribute '{}' of event {} ({}) is nested and has no CSV encoding",
                                column, index, event.kind
                            ),
                        });
                    }
                };
                row.push(cell);
            }
            out.push_str(&row.join(","));
            out.push_str("\r\n");
        }

        Ok(out)
    }
}

fn escape(field: &str) -> String {
    if field.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

impl ExportSink for CsvSink {
    fn format(&self) -> &str {
        CSV_FORMAT
    }

    fn extension(&self) -> &str {
        "csv"
    }

    fn export(&self, record: &NormalizedRecord, destination: &Path) -> Result<Artifact, ExportError> {
        let content = Self::render(record)?;
        let bytes_written = atomic_write(destination, content.as_bytes())?;
        Ok(Artifact {
            format: CSV_FORMAT.to_string(),
            path: destination.to_path_buf(),
            bytes_written,
        })
    }
}
