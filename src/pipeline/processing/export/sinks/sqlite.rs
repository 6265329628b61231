use rusqlite::{params, Connection};
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::constants::SQLITE_FORMAT;
use crate::domain::NormalizedRecord;
use crate::error::ExportError;
use crate::pipeline::processing::export::{persist_temp, prepare_destination, temp_file_for, Artifact, ExportSink};

const SCHEMA: &str = "
CREATE TABLE tokens (position INTEGER PRIMARY KEY, token TEXT NOT NULL);
CREATE TABLE events (position INTEGER PRIMARY KEY, kind TEXT NOT NULL, attributes_json TEXT NOT NULL);
CREATE TABLE metadata (key TEXT PRIMARY KEY, value_json TEXT NOT NULL);
";

/// Tabular export into a fresh SQLite database file.
///
/// The database is built in a uniquely named temp file next to the
/// destination and renamed into place once committed and closed.
#[derive(Debug, Default, Clone)]
pub struct SqliteSink;

impl SqliteSink {
    pub fn new() -> Self {
        Self
    }

    fn populate(conn: &mut Connection, record: &NormalizedRecord, destination: &Path) -> Result<(), ExportError> {
        let serialization = |e: serde_json::Error| ExportError::SerializationFailure {
            format: SQLITE_FORMAT.to_string(),
            reason: e.to_string(),
        };

        let mut rows_events = Vec::with_capacity(record.events().len());
        for event in record.events() {
            rows_events.push((event.kind.as_str(), serde_json::to_string(&event.attributes).map_err(serialization)?));
        }
        let mut rows_meta = Vec::with_capacity(record.metadata().len());
        for (key, value) in record.metadata() {
            rows_meta.push((key.as_str(), serde_json::to_string(value).map_err(serialization)?));
        }

        let sql = |e: rusqlite::Error| ExportError::PartialWriteAborted {
            destination: destination.to_path_buf(),
            reason: e.to_string(),
        };

        conn.execute_batch(SCHEMA).map_err(sql)?;
        let tx = conn.transaction().map_err(sql)?;
        for (position, token) in record.tokens().iter().enumerate() {
            tx.execute(
                "INSERT INTO tokens (position, token) VALUES (?1, ?2)",
                params![position as i64, token],
            )
            .map_err(sql)?;
        }
        for (position, (kind, attributes)) in rows_events.iter().enumerate() {
            tx.execute(
                "INSERT INTO events (position, kind, attributes_json) VALUES (?1, ?2, ?3)",
                params![position as i64, kind, attributes],
            )
            .map_err(sql)?;
        }
        for (key, value) in &rows_meta {
            tx.execute(
                "INSERT INTO metadata (key, value_json) VALUES (?1, ?2)",
                params![key, value],
            )
            .map_err(sql)?;
        }
        tx.commit().map_err(sql)?;
        Ok(())
    }
}

impl ExportSink for SqliteSink {
    fn format(&self) -> &str {
        SQLITE_FORMAT
    }

    fn extension(&self) -> &str {
        "db"
    }

    fn export(&self, record: &NormalizedRecord, destination: &Path) -> Result<Artifact, ExportError> {
        let dir = prepare_destination(destination)?;
        let tmp = temp_file_for(destination, &dir)?;

        let mut conn = Connection::open(tmp.path()).map_err(|e| ExportError::DestinationUnwritable {
            destination: destination.to_path_buf(),
            reason: e.to_string(),
        })?;
        let populated = Self::populate(&mut conn, record, destination);
        let closed = conn.close().map_err(|(_, e)| ExportError::PartialWriteAborted {
            destination: destination.to_path_buf(),
            reason: e.to_string(),
        });
        // Dropping `tmp` on the error path removes the partial database
        populated.and(closed)?;

        persist_temp(tmp, destination)?;
        let bytes_written = fs::metadata(destination).map(|m| m.len()).unwrap_or(0);
        debug!("Wrote SQLite export {} ({} bytes)", destination.display(), bytes_written);

        Ok(Artifact {
            format: SQLITE_FORMAT.to_string(),
            path: destination.to_path_buf(),
            bytes_written,
        })
    }
}
