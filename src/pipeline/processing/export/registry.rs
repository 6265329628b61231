use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::sinks::{CsvSink, JsonSink, SqliteSink};
use crate::constants::{CSV_FORMAT, JSON_FORMAT, SQLITE_FORMAT};
use super::{Artifact, ExportSink};
use crate::domain::NormalizedRecord;
use crate::error::{DispatchError, ExportError};
use crate::observability::metrics;

/// Where a dispatch writes: `dir/stem.<ext>` per format.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportTarget {
    pub dir: PathBuf,
    pub stem: String,
}

impl ExportTarget {
    pub fn new(dir: impl Into<PathBuf>, stem: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            stem: stem.into(),
        }
    }

    /// Destination for the `repeat`-th request of a format within one dispatch.
    pub fn destination(&self, extension: &str, repeat: usize) -> PathBuf {
        let file_name = if repeat == 0 {
            format!("{}.{}", self.stem, extension)
        } else {
            format!("{}-{}.{}", self.stem, repeat, extension)
        };
        self.dir.join(file_name)
    }
}

/// Result for one entry of the requested format list.
#[derive(Debug, Clone, PartialEq)]
pub struct FormatResult {
    pub format: String,
    pub result: Result<Artifact, DispatchError>,
}

impl FormatResult {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Per-format outcomes, in request order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DispatchReport {
    pub entries: Vec<FormatResult>,
}

impl DispatchReport {
    pub fn succeeded(&self) -> impl Iterator<Item = (&str, &Artifact)> {
        self.entries
            .iter()
            .filter_map(|e| e.result.as_ref().ok().map(|a| (e.format.as_str(), a)))
    }

    pub fn failed(&self) -> impl Iterator<Item = (&str, &DispatchError)> {
        self.entries
            .iter()
            .filter_map(|e| e.result.as_ref().err().map(|err| (e.format.as_str(), err)))
    }

    pub fn all_succeeded(&self) -> bool {
        self.entries.iter().all(FormatResult::is_success)
    }

    pub fn any_succeeded(&self) -> bool {
        self.entries.iter().any(FormatResult::is_success)
    }
}

/// Name-keyed export sinks. Registration replaces any earlier sink under
/// the same name.
#[derive(Default)]
pub struct SinkRegistry {
    sinks: RwLock<HashMap<String, Arc<dyn ExportSink>>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the json, csv and sqlite sinks.
    pub fn with_default_sinks() -> Self {
        let registry = Self::new();
        registry.register(JSON_FORMAT, Arc::new(JsonSink::new()));
        registry.register(CSV_FORMAT, Arc::new(CsvSink::new()));
        registry.register(SQLITE_FORMAT, Arc::new(SqliteSink::new()));
        registry
    }

    /// Register `sink` under `name`, returning the sink it replaced.
    pub fn register(&self, name: impl Into<String>, sink: Arc<dyn ExportSink>) -> Option<Arc<dyn ExportSink>> {
        let name = name.into();
        let previous = self
            .sinks
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name.clone(), sink);
        if previous.is_some() {
            info!("Replaced sink registered for '{}'", name);
        }
        previous
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ExportSink>> {
        self.sinks
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }

    pub fn registered_formats(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .sinks
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Capture the sinks for `formats` as they are registered right now.
    pub fn snapshot(&self, formats: &[String]) -> Vec<(String, Option<Arc<dyn ExportSink>>)> {
        let sinks = self.sinks.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        formats
            .iter()
            .map(|format| (format.clone(), sinks.get(format).cloned()))
            .collect()
    }

    /// Export `record` once per requested format.
    ///
    /// Formats run concurrently on the blocking pool and fail independently;
    /// the report has exactly one entry per request, in request order.
    /// Repeated formats are exported again to a suffixed destination.
    pub async fn dispatch(
        &self,
        record: Arc<NormalizedRecord>,
        formats: &[String],
        target: &ExportTarget,
    ) -> DispatchReport {
        self.dispatch_with_cancel(record, formats, target, &CancellationToken::new())
            .await
    }

    /// Like [`SinkRegistry::dispatch`]. Sinks not yet started when `cancel`
    /// fires are skipped and reported as cancelled; started ones finish.
    #[instrument(skip(self, record, target, cancel), fields(stem = %target.stem))]
    pub async fn dispatch_with_cancel(
        &self,
        record: Arc<NormalizedRecord>,
        formats: &[String],
        target: &ExportTarget,
        cancel: &CancellationToken,
    ) -> DispatchReport {
        let snapshot = self.snapshot(formats);
        let mut slots: Vec<Option<FormatResult>> = vec![None; snapshot.len()];
        let mut handles = Vec::new();
        let mut seen: HashMap<&str, usize> = HashMap::new();

        for (index, (format, sink)) in snapshot.iter().enumerate() {
            let repeat = seen.entry(format.as_str()).or_insert(0);
            let occurrence = *repeat;
            *repeat += 1;

            let Some(sink) = sink.clone() else {
                warn!("No sink registered for '{}'", format);
                metrics::export::attempted(format, "unregistered");
                slots[index] = Some(FormatResult {
                    format: format.clone(),
                    result: Err(DispatchError::UnregisteredSink { format: format.clone() }),
                });
                continue;
            };

            if cancel.is_cancelled() {
                info!("Skipping '{}': dispatch cancelled", format);
                metrics::export::attempted(format, "cancelled");
                slots[index] = Some(FormatResult {
                    format: format.clone(),
                    result: Err(DispatchError::Cancelled { format: format.clone() }),
                });
                continue;
            }

            let destination = target.destination(sink.extension(), occurrence);
            let record = record.clone();
            let task_destination = destination.clone();
            debug!("Dispatching '{}' to {}", format, destination.display());
            let handle = tokio::task::spawn_blocking(move || {
                let started = Instant::now();
                let result = sink.export(&record, &task_destination);
                (result, started.elapsed().as_secs_f64())
            });
            handles.push((index, format.clone(), destination, handle));
        }

        for (index, format, destination, handle) in handles {
            let result = match handle.await {
                Ok((result, secs)) => {
                    metrics::export::duration(&format, secs);
                    result
                }
                Err(join_err) => Err(ExportError::PartialWriteAborted {
                    destination,
                    reason: format!("sink task failed: {}", join_err),
                }),
            };

            match &result {
                Ok(artifact) => {
                    info!("Exported '{}' to {}", format, artifact.path.display());
                    metrics::export::attempted(&format, "success");
                    metrics::export::bytes_written(&format, artifact.bytes_written);
                }
                Err(e) => {
                    warn!("Export '{}' failed: {}", format, e);
                    metrics::export::attempted(&format, "error");
                }
            }

            slots[index] = Some(FormatResult {
                format,
                result: result.map_err(DispatchError::from),
            });
        }

        DispatchReport {
            entries: slots.into_iter().flatten().collect(),
        }
    }
}

impl std::fmt::Debug for SinkRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkRegistry")
            .field("formats", &self.registered_formats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{OnceLock, Weak};
    use tempfile::tempdir;

    /// Writes a marker file and counts invocations.
    struct MarkerSink {
        marker: &'static str,
        calls: Arc<AtomicUsize>,
    }

    impl ExportSink for MarkerSink {
        fn format(&self) -> &str {
            "marker"
        }
        fn extension(&self) -> &str {
            "txt"
        }
        fn export(&self, _record: &NormalizedRecord, destination: &Path) -> Result<Artifact, ExportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let bytes_written = super::super::atomic_write(destination, self.marker.as_bytes())?;
            Ok(Artifact {
                format: "marker".to_string(),
                path: destination.to_path_buf(),
                bytes_written,
            })
        }
    }

    struct BrokenSink;

    impl ExportSink for BrokenSink {
        fn format(&self) -> &str {
            "broken"
        }
        fn extension(&self) -> &str {
            "bin"
        }
        fn export(&self, _record: &NormalizedRecord, destination: &Path) -> Result<Artifact, ExportError> {
            Err(ExportError::DestinationUnwritable {
                destination: destination.to_path_buf(),
                reason: "read-only".to_string(),
            })
        }
    }

    struct PanickingSink;

    impl ExportSink for PanickingSink {
        fn format(&self) -> &str {
            "panic"
        }
        fn extension(&self) -> &str {
            "bin"
        }
        fn export(&self, _record: &NormalizedRecord, _destination: &Path) -> Result<Artifact, ExportError> {
            panic!("sink bug");
        }
    }

    fn formats(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn marker(text: &'static str) -> (Arc<dyn ExportSink>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (Arc::new(MarkerSink { marker: text, calls: calls.clone() }), calls)
    }

    #[test]
    fn test_default_sinks_registered() {
        let registry = SinkRegistry::with_default_sinks();
        assert_eq!(registry.registered_formats(), vec!["csv", "json", "sqlite"]);
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let dir = tempdir().unwrap();
        let registry = SinkRegistry::new();
        let (first, first_calls) = marker("first");
        let (second, second_calls) = marker("second");
        assert!(registry.register("txt", first).is_none());
        assert!(registry.register("txt", second).is_some());

        let report = registry
            .dispatch(Arc::new(NormalizedRecord::empty()), &formats(&["txt"]), &ExportTarget::new(dir.path(), "game"))
            .await;

        assert!(report.all_succeeded());
        assert_eq!(first_calls.load(Ordering::SeqCst), 0);
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
        assert_eq!(std::fs::read_to_string(dir.path().join("game.txt")).unwrap(), "second");
    }

    #[tokio::test]
    async fn test_failures_are_independent_and_ordered() {
        let dir = tempdir().unwrap();
        let registry = SinkRegistry::new();
        let (good, _) = marker("ok");
        registry.register("good", good);
        registry.register("broken", Arc::new(BrokenSink));
        registry.register("panic", Arc::new(PanickingSink));

        let report = registry
            .dispatch(
                Arc::new(NormalizedRecord::empty()),
                &formats(&["broken", "missing", "good", "panic"]),
                &ExportTarget::new(dir.path(), "game"),
            )
            .await;

        let order: Vec<&str> = report.entries.iter().map(|e| e.format.as_str()).collect();
        assert_eq!(order, vec!["broken", "missing", "good", "panic"]);
        assert!(report.any_succeeded());
        assert!(!report.all_succeeded());
        assert!(matches!(
            report.entries[0].result,
            Err(DispatchError::Export(ExportError::DestinationUnwritable { .. }))
        ));
        assert!(matches!(
            &report.entries[1].result,
            Err(DispatchError::UnregisteredSink { format }) if format == "missing"
        ));
        assert!(report.entries[2].is_success());
        assert!(matches!(
            report.entries[3].result,
            Err(DispatchError::Export(ExportError::PartialWriteAborted { .. }))
        ));
        assert_eq!(report.failed().count(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_formats_get_their_own_artifacts() {
        let dir = tempdir().unwrap();
        let registry = SinkRegistry::new();
        let (sink, calls) = marker("dup");
        registry.register("txt", sink);

        let report = registry
            .dispatch(
                Arc::new(NormalizedRecord::empty()),
                &formats(&["txt", "txt"]),
                &ExportTarget::new(dir.path(), "game"),
            )
            .await;

        let paths: Vec<PathBuf> = report.succeeded().map(|(_, a)| a.path.clone()).collect();
        assert_eq!(paths, vec![dir.path().join("game.txt"), dir.path().join("game-1.txt")]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_snapshot_is_unaffected_by_later_registration() {
        let registry = SinkRegistry::new();
        let (first, _) = marker("first");
        registry.register("txt", first);
        let snapshot = registry.snapshot(&formats(&["txt", "json"]));

        registry.register(JSON_FORMAT, Arc::new(JsonSink::new()));

        assert!(snapshot[0].1.is_some());
        assert!(snapshot[1].1.is_none());
    }

    #[tokio::test]
    async fn test_cancelled_dispatch_starts_no_sink() {
        let dir = tempdir().unwrap();
        let registry = SinkRegistry::new();
        let (sink, calls) = marker("never");
        registry.register("txt", sink);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = registry
            .dispatch_with_cancel(
                Arc::new(NormalizedRecord::empty()),
                &formats(&["txt", "missing"]),
                &ExportTarget::new(dir.path(), "game"),
                &cancel,
            )
            .await;

        assert!(matches!(
            &report.entries[0].result,
            Err(DispatchError::Cancelled { format }) if format == "txt"
        ));
        assert!(matches!(report.entries[1].result, Err(DispatchError::UnregisteredSink { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!dir.path().join("game.txt").exists());
    }

    /// Re-registers sinks on its own registry while a dispatch is running.
    struct RegisteringSink {
        registry: Arc<OnceLock<Weak<SinkRegistry>>>,
        replacement: Arc<dyn ExportSink>,
    }

    impl ExportSink for RegisteringSink {
        fn format(&self) -> &str {
            "hook"
        }
        fn extension(&self) -> &str {
            "hook"
        }
        fn export(&self, _record: &NormalizedRecord, destination: &Path) -> Result<Artifact, ExportError> {
            if let Some(registry) = self.registry.get().and_then(Weak::upgrade) {
                registry.register("txt", self.replacement.clone());
                registry.register("late", self.replacement.clone());
            }
            Ok(Artifact {
                format: "hook".to_string(),
                path: destination.to_path_buf(),
                bytes_written: 0,
            })
        }
    }

    #[tokio::test]
    async fn test_registration_during_dispatch_applies_to_later_dispatches() {
        let dir = tempdir().unwrap();
        let owner = Arc::new(OnceLock::new());
        let (original, original_calls) = marker("original");
        let (replacement, replacement_calls) = marker("replacement");
        let registry = Arc::new(SinkRegistry::new());
        registry.register("txt", original);
        registry.register(
            "hook",
            Arc::new(RegisteringSink {
                registry: owner.clone(),
                replacement,
            }),
        );
        owner.set(Arc::downgrade(&registry)).unwrap();

        let report = registry
            .dispatch(
                Arc::new(NormalizedRecord::empty()),
                &formats(&["hook", "txt", "late"]),
                &ExportTarget::new(dir.path(), "game"),
            )
            .await;

        assert!(report.entries[0].is_success());
        assert!(report.entries[1].is_success());
        assert!(matches!(report.entries[2].result, Err(DispatchError::UnregisteredSink { .. })));
        assert_eq!(original_calls.load(Ordering::SeqCst), 1);
        assert_eq!(replacement_calls.load(Ordering::SeqCst), 0);
        assert_eq!(std::fs::read_to_string(dir.path().join("game.txt")).unwrap(), "original");
        assert!(registry.get("late").is_some());
    }
}
