// End-to-end runs of the game-log flow against a temporary directory tree

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;
use tempfile::{tempdir, TempDir};
use tokio_util::sync::CancellationToken;

use diamond_parser::app::ports::Locator;
use diamond_parser::config::{AppConfig, AppMetadata, LoggingSettings, Settings};
use diamond_parser::constants::{CSV_FORMAT, JSON_FORMAT, RAW_DATA_DIR, SQLITE_FORMAT, STAGING_DATA_DIR};
use diamond_parser::error::{DispatchError, ExportError, FlowError, PipelineError};
use diamond_parser::identity::Uuid5IdGenerator;
use diamond_parser::infra::file_store::FsFileStore;
use diamond_parser::infra::provenance::InMemoryProvenanceRecorder;
use diamond_parser::domain::PayloadKind;
use diamond_parser::pipeline::{
    FlowState, FnStage, GameFlowManager, Normalizer, Phase, RunStatus, SinkRegistry, StageOutcome,
};

const GAME_LOG: &str = "TEAM:RedSox|PLAYER:Ortiz|EVENT:HomeRun";

struct Harness {
    _root: TempDir,
    config: Arc<AppConfig>,
    provenance: Arc<InMemoryProvenanceRecorder>,
}

impl Harness {
    fn new() -> Self {
        let root = tempdir().unwrap();
        let mut paths = BTreeMap::new();
        paths.insert(RAW_DATA_DIR.to_string(), PathBuf::from("raw"));
        paths.insert(STAGING_DATA_DIR.to_string(), PathBuf::from("out"));
        let settings = Settings {
            app: AppMetadata {
                name: "diamond_parser".to_string(),
                version: "0.1.0".to_string(),
            },
            paths,
            logging: LoggingSettings::default(),
        };
        let config = Arc::new(AppConfig::from_settings(settings, root.path()).unwrap());
        Self {
            _root: root,
            config,
            provenance: Arc::new(InMemoryProvenanceRecorder::new()),
        }
    }

    fn write_source(&self, name: &str, content: &str) -> Locator {
        let dir = self.config.get_path(RAW_DATA_DIR).unwrap();
        fs::write(dir.join(name), content).unwrap();
        Locator::keyed(RAW_DATA_DIR, name)
    }

    fn out_dir(&self) -> &Path {
        self.config.get_path(STAGING_DATA_DIR).unwrap()
    }

    fn manager(&self) -> GameFlowManager {
        let ids = Arc::new(Uuid5IdGenerator::new(self.config.app_name()));
        GameFlowManager::from_config(
            &self.config,
            Arc::new(FsFileStore::new(self.config.clone())),
            Arc::new(Normalizer::game_log(ids)),
            Arc::new(SinkRegistry::with_default_sinks()),
        )
        .unwrap()
        .with_provenance(self.provenance.clone())
    }
}

fn formats(list: &[&str]) -> Vec<String> {
    list.iter().map(|f| f.to_string()).collect()
}

#[tokio::test]
async fn test_single_home_run_exports_json_and_csv() {
    let harness = Harness::new();
    let source = harness.write_source("e1.txt", GAME_LOG);

    let outcome = harness
        .manager()
        .run(&source, &formats(&[JSON_FORMAT, CSV_FORMAT]))
        .await;

    assert_eq!(outcome.status, RunStatus::Success);
    assert!(outcome.errors.is_empty());
    assert_eq!(
        outcome.states,
        vec![
            FlowState::Idle,
            FlowState::Loading,
            FlowState::Normalizing,
            FlowState::Exporting,
            FlowState::Done(RunStatus::Success),
        ]
    );

    let record = outcome.record.clone().unwrap();
    assert_eq!(record.events().len(), 1);
    let event = &record.events()[0];
    assert_eq!(event.kind, "HomeRun");
    assert_eq!(event.attributes.get("team"), Some(&json!("RedSox")));
    assert_eq!(event.attributes.get("player"), Some(&json!("Ortiz")));

    let artifacts = outcome.artifacts();
    assert_eq!(artifacts.len(), 2);
    assert_eq!(artifacts[0].path, harness.out_dir().join("e1.json"));
    assert_eq!(artifacts[1].path, harness.out_dir().join("e1.csv"));

    let exported: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&artifacts[0].path).unwrap()).unwrap();
    assert_eq!(exported["events"][0]["kind"], json!("HomeRun"));
    assert_eq!(exported["metadata"]["source"], json!("raw_data_dir/e1.txt"));

    let csv = fs::read_to_string(&artifacts[1].path).unwrap();
    assert_eq!(csv.lines().count(), 2);
    assert!(csv.contains("HomeRun"));
}

#[tokio::test]
async fn test_unwritable_csv_destination_yields_partial() {
    let harness = Harness::new();
    let source = harness.write_source("e1.txt", GAME_LOG);
    // A directory occupies the csv destination
    fs::create_dir_all(harness.out_dir().join("e1.csv")).unwrap();

    let outcome = harness
        .manager()
        .run(&source, &formats(&[JSON_FORMAT, CSV_FORMAT]))
        .await;

    assert_eq!(outcome.status, RunStatus::Partial);
    assert_eq!(outcome.failed_phase, None);
    assert!(harness.out_dir().join("e1.json").is_file());
    assert!(harness.out_dir().join("e1.csv").is_dir());

    let failed = outcome.failed_formats();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].0, CSV_FORMAT);
    assert!(matches!(
        failed[0].1,
        DispatchError::Export(ExportError::DestinationUnwritable { .. })
    ));
    assert!(matches!(
        outcome.errors.as_slice(),
        [FlowError::Dispatch { format, .. }] if format == CSV_FORMAT
    ));
}

#[tokio::test]
async fn test_missing_source_fails_at_load() {
    let harness = Harness::new();
    let source = Locator::keyed(RAW_DATA_DIR, "missing.txt");

    let outcome = harness.manager().run(&source, &formats(&[JSON_FORMAT])).await;

    assert_eq!(outcome.status, RunStatus::Failure);
    assert_eq!(outcome.failed_phase, Some(Phase::Load));
    assert!(outcome.record.is_none());
    assert!(outcome.report.is_none());
    assert!(matches!(outcome.errors.as_slice(), [FlowError::SourceUnavailable { .. }]));
    assert_eq!(
        outcome.states,
        vec![FlowState::Idle, FlowState::Loading, FlowState::Done(RunStatus::Failure)]
    );
    assert!(harness.provenance.entries().is_empty());
}

#[tokio::test]
async fn test_stage_failure_skips_export() {
    let harness = Harness::new();
    let source = harness.write_source("bad.txt", "TEAM:RedSox|PLAYER:Ortiz|EVENT:Home Run!");

    let outcome = harness
        .manager()
        .run(&source, &formats(&[JSON_FORMAT, CSV_FORMAT]))
        .await;

    assert_eq!(outcome.status, RunStatus::Failure);
    assert_eq!(outcome.failed_phase, Some(Phase::Normalize));
    match outcome.errors.as_slice() {
        [FlowError::Pipeline(PipelineError::Stage {
            failed_stage_index,
            failed_stage_name,
            ..
        })] => {
            assert_eq!(*failed_stage_index, 3);
            assert_eq!(failed_stage_name, "event-normalize");
        }
        other => panic!("unexpected errors: {other:?}"),
    }
    assert!(fs::read_dir(harness.out_dir()).unwrap().next().is_none());
}

#[tokio::test]
async fn test_comment_only_log_short_circuits_to_empty_record() {
    let harness = Harness::new();
    let source = harness.write_source("quiet.txt", "# rain delay\n\n# postponed\n");

    let outcome = harness.manager().run(&source, &formats(&[JSON_FORMAT])).await;

    assert_eq!(outcome.status, RunStatus::Success);
    let record = outcome.record.unwrap();
    assert!(record.events().is_empty());
    assert_eq!(record.warnings(), vec!["no content lines after filtering"]);
}

#[tokio::test]
async fn test_cancelled_run_does_nothing() {
    let harness = Harness::new();
    let source = harness.write_source("e1.txt", GAME_LOG);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = harness
        .manager()
        .run_with_cancel(&source, &formats(&[JSON_FORMAT]), &cancel)
        .await;

    assert_eq!(outcome.status, RunStatus::Failure);
    assert_eq!(outcome.failed_phase, Some(Phase::Load));
    assert_eq!(outcome.errors, vec![FlowError::Cancelled { phase: Phase::Load }]);
    assert!(fs::read_dir(harness.out_dir()).unwrap().next().is_none());
}

#[tokio::test]
async fn test_repeated_runs_are_deterministic() {
    let harness = Harness::new();
    let source = harness.write_source("e1.txt", GAME_LOG);
    let manager = harness.manager();

    let first = manager.run(&source, &formats(&[JSON_FORMAT])).await;
    let first_bytes = fs::read(harness.out_dir().join("e1.json")).unwrap();
    let second = manager.run(&source, &formats(&[JSON_FORMAT])).await;
    let second_bytes = fs::read(harness.out_dir().join("e1.json")).unwrap();

    assert_eq!(
        first.record.unwrap().canonical_json().unwrap(),
        second.record.unwrap().canonical_json().unwrap()
    );
    assert_eq!(first_bytes, second_bytes);

    let entries = harness.provenance.entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].run_id, entries[1].run_id);
    assert_eq!(entries[0].record_sha256, entries[1].record_sha256);
}

#[tokio::test]
async fn test_provenance_lists_stages_and_artifacts() {
    let harness = Harness::new();
    let source = harness.write_source("e1.txt", GAME_LOG);

    let outcome = harness
        .manager()
        .run(&source, &formats(&[JSON_FORMAT, SQLITE_FORMAT]))
        .await;
    assert!(outcome.is_success());

    let entries = harness.provenance.entries();
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.app_name, "diamond_parser");
    assert_eq!(entry.source, "raw_data_dir/e1.txt");
    assert_eq!(
        entry.stages,
        vec!["line-filter", "team-normalize", "player-normalize", "event-normalize"]
    );
    assert_eq!(
        entry.artifacts,
        vec![harness.out_dir().join("e1.json"), harness.out_dir().join("e1.db")]
    );
}

#[tokio::test]
async fn test_empty_format_list_succeeds_without_artifacts() {
    let harness = Harness::new();
    let source = harness.write_source("e1.txt", GAME_LOG);

    let outcome = harness.manager().run(&source, &[]).await;

    assert_eq!(outcome.status, RunStatus::Success);
    assert!(outcome.artifacts().is_empty());
    assert!(outcome.record.is_some());
}

#[tokio::test]
async fn test_unregistered_format_alone_fails_export() {
    let harness = Harness::new();
    let source = harness.write_source("e1.txt", GAME_LOG);

    let outcome = harness.manager().run(&source, &formats(&["xml"])).await;

    assert_eq!(outcome.status, RunStatus::Failure);
    assert_eq!(outcome.failed_phase, Some(Phase::Export));
    assert!(matches!(
        outcome.failed_formats().as_slice(),
        [("xml", DispatchError::UnregisteredSink { .. })]
    ));
    assert!(harness.provenance.entries().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_runs_of_one_source_all_succeed() {
    let harness = Harness::new();
    let lines: Vec<String> = (0..2000)
        .map(|i| format!("TEAM:RedSox|PLAYER:Ortiz|EVENT:Pitch{i}"))
        .collect();
    let source = harness.write_source("e1.txt", &lines.join("\n"));
    let manager = harness.manager();
    let requested = formats(&[JSON_FORMAT, CSV_FORMAT, SQLITE_FORMAT]);

    for _ in 0..5 {
        let (a, b) = tokio::join!(manager.run(&source, &requested), manager.run(&source, &requested));
        assert_eq!(a.status, RunStatus::Success, "{:?}", a.errors);
        assert_eq!(b.status, RunStatus::Success, "{:?}", b.errors);
    }

    let mut names: Vec<String> = fs::read_dir(harness.out_dir())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["e1.csv", "e1.db", "e1.json"]);
}

#[tokio::test]
async fn test_cancel_during_normalize_stops_before_export() {
    let harness = Harness::new();
    let source = harness.write_source("e1.txt", GAME_LOG);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let normalizer = Normalizer::new()
        .with_stage(FnStage::new("interrupt", PayloadKind::Text, PayloadKind::Text, move |payload| {
            trigger.cancel();
            Ok(StageOutcome::Continue(payload))
        }))
        .with_stage(FnStage::new("lift", PayloadKind::Text, PayloadKind::Record, |_| {
            panic!("runs after cancellation")
        }));
    let manager = GameFlowManager::new(
        Arc::new(FsFileStore::new(harness.config.clone())),
        Arc::new(normalizer),
        Arc::new(SinkRegistry::with_default_sinks()),
        harness.out_dir(),
    );

    let outcome = manager
        .run_with_cancel(&source, &formats(&[JSON_FORMAT]), &cancel)
        .await;

    assert_eq!(outcome.status, RunStatus::Failure);
    assert_eq!(outcome.failed_phase, Some(Phase::Normalize));
    assert_eq!(outcome.errors, vec![FlowError::Cancelled { phase: Phase::Normalize }]);
    assert!(fs::read_dir(harness.out_dir()).unwrap().next().is_none());
}
