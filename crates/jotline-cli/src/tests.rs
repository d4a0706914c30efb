use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use jotline_core::models::{Capture, CaptureState, EntityKind};
use jotline_core::recovery::RecoveryOutcome;
use jotline_core::state::SyncState;
use jotline_core::sync::{CycleReport, EntitySync, PullReport, PushOutcome, SyncError, SyncReason};
use jotline_core::LocalStore;
use pretty_assertions::assert_eq;

use crate::cli::EntityArg;
use crate::commands::add::add_record;
use crate::commands::common::{
    config_from_lookup, format_relative_time, normalize_content, record_preview, resolve_record,
    short_id,
};
use crate::commands::list::format_record_lines;
use crate::commands::recover::run_recover;
use crate::commands::sync::{collect_status, summarize};
use crate::commands::watch::probe_health;
use crate::error::CliError;

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
        .collect();
    move |name| map.get(name).cloned()
}

#[test]
fn normalize_content_trims_and_rejects_empty() {
    assert_eq!(normalize_content("  hello  "), Some("hello".to_string()));
    assert_eq!(normalize_content(" \n\t "), None);
}

#[test]
fn normalize_content_keeps_multiline_text() {
    assert_eq!(
        normalize_content("line 1\nline 2\n"),
        Some("line 1\nline 2".to_string())
    );
}

#[test]
fn data_dir_flag_beats_environment_and_platform_default() {
    let fallback = Some(PathBuf::from("/platform/jotline"));

    let config = config_from_lookup(
        lookup_from(&[("JOTLINE_DATA_DIR", "/from/env")]),
        Some(PathBuf::from("/from/flag")),
        fallback.clone(),
    )
    .unwrap();
    assert_eq!(config.data_dir, PathBuf::from("/from/flag"));

    let config = config_from_lookup(
        lookup_from(&[("JOTLINE_DATA_DIR", "/from/env")]),
        None,
        fallback.clone(),
    )
    .unwrap();
    assert_eq!(config.data_dir, PathBuf::from("/from/env"));

    let config = config_from_lookup(lookup_from(&[]), None, fallback).unwrap();
    assert_eq!(config.data_dir, PathBuf::from("/platform/jotline"));
    assert_eq!(
        config.database_path(),
        PathBuf::from("/platform/jotline/jotline.db")
    );
}

#[test]
fn invalid_environment_is_a_config_error() {
    let result = config_from_lookup(
        lookup_from(&[("JOTLINE_API_BASE_URL", "not-a-url")]),
        None,
        None,
    );
    assert!(matches!(result, Err(CliError::Config(_))));
}

#[test]
fn relative_time_buckets() {
    let now = 1_700_000_000_000;
    assert_eq!(format_relative_time(now - 5_000, now), "just now");
    assert_eq!(format_relative_time(now - 5 * 60_000, now), "5m ago");
    assert_eq!(format_relative_time(now - 3 * 3_600_000, now), "3h ago");
    assert_eq!(format_relative_time(now - 2 * 86_400_000, now), "2d ago");
    assert_eq!(format_relative_time(now - 14 * 86_400_000, now), "2w ago");
    assert_eq!(format_relative_time(now - 400 * 86_400_000, now), "1y ago");
    assert_eq!(format_relative_time(now + 60_000, now), "just now");
}

#[test]
fn entity_arg_maps_to_collections() {
    assert_eq!(EntityKind::from(EntityArg::Capture), EntityKind::Captures);
    assert_eq!(EntityKind::from(EntityArg::Thought), EntityKind::Thoughts);
    assert_eq!(EntityKind::from(EntityArg::Idea), EntityKind::Ideas);
    assert_eq!(EntityKind::from(EntityArg::Todo), EntityKind::Todos);
}

#[tokio::test(flavor = "current_thread")]
async fn added_records_are_pending_and_previewed() {
    let store = LocalStore::open_in_memory().unwrap();

    let capture = add_record(&store, EntityKind::Captures, "first line\nsecond".to_string())
        .await
        .unwrap();
    let idea = add_record(&store, EntityKind::Ideas, "x".repeat(80))
        .await
        .unwrap();

    assert!(capture.dirty);
    assert_eq!(record_preview(&capture, 60), "first line");
    assert_eq!(record_preview(&idea, 10), format!("{}...", "x".repeat(10)));
    assert_eq!(store.count_dirty(None).await.unwrap(), 2);

    let lines = format_record_lines(std::slice::from_ref(&capture), capture.created_at);
    assert_eq!(
        lines,
        vec![format!("{}* just now  first line", short_id(capture.id()))]
    );
}

#[tokio::test(flavor = "current_thread")]
async fn resolve_record_supports_exact_and_prefix_id() {
    let store = LocalStore::open_in_memory().unwrap();
    let record = add_record(&store, EntityKind::Thoughts, "hello".to_string())
        .await
        .unwrap();
    let id = record.id().to_string();

    let exact = resolve_record(&store, EntityKind::Thoughts, &id).await.unwrap();
    assert_eq!(exact.id(), record.id());

    let by_prefix = resolve_record(&store, EntityKind::Thoughts, &id[..20])
        .await
        .unwrap();
    assert_eq!(by_prefix.id(), record.id());

    let other_collection = resolve_record(&store, EntityKind::Ideas, &id).await;
    assert!(matches!(other_collection, Err(CliError::RecordNotFound(_))));
}

#[tokio::test(flavor = "current_thread")]
async fn resolve_record_rejects_empty_and_missing_ids() {
    let store = LocalStore::open_in_memory().unwrap();

    assert!(matches!(
        resolve_record(&store, EntityKind::Captures, "   ").await,
        Err(CliError::EmptyRecordId)
    ));
    assert!(matches!(
        resolve_record(&store, EntityKind::Captures, "zzzz").await,
        Err(CliError::RecordNotFound(_))
    ));
}

#[test]
fn summary_reports_failed_collections() {
    let report = CycleReport {
        reason: SyncReason::Manual,
        entities: vec![
            EntitySync {
                entity: EntityKind::Captures,
                outcome: Ok((
                    PullReport {
                        applied: 3,
                        ..PullReport::default()
                    },
                    PushOutcome {
                        acknowledged: 2,
                        ..PushOutcome::default()
                    },
                )),
            },
            EntitySync {
                entity: EntityKind::Todos,
                outcome: Err(SyncError::Network("connection reset".to_string())),
            },
        ],
        pending: 1,
        state: SyncState::Error,
    };

    let summary = summarize(&report);
    assert_eq!(summary.state, "error");
    assert_eq!(summary.pending, 1);
    assert_eq!(summary.entities[0].pulled, 3);
    assert_eq!(summary.entities[0].pushed, 2);
    assert_eq!(summary.entities[0].error, None);
    assert!(summary.entities[1]
        .error
        .as_deref()
        .is_some_and(|error| error.contains("connection reset")));
}

#[tokio::test(flavor = "current_thread")]
async fn status_lists_every_collection() {
    let store = LocalStore::open_in_memory().unwrap();
    add_record(&store, EntityKind::Todos, "ship it".to_string())
        .await
        .unwrap();

    let items = collect_status(&store).await.unwrap();
    assert_eq!(items.len(), EntityKind::ALL.len());
    let todos = items
        .iter()
        .find(|item| item.cursor.entity == EntityKind::Todos)
        .unwrap();
    assert_eq!(todos.pending, 1);
    assert_eq!(todos.cursor.last_pulled_at, 0);

    let json = serde_json::to_value(todos).unwrap();
    assert_eq!(json["pending"], 1);
    assert_eq!(json["last_pulled_at"], 0);
}

#[tokio::test(flavor = "current_thread")]
async fn recover_marks_audio_less_recordings_failed() {
    let store = LocalStore::open_in_memory().unwrap();
    assert!(run_recover(&store).await.is_empty());

    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("gone.m4a");
    let capture = Capture::recording();
    let record = store
        .create_capture(&capture, missing.to_str())
        .await
        .unwrap();

    let outcomes = run_recover(&store).await;
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(&outcomes[0], RecoveryOutcome::Failed { id, .. } if *id == record.id()));

    let stored = store
        .get_record(EntityKind::Captures, &record.id())
        .await
        .unwrap()
        .unwrap();
    let settled = Capture::from_record(&stored.record).unwrap();
    assert_eq!(settled.state, CaptureState::Failed);
}

#[tokio::test(flavor = "current_thread")]
async fn health_probe_fails_when_nothing_listens() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .unwrap();
    assert!(!probe_health(&client, &format!("http://127.0.0.1:{port}/healthz")).await);
}
