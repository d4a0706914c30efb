use std::io::Write;

use jotline_core::models::{EntityKind, SyncCursor};
use jotline_core::orchestrator::InitialSyncOrchestrator;
use jotline_core::sync::{CycleReport, SyncCycle, SyncEngine, SyncReason};
use jotline_core::LocalStore;
use serde::Serialize;

use crate::commands::common::format_timestamp;
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct EntitySummary {
    pub entity: EntityKind,
    pub pulled: usize,
    pub pushed: usize,
    pub conflicts: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CycleSummary {
    pub state: &'static str,
    pub pending: usize,
    pub entities: Vec<EntitySummary>,
}

pub fn summarize(report: &CycleReport) -> CycleSummary {
    let entities = report
        .entities
        .iter()
        .map(|entity| match &entity.outcome {
            Ok((pull, push)) => EntitySummary {
                entity: entity.entity,
                pulled: pull.applied,
                pushed: push.acknowledged,
                conflicts: pull.conflicts.total() + push.conflicts.len(),
                error: None,
            },
            Err(error) => EntitySummary {
                entity: entity.entity,
                pulled: 0,
                pushed: 0,
                conflicts: 0,
                error: Some(error.to_string()),
            },
        })
        .collect();
    CycleSummary {
        state: report.state.as_str(),
        pending: report.pending,
        entities,
    }
}

pub async fn run_sync(engine: &SyncEngine, as_json: bool) -> Result<(), CliError> {
    let report = engine.run_cycle(SyncReason::Manual).await?;
    let summary = summarize(&report);

    if as_json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        for entity in &summary.entities {
            match &entity.error {
                None => println!(
                    "{:<9} pulled {}, pushed {}, conflicts {}",
                    entity.entity.as_str(),
                    entity.pulled,
                    entity.pushed,
                    entity.conflicts
                ),
                Some(error) => println!("{:<9} failed: {error}", entity.entity.as_str()),
            }
        }
        println!("Sync {} ({} pending)", summary.state, summary.pending);
    }

    if report.is_success() {
        Ok(())
    } else {
        Err(CliError::SyncFailed(report.state.as_str()))
    }
}

pub async fn run_initial_sync(
    engine: SyncEngine,
    user_id: &str,
    force: bool,
) -> Result<(), CliError> {
    let initial = InitialSyncOrchestrator::new(engine);
    let mut progress = initial.progress();
    let printer = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let current = *progress.borrow_and_update();
            eprint!(
                "\rInitial sync {:>3}% ({} / {} records)",
                current.percent, current.fetched, current.total
            );
            std::io::stderr().flush().ok();
            if current.done {
                eprintln!();
                break;
            }
        }
    });

    let result = if force {
        initial.run(user_id).await.map(Some)
    } else {
        initial.run_if_needed(user_id).await
    };
    printer.abort();

    match result? {
        Some(report) => println!("Initial sync applied {} records", report.applied()),
        None => println!("Initial sync already completed for this account"),
    }
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct CursorStatusItem {
    #[serde(flatten)]
    pub cursor: SyncCursor,
    pub pending: usize,
}

pub async fn collect_status(store: &LocalStore) -> Result<Vec<CursorStatusItem>, CliError> {
    let mut items = Vec::with_capacity(EntityKind::ALL.len());
    for entity in EntityKind::ALL {
        items.push(CursorStatusItem {
            cursor: store.cursor(entity).await?,
            pending: store.count_dirty(Some(entity)).await?,
        });
    }
    Ok(items)
}

pub async fn run_status(store: &LocalStore, as_json: bool) -> Result<(), CliError> {
    let items = collect_status(store).await?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    for item in &items {
        let cursor = &item.cursor;
        let pulled = if cursor.last_pulled_at == 0 {
            "never".to_string()
        } else {
            format_timestamp(cursor.last_pulled_at)
        };
        let status = cursor
            .last_status
            .map_or("-", |status| status.as_str());
        println!(
            "{:<9} pulled {pulled}, last {status}, {} pending",
            cursor.entity.as_str(),
            item.pending
        );
        if let Some(error) = &cursor.last_error {
            println!("          {error}");
        }
    }
    Ok(())
}
