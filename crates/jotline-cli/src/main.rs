//! Jotline CLI - capture thoughts offline and sync them across devices.

mod cli;
mod commands;
mod error;
#[cfg(test)]
mod tests;

use std::time::Duration;

use clap::{CommandFactory, Parser};
use jotline_core::models::EntityKind;
use jotline_core::LocalStore;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::add::add_record;
use crate::commands::common::{load_config, open_store, resolve_content, short_id, sync_engine};
use crate::commands::fetch::{downloader, run_fetch_audio};
use crate::commands::list::run_list;
use crate::commands::recover::run_recover;
use crate::commands::sync::{run_initial_sync, run_status, run_sync};
use crate::commands::watch::run_watch;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("jotline=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.data_dir)?;
    let store = open_store(&config).await?;

    match cli.command {
        Some(Commands::Add { entity, content }) => {
            run_add(&store, entity.into(), &content).await?;
        }
        Some(Commands::List {
            entity,
            limit,
            json,
        }) => run_list(&store, entity.into(), limit, json).await?,
        Some(Commands::Sync { json }) => {
            let engine = sync_engine(&config, store)?;
            run_sync(&engine, json).await?;
        }
        Some(Commands::InitialSync { user, force }) => {
            let engine = sync_engine(&config, store)?;
            run_initial_sync(engine, &user, force).await?;
        }
        Some(Commands::Status { json }) => run_status(&store, json).await?,
        Some(Commands::Recover) => {
            run_recover(&store).await;
        }
        Some(Commands::FetchAudio { id }) => {
            let downloader = downloader(&config, store.clone())?;
            let path = run_fetch_audio(&downloader, &store, &id).await?;
            println!("{}", path.display());
        }
        Some(Commands::Watch { probe_secs, user }) => {
            let engine = sync_engine(&config, store)?;
            run_watch(
                &config,
                engine,
                Duration::from_secs(probe_secs.max(1)),
                user.as_deref(),
            )
            .await?;
        }
        None => {
            // Quick capture mode: jot "my thought"
            if cli.text.is_empty() {
                Cli::command().print_help().map_err(CliError::Io)?;
                println!();
            } else {
                run_add(&store, EntityKind::Captures, &cli.text).await?;
            }
        }
    }

    Ok(())
}

async fn run_add(
    store: &LocalStore,
    entity: EntityKind,
    content_parts: &[String],
) -> Result<(), CliError> {
    let content = resolve_content(content_parts)?;
    let record = add_record(store, entity, content).await?;
    println!("Saved {} {}", entity.as_str(), short_id(record.id()));
    Ok(())
}
