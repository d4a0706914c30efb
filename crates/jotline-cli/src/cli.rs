use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use jotline_core::EntityKind;

#[derive(Parser)]
#[command(name = "jot")]
#[command(about = "Capture thoughts offline and sync them across devices")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Directory holding the local database and audio cache
    #[arg(long, global = true, value_name = "PATH")]
    pub data_dir: Option<PathBuf>,

    /// Quick capture: jot "my thought here"
    #[arg(trailing_var_arg = true)]
    pub text: Vec<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Capture text into a collection
    #[command(alias = "new")]
    Add {
        /// Target collection
        #[arg(short, long, value_enum, default_value_t = EntityArg::Capture)]
        entity: EntityArg,
        /// Text content (read from stdin when omitted)
        content: Vec<String>,
    },
    /// List recent records
    List {
        #[arg(short, long, value_enum, default_value_t = EntityArg::Capture)]
        entity: EntityArg,
        /// Number of records to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run one pull/push cycle against the sync server
    Sync {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Download everything for a freshly signed-in user
    InitialSync {
        /// Account id the local data belongs to
        #[arg(long, value_name = "ID")]
        user: String,
        /// Run even if this user already completed an initial sync
        #[arg(long)]
        force: bool,
    },
    /// Show sync cursors and queued changes
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Repair captures left mid-recording by a crash
    Recover,
    /// Download a capture's audio into the local cache
    FetchAudio {
        /// Capture id or unique id prefix
        id: String,
    },
    /// Keep syncing on reconnect and on a timer until interrupted
    Watch {
        /// Seconds between connectivity probes
        #[arg(long, default_value = "15", value_name = "SECS")]
        probe_secs: u64,
        /// Run the initial sync for this account first if it never completed
        #[arg(long, value_name = "ID")]
        user: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum EntityArg {
    Capture,
    Thought,
    Idea,
    Todo,
}

impl From<EntityArg> for EntityKind {
    fn from(value: EntityArg) -> Self {
        match value {
            EntityArg::Capture => Self::Captures,
            EntityArg::Thought => Self::Thoughts,
            EntityArg::Idea => Self::Ideas,
            EntityArg::Todo => Self::Todos,
        }
    }
}
