use jotline_core::recovery::{CrashRecovery, RecoveryOutcome};
use jotline_core::LocalStore;

use crate::commands::common::short_id;

pub async fn run_recover(store: &LocalStore) -> Vec<RecoveryOutcome> {
    let outcomes = CrashRecovery::new(store.clone())
        .recover_incomplete_recordings()
        .await;
    if outcomes.is_empty() {
        println!("No interrupted recordings.");
    }
    for outcome in &outcomes {
        match outcome {
            RecoveryOutcome::Recovered { id, path } => {
                println!("{} recovered from {}", short_id(*id), path.display());
            }
            RecoveryOutcome::Failed { id, reason } => {
                println!("{} failed: {reason}", short_id(*id));
            }
        }
    }
    outcomes
}
