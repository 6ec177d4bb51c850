// Event dispatcher — one task per inbound reaction event.
//
// Events for different messages run fully in parallel; per-key ordering is
// the ledger's job. Failures are logged here and never reach other events.
// On shutdown the dispatcher stops accepting events, gives running handlers
// a short grace period and aborts the rest.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::error::BookmarkError;
use super::event::ReactionEvent;
use super::orchestrator::{Orchestrator, Outcome};

/// Default time running handlers get to finish after shutdown.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(5);

/// Totals reported when the dispatcher stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub received: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Handlers still running when the grace period ran out
    pub aborted: u64,
}

/// Dispatch events until the feed closes or shutdown is signalled.
pub async fn run(
    orchestrator: Arc<Orchestrator>,
    mut events: mpsc::Receiver<ReactionEvent>,
    mut shutdown: watch::Receiver<bool>,
    grace: Duration,
) -> DispatchSummary {
    let mut summary = DispatchSummary::default();
    let mut tasks: JoinSet<bool> = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("Shutdown requested, no longer accepting events");
                break;
            }
            event = events.recv() => {
                let Some(event) = event else {
                    debug!("Event feed closed");
                    break;
                };
                summary.received += 1;
                let orchestrator = orchestrator.clone();
                tasks.spawn(async move { handle_one(&orchestrator, event).await });
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                record(&mut summary, joined);
            }
        }
    }

    // Close the feed so the gateway sees the dispatcher is gone
    events.close();

    let drain = async {
        while let Some(joined) = tasks.join_next().await {
            record(&mut summary, joined);
        }
    };
    if tokio::time::timeout(grace, drain).await.is_err() {
        let remaining = tasks.len() as u64;
        warn!(remaining, "Grace period elapsed, aborting running handlers");
        tasks.shutdown().await;
        summary.aborted = remaining;
    }

    info!(
        received = summary.received,
        succeeded = summary.succeeded,
        failed = summary.failed,
        aborted = summary.aborted,
        "Dispatcher stopped"
    );
    summary
}

fn record(summary: &mut DispatchSummary, joined: Result<bool, tokio::task::JoinError>) {
    match joined {
        Ok(true) => summary.succeeded += 1,
        Ok(false) => summary.failed += 1,
        Err(e) => {
            error!(error = %e, "Event handler panicked");
            summary.failed += 1;
        }
    }
}

/// Handle one event and log how it ended. Returns whether it succeeded.
async fn handle_one(orchestrator: &Orchestrator, event: ReactionEvent) -> bool {
    match orchestrator.handle(&event).await {
        Ok(Outcome::Ignored) => true,
        Ok(outcome) => {
            debug!(
                user_id = %event.actor_id,
                message_id = %event.message_id,
                ?outcome,
                "Event handled"
            );
            true
        }
        Err(e @ BookmarkError::MalformedInput(_)) => {
            warn!(user_id = %event.actor_id, message_id = %event.message_id, error = %e, "Dropping malformed event");
            false
        }
        Err(e) if e.is_transient() => {
            warn!(user_id = %event.actor_id, message_id = %event.message_id, error = %e, "External call failed, event dropped");
            false
        }
        Err(e) => {
            error!(user_id = %event.actor_id, message_id = %event.message_id, error = %e, "Ledger failure, event dropped");
            false
        }
    }
}
