use std::sync::Arc;
use std::time::Duration;

use moltapp_agents::Orchestrator;
use moltapp_models::RoundTrigger;
use tokio_util::sync::CancellationToken;

/// Counts from one scheduler run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerSummary {
    pub rounds_completed: u64,
    pub rounds_failed: u64,
}

/// Runs a scheduled trading round every interval until cancelled.
///
/// A round in flight always finishes; cancellation is observed between rounds.
pub struct Scheduler {
    orchestrator: Arc<Orchestrator>,
    interval: Duration,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(orchestrator: Arc<Orchestrator>, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
            cancel: CancellationToken::new(),
        }
    }

    /// Returns a CancellationToken that can be used to trigger shutdown.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until cancelled. The first round starts immediately.
    pub async fn run(&self) -> SchedulerSummary {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            agents = self.orchestrator.agent_count(),
            "Round scheduler starting"
        );

        let mut summary = SchedulerSummary::default();
        self.run_once(&mut summary).await;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("Round scheduler shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {
                    self.run_once(&mut summary).await;
                }
            }
        }

        tracing::info!(
            completed = summary.rounds_completed,
            failed = summary.rounds_failed,
            "Round scheduler stopped"
        );
        summary
    }

    async fn run_once(&self, summary: &mut SchedulerSummary) {
        match self.orchestrator.run_round(RoundTrigger::Scheduled).await {
            Ok(round) => {
                summary.rounds_completed += 1;
                tracing::info!(
                    round_id = %round.round_id,
                    decisions = round.results.len(),
                    errors = round.errors.len(),
                    "Scheduled round complete"
                );
            }
            Err(e) => {
                summary.rounds_failed += 1;
                tracing::warn!(error = %e, "Scheduled round failed, waiting for next interval");
            }
        }
    }
}
