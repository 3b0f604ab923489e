// ── Bulk delete coordination ──
//
// Fans a "delete selected" action out into concurrent per-row delete
// requests and folds each outcome back into row state. Rows leave the
// list only when a `CredentialsDeleted` notification arrives; a delete
// the store acknowledged but nobody confirmed eventually times out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use indexmap::IndexMap;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backend::CredentialStore;
use crate::model::{ConnectUrl, DeleteFailure, Problem, RowState, Target};
use crate::selection::SelectionModel;
use crate::store::StoredTargets;

/// The requests a single bulk delete will issue.
#[derive(Debug, Clone)]
pub struct DeletePlan {
    pub batch: u64,
    pub targets: Vec<Arc<Target>>,
}

impl DeletePlan {
    pub fn connect_urls(&self) -> Vec<ConnectUrl> {
        self.targets.iter().map(|t| t.connect_url.clone()).collect()
    }
}

/// Result of one per-row delete request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub batch: u64,
    pub target: ConnectUrl,
    pub result: Result<(), String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedDelete {
    pub target: ConnectUrl,
    pub message: String,
}

/// Summary published once every request of a batch has settled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkDeleteReport {
    pub batch: u64,
    pub requested: Vec<ConnectUrl>,
    pub acknowledged: Vec<ConnectUrl>,
    pub failed: Vec<FailedDelete>,
}

/// `Idle → Requesting → Settled`, tracking the most recent batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum BulkDeletePhase {
    #[default]
    Idle,
    Requesting {
        batch: u64,
        in_flight: usize,
    },
    Settled {
        report: BulkDeleteReport,
    },
}

impl BulkDeletePhase {
    pub fn is_requesting(&self) -> bool {
        matches!(self, Self::Requesting { .. })
    }
}

/// What folding a single outcome produced.
#[derive(Debug, Default)]
pub struct OutcomeEffects {
    pub problem: Option<Problem>,
    pub settled: Option<BulkDeleteReport>,
}

struct BatchProgress {
    in_flight: usize,
    report: BulkDeleteReport,
}

pub struct BulkDeleteCoordinator {
    next_batch: u64,
    latest_batch: Option<u64>,
    batches: HashMap<u64, BatchProgress>,
    /// Acknowledged deletes waiting for their confirming notification.
    awaiting: IndexMap<ConnectUrl, Instant>,
    confirmation_timeout: Duration,
    phase: watch::Sender<BulkDeletePhase>,
}

impl BulkDeleteCoordinator {
    pub fn new(confirmation_timeout: Duration) -> Self {
        let (phase, _) = watch::channel(BulkDeletePhase::Idle);
        Self {
            next_batch: 1,
            latest_batch: None,
            batches: HashMap::new(),
            awaiting: IndexMap::new(),
            confirmation_timeout,
            phase,
        }
    }

    /// Start a bulk delete of every checked row, in list order.
    ///
    /// Each row is unchecked immediately (moved to `PendingDelete`).
    /// Returns `None` when nothing is selected.
    pub fn begin(
        &mut self,
        list: &StoredTargets,
        selection: &mut SelectionModel,
    ) -> Option<DeletePlan> {
        let targets = selection.selected_targets(list);
        if targets.is_empty() {
            debug!("delete requested with empty selection");
            return None;
        }

        let batch = self.next_batch;
        self.next_batch += 1;

        for target in &targets {
            selection.set_state(&target.connect_url, RowState::PendingDelete { batch });
            self.awaiting.shift_remove(&target.connect_url);
        }
        selection.clear_header();
        selection.publish(list);

        let plan = DeletePlan { batch, targets };
        self.batches.insert(
            batch,
            BatchProgress {
                in_flight: plan.targets.len(),
                report: BulkDeleteReport {
                    batch,
                    requested: plan.connect_urls(),
                    ..BulkDeleteReport::default()
                },
            },
        );
        self.latest_batch = Some(batch);
        self.phase.send_replace(BulkDeletePhase::Requesting {
            batch,
            in_flight: plan.targets.len(),
        });

        info!(batch, rows = plan.targets.len(), "bulk delete started");
        Some(plan)
    }

    /// Fold one per-row outcome into row state and batch progress.
    pub fn record_outcome(
        &mut self,
        list: &StoredTargets,
        selection: &mut SelectionModel,
        outcome: DeleteOutcome,
        now: Instant,
    ) -> OutcomeEffects {
        let DeleteOutcome {
            batch,
            target,
            result,
        } = outcome;
        let was_pending =
            |s: &RowState| matches!(s, RowState::PendingDelete { batch: b } if *b == batch);

        let problem = match &result {
            Ok(()) => {
                if selection.transition(&target, was_pending, RowState::Deleted { batch }) {
                    self.awaiting.insert(target.clone(), now);
                }
                None
            }
            Err(message) => {
                warn!(batch, target = %target, error = %message, "credential delete failed");
                selection.transition(
                    &target,
                    was_pending,
                    RowState::DeleteFailed {
                        reason: DeleteFailure::Rejected(message.clone()),
                    },
                );
                Some(Problem::DeleteFailure {
                    target: target.clone(),
                    message: message.clone(),
                })
            }
        };
        selection.publish(list);

        OutcomeEffects {
            problem,
            settled: self.advance_batch(batch, target, result),
        }
    }

    /// Forget pending confirmations for rows no longer in `list`.
    pub fn retain(&mut self, list: &StoredTargets) {
        self.awaiting.retain(|url, _| list.contains(url));
    }

    /// Fail every acknowledged delete whose confirmation is overdue.
    pub fn sweep(
        &mut self,
        list: &StoredTargets,
        selection: &mut SelectionModel,
        now: Instant,
    ) -> Vec<Problem> {
        let timeout = self.confirmation_timeout;
        let expired: Vec<(ConnectUrl, Duration)> = self
            .awaiting
            .iter()
            .map(|(url, at)| (url.clone(), now.saturating_duration_since(*at)))
            .filter(|(_, waited)| *waited >= timeout)
            .collect();

        let mut problems = Vec::new();
        for (url, waited) in expired {
            self.awaiting.shift_remove(&url);
            let timed_out = selection.transition(
                &url,
                |s| matches!(s, RowState::Deleted { .. }),
                RowState::DeleteFailed {
                    reason: DeleteFailure::ConfirmationTimeout,
                },
            );
            if timed_out {
                let waited_ms = u64::try_from(waited.as_millis()).unwrap_or(u64::MAX);
                warn!(target = %url, waited_ms, "deletion was never confirmed");
                problems.push(Problem::NotificationDeliveryLoss {
                    target: url,
                    waited_ms,
                });
            }
        }
        if !problems.is_empty() {
            selection.publish(list);
        }
        problems
    }

    pub fn phase(&self) -> BulkDeletePhase {
        self.phase.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<BulkDeletePhase> {
        self.phase.subscribe()
    }

    pub fn awaiting_confirmation(&self) -> usize {
        self.awaiting.len()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn advance_batch(
        &mut self,
        batch: u64,
        target: ConnectUrl,
        result: Result<(), String>,
    ) -> Option<BulkDeleteReport> {
        let progress = self.batches.get_mut(&batch)?;
        match result {
            Ok(()) => progress.report.acknowledged.push(target),
            Err(message) => progress.report.failed.push(FailedDelete { target, message }),
        }
        progress.in_flight = progress.in_flight.saturating_sub(1);
        let in_flight = progress.in_flight;
        let is_latest = self.latest_batch == Some(batch);

        if in_flight > 0 {
            if is_latest {
                self.phase
                    .send_replace(BulkDeletePhase::Requesting { batch, in_flight });
            }
            return None;
        }

        let report = self.batches.remove(&batch)?.report;
        info!(
            batch,
            acknowledged = report.acknowledged.len(),
            failed = report.failed.len(),
            "bulk delete settled"
        );
        if is_latest {
            self.phase.send_replace(BulkDeletePhase::Settled {
                report: report.clone(),
            });
        }
        Some(report)
    }
}

/// Issue every delete of `plan` concurrently.
///
/// `on_outcome` is called as each request settles; the future resolves
/// once all of them have.
pub async fn execute_plan<F>(plan: DeletePlan, store: Arc<dyn CredentialStore>, on_outcome: F)
where
    F: Fn(DeleteOutcome),
{
    let batch = plan.batch;
    let mut pending: FuturesUnordered<_> = plan
        .targets
        .into_iter()
        .map(|target| {
            let store = Arc::clone(&store);
            async move {
                let result = store
                    .delete_credentials(&target)
                    .await
                    .map_err(|e| e.to_string());
                DeleteOutcome {
                    batch,
                    target: target.connect_url.clone(),
                    result,
                }
            }
        })
        .collect();

    while let Some(outcome) = pending.next().await {
        on_outcome(outcome);
    }
}
