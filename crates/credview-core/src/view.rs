// ── Credentials view session ──
//
// Lifecycle of one live view over targets with stored credentials.
// A single loop task owns the reconciliation engine, the selection and
// the delete coordinator. Fetches and deletes run as spawned futures
// whose results travel back to the loop over a channel, so state is
// only ever mutated from one place.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{Backends, CredentialStore, LocalCredentialCache};
use crate::bulk_delete::{
    BulkDeleteCoordinator, BulkDeletePhase, DeleteOutcome, DeletePlan, execute_plan,
};
use crate::command::{CommandEnvelope, ViewCommand, ViewCommandResult};
use crate::config::ViewConfig;
use crate::error::CoreError;
use crate::model::{ConnectUrl, NotificationCategory, NotificationEvent, Problem, Target};
use crate::selection::{SelectionModel, SelectionSnapshot};
use crate::store::{
    ReconciliationEngine, RefreshOutcome, RefreshTicket, StoredOutcome, StoredTargetsSnapshot,
};
use crate::stream::StoredTargetStream;

// ── ViewLifecycle ────────────────────────────────────────────────

/// Lifecycle state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewLifecycle {
    /// Built but not yet subscribed to anything.
    Created,
    Active,
    /// Torn down; never becomes active again.
    Inactive,
}

// ── CredentialsView ──────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<ViewInner>`. Call
/// [`activate()`](Self::activate) to subscribe to the collaborators and
/// start the loop, and [`deactivate()`](Self::deactivate) to tear it down.
#[derive(Clone)]
pub struct CredentialsView {
    inner: Arc<ViewInner>,
}

struct ViewInner {
    config: ViewConfig,
    backends: Backends,
    command_tx: mpsc::Sender<CommandEnvelope>,
    startup: Mutex<Option<Startup>>,
    stored: watch::Receiver<Arc<StoredTargetsSnapshot>>,
    loading: watch::Receiver<bool>,
    selection: watch::Receiver<Arc<SelectionSnapshot>>,
    bulk_delete: watch::Receiver<BulkDeletePhase>,
    problem_tx: broadcast::Sender<Problem>,
    lifecycle: watch::Sender<ViewLifecycle>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// State handed to the loop task on activation.
struct Startup {
    state: ViewState,
    command_rx: mpsc::Receiver<CommandEnvelope>,
}

impl CredentialsView {
    /// Create a view over `backends`. Does NOT subscribe to anything --
    /// call [`activate()`](Self::activate) to start it.
    pub fn new(config: ViewConfig, backends: Backends) -> Result<Self, CoreError> {
        config.validate()?;

        let state = ViewState::new(&config);
        let stored = state.engine.stored().subscribe();
        let loading = state.engine.subscribe_loading();
        let selection = state.selection.subscribe();
        let bulk_delete = state.deletes.subscribe();

        let (command_tx, command_rx) = mpsc::channel(config.command_buffer);
        let (problem_tx, _) = broadcast::channel(config.event_buffer);
        let (lifecycle, _) = watch::channel(ViewLifecycle::Created);

        Ok(Self {
            inner: Arc::new(ViewInner {
                config,
                backends,
                command_tx,
                startup: Mutex::new(Some(Startup { state, command_rx })),
                stored,
                loading,
                selection,
                bulk_delete,
                problem_tx,
                lifecycle,
                cancel: CancellationToken::new(),
                task: Mutex::new(None),
            }),
        })
    }

    /// Access the view configuration.
    pub fn config(&self) -> &ViewConfig {
        &self.inner.config
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Subscribe to the registry and both notification categories, then
    /// start the loop. The registry's first snapshot triggers the
    /// initial refresh.
    pub async fn activate(&self) -> Result<(), CoreError> {
        let Some(startup) = self.inner.startup.lock().await.take() else {
            return Err(match *self.inner.lifecycle.borrow() {
                ViewLifecycle::Inactive => CoreError::ViewInactive,
                _ => CoreError::AlreadyActivated,
            });
        };

        let backends = &self.inner.backends;
        let inputs = LoopInputs {
            registry: backends.registry.subscribe(),
            stored_events: backends
                .bus
                .subscribe(NotificationCategory::CredentialsStored),
            deleted_events: backends
                .bus
                .subscribe(NotificationCategory::CredentialsDeleted),
            commands: startup.command_rx,
        };

        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let runner = ViewLoop {
            state: startup.state,
            store: Arc::clone(&backends.store),
            cache: Arc::clone(&backends.cache),
            problem_tx: self.inner.problem_tx.clone(),
            cancel: self.inner.cancel.clone(),
            completion_tx,
            sweep_interval: self.inner.config.sweep_interval,
        };

        *self.inner.task.lock().await = Some(tokio::spawn(runner.run(inputs, completion_rx)));
        self.inner.lifecycle.send_replace(ViewLifecycle::Active);
        info!("credentials view activated");
        Ok(())
    }

    /// Cancel every subscription and in-flight request, then wait for
    /// the loop to stop. Results arriving afterwards are dropped.
    pub async fn deactivate(&self) {
        self.inner.cancel.cancel();

        let handle = self.inner.task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "view loop ended abnormally");
            }
        }
        // A view deactivated before activation can never start.
        self.inner.startup.lock().await.take();

        self.inner.lifecycle.send_replace(ViewLifecycle::Inactive);
        debug!("credentials view deactivated");
    }

    // ── Command execution ────────────────────────────────────────

    /// Send a command to the loop and await its result.
    pub async fn execute(&self, cmd: ViewCommand) -> Result<ViewCommandResult, CoreError> {
        if *self.inner.lifecycle.borrow() != ViewLifecycle::Active {
            return Err(CoreError::ViewInactive);
        }

        let (tx, rx) = tokio::sync::oneshot::channel();

        self.inner
            .command_tx
            .send(CommandEnvelope {
                command: cmd,
                response_tx: tx,
            })
            .await
            .map_err(|_| CoreError::ViewInactive)?;

        rx.await.map_err(|_| CoreError::ViewInactive)?
    }

    /// Issue a full refresh. Concurrent refreshes are not coalesced.
    pub async fn refresh(&self) -> Result<RefreshTicket, CoreError> {
        match self.execute(ViewCommand::Refresh).await? {
            ViewCommandResult::RefreshStarted { ticket } => Ok(ticket),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn check_row(&self, index: usize, checked: bool) -> Result<(), CoreError> {
        self.execute(ViewCommand::CheckRow { index, checked })
            .await
            .map(drop)
    }

    pub async fn check_target(
        &self,
        target: impl Into<ConnectUrl>,
        checked: bool,
    ) -> Result<(), CoreError> {
        self.execute(ViewCommand::CheckTarget {
            target: target.into(),
            checked,
        })
        .await
        .map(drop)
    }

    pub async fn check_header(&self, checked: bool) -> Result<(), CoreError> {
        self.execute(ViewCommand::CheckHeader { checked })
            .await
            .map(drop)
    }

    /// Delete every checked row. Returns the batch id, or `None` when
    /// nothing was selected.
    pub async fn delete_selected(&self) -> Result<Option<u64>, CoreError> {
        match self.execute(ViewCommand::DeleteSelected).await? {
            ViewCommandResult::DeleteStarted { batch, .. } => Ok(Some(batch)),
            ViewCommandResult::NothingSelected => Ok(None),
            other => Err(unexpected(&other)),
        }
    }

    /// Re-select every row whose delete failed. Returns how many.
    pub async fn retry_failed(&self) -> Result<usize, CoreError> {
        match self.execute(ViewCommand::RetryFailed).await? {
            ViewCommandResult::Retried { count } => Ok(count),
            other => Err(unexpected(&other)),
        }
    }

    /// Wait until every input already queued for the loop is applied.
    pub async fn flush(&self) -> Result<(), CoreError> {
        self.execute(ViewCommand::Flush).await.map(drop)
    }

    // ── State observation ────────────────────────────────────────

    /// Subscribe to stored-target list changes.
    pub fn stored_targets(&self) -> StoredTargetStream {
        StoredTargetStream::new(self.inner.stored.clone())
    }

    pub fn stored_snapshot(&self) -> Arc<StoredTargetsSnapshot> {
        self.inner.stored.borrow().clone()
    }

    /// `true` while at least one refresh is in flight.
    pub fn loading(&self) -> watch::Receiver<bool> {
        self.inner.loading.clone()
    }

    pub fn is_loading(&self) -> bool {
        *self.inner.loading.borrow()
    }

    pub fn selection(&self) -> watch::Receiver<Arc<SelectionSnapshot>> {
        self.inner.selection.clone()
    }

    pub fn selection_snapshot(&self) -> Arc<SelectionSnapshot> {
        self.inner.selection.borrow().clone()
    }

    pub fn bulk_delete(&self) -> watch::Receiver<BulkDeletePhase> {
        self.inner.bulk_delete.clone()
    }

    /// Subscribe to fetch, delete and delivery problems.
    pub fn problems(&self) -> broadcast::Receiver<Problem> {
        self.inner.problem_tx.subscribe()
    }

    pub fn lifecycle(&self) -> watch::Receiver<ViewLifecycle> {
        self.inner.lifecycle.subscribe()
    }
}

fn unexpected(result: &ViewCommandResult) -> CoreError {
    CoreError::Internal(format!("unexpected command result: {result:?}"))
}

// ── View state ───────────────────────────────────────────────────

/// Side effects the loop performs on behalf of the state.
#[derive(Debug)]
enum Effect {
    Fetch(RefreshTicket),
    Delete(DeletePlan),
}

/// Everything the loop owns. Pure state transitions; no I/O.
struct ViewState {
    engine: ReconciliationEngine,
    selection: SelectionModel,
    deletes: BulkDeleteCoordinator,
}

impl ViewState {
    fn new(config: &ViewConfig) -> Self {
        Self {
            engine: ReconciliationEngine::new(
                config.sequenced_refresh,
                config.accept_unregistered_stored,
            ),
            selection: SelectionModel::new(),
            deletes: BulkDeleteCoordinator::new(config.confirmation_timeout),
        }
    }

    fn on_registry_update(&mut self, targets: Vec<Target>) -> Effect {
        Effect::Fetch(self.engine.on_registry_update(targets))
    }

    fn apply_command(
        &mut self,
        command: ViewCommand,
    ) -> (Result<ViewCommandResult, CoreError>, Option<Effect>) {
        let list = self.engine.stored();
        match command {
            ViewCommand::Refresh => {
                let ticket = self.engine.begin_refresh();
                (
                    Ok(ViewCommandResult::RefreshStarted { ticket }),
                    Some(Effect::Fetch(ticket)),
                )
            }
            ViewCommand::CheckRow { index, checked } => (
                self.selection
                    .check_row(list, index, checked)
                    .map(|()| ViewCommandResult::Ok),
                None,
            ),
            ViewCommand::CheckTarget { target, checked } => (
                self.selection
                    .check_target(list, &target, checked)
                    .map(|()| ViewCommandResult::Ok),
                None,
            ),
            ViewCommand::CheckHeader { checked } => {
                self.selection.check_header(list, checked);
                (Ok(ViewCommandResult::Ok), None)
            }
            ViewCommand::DeleteSelected => match self.deletes.begin(list, &mut self.selection) {
                Some(plan) => (
                    Ok(ViewCommandResult::DeleteStarted {
                        batch: plan.batch,
                        targets: plan.connect_urls(),
                    }),
                    Some(Effect::Delete(plan)),
                ),
                None => (Ok(ViewCommandResult::NothingSelected), None),
            },
            ViewCommand::RetryFailed => {
                let count = self.selection.retry_failed(list);
                (Ok(ViewCommandResult::Retried { count }), None)
            }
            ViewCommand::Flush => (Ok(ViewCommandResult::Ok), None),
        }
    }

    fn on_refresh_complete(
        &mut self,
        ticket: RefreshTicket,
        result: Result<Vec<Target>, CoreError>,
    ) -> Option<Problem> {
        let before = self.engine.stored().version();
        let outcome = self.engine.complete_refresh(ticket, result);
        self.reconcile_rows(before);
        match outcome {
            RefreshOutcome::Failed { message } => Some(Problem::FetchFailure { message }),
            RefreshOutcome::Applied { .. } | RefreshOutcome::Stale => None,
        }
    }

    fn on_notification(&mut self, event: &NotificationEvent) {
        let before = self.engine.stored().version();
        match event {
            NotificationEvent::CredentialsStored(msg) => {
                let outcome = self.engine.on_credentials_stored(&msg.target);
                if outcome == StoredOutcome::Appended {
                    debug!(target = %msg.target, "stored target appended");
                }
            }
            NotificationEvent::CredentialsDeleted(msg) => {
                if self.engine.on_credentials_deleted(&msg.target) {
                    debug!(target = %msg.target, "stored target removed");
                }
            }
        }
        self.reconcile_rows(before);
    }

    fn on_delete_outcome(&mut self, outcome: DeleteOutcome, now: Instant) -> Option<Problem> {
        self.deletes
            .record_outcome(self.engine.stored(), &mut self.selection, outcome, now)
            .problem
    }

    fn sweep(&mut self, now: Instant) -> Vec<Problem> {
        self.deletes
            .sweep(self.engine.stored(), &mut self.selection, now)
    }

    /// Drop row state for keys that left the list.
    fn reconcile_rows(&mut self, version_before: u64) {
        let list = self.engine.stored();
        if list.version() != version_before {
            self.selection.retain(list);
            self.deletes.retain(list);
        }
    }
}

// ── Background loop ──────────────────────────────────────────────

/// Results of spawned work, sent back to the loop.
enum Completion {
    Refresh {
        ticket: RefreshTicket,
        result: Result<Vec<Target>, CoreError>,
    },
    Delete(DeleteOutcome),
}

struct LoopInputs {
    registry: BoxStream<'static, Vec<Target>>,
    stored_events: BoxStream<'static, NotificationEvent>,
    deleted_events: BoxStream<'static, NotificationEvent>,
    commands: mpsc::Receiver<CommandEnvelope>,
}

struct ViewLoop {
    state: ViewState,
    store: Arc<dyn CredentialStore>,
    cache: Arc<dyn LocalCredentialCache>,
    problem_tx: broadcast::Sender<Problem>,
    cancel: CancellationToken,
    completion_tx: mpsc::UnboundedSender<Completion>,
    sweep_interval: Duration,
}

impl ViewLoop {
    async fn run(
        mut self,
        inputs: LoopInputs,
        mut completions: mpsc::UnboundedReceiver<Completion>,
    ) {
        let LoopInputs {
            registry,
            stored_events,
            deleted_events,
            mut commands,
        } = inputs;
        let mut registry = registry.fuse();
        let mut stored_events = stored_events.fuse();
        let mut deleted_events = deleted_events.fuse();

        let cancel = self.cancel.clone();
        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                Some(done) = completions.recv() => self.on_completion(done),
                Some(targets) = registry.next() => {
                    let effect = self.state.on_registry_update(targets);
                    self.spawn_effect(effect);
                }
                Some(event) = stored_events.next() => self.state.on_notification(&event),
                Some(event) = deleted_events.next() => self.state.on_notification(&event),
                envelope = commands.recv() => {
                    let Some(envelope) = envelope else { break };
                    let (result, effect) = self.state.apply_command(envelope.command);
                    if let Some(effect) = effect {
                        self.spawn_effect(effect);
                    }
                    let _ = envelope.response_tx.send(result);
                }
                _ = sweep.tick() => {
                    for problem in self.state.sweep(Instant::now()) {
                        self.publish(problem);
                    }
                }
            }
        }

        self.state.engine.abandon_refreshes();
        debug!("view loop stopped");
    }

    fn on_completion(&mut self, done: Completion) {
        let problem = match done {
            Completion::Refresh { ticket, result } => {
                self.state.on_refresh_complete(ticket, result)
            }
            Completion::Delete(outcome) => self.state.on_delete_outcome(outcome, Instant::now()),
        };
        if let Some(problem) = problem {
            self.publish(problem);
        }
    }

    fn publish(&self, problem: Problem) {
        // No receivers is fine.
        let _ = self.problem_tx.send(problem);
    }

    fn spawn_effect(&self, effect: Effect) {
        let store = Arc::clone(&self.store);
        let tx = self.completion_tx.clone();
        let cancel = self.cancel.clone();

        match effect {
            Effect::Fetch(ticket) => {
                tokio::spawn(async move {
                    let result = tokio::select! {
                        biased;
                        () = cancel.cancelled() => return,
                        result = store.fetch_stored_targets() => result,
                    };
                    let _ = tx.send(Completion::Refresh { ticket, result });
                });
            }
            Effect::Delete(plan) => {
                for target in &plan.targets {
                    self.cache.forget(&target.connect_url);
                }
                tokio::spawn(async move {
                    let requests = execute_plan(plan, store, |outcome| {
                        if !cancel.is_cancelled() {
                            let _ = tx.send(Completion::Delete(outcome));
                        }
                    });
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => {}
                        () = requests => {}
                    }
                });
            }
        }
    }
}
