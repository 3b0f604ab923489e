//! `replay`: run a scenario against in-memory collaborators.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tabled::Tabled;
use tracing::{debug, info};

use credview_config::Config;
use credview_core::memory::{
    BroadcastNotificationBus, InMemoryCredentialStore, RecordingCredentialCache,
    WatchTargetRegistry,
};
use credview_core::{
    Backends, BulkDeletePhase, ConnectUrl, CoreError, CredentialsView, NotificationEvent, Problem,
    ViewConfig,
};

use crate::cli::{GlobalOpts, ReplayArgs};
use crate::error::CliError;
use crate::output;
use crate::scenario::{Scenario, Step};

// ── Result types ────────────────────────────────────────────────────

/// Final state of the view after every step has settled.
#[derive(Debug, Serialize)]
pub struct ReplayOutcome {
    pub replayed_at: DateTime<Utc>,
    pub steps: usize,
    pub rows: Vec<RowView>,
    pub header_checked: bool,
    pub loading: bool,
    pub bulk_delete: BulkDeletePhase,
    pub problems: Vec<Problem>,
    /// Keys the local credential cache was told to forget.
    pub forgotten: Vec<ConnectUrl>,
    pub fetches: usize,
}

#[derive(Debug, Serialize, Tabled)]
pub struct RowView {
    #[tabled(rename = "#")]
    pub index: usize,
    #[tabled(rename = "Connect URL")]
    pub connect_url: String,
    #[tabled(rename = "Alias")]
    pub alias: String,
    #[tabled(rename = "State")]
    pub state: String,
}

#[derive(Tabled)]
struct ProblemRow {
    #[tabled(rename = "Problem")]
    problem: String,
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(args: ReplayArgs, global: &GlobalOpts, cfg: &Config) -> Result<(), CliError> {
    let scenario = Scenario::load(&args.file)?;
    let view_config = scenario
        .view
        .as_ref()
        .unwrap_or(&cfg.view)
        .to_view_config()?;
    let format = output::resolve_format(global, &cfg.defaults.output)?;

    let outcome = run(
        scenario,
        view_config,
        Duration::from_millis(args.settle_timeout_ms),
    )
    .await?;

    let out = output::render_single(format, &outcome, render_detail, |o| {
        o.rows
            .iter()
            .map(|r| r.connect_url.clone())
            .collect::<Vec<_>>()
            .join("\n")
    })?;
    output::print_output(&out, global.quiet);
    Ok(())
}

/// Apply every step of `scenario` to a fresh view and collect the result.
pub async fn run(
    scenario: Scenario,
    config: ViewConfig,
    settle_timeout: Duration,
) -> Result<ReplayOutcome, CliError> {
    let registry = Arc::new(WatchTargetRegistry::new(scenario.registry));
    let bus = Arc::new(BroadcastNotificationBus::new(config.event_buffer));
    let store = Arc::new(
        InMemoryCredentialStore::new()
            .with_bus(Arc::clone(&bus))
            .with_targets(scenario.stored)
            .with_latency(Duration::from_millis(scenario.latency_ms)),
    );
    let cache = Arc::new(RecordingCredentialCache::new());

    let backends = Backends::new(registry.clone(), store.clone(), bus.clone())
        .with_cache(cache.clone());
    let view = CredentialsView::new(config, backends)?;
    let mut problems = view.problems();

    view.activate().await?;
    settle(&view, settle_timeout).await?;

    let harness = Harness {
        view: &view,
        registry: &registry,
        bus: &bus,
        store: &store,
        settle_timeout,
    };
    let steps = scenario.steps.len();
    for (index, step) in scenario.steps.into_iter().enumerate() {
        let action = step.action();
        debug!(index, action, "replaying step");
        harness.apply(step).await.map_err(|e| match e {
            CliError::Core(source) => CliError::Step {
                index,
                action: action.into(),
                source,
            },
            other => other,
        })?;
    }
    settle(&view, settle_timeout).await?;

    let stored = view.stored_snapshot();
    let selection = view.selection_snapshot();
    let rows = stored
        .targets
        .iter()
        .enumerate()
        .map(|(index, target)| RowView {
            index,
            connect_url: target.connect_url.to_string(),
            alias: target.alias.clone(),
            state: selection.state_of(&target.connect_url).label().to_string(),
        })
        .collect();

    let mut reported = Vec::new();
    while let Ok(problem) = problems.try_recv() {
        reported.push(problem);
    }

    let outcome = ReplayOutcome {
        replayed_at: Utc::now(),
        steps,
        rows,
        header_checked: selection.header_checked,
        loading: view.is_loading(),
        bulk_delete: view.bulk_delete().borrow().clone(),
        problems: reported,
        forgotten: cache.forgotten(),
        fetches: store.fetch_count(),
    };

    view.deactivate().await;
    info!(
        steps,
        rows = outcome.rows.len(),
        problems = outcome.problems.len(),
        "replay finished"
    );
    Ok(outcome)
}

// ── Step execution ──────────────────────────────────────────────────

struct Harness<'a> {
    view: &'a CredentialsView,
    registry: &'a WatchTargetRegistry,
    bus: &'a BroadcastNotificationBus,
    store: &'a InMemoryCredentialStore,
    settle_timeout: Duration,
}

impl Harness<'_> {
    async fn apply(&self, step: Step) -> Result<(), CliError> {
        match step {
            Step::Refresh => {
                self.view.refresh().await?;
            }
            Step::PublishRegistry { targets } => self.registry.publish(targets),
            Step::Store { target } => {
                self.store.insert(target).await;
            }
            Step::NotifyStored { target } => {
                self.bus.publish(NotificationEvent::stored(target));
            }
            Step::NotifyDeleted { target } => {
                self.bus.publish(NotificationEvent::deleted(target));
            }
            Step::CheckRow { index, checked } => self.view.check_row(index, checked).await?,
            Step::CheckTarget { target, checked } => {
                self.view.check_target(target, checked).await?;
            }
            Step::CheckHeader { checked } => self.view.check_header(checked).await?,
            Step::DeleteSelected => {
                self.view.delete_selected().await?;
            }
            Step::RetryFailed => {
                self.view.retry_failed().await?;
            }
            Step::RejectDeletes { target } => self.store.reject_deletes(target).await,
            Step::FailFetches { count } => self.store.fail_next_fetches(count),
            Step::Settle => settle(self.view, self.settle_timeout).await?,
            Step::Sleep { ms } => tokio::time::sleep(Duration::from_millis(ms)).await,
        }
        // Every step lands before the next one is applied.
        self.view.flush().await?;
        Ok(())
    }
}

/// Wait until no refresh or delete is in flight and every queued input
/// has been applied.
async fn settle(view: &CredentialsView, timeout: Duration) -> Result<(), CliError> {
    let waited = tokio::time::timeout(timeout, async {
        view.flush().await?;
        let mut loading = view.loading();
        if loading.wait_for(|l| !*l).await.is_err() {
            return Err(CoreError::ViewInactive);
        }
        let mut phase = view.bulk_delete();
        if phase.wait_for(|p| !p.is_requesting()).await.is_err() {
            return Err(CoreError::ViewInactive);
        }
        view.flush().await
    })
    .await;

    match waited {
        Ok(result) => Ok(result?),
        Err(_) => Err(CliError::Timeout {
            ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}

// ── Rendering ───────────────────────────────────────────────────────

fn render_detail(outcome: &ReplayOutcome) -> Result<String, CliError> {
    let mut out = output::render_table(&outcome.rows);
    if !outcome.problems.is_empty() {
        let problems: Vec<ProblemRow> = outcome
            .problems
            .iter()
            .map(|p| ProblemRow {
                problem: p.to_string(),
            })
            .collect();
        out.push('\n');
        out.push_str(&output::render_table(&problems));
    }
    Ok(out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn scenario(toml_text: &str) -> Scenario {
        toml::from_str(toml_text).unwrap()
    }

    #[tokio::test]
    async fn bulk_delete_scenario_settles() {
        let s = scenario(
            r#"
            registry = [{ connectUrl = "a", alias = "A" }, { connectUrl = "b", alias = "B" }]
            stored = [{ connectUrl = "a" }, { connectUrl = "b" }]

            [[steps]]
            action = "check-row"
            index = 1

            [[steps]]
            action = "delete-selected"
            "#,
        );

        let outcome = run(s, ViewConfig::default(), Duration::from_secs(5))
            .await
            .unwrap();

        let urls: Vec<&str> = outcome.rows.iter().map(|r| r.connect_url.as_str()).collect();
        assert_eq!(urls, vec!["a"]);
        assert_eq!(outcome.forgotten, vec![ConnectUrl::from("b")]);
        assert!(matches!(outcome.bulk_delete, BulkDeletePhase::Settled { .. }));
    }

    #[tokio::test]
    async fn out_of_range_step_reports_index() {
        let s = scenario(
            r#"
            [[steps]]
            action = "check-row"
            index = 4
            "#,
        );

        let err = run(s, ViewConfig::default(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CliError::Step {
                index: 0,
                source: CoreError::RowOutOfRange { .. },
                ..
            }
        ));
    }
}
