// ── Row selection ──
//
// Checked state is keyed by connect URL, never by row position, so list
// mutations cannot leave a selection pointing at the wrong row. Indices
// are resolved against the list at call time and derived again on read.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use crate::error::CoreError;
use crate::model::{ConnectUrl, RowState, Target};
use crate::store::StoredTargets;

/// A row that is not `Idle`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowEntry {
    pub target: ConnectUrl,
    pub index: usize,
    #[serde(flatten)]
    pub state: RowState,
}

/// Selection as observed by renderers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SelectionSnapshot {
    pub header_checked: bool,
    /// Indices of checked rows in the list at publish time, ascending.
    pub selected_indices: Vec<usize>,
    /// Every non-idle row in list order.
    pub rows: Vec<RowEntry>,
}

impl SelectionSnapshot {
    pub fn selected(&self) -> impl Iterator<Item = &ConnectUrl> {
        self.rows
            .iter()
            .filter(|r| r.state.is_selected())
            .map(|r| &r.target)
    }

    pub fn state_of(&self, url: &ConnectUrl) -> RowState {
        self.rows
            .iter()
            .find(|r| &r.target == url)
            .map_or(RowState::Idle, |r| r.state.clone())
    }
}

pub struct SelectionModel {
    rows: HashMap<ConnectUrl, RowState>,
    header_checked: bool,
    /// List length when the header was last checked.
    header_len: usize,
    snapshot: watch::Sender<Arc<SelectionSnapshot>>,
}

impl SelectionModel {
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(SelectionSnapshot::default()));
        Self {
            rows: HashMap::new(),
            header_checked: false,
            header_len: 0,
            snapshot,
        }
    }

    /// Check or uncheck the row at `index` of `list`.
    pub fn check_row(
        &mut self,
        list: &StoredTargets,
        index: usize,
        checked: bool,
    ) -> Result<(), CoreError> {
        let url = list
            .get_index(index)
            .map(|t| t.connect_url.clone())
            .ok_or(CoreError::RowOutOfRange {
                index,
                len: list.len(),
            })?;
        self.check_target(list, &url, checked)
    }

    /// Check or uncheck the row for `url`.
    ///
    /// Unchecking always clears the header flag, even if other rows stay
    /// checked. Checking never sets it.
    pub fn check_target(
        &mut self,
        list: &StoredTargets,
        url: &ConnectUrl,
        checked: bool,
    ) -> Result<(), CoreError> {
        if !list.contains(url) {
            return Err(CoreError::TargetNotFound {
                target: url.clone(),
            });
        }

        if checked {
            if self.row_state(url).is_in_flight() {
                debug!(target = %url, "row has a delete in flight, not selecting");
                return Ok(());
            }
            self.rows.insert(url.clone(), RowState::Selected);
        } else {
            self.header_checked = false;
            if self.row_state(url).is_selected() {
                self.rows.remove(url);
            }
        }
        self.publish(list);
        Ok(())
    }

    /// `true` selects every row of `list` as it is right now; `false`
    /// clears every selection.
    ///
    /// Rows with a delete in flight keep their state, and the header is
    /// only set when that leaves every row checked.
    pub fn check_header(&mut self, list: &StoredTargets, checked: bool) {
        if checked {
            for target in list.iter() {
                if !self.row_state(&target.connect_url).is_in_flight() {
                    self.rows
                        .insert(target.connect_url.clone(), RowState::Selected);
                }
            }
            self.header_checked = self.all_selected(list);
            self.header_len = list.len();
        } else {
            self.rows.retain(|_, state| !state.is_selected());
            self.header_checked = false;
        }
        self.publish(list);
    }

    /// Re-select every row whose delete failed. Returns how many.
    pub fn retry_failed(&mut self, list: &StoredTargets) -> usize {
        let mut count = 0;
        for state in self.rows.values_mut() {
            if matches!(state, RowState::DeleteFailed { .. }) {
                *state = RowState::Selected;
                count += 1;
            }
        }
        if count > 0 {
            self.publish(list);
        }
        count
    }

    /// Drop state for rows no longer in `list`, and clear the header flag
    /// unless the length is unchanged and every row is still checked.
    pub fn retain(&mut self, list: &StoredTargets) {
        let before = self.rows.len();
        self.rows.retain(|url, _| list.contains(url));
        let dropped = before - self.rows.len();
        if dropped > 0 {
            debug!(dropped, "cleared selection for removed rows");
        }
        if self.header_checked
            && (self.header_len != list.len() || !self.all_selected(list))
        {
            self.header_checked = false;
        }
        self.publish(list);
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn row_state(&self, url: &ConnectUrl) -> RowState {
        self.rows.get(url).cloned().unwrap_or_default()
    }

    pub fn is_selected(&self, url: &ConnectUrl) -> bool {
        self.row_state(url).is_selected()
    }

    pub fn header_checked(&self) -> bool {
        self.header_checked
    }

    fn all_selected(&self, list: &StoredTargets) -> bool {
        list.iter().all(|t| self.is_selected(&t.connect_url))
    }

    pub fn has_selection(&self) -> bool {
        self.rows.values().any(RowState::is_selected)
    }

    /// Checked targets in list order.
    pub fn selected_targets(&self, list: &StoredTargets) -> Vec<Arc<Target>> {
        list.iter()
            .filter(|t| self.is_selected(&t.connect_url))
            .cloned()
            .collect()
    }

    /// Indices of checked rows, derived from `list` at call time.
    pub fn selected_indices(&self, list: &StoredTargets) -> Vec<usize> {
        list.iter()
            .enumerate()
            .filter(|(_, t)| self.is_selected(&t.connect_url))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn snapshot(&self) -> Arc<SelectionSnapshot> {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<SelectionSnapshot>> {
        self.snapshot.subscribe()
    }

    // ── Lifecycle transitions (driven by the delete coordinator) ─────

    /// Set the state of a row unconditionally.
    pub(crate) fn set_state(&mut self, url: &ConnectUrl, state: RowState) {
        if state == RowState::Idle {
            self.rows.remove(url);
        } else {
            self.rows.insert(url.clone(), state);
        }
    }

    /// Move `url` to `to` only if its current state satisfies `from`.
    /// Returns `true` if the transition happened.
    pub(crate) fn transition(
        &mut self,
        url: &ConnectUrl,
        from: impl Fn(&RowState) -> bool,
        to: RowState,
    ) -> bool {
        if from(&self.row_state(url)) {
            self.set_state(url, to);
            true
        } else {
            false
        }
    }

    pub(crate) fn clear_header(&mut self) {
        self.header_checked = false;
    }

    pub(crate) fn publish(&self, list: &StoredTargets) {
        let mut selected_indices = Vec::new();
        let mut rows = Vec::new();
        for (index, target) in list.iter().enumerate() {
            let Some(state) = self.rows.get(&target.connect_url) else {
                continue;
            };
            if state.is_selected() {
                selected_indices.push(index);
            }
            rows.push(RowEntry {
                target: target.connect_url.clone(),
                index,
                state: state.clone(),
            });
        }
        self.snapshot.send_replace(Arc::new(SelectionSnapshot {
            header_checked: self.header_checked,
            selected_indices,
            rows,
        }));
    }
}

impl Default for SelectionModel {
    fn default() -> Self {
        Self::new()
    }
}
