//! Fork group bookkeeping: branch registration, result collection, join wait.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::context::AgentOutput;

/// State of one opened fork group.
///
/// Branch tasks report their outputs through [`record_branch`]; the join node
/// waits on [`wait_complete`] until every branch has reported. Branch outputs
/// stay invisible to the parent scope until the join merges them.
///
/// [`record_branch`]: ForkGroupState::record_branch
/// [`wait_complete`]: ForkGroupState::wait_complete
pub struct ForkGroupState {
    pub group_id: String,
    pub fork_node_id: String,
    /// Required join inputs: the last node of each branch.
    pub leaf_ids: Vec<String>,
    pub require_all: bool,
    branch_count: usize,
    branches_done: AtomicUsize,
    outputs: Mutex<HashMap<String, AgentOutput>>,
    notify: Notify,
}

impl ForkGroupState {
    pub fn is_complete(&self) -> bool {
        self.branches_done.load(Ordering::SeqCst) >= self.branch_count
    }

    /// Merges one finished branch's new outputs and wakes waiters.
    pub fn record_branch(&self, outputs: HashMap<String, AgentOutput>) {
        {
            let mut all = self.outputs.lock().expect("fork outputs lock");
            all.extend(outputs);
        }
        self.branches_done.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn snapshot_outputs(&self) -> HashMap<String, AgentOutput> {
        self.outputs.lock().expect("fork outputs lock").clone()
    }

    /// Waits until every branch reported or the timeout elapses. Returns
    /// whether the group completed.
    pub async fn wait_complete(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            if self.is_complete() {
                return true;
            }
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return self.is_complete();
            };
            if tokio::time::timeout(remaining, notified).await.is_err() {
                return self.is_complete();
            }
        }
    }
}

/// Per-run registry of fork groups. Joins look groups up by the fork node id;
/// each fork execution opens a fresh group (fresh id), and the latest one wins
/// for its fork node — loop iterations re-fork cleanly.
#[derive(Default)]
pub struct ForkGroupManager {
    by_group: DashMap<String, Arc<ForkGroupState>>,
    latest_by_fork: DashMap<String, String>,
}

impl ForkGroupManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(
        &self,
        fork_node_id: &str,
        leaf_ids: Vec<String>,
        branch_count: usize,
        require_all: bool,
    ) -> Arc<ForkGroupState> {
        let group_id = format!(
            "{}_{}",
            fork_node_id,
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        let state = Arc::new(ForkGroupState {
            group_id: group_id.clone(),
            fork_node_id: fork_node_id.to_string(),
            leaf_ids,
            require_all,
            branch_count,
            branches_done: AtomicUsize::new(0),
            outputs: Mutex::new(HashMap::new()),
            notify: Notify::new(),
        });
        self.by_group.insert(group_id.clone(), state.clone());
        self.latest_by_fork
            .insert(fork_node_id.to_string(), group_id);
        state
    }

    /// Latest group opened by the given fork node, or a direct group id.
    pub fn group_for_fork(&self, fork_node_id: &str) -> Option<Arc<ForkGroupState>> {
        if let Some(group_id) = self.latest_by_fork.get(fork_node_id) {
            return self.by_group.get(group_id.value()).map(|g| g.clone());
        }
        self.by_group.get(fork_node_id).map(|g| g.clone())
    }
}
