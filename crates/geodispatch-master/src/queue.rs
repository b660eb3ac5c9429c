use geodispatch_core::{RowIndex, WorkItem};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Notify;
use tracing::warn;

#[derive(Default)]
struct QueueState {
    /// Items waiting for a session, in dispatch order
    pending: VecDeque<WorkItem>,
    /// Items handed to a session and not yet settled
    checked_out: HashMap<RowIndex, WorkItem>,
    /// Items whose result has been recorded
    completed: usize,
}

impl QueueState {
    fn is_drained(&self) -> bool {
        self.pending.is_empty() && self.checked_out.is_empty()
    }
}

/// Consistent view of where every enqueued item currently is
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inventory {
    pub pending: Vec<RowIndex>,
    pub checked_out: Vec<RowIndex>,
    pub completed: usize,
}

/// FIFO of pending work shared by all sessions.
///
/// Every item is in exactly one place: pending, checked out to one session,
/// or completed. All transitions happen under a single lock.
pub struct TaskQueue {
    state: Mutex<QueueState>,
    drained: Notify,
    total: usize,
}

impl TaskQueue {
    pub fn new(items: impl IntoIterator<Item = WorkItem>) -> Self {
        let pending: VecDeque<WorkItem> = items.into_iter().collect();
        let total = pending.len();

        TaskQueue {
            state: Mutex::new(QueueState {
                pending,
                ..QueueState::default()
            }),
            drained: Notify::new(),
            total,
        }
    }

    /// Take the next pending item and mark it checked out.
    ///
    /// Returns `None` when nothing is pending; it never waits for work.
    pub fn pull(&self) -> Option<WorkItem> {
        let mut state = self.state.lock();
        let item = state.pending.pop_front()?;
        state.checked_out.insert(item.index, item.clone());
        Some(item)
    }

    /// Return a checked-out item to the back of the queue.
    ///
    /// Items that are not checked out are ignored, so a stale requeue can never
    /// duplicate pending work. Returns whether the item was requeued.
    pub fn requeue(&self, item: WorkItem) -> bool {
        let mut state = self.state.lock();
        if state.checked_out.remove(&item.index).is_none() {
            warn!("Ignoring requeue of item {} which is not checked out", item.index);
            return false;
        }

        state.pending.push_back(item);
        true
    }

    /// Settle a checked-out item as completed.
    ///
    /// `record` runs while the queue lock is held, so no observer can see the
    /// item both checked out and recorded. Returns `None` without calling
    /// `record` when the item is not checked out.
    pub fn complete<R>(&self, index: RowIndex, record: impl FnOnce(&WorkItem) -> R) -> Option<R> {
        let mut state = self.state.lock();
        let item = state.checked_out.remove(&index)?;
        let output = record(&item);
        state.completed += 1;

        if state.is_drained() {
            self.drained.notify_waiters();
        }

        Some(output)
    }

    /// No pending items remain (some may still be checked out)
    pub fn is_exhausted(&self) -> bool {
        self.state.lock().pending.is_empty()
    }

    /// No pending and no checked-out items remain
    pub fn is_drained(&self) -> bool {
        self.state.lock().is_drained()
    }

    /// Wait until every enqueued item has completed
    pub async fn drained(&self) {
        loop {
            // Created before the check so a concurrent completion is not missed
            let notified = self.drained.notified();
            if self.is_drained() {
                return;
            }
            notified.await;
        }
    }

    /// Number of pending items
    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of checked-out items
    pub fn in_flight(&self) -> usize {
        self.state.lock().checked_out.len()
    }

    pub fn completed(&self) -> usize {
        self.state.lock().completed
    }

    /// Number of items the queue was built with
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn inventory(&self) -> Inventory {
        let state = self.state.lock();
        let mut checked_out: Vec<RowIndex> = state.checked_out.keys().copied().collect();
        checked_out.sort_unstable();

        Inventory {
            pending: state.pending.iter().map(|item| item.index).collect(),
            checked_out,
            completed: state.completed,
        }
    }
}
