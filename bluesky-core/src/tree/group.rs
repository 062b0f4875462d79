//! Local event groups.
//!
//! Every engine owns a group named by its home id. Mutating actors post ack
//! messages here; subscriptions attach listener tasks that filter by mask.
//! Delivery to a single group is fan-out only — walking the handle chain
//! upward is done by the emitting engine, which knows its owner.

use crate::tree::event::{Event, TreeEvent};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

static NEXT_SUB_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique subscription id.
pub(crate) fn next_sub_id() -> u64 {
    NEXT_SUB_ID.fetch_add(1, Ordering::Relaxed)
}

struct Sub {
    id: u64,
    mask: Event,
    tx: UnboundedSender<TreeEvent>,
}

struct GroupInner {
    id: String,
    subs: Mutex<Vec<Sub>>,
}

/// A home event group.
#[derive(Clone)]
pub(crate) struct Group {
    inner: Arc<GroupInner>,
}

impl Group {
    /// Create a group named by a home id.
    pub fn new(id: String) -> Self {
        Self {
            inner: Arc::new(GroupInner {
                id,
                subs: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Group (home) id.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Register a raw subscriber channel under a fresh subscription id.
    pub fn add_sub(&self, mask: Event, tx: UnboundedSender<TreeEvent>) -> u64 {
        let id = next_sub_id();
        self.inner.subs.lock().push(Sub { id, mask, tx });
        id
    }

    /// Drop the subscriber with the given id. Returns whether it was present.
    pub fn remove_sub(&self, id: u64) -> bool {
        let mut subs = self.inner.subs.lock();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    /// Drop every subscriber; their listener tasks observe channel closure.
    pub fn clear_subs(&self) {
        self.inner.subs.lock().clear();
    }

    /// Number of live subscribers.
    pub fn sub_count(&self) -> usize {
        self.inner.subs.lock().len()
    }

    /// Deliver an event to every matching local subscriber.
    ///
    /// Dead channels (listener gone without unsubscribe) are pruned on the
    /// way.
    pub fn deliver(&self, ev: &TreeEvent) {
        let mut subs = self.inner.subs.lock();
        subs.retain(|s| {
            if s.mask.accepts(ev.code) {
                s.tx.send(ev.clone()).is_ok()
            } else {
                !s.tx.is_closed()
            }
        });
    }
}

/// Attach a listener task to a group: events matching `mask` are forwarded
/// into the transaction queue where the user callback runs serialized.
///
/// Returns the subscription id; removing it from the group ends the task.
pub(crate) fn spawn_queued_listener(
    group: &Group,
    mask: Event,
    cb: crate::tree::event::EventCallback,
) -> u64 {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let id = group.add_sub(mask, tx);
    crate::kernel::spawn(async move {
        while let Some(ev) = rx.recv().await {
            let cb = cb.clone();
            crate::tree::queue::queue().enqueue(move || cb(ev));
        }
    });
    id
}
