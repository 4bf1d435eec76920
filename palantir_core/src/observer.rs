//! Snapshot observers.

use crate::snapshot::ModelSnapshot;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Receives every published snapshot.
///
/// Calls are serialized by the simulator and arrive in capture order, so an
/// implementation sees each being's transitions in the order they happened.
/// Implementations should return quickly; publication waits for them.
pub trait SnapshotObserver: Send + Sync {
    fn on_snapshot(&self, snapshot: Arc<ModelSnapshot>);
}

impl<F> SnapshotObserver for F
where
    F: Fn(Arc<ModelSnapshot>) + Send + Sync,
{
    fn on_snapshot(&self, snapshot: Arc<ModelSnapshot>) {
        self(snapshot)
    }
}

/// Forwards snapshots into an unbounded channel.
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<Arc<ModelSnapshot>>,
}

impl ChannelObserver {
    /// Creates the observer and the receiving end.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Arc<ModelSnapshot>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl SnapshotObserver for ChannelObserver {
    fn on_snapshot(&self, snapshot: Arc<ModelSnapshot>) {
        // A dropped receiver just means nobody is listening any more.
        let _ = self.tx.send(snapshot);
    }
}

type Entry = (ObserverId, Arc<dyn SnapshotObserver>);

/// Registration list owned by the simulator.
#[derive(Default)]
pub(crate) struct Observers {
    next_id: AtomicU64,
    entries: Mutex<Vec<Entry>>,
}

impl Observers {
    fn lock(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn add(&self, observer: Arc<dyn SnapshotObserver>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, observer));
        id
    }

    pub(crate) fn remove(&self, id: ObserverId) -> bool {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    pub(crate) fn clear(&self) {
        self.lock().clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    /// Hands `snapshot` to every observer registered at call time.
    pub(crate) fn deliver(&self, snapshot: Arc<ModelSnapshot>) {
        // Observers run outside the registry lock so they may (un)subscribe.
        let targets: Vec<Arc<dyn SnapshotObserver>> =
            self.lock().iter().map(|(_, observer)| Arc::clone(observer)).collect();
        for observer in targets {
            observer.on_snapshot(Arc::clone(&snapshot));
        }
    }
}
