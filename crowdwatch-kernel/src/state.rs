use crate::models::ZoneSnapshot;
use parking_lot::Mutex;
use std::sync::Arc;

pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

/// Latest zone snapshot. A snapshot captured before the held one is dropped,
/// so a late poll result never overwrites fresher data.
#[derive(Clone, Default)]
pub struct SnapshotCell {
    inner: Shared<Option<ZoneSnapshot>>,
}

impl SnapshotCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when the snapshot was older than the held one.
    pub fn store(&self, snapshot: ZoneSnapshot) -> bool {
        let mut slot = self.inner.lock();
        if let Some(current) = slot.as_ref() {
            if snapshot.captured_at < current.captured_at {
                return false;
            }
        }
        *slot = Some(snapshot);
        true
    }

    pub fn latest(&self) -> Option<ZoneSnapshot> {
        self.inner.lock().clone()
    }
}
