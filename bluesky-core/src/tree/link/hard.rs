//! Hard links: own an object reference, payload immediately available.

use crate::object::Object;
use crate::tree::link::PendingLoad;
use parking_lot::{Mutex, RwLock};

pub(crate) struct HardData {
    /// Owned object; present for the whole life of the link.
    pub data: RwLock<Option<Object>>,
    /// Lazy-load trigger, drained by the first Data job.
    pub pending: Mutex<Option<PendingLoad>>,
}

impl HardData {
    pub fn new(obj: Object) -> Self {
        Self {
            data: RwLock::new(Some(obj)),
            pending: Mutex::new(None),
        }
    }

    /// Take the pending payload read, if one is installed.
    pub fn take_pending(&self) -> Option<PendingLoad> {
        self.pending.lock().take()
    }
}
