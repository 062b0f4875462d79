//! Weak links: observe an object without extending its lifetime.

use crate::object::WeakObject;
use parking_lot::RwLock;

pub(crate) struct WeakData {
    /// Observed object; upgrade fails with `LinkExpired` once the last
    /// strong handle is gone.
    pub data: RwLock<WeakObject>,
}

impl WeakData {
    pub fn new(target: WeakObject) -> Self {
        Self {
            data: RwLock::new(target),
        }
    }
}
