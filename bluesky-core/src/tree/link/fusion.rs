//! Fusion links: own an object plus a bridge that lazily fills data and
//! child structure on demand.

use crate::error::Result;
use crate::object::Object;
use crate::property::Propdict;
use crate::tree::link::base::LinkKind;
use crate::tree::link::Link;
use parking_lot::RwLock;
use std::sync::Arc;

/// User-provided populator for fusion links.
///
/// `pull_data` fills the root object's payload; `populate` fills its child
/// structure. Both run on the blocking pool, so implementations may sleep or
/// do IO and may use the `*_blocking` tree API.
pub trait FusionBridge: Send + Sync {
    /// Fill the object's payload.
    fn pull_data(&self, root: Object, root_link: Link, params: Propdict) -> Result<()>;

    /// Fill the object's child structure.
    fn populate(&self, root: Object, root_link: Link, params: Propdict) -> Result<()>;
}

pub(crate) struct FusionData {
    /// Owned container object the bridge fills.
    pub data: RwLock<Option<Object>>,
    /// Own bridge; when absent, the nearest ancestor fusion bridge applies.
    pub bridge: RwLock<Option<Arc<dyn FusionBridge>>>,
}

impl FusionData {
    pub fn new(obj: Object, bridge: Option<Arc<dyn FusionBridge>>) -> Self {
        Self {
            data: RwLock::new(Some(obj)),
            bridge: RwLock::new(bridge),
        }
    }
}

/// Find the bridge serving a fusion link: its own, or the nearest ancestor
/// fusion link's, walking up the handle chain.
pub(crate) fn find_bridge(link: &Link) -> Option<Arc<dyn FusionBridge>> {
    let mut cur = Some(link.clone());
    let mut guard = 0usize;
    while let Some(l) = cur {
        if let LinkKind::Fusion(f) = &l.imp().kind {
            if let Some(b) = f.bridge.read().clone() {
                return Some(b);
            }
        }
        cur = l.owner().and_then(|n| n.handle());
        guard += 1;
        if guard > 256 {
            break;
        }
    }
    None
}
