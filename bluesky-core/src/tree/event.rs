//! Tree events: ack codes and the event payload delivered to subscribers.

use crate::property::Propdict;
use crate::tree::link::Link;

/// Event code mask.
///
/// Acks carry exactly one code; subscription masks combine several.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Event(pub u32);

impl Event {
    /// Initial/refresh invocation that is not tied to a mutation.
    pub const NIL: Event = Event(0);
    /// A link changed its name.
    pub const LINK_RENAMED: Event = Event(1);
    /// A request status transitioned.
    pub const LINK_STATUS_CHANGED: Event = Event(2);
    /// A link was inserted into a node.
    pub const LINK_INSERTED: Event = Event(4);
    /// A link (and possibly its subtree) was erased from a node.
    pub const LINK_ERASED: Event = Event(8);
    /// A link engine was destroyed.
    pub const LINK_DELETED: Event = Event(16);
    /// Pointee object data changed.
    pub const DATA_MODIFIED: Event = Event(32);
    /// Pointee node structure changed.
    pub const DATA_NODE_MODIFIED: Event = Event(64);
    /// All event codes.
    pub const ALL: Event = Event(u32::MAX);

    /// Whether this mask admits the given single-code event.
    pub fn accepts(self, code: Event) -> bool {
        // NIL (zero) is admitted by any mask, matching its role as the
        // "no particular mutation" refresh marker.
        code.0 == 0 || self.0 & code.0 != 0
    }
}

impl std::ops::BitOr for Event {
    type Output = Event;
    fn bitor(self, rhs: Event) -> Event {
        Event(self.0 | rhs.0)
    }
}

impl Default for Event {
    fn default() -> Self {
        Event::NIL
    }
}

/// User event handler, dispatched through the transaction queue so handlers
/// never run concurrently with each other or with transactions.
pub type EventCallback = std::sync::Arc<dyn Fn(TreeEvent) + Send + Sync>;

/// An ack delivered to subscribers of an engine's home group.
///
/// Parameter names per code: `LinkRenamed` carries `new_name`/`prev_name`;
/// `LinkStatusChanged` carries `request`/`new_status`/`prev_status`;
/// `LinkInserted` carries `lid`; `LinkErased` carries `lids` (depth-first)
/// and `oids`; a failed fire-and-forget job reports `DataModified` with an
/// `error` message.
#[derive(Clone)]
pub struct TreeEvent {
    /// Single event code.
    pub code: Event,
    /// The link this ack originated from (nil for anonymous events).
    pub origin: Link,
    /// Named event parameters.
    pub params: Propdict,
}

impl TreeEvent {
    /// Build an event with the given code, origin and parameters.
    pub fn new(code: Event, origin: Link, params: Propdict) -> Self {
        Self {
            code,
            origin,
            params,
        }
    }
}

impl std::fmt::Debug for TreeEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeEvent")
            .field("code", &self.code)
            .field("origin", &self.origin.id())
            .field("params", &self.params)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_accepts_members() {
        let mask = Event::LINK_INSERTED | Event::LINK_ERASED;
        assert!(mask.accepts(Event::LINK_INSERTED));
        assert!(mask.accepts(Event::LINK_ERASED));
        assert!(!mask.accepts(Event::LINK_RENAMED));
    }

    #[test]
    fn nil_passes_any_mask() {
        assert!(Event::LINK_INSERTED.accepts(Event::NIL));
        assert!(Event::ALL.accepts(Event::NIL));
    }
}
