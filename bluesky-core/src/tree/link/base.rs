//! Shared link impl: identity, flags, owner, inode, request state machines.
//!
//! The impl is the mutable interior of a link engine, protected by its own
//! locks and mutated through the link's actor. Variant-specific state lives
//! in [`LinkKind`]; everything here is common to all variants.

use crate::error::{Error, ErrorBox};
use crate::inode::Inode;
use crate::object::Object;
use crate::property::Propdict;
use crate::tree::event::{Event, TreeEvent};
use crate::tree::group::Group;
use crate::tree::link::fusion::FusionData;
use crate::tree::link::hard::HardData;
use crate::tree::link::map::MapData;
use crate::tree::link::sym::SymData;
use crate::tree::link::weak::WeakData;
use crate::tree::link::Link;
use crate::tree::node::{Node, NodeEngine};
use crate::tree::{Flags, Req, ReqReset, ReqStatus};
use crate::types::LinkId;
use parking_lot::{Mutex, RwLock};
use std::sync::Weak;
use tokio::sync::oneshot;

/// Per-request state: current status plus waiters parked while Busy.
///
/// Exactly one transition out of Busy delivers a result to every waiter.
pub(crate) struct ReqMachine<T> {
    pub status: ReqStatus,
    pub waiters: Vec<oneshot::Sender<Result<T, ErrorBox>>>,
}

impl<T> Default for ReqMachine<T> {
    fn default() -> Self {
        Self {
            status: ReqStatus::Void,
            waiters: Vec::new(),
        }
    }
}

impl<T: Clone> ReqMachine<T> {
    /// Transition out of Busy and deliver the result to all waiters.
    pub fn finish(&mut self, result: &Result<T, ErrorBox>) -> ReqStatus {
        let prev = self.status;
        self.status = if result.is_ok() {
            ReqStatus::OK
        } else {
            ReqStatus::Error
        };
        for w in self.waiters.drain(..) {
            let _ = w.send(result.clone());
        }
        prev
    }

    /// Drain waiters with an error after a forced reset out of Busy.
    fn abort_waiters(&mut self) {
        for w in self.waiters.drain(..) {
            let _ = w.send(Err(Error::EmptyData.pack()));
        }
    }
}

/// Variant-specific link state.
pub(crate) enum LinkKind {
    /// Stand-in for the empty/dead state; accepts the vocabulary, returns
    /// empty results, never spawns tasks.
    Nil,
    Hard(HardData),
    Weak(WeakData),
    Sym(SymData),
    Fusion(FusionData),
    Map(MapData),
}

/// Mutable interior shared by every link variant.
pub(crate) struct LinkImpl {
    pub id: LinkId,
    pub name: RwLock<String>,
    pub flags: RwLock<Flags>,
    pub inode: RwLock<Option<Inode>>,
    /// Weak back-reference to the single node that contains this link.
    pub owner: RwLock<Weak<NodeEngine>>,
    pub home: Group,
    pub kind: LinkKind,
    pub data_st: Mutex<ReqMachine<Object>>,
    pub node_st: Mutex<ReqMachine<Node>>,
}

impl LinkImpl {
    pub fn new(name: String, flags: Flags, kind: LinkKind) -> Self {
        let id = LinkId::new();
        Self::with_id(id, name, flags, kind)
    }

    pub fn with_id(id: LinkId, name: String, flags: Flags, kind: LinkKind) -> Self {
        Self {
            id,
            name: RwLock::new(name),
            flags: RwLock::new(flags),
            inode: RwLock::new(Some(Inode::default())),
            owner: RwLock::new(Weak::new()),
            home: Group::new(id.to_string()),
            kind,
            data_st: Mutex::new(ReqMachine::default()),
            node_st: Mutex::new(ReqMachine::default()),
        }
    }

    /// Stable discriminator of the concrete variant.
    pub fn type_id(&self) -> &'static str {
        match &self.kind {
            LinkKind::Nil => "nil_link",
            LinkKind::Hard(_) => "hard_link",
            LinkKind::Weak(_) => "weak_link",
            LinkKind::Sym(_) => "sym_link",
            LinkKind::Fusion(_) => "fusion_link",
            LinkKind::Map(_) => "map_link",
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self.kind, LinkKind::Nil)
    }

    /// The node currently containing this link.
    pub fn owner(&self) -> Option<Node> {
        self.owner.read().upgrade().map(Node::from_engine)
    }

    pub fn set_owner(&self, owner: Weak<NodeEngine>) {
        *self.owner.write() = owner;
    }

    /// Rename without touching the owner's name index or emitting acks.
    pub fn set_name(&self, new: String) -> String {
        std::mem::replace(&mut *self.name.write(), new)
    }

    pub fn req_status(&self, req: Req) -> ReqStatus {
        match req {
            Req::Data => self.data_st.lock().status,
            Req::DataNode => self.node_st.lock().status,
        }
    }

    /// Reset a request status under the given condition.
    ///
    /// Returns the previous status and whether the value changed. A forced
    /// transition out of Busy aborts parked waiters with an error.
    pub fn rs_reset(
        &self,
        req: Req,
        mode: ReqReset,
        new: ReqStatus,
        cmp: ReqStatus,
    ) -> (ReqStatus, bool) {
        fn apply<T: Clone>(
            m: &mut ReqMachine<T>,
            mode: ReqReset,
            new: ReqStatus,
            cmp: ReqStatus,
        ) -> (ReqStatus, bool) {
            let prev = m.status;
            let fire = match mode {
                ReqReset::Always => true,
                ReqReset::IfEq => prev == cmp,
                ReqReset::IfNeq => prev != cmp,
            };
            if fire && prev != new {
                m.status = new;
                if prev == ReqStatus::Busy {
                    m.abort_waiters();
                }
                (prev, true)
            } else {
                (prev, false)
            }
        }
        match req {
            Req::Data => apply(&mut self.data_st.lock(), mode, new, cmp),
            Req::DataNode => apply(&mut self.node_st.lock(), mode, new, cmp),
        }
    }

    /// Pointee object when it is available without running a job.
    pub fn cached_object(&self) -> Option<Object> {
        match &self.kind {
            LinkKind::Hard(h) => h.data.read().clone(),
            LinkKind::Weak(w) => w.data.read().upgrade(),
            LinkKind::Fusion(f) => f.data.read().clone(),
            _ => None,
        }
    }

    /// Pointee node when it is reachable without running a job.
    pub fn quick_node(&self) -> Option<Node> {
        match &self.kind {
            LinkKind::Map(m) => Some(m.output.clone()),
            _ => self.cached_object().and_then(|o| o.data_node()),
        }
    }

    /// Pointee object instance id, or empty when unavailable.
    pub fn quick_oid(&self) -> String {
        self.cached_object()
            .map(|o| o.id().to_owned())
            .unwrap_or_default()
    }

    /// Pointee object type id, or empty when unavailable.
    pub fn quick_otid(&self) -> String {
        self.cached_object().map(|o| o.type_id()).unwrap_or_default()
    }
}

/// Build the params dict of a `LinkStatusChanged` ack.
pub(crate) fn status_params(req: Req, new: ReqStatus, prev: ReqStatus) -> Propdict {
    let mut p = Propdict::new();
    p.set("request", req as i64)
        .set("new_status", new as i64)
        .set("prev_status", prev as i64);
    p
}

/// Post an ack to the origin's home group and retransmit it up the handle
/// chain so ancestors observe subtree mutations.
pub(crate) fn emit_ack(origin: &Link, code: Event, params: Propdict) {
    let ev = TreeEvent::new(code, origin.clone(), params);
    origin.imp().home.deliver(&ev);
    let mut cur = origin.owner();
    // Ownership is acyclic, the guard only bounds pathological graphs.
    let mut guard = 0usize;
    while let Some(node) = cur {
        node.imp().home.deliver(&ev);
        match node.handle() {
            Some(handle) => {
                handle.imp().home.deliver(&ev);
                cur = handle.owner();
            }
            None => break,
        }
        guard += 1;
        if guard > 256 {
            tracing::warn!(lid = %origin.id(), "ack retransmission chain too deep, stopping");
            break;
        }
    }
}
