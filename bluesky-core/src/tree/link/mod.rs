//! Links: named, identified handles pointing to objects.
//!
//! A link is an engine: `{home group, actor, impl}` behind a value-semantics
//! handle. Handle equality is impl identity, ordering is home-id order,
//! hashing is over the impl address. The actor spawns lazily on first use;
//! the nil link never spawns one.

pub(crate) mod actor;
pub(crate) mod base;
pub(crate) mod fusion;
pub(crate) mod hard;
pub(crate) mod map;
pub(crate) mod sym;
pub(crate) mod weak;

pub use fusion::FusionBridge;
pub use map::{make_otid_filter, LinkMapper, Mapper, NodeMapper};

use crate::error::{Error, Result};
use crate::inode::Inode;
use crate::kernel;
use crate::object::{Object, WeakObject};
use crate::property::Propdict;
use crate::transaction::{LinkTransaction, TrResult};
use crate::tree::event::{Event, EventCallback, TreeEvent};
use crate::tree::group::spawn_queued_listener;
use crate::tree::node::Node;
use crate::tree::{Flags, Req, ReqReset, ReqStatus, TreeOpts};
use crate::types::LinkId;
use actor::LinkMsg;
use base::{LinkImpl, LinkKind};
use once_cell::sync::{Lazy, OnceCell};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;

/// Engine interior: strong impl plus the lazily spawned actor mailbox.
pub(crate) struct LinkEngine {
    pub imp: Arc<LinkImpl>,
    pub tx: OnceCell<UnboundedSender<LinkMsg>>,
}

impl Drop for LinkEngine {
    fn drop(&mut self) {
        // Map links detach their input retranslator.
        if let LinkKind::Map(m) = &self.imp.kind {
            if let Some(sid) = m.sub_id.get() {
                m.input.imp().home.remove_sub(*sid);
            }
        }
        // Last goodbye to home subscribers, then the actor.
        let mut params = Propdict::new();
        params.set("lid", self.imp.id);
        let ev = TreeEvent::new(Event::LINK_DELETED, Link::nil(), params);
        self.imp.home.deliver(&ev);
        self.imp.home.clear_subs();
        if let Some(tx) = self.tx.get() {
            let _ = tx.send(LinkMsg::Bye);
        }
    }
}

static NIL_LINK: Lazy<Link> = Lazy::new(|| {
    Link::from_impl(LinkImpl::with_id(
        LinkId::nil(),
        String::new(),
        Flags::PLAIN,
        LinkKind::Nil,
    ))
});

/// A polymorphic link handle.
#[derive(Clone)]
pub struct Link {
    pub(crate) eng: Arc<LinkEngine>,
}

impl Link {
    // -------------------------------------------------------------------------
    // construction
    // -------------------------------------------------------------------------

    pub(crate) fn from_impl(imp: LinkImpl) -> Link {
        Link {
            eng: Arc::new(LinkEngine {
                imp: Arc::new(imp),
                tx: OnceCell::new(),
            }),
        }
    }

    /// Hard link owning an object; payload always immediately available.
    pub fn hard(name: impl Into<String>, obj: Object) -> Link {
        let link = Self::from_impl(LinkImpl::new(
            name.into(),
            Flags::PLAIN,
            LinkKind::Hard(hard::HardData::new(obj.clone())),
        ));
        link.adopt_node_object(&obj);
        link
    }

    /// Weak link observing an object without extending its lifetime.
    pub fn weak(name: impl Into<String>, obj: &Object) -> Link {
        Self::from_impl(LinkImpl::new(
            name.into(),
            Flags::PLAIN,
            LinkKind::Weak(weak::WeakData::new(WeakObject::new(obj))),
        ))
    }

    /// Symbolic link carrying a path resolved against the containing node.
    pub fn sym(name: impl Into<String>, path: impl Into<String>) -> Link {
        Self::from_impl(LinkImpl::new(
            name.into(),
            Flags::PLAIN,
            LinkKind::Sym(sym::SymData::new(path.into())),
        ))
    }

    /// Fusion link owning an object plus an optional bridge; with no own
    /// bridge the nearest ancestor fusion bridge applies.
    pub fn fusion(
        name: impl Into<String>,
        obj: Object,
        bridge: Option<Arc<dyn FusionBridge>>,
    ) -> Link {
        let link = Self::from_impl(LinkImpl::new(
            name.into(),
            Flags::PLAIN,
            LinkKind::Fusion(fusion::FusionData::new(obj.clone(), bridge)),
        ));
        link.adopt_node_object(&obj);
        link
    }

    /// Map link reproducing a transformed view of `input` into an output
    /// node (created fresh unless given), re-evaluating on `update_on`
    /// events observed in the input subtree.
    pub fn map_link(
        mapper: Mapper,
        name: impl Into<String>,
        input: Node,
        output: Option<Node>,
        update_on: Event,
        opts: TreeOpts,
        flags: Flags,
    ) -> Link {
        let output = output.unwrap_or_default();
        let link = Self::from_impl(LinkImpl::new(
            name.into(),
            flags,
            LinkKind::Map(map::MapData::new(mapper, input, output.clone(), update_on, opts)),
        ));
        output.imp().set_handle_if_empty(&link);
        map::start_retranslator(&link);
        link
    }

    /// The nil link singleton: accepts the full vocabulary, returns empty or
    /// error results, never spawns an actor.
    pub fn nil() -> Link {
        NIL_LINK.clone()
    }

    /// Restore a link from archived state: explicit id, name, flags, inode
    /// and variant prototype. Used by archive readers.
    pub fn restore(proto: LinkProto) -> Link {
        let kind = match proto.kind {
            LinkProtoKind::Hard { obj, pending } => {
                let data = hard::HardData::new(obj.clone());
                *data.pending.lock() = pending;
                LinkKind::Hard(data)
            }
            LinkProtoKind::Weak { obj } => {
                LinkKind::Weak(weak::WeakData::new(WeakObject::new(&obj)))
            }
            LinkProtoKind::Sym { path } => LinkKind::Sym(sym::SymData::new(path)),
            LinkProtoKind::Fusion { obj } => {
                LinkKind::Fusion(fusion::FusionData::new(obj, None))
            }
        };
        let imp = LinkImpl::with_id(proto.id, proto.name, proto.flags, kind);
        *imp.inode.write() = proto.inode;
        let link = Self::from_impl(imp);
        if let Some(node) = link.imp().quick_node() {
            node.imp().set_handle_if_empty(&link);
        }
        link
    }

    /// Stored path of a sym link; `None` for other variants.
    pub fn sym_path(&self) -> Option<String> {
        match &self.imp().kind {
            LinkKind::Sym(s) => Some(s.path.read().clone()),
            _ => None,
        }
    }

    fn adopt_node_object(&self, obj: &Object) {
        if let Some(node) = obj.data_node() {
            node.imp().set_handle_if_empty(self);
        }
    }

    // -------------------------------------------------------------------------
    // engine identity
    // -------------------------------------------------------------------------

    pub(crate) fn imp(&self) -> &LinkImpl {
        &self.eng.imp
    }

    pub(crate) fn raw_actor(&self) -> &UnboundedSender<LinkMsg> {
        self.eng
            .tx
            .get_or_init(|| actor::spawn(self.eng.imp.clone(), Arc::downgrade(&self.eng)))
    }

    /// Whether this is the nil link.
    pub fn is_nil(&self) -> bool {
        self.imp().is_nil()
    }

    /// The link's immutable id.
    pub fn id(&self) -> LinkId {
        self.imp().id
    }

    /// String form of the id, naming the local event group.
    pub fn home_id(&self) -> String {
        self.imp().id.to_string()
    }

    /// Stable discriminator of the concrete variant.
    pub fn type_id(&self) -> &'static str {
        self.imp().type_id()
    }

    /// The node currently containing this link.
    pub fn owner(&self) -> Option<Node> {
        self.imp().owner()
    }

    /// Snapshot handle reading impl state without an actor round-trip.
    pub fn bare(&self) -> BareLink {
        BareLink {
            imp: self.eng.imp.clone(),
        }
    }

    // -------------------------------------------------------------------------
    // actor-routed operations
    // -------------------------------------------------------------------------

    async fn call<R>(&self, make: impl FnOnce(oneshot::Sender<R>) -> LinkMsg) -> Result<R> {
        let (tx, rx) = oneshot::channel();
        self.raw_actor()
            .send(make(tx))
            .map_err(|_| Error::Custom("link actor is gone".into()))?;
        match kernel::default_timeout() {
            Some(d) => tokio::time::timeout(d, rx)
                .await
                .map_err(|_| Error::RequestTimeout)?
                .map_err(|_| Error::Custom("link actor dropped the request".into())),
            None => rx
                .await
                .map_err(|_| Error::Custom("link actor dropped the request".into())),
        }
    }

    fn call_blocking<R>(&self, make: impl FnOnce(oneshot::Sender<R>) -> LinkMsg) -> Result<R> {
        let (tx, rx) = oneshot::channel();
        self.raw_actor()
            .send(make(tx))
            .map_err(|_| Error::Custom("link actor is gone".into()))?;
        rx.blocking_recv()
            .map_err(|_| Error::Custom("link actor dropped the request".into()))
    }

    /// Link name.
    pub async fn name(&self) -> String {
        if self.is_nil() {
            return String::new();
        }
        self.call(LinkMsg::GetName).await.unwrap_or_default()
    }

    /// Rename the link; returns 1 when the name actually changed.
    pub async fn rename(&self, new: impl Into<String>) -> usize {
        if self.is_nil() {
            return 0;
        }
        self.call(|tx| LinkMsg::Rename {
            new: new.into(),
            silent: false,
            tx: Some(tx),
        })
        .await
        .unwrap_or(0)
    }

    /// Link flags.
    pub async fn flags(&self) -> Flags {
        if self.is_nil() {
            return Flags::PLAIN;
        }
        self.call(LinkMsg::GetFlags).await.unwrap_or_default()
    }

    /// Replace the flag set.
    pub async fn set_flags(&self, flags: Flags) {
        if self.is_nil() {
            return;
        }
        let _ = self.raw_actor().send(LinkMsg::SetFlags(flags));
    }

    /// Link inode.
    pub async fn inode(&self) -> Result<Inode> {
        if self.is_nil() {
            return Err(Error::EmptyInode);
        }
        self.call(LinkMsg::GetInode)
            .await?
            .ok_or(Error::EmptyInode)
    }

    /// Pointee object instance id, or empty when unavailable.
    pub async fn oid(&self) -> String {
        if self.is_nil() {
            return String::new();
        }
        self.call(LinkMsg::GetOid).await.unwrap_or_default()
    }

    /// Pointee object type id, or empty when unavailable.
    pub async fn otid(&self) -> String {
        if self.is_nil() {
            return String::new();
        }
        self.call(LinkMsg::GetOtid).await.unwrap_or_default()
    }

    /// Current status of a request.
    pub async fn req_status(&self, req: Req) -> ReqStatus {
        if self.is_nil() {
            return ReqStatus::Void;
        }
        self.call(|tx| LinkMsg::GetStatus { req, tx })
            .await
            .unwrap_or(ReqStatus::Void)
    }

    async fn reset_impl(
        &self,
        req: Req,
        mode: ReqReset,
        new: ReqStatus,
        cmp: ReqStatus,
        silent: bool,
    ) -> ReqStatus {
        if self.is_nil() {
            return ReqStatus::Void;
        }
        self.call(|tx| LinkMsg::ResetStatus {
            req,
            mode,
            new,
            cmp,
            silent,
            tx: Some(tx),
        })
        .await
        .unwrap_or(ReqStatus::Void)
    }

    /// Unconditionally reset a request status; returns the previous one.
    pub async fn rs_reset(&self, req: Req, new: ReqStatus) -> ReqStatus {
        self.reset_impl(req, ReqReset::Always, new, ReqStatus::Void, false)
            .await
    }

    /// Reset a request status when it currently equals `cmp`.
    pub async fn rs_reset_if_eq(&self, req: Req, cmp: ReqStatus, new: ReqStatus) -> ReqStatus {
        self.reset_impl(req, ReqReset::IfEq, new, cmp, false).await
    }

    /// Reset a request status when it currently differs from `cmp`.
    pub async fn rs_reset_if_neq(&self, req: Req, cmp: ReqStatus, new: ReqStatus) -> ReqStatus {
        self.reset_impl(req, ReqReset::IfNeq, new, cmp, false).await
    }

    /// [`Link::rs_reset`] without the `LinkStatusChanged` ack.
    pub async fn rs_reset_silent(&self, req: Req, new: ReqStatus) -> ReqStatus {
        self.reset_impl(req, ReqReset::Always, new, ReqStatus::Void, true)
            .await
    }

    /// Obtain the pointee object, waiting while the request is busy.
    pub async fn data(&self) -> Result<Object> {
        self.data_ex(true).await
    }

    /// Obtain the pointee object; `wait_if_busy = false` fails fast with
    /// `LinkBusy` instead of parking.
    pub async fn data_ex(&self, wait_if_busy: bool) -> Result<Object> {
        if self.is_nil() {
            return Err(Error::EmptyData);
        }
        self.call(|tx| LinkMsg::Data {
            wait: wait_if_busy,
            tx: Some(tx),
        })
        .await?
        .map_err(Error::from)
    }

    /// Blocking form of [`Link::data`] for bridges, mappers and transactions.
    pub fn data_blocking(&self) -> Result<Object> {
        if self.is_nil() {
            return Err(Error::EmptyData);
        }
        self.call_blocking(|tx| LinkMsg::Data {
            wait: true,
            tx: Some(tx),
        })?
        .map_err(Error::from)
    }

    /// Deliver the pointee object to a callback through the transaction
    /// queue. A failed fire-and-forget request is logged and reported as a
    /// `DataModified` ack carrying an `error` parameter.
    pub fn data_cb(
        &self,
        cb: impl FnOnce(Result<Object>, Link) + Send + 'static,
        _high_prio: bool,
    ) {
        let link = self.clone();
        kernel::spawn(async move {
            let res = link.data().await;
            if let Err(e) = &res {
                if !e.is_quiet() {
                    tracing::warn!(lid = %link.id(), error = %e, "async data request failed");
                    let mut params = Propdict::new();
                    params.set("error", e.to_string());
                    base::emit_ack(&link, Event::DATA_MODIFIED, params);
                }
            }
            let cb_link = link.clone();
            crate::tree::queue::queue().enqueue(move || cb(res, cb_link));
        });
    }

    /// Deliver the pointee node to a callback through the transaction queue.
    pub fn data_node_cb(
        &self,
        cb: impl FnOnce(Result<Node>, Link) + Send + 'static,
        _high_prio: bool,
    ) {
        let link = self.clone();
        kernel::spawn(async move {
            let res = link.data_node().await;
            let cb_link = link.clone();
            crate::tree::queue::queue().enqueue(move || cb(res, cb_link));
        });
    }

    /// Obtain the pointee node, waiting while the request is busy.
    pub async fn data_node(&self) -> Result<Node> {
        self.data_node_ex(true).await
    }

    /// Obtain the pointee node; `wait_if_busy = false` fails fast.
    pub async fn data_node_ex(&self, wait_if_busy: bool) -> Result<Node> {
        if self.is_nil() {
            return Err(Error::EmptyData);
        }
        self.call(|tx| LinkMsg::DataNode {
            wait: wait_if_busy,
            tx: Some(tx),
        })
        .await?
        .map_err(Error::from)
    }

    /// Blocking form of [`Link::data_node`].
    pub fn data_node_blocking(&self) -> Result<Node> {
        if self.is_nil() {
            return Err(Error::EmptyData);
        }
        self.call_blocking(|tx| LinkMsg::DataNode {
            wait: true,
            tx: Some(tx),
        })?
        .map_err(Error::from)
    }

    /// Execute a transaction against this link through the process queue.
    pub async fn apply(&self, tr: LinkTransaction) -> TrResult {
        if self.is_nil() {
            return Err(Error::TrEmptyTarget.pack());
        }
        match self.call(|tx| LinkMsg::Apply { tr, tx }).await {
            Ok(res) => res,
            Err(e) => Err(e.pack()),
        }
    }

    /// Clone this link (fresh id); `deep` also clones the pointee object.
    pub async fn clone_link(&self, deep: bool) -> Result<Link> {
        if self.is_nil() {
            return Ok(Link::nil());
        }
        self.call(|tx| LinkMsg::CloneLink { deep, tx })
            .await?
            .map_err(Error::from)
    }

    /// Synchronous clone used by actors and subtree copies.
    pub(crate) fn clone_link_sync(&self, deep: bool) -> Result<Link> {
        let name = self.imp().name.read().clone();
        let flags = *self.imp().flags.read();
        let cloned = match &self.imp().kind {
            LinkKind::Nil => return Ok(Link::nil()),
            LinkKind::Hard(h) => {
                let obj = h.data.read().clone().ok_or(Error::EmptyData)?;
                let obj = if deep { obj.clone_object()? } else { obj };
                Link::hard(name, obj)
            }
            LinkKind::Weak(w) => {
                let obj = w.data.read().upgrade().ok_or(Error::LinkExpired)?;
                Link::weak(name, &obj)
            }
            LinkKind::Sym(s) => Link::sym(name, s.path.read().clone()),
            LinkKind::Fusion(f) => {
                let obj = f.data.read().clone().ok_or(Error::EmptyData)?;
                let obj = if deep { obj.clone_object()? } else { obj };
                Link::fusion(name, obj, f.bridge.read().clone())
            }
            LinkKind::Map(m) => Link::map_link(
                m.mapper.clone(),
                name,
                m.input.clone(),
                None,
                m.update_on,
                m.opts,
                flags,
            ),
        };
        *cloned.imp().flags.write() = flags;
        Ok(cloned)
    }

    /// Probe whether a sym link's target currently resolves; `false` for
    /// every other variant.
    pub async fn check_alive(&self) -> bool {
        match &self.imp().kind {
            LinkKind::Sym(_) => sym::check_alive(self).await,
            _ => false,
        }
    }

    // -------------------------------------------------------------------------
    // events
    // -------------------------------------------------------------------------

    /// Subscribe a callback to this link's home group; the mask filters
    /// event codes. Returns the handler id.
    pub fn subscribe(&self, mask: Event, cb: EventCallback) -> u64 {
        spawn_queued_listener(&self.imp().home, mask, cb)
    }

    /// Drop the subscriber with the given handler id.
    pub fn unsubscribe(&self, handler_id: u64) {
        self.imp().home.remove_sub(handler_id);
    }

    /// Drop the handler id from this link and every engine in its subtree.
    pub fn unsubscribe_deep(&self, handler_id: u64) {
        self.unsubscribe(handler_id);
        if let Some(node) = self.imp().quick_node() {
            node.imp().home.remove_sub(handler_id);
            for leaf in node.imp().leafs_snapshot() {
                leaf.unsubscribe_deep(handler_id);
            }
        }
    }
}

impl PartialEq for Link {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.eng.imp, &other.eng.imp)
    }
}

impl Eq for Link {}

impl PartialOrd for Link {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Link {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.imp().id.cmp(&other.imp().id)
    }
}

impl std::hash::Hash for Link {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.eng.imp) as usize).hash(state);
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("id", &self.imp().id)
            .field("type_id", &self.type_id())
            .finish_non_exhaustive()
    }
}

/// Archived state of a link, consumed by [`Link::restore`].
pub struct LinkProto {
    /// The link's original id.
    pub id: LinkId,
    /// Link name.
    pub name: String,
    /// Link flags.
    pub flags: Flags,
    /// Link inode, when archived.
    pub inode: Option<Inode>,
    /// Variant prototype.
    pub kind: LinkProtoKind,
}

/// Deferred payload read installed by an archive loader; runs once, on the
/// first Data request after load.
pub type PendingLoad = Box<dyn FnOnce(&Object) -> Result<()> + Send>;

/// Variant part of an archived link.
pub enum LinkProtoKind {
    /// Hard link; `pending` defers the payload read until first access.
    Hard {
        /// Restored object (payload possibly not yet read).
        obj: Object,
        /// Deferred payload read, run by the first Data request.
        pending: Option<PendingLoad>,
    },
    /// Weak link observing an already restored object.
    Weak {
        /// The observed object.
        obj: Object,
    },
    /// Symbolic link.
    Sym {
        /// Stored target path.
        path: String,
    },
    /// Fusion link; the bridge is not archived and must be re-attached.
    Fusion {
        /// Restored container object.
        obj: Object,
    },
}

/// Thin synchronous facade over a link's impl: direct reads, no actor.
pub struct BareLink {
    imp: Arc<LinkImpl>,
}

impl BareLink {
    /// Link id.
    pub fn id(&self) -> LinkId {
        self.imp.id
    }

    /// Link name.
    pub fn name(&self) -> String {
        self.imp.name.read().clone()
    }

    /// Link flags.
    pub fn flags(&self) -> Flags {
        *self.imp.flags.read()
    }

    /// Current request status.
    pub fn req_status(&self, req: Req) -> ReqStatus {
        self.imp.req_status(req)
    }

    /// Link inode.
    pub fn inode(&self) -> Option<crate::inode::Inode> {
        self.imp.inode.read().clone()
    }

    /// Pointee object id when available without a job.
    pub fn oid(&self) -> String {
        self.imp.quick_oid()
    }

    /// Pointee type id when available without a job.
    pub fn otid(&self) -> String {
        self.imp.quick_otid()
    }
}
