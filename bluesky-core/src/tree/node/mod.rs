//! Nodes: ordered multi-indexed collections of links.

pub(crate) mod actor;
pub(crate) mod base;

pub use base::InsertStatus;

use crate::error::{Error, Result};
use crate::kernel;
use crate::transaction::{NodeTransaction, TrResult};
use crate::tree::event::{Event, EventCallback};
use crate::tree::group::spawn_queued_listener;
use crate::tree::link::Link;
use crate::tree::{InsertPolicy, Key};
use crate::types::LinkId;
use actor::{NodeKey, NodeMsg};
use base::NodeImpl;
use once_cell::sync::{Lazy, OnceCell};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;

/// Engine interior: strong impl plus the lazily spawned actor mailbox.
pub(crate) struct NodeEngine {
    pub imp: Arc<NodeImpl>,
    pub tx: OnceCell<UnboundedSender<NodeMsg>>,
}

impl Drop for NodeEngine {
    fn drop(&mut self) {
        self.imp.home.clear_subs();
        if let Some(tx) = self.tx.get() {
            let _ = tx.send(NodeMsg::Bye);
        }
    }
}

static NIL_NODE: Lazy<Node> = Lazy::new(|| Node {
    eng: Arc::new(NodeEngine {
        imp: Arc::new(NodeImpl::nil_impl()),
        tx: OnceCell::new(),
    }),
});

/// Handle to a node engine.
#[derive(Clone)]
pub struct Node {
    pub(crate) eng: Arc<NodeEngine>,
}

impl Node {
    /// Create a fresh empty node.
    pub fn new() -> Node {
        Node {
            eng: Arc::new(NodeEngine {
                imp: Arc::new(NodeImpl::new()),
                tx: OnceCell::new(),
            }),
        }
    }

    /// The nil node singleton: empty, actorless, refuses mutations.
    pub fn nil() -> Node {
        NIL_NODE.clone()
    }

    pub(crate) fn from_engine(eng: Arc<NodeEngine>) -> Node {
        Node { eng }
    }

    pub(crate) fn imp(&self) -> &NodeImpl {
        &self.eng.imp
    }

    fn raw_actor(&self) -> &UnboundedSender<NodeMsg> {
        self.eng
            .tx
            .get_or_init(|| actor::spawn(self.eng.imp.clone(), Arc::downgrade(&self.eng)))
    }

    /// Whether this is the nil node.
    pub fn is_nil(&self) -> bool {
        self.imp().nil
    }

    /// Node id; its string form names the home group and the archive
    /// directory of this node.
    pub fn id(&self) -> LinkId {
        self.imp().id
    }

    /// String form of the node id.
    pub fn home_id(&self) -> String {
        self.imp().id.to_string()
    }

    /// The single link containing this node, if any.
    pub fn handle(&self) -> Option<Link> {
        self.imp().handle()
    }

    async fn call<R>(&self, make: impl FnOnce(oneshot::Sender<R>) -> NodeMsg) -> Result<R> {
        let (tx, rx) = oneshot::channel();
        self.raw_actor()
            .send(make(tx))
            .map_err(|_| Error::Custom("node actor is gone".into()))?;
        match kernel::default_timeout() {
            Some(d) => tokio::time::timeout(d, rx)
                .await
                .map_err(|_| Error::RequestTimeout)?
                .map_err(|_| Error::Custom("node actor dropped the request".into())),
            None => rx
                .await
                .map_err(|_| Error::Custom("node actor dropped the request".into())),
        }
    }

    fn call_blocking<R>(&self, make: impl FnOnce(oneshot::Sender<R>) -> NodeMsg) -> Result<R> {
        let (tx, rx) = oneshot::channel();
        self.raw_actor()
            .send(make(tx))
            .map_err(|_| Error::Custom("node actor is gone".into()))?;
        rx.blocking_recv()
            .map_err(|_| Error::Custom("node actor dropped the request".into()))
    }

    // -------------------------------------------------------------------------
    // size and traversal
    // -------------------------------------------------------------------------

    /// Number of leafs (AnyOrder cardinality).
    pub async fn size(&self) -> usize {
        if self.is_nil() {
            return 0;
        }
        self.call(NodeMsg::Size).await.unwrap_or(0)
    }

    /// Whether the node has no leafs.
    pub async fn is_empty(&self) -> bool {
        self.size().await == 0
    }

    /// Erase every leaf; returns the number erased.
    pub async fn clear(&self) -> usize {
        if self.is_nil() {
            return 0;
        }
        self.call(NodeMsg::Clear).await.unwrap_or(0)
    }

    /// Leafs ordered by the given index.
    pub async fn leafs(&self, order: Key) -> Vec<Link> {
        if self.is_nil() {
            return Vec::new();
        }
        self.call(|tx| NodeMsg::Leafs { order, tx })
            .await
            .unwrap_or_default()
    }

    /// Link ids ordered by the given index.
    pub async fn keys(&self, order: Key) -> Vec<LinkId> {
        if self.is_nil() {
            return Vec::new();
        }
        self.call(|tx| NodeMsg::Keys { order, tx })
            .await
            .unwrap_or_default()
    }

    /// AnyOrder positions ordered by the given index.
    pub async fn ikeys(&self, order: Key) -> Vec<usize> {
        if self.is_nil() {
            return Vec::new();
        }
        self.call(|tx| NodeMsg::IKeys { order, tx })
            .await
            .unwrap_or_default()
    }

    /// String keys under `meaning`, ordered by the given index.
    pub async fn skeys(&self, meaning: Key, order: Key) -> Vec<String> {
        if self.is_nil() {
            return Vec::new();
        }
        self.call(|tx| NodeMsg::SKeys { meaning, order, tx })
            .await
            .unwrap_or_default()
    }

    // -------------------------------------------------------------------------
    // lookup
    // -------------------------------------------------------------------------

    /// Find a leaf by link id; nil when absent.
    pub async fn find(&self, id: LinkId) -> Link {
        if self.is_nil() {
            return Link::nil();
        }
        self.call(|tx| NodeMsg::Find {
            key: NodeKey::Id(id),
            tx,
        })
        .await
        .unwrap_or_else(|_| Link::nil())
    }

    /// Find a leaf by AnyOrder position; nil when out of range.
    pub async fn find_at(&self, index: usize) -> Link {
        if self.is_nil() {
            return Link::nil();
        }
        self.call(|tx| NodeMsg::Find {
            key: NodeKey::Index(index),
            tx,
        })
        .await
        .unwrap_or_else(|_| Link::nil())
    }

    /// Find the first leaf whose string key under `meaning` matches.
    pub async fn find_named(&self, key: impl Into<String>, meaning: Key) -> Link {
        if self.is_nil() {
            return Link::nil();
        }
        self.call(|tx| NodeMsg::Find {
            key: NodeKey::Str {
                key: key.into(),
                meaning,
            },
            tx,
        })
        .await
        .unwrap_or_else(|_| Link::nil())
    }

    /// AnyOrder position of the leaf with the given id.
    pub async fn index(&self, id: LinkId) -> Option<usize> {
        if self.is_nil() {
            return None;
        }
        self.call(|tx| NodeMsg::Index {
            key: NodeKey::Id(id),
            tx,
        })
        .await
        .unwrap_or(None)
    }

    /// AnyOrder position of the first leaf matching a string key.
    pub async fn index_of(&self, key: impl Into<String>, meaning: Key) -> Option<usize> {
        if self.is_nil() {
            return None;
        }
        self.call(|tx| NodeMsg::Index {
            key: NodeKey::Str {
                key: key.into(),
                meaning,
            },
            tx,
        })
        .await
        .unwrap_or(None)
    }

    /// All leafs whose string key under `meaning` matches.
    pub async fn equal_range(&self, key: impl Into<String>, meaning: Key) -> Vec<Link> {
        if self.is_nil() {
            return Vec::new();
        }
        self.call(|tx| NodeMsg::EqualRange {
            key: key.into(),
            meaning,
            tx,
        })
        .await
        .unwrap_or_default()
    }

    /// Depth-first search of the subtree for a link id.
    pub async fn deep_search(&self, id: LinkId) -> Link {
        if self.is_nil() {
            return Link::nil();
        }
        self.call(|tx| NodeMsg::DeepSearch {
            key: NodeKey::Id(id),
            tx,
        })
        .await
        .unwrap_or_else(|_| Link::nil())
    }

    /// Depth-first search of the subtree for a string key.
    pub async fn deep_search_named(&self, key: impl Into<String>, meaning: Key) -> Link {
        if self.is_nil() {
            return Link::nil();
        }
        self.call(|tx| NodeMsg::DeepSearch {
            key: NodeKey::Str {
                key: key.into(),
                meaning,
            },
            tx,
        })
        .await
        .unwrap_or_else(|_| Link::nil())
    }

    /// All subtree links whose string key under `meaning` matches.
    pub async fn deep_equal_range(&self, key: impl Into<String>, meaning: Key) -> Vec<Link> {
        if self.is_nil() {
            return Vec::new();
        }
        self.call(|tx| NodeMsg::DeepEqualRange {
            key: key.into(),
            meaning,
            tx,
        })
        .await
        .unwrap_or_default()
    }

    // -------------------------------------------------------------------------
    // mutation
    // -------------------------------------------------------------------------

    /// Insert a link at the back of AnyOrder.
    pub async fn insert(&self, link: Link, policy: InsertPolicy) -> InsertStatus {
        self.insert_with(link, None, policy).await
    }

    /// Insert a link at an explicit AnyOrder position.
    pub async fn insert_with(
        &self,
        link: Link,
        index: Option<usize>,
        policy: InsertPolicy,
    ) -> InsertStatus {
        if self.is_nil() {
            return InsertStatus::blocked(None);
        }
        self.call(|tx| NodeMsg::Insert {
            link,
            index,
            policy,
            tx: Some(tx),
        })
        .await
        .unwrap_or(InsertStatus {
            index: None,
            inserted: false,
        })
    }

    /// Insert several links; returns how many entered the node.
    pub async fn insert_many(&self, links: Vec<Link>, policy: InsertPolicy) -> usize {
        if self.is_nil() {
            return 0;
        }
        self.call(|tx| NodeMsg::InsertMany { links, policy, tx })
            .await
            .unwrap_or(0)
    }

    /// Erase the leaf with the given id (and its subtree, reflected in the
    /// erase ack); returns the number of erased leafs.
    pub async fn erase(&self, id: LinkId) -> usize {
        if self.is_nil() {
            return 0;
        }
        self.call(|tx| NodeMsg::Erase {
            keys: vec![NodeKey::Id(id)],
            tx: Some(tx),
        })
        .await
        .unwrap_or(0)
    }

    /// Erase the leaf at an AnyOrder position.
    pub async fn erase_at(&self, index: usize) -> usize {
        if self.is_nil() {
            return 0;
        }
        self.call(|tx| NodeMsg::Erase {
            keys: vec![NodeKey::Index(index)],
            tx: Some(tx),
        })
        .await
        .unwrap_or(0)
    }

    /// Erase every leaf matching a string key.
    pub async fn erase_named(&self, key: impl Into<String>, meaning: Key) -> usize {
        if self.is_nil() {
            return 0;
        }
        self.call(|tx| NodeMsg::Erase {
            keys: vec![NodeKey::Str {
                key: key.into(),
                meaning,
            }],
            tx: Some(tx),
        })
        .await
        .unwrap_or(0)
    }

    /// Erase a batch of leafs by id.
    pub async fn erase_many(&self, ids: Vec<LinkId>) -> usize {
        if self.is_nil() {
            return 0;
        }
        self.call(|tx| NodeMsg::Erase {
            keys: ids.into_iter().map(NodeKey::Id).collect(),
            tx: Some(tx),
        })
        .await
        .unwrap_or(0)
    }

    /// Rename the leaf with the given id; returns how many names changed.
    pub async fn rename(&self, id: LinkId, new: impl Into<String>) -> usize {
        if self.is_nil() {
            return 0;
        }
        self.call(|tx| NodeMsg::Rename {
            key: NodeKey::Id(id),
            new: new.into(),
            tx,
        })
        .await
        .unwrap_or(0)
    }

    /// Rename the leaf at an AnyOrder position.
    pub async fn rename_at(&self, index: usize, new: impl Into<String>) -> usize {
        if self.is_nil() {
            return 0;
        }
        self.call(|tx| NodeMsg::Rename {
            key: NodeKey::Index(index),
            new: new.into(),
            tx,
        })
        .await
        .unwrap_or(0)
    }

    /// Rename every leaf currently carrying `old`.
    pub async fn rename_all(&self, old: impl Into<String>, new: impl Into<String>) -> usize {
        if self.is_nil() {
            return 0;
        }
        self.call(|tx| NodeMsg::Rename {
            key: NodeKey::Str {
                key: old.into(),
                meaning: Key::Name,
            },
            new: new.into(),
            tx,
        })
        .await
        .unwrap_or(0)
    }

    /// Apply a permutation of AnyOrder positions; the container is left
    /// unchanged on failure.
    pub async fn rearrange(&self, order: Vec<usize>) -> Result<()> {
        if self.is_nil() {
            return Err(Error::WrongOrderSize);
        }
        self.call(|tx| NodeMsg::RearrangeIdx { order, tx })
            .await?
            .map_err(Error::from)
    }

    /// Apply a permutation given as link ids.
    pub async fn rearrange_ids(&self, order: Vec<LinkId>) -> Result<()> {
        if self.is_nil() {
            return Err(Error::WrongOrderSize);
        }
        self.call(|tx| NodeMsg::RearrangeIds { order, tx })
            .await?
            .map_err(Error::from)
    }

    /// Execute a transaction against this node through the process queue.
    pub async fn apply(&self, tr: NodeTransaction) -> TrResult {
        if self.is_nil() {
            return Err(Error::TrEmptyTarget.pack());
        }
        match self.call(|tx| NodeMsg::Apply { tr, tx }).await {
            Ok(res) => res,
            Err(e) => Err(e.pack()),
        }
    }

    // -------------------------------------------------------------------------
    // blocking twins for bridges, mappers and transactions
    // -------------------------------------------------------------------------

    /// Blocking form of [`Node::size`].
    pub fn size_blocking(&self) -> usize {
        if self.is_nil() {
            return 0;
        }
        self.call_blocking(NodeMsg::Size).unwrap_or(0)
    }

    /// Blocking form of [`Node::clear`].
    pub fn clear_blocking(&self) -> usize {
        if self.is_nil() {
            return 0;
        }
        self.call_blocking(NodeMsg::Clear).unwrap_or(0)
    }

    /// Blocking form of [`Node::leafs`].
    pub fn leafs_blocking(&self, order: Key) -> Vec<Link> {
        if self.is_nil() {
            return Vec::new();
        }
        self.call_blocking(|tx| NodeMsg::Leafs { order, tx })
            .unwrap_or_default()
    }

    /// Blocking form of [`Node::insert`].
    pub fn insert_blocking(&self, link: Link, policy: InsertPolicy) -> InsertStatus {
        if self.is_nil() {
            return InsertStatus::blocked(None);
        }
        self.call_blocking(|tx| NodeMsg::Insert {
            link,
            index: None,
            policy,
            tx: Some(tx),
        })
        .unwrap_or(InsertStatus {
            index: None,
            inserted: false,
        })
    }

    /// Blocking form of [`Node::erase`].
    pub fn erase_blocking(&self, id: LinkId) -> usize {
        if self.is_nil() {
            return 0;
        }
        self.call_blocking(|tx| NodeMsg::Erase {
            keys: vec![NodeKey::Id(id)],
            tx: Some(tx),
        })
        .unwrap_or(0)
    }

    // -------------------------------------------------------------------------
    // events and cloning
    // -------------------------------------------------------------------------

    /// Subscribe a callback to this node's home group (sees own and subtree
    /// acks). Returns the handler id.
    pub fn subscribe(&self, mask: Event, cb: EventCallback) -> u64 {
        spawn_queued_listener(&self.imp().home, mask, cb)
    }

    /// Drop the subscriber with the given handler id.
    pub fn unsubscribe(&self, handler_id: u64) {
        self.imp().home.remove_sub(handler_id);
    }

    /// Deep copy of this node: every leaf cloned with a fresh id, subtrees
    /// cloned recursively, no subscribers carried over.
    pub fn clone_subtree(&self) -> Node {
        let fresh = Node::new();
        for leaf in self.imp().leafs_snapshot() {
            if let Ok(twin) = leaf.clone_link_sync(true) {
                twin.imp().set_owner(Arc::downgrade(&fresh.eng));
                if let Some(child) = twin.imp().quick_node() {
                    child.imp().set_handle_if_empty(&twin);
                }
                fresh.imp().leafs.write().insert(twin, None);
            }
        }
        fresh
    }
}

impl Default for Node {
    fn default() -> Self {
        Node::new()
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.eng.imp, &other.eng.imp)
    }
}

impl Eq for Node {}

impl std::hash::Hash for Node {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.eng.imp) as usize).hash(state);
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.imp().id)
            .finish_non_exhaustive()
    }
}
