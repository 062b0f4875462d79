//! Node impl: the ordered multi-index container of links.
//!
//! AnyOrder (a vector of handles), ID and Name indices are builtin and kept
//! live on every mutation; OID and OType queries scan AnyOrder on demand.
//! Rearrange permutes the vector only — the other indices reference links by
//! handle, not by position.

use crate::tree::group::Group;
use crate::tree::link::{Link, LinkEngine};
use crate::tree::Key;
use crate::types::LinkId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Weak;

/// Outcome of a single-link insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertStatus {
    /// Position of the inserted link, or of the existing one that blocked
    /// the insertion.
    pub index: Option<usize>,
    /// Whether a new link entered the node.
    pub inserted: bool,
}

impl InsertStatus {
    pub(crate) fn blocked(index: Option<usize>) -> Self {
        Self {
            index,
            inserted: false,
        }
    }

    pub(crate) fn done(index: usize) -> Self {
        Self {
            index: Some(index),
            inserted: true,
        }
    }
}

/// The three builtin indices.
pub(crate) struct Leafs {
    pub order: Vec<Link>,
    pub by_id: HashMap<LinkId, Link>,
    pub by_name: HashMap<String, Vec<LinkId>>,
}

impl Leafs {
    fn new() -> Self {
        Self {
            order: Vec::new(),
            by_id: HashMap::new(),
            by_name: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn position(&self, id: LinkId) -> Option<usize> {
        self.order.iter().position(|l| l.id() == id)
    }

    pub fn get(&self, id: LinkId) -> Option<Link> {
        self.by_id.get(&id).cloned()
    }

    pub fn at(&self, index: usize) -> Option<Link> {
        self.order.get(index).cloned()
    }

    /// Ids registered under a name, in AnyOrder.
    pub fn named(&self, name: &str) -> Vec<LinkId> {
        let Some(ids) = self.by_name.get(name) else {
            return Vec::new();
        };
        let mut out: Vec<LinkId> = ids.clone();
        out.sort_by_key(|id| self.position(*id));
        out
    }

    pub fn insert(&mut self, link: Link, index: Option<usize>) -> usize {
        let id = link.id();
        let name = link.imp().name.read().clone();
        let pos = index.unwrap_or(self.order.len()).min(self.order.len());
        self.order.insert(pos, link.clone());
        self.by_id.insert(id, link);
        self.by_name.entry(name).or_default().push(id);
        pos
    }

    pub fn remove(&mut self, id: LinkId) -> Option<Link> {
        let link = self.by_id.remove(&id)?;
        if let Some(pos) = self.position(id) {
            self.order.remove(pos);
        }
        let name = link.imp().name.read().clone();
        if let Some(ids) = self.by_name.get_mut(&name) {
            ids.retain(|x| *x != id);
            if ids.is_empty() {
                self.by_name.remove(&name);
            }
        }
        Some(link)
    }

    /// Keep the name index in sync after a link rename.
    pub fn reindex_name(&mut self, id: LinkId, old: &str, new: &str) {
        if let Some(ids) = self.by_name.get_mut(old) {
            ids.retain(|x| *x != id);
            if ids.is_empty() {
                self.by_name.remove(old);
            }
        }
        if self.by_id.contains_key(&id) {
            self.by_name.entry(new.to_owned()).or_default().push(id);
        }
    }

    /// Smallest free `base_N` name for the RenameDup policy.
    pub fn dedup_name(&self, base: &str) -> String {
        let mut n = 1usize;
        loop {
            let candidate = format!("{base}_{n}");
            if !self.by_name.contains_key(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }
}

/// Mutable interior of a node engine.
pub(crate) struct NodeImpl {
    pub id: LinkId,
    pub nil: bool,
    pub home: Group,
    /// The single link containing this node (at most one).
    pub handle: RwLock<Weak<LinkEngine>>,
    pub leafs: RwLock<Leafs>,
}

impl NodeImpl {
    pub fn new() -> Self {
        let id = LinkId::new();
        Self {
            id,
            nil: false,
            home: Group::new(id.to_string()),
            handle: RwLock::new(Weak::new()),
            leafs: RwLock::new(Leafs::new()),
        }
    }

    pub fn nil_impl() -> Self {
        Self {
            id: LinkId::nil(),
            nil: true,
            home: Group::new("nil".into()),
            handle: RwLock::new(Weak::new()),
            leafs: RwLock::new(Leafs::new()),
        }
    }

    /// The link containing this node, if alive.
    pub fn handle(&self) -> Option<Link> {
        self.handle.read().upgrade().map(|eng| Link { eng })
    }

    /// Adopt a containing link unless one is already set (I3).
    pub fn set_handle_if_empty(&self, link: &Link) {
        let mut h = self.handle.write();
        if h.upgrade().is_none() {
            *h = std::sync::Arc::downgrade(&link.eng);
        }
    }

    /// Force the containing link (archive load path).
    pub fn set_handle(&self, link: &Link) {
        *self.handle.write() = std::sync::Arc::downgrade(&link.eng);
    }

    pub fn size(&self) -> usize {
        self.leafs.read().len()
    }

    /// Current AnyOrder snapshot.
    pub fn leafs_snapshot(&self) -> Vec<Link> {
        self.leafs.read().order.clone()
    }

    pub fn reindex_name(&self, id: LinkId, old: &str, new: &str) {
        self.leafs.write().reindex_name(id, old, new);
    }

    /// String key of a link under the given meaning.
    pub fn skey(link: &Link, meaning: Key) -> String {
        match meaning {
            Key::Name => link.imp().name.read().clone(),
            Key::OID => link.imp().quick_oid(),
            Key::OType => link.imp().quick_otid(),
            Key::ID => link.id().to_string(),
            Key::AnyOrder => String::new(),
        }
    }

    /// Snapshot ordered by the given index.
    pub fn ordered_snapshot(&self, order: Key) -> Vec<Link> {
        let mut out = self.leafs_snapshot();
        match order {
            Key::AnyOrder => {}
            Key::ID => out.sort_by_key(|l| l.id()),
            Key::Name | Key::OID | Key::OType => {
                out.sort_by_key(|l| Self::skey(l, order));
            }
        }
        out
    }
}

/// Ids of a link and its whole subtree, depth-first, using only quick node
/// resolution (no jobs are triggered). Paired with pointee object ids.
pub(crate) fn collect_subtree_ids(link: &Link) -> (Vec<LinkId>, Vec<String>) {
    let mut lids = Vec::new();
    let mut oids = Vec::new();
    fn walk(link: &Link, lids: &mut Vec<LinkId>, oids: &mut Vec<String>) {
        lids.push(link.id());
        oids.push(link.imp().quick_oid());
        if let Some(node) = link.imp().quick_node() {
            for child in node.imp().leafs_snapshot() {
                walk(&child, lids, oids);
            }
        }
    }
    walk(link, &mut lids, &mut oids);
    (lids, oids)
}
