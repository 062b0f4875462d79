//! Node actor: message vocabulary and handlers.
//!
//! Mutations run serially in the actor and publish acks to the node's home
//! group (retransmitted up the handle chain by the emitter). O(n) scans over
//! the extra indices (OID, OType) and deep searches are delegated to
//! detached search tasks over an AnyOrder snapshot, so the node actor is
//! never blocked by them.

use crate::error::{Error, ErrorBox};
use crate::kernel;
use crate::property::Propdict;
use crate::transaction::{NodeTransaction, TrResult};
use crate::tree::event::Event;
use crate::tree::link::base::emit_ack;
use crate::tree::link::Link;
use crate::tree::node::base::{collect_subtree_ids, InsertStatus, NodeImpl};
use crate::tree::node::{Node, NodeEngine};
use crate::tree::{InsertPolicy, Key};
use crate::types::LinkId;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;

/// Lookup key forms accepted by find/index/erase/rename.
pub(crate) enum NodeKey {
    Id(LinkId),
    Index(usize),
    Str { key: String, meaning: Key },
}

/// Typed message vocabulary of a node actor.
pub(crate) enum NodeMsg {
    Size(oneshot::Sender<usize>),
    Clear(oneshot::Sender<usize>),
    Leafs {
        order: Key,
        tx: oneshot::Sender<Vec<Link>>,
    },
    Keys {
        order: Key,
        tx: oneshot::Sender<Vec<LinkId>>,
    },
    IKeys {
        order: Key,
        tx: oneshot::Sender<Vec<usize>>,
    },
    SKeys {
        meaning: Key,
        order: Key,
        tx: oneshot::Sender<Vec<String>>,
    },
    Find {
        key: NodeKey,
        tx: oneshot::Sender<Link>,
    },
    Index {
        key: NodeKey,
        tx: oneshot::Sender<Option<usize>>,
    },
    EqualRange {
        key: String,
        meaning: Key,
        tx: oneshot::Sender<Vec<Link>>,
    },
    DeepSearch {
        key: NodeKey,
        tx: oneshot::Sender<Link>,
    },
    DeepEqualRange {
        key: String,
        meaning: Key,
        tx: oneshot::Sender<Vec<Link>>,
    },
    Insert {
        link: Link,
        index: Option<usize>,
        policy: InsertPolicy,
        tx: Option<oneshot::Sender<InsertStatus>>,
    },
    InsertMany {
        links: Vec<Link>,
        policy: InsertPolicy,
        tx: oneshot::Sender<usize>,
    },
    Erase {
        keys: Vec<NodeKey>,
        tx: Option<oneshot::Sender<usize>>,
    },
    Rename {
        key: NodeKey,
        new: String,
        tx: oneshot::Sender<usize>,
    },
    RearrangeIdx {
        order: Vec<usize>,
        tx: oneshot::Sender<Result<(), ErrorBox>>,
    },
    RearrangeIds {
        order: Vec<LinkId>,
        tx: oneshot::Sender<Result<(), ErrorBox>>,
    },
    Apply {
        tr: NodeTransaction,
        tx: oneshot::Sender<TrResult>,
    },
    Bye,
}

/// Spawn the actor task for a node engine; returns its mailbox.
pub(crate) fn spawn(imp: Arc<NodeImpl>, eng: Weak<NodeEngine>) -> UnboundedSender<NodeMsg> {
    let (tx, rx) = unbounded_channel();
    kernel::spawn(run(imp, eng, rx));
    tx
}

fn this_node(eng: &Weak<NodeEngine>) -> Option<Node> {
    eng.upgrade().map(Node::from_engine)
}

async fn run(imp: Arc<NodeImpl>, eng: Weak<NodeEngine>, mut rx: UnboundedReceiver<NodeMsg>) {
    while let Some(msg) = rx.recv().await {
        match msg {
            NodeMsg::Size(tx) => {
                let _ = tx.send(imp.size());
            }
            NodeMsg::Clear(tx) => {
                let count = handle_clear(&imp);
                let _ = tx.send(count);
            }
            NodeMsg::Leafs { order, tx } => {
                let _ = tx.send(imp.ordered_snapshot(order));
            }
            NodeMsg::Keys { order, tx } => {
                let _ = tx.send(imp.ordered_snapshot(order).iter().map(Link::id).collect());
            }
            NodeMsg::IKeys { order, tx } => {
                let ordered = imp.ordered_snapshot(order);
                let leafs = imp.leafs.read();
                let out: Vec<usize> = ordered
                    .iter()
                    .filter_map(|l| leafs.position(l.id()))
                    .collect();
                drop(leafs);
                let _ = tx.send(out);
            }
            NodeMsg::SKeys { meaning, order, tx } => {
                let out = imp
                    .ordered_snapshot(order)
                    .iter()
                    .map(|l| NodeImpl::skey(l, meaning))
                    .collect();
                let _ = tx.send(out);
            }
            NodeMsg::Find { key, tx } => {
                let scans = matches!(
                    &key,
                    NodeKey::Str {
                        meaning: Key::OID | Key::OType,
                        ..
                    }
                );
                if scans {
                    spawn_scan_find(&imp, key, tx);
                } else {
                    let _ = tx.send(find_builtin(&imp, &key));
                }
            }
            NodeMsg::Index { key, tx } => {
                let found = find_builtin(&imp, &key);
                let idx = if found.is_nil() {
                    None
                } else {
                    imp.leafs.read().position(found.id())
                };
                let _ = tx.send(idx);
            }
            NodeMsg::EqualRange { key, meaning, tx } => {
                spawn_equal_range(&imp, key, meaning, tx);
            }
            NodeMsg::DeepSearch { key, tx } => {
                spawn_deep_search(&imp, key, tx);
            }
            NodeMsg::DeepEqualRange { key, meaning, tx } => {
                spawn_deep_equal_range(&imp, key, meaning, tx);
            }
            NodeMsg::Insert {
                link,
                index,
                policy,
                tx,
            } => {
                let status = handle_insert(&imp, &eng, link, index, policy).await;
                if let Some(tx) = tx {
                    let _ = tx.send(status);
                }
            }
            NodeMsg::InsertMany { links, policy, tx } => {
                let mut count = 0usize;
                for link in links {
                    if handle_insert(&imp, &eng, link, None, policy).await.inserted {
                        count += 1;
                    }
                }
                let _ = tx.send(count);
            }
            NodeMsg::Erase { keys, tx } => {
                let mut count = 0usize;
                for key in keys {
                    count += handle_erase(&imp, key);
                }
                if let Some(tx) = tx {
                    let _ = tx.send(count);
                }
            }
            NodeMsg::Rename { key, new, tx } => {
                let _ = tx.send(handle_rename(&imp, key, new));
            }
            NodeMsg::RearrangeIdx { order, tx } => {
                let _ = tx.send(handle_rearrange_idx(&imp, order).map_err(|e| e.pack()));
            }
            NodeMsg::RearrangeIds { order, tx } => {
                let _ = tx.send(handle_rearrange_ids(&imp, order).map_err(|e| e.pack()));
            }
            NodeMsg::Apply { tr, tx } => {
                let Some(node) = this_node(&eng) else {
                    let _ = tx.send(Err(Error::TrEmptyTarget.pack()));
                    continue;
                };
                kernel::spawn(async move {
                    let res = crate::tree::queue::queue().apply(move || tr(node)).await;
                    let _ = tx.send(res);
                });
            }
            NodeMsg::Bye => break,
        }
    }
}

fn find_builtin(imp: &NodeImpl, key: &NodeKey) -> Link {
    let leafs = imp.leafs.read();
    match key {
        NodeKey::Id(id) => leafs.get(*id),
        NodeKey::Index(i) => leafs.at(*i),
        NodeKey::Str { key, meaning } => match meaning {
            Key::Name => leafs.named(key).first().and_then(|id| leafs.get(*id)),
            Key::ID => LinkId::parse(key).and_then(|id| leafs.get(id)),
            _ => None,
        },
    }
    .unwrap_or_else(Link::nil)
}

fn spawn_scan_find(imp: &Arc<NodeImpl>, key: NodeKey, tx: oneshot::Sender<Link>) {
    let snapshot = imp.leafs_snapshot();
    kernel::spawn(async move {
        let NodeKey::Str { key, meaning } = key else {
            let _ = tx.send(Link::nil());
            return;
        };
        let found = snapshot
            .into_iter()
            .find(|l| NodeImpl::skey(l, meaning) == key)
            .unwrap_or_else(Link::nil);
        let _ = tx.send(found);
    });
}

fn spawn_equal_range(
    imp: &Arc<NodeImpl>,
    key: String,
    meaning: Key,
    tx: oneshot::Sender<Vec<Link>>,
) {
    let snapshot = imp.leafs_snapshot();
    kernel::spawn(async move {
        let out = snapshot
            .into_iter()
            .filter(|l| NodeImpl::skey(l, meaning) == key)
            .collect();
        let _ = tx.send(out);
    });
}

fn deep_walk(snapshot: Vec<Link>, mut visit: impl FnMut(&Link) -> bool) {
    let mut stack: Vec<Link> = snapshot.into_iter().rev().collect();
    let mut seen: HashSet<LinkId> = HashSet::new();
    while let Some(link) = stack.pop() {
        if !seen.insert(link.id()) {
            continue;
        }
        if !visit(&link) {
            return;
        }
        if let Some(node) = link.imp().quick_node() {
            for child in node.imp().leafs_snapshot().into_iter().rev() {
                stack.push(child);
            }
        }
    }
}

fn spawn_deep_search(imp: &Arc<NodeImpl>, key: NodeKey, tx: oneshot::Sender<Link>) {
    let snapshot = imp.leafs_snapshot();
    kernel::spawn(async move {
        let mut found = Link::nil();
        deep_walk(snapshot, |link| {
            let hit = match &key {
                NodeKey::Id(id) => link.id() == *id,
                NodeKey::Index(_) => false,
                NodeKey::Str { key, meaning } => NodeImpl::skey(link, *meaning) == *key,
            };
            if hit {
                found = link.clone();
                false
            } else {
                true
            }
        });
        let _ = tx.send(found);
    });
}

fn spawn_deep_equal_range(
    imp: &Arc<NodeImpl>,
    key: String,
    meaning: Key,
    tx: oneshot::Sender<Vec<Link>>,
) {
    let snapshot = imp.leafs_snapshot();
    kernel::spawn(async move {
        let mut out = Vec::new();
        deep_walk(snapshot, |link| {
            if NodeImpl::skey(link, meaning) == key {
                out.push(link.clone());
            }
            true
        });
        let _ = tx.send(out);
    });
}

enum InsertOutcome {
    Done(InsertStatus),
    NeedMerge { existing: Link, incoming: Link },
}

async fn handle_insert(
    imp: &Arc<NodeImpl>,
    eng: &Weak<NodeEngine>,
    link: Link,
    index: Option<usize>,
    policy: InsertPolicy,
) -> InsertStatus {
    let outcome = try_insert(imp, eng, link, index, policy);
    match outcome {
        InsertOutcome::Done(status) => status,
        InsertOutcome::NeedMerge { existing, incoming } => {
            let status = InsertStatus::blocked(imp.leafs.read().position(existing.id()));
            let (Some(dst), Some(src)) = (
                existing.imp().quick_node(),
                incoming.imp().quick_node(),
            ) else {
                return status;
            };
            let this = this_node(eng);
            if this.as_ref() == Some(&dst) || this.as_ref() == Some(&src) {
                // Merging a node into itself would wait on our own mailbox.
                return status;
            }
            // Depth-first merge of the incoming subtree into the existing
            // one, preserving the insertion policy.
            for leaf in src.imp().leafs_snapshot() {
                src.erase(leaf.id()).await;
                dst.insert_with(leaf, None, policy).await;
            }
            status
        }
    }
}

fn try_insert(
    imp: &Arc<NodeImpl>,
    eng: &Weak<NodeEngine>,
    link: Link,
    index: Option<usize>,
    policy: InsertPolicy,
) -> InsertOutcome {
    use InsertOutcome::*;

    if link.is_nil() {
        return Done(InsertStatus::blocked(None));
    }
    let this = this_node(eng);
    if let Some(owner) = link.owner() {
        // Single-owner rule: a link lives in at most one node.
        if this.as_ref() == Some(&owner) {
            let pos = imp.leafs.read().position(link.id());
            return Done(InsertStatus::blocked(pos));
        }
        tracing::warn!(lid = %link.id(), "insert refused: link is owned by another node");
        return Done(InsertStatus::blocked(None));
    }

    let pos;
    {
        let mut leafs = imp.leafs.write();
        if let Some(existing) = leafs.position(link.id()) {
            return Done(InsertStatus::blocked(Some(existing)));
        }
        let name = link.imp().name.read().clone();
        let dup_ids = leafs.named(&name);
        if let Some(first_dup) = dup_ids.first() {
            if policy.contains(InsertPolicy::MERGE) {
                let existing = leafs.get(*first_dup).unwrap_or_else(Link::nil);
                if existing.imp().quick_node().is_some() && link.imp().quick_node().is_some() {
                    return NeedMerge {
                        existing,
                        incoming: link,
                    };
                }
            }
            if policy.contains(InsertPolicy::DENY_DUP_NAMES) {
                return Done(InsertStatus::blocked(leafs.position(*first_dup)));
            }
            if policy.contains(InsertPolicy::RENAME_DUP) {
                let fresh = leafs.dedup_name(&name);
                link.imp().set_name(fresh);
            }
        }
        if let Some(eng) = eng.upgrade() {
            link.imp().set_owner(Arc::downgrade(&eng));
        }
        if let Some(child_node) = link.imp().quick_node() {
            child_node.imp().set_handle_if_empty(&link);
        }
        pos = leafs.insert(link.clone(), index);
    }

    let mut params = Propdict::new();
    params.set("lid", link.id());
    params.set("pos", pos as i64);
    emit_ack(&link, Event::LINK_INSERTED, params);
    Done(InsertStatus::done(pos))
}

fn handle_erase(imp: &Arc<NodeImpl>, key: NodeKey) -> usize {
    // Non-unique keys erase every match.
    let victims: Vec<Link> = {
        let leafs = imp.leafs.read();
        match &key {
            NodeKey::Id(id) => leafs.get(*id).into_iter().collect(),
            NodeKey::Index(i) => leafs.at(*i).into_iter().collect(),
            NodeKey::Str { key, meaning } => match meaning {
                Key::Name => leafs
                    .named(key)
                    .iter()
                    .filter_map(|id| leafs.get(*id))
                    .collect(),
                Key::ID => LinkId::parse(key)
                    .and_then(|id| leafs.get(id))
                    .into_iter()
                    .collect(),
                Key::OID | Key::OType => leafs
                    .order
                    .iter()
                    .filter(|l| NodeImpl::skey(l, *meaning) == *key)
                    .cloned()
                    .collect(),
                Key::AnyOrder => Vec::new(),
            },
        }
    };

    let mut count = 0usize;
    for link in victims {
        // Collect the erased subtree eagerly so subscribers can purge
        // cached paths.
        let (lids, oids) = collect_subtree_ids(&link);
        if imp.leafs.write().remove(link.id()).is_none() {
            continue;
        }
        link.imp().set_owner(Weak::new());
        count += 1;

        let mut params = Propdict::new();
        params.set("lids", lids);
        params.set("oids", oids);
        // The erased link's owner is already cleared, so the ack names the
        // erasing node explicitly.
        params.set("node", imp.id);
        // The link is already detached, so the ack is posted to the node's
        // own group and climbs from there.
        let ev = crate::tree::event::TreeEvent::new(Event::LINK_ERASED, link.clone(), params);
        imp.home.deliver(&ev);
        climb_from(imp.as_ref(), &ev);
    }
    count
}

/// Retransmit an ack from this node up the handle chain.
fn climb_from(imp: &NodeImpl, ev: &crate::tree::event::TreeEvent) {
    let mut handle = imp.handle();
    let mut guard = 0usize;
    while let Some(link) = handle {
        link.imp().home.deliver(ev);
        handle = match link.owner() {
            Some(owner) => {
                owner.imp().home.deliver(ev);
                owner.imp().handle()
            }
            None => break,
        };
        guard += 1;
        if guard > 256 {
            break;
        }
    }
}

fn handle_clear(imp: &Arc<NodeImpl>) -> usize {
    let ids: Vec<LinkId> = imp.leafs.read().order.iter().map(Link::id).collect();
    let mut count = 0usize;
    for id in ids {
        count += handle_erase(imp, NodeKey::Id(id));
    }
    count
}

fn handle_rename(imp: &Arc<NodeImpl>, key: NodeKey, new: String) -> usize {
    let targets: Vec<Link> = {
        let leafs = imp.leafs.read();
        match &key {
            NodeKey::Id(id) => leafs.get(*id).into_iter().collect(),
            NodeKey::Index(i) => leafs.at(*i).into_iter().collect(),
            NodeKey::Str { key, meaning } => match meaning {
                Key::Name => leafs
                    .named(key)
                    .iter()
                    .filter_map(|id| leafs.get(*id))
                    .collect(),
                _ => Vec::new(),
            },
        }
    };

    let mut count = 0usize;
    for link in targets {
        let prev = link.imp().set_name(new.clone());
        if prev == new {
            continue;
        }
        imp.reindex_name(link.id(), &prev, &new);
        count += 1;
        let mut params = Propdict::new();
        params.set("new_name", new.clone()).set("prev_name", prev);
        emit_ack(&link, Event::LINK_RENAMED, params);
    }
    count
}

fn handle_rearrange_idx(imp: &Arc<NodeImpl>, order: Vec<usize>) -> Result<(), Error> {
    let mut leafs = imp.leafs.write();
    if order.len() != leafs.len() {
        return Err(Error::WrongOrderSize);
    }
    let seen: HashSet<usize> = order.iter().copied().collect();
    if seen.len() != order.len() || order.iter().any(|i| *i >= leafs.len()) {
        return Err(Error::KeyMismatch);
    }
    let old = leafs.order.clone();
    leafs.order = order.into_iter().map(|i| old[i].clone()).collect();
    Ok(())
}

fn handle_rearrange_ids(imp: &Arc<NodeImpl>, order: Vec<LinkId>) -> Result<(), Error> {
    let mut leafs = imp.leafs.write();
    if order.len() != leafs.len() {
        return Err(Error::WrongOrderSize);
    }
    let mut fresh = Vec::with_capacity(order.len());
    for id in &order {
        match leafs.get(*id) {
            Some(link) => fresh.push(link),
            None => return Err(Error::KeyMismatch),
        }
    }
    let distinct: HashSet<LinkId> = order.into_iter().collect();
    if distinct.len() != fresh.len() {
        return Err(Error::KeyMismatch);
    }
    leafs.order = fresh;
    Ok(())
}
