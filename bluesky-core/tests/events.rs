//! Event fabric: ack ordering, deep erase acks, subscription lifecycle.

mod common;

use bluesky_core::{Event, InsertPolicy, Link, LinkId, Node, Object, TreeEvent};
use common::person;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

fn recorder() -> (Arc<Mutex<Vec<TreeEvent>>>, bluesky_core::EventCallback) {
    let seen: Arc<Mutex<Vec<TreeEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let cb: bluesky_core::EventCallback = Arc::new(move |ev| sink.lock().push(ev));
    (seen, cb)
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(300)).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn insert_erase_ack_order() {
    let node = Node::new();
    let (seen, cb) = recorder();
    node.subscribe(Event::LINK_INSERTED | Event::LINK_ERASED, cb);

    let mut expected = Vec::new();
    for i in 0..3 {
        let l = Link::hard(format!("e{i}"), person(&format!("e{i}"), i));
        expected.push((Event::LINK_INSERTED, l.id()));
        node.insert(l, InsertPolicy::default()).await;
    }
    let victim = node.find_at(1).await.id();
    node.erase(victim).await;
    expected.push((Event::LINK_ERASED, victim));

    settle().await;
    let seen = seen.lock();
    let got: Vec<(Event, LinkId)> = seen
        .iter()
        .map(|ev| {
            let lid = ev
                .params
                .get_id("lid")
                .or_else(|| ev.params.get_ids("lids").and_then(|l| l.first().copied()))
                .unwrap();
            (ev.code, lid)
        })
        .collect();
    assert_eq!(got, expected);
}

#[tokio::test(flavor = "multi_thread")]
async fn deep_erase_reports_subtree_ids() {
    let root = Node::new();
    let sub = Node::new();

    let a = Link::hard("A", person("A", 1));
    let b = Link::hard("B", person("B", 2));
    let (a_id, b_id) = (a.id(), b.id());
    sub.insert(a, InsertPolicy::default()).await;
    sub.insert(b, InsertPolicy::default()).await;

    let l = Link::hard("L", Object::from_node(sub));
    let l_id = l.id();
    root.insert(l, InsertPolicy::default()).await;

    let (seen, cb) = recorder();
    root.subscribe(Event::LINK_ERASED, cb);

    assert_eq!(root.erase(l_id).await, 1);
    settle().await;

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    let lids = seen[0].params.get_ids("lids").unwrap();
    // Depth-first: the erased link first, then its subtree.
    assert_eq!(lids, &[l_id, a_id, b_id][..]);
}

#[tokio::test(flavor = "multi_thread")]
async fn subtree_acks_climb_to_ancestors() {
    let root = Node::new();
    let sub = Node::new();
    root.insert(
        Link::hard("folder", Object::from_node(sub.clone())),
        InsertPolicy::default(),
    )
    .await;

    let (seen, cb) = recorder();
    root.subscribe(Event::LINK_INSERTED, cb);

    sub.insert(Link::hard("kid", person("kid", 5)), InsertPolicy::default())
        .await;
    settle().await;

    assert_eq!(seen.lock().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn rename_ack_params() {
    let node = Node::new();
    let l = Link::hard("before", person("p", 1));
    let id = l.id();
    node.insert(l, InsertPolicy::default()).await;

    let (seen, cb) = recorder();
    node.subscribe(Event::LINK_RENAMED, cb);

    node.rename(id, "after").await;
    settle().await;

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].params.get_str("new_name"), Some("after"));
    assert_eq!(seen[0].params.get_str("prev_name"), Some("before"));
}

#[tokio::test(flavor = "multi_thread")]
async fn unsubscribe_stops_delivery() {
    let node = Node::new();
    let (seen, cb) = recorder();
    let sub_id = node.subscribe(Event::ALL, cb);

    node.insert(Link::hard("x", person("x", 1)), InsertPolicy::default())
        .await;
    settle().await;
    let after_first = seen.lock().len();
    assert!(after_first >= 1);

    node.unsubscribe(sub_id);
    node.insert(Link::hard("y", person("y", 2)), InsertPolicy::default())
        .await;
    settle().await;
    assert_eq!(seen.lock().len(), after_first);
}

#[tokio::test(flavor = "multi_thread")]
async fn mask_filters_codes() {
    let node = Node::new();
    let (seen, cb) = recorder();
    node.subscribe(Event::LINK_RENAMED, cb);

    let l = Link::hard("only-insert", person("x", 1));
    let id = l.id();
    node.insert(l, InsertPolicy::default()).await;
    node.erase(id).await;
    settle().await;

    assert!(seen.lock().is_empty());
}
