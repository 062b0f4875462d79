//! Node container behavior: indices, insertion policies, rename, rearrange,
//! request status resets.

mod common;

use bluesky_core::{
    Flags, InsertPolicy, Key, Link, Node, Object, Req, ReqStatus,
};
use common::person;

#[tokio::test(flavor = "multi_thread")]
async fn size_tracks_all_indices() {
    let node = Node::new();
    let mut ids = Vec::new();
    for i in 0..5 {
        let l = Link::hard(format!("p{i}"), person(&format!("p{i}"), i));
        ids.push(l.id());
        assert!(node.insert(l, InsertPolicy::default()).await.inserted);
    }
    assert_eq!(node.size().await, 5);
    assert_eq!(node.keys(Key::ID).await.len(), 5);
    assert_eq!(node.keys(Key::AnyOrder).await.len(), 5);

    assert_eq!(node.erase(ids[1]).await, 1);
    assert_eq!(node.erase(ids[3]).await, 1);
    assert_eq!(node.size().await, 3);
    assert_eq!(node.keys(Key::ID).await.len(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn find_until_erased() {
    let node = Node::new();
    let l = Link::hard("target", person("target", 1));
    let id = l.id();
    node.insert(l.clone(), InsertPolicy::default()).await;

    assert_eq!(node.find(id).await, l);
    assert!(node.erase(id).await >= 1);
    assert!(node.find(id).await.is_nil());
}

#[tokio::test(flavor = "multi_thread")]
async fn insertion_policies() {
    let node = Node::new();
    let l1 = Link::hard("a", person("one", 1));
    let first = node.insert(l1.clone(), InsertPolicy::default()).await;
    assert!(first.inserted);

    // Same name denied: points at the existing entry.
    let denied = node
        .insert(
            Link::hard("a", person("two", 2)),
            InsertPolicy::DENY_DUP_NAMES,
        )
        .await;
    assert_eq!(denied.index, Some(0));
    assert!(!denied.inserted);

    // RenameDup appends a numeric suffix.
    let renamed = node
        .insert(Link::hard("a", person("three", 3)), InsertPolicy::RENAME_DUP)
        .await;
    assert!(renamed.inserted);
    let l3 = node.find_at(renamed.index.unwrap()).await;
    assert_eq!(l3.name().await, "a_1");

    // AllowDupNames inserts a second "a".
    let dup = node
        .insert(
            Link::hard("a", person("four", 4)),
            InsertPolicy::ALLOW_DUP_NAMES,
        )
        .await;
    assert!(dup.inserted);
    assert_eq!(node.equal_range("a", Key::Name).await.len(), 2);
    assert_eq!(node.size().await, 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn same_id_insert_is_rejected() {
    let node = Node::new();
    let l = Link::hard("x", person("x", 1));
    assert!(node.insert(l.clone(), InsertPolicy::default()).await.inserted);
    let again = node.insert(l, InsertPolicy::default()).await;
    assert!(!again.inserted);
    assert_eq!(again.index, Some(0));
    assert_eq!(node.size().await, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn owned_link_is_refused_elsewhere() {
    let a = Node::new();
    let b = Node::new();
    let l = Link::hard("x", person("x", 1));
    assert!(a.insert(l.clone(), InsertPolicy::default()).await.inserted);
    assert!(!b.insert(l.clone(), InsertPolicy::default()).await.inserted);
    assert_eq!(l.owner(), Some(a));
}

#[tokio::test(flavor = "multi_thread")]
async fn rename_is_idempotent() {
    let node = Node::new();
    let l = Link::hard("old", person("p", 1));
    let id = l.id();
    node.insert(l, InsertPolicy::default()).await;

    assert_eq!(node.rename(id, "new").await, 1);
    assert_eq!(node.rename(id, "new").await, 0);
    assert_eq!(node.size().await, 1);
    assert!(!node.find_named("new", Key::Name).await.is_nil());
    assert!(node.find_named("old", Key::Name).await.is_nil());
}

#[tokio::test(flavor = "multi_thread")]
async fn rearrange_round_trip() {
    let node = Node::new();
    for i in 0..4 {
        node.insert(
            Link::hard(format!("n{i}"), person(&format!("n{i}"), i)),
            InsertPolicy::default(),
        )
        .await;
    }
    let original = node.keys(Key::AnyOrder).await;

    let perm = vec![2usize, 0, 3, 1];
    node.rearrange(perm.clone()).await.unwrap();
    assert_ne!(node.keys(Key::AnyOrder).await, original);

    // Invert and restore.
    let mut inverse = vec![0usize; perm.len()];
    for (i, p) in perm.iter().enumerate() {
        inverse[*p] = i;
    }
    node.rearrange(inverse).await.unwrap();
    assert_eq!(node.keys(Key::AnyOrder).await, original);
}

#[tokio::test(flavor = "multi_thread")]
async fn rearrange_rejects_bad_permutations() {
    let node = Node::new();
    for i in 0..3 {
        node.insert(
            Link::hard(format!("n{i}"), person(&format!("n{i}"), i)),
            InsertPolicy::default(),
        )
        .await;
    }
    let before = node.keys(Key::AnyOrder).await;

    assert!(node.rearrange(vec![0, 1]).await.is_err());
    assert!(node.rearrange(vec![0, 1, 1]).await.is_err());
    assert!(node.rearrange(vec![0, 1, 5]).await.is_err());
    assert_eq!(node.keys(Key::AnyOrder).await, before);
}

#[tokio::test(flavor = "multi_thread")]
async fn status_reset_conditions() {
    let l = Link::hard("s", person("s", 1));
    assert_eq!(l.req_status(Req::Data).await, ReqStatus::Void);

    // From Void: reset-if-eq(Void -> OK) fires, a second compare against
    // Void does not.
    let prev = l.rs_reset_if_eq(Req::Data, ReqStatus::Void, ReqStatus::OK).await;
    assert_eq!(prev, ReqStatus::Void);
    let prev = l
        .rs_reset_if_eq(Req::Data, ReqStatus::Void, ReqStatus::Error)
        .await;
    assert_eq!(prev, ReqStatus::OK);
    assert_eq!(l.req_status(Req::Data).await, ReqStatus::OK);

    let prev = l
        .rs_reset_if_neq(Req::Data, ReqStatus::OK, ReqStatus::Error)
        .await;
    assert_eq!(prev, ReqStatus::OK);
    assert_eq!(l.req_status(Req::Data).await, ReqStatus::OK);

    assert_eq!(l.rs_reset(Req::Data, ReqStatus::Void).await, ReqStatus::OK);
    assert_eq!(l.req_status(Req::Data).await, ReqStatus::Void);
}

#[tokio::test(flavor = "multi_thread")]
async fn deep_search_descends() {
    let root = Node::new();
    let sub = Node::new();
    let leaf = Link::hard("leaf", person("deep", 9));
    let leaf_id = leaf.id();
    sub.insert(leaf, InsertPolicy::default()).await;
    root.insert(
        Link::hard("folder", Object::from_node(sub)),
        InsertPolicy::default(),
    )
    .await;

    assert_eq!(root.deep_search(leaf_id).await.id(), leaf_id);
    assert_eq!(
        root.deep_search_named("leaf", Key::Name).await.id(),
        leaf_id
    );
    assert!(root.deep_search_named("ghost", Key::Name).await.is_nil());
}

#[tokio::test(flavor = "multi_thread")]
async fn otype_index_scans() {
    let node = Node::new();
    node.insert(Link::hard("p", person("p", 1)), InsertPolicy::default())
        .await;
    node.insert(
        Link::hard("folder", Object::from_node(Node::new())),
        InsertPolicy::default(),
    )
    .await;

    let persons = node.equal_range("bs_person", Key::OType).await;
    assert_eq!(persons.len(), 1);
    assert_eq!(persons[0].name().await, "p");

    let folders = node.equal_range("objnode", Key::OType).await;
    assert_eq!(folders.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn nil_engines_answer_empty() {
    let l = Link::nil();
    assert!(l.is_nil());
    assert_eq!(l.name().await, "");
    assert!(l.data().await.is_err());
    assert_eq!(l.req_status(Req::Data).await, ReqStatus::Void);
    assert_eq!(l.flags().await, Flags::PLAIN);

    let n = Node::nil();
    assert!(n.is_nil());
    assert_eq!(n.size().await, 0);
    assert!(!n
        .insert(Link::hard("x", person("x", 1)), InsertPolicy::default())
        .await
        .inserted);
}

#[tokio::test(flavor = "multi_thread")]
async fn clone_link_deep_copies_object() {
    let obj = person("orig", 42);
    let l = Link::hard("orig", obj.clone());

    let shallow = l.clone_link(false).await.unwrap();
    assert_ne!(shallow.id(), l.id());
    assert_eq!(shallow.data().await.unwrap(), obj);

    let deep = l.clone_link(true).await.unwrap();
    let deep_obj = deep.data().await.unwrap();
    assert_ne!(deep_obj, obj);
    deep_obj
        .with_payload(|p: &common::Person| assert_eq!(p.name, "orig"))
        .unwrap();
}
