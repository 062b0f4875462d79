//! Fusion links: bridge pulls, status waiters, single job per Busy window.

mod common;

use bluesky_core::{
    FusionBridge, InsertPolicy, Link, Node, Object, Propdict, Req, ReqStatus, Result,
};
use common::{person, Person};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct SlowBridge {
    pulls: AtomicUsize,
}

impl FusionBridge for SlowBridge {
    fn pull_data(&self, root: Object, _root_link: Link, _params: Propdict) -> Result<()> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(500));
        root.with_payload_mut(|p: &mut Person| {
            p.name = "pulled".into();
            p.age = 99;
        })?;
        Ok(())
    }

    fn populate(&self, root: Object, _root_link: Link, _params: Propdict) -> Result<()> {
        let node = root.data_node().ok_or(bluesky_core::Error::NotANode)?;
        node.insert_blocking(
            Link::hard("child", person("child", 1)),
            InsertPolicy::default(),
        );
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn status_waiters_share_one_pull() {
    let bridge = Arc::new(SlowBridge {
        pulls: AtomicUsize::new(0),
    });
    let link = Link::fusion("f", person("", 0), Some(bridge.clone()));

    // Fan out concurrent requests while the bridge sleeps.
    let mut calls = Vec::new();
    for _ in 0..8 {
        let l = link.clone();
        calls.push(tokio::spawn(async move { l.data().await }));
    }
    let mut objs = Vec::new();
    for c in calls {
        objs.push(c.await.unwrap().unwrap());
    }

    // All callers see the same object, the bridge ran once.
    assert!(objs.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(bridge.pulls.load(Ordering::SeqCst), 1);
    assert_eq!(link.req_status(Req::Data).await, ReqStatus::OK);
    objs[0]
        .with_payload(|p: &Person| {
            assert_eq!(p.name, "pulled");
            assert_eq!(p.age, 99);
        })
        .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn populate_fills_child_structure() {
    struct Populator;
    impl FusionBridge for Populator {
        fn pull_data(&self, _root: Object, _l: Link, _p: Propdict) -> Result<()> {
            Ok(())
        }
        fn populate(&self, root: Object, _l: Link, _p: Propdict) -> Result<()> {
            let node = root.data_node().ok_or(bluesky_core::Error::NotANode)?;
            for i in 0..3 {
                node.insert_blocking(
                    Link::hard(format!("gen{i}"), person(&format!("gen{i}"), i)),
                    InsertPolicy::default(),
                );
            }
            Ok(())
        }
    }

    let link = Link::fusion(
        "folder",
        Object::from_node(Node::new()),
        Some(Arc::new(Populator)),
    );
    let node = link.data_node().await.unwrap();
    assert_eq!(node.size().await, 3);

    // Cached afterwards: no second populate needed.
    let again = link.data_node().await.unwrap();
    assert_eq!(again, node);
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_bridge_is_an_error() {
    let link = Link::fusion("nobridge", person("x", 1), None);
    let err = link.data().await.unwrap_err();
    assert_eq!(err, bluesky_core::Error::NoFusionBridge);
}

#[tokio::test(flavor = "multi_thread")]
async fn bridge_is_inherited_from_ancestor() {
    struct CountingBridge(AtomicUsize);
    impl FusionBridge for CountingBridge {
        fn pull_data(&self, _root: Object, _l: Link, _p: Propdict) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn populate(&self, _root: Object, _l: Link, _p: Propdict) -> Result<()> {
            Ok(())
        }
    }

    let bridge = Arc::new(CountingBridge(AtomicUsize::new(0)));
    let folder = Node::new();
    let parent = Link::fusion(
        "parent",
        Object::from_node(folder.clone()),
        Some(bridge.clone()),
    );
    let root = Node::new();
    root.insert(parent, InsertPolicy::default()).await;

    // Child fusion link with no own bridge: the parent's applies.
    let child = Link::fusion("child", person("c", 1), None);
    folder.insert(child.clone(), InsertPolicy::default()).await;

    child.data().await.unwrap();
    assert_eq!(bridge.0.load(Ordering::SeqCst), 1);
}
