//! Map link behavior: initial refresh, event-driven re-evaluation.

mod common;

use bluesky_core::{
    Event, Flags, InsertPolicy, Link, Mapper, Node, NodeMapper, Object, TreeOpts,
};
use common::person;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread")]
async fn refresh_and_event_driven_updates() {
    let input = Node::new();
    let observed: Arc<Mutex<Vec<Event>>> = Arc::new(Mutex::new(Vec::new()));

    let sink = observed.clone();
    let mapper: NodeMapper = Arc::new(move |_src: Node, dst: Node, ev| {
        sink.lock().push(ev.code);
        std::thread::sleep(Duration::from_millis(100));
        dst.insert_blocking(
            Link::hard("t", person("t", 0)),
            InsertPolicy::ALLOW_DUP_NAMES,
        );
    });

    let map = Link::map_link(
        Mapper::Node(mapper),
        "mtest",
        input.clone(),
        None,
        Event::ALL,
        TreeOpts::NORMAL,
        Flags::PLAIN,
    );

    // Initial refresh runs the mapper once with a Nil event.
    let output = map.data_node().await.unwrap();
    assert_eq!(output.size().await, 1);

    for _ in 0..10 {
        input
            .insert(
                Link::hard("N", Object::from_node(Node::new())),
                InsertPolicy::ALLOW_DUP_NAMES,
            )
            .await;
    }

    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(output.size().await, 11);
    let observed = observed.lock();
    assert_eq!(
        observed.iter().filter(|c| **c == Event::NIL).count(),
        1,
        "exactly one initial refresh"
    );
    assert_eq!(
        observed
            .iter()
            .filter(|c| **c == Event::LINK_INSERTED)
            .count(),
        10,
        "one mapper run per insert"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn link_mapper_tracks_sources() {
    let input = Node::new();
    let mapper = Mapper::Link(Arc::new(|src: Link, _dst: Node, _ev| {
        let twin = Link::hard(format!("out_{}", src.bare().name()), person("m", 1));
        Some(twin)
    }));
    let map = Link::map_link(
        mapper,
        "lmap",
        input.clone(),
        None,
        Event::ALL,
        TreeOpts::NORMAL,
        Flags::PLAIN,
    );

    input
        .insert(Link::hard("a", person("a", 1)), InsertPolicy::default())
        .await;
    input
        .insert(Link::hard("b", person("b", 2)), InsertPolicy::default())
        .await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    let output = map.data_node().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    let mut names: Vec<String> = output
        .skeys(bluesky_core::Key::Name, bluesky_core::Key::AnyOrder)
        .await;
    names.sort();
    names.dedup();
    assert_eq!(names, vec!["out_a".to_owned(), "out_b".to_owned()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn lazy_map_defers_to_next_request() {
    let input = Node::new();
    let runs: Arc<Mutex<usize>> = Arc::new(Mutex::new(0));
    let counter = runs.clone();
    let mapper: NodeMapper = Arc::new(move |_src, dst: Node, _ev| {
        *counter.lock() += 1;
        dst.insert_blocking(
            Link::hard("t", person("t", 0)),
            InsertPolicy::ALLOW_DUP_NAMES,
        );
    });
    let map = Link::map_link(
        Mapper::Node(mapper),
        "lazy",
        input.clone(),
        None,
        Event::ALL,
        TreeOpts::LAZY,
        Flags::PLAIN,
    );

    map.data_node().await.unwrap();
    assert_eq!(*runs.lock(), 1);

    // Events only mark the view dirty; nothing runs until the next request.
    input
        .insert(Link::hard("N", person("n", 1)), InsertPolicy::default())
        .await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(*runs.lock(), 1);

    map.data_node().await.unwrap();
    assert_eq!(*runs.lock(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn otid_filter_mirrors_matching_children() {
    let src = Node::new();
    src.insert(Link::hard("p1", person("p1", 1)), InsertPolicy::default())
        .await;
    src.insert(
        Link::hard("folder", Object::from_node(Node::new())),
        InsertPolicy::default(),
    )
    .await;

    let filter = bluesky_core::make_otid_filter(
        ["bs_person".to_owned()],
        "only-persons",
        src.clone(),
        None,
        Event::ALL,
        TreeOpts::NORMAL,
        Flags::PLAIN,
    );
    let output = filter.data_node().await.unwrap();
    assert_eq!(output.size().await, 1);
    assert_eq!(output.find_at(0).await.bare().name(), "p1");

    src.insert(Link::hard("p2", person("p2", 2)), InsertPolicy::default())
        .await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(output.size().await, 2);
}
