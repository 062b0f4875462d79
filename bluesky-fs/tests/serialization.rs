//! Archive round-trips: the persons tree, lazy loads, empty payloads.

mod common;

use bluesky_core::{abspath, Flags, InsertPolicy, Key, Link, Node, Object, Req, ReqStatus};
use bluesky_fs::{load_tree, save_tree, TFSOpts, EMPTY_PAYLOAD_FILE};
use common::{person, register_person, Person};

async fn build_persons_tree() -> (Link, Node) {
    let node = Node::new();
    let mut persons = Vec::new();
    for i in 0..10 {
        let obj = person(&format!("Citizen_{i}"), 20 + i);
        persons.push(obj.clone());
        node.insert(Link::hard(format!("Citizen_{i}"), obj), InsertPolicy::default())
            .await;
    }
    // Extra views over the same people.
    node.insert(
        Link::hard("hard_Citizen_0", persons[0].clone()),
        InsertPolicy::default(),
    )
    .await;
    node.insert(
        Link::weak("weak_Citizen_1", &persons[1]),
        InsertPolicy::default(),
    )
    .await;
    let citizen2 = node.find_named("Citizen_2", Key::Name).await;
    node.insert(
        Link::sym("sym_Citizen_2", abspath(&citizen2, Key::Name)),
        InsertPolicy::default(),
    )
    .await;
    node.insert(Link::sym("sym_dot", "."), InsertPolicy::default())
        .await;

    let root = Link::hard("persons", Object::from_node(node.clone()));
    (root, node)
}

#[tokio::test(flavor = "multi_thread")]
async fn persons_tree_round_trip() {
    register_person();
    let (root, node) = build_persons_tree().await;
    let dir = tempfile::tempdir().unwrap();
    let root_file = dir.path().join("tree_fs").join(".data");

    let errors = save_tree(&root, &root_file, TFSOpts::CLEAR_DIRS).await.unwrap();
    assert!(errors.is_empty(), "save reported: {errors:?}");

    let loaded_root = load_tree(&root_file, TFSOpts::LOAD).await.unwrap();
    assert_eq!(loaded_root.id(), root.id());
    assert_eq!(loaded_root.bare().name(), "persons");

    let loaded = loaded_root.data_node().await.unwrap();
    assert_eq!(loaded.size().await, node.size().await);

    // Structural equality: ids, names, child order.
    assert_eq!(loaded.keys(Key::AnyOrder).await, node.keys(Key::AnyOrder).await);
    assert_eq!(
        loaded.skeys(Key::Name, Key::AnyOrder).await,
        node.skeys(Key::Name, Key::AnyOrder).await
    );

    // The sym link resolves to the loaded Citizen_2.
    let sym = loaded.find_named("sym_Citizen_2", Key::Name).await;
    let via_sym = sym.data().await.unwrap();
    let direct = loaded
        .find_named("Citizen_2", Key::Name)
        .await
        .data()
        .await
        .unwrap();
    assert_eq!(via_sym, direct);
    via_sym
        .with_payload(|p: &Person| assert_eq!(p.name, "Citizen_2"))
        .unwrap();

    // "." resolves against the freshly restored handle chain.
    let sym_dot = loaded.find_named("sym_dot", Key::Name).await;
    assert!(sym_dot.check_alive().await);

    // Shared object: the extra hard link still points at the same object.
    let c0 = loaded
        .find_named("Citizen_0", Key::Name)
        .await
        .data()
        .await
        .unwrap();
    let h0 = loaded
        .find_named("hard_Citizen_0", Key::Name)
        .await
        .data()
        .await
        .unwrap();
    assert_eq!(c0, h0);

    // The weak view observes the restored Citizen_1.
    let w1 = loaded
        .find_named("weak_Citizen_1", Key::Name)
        .await
        .data()
        .await
        .unwrap();
    let c1 = loaded
        .find_named("Citizen_1", Key::Name)
        .await
        .data()
        .await
        .unwrap();
    assert_eq!(w1, c1);
}

#[tokio::test(flavor = "multi_thread")]
async fn payloads_load_lazily() {
    register_person();
    let node = Node::new();
    node.insert(
        Link::hard("lazy_one", person("lazy_one", 77)),
        InsertPolicy::default(),
    )
    .await;
    let root = Link::hard("lazy_root", Object::from_node(node));

    let dir = tempfile::tempdir().unwrap();
    let root_file = dir.path().join(".data");
    let errors = save_tree(&root, &root_file, TFSOpts::NONE).await.unwrap();
    assert!(errors.is_empty());

    let loaded_root = load_tree(&root_file, TFSOpts::LOAD).await.unwrap();
    let loaded = loaded_root.data_node().await.unwrap();
    let link = loaded.find_named("lazy_one", Key::Name).await;

    // Payload not touched yet.
    assert!(link.bare().flags().contains(Flags::LAZY_LOAD));
    assert_eq!(link.bare().req_status(Req::Data), ReqStatus::Void);

    // First access pulls the payload from disk.
    let obj = link.data().await.unwrap();
    obj.with_payload(|p: &Person| {
        assert_eq!(p.name, "lazy_one");
        assert_eq!(p.age, 77);
    })
    .unwrap();
    assert_eq!(link.bare().req_status(Req::Data), ReqStatus::OK);
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_payloads_are_indexed() {
    register_person();
    let node = Node::new();
    // A default person serializes a non-empty body, so craft an object
    // whose body is genuinely empty.
    #[derive(Default)]
    struct Hollow;
    impl bluesky_core::Payload for Hollow {
        fn type_id(&self) -> &'static str {
            "bs_hollow"
        }
        fn clone_payload(&self) -> Box<dyn bluesky_core::Payload> {
            Box::new(Hollow)
        }
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    }
    let _ = bluesky_core::factory().register::<Hollow>("bs_hollow");
    node.insert(
        Link::hard("hollow", Object::from_payload(Hollow)),
        InsertPolicy::default(),
    )
    .await;
    let root = Link::hard("hollow_root", Object::from_node(node));

    let dir = tempfile::tempdir().unwrap();
    let root_file = dir.path().join(".data");
    let errors = save_tree(&root, &root_file, TFSOpts::NONE).await.unwrap();
    assert!(errors.is_empty());

    let index = dir.path().join(EMPTY_PAYLOAD_FILE);
    assert!(index.exists());
    assert_eq!(std::fs::metadata(&index).unwrap().len(), 16);

    // Loading an empty payload is a no-op, not a missing-file error.
    let loaded_root = load_tree(&root_file, TFSOpts::LOAD).await.unwrap();
    let loaded = loaded_root.data_node().await.unwrap();
    let hollow = loaded.find_named("hollow", Key::Name).await;
    assert!(hollow.data().await.is_ok());
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_archive_is_path_not_exists() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_tree(dir.path().join("absent"), TFSOpts::LOAD)
        .await
        .unwrap_err();
    assert!(matches!(err, bluesky_core::Error::PathNotExists(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn flags_survive_round_trip() {
    register_person();
    let node = Node::new();
    let l = Link::hard("keeper", person("keeper", 50));
    l.set_flags(Flags::PERSISTENT).await;
    let id = l.id();
    node.insert(l, InsertPolicy::default()).await;
    let root = Link::hard("flag_root", Object::from_node(node));

    let dir = tempfile::tempdir().unwrap();
    let root_file = dir.path().join(".data");
    save_tree(&root, &root_file, TFSOpts::NONE).await.unwrap();

    let loaded_root = load_tree(&root_file, TFSOpts::LOAD).await.unwrap();
    let loaded = loaded_root.data_node().await.unwrap();
    let back = loaded.find(id).await;
    assert!(back.bare().flags().contains(Flags::PERSISTENT));
}
