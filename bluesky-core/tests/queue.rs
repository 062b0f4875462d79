//! Transaction queue: serialization, reentrancy, object transactions.

mod common;

use bluesky_core::{queue, Propdict};
use common::{person, Person};

#[tokio::test(flavor = "multi_thread")]
async fn object_transaction_returns_info() {
    let obj = person("tr", 30);
    let res = obj
        .apply(Box::new(|o| {
            o.with_payload_mut(|p: &mut Person| p.age += 1)
                .map_err(|e| e.pack())?;
            let mut info = Propdict::new();
            info.set("age", 31i64);
            Ok(info)
        }))
        .await;
    assert_eq!(res.unwrap().get_int("age"), Some(31));
    obj.with_payload(|p: &Person| assert_eq!(p.age, 31)).unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn reentrant_object_transaction() {
    let obj = person("outer", 1);
    let inner_obj = obj.clone();
    let res = obj
        .apply(Box::new(move |o| {
            // A synchronous transaction from inside another one: must
            // complete on a one-shot worker, not deadlock.
            assert!(queue().is_reentrant());
            let inner = inner_obj.apply_sync(Box::new(|o2| {
                o2.with_payload_mut(|p: &mut Person| p.age = 7)
                    .map_err(|e| e.pack())?;
                let mut info = Propdict::new();
                info.set("inner", true);
                Ok(info)
            }))?;
            o.with_payload(|p: &Person| assert_eq!(p.age, 7))
                .map_err(|e| e.pack())?;
            let mut info = Propdict::new();
            info.merge(inner);
            info.set("outer", true);
            Ok(info)
        }))
        .await;

    let info = res.unwrap();
    assert_eq!(info.get_bool("inner"), Some(true));
    assert_eq!(info.get_bool("outer"), Some(true));
}

#[tokio::test(flavor = "multi_thread")]
async fn link_transaction_runs_against_handle() {
    let link = bluesky_core::Link::hard("tr", person("tr", 5));
    let res = link
        .apply(Box::new(|l| {
            let mut info = Propdict::new();
            info.set("name", l.bare().name());
            Ok(info)
        }))
        .await;
    assert_eq!(res.unwrap().get_str("name"), Some("tr"));
}

#[tokio::test(flavor = "multi_thread")]
async fn transactions_serialize_across_engines() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    let active = Arc::new(AtomicUsize::new(0));
    let overlap = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for i in 0..8 {
        let obj = person(&format!("o{i}"), i);
        let active = active.clone();
        let overlap = overlap.clone();
        handles.push(tokio::spawn(async move {
            obj.apply(Box::new(move |_| {
                if active.fetch_add(1, Ordering::SeqCst) > 0 {
                    overlap.fetch_add(1, Ordering::SeqCst);
                }
                std::thread::sleep(std::time::Duration::from_millis(10));
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(Propdict::new())
            }))
            .await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }
    assert_eq!(overlap.load(Ordering::SeqCst), 0);
}
