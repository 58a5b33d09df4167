#![forbid(unsafe_code)]

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::*;
use parking_lot::Mutex;
use skiff_watchers::MirrorError;

#[tokio::test]
async fn add_then_delete_reaches_handler_once_each() {
    let p = processor();
    let (store, mirror) = widget_mirror();
    let calls: Calls = Default::default();
    p.watch_with_mirror(widget_resource(), mirror, Some("ns1"), recorder(&calls));

    store.apply(widget("ns1", "a", 1));
    assert_eq!(p.queue_len(), 1);
    assert!(p.process().await);

    store.delete(widget("ns1", "a", 1));
    assert!(p.process().await);

    assert_eq!(*calls.lock(), vec![("ns1/a".to_string(), Some(1)), ("ns1/a".to_string(), None)]);
    assert_eq!(p.queue_len(), 0);
}

#[tokio::test]
async fn bursts_for_one_key_coalesce_to_latest_state() {
    let p = processor();
    let (store, mirror) = widget_mirror();
    let calls: Calls = Default::default();
    p.watch_with_mirror(widget_resource(), mirror, None, recorder(&calls));

    store.apply(widget("ns1", "a", 1));
    store.apply(widget("ns1", "a", 2));
    store.apply(widget("ns1", "a", 3));
    store.apply(widget("ns2", "b", 9));
    assert_eq!(p.queue_len(), 2);

    p.process_all().await;
    let mut seen = calls.lock().clone();
    seen.sort();
    assert_eq!(seen, vec![("ns1/a".to_string(), Some(3)), ("ns2/b".to_string(), Some(9))]);
}

#[tokio::test]
async fn delete_before_dispatch_delivers_absence() {
    let p = processor();
    let (store, mirror) = widget_mirror();
    let calls: Calls = Default::default();
    p.watch_with_mirror(widget_resource(), mirror, None, recorder(&calls));

    store.apply(widget("ns1", "a", 1));
    store.delete(widget("ns1", "a", 1));
    assert_eq!(p.queue_len(), 1);
    p.process_all().await;
    assert_eq!(*calls.lock(), vec![("ns1/a".to_string(), None)]);
}

#[tokio::test]
async fn watcher_lookups() {
    let p = processor();
    let (store, mirror) = widget_mirror();
    let calls: Calls = Default::default();
    let w = p.watch_with_mirror(widget_resource(), mirror, Some("ns1"), recorder(&calls));
    assert_eq!(w.kind(), "Widget");
    assert_eq!(w.namespace(), Some("ns1"));

    assert!(w.get("ns1/never").unwrap().is_none());
    assert!(matches!(w.get("a/b/c"), Err(MirrorError::Key(_))));

    store.apply(widget("ns1", "a", 1));
    store.apply(widget("ns1", "b", 2));
    assert_eq!(w.get("ns1/a").unwrap().map(|x| x.spec.size), Some(1));
    let mut sizes: Vec<u32> = w.list().iter().map(|x| x.spec.size).collect();
    sizes.sort();
    assert_eq!(sizes, vec![1, 2]);

    store.delete(widget("ns1", "a", 1));
    assert!(w.get("ns1/a").unwrap().is_none());
    assert_eq!(w.list().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn failing_handler_is_retried_five_times_then_dropped() {
    let p = processor();
    let (store, mirror) = widget_mirror();
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);
    p.watch_with_mirror(widget_resource(), mirror, None, move |_key, _obj| {
        counter.fetch_add(1, Ordering::SeqCst);
        futures::future::ready(Err(anyhow::anyhow!("always fails")))
    });

    store.apply(widget("ns1", "a", 1));
    for _ in 0..6 {
        assert!(p.process().await);
    }
    assert_eq!(attempts.load(Ordering::SeqCst), 6);

    // dropped: nothing ready and nothing comes back later
    assert_eq!(p.queue_len(), 0);
    assert!(tokio::time::timeout(Duration::from_secs(3600), p.process()).await.is_err());

    // a fresh change starts a new retry budget
    store.apply(widget("ns1", "a", 2));
    for _ in 0..6 {
        assert!(p.process().await);
    }
    assert_eq!(attempts.load(Ordering::SeqCst), 12);
    assert!(tokio::time::timeout(Duration::from_secs(3600), p.process()).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn panicking_handler_does_not_kill_the_loop() {
    let p = processor();
    let (store, mirror) = widget_mirror();
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);
    p.watch_with_mirror(widget_resource(), mirror, None, move |_key, _obj| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("first attempt blows up");
        }
        futures::future::ready(Ok(()))
    });

    store.apply(widget("ns1", "a", 1));
    assert!(p.process().await);
    assert!(p.process().await);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert!(tokio::time::timeout(Duration::from_secs(60), p.process()).await.is_err());
}

#[tokio::test]
async fn zero_delay_callback_runs_before_later_events() {
    let p = processor();
    let (store, mirror) = widget_mirror();
    let order = Arc::new(Mutex::new(Vec::<String>::new()));
    let o = Arc::clone(&order);
    p.watch_with_mirror(widget_resource(), mirror, None, move |key, _obj| {
        o.lock().push(key);
        futures::future::ready(Ok(()))
    });

    let o = Arc::clone(&order);
    p.callback_after(
        Duration::ZERO,
        move |ctx| {
            o.lock().push(format!("callback:{ctx}"));
            futures::future::ready(Ok(()))
        },
        "first",
    );
    store.apply(widget("ns1", "a", 1));

    p.process_all().await;
    assert_eq!(*order.lock(), vec!["callback:first".to_string(), "ns1/a".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn delayed_callbacks_do_not_coalesce() {
    let p = processor();
    let ran = Arc::new(AtomicU32::new(0));
    for ctx in ["a", "a"] {
        let ran = Arc::clone(&ran);
        p.callback_after(
            Duration::from_secs(5),
            move |_ctx| {
                ran.fetch_add(1, Ordering::SeqCst);
                futures::future::ready(Ok(()))
            },
            ctx,
        );
    }
    assert_eq!(p.queue_len(), 0);
    assert!(p.process().await);
    assert!(p.process().await);
    assert_eq!(ran.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn stopped_processor_refuses_work() {
    let p = processor();
    let (store, mirror) = widget_mirror();
    let calls: Calls = Default::default();
    p.watch_with_mirror(widget_resource(), mirror, None, recorder(&calls));

    store.apply(widget("ns1", "a", 1));
    p.stop();
    assert!(!p.process().await);
    store.apply(widget("ns1", "b", 1));
    assert!(!p.process().await);
    assert!(calls.lock().is_empty());
}
