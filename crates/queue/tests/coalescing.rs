#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use skiff_queue::WorkQueue;

#[tokio::test]
async fn duplicate_adds_collapse_into_one_entry() {
    let q: WorkQueue<&str> = WorkQueue::new("test");
    q.add("ns1/a");
    q.add("ns1/a");
    q.add("ns1/b");
    q.add("ns1/a");
    assert_eq!(q.len(), 2);

    assert_eq!(q.get().await, Some("ns1/a"));
    assert_eq!(q.get().await, Some("ns1/b"));
    assert!(q.is_empty());
}

#[tokio::test]
async fn readd_while_processing_is_deferred_until_done() {
    let q: WorkQueue<&str> = WorkQueue::new("test");
    q.add("k");
    let item = q.get().await.expect("item");
    assert_eq!(q.processing_len(), 1);

    // several updates while the handler runs: parked, not queued
    q.add("k");
    q.add("k");
    assert_eq!(q.len(), 0);

    q.done(&item);
    assert_eq!(q.len(), 1);
    assert_eq!(q.get().await, Some("k"));
    q.done(&"k");
    assert_eq!(q.len(), 0);
    assert_eq!(q.processing_len(), 0);
}

#[tokio::test]
async fn shutdown_refuses_new_items_and_releases_consumer() {
    let q: Arc<WorkQueue<u32>> = Arc::new(WorkQueue::new("test"));
    let consumer = {
        let q = Arc::clone(&q);
        tokio::spawn(async move { q.get().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    q.shut_down();
    let got = tokio::time::timeout(Duration::from_secs(1), consumer).await.expect("consumer released").expect("join");
    assert_eq!(got, None);

    q.add(7);
    assert!(q.is_empty());
    assert!(q.is_shutting_down());
    assert_eq!(q.get().await, None);
}

#[tokio::test]
async fn blocked_consumer_wakes_on_add_from_plain_thread() {
    let q: Arc<WorkQueue<u32>> = Arc::new(WorkQueue::new("test"));
    let consumer = {
        let q = Arc::clone(&q);
        tokio::spawn(async move { q.get().await })
    };
    let producer = {
        let q = Arc::clone(&q);
        std::thread::spawn(move || q.add(42))
    };
    producer.join().expect("producer thread");
    let got = tokio::time::timeout(Duration::from_secs(1), consumer).await.expect("woken").expect("join");
    assert_eq!(got, Some(42));
}
