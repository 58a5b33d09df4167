#![forbid(unsafe_code)]

use std::time::Duration;

use skiff_core::ProcessorConfig;
use skiff_queue::{ItemExponentialFailureRateLimiter, WorkQueue};
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn delayed_item_becomes_ready_after_delay() {
    let q: WorkQueue<&str> = WorkQueue::new("delayed");
    let start = Instant::now();
    q.add_after("later", Duration::from_millis(250));
    assert_eq!(q.len(), 0);
    assert_eq!(q.waiting_len(), 1);

    assert_eq!(q.get().await, Some("later"));
    assert!(start.elapsed() >= Duration::from_millis(250));
    assert_eq!(q.waiting_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn earlier_deadline_wins_for_same_item() {
    let q: WorkQueue<&str> = WorkQueue::new("delayed");
    let start = Instant::now();
    q.add_after("x", Duration::from_secs(10));
    q.add_after("x", Duration::from_secs(1));
    q.add_after("x", Duration::from_secs(5));
    assert_eq!(q.waiting_len(), 1);

    assert_eq!(q.get().await, Some("x"));
    let waited = start.elapsed();
    assert!(waited >= Duration::from_secs(1) && waited < Duration::from_secs(5), "waited {waited:?}");
    q.done(&"x");
    // the stale 10s/5s entries must not resurrect the item
    tokio::time::advance(Duration::from_secs(20)).await;
    assert!(tokio::time::timeout(Duration::from_millis(10), q.get()).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn delayed_items_come_out_in_deadline_order() {
    let q: WorkQueue<u32> = WorkQueue::new("delayed");
    q.add_after(3, Duration::from_millis(30));
    q.add_after(1, Duration::from_millis(10));
    q.add_after(2, Duration::from_millis(20));
    let mut out = Vec::new();
    for _ in 0..3 {
        let v = q.get().await.expect("item");
        q.done(&v);
        out.push(v);
    }
    assert_eq!(out, vec![1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn zero_delay_keeps_fifo_order() {
    let q: WorkQueue<u32> = WorkQueue::new("delayed");
    q.add_after(1, Duration::ZERO);
    q.add(2);
    q.add_after(3, Duration::ZERO);
    assert_eq!(q.get().await, Some(1));
    assert_eq!(q.get().await, Some(2));
    assert_eq!(q.get().await, Some(3));
}

#[tokio::test(start_paused = true)]
async fn rate_limited_requeues_back_off_and_count() {
    let limiter = ItemExponentialFailureRateLimiter::new(Duration::from_millis(100), Duration::from_secs(10));
    let q: WorkQueue<&str> = WorkQueue::with_rate_limiter("retry", limiter);

    let start = Instant::now();
    q.add_rate_limited("flaky");
    assert_eq!(q.num_requeues(&"flaky"), 1);
    assert_eq!(q.get().await, Some("flaky"));
    assert!(start.elapsed() >= Duration::from_millis(100));
    q.done(&"flaky");

    let second = Instant::now();
    q.add_rate_limited("flaky");
    assert_eq!(q.get().await, Some("flaky"));
    assert!(second.elapsed() >= Duration::from_millis(200));
    assert_eq!(q.num_requeues(&"flaky"), 2);

    q.forget(&"flaky");
    assert_eq!(q.num_requeues(&"flaky"), 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_discards_waiting_items() {
    let q: WorkQueue<u32> = WorkQueue::with_config("delayed", &ProcessorConfig::default());
    q.add_after(9, Duration::from_secs(1));
    q.shut_down();
    assert_eq!(q.waiting_len(), 0);
    assert_eq!(q.get().await, None);
}
