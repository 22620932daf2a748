//! Registry lifecycle tests driven by a scripted feed connector.
//!
//! Each `connect` call hands the transport end of a fresh link to the
//! test, which then plays the venue by pushing signals into it.

use bookcast_core::{BookEvent, Symbol};
use bookcast_feed::{BookMirror, MirrorStatus, SequenceGuard};
use bookcast_registry::{RegistryConfig, RegistryHandle, SubscriberSink, SubscriptionRegistry};
use bookcast_ws::{FeedConnector, FeedEndpoint, FeedLink, FeedSignal};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const PAIR: &str = "ETH/XBT";

struct ScriptedConnector {
    connects: mpsc::UnboundedSender<(Symbol, FeedEndpoint)>,
}

impl FeedConnector for ScriptedConnector {
    fn connect(&self, symbol: &Symbol) -> FeedLink {
        let (link, endpoint) = FeedLink::pair(64);
        let _ = self.connects.send((symbol.clone(), endpoint));
        link
    }
}

struct Harness {
    registry: RegistryHandle,
    connects: mpsc::UnboundedReceiver<(Symbol, FeedEndpoint)>,
}

impl Harness {
    fn start(config: RegistryConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(ScriptedConnector { connects: tx });
        let (registry, _task) = SubscriptionRegistry::spawn(config, connector);
        Self {
            registry,
            connects: rx,
        }
    }

    async fn next_feed(&mut self) -> FeedEndpoint {
        let (symbol, endpoint) = within(self.connects.recv()).await.expect("no connect");
        assert_eq!(symbol.as_str(), PAIR);
        endpoint
    }
}

async fn within<F: std::future::Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("timed out")
}

async fn next_event(rx: &mut mpsc::Receiver<BookEvent>) -> BookEvent {
    within(rx.recv()).await.expect("stream ended")
}

fn snapshot_frame(pair: &str) -> FeedSignal {
    FeedSignal::Frame(format!(
        r#"[10,{{"as":[["101.0","3","1.1"]],"bs":[["100.0","2","1.1"]]}},"book-10","{pair}"]"#
    ))
}

fn bid_frame(pair: &str, price: &str, volume: &str) -> FeedSignal {
    FeedSignal::Frame(format!(
        r#"[10,{{"b":[["{price}","{volume}","1.2"]],"c":"0"}},"book-10","{pair}"]"#
    ))
}

async fn play(endpoint: &FeedEndpoint, signals: Vec<FeedSignal>) {
    for signal in signals {
        assert!(endpoint.send(signal).await, "worker dropped link");
    }
}

#[tokio::test]
async fn test_late_subscriber_gets_catch_up_snapshot() {
    let mut h = Harness::start(RegistryConfig::default());
    let (_first, mut first_rx) = h.registry.subscribe_channel(Symbol::new(PAIR)).await.unwrap();
    let feed = h.next_feed().await;

    play(&feed, vec![FeedSignal::Opened, snapshot_frame(PAIR)]).await;
    match next_event(&mut first_rx).await {
        BookEvent::Snapshot(view) => {
            assert_eq!(view.bids[0].price.to_string(), "100.0");
            assert_eq!(view.asks[0].price.to_string(), "101.0");
            assert_eq!(view.sequence, 0);
        }
        other => panic!("Expected snapshot, got {other:?}"),
    }

    let (_second, mut second_rx) = h.registry.subscribe_channel(Symbol::new(PAIR)).await.unwrap();
    // Catch-up is already buffered when subscribe returns
    assert!(matches!(second_rx.try_recv(), Ok(BookEvent::Snapshot(_))));

    play(&feed, vec![bid_frame(PAIR, "100.0", "0")]).await;
    for rx in [&mut first_rx, &mut second_rx] {
        match next_event(rx).await {
            BookEvent::Update(update) => {
                assert_eq!(update.sequence, 1);
                assert!(update.bids.is_some());
                assert!(update.asks.is_none());
            }
            other => panic!("Expected update, got {other:?}"),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_catch_up_under_concurrent_deltas() {
    const DELTAS: usize = 3000;
    const LATE: usize = 20;

    let config = RegistryConfig {
        sink_capacity: DELTAS + 64,
        ..Default::default()
    };
    let range = config.sequence_range;
    let mut h = Harness::start(config);
    let (_first, first_rx) = h.registry.subscribe_channel(Symbol::new(PAIR)).await.unwrap();
    let feed = h.next_feed().await;
    play(&feed, vec![FeedSignal::Opened, snapshot_frame(PAIR)]).await;

    let mut streams = vec![first_rx];
    let pusher = tokio::spawn(async move {
        for i in 0..DELTAS {
            let price = format!("{}.0", 50 + i % 40);
            let volume = if i % 3 == 0 { "0" } else { "1" };
            assert!(feed.send(bid_frame(PAIR, &price, volume)).await);
        }
        feed
    });

    let mut handles = Vec::new();
    for _ in 0..LATE {
        let (handle, rx) = h.registry.subscribe_channel(Symbol::new(PAIR)).await.unwrap();
        handles.push(handle);
        streams.push(rx);
        tokio::task::yield_now().await;
    }
    // Ending the feed closes every stream once drained
    drop(within(pusher).await.unwrap());

    let mut views = Vec::new();
    for mut rx in streams {
        let mut mirror = BookMirror::new(SequenceGuard::new(range));
        let first = within(rx.recv()).await.expect("stream ended before snapshot");
        assert!(matches!(first, BookEvent::Snapshot(_)));
        assert_eq!(mirror.apply(&first).unwrap(), MirrorStatus::Applied);

        while let Some(event) = within(rx.recv()).await {
            assert!(
                !matches!(event, BookEvent::Snapshot(_)),
                "second snapshot in one stream"
            );
            assert_eq!(mirror.apply(&event).unwrap(), MirrorStatus::Applied);
        }
        views.push(mirror.view(10));
    }

    // Every subscriber converges on the same book
    assert!(views.windows(2).all(|w| w[0] == w[1]));
}

#[tokio::test]
async fn test_deltas_before_snapshot_are_dropped() {
    let mut h = Harness::start(RegistryConfig::default());
    let (_sub, mut rx) = h.registry.subscribe_channel(Symbol::new(PAIR)).await.unwrap();
    let feed = h.next_feed().await;

    // Deltas before the first snapshot are dropped
    play(&feed, vec![FeedSignal::Opened, bid_frame(PAIR, "99.0", "1")]).await;
    play(&feed, vec![snapshot_frame(PAIR)]).await;

    assert!(matches!(next_event(&mut rx).await, BookEvent::Snapshot(_)));
}

#[tokio::test]
async fn test_last_cancel_tears_down_feed() {
    let mut h = Harness::start(RegistryConfig::default());
    let (a, _a_rx) = h.registry.subscribe_channel(Symbol::new(PAIR)).await.unwrap();
    let (b, _b_rx) = h.registry.subscribe_channel(Symbol::new(PAIR)).await.unwrap();
    let feed = h.next_feed().await;
    play(&feed, vec![FeedSignal::Opened, snapshot_frame(PAIR)]).await;

    let stats = h.registry.stats().await.unwrap();
    assert_eq!(stats.subscribers_for(&Symbol::new(PAIR)), 2);

    a.cancel();
    let stats = h.registry.stats().await.unwrap();
    assert_eq!(stats.subscribers_for(&Symbol::new(PAIR)), 1);
    assert!(!feed.is_shutdown());

    h.registry.cancel(&b);
    within(feed.shutdown_requested()).await;
    assert!(h.registry.stats().await.unwrap().symbols.is_empty());

    // A later subscribe starts from an uninitialized book on a new feed
    let (_c, mut c_rx) = h.registry.subscribe_channel(Symbol::new(PAIR)).await.unwrap();
    let _second_feed = h.next_feed().await;
    assert!(c_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_cancel_is_idempotent() {
    let mut h = Harness::start(RegistryConfig::default());
    let (a, _a_rx) = h.registry.subscribe_channel(Symbol::new(PAIR)).await.unwrap();
    let (_b, mut b_rx) = h.registry.subscribe_channel(Symbol::new(PAIR)).await.unwrap();
    let feed = h.next_feed().await;

    a.cancel();
    a.cancel();
    h.registry.cancel(&a);

    let stats = h.registry.stats().await.unwrap();
    assert_eq!(stats.subscribers_for(&Symbol::new(PAIR)), 1);

    play(&feed, vec![snapshot_frame(PAIR)]).await;
    assert!(matches!(next_event(&mut b_rx).await, BookEvent::Snapshot(_)));
}

#[tokio::test]
async fn test_symbol_mismatch_restarts_and_resets_replica() {
    let mut h = Harness::start(RegistryConfig::default());
    let (_sub, mut rx) = h.registry.subscribe_channel(Symbol::new(PAIR)).await.unwrap();
    let feed = h.next_feed().await;

    play(&feed, vec![FeedSignal::Opened, snapshot_frame(PAIR)]).await;
    assert!(matches!(next_event(&mut rx).await, BookEvent::Snapshot(_)));

    play(&feed, vec![bid_frame("XBT/USD", "1.0", "1")]).await;
    within(feed.restart_requested()).await;

    // Replica was reset: deltas are dropped until a new snapshot
    play(
        &feed,
        vec![bid_frame(PAIR, "100.0", "5"), snapshot_frame(PAIR)],
    )
    .await;
    match next_event(&mut rx).await {
        BookEvent::Snapshot(view) => assert_eq!(view.sequence, 0),
        other => panic!("Expected snapshot, got {other:?}"),
    }
}

#[tokio::test]
async fn test_queued_mismatches_restart_once_per_session() {
    let mut h = Harness::start(RegistryConfig::default());
    let (_sub, mut rx) = h.registry.subscribe_channel(Symbol::new(PAIR)).await.unwrap();
    let feed = h.next_feed().await;

    play(&feed, vec![FeedSignal::Opened, snapshot_frame(PAIR)]).await;
    assert!(matches!(next_event(&mut rx).await, BookEvent::Snapshot(_)));

    play(
        &feed,
        vec![
            bid_frame("XBT/USD", "1.0", "1"),
            bid_frame("XBT/USD", "2.0", "1"),
            bid_frame("XBT/USD", "3.0", "1"),
        ],
    )
    .await;
    within(feed.restart_requested()).await;

    // New session; the snapshot proves every queued frame was handled
    play(&feed, vec![FeedSignal::Opened, snapshot_frame(PAIR)]).await;
    assert!(matches!(next_event(&mut rx).await, BookEvent::Snapshot(_)));
    assert!(
        tokio::time::timeout(Duration::from_millis(100), feed.restart_requested())
            .await
            .is_err(),
        "stale restart carried into the new session"
    );

    // A mismatch in the new session restarts again
    play(&feed, vec![bid_frame("XBT/USD", "4.0", "1")]).await;
    within(feed.restart_requested()).await;
}

#[tokio::test]
async fn test_transport_close_suppresses_updates_until_snapshot() {
    let mut h = Harness::start(RegistryConfig::default());
    let (_sub, mut rx) = h.registry.subscribe_channel(Symbol::new(PAIR)).await.unwrap();
    let feed = h.next_feed().await;

    play(&feed, vec![FeedSignal::Opened, snapshot_frame(PAIR)]).await;
    play(&feed, vec![bid_frame(PAIR, "99.5", "1")]).await;
    assert!(matches!(next_event(&mut rx).await, BookEvent::Snapshot(_)));
    assert!(matches!(next_event(&mut rx).await, BookEvent::Update(_)));

    play(
        &feed,
        vec![
            FeedSignal::Closed {
                reason: "reset by peer".to_string(),
            },
            FeedSignal::Opened,
            bid_frame(PAIR, "99.0", "1"),
            snapshot_frame(PAIR),
        ],
    )
    .await;

    match next_event(&mut rx).await {
        BookEvent::Snapshot(view) => {
            assert_eq!(view.sequence, 0);
            assert_eq!(view.bids.len(), 1);
        }
        other => panic!("Expected snapshot, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_speed_reports_delta_rate() {
    let config = RegistryConfig {
        speed_period_ms: 1000,
        ..Default::default()
    };
    let mut h = Harness::start(config);
    let (_sub, mut rx) = h.registry.subscribe_channel(Symbol::new(PAIR)).await.unwrap();
    let feed = h.next_feed().await;

    play(
        &feed,
        vec![
            snapshot_frame(PAIR),
            bid_frame(PAIR, "99.0", "1"),
            bid_frame(PAIR, "98.0", "1"),
            bid_frame(PAIR, "97.0", "1"),
        ],
    )
    .await;

    let rate = loop {
        if let BookEvent::Speed(report) = next_event(&mut rx).await {
            break report.rate_per_minute;
        }
    };
    // 3 deltas in a 1s period
    assert_eq!(rate, 180.0);
}

#[tokio::test]
async fn test_slow_subscriber_is_evicted() {
    let config = RegistryConfig {
        sink_capacity: 1,
        ..Default::default()
    };
    let mut h = Harness::start(config);
    let (sink, mut slow_rx) = SubscriberSink::channel(1);
    let _slow = h.registry.subscribe(Symbol::new(PAIR), sink).await.unwrap();
    let feed = h.next_feed().await;

    play(
        &feed,
        vec![snapshot_frame(PAIR), bid_frame(PAIR, "99.0", "1")],
    )
    .await;

    within(feed.shutdown_requested()).await;
    assert!(h.registry.stats().await.unwrap().symbols.is_empty());

    assert!(matches!(slow_rx.recv().await, Some(BookEvent::Snapshot(_))));
    assert!(slow_rx.recv().await.is_none());
}

#[tokio::test]
async fn test_rejected_subscription_ends_streams() {
    let mut h = Harness::start(RegistryConfig::default());
    let (_sub, mut rx) = h.registry.subscribe_channel(Symbol::new(PAIR)).await.unwrap();
    let feed = h.next_feed().await;

    play(
        &feed,
        vec![FeedSignal::Frame(
            r#"{"event":"subscriptionStatus","pair":"ETH/XBT","status":"error","errorMessage":"Currency pair not supported"}"#
                .to_string(),
        )],
    )
    .await;

    assert!(within(rx.recv()).await.is_none());
    assert!(h.registry.stats().await.unwrap().symbols.is_empty());
}

#[tokio::test]
async fn test_feed_end_removes_entry() {
    let mut h = Harness::start(RegistryConfig::default());
    let (_sub, mut rx) = h.registry.subscribe_channel(Symbol::new(PAIR)).await.unwrap();
    let feed = h.next_feed().await;

    drop(feed);
    assert!(within(rx.recv()).await.is_none());
    assert!(h.registry.stats().await.unwrap().symbols.is_empty());
}

#[tokio::test]
async fn test_shutdown_stops_workers() {
    let mut h = Harness::start(RegistryConfig::default());
    let (_sub, mut rx) = h.registry.subscribe_channel(Symbol::new(PAIR)).await.unwrap();
    let feed = h.next_feed().await;

    h.registry.shutdown();
    within(feed.shutdown_requested()).await;
    assert!(within(rx.recv()).await.is_none());
}
