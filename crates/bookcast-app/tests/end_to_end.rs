//! Full pipeline: mock venue → feed connection → registry → socket client.

use bookcast::{AppConfig, Application};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::{accept_async, connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

const SUBSCRIBED: &str = r#"{"channelID":10001,"event":"subscriptionStatus","pair":"XBT/USD","status":"subscribed","subscription":{"name":"book","depth":10}}"#;
const SNAPSHOT: &str = r#"[10001,{"as":[["5541.30000","2.50700000","1534614248.123678"],["5542.50000","0.40100000","1534614248.456738"]],"bs":[["5541.20000","1.52900000","1534614248.765567"],["5539.90000","0.30000000","1534614241.769870"]]},"book-10","XBT/USD"]"#;
const UPDATE: &str = r#"[10001,{"a":[["5541.30000","0.00000000","1534614335.345903"]],"c":"974942666"},"book-10","XBT/USD"]"#;

/// Venue stand-in: answers a book subscription with a status, a
/// snapshot and one update, and records every client message.
struct MockKraken {
    addr: SocketAddr,
    received: mpsc::UnboundedReceiver<Value>,
}

impl MockKraken {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, received) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(handle_venue_connection(stream, tx.clone()));
            }
        });

        Self { addr, received }
    }

    fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    async fn next_event(&mut self, event: &str) -> Value {
        loop {
            let msg = within(self.received.recv()).await.expect("mock closed");
            if msg["event"] == event {
                return msg;
            }
        }
    }
}

async fn handle_venue_connection(stream: TcpStream, received: mpsc::UnboundedSender<Value>) {
    let Ok(ws) = accept_async(stream).await else {
        return;
    };
    let (write, mut read) = ws.split();
    let write = Arc::new(Mutex::new(write));

    while let Some(Ok(msg)) = read.next().await {
        let Message::Text(text) = msg else {
            continue;
        };
        let Ok(value) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        let is_subscribe = value["event"] == "subscribe";
        let _ = received.send(value);

        if is_subscribe {
            let mut write = write.lock().await;
            for frame in [SUBSCRIBED, SNAPSHOT, UPDATE] {
                if write.send(Message::Text(frame.to_string())).await.is_err() {
                    return;
                }
            }
        }
    }
}

async fn within<F: std::future::Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("timed out")
}

fn config_for(venue: &MockKraken) -> AppConfig {
    let mut config = AppConfig::default();
    config.feed.ws_url = venue.url();
    config.feed.reconnect_base_delay_ms = 50;
    config.feed.reconnect_jitter_ms = 0;
    config
}

async fn next_json<S>(client: &mut S) -> Value
where
    S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let frame = within(client.next()).await.expect("socket ended").unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn test_client_receives_replicated_book() {
    let mut venue = MockKraken::start().await;
    let app = Application::new(config_for(&venue)).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(app.serve_on(listener, shutdown.clone()));

    let (mut client, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    client
        .send(Message::Text(
            r#"{"method":"subscribe","symbol":"XBT/USD"}"#.to_string(),
        ))
        .await
        .unwrap();

    let subscribe = venue.next_event("subscribe").await;
    assert_eq!(subscribe["pair"][0], "XBT/USD");
    assert_eq!(subscribe["subscription"]["name"], "book");
    assert_eq!(subscribe["subscription"]["depth"], 10);

    let snapshot = next_json(&mut client).await;
    assert_eq!(snapshot["channel"], "book_snapshot");
    assert_eq!(snapshot["symbol"], "XBT/USD");
    assert_eq!(snapshot["data"]["sequence"], 0);
    assert_eq!(snapshot["data"]["asks"].as_array().unwrap().len(), 2);
    assert_eq!(snapshot["data"]["bids"].as_array().unwrap().len(), 2);

    let update = next_json(&mut client).await;
    assert_eq!(update["channel"], "book_update");
    assert_eq!(update["data"]["sequence"], 1);
    assert_eq!(update["data"]["asks"].as_array().unwrap().len(), 1);
    assert!(update["data"].get("bids").is_none());

    // Last subscriber leaving closes the upstream subscription
    client.close(None).await.unwrap();
    let unsubscribe = venue.next_event("unsubscribe").await;
    assert_eq!(unsubscribe["pair"][0], "XBT/USD");

    shutdown.cancel();
    within(server).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_watch_stops_on_shutdown() {
    let mut venue = MockKraken::start().await;
    let app = Application::new(config_for(&venue)).unwrap();

    let shutdown = CancellationToken::new();
    let watch = tokio::spawn(app.watch("XBT/USD".parse().unwrap(), shutdown.clone()));

    venue.next_event("subscribe").await;
    shutdown.cancel();

    within(watch).await.unwrap().unwrap();
    venue.next_event("unsubscribe").await;
}
