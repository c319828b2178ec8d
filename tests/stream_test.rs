use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use ratiobot::config::{ExchangeConfig, StreamConfig};
use ratiobot::market::{MarketObserver, ObserverSet, StreamIngester, StreamState};
use ratiobot::shutdown;
use ratiobot::MarketEvent;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

const CANDLE_PUSH: &str = r#"{
    "action": "snapshot",
    "arg": {"instType": "USDT-FUTURES", "channel": "candle1m", "instId": "BTCUSDT"},
    "data": [
        ["1695685560000", "26240.1", "26250.0", "26230.5", "26245.2", "12.5", "328000.1"],
        ["1695685500000", "26230.0", "26242.0", "26220.0", "26240.1", "10.1", "265000.7"]
    ],
    "ts": 1695685563347
}"#;

#[derive(Default)]
struct Recorder {
    closes: Mutex<Vec<f64>>,
}

#[async_trait]
impl MarketObserver for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    async fn on_event(&self, event: &MarketEvent) -> anyhow::Result<()> {
        if let MarketEvent::Candle(candle) = event {
            self.closes.lock().unwrap().push(candle.close);
        }
        Ok(())
    }
}

/// Accept one client, confirm its subscription, push a malformed frame and a
/// candle snapshot, then answer pings until the client goes away.
async fn serve_one(listener: TcpListener, pings: Arc<AtomicUsize>, subscribed: Arc<Mutex<Option<String>>>) {
    let (tcp, _) = listener.accept().await.unwrap();
    let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();

    let request = ws.next().await.unwrap().unwrap().into_text().unwrap();
    *subscribed.lock().unwrap() = Some(request.to_string());

    ws.send(Message::Text(
        r#"{"event":"subscribe","arg":{"instType":"USDT-FUTURES","channel":"candle1m","instId":"BTCUSDT"}}"#
            .to_string(),
    ))
    .await
    .unwrap();
    ws.send(Message::Text("{not json".to_string())).await.unwrap();
    ws.send(Message::Text(CANDLE_PUSH.to_string())).await.unwrap();

    while let Some(Ok(message)) = ws.next().await {
        match message {
            Message::Text(text) if text == "ping" => {
                pings.fetch_add(1, Ordering::SeqCst);
                if ws.send(Message::Text("pong".to_string())).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}

#[tokio::test]
async fn test_stream_subscribes_and_fans_out_candles() {
    let _ = tracing_subscriber::fmt::try_init();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let pings = Arc::new(AtomicUsize::new(0));
    let subscribed = Arc::new(Mutex::new(None));
    let server = tokio::spawn(serve_one(listener, pings.clone(), subscribed.clone()));

    let exchange = ExchangeConfig {
        ws_url: format!("ws://{}", addr),
        ..Default::default()
    };
    let recorder = Arc::new(Recorder::default());
    let observers = ObserverSet::new();
    observers.register(recorder.clone());

    let ingester = Arc::new(
        StreamIngester::new(&exchange, &StreamConfig::default(), observers)
            .with_ping_interval(Duration::from_millis(100)),
    );
    let mut state = ingester.state();

    let (tx, rx) = shutdown::channel();
    let handle = {
        let ingester = ingester.clone();
        tokio::spawn(async move { ingester.run(rx).await })
    };

    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == StreamState::Streaming),
    )
    .await
    .expect("stream never reached Streaming")
    .unwrap();

    // Candles arrive oldest first; the malformed frame is dropped
    tokio::time::timeout(Duration::from_secs(5), async {
        while recorder.closes.lock().unwrap().len() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("candles never delivered");
    assert_eq!(*recorder.closes.lock().unwrap(), vec![26240.1, 26245.2]);

    // Several keepalive rounds without being declared stalled
    tokio::time::sleep(Duration::from_millis(350)).await;
    assert!(pings.load(Ordering::SeqCst) >= 3);
    assert_eq!(*state.borrow(), StreamState::Streaming);

    let request = subscribed.lock().unwrap().clone().unwrap();
    let request: serde_json::Value = serde_json::from_str(&request).unwrap();
    assert_eq!(request["op"], "subscribe");
    assert_eq!(request["args"][0]["channel"], "candle1m");
    assert_eq!(request["args"][0]["instId"], "BTCUSDT");

    tx.send_replace(true);
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("ingester did not stop")
        .unwrap();

    assert_eq!(*state.borrow(), StreamState::Disconnected);
    assert!(ingester.observers().is_empty());
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server did not finish")
        .unwrap();
}

#[tokio::test]
async fn test_rejected_subscription_retries() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let attempts = Arc::new(AtomicUsize::new(0));

    let server = {
        let attempts = attempts.clone();
        tokio::spawn(async move {
            loop {
                let Ok((tcp, _)) = listener.accept().await else {
                    break;
                };
                let Ok(mut ws) = tokio_tungstenite::accept_async(tcp).await else {
                    continue;
                };
                let _ = ws.next().await;
                attempts.fetch_add(1, Ordering::SeqCst);
                let _ = ws
                    .send(Message::Text(
                        r#"{"event":"error","code":30001,"msg":"instType:USDT-FUTURES,channel:candle1m,instId:NOPE doesn't exist"}"#
                            .to_string(),
                    ))
                    .await;
            }
        })
    };

    let exchange = ExchangeConfig {
        ws_url: format!("ws://{}", addr),
        symbol: "NOPE".to_string(),
        ..Default::default()
    };
    let ingester = StreamIngester::new(&exchange, &StreamConfig::default(), ObserverSet::new())
        .with_backoff(Duration::from_millis(10), Duration::from_millis(20));

    let (tx, rx) = shutdown::channel();
    let handle = tokio::spawn(async move { ingester.run(rx).await });

    tokio::time::timeout(Duration::from_secs(5), async {
        while attempts.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("ingester did not retry");

    tx.send_replace(true);
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    server.abort();
}

#[tokio::test]
async fn test_silent_server_is_stalled_and_reconnected() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));

    // Confirms every subscription, then reads pings without ever answering
    let server = {
        let connections = connections.clone();
        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                let connections = connections.clone();
                tokio::spawn(async move {
                    let Ok(mut ws) = tokio_tungstenite::accept_async(tcp).await else {
                        return;
                    };
                    let _ = ws.next().await;
                    connections.fetch_add(1, Ordering::SeqCst);
                    let _ = ws
                        .send(Message::Text(
                            r#"{"event":"subscribe","arg":{"instType":"USDT-FUTURES","channel":"candle1m","instId":"BTCUSDT"}}"#
                                .to_string(),
                        ))
                        .await;
                    while let Some(Ok(_)) = ws.next().await {}
                });
            }
        })
    };

    let exchange = ExchangeConfig {
        ws_url: format!("ws://{}", addr),
        ..Default::default()
    };
    let ingester = Arc::new(
        StreamIngester::new(&exchange, &StreamConfig::default(), ObserverSet::new())
            .with_ping_interval(Duration::from_millis(100))
            .with_backoff(Duration::from_millis(10), Duration::from_millis(20)),
    );

    let (tx, rx) = shutdown::channel();
    let handle = {
        let ingester = ingester.clone();
        tokio::spawn(async move { ingester.run(rx).await })
    };

    tokio::time::timeout(Duration::from_secs(5), async {
        while connections.load(Ordering::SeqCst) < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("ingester did not reconnect after stalling");

    // Every session before the current one ended as a stall
    assert!(ingester.stall_count() >= 2);

    tx.send_replace(true);
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("ingester did not stop")
        .unwrap();
    assert_eq!(*ingester.state().borrow(), StreamState::Disconnected);
    server.abort();
}
