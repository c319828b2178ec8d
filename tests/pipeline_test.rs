use ratiobot::api::BitgetClient;
use ratiobot::execution::{OrderExecutor, PaperExecutor};
use ratiobot::persistence::{MemoryStorage, Storage};
use ratiobot::strategy::EnginePhase;
use ratiobot::{Candle, OpenInterestSample, Pipeline, RatioSample, Settings, Side};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Settings pointing every endpoint at a closed local port.
fn offline_settings() -> Settings {
    let mut settings = Settings::default();
    settings.exchange.base_url = "http://127.0.0.1:1".to_string();
    settings.exchange.ws_url = "ws://127.0.0.1:1".to_string();
    settings.exchange.max_retries = 0;
    settings.exchange.request_timeout_ms = 500;
    settings.strategy.evaluation_interval_ms = 20;
    settings
}

async fn seeded_storage() -> Arc<MemoryStorage> {
    let storage = Arc::new(MemoryStorage::default());
    for i in 0..31 {
        let close = 100.0 + i as f64;
        storage
            .store_candle(&Candle {
                timestamp: i * 60_000,
                open: close,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: 10.0,
                quote_volume: None,
            })
            .await
            .unwrap();
    }
    for (i, ratio) in [1.0, 1.2, 1.5].into_iter().enumerate() {
        storage
            .store_ratio(&RatioSample {
                timestamp: i as i64,
                long_ratio: 0.5,
                short_ratio: 0.5,
                long_short_ratio: ratio,
            })
            .await
            .unwrap();
    }
    storage
}

#[tokio::test]
async fn test_paper_pipeline_enters_from_warm_cache() {
    let _ = tracing_subscriber::fmt::try_init();

    println!("=== Paper pipeline ===");
    let settings = offline_settings();
    let client = Arc::new(BitgetClient::new(&settings.exchange));
    let storage = seeded_storage().await;
    let paper = Arc::new(PaperExecutor::new(1_000.0));

    let mut pipeline = Pipeline::new(settings, client.clone(), storage.clone(), paper.clone());
    pipeline.register_observer(paper.clone());

    // Rising open interest pushes OI-RSI to overbought
    for i in 0..20 {
        pipeline
            .cache()
            .admit_open_interest(OpenInterestSample {
                timestamp: i,
                value: 1_000.0 + i as f64 * 10.0,
            })
            .unwrap();
    }

    let mut phase = pipeline.engine().subscribe_phase();
    pipeline.start().await.unwrap();
    assert!(pipeline.is_running());
    println!("   started, waiting for entry");

    tokio::time::timeout(
        Duration::from_secs(5),
        phase.wait_for(|p| *p == EnginePhase::InPosition),
    )
    .await
    .expect("engine never entered")
    .unwrap();

    let (candles, _, ratios) = pipeline.cache().lens().unwrap();
    assert_eq!(candles, 31);
    assert_eq!(ratios, 3);

    let position = paper.get_position("BTCUSDT").await.unwrap().unwrap();
    assert_eq!(position.side, Side::Long);
    assert_eq!(position.entry_price, 130.0);

    let trades = storage.trades();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].entry_type, "trend_follow");
    println!("   entered {} {} @ {}", position.side, position.size, position.entry_price);

    let started = Instant::now();
    pipeline.stop().await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!pipeline.is_running());
    assert!(client.is_closed());
    assert!(pipeline.observers().is_empty());

    // Stopping twice is harmless
    pipeline.stop().await;
    println!("=== Done ===");
}

#[tokio::test]
async fn test_pipeline_without_data_stays_flat() {
    let settings = offline_settings();
    let client = Arc::new(BitgetClient::new(&settings.exchange));
    let storage = Arc::new(MemoryStorage::default());
    let paper = Arc::new(PaperExecutor::new(1_000.0));

    let mut pipeline = Pipeline::new(settings, client, storage.clone(), paper.clone());
    pipeline.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(pipeline.engine().phase(), EnginePhase::Flat);
    assert_eq!(paper.orders_placed(), 0);

    pipeline.stop().await;
    assert!(storage.trades().is_empty());
}
