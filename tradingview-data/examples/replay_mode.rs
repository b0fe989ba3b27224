use std::time::Duration;
use tradingview_data::{
    chart::{ChartEvent, ChartSession, MarketOptions},
    client::{Client, ClientConfig},
};
use tracing::{info, warn};

/// 2024-01-01T00:00:00Z
const REPLAY_FROM: i64 = 1_704_067_200;

#[tokio::main]
async fn main() {
    // Initialise INFO Tracing log subscriber
    init_logging();

    let client = Client::new(ClientConfig::from_env());
    if !client.connect().await {
        warn!("failed to connect to TradingView");
        return;
    }

    let chart = ChartSession::new(&client).await;
    let mut events = chart.subscribe();

    chart
        .set_market(
            "BINANCE:BTCUSDT",
            MarketOptions::new("240", 50).with_replay(REPLAY_FROM),
        )
        .await;

    // Wait for the initial bars before stepping
    let loaded = tokio::time::timeout(Duration::from_secs(15), async {
        while let Ok(event) = events.recv().await {
            match event {
                ChartEvent::Update(_) if !chart.periods().is_empty() => return true,
                ChartEvent::Error(error) => {
                    warn!(%error, "replay chart error");
                    return false;
                }
                _ => {}
            }
        }
        false
    })
    .await
    .unwrap_or(false);

    if loaded {
        for _ in 0..5 {
            if let Err(error) = chart.replay_step(1).await {
                warn!(%error, "replay step failed");
                break;
            }

            if let Some(latest) = chart.bars().last() {
                info!(time = %latest.time, close = latest.close, "replayed bar");
            }
        }
    }

    chart.remove().await;
    client.end().await;
}

fn init_logging() {
    tracing_subscriber::fmt()
        // Filter messages based on the INFO
        .with_env_filter(
            tracing_subscriber::filter::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        // Enable colours
        .with_ansi(true)
        // Use compact formatting for better readability with colored output
        .compact()
        // Install this Tracing subscriber as global default
        .init()
}
