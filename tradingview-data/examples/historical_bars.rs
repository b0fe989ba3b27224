use tradingview_data::{
    chart::ChartSession,
    client::{Client, ClientConfig, ClientEvent},
};
use tracing::{info, warn};

#[tokio::main]
async fn main() {
    // Initialise INFO Tracing log subscriber
    init_logging();

    // Credentials are read from TV_SESSION / TV_SIGNATURE / TV_AUTH_TOKEN when present
    let client = Client::new(ClientConfig::from_env());
    let mut events = client.subscribe();

    if !client.connect().await {
        while let Ok(event) = events.try_recv() {
            if let ClientEvent::Error(error) = event {
                warn!(%error, "failed to connect to TradingView");
            }
        }
        return;
    }

    let chart = ChartSession::new(&client).await;

    for (symbol, timeframe) in [("BINANCE:BTCUSDT", "1D"), ("BINANCE:ETHUSDT", "4h")] {
        match chart.get_historical_data(symbol, timeframe, 10).await {
            Ok(bars) => {
                for bar in bars {
                    info!(
                        symbol,
                        time = %bar.time,
                        open = bar.open,
                        high = bar.high,
                        low = bar.low,
                        close = bar.close,
                        volume = bar.volume,
                        "bar"
                    );
                }
            }
            Err(error) => warn!(symbol, %error, "historical fetch failed"),
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
        // Disable colours on release builds
        .with_ansi(cfg!(debug_assertions))
        // Install this Tracing subscriber as global default
        .init()
}
