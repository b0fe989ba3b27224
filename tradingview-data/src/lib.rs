//! # TradingView Data
//! Client for the TradingView chart data feed. One WebSocket carries any number of
//! logical sessions, each identified by a generated id:
//! - **Chart** sessions bind a symbol and timeframe to a server side series and keep the
//!   decoded OHLCV history, with an optional **replay** sub-session.
//! - **Study** sessions attach a built-in or Pine indicator to a chart and decode its
//!   plots, drawings and strategy report.
//! - **Quote** sessions stream snapshot fields for a set of symbols.
//!
//! ## Example
//! ```rust,no_run
//! use tradingview_data::{
//!     chart::{ChartSession, MarketOptions},
//!     client::{Client, ClientConfig},
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = Client::new(ClientConfig::from_env());
//!     if !client.connect().await {
//!         return;
//!     }
//!
//!     let chart = ChartSession::new(&client).await;
//!     let bars = chart.get_historical_data("BINANCE:BTCUSDT", "1D", 10).await;
//!     println!("{bars:?}");
//!
//!     chart.remove().await;
//!     client.end().await;
//! }
//! ```

/// Resolve browser session cookies into a socket auth token.
pub mod auth;

/// Chart sessions, market binding, replay and historical fetches.
pub mod chart;

/// Socket connection, session registry, heartbeat and reconnection.
pub mod client;

/// All [`Error`](error::Error)s generated in TradingView Data.
pub mod error;

/// Built-in and Pine indicator definitions sent with `create_study`.
pub mod indicator;

/// `~m~` frame codec.
pub mod protocol;

/// Quote sessions streaming symbol snapshots.
pub mod quote;

/// Stream wrappers applied to the socket read half.
pub mod streams;

/// Study sessions decoding indicator output.
pub mod study;

pub mod util;

pub use client::{Client, ClientConfig, ClientEvent};
pub use error::Error;
