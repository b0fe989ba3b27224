use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors generated in `tradingview-data`.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Error)]
pub enum Error {
    #[error("TransportError: {0}")]
    Transport(String),

    #[error("ProtocolError: {0}")]
    Protocol(String),

    #[error("symbol error for series {series}: {reason}")]
    Symbol { series: String, reason: String },

    #[error("series error: {0}")]
    Series(String),

    #[error("critical error: {name} {description}")]
    Critical { name: String, description: String },

    #[error("study error: {0}")]
    Study(String),

    #[error("quote error for {symbol}: {reason}")]
    Quote { symbol: String, reason: String },

    #[error("no response received for request {request} within {timeout_ms}ms")]
    CorrelationTimeout { request: String, timeout_ms: u64 },

    #[error("connection closed before request completed")]
    ConnectionClosed,

    #[error("no replay session is active")]
    NoReplaySession,

    #[error("a market must be set before a series can be bound")]
    MarketNotSet,

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("failed to decode compressed payload: {0}")]
    Compressed(String),

    #[error("indicator error: {0}")]
    Indicator(String),

    #[error("timed out fetching {symbol} with no data received")]
    Timeout { symbol: String },
}

impl Error {
    /// Determine if an error means the socket is dead and the connection must be re-established.
    #[allow(clippy::match_like_matches_macro)]
    pub fn is_terminal(&self) -> bool {
        match self {
            Error::ConnectionClosed => true,
            Error::Transport(error_msg) => {
                let error_lower = error_msg.to_lowercase();
                error_lower.contains("terminated")
                    || error_lower.contains("connection closed")
                    || error_lower.contains("closed connection")
                    || error_lower.contains("sending after closing")
                    || error_lower.contains("io error")
                    || error_lower.contains("protocol error")
                    || error_lower.contains("timeout")
            }
            _ => false,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(value.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Self::Auth(value.to_string())
    }
}
