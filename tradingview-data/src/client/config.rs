use crate::auth::Auth;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Smallest heartbeat, ping or health check period. Shorter values are raised to this.
pub const MIN_INTERVAL: Duration = Duration::from_millis(100);

/// TradingView data server the socket connects to, `wss://{server}.tradingview.com`.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Hash, Default, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "snake_case")]
pub enum DataServer {
    #[default]
    #[display("data")]
    Data,
    #[display("prodata")]
    ProData,
    #[display("widgetdata")]
    WidgetData,
    #[display("mobile-data")]
    MobileData,
}

impl DataServer {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "data" => Some(Self::Data),
            "prodata" => Some(Self::ProData),
            "widgetdata" => Some(Self::WidgetData),
            "mobile-data" | "mobiledata" => Some(Self::MobileData),
            _ => None,
        }
    }
}

/// Reconnection policy applied by the connection supervisor.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    pub enabled: bool,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Add uniform jitter of up to 10% of the computed delay.
    pub jitter: bool,
    /// Give up and transition to `Failed` after this many consecutive failures.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
            jitter: true,
            max_retries: None,
        }
    }
}

impl ReconnectConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// [`Client`](super::Client) configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server: DataServer,
    pub auth: Auth,
    /// Base URL used to resolve session cookies into an auth token.
    pub location: String,
    pub connect_timeout: Duration,
    /// Application level `~h~` heartbeat interval.
    pub heartbeat_interval: Duration,
    /// WebSocket transport ping interval.
    pub transport_ping_interval: Duration,
    /// How often connection health is reported as [`ClientEvent::Health`](super::ClientEvent::Health).
    pub health_check_interval: Duration,
    /// Close the read stream when nothing arrives within this window.
    pub read_timeout: Duration,
    /// Upper bound on waiting for a correlated response, eg/ `replay_ok`.
    pub request_timeout: Duration,
    pub event_buffer_size: usize,
    pub reconnect: ReconnectConfig,
    /// Socket URL used instead of the configured server, eg/ a local relay.
    pub endpoint: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: DataServer::default(),
            auth: Auth::Anonymous,
            location: "https://www.tradingview.com".to_string(),
            connect_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(10),
            transport_ping_interval: Duration::from_secs(8),
            health_check_interval: Duration::from_secs(30),
            read_timeout: Duration::from_secs(120),
            request_timeout: Duration::from_secs(30),
            event_buffer_size: 1024,
            reconnect: ReconnectConfig::default(),
            endpoint: None,
        }
    }
}

impl ClientConfig {
    pub fn new(server: DataServer) -> Self {
        Self {
            server,
            ..Default::default()
        }
    }

    /// Build a configuration from `TV_SERVER`, `TV_AUTH_TOKEN`, `TV_SESSION` and
    /// `TV_SIGNATURE`, falling back to defaults for anything unset.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let server = match non_empty("TV_SERVER") {
            Some(name) => DataServer::parse(&name).unwrap_or_else(|| {
                warn!(server = %name, "unknown TV_SERVER, using default data server");
                DataServer::default()
            }),
            None => DataServer::default(),
        };

        let auth = match (non_empty("TV_SESSION"), non_empty("TV_AUTH_TOKEN")) {
            (Some(session_id), _) => Auth::Session {
                session_id,
                signature: non_empty("TV_SIGNATURE").unwrap_or_default(),
            },
            (None, Some(token)) => Auth::Token(token),
            (None, None) => Auth::Anonymous,
        };

        Self::new(server).with_auth(auth)
    }

    /// WebSocket endpoint for the configured server.
    pub fn url(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!(
                "wss://{}.tradingview.com/socket.io/websocket?type=chart",
                self.server
            ),
        }
    }

    pub fn with_auth(mut self, auth: Auth) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval.max(MIN_INTERVAL);
        self
    }

    pub fn with_transport_ping_interval(mut self, interval: Duration) -> Self {
        self.transport_ping_interval = interval.max(MIN_INTERVAL);
        self
    }

    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval.max(MIN_INTERVAL);
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = size;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}
