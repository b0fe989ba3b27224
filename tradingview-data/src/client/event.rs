use crate::{client::health::HealthReport, error::Error, protocol::Frame};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Lifecycle of the underlying socket.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default, Deserialize, Serialize, Display)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Reconnection gave up after exhausting the configured retries.
    Failed,
}

/// Connection level events fanned out to every [`Client::subscribe`](super::Client::subscribe)
/// receiver. Frames routed to a registered session are not repeated here.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected,
    Disconnected,
    /// First connection level payload after connecting, eg/ the server hello.
    Logged(Value),
    Ping(u64),
    /// Connection level frame that matched no registered session.
    Data(Frame),
    Error(Error),
    StateChanged(ConnectionState),
    /// Periodic health check, see [`ClientConfig::health_check_interval`](super::ClientConfig::health_check_interval).
    Health(HealthReport),
}

/// Point in time snapshot of a [`Client`](super::Client).
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionStatus {
    pub is_open: bool,
    pub is_logged: bool,
    pub state: ConnectionState,
    pub server: String,
    pub heartbeat_running: bool,
    pub heartbeat_interval: Duration,
    pub active_sessions: usize,
    pub queued_packets: usize,
    pub reconnect_attempts: u32,
    pub health: HealthReport,
}
