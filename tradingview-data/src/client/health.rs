use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{collections::VecDeque, time::Duration};
use tokio::time::Instant;

/// Average round trip above which the connection is unhealthy.
pub const MAX_AVERAGE_LATENCY: Duration = Duration::from_secs(5);

/// Transport errors tolerated since the last reconnect.
pub const MAX_ERRORS: u32 = 5;

/// Uptime before a silent pong stream counts against health.
pub const PONG_GRACE: Duration = Duration::from_secs(60);

const LATENCY_HISTORY: usize = 100;

/// Uptime that earns the full stability share of the quality score.
const FULL_STABILITY: Duration = Duration::from_secs(3600);

/// Point in time health of the socket.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct HealthReport {
    pub is_healthy: bool,
    /// 0.0 (down) to 1.0, weighted 40% latency, 30% errors and 30% uptime.
    pub quality_score: f64,
    /// Mean transport ping round trip over the last 100 pongs.
    pub average_latency: Option<Duration>,
    pub error_count: u32,
    pub total_reconnects: u32,
    pub uptime: Duration,
}

#[derive(Debug, Default)]
struct HealthState {
    connected_at: Option<Instant>,
    last_ping: Option<Instant>,
    last_pong: Option<Instant>,
    latencies: VecDeque<Duration>,
    error_count: u32,
    total_reconnects: u32,
}

/// Ping/pong latency, error and reconnect bookkeeping for one [`Client`](super::Client).
#[derive(Debug, Default)]
pub(crate) struct HealthMonitor {
    state: Mutex<HealthState>,
}

impl HealthMonitor {
    pub(crate) fn record_connected(&self) {
        let mut state = self.state.lock();
        state.connected_at = Some(Instant::now());
        state.last_ping = None;
        state.last_pong = None;
    }

    pub(crate) fn record_disconnected(&self) {
        let mut state = self.state.lock();
        state.connected_at = None;
        state.last_ping = None;
    }

    pub(crate) fn record_ping(&self) {
        self.state.lock().last_ping = Some(Instant::now());
    }

    /// Returns the round trip of the outstanding ping, if there is one.
    pub(crate) fn record_pong(&self) -> Option<Duration> {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.last_pong = Some(now);

        let latency = now.duration_since(state.last_ping.take()?);
        if state.latencies.len() == LATENCY_HISTORY {
            state.latencies.pop_front();
        }
        state.latencies.push_back(latency);
        Some(latency)
    }

    pub(crate) fn record_error(&self) {
        self.state.lock().error_count += 1;
    }

    /// Count a successful reconnect and start the error budget afresh.
    pub(crate) fn record_reconnect(&self) {
        let mut state = self.state.lock();
        state.total_reconnects += 1;
        state.error_count = 0;
    }

    /// `connected` is whether the socket is open and the client in `Connected`. A pong
    /// older than `pong_timeout` fails the check once the connection is past [`PONG_GRACE`].
    pub(crate) fn report(&self, connected: bool, pong_timeout: Duration) -> HealthReport {
        let now = Instant::now();
        let state = self.state.lock();

        let uptime = state
            .connected_at
            .map(|connected_at| now.duration_since(connected_at))
            .unwrap_or_default();

        let average_latency = (!state.latencies.is_empty()).then(|| {
            state.latencies.iter().sum::<Duration>() / state.latencies.len() as u32
        });

        let pong_stale = uptime > PONG_GRACE
            && state
                .last_pong
                .is_some_and(|last_pong| now.duration_since(last_pong) > pong_timeout);

        let is_healthy = connected
            && average_latency.is_none_or(|latency| latency <= MAX_AVERAGE_LATENCY)
            && state.error_count <= MAX_ERRORS
            && !pong_stale;

        HealthReport {
            is_healthy,
            quality_score: quality_score(connected, average_latency, state.error_count, uptime),
            average_latency,
            error_count: state.error_count,
            total_reconnects: state.total_reconnects,
            uptime,
        }
    }
}

fn quality_score(
    connected: bool,
    average_latency: Option<Duration>,
    error_count: u32,
    uptime: Duration,
) -> f64 {
    if !connected {
        return 0.0;
    }

    let latency = average_latency.map_or(1.0, |latency| {
        (1.0 - latency.as_secs_f64() / MAX_AVERAGE_LATENCY.as_secs_f64()).max(0.0)
    });
    let errors = (1.0 - f64::from(error_count) / f64::from(MAX_ERRORS)).max(0.0);
    let stability = (uptime.as_secs_f64() / FULL_STABILITY.as_secs_f64()).min(1.0);

    latency * 0.4 + errors * 0.3 + stability * 0.3
}
