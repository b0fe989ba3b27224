use crate::{
    client::{ClientEvent, ClientInner, config::MIN_INTERVAL},
    protocol::encode_ping,
    util::epoch_millis,
};
use std::{
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::{
    sync::mpsc,
    time::{MissedTickBehavior, interval},
};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};

enum Tick {
    App,
    Transport,
    Health,
}

/// Keep the socket alive with two independent pings and detect when it has died.
///
/// Every `app_interval` a framed `~h~{epoch millis}` is written, and every
/// `transport_interval` a WebSocket transport ping. Every `health_interval` a
/// [`ClientEvent::Health`] is emitted, and an unhealthy socket is closed when reconnection
/// is enabled. A tick that finds the socket closed signals `failures` (when a supervisor
/// is listening) and stops. A ping that fails to send force-closes the socket so the next
/// tick short-circuits. Intervals below [`MIN_INTERVAL`] are raised to it.
pub(crate) async fn run_heartbeat(
    client: Weak<ClientInner>,
    app_interval: Duration,
    transport_interval: Duration,
    health_interval: Duration,
    failures: Option<mpsc::UnboundedSender<()>>,
) {
    let mut app = interval(app_interval.max(MIN_INTERVAL));
    let mut transport = interval(transport_interval.max(MIN_INTERVAL));
    let mut health = interval(health_interval.max(MIN_INTERVAL));
    for timer in [&mut app, &mut transport, &mut health] {
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        timer.tick().await;
    }

    loop {
        let tick = tokio::select! {
            _ = app.tick() => Tick::App,
            _ = transport.tick() => Tick::Transport,
            _ = health.tick() => Tick::Health,
        };

        let Some(client) = client.upgrade() else {
            return;
        };

        if !client.is_open() {
            debug!("heartbeat found socket closed, signalling supervisor");
            if let Some(failures) = &failures {
                let _ = failures.send(());
            }
            return;
        }

        let ping = match tick {
            Tick::App => WsMessage::text(encode_ping(epoch_millis())),
            Tick::Transport => {
                client.health.record_ping();
                WsMessage::Ping(Vec::new().into())
            }
            Tick::Health => {
                check_health(&client).await;
                continue;
            }
        };

        if let Err(error) = client.write(ping).await {
            warn!(%error, "heartbeat ping failed, closing socket");
            client.emit_transport_error(error);
            force_close(&client).await;
        }
    }
}

async fn check_health(client: &Arc<ClientInner>) {
    let report = client.health_report();
    debug!(?report, "TradingView connection health");
    client.emit(ClientEvent::Health(report.clone()));

    if !report.is_healthy && client.config.reconnect.enabled {
        warn!(
            error_count = report.error_count,
            average_latency = ?report.average_latency,
            "unhealthy TradingView connection, closing socket"
        );
        force_close(client).await;
    }
}

async fn force_close(client: &Arc<ClientInner>) {
    client.mark_closed();
    client.close_sink().await;
}
