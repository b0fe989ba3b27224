use crate::{
    chart::{ChartEvent, ChartInner, ChartSession},
    error::Error,
    protocol::Message,
    util::gen_session_id,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::{collections::HashMap, time::Duration};
use tokio::sync::oneshot;
use tracing::debug;

/// Waiters for correlated `replay_ok` acknowledgements, keyed by request id.
#[derive(Debug, Default)]
pub(crate) struct PendingRequests {
    waiters: Mutex<HashMap<String, oneshot::Sender<Result<(), Error>>>>,
}

impl PendingRequests {
    pub(crate) fn register(&self, request_id: &str) -> oneshot::Receiver<Result<(), Error>> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().insert(request_id.to_string(), tx);
        rx
    }

    /// Complete the waiter for `request_id`. Returns `false` if nothing was waiting.
    pub(crate) fn resolve(&self, request_id: &str, result: Result<(), Error>) -> bool {
        match self.waiters.lock().remove(request_id) {
            Some(waiter) => {
                let _ = waiter.send(result);
                true
            }
            None => false,
        }
    }

    pub(crate) fn fail_all(&self, error: Error) {
        let waiters: Vec<_> = self.waiters.lock().drain().collect();
        for (request_id, waiter) in waiters {
            debug!(%request_id, %error, "failing pending replay request");
            let _ = waiter.send(Err(error.clone()));
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    /// Wait for the acknowledgement of `request_id`, failing after `timeout`.
    pub(crate) async fn wait(
        &self,
        request_id: &str,
        response: oneshot::Receiver<Result<(), Error>>,
        timeout: Duration,
    ) -> Result<(), Error> {
        match tokio::time::timeout(timeout, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                self.waiters.lock().remove(request_id);
                Err(Error::CorrelationTimeout {
                    request: request_id.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }
}

impl ChartSession {
    /// Advance the replay by `number` bars, resolving once the server acknowledges.
    pub async fn replay_step(&self, number: u32) -> Result<(), Error> {
        self.inner
            .replay_request("replay_step", "rsq_step", Some(json!(number)))
            .await
    }

    /// Start automatic replay, one bar every `interval_ms`.
    pub async fn replay_start(&self, interval_ms: u64) -> Result<(), Error> {
        self.inner
            .replay_request("replay_start", "rsq_start", Some(json!(interval_ms)))
            .await
    }

    pub async fn replay_stop(&self) -> Result<(), Error> {
        self.inner
            .replay_request("replay_stop", "rsq_stop", None)
            .await
    }

    pub fn is_replay_active(&self) -> bool {
        self.inner.state.read().replay_active
    }
}

impl ChartInner {
    async fn replay_request(
        &self,
        command: &str,
        prefix: &str,
        argument: Option<Value>,
    ) -> Result<(), Error> {
        if !self.state.read().replay_active {
            self.emit_error(Error::NoReplaySession);
            return Err(Error::NoReplaySession);
        }

        let request_id = gen_session_id(prefix);
        let response = self.pending.register(&request_id);

        let mut args = vec![json!(self.replay_session_id), json!(request_id)];
        args.extend(argument);
        self.client.send(command, args).await;

        self.pending
            .wait(
                &request_id,
                response,
                self.client.config().request_timeout,
            )
            .await
    }

    pub(super) fn on_replay_frame(&self, message: &Message) -> Result<(), Error> {
        match message.kind.as_str() {
            "replay_ok" => {
                if let Some(request_id) = message.arg_str(1) {
                    if !self.pending.resolve(request_id, Ok(())) {
                        debug!(%request_id, "replay_ok without a pending request");
                    }
                }
            }
            "replay_instance_id" => {
                let instance = message.arg_str(1).unwrap_or_default().to_string();
                self.emit(ChartEvent::ReplayLoaded(instance));
            }
            "replay_point" => {
                let point = message.arg(1).cloned().unwrap_or(Value::Null);
                self.emit(ChartEvent::ReplayPoint(point));
            }
            "replay_resolutions" => {
                self.emit(ChartEvent::ReplayResolution {
                    resolutions: message.arg(1).cloned().unwrap_or(Value::Null),
                    current: message.arg(2).cloned().unwrap_or(Value::Null),
                });
            }
            "replay_data_end" => self.emit(ChartEvent::ReplayEnd),
            "critical_error" => {
                let (name, description) = critical_error_parts(message);
                self.emit_error(Error::Critical { name, description });
            }
            other => debug!(kind = other, "ignoring replay message"),
        }

        Ok(())
    }
}

pub(super) fn critical_error_parts(message: &Message) -> (String, String) {
    let text = |index: usize| match message.arg(index) {
        Some(Value::String(text)) => text.clone(),
        Some(value) => value.to_string(),
        None => String::new(),
    };

    (text(1), text(2))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pending_requests_resolve() {
        let pending = PendingRequests::default();
        let response = pending.register("rsq_step_1");

        assert!(pending.resolve("rsq_step_1", Ok(())));
        assert!(!pending.resolve("rsq_step_1", Ok(())));
        assert_eq!(
            pending
                .wait("rsq_step_1", response, Duration::from_secs(1))
                .await,
            Ok(())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_requests_timeout() {
        let pending = PendingRequests::default();
        let response = pending.register("rsq_stop_1");

        let result = pending
            .wait("rsq_stop_1", response, Duration::from_secs(30))
            .await;

        assert_eq!(
            result,
            Err(Error::CorrelationTimeout {
                request: "rsq_stop_1".to_string(),
                timeout_ms: 30_000,
            })
        );
        assert_eq!(pending.len(), 0);
    }

    #[tokio::test]
    async fn test_pending_requests_fail_all() {
        let pending = PendingRequests::default();
        let first = pending.register("a");
        let second = pending.register("b");

        pending.fail_all(Error::ConnectionClosed);

        assert_eq!(first.await, Ok(Err(Error::ConnectionClosed)));
        assert_eq!(second.await, Ok(Err(Error::ConnectionClosed)));
        assert_eq!(pending.len(), 0);
    }
}
