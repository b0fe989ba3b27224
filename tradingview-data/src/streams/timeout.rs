//! Read-idle watchdog for the chart socket.
//!
//! TradingView keeps a healthy socket busy with `~h~` heartbeats, so a read half that goes
//! quiet for long enough is treated as half-open. The wrapped stream then yields a single
//! timed-out I/O error and ends, which the receive loop classifies as terminal.

use futures::Stream;
use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use tokio::time::{Instant, Sleep};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};

/// Default read-idle window (2 minutes).
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(120);

/// Stream wrapper that fails with [`io::ErrorKind::TimedOut`] when the inner stream yields
/// nothing for `timeout_duration`, then terminates.
#[derive(Debug)]
pub struct TimeoutStream<S> {
    inner: S,
    timeout_duration: Duration,
    deadline: Pin<Box<Sleep>>,
    expired: bool,
}

impl<S> TimeoutStream<S> {
    pub fn new(inner: S, timeout_duration: Duration) -> Self {
        Self {
            inner,
            timeout_duration,
            deadline: Box::pin(tokio::time::sleep(timeout_duration)),
            expired: false,
        }
    }

    pub fn with_default_timeout(inner: S) -> Self {
        Self::new(inner, DEFAULT_READ_TIMEOUT)
    }
}

impl<S> Stream for TimeoutStream<S>
where
    S: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    type Item = Result<WsMessage, WsError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.expired {
            return Poll::Ready(None);
        }

        let timeout_duration = self.timeout_duration;

        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(item)) => {
                self.deadline.as_mut().reset(Instant::now() + timeout_duration);
                Poll::Ready(Some(item))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => match self.deadline.as_mut().poll(cx) {
                Poll::Ready(()) => {
                    tracing::warn!(
                        timeout_secs = timeout_duration.as_secs(),
                        "TradingView socket read timeout, no data received"
                    );
                    self.expired = true;

                    Poll::Ready(Some(Err(WsError::Io(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!(
                            "read timeout: no data received for {} seconds",
                            timeout_duration.as_secs()
                        ),
                    )))))
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use futures::{StreamExt, stream};

    #[tokio::test(start_paused = true)]
    async fn test_timeout_stream_expires_when_idle() {
        let idle = stream::pending::<Result<WsMessage, WsError>>();
        let mut stream = TimeoutStream::new(idle, Duration::from_secs(5));

        let started = Instant::now();
        let error = match stream.next().await {
            Some(Err(error)) => Error::from(error),
            other => panic!("expected timeout error, got {other:?}"),
        };

        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(error.is_terminal());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_stream_passes_items_through() {
        let items = stream::iter(vec![
            Ok(WsMessage::text("~m~4~m~~h~1")),
            Ok(WsMessage::text("~m~4~m~~h~2")),
        ]);
        let mut stream = TimeoutStream::with_default_timeout(items);

        assert_eq!(
            stream.next().await.map(|item| item.ok()),
            Some(Some(WsMessage::text("~m~4~m~~h~1")))
        );
        assert_eq!(
            stream.next().await.map(|item| item.ok()),
            Some(Some(WsMessage::text("~m~4~m~~h~2")))
        );
        assert!(stream.next().await.is_none());
    }
}
