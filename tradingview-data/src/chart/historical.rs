use crate::{
    chart::{ChartEvent, ChartSession, MarketOptions, period::Bar},
    error::Error,
};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

/// Upper bound on waiting for the first bars of a historical fetch.
pub const HISTORICAL_TIMEOUT: Duration = Duration::from_secs(15);

/// Translate `15m` / `4h` shorthand into TradingView resolutions, eg/ `"15"`, `"240"`.
/// Anything else (`"1D"`, `"1W"`, `"60"`) passes through.
pub fn normalize_timeframe(timeframe: &str) -> String {
    if let Some(minutes) = timeframe.strip_suffix('m') {
        if minutes.parse::<u32>().is_ok() {
            return minutes.to_string();
        }
    }

    if let Some(hours) = timeframe.strip_suffix('h') {
        if let Some(minutes) = hours.parse::<u32>().ok().and_then(|hours| hours.checked_mul(60)) {
            return minutes.to_string();
        }
    }

    timeframe.to_string()
}

impl ChartSession {
    /// Load `count` bars of `symbol` and return them oldest first.
    ///
    /// Resolves on the first update that leaves the chart with bars. After
    /// [`HISTORICAL_TIMEOUT`] whatever has arrived is returned, or [`Error::Timeout`] if
    /// nothing has. A chart error reported while waiting is returned as `Err`.
    pub async fn get_historical_data(
        &self,
        symbol: &str,
        timeframe: &str,
        count: i64,
    ) -> Result<Vec<Bar>, Error> {
        let events = self.subscribe();
        let timeframe = normalize_timeframe(timeframe);
        debug!(symbol, %timeframe, count, "fetching historical bars");

        self.set_market(symbol, MarketOptions::new(timeframe.clone(), count))
            .await;

        let bars = wait_for_bars(events, || self.bars(), HISTORICAL_TIMEOUT, symbol).await?;
        info!(symbol, %timeframe, bars = bars.len(), "fetched historical bars");

        Ok(bars)
    }
}

/// Wait for a [`ChartEvent::Update`] after which `snapshot` is non-empty.
pub(crate) async fn wait_for_bars<F>(
    mut events: broadcast::Receiver<ChartEvent>,
    snapshot: F,
    timeout: Duration,
    symbol: &str,
) -> Result<Vec<Bar>, Error>
where
    F: Fn() -> Vec<Bar>,
{
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(ChartEvent::Update(_)) => {
                    let bars = snapshot();
                    if !bars.is_empty() {
                        return Ok(bars);
                    }
                }
                Ok(ChartEvent::Error(error)) => return Err(error),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "historical fetch lagged behind chart events");
                }
                Err(RecvError::Closed) => break,
            },
            _ = &mut deadline => break,
        }
    }

    let bars = snapshot();
    if bars.is_empty() {
        return Err(Error::Timeout {
            symbol: symbol.to_string(),
        });
    }

    warn!(
        symbol,
        bars = bars.len(),
        "historical fetch timed out, returning partial data"
    );
    Ok(bars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::period::Period;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn bar(time: f64) -> Bar {
        Bar::from(&Period {
            time,
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: 10.0,
        })
    }

    #[test]
    fn test_normalize_timeframe() {
        struct TestCase {
            input: &'static str,
            expected: &'static str,
        }

        let tests = vec![
            TestCase {
                // TC0: minutes
                input: "15m",
                expected: "15",
            },
            TestCase {
                // TC1: hours
                input: "4h",
                expected: "240",
            },
            TestCase {
                // TC2: daily passes through
                input: "1D",
                expected: "1D",
            },
            TestCase {
                // TC3: native resolution passes through
                input: "60",
                expected: "60",
            },
            TestCase {
                // TC4: non numeric prefix passes through
                input: "xm",
                expected: "xm",
            },
            TestCase {
                // TC5: hours that overflow in minutes pass through
                input: "4000000000h",
                expected: "4000000000h",
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = normalize_timeframe(test.input);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_bars_returns_on_first_populated_update() {
        let (tx, rx) = broadcast::channel(16);
        let bars = Arc::new(Mutex::new(Vec::new()));

        let store = bars.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let _ = tx.send(ChartEvent::Update(vec!["$prices".to_string()]));
            tokio::time::sleep(Duration::from_secs(1)).await;
            store.lock().push(bar(1700000000.0));
            let _ = tx.send(ChartEvent::Update(vec!["$prices".to_string()]));
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let started = tokio::time::Instant::now();
        let actual = wait_for_bars(rx, || bars.lock().clone(), HISTORICAL_TIMEOUT, "X").await;

        assert_eq!(actual, Ok(vec![bar(1700000000.0)]));
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_bars_timeout() {
        struct TestCase {
            input: Vec<Bar>,
            expected: Result<Vec<Bar>, Error>,
        }

        let tests = vec![
            TestCase {
                // TC0: partial data is returned on timeout
                input: vec![bar(1700000000.0), bar(1700000060.0)],
                expected: Ok(vec![bar(1700000000.0), bar(1700000060.0)]),
            },
            TestCase {
                // TC1: no data on timeout is an error
                input: vec![],
                expected: Err(Error::Timeout {
                    symbol: "BINANCE:BTCUSDT".to_string(),
                }),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            // Sender kept alive so the wait runs until the deadline
            let (_tx, rx) = broadcast::channel::<ChartEvent>(16);
            let bars = test.input.clone();

            let started = tokio::time::Instant::now();
            let actual =
                wait_for_bars(rx, || bars.clone(), HISTORICAL_TIMEOUT, "BINANCE:BTCUSDT").await;

            assert_eq!(actual, test.expected, "TC{} failed", index);
            assert_eq!(started.elapsed(), HISTORICAL_TIMEOUT, "TC{} failed", index);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_bars_error_event() {
        let (tx, rx) = broadcast::channel(16);
        let _ = tx.send(ChartEvent::Error(Error::Symbol {
            series: "ser_1".to_string(),
            reason: "invalid symbol".to_string(),
        }));

        let actual = wait_for_bars(rx, Vec::new, HISTORICAL_TIMEOUT, "NOPE").await;
        assert_eq!(
            actual,
            Err(Error::Symbol {
                series: "ser_1".to_string(),
                reason: "invalid symbol".to_string(),
            })
        );
    }
}
