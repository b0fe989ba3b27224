//! Chart sessions.
//!
//! A [`ChartSession`] binds a symbol and timeframe to a server side series (`ser_N`) and
//! keeps the decoded `$prices` bars. Each chart also owns a replay session id used for
//! replay mode commands, and forwards updates addressed to attached studies.

use crate::{
    client::{Client, SessionHandler},
    error::Error,
    protocol::Message,
    util::gen_session_id,
};
use parking_lot::RwLock;
use serde_json::{Map, Value, json};
use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Weak},
};
use tokio::sync::broadcast;
use tracing::{debug, error};

pub mod historical;
pub mod options;
pub mod period;
pub mod replay;

pub use options::{ChartType, MarketOptions, encode_range};
pub use period::{Bar, Period, SymbolInfo};

use replay::{PendingRequests, critical_error_parts};

const CHART_EVENT_BUFFER: usize = 256;

/// Events emitted by a [`ChartSession`].
#[derive(Debug, Clone, PartialEq)]
pub enum ChartEvent {
    SymbolLoaded,
    /// Keys of the `timescale_update`/`du` body, eg/ `$prices` or a study id.
    Update(Vec<String>),
    ReplayLoaded(String),
    ReplayPoint(Value),
    ReplayResolution { resolutions: Value, current: Value },
    ReplayEnd,
    Error(Error),
}

#[derive(Debug)]
struct ChartState {
    periods: BTreeMap<i64, Period>,
    indexes: BTreeMap<i64, f64>,
    infos: SymbolInfo,
    series: u32,
    series_created: bool,
    replay_active: bool,
    timezone: String,
}

impl Default for ChartState {
    fn default() -> Self {
        Self {
            periods: BTreeMap::new(),
            indexes: BTreeMap::new(),
            infos: SymbolInfo::default(),
            series: 0,
            series_created: false,
            replay_active: false,
            timezone: "Etc/UTC".to_string(),
        }
    }
}

/// Handle to a chart session. Cheap to clone, clones share the session.
#[derive(Debug, Clone)]
pub struct ChartSession {
    pub(crate) inner: Arc<ChartInner>,
}

pub(crate) struct ChartInner {
    client: Client,
    session_id: String,
    replay_session_id: String,
    state: RwLock<ChartState>,
    studies: RwLock<HashMap<String, Arc<dyn SessionHandler>>>,
    pending: PendingRequests,
    events: broadcast::Sender<ChartEvent>,
}

impl std::fmt::Debug for ChartInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChartInner")
            .field("session_id", &self.session_id)
            .field("replay_session_id", &self.replay_session_id)
            .field("state", &*self.state.read())
            .finish_non_exhaustive()
    }
}

/// Registered under both the chart and the replay session id.
struct ChartHandler {
    chart: Weak<ChartInner>,
}

impl SessionHandler for ChartHandler {
    fn on_frame(&self, message: &Message) -> Result<(), Error> {
        let Some(chart) = self.chart.upgrade() else {
            return Ok(());
        };

        if message.session_id() == Some(chart.replay_session_id.as_str()) {
            chart.on_replay_frame(message)
        } else {
            chart.on_chart_frame(message)
        }
    }

    fn on_disconnect(&self) {
        if let Some(chart) = self.chart.upgrade() {
            chart.pending.fail_all(Error::ConnectionClosed);
        }
    }
}

impl ChartSession {
    /// Register a new chart session on `client` and send `chart_create_session`.
    pub async fn new(client: &Client) -> Self {
        let (events, _) = broadcast::channel(CHART_EVENT_BUFFER);
        let inner = Arc::new(ChartInner {
            client: client.clone(),
            session_id: gen_session_id("cs"),
            replay_session_id: gen_session_id("rs"),
            state: RwLock::new(ChartState::default()),
            studies: RwLock::new(HashMap::new()),
            pending: PendingRequests::default(),
            events,
        });

        let handler: Arc<dyn SessionHandler> = Arc::new(ChartHandler {
            chart: Arc::downgrade(&inner),
        });
        client
            .registry()
            .register(inner.session_id.clone(), handler.clone());
        client
            .registry()
            .register(inner.replay_session_id.clone(), handler);

        client
            .send(
                "chart_create_session",
                vec![json!(inner.session_id), json!("")],
            )
            .await;

        Self { inner }
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn replay_session_id(&self) -> &str {
        &self.inner.replay_session_id
    }

    pub fn client(&self) -> &Client {
        &self.inner.client
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChartEvent> {
        self.inner.events.subscribe()
    }

    /// Periods newest first.
    pub fn periods(&self) -> Vec<Period> {
        self.inner
            .state
            .read()
            .periods
            .values()
            .rev()
            .copied()
            .collect()
    }

    /// Periods oldest first, with typed timestamps.
    pub fn bars(&self) -> Vec<Bar> {
        self.inner
            .state
            .read()
            .periods
            .values()
            .map(Bar::from)
            .collect()
    }

    pub fn infos(&self) -> SymbolInfo {
        self.inner.state.read().infos.clone()
    }

    /// Bar index to bar time, used to place study drawings.
    pub fn indexes(&self) -> BTreeMap<i64, f64> {
        self.inner.state.read().indexes.clone()
    }

    /// Tag of the most recently bound series, eg/ `ser_2`.
    pub fn series_tag(&self) -> Option<String> {
        let series = self.inner.state.read().series;
        (series > 0).then(|| format!("ser_{series}"))
    }

    pub fn timezone(&self) -> String {
        self.inner.state.read().timezone.clone()
    }

    /// Bind `symbol` to a fresh series, replacing any previously loaded bars.
    pub async fn set_market(&self, symbol: &str, options: MarketOptions) {
        let inner = &self.inner;
        let replay_was_active = {
            let mut state = inner.state.write();
            state.periods.clear();
            std::mem::replace(&mut state.replay_active, false)
        };

        if replay_was_active {
            inner
                .client
                .send("replay_delete_session", vec![json!(inner.replay_session_id)])
                .await;
        }

        if let Some(replay) = options.replay {
            inner.state.write().replay_active = true;
            inner
                .client
                .send(
                    "replay_create_session",
                    vec![json!(inner.replay_session_id)],
                )
                .await;
            inner
                .client
                .send(
                    "replay_add_series",
                    vec![
                        json!(inner.replay_session_id),
                        json!("req_replay_addseries"),
                        json!(format!("={}", options.symbol_init(symbol))),
                        json!(options.timeframe),
                    ],
                )
                .await;
            inner
                .client
                .send(
                    "replay_reset",
                    vec![
                        json!(inner.replay_session_id),
                        json!("req_replay_reset"),
                        json!(replay),
                    ],
                )
                .await;
        }

        let series = {
            let mut state = inner.state.write();
            state.series += 1;
            state.series
        };

        let chart_init = options.chart_init(symbol, &inner.replay_session_id);
        inner
            .client
            .send(
                "resolve_symbol",
                vec![
                    json!(inner.session_id),
                    json!(format!("ser_{series}")),
                    json!(format!("={chart_init}")),
                ],
            )
            .await;

        self.set_series(&options.timeframe, options.range, options.to)
            .await;
    }

    /// Point the current series at a new timeframe and range. The first call after the
    /// first `set_market` creates the series, later calls modify it.
    pub async fn set_series(&self, timeframe: &str, range: i64, reference: Option<i64>) {
        let inner = &self.inner;
        let bound = {
            let mut state = inner.state.write();
            if state.series == 0 {
                None
            } else {
                state.periods.clear();
                let created = std::mem::replace(&mut state.series_created, true);
                Some((state.series, created))
            }
        };

        let Some((series, created)) = bound else {
            inner.emit_error(Error::MarketNotSet);
            return;
        };

        let (command, range) = if created {
            ("modify_series", json!(""))
        } else {
            ("create_series", encode_range(range, reference))
        };

        inner
            .client
            .send(
                command,
                vec![
                    json!(inner.session_id),
                    json!("$prices"),
                    json!("s1"),
                    json!(format!("ser_{series}")),
                    json!(timeframe),
                    range,
                ],
            )
            .await;
    }

    pub async fn set_timezone(&self, timezone: &str) {
        self.inner.state.write().timezone = timezone.to_string();
        self.inner
            .client
            .send(
                "set_timezone",
                vec![json!(self.inner.session_id), json!(timezone)],
            )
            .await;
    }

    /// Request `number` more bars before the oldest loaded bar.
    pub async fn fetch_more(&self, number: u32) {
        self.inner
            .client
            .send(
                "request_more_data",
                vec![json!(self.inner.session_id), json!("$prices"), json!(number)],
            )
            .await;
    }

    /// Delete the chart (and its replay session) on the server and unregister it.
    pub async fn remove(&self) {
        let inner = &self.inner;
        let replay_was_active = std::mem::replace(&mut inner.state.write().replay_active, false);

        if replay_was_active {
            inner
                .client
                .send("replay_delete_session", vec![json!(inner.replay_session_id)])
                .await;
        }
        inner
            .client
            .send("chart_delete_session", vec![json!(inner.session_id)])
            .await;

        inner.client.registry().remove(&inner.session_id);
        inner.client.registry().remove(&inner.replay_session_id);
        inner.pending.fail_all(Error::ConnectionClosed);
    }

    pub(crate) fn register_study(&self, study_id: &str, handler: Arc<dyn SessionHandler>) {
        self.inner
            .studies
            .write()
            .insert(study_id.to_string(), handler);
    }

    pub(crate) fn unregister_study(&self, study_id: &str) {
        self.inner.studies.write().remove(study_id);
    }
}

impl ChartInner {
    pub(crate) fn emit(&self, event: ChartEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn emit_error(&self, error: Error) {
        if self.events.receiver_count() == 0 {
            error!(session = %self.session_id, %error, "chart session error");
            return;
        }
        self.emit(ChartEvent::Error(error));
    }

    fn study(&self, study_id: &str) -> Option<Arc<dyn SessionHandler>> {
        self.studies.read().get(study_id).cloned()
    }

    fn on_chart_frame(&self, message: &Message) -> Result<(), Error> {
        if let Some(study) = message.arg_str(1).and_then(|id| self.study(id)) {
            return study.on_frame(message);
        }

        match message.kind.as_str() {
            "symbol_resolved" => {
                let series = message.arg_str(1).unwrap_or_default();
                let Some(payload) = message.arg(2).and_then(Value::as_object) else {
                    return Err(Error::Protocol(
                        "symbol_resolved without symbol info".to_string(),
                    ));
                };

                self.state.write().infos = SymbolInfo::from_resolved(series, payload);
                self.emit(ChartEvent::SymbolLoaded);
            }
            "timescale_update" | "du" => {
                let Some(update) = message.arg(1).and_then(Value::as_object) else {
                    return Ok(());
                };

                let changes = self.apply_update(update, message);
                self.emit(ChartEvent::Update(changes));
            }
            "symbol_error" => self.emit_error(Error::Symbol {
                series: message.arg_str(1).unwrap_or_default().to_string(),
                reason: error_text(message.arg(2)),
            }),
            "series_error" => self.emit_error(Error::Series(error_text(message.arg(3)))),
            "critical_error" => {
                let (name, description) = critical_error_parts(message);
                self.emit_error(Error::Critical { name, description });
            }
            other => debug!(session = %self.session_id, kind = other, "ignoring chart message"),
        }

        Ok(())
    }

    /// Apply a `timescale_update`/`du` body and return its keys.
    fn apply_update(&self, update: &Map<String, Value>, message: &Message) -> Vec<String> {
        let mut changes = Vec::with_capacity(update.len());

        for (key, value) in update {
            changes.push(key.clone());

            if key == "$prices" {
                self.apply_prices(value);
                continue;
            }

            if let Some(study) = self.study(key) {
                if let Err(error) = study.on_frame(message) {
                    self.emit_error(error);
                }
            }
        }

        changes
    }

    fn apply_prices(&self, prices: &Value) {
        let Some(series) = prices.get("s").and_then(Value::as_array) else {
            return;
        };

        let mut state = self.state.write();
        for entry in series {
            let Some(values) = entry.get("v").and_then(Value::as_array) else {
                continue;
            };
            let Some(period) = Period::from_values(values) else {
                continue;
            };

            if let Some(index) = entry.get("i").and_then(Value::as_i64) {
                state.indexes.insert(index, period.time);
            }
            state.periods.insert(period.key(), period);
        }
    }
}

fn error_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(text)) => text.clone(),
        Some(value) => value.to_string(),
        None => "unknown error".to_string(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        client::ClientConfig,
        protocol::{Frame, decode, encode_message, frame},
    };

    pub(crate) fn sent(client: &Client) -> Vec<Message> {
        client
            .queued_packets()
            .iter()
            .flat_map(|packet| decode(packet))
            .filter_map(|frame| match frame {
                Frame::Message(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    fn drain(events: &mut broadcast::Receiver<ChartEvent>) -> Vec<ChartEvent> {
        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        seen
    }

    #[tokio::test]
    async fn test_new_registers_chart_and_replay_sessions() {
        let client = Client::new(ClientConfig::default());
        let chart = ChartSession::new(&client).await;

        assert!(chart.session_id().starts_with("cs_"));
        assert!(chart.replay_session_id().starts_with("rs_"));
        assert!(client.registry().contains(chart.session_id()));
        assert!(client.registry().contains(chart.replay_session_id()));
        assert_eq!(
            sent(&client),
            vec![Message::new(
                "chart_create_session",
                vec![json!(chart.session_id()), json!("")]
            )]
        );
    }

    #[tokio::test]
    async fn test_set_market_series_tags_increase() {
        let client = Client::new(ClientConfig::default());
        let chart = ChartSession::new(&client).await;
        let cs = chart.session_id().to_string();

        chart
            .set_market("BINANCE:BTCUSDT", MarketOptions::new("15", 100))
            .await;
        chart
            .set_market("BINANCE:ETHUSDT", MarketOptions::new("15", 100).with_to(1700000000))
            .await;

        assert_eq!(chart.series_tag().as_deref(), Some("ser_2"));
        assert_eq!(
            sent(&client)[1..],
            [
                Message::new(
                    "resolve_symbol",
                    vec![
                        json!(cs),
                        json!("ser_1"),
                        json!(r#"={"adjustment":"splits","symbol":"BINANCE:BTCUSDT"}"#),
                    ]
                ),
                Message::new(
                    "create_series",
                    vec![
                        json!(cs),
                        json!("$prices"),
                        json!("s1"),
                        json!("ser_1"),
                        json!("15"),
                        json!(100)
                    ]
                ),
                Message::new(
                    "resolve_symbol",
                    vec![
                        json!(cs),
                        json!("ser_2"),
                        json!(r#"={"adjustment":"splits","symbol":"BINANCE:ETHUSDT"}"#),
                    ]
                ),
                Message::new(
                    "modify_series",
                    vec![
                        json!(cs),
                        json!("$prices"),
                        json!("s1"),
                        json!("ser_2"),
                        json!("15"),
                        json!("")
                    ]
                ),
            ]
        );
    }

    #[tokio::test]
    async fn test_set_series_range_encoding() {
        struct TestCase {
            input: Option<i64>,
            expected: Value,
        }

        let tests = vec![
            TestCase {
                // TC0: bare count
                input: None,
                expected: json!(100),
            },
            TestCase {
                // TC1: anchored to a reference time
                input: Some(1700000000),
                expected: json!(["bar_count", 1700000000, 100]),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let client = Client::new(ClientConfig::default());
            let chart = ChartSession::new(&client).await;
            let options = match test.input {
                Some(reference) => MarketOptions::new("15", 100).with_to(reference),
                None => MarketOptions::new("15", 100),
            };
            chart.set_market("BINANCE:BTCUSDT", options).await;

            let create = sent(&client)
                .into_iter()
                .find(|message| message.kind == "create_series")
                .unwrap();
            assert_eq!(create.data[5], test.expected, "TC{} failed", index);
        }
    }

    #[tokio::test]
    async fn test_set_series_before_market_is_an_error() {
        let client = Client::new(ClientConfig::default());
        let chart = ChartSession::new(&client).await;
        let mut events = chart.subscribe();

        chart.set_series("15", 100, None).await;

        assert_eq!(drain(&mut events), vec![ChartEvent::Error(Error::MarketNotSet)]);
        assert_eq!(sent(&client).len(), 1);
    }

    #[tokio::test]
    async fn test_symbol_resolved_then_prices() {
        let client = Client::new(ClientConfig::default());
        let chart = ChartSession::new(&client).await;
        let mut events = chart.subscribe();
        let cs = chart.session_id().to_string();

        let resolved = Message::new(
            "symbol_resolved",
            vec![
                json!(cs),
                json!("ser_1"),
                json!({"name": "BTCUSDT", "exchange": "BINANCE", "pricescale": 100}),
            ],
        );
        let update = Message::new(
            "timescale_update",
            vec![
                json!(cs),
                json!({"$prices": {"s": [{"i": 2, "v": [1700000000.0, 100.0, 105.0, 95.0, 102.0, 10.0]}]}}),
            ],
        );
        client.handle_incoming(&format!(
            "{}{}",
            encode_message(&resolved),
            encode_message(&update)
        ));

        assert_eq!(
            drain(&mut events),
            vec![
                ChartEvent::SymbolLoaded,
                ChartEvent::Update(vec!["$prices".to_string()]),
            ]
        );
        assert_eq!(chart.infos().series_id, "ser_1");
        assert_eq!(chart.infos().name.as_deref(), Some("BTCUSDT"));

        let periods = chart.inner.state.read().periods.clone();
        assert_eq!(periods.len(), 1);
        assert_eq!(
            periods.get(&1700000000),
            Some(&Period {
                time: 1700000000.0,
                open: 100.0,
                high: 105.0,
                low: 95.0,
                close: 102.0,
                volume: 10.0,
            })
        );
        assert_eq!(chart.indexes().get(&2), Some(&1700000000.0));
    }

    #[tokio::test]
    async fn test_prices_skip_short_arrays_and_order_newest_first() {
        let client = Client::new(ClientConfig::default());
        let chart = ChartSession::new(&client).await;
        let cs = chart.session_id().to_string();

        let update = Message::new(
            "du",
            vec![
                json!(cs),
                json!({"$prices": {"s": [
                    {"i": 0, "v": [1700000000.0, 1.0, 2.0, 0.5, 1.5, 1.0]},
                    {"i": 1, "v": [1700000060.0, 1.5, 2.5, 1.0, 2.0]},
                    {"i": 2, "v": [1700000120.0, 2.0, 3.0, 1.5, 2.5, 3.0]},
                ]}}),
            ],
        );
        client.handle_incoming(&encode_message(&update));

        let times: Vec<_> = chart.periods().iter().map(|period| period.time).collect();
        assert_eq!(times, vec![1700000120.0, 1700000000.0]);
        assert_eq!(chart.indexes().len(), 2);
    }

    #[tokio::test]
    async fn test_session_errors() {
        struct TestCase {
            input: Message,
            expected: Error,
        }

        let client = Client::new(ClientConfig::default());
        let chart = ChartSession::new(&client).await;
        let mut events = chart.subscribe();
        let cs = chart.session_id().to_string();

        let tests = vec![
            TestCase {
                // TC0: symbol error
                input: Message::new(
                    "symbol_error",
                    vec![json!(cs), json!("ser_1"), json!("invalid symbol")],
                ),
                expected: Error::Symbol {
                    series: "ser_1".to_string(),
                    reason: "invalid symbol".to_string(),
                },
            },
            TestCase {
                // TC1: series error
                input: Message::new(
                    "series_error",
                    vec![json!(cs), json!("$prices"), json!("s1"), json!("invalid timeframe")],
                ),
                expected: Error::Series("invalid timeframe".to_string()),
            },
            TestCase {
                // TC2: critical error
                input: Message::new(
                    "critical_error",
                    vec![json!(cs), json!("decode_error"), json!("bad packet")],
                ),
                expected: Error::Critical {
                    name: "decode_error".to_string(),
                    description: "bad packet".to_string(),
                },
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            client.handle_incoming(&encode_message(&test.input));
            let actual = drain(&mut events);
            assert_eq!(actual, vec![ChartEvent::Error(test.expected)], "TC{} failed", index);
        }
    }

    #[tokio::test]
    async fn test_replay_set_market_and_step() {
        let client = Client::new(ClientConfig::default());
        let chart = ChartSession::new(&client).await;
        let mut events = chart.subscribe();
        let cs = chart.session_id().to_string();
        let rs = chart.replay_session_id().to_string();

        chart
            .set_market(
                "BINANCE:BTCUSDT",
                MarketOptions::new("60", 50).with_replay(1690000000),
            )
            .await;
        assert!(chart.is_replay_active());

        let messages = sent(&client);
        let kinds: Vec<_> = messages.iter().map(|message| message.kind.as_str()).collect();
        assert_eq!(
            kinds,
            vec![
                "chart_create_session",
                "replay_create_session",
                "replay_add_series",
                "replay_reset",
                "resolve_symbol",
                "create_series",
            ]
        );
        assert_eq!(
            messages[2].data,
            vec![
                json!(rs),
                json!("req_replay_addseries"),
                json!(r#"={"adjustment":"splits","symbol":"BINANCE:BTCUSDT"}"#),
                json!("60"),
            ]
        );
        assert_eq!(
            messages[3].data,
            vec![json!(rs), json!("req_replay_reset"), json!(1690000000)]
        );
        assert_eq!(
            messages[4].data[2],
            json!(format!(
                r#"={{"replay":"{rs}","symbol":{{"adjustment":"splits","symbol":"BINANCE:BTCUSDT"}}}}"#
            ))
        );
        assert_eq!(messages[4].data[0], json!(cs));

        // Acknowledge the step once it has been queued
        let responder = {
            let client = client.clone();
            let rs = rs.clone();
            tokio::spawn(async move {
                loop {
                    let step = sent(&client)
                        .into_iter()
                        .find(|message| message.kind == "replay_step");
                    if let Some(step) = step {
                        assert_eq!(step.data[2], json!(3));
                        let ok = Message::new("replay_ok", vec![json!(rs), step.data[1].clone()]);
                        client.handle_incoming(&encode_message(&ok));
                        return;
                    }
                    tokio::task::yield_now().await;
                }
            })
        };

        assert_eq!(chart.replay_step(3).await, Ok(()));
        responder.await.unwrap();

        client.handle_incoming(&format!(
            "{}{}",
            encode_message(&Message::new("replay_point", vec![json!(rs), json!(1690003600)])),
            encode_message(&Message::new("replay_data_end", vec![json!(rs)])),
        ));
        assert_eq!(
            drain(&mut events),
            vec![
                ChartEvent::ReplayPoint(json!(1690003600)),
                ChartEvent::ReplayEnd,
            ]
        );
    }

    #[tokio::test]
    async fn test_replay_without_session_fails() {
        let client = Client::new(ClientConfig::default());
        let chart = ChartSession::new(&client).await;

        assert_eq!(chart.replay_stop().await, Err(Error::NoReplaySession));
    }

    #[tokio::test]
    async fn test_replay_request_fails_on_disconnect() {
        let client = Client::new(ClientConfig::default());
        let chart = ChartSession::new(&client).await;
        chart
            .set_market(
                "BINANCE:BTCUSDT",
                MarketOptions::default().with_replay(1690000000),
            )
            .await;

        let pending = {
            let chart = chart.clone();
            tokio::spawn(async move { chart.replay_start(1000).await })
        };
        while chart.inner.pending.len() == 0 {
            tokio::task::yield_now().await;
        }

        client.end().await;
        assert_eq!(pending.await.unwrap(), Err(Error::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_remove_unregisters_sessions() {
        let client = Client::new(ClientConfig::default());
        let chart = ChartSession::new(&client).await;
        let cs = chart.session_id().to_string();

        chart.remove().await;

        assert!(!client.registry().contains(&cs));
        assert!(!client.registry().contains(chart.replay_session_id()));
        assert_eq!(
            sent(&client).last(),
            Some(&Message::new("chart_delete_session", vec![json!(cs)]))
        );

        // Frames for the removed chart are now connection level
        let mut client_events = client.subscribe();
        client.handle_incoming(&frame(&format!(r#"{{"m":"du","p":["{cs}",{{}}]}}"#)));
        assert!(client_events.try_recv().is_ok());
    }
}
