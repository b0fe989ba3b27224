use crate::{
    error::Error,
    protocol::Message,
    quote::{QuoteEvent, QuoteInner},
};
use parking_lot::RwLock;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error};

const MARKET_EVENT_BUFFER: usize = 256;

/// Key identifying a symbol within a quote session, eg/
/// `={"session":"regular","symbol":"BINANCE:BTCUSDT"}`.
pub fn symbol_key(symbol: &str, session: &str) -> String {
    format!("={}", json!({"session": session, "symbol": symbol}))
}

/// State shared between a [`QuoteMarket`] and its session's listener table.
#[derive(Debug)]
pub(crate) struct MarketListener {
    symbol_key: String,
    last: RwLock<Map<String, Value>>,
    events: broadcast::Sender<QuoteEvent>,
}

impl MarketListener {
    pub(crate) fn new(symbol_key: String) -> Self {
        let (events, _) = broadcast::channel(MARKET_EVENT_BUFFER);
        Self {
            symbol_key,
            last: RwLock::new(Map::new()),
            events,
        }
    }

    fn emit(&self, event: QuoteEvent) {
        let _ = self.events.send(event);
    }

    fn emit_error(&self, error: Error) {
        if self.events.receiver_count() == 0 {
            error!(symbol = %self.symbol_key, %error, "quote market error");
            return;
        }
        self.emit(QuoteEvent::Error(error));
    }

    pub(crate) fn handle(&self, message: &Message) {
        match message.kind.as_str() {
            "quote_completed" => self.emit(QuoteEvent::Loaded),
            "qsd" => {
                let Some(data) = message.arg(1) else {
                    return;
                };

                match data.get("s").and_then(Value::as_str) {
                    Some("ok") => {
                        let snapshot = {
                            let mut last = self.last.write();
                            if let Some(values) = data.get("v").and_then(Value::as_object) {
                                last.extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
                            }
                            last.clone()
                        };
                        self.emit(QuoteEvent::Data(snapshot));
                    }
                    Some("error") => self.emit_error(Error::Quote {
                        symbol: self.symbol_key.clone(),
                        reason: Value::Array(message.data.clone()).to_string(),
                    }),
                    status => debug!(symbol = %self.symbol_key, ?status, "ignoring quote status"),
                }
            }
            other => debug!(symbol = %self.symbol_key, kind = other, "ignoring quote message"),
        }
    }
}

/// One symbol subscribed through a [`QuoteSession`](crate::quote::QuoteSession).
///
/// Several markets may share a symbol, the server subscription is dropped when the
/// last of them is closed.
#[derive(Debug)]
pub struct QuoteMarket {
    pub(crate) quote: Arc<QuoteInner>,
    pub(crate) symbol: String,
    pub(crate) session: String,
    pub(crate) listener: Arc<MarketListener>,
}

impl QuoteMarket {
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Trading session, eg/ `regular` or `extended`.
    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn symbol_key(&self) -> &str {
        &self.listener.symbol_key
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QuoteEvent> {
        self.listener.events.subscribe()
    }

    /// Every field received so far, merged across updates.
    pub fn last_data(&self) -> Map<String, Value> {
        self.listener.last.read().clone()
    }

    /// Stop listening, sending `quote_remove_symbols` if this was the last listener.
    pub async fn close(self) {
        let symbol_key = self.symbol_key().to_string();

        let last = {
            let mut listeners = self.quote.listeners.write();
            match listeners.get_mut(&symbol_key) {
                Some(markets) => {
                    markets.retain(|listener| !Arc::ptr_eq(listener, &self.listener));
                    if markets.is_empty() {
                        listeners.remove(&symbol_key);
                        true
                    } else {
                        false
                    }
                }
                None => false,
            }
        };

        if last {
            self.quote
                .client
                .send(
                    "quote_remove_symbols",
                    vec![json!(self.quote.session_id), json!(symbol_key)],
                )
                .await;
        }
    }
}
