use crate::{
    client::{Client, SessionHandler},
    error::Error,
    protocol::Message,
    util::gen_session_id,
};
use parking_lot::RwLock;
use serde_json::{Map, Value, json};
use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};
use tracing::debug;

pub mod market;

pub use market::{QuoteMarket, symbol_key};

use market::MarketListener;

/// Every field TradingView publishes for a quote.
pub const ALL_FIELDS: &[&str] = &[
    "base-currency-logoid",
    "ch",
    "chp",
    "currency-logoid",
    "currency_code",
    "current_session",
    "description",
    "exchange",
    "format",
    "fractional",
    "is_tradable",
    "language",
    "local_description",
    "logoid",
    "lp",
    "lp_time",
    "minmov",
    "minmove2",
    "original_name",
    "pricescale",
    "pro_name",
    "short_name",
    "type",
    "update_mode",
    "volume",
    "ask",
    "bid",
    "fundamentals",
    "high_price",
    "low_price",
    "open_price",
    "prev_close_price",
    "rch",
    "rchp",
    "rtc",
    "rtc_time",
    "status",
    "industry",
    "basic_eps_net_income",
    "beta_1_year",
    "market_cap_basic",
    "earnings_per_share_basic_ttm",
    "price_earnings_ttm",
    "sector",
    "dividends_yield",
    "timezone",
    "country_code",
    "provider_id",
];

/// Events emitted by a [`QuoteMarket`].
#[derive(Debug, Clone, PartialEq)]
pub enum QuoteEvent {
    Loaded,
    /// Full snapshot after merging the latest update.
    Data(Map<String, Value>),
    Error(Error),
}

/// Fields requested with `quote_set_fields`.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub enum QuoteFields {
    #[default]
    All,
    /// Last price only.
    Price,
    Custom(Vec<String>),
}

impl QuoteFields {
    pub fn names(&self) -> Vec<String> {
        match self {
            QuoteFields::All => ALL_FIELDS.iter().map(|field| field.to_string()).collect(),
            QuoteFields::Price => vec!["lp".to_string()],
            QuoteFields::Custom(fields) => fields.clone(),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct QuoteOptions {
    pub fields: QuoteFields,
}

impl QuoteOptions {
    pub fn with_fields(mut self, fields: QuoteFields) -> Self {
        self.fields = fields;
        self
    }
}

/// Quote session streaming field snapshots for any number of symbols.
#[derive(Debug, Clone)]
pub struct QuoteSession {
    inner: Arc<QuoteInner>,
}

#[derive(Debug)]
pub(crate) struct QuoteInner {
    pub(crate) client: Client,
    pub(crate) session_id: String,
    /// Symbol key to the markets listening on it.
    pub(crate) listeners: RwLock<HashMap<String, Vec<Arc<MarketListener>>>>,
}

struct QuoteHandler {
    quote: Weak<QuoteInner>,
}

impl SessionHandler for QuoteHandler {
    fn on_frame(&self, message: &Message) -> Result<(), Error> {
        match self.quote.upgrade() {
            Some(quote) => quote.on_frame(message),
            None => Ok(()),
        }
    }
}

impl QuoteSession {
    /// Register a `qs_` session and send `quote_create_session` and `quote_set_fields`.
    pub async fn new(client: &Client, options: QuoteOptions) -> Self {
        let inner = Arc::new(QuoteInner {
            client: client.clone(),
            session_id: gen_session_id("qs"),
            listeners: RwLock::new(HashMap::new()),
        });

        client.registry().register(
            inner.session_id.clone(),
            Arc::new(QuoteHandler {
                quote: Arc::downgrade(&inner),
            }),
        );

        client
            .send("quote_create_session", vec![json!(inner.session_id)])
            .await;

        let mut fields = vec![json!(inner.session_id)];
        fields.extend(options.fields.names().into_iter().map(Value::String));
        client.send("quote_set_fields", fields).await;

        Self { inner }
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Listen on `symbol` for the given trading session, eg/ `regular`. The first market
    /// for a symbol sends `quote_add_symbols`.
    pub async fn market(&self, symbol: &str, session: &str) -> QuoteMarket {
        let key = symbol_key(symbol, session);
        let listener = Arc::new(MarketListener::new(key.clone()));

        let first = {
            let mut listeners = self.inner.listeners.write();
            let markets = listeners.entry(key.clone()).or_default();
            markets.push(listener.clone());
            markets.len() == 1
        };

        if first {
            self.inner
                .client
                .send(
                    "quote_add_symbols",
                    vec![json!(self.inner.session_id), json!(key)],
                )
                .await;
        }

        QuoteMarket {
            quote: self.inner.clone(),
            symbol: symbol.to_string(),
            session: session.to_string(),
            listener,
        }
    }

    /// Symbol keys with at least one open market.
    pub fn symbols(&self) -> Vec<String> {
        self.inner.listeners.read().keys().cloned().collect()
    }

    /// Send `quote_delete_session` and unregister the session.
    pub async fn delete(&self) {
        self.inner
            .client
            .send("quote_delete_session", vec![json!(self.inner.session_id)])
            .await;

        self.inner.client.registry().remove(&self.inner.session_id);
        self.inner.listeners.write().clear();
    }
}

impl QuoteInner {
    fn on_frame(&self, message: &Message) -> Result<(), Error> {
        let symbol_key = match message.kind.as_str() {
            "quote_completed" => message.arg_str(1),
            "qsd" => message
                .arg(1)
                .and_then(|data| data.get("n"))
                .and_then(Value::as_str),
            other => {
                debug!(session = %self.session_id, kind = other, "ignoring quote message");
                return Ok(());
            }
        };

        let Some(symbol_key) = symbol_key else {
            return Err(Error::Protocol(format!(
                "{} without a symbol key",
                message.kind
            )));
        };

        let markets = self
            .listeners
            .read()
            .get(symbol_key)
            .cloned()
            .unwrap_or_default();

        if markets.is_empty() {
            debug!(session = %self.session_id, symbol_key, "removing unrequested symbol");
            self.client.inner.enqueue(
                "quote_remove_symbols",
                vec![json!(self.session_id), json!(symbol_key)],
            );
            return Ok(());
        }

        for market in markets {
            market.handle(message);
        }

        Ok(())
    }
}
