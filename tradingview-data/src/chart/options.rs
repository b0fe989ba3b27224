use derive_more::Display;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Non time based chart types, rendered server side by a bar-set study.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Display)]
pub enum ChartType {
    HeikinAshi,
    Renko,
    LineBreak,
    Kagi,
    PointAndFigure,
    Range,
}

impl ChartType {
    pub fn study_id(&self) -> &'static str {
        match self {
            ChartType::HeikinAshi => "BarSetHeikenAshi@tv-basicstudies-60!",
            ChartType::Renko => "BarSetRenko@tv-prostudies-40!",
            ChartType::LineBreak => "BarSetPriceBreak@tv-prostudies-34!",
            ChartType::Kagi => "BarSetKagi@tv-prostudies-34!",
            ChartType::PointAndFigure => "BarSetPnF@tv-prostudies-34!",
            ChartType::Range => "BarSetRange@tv-basicstudies-72!",
        }
    }
}

/// How `set_market` binds a symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketOptions {
    /// TradingView resolution, eg/ `"15"`, `"240"`, `"1D"`.
    pub timeframe: String,
    /// Number of bars to load.
    pub range: i64,
    /// Load bars up to this epoch second instead of the latest bar.
    pub to: Option<i64>,
    /// Price adjustment, `"splits"` or `"dividends"`.
    pub adjustment: String,
    pub backadjustment: bool,
    /// Trading session, eg/ `"regular"` or `"extended"`.
    pub session: Option<String>,
    /// Convert prices to this currency id, eg/ `"EUR"`.
    pub currency: Option<String>,
    /// Start a replay session at this epoch second.
    pub replay: Option<i64>,
    pub chart_type: Option<ChartType>,
    /// Inputs for `chart_type`, eg/ `{"boxSize": 1}` for Renko.
    pub inputs: Map<String, Value>,
}

impl Default for MarketOptions {
    fn default() -> Self {
        Self {
            timeframe: "240".to_string(),
            range: 100,
            to: None,
            adjustment: "splits".to_string(),
            backadjustment: false,
            session: None,
            currency: None,
            replay: None,
            chart_type: None,
            inputs: Map::new(),
        }
    }
}

impl MarketOptions {
    pub fn new(timeframe: impl Into<String>, range: i64) -> Self {
        Self {
            timeframe: timeframe.into(),
            range,
            ..Default::default()
        }
    }

    pub fn with_to(mut self, to: i64) -> Self {
        self.to = Some(to);
        self
    }

    pub fn with_adjustment(mut self, adjustment: impl Into<String>) -> Self {
        self.adjustment = adjustment.into();
        self
    }

    pub fn with_backadjustment(mut self, backadjustment: bool) -> Self {
        self.backadjustment = backadjustment;
        self
    }

    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = Some(currency.into());
        self
    }

    pub fn with_replay(mut self, from: i64) -> Self {
        self.replay = Some(from);
        self
    }

    pub fn with_chart_type(mut self, chart_type: ChartType, inputs: Map<String, Value>) -> Self {
        self.chart_type = Some(chart_type);
        self.inputs = inputs;
        self
    }

    /// Plain symbol-init object sent (prefixed with `=`) by `resolve_symbol`.
    pub fn symbol_init(&self, symbol: &str) -> Value {
        let mut init = Map::new();
        init.insert("symbol".to_string(), json!(symbol));
        init.insert("adjustment".to_string(), json!(self.adjustment));

        if self.backadjustment {
            init.insert("backadjustment".to_string(), json!("default"));
        }
        if let Some(session) = &self.session {
            init.insert("session".to_string(), json!(session));
        }
        if let Some(currency) = &self.currency {
            init.insert("currency-id".to_string(), json!(currency));
        }

        Value::Object(init)
    }

    /// Chart-init object for `resolve_symbol`. Replay and chart types nest the plain
    /// symbol-init inside a complex chart wrapper.
    pub fn chart_init(&self, symbol: &str, replay_session_id: &str) -> Value {
        let symbol_init = self.symbol_init(symbol);
        if self.chart_type.is_none() && self.replay.is_none() {
            return symbol_init;
        }

        let mut init = Map::new();
        if self.replay.is_some() {
            init.insert("replay".to_string(), json!(replay_session_id));
        }
        init.insert("symbol".to_string(), symbol_init);
        if let Some(chart_type) = self.chart_type {
            init.insert("type".to_string(), json!(chart_type.study_id()));
            init.insert("inputs".to_string(), Value::Object(self.inputs.clone()));
        }

        Value::Object(init)
    }
}

/// Range argument of `create_series`: the bare bar count, or
/// `["bar_count", reference, range]` when anchored to a reference time.
pub fn encode_range(range: i64, reference: Option<i64>) -> Value {
    match reference {
        Some(reference) => json!(["bar_count", reference, range]),
        None => json!(range),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_range() {
        assert_eq!(encode_range(100, None), json!(100));
        assert_eq!(
            encode_range(100, Some(1700000000)),
            json!(["bar_count", 1700000000, 100])
        );
    }

    #[test]
    fn test_chart_init() {
        struct TestCase {
            input: MarketOptions,
            expected: Value,
        }

        let tests = vec![
            TestCase {
                // TC0: defaults produce a plain symbol-init
                input: MarketOptions::default(),
                expected: json!({"symbol": "BINANCE:BTCUSDT", "adjustment": "splits"}),
            },
            TestCase {
                // TC1: optional symbol-init fields
                input: MarketOptions::default()
                    .with_adjustment("dividends")
                    .with_backadjustment(true)
                    .with_session("extended")
                    .with_currency("EUR"),
                expected: json!({
                    "symbol": "BINANCE:BTCUSDT",
                    "adjustment": "dividends",
                    "backadjustment": "default",
                    "session": "extended",
                    "currency-id": "EUR",
                }),
            },
            TestCase {
                // TC2: replay wraps the symbol-init
                input: MarketOptions::default().with_replay(1690000000),
                expected: json!({
                    "replay": "rs_test",
                    "symbol": {"symbol": "BINANCE:BTCUSDT", "adjustment": "splits"},
                }),
            },
            TestCase {
                // TC3: chart type wraps the symbol-init with study id and inputs
                input: MarketOptions::default().with_chart_type(
                    ChartType::Renko,
                    json!({"boxSize": 2}).as_object().cloned().unwrap_or_default(),
                ),
                expected: json!({
                    "symbol": {"symbol": "BINANCE:BTCUSDT", "adjustment": "splits"},
                    "type": "BarSetRenko@tv-prostudies-40!",
                    "inputs": {"boxSize": 2},
                }),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = test.input.chart_init("BINANCE:BTCUSDT", "rs_test");
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }
}
