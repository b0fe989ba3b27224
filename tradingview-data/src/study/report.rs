use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    #[default]
    Long,
    Short,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct TradeEntry {
    pub name: String,
    pub side: TradeSide,
    pub value: f64,
    pub time: i64,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct TradeExit {
    pub name: String,
    pub value: f64,
    pub time: i64,
}

/// Closed strategy trade. Profit figures are kept as sent, eg/ `{"v": 12.5, "p": 0.8}`.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct Trade {
    pub entry: TradeEntry,
    pub exit: TradeExit,
    pub quantity: f64,
    pub profit: Value,
    pub cumulative: Value,
    pub runup: Value,
    pub drawdown: Value,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct ReportHistory {
    pub buy_hold: Value,
    pub buy_hold_percent: Value,
    pub draw_down: Value,
    pub draw_down_percent: Value,
    pub equity: Value,
    pub equity_percent: Value,
}

/// Strategy tester output of a Pine strategy study.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct StrategyReport {
    pub currency: Option<String>,
    pub settings: Option<Value>,
    pub performance: Map<String, Value>,
    /// Most recent trade first.
    pub trades: Vec<Trade>,
    pub history: Option<ReportHistory>,
}

impl StrategyReport {
    /// Merge a `report` object into the current report, pushing a change tag for every
    /// section it carried.
    pub fn apply(&mut self, report: &Value, changes: &mut Vec<String>) {
        let present = |key: &str| report.get(key).filter(|value| is_truthy(value));

        if let Some(currency) = present("currency").and_then(Value::as_str) {
            self.currency = Some(currency.to_string());
            changes.push("report.currency".to_string());
        }

        if let Some(settings) = present("settings") {
            self.settings = Some(settings.clone());
            changes.push("report.settings".to_string());
        }

        if let Some(performance) = present("performance").and_then(Value::as_object) {
            self.performance = performance.clone();
            changes.push("report.perf".to_string());
        }

        if let Some(trades) = present("trades").and_then(Value::as_array) {
            self.trades = parse_trades(trades);
            changes.push("report.trades".to_string());
        }

        if present("equity").is_some() {
            let field = |key: &str| report.get(key).cloned().unwrap_or(Value::Null);
            self.history = Some(ReportHistory {
                buy_hold: field("buyHold"),
                buy_hold_percent: field("buyHoldPercent"),
                draw_down: field("drawDown"),
                draw_down_percent: field("drawDownPercent"),
                equity: field("equity"),
                equity_percent: field("equityPercent"),
            });
            changes.push("report.history".to_string());
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
        Value::Number(_) => true,
    }
}

/// Parse wire trades, most recent first. Malformed entries are skipped.
pub fn parse_trades(trades: &[Value]) -> Vec<Trade> {
    trades.iter().rev().filter_map(parse_trade).collect()
}

fn parse_trade(trade: &Value) -> Option<Trade> {
    let entry = trade.get("e")?;
    let exit = trade.get("x")?;

    let text = |value: &Value, key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);
    let raw = |key: &str| trade.get(key).cloned().unwrap_or(Value::Null);

    let side = if text(entry, "tp")?.starts_with('s') {
        TradeSide::Short
    } else {
        TradeSide::Long
    };

    Some(Trade {
        entry: TradeEntry {
            name: text(entry, "c").unwrap_or_default(),
            side,
            value: entry.get("p")?.as_f64()?,
            time: entry.get("tm")?.as_i64()?,
        },
        exit: TradeExit {
            name: text(exit, "c").unwrap_or_default(),
            value: exit.get("p")?.as_f64()?,
            time: exit.get("tm")?.as_i64()?,
        },
        quantity: trade.get("q").and_then(Value::as_f64).unwrap_or_default(),
        profit: raw("tp"),
        cumulative: raw("cp"),
        runup: raw("rn"),
        drawdown: raw("dd"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn wire_trade(side: &str, entry_time: i64) -> Value {
        json!({
            "e": {"c": "Entry", "tp": side, "p": 100.0, "tm": entry_time},
            "x": {"c": "Exit", "p": 110.0, "tm": entry_time + 60},
            "q": 1.0,
            "tp": {"v": 10.0, "p": 10.0},
            "cp": {"v": 10.0, "p": 10.0},
            "rn": {"v": 12.0, "p": 12.0},
            "dd": {"v": -1.0, "p": -1.0},
        })
    }

    #[test]
    fn test_parse_trades_reversed() {
        let trades = vec![
            wire_trade("le", 1000),
            json!({"e": {"tp": "le"}}),
            wire_trade("se", 2000),
        ];

        let actual = parse_trades(&trades);

        assert_eq!(actual.len(), 2);
        assert_eq!(actual[0].entry.time, 2000);
        assert_eq!(actual[0].entry.side, TradeSide::Short);
        assert_eq!(actual[0].exit.time, 2060);
        assert_eq!(actual[1].entry.time, 1000);
        assert_eq!(actual[1].entry.side, TradeSide::Long);
        assert_eq!(actual[1].profit, json!({"v": 10.0, "p": 10.0}));
    }

    #[test]
    fn test_apply_report() {
        struct TestCase {
            input: Value,
            expected: Vec<&'static str>,
        }

        let tests = vec![
            TestCase {
                // TC0: every section
                input: json!({
                    "currency": "USD",
                    "settings": {"dateRange": {}},
                    "performance": {"all": {"netProfit": 10.0}},
                    "trades": [wire_trade("le", 1000)],
                    "equity": [1.0, 2.0],
                    "buyHold": [1.0],
                }),
                expected: vec![
                    "report.currency",
                    "report.settings",
                    "report.perf",
                    "report.trades",
                    "report.history",
                ],
            },
            TestCase {
                // TC1: empty sections are ignored
                input: json!({"currency": "", "trades": [], "performance": {}}),
                expected: vec![],
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let mut report = StrategyReport::default();
            let mut changes = Vec::new();
            report.apply(&test.input, &mut changes);

            assert_eq!(changes, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_apply_history() {
        let mut report = StrategyReport::default();
        report.apply(
            &json!({"equity": [1.0, 2.0], "drawDown": [0.5]}),
            &mut Vec::new(),
        );

        let history = report.history.unwrap();
        assert_eq!(history.equity, json!([1.0, 2.0]));
        assert_eq!(history.draw_down, json!([0.5]));
        assert_eq!(history.buy_hold, Value::Null);
    }
}
