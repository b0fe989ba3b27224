use crate::util::round2;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One OHLCV bar of a chart series.
#[derive(Debug, Copy, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct Period {
    /// Bar open time in epoch seconds, as sent by the server.
    pub time: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Rounded to two decimal places.
    pub volume: f64,
}

impl Period {
    /// Decode a `$prices` value array `[time, open, high, low, close, volume]`.
    ///
    /// Returns `None` for short arrays or non numeric elements.
    pub fn from_values(values: &[Value]) -> Option<Self> {
        if values.len() < 6 {
            return None;
        }

        let number = |index: usize| values.get(index).and_then(Value::as_f64);

        Some(Self {
            time: number(0)?,
            open: number(1)?,
            high: number(2)?,
            low: number(3)?,
            close: number(4)?,
            volume: round2(number(5)?),
        })
    }

    /// Map key used for this period, whole epoch seconds.
    pub fn key(&self) -> i64 {
        self.time.floor() as i64
    }
}

/// [`Period`] with a typed timestamp, returned by historical fetches.
#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize)]
pub struct Bar {
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl From<&Period> for Bar {
    fn from(period: &Period) -> Self {
        let millis = (period.time * 1000.0).round() as i64;

        Self {
            time: DateTime::from_timestamp_millis(millis).unwrap_or_default(),
            open: period.open,
            high: period.high,
            low: period.low,
            close: period.close,
            volume: period.volume,
        }
    }
}

/// Symbol metadata delivered by `symbol_resolved`.
///
/// Commonly used fields are typed, everything else the server sends is kept in `extra`.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct SymbolInfo {
    #[serde(default)]
    pub series_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub exchange: Option<String>,
    #[serde(default)]
    pub listed_exchange: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub currency_code: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub pricescale: Option<f64>,
    #[serde(default)]
    pub minmov: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SymbolInfo {
    /// Build from the `symbol_resolved` payload for series `series_id`. Fields with an
    /// unexpected type are left in `extra`.
    pub fn from_resolved(series_id: &str, payload: &Map<String, Value>) -> Self {
        let mut object = payload.clone();
        object.insert("series_id".to_string(), Value::String(series_id.to_string()));

        serde_json::from_value(Value::Object(object.clone())).unwrap_or_else(|_| Self {
            series_id: series_id.to_string(),
            extra: object,
            ..Default::default()
        })
    }
}
