//! Study sessions.
//!
//! A [`StudySession`] attaches an [`Indicator`] to a [`ChartSession`] and decodes what the
//! server computes for it: plot values per bar, drawings and, for Pine strategies, the
//! strategy tester report. Study frames travel on the chart's session and are forwarded
//! here by the chart.

use crate::{
    chart::ChartSession,
    client::SessionHandler,
    error::Error,
    indicator::Indicator,
    protocol::{Message, compressed},
    util::gen_session_id,
};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Weak},
};
use tokio::sync::broadcast;
use tracing::{debug, error};

pub mod graphic;
pub mod report;

pub use graphic::{Graphic, GraphicTable};
pub use report::{StrategyReport, Trade, TradeSide};

const STUDY_EVENT_BUFFER: usize = 256;

/// Events emitted by a [`StudySession`].
#[derive(Debug, Clone, PartialEq)]
pub enum StudyEvent {
    Completed,
    /// Parts that changed, eg/ `plots`, `graphic`, `report.trades`.
    Update(Vec<String>),
    Error(Error),
}

/// Plot values of one bar, keyed by declared plot name or `plot_N`.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct StudyPeriod {
    pub time: f64,
    pub plots: IndexMap<String, Value>,
}

impl StudyPeriod {
    /// Decode `[time, plot_0, plot_1, ...]`. A declared name is used once per bar, repeats
    /// fall back to `plot_N`.
    pub fn from_values(values: &[Value], names: Option<&IndexMap<String, String>>) -> Option<Self> {
        let (time, plots) = values.split_first()?;

        let mut period = Self {
            time: time.as_f64()?,
            plots: IndexMap::with_capacity(plots.len()),
        };

        for (index, value) in plots.iter().enumerate() {
            let fallback = format!("plot_{index}");
            let key = names
                .and_then(|names| names.get(&fallback))
                .filter(|name| !period.plots.contains_key(name.as_str()))
                .cloned()
                .unwrap_or(fallback);

            period.plots.insert(key, value.clone());
        }

        Some(period)
    }
}

#[derive(Debug)]
struct StudyState {
    indicator: Indicator,
    periods: BTreeMap<i64, StudyPeriod>,
    /// Study bar index to chart bar index, from `ns.indexes`.
    indexes: Vec<i64>,
    graphic: GraphicTable,
    report: StrategyReport,
}

/// Handle to a study attached to a chart. Cheap to clone, clones share the study.
#[derive(Debug, Clone)]
pub struct StudySession {
    inner: Arc<StudyInner>,
}

#[derive(Debug)]
struct StudyInner {
    chart: ChartSession,
    study_id: String,
    state: RwLock<StudyState>,
    events: broadcast::Sender<StudyEvent>,
}

struct StudyHandler {
    study: Weak<StudyInner>,
}

impl SessionHandler for StudyHandler {
    fn on_frame(&self, message: &Message) -> Result<(), Error> {
        match self.study.upgrade() {
            Some(study) => study.on_frame(message),
            None => Ok(()),
        }
    }
}

impl StudySession {
    /// Attach `indicator` to `chart` and send `create_study`.
    pub async fn new(chart: &ChartSession, indicator: impl Into<Indicator>) -> Self {
        let indicator = indicator.into();
        let (events, _) = broadcast::channel(STUDY_EVENT_BUFFER);

        let inner = Arc::new(StudyInner {
            chart: chart.clone(),
            study_id: gen_session_id("st"),
            state: RwLock::new(StudyState {
                indicator: indicator.clone(),
                periods: BTreeMap::new(),
                indexes: Vec::new(),
                graphic: GraphicTable::default(),
                report: StrategyReport::default(),
            }),
            events,
        });

        chart.register_study(
            &inner.study_id,
            Arc::new(StudyHandler {
                study: Arc::downgrade(&inner),
            }),
        );

        chart
            .client()
            .send(
                "create_study",
                vec![
                    json!(chart.session_id()),
                    json!(inner.study_id),
                    json!("st1"),
                    json!("$prices"),
                    json!(indicator.kind()),
                    indicator.inputs(),
                ],
            )
            .await;

        Self { inner }
    }

    pub fn study_id(&self) -> &str {
        &self.inner.study_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StudyEvent> {
        self.inner.events.subscribe()
    }

    pub fn indicator(&self) -> Indicator {
        self.inner.state.read().indicator.clone()
    }

    /// Plot values newest first.
    pub fn periods(&self) -> Vec<StudyPeriod> {
        self.inner
            .state
            .read()
            .periods
            .values()
            .rev()
            .cloned()
            .collect()
    }

    pub fn strategy_report(&self) -> StrategyReport {
        self.inner.state.read().report.clone()
    }

    /// Untranslated drawing table.
    pub fn raw_graphic(&self) -> GraphicTable {
        self.inner.state.read().graphic.clone()
    }

    /// Drawings with bar indexes translated to chart positions, `0` being the newest bar.
    pub fn graphic(&self) -> Graphic {
        // Chart bar index to position counted back from the newest bar
        let mut chart_indexes: Vec<(i64, f64)> = self.inner.chart.indexes().into_iter().collect();
        chart_indexes.sort_by(|a, b| b.1.total_cmp(&a.1));
        let positions: HashMap<i64, i64> = chart_indexes
            .iter()
            .enumerate()
            .map(|(position, (index, _))| (*index, position as i64))
            .collect();

        let state = self.inner.state.read();
        let indexes: Vec<i64> = state
            .indexes
            .iter()
            .map(|index| positions.get(index).copied().unwrap_or(0))
            .collect();

        graphic::parse(&state.graphic, &indexes)
    }

    /// Replace the indicator with `modify_study`.
    pub async fn set_indicator(&self, indicator: impl Into<Indicator>) {
        let indicator = indicator.into();
        let inputs = indicator.inputs();
        self.inner.state.write().indicator = indicator;

        let chart = &self.inner.chart;
        chart
            .client()
            .send(
                "modify_study",
                vec![
                    json!(chart.session_id()),
                    json!(self.inner.study_id),
                    json!("st1"),
                    inputs,
                ],
            )
            .await;
    }

    /// Send `remove_study` and stop receiving updates.
    pub async fn remove(&self) {
        let chart = &self.inner.chart;
        chart
            .client()
            .send(
                "remove_study",
                vec![json!(chart.session_id()), json!(self.inner.study_id)],
            )
            .await;

        chart.unregister_study(&self.inner.study_id);
    }
}

impl StudyInner {
    fn emit(&self, event: StudyEvent) {
        let _ = self.events.send(event);
    }

    fn emit_error(&self, error: Error) {
        if self.events.receiver_count() == 0 {
            error!(study = %self.study_id, %error, "study session error");
            return;
        }
        self.emit(StudyEvent::Error(error));
    }

    fn on_frame(&self, message: &Message) -> Result<(), Error> {
        match message.kind.as_str() {
            "study_completed" => self.emit(StudyEvent::Completed),
            "timescale_update" | "du" => {
                let Some(update) = message.arg(1).and_then(|update| update.get(&self.study_id))
                else {
                    return Ok(());
                };

                let changes = self.apply_update(update);
                if !changes.is_empty() {
                    self.emit(StudyEvent::Update(changes));
                }
            }
            "study_error" => {
                let reason = match message.arg(3) {
                    Some(Value::String(reason)) => reason.clone(),
                    Some(reason) => reason.to_string(),
                    None => "unknown study error".to_string(),
                };
                self.emit_error(Error::Study(reason));
            }
            other => debug!(study = %self.study_id, kind = other, "ignoring study message"),
        }

        Ok(())
    }

    fn apply_update(&self, update: &Value) -> Vec<String> {
        let mut changes = Vec::new();

        if let Some(series) = update
            .get("st")
            .and_then(Value::as_array)
            .filter(|series| !series.is_empty())
        {
            let mut state = self.state.write();
            let names = state.indicator.plots().cloned();

            for entry in series {
                let period = entry
                    .get("v")
                    .and_then(Value::as_array)
                    .and_then(|values| StudyPeriod::from_values(values, names.as_ref()));

                if let Some(period) = period {
                    state.periods.insert(period.time.floor() as i64, period);
                }
            }
            changes.push("plots".to_string());
        }

        let namespace = update.get("ns");

        if let Some(payload) = namespace
            .and_then(|namespace| namespace.get("d"))
            .and_then(Value::as_str)
            .filter(|payload| !payload.is_empty())
        {
            match serde_json::from_str::<Value>(payload) {
                Ok(parsed) => self.apply_namespace(&parsed, &mut changes),
                Err(error) => {
                    self.emit_error(Error::Study(format!("invalid study payload: {error}")))
                }
            }
        }

        if let Some(indexes) = namespace
            .and_then(|namespace| namespace.get("indexes"))
            .and_then(Value::as_array)
        {
            self.state.write().indexes = indexes.iter().filter_map(Value::as_i64).collect();
        }

        changes
    }

    /// Graphics commands and strategy reports carried in `ns.d`.
    fn apply_namespace(&self, parsed: &Value, changes: &mut Vec<String>) {
        if let Some(commands) = parsed.get("graphicsCmds").filter(|commands| !commands.is_null()) {
            self.state.write().graphic.apply(commands);
            changes.push("graphic".to_string());
        }

        if let Some(encoded) = parsed
            .get("dataCompressed")
            .and_then(Value::as_str)
            .filter(|encoded| !encoded.is_empty())
        {
            match compressed::decode(encoded) {
                Ok(decoded) => {
                    if let Some(report) = decoded.get("report") {
                        self.state.write().report.apply(report, changes);
                    }
                }
                Err(error) => self.emit_error(error),
            }
        }

        if let Some(report) = parsed.get("data").and_then(|data| data.get("report")) {
            self.state.write().report.apply(report, changes);
        }
    }
}
