use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Raw drawings of a study: drawing type (eg/ `dwglabels`) to object id to object.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GraphicTable {
    objects: IndexMap<String, IndexMap<String, Value>>,
}

impl GraphicTable {
    /// Apply a `graphicsCmds` object: every `erase` instruction, then every `create`.
    pub fn apply(&mut self, commands: &Value) {
        if let Some(erase) = commands.get("erase").and_then(Value::as_array) {
            for instruction in erase {
                self.erase(instruction);
            }
        }

        if let Some(create) = commands.get("create").and_then(Value::as_object) {
            for (kind, groups) in create {
                let table = self.objects.entry(kind.clone()).or_default();

                let objects = groups
                    .as_array()
                    .into_iter()
                    .flatten()
                    .filter_map(|group| group.get("data").and_then(Value::as_array))
                    .flatten();

                for object in objects {
                    match object.get("id").map(object_id) {
                        Some(id) => {
                            table.insert(id, object.clone());
                        }
                        None => debug!(kind, "ignoring drawing without id"),
                    }
                }
            }
        }
    }

    fn erase(&mut self, instruction: &Value) {
        let kind = instruction.get("type").and_then(Value::as_str);

        match (instruction.get("action").and_then(Value::as_str), kind) {
            (Some("all"), None) => self.objects.clear(),
            (Some("all"), Some(kind)) => {
                self.objects.shift_remove(kind);
            }
            (Some("one"), Some(kind)) => {
                let id = instruction.get("id").map(object_id);
                if let (Some(table), Some(id)) = (self.objects.get_mut(kind), id) {
                    table.shift_remove(&id);
                }
            }
            _ => debug!(?instruction, "ignoring malformed erase instruction"),
        }
    }

    pub fn get(&self, kind: &str) -> Option<&IndexMap<String, Value>> {
        self.objects.get(kind)
    }

    pub fn len(&self) -> usize {
        self.objects.values().map(IndexMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn values<'a>(&'a self, kind: &str) -> impl Iterator<Item = &'a Value> + 'a {
        self.objects.get(kind).into_iter().flat_map(IndexMap::values)
    }
}

fn object_id(id: &Value) -> String {
    match id {
        Value::String(id) => id.clone(),
        other => other.to_string(),
    }
}

fn translate(table: &[(&str, &str)], code: &str) -> String {
    table
        .iter()
        .find(|(short, _)| *short == code)
        .map_or(code, |(_, long)| *long)
        .to_string()
}

const EXTEND: &[(&str, &str)] = &[("r", "right"), ("l", "left"), ("b", "both"), ("n", "none")];

const Y_LOCATION: &[(&str, &str)] = &[("pr", "price"), ("ab", "abovebar"), ("bl", "belowbar")];

const LABEL_STYLE: &[(&str, &str)] = &[
    ("n", "none"),
    ("xcr", "xcross"),
    ("cr", "cross"),
    ("tup", "triangleup"),
    ("tdn", "triangledown"),
    ("flg", "flag"),
    ("cir", "circle"),
    ("aup", "arrowup"),
    ("adn", "arrowdown"),
    ("lup", "label_up"),
    ("ldn", "label_down"),
    ("llf", "label_left"),
    ("lrg", "label_right"),
    ("llwlf", "label_lower_left"),
    ("llwrg", "label_lower_right"),
    ("luplf", "label_upper_left"),
    ("luprg", "label_upper_right"),
    ("lcn", "label_center"),
    ("sq", "square"),
    ("dia", "diamond"),
];

const LINE_STYLE: &[(&str, &str)] = &[
    ("sol", "solid"),
    ("dot", "dotted"),
    ("dsh", "dashed"),
    ("al", "arrow_left"),
    ("ar", "arrow_right"),
    ("ab", "arrow_both"),
];

const BOX_STYLE: &[(&str, &str)] = &[("sol", "solid"), ("dot", "dotted"), ("dsh", "dashed")];

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct Label {
    pub id: Value,
    pub x: Option<i64>,
    pub y: Option<f64>,
    pub y_loc: String,
    pub text: String,
    pub style: String,
    pub color: Value,
    pub text_color: Value,
    pub size: String,
    pub text_align: String,
    pub tool_tip: String,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct Line {
    pub id: Value,
    pub x1: Option<i64>,
    pub y1: Option<f64>,
    pub x2: Option<i64>,
    pub y2: Option<f64>,
    pub extend: String,
    pub style: String,
    pub color: Value,
    pub width: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct DrawnBox {
    pub id: Value,
    pub x1: Option<i64>,
    pub y1: Option<f64>,
    pub x2: Option<i64>,
    pub y2: Option<f64>,
    pub color: Value,
    pub bg_color: Value,
    pub extend: String,
    pub style: String,
    pub width: Option<f64>,
    pub text: String,
    pub text_size: String,
    pub text_color: Value,
    pub text_v_align: String,
    pub text_h_align: String,
    pub text_wrap: String,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct TableCell {
    pub id: Value,
    pub text: String,
    pub width: f64,
    pub height: f64,
    pub text_color: Value,
    pub text_h_align: String,
    pub text_v_align: String,
    pub text_size: String,
    pub bg_color: Value,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct Table {
    pub id: Value,
    pub position: String,
    pub rows: Option<i64>,
    pub columns: Option<i64>,
    pub bg_color: Value,
    pub frame_color: Value,
    pub frame_width: Option<f64>,
    pub border_color: Value,
    pub border_width: Option<f64>,
    /// `cells[row][column]`, `None` where the server sent no cell.
    pub cells: Vec<Vec<Option<TableCell>>>,
}

/// Study drawings with bar indexes translated to chart positions.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct Graphic {
    pub labels: Vec<Label>,
    pub lines: Vec<Line>,
    pub boxes: Vec<DrawnBox>,
    pub tables: Vec<Table>,
    /// Raw objects with `startIndex` and `endIndex` translated.
    pub horiz_lines: Vec<Map<String, Value>>,
    /// Raw objects with every point `index` translated.
    pub polygons: Vec<Map<String, Value>>,
    /// Raw objects with `firstBarTime` and `lastBarTime` translated.
    pub horiz_hists: Vec<Map<String, Value>>,
}

/// Reads fields off one raw drawing object.
struct Fields<'a> {
    object: &'a Value,
    indexes: &'a [i64],
}

impl<'a> Fields<'a> {
    fn new(object: &'a Value, indexes: &'a [i64]) -> Self {
        Self { object, indexes }
    }

    fn raw(&self, key: &str) -> Value {
        self.object.get(key).cloned().unwrap_or(Value::Null)
    }

    fn text(&self, key: &str) -> String {
        match self.object.get(key) {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }

    fn number(&self, key: &str) -> Option<f64> {
        self.object.get(key).and_then(Value::as_f64)
    }

    fn integer(&self, key: &str) -> Option<i64> {
        self.object.get(key).and_then(Value::as_i64)
    }

    /// Translate the bar index stored under `key` into a chart position.
    fn position(&self, key: &str) -> Option<i64> {
        translate_index(self.indexes, self.object.get(key))
    }

    fn translated(&self, keys: &[&str]) -> Map<String, Value> {
        let mut object = self.object.as_object().cloned().unwrap_or_default();
        for key in keys {
            let position = self.position(key);
            object.insert(key.to_string(), position.map_or(Value::Null, Value::from));
        }
        object
    }
}

fn translate_index(indexes: &[i64], index: Option<&Value>) -> Option<i64> {
    let index = usize::try_from(index?.as_i64()?).ok()?;
    indexes.get(index).copied()
}

/// Translate the raw drawing table. `indexes[n]` is the chart position of study bar
/// index `n`.
pub fn parse(table: &GraphicTable, indexes: &[i64]) -> Graphic {
    let labels = table
        .values("dwglabels")
        .map(|object| Fields::new(object, indexes))
        .map(|label| Label {
            id: label.raw("id"),
            x: label.position("x"),
            y: label.number("y"),
            y_loc: translate(Y_LOCATION, &label.text("yl")),
            text: label.text("t"),
            style: translate(LABEL_STYLE, &label.text("st")),
            color: label.raw("ci"),
            text_color: label.raw("tci"),
            size: label.text("sz"),
            text_align: label.text("ta"),
            tool_tip: label.text("tt"),
        })
        .collect();

    let lines = table
        .values("dwglines")
        .map(|object| Fields::new(object, indexes))
        .map(|line| Line {
            id: line.raw("id"),
            x1: line.position("x1"),
            y1: line.number("y1"),
            x2: line.position("x2"),
            y2: line.number("y2"),
            extend: translate(EXTEND, &line.text("ex")),
            style: translate(LINE_STYLE, &line.text("st")),
            color: line.raw("ci"),
            width: line.number("w"),
        })
        .collect();

    let boxes = table
        .values("dwgboxes")
        .map(|object| Fields::new(object, indexes))
        .map(|drawn| DrawnBox {
            id: drawn.raw("id"),
            x1: drawn.position("x1"),
            y1: drawn.number("y1"),
            x2: drawn.position("x2"),
            y2: drawn.number("y2"),
            color: drawn.raw("c"),
            bg_color: drawn.raw("bc"),
            extend: translate(EXTEND, &drawn.text("ex")),
            style: translate(BOX_STYLE, &drawn.text("st")),
            width: drawn.number("w"),
            text: drawn.text("t"),
            text_size: drawn.text("ts"),
            text_color: drawn.raw("tc"),
            text_v_align: drawn.text("tva"),
            text_h_align: drawn.text("tha"),
            text_wrap: drawn.text("tw"),
        })
        .collect();

    let tables = table
        .values("dwgtables")
        .map(|object| Fields::new(object, indexes))
        .map(|drawn| Table {
            id: drawn.raw("id"),
            position: drawn.text("pos"),
            rows: drawn.integer("rows"),
            columns: drawn.integer("cols"),
            bg_color: drawn.raw("bgc"),
            frame_color: drawn.raw("frmc"),
            frame_width: drawn.number("frmw"),
            border_color: drawn.raw("brdc"),
            border_width: drawn.number("brdw"),
            cells: table_cells(table, &drawn.raw("id")),
        })
        .collect();

    let horiz_lines = table
        .values("horizlines")
        .map(|object| Fields::new(object, indexes).translated(&["startIndex", "endIndex"]))
        .collect();

    let polygons = table
        .values("polygons")
        .map(|object| {
            let mut polygon = object.as_object().cloned().unwrap_or_default();
            let points: Vec<Value> = object
                .get("points")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .map(|point| Value::Object(Fields::new(point, indexes).translated(&["index"])))
                .collect();
            polygon.insert("points".to_string(), Value::Array(points));
            polygon
        })
        .collect();

    let horiz_hists = table
        .values("hhists")
        .map(|object| Fields::new(object, indexes).translated(&["firstBarTime", "lastBarTime"]))
        .collect();

    Graphic {
        labels,
        lines,
        boxes,
        tables,
        horiz_lines,
        polygons,
        horiz_hists,
    }
}

/// Cells of table `table_id` laid out as a row-major matrix.
fn table_cells(table: &GraphicTable, table_id: &Value) -> Vec<Vec<Option<TableCell>>> {
    let mut matrix: Vec<Vec<Option<TableCell>>> = Vec::new();

    for cell in table.values("dwgtablecells") {
        if cell.get("tid") != Some(table_id) {
            continue;
        }

        let fields = Fields::new(cell, &[]);
        let row = fields.integer("row").unwrap_or(0).max(0) as usize;
        let column = fields.integer("col").unwrap_or(0).max(0) as usize;

        if matrix.len() <= row {
            matrix.resize_with(row + 1, Vec::new);
        }
        let cells = &mut matrix[row];
        if cells.len() <= column {
            cells.resize_with(column + 1, || None);
        }

        let text_or = |key: &str, default: &str| match cell.get(key) {
            Some(Value::String(text)) => text.clone(),
            _ => default.to_string(),
        };

        cells[column] = Some(TableCell {
            id: fields.raw("id"),
            text: text_or("t", ""),
            width: fields.number("w").unwrap_or(0.0),
            height: fields.number("h").unwrap_or(0.0),
            text_color: cell.get("tc").cloned().unwrap_or(Value::from(0)),
            text_h_align: text_or("tha", "left"),
            text_v_align: text_or("tva", "top"),
            text_size: text_or("ts", "normal"),
            bg_color: cell.get("bgc").cloned().unwrap_or(Value::from(0)),
        });
    }

    matrix
}
