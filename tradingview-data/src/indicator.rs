use crate::error::Error;
use indexmap::IndexMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::sync::LazyLock;

/// Study type used for every Pine script.
pub const PINE_SCRIPT_TYPE: &str = "Script@tv-scripting-101!";

/// Indicator attached to a chart by a [`StudySession`](crate::study::StudySession).
#[derive(Debug, Clone, PartialEq)]
pub enum Indicator {
    Pine(PineIndicator),
    BuiltIn(BuiltInIndicator),
}

impl Indicator {
    /// Study type sent with `create_study`, eg/ `Script@tv-scripting-101!`.
    pub fn kind(&self) -> &str {
        match self {
            Indicator::Pine(pine) => &pine.kind,
            Indicator::BuiltIn(built_in) => &built_in.kind,
        }
    }

    /// Wire inputs sent with `create_study` and `modify_study`.
    pub fn inputs(&self) -> Value {
        match self {
            Indicator::Pine(pine) => pine.wire_inputs(),
            Indicator::BuiltIn(built_in) => Value::Object(built_in.options.clone()),
        }
    }

    /// Declared plot names keyed by `plot_N`. Built-in indicators declare none.
    pub fn plots(&self) -> Option<&IndexMap<String, String>> {
        match self {
            Indicator::Pine(pine) => Some(&pine.plots),
            Indicator::BuiltIn(_) => None,
        }
    }
}

impl From<PineIndicator> for Indicator {
    fn from(pine: PineIndicator) -> Self {
        Indicator::Pine(pine)
    }
}

impl From<BuiltInIndicator> for Indicator {
    fn from(built_in: BuiltInIndicator) -> Self {
        Indicator::BuiltIn(built_in)
    }
}

/// One configurable input of a Pine script.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PineInput {
    pub name: String,
    #[serde(default)]
    pub inline: Option<String>,
    #[serde(default, rename = "internalID")]
    pub internal_id: Option<String>,
    /// Pine input type, eg/ `bool`, `integer`, `float`, `text`, `color`, `source`.
    #[serde(rename = "type")]
    pub kind: String,
    pub value: Value,
    #[serde(default)]
    pub is_fake: bool,
    /// Allowed values, empty when unrestricted.
    #[serde(default)]
    pub options: Vec<Value>,
}

impl PineInput {
    pub fn new(name: impl Into<String>, kind: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            inline: None,
            internal_id: None,
            kind: kind.into(),
            value: value.into(),
            is_fake: false,
            options: Vec::new(),
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self.kind.as_str() {
            "bool" => value.is_boolean(),
            "integer" => value.is_i64() || value.is_u64(),
            "float" => value.is_number(),
            "text" => value.is_string(),
            _ => true,
        }
    }
}

/// Pine script indicator.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PineIndicator {
    #[serde(default)]
    pub pine_id: String,
    #[serde(default)]
    pub pine_version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub short_description: String,
    /// Compiled script text, sent as the `text` input.
    pub script: String,
    #[serde(default)]
    pub inputs: IndexMap<String, PineInput>,
    /// Plot display names keyed by `plot_N`.
    #[serde(default)]
    pub plots: IndexMap<String, String>,
    #[serde(default = "default_pine_kind", rename = "type")]
    pub kind: String,
}

fn default_pine_kind() -> String {
    PINE_SCRIPT_TYPE.to_string()
}

impl PineIndicator {
    pub fn new(
        pine_id: impl Into<String>,
        pine_version: impl Into<String>,
        script: impl Into<String>,
    ) -> Self {
        Self {
            pine_id: pine_id.into(),
            pine_version: pine_version.into(),
            description: String::new(),
            short_description: String::new(),
            script: script.into(),
            inputs: IndexMap::new(),
            plots: IndexMap::new(),
            kind: default_pine_kind(),
        }
    }

    pub fn with_input(mut self, id: impl Into<String>, input: PineInput) -> Self {
        self.inputs.insert(id.into(), input);
        self
    }

    pub fn with_plot(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.plots.insert(id.into(), name.into());
        self
    }

    /// Override the study type, eg/ for strategy scripts.
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    /// Set an input by id (`in_0` or `0`), `inline` name or `internalID`.
    ///
    /// The value must match the input's declared type and, when the input lists
    /// allowed options, be one of them.
    pub fn set_option(&mut self, key: &str, value: impl Into<Value>) -> Result<(), Error> {
        let value = value.into();

        let prefixed = format!("in_{key}");
        let id = if self.inputs.contains_key(&prefixed) {
            prefixed
        } else if self.inputs.contains_key(key) {
            key.to_string()
        } else {
            self.inputs
                .iter()
                .find(|(_, input)| {
                    input.inline.as_deref() == Some(key) || input.internal_id.as_deref() == Some(key)
                })
                .map(|(id, _)| id.clone())
                .ok_or_else(|| Error::Indicator(format!("input '{key}' not found")))?
        };

        let Some(input) = self.inputs.get_mut(&id) else {
            return Err(Error::Indicator(format!("input '{key}' not found")));
        };

        if !input.accepts(&value) {
            return Err(Error::Indicator(format!(
                "input '{}' ({id}) must be a {}",
                input.name, input.kind
            )));
        }

        if !input.options.is_empty() && !input.options.contains(&value) {
            return Err(Error::Indicator(format!(
                "input '{}' ({id}) must be one of: {}",
                input.name,
                input.options.iter().join(", ")
            )));
        }

        input.value = value;
        Ok(())
    }

    /// `{text, pineId?, pineVersion?, <id>: {v, f, t}}`. Colour inputs send their ordinal.
    pub fn wire_inputs(&self) -> Value {
        let mut inputs = Map::new();
        inputs.insert("text".to_string(), json!(self.script));

        if !self.pine_id.is_empty() {
            inputs.insert("pineId".to_string(), json!(self.pine_id));
        }
        if !self.pine_version.is_empty() {
            inputs.insert("pineVersion".to_string(), json!(self.pine_version));
        }

        for (ordinal, (id, input)) in self.inputs.iter().enumerate() {
            let value = if input.kind == "color" {
                json!(ordinal)
            } else {
                input.value.clone()
            };

            inputs.insert(
                id.clone(),
                json!({"v": value, "f": input.is_fake, "t": input.kind}),
            );
        }

        Value::Object(inputs)
    }
}

/// Defaults of the built-in indicators that take options.
static BUILT_IN_DEFAULTS: LazyLock<IndexMap<&'static str, Value>> = LazyLock::new(|| {
    let fixed_range = json!({
        "rowsLayout": "Number Of Rows",
        "rows": 24,
        "volume": "Up/Down",
        "vaVolume": 70,
        "subscribeRealtime": false,
        "first_bar_time": null,
        "last_bar_time": null,
    });

    let mut extended_fixed_range = fixed_range.clone();
    if let Some(options) = extended_fixed_range.as_object_mut() {
        options.insert("extendToRight".to_string(), json!(false));
        options.insert("mapRightBoundaryToBarStartTime".to_string(), json!(true));
    }

    IndexMap::from([
        (
            "Volume@tv-basicstudies-241",
            json!({"length": 20, "col_prev_close": false}),
        ),
        ("VbPFixed@tv-basicstudies-241", extended_fixed_range),
        ("VbPFixed@tv-basicstudies-241!", fixed_range.clone()),
        ("VbPFixed@tv-volumebyprice-53!", fixed_range),
        (
            "VbPSessions@tv-volumebyprice-53",
            json!({
                "rowsLayout": "Number Of Rows",
                "rows": 24,
                "volume": "Up/Down",
                "vaVolume": 70,
                "extendPocRight": false,
            }),
        ),
        (
            "VbPSessionsRough@tv-volumebyprice-53!",
            json!({"volume": "Up/Down", "vaVolume": 70}),
        ),
        (
            "VbPSessionsDetailed@tv-volumebyprice-53!",
            json!({
                "volume": "Up/Down",
                "vaVolume": 70,
                "subscribeRealtime": false,
                "first_visible_bar_time": null,
                "last_visible_bar_time": null,
            }),
        ),
        (
            "VbPVisible@tv-volumebyprice-53",
            json!({
                "rowsLayout": "Number Of Rows",
                "rows": 24,
                "volume": "Up/Down",
                "vaVolume": 70,
                "subscribeRealtime": false,
                "first_visible_bar_time": null,
                "last_visible_bar_time": null,
            }),
        ),
    ])
});

fn built_in_defaults(kind: &str) -> Option<&'static Map<String, Value>> {
    BUILT_IN_DEFAULTS.get(kind).and_then(Value::as_object)
}

/// Built-in TradingView study, eg/ `Volume@tv-basicstudies-241`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BuiltInIndicator {
    #[serde(rename = "type")]
    pub kind: String,
    pub options: Map<String, Value>,
}

impl BuiltInIndicator {
    /// Start from the known defaults of `kind`, or no options for unlisted studies.
    pub fn new(kind: impl Into<String>) -> Result<Self, Error> {
        let kind = kind.into();
        if kind.is_empty() {
            return Err(Error::Indicator(
                "built-in indicator type must not be empty".to_string(),
            ));
        }

        let options = built_in_defaults(&kind).cloned().unwrap_or_default();
        Ok(Self { kind, options })
    }

    /// Set an option. For studies with known defaults the key must exist and the value
    /// must have the default's JSON type, unless `force` is set.
    pub fn set_option(&mut self, key: &str, value: impl Into<Value>, force: bool) -> Result<(), Error> {
        let value = value.into();

        if !force {
            if let Some(defaults) = built_in_defaults(&self.kind) {
                let Some(default) = defaults.get(key) else {
                    return Err(Error::Indicator(format!(
                        "option '{key}' is not allowed with '{}'",
                        self.kind
                    )));
                };

                if !default.is_null() && json_type(default) != json_type(&value) {
                    return Err(Error::Indicator(format!(
                        "wrong '{key}' value type '{}' (must be '{}')",
                        json_type(&value),
                        json_type(default)
                    )));
                }
            }
        }

        self.options.insert(key.to_string(), value);
        Ok(())
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(number) if number.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_pine() -> PineIndicator {
        let mut source = PineInput::new("Source", "source", "close");
        source.internal_id = Some("src".to_string());

        let mut mode = PineInput::new("Mode", "text", "fast");
        mode.options = vec![json!("fast"), json!("slow")];
        mode.inline = Some("mode".to_string());

        PineIndicator::new("PUB;abc", "3.0", "bmI9Yz...")
            .with_input("in_0", PineInput::new("Length", "integer", 14))
            .with_input("in_1", source)
            .with_input("in_2", PineInput::new("Colour", "color", "#ff0000"))
            .with_input("in_3", mode)
            .with_input("in_4", PineInput::new("Show", "bool", true))
            .with_plot("plot_0", "RSI")
    }

    #[test]
    fn test_pine_set_option() {
        struct TestCase {
            key: &'static str,
            value: Value,
            expected: Result<(&'static str, Value), ()>,
        }

        let tests = vec![
            TestCase {
                // TC0: bare index resolves to in_0
                key: "0",
                value: json!(21),
                expected: Ok(("in_0", json!(21))),
            },
            TestCase {
                // TC1: full id
                key: "in_4",
                value: json!(false),
                expected: Ok(("in_4", json!(false))),
            },
            TestCase {
                // TC2: internalID
                key: "src",
                value: json!("open"),
                expected: Ok(("in_1", json!("open"))),
            },
            TestCase {
                // TC3: inline name with allowed option
                key: "mode",
                value: json!("slow"),
                expected: Ok(("in_3", json!("slow"))),
            },
            TestCase {
                // TC4: value outside the allowed options
                key: "mode",
                value: json!("medium"),
                expected: Err(()),
            },
            TestCase {
                // TC5: wrong type for integer input
                key: "0",
                value: json!(2.5),
                expected: Err(()),
            },
            TestCase {
                // TC6: unknown input
                key: "missing",
                value: json!(1),
                expected: Err(()),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let mut pine = sample_pine();
            let actual = pine.set_option(test.key, test.value);

            match (actual, test.expected) {
                (Ok(()), Ok((id, expected))) => {
                    assert_eq!(pine.inputs[id].value, expected, "TC{} failed", index)
                }
                (Err(Error::Indicator(_)), Err(())) => {
                    // Test passed
                }
                (actual, expected) => {
                    // Test failed
                    panic!(
                        "TC{index} failed because actual != expected. \nActual: {actual:?}\nExpected: {expected:?}\n"
                    );
                }
            }
        }
    }

    #[test]
    fn test_pine_wire_inputs() {
        let actual = Indicator::from(sample_pine()).inputs();

        let expected = json!({
            "text": "bmI9Yz...",
            "pineId": "PUB;abc",
            "pineVersion": "3.0",
            "in_0": {"v": 14, "f": false, "t": "integer"},
            "in_1": {"v": "close", "f": false, "t": "source"},
            "in_2": {"v": 2, "f": false, "t": "color"},
            "in_3": {"v": "fast", "f": false, "t": "text"},
            "in_4": {"v": true, "f": false, "t": "bool"},
        });
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_pine_wire_inputs_without_id() {
        let pine = PineIndicator::new("", "", "script");
        assert_eq!(pine.wire_inputs(), json!({"text": "script"}));
        assert_eq!(Indicator::from(pine).kind(), PINE_SCRIPT_TYPE);
    }

    #[test]
    fn test_built_in_defaults() {
        let volume = BuiltInIndicator::new("Volume@tv-basicstudies-241").unwrap();
        assert_eq!(
            Indicator::from(volume).inputs(),
            json!({"length": 20, "col_prev_close": false})
        );

        let unlisted = BuiltInIndicator::new("RSI@tv-basicstudies-241").unwrap();
        assert!(unlisted.options.is_empty());

        assert!(matches!(
            BuiltInIndicator::new(""),
            Err(Error::Indicator(_))
        ));
    }

    #[test]
    fn test_built_in_set_option() {
        struct TestCase {
            kind: &'static str,
            key: &'static str,
            value: Value,
            force: bool,
            expected: bool,
        }

        let tests = vec![
            TestCase {
                // TC0: matching type
                kind: "VbPFixed@tv-basicstudies-241",
                key: "rows",
                value: json!(48),
                force: false,
                expected: true,
            },
            TestCase {
                // TC1: wrong type
                kind: "VbPFixed@tv-basicstudies-241",
                key: "rows",
                value: json!("48"),
                force: false,
                expected: false,
            },
            TestCase {
                // TC2: null default accepts any type
                kind: "VbPFixed@tv-basicstudies-241",
                key: "first_bar_time",
                value: json!(1700000000000_i64),
                force: false,
                expected: true,
            },
            TestCase {
                // TC3: unknown key is denied
                kind: "Volume@tv-basicstudies-241",
                key: "colour",
                value: json!(1),
                force: false,
                expected: false,
            },
            TestCase {
                // TC4: force bypasses checks
                kind: "Volume@tv-basicstudies-241",
                key: "colour",
                value: json!(1),
                force: true,
                expected: true,
            },
            TestCase {
                // TC5: unlisted studies accept anything
                kind: "RSI@tv-basicstudies-241",
                key: "length",
                value: json!(14),
                force: false,
                expected: true,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let mut indicator = BuiltInIndicator::new(test.kind).unwrap();
            let actual = indicator
                .set_option(test.key, test.value.clone(), test.force)
                .is_ok();

            assert_eq!(actual, test.expected, "TC{} failed", index);
            if actual {
                assert_eq!(indicator.options[test.key], test.value, "TC{} failed", index);
            }
        }
    }
}
