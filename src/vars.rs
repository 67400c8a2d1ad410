//! Variable resolution
//!
//! Two placeholder families exist in layout content: `${name}` resolves
//! against the variable table built from vars files at include time, and
//! `$[name]` resolves against live sensor values at render time. Both scan
//! for the first occurrence, substitute, and repeat; a substituted value
//! containing another placeholder is resolved on the next pass, capped so a
//! self-referential table cannot loop forever.
//!
//! The numeric path substitutes `sensor=N` tokens with the raw sensor value
//! and hands the result to the expression engine; it is used for
//! playback-rate formulas and `$[sensor=N]` arithmetic.

use crate::expr::{self, ExprError};
use crate::sensors::SensorData;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

/// Substitution passes allowed before a template is declared cyclic
pub const MAX_SUBSTITUTIONS: usize = 100;

/// Matches encodeURIComponent: everything but alphanumerics and -_.!~*'()
const VAR_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Flat name-to-value table built from vars files. Values are stored
/// percent-encoded since they end up inside widget URIs.
#[derive(Debug, Clone, Default)]
pub struct VariableTable {
    entries: BTreeMap<String, String>,
}

impl VariableTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(|v| v.as_str())
    }

    /// Insert a raw value, percent-encoding it. Keys already present win:
    /// the first vars file to define a name keeps it.
    pub fn insert(&mut self, name: &str, value: &str) {
        let encoded = utf8_percent_encode(value, VAR_ENCODE).to_string();
        if self.entries.contains_key(name) {
            warn!(name, "variable already defined, keeping first value");
            return;
        }
        self.entries.insert(name.to_string(), encoded);
    }

    /// Merge the top-level keys of a vars file
    pub fn merge_file(&mut self, json: &Value) {
        let Some(object) = json.as_object() else {
            warn!("vars file is not a JSON object, ignoring");
            return;
        };
        for (key, value) in object {
            match value {
                Value::String(s) => self.insert(key, s),
                Value::Number(n) => self.insert(key, &n.to_string()),
                Value::Bool(b) => self.insert(key, &b.to_string()),
                _ => warn!(key, "skipping non-scalar vars entry"),
            }
        }
    }
}

/// Percent-encode a string the way variable values are encoded
pub fn encode_uri_component(value: &str) -> String {
    utf8_percent_encode(value, VAR_ENCODE).to_string()
}

/// Resolve `${name}` placeholders against the variable table. Unknown
/// names resolve to the empty string.
pub fn resolve_vars(template: &str, vars: &VariableTable) -> String {
    let mut out = template.to_string();
    for _ in 0..MAX_SUBSTITUTIONS {
        let Some(start) = out.find("${") else {
            return out;
        };
        let Some(end) = out[start + 2..].find('}') else {
            return out;
        };
        let name = out[start + 2..start + 2 + end].to_string();
        let value = vars.get(&name).unwrap_or("");
        out.replace_range(start..start + 2 + end + 1, value);
    }
    warn!(template, "placeholder substitution exceeded iteration cap");
    out
}

/// Resolve `$[name]` placeholders against sensor display values. With no
/// sensor data the template passes through untouched.
pub fn resolve_sensor_values(template: &str, data: Option<&SensorData>) -> String {
    let Some(data) = data else {
        return template.to_string();
    };
    let mut out = template.to_string();
    for _ in 0..MAX_SUBSTITUTIONS {
        let Some(start) = out.find("$[") else {
            return out;
        };
        let Some(end) = out[start + 2..].find(']') else {
            return out;
        };
        let name = out[start + 2..start + 2 + end].to_string();
        let value = data.value(&name).unwrap_or("").to_string();
        out.replace_range(start..start + 2 + end + 1, &value);
    }
    warn!(template, "sensor substitution exceeded iteration cap");
    out
}

/// Substitute `sensor=N` tokens (bare or `$[sensor=N]`-wrapped) with the
/// raw numeric value of sensor `N`
pub fn substitute_sensor_raw(formula: &str, data: &SensorData) -> String {
    let mut out = String::with_capacity(formula.len());
    let mut rest = formula;

    while let Some(found) = rest.find("sensor=") {
        let mut head_end = found;
        // a `$[` prefix belongs to the token
        if rest[..found].ends_with("$[") {
            head_end -= 2;
        }
        out.push_str(&rest[..head_end]);

        let after = &rest[found + "sensor=".len()..];
        let digits: String = after.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            // not a sensor token, emit verbatim and keep scanning
            out.push_str(&rest[head_end..found + "sensor=".len()]);
            rest = after;
            continue;
        }

        let raw = data.value_raw(&digits).unwrap_or(0.0);
        out.push_str(&format_raw(raw));

        let mut tail = &after[digits.len()..];
        if head_end != found && tail.starts_with(']') {
            tail = &tail[1..];
        }
        rest = tail;
    }

    out.push_str(rest);
    out
}

/// Raw values print without a trailing `.0` so formulas read like the
/// telemetry they came from
fn format_raw(raw: f64) -> String {
    if raw.fract() == 0.0 && raw.abs() < 1e15 {
        format!("{}", raw as i64)
    } else {
        format!("{}", raw)
    }
}

/// The numeric pipeline: substitute raw sensor values, then evaluate the
/// remaining arithmetic
pub fn resolve_numeric(formula: &str, data: &SensorData) -> Result<f64, ExprError> {
    let substituted = substitute_sensor_raw(formula, data);
    expr::eval_number(&substituted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::SensorReading;

    fn table(pairs: &[(&str, &str)]) -> VariableTable {
        let mut vars = VariableTable::new();
        for (name, value) in pairs {
            vars.insert(name, value);
        }
        vars
    }

    fn sensor_data(pairs: &[(&str, &str, f64)]) -> SensorData {
        let mut data = SensorData::default();
        for (id, value, raw) in pairs {
            data.sensors.insert(
                id.to_string(),
                SensorReading {
                    value: value.to_string(),
                    value_raw: *raw,
                    ..Default::default()
                },
            );
        }
        data
    }

    #[test]
    fn test_resolve_named_variable() {
        let vars = table(&[("name", "x")]);
        assert_eq!(resolve_vars("${name}", &vars), "x");
        assert_eq!(resolve_vars("a ${name} b", &vars), "a x b");
    }

    #[test]
    fn test_unknown_variable_resolves_empty() {
        let vars = VariableTable::new();
        assert_eq!(resolve_vars("x${missing}y", &vars), "xy");
    }

    #[test]
    fn test_values_are_percent_encoded() {
        let vars = table(&[("host", "my pc/one")]);
        assert_eq!(resolve_vars("${host}", &vars), "my%20pc%2Fone");
    }

    #[test]
    fn test_first_definition_wins() {
        let mut vars = VariableTable::new();
        vars.merge_file(&serde_json::json!({"host": "alpha"}));
        vars.merge_file(&serde_json::json!({"host": "beta", "port": 9}));
        assert_eq!(vars.get("host"), Some("alpha"));
        assert_eq!(vars.get("port"), Some("9"));
    }

    #[test]
    fn test_substitution_cap_terminates() {
        // encoded values cannot contain a literal `${`, so a cycle needs a
        // table entry planted behind the encoder
        let mut vars = VariableTable::new();
        vars.entries.insert("b".to_string(), "${b}".to_string());
        let out = resolve_vars("${b}", &vars);
        assert_eq!(out, "${b}");
    }

    #[test]
    fn test_sensor_value_substitution() {
        let data = sensor_data(&[("cpu=>load", "42 %", 42.5)]);
        assert_eq!(
            resolve_sensor_values("load: $[cpu=>load]", Some(&data)),
            "load: 42 %"
        );
        assert_eq!(
            resolve_sensor_values("$[missing] here", Some(&data)),
            " here"
        );
        assert_eq!(resolve_sensor_values("$[cpu=>load]", None), "$[cpu=>load]");
    }

    #[test]
    fn test_numeric_path() {
        let data = sensor_data(&[("0", "42", 42.0)]);
        assert_eq!(resolve_numeric("$[sensor=0]", &data).unwrap(), 42.0);
        assert_eq!(resolve_numeric("sensor=0 + 8", &data).unwrap(), 50.0);

        let data = sensor_data(&[("0", "40", 40.0)]);
        assert_eq!(resolve_numeric("100.0/sensor=0", &data).unwrap(), 2.5);
    }

    #[test]
    fn test_numeric_path_missing_sensor_reads_zero() {
        let data = sensor_data(&[]);
        assert_eq!(resolve_numeric("sensor=7 + 1", &data).unwrap(), 1.0);
    }
}
