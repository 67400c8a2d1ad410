//! Include resolution
//!
//! Expands a layout's `include` references into a flattened document:
//! included widgets are appended under namespaced ids, vars-file names
//! accumulate on the document, and constants merge into one map. Includes
//! referenced by included files are collected in one extra pass, so the
//! effective include depth is exactly two; deeper references are left
//! unexpanded on purpose since existing layouts depend on that cap.
//!
//! Resolution never aborts: a missing or unparseable fragment is logged
//! and skipped, and the rest of the document still resolves.

use crate::document::WidgetDocument;
use crate::vars::{self, VariableTable};
use serde_json::{Map, Value};
use tracing::{error, info, warn};

/// Source of layout fragments, keyed by the `<name>` in
/// `widgets_<name>.json`. The file-backed store implements this; tests use
/// an in-memory map.
pub trait LayoutSource {
    fn read_fragment(&self, name: &str) -> Option<String>;
}

/// In-memory fragment source
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    pub fragments: std::collections::BTreeMap<String, String>,
}

impl MemorySource {
    pub fn with(mut self, name: &str, body: &str) -> Self {
        self.fragments.insert(name.to_string(), body.to_string());
        self
    }
}

impl LayoutSource for MemorySource {
    fn read_fragment(&self, name: &str) -> Option<String> {
        self.fragments.get(name).cloned()
    }
}

/// A fully resolved layout: the flattened document, the variable table it
/// was resolved with, and the vars files that fed the table (watched for
/// changes while the layout stays active)
#[derive(Debug, Clone)]
pub struct ResolvedLayout {
    pub document: WidgetDocument,
    pub vars: VariableTable,
    pub monitored: Vec<String>,
}

fn load_fragment(source: &impl LayoutSource, name: &str) -> Option<Value> {
    let Some(body) = source.read_fragment(name) else {
        warn!(name, "include file is not valid and has been ignored");
        return None;
    };
    match serde_json::from_str(&body) {
        Ok(json) => Some(json),
        Err(err) => {
            error!(name, "could not parse include file: {}", err);
            None
        }
    }
}

/// Include names declared on one widget (or vars entry): a single string
/// or an array of strings
fn include_names(entry: &Value) -> Vec<String> {
    match entry.get("include") {
        Some(Value::String(name)) => vec![name.clone()],
        Some(Value::Array(names)) => names
            .iter()
            .filter_map(|n| n.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

fn add_include(includes: &mut Vec<String>, name: &str) {
    if includes.iter().any(|i| i == name) {
        warn!(name, "ignoring duplicated include entry");
    } else {
        info!(name, "adding to include list");
        includes.push(name.to_string());
    }
}

/// Document `vars` may be a single name, a list of names, or absent
fn vars_names(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(name)) => vec![name.clone()],
        Some(Value::Array(names)) => names
            .iter()
            .filter_map(|n| {
                let name = n.as_str();
                if name.is_none() {
                    warn!("skipping non-string vars entry");
                }
                name.map(str::to_string)
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn constant_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Flatten a raw layout into a [`ResolvedLayout`]
pub fn resolve_layout(
    root: Value,
    source: &impl LayoutSource,
) -> Result<ResolvedLayout, serde_json::Error> {
    let mut root = match root {
        Value::Object(object) => object,
        _ => {
            warn!("layout root is not a JSON object, resolving empty document");
            Map::new()
        }
    };

    let mut widgets: Vec<Value> = match root.remove("widgets") {
        Some(Value::Array(widgets)) => widgets,
        _ => Vec::new(),
    };

    // pass 1: direct includes, in widget order, first occurrence wins
    let mut includes: Vec<String> = Vec::new();
    for widget in &widgets {
        for name in include_names(widget) {
            add_include(&mut includes, &name);
        }
    }

    // pass 2: includes declared inside included files; collected once,
    // which caps the effective depth at two
    let mut nested: Vec<String> = Vec::new();
    for name in includes.clone() {
        let Some(fragment) = load_fragment(source, &name) else {
            continue;
        };
        if let Some(Value::Array(fragment_widgets)) = fragment.get("widgets") {
            for widget in fragment_widgets {
                nested.extend(include_names(widget));
            }
        }
        if let Some(Value::Array(fragment_vars)) = fragment.get("vars") {
            for entry in fragment_vars {
                nested.extend(include_names(entry));
            }
        }
    }
    for name in nested {
        add_include(&mut includes, &name);
    }

    // the document's own vars files are merged like includes as well
    let mut doc_vars = vars_names(root.get("vars"));
    for name in &doc_vars {
        add_include(&mut includes, name);
    }

    let mut constants: Map<String, Value> = match root.remove("constants") {
        Some(Value::Object(constants)) => constants,
        _ => Map::new(),
    };

    // merge every include: widgets under namespaced ids, vars appended,
    // constants last-wins
    for name in &includes {
        let Some(fragment) = load_fragment(source, name) else {
            continue;
        };
        info!(name, "including file");
        if let Some(Value::Array(fragment_widgets)) = fragment.get("widgets") {
            for (index, widget) in fragment_widgets.iter().enumerate() {
                let mut widget = widget.clone();
                if let Some(object) = widget.as_object_mut() {
                    object.insert(
                        "id".to_string(),
                        Value::String(format!("{}_{}", name, index + 1)),
                    );
                } else {
                    warn!(name, "skipping non-object widget entry");
                    continue;
                }
                widgets.push(widget);
            }
        }
        for entry in vars_names(fragment.get("vars")) {
            doc_vars.push(entry);
        }
        if let Some(Value::Object(fragment_constants)) = fragment.get("constants") {
            for (key, value) in fragment_constants {
                constants.insert(key.clone(), value.clone());
            }
        }
    }

    // build the variable table; first definition of a name wins, so files
    // merge in document order
    let mut vars = VariableTable::new();
    let mut monitored: Vec<String> = Vec::new();
    for name in &doc_vars {
        let Some(fragment) = load_fragment(source, name) else {
            continue;
        };
        vars.merge_file(&fragment);
        let filename = format!("widgets_{}.json", name);
        if !monitored.contains(&filename) {
            info!(file = %filename, "monitoring vars file");
            monitored.push(filename);
        }
    }

    // final pass: substitute variables into every widget uri
    for widget in &mut widgets {
        let Some(object) = widget.as_object_mut() else {
            continue;
        };
        if let Some(uri) = object.get("uri").and_then(Value::as_str).map(str::to_string) {
            let resolved = vars::resolve_vars(&uri, &vars);
            object.insert("uri".to_string(), Value::String(resolved));
        }
    }

    let constants: Map<String, Value> = constants
        .into_iter()
        .filter_map(|(key, value)| match constant_string(&value) {
            Some(text) => Some((key, Value::String(text))),
            None => {
                warn!(key = %key, "skipping non-scalar constant");
                None
            }
        })
        .collect();

    root.insert("widgets".to_string(), Value::Array(widgets));
    root.insert(
        "vars".to_string(),
        Value::Array(doc_vars.into_iter().map(Value::String).collect()),
    );
    root.insert("constants".to_string(), Value::Object(constants));

    let document = WidgetDocument::from_value(Value::Object(root))?;
    Ok(ResolvedLayout {
        document,
        vars,
        monitored,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn widget_ids(layout: &ResolvedLayout) -> Vec<&str> {
        layout
            .document
            .widgets
            .iter()
            .map(|w| w.id.as_str())
            .collect()
    }

    #[test]
    fn test_direct_includes_are_flattened_with_namespaced_ids() {
        let source = MemorySource::default()
            .with("b", r#"{"widgets":[{"uri":"b1.png"},{"uri":"b2.png"}]}"#)
            .with("c", r#"{"widgets":[{"uri":"c1.png"}]}"#);
        let root = serde_json::json!({
            "widgets": [{"uri": "root.png", "include": ["b", "c"]}],
        });

        let layout = resolve_layout(root, &source).unwrap();
        assert_eq!(widget_ids(&layout), vec!["", "b_1", "b_2", "c_1"]);
    }

    #[test]
    fn test_nested_includes_resolve_one_level_only() {
        // a includes b; b includes d; d includes e. Depth caps at two:
        // d's widgets are merged, e's are not.
        let source = MemorySource::default()
            .with("b", r#"{"widgets":[{"uri":"b.png","include":"d"}]}"#)
            .with("d", r#"{"widgets":[{"uri":"d.png","include":"e"}]}"#)
            .with("e", r#"{"widgets":[{"uri":"e.png"}]}"#);
        let root = serde_json::json!({
            "widgets": [{"uri": "root.png", "include": "b"}],
        });

        let layout = resolve_layout(root, &source).unwrap();
        let ids = widget_ids(&layout);
        assert!(ids.contains(&"b_1"));
        assert!(ids.contains(&"d_1"));
        assert!(!layout.document.widgets.iter().any(|w| w.uri == "e.png"));
    }

    #[test]
    fn test_duplicate_includes_keep_first_position() {
        let source = MemorySource::default()
            .with("b", r#"{"widgets":[{"uri":"b.png"}]}"#)
            .with("c", r#"{"widgets":[{"uri":"c.png"}]}"#);
        let root = serde_json::json!({
            "widgets": [
                {"uri": "one.png", "include": ["b", "c"]},
                {"uri": "two.png", "include": "b"},
            ],
        });

        let layout = resolve_layout(root, &source).unwrap();
        assert_eq!(widget_ids(&layout), vec!["", "", "b_1", "c_1"]);
    }

    #[test]
    fn test_missing_include_is_skipped() {
        let source = MemorySource::default().with("b", r#"{"widgets":[{"uri":"b.png"}]}"#);
        let root = serde_json::json!({
            "widgets": [{"uri": "root.png", "include": ["ghost", "b"]}],
        });

        let layout = resolve_layout(root, &source).unwrap();
        assert_eq!(widget_ids(&layout), vec!["", "b_1"]);
    }

    #[test]
    fn test_unparseable_include_is_skipped() {
        let source = MemorySource::default()
            .with("bad", "{ not json")
            .with("b", r#"{"widgets":[{"uri":"b.png"}]}"#);
        let root = serde_json::json!({
            "widgets": [{"uri": "root.png", "include": ["bad", "b"]}],
        });

        let layout = resolve_layout(root, &source).unwrap();
        assert_eq!(widget_ids(&layout), vec!["", "b_1"]);
    }

    #[test]
    fn test_vars_files_merge_first_wins() {
        let source = MemorySource::default()
            .with("net", r#"{"host": "alpha"}"#)
            .with("site", r#"{"host": "beta", "port": 8080}"#);
        let root = serde_json::json!({
            "widgets": [{"uri": "http://${host}:${port}/cam.jpg"}],
            "vars": ["net", "site"],
        });

        let layout = resolve_layout(root, &source).unwrap();
        assert_eq!(layout.vars.get("host"), Some("alpha"));
        assert_eq!(layout.document.widgets[0].uri, "http://alpha:8080/cam.jpg");
        assert_eq!(
            layout.monitored,
            vec!["widgets_net.json", "widgets_site.json"]
        );
    }

    #[test]
    fn test_constants_merge_last_wins() {
        let source = MemorySource::default()
            .with("b", r#"{"widgets":[],"constants":{"theme":"dark"}}"#)
            .with("c", r#"{"widgets":[],"constants":{"theme":"light","speed":3}}"#);
        let root = serde_json::json!({
            "widgets": [{"uri": "root.png", "include": ["b", "c"]}],
            "constants": {"theme": "base"},
        });

        let layout = resolve_layout(root, &source).unwrap();
        assert_eq!(
            layout.document.constants.get("theme"),
            Some(&"light".to_string())
        );
        assert_eq!(
            layout.document.constants.get("speed"),
            Some(&"3".to_string())
        );
    }

    #[test]
    fn test_clock_include_end_to_end() {
        let source = MemorySource::default().with(
            "clock",
            r#"{"widgets":[{"uri":"clock.png?format=hh:mm","screen":0,"position":{"x":"10px","y":"10px"}}]}"#,
        );
        let root = serde_json::json!({
            "widgets": [{"include": "clock"}],
        });

        let layout = resolve_layout(root, &source).unwrap();
        let clock = layout
            .document
            .widgets
            .iter()
            .find(|w| w.id == "clock_1")
            .expect("included widget present");
        assert_eq!(clock.uri, "clock.png?format=hh:mm");
    }
}
