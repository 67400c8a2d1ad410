//! File-backed layout store
//!
//! Layouts live as `widgets_<name>.json` files under one root directory.
//! Activation resolves a layout and writes the flattened result to
//! `widgets.json`, records the active layout in `.current`, and updates the
//! selection flags in the layout list so the editor reflects what is live.

use crate::document::WidgetDocument;
use crate::include::{self, LayoutSource, ResolvedLayout};
use crate::protocol::WidgetPos;
use serde_json::Value;
use std::path::PathBuf;
use std::time::SystemTime;
use thiserror::Error;
use tracing::{info, warn};

/// The flattened, active layout served to render clients
pub const ACTIVE_FILE: &str = "widgets.json";

/// Layout list consumed by the editor
pub const LIST_FILE: &str = "widgets_list.json";

/// Name of the currently active layout, persisted across restarts
pub const CURRENT_FILE: &str = ".current";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("file not found: {0}")]
    Missing(String),
    #[error("invalid widget reference: {0}")]
    BadWidgetRef(String),
}

#[derive(Debug, Clone)]
pub struct LayoutStore {
    root: PathBuf,
}

impl LayoutStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn path_of(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }

    pub fn fragment_filename(name: &str) -> String {
        format!("widgets_{}.json", name)
    }

    /// Read and parse a JSON file relative to the store root
    pub fn read_json(&self, filename: &str) -> Result<Value, StoreError> {
        let path = self.path_of(filename);
        if !path.exists() {
            return Err(StoreError::Missing(filename.to_string()));
        }
        let body = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&body)?)
    }

    fn write_json(&self, filename: &str, value: &Value) -> Result<(), StoreError> {
        let body = serde_json::to_string_pretty(value)?;
        std::fs::write(self.path_of(filename), body)?;
        Ok(())
    }

    /// Resolve a layout without activating it
    pub fn load_widget_data(&self, filename: &str) -> Result<ResolvedLayout, StoreError> {
        let json = self.read_json(filename)?;
        Ok(include::resolve_layout(json, self)?)
    }

    /// Activate a layout: resolve it, write the flattened document to the
    /// active file, and persist the selection
    pub fn activate(&self, filename: &str) -> Result<ResolvedLayout, StoreError> {
        info!(filename, "activating layout");
        self.save_current(filename);
        let layout = self.load_widget_data(filename)?;
        let flattened = serde_json::to_value(&layout.document)?;
        self.write_json(ACTIVE_FILE, &flattened)?;
        self.update_selected(filename);
        Ok(layout)
    }

    /// The flattened document currently on disk
    pub fn active_document(&self) -> Result<WidgetDocument, StoreError> {
        let json = self.read_json(ACTIVE_FILE)?;
        Ok(WidgetDocument::from_value(json)?)
    }

    /// Name of the active layout file recorded by the last activation
    pub fn current_layout(&self) -> Option<String> {
        let path = self.path_of(CURRENT_FILE);
        let name = std::fs::read_to_string(path).ok()?;
        let name = name.trim().to_string();
        if name.is_empty() { None } else { Some(name) }
    }

    fn save_current(&self, filename: &str) {
        if let Err(err) = std::fs::write(self.path_of(CURRENT_FILE), filename) {
            warn!(filename, "could not save current layout: {}", err);
        }
    }

    /// Flip the `selected` flags in the layout list to the given file
    fn update_selected(&self, filename: &str) {
        let mut json = match self.read_json(LIST_FILE) {
            Ok(json) => json,
            Err(err) => {
                warn!("could not read layout list: {}", err);
                return;
            }
        };
        let Some(list) = json.get_mut("list").and_then(Value::as_array_mut) else {
            warn!("layout list has no list array");
            return;
        };
        for entry in list {
            let Some(object) = entry.as_object_mut() else {
                continue;
            };
            let selected = object.get("filename").and_then(Value::as_str) == Some(filename);
            object.insert("selected".to_string(), Value::Bool(selected));
        }
        if let Err(err) = self.write_json(LIST_FILE, &json) {
            warn!("could not write layout list: {}", err);
        }
    }

    /// Rewrite one widget's position inside its source fragment. The id
    /// carries the fragment name and the 1-based widget index. The previous
    /// file contents are kept as a `.old` backup; if the backup cannot be
    /// written the save is aborted.
    pub fn update_widget_position(&self, id: &str, pos: &WidgetPos) -> Result<(), StoreError> {
        let Some((fragment, index)) = id.rsplit_once('_') else {
            return Err(StoreError::BadWidgetRef(id.to_string()));
        };
        let index: usize = index
            .parse()
            .map_err(|_| StoreError::BadWidgetRef(id.to_string()))?;
        if index == 0 {
            return Err(StoreError::BadWidgetRef(id.to_string()));
        }

        let filename = Self::fragment_filename(fragment);
        let mut json = self.read_json(&filename)?;
        let Some(widgets) = json.get_mut("widgets").and_then(Value::as_array_mut) else {
            return Err(StoreError::BadWidgetRef(id.to_string()));
        };
        let Some(widget) = widgets.get_mut(index - 1).and_then(Value::as_object_mut) else {
            return Err(StoreError::BadWidgetRef(id.to_string()));
        };

        let position = widget
            .entry("position".to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        let Some(position) = position.as_object_mut() else {
            return Err(StoreError::BadWidgetRef(id.to_string()));
        };
        position.insert("x".to_string(), Value::String(pos.x.to_css()));
        position.insert("y".to_string(), Value::String(pos.y.to_css()));
        position.insert("w".to_string(), Value::String(pos.w.to_css()));
        position.insert("h".to_string(), Value::String(pos.h.to_css()));

        let path = self.path_of(&filename);
        let backup = self.path_of(&format!("{}.old", filename));
        std::fs::copy(&path, &backup)?;

        self.write_json(&filename, &json)?;
        info!(filename, "widget position updated");
        Ok(())
    }

    /// Last modification time of a file under the root, if it exists
    pub fn modified(&self, filename: &str) -> Option<SystemTime> {
        std::fs::metadata(self.path_of(filename))
            .and_then(|m| m.modified())
            .ok()
    }
}

impl LayoutSource for LayoutStore {
    fn read_fragment(&self, name: &str) -> Option<String> {
        std::fs::read_to_string(self.path_of(&Self::fragment_filename(name))).ok()
    }
}
