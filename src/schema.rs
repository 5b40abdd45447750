//! Schema registry: named JSON Schema documents for extraction.
//!
//! A schema describes the object the model must return for one document type.
//! The registry is loaded from a directory of `*.json` files (the file stem is
//! the schema name), from an in-memory mapping, or from the four schemas
//! bundled with the crate.
//!
//! Every schema is validated on the way in: it must carry `title`,
//! `description`, `type` and `properties`, with `type == "object"` and
//! `properties` a mapping. Lookups are strict ([`SchemaRegistry::get`]); the
//! silent fallback to a default name is a separate, explicit operation
//! ([`SchemaRegistry::resolve`]) meant for callers that prefer it.

use crate::config::SCHEMAS_DIR_ENV;
use crate::error::VisionParserError;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Names of the schemas bundled with the crate.
pub const BUILTIN_SCHEMAS: [&str; 4] = ["resume", "invoice", "receipt", "id_card"];

const BUILTIN_SOURCES: [(&str, &str); 4] = [
    ("resume", include_str!("../schemas/resume.json")),
    ("invoice", include_str!("../schemas/invoice.json")),
    ("receipt", include_str!("../schemas/receipt.json")),
    ("id_card", include_str!("../schemas/id_card.json")),
];

const REQUIRED_KEYS: [&str; 4] = ["title", "description", "type", "properties"];

/// A validated JSON Schema document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Schema(Value);

impl Schema {
    /// Validate `value` and wrap it. `name` is used in error messages only.
    pub fn from_value(name: &str, value: Value) -> Result<Self, VisionParserError> {
        validate(name, &value)?;
        Ok(Self(value))
    }

    pub fn title(&self) -> &str {
        self.0.get("title").and_then(Value::as_str).unwrap_or_default()
    }

    pub fn description(&self) -> &str {
        self.0
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// The `properties` mapping. Guaranteed to exist by validation.
    pub fn properties(&self) -> &Map<String, Value> {
        static EMPTY: once_cell::sync::Lazy<Map<String, Value>> =
            once_cell::sync::Lazy::new(Map::new);
        self.0
            .get("properties")
            .and_then(Value::as_object)
            .unwrap_or(&EMPTY)
    }

    pub fn has_property(&self, key: &str) -> bool {
        self.properties().contains_key(key)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

/// Check a schema document's structure.
pub fn validate(name: &str, value: &Value) -> Result<(), VisionParserError> {
    let invalid = |reason: String| VisionParserError::InvalidSchema {
        name: name.to_string(),
        reason,
    };

    let obj = value
        .as_object()
        .ok_or_else(|| invalid("schema must be a JSON object".into()))?;

    for key in REQUIRED_KEYS {
        if !obj.contains_key(key) {
            return Err(invalid(format!("missing required field '{key}'")));
        }
    }

    if obj.get("type").and_then(Value::as_str) != Some("object") {
        return Err(invalid("'type' must be \"object\"".into()));
    }

    if !obj.get("properties").is_some_and(Value::is_object) {
        return Err(invalid("'properties' must be a mapping".into()));
    }

    Ok(())
}

/// Where to load schemas from.
#[derive(Debug, Clone)]
pub enum SchemaSource {
    /// Every `*.json` file in the directory; the file stem is the name.
    Directory(PathBuf),
    /// Pre-supplied documents keyed by name.
    Mapping(BTreeMap<String, Value>),
    /// The schemas bundled with the crate.
    Builtin,
}

impl SchemaSource {
    /// `VISION_PARSER_SCHEMAS_DIR` when set and non-empty, else the built-ins.
    pub fn from_env() -> Self {
        match std::env::var(SCHEMAS_DIR_ENV) {
            Ok(dir) if !dir.trim().is_empty() => SchemaSource::Directory(PathBuf::from(dir)),
            _ => SchemaSource::Builtin,
        }
    }
}

/// Named, validated schema documents.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, Schema>,
}

impl SchemaRegistry {
    /// Load from any [`SchemaSource`].
    pub fn load(source: SchemaSource) -> Result<Self, VisionParserError> {
        match source {
            SchemaSource::Directory(dir) => Self::from_dir(&dir),
            SchemaSource::Mapping(map) => Self::from_mapping(map),
            SchemaSource::Builtin => Self::builtin(),
        }
    }

    /// Load every `*.json` file in `dir`. Other files and subdirectories are ignored.
    pub fn from_dir(dir: &Path) -> Result<Self, VisionParserError> {
        let load_failed = |path: &Path, detail: String| VisionParserError::SchemaLoadFailed {
            path: path.to_path_buf(),
            detail,
        };

        let entries = std::fs::read_dir(dir).map_err(|e| load_failed(dir, e.to_string()))?;

        let mut registry = Self::default();
        for entry in entries {
            let path = entry.map_err(|e| load_failed(dir, e.to_string()))?.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            let text =
                std::fs::read_to_string(&path).map_err(|e| load_failed(&path, e.to_string()))?;
            let value: Value =
                serde_json::from_str(&text).map_err(|e| load_failed(&path, e.to_string()))?;

            debug!("Loaded schema '{}' from {}", name, path.display());
            registry.register(name, value)?;
        }

        info!("Loaded {} schemas from {}", registry.len(), dir.display());
        Ok(registry)
    }

    /// Build from pre-supplied documents.
    pub fn from_mapping(map: BTreeMap<String, Value>) -> Result<Self, VisionParserError> {
        let mut registry = Self::default();
        for (name, value) in map {
            registry.register(name, value)?;
        }
        Ok(registry)
    }

    /// The schemas bundled with the crate.
    pub fn builtin() -> Result<Self, VisionParserError> {
        let mut registry = Self::default();
        for (name, text) in BUILTIN_SOURCES {
            let value: Value = serde_json::from_str(text).map_err(|e| {
                VisionParserError::Internal(format!("bundled schema '{name}' is not JSON: {e}"))
            })?;
            registry.register(name, value)?;
        }
        Ok(registry)
    }

    /// Validate and insert (or replace) a schema. Administrative path.
    pub fn register(&mut self, name: impl Into<String>, value: Value) -> Result<(), VisionParserError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(VisionParserError::InvalidSchema {
                name,
                reason: "schema name must not be empty".into(),
            });
        }
        let schema = Schema::from_value(&name, value)?;
        self.schemas.insert(name, schema);
        Ok(())
    }

    /// Strict lookup.
    pub fn get(&self, name: &str) -> Result<&Schema, VisionParserError> {
        self.schemas
            .get(name)
            .ok_or_else(|| VisionParserError::SchemaNotFound {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }

    /// Schema names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.schemas.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Resolve a requested schema name, falling back silently.
    ///
    /// Returns `requested` when it is one of `built_ins` or a registered
    /// schema, otherwise `default`. Never fails.
    pub fn resolve(&self, requested: &str, built_ins: &[&str], default: &str) -> String {
        if built_ins.contains(&requested) || self.contains(requested) {
            requested.to_string()
        } else {
            debug!("Unknown schema '{}', falling back to '{}'", requested, default);
            default.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn well_formed() -> Value {
        json!({
            "title": "x",
            "description": "y",
            "type": "object",
            "properties": { "name": { "type": "string" } }
        })
    }

    #[test]
    fn accepts_well_formed_schema() {
        assert!(validate("x", &well_formed()).is_ok());
    }

    #[test]
    fn rejects_each_missing_required_field() {
        for key in REQUIRED_KEYS {
            let mut v = well_formed();
            v.as_object_mut().unwrap().remove(key);
            let err = validate("x", &v).unwrap_err();
            assert!(
                matches!(err, VisionParserError::InvalidSchema { ref reason, .. } if reason.contains(key)),
                "missing {key} should be rejected, got {err:?}"
            );
        }
    }

    #[test]
    fn rejects_non_object_type() {
        let mut v = well_formed();
        v["type"] = json!("array");
        assert!(validate("x", &v).is_err());
    }

    #[test]
    fn rejects_non_mapping_properties() {
        let mut v = well_formed();
        v["properties"] = json!(["name"]);
        assert!(validate("x", &v).is_err());
        assert!(validate("x", &json!("not an object")).is_err());
    }

    #[test]
    fn builtin_registry_has_four_valid_schemas() {
        let reg = SchemaRegistry::builtin().unwrap();
        assert_eq!(reg.names(), vec!["id_card", "invoice", "receipt", "resume"]);
        let resume = reg.get("resume").unwrap();
        assert_eq!(resume.title(), "Resume");
        assert!(resume.has_property("experience"));
    }

    #[test]
    fn get_unknown_is_schema_not_found() {
        let reg = SchemaRegistry::builtin().unwrap();
        assert!(matches!(
            reg.get("purchase_order"),
            Err(VisionParserError::SchemaNotFound { ref name }) if name == "purchase_order"
        ));
    }

    #[test]
    fn resolve_falls_back_silently() {
        let mut reg = SchemaRegistry::builtin().unwrap();
        assert_eq!(reg.resolve("invoice", &BUILTIN_SCHEMAS, "resume"), "invoice");
        assert_eq!(
            reg.resolve("nonexistent-custom", &BUILTIN_SCHEMAS, "resume"),
            "resume"
        );

        reg.register("nonexistent-custom", well_formed()).unwrap();
        assert_eq!(
            reg.resolve("nonexistent-custom", &BUILTIN_SCHEMAS, "resume"),
            "nonexistent-custom"
        );
    }

    #[test]
    fn built_in_names_resolve_even_when_not_loaded() {
        let reg = SchemaRegistry::default();
        assert_eq!(reg.resolve("receipt", &BUILTIN_SCHEMAS, "resume"), "receipt");
    }

    #[test]
    fn register_rejects_empty_name_and_replaces_existing() {
        let mut reg = SchemaRegistry::default();
        assert!(reg.register("  ", well_formed()).is_err());

        reg.register("a", well_formed()).unwrap();
        let mut updated = well_formed();
        updated["title"] = json!("updated");
        reg.register("a", updated).unwrap();
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get("a").unwrap().title(), "updated");
    }

    #[test]
    fn mapping_source_validates_entries() {
        let mut map = BTreeMap::new();
        map.insert("ok".to_string(), well_formed());
        map.insert("bad".to_string(), json!({"title": "t"}));
        assert!(SchemaRegistry::load(SchemaSource::Mapping(map)).is_err());
    }
}
