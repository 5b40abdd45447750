//! Parser service: the library's main entry point.
//!
//! A [`ParserService`] owns a [`SchemaRegistry`] and a cache of
//! [`DocumentParser`]s keyed by schema name. Parsers are created lazily on the
//! first request for a schema and reused afterwards.
//!
//! ## Construction checks
//!
//! Two problems are caught before any request is served:
//! - the configured default schema is not in the registry
//!   ([`VisionParserError::DefaultSchemaNotFound`]);
//! - no model provider was injected and the credential is missing or a
//!   documentation placeholder ([`VisionParserError::MissingApiKey`] /
//!   [`VisionParserError::PlaceholderApiKey`]).
//!
//! ## Lookups are strict
//!
//! An unknown `schema_type` fails with [`VisionParserError::SchemaNotFound`].
//! Callers that prefer to fall back to the default schema call
//! [`ParserService::resolve_schema`] first.
//!
//! ## Cache
//!
//! The cache sits behind a mutex held across lookup *and* construction, so
//! concurrent first requests for one schema build exactly one parser.
//! [`ParserService::register_schema`] does not touch cached parsers; use
//! [`ParserService::invalidate`] or [`ParserService::clear_cache`] to pick up
//! a replaced schema.

use crate::config::{ApiKey, ParserConfig};
use crate::document;
use crate::error::VisionParserError;
use crate::events::{EventCallback, NoopEventCallback};
use crate::parser::DocumentParser;
use crate::schema::{Schema, SchemaRegistry, SchemaSource, BUILTIN_SCHEMAS};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Label used in events for caller-supplied base64 images.
const BASE64_DOCUMENT: &str = "<base64>";

/// Parsers keyed by schema name, oldest first when a capacity is set.
#[derive(Default)]
struct ParserCache {
    entries: HashMap<String, Arc<DocumentParser>>,
    order: VecDeque<String>,
}

impl ParserCache {
    fn get(&self, name: &str) -> Option<Arc<DocumentParser>> {
        self.entries.get(name).cloned()
    }

    fn insert(&mut self, name: String, parser: Arc<DocumentParser>, capacity: Option<usize>) {
        if let Some(cap) = capacity {
            while self.entries.len() >= cap {
                let Some(oldest) = self.order.pop_front() else {
                    break;
                };
                debug!("Evicting cached parser '{}'", oldest);
                self.entries.remove(&oldest);
            }
        }
        self.order.push_back(name.clone());
        self.entries.insert(name, parser);
    }

    fn remove(&mut self, name: &str) -> bool {
        self.order.retain(|n| n != name);
        self.entries.remove(name).is_some()
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Schema-driven document parsing with per-schema parser reuse.
pub struct ParserService {
    config: ParserConfig,
    api_key: Option<ApiKey>,
    registry: RwLock<SchemaRegistry>,
    parsers: Mutex<ParserCache>,
    events: EventCallback,
}

impl std::fmt::Debug for ParserService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParserService")
            .field("config", &self.config)
            .field("schemas", &self.schema_names())
            .field("cached_parsers", &self.cached_parsers())
            .finish()
    }
}

impl ParserService {
    /// Load schemas from `source` and build the service.
    pub fn new(config: ParserConfig, source: SchemaSource) -> Result<Self, VisionParserError> {
        let registry = SchemaRegistry::load(source)?;
        Self::with_registry(config, registry)
    }

    /// Build the service around an already-loaded registry.
    pub fn with_registry(
        config: ParserConfig,
        registry: SchemaRegistry,
    ) -> Result<Self, VisionParserError> {
        if !registry.contains(&config.default_schema) {
            return Err(VisionParserError::DefaultSchemaNotFound {
                name: config.default_schema.clone(),
            });
        }

        let api_key = match config.provider {
            Some(_) => config.api_key.clone(),
            None => Some(config.resolve_api_key()?),
        };

        let events = config
            .event_callback
            .clone()
            .unwrap_or_else(|| Arc::new(NoopEventCallback) as EventCallback);

        info!(
            "Parser service ready: {} schemas, default '{}', model {}",
            registry.len(),
            config.default_schema,
            config.model
        );

        Ok(Self {
            config,
            api_key,
            registry: RwLock::new(registry),
            parsers: Mutex::new(ParserCache::default()),
            events,
        })
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    pub fn default_schema(&self) -> &str {
        &self.config.default_schema
    }

    /// Registered schema names, sorted.
    pub fn schema_names(&self) -> Vec<String> {
        self.registry().names()
    }

    /// A copy of one schema document.
    pub fn schema(&self, name: &str) -> Result<Schema, VisionParserError> {
        self.registry().get(name).cloned()
    }

    /// Map a requested schema name to one that can be parsed, falling back
    /// to the default schema for unknown names. Never fails.
    pub fn resolve_schema(&self, requested: Option<&str>) -> String {
        match requested {
            Some(name) => self
                .registry()
                .resolve(name, &BUILTIN_SCHEMAS, &self.config.default_schema),
            None => self.config.default_schema.clone(),
        }
    }

    /// Validate and add (or replace) a schema. Cached parsers are left alone.
    pub fn register_schema(
        &self,
        name: impl Into<String>,
        value: Value,
    ) -> Result<(), VisionParserError> {
        let name = name.into();
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(name.clone(), value)?;
        info!("Registered schema '{}'", name);
        Ok(())
    }

    /// Drop the cached parser for `name`. Returns whether one was cached.
    pub fn invalidate(&self, name: &str) -> bool {
        self.cache().remove(name)
    }

    pub fn clear_cache(&self) {
        self.cache().clear();
    }

    /// Schema names with a cached parser, sorted.
    pub fn cached_parsers(&self) -> Vec<String> {
        self.cache().names()
    }

    /// The parser for `schema_name`, constructing and caching it on first use.
    pub fn parser(&self, schema_name: &str) -> Result<Arc<DocumentParser>, VisionParserError> {
        let mut cache = self.cache();
        if let Some(parser) = cache.get(schema_name) {
            return Ok(parser);
        }

        let schema = self.registry().get(schema_name)?.clone();
        let parser = Arc::new(self.build_parser(schema_name, schema)?);
        cache.insert(
            schema_name.to_string(),
            Arc::clone(&parser),
            self.config.max_cached_parsers,
        );
        drop(cache);

        debug!("Created parser for '{}'", schema_name);
        self.events.on_parser_created(schema_name);
        Ok(parser)
    }

    /// Parse page `page_number` (1-indexed) of a document.
    ///
    /// `schema_type` of None (or blank) means the default schema; an unknown
    /// name is an error. `prompt` overrides the schema's default instruction.
    pub async fn parse_document(
        &self,
        path: impl AsRef<Path>,
        schema_type: Option<&str>,
        page_number: usize,
        prompt: Option<&str>,
    ) -> Result<Value, VisionParserError> {
        let path = path.as_ref();
        let schema_name = self.requested_or_default(schema_type);
        let label = path.display().to_string();

        self.events.on_parse_start(&label, page_number, schema_name);
        let result = match self.parser(schema_name) {
            Ok(parser) => parser.parse(path, page_number, prompt).await,
            Err(e) => Err(e),
        };
        self.report(&label, page_number, schema_name, &result);
        result
    }

    /// Parse a caller-supplied image (bare base64 or a `data:` URI).
    pub async fn parse_base64(
        &self,
        base64_image: &str,
        schema_type: Option<&str>,
        prompt: Option<&str>,
    ) -> Result<Value, VisionParserError> {
        let schema_name = self.requested_or_default(schema_type);

        self.events.on_parse_start(BASE64_DOCUMENT, 1, schema_name);
        let result = match self.parser(schema_name) {
            Ok(parser) => parser.parse_from_base64(base64_image, prompt).await,
            Err(e) => Err(e),
        };
        self.report(BASE64_DOCUMENT, 1, schema_name, &result);
        result
    }

    /// Synchronous wrapper around [`Self::parse_document`].
    ///
    /// Creates a temporary tokio runtime internally; do not call from inside one.
    pub fn parse_document_blocking(
        &self,
        path: impl AsRef<Path>,
        schema_type: Option<&str>,
        page_number: usize,
        prompt: Option<&str>,
    ) -> Result<Value, VisionParserError> {
        document::runtime()?.block_on(self.parse_document(path, schema_type, page_number, prompt))
    }

    /// Synchronous wrapper around [`Self::parse_base64`].
    pub fn parse_base64_blocking(
        &self,
        base64_image: &str,
        schema_type: Option<&str>,
        prompt: Option<&str>,
    ) -> Result<Value, VisionParserError> {
        document::runtime()?.block_on(self.parse_base64(base64_image, schema_type, prompt))
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    fn build_parser(
        &self,
        schema_name: &str,
        schema: Schema,
    ) -> Result<DocumentParser, VisionParserError> {
        match (&self.config.provider, &self.api_key) {
            (Some(model), _) => Ok(DocumentParser::with_model(
                Arc::clone(model),
                schema_name,
                schema,
                self.config.render.clone(),
            )),
            (None, Some(key)) => DocumentParser::new(key.clone(), schema_name, schema, &self.config),
            (None, None) => Err(VisionParserError::MissingApiKey {
                var: self.config.api_key_env.clone(),
            }),
        }
    }

    fn report(
        &self,
        document: &str,
        page: usize,
        schema_name: &str,
        result: &Result<Value, VisionParserError>,
    ) {
        match result {
            Ok(data) => {
                let fields = data.as_object().map_or(0, |o| o.len());
                self.events.on_parse_complete(document, page, schema_name, fields);
            }
            Err(e) => {
                warn!("Parse of {} page {} as '{}' failed: {}", document, page, schema_name, e);
                self.events.on_parse_error(document, page, schema_name, &e.to_string());
            }
        }
    }

    /// A blank `schema_type` counts as omitted.
    fn requested_or_default<'a>(&'a self, schema_type: Option<&'a str>) -> &'a str {
        schema_type
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(self.config.default_schema.as_str())
    }

    fn registry(&self) -> std::sync::RwLockReadGuard<'_, SchemaRegistry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn cache(&self) -> std::sync::MutexGuard<'_, ParserCache> {
        self.parsers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
