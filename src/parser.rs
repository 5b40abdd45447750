//! Document parser: one schema, one model, any number of pages.
//!
//! A [`DocumentParser`] is bound to a single schema at construction and is
//! immutable afterwards, so one instance can be shared (`Arc`) by every
//! request for that schema. Each parse is a straight sequence: render (or
//! accept base64), call the model once, coerce the answer to the schema.

use crate::config::{ApiKey, ParserConfig, RenderOptions};
use crate::document;
use crate::error::VisionParserError;
use crate::pipeline::encode::{self, EncodedImage};
use crate::pipeline::llm::{OpenAiCompatibleModel, StructuredModel, StructuredRequest};
use crate::prompts;
use crate::schema::Schema;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Extracts JSON shaped by one schema from document pages.
pub struct DocumentParser {
    schema_name: String,
    schema: Schema,
    model: Arc<dyn StructuredModel>,
    render: RenderOptions,
}

impl std::fmt::Debug for DocumentParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentParser")
            .field("schema_name", &self.schema_name)
            .field("model", &self.model.model_name())
            .field("render", &self.render)
            .finish()
    }
}

impl DocumentParser {
    /// Build a parser that talks to the configured OpenAI-compatible endpoint.
    pub fn new(
        api_key: ApiKey,
        schema_name: impl Into<String>,
        schema: Schema,
        config: &ParserConfig,
    ) -> Result<Self, VisionParserError> {
        let model = OpenAiCompatibleModel::new(api_key, config)?;
        Ok(Self::with_model(
            Arc::new(model),
            schema_name,
            schema,
            config.render.clone(),
        ))
    }

    /// Build a parser around an existing model client.
    pub fn with_model(
        model: Arc<dyn StructuredModel>,
        schema_name: impl Into<String>,
        schema: Schema,
        render: RenderOptions,
    ) -> Self {
        let schema_name = schema_name.into();
        debug!(
            "Parser for '{}' using model {}",
            schema_name,
            model.model_name()
        );
        Self {
            schema_name,
            schema,
            model,
            render,
        }
    }

    /// Use `config.provider` when set, else the HTTP client with the
    /// config's credential.
    pub fn from_config(
        schema_name: impl Into<String>,
        schema: Schema,
        config: &ParserConfig,
    ) -> Result<Self, VisionParserError> {
        match config.provider {
            Some(ref model) => Ok(Self::with_model(
                Arc::clone(model),
                schema_name,
                schema,
                config.render.clone(),
            )),
            None => Self::new(config.resolve_api_key()?, schema_name, schema, config),
        }
    }

    pub fn schema_name(&self) -> &str {
        &self.schema_name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    /// Render page `page_number` (1-indexed) of `path` and extract from it.
    ///
    /// `prompt` overrides the schema's default instruction.
    pub async fn parse(
        &self,
        path: impl AsRef<Path>,
        page_number: usize,
        prompt: Option<&str>,
    ) -> Result<Value, VisionParserError> {
        let path = path.as_ref();
        let render_start = Instant::now();
        let image = document::render_page(path, page_number, &self.render).await?;
        debug!(
            "Rendered {} page {} in {}ms",
            path.display(),
            page_number,
            render_start.elapsed().as_millis()
        );
        self.parse_image(&image, prompt).await
    }

    /// Extract from a caller-supplied image (bare base64 or a `data:` URI).
    pub async fn parse_from_base64(
        &self,
        base64_image: &str,
        prompt: Option<&str>,
    ) -> Result<Value, VisionParserError> {
        let image = encode::from_base64(base64_image)?;
        self.parse_image(&image, prompt).await
    }

    /// Extract from an already-encoded image.
    pub async fn parse_image(
        &self,
        image: &EncodedImage,
        prompt: Option<&str>,
    ) -> Result<Value, VisionParserError> {
        let prompt = prompt
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| prompts::default_prompt_for(&self.schema_name));

        let start = Instant::now();
        let raw = self
            .model
            .extract(StructuredRequest {
                prompt,
                image,
                schema_name: &self.schema_name,
                schema: &self.schema,
            })
            .await?;

        let data = coerce_to_schema(raw, &self.schema)?;
        info!(
            "'{}': {} fields extracted in {}ms",
            self.schema_name,
            data.as_object().map_or(0, Map::len),
            start.elapsed().as_millis()
        );
        Ok(data)
    }
}

/// Keep only the top-level keys the schema declares.
///
/// The endpoint enforces the schema server-side; this guards against
/// endpoints that honour `response_format` loosely.
pub fn coerce_to_schema(value: Value, schema: &Schema) -> Result<Value, VisionParserError> {
    let obj = match value {
        Value::Object(obj) => obj,
        other => {
            return Err(VisionParserError::RemoteParsing {
                message: format!("expected a JSON object, got {}", json_kind(&other)),
            })
        }
    };

    let before = obj.len();
    let kept: Map<String, Value> = obj
        .into_iter()
        .filter(|(k, _)| schema.has_property(k))
        .collect();

    if kept.len() < before {
        warn!("Dropped {} undeclared keys from model output", before - kept.len());
    }
    Ok(Value::Object(kept))
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
