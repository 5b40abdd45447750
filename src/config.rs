//! Configuration types for schema-driven document parsing.
//!
//! Every knob lives in [`ParserConfig`], built via [`ParserConfigBuilder`].
//! One struct is shared by the service and every parser it creates, so two
//! runs can be compared by diffing their configs.
//!
//! The credential is held as an [`ApiKey`], which can only be constructed
//! from a non-empty, non-placeholder string. A config that carries a key has
//! therefore already passed the credential check.

use crate::error::VisionParserError;
use crate::events::EventCallback;
use crate::pipeline::llm::StructuredModel;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// OpenAI-compatible endpoint of the hosted Gemini API.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai/";

/// Default vision model.
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Schema used when a request does not name one.
pub const DEFAULT_SCHEMA: &str = "resume";

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "GOOGLE_API_KEY";

/// Environment variable pointing at a directory of `*.json` schema files.
pub const SCHEMAS_DIR_ENV: &str = "VISION_PARSER_SCHEMAS_DIR";

// ── Credential ───────────────────────────────────────────────────────────

/// A validated API credential.
///
/// `Debug` never prints the key.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// Validate a raw key. `var` names the source in error messages.
    pub fn new(raw: impl Into<String>, var: &str) -> Result<Self, VisionParserError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(VisionParserError::MissingApiKey { var: var.to_string() });
        }
        if is_placeholder_key(trimmed) {
            return Err(VisionParserError::PlaceholderApiKey { var: var.to_string() });
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Read and validate the key from an environment variable.
    pub fn from_env(var: &str) -> Result<Self, VisionParserError> {
        match std::env::var(var) {
            Ok(v) => Self::new(v, var),
            Err(_) => Err(VisionParserError::MissingApiKey { var: var.to_string() }),
        }
    }

    /// The raw key, for the `Authorization` header.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// Recognise documentation placeholders: `your-google-api-key`,
/// `your-google-api-key-here`, `your_api_key_here` and the like.
pub fn is_placeholder_key(key: &str) -> bool {
    let normalised = key.trim().to_ascii_lowercase().replace('_', "-");
    normalised.starts_with("your-") && normalised.contains("key")
}

// ── Rendering ────────────────────────────────────────────────────────────

/// How PDF pages are rasterised. Raster images are never re-rendered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderOptions {
    /// Rendering resolution. Default: 72, the page's native point size.
    pub dpi: u32,

    /// Cap on the longest rendered edge in pixels. Default: 2000.
    ///
    /// Keeps an oversized page (posters, plans) from producing an image the
    /// model endpoint will refuse.
    pub max_rendered_pixels: u32,

    /// PDF user password for encrypted documents.
    #[serde(skip_serializing)]
    pub password: Option<String>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            dpi: 72,
            max_rendered_pixels: 2000,
            password: None,
        }
    }
}

// ── Parser configuration ─────────────────────────────────────────────────

/// Configuration shared by [`crate::ParserService`] and the
/// [`crate::DocumentParser`]s it creates.
///
/// # Example
/// ```rust
/// use vision_parser::ParserConfig;
///
/// let config = ParserConfig::builder()
///     .model("gemini-2.0-flash")
///     .default_schema("invoice")
///     .dpi(150)
///     .build()
///     .unwrap();
/// assert_eq!(config.temperature, 0.0);
/// ```
#[derive(Clone)]
pub struct ParserConfig {
    /// Explicit credential. If None, read from `api_key_env` at service construction.
    pub api_key: Option<ApiKey>,

    /// Environment variable consulted when `api_key` is None. Default: `GOOGLE_API_KEY`.
    pub api_key_env: String,

    /// Base URL of the OpenAI-compatible endpoint.
    pub base_url: String,

    /// Model identifier. Default: `gemini-2.0-flash`.
    pub model: String,

    /// Sampling temperature. Default: 0.0 (greedy decoding).
    pub temperature: f32,

    /// Optional cap on generated tokens per call.
    pub max_tokens: Option<usize>,

    /// Whole-request timeout for the remote call in seconds. Default: 60.
    ///
    /// The core never retries; this is the only deadline it imposes.
    pub request_timeout_secs: u64,

    /// Schema used when a request does not name one. Default: `resume`.
    pub default_schema: String,

    /// PDF rasterisation settings.
    pub render: RenderOptions,

    /// Upper bound on cached parsers. None (default) means unbounded.
    pub max_cached_parsers: Option<usize>,

    /// Pre-constructed model client. Takes precedence over the HTTP client and
    /// makes the credential optional.
    pub provider: Option<Arc<dyn StructuredModel>>,

    /// Observer for parser construction and parse events.
    pub event_callback: Option<EventCallback>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: API_KEY_ENV.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.0,
            max_tokens: None,
            request_timeout_secs: 60,
            default_schema: DEFAULT_SCHEMA.to_string(),
            render: RenderOptions::default(),
            max_cached_parsers: None,
            provider: None,
            event_callback: None,
        }
    }
}

impl fmt::Debug for ParserConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParserConfig")
            .field("api_key", &self.api_key)
            .field("api_key_env", &self.api_key_env)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("default_schema", &self.default_schema)
            .field("render", &self.render)
            .field("max_cached_parsers", &self.max_cached_parsers)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn StructuredModel>"))
            .field("event_callback", &self.event_callback.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

impl ParserConfig {
    /// Create a new builder for `ParserConfig`.
    pub fn builder() -> ParserConfigBuilder {
        ParserConfigBuilder {
            config: Self::default(),
            raw_api_key: None,
        }
    }

    /// The credential to use: the explicit key, else the environment variable.
    pub fn resolve_api_key(&self) -> Result<ApiKey, VisionParserError> {
        match self.api_key {
            Some(ref key) => Ok(key.clone()),
            None => ApiKey::from_env(&self.api_key_env),
        }
    }
}

/// Builder for [`ParserConfig`].
pub struct ParserConfigBuilder {
    config: ParserConfig,
    raw_api_key: Option<String>,
}

impl fmt::Debug for ParserConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParserConfigBuilder")
            .field("config", &self.config)
            .field("raw_api_key", &self.raw_api_key.as_ref().map(|_| "***"))
            .finish()
    }
}

impl ParserConfigBuilder {
    /// Explicit credential; validated in [`Self::build`].
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.raw_api_key = Some(key.into());
        self
    }

    pub fn api_key_env(mut self, var: impl Into<String>) -> Self {
        self.config.api_key_env = var.into();
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = Some(n);
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn default_schema(mut self, name: impl Into<String>) -> Self {
        self.config.default_schema = name.into();
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.render.dpi = dpi.clamp(36, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.render.max_rendered_pixels = px.max(100);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.render.password = Some(pwd.into());
        self
    }

    pub fn max_cached_parsers(mut self, n: usize) -> Self {
        self.config.max_cached_parsers = Some(n);
        self
    }

    pub fn provider(mut self, provider: Arc<dyn StructuredModel>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn event_callback(mut self, cb: EventCallback) -> Self {
        self.config.event_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    ///
    /// An explicit API key is checked here, so a placeholder credential is
    /// rejected before anything touches the network.
    pub fn build(mut self) -> Result<ParserConfig, VisionParserError> {
        if let Some(raw) = self.raw_api_key.take() {
            self.config.api_key = Some(ApiKey::new(raw, &self.config.api_key_env)?);
        }

        let c = &self.config;
        if c.model.trim().is_empty() {
            return Err(VisionParserError::InvalidConfig("Model must not be empty".into()));
        }
        if c.default_schema.trim().is_empty() {
            return Err(VisionParserError::InvalidConfig(
                "Default schema name must not be empty".into(),
            ));
        }
        if !(c.base_url.starts_with("http://") || c.base_url.starts_with("https://")) {
            return Err(VisionParserError::InvalidConfig(format!(
                "Base URL must be an HTTP(S) URL, got '{}'",
                c.base_url
            )));
        }
        if c.request_timeout_secs == 0 {
            return Err(VisionParserError::InvalidConfig(
                "Request timeout must be ≥ 1 second".into(),
            ));
        }
        if c.max_cached_parsers == Some(0) {
            return Err(VisionParserError::InvalidConfig(
                "Parser cache capacity must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Page selection ───────────────────────────────────────────────────────

/// Specifies which pages of a document to parse in a batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSelection {
    /// Every page.
    All,
    /// A single page (1-indexed). (default: page 1)
    Single(usize),
    /// A contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Specific pages (1-indexed, deduplicated).
    Set(Vec<usize>),
    /// First page only.
    #[default]
    First,
}

impl PageSelection {
    /// Expand the selection into a sorted, deduplicated list of 1-indexed
    /// page numbers that exist in a document of `total_pages` pages.
    pub fn to_page_numbers(&self, total_pages: usize) -> Vec<usize> {
        let mut pages: Vec<usize> = match self {
            PageSelection::All => (1..=total_pages).collect(),
            PageSelection::First => {
                if total_pages >= 1 {
                    vec![1]
                } else {
                    vec![]
                }
            }
            PageSelection::Single(p) => {
                if *p >= 1 && *p <= total_pages {
                    vec![*p]
                } else {
                    vec![]
                }
            }
            PageSelection::Range(start, end) => {
                let s = (*start).max(1);
                let e = (*end).min(total_pages);
                (s..=e).collect()
            }
            PageSelection::Set(pages) => pages
                .iter()
                .copied()
                .filter(|&p| p >= 1 && p <= total_pages)
                .collect(),
        };
        pages.sort_unstable();
        pages.dedup();
        pages
    }
}
