//! # vision-parser
//!
//! Extract schema-shaped JSON from documents using Vision Language Models.
//!
//! A page of a PDF (or a raster image) is rendered to an image and sent,
//! together with an instruction and a JSON Schema, to a structured-output
//! capable VLM. The model answers with JSON constrained to the schema.
//!
//! ## Pipeline Overview
//!
//! ```text
//! document + schema name
//!  │
//!  ├─ 1. Schema   strict registry lookup (directory, mapping or built-ins)
//!  ├─ 2. Parser   cached per schema inside a ParserService
//!  ├─ 3. Render   one PDF page via pdfium (spawn_blocking) or raw image bytes
//!  ├─ 4. Encode   base64 with the real MIME type
//!  ├─ 5. VLM      one chat-completions call, response_format = json_schema
//!  └─ 6. Coerce   keep only keys the schema declares
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vision_parser::{ParserConfig, ParserService, SchemaSource};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Credential from GOOGLE_API_KEY
//!     let config = ParserConfig::builder().default_schema("invoice").build()?;
//!     let service = ParserService::new(config, SchemaSource::Builtin)?;
//!
//!     let json = service
//!         .parse_document("invoice.pdf", Some("invoice"), 1, None)
//!         .await?;
//!     println!("{}", serde_json::to_string_pretty(&json)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `vparse` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! vision-parser = { version = "0.1", default-features = false }
//! ```
//!
//! ## Environment
//!
//! | Variable | Purpose |
//! |----------|---------|
//! | `GOOGLE_API_KEY` | Credential for the hosted endpoint |
//! | `VISION_PARSER_SCHEMAS_DIR` | Directory of `*.json` schemas ([`SchemaSource::from_env`]) |
//! | `PDFIUM_LIB_PATH` | pdfium shared library (file or directory) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod config;
pub mod document;
pub mod error;
pub mod events;
pub mod parser;
pub mod pipeline;
pub mod prompts;
pub mod schema;
pub mod service;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{parse_batch, parse_pages, parse_stream, PageParse, PageParseStream, ParseRequest};
pub use config::{ApiKey, PageSelection, ParserConfig, ParserConfigBuilder, RenderOptions};
pub use document::{page_count, preview, render_page, render_to_base64, DocumentPreview};
pub use error::{ErrorCategory, VisionParserError};
pub use events::{EventCallback, NoopEventCallback, ParseEventCallback};
pub use parser::DocumentParser;
pub use pipeline::encode::EncodedImage;
pub use pipeline::llm::{OpenAiCompatibleModel, StructuredModel, StructuredRequest};
pub use schema::{Schema, SchemaRegistry, SchemaSource, BUILTIN_SCHEMAS};
pub use service::ParserService;
pub use store::{DocumentRecord, InMemoryResultStore, ParseWorkflow, ParsedResult, ResultStore};
