//! Pipeline stages for schema-driven extraction.
//!
//! Each submodule implements exactly one step of a single-page parse.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ llm
//! (path)    (pdfium)   (base64)   (VLM, json_schema)
//! ```
//!
//! 1. [`input`]: classify the document by extension and check it is readable
//! 2. [`render`]: rasterise one PDF page; blocking, called via `spawn_blocking`
//! 3. [`encode`]: PNG-encode rendered pages, base64-wrap raw images, accept
//!    caller-supplied base64
//! 4. [`llm`]: the structured-output model call; the only stage with
//!    network I/O

pub mod encode;
pub mod input;
pub mod llm;
pub mod render;
