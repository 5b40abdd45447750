//! Event-callback trait for parser construction and per-page parse events.
//!
//! Inject an [`Arc<dyn ParseEventCallback>`] via
//! [`crate::config::ParserConfigBuilder::event_callback`] to observe what the
//! service is doing: when a parser is constructed for a schema, when a parse
//! starts, and how it ends. The CLI drives its progress bar from these events;
//! tests use `on_parser_created` to count parser constructions.
//!
//! # Example
//!
//! ```rust
//! use vision_parser::{ParseEventCallback, ParserConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     created: AtomicUsize,
//! }
//!
//! impl ParseEventCallback for CountingCallback {
//!     fn on_parser_created(&self, schema: &str) {
//!         let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("parser #{n} built for schema {schema}");
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { created: AtomicUsize::new(0) });
//!
//! let config = ParserConfig::builder()
//!     .event_callback(counter as Arc<dyn ParseEventCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by [`crate::ParserService`] as it builds parsers and runs parses.
///
/// Implementations must be `Send + Sync`: a service shared across tasks (for
/// example by [`crate::batch::parse_batch`]) may fire events concurrently.
/// All methods default to no-ops.
pub trait ParseEventCallback: Send + Sync {
    /// A new [`crate::DocumentParser`] was constructed and cached for `schema`.
    fn on_parser_created(&self, schema: &str) {
        let _ = schema;
    }

    /// A parse is about to render and send `document` page `page`.
    ///
    /// `document` is the path as given, or `<base64>` for pre-encoded images.
    fn on_parse_start(&self, document: &str, page: usize, schema: &str) {
        let _ = (document, page, schema);
    }

    /// A parse returned `field_count` top-level fields.
    fn on_parse_complete(&self, document: &str, page: usize, schema: &str, field_count: usize) {
        let _ = (document, page, schema, field_count);
    }

    /// A parse failed.
    fn on_parse_error(&self, document: &str, page: usize, schema: &str, error: &str) {
        let _ = (document, page, schema, error);
    }
}

/// Shared handle to an event callback.
pub type EventCallback = Arc<dyn ParseEventCallback>;

/// A callback that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventCallback;

impl ParseEventCallback for NoopEventCallback {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn callback_handle_is_send_sync() {
        assert_send_sync::<EventCallback>();
    }

    #[test]
    fn default_methods_are_noops() {
        let cb: EventCallback = Arc::new(NoopEventCallback);
        cb.on_parser_created("resume");
        cb.on_parse_start("cv.pdf", 1, "resume");
        cb.on_parse_complete("cv.pdf", 1, "resume", 4);
        cb.on_parse_error("cv.pdf", 1, "resume", "boom");
    }

    #[test]
    fn overridden_method_is_called() {
        struct Errors(AtomicUsize);
        impl ParseEventCallback for Errors {
            fn on_parse_error(&self, _: &str, _: usize, _: &str, _: &str) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
        let cb = Arc::new(Errors(AtomicUsize::new(0)));
        let handle: EventCallback = cb.clone();
        handle.on_parse_error("a.png", 1, "invoice", "bad");
        handle.on_parse_complete("a.png", 1, "invoice", 2);
        assert_eq!(cb.0.load(Ordering::SeqCst), 1);
    }
}
