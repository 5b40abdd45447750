//! Batch boundary: many independent parses, bounded fan-out.
//!
//! A single parse never runs anything concurrently. When a caller has several
//! (document, page, schema) triples, this module runs them through one
//! [`ParserService`] with at most `concurrency` in flight, and turns each
//! outcome into a [`PageParse`] so one failed page does not sink the batch.
//!
//! [`parse_batch`] waits for everything and returns results in request order;
//! [`parse_stream`] yields results in completion order.

use crate::config::PageSelection;
use crate::document;
use crate::error::{ErrorCategory, VisionParserError};
use crate::service::ParserService;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tokio_stream::Stream;
use tracing::info;

/// One unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseRequest {
    pub path: PathBuf,
    /// None means the service's default schema.
    pub schema_type: Option<String>,
    /// 1-indexed.
    pub page_number: usize,
    pub prompt: Option<String>,
}

impl ParseRequest {
    /// Page 1 of `path` with the default schema and prompt.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            schema_type: None,
            page_number: 1,
            prompt: None,
        }
    }

    pub fn schema(mut self, name: impl Into<String>) -> Self {
        self.schema_type = Some(name.into());
        self
    }

    pub fn page(mut self, page_number: usize) -> Self {
        self.page_number = page_number;
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }
}

/// Outcome of one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageParse {
    pub document: String,
    pub page_number: usize,
    /// Schema the request asked for (the default when it named none).
    pub schema: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<ErrorCategory>,
    pub duration_ms: u64,
}

impl PageParse {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// A boxed stream of per-request outcomes.
pub type PageParseStream = Pin<Box<dyn Stream<Item = PageParse> + Send>>;

/// Run every request, at most `concurrency` at a time. Results come back in
/// request order.
pub async fn parse_batch(
    service: &ParserService,
    requests: Vec<ParseRequest>,
    concurrency: usize,
) -> Vec<PageParse> {
    let total = requests.len();
    let start = Instant::now();

    let mut results: Vec<(usize, PageParse)> = stream::iter(requests.into_iter().enumerate())
        .map(|(idx, req)| async move { (idx, run_one(service, req).await) })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;
    results.sort_by_key(|(idx, _)| *idx);

    let ok = results.iter().filter(|(_, r)| r.is_ok()).count();
    info!(
        "Batch complete: {}/{} succeeded in {}ms",
        ok,
        total,
        start.elapsed().as_millis()
    );
    results.into_iter().map(|(_, r)| r).collect()
}

/// Parse the selected pages of one document.
///
/// # Errors
/// Fails up front when the page count cannot be read, or when the selection
/// matches no page ([`VisionParserError::PageOutOfRange`] with `page: 0`).
/// Per-page failures are reported inside the returned [`PageParse`]s.
pub async fn parse_pages(
    service: &ParserService,
    path: impl AsRef<Path>,
    pages: &PageSelection,
    schema_type: Option<&str>,
    prompt: Option<&str>,
    concurrency: usize,
) -> Result<Vec<PageParse>, VisionParserError> {
    let path = path.as_ref();
    let total = document::page_count(path, service.config().render.password.as_deref()).await?;
    let requests = page_requests(path, pages, total, schema_type, prompt)?;
    Ok(parse_batch(service, requests, concurrency).await)
}

/// Like [`parse_batch`], but yields each outcome as soon as it is ready
/// (completion order, not request order).
pub fn parse_stream(
    service: Arc<ParserService>,
    requests: Vec<ParseRequest>,
    concurrency: usize,
) -> PageParseStream {
    let s = stream::iter(requests.into_iter().map(move |req| {
        let service = Arc::clone(&service);
        async move { run_one(&service, req).await }
    }))
    .buffer_unordered(concurrency.max(1));

    Box::pin(s)
}

/// Expand a page selection into requests.
pub fn page_requests(
    path: &Path,
    pages: &PageSelection,
    total_pages: usize,
    schema_type: Option<&str>,
    prompt: Option<&str>,
) -> Result<Vec<ParseRequest>, VisionParserError> {
    let numbers = pages.to_page_numbers(total_pages);
    if numbers.is_empty() {
        return Err(VisionParserError::PageOutOfRange {
            page: 0,
            total: total_pages,
        });
    }

    Ok(numbers
        .into_iter()
        .map(|n| ParseRequest {
            path: path.to_path_buf(),
            schema_type: schema_type.map(str::to_string),
            page_number: n,
            prompt: prompt.map(str::to_string),
        })
        .collect())
}

async fn run_one(service: &ParserService, req: ParseRequest) -> PageParse {
    let start = Instant::now();
    let schema = req
        .schema_type
        .clone()
        .unwrap_or_else(|| service.default_schema().to_string());

    let result = service
        .parse_document(
            &req.path,
            Some(schema.as_str()),
            req.page_number,
            req.prompt.as_deref(),
        )
        .await;

    let (data, error, category) = match result {
        Ok(v) => (Some(v), None, None),
        Err(e) => (None, Some(e.to_string()), Some(e.category())),
    };

    PageParse {
        document: req.path.display().to_string(),
        page_number: req.page_number,
        schema,
        data,
        error,
        category,
        duration_ms: start.elapsed().as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builder() {
        let r = ParseRequest::new("a.pdf").schema("invoice").page(3).prompt("p");
        assert_eq!(r.path, PathBuf::from("a.pdf"));
        assert_eq!(r.schema_type.as_deref(), Some("invoice"));
        assert_eq!(r.page_number, 3);
        assert_eq!(r.prompt.as_deref(), Some("p"));
        assert_eq!(ParseRequest::new("b.png").page_number, 1);
    }

    #[test]
    fn page_requests_follow_selection() {
        let reqs = page_requests(
            Path::new("doc.pdf"),
            &PageSelection::Range(2, 3),
            5,
            Some("resume"),
            None,
        )
        .unwrap();
        let pages: Vec<usize> = reqs.iter().map(|r| r.page_number).collect();
        assert_eq!(pages, vec![2, 3]);
        assert!(reqs.iter().all(|r| r.schema_type.as_deref() == Some("resume")));
    }

    #[test]
    fn empty_selection_is_out_of_range() {
        let err = page_requests(Path::new("d.pdf"), &PageSelection::Single(9), 2, None, None)
            .unwrap_err();
        assert!(matches!(err, VisionParserError::PageOutOfRange { page: 0, total: 2 }));
    }

    #[test]
    fn failed_parse_serialises_without_data() {
        let p = PageParse {
            document: "x.pdf".into(),
            page_number: 1,
            schema: "resume".into(),
            data: None,
            error: Some("boom".into()),
            category: Some(ErrorCategory::Internal),
            duration_ms: 3,
        };
        let v = serde_json::to_value(&p).unwrap();
        assert!(v.get("data").is_none());
        assert_eq!(v["category"], "internal");
        assert!(!p.is_ok());
    }
}
