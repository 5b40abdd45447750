//! Caller-side persistence of parse results.
//!
//! The parser core never stores anything. This module is the reference
//! caller: a [`ResultStore`] keeps at most one [`ParsedResult`] per
//! `(document, page)`, and [`ParseWorkflow`] answers "give me page N of this
//! document as JSON" by returning the stored result when there is one and
//! parsing (then storing) otherwise.
//!
//! The workflow resolves schema names with the silent fallback
//! ([`ParserService::resolve_schema`]) and then parses strictly.

use crate::error::VisionParserError;
use crate::service::ParserService;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

pub type DocumentId = u64;

/// An uploaded document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: DocumentId,
    pub name: String,
    pub path: PathBuf,
    /// Schema used when a parse request names none.
    pub schema_type: String,
    pub uploaded_at: DateTime<Utc>,
}

impl DocumentRecord {
    /// Record a document, mapping an unknown `schema_type` to the service's
    /// default schema.
    pub fn new(
        id: DocumentId,
        path: impl AsRef<Path>,
        schema_type: Option<&str>,
        service: &ParserService,
    ) -> Self {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Self {
            id,
            name,
            path: path.to_path_buf(),
            schema_type: service.resolve_schema(schema_type),
            uploaded_at: Utc::now(),
        }
    }
}

/// Stored output of one parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedResult {
    pub document_id: DocumentId,
    pub page_number: usize,
    pub schema_type: String,
    pub result_data: Value,
    pub parsed_at: DateTime<Utc>,
}

/// Persistence for parse results, unique per `(document_id, page_number)`.
pub trait ResultStore: Send + Sync {
    fn find(
        &self,
        document_id: DocumentId,
        page_number: usize,
    ) -> Result<Option<ParsedResult>, VisionParserError>;

    /// Store a new result. A second result for the same page is
    /// [`VisionParserError::DuplicateResult`].
    fn insert(&self, result: ParsedResult) -> Result<(), VisionParserError>;

    /// All results for one document, by page.
    fn results_for(&self, document_id: DocumentId) -> Result<Vec<ParsedResult>, VisionParserError>;
}

/// A [`ResultStore`] in process memory.
#[derive(Debug, Default)]
pub struct InMemoryResultStore {
    results: RwLock<BTreeMap<(DocumentId, usize), ParsedResult>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.results.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResultStore for InMemoryResultStore {
    fn find(
        &self,
        document_id: DocumentId,
        page_number: usize,
    ) -> Result<Option<ParsedResult>, VisionParserError> {
        let results = self.results.read().unwrap_or_else(PoisonError::into_inner);
        Ok(results.get(&(document_id, page_number)).cloned())
    }

    fn insert(&self, result: ParsedResult) -> Result<(), VisionParserError> {
        let mut results = self.results.write().unwrap_or_else(PoisonError::into_inner);
        let key = (result.document_id, result.page_number);
        if results.contains_key(&key) {
            return Err(VisionParserError::DuplicateResult {
                document_id: key.0,
                page: key.1,
            });
        }
        results.insert(key, result);
        Ok(())
    }

    fn results_for(&self, document_id: DocumentId) -> Result<Vec<ParsedResult>, VisionParserError> {
        let results = self.results.read().unwrap_or_else(PoisonError::into_inner);
        Ok(results
            .range((document_id, 0)..=(document_id, usize::MAX))
            .map(|(_, r)| r.clone())
            .collect())
    }
}

/// Parse-or-reuse over a [`ParserService`] and a [`ResultStore`].
pub struct ParseWorkflow<S: ResultStore> {
    service: Arc<ParserService>,
    store: S,
}

impl<S: ResultStore> ParseWorkflow<S> {
    pub fn new(service: Arc<ParserService>, store: S) -> Self {
        Self { service, store }
    }

    pub fn service(&self) -> &ParserService {
        &self.service
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Page `page_number` of `document` as JSON, plus whether it came from
    /// the store.
    ///
    /// `schema_type` of None uses the document's own schema. A stored result
    /// is returned as-is even if it was produced with another schema.
    pub async fn parse(
        &self,
        document: &DocumentRecord,
        page_number: usize,
        schema_type: Option<&str>,
    ) -> Result<(ParsedResult, bool), VisionParserError> {
        if let Some(existing) = self.store.find(document.id, page_number)? {
            debug!("Document {} page {}: stored result", document.id, page_number);
            return Ok((existing, true));
        }

        let schema = self
            .service
            .resolve_schema(Some(schema_type.unwrap_or(document.schema_type.as_str())));
        let data = self
            .service
            .parse_document(&document.path, Some(schema.as_str()), page_number, None)
            .await?;

        let result = ParsedResult {
            document_id: document.id,
            page_number,
            schema_type: schema,
            result_data: data,
            parsed_at: Utc::now(),
        };

        match self.store.insert(result.clone()) {
            Ok(()) => {
                info!("Document {} page {}: parsed and stored", document.id, page_number);
                Ok((result, false))
            }
            // lost a race with a concurrent parse of the same page
            Err(VisionParserError::DuplicateResult { .. }) => {
                match self.store.find(document.id, page_number)? {
                    Some(existing) => Ok((existing, true)),
                    None => Err(VisionParserError::Internal(format!(
                        "result for document {} page {} vanished after a duplicate insert",
                        document.id, page_number
                    ))),
                }
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(doc: DocumentId, page: usize) -> ParsedResult {
        ParsedResult {
            document_id: doc,
            page_number: page,
            schema_type: "resume".into(),
            result_data: json!({"name": "Ada"}),
            parsed_at: Utc::now(),
        }
    }

    #[test]
    fn one_result_per_page() {
        let store = InMemoryResultStore::new();
        store.insert(result(1, 1)).unwrap();
        store.insert(result(1, 2)).unwrap();
        store.insert(result(2, 1)).unwrap();

        let err = store.insert(result(1, 1)).unwrap_err();
        assert!(matches!(err, VisionParserError::DuplicateResult { document_id: 1, page: 1 }));
        assert_eq!(err.category().http_status(), 409);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn results_for_filters_by_document() {
        let store = InMemoryResultStore::new();
        store.insert(result(7, 3)).unwrap();
        store.insert(result(7, 1)).unwrap();
        store.insert(result(8, 1)).unwrap();

        let pages: Vec<usize> = store
            .results_for(7)
            .unwrap()
            .iter()
            .map(|r| r.page_number)
            .collect();
        assert_eq!(pages, vec![1, 3]);
        assert!(store.find(9, 1).unwrap().is_none());
    }

    #[test]
    fn parsed_result_serialises_timestamps() {
        let v = serde_json::to_value(result(1, 1)).unwrap();
        assert!(v["parsed_at"].as_str().unwrap().contains('T'));
        assert_eq!(v["result_data"]["name"], "Ada");
    }
}
