//! Error types for the vision-parser library.
//!
//! Every fallible operation returns [`VisionParserError`]. Variants are grouped
//! by who has to act on them:
//!
//! * **Configuration**: the service cannot be built (no credential, a
//!   placeholder credential, a missing default schema, no pdfium library).
//! * **Input**: the caller asked for something that cannot be rendered
//!   (unknown extension, page out of range, corrupt PDF, bad base64).
//! * **Schema**: unknown or malformed schema documents.
//! * **Remote**: the model endpoint failed. Credential failures are split out
//!   as [`VisionParserError::AuthenticationFailed`] so a caller can show a
//!   specific remediation message.
//!
//! [`ErrorCategory`] maps each variant onto the response class a web layer
//! should use (service-unavailable, not-found, bad-request, conflict,
//! internal).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Message fragments the Gemini OpenAI-compatible endpoint uses when the
/// credential is rejected. Matched case-sensitively, as the endpoint emits them.
const AUTH_FAILURE_PATTERNS: &[&str] = &["API key not valid", "API_KEY_INVALID", "INVALID_ARGUMENT"];

/// All errors returned by the vision-parser library.
#[derive(Debug, Error)]
pub enum VisionParserError {
    // ── Configuration errors ──────────────────────────────────────────────
    /// No credential was supplied and the environment variable is unset or empty.
    #[error("API key is not configured.\nSet the {var} environment variable or pass an API key explicitly.")]
    MissingApiKey { var: String },

    /// The credential is a documentation placeholder such as `your-google-api-key`.
    #[error("API key looks like a placeholder value.\nReplace it with a real key in {var}.")]
    PlaceholderApiKey { var: String },

    /// The configured default schema is not among the loaded schemas.
    #[error("Default schema '{name}' not found in available schemas")]
    DefaultSchemaNotFound { name: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH to the pdfium shared library (or the directory containing it)."
    )]
    PdfiumBindingFailed(String),

    // ── Input errors ──────────────────────────────────────────────────────
    /// Document was not found at the given path.
    #[error("Document not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the document.
    #[error("Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    /// File extension is neither PDF nor a supported raster image.
    #[error("Unsupported file format: '{extension}' ({path})\nSupported: .pdf, .jpg, .jpeg, .png, .gif, .bmp")]
    UnsupportedFormat { path: PathBuf, extension: String },

    /// Requested page does not exist (pages are 1-indexed).
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    /// PDF could not be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// pdfium or the PNG encoder failed on an otherwise valid page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Caller-supplied image payload is not valid base64.
    #[error("Invalid base64 image payload: {detail}")]
    InvalidBase64 { detail: String },

    // ── Schema errors ─────────────────────────────────────────────────────
    /// No schema with this name is loaded.
    #[error("Schema '{name}' not found in available schemas")]
    SchemaNotFound { name: String },

    /// Schema document failed structural validation.
    #[error("Invalid schema '{name}': {reason}")]
    InvalidSchema { name: String, reason: String },

    /// Schema file or directory could not be read or parsed as JSON.
    #[error("Failed to load schema from '{path}': {detail}")]
    SchemaLoadFailed { path: PathBuf, detail: String },

    // ── Remote errors ─────────────────────────────────────────────────────
    /// The model endpoint rejected the credential.
    #[error("Authentication with the model endpoint failed: {detail}\nCheck the API key.")]
    AuthenticationFailed { detail: String },

    /// Any other failure of the remote call (network, quota, malformed response).
    #[error("Remote parsing failed: {message}")]
    RemoteParsing { message: String },

    // ── Store errors ──────────────────────────────────────────────────────
    /// A result for this document page is already stored.
    #[error("A parsed result already exists for document {document_id}, page {page}")]
    DuplicateResult { document_id: u64, page: usize },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Response class a surrounding web layer should use for an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    ServiceUnavailable,
    NotFound,
    BadRequest,
    Conflict,
    Internal,
}

impl ErrorCategory {
    /// HTTP status code conventionally used for this category.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorCategory::ServiceUnavailable => 503,
            ErrorCategory::NotFound => 404,
            ErrorCategory::BadRequest => 400,
            ErrorCategory::Conflict => 409,
            ErrorCategory::Internal => 500,
        }
    }
}

impl VisionParserError {
    /// Classify this error for presentation.
    pub fn category(&self) -> ErrorCategory {
        use VisionParserError::*;
        match self {
            MissingApiKey { .. }
            | PlaceholderApiKey { .. }
            | DefaultSchemaNotFound { .. }
            | InvalidConfig(_)
            | PdfiumBindingFailed(_)
            | AuthenticationFailed { .. } => ErrorCategory::ServiceUnavailable,

            FileNotFound { .. } | SchemaNotFound { .. } => ErrorCategory::NotFound,

            PermissionDenied { .. }
            | UnsupportedFormat { .. }
            | PageOutOfRange { .. }
            | CorruptPdf { .. }
            | PasswordRequired { .. }
            | WrongPassword { .. }
            | InvalidBase64 { .. }
            | InvalidSchema { .. }
            | SchemaLoadFailed { .. } => ErrorCategory::BadRequest,

            DuplicateResult { .. } => ErrorCategory::Conflict,

            RasterisationFailed { .. } | RemoteParsing { .. } | Internal(_) => {
                ErrorCategory::Internal
            }
        }
    }

    /// True for errors raised while building a service or parser; these are
    /// fatal and retrying without changing the configuration will not help.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            VisionParserError::MissingApiKey { .. }
                | VisionParserError::PlaceholderApiKey { .. }
                | VisionParserError::DefaultSchemaNotFound { .. }
                | VisionParserError::InvalidConfig(_)
                | VisionParserError::PdfiumBindingFailed(_)
        )
    }
}

/// Turn a failed remote call into a typed error.
///
/// HTTP 401/403 and the endpoint's known credential messages become
/// [`VisionParserError::AuthenticationFailed`]; everything else stays a
/// generic [`VisionParserError::RemoteParsing`] carrying the message.
pub fn classify_remote_failure(status: Option<u16>, message: impl Into<String>) -> VisionParserError {
    let message = message.into();
    let auth_status = matches!(status, Some(401) | Some(403));
    if auth_status || AUTH_FAILURE_PATTERNS.iter().any(|p| message.contains(p)) {
        VisionParserError::AuthenticationFailed { detail: message }
    } else {
        VisionParserError::RemoteParsing { message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_out_of_range_display() {
        let e = VisionParserError::PageOutOfRange { page: 10, total: 3 };
        let msg = e.to_string();
        assert!(msg.contains("Page 10"), "got: {msg}");
        assert!(msg.contains("3 pages"), "got: {msg}");
    }

    #[test]
    fn categories_follow_response_classes() {
        assert_eq!(
            VisionParserError::PlaceholderApiKey { var: "GOOGLE_API_KEY".into() }
                .category()
                .http_status(),
            503
        );
        assert_eq!(
            VisionParserError::SchemaNotFound { name: "x".into() }.category(),
            ErrorCategory::NotFound
        );
        assert_eq!(
            VisionParserError::UnsupportedFormat {
                path: "a.docx".into(),
                extension: ".docx".into()
            }
            .category(),
            ErrorCategory::BadRequest
        );
        assert_eq!(
            VisionParserError::RemoteParsing { message: "boom".into() }
                .category()
                .http_status(),
            500
        );
        assert_eq!(
            VisionParserError::DuplicateResult { document_id: 1, page: 1 }
                .category()
                .http_status(),
            409
        );
    }

    #[test]
    fn configuration_errors_are_flagged() {
        assert!(VisionParserError::MissingApiKey { var: "K".into() }.is_configuration());
        assert!(VisionParserError::DefaultSchemaNotFound { name: "resume".into() }.is_configuration());
        assert!(!VisionParserError::SchemaNotFound { name: "resume".into() }.is_configuration());
    }

    #[test]
    fn classify_auth_by_status() {
        let e = classify_remote_failure(Some(401), "unauthorised");
        assert!(matches!(e, VisionParserError::AuthenticationFailed { .. }));
    }

    #[test]
    fn classify_auth_by_message() {
        let e = classify_remote_failure(
            Some(400),
            "API key not valid. Please pass a valid API key.",
        );
        assert!(matches!(e, VisionParserError::AuthenticationFailed { .. }));
    }

    #[test]
    fn classify_other_failures_generically() {
        let e = classify_remote_failure(Some(429), "Resource has been exhausted");
        match e {
            VisionParserError::RemoteParsing { message } => {
                assert!(message.contains("exhausted"))
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(
            classify_remote_failure(None, "connection reset"),
            VisionParserError::RemoteParsing { .. }
        ));
    }
}
