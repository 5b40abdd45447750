//! Offline integration tests: schema loading, rendering, the parser service
//! and the parse-or-reuse workflow, with a fake model in place of the remote
//! endpoint.
//!
//! PDF rendering tests need a pdfium shared library (system path,
//! `PDFIUM_LIB_PATH`, or the working directory) and skip themselves when none
//! can be bound. With `VISION_PARSER_REQUIRE_PDFIUM=1` they fail instead.
//!
//! Run with:
//!   cargo test --test pipeline -- --nocapture
//!   PDFIUM_LIB_PATH=/opt/pdfium/lib VISION_PARSER_REQUIRE_PDFIUM=1 cargo test --test pipeline

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use vision_parser::pipeline::render::pdfium_available;
use vision_parser::{
    document, parse_batch, parse_pages, parse_stream, DocumentRecord, InMemoryResultStore,
    PageSelection, ParseEventCallback, ParseRequest, ParseWorkflow, ParserConfig, ParserService,
    RenderOptions, ResultStore, SchemaRegistry, SchemaSource, StructuredModel, StructuredRequest,
    VisionParserError,
};

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Answers every declared property with a placeholder string, plus one
/// undeclared key. Counts calls.
#[derive(Default)]
struct FakeModel {
    calls: AtomicUsize,
}

#[async_trait]
impl StructuredModel for FakeModel {
    fn model_name(&self) -> &str {
        "fake-vlm"
    }

    async fn extract(&self, request: StructuredRequest<'_>) -> Result<Value, VisionParserError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut out = Map::new();
        for key in request.schema.properties().keys() {
            out.insert(key.clone(), json!(format!("<{key}>")));
        }
        out.insert("not_in_schema".into(), json!(42));
        Ok(Value::Object(out))
    }
}

#[derive(Default)]
struct CreatedCounter(AtomicUsize);

impl ParseEventCallback for CreatedCounter {
    fn on_parser_created(&self, _schema: &str) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Route library logs to the test output; RUST_LOG=vision_parser=debug for detail.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn service(model: Arc<FakeModel>, events: Arc<CreatedCounter>) -> ParserService {
    init_tracing();
    let config = ParserConfig::builder()
        .provider(model)
        .event_callback(events)
        .build()
        .expect("valid config");
    ParserService::new(config, SchemaSource::Builtin).expect("service")
}

fn schema_doc(title: &str, fields: &[&str]) -> Value {
    let props: Map<String, Value> = fields
        .iter()
        .map(|f| (f.to_string(), json!({"type": "string"})))
        .collect();
    json!({
        "title": title,
        "description": format!("{title} fields"),
        "type": "object",
        "properties": props
    })
}

fn write_png(dir: &Path, name: &str) -> (PathBuf, Vec<u8>) {
    let img = image::RgbImage::from_pixel(8, 8, image::Rgb([10, 20, 30]));
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .expect("png encode");
    let path = dir.join(name);
    std::fs::write(&path, &bytes).expect("write png");
    (path, bytes)
}

/// A minimal 3-page PDF, each page a 200×200pt square filled red, green, blue.
fn three_page_pdf() -> Vec<u8> {
    let colours = ["1 0 0", "0 1 0", "0 0 1"];

    // 1 catalog, 2 page tree, then (page, content) pairs from 3
    let mut objects: Vec<String> = vec![
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        "<< /Type /Pages /Kids [3 0 R 5 0 R 7 0 R] /Count 3 >>".to_string(),
    ];
    for (i, c) in colours.iter().enumerate() {
        let content_id = 4 + i * 2;
        objects.push(format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 200 200] /Contents {content_id} 0 R >>"
        ));
        let stream = format!("{c} rg 0 0 200 200 re f");
        objects.push(format!(
            "<< /Length {} >>\nstream\n{}\nendstream",
            stream.len(),
            stream
        ));
    }

    let mut out = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
    }

    let xref_at = out.len();
    let mut xref = format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1);
    for off in offsets {
        xref.push_str(&format!("{off:010} 00000 n \n"));
    }
    xref.push_str(&format!(
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
        objects.len() + 1,
        xref_at
    ));
    out.extend_from_slice(xref.as_bytes());
    out
}

/// Set to make the PDF rendering tests fail, rather than skip, when no
/// pdfium library can be bound.
const REQUIRE_PDFIUM_ENV: &str = "VISION_PARSER_REQUIRE_PDFIUM";

/// Skip this test when no pdfium library can be bound, unless
/// `VISION_PARSER_REQUIRE_PDFIUM` is set.
macro_rules! skip_without_pdfium {
    () => {
        if !pdfium_available() {
            assert!(
                std::env::var_os(REQUIRE_PDFIUM_ENV).is_none(),
                "{REQUIRE_PDFIUM_ENV} is set but no pdfium library could be bound \
                 (set PDFIUM_LIB_PATH)"
            );
            println!("SKIP: no pdfium library found (set PDFIUM_LIB_PATH)");
            return;
        }
    };
}

// ── Schema registry ──────────────────────────────────────────────────────────

#[test]
fn directory_registry_has_one_entry_per_json_file() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["contract", "payslip", "boarding_pass"] {
        std::fs::write(
            dir.path().join(format!("{name}.json")),
            schema_doc(name, &["a", "b"]).to_string(),
        )
        .unwrap();
    }
    std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
    std::fs::create_dir(dir.path().join("nested.json")).unwrap();

    let reg = SchemaRegistry::load(SchemaSource::Directory(dir.path().to_path_buf())).unwrap();
    assert_eq!(reg.names(), vec!["boarding_pass", "contract", "payslip"]);
    assert!(matches!(
        reg.get("notes"),
        Err(VisionParserError::SchemaNotFound { .. })
    ));
}

#[test]
fn directory_with_malformed_json_fails_to_load() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
    let err = SchemaRegistry::from_dir(dir.path()).unwrap_err();
    assert!(matches!(err, VisionParserError::SchemaLoadFailed { .. }));

    let err = SchemaRegistry::from_dir(&dir.path().join("missing")).unwrap_err();
    assert!(matches!(err, VisionParserError::SchemaLoadFailed { .. }));
}

#[test]
fn service_requires_default_schema_in_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("contract.json"),
        schema_doc("Contract", &["parties"]).to_string(),
    )
    .unwrap();

    let config = ParserConfig::builder()
        .provider(Arc::new(FakeModel::default()))
        .build()
        .unwrap();
    let err = ParserService::new(config, SchemaSource::Directory(dir.path().to_path_buf()))
        .unwrap_err();
    assert!(matches!(err, VisionParserError::DefaultSchemaNotFound { ref name } if name == "resume"));
}

// ── Rendering ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn png_renders_to_its_exact_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let (path, bytes) = write_png(dir.path(), "page.png");

    let b64 = document::render_to_base64(&path, 1, &RenderOptions::default())
        .await
        .unwrap();
    assert_eq!(b64, STANDARD.encode(&bytes));
}

#[tokio::test]
async fn pdf_page_two_renders_page_two() {
    skip_without_pdfium!();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("three.pdf");
    std::fs::write(&path, three_page_pdf()).unwrap();

    assert_eq!(document::page_count(&path, None).await.unwrap(), 3);

    let page = document::render_page(&path, 2, &RenderOptions::default())
        .await
        .unwrap();
    assert_eq!(page.mime_type, "image/png");

    let img = image::load_from_memory(&STANDARD.decode(&page.data).unwrap())
        .unwrap()
        .to_rgb8();
    // 72 DPI: one pixel per point
    assert_eq!((img.width(), img.height()), (200, 200));
    let [r, g, b] = img.get_pixel(100, 100).0;
    assert!(g > 200 && r < 50 && b < 50, "expected green, got {r},{g},{b}");
}

#[tokio::test]
async fn pdf_page_past_the_end_is_out_of_range() {
    skip_without_pdfium!();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("three.pdf");
    std::fs::write(&path, three_page_pdf()).unwrap();

    for page in [0, 10] {
        let err = document::render_page(&path, page, &RenderOptions::default())
            .await
            .unwrap_err();
        assert!(
            matches!(err, VisionParserError::PageOutOfRange { total: 3, .. }),
            "page {page}: {err:?}"
        );
    }
}

#[tokio::test]
async fn pdf_bytes_render_like_files() {
    skip_without_pdfium!();
    let page = document::render_bytes(three_page_pdf(), "upload.PDF", 3, &RenderOptions::default())
        .await
        .unwrap();
    let img = image::load_from_memory(&STANDARD.decode(&page.data).unwrap())
        .unwrap()
        .to_rgb8();
    let [r, g, b] = img.get_pixel(10, 10).0;
    assert!(b > 200 && r < 50 && g < 50, "expected blue, got {r},{g},{b}");
}

#[tokio::test]
async fn garbage_pdf_is_corrupt() {
    skip_without_pdfium!();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fake.pdf");
    std::fs::write(&path, b"this is not a pdf").unwrap();

    let err = document::render_page(&path, 1, &RenderOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, VisionParserError::CorruptPdf { .. }), "{err:?}");
}

// ── Parser service ───────────────────────────────────────────────────────────

#[tokio::test]
async fn two_parses_with_a_new_schema_build_one_parser() {
    let dir = tempfile::tempdir().unwrap();
    let (path, _) = write_png(dir.path(), "scan.png");

    let model = Arc::new(FakeModel::default());
    let events = Arc::new(CreatedCounter::default());
    let service = service(Arc::clone(&model), Arc::clone(&events));
    service
        .register_schema("payslip", schema_doc("Payslip", &["employer", "net_pay"]))
        .unwrap();

    for _ in 0..2 {
        service
            .parse_document(&path, Some("payslip"), 1, None)
            .await
            .unwrap();
    }
    assert_eq!(events.0.load(Ordering::SeqCst), 1);
    assert_eq!(model.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn parsed_keys_are_a_subset_of_schema_properties() {
    let dir = tempfile::tempdir().unwrap();
    let (path, _) = write_png(dir.path(), "cv.png");
    let service = service(Arc::default(), Arc::default());

    for schema in ["resume", "invoice", "receipt", "id_card"] {
        let out = service
            .parse_document(&path, Some(schema), 1, Some("Extract everything"))
            .await
            .unwrap();
        let declared = service.schema(schema).unwrap();
        let obj = out.as_object().expect("object");
        assert!(!obj.is_empty());
        for key in obj.keys() {
            assert!(declared.has_property(key), "{schema}: undeclared key {key}");
        }
    }
}

#[test]
fn placeholder_credential_is_rejected_before_any_call() {
    let err = ParserConfig::builder()
        .api_key("your-google-api-key")
        .build()
        .unwrap_err();
    assert!(err.is_configuration());
    assert_eq!(err.category().http_status(), 503);
}

#[tokio::test]
async fn unsupported_document_fails_without_calling_the_model() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("letter.docx");
    std::fs::write(&path, b"PK").unwrap();

    let model = Arc::new(FakeModel::default());
    let service = service(Arc::clone(&model), Arc::default());
    let err = service
        .parse_document(&path, None, 1, None)
        .await
        .unwrap_err();
    assert!(matches!(err, VisionParserError::UnsupportedFormat { .. }));
    assert_eq!(model.calls.load(Ordering::SeqCst), 0);
}

// ── Batch ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn batch_keeps_request_order_and_isolates_failures() {
    let dir = tempfile::tempdir().unwrap();
    let (png, _) = write_png(dir.path(), "a.png");
    let service = service(Arc::default(), Arc::default());

    let requests = vec![
        ParseRequest::new(&png).schema("invoice"),
        ParseRequest::new(dir.path().join("missing.png")),
        ParseRequest::new(&png).schema("no_such_schema"),
        ParseRequest::new(&png),
    ];
    let results = parse_batch(&service, requests, 4).await;

    let ok: Vec<bool> = results.iter().map(|r| r.is_ok()).collect();
    assert_eq!(ok, vec![true, false, false, true]);
    assert_eq!(results[0].schema, "invoice");
    assert_eq!(results[3].schema, "resume");
    assert_eq!(results[1].category.map(|c| c.http_status()), Some(404));
    assert_eq!(results[2].category.map(|c| c.http_status()), Some(404));
}

#[tokio::test]
async fn stream_yields_every_result() {
    use futures::StreamExt;

    let dir = tempfile::tempdir().unwrap();
    let (png, _) = write_png(dir.path(), "a.png");
    let service = Arc::new(service(Arc::default(), Arc::default()));

    let requests = ["resume", "invoice", "receipt"]
        .iter()
        .map(|s| ParseRequest::new(&png).schema(*s))
        .collect();
    let mut schemas: Vec<String> = parse_stream(service, requests, 2)
        .map(|r| r.schema)
        .collect()
        .await;
    schemas.sort();
    assert_eq!(schemas, vec!["invoice", "receipt", "resume"]);
}

#[tokio::test]
async fn image_has_exactly_one_page() {
    let dir = tempfile::tempdir().unwrap();
    let (png, _) = write_png(dir.path(), "a.png");
    let service = service(Arc::default(), Arc::default());

    let results = parse_pages(&service, &png, &PageSelection::All, None, None, 2)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);

    let err = parse_pages(&service, &png, &PageSelection::Single(2), None, None, 2)
        .await
        .unwrap_err();
    assert!(matches!(err, VisionParserError::PageOutOfRange { page: 0, total: 1 }));
}

// ── Parse-or-reuse workflow ──────────────────────────────────────────────────

#[tokio::test]
async fn workflow_reuses_stored_results() {
    let dir = tempfile::tempdir().unwrap();
    let (png, _) = write_png(dir.path(), "receipt.png");

    let model = Arc::new(FakeModel::default());
    let service = Arc::new(service(Arc::clone(&model), Arc::default()));
    let workflow = ParseWorkflow::new(Arc::clone(&service), InMemoryResultStore::new());

    let doc = DocumentRecord::new(1, &png, Some("receipt"), &service);
    assert_eq!(doc.name, "receipt.png");

    let (first, cached) = workflow.parse(&doc, 1, None).await.unwrap();
    assert!(!cached);
    assert_eq!(first.schema_type, "receipt");

    let (second, cached) = workflow.parse(&doc, 1, Some("invoice")).await.unwrap();
    assert!(cached);
    assert_eq!(second, first);
    assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    assert_eq!(workflow.store().results_for(1).unwrap().len(), 1);
}

#[tokio::test]
async fn workflow_falls_back_to_default_schema() {
    let dir = tempfile::tempdir().unwrap();
    let (png, _) = write_png(dir.path(), "x.png");
    let service = Arc::new(service(Arc::default(), Arc::default()));

    let doc = DocumentRecord::new(5, &png, Some("nonexistent-custom"), &service);
    assert_eq!(doc.schema_type, "resume");

    let workflow = ParseWorkflow::new(Arc::clone(&service), InMemoryResultStore::new());
    let (result, _) = workflow
        .parse(&doc, 1, Some("also-unknown"))
        .await
        .unwrap();
    assert_eq!(result.schema_type, "resume");
    assert!(result.result_data.get("experience").is_some());
}
