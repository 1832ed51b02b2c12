use attendance_export::{ExportConfig, ExportService};
use axum::{
    body::{to_bytes, Body},
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tower::ServiceExt;

const XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn shipped_templates() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("templates")
}

fn app(template_dir: &Path) -> Router {
    ExportService::new(ExportConfig {
        template_dir: template_dir.to_path_buf(),
        ..ExportConfig::default()
    })
    .router()
}

fn ana_payload() -> Value {
    json!({
        "sid": "S1",
        "gid": "G1",
        "ym": "2024-05",
        "alumnos": [{"id": "1", "name": "Ana"}],
        "allDays": ["2024-05-02", "2024-05-01"],
        "byDay": {
            "2024-05-01": {"A": 1, "R": 0, "F": 0},
            "2024-05-02": {"A": 0, "R": 1, "F": 0}
        },
        "monthlyTotals": {"A": 1, "R": 1, "F": 0},
        "perAlumno": {"1": {"A": 1, "R": 1, "F": 0}}
    })
}

async fn send(app: Router, method: Method, uri: &str, body: Body) -> (StatusCode, HeaderMap, Vec<u8>) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body)
        .expect("build request");
    let response = app.oneshot(request).await.expect("router is infallible");
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    (status, headers, bytes.to_vec())
}

async fn post_json(app: Router, uri: &str, payload: &Value) -> (StatusCode, HeaderMap, String) {
    let (status, headers, body) = send(app, Method::POST, uri, Body::from(payload.to_string())).await;
    (status, headers, String::from_utf8_lossy(&body).into_owned())
}

fn assert_cors(headers: &HeaderMap) {
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    assert_eq!(
        headers[header::ACCESS_CONTROL_ALLOW_METHODS],
        "GET, POST, OPTIONS"
    );
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_HEADERS], "Content-Type");
}

#[tokio::test]
async fn preflight_returns_empty_ok() {
    let (status, headers, body) = send(
        app(&shipped_templates()),
        Method::OPTIONS,
        "/api/export-excel",
        Body::empty(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());
    assert_cors(&headers);
}

#[tokio::test]
async fn get_reports_liveness() {
    let (status, headers, body) = send(
        app(&shipped_templates()),
        Method::GET,
        "/api/export-excel",
        Body::empty(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"export-excel ok");
    assert_cors(&headers);

    let (_, _, body) = send(
        app(&shipped_templates()),
        Method::GET,
        "/api/export-excel-v2",
        Body::empty(),
    )
    .await;
    assert_eq!(body, b"export-excel-v2 ok");
}

#[tokio::test]
async fn other_verbs_are_rejected() {
    for method in [Method::PUT, Method::DELETE, Method::PATCH, Method::HEAD] {
        let (status, headers, body) = send(
            app(&shipped_templates()),
            method.clone(),
            "/api/export-excel",
            Body::empty(),
        )
        .await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED, "{}", method);
        // HEAD responses never carry a body
        if method != Method::HEAD {
            assert_eq!(body, b"METHOD_NOT_ALLOWED");
        }
        assert_cors(&headers);
    }
}

#[tokio::test]
async fn missing_ids_fail_before_template_io() {
    let nowhere = PathBuf::from("/nonexistent/attendance-templates");
    let payload = json!({"gid": "g1", "ym": "2024-05"});
    let (status, headers, body) = post_json(app(&nowhere), "/api/export-excel", &payload).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "BAD_REQUEST: missing sid/gid/ym");
    assert_cors(&headers);
}

#[tokio::test]
async fn malformed_structure_is_bad_request() {
    let mut payload = ana_payload();
    payload["allDays"] = json!("2024-05-01");
    let (status, _, body) = post_json(app(&shipped_templates()), "/api/export-excel", &payload).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.starts_with("BAD_REQUEST: invalid data structure"), "{}", body);

    let (status, _, body) = send(
        app(&shipped_templates()),
        Method::POST,
        "/api/export-excel",
        Body::from("{\"sid\": "),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.starts_with(b"BAD_REQUEST: invalid JSON body"));

    let (status, _, body) = send(
        app(&shipped_templates()),
        Method::POST,
        "/api/export-excel",
        Body::empty(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, b"BAD_REQUEST: missing sid/gid/ym");
}

#[tokio::test]
async fn missing_template_is_reported() {
    let dir = temp_dir("attendance-export-empty");
    let (status, headers, body) = post_json(app(&dir), "/api/export-excel", &ana_payload()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.starts_with("TEMPLATE_NOT_FOUND: "), "{}", body);
    assert!(body.contains("asistencia_template.xlsx"));
    assert_eq!(headers[header::CONTENT_TYPE], "text/plain; charset=utf-8");
    assert_cors(&headers);
    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn corrupt_template_is_reported() {
    let dir = temp_dir("attendance-export-corrupt");
    std::fs::write(dir.join("asistencia_template_v2.xlsx"), b"PK not really a zip")
        .expect("write corrupt template");
    let (status, _, body) = post_json(app(&dir), "/api/export-excel-v2", &ana_payload()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.starts_with("TEMPLATE_LOAD_FAILED: "), "{}", body);
    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn v1_export_returns_workbook() {
    let (status, headers, body) = send(
        app(&shipped_templates()),
        Method::POST,
        "/api/export-excel",
        Body::from(ana_payload().to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], XLSX);
    assert_eq!(
        headers[header::CONTENT_DISPOSITION],
        "attachment; filename=\"Asistencia_S1_G1_2024-05.xlsx\""
    );
    assert!(headers.get(header::CACHE_CONTROL).is_none());
    assert_cors(&headers);

    let book = attendance_export::helpers::xlsx::load_template(&body).expect("valid workbook");
    let daily = book.get_sheet_by_name("Mensual Grupal").expect("daily sheet");
    assert_eq!(daily.get_value("A3"), "2024-05-01");
    assert_eq!(daily.get_value("A4"), "2024-05-02");
}

#[tokio::test]
async fn v2_export_disables_caching() {
    let (status, headers, body) = send(
        app(&shipped_templates()),
        Method::POST,
        "/api/export-excel-v2",
        Body::from(ana_payload().to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CACHE_CONTROL], "no-store");
    assert_eq!(
        headers[header::CONTENT_DISPOSITION],
        "attachment; filename=\"Asistencia_S1_G1_2024-05_v2.xlsx\""
    );

    let book = attendance_export::helpers::xlsx::load_template(&body).expect("valid workbook");
    let per_student = book.get_sheet_by_name("Por Alumno").expect("per-student sheet");
    assert_eq!(per_student.get_value("A4"), "Ana");
    assert_eq!(per_student.get_value("E4"), "2");
}

#[tokio::test]
async fn oversized_body_is_bad_request() {
    let router = ExportService::new(ExportConfig {
        template_dir: shipped_templates(),
        body_limit: 64,
        ..ExportConfig::default()
    })
    .router();
    let (status, headers, body) = post_json(router, "/api/export-excel", &ana_payload()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.starts_with("BAD_REQUEST: unreadable request body"), "{}", body);
    assert_cors(&headers);
}

#[tokio::test]
async fn slow_export_times_out() {
    let router = ExportService::new(ExportConfig {
        template_dir: shipped_templates(),
        request_timeout: Duration::from_nanos(1),
        ..ExportConfig::default()
    })
    .router();
    let (status, headers, body) = post_json(router, "/api/export-excel", &ana_payload()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.starts_with("TIMEOUT: "), "{}", body);
    assert_cors(&headers);
}

#[tokio::test]
async fn template_without_student_sheet_fails_to_write() {
    let dir = temp_dir("attendance-export-no-sheet");
    let mut book = umya_spreadsheet::reader::xlsx::read(
        shipped_templates().join("asistencia_template.xlsx"),
    )
    .expect("read shipped template");
    book.remove_sheet_by_name("Por Alumno")
        .expect("remove per-student sheet");
    umya_spreadsheet::writer::xlsx::write(&book, dir.join("asistencia_template.xlsx"))
        .expect("write trimmed template");

    let (status, _, body) = post_json(app(&dir), "/api/export-excel", &ana_payload()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body,
        "WRITE_SHEETS_FAILED: sheet 'Por Alumno' not found in template"
    );
    let _ = std::fs::remove_dir_all(dir);
}
