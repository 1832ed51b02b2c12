use axum::{
    body::{Body, Bytes},
    extract::{rejection::BytesRejection, DefaultBodyLimit, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, MethodFilter, MethodRouter},
    Router,
};
use serde_json::Value;
use std::{env, io, path::PathBuf, sync::Arc, time::Duration};
use tracing::{error, info, warn};

use crate::{
    error::ExportError,
    helpers::{layout::TemplateVariant, xlsx},
    models::attendance::AttendanceRequest,
};

pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

const DEFAULT_TEMPLATE_DIR: &str = "templates";
const DEFAULT_TIMEOUT_SECS: u64 = 15;
const DEFAULT_BODY_LIMIT_BYTES: usize = 16 * 1024 * 1024;

/// Configuration for the export service
#[derive(Clone, Debug, PartialEq)]
pub struct ExportConfig {
    /// Directory holding the workbook templates
    pub template_dir: PathBuf,
    /// Ceiling on one export, template read to serialized bytes
    pub request_timeout: Duration,
    /// Largest accepted request body in bytes
    pub body_limit: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            template_dir: PathBuf::from(DEFAULT_TEMPLATE_DIR),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            body_limit: DEFAULT_BODY_LIMIT_BYTES,
        }
    }
}

impl ExportConfig {
    /// Build the configuration from environment variables.
    ///
    /// # Environment Variables
    /// - `TEMPLATE_DIR` (optional, default: `templates`)
    /// - `EXPORT_TIMEOUT_SECS` (optional, default: 15): positive integer
    /// - `EXPORT_BODY_LIMIT_BYTES` (optional, default: 16 MiB): positive integer
    pub fn from_env() -> Result<Self, String> {
        let template_dir = env::var("TEMPLATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_TEMPLATE_DIR));

        let request_timeout = match env::var("EXPORT_TIMEOUT_SECS") {
            Ok(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(format!(
                        "EXPORT_TIMEOUT_SECS must be a positive integer, got '{}'",
                        raw
                    ));
                }
            },
            Err(_) => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        };

        let body_limit = match env::var("EXPORT_BODY_LIMIT_BYTES") {
            Ok(raw) => match raw.trim().parse::<usize>() {
                Ok(bytes) if bytes > 0 => bytes,
                _ => {
                    return Err(format!(
                        "EXPORT_BODY_LIMIT_BYTES must be a positive integer, got '{}'",
                        raw
                    ));
                }
            },
            Err(_) => DEFAULT_BODY_LIMIT_BYTES,
        };

        Ok(Self {
            template_dir,
            request_timeout,
            body_limit,
        })
    }
}

/// Renders attendance summaries into workbook templates.
///
/// Holds no per-request state: every export reads its own copy of the
/// template and builds its own workbook.
#[derive(Clone)]
pub struct ExportService {
    pub config: ExportConfig,
}

impl ExportService {
    pub fn new(config: ExportConfig) -> Self {
        info!(
            "Creating ExportService with templates in {}",
            config.template_dir.display()
        );
        Self { config }
    }

    /// Create an Axum router exposing both template variants
    pub fn router(self) -> Router {
        info!("Creating export service router");
        let body_limit = self.config.body_limit;
        let shared_state = Arc::new(self);

        Router::new()
            .route("/api/export-excel", endpoint(TemplateVariant::V1))
            .route("/api/export-excel-v2", endpoint(TemplateVariant::V2))
            .layer(DefaultBodyLimit::max(body_limit))
            .layer(middleware::map_response(with_cors_headers))
            .with_state(shared_state)
    }

    pub fn template_path(&self, variant: TemplateVariant) -> PathBuf {
        self.config.template_dir.join(variant.file_name())
    }

    /// Render `request` into the `variant` template, bounded by the configured
    /// deadline.
    pub async fn export(
        &self,
        request: AttendanceRequest,
        variant: TemplateVariant,
    ) -> Result<Vec<u8>, ExportError> {
        let deadline = self.config.request_timeout;
        match tokio::time::timeout(deadline, self.render(request, variant)).await {
            Ok(result) => result,
            Err(_) => {
                error!("Export exceeded deadline of {:?}", deadline);
                Err(ExportError::Timeout(format!(
                    "export did not finish within {} ms",
                    deadline.as_millis()
                )))
            }
        }
    }

    async fn render(
        &self,
        request: AttendanceRequest,
        variant: TemplateVariant,
    ) -> Result<Vec<u8>, ExportError> {
        let template = self.read_template(variant).await?;

        tokio::task::spawn_blocking(move || {
            let mut book = xlsx::load_template(&template)?;
            xlsx::populate(&mut book, variant.layout(), &request)?;
            xlsx::render(&book)
        })
        .await
        .map_err(|e| {
            error!("Workbook task aborted: {}", e);
            ExportError::Uncaught(e.to_string())
        })?
    }

    async fn read_template(&self, variant: TemplateVariant) -> Result<Vec<u8>, ExportError> {
        let path = self.template_path(variant);
        info!("Reading {} template from {}", variant, path.display());

        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                error!("Template not found: {}", path.display());
                Err(ExportError::TemplateNotFound(path.display().to_string()))
            }
            Err(e) => {
                error!("Failed to read template {}: {}", path.display(), e);
                Err(ExportError::TemplateLoadFailed(format!(
                    "{}: {}",
                    path.display(),
                    e
                )))
            }
        }
    }
}

// `get` would also answer HEAD, which is not part of the contract.
fn endpoint(variant: TemplateVariant) -> MethodRouter<Arc<ExportService>> {
    get(move || async move { variant.liveness_message() })
        .on(MethodFilter::HEAD, method_not_allowed)
        .options(|| async { StatusCode::OK })
        .post(
            move |State(service): State<Arc<ExportService>>,
                  body: Result<Bytes, BytesRejection>| async move {
                export_attendance(service, variant, body).await
            },
        )
        .fallback(method_not_allowed)
}

async fn method_not_allowed() -> (StatusCode, &'static str) {
    (StatusCode::METHOD_NOT_ALLOWED, "METHOD_NOT_ALLOWED")
}

async fn with_cors_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    response
}

// Route handlers
async fn export_attendance(
    service: Arc<ExportService>,
    variant: TemplateVariant,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            warn!("Unreadable {} export body: {}", variant, rejection.body_text());
            return ExportError::BadRequest(format!(
                "unreadable request body: {}",
                rejection.body_text()
            ))
            .into_response();
        }
    };
    info!("Received {} export request ({} bytes)", variant, body.len());

    let request = match parse_body(&body).and_then(AttendanceRequest::try_from) {
        Ok(request) => request,
        Err(e) => {
            warn!("Rejected export request: {}", e);
            return e.into_response();
        }
    };

    let file_name = variant.download_name(&request);
    match service.export(request, variant).await {
        Ok(workbook) => {
            info!("Export {} ready, size: {} bytes", file_name, workbook.len());
            workbook_response(variant, &file_name, workbook)
        }
        Err(e) => {
            error!("Export {} failed: {}", file_name, e);
            e.into_response()
        }
    }
}

/// An empty body behaves like `{}` so it fails on the missing fields.
fn parse_body(body: &[u8]) -> Result<Value, ExportError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body)
        .map_err(|e| ExportError::BadRequest(format!("invalid JSON body: {}", e)))
}

fn workbook_response(variant: TemplateVariant, file_name: &str, workbook: Vec<u8>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(XLSX_CONTENT_TYPE),
    );

    match HeaderValue::from_str(&format!("attachment; filename=\"{}\"", file_name)) {
        Ok(value) => {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }
        Err(e) => {
            return ExportError::Uncaught(format!("invalid download name {}: {}", file_name, e))
                .into_response();
        }
    }

    if let Some(cache_control) = variant.cache_control() {
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(cache_control));
    }

    (StatusCode::OK, headers, Body::from(workbook)).into_response()
}
