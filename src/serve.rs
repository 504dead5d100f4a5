//! Purpose: Provide the upload-and-query HTTP service for runsql.
//! Exports: `ServeConfig`, `serve`.
//! Role: Axum server; each request loads its uploaded files into a fresh in-memory engine.
//! Invariants: Loopback-only unless explicitly allowed.
//! Invariants: Engines never outlive a request; uploads are parsed from memory, not temp files.
//! Invariants: Loading and querying run on the blocking pool, never on async workers.
//! Invariants: The browser page and its script are compiled into the binary.
//! Invariants: Error bodies are `{"status":"error","error":..,"kind":..}` with a stable kind.

use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde::Serialize;
use serde_json::{Map, json};
use std::future::IntoFuture;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use runsql::api::{
    Engine, Error, ErrorKind, LoadOptions, QueryResult, Source, SourceFormat, SourceOptions,
    table_name_from_path,
};

const OUTPUT_FORMATS: [&str; 3] = ["table", "json", "csv"];

const INDEX_HTML: &str = include_str!("../assets/index.html");
const SCRIPT_JS: &str = include_str!("../assets/script.js");

#[derive(Clone, Debug)]
pub struct ServeConfig {
    pub bind: SocketAddr,
    pub allow_non_loopback: bool,
    pub max_body_bytes: u64,
    pub load: LoadOptions,
    pub source: SourceOptions,
}

#[derive(Clone, Copy, Debug)]
struct AppState {
    load: LoadOptions,
    source: SourceOptions,
}

pub async fn serve(config: ServeConfig) -> Result<(), Error> {
    validate_config(&config)?;

    init_tracing();

    let max_body_bytes: usize = config
        .max_body_bytes
        .try_into()
        .map_err(|_| Error::new(ErrorKind::Usage).with_message("--max-body-bytes is too large"))?;

    let state = Arc::new(AppState {
        load: config.load,
        source: config.source,
    });
    let app = router(state, max_body_bytes);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message(format!("failed to bind {}", config.bind))
                .with_source(err)
        })?;
    let local = listener.local_addr().unwrap_or(config.bind);
    info!(addr = %local, max_body_bytes, "listening");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            result.map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("server failed")
                    .with_source(err)
            })?;
        }
        _ = shutdown_signal() => {
            info!("shutting down");
            let _ = shutdown_tx.send(());
            match tokio::time::timeout(Duration::from_secs(10), &mut server).await {
                Ok(result) => result.map_err(|err| {
                    Error::new(ErrorKind::Io)
                        .with_message("server failed")
                        .with_source(err)
                })?,
                Err(_) => {
                    return Err(Error::new(ErrorKind::Io).with_message("server shutdown timed out"));
                }
            }
        }
    };
    Ok(())
}

fn router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/script.js", get(script))
        .route("/health", get(health))
        .route("/schema", post(schema))
        .route("/query", post(query))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn script() -> Response {
    (
        [(header::CONTENT_TYPE, "application/javascript; charset=utf-8")],
        SCRIPT_JS,
    )
        .into_response()
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(addr) => addr.is_loopback(),
        IpAddr::V6(addr) => addr.is_loopback(),
    }
}

fn validate_config(config: &ServeConfig) -> Result<(), Error> {
    if !is_loopback(config.bind.ip()) && !config.allow_non_loopback {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("non-loopback bind requires explicit opt-in")
            .with_hint("Re-run with --allow-non-loopback or use a loopback address."));
    }

    if config.max_body_bytes == 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--max-body-bytes must be greater than zero")
            .with_hint("Use a positive value like 10485760."));
    }

    if config.max_body_bytes > usize::MAX as u64 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--max-body-bytes exceeds platform limits")
            .with_hint("Use a smaller value that fits in memory."));
    }

    config.load.validate()
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        let mut signal = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler");
        signal.recv().await;
    };
    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    #[cfg(not(unix))]
    ctrl_c.await;
}

struct Upload {
    name: String,
    bytes: Bytes,
}

#[derive(Default)]
struct UploadForm {
    files: Vec<Upload>,
    query: Option<String>,
    format: Option<String>,
}

async fn health() -> Response {
    json_response(json!({ "status": "ok" }))
}

async fn schema(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let form = match read_form(multipart).await {
        Ok(form) => form,
        Err(err) => return error_response(err),
    };
    let outcome = run_blocking(move || {
        let engine = load_uploads(*state, form.files)?;
        let mut schemas = Map::new();
        for table in engine_tables(&engine)? {
            let columns = engine.table_columns(&table)?;
            schemas.insert(table, json!(columns));
        }
        Ok(schemas)
    })
    .await;
    match outcome {
        Ok(schemas) => json_response(json!({ "status": "success", "schemas": schemas })),
        Err(err) => error_response(err),
    }
}

async fn query(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let mut form = match read_form(multipart).await {
        Ok(form) => form,
        Err(err) => return error_response(err),
    };
    let sql = match form.query.take().filter(|sql| !sql.trim().is_empty()) {
        Some(sql) => sql,
        None => {
            return error_response(
                Error::new(ErrorKind::Usage)
                    .with_message("query is required")
                    .with_hint("Send a `query` form field with the SQL to run."),
            );
        }
    };
    if let Err(err) = check_format(form.format.as_deref()) {
        return error_response(err);
    }

    let started = Instant::now();
    let outcome = run_blocking(move || {
        let engine = load_uploads(*state, form.files)?;
        engine.query(&sql)
    })
    .await;
    let time_ms = started.elapsed().as_millis() as u64;
    match outcome {
        Ok(QueryResult { columns, rows }) => {
            info!(rows = rows.len(), time_ms, "query finished");
            json_response(json!({
                "status": "success",
                "columns": columns,
                "rows": rows,
                "time_ms": time_ms,
            }))
        }
        Err(err) => error_response(err),
    }
}

async fn read_form(multipart: Result<Multipart, MultipartRejection>) -> Result<UploadForm, Error> {
    let mut multipart = multipart.map_err(|rejection| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("expected a multipart form: {}", rejection.body_text()))
            .with_hint("POST multipart/form-data with one or more `file` fields.")
    })?;

    let mut form = UploadForm::default();
    while let Some(field) = multipart.next_field().await.map_err(form_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let name = field.file_name().map(str::to_string).ok_or_else(|| {
                    Error::new(ErrorKind::Usage)
                        .with_message("file field is missing a file name")
                        .with_hint("The file name's extension selects the parser (.csv, .json, .xlsx).")
                })?;
                let bytes = field.bytes().await.map_err(form_error)?;
                form.files.push(Upload { name, bytes });
            }
            "query" => form.query = Some(field.text().await.map_err(form_error)?),
            "format" => form.format = Some(field.text().await.map_err(form_error)?),
            other => {
                warn!(field = other, "ignoring unknown form field");
            }
        }
    }
    Ok(form)
}

fn form_error(err: MultipartError) -> Error {
    let message = if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        "upload exceeds the request body limit".to_string()
    } else {
        format!("failed to read multipart form: {}", err.body_text())
    };
    Error::new(ErrorKind::Usage)
        .with_message(message)
        .with_source(err)
}

fn check_format(format: Option<&str>) -> Result<(), Error> {
    match format.map(str::trim) {
        None | Some("") => Ok(()),
        Some(value) if OUTPUT_FORMATS.contains(&value) => Ok(()),
        Some(value) => Err(Error::new(ErrorKind::Usage)
            .with_message(format!("unsupported format: {value}"))
            .with_hint("Use one of: table, json, csv.")),
    }
}

/// Loads every upload into a fresh engine, in form order.
fn load_uploads(state: AppState, uploads: Vec<Upload>) -> Result<Engine, Error> {
    if uploads.is_empty() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("at least one file is required")
            .with_hint("Attach files as `file` form fields."));
    }
    let mut engine = Engine::with_options(state.load)?;
    for upload in uploads {
        let format = SourceFormat::from_path(&upload.name)?;
        let table = table_name_from_path(&upload.name);
        let source = Source::open_bytes(format, &upload.name, upload.bytes.to_vec(), state.source)?;
        let report = engine.load(&table, source)?;
        if report.rows_skipped > 0 {
            warn!(table = %report.table, skipped = report.rows_skipped, "skipped malformed records");
        }
    }
    Ok(engine)
}

fn engine_tables(engine: &Engine) -> Result<Vec<String>, Error> {
    let result = engine.query("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")?;
    Ok(result
        .rows
        .into_iter()
        .filter_map(|row| row.into_iter().next())
        .map(|name| name.to_string())
        .collect())
}

async fn run_blocking<T, F>(work: F) -> Result<T, Error>
where
    F: FnOnce() -> Result<T, Error> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("request worker failed")
            .with_source(err)
    })?
}

fn json_response(payload: serde_json::Value) -> Response {
    Json(payload).into_response()
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    status: &'static str,
    error: String,
    kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    table: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    record: Option<u64>,
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Usage
        | ErrorKind::Parse
        | ErrorKind::Schema
        | ErrorKind::Load
        | ErrorKind::Query => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Io | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: Error) -> Response {
    let status = status_for(err.kind());
    if status.is_server_error() {
        warn!(error = %err, "request failed");
    }
    let body = ErrorEnvelope {
        status: "error",
        error: err.message().unwrap_or("error").to_string(),
        kind: format!("{:?}", err.kind()),
        hint: err.hint().map(str::to_string),
        path: err.path().map(|path| path.to_string_lossy().to_string()),
        table: err.table().map(str::to_string),
        record: err.record(),
    };
    (status, Json(body)).into_response()
}
