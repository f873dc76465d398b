#![cfg(not(tarpaulin_include))]

use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, FromRequest, FromRequestParts, Multipart, Query, State,
        rejection::{JsonRejection, PathRejection},
    },
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::bridge::{self, ImportReport};
use crate::cell::{CellEditor, CellView, normalize_input};
use crate::column::{Column, ColumnType};
use crate::config::{BackendKind, PortalConfig};
use crate::downloader;
use crate::entity::EntityRecord;
use crate::error::{BackendError, PortalError};
use crate::family::EntityFamily;
use crate::resolver::{AttributeResolver, Portal, ResolvedAttribute};
use crate::rest::RestBackend;
use crate::store::{Backend, MemoryBackend};

const UPLOAD_LIMIT: usize = 20 * 1024 * 1024;

pub struct AppState {
    portal: Portal,
}

#[derive(Deserialize)]
struct NewColumn {
    name: String,
    column_type: String,
}

#[derive(Deserialize)]
struct NewEntity {
    fields: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct FieldUpdate {
    field: String,
    value: String,
}

#[derive(Deserialize)]
struct AttributeUpdate {
    value: String,
}

#[derive(Deserialize)]
struct ExportQuery {
    format: Option<String>,
}

#[derive(Serialize)]
struct AttributeView {
    #[serde(flatten)]
    attribute: ResolvedAttribute,
    view: CellView,
}

#[derive(Serialize)]
struct EntityView {
    entity: EntityRecord,
    attributes: Vec<AttributeView>,
}

#[derive(Serialize)]
struct ErrorResponse {
    status: String,
    kind: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<ImportReport>,
}

enum ApiError {
    Portal(PortalError),
    Internal(String),
}

impl From<PortalError> for ApiError {
    fn from(e: PortalError) -> Self {
        ApiError::Portal(e)
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::Portal(PortalError::validation(rejection.body_text()))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Portal(PortalError::validation(rejection.body_text()))
    }
}

/// `Path` whose rejections use the JSON error body.
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
struct ApiPath<T>(T);

/// `Json` request body whose rejections use the JSON error body.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
struct ApiJson<T>(T);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message, report) = match self {
            ApiError::Internal(message) => {
                error!("internal error: {}", message);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal", message, None)
            }
            ApiError::Portal(e) => {
                let status = match &e {
                    PortalError::Validation(_) => StatusCode::BAD_REQUEST,
                    PortalError::NotFound { .. } => StatusCode::NOT_FOUND,
                    PortalError::PartialImport(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    PortalError::Store { .. } => StatusCode::BAD_GATEWAY,
                    PortalError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                };
                if status.is_server_error() {
                    error!("{}", e);
                }
                let message = e.to_string();
                let kind = e.kind();
                let report = match e {
                    PortalError::PartialImport(report) => Some(report),
                    _ => None,
                };
                (status, kind, message, report)
            }
        };
        let body = ErrorResponse {
            status: "error".to_string(),
            kind: kind.to_string(),
            message,
            report,
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Picks and opens the storage backend named by the configuration.
pub fn build_backend(config: &PortalConfig) -> Result<Arc<dyn Backend>, BackendError> {
    let backend = &config.backend;
    match backend.kind {
        BackendKind::Memory => {
            let mut memory = match &backend.snapshot_path {
                Some(path) => MemoryBackend::with_snapshot(path.clone())?,
                None => MemoryBackend::new(),
            };
            if let Some(base) = &backend.public_url_base {
                memory = memory.with_public_url_base(base.clone());
            }
            Ok(Arc::new(memory))
        }
        BackendKind::Rest => {
            let url = backend.url.as_deref().unwrap_or_default();
            let key = backend.api_key.as_deref().unwrap_or_default();
            Ok(Arc::new(RestBackend::new(url, key, config.request_timeout())?))
        }
    }
}

pub fn router(portal: Portal) -> Router {
    let app_state = Arc::new(AppState { portal });

    Router::new()
        .route("/api/:family/columns", get(list_columns).post(create_column))
        .route("/api/:family/columns/:id", axum::routing::delete(delete_column))
        .route("/api/:family/entities", get(list_entities).post(create_entity))
        .route(
            "/api/:family/entities/:id",
            axum::routing::patch(update_entity).delete(delete_entity),
        )
        .route("/api/:family/entities/:id/attributes", get(get_attributes))
        .route(
            "/api/:family/entities/:id/attributes/:column_id",
            put(set_attribute),
        )
        .route(
            "/api/:family/entities/:id/attributes/:column_id/file",
            post(upload_attribute_file),
        )
        .route("/api/:family/import", post(import_sheet))
        .route("/api/:family/export", get(export_sheet))
        .layer(DefaultBodyLimit::max(UPLOAD_LIMIT))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

pub async fn run(config: PortalConfig) -> Result<(), Box<dyn std::error::Error>> {
    let backend = build_backend(&config)?;
    let portal = Portal::new(backend, config.request_timeout(), config.backend.bucket.clone());
    let app = router(portal);

    let listener = TcpListener::bind(config.bind_addr.as_str()).await?;
    info!("Listening on http://{}", config.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

fn resolver_for(state: &AppState, family: &str) -> ApiResult<AttributeResolver> {
    let family: EntityFamily = family
        .parse()
        .map_err(|_| PortalError::not_found("family", family))?;
    Ok(state.portal.resolver(family))
}

fn attribute_views(entity_id: Uuid, attributes: Vec<ResolvedAttribute>) -> Vec<AttributeView> {
    attributes
        .into_iter()
        .map(|attribute| AttributeView {
            view: CellEditor::new(entity_id, &attribute).view(),
            attribute,
        })
        .collect()
}

async fn list_columns(
    ApiPath(family): ApiPath<String>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<Column>>> {
    let resolver = resolver_for(&state, &family)?;
    Ok(Json(resolver.registry().list_columns().await?))
}

async fn create_column(
    ApiPath(family): ApiPath<String>,
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<NewColumn>,
) -> ApiResult<(StatusCode, Json<Column>)> {
    let resolver = resolver_for(&state, &family)?;
    let column_type: ColumnType = payload.column_type.parse()?;
    let column = resolver.create_column(&payload.name, column_type).await?;
    Ok((StatusCode::CREATED, Json(column)))
}

async fn delete_column(
    ApiPath((family, id)): ApiPath<(String, Uuid)>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<StatusCode> {
    let resolver = resolver_for(&state, &family)?;
    resolver.delete_column(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_entities(
    ApiPath(family): ApiPath<String>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<EntityView>>> {
    let resolver = resolver_for(&state, &family)?;
    let columns = resolver.registry().list_columns().await?;
    let mut views = Vec::new();
    for entity in resolver.entities().list().await? {
        let attributes = resolver.resolve_with(&columns, entity.id).await?;
        views.push(EntityView {
            attributes: attribute_views(entity.id, attributes),
            entity,
        });
    }
    Ok(Json(views))
}

async fn create_entity(
    ApiPath(family): ApiPath<String>,
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<NewEntity>,
) -> ApiResult<(StatusCode, Json<EntityRecord>)> {
    let resolver = resolver_for(&state, &family)?;
    let record = resolver.create_entity(payload.fields).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn update_entity(
    ApiPath((family, id)): ApiPath<(String, Uuid)>,
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<FieldUpdate>,
) -> ApiResult<Json<EntityRecord>> {
    let resolver = resolver_for(&state, &family)?;
    let record = resolver
        .entities()
        .update_field(id, &payload.field, &payload.value)
        .await?;
    Ok(Json(record))
}

async fn delete_entity(
    ApiPath((family, id)): ApiPath<(String, Uuid)>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<StatusCode> {
    let resolver = resolver_for(&state, &family)?;
    resolver.delete_entity(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_attributes(
    ApiPath((family, id)): ApiPath<(String, Uuid)>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<AttributeView>>> {
    let resolver = resolver_for(&state, &family)?;
    resolver.entities().get(id).await?;
    let attributes = resolver.resolve_attributes(id).await?;
    Ok(Json(attribute_views(id, attributes)))
}

/// Writes one cell, then answers with the freshly resolved row.
async fn set_attribute(
    ApiPath((family, id, column_id)): ApiPath<(String, Uuid, Uuid)>,
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<AttributeUpdate>,
) -> ApiResult<Json<Vec<AttributeView>>> {
    let resolver = resolver_for(&state, &family)?;
    let column = resolver.registry().get_column(column_id).await?;
    let value = normalize_input(column.column_type, &payload.value).map_err(PortalError::Validation)?;
    resolver.set_column_value(id, &column, &value).await?;
    let attributes = resolver.resolve_attributes(id).await?;
    Ok(Json(attribute_views(id, attributes)))
}

async fn upload_attribute_file(
    ApiPath((family, id, column_id)): ApiPath<(String, Uuid, Uuid)>,
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> ApiResult<Json<Vec<AttributeView>>> {
    let resolver = resolver_for(&state, &family)?;
    let (file_name, bytes) = read_file_field(multipart).await?;
    resolver.attach_file(id, column_id, &file_name, bytes).await?;
    let attributes = resolver.resolve_attributes(id).await?;
    Ok(Json(attribute_views(id, attributes)))
}

async fn import_sheet(
    ApiPath(family): ApiPath<String>,
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> ApiResult<Json<ImportReport>> {
    let resolver = resolver_for(&state, &family)?;
    let (file_name, bytes) = read_file_field(multipart).await?;
    let report = bridge::import_upload(&resolver, &file_name, &bytes).await?;
    Ok(Json(report))
}

async fn export_sheet(
    ApiPath(family): ApiPath<String>,
    Query(params): Query<ExportQuery>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Response> {
    let resolver = resolver_for(&state, &family)?;
    let sheet = bridge::export_sheet(&resolver).await?;
    let name = resolver.family().plural();

    let (content_type, extension, body) = match params.format.as_deref().unwrap_or("xlsx") {
        "xlsx" => (
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            "xlsx",
            downloader::to_xlsx(&sheet).map_err(|e| ApiError::Internal(e.to_string()))?,
        ),
        "csv" => ("text/csv; charset=utf-8", "csv", downloader::to_csv(&sheet).into_bytes()),
        other => {
            return Err(PortalError::validation(format!("Unsupported export format: {}", other)).into());
        }
    };

    let headers = [
        (header::CONTENT_TYPE, content_type.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}.{}\"", name, extension),
        ),
    ];
    Ok((StatusCode::OK, headers, body).into_response())
}

// Pull the `file` field out of a multipart upload
async fn read_file_field(mut multipart: Multipart) -> ApiResult<(String, Vec<u8>)> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| PortalError::validation(format!("Malformed upload: {}", e)))?
    {
        if field.name() == Some("file") {
            let file_name = field.file_name().unwrap_or("upload").to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| PortalError::validation(format!("Malformed upload: {}", e)))?;
            return Ok((file_name, bytes.to_vec()));
        }
    }
    Err(PortalError::validation("No file data received").into())
}
