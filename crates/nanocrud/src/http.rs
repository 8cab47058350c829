//! HTTP surface over the collection cache
//!
//! | Route | |
//! |---|---|
//! | `GET /db/:name?skip&limit` | body (optional) is the query |
//! | `POST /db/:name` | insert a document or an array of documents |
//! | `POST /db/:name/update` | `{where, with, multi?, upsert?}` |
//! | `DELETE /db/:name` | remove every match of the body query |

use std::collections::HashSet;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::{PathRejection, QueryRejection};
use axum::extract::{Path, Query, Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use libnanocrud_core::{Document, NanocrudError, ServerConfig, UpdateOptions, UpdateResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::debug;

use crate::cache::CollectionCache;
use crate::error::{error_response, ServerError};

#[derive(Clone)]
struct AppState {
    cache: Arc<CollectionCache>,
    keys: Arc<HashSet<String>>,
}

/// Pagination for reads
#[derive(Debug, Default, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub skip: usize,
    pub limit: Option<usize>,
}

/// Update request body
#[derive(Debug, Deserialize)]
pub struct UpdateBody {
    #[serde(rename = "where")]
    pub query: Option<Value>,
    #[serde(rename = "with")]
    pub patch: Option<Value>,
    #[serde(default)]
    pub multi: bool,
    #[serde(default)]
    pub upsert: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RemoveResponse {
    num_removed: usize,
}

/// Build the router for `cache` with the auth and CORS policy from `config`
pub fn router(cache: Arc<CollectionCache>, config: &ServerConfig) -> Result<Router, ServerError> {
    let state = AppState {
        cache,
        keys: Arc::new(config.keys().iter().cloned().collect()),
    };

    let cors = cors_layer(config.origin())?;
    Ok(Router::new()
        .route("/db/:name", get(find).post(insert).delete(remove))
        .route("/db/:name/update", post(update))
        .layer(middleware::from_fn_with_state(state.clone(), require_key))
        .layer(cors)
        .with_state(state))
}

fn cors_layer(origin: &str) -> Result<CorsLayer, ServerError> {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);
    if origin == "*" {
        return Ok(layer.allow_origin(Any));
    }
    let value = HeaderValue::from_str(origin)
        .map_err(|e| ServerError::Config(format!("invalid origin '{}': {}", origin, e)))?;
    Ok(layer.allow_origin(AllowOrigin::exact(value)))
}

/// Reject requests without a configured bearer key (when keys are set)
async fn require_key(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if state.keys.is_empty() || request.method() == Method::OPTIONS {
        return next.run(request).await;
    }

    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);
    match presented {
        Some(key) if state.keys.contains(key) => next.run(request).await,
        _ => error_response(
            StatusCode::UNAUTHORIZED,
            "missing or invalid bearer key".to_string(),
        ),
    }
}

async fn find(
    State(state): State<AppState>,
    name: Result<Path<String>, PathRejection>,
    page: Result<Query<Page>, QueryRejection>,
    body: Bytes,
) -> Result<Json<Vec<Document>>, ServerError> {
    let name = collection_name(name)?;
    let Query(page) = page.map_err(|e| NanocrudError::invalid(e.body_text()))?;
    let query = query_body(&body)?;
    let collection = state.cache.open(&name).await?;
    let docs = collection.find(query, page.skip, page.limit).await?;
    debug!(collection = %collection.name(), found = docs.len(), "find");
    Ok(Json(docs))
}

async fn insert(
    State(state): State<AppState>,
    name: Result<Path<String>, PathRejection>,
    body: Bytes,
) -> Result<Json<Value>, ServerError> {
    let name = collection_name(name)?;
    let value = match parse_body(&body)? {
        Some(value @ (Value::Object(_) | Value::Array(_))) => value,
        Some(other) => {
            return Err(NanocrudError::invalid(format!(
                "expected a document or an array of documents, got {}",
                libnanocrud_core::types::document::type_name(&other)
            ))
            .into())
        }
        None => return Err(NanocrudError::invalid("request body is empty").into()),
    };
    let collection = state.cache.open(&name).await?;
    let inserted = collection.insert(value).await?;
    Ok(Json(inserted))
}

async fn update(
    State(state): State<AppState>,
    name: Result<Path<String>, PathRejection>,
    body: Bytes,
) -> Result<Json<UpdateResult>, ServerError> {
    let name = collection_name(name)?;
    let Some(raw) = parse_body(&body)? else {
        return Err(NanocrudError::invalid("request body is empty").into());
    };
    let body: UpdateBody = serde_json::from_value(raw).map_err(NanocrudError::from)?;
    let query = require_object("where", body.query)?;
    let patch = require_object("with", body.patch)?;
    let options = UpdateOptions {
        multi: body.multi,
        upsert: body.upsert,
    };

    let collection = state.cache.open(&name).await?;
    let result = collection.update(query, patch, options).await?;
    Ok(Json(result))
}

async fn remove(
    State(state): State<AppState>,
    name: Result<Path<String>, PathRejection>,
    body: Bytes,
) -> Result<Json<RemoveResponse>, ServerError> {
    let name = collection_name(name)?;
    let query = query_body(&body)?;
    let collection = state.cache.open(&name).await?;
    let num_removed = collection.remove(query, true).await?;
    Ok(Json(RemoveResponse { num_removed }))
}

/// Extractor rejections become JSON error bodies like every other client error
fn collection_name(name: Result<Path<String>, PathRejection>) -> Result<String, ServerError> {
    let Path(name) = name.map_err(|e| NanocrudError::invalid(e.body_text()))?;
    Ok(name)
}

/// Parse a JSON body; an empty body is `None`
fn parse_body(body: &Bytes) -> Result<Option<Value>, ServerError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let value = serde_json::from_slice(body).map_err(NanocrudError::from)?;
    Ok(Some(value))
}

/// A query body: absent or `null` matches everything
fn query_body(body: &Bytes) -> Result<Document, ServerError> {
    match parse_body(body)? {
        None | Some(Value::Null) => Ok(Document::new()),
        Some(Value::Object(query)) => Ok(query),
        Some(_) => Err(NanocrudError::invalid("query must be a JSON object").into()),
    }
}

fn require_object(field: &str, value: Option<Value>) -> Result<Document, ServerError> {
    match value {
        Some(Value::Object(obj)) => Ok(obj),
        Some(_) => Err(NanocrudError::invalid(format!("'{}' must be an object", field)).into()),
        None => Err(NanocrudError::invalid(format!("'{}' is required", field)).into()),
    }
}
