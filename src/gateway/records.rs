//! CRUD routes shared by every record collection.
//!
//! One set of handlers serves all collections; each collection's router
//! carries its [`CollectionSpec`] as an extension, which decides the field
//! rules and whether listing needs an admin session.

use super::error::ApiError;
use super::{AppState, ClientAddr};
use crate::records::{validate_fields, CollectionSpec, ListOrder, Record};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use axum::routing::get;
use axum::{Extension, Router};
use serde::Deserialize;
use std::sync::Arc;

/// Upper bound on `?limit=`.
pub const MAX_LIST_LIMIT: usize = 1000;

type Body = Result<Json<serde_json::Value>, JsonRejection>;

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub order: Option<ListOrder>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Routes for one collection: `POST|GET {path}` and `GET|PUT|DELETE {path}/{id}`.
pub fn collection_router(spec: CollectionSpec) -> Router<AppState> {
    let item_path = format!("{}/{{id}}", spec.path);
    Router::new()
        .route(&spec.path, get(list_records).post(create_record))
        .route(
            &item_path,
            get(get_record).put(update_record).delete(delete_record),
        )
        .layer(Extension(Arc::new(spec)))
}

fn parse_body(body: Body) -> Result<serde_json::Value, ApiError> {
    body.map(|Json(value)| value)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

fn authorize_read(
    state: &AppState,
    spec: &CollectionSpec,
    headers: &HeaderMap,
) -> Result<(), ApiError> {
    if spec.list_requires_auth {
        state.verifier.require_admin(headers)?;
    }
    Ok(())
}

/// POST {path}: Public submission.
async fn create_record(
    State(state): State<AppState>,
    Extension(spec): Extension<Arc<CollectionSpec>>,
    ClientAddr(origin): ClientAddr,
    body: Body,
) -> Result<(StatusCode, Json<Record>), ApiError> {
    let body = parse_body(body)?;
    let fields = validate_fields(&spec.fields, &body)?;

    let record = Record::new(&spec.name, fields, &origin);
    state.records.insert(&record, spec.max_records)?;

    tracing::info!(collection = %spec.name, id = %record.id, origin = %origin, "Record created");
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET {path}: Newest first unless `?order=asc`.
async fn list_records(
    State(state): State<AppState>,
    Extension(spec): Extension<Arc<CollectionSpec>>,
    headers: HeaderMap,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<Vec<Record>>, ApiError> {
    authorize_read(&state, &spec, &headers)?;
    let Query(query) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let limit = query.limit.map(|n| n.min(MAX_LIST_LIMIT));
    let records = state
        .records
        .list(&spec.name, query.order.unwrap_or_default(), limit)?;
    Ok(Json(records))
}

/// GET {path}/{id}
async fn get_record(
    State(state): State<AppState>,
    Extension(spec): Extension<Arc<CollectionSpec>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Record>, ApiError> {
    authorize_read(&state, &spec, &headers)?;
    state
        .records
        .get(&spec.name, &id)?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

/// PUT {path}/{id}: Admin only. Replaces the record's fields.
async fn update_record(
    State(state): State<AppState>,
    Extension(spec): Extension<Arc<CollectionSpec>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Body,
) -> Result<Json<Record>, ApiError> {
    let claims = state.verifier.require_admin(&headers)?;
    let body = parse_body(body)?;
    let fields = validate_fields(&spec.fields, &body)?;

    let record = state
        .records
        .update(&spec.name, &id, fields)?
        .ok_or(ApiError::NotFound)?;

    tracing::info!(collection = %spec.name, id = %id, by = %claims.sub, "Record updated");
    Ok(Json(record))
}

/// DELETE {path}/{id}: Admin only.
async fn delete_record(
    State(state): State<AppState>,
    Extension(spec): Extension<Arc<CollectionSpec>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let claims = state.verifier.require_admin(&headers)?;

    if !state.records.delete(&spec.name, &id)? {
        return Err(ApiError::NotFound);
    }

    tracing::info!(collection = %spec.name, id = %id, by = %claims.sub, "Record deleted");
    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Record deleted",
        "id": id,
    })))
}
