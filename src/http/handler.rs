//! HTTP handlers for the resource API

use crate::engine::{FetchRequest, FetchResponse, PatchOperation, WriteFailure, WriteReport};
use crate::error::CraftsError;
use crate::registry::ApiRegistry;
use axum::{
    extract::{Json, Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::sync::Arc;

pub type AppState = Arc<ApiRegistry>;

/// Raw query string pairs; repeated keys are kept
pub type Params = Query<Vec<(String, String)>>;

pub const QUERIES_ISSUED_HEADER: &str = "x-queries-issued";
pub const QUERIES_IF_UNCACHED_HEADER: &str = "x-queries-if-uncached";

/// Error response: `{status, message}` plus the partial effect of a failed write
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    report: Option<WriteReport>,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            report: None,
        }
    }
}

fn status_of(error: &CraftsError) -> StatusCode {
    match error {
        CraftsError::ApiNotFound(_) => StatusCode::NOT_FOUND,
        e if e.is_client_fault() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<CraftsError> for ApiError {
    fn from(error: CraftsError) -> Self {
        Self {
            status: status_of(&error),
            message: error.to_string(),
            report: None,
        }
    }
}

impl From<WriteFailure> for ApiError {
    fn from(failure: WriteFailure) -> Self {
        Self {
            status: status_of(&failure.error),
            message: failure.error.to_string(),
            report: Some(failure.report),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "status": self.status.as_u16(),
            "message": self.message,
        });
        if let Some(report) = self.report {
            body["deletedTriples"] = json!(report.deleted_triples);
            body["insertedTriples"] = json!(report.inserted_triples);
            body["queriesIssued"] = json!(report.queries_issued);
        }
        (self.status, Json(body)).into_response()
    }
}

fn param<'a>(pairs: &'a [(String, String)], name: &str) -> Result<&'a str, ApiError> {
    pairs
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
        .ok_or_else(|| ApiError::bad_request(format!("Missing query parameter \"{}\"", name)))
}

fn counters(response: &FetchResponse) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(QUERIES_ISSUED_HEADER, HeaderValue::from(response.queries_issued));
    headers.insert(QUERIES_IF_UNCACHED_HEADER, HeaderValue::from(response.queries_if_uncached));
    headers
}

fn write_response(status: StatusCode, message: &str, report: WriteReport) -> Response {
    let body = json!({
        "status": status.as_u16(),
        "message": format!(
            "{}. #queries: {}. #deleted triples: {}. #inserted triples: {}",
            message, report.queries_issued, report.deleted_triples, report.inserted_triples
        ),
        "deletedTriples": report.deleted_triples,
        "insertedTriples": report.inserted_triples,
        "queriesIssued": report.queries_issued,
    });
    (status, Json(body)).into_response()
}

/// Handler for service status
pub async fn status_handler(State(registry): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": crate::VERSION,
        "apis": registry.list(),
        "cachedQueries": registry.query_cache().len(),
    }))
}

/// `GET /apis/{api}/resource?id=&iri=`
pub async fn get_resource(
    State(registry): State<AppState>,
    Path(api): Path<String>,
    Query(pairs): Params,
) -> Result<Response, ApiError> {
    let engine = registry.get(&api)?;
    let iri = param(&pairs, "iri")?;
    let request = FetchRequest::single(param(&pairs, "id")?, iri);

    let response = engine.fetch(&engine.context(), &request).await?;
    let headers = counters(&response);
    let repr = response
        .data
        .into_iter()
        .next()
        .unwrap_or_else(|| json!({ "iri": iri }));
    Ok((headers, Json(repr)).into_response())
}

/// `GET /apis/{api}/resources?id=&iris=..&iris=..[&ns=&nspref=]`
pub async fn get_resources(
    State(registry): State<AppState>,
    Path(api): Path<String>,
    Query(pairs): Params,
) -> Result<Response, ApiError> {
    let engine = registry.get(&api)?;
    let iris: Vec<String> = pairs
        .iter()
        .filter(|(k, _)| k == "iris")
        .map(|(_, v)| v.clone())
        .collect();
    let mut request = FetchRequest::new(param(&pairs, "id")?, iris);
    if let (Ok(ns), Ok(nspref)) = (param(&pairs, "ns"), param(&pairs, "nspref")) {
        request = request.with_prefix(nspref, ns);
    }

    let response = engine.fetch(&engine.context(), &request).await?;
    let headers = counters(&response);
    Ok((headers, Json(JsonValue::Array(response.data))).into_response())
}

/// `PUT /apis/{api}/resource?id=&iri=`
pub async fn put_resource(
    State(registry): State<AppState>,
    Path(api): Path<String>,
    Query(pairs): Params,
    Json(body): Json<JsonValue>,
) -> Result<Response, ApiError> {
    let engine = registry.get(&api)?;
    let report = engine
        .replace(&engine.context(), param(&pairs, "id")?, param(&pairs, "iri")?, &body)
        .await?;
    Ok(if report.deleted_triples == 0 {
        write_response(StatusCode::CREATED, "Resource created", report)
    } else {
        write_response(StatusCode::OK, "Resource replaced", report)
    })
}

/// `PATCH /apis/{api}/resource?id=&iri=`
pub async fn patch_resource(
    State(registry): State<AppState>,
    Path(api): Path<String>,
    Query(pairs): Params,
    Json(ops): Json<Vec<PatchOperation>>,
) -> Result<Response, ApiError> {
    let engine = registry.get(&api)?;
    let report = engine
        .patch(&engine.context(), param(&pairs, "id")?, param(&pairs, "iri")?, &ops)
        .await?;
    Ok(write_response(StatusCode::OK, "Resource updated", report))
}

/// `DELETE /apis/{api}/resource?id=&iri=`
pub async fn delete_resource(
    State(registry): State<AppState>,
    Path(api): Path<String>,
    Query(pairs): Params,
) -> Result<Response, ApiError> {
    let engine = registry.get(&api)?;
    let report = engine
        .remove(&engine.context(), param(&pairs, "id")?, param(&pairs, "iri")?)
        .await?;
    Ok(write_response(StatusCode::OK, "Resource deleted", report))
}

/// `GET /apis/{api}/query?id=<template>&<param>=..`
pub async fn run_query(
    State(registry): State<AppState>,
    Path(api): Path<String>,
    Query(pairs): Params,
) -> Result<Response, ApiError> {
    let engine = registry.get(&api)?;
    let template = param(&pairs, "id")?.to_string();
    let raw: HashMap<String, String> = pairs.into_iter().filter(|(k, _)| k != "id").collect();

    let results = engine.run_query(&engine.context(), &template, &raw).await?;
    Ok(Json(results.as_ref().clone()).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(status_of(&CraftsError::ApiNotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(status_of(&CraftsError::ModelMismatch("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(&CraftsError::Endpoint {
                endpoint: "ep1".into(),
                status: 503,
                message: "down".into()
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_missing_parameter() {
        let pairs = vec![("id".to_string(), "Book".to_string())];
        assert_eq!(param(&pairs, "id").unwrap(), "Book");
        let err = param(&pairs, "iri").unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }
}
