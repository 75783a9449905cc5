use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, Response, StatusCode};
use bytes::Bytes;
use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

use plexus_common::{ApiType, RequestContext};
use plexus_core::{DispatchOutcome, Engine};

use crate::AppState;
use crate::auth::{AuthOutcome, authenticate};
use crate::error::{auth_error, error_response, invalid_request};
use crate::multipart;

#[derive(serde::Deserialize, Default)]
pub struct QueryParams {
    /// Gemini SDKs pass the API key as `?key=`.
    key: Option<String>,
}

pub async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response<Body> {
    dispatch_json(&state.engine, ApiType::Chat, &headers, None, body, |_| {}).await
}

pub async fn messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response<Body> {
    dispatch_json(&state.engine, ApiType::Messages, &headers, None, body, |_| {}).await
}

pub async fn responses(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response<Body> {
    dispatch_json(&state.engine, ApiType::Responses, &headers, None, body, |_| {}).await
}

pub async fn embeddings(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response<Body> {
    dispatch_json(&state.engine, ApiType::Embeddings, &headers, None, body, |_| {}).await
}

pub async fn images(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response<Body> {
    dispatch_json(&state.engine, ApiType::Images, &headers, None, body, |_| {}).await
}

pub async fn speech(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response<Body> {
    dispatch_json(&state.engine, ApiType::Speech, &headers, None, body, |_| {}).await
}

/// Gemini routes carry the model and operation in one path segment:
/// `/v1beta/models/{model}:{generateContent|streamGenerateContent}`.
pub async fn gemini(
    State(state): State<AppState>,
    Path(model_action): Path<String>,
    Query(params): Query<QueryParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Response<Body> {
    let Some((model, action)) = model_action.split_once(':') else {
        return invalid_request(
            ApiType::Gemini,
            "expected /v1beta/models/{model}:generateContent",
        );
    };
    let stream = match action {
        "generateContent" => false,
        "streamGenerateContent" => true,
        other => {
            return invalid_request(ApiType::Gemini, &format!("unsupported action `{other}`"));
        }
    };
    let model = model.to_string();

    dispatch_json(
        &state.engine,
        ApiType::Gemini,
        &headers,
        params.key.as_deref(),
        body,
        move |unified| {
            unified.model = model;
            unified.stream = stream;
        },
    )
    .await
}

/// Multipart transcription uploads relay opaquely: the `model` form field
/// is resolved like any alias and spliced with the concrete target model.
pub async fn transcriptions(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response<Body> {
    let engine = &state.engine;
    let snapshot = engine.config().snapshot();
    let api_key_name = match authenticate(&snapshot, &headers, None) {
        AuthOutcome::Authorized(name) => name,
        AuthOutcome::Denied => return auth_error(ApiType::Chat),
    };

    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if multipart::boundary_of(content_type).is_none() {
        return invalid_request(ApiType::Chat, "expected multipart/form-data");
    }
    let Some(model) = multipart::extract_model(&body) else {
        return invalid_request(ApiType::Chat, "missing `model` form field");
    };

    let mut ctx = request_context(ApiType::Transcriptions, &headers);
    ctx.api_key_name = api_key_name;
    let request_id = ctx.id.clone();

    let content_type = content_type.to_string();
    match engine
        .relay_opaque(
            ApiType::Transcriptions,
            &model,
            body,
            &content_type,
            ctx,
            // Splice the concrete target model into the form field for
            // whichever candidate each attempt lands on.
            &|body, target| Bytes::from(multipart::replace_model(body, target)),
        )
        .await
    {
        Ok(DispatchOutcome::Binary {
            status,
            content_type,
            body,
        }) => binary_response(status, &content_type, body, &request_id),
        Ok(_) => invalid_request(ApiType::Chat, "unexpected outcome for transcription"),
        Err(err) => error_response(ApiType::Chat, &err),
    }
}

pub async fn list_models(State(state): State<AppState>, headers: HeaderMap) -> Response<Body> {
    let snapshot = state.engine.config().snapshot();
    if let AuthOutcome::Denied = authenticate(&snapshot, &headers, None) {
        return auth_error(ApiType::Chat);
    }
    let mut names: Vec<&str> = Vec::new();
    for (name, alias) in &snapshot.models {
        names.push(name.as_str());
        if let Some(extras) = &alias.additional_aliases {
            names.extend(extras.iter().map(String::as_str));
        }
    }
    names.sort_unstable();
    let data: Vec<serde_json::Value> = names
        .iter()
        .map(|id| json!({ "id": id, "object": "model", "created": 0, "owned_by": "plexus" }))
        .collect();
    json_response(200, json!({ "object": "list", "data": data }), None)
}

pub async fn healthz(State(state): State<AppState>) -> Response<Body> {
    let cooldowns = state.engine.cooldowns().snapshot().len();
    json_response(200, json!({ "status": "ok", "cooldowns": cooldowns }), None)
}

/// Shared JSON request path: authenticate, parse in the ingress dialect,
/// apply per-route fixups, dispatch, and assemble the response.
async fn dispatch_json(
    engine: &Engine,
    api_type: ApiType,
    headers: &HeaderMap,
    query_key: Option<&str>,
    body: Bytes,
    fixup: impl FnOnce(&mut plexus_transform::UnifiedRequest),
) -> Response<Body> {
    let snapshot = engine.config().snapshot();
    let api_key_name = match authenticate(&snapshot, headers, query_key) {
        AuthOutcome::Authorized(name) => name,
        AuthOutcome::Denied => return auth_error(api_type),
    };

    let mut ctx = request_context(api_type, headers);
    ctx.api_key_name = api_key_name;
    let request_id = ctx.id.clone();

    let mut unified = match engine.parse_request(api_type, &body) {
        Ok(unified) => unified,
        Err(err) => return error_response(api_type, &err),
    };
    fixup(&mut unified);
    unified.request_id = Some(request_id.clone());

    info!(
        event = "request_received",
        request_id = %request_id,
        api_type = %api_type,
        model = %unified.model,
        stream = unified.stream
    );

    match engine.dispatch(unified, ctx).await {
        Ok(DispatchOutcome::Unary { status, body, .. }) => {
            json_response(status, body, Some(&request_id))
        }
        Ok(DispatchOutcome::Binary {
            status,
            content_type,
            body,
        }) => binary_response(status, &content_type, body, &request_id),
        Ok(DispatchOutcome::Stream(handle)) => {
            let mut response =
                Response::new(Body::from_stream(ReceiverStream::new(handle.receiver)));
            *response.status_mut() = StatusCode::OK;
            set_header(&mut response, "content-type", handle.content_type);
            set_header(&mut response, "cache-control", "no-cache");
            set_request_id(&mut response, &request_id);
            response
        }
        Err(err) => error_response(api_type, &err),
    }
}

fn request_context(api_type: ApiType, headers: &HeaderMap) -> RequestContext {
    let mut ctx = RequestContext::new(api_type);
    ctx.client_ip = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|ip| ip.trim().to_string());
    match headers
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
    {
        Some(id) if !id.is_empty() => ctx.with_id(id),
        _ => ctx,
    }
}

fn json_response(
    status: u16,
    body: serde_json::Value,
    request_id: Option<&str>,
) -> Response<Body> {
    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
    set_header(&mut response, "content-type", "application/json");
    if let Some(id) = request_id {
        set_request_id(&mut response, id);
    }
    response
}

fn binary_response(
    status: u16,
    content_type: &str,
    body: Bytes,
    request_id: &str,
) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
    set_header(&mut response, "content-type", content_type);
    set_request_id(&mut response, request_id);
    response
}

fn set_request_id(response: &mut Response<Body>, id: &str) {
    set_header(response, "x-plexus-request-id", id);
}

fn set_header(response: &mut Response<Body>, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        response.headers_mut().insert(name, value);
    }
}
