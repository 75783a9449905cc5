//! HTTP ingress: the compatibility endpoints, key auth, and dialect-true
//! error envelopes over the engine.

mod auth;
mod error;
mod handlers;
mod multipart;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use plexus_core::Engine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

/// All public routes. Paths are bit-exact with the upstream ecosystems so
/// existing SDKs can point at plexus unchanged.
pub fn build_router(engine: Arc<Engine>) -> Router {
    let state = AppState { engine };
    Router::new()
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/messages", post(handlers::messages))
        .route("/v1/responses", post(handlers::responses))
        .route("/v1beta/models/{model_action}", post(handlers::gemini))
        .route("/v1/embeddings", post(handlers::embeddings))
        .route("/v1/images/generations", post(handlers::images))
        .route("/v1/audio/speech", post(handlers::speech))
        .route("/v1/audio/transcriptions", post(handlers::transcriptions))
        .route("/v1/models", get(handlers::list_models))
        .route("/healthz", get(handlers::healthz))
        .with_state(state)
}
