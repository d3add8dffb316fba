//! # Virtual Assistant
//!
//! Provisions a managed support agent backed by a vector knowledge base,
//! serves a chat front end for it, and tears everything down again.
//!
//! ## Features
//!
//! - **Setup**: bucket, documents, knowledge base, data source, IAM roles,
//!   callback function, action group, prepared agent and alias, all
//!   idempotent across runs
//! - **Teardown**: reverse-order deletion that tolerates partial state
//! - **Chat**: per-session transcripts over a small REST API with an
//!   embedded single-page UI
//! - **Callback**: the password-reset action as a Lambda binary
//!
//! ## Architecture
//!
//! - **Domain**: naming, IAM documents, resource types and the cloud ports
//! - **Adapters**: AWS SDK and in-memory implementations of the ports, HTTP handlers
//! - **Provisioning**: setup and teardown sequencing
//! - **Chat**: sessions, invocation and rendering
//! - **Config**: configuration management

pub mod adapters;
pub mod callback;
pub mod chat;
pub mod cli;
pub mod config;
pub mod domain;
pub mod provisioning;

use crate::adapters::chat_handler::{self, ChatApiState};
use crate::adapters::health_handler::HealthHandler;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Creates the Axum application router with all endpoints configured.
///
/// # Arguments
///
/// * `chat_state` - Session store and the agent invoker, if one is deployed
/// * `health_handler` - Health check handler
pub fn create_app(chat_state: ChatApiState, health_handler: Arc<HealthHandler>) -> Router {
    let health_router = Router::new()
        .route("/health", get({
            let handler = health_handler.clone();
            move || {
                let h = handler.clone();
                async move { h.health().await }
            }
        }))
        .route("/health/ready", get({
            let handler = health_handler.clone();
            move || {
                let h = handler.clone();
                async move { h.ready().await }
            }
        }))
        .route("/health/live", get({
            let handler = health_handler.clone();
            move || {
                let h = handler.clone();
                async move { h.live().await }
            }
        }));

    let api_router = Router::new()
        .route("/config", get(chat_handler::get_ui_config))
        .route("/sessions", post(chat_handler::create_session))
        .route(
            "/sessions/:id",
            get(chat_handler::get_session).delete(chat_handler::delete_session),
        )
        .route("/sessions/:id/messages", post(chat_handler::ask))
        .with_state(chat_state);

    health_router
        .nest("/api", api_router)
        // UI endpoint (catch-all for the single page)
        .fallback(crate::adapters::ui_handler::UIHandler::serve)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}
