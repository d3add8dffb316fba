//! REST API handlers for the chat UI
//!
//! Sessions live in memory until deleted or idle past the store's TTL. Each
//! turn holds the session lock while the agent answers, so a second question
//! on the same session is refused instead of queued.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::chat::{AgentInvoker, ChatError, ChatSession, SessionStore};
use crate::domain::chat::{SessionState, Turn};

/// Shared application state for chat handlers
#[derive(Clone)]
pub struct ChatApiState {
    pub sessions: SessionStore,
    /// `None` until an agent alias has been deployed
    pub invoker: Option<Arc<dyn AgentInvoker>>,
    pub title: String,
}

impl ChatApiState {
    pub fn new(invoker: Option<Arc<dyn AgentInvoker>>, title: impl Into<String>) -> Self {
        Self {
            sessions: SessionStore::new(),
            invoker,
            title: title.into(),
        }
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.sessions = SessionStore::with_ttl(ttl);
        self
    }
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// A failure that still carries data, such as the transcript with its error turn
    pub fn failure(data: T, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Some(data),
            error: Some(message.into()),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionDto {
    pub id: String,
    pub state: SessionState,
    pub transcript: Vec<Turn>,
}

impl From<&ChatSession> for SessionDto {
    fn from(session: &ChatSession) -> Self {
        Self {
            id: session.id().to_string(),
            state: session.state(),
            transcript: session.transcript().to_vec(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AskResponse {
    /// The assistant turn this question produced
    pub turn: Option<Turn>,
    pub session: SessionDto,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UiConfigDto {
    pub title: String,
    pub ready: bool,
}

fn status_for(error: &ChatError) -> StatusCode {
    match error {
        ChatError::EmptyQuestion => StatusCode::BAD_REQUEST,
        ChatError::Busy(_) => StatusCode::CONFLICT,
        ChatError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        ChatError::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
        ChatError::Invocation(_) | ChatError::MalformedResponse(_) => StatusCode::BAD_GATEWAY,
    }
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn get_ui_config(State(state): State<ChatApiState>) -> impl IntoResponse {
    let dto = UiConfigDto {
        title: state.title.clone(),
        ready: state.invoker.is_some(),
    };
    (StatusCode::OK, Json(ApiResponse::success(dto)))
}

pub async fn create_session(State(state): State<ChatApiState>) -> impl IntoResponse {
    let session = state.sessions.create().await;
    tracing::info!(session_id = %session.id(), "session created");
    (StatusCode::CREATED, Json(ApiResponse::success(SessionDto::from(&session))))
}

pub async fn get_session(State(state): State<ChatApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.sessions.get(&id).await {
        Some(session) => {
            let session = session.lock().await;
            (StatusCode::OK, Json(ApiResponse::success(SessionDto::from(&*session))))
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::<SessionDto>::error(ChatError::SessionNotFound(id).to_string())),
        ),
    }
}

pub async fn delete_session(
    State(state): State<ChatApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if state.sessions.remove(&id).await {
        tracing::info!(session_id = %id, "session deleted");
        StatusCode::NO_CONTENT.into_response()
    } else {
        let error = ChatError::SessionNotFound(id);
        (status_for(&error), Json(ApiResponse::<()>::error(error.to_string()))).into_response()
    }
}

pub async fn ask(
    State(state): State<ChatApiState>,
    Path(id): Path<String>,
    Json(request): Json<AskRequest>,
) -> impl IntoResponse {
    let Some(session) = state.sessions.get(&id).await else {
        let error = ChatError::SessionNotFound(id);
        return (status_for(&error), Json(ApiResponse::<AskResponse>::error(error.to_string())));
    };
    if request.question.trim().is_empty() {
        let error = ChatError::EmptyQuestion;
        return (status_for(&error), Json(ApiResponse::error(error.to_string())));
    }
    let Some(invoker) = state.invoker.clone() else {
        let error = ChatError::NotConfigured;
        return (status_for(&error), Json(ApiResponse::error(error.to_string())));
    };

    // One in-flight turn per session
    let Ok(mut session) = session.try_lock() else {
        let error = ChatError::Busy(id);
        return (status_for(&error), Json(ApiResponse::error(error.to_string())));
    };

    match session.ask(invoker.as_ref(), &request.question).await {
        Ok(turn) => {
            let response = AskResponse {
                turn: Some(turn),
                session: SessionDto::from(&*session),
            };
            (StatusCode::OK, Json(ApiResponse::success(response)))
        }
        Err(error) => {
            // The transcript now ends with a visible error turn
            let response = AskResponse {
                turn: session.transcript().last().cloned(),
                session: SessionDto::from(&*session),
            };
            (status_for(&error), Json(ApiResponse::failure(response, error.to_string())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(status_for(&ChatError::EmptyQuestion), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&ChatError::Busy("s".into())), StatusCode::CONFLICT);
        assert_eq!(status_for(&ChatError::SessionNotFound("s".into())), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&ChatError::NotConfigured), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_for(&ChatError::Invocation("x".into())), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_delete_session_handler() {
        let state = ChatApiState::new(None, "t");
        let id = state.sessions.create().await.id().to_string();

        let response = delete_session(State(state.clone()), Path(id.clone()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(state.sessions.get(&id).await.is_none());

        let response = delete_session(State(state), Path(id)).await.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_with_session_ttl() {
        let state = ChatApiState::new(None, "t").with_session_ttl(Duration::from_secs(5));
        assert_eq!(state.sessions.ttl(), Duration::from_secs(5));
    }

    #[test]
    fn test_api_response_omits_empty_fields() {
        let json = serde_json::to_value(ApiResponse::<()>::error("nope")).unwrap();
        assert_eq!(json, serde_json::json!({"success": false, "error": "nope"}));
    }
}
