use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Notify;
use tower::util::ServiceExt;

use virtual_assistant::adapters::chat_handler::ChatApiState;
use virtual_assistant::adapters::health_handler::HealthHandler;
use virtual_assistant::adapters::in_memory_cloud::InMemoryCloud;
use virtual_assistant::chat::invoker::{AgentInvocationRequest, AgentInvocationResponse};
use virtual_assistant::chat::{AgentInvoker, BedrockAgentInvoker};
use virtual_assistant::domain::error::{CloudError, CloudResult};
use virtual_assistant::domain::resources::AgentCompletion;

async fn deployed_cloud() -> (Arc<InMemoryCloud>, Arc<dyn AgentInvoker>) {
    let cloud = Arc::new(InMemoryCloud::new("us-east-1", "123456789012"));
    let target = cloud.seed_agent("virtual-assistant-agent", "latest").await;
    let invoker: Arc<dyn AgentInvoker> = Arc::new(BedrockAgentInvoker::new(cloud.clone(), target));
    (cloud, invoker)
}

fn app(invoker: Option<Arc<dyn AgentInvoker>>) -> Router {
    let ready = invoker.is_some();
    virtual_assistant::create_app(
        ChatApiState::new(invoker, "Campus Help Desk"),
        Arc::new(HealthHandler::new(ready)),
    )
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().uri(uri).method(method);
    let body = match body {
        Some(body) => {
            request = request.header("Content-Type", "application/json");
            Body::from(body.to_string())
        }
        None => Body::empty(),
    };

    let response = app.clone().oneshot(request.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn new_session(app: &Router) -> String {
    let (status, body) = send(app, "POST", "/api/sessions", None).await;
    assert_eq!(status, StatusCode::CREATED);
    body["data"]["id"].as_str().unwrap().to_string()
}

async fn ask(app: &Router, session: &str, question: &str) -> (StatusCode, Value) {
    send(
        app,
        "POST",
        &format!("/api/sessions/{session}/messages"),
        Some(json!({ "question": question })),
    )
    .await
}

#[tokio::test]
async fn test_two_questions_make_four_ordered_turns() {
    let (_cloud, invoker) = deployed_cloud().await;
    let app = app(Some(invoker));
    let session = new_session(&app).await;

    let (status, _) = ask(&app, &session, "hello").await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = ask(&app, &session, "reset my password").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["turn"]["content"], "You asked: reset my password");

    let (status, body) = send(&app, "GET", &format!("/api/sessions/{session}"), None).await;
    assert_eq!(status, StatusCode::OK);
    let transcript = body["data"]["transcript"].as_array().unwrap();
    let roles: Vec<&str> = transcript.iter().map(|t| t["role"].as_str().unwrap()).collect();
    assert_eq!(roles, vec!["user", "assistant", "user", "assistant"]);
    assert_eq!(transcript[0]["content"], "hello");
    assert_eq!(transcript[1]["content"], "You asked: hello");
    assert_eq!(transcript[2]["content"], "reset my password");
    assert_eq!(transcript[3]["trace"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"]["state"], "awaiting_input");
}

#[tokio::test]
async fn test_tabular_answer_is_rendered_as_table() {
    let (cloud, invoker) = deployed_cloud().await;
    cloud
        .reply_with(AgentCompletion {
            text: r#"[{"course":"Math","grade":"A"},{"course":"Art","grade":"B"}]"#.to_string(),
            trace: Vec::new(),
        })
        .await;
    let app = app(Some(invoker));
    let session = new_session(&app).await;

    let (status, body) = ask(&app, &session, "show my grades").await;

    assert_eq!(status, StatusCode::OK);
    let rendered = &body["data"]["turn"]["rendered"];
    assert_eq!(rendered["kind"], "table");
    assert_eq!(rendered["rows"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_failed_invocation_leaves_error_turn() {
    let (cloud, invoker) = deployed_cloud().await;
    cloud
        .fail_invocations(CloudError::fatal("bedrock:InvokeAgent", "AccessDenied"))
        .await;
    let app = app(Some(invoker));
    let session = new_session(&app).await;

    let (status, body) = ask(&app, &session, "hello").await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["success"], false);
    let transcript = body["data"]["session"]["transcript"].as_array().unwrap();
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[1]["role"], "assistant");
    assert_eq!(transcript[1]["is_error"], true);

    // The session stays usable
    let (_, body) = send(&app, "GET", &format!("/api/sessions/{session}"), None).await;
    assert_eq!(body["data"]["state"], "awaiting_input");
}

#[tokio::test]
async fn test_rejected_requests() {
    let (_cloud, invoker) = deployed_cloud().await;
    let app = app(Some(invoker));
    let session = new_session(&app).await;

    let (status, _) = ask(&app, "missing", "hello").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = ask(&app, &session, "   ").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "GET", "/api/sessions/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = send(&app, "GET", &format!("/api/sessions/{session}"), None).await;
    assert!(body["data"]["transcript"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_deleted_session_is_gone() {
    let (_cloud, invoker) = deployed_cloud().await;
    let app = app(Some(invoker));
    let session = new_session(&app).await;
    let (status, _) = ask(&app, &session, "hello").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, "DELETE", &format!("/api/sessions/{session}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);

    let (status, _) = send(&app, "GET", &format!("/api/sessions/{session}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = ask(&app, &session, "again").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, body) = send(&app, "DELETE", &format!("/api/sessions/{session}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_undeployed_assistant() {
    let app = app(None);
    let session = new_session(&app).await;

    let (status, body) = send(&app, "GET", "/api/config", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["title"], "Campus Help Desk");
    assert_eq!(body["data"]["ready"], false);

    let (status, _) = ask(&app, &session, "hello").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let (status, _) = send(&app, "GET", "/health/ready", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let (status, _) = send(&app, "GET", "/health/live", None).await;
    assert_eq!(status, StatusCode::OK);
}

/// Holds every invocation until released
struct GatedInvoker {
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl AgentInvoker for GatedInvoker {
    async fn invoke(&self, _request: &AgentInvocationRequest) -> CloudResult<AgentInvocationResponse> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(AgentInvocationResponse {
            body: json!({ "response": "done", "trace_data": "" }).to_string(),
        })
    }
}

#[tokio::test]
async fn test_second_question_while_busy_is_refused() {
    let invoker = Arc::new(GatedInvoker {
        entered: Notify::new(),
        release: Notify::new(),
    });
    let app = app(Some(invoker.clone() as Arc<dyn AgentInvoker>));
    let session = new_session(&app).await;

    let first = tokio::spawn({
        let app = app.clone();
        let session = session.clone();
        async move { ask(&app, &session, "first").await }
    });
    invoker.entered.notified().await;

    let (status, _) = ask(&app, &session, "second").await;
    assert_eq!(status, StatusCode::CONFLICT);

    invoker.release.notify_one();
    let (status, body) = first.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["session"]["transcript"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_ui_is_served_for_unknown_paths() {
    let app = app(None);

    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/html"));
}
