use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub checks: HealthChecks,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthChecks {
    pub config: String,
    pub agent: String,
}

pub struct HealthHandler {
    agent_resolved: bool,
    start_time: std::time::Instant,
}

impl HealthHandler {
    pub fn new(agent_resolved: bool) -> Self {
        Self {
            agent_resolved,
            start_time: std::time::Instant::now(),
        }
    }

    fn agent_check(&self) -> &'static str {
        if self.agent_resolved {
            "resolved"
        } else {
            "unresolved"
        }
    }

    /// Basic health check - returns 200 if server is running
    pub async fn health(&self) -> impl IntoResponse {
        let uptime = self.start_time.elapsed().as_secs();
        let status = HealthStatus {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: uptime,
            checks: HealthChecks {
                config: "ok".to_string(),
                agent: self.agent_check().to_string(),
            },
        };

        (StatusCode::OK, Json(status))
    }

    /// Readiness check - returns 200 once an agent alias is known to chat with
    pub async fn ready(&self) -> impl IntoResponse {
        if self.agent_resolved {
            (StatusCode::OK, Json(serde_json::json!({
                "status": "ready",
                "message": "Server is ready to accept questions"
            })))
        } else {
            (StatusCode::SERVICE_UNAVAILABLE, Json(serde_json::json!({
                "status": "not_ready",
                "message": "No agent alias is deployed or configured"
            })))
        }
    }

    /// Liveness check - returns 200 if server is alive
    pub async fn live(&self) -> impl IntoResponse {
        (StatusCode::OK, Json(serde_json::json!({
            "status": "alive",
            "message": "Server is alive"
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_endpoint() {
        let handler = HealthHandler::new(false);

        let response = handler.health().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ready_requires_agent() {
        let handler = HealthHandler::new(false);
        let response = handler.ready().await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let handler = HealthHandler::new(true);
        let response = handler.ready().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_live_endpoint() {
        let handler = HealthHandler::new(true);

        let response = handler.live().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
