//! Session-scoped agent invocation
//!
//! The wire shapes mirror the invocation contract the front end has always
//! used: a request carrying `endSession` as the string `"true"` or `"false"`,
//! and a response whose `body` is itself a JSON document holding the answer
//! and the trace.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::config::ChatSettings;
use crate::domain::error::{CloudError, CloudResult};
use crate::domain::ports::{AgentControlPort, AgentRuntimePort};
use crate::domain::resources::{AgentTarget, TEST_ALIAS_ID};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInvocationRequest {
    pub session_id: String,
    pub question: String,
    pub end_session: String,
}

impl AgentInvocationRequest {
    pub fn new(session_id: impl Into<String>, question: impl Into<String>, end_session: bool) -> Self {
        Self {
            session_id: session_id.into(),
            question: question.into(),
            end_session: end_session.to_string(),
        }
    }

    pub fn ends_session(&self) -> bool {
        self.end_session.eq_ignore_ascii_case("true")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInvocationResponse {
    /// JSON encoding of [`AgentAnswer`]
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentAnswer {
    pub response: String,
    pub trace_data: String,
}

#[async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn invoke(&self, request: &AgentInvocationRequest) -> CloudResult<AgentInvocationResponse>;
}

/// Invokes one published agent alias through the runtime port
pub struct BedrockAgentInvoker {
    runtime: Arc<dyn AgentRuntimePort>,
    target: AgentTarget,
}

impl BedrockAgentInvoker {
    pub fn new(runtime: Arc<dyn AgentRuntimePort>, target: AgentTarget) -> Self {
        Self { runtime, target }
    }

    pub fn target(&self) -> &AgentTarget {
        &self.target
    }
}

#[async_trait]
impl AgentInvoker for BedrockAgentInvoker {
    async fn invoke(&self, request: &AgentInvocationRequest) -> CloudResult<AgentInvocationResponse> {
        debug!(session_id = %request.session_id, "invoking agent");
        let completion = self
            .runtime
            .invoke_agent(
                &self.target,
                &request.session_id,
                &request.question,
                request.ends_session(),
            )
            .await?;

        let answer = AgentAnswer {
            response: completion.text,
            trace_data: completion.trace.join("\n"),
        };
        let body = serde_json::to_string(&answer)
            .map_err(|e| CloudError::fatal("encode agent answer", e.to_string()))?;
        Ok(AgentInvocationResponse { body })
    }
}

/// Resolve the agent and alias to chat with.
///
/// Configured ids win; otherwise the agent is looked up by name and the alias
/// by `alias_name`. `Ok(None)` means nothing is deployed yet.
pub async fn resolve_target(
    agents: &dyn AgentControlPort,
    chat: &ChatSettings,
    agent_name: &str,
    alias_name: &str,
) -> CloudResult<Option<AgentTarget>> {
    let agent_id = match &chat.agent_id {
        Some(id) => id.clone(),
        None => match agents.find_agent(agent_name).await? {
            Some(id) => id,
            None => return Ok(None),
        },
    };

    let agent_alias_id = match &chat.agent_alias_id {
        Some(id) => id.clone(),
        None => {
            let found = agents
                .list_aliases(&agent_id)
                .await?
                .into_iter()
                .find(|alias| alias.id != TEST_ALIAS_ID && alias.name == alias_name);
            match found {
                Some(alias) => alias.id,
                None => return Ok(None),
            }
        }
    };

    Ok(Some(AgentTarget {
        agent_id,
        agent_alias_id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::in_memory_cloud::InMemoryCloud;
    use crate::domain::resources::AgentCompletion;

    #[test]
    fn test_request_wire_shape() {
        let request = AgentInvocationRequest::new("s-1", "hello", false);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"sessionId": "s-1", "question": "hello", "endSession": "false"})
        );
        assert!(!request.ends_session());
        assert!(AgentInvocationRequest::new("s-1", "bye", true).ends_session());
    }

    #[tokio::test]
    async fn test_response_body_carries_answer_and_trace() {
        let cloud = Arc::new(InMemoryCloud::new("us-east-1", "123456789012"));
        let target = cloud.seed_agent("virtual-assistant-agent", "latest").await;
        cloud
            .reply_with(AgentCompletion {
                text: "Hi there".to_string(),
                trace: vec!["step one".to_string(), "step two".to_string()],
            })
            .await;

        let invoker = BedrockAgentInvoker::new(cloud, target);
        let response = invoker
            .invoke(&AgentInvocationRequest::new("s-1", "hello", false))
            .await
            .unwrap();
        let answer: AgentAnswer = serde_json::from_str(&response.body).unwrap();
        assert_eq!(answer.response, "Hi there");
        assert_eq!(answer.trace_data, "step one\nstep two");
    }

    #[tokio::test]
    async fn test_resolve_target_by_name() {
        let cloud = InMemoryCloud::new("us-east-1", "123456789012");
        let seeded = cloud.seed_agent("virtual-assistant-agent", "latest").await;

        let target = resolve_target(&cloud, &ChatSettings::default(), "virtual-assistant-agent", "latest")
            .await
            .unwrap();
        assert_eq!(target, Some(seeded));

        let missing = resolve_target(&cloud, &ChatSettings::default(), "other-agent", "latest")
            .await
            .unwrap();
        assert_eq!(missing, None);
    }

    #[tokio::test]
    async fn test_configured_ids_win() {
        let cloud = InMemoryCloud::new("us-east-1", "123456789012");
        let chat = ChatSettings {
            agent_id: Some("AGENT1".to_string()),
            agent_alias_id: Some("ALIAS1".to_string()),
            ..ChatSettings::default()
        };
        let target = resolve_target(&cloud, &chat, "unused", "latest").await.unwrap();
        assert_eq!(
            target,
            Some(AgentTarget {
                agent_id: "AGENT1".to_string(),
                agent_alias_id: "ALIAS1".to_string(),
            })
        );
        assert!(cloud.calls().await.is_empty());
    }
}
