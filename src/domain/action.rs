//! Envelope exchanged between the agent runtime and the callback function

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;

pub const MESSAGE_VERSION: &str = "1.0";

/// Request the agent runtime sends when it decides to call an action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionInvocation {
    pub action_group: String,
    pub api_path: String,
    pub http_method: String,
    #[serde(default)]
    pub session_attributes: HashMap<String, String>,
    #[serde(default)]
    pub prompt_session_attributes: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResponseEnvelope {
    pub message_version: String,
    pub response: ActionResponse,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResponse {
    pub action_group: String,
    pub api_path: String,
    pub http_method: String,
    pub http_status_code: u16,
    /// Keyed by content type; always `application/json` here
    pub response_body: serde_json::Value,
}

impl ActionResponseEnvelope {
    /// Wrap a response body for the invocation being answered
    pub fn reply(invocation: &ActionInvocation, status: u16, body: impl Into<String>) -> Self {
        Self {
            message_version: MESSAGE_VERSION.to_string(),
            response: ActionResponse {
                action_group: invocation.action_group.clone(),
                api_path: invocation.api_path.clone(),
                http_method: invocation.http_method.clone(),
                http_status_code: status,
                response_body: json!({ "application/json": { "body": body.into() } }),
            },
        }
    }

    pub fn body(&self) -> Option<&str> {
        self.response.response_body["application/json"]["body"].as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_defaults_missing_attributes() {
        let invocation: ActionInvocation = serde_json::from_value(json!({
            "actionGroup": "PasswordResetActionGroup",
            "apiPath": "/reset",
            "httpMethod": "POST"
        }))
        .unwrap();
        assert!(invocation.session_attributes.is_empty());
        assert!(invocation.prompt_session_attributes.is_empty());
    }

    #[test]
    fn test_envelope_shape() {
        let invocation: ActionInvocation = serde_json::from_value(json!({
            "actionGroup": "G",
            "apiPath": "/reset",
            "httpMethod": "POST",
            "sessionAttributes": {},
            "promptSessionAttributes": {}
        }))
        .unwrap();
        let envelope = ActionResponseEnvelope::reply(&invocation, 200, "done");
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["messageVersion"], "1.0");
        assert_eq!(value["response"]["httpStatusCode"], 200);
        assert_eq!(value["response"]["actionGroup"], "G");
        assert_eq!(value["response"]["responseBody"]["application/json"]["body"], "done");
        assert_eq!(envelope.body(), Some("done"));
    }
}
