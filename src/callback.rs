//! Password-reset action invoked by the agent runtime
//!
//! Stateless: every invocation is answered from its envelope alone, so the
//! function can serve any number of sessions concurrently.

use rand::rngs::OsRng;
use rand::Rng;
use serde_json::{json, Value};
use tracing::info;

use crate::domain::action::{ActionInvocation, ActionResponseEnvelope};

pub const RESET_PATH: &str = "/reset";
pub const PASSWORD_LENGTH: usize = 8;
pub const ACTION_GROUP_NAME: &str = "PasswordResetActionGroup";
pub const ACTION_GROUP_DESCRIPTION: &str = "Actions for password reset";

/// ASCII letters, digits and punctuation
const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";

/// Answer one invocation using the operating system's random source
pub fn handle(invocation: &ActionInvocation) -> ActionResponseEnvelope {
    handle_with(invocation, &mut OsRng)
}

/// Answer one invocation, drawing the password from `rng`
pub fn handle_with<R: Rng + ?Sized>(invocation: &ActionInvocation, rng: &mut R) -> ActionResponseEnvelope {
    info!(
        action_group = %invocation.action_group,
        api_path = %invocation.api_path,
        http_method = %invocation.http_method,
        "action invoked"
    );

    if invocation.api_path == RESET_PATH {
        let password = generate_password(rng);
        ActionResponseEnvelope::reply(
            invocation,
            200,
            format!("Password reset successfully. Temp password is: {password}"),
        )
    } else {
        ActionResponseEnvelope::reply(
            invocation,
            404,
            format!(
                "Unrecognized api path: {}::{}",
                invocation.action_group, invocation.api_path
            ),
        )
    }
}

pub fn generate_password<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..PASSWORD_LENGTH)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

/// OpenAPI document the action group is registered with
pub fn api_schema() -> Value {
    json!({
        "openapi": "3.0.0",
        "info": {
            "title": "Password Reset API",
            "version": "1.0.0",
            "description": "API for resetting a user's password"
        },
        "paths": {
            RESET_PATH: {
                "post": {
                    "summary": "Reset a user's password",
                    "description": "Reset the password of the user identified by email, name and ID and return a temporary password",
                    "operationId": "resetPassword",
                    "requestBody": {
                        "required": true,
                        "content": {
                            "application/json": {
                                "schema": {
                                    "type": "object",
                                    "properties": {
                                        "email": { "type": "string", "description": "Email address of the user" },
                                        "name": { "type": "string", "description": "Full name of the user" },
                                        "id": { "type": "string", "description": "ID of the user" }
                                    },
                                    "required": ["email", "name", "id"]
                                }
                            }
                        }
                    },
                    "responses": {
                        "200": {
                            "description": "Password reset with a temporary password",
                            "content": {
                                "application/json": {
                                    "schema": {
                                        "type": "object",
                                        "properties": {
                                            "body": { "type": "string", "description": "Confirmation including the temporary password" }
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;

    fn invocation(api_path: &str) -> ActionInvocation {
        ActionInvocation {
            action_group: ACTION_GROUP_NAME.to_string(),
            api_path: api_path.to_string(),
            http_method: "POST".to_string(),
            session_attributes: HashMap::new(),
            prompt_session_attributes: HashMap::new(),
            session_id: None,
            input_text: None,
        }
    }

    #[test]
    fn test_reset_returns_eight_char_password() {
        let mut rng = StdRng::seed_from_u64(7);
        let envelope = handle_with(&invocation(RESET_PATH), &mut rng);
        assert_eq!(envelope.message_version, "1.0");
        assert_eq!(envelope.response.http_status_code, 200);

        let body = envelope.body().unwrap();
        let password = body
            .strip_prefix("Password reset successfully. Temp password is: ")
            .unwrap();
        assert_eq!(password.chars().count(), PASSWORD_LENGTH);
        assert!(password
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c.is_ascii_punctuation()));
    }

    #[test]
    fn test_generated_passwords_stay_in_charset() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let password = generate_password(&mut rng);
            assert_eq!(password.len(), PASSWORD_LENGTH);
            assert!(password.bytes().all(|b| CHARSET.contains(&b)));
        }
    }

    #[test]
    fn test_seeded_rng_is_deterministic() {
        let first = generate_password(&mut StdRng::seed_from_u64(1));
        let second = generate_password(&mut StdRng::seed_from_u64(1));
        assert_eq!(first, second);
    }

    #[test]
    fn test_unknown_path_is_not_found() {
        let envelope = handle(&invocation("/unlock"));
        assert_eq!(envelope.response.http_status_code, 404);
        assert_eq!(envelope.response.api_path, "/unlock");
        let body = envelope.body().unwrap();
        assert!(body.contains("/unlock"));
        assert!(body.contains(ACTION_GROUP_NAME));
    }

    #[test]
    fn test_charset_is_letters_digits_punctuation() {
        assert_eq!(CHARSET.len(), 26 * 2 + 10 + 32);
        assert!(CHARSET.iter().all(|b| b.is_ascii_alphanumeric() || b.is_ascii_punctuation()));
    }

    #[test]
    fn test_api_schema_has_single_reset_operation() {
        let schema = api_schema();
        let paths = schema["paths"].as_object().unwrap();
        assert_eq!(paths.len(), 1);
        assert!(schema["paths"][RESET_PATH]["post"].is_object());
    }
}
