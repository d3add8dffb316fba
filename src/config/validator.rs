use thiserror::Error;

use crate::config::{
    ChatSettings, ChunkingSettings, DeploymentSettings, ServerSettings, Settings, WaitSettings,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ValidationError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        ValidationError::InvalidValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Maximum callback execution time the function service allows
const MAX_CALLBACK_TIMEOUT_SECS: u32 = 900;

pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(settings: &Settings) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        Self::validate_server(&settings.server, &mut errors);
        Self::validate_deployment(&settings.deployment, &mut errors);
        Self::validate_chunking(&settings.chunking, &mut errors);
        Self::validate_wait(&settings.wait, &mut errors);
        Self::validate_chat(&settings.chat, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Everything `validate` checks plus the inputs only setup needs
    pub fn validate_for_setup(settings: &Settings) -> Result<(), Vec<ValidationError>> {
        let mut errors = match Self::validate(settings) {
            Ok(()) => Vec::new(),
            Err(errors) => errors,
        };

        if settings.vector_store.connection_string.trim().is_empty() {
            errors.push(ValidationError::MissingField(
                "vector_store.connection_string".to_string(),
            ));
        }
        if settings.vector_store.credentials_secret.trim().is_empty() {
            errors.push(ValidationError::MissingField(
                "vector_store.credentials_secret".to_string(),
            ));
        }
        if settings.vector_store.text_field.is_empty() {
            errors.push(ValidationError::MissingField("vector_store.text_field".to_string()));
        }
        if settings.vector_store.metadata_field.is_empty() {
            errors.push(ValidationError::MissingField(
                "vector_store.metadata_field".to_string(),
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_server(server: &ServerSettings, errors: &mut Vec<ValidationError>) {
        if server.host.is_empty() {
            errors.push(ValidationError::MissingField("server.host".to_string()));
        }

        if server.port == 0 {
            errors.push(ValidationError::invalid(
                "server.port",
                "Port must be greater than 0",
            ));
        }
    }

    fn validate_deployment(deployment: &DeploymentSettings, errors: &mut Vec<ValidationError>) {
        if deployment.base_name.trim().is_empty() {
            errors.push(ValidationError::MissingField("deployment.base_name".to_string()));
        } else if !deployment
            .base_name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            errors.push(ValidationError::invalid(
                "deployment.base_name",
                "Only lowercase letters, digits and '-' are allowed",
            ));
        }

        if deployment.policy_prefix.is_empty() {
            errors.push(ValidationError::MissingField(
                "deployment.policy_prefix".to_string(),
            ));
        }
        if deployment.foundation_model.is_empty() {
            errors.push(ValidationError::MissingField(
                "deployment.foundation_model".to_string(),
            ));
        }
        if deployment.embedding_model.is_empty() {
            errors.push(ValidationError::MissingField(
                "deployment.embedding_model".to_string(),
            ));
        }
        if deployment.instruction.trim().is_empty() {
            errors.push(ValidationError::MissingField("deployment.instruction".to_string()));
        }
        if deployment.alias_name.is_empty() {
            errors.push(ValidationError::MissingField("deployment.alias_name".to_string()));
        }
        if deployment.document_prefix.trim_matches('/').is_empty() {
            errors.push(ValidationError::MissingField(
                "deployment.document_prefix".to_string(),
            ));
        }

        if deployment.callback_timeout_secs == 0
            || deployment.callback_timeout_secs > MAX_CALLBACK_TIMEOUT_SECS
        {
            errors.push(ValidationError::invalid(
                "deployment.callback_timeout_secs",
                format!("Must be between 1 and {MAX_CALLBACK_TIMEOUT_SECS}"),
            ));
        }

        for (idx, url) in deployment.document_urls.iter().enumerate() {
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                errors.push(ValidationError::invalid(
                    &format!("deployment.document_urls[{idx}]"),
                    format!("'{url}' is not an http(s) URL"),
                ));
            }
        }
    }

    fn validate_chunking(chunking: &ChunkingSettings, errors: &mut Vec<ValidationError>) {
        if chunking.max_tokens == 0 {
            errors.push(ValidationError::invalid(
                "chunking.max_tokens",
                "Must be greater than 0",
            ));
        }
        if !(1..=99).contains(&chunking.overlap_percentage) {
            errors.push(ValidationError::invalid(
                "chunking.overlap_percentage",
                "Must be between 1 and 99",
            ));
        }
    }

    fn validate_wait(wait: &WaitSettings, errors: &mut Vec<ValidationError>) {
        for (field, value) in [
            ("wait.poll_interval_ms", wait.poll_interval_ms),
            ("wait.resource_timeout_secs", wait.resource_timeout_secs),
            ("wait.prepare_timeout_secs", wait.prepare_timeout_secs),
        ] {
            if value == 0 {
                errors.push(ValidationError::invalid(field, "Must be greater than 0"));
            }
        }
    }

    fn validate_chat(chat: &ChatSettings, errors: &mut Vec<ValidationError>) {
        if chat.session_ttl_secs == 0 {
            errors.push(ValidationError::invalid(
                "chat.session_ttl_secs",
                "Must be greater than 0",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(ConfigValidator::validate(&Settings::default()).is_ok());
    }

    #[test]
    fn test_collects_every_error() {
        let mut settings = Settings::default();
        settings.server.port = 0;
        settings.deployment.base_name = String::new();
        settings.chunking.overlap_percentage = 100;
        settings.wait.poll_interval_ms = 0;
        settings.deployment.callback_timeout_secs = 901;

        let errors = ConfigValidator::validate(&settings).unwrap_err();
        assert_eq!(errors.len(), 5);
        assert!(errors.contains(&ValidationError::MissingField(
            "deployment.base_name".to_string()
        )));
    }

    #[test]
    fn test_base_name_must_be_bucket_safe() {
        let mut settings = Settings::default();
        settings.deployment.base_name = "Virtual_Assistant".to_string();
        let errors = ConfigValidator::validate(&settings).unwrap_err();
        assert!(matches!(
            &errors[0],
            ValidationError::InvalidValue { field, .. } if field == "deployment.base_name"
        ));
    }

    #[test]
    fn test_setup_requires_vector_store() {
        let settings = Settings::default();
        let errors = ConfigValidator::validate_for_setup(&settings).unwrap_err();
        assert_eq!(errors.len(), 2);

        let mut settings = Settings::default();
        settings.vector_store.connection_string = "https://index.svc.pinecone.io".to_string();
        settings.vector_store.credentials_secret = "pinekey".to_string();
        assert!(ConfigValidator::validate_for_setup(&settings).is_ok());
    }

    #[test]
    fn test_document_urls_must_be_http() {
        let mut settings = Settings::default();
        settings.deployment.document_urls = vec!["ftp://example.com/guide.pdf".to_string()];
        assert!(ConfigValidator::validate(&settings).is_err());
    }

    #[test]
    fn test_session_ttl_must_be_positive() {
        let mut settings = Settings::default();
        settings.chat.session_ttl_secs = 0;
        let errors = ConfigValidator::validate(&settings).unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::invalid("chat.session_ttl_secs", "Must be greater than 0")]
        );
    }
}
