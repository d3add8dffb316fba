//! Error types for setup runs

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::domain::error::CloudError;

/// Errors that abort a setup run
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// A provider call failed; `step` names what setup was doing
    #[error("{step}: {source}")]
    Step {
        step: String,
        #[source]
        source: CloudError,
    },

    /// The agent did not compile into an invocable version
    #[error("agent {agent_id} failed to prepare")]
    PreparationFailed { agent_id: String },

    /// A resource never reached its usable status
    #[error("timed out after {}s waiting for {what}", waited.as_secs())]
    Timeout { what: String, waited: Duration },

    /// A resource entered a failed terminal status
    #[error("{what} entered status {status}")]
    ResourceFailed { what: String, status: String },

    /// A resource a previous setup run should have created is missing
    #[error("{0} is not deployed")]
    NotDeployed(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot download {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type ProvisionResult<T> = Result<T, ProvisionError>;

/// Attach the step name to a cloud failure
pub trait StepContext<T> {
    fn step(self, step: impl Into<String>) -> ProvisionResult<T>;
}

impl<T> StepContext<T> for Result<T, CloudError> {
    fn step(self, step: impl Into<String>) -> ProvisionResult<T> {
        self.map_err(|source| ProvisionError::Step {
            step: step.into(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_context_names_the_step() {
        let result: Result<(), CloudError> = Err(CloudError::fatal("iam:CreateRole", "AccessDenied"));
        let err = result.step("create agent role").unwrap_err();
        assert_eq!(
            err.to_string(),
            "create agent role: iam:CreateRole failed: AccessDenied"
        );
    }

    #[test]
    fn test_timeout_message() {
        let err = ProvisionError::Timeout {
            what: "knowledge base KB1".to_string(),
            waited: Duration::from_secs(300),
        };
        assert_eq!(err.to_string(), "timed out after 300s waiting for knowledge base KB1");
    }
}
