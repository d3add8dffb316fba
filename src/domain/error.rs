//! Typed outcomes for calls against the cloud provider

use thiserror::Error;

/// Errors returned by every cloud port.
///
/// Provisioning treats `AlreadyExists` as an achieved desired state, teardown
/// treats `NotFound` the same way, `Transient` failures are retried and
/// `Fatal` ones abort the step that raised them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CloudError {
    /// A resource with the requested name already exists
    #[error("{resource} already exists")]
    AlreadyExists { resource: String },

    /// The addressed resource does not exist
    #[error("{resource} not found")]
    NotFound { resource: String },

    /// Throttling, timeouts, or a dependency that is not visible yet
    #[error("transient failure in {operation}: {message}")]
    Transient { operation: String, message: String },

    /// Permissions, quota, validation and anything else that will not heal
    #[error("{operation} failed: {message}")]
    Fatal { operation: String, message: String },
}

impl CloudError {
    pub fn already_exists(resource: impl Into<String>) -> Self {
        CloudError::AlreadyExists {
            resource: resource.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        CloudError::NotFound {
            resource: resource.into(),
        }
    }

    pub fn transient(operation: impl Into<String>, message: impl Into<String>) -> Self {
        CloudError::Transient {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn fatal(operation: impl Into<String>, message: impl Into<String>) -> Self {
        CloudError::Fatal {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, CloudError::AlreadyExists { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::NotFound { .. })
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, CloudError::Transient { .. })
    }

    /// Classify a provider error code into a cloud error.
    ///
    /// `resource` labels the addressed resource for the `AlreadyExists` and
    /// `NotFound` cases.
    pub fn from_code(operation: &str, resource: &str, code: &str, message: &str) -> Self {
        match code {
            "EntityAlreadyExists"
            | "BucketAlreadyOwnedByYou"
            | "ConflictException"
            | "ResourceConflictException"
            | "ResourceExistsException" => CloudError::already_exists(resource),

            "NoSuchEntity"
            | "NoSuchBucket"
            | "NoSuchKey"
            | "NotFound"
            | "ResourceNotFoundException" => CloudError::not_found(resource),

            "Throttling"
            | "ThrottlingException"
            | "TooManyRequestsException"
            | "RequestLimitExceeded"
            | "SlowDown"
            | "ServiceUnavailable"
            | "ServiceUnavailableException"
            | "ServiceFailure"
            | "InternalFailure"
            | "InternalServerException"
            | "InternalError" => CloudError::transient(operation, format!("{code}: {message}")),

            // Freshly created roles take a while before other services may assume them
            "InvalidParameterValueException" | "ValidationException"
                if message.contains("cannot be assumed") || message.contains("unable to assume") =>
            {
                CloudError::transient(operation, format!("{code}: {message}"))
            }

            _ => CloudError::fatal(operation, format!("{code}: {message}")),
        }
    }
}

/// Result type alias for cloud calls
pub type CloudResult<T> = Result<T, CloudError>;

/// Helpers for folding idempotency outcomes into success
pub trait CloudResultExt<T> {
    /// `AlreadyExists` becomes `Ok(None)`
    fn tolerate_existing(self) -> CloudResult<Option<T>>;

    /// `NotFound` becomes `Ok(None)`
    fn tolerate_missing(self) -> CloudResult<Option<T>>;
}

impl<T> CloudResultExt<T> for CloudResult<T> {
    fn tolerate_existing(self) -> CloudResult<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_already_exists() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn tolerate_missing(self) -> CloudResult<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classifies_idempotency_codes() {
        let err = CloudError::from_code("iam:CreateRole", "role r", "EntityAlreadyExists", "exists");
        assert!(err.is_already_exists());

        let err = CloudError::from_code("iam:DeleteRole", "role r", "NoSuchEntity", "gone");
        assert_eq!(err, CloudError::not_found("role r"));

        let err = CloudError::from_code("s3:CreateBucket", "bucket b", "BucketAlreadyOwnedByYou", "");
        assert!(err.is_already_exists());
    }

    #[test]
    fn test_bucket_owned_elsewhere_is_fatal() {
        let err = CloudError::from_code("s3:CreateBucket", "bucket b", "BucketAlreadyExists", "taken");
        assert!(matches!(err, CloudError::Fatal { .. }));
    }

    #[test]
    fn test_role_propagation_is_transient() {
        let err = CloudError::from_code(
            "lambda:CreateFunction",
            "function f",
            "InvalidParameterValueException",
            "The role defined for the function cannot be assumed by Lambda.",
        );
        assert!(err.is_transient());

        let err = CloudError::from_code(
            "lambda:CreateFunction",
            "function f",
            "InvalidParameterValueException",
            "Unzipped size must be smaller than 262144000 bytes",
        );
        assert!(matches!(err, CloudError::Fatal { .. }));
    }

    #[test]
    fn test_tolerate_helpers() {
        let existing: CloudResult<u8> = Err(CloudError::already_exists("x"));
        assert_eq!(existing.tolerate_existing(), Ok(None));

        let missing: CloudResult<u8> = Err(CloudError::not_found("x"));
        assert_eq!(missing.tolerate_missing(), Ok(None));

        let fatal: CloudResult<u8> = Err(CloudError::fatal("op", "boom"));
        assert!(fatal.tolerate_missing().is_err());

        let ok: CloudResult<u8> = Ok(3);
        assert_eq!(ok.tolerate_existing(), Ok(Some(3)));
    }
}
