//! Cloud ports backed by the official AWS SDK crates

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_smithy_runtime_api::client::result::SdkError;
use aws_smithy_types::error::display::DisplayErrorContext;
use aws_smithy_types::error::metadata::ProvideErrorMetadata;
use std::sync::Arc;
use tracing::debug;

use crate::domain::error::{CloudError, CloudResult};
use crate::domain::policy::PolicyDocument;
use crate::domain::ports::{CloudClients, IdentityPort, SecretsPort};
use crate::domain::resources::CallerIdentity;

mod bedrock;
mod iam;
mod lambda;
mod runtime;
mod s3;

/// One SDK client per service, all sharing a single `SdkConfig`
#[derive(Clone)]
pub struct AwsCloud {
    region: String,
    s3: aws_sdk_s3::Client,
    iam: aws_sdk_iam::Client,
    sts: aws_sdk_sts::Client,
    lambda: aws_sdk_lambda::Client,
    secrets: aws_sdk_secretsmanager::Client,
    agent: aws_sdk_bedrockagent::Client,
    agent_runtime: aws_sdk_bedrockagentruntime::Client,
}

impl AwsCloud {
    /// Load credentials from the default provider chain
    pub async fn load(region: Option<&str>) -> CloudResult<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region.to_string()));
        }
        let sdk_config = loader.load().await;
        Self::from_sdk_config(&sdk_config)
    }

    pub fn from_sdk_config(sdk_config: &aws_config::SdkConfig) -> CloudResult<Self> {
        let region = sdk_config
            .region()
            .map(|r| r.to_string())
            .ok_or_else(|| CloudError::fatal("load configuration", "no region configured"))?;
        debug!(region = %region, "AWS clients configured");

        Ok(Self {
            region,
            s3: aws_sdk_s3::Client::new(sdk_config),
            iam: aws_sdk_iam::Client::new(sdk_config),
            sts: aws_sdk_sts::Client::new(sdk_config),
            lambda: aws_sdk_lambda::Client::new(sdk_config),
            secrets: aws_sdk_secretsmanager::Client::new(sdk_config),
            agent: aws_sdk_bedrockagent::Client::new(sdk_config),
            agent_runtime: aws_sdk_bedrockagentruntime::Client::new(sdk_config),
        })
    }

    pub fn into_clients(self) -> CloudClients {
        CloudClients::from_shared(Arc::new(self))
    }
}

/// Classify an SDK failure by its service error code
pub(crate) fn classify<E, R>(operation: &str, resource: &str, err: SdkError<E, R>) -> CloudError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug + 'static,
{
    match &err {
        SdkError::ServiceError(context) => {
            let service_err = context.err();
            let code = service_err.code().unwrap_or("Unknown");
            let message = service_err.message().unwrap_or_default();
            CloudError::from_code(operation, resource, code, message)
        }
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => {
            CloudError::transient(operation, DisplayErrorContext(&err).to_string())
        }
        _ => CloudError::fatal(operation, DisplayErrorContext(&err).to_string()),
    }
}

/// Failure to assemble a request before it is sent
pub(crate) fn build_error(operation: &str, err: impl std::fmt::Display) -> CloudError {
    CloudError::fatal(operation, format!("invalid request: {err}"))
}

/// Normalizes SDK accessors that return either `&T` or `Option<&T>`
pub(crate) trait Present<'a, T: ?Sized> {
    fn present(self) -> Option<&'a T>;
}

impl<'a, T: ?Sized> Present<'a, T> for &'a T {
    fn present(self) -> Option<&'a T> {
        Some(self)
    }
}

impl<'a, T: ?Sized> Present<'a, T> for Option<&'a T> {
    fn present(self) -> Option<&'a T> {
        self
    }
}

/// A field the provider must return on success
pub(crate) fn required<'a, T: ?Sized>(
    value: impl Present<'a, T>,
    operation: &str,
    field: &str,
) -> CloudResult<&'a T> {
    value
        .present()
        .ok_or_else(|| CloudError::fatal(operation, format!("response is missing {field}")))
}

#[async_trait]
impl IdentityPort for AwsCloud {
    async fn caller_identity(&self) -> CloudResult<CallerIdentity> {
        const OP: &str = "sts:GetCallerIdentity";
        let output = self
            .sts
            .get_caller_identity()
            .send()
            .await
            .map_err(|e| classify(OP, "caller identity", e))?;

        let account_id = required(output.account(), OP, "account")?;
        Ok(CallerIdentity {
            account_id: account_id.to_string(),
            region: self.region.clone(),
        })
    }
}

#[async_trait]
impl SecretsPort for AwsCloud {
    async fn put_resource_policy(&self, secret_arn: &str, policy: &PolicyDocument) -> CloudResult<()> {
        const OP: &str = "secretsmanager:PutResourcePolicy";
        let document = policy
            .to_json()
            .map_err(|e| build_error(OP, e))?;

        self.secrets
            .put_resource_policy()
            .secret_id(secret_arn)
            .resource_policy(document)
            .send()
            .await
            .map_err(|e| classify(OP, &format!("secret {secret_arn}"), e))?;
        Ok(())
    }
}
