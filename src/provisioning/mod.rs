//! Setup and teardown of the assistant's cloud resources
//!
//! [`Provisioner`] owns the injected [`CloudClients`] and the settings. Setup
//! runs the store steps and then the agent steps, strictly in order, each one
//! tolerating resources left behind by an earlier run. Teardown reverses
//! everything and never aborts on a cloud failure.

pub mod agent;
pub mod error;
pub mod roles;
pub mod store;
pub mod teardown;
pub mod wait;

use tracing::info;

use crate::config::Settings;
use crate::domain::naming::{ResourceNames, ResourceSuffix};
use crate::domain::policy::PolicyInputs;
use crate::domain::ports::CloudClients;
use crate::domain::resources::{DeploymentOutputs, TEST_ALIAS_ID};

pub use error::{ProvisionError, ProvisionResult, StepContext};
pub use teardown::{StepOutcome, TeardownReport, TeardownStep};
pub use wait::{Probe, RetryPolicy, WaitPolicy};

/// Drives setup, teardown and output discovery against one account
pub struct Provisioner {
    pub(crate) clients: CloudClients,
    pub(crate) settings: Settings,
    pub(crate) resource_wait: WaitPolicy,
    pub(crate) prepare_wait: WaitPolicy,
    pub(crate) retry: RetryPolicy,
    /// Deployment package used instead of reading the configured artifact
    pub(crate) callback_package: Option<Vec<u8>>,
}

impl Provisioner {
    pub fn new(clients: CloudClients, settings: Settings) -> Self {
        Self {
            resource_wait: WaitPolicy::resources(&settings.wait),
            prepare_wait: WaitPolicy::preparation(&settings.wait),
            retry: RetryPolicy::from_settings(&settings.wait),
            clients,
            settings,
            callback_package: None,
        }
    }

    pub fn with_callback_package(mut self, package: Vec<u8>) -> Self {
        self.callback_package = Some(package);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Derive every resource name from the ambient account and region
    pub async fn resolve_names(&self) -> ProvisionResult<ResourceNames> {
        let identity = self
            .retry
            .run("sts:GetCallerIdentity", || self.clients.identity.caller_identity())
            .await
            .step("resolve caller identity")?;

        let names = ResourceNames::new(
            self.settings.deployment.base_name.clone(),
            self.settings.deployment.policy_prefix.clone(),
            ResourceSuffix::new(identity.region, identity.account_id),
        );
        names
            .validate()
            .map_err(|errors| ProvisionError::Config(errors.join("; ")))?;
        Ok(names)
    }

    /// Policy document inputs for this deployment
    pub(crate) fn policy_inputs(&self, names: &ResourceNames, knowledge_base_arn: Option<&str>) -> PolicyInputs {
        names.policy_inputs(
            &self.settings.deployment.embedding_model,
            &self.settings.vector_store.credentials_secret,
            knowledge_base_arn,
        )
    }

    /// Create or reuse every resource and return their identifiers
    pub async fn setup(&self) -> ProvisionResult<DeploymentOutputs> {
        let names = self.resolve_names().await?;
        info!(suffix = %names.suffix(), "starting setup");

        let knowledge_base = store::provision(self, &names).await?;
        let published = agent::provision(self, &names, &knowledge_base).await?;

        info!(
            agent_id = %published.agent.id,
            alias_id = %published.alias_id,
            "setup complete"
        );
        Ok(DeploymentOutputs {
            region: names.region().to_string(),
            account_id: names.account_id().to_string(),
            bucket: names.bucket(),
            knowledge_base_id: knowledge_base.id,
            knowledge_base_arn: knowledge_base.arn,
            data_source_id: knowledge_base.data_source_id,
            ingestion_job_id: knowledge_base.ingestion_job_id,
            agent_id: published.agent.id,
            agent_alias_id: published.alias_id,
        })
    }

    /// Delete everything setup may have created; cloud failures end up in the report
    pub async fn teardown(&self) -> ProvisionResult<TeardownReport> {
        let names = self.resolve_names().await?;
        info!(suffix = %names.suffix(), "starting teardown");
        Ok(teardown::run(self, &names).await)
    }

    /// Rediscover the identifiers of a previous setup run by name
    pub async fn outputs(&self) -> ProvisionResult<DeploymentOutputs> {
        let names = self.resolve_names().await?;
        let agents = &self.clients.agents;

        let knowledge_base_id = agents
            .find_knowledge_base(&names.knowledge_base())
            .await
            .step("look up knowledge base")?
            .ok_or_else(|| ProvisionError::NotDeployed(format!("knowledge base {}", names.knowledge_base())))?;
        let knowledge_base = agents
            .get_knowledge_base(&knowledge_base_id)
            .await
            .step("read knowledge base")?;
        let data_source_id = agents
            .find_data_source(&knowledge_base_id, &names.data_source())
            .await
            .step("look up data source")?
            .ok_or_else(|| ProvisionError::NotDeployed(format!("data source {}", names.data_source())))?;

        let agent_id = agents
            .find_agent(&names.agent_name())
            .await
            .step("look up agent")?
            .ok_or_else(|| ProvisionError::NotDeployed(format!("agent {}", names.agent_name())))?;
        let alias_name = &self.settings.deployment.alias_name;
        let agent_alias_id = agents
            .list_aliases(&agent_id)
            .await
            .step("list agent aliases")?
            .into_iter()
            .find(|alias| alias.id != TEST_ALIAS_ID && &alias.name == alias_name)
            .map(|alias| alias.id)
            .ok_or_else(|| ProvisionError::NotDeployed(format!("alias {alias_name}")))?;

        Ok(DeploymentOutputs {
            region: names.region().to_string(),
            account_id: names.account_id().to_string(),
            bucket: names.bucket(),
            knowledge_base_id,
            knowledge_base_arn: knowledge_base.arn,
            data_source_id,
            ingestion_job_id: None,
            agent_id,
            agent_alias_id,
        })
    }
}
