//! Ports onto the cloud provider
//!
//! One trait per external service. Components receive the handles they need
//! through [`CloudClients`], so tests substitute the in-memory provider.

use async_trait::async_trait;
use std::sync::Arc;

use super::error::CloudResult;
use super::policy::PolicyDocument;
use super::resources::{
    ActionGroupSpec, AgentCompletion, AgentSpec, AgentState, AgentStatus, AgentTarget, AliasState,
    CallerIdentity, DataSourceSpec, DataSourceState, FunctionSpec, InvokePermission,
    KnowledgeBaseAssociation, KnowledgeBaseSpec, KnowledgeBaseState,
};

/// Resolves the ambient account and region
#[async_trait]
pub trait IdentityPort: Send + Sync {
    async fn caller_identity(&self) -> CloudResult<CallerIdentity>;
}

#[async_trait]
pub trait ObjectStorePort: Send + Sync {
    /// `AlreadyExists` when the caller already owns the bucket
    async fn create_bucket(&self, bucket: &str, region: &str) -> CloudResult<()>;

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> CloudResult<()>;

    /// Every key in the bucket
    async fn list_objects(&self, bucket: &str) -> CloudResult<Vec<String>>;

    async fn delete_object(&self, bucket: &str, key: &str) -> CloudResult<()>;

    /// Fails with `Fatal` while the bucket still holds objects
    async fn delete_bucket(&self, bucket: &str) -> CloudResult<()>;
}

#[async_trait]
pub trait IamPort: Send + Sync {
    /// Returns the provider-assigned policy ARN
    async fn create_policy(
        &self,
        name: &str,
        description: &str,
        document: &PolicyDocument,
    ) -> CloudResult<String>;

    /// Returns the provider-assigned role ARN
    async fn create_role(
        &self,
        name: &str,
        description: &str,
        trust: &PolicyDocument,
    ) -> CloudResult<String>;

    async fn get_role_arn(&self, name: &str) -> CloudResult<String>;

    /// Attaching an already attached policy succeeds
    async fn attach_role_policy(&self, role_name: &str, policy_arn: &str) -> CloudResult<()>;

    async fn detach_role_policy(&self, role_name: &str, policy_arn: &str) -> CloudResult<()>;

    /// Names of the roles holding the policy
    async fn list_roles_for_policy(&self, policy_arn: &str) -> CloudResult<Vec<String>>;

    async fn delete_policy(&self, policy_arn: &str) -> CloudResult<()>;

    async fn delete_role(&self, name: &str) -> CloudResult<()>;
}

#[async_trait]
pub trait SecretsPort: Send + Sync {
    async fn put_resource_policy(&self, secret_arn: &str, policy: &PolicyDocument) -> CloudResult<()>;
}

#[async_trait]
pub trait FunctionPort: Send + Sync {
    /// Returns the function ARN
    async fn create_function(&self, spec: &FunctionSpec) -> CloudResult<String>;

    async fn get_function_arn(&self, name: &str) -> CloudResult<String>;

    /// `AlreadyExists` when a statement with the same id is present
    async fn add_permission(&self, permission: &InvokePermission) -> CloudResult<()>;

    async fn delete_function(&self, name: &str) -> CloudResult<()>;
}

/// Control plane of the managed knowledge-base and agent service
#[async_trait]
pub trait AgentControlPort: Send + Sync {
    async fn create_knowledge_base(&self, spec: &KnowledgeBaseSpec) -> CloudResult<KnowledgeBaseState>;
    async fn get_knowledge_base(&self, id: &str) -> CloudResult<KnowledgeBaseState>;
    /// Id of the knowledge base with this name, if any
    async fn find_knowledge_base(&self, name: &str) -> CloudResult<Option<String>>;
    async fn delete_knowledge_base(&self, id: &str) -> CloudResult<()>;

    async fn create_data_source(&self, spec: &DataSourceSpec) -> CloudResult<DataSourceState>;
    async fn get_data_source(&self, knowledge_base_id: &str, id: &str) -> CloudResult<DataSourceState>;
    async fn find_data_source(&self, knowledge_base_id: &str, name: &str) -> CloudResult<Option<String>>;

    /// Returns the ingestion job id; the job itself runs provider-side
    async fn start_ingestion_job(&self, knowledge_base_id: &str, data_source_id: &str) -> CloudResult<String>;

    async fn create_agent(&self, spec: &AgentSpec) -> CloudResult<AgentState>;
    async fn get_agent(&self, id: &str) -> CloudResult<AgentState>;
    async fn find_agent(&self, name: &str) -> CloudResult<Option<String>>;
    async fn delete_agent(&self, id: &str) -> CloudResult<()>;

    async fn create_action_group(&self, spec: &ActionGroupSpec) -> CloudResult<()>;
    async fn associate_knowledge_base(&self, association: &KnowledgeBaseAssociation) -> CloudResult<()>;

    /// Starts preparation of the draft and returns the status right after
    async fn prepare_agent(&self, id: &str) -> CloudResult<AgentStatus>;

    async fn create_alias(&self, agent_id: &str, name: &str, description: &str) -> CloudResult<AliasState>;
    async fn get_alias(&self, agent_id: &str, alias_id: &str) -> CloudResult<AliasState>;
    async fn list_aliases(&self, agent_id: &str) -> CloudResult<Vec<AliasState>>;
    async fn delete_alias(&self, agent_id: &str, alias_id: &str) -> CloudResult<()>;
}

/// Data plane: one question to a published agent alias
#[async_trait]
pub trait AgentRuntimePort: Send + Sync {
    async fn invoke_agent(
        &self,
        target: &AgentTarget,
        session_id: &str,
        question: &str,
        end_session: bool,
    ) -> CloudResult<AgentCompletion>;
}

/// Handles onto every cloud service, shared by all components
#[derive(Clone)]
pub struct CloudClients {
    pub identity: Arc<dyn IdentityPort>,
    pub storage: Arc<dyn ObjectStorePort>,
    pub iam: Arc<dyn IamPort>,
    pub secrets: Arc<dyn SecretsPort>,
    pub functions: Arc<dyn FunctionPort>,
    pub agents: Arc<dyn AgentControlPort>,
    pub runtime: Arc<dyn AgentRuntimePort>,
}

impl CloudClients {
    /// Use one provider for every port
    pub fn from_shared<T>(cloud: Arc<T>) -> Self
    where
        T: IdentityPort
            + ObjectStorePort
            + IamPort
            + SecretsPort
            + FunctionPort
            + AgentControlPort
            + AgentRuntimePort
            + 'static,
    {
        Self {
            identity: cloud.clone(),
            storage: cloud.clone(),
            iam: cloud.clone(),
            secrets: cloud.clone(),
            functions: cloud.clone(),
            agents: cloud.clone(),
            runtime: cloud,
        }
    }
}

impl std::fmt::Debug for CloudClients {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudClients").finish_non_exhaustive()
    }
}
