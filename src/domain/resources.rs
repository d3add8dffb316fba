//! Provisioned resource descriptors, creation specs and provider statuses

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::policy::{PolicyDocument, RoleKind};

/// Draft version every agent edit targets before preparation
pub const DRAFT_VERSION: &str = "DRAFT";

/// Built-in alias that cannot be deleted
pub const TEST_ALIAS_ID: &str = "TSTALIASID";

/// Account and region of the ambient cloud identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub account_id: String,
    pub region: String,
}

/// An IAM permission policy; the ARN is assigned by the provider
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyDescriptor {
    pub name: String,
    pub document: PolicyDocument,
    pub arn: String,
}

/// An IAM role and the policy ARNs attached to it
#[derive(Debug, Clone, PartialEq)]
pub struct RoleDescriptor {
    pub kind: RoleKind,
    pub name: String,
    pub trust_document: PolicyDocument,
    pub attached_policies: BTreeSet<String>,
    pub arn: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageBackend {
    Pinecone,
}

/// A knowledge base created by the store provisioner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBase {
    pub id: String,
    pub arn: String,
    pub embedding_model_arn: String,
    pub storage_backend: StorageBackend,
    pub data_source_id: String,
    /// Ingestion runs provider-side and is never awaited
    pub ingestion_job_id: Option<String>,
}

/// An agent created by the agent provisioner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub instruction: String,
    pub foundation_model: String,
    pub action_groups: Vec<String>,
    pub knowledge_base_associations: Vec<String>,
    pub aliases: Vec<String>,
}

/// Lifecycle of knowledge bases, data sources and aliases.
///
/// The provider uses `ACTIVE`, `AVAILABLE` or `PREPARED` for the usable state
/// depending on the resource; all map to `Available`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceStatus {
    Creating,
    Available,
    Updating,
    Deleting,
    Failed,
    Unknown(String),
}

impl ResourceStatus {
    pub fn from_provider(status: &str) -> Self {
        match status {
            "CREATING" => ResourceStatus::Creating,
            "ACTIVE" | "AVAILABLE" | "PREPARED" => ResourceStatus::Available,
            "UPDATING" => ResourceStatus::Updating,
            "DELETING" => ResourceStatus::Deleting,
            "FAILED" | "DELETE_UNSUCCESSFUL" => ResourceStatus::Failed,
            other => ResourceStatus::Unknown(other.to_string()),
        }
    }
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceStatus::Creating => write!(f, "CREATING"),
            ResourceStatus::Available => write!(f, "AVAILABLE"),
            ResourceStatus::Updating => write!(f, "UPDATING"),
            ResourceStatus::Deleting => write!(f, "DELETING"),
            ResourceStatus::Failed => write!(f, "FAILED"),
            ResourceStatus::Unknown(s) => write!(f, "{s}"),
        }
    }
}

/// Agent lifecycle: `CREATING → NOT_PREPARED → PREPARING → PREPARED | FAILED`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentStatus {
    Creating,
    NotPrepared,
    Preparing,
    Prepared,
    Updating,
    Versioning,
    Deleting,
    Failed,
    Unknown(String),
}

impl AgentStatus {
    pub fn from_provider(status: &str) -> Self {
        match status {
            "CREATING" => AgentStatus::Creating,
            "NOT_PREPARED" => AgentStatus::NotPrepared,
            "PREPARING" => AgentStatus::Preparing,
            "PREPARED" => AgentStatus::Prepared,
            "UPDATING" => AgentStatus::Updating,
            "VERSIONING" => AgentStatus::Versioning,
            "DELETING" => AgentStatus::Deleting,
            "FAILED" => AgentStatus::Failed,
            other => AgentStatus::Unknown(other.to_string()),
        }
    }

    /// Whether the draft can be edited (action groups, associations)
    pub fn is_settled(&self) -> bool {
        matches!(self, AgentStatus::NotPrepared | AgentStatus::Prepared)
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Creating => write!(f, "CREATING"),
            AgentStatus::NotPrepared => write!(f, "NOT_PREPARED"),
            AgentStatus::Preparing => write!(f, "PREPARING"),
            AgentStatus::Prepared => write!(f, "PREPARED"),
            AgentStatus::Updating => write!(f, "UPDATING"),
            AgentStatus::Versioning => write!(f, "VERSIONING"),
            AgentStatus::Deleting => write!(f, "DELETING"),
            AgentStatus::Failed => write!(f, "FAILED"),
            AgentStatus::Unknown(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnowledgeBaseState {
    pub id: String,
    pub arn: String,
    pub status: ResourceStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSourceState {
    pub id: String,
    pub status: ResourceStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentState {
    pub id: String,
    pub name: String,
    pub status: AgentStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasState {
    pub id: String,
    pub name: String,
    pub status: ResourceStatus,
}

/// External vector store the knowledge base writes into
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorStoreSpec {
    pub connection_string: String,
    /// Referenced by ARN only; the credential itself never leaves the secret
    pub credentials_secret_arn: String,
    pub namespace: Option<String>,
    pub text_field: String,
    pub metadata_field: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnowledgeBaseSpec {
    pub name: String,
    pub description: String,
    pub role_arn: String,
    pub embedding_model_arn: String,
    pub vector_store: VectorStoreSpec,
}

/// Fixed-size chunking applied at ingestion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingPolicy {
    pub max_tokens: u32,
    pub overlap_percentage: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSourceSpec {
    pub knowledge_base_id: String,
    pub name: String,
    pub description: String,
    pub bucket_arn: String,
    pub inclusion_prefixes: Vec<String>,
    pub chunking: ChunkingPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSpec {
    pub name: String,
    pub role_arn: String,
    pub description: String,
    pub idle_session_ttl_secs: u32,
    pub foundation_model: String,
    pub instruction: String,
}

/// Binds the callback function to the API schema object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionGroupSpec {
    pub agent_id: String,
    pub agent_version: String,
    pub name: String,
    pub description: String,
    pub function_arn: String,
    pub schema_bucket: String,
    pub schema_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnowledgeBaseAssociation {
    pub agent_id: String,
    pub agent_version: String,
    pub knowledge_base_id: String,
    pub description: String,
}

/// Deployment package of the callback function
#[derive(Clone, PartialEq, Eq)]
pub struct FunctionSpec {
    pub name: String,
    pub role_arn: String,
    pub runtime: String,
    pub handler: String,
    pub timeout_secs: u32,
    pub description: String,
    pub package: Vec<u8>,
}

impl std::fmt::Debug for FunctionSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionSpec")
            .field("name", &self.name)
            .field("role_arn", &self.role_arn)
            .field("runtime", &self.runtime)
            .field("handler", &self.handler)
            .field("timeout_secs", &self.timeout_secs)
            .field("package_bytes", &self.package.len())
            .finish()
    }
}

/// Resource-based permission letting a service invoke the function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokePermission {
    pub function_name: String,
    pub statement_id: String,
    pub action: String,
    pub principal: String,
    pub source_arn: String,
}

/// Target of an agent invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentTarget {
    pub agent_id: String,
    pub agent_alias_id: String,
}

/// Text and trace collected from one agent invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentCompletion {
    pub text: String,
    pub trace: Vec<String>,
}

/// Identifiers produced by a setup run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentOutputs {
    pub region: String,
    pub account_id: String,
    pub bucket: String,
    pub knowledge_base_id: String,
    pub knowledge_base_arn: String,
    pub data_source_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingestion_job_id: Option<String>,
    pub agent_id: String,
    pub agent_alias_id: String,
}
