//! IAM trust and permission documents

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const POLICY_VERSION: &str = "2012-10-17";

/// AWS-managed policy giving the callback function CloudWatch Logs access
pub const LAMBDA_BASIC_EXECUTION_POLICY_ARN: &str =
    "arn:aws:iam::aws:policy/service-role/AWSLambdaBasicExecutionRole";

/// The three roles the deployment owns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    /// Assumed by the knowledge-base service for embedding and ingestion
    KnowledgeBase,
    /// Assumed by the reasoning-agent service
    Agent,
    /// Execution role of the callback function
    Callback,
}

impl RoleKind {
    pub const ALL: [RoleKind; 3] = [RoleKind::KnowledgeBase, RoleKind::Agent, RoleKind::Callback];

    /// The only service principal allowed to assume this role
    pub fn principal(&self) -> &'static str {
        match self {
            RoleKind::KnowledgeBase | RoleKind::Agent => "bedrock.amazonaws.com",
            RoleKind::Callback => "lambda.amazonaws.com",
        }
    }

    /// Customer-managed policies created for this role
    pub fn policies(&self) -> &'static [PolicyKind] {
        match self {
            RoleKind::KnowledgeBase => &[
                PolicyKind::KbInvokeEmbeddingModel,
                PolicyKind::KbReadSecret,
                PolicyKind::KbReadDocuments,
            ],
            RoleKind::Agent => &[
                PolicyKind::AgentInvokeModels,
                PolicyKind::AgentReadSchema,
                PolicyKind::AgentRetrieve,
            ],
            RoleKind::Callback => &[],
        }
    }
}

impl std::fmt::Display for RoleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoleKind::KnowledgeBase => write!(f, "knowledge-base"),
            RoleKind::Agent => write!(f, "agent"),
            RoleKind::Callback => write!(f, "callback"),
        }
    }
}

/// The six customer-managed permission policies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    KbInvokeEmbeddingModel,
    KbReadSecret,
    KbReadDocuments,
    AgentInvokeModels,
    AgentReadSchema,
    AgentRetrieve,
}

impl PolicyKind {
    pub const ALL: [PolicyKind; 6] = [
        PolicyKind::AgentInvokeModels,
        PolicyKind::AgentReadSchema,
        PolicyKind::AgentRetrieve,
        PolicyKind::KbInvokeEmbeddingModel,
        PolicyKind::KbReadSecret,
        PolicyKind::KbReadDocuments,
    ];

    /// Name stem, completed with the prefix and suffix by the namer
    pub fn stem(&self) -> &'static str {
        match self {
            PolicyKind::KbInvokeEmbeddingModel => "kb-bedrock-allow-model",
            PolicyKind::KbReadSecret => "kb-secretmanager-api-allow",
            PolicyKind::KbReadDocuments => "kb-s3-allow",
            PolicyKind::AgentInvokeModels => "bedrock-allow",
            PolicyKind::AgentReadSchema => "s3-allow",
            PolicyKind::AgentRetrieve => "kb-allow",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            PolicyKind::KbInvokeEmbeddingModel => "Allow the knowledge base to invoke the embedding model.",
            PolicyKind::KbReadSecret => "Allow the knowledge base to read the vector store credential.",
            PolicyKind::KbReadDocuments => "Allow the knowledge base to read the source documents.",
            PolicyKind::AgentInvokeModels => "Allow the agent to invoke foundation models.",
            PolicyKind::AgentReadSchema => "Allow the agent to read the action group API schema.",
            PolicyKind::AgentRetrieve => "Allow the agent to retrieve documents from the knowledge base.",
        }
    }

    pub fn role(&self) -> RoleKind {
        match self {
            PolicyKind::KbInvokeEmbeddingModel
            | PolicyKind::KbReadSecret
            | PolicyKind::KbReadDocuments => RoleKind::KnowledgeBase,
            PolicyKind::AgentInvokeModels | PolicyKind::AgentReadSchema | PolicyKind::AgentRetrieve => {
                RoleKind::Agent
            }
        }
    }

    /// Build the permission document for this policy
    pub fn document(&self, inputs: &PolicyInputs) -> PolicyDocument {
        let statement = match self {
            PolicyKind::KbInvokeEmbeddingModel => Statement::allow(
                ["bedrock:InvokeModel"],
                [inputs.embedding_model_arn.clone()],
            )
            .with_sid("BedrockInvokeModelStatement"),
            PolicyKind::KbReadSecret => Statement::allow(
                ["secretsmanager:GetSecretValue"],
                [inputs.secret_arn.clone()],
            )
            .with_sid("BedrockAccessSecretManagerStatement"),
            PolicyKind::KbReadDocuments => Statement::allow(
                ["s3:GetObject", "s3:ListBucket"],
                [format!("{}/*", inputs.bucket_arn), inputs.bucket_arn.clone()],
            )
            .with_sid("AllowKBAccessDocuments")
            .with_condition(json!({
                "StringEquals": { "aws:ResourceAccount": inputs.account_id }
            })),
            PolicyKind::AgentInvokeModels => Statement::allow(
                ["bedrock:InvokeModel"],
                [inputs.foundation_models_arn.clone()],
            )
            .with_sid("AmazonBedrockAgentBedrockFoundationModelPolicy"),
            PolicyKind::AgentReadSchema => Statement::allow(
                ["s3:GetObject"],
                [inputs.schema_object_arn.clone()],
            )
            .with_sid("AllowAgentAccessOpenAPISchema"),
            PolicyKind::AgentRetrieve => Statement::allow(
                ["bedrock:Retrieve"],
                [inputs.knowledge_base_arn.clone()],
            )
            .with_sid("AllowAgentRetrieveKnowledgeBase"),
        };
        PolicyDocument::new(vec![statement])
    }
}

/// Everything the permission documents interpolate
#[derive(Debug, Clone, Default)]
pub struct PolicyInputs {
    pub account_id: String,
    pub embedding_model_arn: String,
    pub foundation_models_arn: String,
    pub secret_arn: String,
    pub bucket_arn: String,
    pub schema_object_arn: String,
    pub knowledge_base_arn: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

/// Who a statement applies to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Principal {
    #[serde(rename = "Service")]
    Service(String),
    #[serde(rename = "AWS")]
    Aws(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    pub effect: Effect,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,
    pub action: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Value>,
}

impl Statement {
    pub fn allow<A, R>(actions: A, resources: R) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        R: IntoIterator,
        R::Item: Into<String>,
    {
        Self {
            sid: None,
            effect: Effect::Allow,
            principal: None,
            action: actions.into_iter().map(Into::into).collect(),
            resource: resources.into_iter().map(Into::into).collect(),
            condition: None,
        }
    }

    pub fn with_sid(mut self, sid: impl Into<String>) -> Self {
        self.sid = Some(sid.into());
        self
    }

    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    pub fn with_condition(mut self, condition: Value) -> Self {
        self.condition = Some(condition);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub version: String,
    pub statement: Vec<Statement>,
}

impl PolicyDocument {
    pub fn new(statement: Vec<Statement>) -> Self {
        Self {
            version: POLICY_VERSION.to_string(),
            statement,
        }
    }

    /// Trust document naming exactly the role's service principal
    pub fn trust(kind: RoleKind) -> Self {
        Self::new(vec![Statement::allow(["sts:AssumeRole"], Vec::<String>::new())
            .with_principal(Principal::Service(kind.principal().to_string()))])
    }

    /// Resource policy on the vector-store secret letting the knowledge-base
    /// role read it
    pub fn secret_access(role_arn: &str, secret_arn: &str) -> Self {
        Self::new(vec![Statement::allow(
            ["secretsmanager:GetSecretValue"],
            [secret_arn.to_string()],
        )
        .with_principal(Principal::Aws(role_arn.to_string()))])
    }

    pub fn principals(&self) -> Vec<&Principal> {
        self.statement.iter().filter_map(|s| s.principal.as_ref()).collect()
    }

    pub fn actions(&self) -> Vec<&str> {
        self.statement
            .iter()
            .flat_map(|s| s.action.iter().map(String::as_str))
            .collect()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
