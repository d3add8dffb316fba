//! Deterministic resource naming
//!
//! Every name and ARN the deployment touches is derived from the service base
//! name and a `{region}-{account_id}` suffix. Nothing here performs I/O, so
//! teardown recomputes exactly the names setup used without a registry.

use serde::{Deserialize, Serialize};

use super::policy::{PolicyInputs, PolicyKind, RoleKind};

pub const PARTITION: &str = "aws";

const MAX_BUCKET_NAME: usize = 63;
const MAX_ROLE_NAME: usize = 64;
const MAX_POLICY_NAME: usize = 128;
const MAX_FUNCTION_NAME: usize = 64;

/// `(region, account_id)` pair every derived name ends with
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceSuffix {
    region: String,
    account_id: String,
}

impl ResourceSuffix {
    pub fn new(region: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            account_id: account_id.into(),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }
}

impl std::fmt::Display for ResourceSuffix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.region, self.account_id)
    }
}

/// All names derived for one deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNames {
    base_name: String,
    policy_prefix: String,
    suffix: ResourceSuffix,
}

impl ResourceNames {
    pub fn new(
        base_name: impl Into<String>,
        policy_prefix: impl Into<String>,
        suffix: ResourceSuffix,
    ) -> Self {
        Self {
            base_name: base_name.into(),
            policy_prefix: policy_prefix.into(),
            suffix,
        }
    }

    pub fn suffix(&self) -> &ResourceSuffix {
        &self.suffix
    }

    pub fn region(&self) -> &str {
        self.suffix.region()
    }

    pub fn account_id(&self) -> &str {
        self.suffix.account_id()
    }

    /// Name of the agent resource; agents are already regional and per-account
    pub fn agent_name(&self) -> String {
        format!("{}-agent", self.base_name)
    }

    pub fn bucket(&self) -> String {
        format!("{}-{}", self.agent_name(), self.suffix)
    }

    pub fn bucket_arn(&self) -> String {
        format!("arn:{PARTITION}:s3:::{}", self.bucket())
    }

    pub fn knowledge_base(&self) -> String {
        format!("{}-kb-{}", self.base_name, self.suffix)
    }

    pub fn data_source(&self) -> String {
        format!("{}-kb-docs-{}", self.base_name, self.suffix)
    }

    /// Object key of the action group API schema
    pub fn schema_key(&self) -> String {
        format!("{}-schema.json", self.agent_name())
    }

    pub fn schema_object_arn(&self) -> String {
        format!("{}/{}", self.bucket_arn(), self.schema_key())
    }

    pub fn function_name(&self) -> String {
        format!("{}-{}", self.agent_name(), self.suffix)
    }

    pub fn role_name(&self, kind: RoleKind) -> String {
        match kind {
            RoleKind::KnowledgeBase => {
                format!("BedrockExecutionRoleForKB_{}-{}", self.policy_prefix, self.suffix)
            }
            RoleKind::Agent => format!(
                "AmazonBedrockExecutionRoleForAgents_{}-{}",
                self.policy_prefix, self.suffix
            ),
            RoleKind::Callback => format!("{}-lambda-role-{}", self.agent_name(), self.suffix),
        }
    }

    pub fn role_arn(&self, kind: RoleKind) -> String {
        format!(
            "arn:{PARTITION}:iam::{}:role/{}",
            self.account_id(),
            self.role_name(kind)
        )
    }

    pub fn policy_name(&self, kind: PolicyKind) -> String {
        format!("{}-{}-{}", self.policy_prefix, kind.stem(), self.suffix)
    }

    pub fn policy_arn(&self, kind: PolicyKind) -> String {
        format!(
            "arn:{PARTITION}:iam::{}:policy/{}",
            self.account_id(),
            self.policy_name(kind)
        )
    }

    pub fn foundation_model_arn(&self, model_id: &str) -> String {
        format!("arn:{PARTITION}:bedrock:{}::foundation-model/{model_id}", self.region())
    }

    pub fn foundation_models_arn(&self) -> String {
        self.foundation_model_arn("*")
    }

    pub fn agent_arn(&self, agent_id: &str) -> String {
        format!(
            "arn:{PARTITION}:bedrock:{}:{}:agent/{agent_id}",
            self.region(),
            self.account_id()
        )
    }

    /// Accepts a full secret ARN or a bare secret name
    pub fn secret_arn(&self, secret: &str) -> String {
        if secret.starts_with("arn:") {
            secret.to_string()
        } else {
            format!(
                "arn:{PARTITION}:secretsmanager:{}:{}:secret:{secret}",
                self.region(),
                self.account_id()
            )
        }
    }

    /// Inputs for the permission documents; the knowledge-base ARN is only
    /// known once the knowledge base exists.
    pub fn policy_inputs(
        &self,
        embedding_model: &str,
        secret: &str,
        knowledge_base_arn: Option<&str>,
    ) -> PolicyInputs {
        PolicyInputs {
            account_id: self.account_id().to_string(),
            embedding_model_arn: self.foundation_model_arn(embedding_model),
            foundation_models_arn: self.foundation_models_arn(),
            secret_arn: self.secret_arn(secret),
            bucket_arn: self.bucket_arn(),
            schema_object_arn: self.schema_object_arn(),
            knowledge_base_arn: knowledge_base_arn.unwrap_or_default().to_string(),
        }
    }

    /// Check the provider's name length limits
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        let bucket = self.bucket();
        if bucket.len() > MAX_BUCKET_NAME {
            errors.push(format!("bucket name '{bucket}' exceeds {MAX_BUCKET_NAME} characters"));
        }
        if bucket.chars().any(|c| c.is_ascii_uppercase()) {
            errors.push(format!("bucket name '{bucket}' must be lowercase"));
        }
        for kind in RoleKind::ALL {
            let role = self.role_name(kind);
            if role.len() > MAX_ROLE_NAME {
                errors.push(format!("role name '{role}' exceeds {MAX_ROLE_NAME} characters"));
            }
        }
        for kind in PolicyKind::ALL {
            let policy = self.policy_name(kind);
            if policy.len() > MAX_POLICY_NAME {
                errors.push(format!("policy name '{policy}' exceeds {MAX_POLICY_NAME} characters"));
            }
        }
        let function = self.function_name();
        if function.len() > MAX_FUNCTION_NAME {
            errors.push(format!(
                "function name '{function}' exceeds {MAX_FUNCTION_NAME} characters"
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
