//! In-process model of the cloud provider
//!
//! Enforces name uniqueness, reports missing resources, and walks knowledge
//! bases, data sources, agents and aliases through their status machines one
//! status read at a time. Used by the test suite and by dry runs.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::error::{CloudError, CloudResult};
use crate::domain::naming::PARTITION;
use crate::domain::policy::{PolicyDocument, LAMBDA_BASIC_EXECUTION_POLICY_ARN};
use crate::domain::ports::{
    AgentControlPort, AgentRuntimePort, FunctionPort, IamPort, IdentityPort, ObjectStorePort,
    SecretsPort,
};
use crate::domain::resources::{
    ActionGroupSpec, AgentCompletion, AgentSpec, AgentState, AgentStatus, AgentTarget, AliasState,
    CallerIdentity, DataSourceSpec, DataSourceState, FunctionSpec, InvokePermission,
    KnowledgeBaseAssociation, KnowledgeBaseSpec, KnowledgeBaseState, ResourceStatus,
    TEST_ALIAS_ID,
};

const TEST_ALIAS_NAME: &str = "AgentTestAlias";

#[derive(Debug, Clone)]
struct StoredObject {
    body: Vec<u8>,
    content_type: String,
}

#[derive(Debug, Clone)]
struct StoredPolicy {
    name: String,
    document: PolicyDocument,
}

#[derive(Debug, Clone)]
struct StoredRole {
    arn: String,
    trust: PolicyDocument,
    attached: BTreeSet<String>,
}

#[derive(Debug, Clone)]
struct StoredFunction {
    arn: String,
    spec: FunctionSpec,
    permissions: BTreeMap<String, InvokePermission>,
}

#[derive(Debug, Clone)]
struct StoredDataSource {
    spec: DataSourceSpec,
    status: ResourceStatus,
    reads: u32,
}

#[derive(Debug, Clone)]
struct StoredKnowledgeBase {
    arn: String,
    spec: KnowledgeBaseSpec,
    status: ResourceStatus,
    reads: u32,
    data_sources: BTreeMap<String, StoredDataSource>,
}

#[derive(Debug, Clone)]
struct StoredAlias {
    name: String,
    status: ResourceStatus,
    reads: u32,
}

#[derive(Debug, Clone)]
struct StoredAgent {
    spec: AgentSpec,
    status: AgentStatus,
    reads: u32,
    action_groups: BTreeMap<String, ActionGroupSpec>,
    knowledge_bases: BTreeMap<String, String>,
    aliases: BTreeMap<String, StoredAlias>,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    buckets: BTreeMap<String, BTreeMap<String, StoredObject>>,
    policies: BTreeMap<String, StoredPolicy>,
    roles: BTreeMap<String, StoredRole>,
    secret_policies: HashMap<String, PolicyDocument>,
    functions: BTreeMap<String, StoredFunction>,
    knowledge_bases: BTreeMap<String, StoredKnowledgeBase>,
    ingestion_jobs: Vec<String>,
    agents: BTreeMap<String, StoredAgent>,
    /// Remaining injected transient failures per operation
    faults: HashMap<String, u32>,
    calls: Vec<String>,
}

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{:06}", self.next_id)
    }

    fn record(&mut self, operation: &str, target: &str) -> CloudResult<()> {
        self.calls.push(format!("{operation} {target}"));
        match self.faults.get_mut(operation) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(CloudError::transient(operation, "injected failure"))
            }
            _ => Ok(()),
        }
    }

    fn role_by_arn(&self, arn: &str) -> Option<&StoredRole> {
        self.roles.values().find(|role| role.arn == arn)
    }
}

/// Canned answer for agent invocations
#[derive(Debug, Clone)]
enum Reply {
    Echo,
    Fixed(AgentCompletion),
    Fail(CloudError),
}

/// In-memory implementation of every cloud port
pub struct InMemoryCloud {
    identity: CallerIdentity,
    /// Status reads before a transitional status settles
    settle_after: u32,
    fail_preparation: bool,
    state: Arc<RwLock<State>>,
    reply: Arc<RwLock<Reply>>,
}

impl InMemoryCloud {
    pub fn new(region: impl Into<String>, account_id: impl Into<String>) -> Self {
        let mut state = State::default();
        state.policies.insert(
            LAMBDA_BASIC_EXECUTION_POLICY_ARN.to_string(),
            StoredPolicy {
                name: "AWSLambdaBasicExecutionRole".to_string(),
                document: PolicyDocument::new(Vec::new()),
            },
        );

        Self {
            identity: CallerIdentity {
                account_id: account_id.into(),
                region: region.into(),
            },
            settle_after: 1,
            fail_preparation: false,
            state: Arc::new(RwLock::new(state)),
            reply: Arc::new(RwLock::new(Reply::Echo)),
        }
    }

    /// Number of status reads a resource stays in a transitional status
    pub fn with_settle_after(mut self, reads: u32) -> Self {
        self.settle_after = reads;
        self
    }

    /// Agent preparation ends in `FAILED`
    pub fn with_failed_preparation(mut self) -> Self {
        self.fail_preparation = true;
        self
    }

    /// Fail the next `times` calls of `operation` with a transient error
    pub async fn inject_transient(&self, operation: &str, times: u32) {
        let mut state = self.state.write().await;
        state.faults.insert(operation.to_string(), times);
    }

    pub async fn reply_with(&self, completion: AgentCompletion) {
        *self.reply.write().await = Reply::Fixed(completion);
    }

    pub async fn fail_invocations(&self, error: CloudError) {
        *self.reply.write().await = Reply::Fail(error);
    }

    /// Every call made so far as `"{operation} {target}"`
    pub async fn calls(&self) -> Vec<String> {
        self.state.read().await.calls.clone()
    }

    pub async fn count_calls(&self, operation: &str) -> usize {
        let prefix = format!("{operation} ");
        self.state
            .read()
            .await
            .calls
            .iter()
            .filter(|call| call.starts_with(&prefix))
            .count()
    }

    /// Seed an agent with an alias, as a previous deployment would have left it
    pub async fn seed_agent(&self, name: &str, alias_name: &str) -> AgentTarget {
        let mut state = self.state.write().await;
        let agent_id = state.next_id("AGENT");
        let alias_id = state.next_id("ALIAS");
        let mut aliases = BTreeMap::new();
        aliases.insert(
            alias_id.clone(),
            StoredAlias {
                name: alias_name.to_string(),
                status: ResourceStatus::Available,
                reads: 0,
            },
        );
        state.agents.insert(
            agent_id.clone(),
            StoredAgent {
                spec: AgentSpec {
                    name: name.to_string(),
                    role_arn: String::new(),
                    description: String::new(),
                    idle_session_ttl_secs: 0,
                    foundation_model: String::new(),
                    instruction: String::new(),
                },
                status: AgentStatus::Prepared,
                reads: 0,
                action_groups: BTreeMap::new(),
                knowledge_bases: BTreeMap::new(),
                aliases,
            },
        );
        AgentTarget {
            agent_id,
            agent_alias_id: alias_id,
        }
    }

    pub async fn bucket_count(&self) -> usize {
        self.state.read().await.buckets.len()
    }

    pub async fn object_keys(&self, bucket: &str) -> Vec<String> {
        self.state
            .read()
            .await
            .buckets
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn object_content_type(&self, bucket: &str, key: &str) -> Option<String> {
        self.state
            .read()
            .await
            .buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|object| object.content_type.clone())
    }

    pub async fn object_body(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.state
            .read()
            .await
            .buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|object| object.body.clone())
    }

    /// Customer-managed policies; the seeded managed policy is excluded
    pub async fn policy_names(&self) -> Vec<String> {
        self.state
            .read()
            .await
            .policies
            .iter()
            .filter(|(arn, _)| arn.as_str() != LAMBDA_BASIC_EXECUTION_POLICY_ARN)
            .map(|(_, policy)| policy.name.clone())
            .collect()
    }

    pub async fn policy_document(&self, arn: &str) -> Option<PolicyDocument> {
        self.state
            .read()
            .await
            .policies
            .get(arn)
            .map(|policy| policy.document.clone())
    }

    pub async fn role_names(&self) -> Vec<String> {
        self.state.read().await.roles.keys().cloned().collect()
    }

    pub async fn role_trust(&self, name: &str) -> Option<PolicyDocument> {
        self.state
            .read()
            .await
            .roles
            .get(name)
            .map(|role| role.trust.clone())
    }

    pub async fn attached_policies(&self, role_name: &str) -> Vec<String> {
        self.state
            .read()
            .await
            .roles
            .get(role_name)
            .map(|role| role.attached.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn secret_policy(&self, secret_arn: &str) -> Option<PolicyDocument> {
        self.state.read().await.secret_policies.get(secret_arn).cloned()
    }

    pub async fn function_names(&self) -> Vec<String> {
        self.state.read().await.functions.keys().cloned().collect()
    }

    pub async fn function_timeout(&self, name: &str) -> Option<u32> {
        self.state
            .read()
            .await
            .functions
            .get(name)
            .map(|function| function.spec.timeout_secs)
    }

    pub async fn function_permissions(&self, name: &str) -> Vec<InvokePermission> {
        self.state
            .read()
            .await
            .functions
            .get(name)
            .map(|function| function.permissions.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn knowledge_base_names(&self) -> Vec<String> {
        self.state
            .read()
            .await
            .knowledge_bases
            .values()
            .map(|kb| kb.spec.name.clone())
            .collect()
    }

    pub async fn data_source_specs(&self) -> Vec<DataSourceSpec> {
        self.state
            .read()
            .await
            .knowledge_bases
            .values()
            .flat_map(|kb| kb.data_sources.values().map(|ds| ds.spec.clone()))
            .collect()
    }

    pub async fn ingestion_job_count(&self) -> usize {
        self.state.read().await.ingestion_jobs.len()
    }

    pub async fn agent_names(&self) -> Vec<String> {
        self.state
            .read()
            .await
            .agents
            .values()
            .map(|agent| agent.spec.name.clone())
            .collect()
    }

    pub async fn agent_action_groups(&self, agent_id: &str) -> Vec<ActionGroupSpec> {
        self.state
            .read()
            .await
            .agents
            .get(agent_id)
            .map(|agent| agent.action_groups.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn agent_knowledge_bases(&self, agent_id: &str) -> Vec<String> {
        self.state
            .read()
            .await
            .agents
            .get(agent_id)
            .map(|agent| agent.knowledge_bases.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Alias names of an agent, the built-in test alias included
    pub async fn alias_names(&self, agent_id: &str) -> Vec<String> {
        self.state
            .read()
            .await
            .agents
            .get(agent_id)
            .map(|agent| agent.aliases.values().map(|alias| alias.name.clone()).collect())
            .unwrap_or_default()
    }

    /// Nothing the deployment creates is left behind
    pub async fn is_empty(&self) -> bool {
        let state = self.state.read().await;
        state.buckets.is_empty()
            && state.roles.is_empty()
            && state.functions.is_empty()
            && state.knowledge_bases.is_empty()
            && state.agents.is_empty()
            && state
                .policies
                .keys()
                .all(|arn| arn == LAMBDA_BASIC_EXECUTION_POLICY_ARN)
    }

    fn settle(&self, status: &mut ResourceStatus, reads: &mut u32) {
        *reads += 1;
        if matches!(status, ResourceStatus::Creating | ResourceStatus::Updating)
            && *reads > self.settle_after
        {
            *status = ResourceStatus::Available;
        }
    }

    fn initial_status(&self) -> ResourceStatus {
        if self.settle_after == 0 {
            ResourceStatus::Available
        } else {
            ResourceStatus::Creating
        }
    }

    fn settle_agent(&self, agent: &mut StoredAgent) {
        agent.reads += 1;
        if agent.reads <= self.settle_after {
            return;
        }
        agent.status = match agent.status {
            AgentStatus::Creating => AgentStatus::NotPrepared,
            AgentStatus::Preparing if self.fail_preparation => AgentStatus::Failed,
            AgentStatus::Preparing => AgentStatus::Prepared,
            ref other => other.clone(),
        };
    }

    fn policy_arn(&self, name: &str) -> String {
        format!("arn:{PARTITION}:iam::{}:policy/{name}", self.identity.account_id)
    }

    fn role_arn(&self, name: &str) -> String {
        format!("arn:{PARTITION}:iam::{}:role/{name}", self.identity.account_id)
    }
}

fn validation(operation: &str, message: impl Into<String>) -> CloudError {
    CloudError::fatal(operation, format!("ValidationException: {}", message.into()))
}

#[async_trait]
impl IdentityPort for InMemoryCloud {
    async fn caller_identity(&self) -> CloudResult<CallerIdentity> {
        self.state
            .write()
            .await
            .record("sts:GetCallerIdentity", &self.identity.account_id)?;
        Ok(self.identity.clone())
    }
}

#[async_trait]
impl ObjectStorePort for InMemoryCloud {
    async fn create_bucket(&self, bucket: &str, _region: &str) -> CloudResult<()> {
        let mut state = self.state.write().await;
        state.record("s3:CreateBucket", bucket)?;
        if state.buckets.contains_key(bucket) {
            return Err(CloudError::already_exists(format!("bucket {bucket}")));
        }
        state.buckets.insert(bucket.to_string(), BTreeMap::new());
        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> CloudResult<()> {
        let mut state = self.state.write().await;
        state.record("s3:PutObject", &format!("{bucket}/{key}"))?;
        let objects = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| CloudError::not_found(format!("bucket {bucket}")))?;
        objects.insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn list_objects(&self, bucket: &str) -> CloudResult<Vec<String>> {
        let mut state = self.state.write().await;
        state.record("s3:ListObjectsV2", bucket)?;
        state
            .buckets
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .ok_or_else(|| CloudError::not_found(format!("bucket {bucket}")))
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> CloudResult<()> {
        let mut state = self.state.write().await;
        state.record("s3:DeleteObject", &format!("{bucket}/{key}"))?;
        let objects = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| CloudError::not_found(format!("bucket {bucket}")))?;
        // Deleting a missing key succeeds, as it does on the real service
        objects.remove(key);
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> CloudResult<()> {
        let mut state = self.state.write().await;
        state.record("s3:DeleteBucket", bucket)?;
        match state.buckets.get(bucket) {
            None => Err(CloudError::not_found(format!("bucket {bucket}"))),
            Some(objects) if !objects.is_empty() => Err(CloudError::fatal(
                "s3:DeleteBucket",
                format!("BucketNotEmpty: {bucket} still holds {} objects", objects.len()),
            )),
            Some(_) => {
                state.buckets.remove(bucket);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl IamPort for InMemoryCloud {
    async fn create_policy(
        &self,
        name: &str,
        _description: &str,
        document: &PolicyDocument,
    ) -> CloudResult<String> {
        let mut state = self.state.write().await;
        state.record("iam:CreatePolicy", name)?;
        let arn = self.policy_arn(name);
        if state.policies.contains_key(&arn) {
            return Err(CloudError::already_exists(format!("policy {name}")));
        }
        state.policies.insert(
            arn.clone(),
            StoredPolicy {
                name: name.to_string(),
                document: document.clone(),
            },
        );
        Ok(arn)
    }

    async fn create_role(
        &self,
        name: &str,
        _description: &str,
        trust: &PolicyDocument,
    ) -> CloudResult<String> {
        let mut state = self.state.write().await;
        state.record("iam:CreateRole", name)?;
        if state.roles.contains_key(name) {
            return Err(CloudError::already_exists(format!("role {name}")));
        }
        let arn = self.role_arn(name);
        state.roles.insert(
            name.to_string(),
            StoredRole {
                arn: arn.clone(),
                trust: trust.clone(),
                attached: BTreeSet::new(),
            },
        );
        Ok(arn)
    }

    async fn get_role_arn(&self, name: &str) -> CloudResult<String> {
        let mut state = self.state.write().await;
        state.record("iam:GetRole", name)?;
        state
            .roles
            .get(name)
            .map(|role| role.arn.clone())
            .ok_or_else(|| CloudError::not_found(format!("role {name}")))
    }

    async fn attach_role_policy(&self, role_name: &str, policy_arn: &str) -> CloudResult<()> {
        let mut state = self.state.write().await;
        state.record("iam:AttachRolePolicy", &format!("{role_name} {policy_arn}"))?;
        if !state.policies.contains_key(policy_arn) {
            return Err(CloudError::not_found(format!("policy {policy_arn}")));
        }
        let role = state
            .roles
            .get_mut(role_name)
            .ok_or_else(|| CloudError::not_found(format!("role {role_name}")))?;
        role.attached.insert(policy_arn.to_string());
        Ok(())
    }

    async fn detach_role_policy(&self, role_name: &str, policy_arn: &str) -> CloudResult<()> {
        let mut state = self.state.write().await;
        state.record("iam:DetachRolePolicy", &format!("{role_name} {policy_arn}"))?;
        let role = state
            .roles
            .get_mut(role_name)
            .ok_or_else(|| CloudError::not_found(format!("role {role_name}")))?;
        if role.attached.remove(policy_arn) {
            Ok(())
        } else {
            Err(CloudError::not_found(format!(
                "attachment of {policy_arn} to {role_name}"
            )))
        }
    }

    async fn list_roles_for_policy(&self, policy_arn: &str) -> CloudResult<Vec<String>> {
        let mut state = self.state.write().await;
        state.record("iam:ListEntitiesForPolicy", policy_arn)?;
        if !state.policies.contains_key(policy_arn) {
            return Err(CloudError::not_found(format!("policy {policy_arn}")));
        }
        Ok(state
            .roles
            .iter()
            .filter(|(_, role)| role.attached.contains(policy_arn))
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn delete_policy(&self, policy_arn: &str) -> CloudResult<()> {
        let mut state = self.state.write().await;
        state.record("iam:DeletePolicy", policy_arn)?;
        if !state.policies.contains_key(policy_arn) {
            return Err(CloudError::not_found(format!("policy {policy_arn}")));
        }
        if state.roles.values().any(|role| role.attached.contains(policy_arn)) {
            return Err(CloudError::fatal(
                "iam:DeletePolicy",
                format!("DeleteConflict: {policy_arn} is still attached"),
            ));
        }
        state.policies.remove(policy_arn);
        Ok(())
    }

    async fn delete_role(&self, name: &str) -> CloudResult<()> {
        let mut state = self.state.write().await;
        state.record("iam:DeleteRole", name)?;
        match state.roles.get(name) {
            None => Err(CloudError::not_found(format!("role {name}"))),
            Some(role) if !role.attached.is_empty() => Err(CloudError::fatal(
                "iam:DeleteRole",
                format!("DeleteConflict: {name} still has attached policies"),
            )),
            Some(_) => {
                state.roles.remove(name);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl SecretsPort for InMemoryCloud {
    async fn put_resource_policy(&self, secret_arn: &str, policy: &PolicyDocument) -> CloudResult<()> {
        let mut state = self.state.write().await;
        state.record("secretsmanager:PutResourcePolicy", secret_arn)?;
        state
            .secret_policies
            .insert(secret_arn.to_string(), policy.clone());
        Ok(())
    }
}

#[async_trait]
impl FunctionPort for InMemoryCloud {
    async fn create_function(&self, spec: &FunctionSpec) -> CloudResult<String> {
        const OP: &str = "lambda:CreateFunction";
        let mut state = self.state.write().await;
        state.record(OP, &spec.name)?;
        if state.functions.contains_key(&spec.name) {
            return Err(CloudError::already_exists(format!("function {}", spec.name)));
        }
        if state.role_by_arn(&spec.role_arn).is_none() {
            return Err(CloudError::fatal(
                OP,
                format!("InvalidParameterValueException: role {} does not exist", spec.role_arn),
            ));
        }
        let arn = format!(
            "arn:{PARTITION}:lambda:{}:{}:function:{}",
            self.identity.region, self.identity.account_id, spec.name
        );
        state.functions.insert(
            spec.name.clone(),
            StoredFunction {
                arn: arn.clone(),
                spec: spec.clone(),
                permissions: BTreeMap::new(),
            },
        );
        Ok(arn)
    }

    async fn get_function_arn(&self, name: &str) -> CloudResult<String> {
        let mut state = self.state.write().await;
        state.record("lambda:GetFunction", name)?;
        state
            .functions
            .get(name)
            .map(|function| function.arn.clone())
            .ok_or_else(|| CloudError::not_found(format!("function {name}")))
    }

    async fn add_permission(&self, permission: &InvokePermission) -> CloudResult<()> {
        let mut state = self.state.write().await;
        state.record("lambda:AddPermission", &permission.function_name)?;
        let function = state
            .functions
            .get_mut(&permission.function_name)
            .ok_or_else(|| CloudError::not_found(format!("function {}", permission.function_name)))?;
        if function.permissions.contains_key(&permission.statement_id) {
            return Err(CloudError::already_exists(format!(
                "permission {} on {}",
                permission.statement_id, permission.function_name
            )));
        }
        function
            .permissions
            .insert(permission.statement_id.clone(), permission.clone());
        Ok(())
    }

    async fn delete_function(&self, name: &str) -> CloudResult<()> {
        let mut state = self.state.write().await;
        state.record("lambda:DeleteFunction", name)?;
        state
            .functions
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| CloudError::not_found(format!("function {name}")))
    }
}

#[async_trait]
impl AgentControlPort for InMemoryCloud {
    async fn create_knowledge_base(&self, spec: &KnowledgeBaseSpec) -> CloudResult<KnowledgeBaseState> {
        const OP: &str = "bedrock:CreateKnowledgeBase";
        let mut state = self.state.write().await;
        state.record(OP, &spec.name)?;
        if state.knowledge_bases.values().any(|kb| kb.spec.name == spec.name) {
            return Err(CloudError::already_exists(format!("knowledge base {}", spec.name)));
        }
        if state.role_by_arn(&spec.role_arn).is_none() {
            return Err(validation(OP, format!("role {} does not exist", spec.role_arn)));
        }
        let id = state.next_id("KB");
        let arn = format!(
            "arn:{PARTITION}:bedrock:{}:{}:knowledge-base/{id}",
            self.identity.region, self.identity.account_id
        );
        let status = self.initial_status();
        state.knowledge_bases.insert(
            id.clone(),
            StoredKnowledgeBase {
                arn: arn.clone(),
                spec: spec.clone(),
                status: status.clone(),
                reads: 0,
                data_sources: BTreeMap::new(),
            },
        );
        Ok(KnowledgeBaseState { id, arn, status })
    }

    async fn get_knowledge_base(&self, id: &str) -> CloudResult<KnowledgeBaseState> {
        let mut state = self.state.write().await;
        state.record("bedrock:GetKnowledgeBase", id)?;
        let kb = state
            .knowledge_bases
            .get_mut(id)
            .ok_or_else(|| CloudError::not_found(format!("knowledge base {id}")))?;
        self.settle(&mut kb.status, &mut kb.reads);
        Ok(KnowledgeBaseState {
            id: id.to_string(),
            arn: kb.arn.clone(),
            status: kb.status.clone(),
        })
    }

    async fn find_knowledge_base(&self, name: &str) -> CloudResult<Option<String>> {
        let mut state = self.state.write().await;
        state.record("bedrock:ListKnowledgeBases", name)?;
        Ok(state
            .knowledge_bases
            .iter()
            .find(|(_, kb)| kb.spec.name == name)
            .map(|(id, _)| id.clone()))
    }

    async fn delete_knowledge_base(&self, id: &str) -> CloudResult<()> {
        let mut state = self.state.write().await;
        state.record("bedrock:DeleteKnowledgeBase", id)?;
        state
            .knowledge_bases
            .remove(id)
            .ok_or_else(|| CloudError::not_found(format!("knowledge base {id}")))?;
        for agent in state.agents.values_mut() {
            agent.knowledge_bases.remove(id);
        }
        Ok(())
    }

    async fn create_data_source(&self, spec: &DataSourceSpec) -> CloudResult<DataSourceState> {
        const OP: &str = "bedrock:CreateDataSource";
        let mut state = self.state.write().await;
        state.record(OP, &spec.name)?;
        let id = state.next_id("DS");
        let initial = self.initial_status();
        let kb = state
            .knowledge_bases
            .get_mut(&spec.knowledge_base_id)
            .ok_or_else(|| CloudError::not_found(format!("knowledge base {}", spec.knowledge_base_id)))?;
        if kb.status != ResourceStatus::Available {
            return Err(validation(
                OP,
                format!("knowledge base {} is {}", spec.knowledge_base_id, kb.status),
            ));
        }
        if kb.data_sources.values().any(|ds| ds.spec.name == spec.name) {
            return Err(CloudError::already_exists(format!("data source {}", spec.name)));
        }
        kb.data_sources.insert(
            id.clone(),
            StoredDataSource {
                spec: spec.clone(),
                status: initial.clone(),
                reads: 0,
            },
        );
        Ok(DataSourceState { id, status: initial })
    }

    async fn get_data_source(&self, knowledge_base_id: &str, id: &str) -> CloudResult<DataSourceState> {
        let mut state = self.state.write().await;
        state.record("bedrock:GetDataSource", id)?;
        let ds = state
            .knowledge_bases
            .get_mut(knowledge_base_id)
            .and_then(|kb| kb.data_sources.get_mut(id))
            .ok_or_else(|| CloudError::not_found(format!("data source {id}")))?;
        self.settle(&mut ds.status, &mut ds.reads);
        Ok(DataSourceState {
            id: id.to_string(),
            status: ds.status.clone(),
        })
    }

    async fn find_data_source(&self, knowledge_base_id: &str, name: &str) -> CloudResult<Option<String>> {
        let mut state = self.state.write().await;
        state.record("bedrock:ListDataSources", name)?;
        let kb = state
            .knowledge_bases
            .get(knowledge_base_id)
            .ok_or_else(|| CloudError::not_found(format!("knowledge base {knowledge_base_id}")))?;
        Ok(kb
            .data_sources
            .iter()
            .find(|(_, ds)| ds.spec.name == name)
            .map(|(id, _)| id.clone()))
    }

    async fn start_ingestion_job(&self, knowledge_base_id: &str, data_source_id: &str) -> CloudResult<String> {
        const OP: &str = "bedrock:StartIngestionJob";
        let mut state = self.state.write().await;
        state.record(OP, data_source_id)?;
        let ds = state
            .knowledge_bases
            .get(knowledge_base_id)
            .and_then(|kb| kb.data_sources.get(data_source_id))
            .ok_or_else(|| CloudError::not_found(format!("data source {data_source_id}")))?;
        if ds.status != ResourceStatus::Available {
            return Err(validation(OP, format!("data source {data_source_id} is {}", ds.status)));
        }
        let job = state.next_id("JOB");
        state.ingestion_jobs.push(job.clone());
        Ok(job)
    }

    async fn create_agent(&self, spec: &AgentSpec) -> CloudResult<AgentState> {
        const OP: &str = "bedrock:CreateAgent";
        let mut state = self.state.write().await;
        state.record(OP, &spec.name)?;
        if state.agents.values().any(|agent| agent.spec.name == spec.name) {
            return Err(CloudError::already_exists(format!("agent {}", spec.name)));
        }
        if state.role_by_arn(&spec.role_arn).is_none() {
            return Err(validation(OP, format!("role {} does not exist", spec.role_arn)));
        }
        let id = state.next_id("AGENT");
        let status = if self.settle_after == 0 {
            AgentStatus::NotPrepared
        } else {
            AgentStatus::Creating
        };
        let mut aliases = BTreeMap::new();
        aliases.insert(
            TEST_ALIAS_ID.to_string(),
            StoredAlias {
                name: TEST_ALIAS_NAME.to_string(),
                status: ResourceStatus::Available,
                reads: 0,
            },
        );
        state.agents.insert(
            id.clone(),
            StoredAgent {
                spec: spec.clone(),
                status: status.clone(),
                reads: 0,
                action_groups: BTreeMap::new(),
                knowledge_bases: BTreeMap::new(),
                aliases,
            },
        );
        Ok(AgentState {
            id,
            name: spec.name.clone(),
            status,
        })
    }

    async fn get_agent(&self, id: &str) -> CloudResult<AgentState> {
        let mut state = self.state.write().await;
        state.record("bedrock:GetAgent", id)?;
        let agent = state
            .agents
            .get_mut(id)
            .ok_or_else(|| CloudError::not_found(format!("agent {id}")))?;
        self.settle_agent(agent);
        Ok(AgentState {
            id: id.to_string(),
            name: agent.spec.name.clone(),
            status: agent.status.clone(),
        })
    }

    async fn find_agent(&self, name: &str) -> CloudResult<Option<String>> {
        let mut state = self.state.write().await;
        state.record("bedrock:ListAgents", name)?;
        Ok(state
            .agents
            .iter()
            .find(|(_, agent)| agent.spec.name == name)
            .map(|(id, _)| id.clone()))
    }

    async fn delete_agent(&self, id: &str) -> CloudResult<()> {
        let mut state = self.state.write().await;
        state.record("bedrock:DeleteAgent", id)?;
        state
            .agents
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| CloudError::not_found(format!("agent {id}")))
    }

    async fn create_action_group(&self, spec: &ActionGroupSpec) -> CloudResult<()> {
        const OP: &str = "bedrock:CreateAgentActionGroup";
        let mut state = self.state.write().await;
        state.record(OP, &spec.name)?;
        let function_exists = state.functions.values().any(|f| f.arn == spec.function_arn);
        let schema_exists = state
            .buckets
            .get(&spec.schema_bucket)
            .is_some_and(|objects| objects.contains_key(&spec.schema_key));
        let agent = state
            .agents
            .get_mut(&spec.agent_id)
            .ok_or_else(|| CloudError::not_found(format!("agent {}", spec.agent_id)))?;
        if !agent.status.is_settled() {
            return Err(validation(OP, format!("agent {} is {}", spec.agent_id, agent.status)));
        }
        if !function_exists {
            return Err(validation(OP, format!("function {} does not exist", spec.function_arn)));
        }
        if !schema_exists {
            return Err(validation(
                OP,
                format!("schema s3://{}/{} does not exist", spec.schema_bucket, spec.schema_key),
            ));
        }
        if agent.action_groups.contains_key(&spec.name) {
            return Err(CloudError::already_exists(format!("action group {}", spec.name)));
        }
        agent.action_groups.insert(spec.name.clone(), spec.clone());
        agent.status = AgentStatus::NotPrepared;
        Ok(())
    }

    async fn associate_knowledge_base(&self, association: &KnowledgeBaseAssociation) -> CloudResult<()> {
        const OP: &str = "bedrock:AssociateAgentKnowledgeBase";
        let mut state = self.state.write().await;
        state.record(OP, &association.knowledge_base_id)?;
        if !state.knowledge_bases.contains_key(&association.knowledge_base_id) {
            return Err(validation(
                OP,
                format!("knowledge base {} does not exist", association.knowledge_base_id),
            ));
        }
        let agent = state
            .agents
            .get_mut(&association.agent_id)
            .ok_or_else(|| CloudError::not_found(format!("agent {}", association.agent_id)))?;
        if !agent.status.is_settled() {
            return Err(validation(OP, format!("agent {} is {}", association.agent_id, agent.status)));
        }
        if agent.knowledge_bases.contains_key(&association.knowledge_base_id) {
            return Err(CloudError::already_exists(format!(
                "association of {} with {}",
                association.knowledge_base_id, association.agent_id
            )));
        }
        agent.knowledge_bases.insert(
            association.knowledge_base_id.clone(),
            association.description.clone(),
        );
        agent.status = AgentStatus::NotPrepared;
        Ok(())
    }

    async fn prepare_agent(&self, id: &str) -> CloudResult<AgentStatus> {
        const OP: &str = "bedrock:PrepareAgent";
        let mut state = self.state.write().await;
        state.record(OP, id)?;
        let agent = state
            .agents
            .get_mut(id)
            .ok_or_else(|| CloudError::not_found(format!("agent {id}")))?;
        if !agent.status.is_settled() {
            return Err(validation(OP, format!("agent {id} is {}", agent.status)));
        }
        agent.status = AgentStatus::Preparing;
        agent.reads = 0;
        if self.settle_after == 0 {
            self.settle_agent(agent);
        }
        Ok(agent.status.clone())
    }

    async fn create_alias(&self, agent_id: &str, name: &str, _description: &str) -> CloudResult<AliasState> {
        const OP: &str = "bedrock:CreateAgentAlias";
        let mut state = self.state.write().await;
        state.record(OP, name)?;
        let alias_id = state.next_id("ALIAS");
        let initial = self.initial_status();
        let agent = state
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| CloudError::not_found(format!("agent {agent_id}")))?;
        if agent.status != AgentStatus::Prepared {
            return Err(validation(
                OP,
                format!("agent {agent_id} is {} and cannot be aliased", agent.status),
            ));
        }
        if agent.aliases.values().any(|alias| alias.name == name) {
            return Err(CloudError::already_exists(format!("alias {name} of {agent_id}")));
        }
        agent.aliases.insert(
            alias_id.clone(),
            StoredAlias {
                name: name.to_string(),
                status: initial.clone(),
                reads: 0,
            },
        );
        Ok(AliasState {
            id: alias_id,
            name: name.to_string(),
            status: initial,
        })
    }

    async fn get_alias(&self, agent_id: &str, alias_id: &str) -> CloudResult<AliasState> {
        let mut state = self.state.write().await;
        state.record("bedrock:GetAgentAlias", alias_id)?;
        let alias = state
            .agents
            .get_mut(agent_id)
            .and_then(|agent| agent.aliases.get_mut(alias_id))
            .ok_or_else(|| CloudError::not_found(format!("alias {alias_id} of {agent_id}")))?;
        self.settle(&mut alias.status, &mut alias.reads);
        Ok(AliasState {
            id: alias_id.to_string(),
            name: alias.name.clone(),
            status: alias.status.clone(),
        })
    }

    async fn list_aliases(&self, agent_id: &str) -> CloudResult<Vec<AliasState>> {
        let mut state = self.state.write().await;
        state.record("bedrock:ListAgentAliases", agent_id)?;
        let agent = state
            .agents
            .get(agent_id)
            .ok_or_else(|| CloudError::not_found(format!("agent {agent_id}")))?;
        Ok(agent
            .aliases
            .iter()
            .map(|(id, alias)| AliasState {
                id: id.clone(),
                name: alias.name.clone(),
                status: alias.status.clone(),
            })
            .collect())
    }

    async fn delete_alias(&self, agent_id: &str, alias_id: &str) -> CloudResult<()> {
        const OP: &str = "bedrock:DeleteAgentAlias";
        let mut state = self.state.write().await;
        state.record(OP, alias_id)?;
        if alias_id == TEST_ALIAS_ID {
            return Err(validation(OP, "the test alias cannot be deleted"));
        }
        state
            .agents
            .get_mut(agent_id)
            .and_then(|agent| agent.aliases.remove(alias_id))
            .map(|_| ())
            .ok_or_else(|| CloudError::not_found(format!("alias {alias_id} of {agent_id}")))
    }
}

#[async_trait]
impl AgentRuntimePort for InMemoryCloud {
    async fn invoke_agent(
        &self,
        target: &AgentTarget,
        session_id: &str,
        question: &str,
        _end_session: bool,
    ) -> CloudResult<AgentCompletion> {
        {
            let mut state = self.state.write().await;
            state.record("bedrock:InvokeAgent", session_id)?;
            let alias_exists = state
                .agents
                .get(&target.agent_id)
                .is_some_and(|agent| agent.aliases.contains_key(&target.agent_alias_id));
            if !alias_exists {
                return Err(CloudError::not_found(format!(
                    "alias {} of {}",
                    target.agent_alias_id, target.agent_id
                )));
            }
        }

        match &*self.reply.read().await {
            Reply::Echo => Ok(AgentCompletion {
                text: format!("You asked: {question}"),
                trace: vec![format!("session {session_id}: answered without tools")],
            }),
            Reply::Fixed(completion) => Ok(completion.clone()),
            Reply::Fail(error) => Err(error.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::policy::RoleKind;

    fn cloud() -> InMemoryCloud {
        InMemoryCloud::new("us-east-1", "123456789012")
    }

    #[tokio::test]
    async fn test_duplicate_names_are_already_exists() {
        let cloud = cloud();
        cloud.create_bucket("b", "us-east-1").await.unwrap();
        let err = cloud.create_bucket("b", "us-east-1").await.unwrap_err();
        assert!(err.is_already_exists());

        let trust = PolicyDocument::trust(RoleKind::Agent);
        cloud.create_role("r", "", &trust).await.unwrap();
        assert!(cloud.create_role("r", "", &trust).await.unwrap_err().is_already_exists());
    }

    #[tokio::test]
    async fn test_missing_resources_are_not_found() {
        let cloud = cloud();
        assert!(cloud.delete_bucket("b").await.unwrap_err().is_not_found());
        assert!(cloud.delete_role("r").await.unwrap_err().is_not_found());
        assert!(cloud.delete_agent("A").await.unwrap_err().is_not_found());
        assert!(cloud.delete_function("f").await.unwrap_err().is_not_found());
        assert!(cloud.is_empty().await);
    }

    #[tokio::test]
    async fn test_bucket_must_be_empty_before_delete() {
        let cloud = cloud();
        cloud.create_bucket("b", "us-east-1").await.unwrap();
        cloud.put_object("b", "k", b"x".to_vec(), "text/plain").await.unwrap();
        assert!(matches!(
            cloud.delete_bucket("b").await,
            Err(CloudError::Fatal { .. })
        ));
        cloud.delete_object("b", "k").await.unwrap();
        cloud.delete_bucket("b").await.unwrap();
    }

    #[tokio::test]
    async fn test_knowledge_base_settles_after_reads() {
        let cloud = cloud().with_settle_after(2);
        let trust = PolicyDocument::trust(RoleKind::KnowledgeBase);
        let role_arn = cloud.create_role("kb", "", &trust).await.unwrap();
        let spec = KnowledgeBaseSpec {
            name: "kb".to_string(),
            description: String::new(),
            role_arn,
            embedding_model_arn: "m".to_string(),
            vector_store: crate::domain::resources::VectorStoreSpec {
                connection_string: "c".to_string(),
                credentials_secret_arn: "s".to_string(),
                namespace: None,
                text_field: "t".to_string(),
                metadata_field: "m".to_string(),
            },
        };
        let created = cloud.create_knowledge_base(&spec).await.unwrap();
        assert_eq!(created.status, ResourceStatus::Creating);

        assert_eq!(cloud.get_knowledge_base(&created.id).await.unwrap().status, ResourceStatus::Creating);
        assert_eq!(cloud.get_knowledge_base(&created.id).await.unwrap().status, ResourceStatus::Creating);
        assert_eq!(cloud.get_knowledge_base(&created.id).await.unwrap().status, ResourceStatus::Available);
    }

    #[tokio::test]
    async fn test_injected_transient_failures_are_consumed() {
        let cloud = cloud();
        cloud.inject_transient("s3:CreateBucket", 1).await;
        assert!(cloud.create_bucket("b", "us-east-1").await.unwrap_err().is_transient());
        cloud.create_bucket("b", "us-east-1").await.unwrap();
        assert_eq!(cloud.count_calls("s3:CreateBucket").await, 2);
    }

    #[tokio::test]
    async fn test_test_alias_cannot_be_deleted() {
        let cloud = cloud();
        let target = cloud.seed_agent("agent", "latest").await;
        assert!(matches!(
            cloud.delete_alias(&target.agent_id, TEST_ALIAS_ID).await,
            Err(CloudError::Fatal { .. })
        ));
        cloud.delete_alias(&target.agent_id, &target.agent_alias_id).await.unwrap();
    }
}
