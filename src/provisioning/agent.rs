//! Agent, callback function, action group, preparation and alias

use tracing::{debug, info};

use super::error::{ProvisionError, ProvisionResult, StepContext};
use super::roles::RoleBuilder;
use super::wait::{poll_until, Probe};
use super::Provisioner;
use crate::callback::{ACTION_GROUP_DESCRIPTION, ACTION_GROUP_NAME};
use crate::domain::error::CloudResultExt;
use crate::domain::naming::ResourceNames;
use crate::domain::policy::RoleKind;
use crate::domain::resources::{
    ActionGroupSpec, Agent, AgentSpec, AgentStatus, FunctionSpec, InvokePermission, KnowledgeBase,
    KnowledgeBaseAssociation, ResourceStatus, DRAFT_VERSION, TEST_ALIAS_ID,
};

pub const INVOKE_PERMISSION_STATEMENT: &str = "allow_bedrock";
pub const AGENT_SERVICE_PRINCIPAL: &str = "bedrock.amazonaws.com";
const ALIAS_DESCRIPTION: &str = "Alias for latest version of the agent";

/// A prepared agent and the alias that points at it
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedAgent {
    pub agent: Agent,
    pub alias_id: String,
}

pub async fn provision(
    prov: &Provisioner,
    names: &ResourceNames,
    knowledge_base: &KnowledgeBase,
) -> ProvisionResult<PublishedAgent> {
    let roles = RoleBuilder::new(prov.clients.iam.as_ref(), names, prov.retry);
    let agent_role = roles
        .ensure_role(RoleKind::Agent, &prov.policy_inputs(names, Some(&knowledge_base.arn)))
        .await?;
    let agent_id = create_agent(prov, names, &agent_role.arn).await?;

    let callback_role = roles
        .ensure_role(RoleKind::Callback, &prov.policy_inputs(names, None))
        .await?;
    let function_arn = deploy_callback(prov, names, &callback_role.arn).await?;

    add_action_group(prov, names, &agent_id, &function_arn).await?;
    allow_agent_invocation(prov, names, &agent_id).await?;
    associate_knowledge_base(prov, &agent_id, &knowledge_base.id).await?;

    prepare(prov, &agent_id).await?;
    let alias_id = publish_alias(prov, &agent_id).await?;

    let deployment = &prov.settings.deployment;
    Ok(PublishedAgent {
        agent: Agent {
            id: agent_id,
            instruction: deployment.instruction.clone(),
            foundation_model: deployment.foundation_model.clone(),
            action_groups: vec![ACTION_GROUP_NAME.to_string()],
            knowledge_base_associations: vec![knowledge_base.id.clone()],
            aliases: vec![alias_id.clone()],
        },
        alias_id,
    })
}

/// Create the draft agent and wait until it accepts edits
async fn create_agent(prov: &Provisioner, names: &ResourceNames, role_arn: &str) -> ProvisionResult<String> {
    let agents = &prov.clients.agents;
    let deployment = &prov.settings.deployment;
    let spec = AgentSpec {
        name: names.agent_name(),
        role_arn: role_arn.to_string(),
        description: deployment.description.clone(),
        idle_session_ttl_secs: deployment.idle_session_ttl_secs,
        foundation_model: deployment.foundation_model.clone(),
        instruction: deployment.instruction.clone(),
    };

    let created = prov
        .retry
        .run("bedrock:CreateAgent", || agents.create_agent(&spec))
        .await
        .tolerate_existing()
        .step(format!("create agent {}", spec.name))?;

    let id = match created {
        Some(state) => {
            info!(agent = %spec.name, id = %state.id, "created agent");
            state.id
        }
        None => {
            let id = agents
                .find_agent(&spec.name)
                .await
                .step("look up agent")?
                .ok_or_else(|| ProvisionError::NotDeployed(format!("agent {}", spec.name)))?;
            info!(agent = %spec.name, id = %id, "reusing agent");
            id
        }
    };

    let what = format!("agent {id}");
    poll_until(&what, prov.resource_wait, || async {
        let state = agents.get_agent(&id).await.step("read agent")?;
        Ok(if state.status.is_settled() {
            Probe::Ready(())
        } else if state.status == AgentStatus::Failed {
            Probe::Failed(state.status.to_string())
        } else {
            Probe::Pending(state.status.to_string())
        })
    })
    .await?;

    Ok(id)
}

async fn read_package(prov: &Provisioner) -> ProvisionResult<Vec<u8>> {
    if let Some(package) = &prov.callback_package {
        return Ok(package.clone());
    }
    let path = &prov.settings.deployment.callback_artifact;
    tokio::fs::read(path).await.map_err(|source| ProvisionError::Io {
        path: path.clone(),
        source,
    })
}

/// Deploy the password-reset function; returns its ARN
async fn deploy_callback(prov: &Provisioner, names: &ResourceNames, role_arn: &str) -> ProvisionResult<String> {
    let functions = &prov.clients.functions;
    let deployment = &prov.settings.deployment;
    let spec = FunctionSpec {
        name: names.function_name(),
        role_arn: role_arn.to_string(),
        runtime: deployment.callback_runtime.clone(),
        handler: deployment.callback_handler.clone(),
        timeout_secs: deployment.callback_timeout_secs,
        description: format!("Password reset action of {}", names.agent_name()),
        package: read_package(prov).await?,
    };

    // A fresh role is not assumable right away; that failure is classified transient
    let created = prov
        .retry
        .run("lambda:CreateFunction", || functions.create_function(&spec))
        .await
        .tolerate_existing()
        .step(format!("create function {}", spec.name))?;

    match created {
        Some(arn) => {
            info!(function = %spec.name, "created callback function");
            Ok(arn)
        }
        None => {
            info!(function = %spec.name, "reusing callback function");
            functions
                .get_function_arn(&spec.name)
                .await
                .step(format!("read function {}", spec.name))
        }
    }
}

async fn add_action_group(
    prov: &Provisioner,
    names: &ResourceNames,
    agent_id: &str,
    function_arn: &str,
) -> ProvisionResult<()> {
    let spec = ActionGroupSpec {
        agent_id: agent_id.to_string(),
        agent_version: DRAFT_VERSION.to_string(),
        name: ACTION_GROUP_NAME.to_string(),
        description: ACTION_GROUP_DESCRIPTION.to_string(),
        function_arn: function_arn.to_string(),
        schema_bucket: names.bucket(),
        schema_key: names.schema_key(),
    };

    let created = prov
        .retry
        .run("bedrock:CreateAgentActionGroup", || {
            prov.clients.agents.create_action_group(&spec)
        })
        .await
        .tolerate_existing()
        .step(format!("create action group {ACTION_GROUP_NAME}"))?;

    if created.is_some() {
        info!(agent_id, action_group = ACTION_GROUP_NAME, "created action group");
    } else {
        debug!(agent_id, action_group = ACTION_GROUP_NAME, "action group already exists");
    }
    Ok(())
}

/// Let the agent service invoke the callback, scoped to this agent
async fn allow_agent_invocation(prov: &Provisioner, names: &ResourceNames, agent_id: &str) -> ProvisionResult<()> {
    let permission = InvokePermission {
        function_name: names.function_name(),
        statement_id: INVOKE_PERMISSION_STATEMENT.to_string(),
        action: "lambda:InvokeFunction".to_string(),
        principal: AGENT_SERVICE_PRINCIPAL.to_string(),
        source_arn: names.agent_arn(agent_id),
    };

    let added = prov
        .retry
        .run("lambda:AddPermission", || {
            prov.clients.functions.add_permission(&permission)
        })
        .await
        .tolerate_existing()
        .step("allow the agent to invoke the callback")?;

    if added.is_some() {
        info!(function = %permission.function_name, source = %permission.source_arn, "granted invoke permission");
    }
    Ok(())
}

async fn associate_knowledge_base(prov: &Provisioner, agent_id: &str, knowledge_base_id: &str) -> ProvisionResult<()> {
    let association = KnowledgeBaseAssociation {
        agent_id: agent_id.to_string(),
        agent_version: DRAFT_VERSION.to_string(),
        knowledge_base_id: knowledge_base_id.to_string(),
        description: prov.settings.deployment.knowledge_base_instruction.clone(),
    };

    let associated = prov
        .retry
        .run("bedrock:AssociateAgentKnowledgeBase", || {
            prov.clients.agents.associate_knowledge_base(&association)
        })
        .await
        .tolerate_existing()
        .step("associate knowledge base")?;

    if associated.is_some() {
        info!(agent_id, knowledge_base_id, "associated knowledge base");
    }
    Ok(())
}

/// Compile the draft and wait for `PREPARED`; `FAILED` aborts setup
async fn prepare(prov: &Provisioner, agent_id: &str) -> ProvisionResult<()> {
    let agents = &prov.clients.agents;
    let status = prov
        .retry
        .run("bedrock:PrepareAgent", || agents.prepare_agent(agent_id))
        .await
        .step(format!("prepare agent {agent_id}"))?;
    info!(agent_id, status = %status, "preparing agent");

    let what = format!("preparation of agent {agent_id}");
    let outcome = poll_until(&what, prov.prepare_wait, || async {
        let state = agents.get_agent(agent_id).await.step("read agent")?;
        Ok(match state.status {
            AgentStatus::Prepared => Probe::Ready(()),
            AgentStatus::Failed => Probe::Failed(state.status.to_string()),
            other => Probe::Pending(other.to_string()),
        })
    })
    .await;

    match outcome {
        Ok(()) => {
            info!(agent_id, "agent prepared");
            Ok(())
        }
        Err(ProvisionError::ResourceFailed { .. }) => Err(ProvisionError::PreparationFailed {
            agent_id: agent_id.to_string(),
        }),
        Err(e) => Err(e),
    }
}

/// Reuse the configured alias or create it, then wait until it is usable
async fn publish_alias(prov: &Provisioner, agent_id: &str) -> ProvisionResult<String> {
    let agents = &prov.clients.agents;
    let alias_name = &prov.settings.deployment.alias_name;

    let existing = find_alias(prov, agent_id, alias_name).await?;
    let alias_id = match existing {
        Some(id) => {
            info!(agent_id, alias = %alias_name, id = %id, "reusing alias");
            id
        }
        None => {
            let created = prov
                .retry
                .run("bedrock:CreateAgentAlias", || {
                    agents.create_alias(agent_id, alias_name, ALIAS_DESCRIPTION)
                })
                .await
                .tolerate_existing()
                .step(format!("create alias {alias_name}"))?;
            match created {
                Some(alias) => {
                    info!(agent_id, alias = %alias_name, id = %alias.id, "created alias");
                    alias.id
                }
                None => find_alias(prov, agent_id, alias_name)
                    .await?
                    .ok_or_else(|| ProvisionError::NotDeployed(format!("alias {alias_name}")))?,
            }
        }
    };

    let what = format!("alias {alias_id}");
    poll_until(&what, prov.resource_wait, || async {
        let state = agents.get_alias(agent_id, &alias_id).await.step("read alias")?;
        Ok(match state.status {
            ResourceStatus::Available => Probe::Ready(()),
            ResourceStatus::Failed => Probe::Failed(state.status.to_string()),
            other => Probe::Pending(other.to_string()),
        })
    })
    .await?;

    Ok(alias_id)
}

async fn find_alias(prov: &Provisioner, agent_id: &str, alias_name: &str) -> ProvisionResult<Option<String>> {
    let aliases = prov
        .clients
        .agents
        .list_aliases(agent_id)
        .await
        .step("list agent aliases")?;
    Ok(aliases
        .into_iter()
        .find(|alias| alias.id != TEST_ALIAS_ID && alias.name == alias_name)
        .map(|alias| alias.id))
}
