//! Reverse-order deletion of everything setup creates
//!
//! Every step is attempted no matter what happened before it. A missing
//! resource counts as already deleted, so a second run reports only
//! [`StepOutcome::Absent`].

use serde::Serialize;
use std::future::Future;
use tracing::{info, warn};

use super::Provisioner;
use crate::domain::error::{CloudError, CloudResult};
use crate::domain::naming::ResourceNames;
use crate::domain::policy::{PolicyKind, RoleKind, LAMBDA_BASIC_EXECUTION_POLICY_ARN};
use crate::domain::resources::TEST_ALIAS_ID;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "message", rename_all = "snake_case")]
pub enum StepOutcome {
    Deleted,
    /// The resource did not exist
    Absent,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeardownStep {
    pub step: String,
    #[serde(flatten)]
    pub outcome: StepOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TeardownReport {
    pub steps: Vec<TeardownStep>,
}

impl TeardownReport {
    fn record(&mut self, step: impl Into<String>, result: CloudResult<()>) -> StepOutcome {
        let step = step.into();
        let outcome = match result {
            Ok(()) => {
                info!(step = %step, "deleted");
                StepOutcome::Deleted
            }
            Err(e) if e.is_not_found() => {
                info!(step = %step, "already absent");
                StepOutcome::Absent
            }
            Err(e) => {
                warn!(step = %step, error = %e, "teardown step failed, continuing");
                StepOutcome::Failed(e.to_string())
            }
        };
        self.steps.push(TeardownStep {
            step,
            outcome: outcome.clone(),
        });
        outcome
    }

    pub fn failures(&self) -> Vec<&TeardownStep> {
        self.steps
            .iter()
            .filter(|s| matches!(s.outcome, StepOutcome::Failed(_)))
            .collect()
    }

    pub fn deleted(&self) -> Vec<&TeardownStep> {
        self.steps
            .iter()
            .filter(|s| s.outcome == StepOutcome::Deleted)
            .collect()
    }

    /// Nothing was left to delete
    pub fn is_noop(&self) -> bool {
        self.steps.iter().all(|s| s.outcome == StepOutcome::Absent)
    }
}

pub(crate) async fn run(prov: &Provisioner, names: &ResourceNames) -> TeardownReport {
    let mut report = TeardownReport::default();

    delete_agent(prov, names, &mut report).await;
    delete_knowledge_base(prov, names, &mut report).await;
    delete_policies(prov, names, &mut report).await;
    delete_roles(prov, names, &mut report).await;

    let function = names.function_name();
    let result = attempt(prov, "lambda:DeleteFunction", || {
        prov.clients.functions.delete_function(&function)
    })
    .await;
    report.record(format!("delete function {function}"), result);

    delete_bucket(prov, names, &mut report).await;

    let failures = report.failures().len();
    if failures == 0 {
        info!(deleted = report.deleted().len(), "teardown complete");
    } else {
        warn!(failures, "teardown finished with failures");
    }
    report
}

async fn attempt<T, F, Fut>(prov: &Provisioner, operation: &str, call: F) -> CloudResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CloudResult<T>>,
{
    prov.retry.run(operation, call).await
}

/// Aliases first, then the agent itself; the built-in test alias goes with the agent
async fn delete_agent(prov: &Provisioner, names: &ResourceNames, report: &mut TeardownReport) {
    let agents = &prov.clients.agents;
    let agent_name = names.agent_name();

    let agent_id = match attempt(prov, "bedrock:ListAgents", || agents.find_agent(&agent_name)).await {
        Ok(Some(id)) => id,
        Ok(None) => {
            report.record(format!("delete aliases of agent {agent_name}"), Err(CloudError::not_found(&agent_name)));
            report.record(format!("delete agent {agent_name}"), Err(CloudError::not_found(&agent_name)));
            return;
        }
        Err(e) => {
            report.record(format!("delete agent {agent_name}"), Err(e));
            return;
        }
    };

    match attempt(prov, "bedrock:ListAgentAliases", || agents.list_aliases(&agent_id)).await {
        Ok(aliases) => {
            for alias in aliases.into_iter().filter(|a| a.id != TEST_ALIAS_ID) {
                let result = attempt(prov, "bedrock:DeleteAgentAlias", || {
                    agents.delete_alias(&agent_id, &alias.id)
                })
                .await;
                report.record(format!("delete alias {} ({})", alias.name, alias.id), result);
            }
        }
        Err(e) => {
            report.record(format!("delete aliases of agent {agent_id}"), Err(e));
        }
    }

    let result = attempt(prov, "bedrock:DeleteAgent", || agents.delete_agent(&agent_id)).await;
    report.record(format!("delete agent {agent_name} ({agent_id})"), result);
}

async fn delete_knowledge_base(prov: &Provisioner, names: &ResourceNames, report: &mut TeardownReport) {
    let agents = &prov.clients.agents;
    let name = names.knowledge_base();
    let step = format!("delete knowledge base {name}");

    let result = match attempt(prov, "bedrock:ListKnowledgeBases", || agents.find_knowledge_base(&name)).await {
        Ok(Some(id)) => {
            attempt(prov, "bedrock:DeleteKnowledgeBase", || agents.delete_knowledge_base(&id)).await
        }
        Ok(None) => Err(CloudError::not_found(&name)),
        Err(e) => Err(e),
    };
    report.record(step, result);
}

/// Detach each policy from whatever roles hold it, then delete it
async fn delete_policies(prov: &Provisioner, names: &ResourceNames, report: &mut TeardownReport) {
    let iam = &prov.clients.iam;

    for kind in PolicyKind::ALL {
        let policy_name = names.policy_name(kind);
        let policy_arn = names.policy_arn(kind);

        match attempt(prov, "iam:ListEntitiesForPolicy", || iam.list_roles_for_policy(&policy_arn)).await {
            Ok(roles) => {
                for role in roles {
                    let result = attempt(prov, "iam:DetachRolePolicy", || {
                        iam.detach_role_policy(&role, &policy_arn)
                    })
                    .await;
                    report.record(format!("detach policy {policy_name} from {role}"), result);
                }
            }
            Err(e) if e.is_not_found() => {
                report.record(format!("delete policy {policy_name}"), Err(e));
                continue;
            }
            Err(e) => {
                report.record(format!("detach policy {policy_name}"), Err(e));
            }
        }

        let result = attempt(prov, "iam:DeletePolicy", || iam.delete_policy(&policy_arn)).await;
        report.record(format!("delete policy {policy_name}"), result);
    }

    let callback_role = names.role_name(RoleKind::Callback);
    let result = attempt(prov, "iam:DetachRolePolicy", || {
        iam.detach_role_policy(&callback_role, LAMBDA_BASIC_EXECUTION_POLICY_ARN)
    })
    .await;
    report.record(format!("detach managed execution policy from {callback_role}"), result);
}

async fn delete_roles(prov: &Provisioner, names: &ResourceNames, report: &mut TeardownReport) {
    for kind in RoleKind::ALL {
        let role = names.role_name(kind);
        let result = attempt(prov, "iam:DeleteRole", || prov.clients.iam.delete_role(&role)).await;
        report.record(format!("delete role {role}"), result);
    }
}

/// Empty the bucket object by object, then delete it
async fn delete_bucket(prov: &Provisioner, names: &ResourceNames, report: &mut TeardownReport) {
    let storage = &prov.clients.storage;
    let bucket = names.bucket();

    match attempt(prov, "s3:ListObjectsV2", || storage.list_objects(&bucket)).await {
        Ok(keys) => {
            for key in keys {
                let result = attempt(prov, "s3:DeleteObject", || storage.delete_object(&bucket, &key)).await;
                report.record(format!("delete object {key}"), result);
            }
        }
        Err(e) if e.is_not_found() => {}
        Err(e) => {
            report.record(format!("empty bucket {bucket}"), Err(e));
        }
    }

    let result = attempt(prov, "s3:DeleteBucket", || storage.delete_bucket(&bucket)).await;
    report.record(format!("delete bucket {bucket}"), result);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_classifies_outcomes() {
        let mut report = TeardownReport::default();
        assert_eq!(report.record("a", Ok(())), StepOutcome::Deleted);
        assert_eq!(report.record("b", Err(CloudError::not_found("b"))), StepOutcome::Absent);
        assert!(matches!(
            report.record("c", Err(CloudError::fatal("op", "denied"))),
            StepOutcome::Failed(_)
        ));
        assert_eq!(report.failures().len(), 1);
        assert_eq!(report.deleted().len(), 1);
        assert!(!report.is_noop());
    }

    #[test]
    fn test_empty_report_is_noop() {
        let mut report = TeardownReport::default();
        report.record("x", Err(CloudError::not_found("x")));
        assert!(report.is_noop());
    }

    #[test]
    fn test_report_serializes_outcomes() {
        let mut report = TeardownReport::default();
        report.record("delete bucket b", Err(CloudError::fatal("s3:DeleteBucket", "denied")));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["steps"][0]["step"], "delete bucket b");
        assert_eq!(json["steps"][0]["outcome"], "failed");
    }
}
