//! Idempotent creation of the deployment's IAM policies and roles

use std::collections::BTreeSet;
use tracing::{debug, info};

use super::error::{ProvisionResult, StepContext};
use super::wait::RetryPolicy;
use crate::domain::error::CloudResultExt;
use crate::domain::naming::ResourceNames;
use crate::domain::policy::{PolicyDocument, PolicyInputs, PolicyKind, RoleKind, LAMBDA_BASIC_EXECUTION_POLICY_ARN};
use crate::domain::ports::IamPort;
use crate::domain::resources::{PolicyDescriptor, RoleDescriptor};

pub struct RoleBuilder<'a> {
    iam: &'a dyn IamPort,
    names: &'a ResourceNames,
    retry: RetryPolicy,
}

impl<'a> RoleBuilder<'a> {
    pub fn new(iam: &'a dyn IamPort, names: &'a ResourceNames, retry: RetryPolicy) -> Self {
        Self { iam, names, retry }
    }

    /// Create the policy, or reuse the one a previous run created under the same name
    pub async fn ensure_policy(&self, kind: PolicyKind, inputs: &PolicyInputs) -> ProvisionResult<PolicyDescriptor> {
        let name = self.names.policy_name(kind);
        let document = kind.document(inputs);

        let created = self
            .retry
            .run("iam:CreatePolicy", || {
                self.iam.create_policy(&name, kind.description(), &document)
            })
            .await
            .tolerate_existing()
            .step(format!("create policy {name}"))?;

        let arn = match created {
            Some(arn) => {
                info!(policy = %name, "created policy");
                arn
            }
            None => {
                debug!(policy = %name, "policy already exists");
                self.names.policy_arn(kind)
            }
        };

        Ok(PolicyDescriptor { name, document, arn })
    }

    /// Create the role with its trust document and attach every policy it needs
    pub async fn ensure_role(&self, kind: RoleKind, inputs: &PolicyInputs) -> ProvisionResult<RoleDescriptor> {
        let name = self.names.role_name(kind);
        let trust_document = PolicyDocument::trust(kind);
        let description = format!("Execution role for the {kind} of {}", self.names.agent_name());

        let created = self
            .retry
            .run("iam:CreateRole", || {
                self.iam.create_role(&name, &description, &trust_document)
            })
            .await
            .tolerate_existing()
            .step(format!("create role {name}"))?;

        let arn = match created {
            Some(arn) => {
                info!(role = %name, "created role");
                arn
            }
            None => {
                debug!(role = %name, "role already exists");
                self.iam
                    .get_role_arn(&name)
                    .await
                    .step(format!("read role {name}"))?
            }
        };

        let mut policy_arns: Vec<String> = Vec::new();
        for policy_kind in kind.policies() {
            policy_arns.push(self.ensure_policy(*policy_kind, inputs).await?.arn);
        }
        if kind == RoleKind::Callback {
            policy_arns.push(LAMBDA_BASIC_EXECUTION_POLICY_ARN.to_string());
        }

        let mut attached_policies = BTreeSet::new();
        for policy_arn in policy_arns {
            self.retry
                .run("iam:AttachRolePolicy", || {
                    self.iam.attach_role_policy(&name, &policy_arn)
                })
                .await
                .step(format!("attach {policy_arn} to {name}"))?;
            debug!(role = %name, policy = %policy_arn, "attached policy");
            attached_policies.insert(policy_arn);
        }

        Ok(RoleDescriptor {
            kind,
            name,
            trust_document,
            attached_policies,
            arn,
        })
    }
}
