use async_trait::async_trait;
use aws_sdk_iam::types::EntityType;

use super::{build_error, classify, required, AwsCloud, Present};
use crate::domain::error::CloudResult;
use crate::domain::policy::PolicyDocument;
use crate::domain::ports::IamPort;

#[async_trait]
impl IamPort for AwsCloud {
    async fn create_policy(
        &self,
        name: &str,
        description: &str,
        document: &PolicyDocument,
    ) -> CloudResult<String> {
        const OP: &str = "iam:CreatePolicy";
        let document = document.to_json().map_err(|e| build_error(OP, e))?;

        let output = self
            .iam
            .create_policy()
            .policy_name(name)
            .description(description)
            .policy_document(document)
            .send()
            .await
            .map_err(|e| classify(OP, &format!("policy {name}"), e))?;

        let policy = required(output.policy(), OP, "policy")?;
        Ok(required(policy.arn(), OP, "policy arn")?.to_string())
    }

    async fn create_role(
        &self,
        name: &str,
        description: &str,
        trust: &PolicyDocument,
    ) -> CloudResult<String> {
        const OP: &str = "iam:CreateRole";
        let trust = trust.to_json().map_err(|e| build_error(OP, e))?;

        let output = self
            .iam
            .create_role()
            .role_name(name)
            .description(description)
            .assume_role_policy_document(trust)
            .send()
            .await
            .map_err(|e| classify(OP, &format!("role {name}"), e))?;

        let role = required(output.role(), OP, "role")?;
        Ok(required(role.arn(), OP, "role arn")?.to_string())
    }

    async fn get_role_arn(&self, name: &str) -> CloudResult<String> {
        const OP: &str = "iam:GetRole";
        let output = self
            .iam
            .get_role()
            .role_name(name)
            .send()
            .await
            .map_err(|e| classify(OP, &format!("role {name}"), e))?;

        let role = required(output.role(), OP, "role")?;
        Ok(required(role.arn(), OP, "role arn")?.to_string())
    }

    async fn attach_role_policy(&self, role_name: &str, policy_arn: &str) -> CloudResult<()> {
        self.iam
            .attach_role_policy()
            .role_name(role_name)
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(|e| classify("iam:AttachRolePolicy", &format!("role {role_name}"), e))?;
        Ok(())
    }

    async fn detach_role_policy(&self, role_name: &str, policy_arn: &str) -> CloudResult<()> {
        self.iam
            .detach_role_policy()
            .role_name(role_name)
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(|e| {
                classify(
                    "iam:DetachRolePolicy",
                    &format!("attachment of {policy_arn} to {role_name}"),
                    e,
                )
            })?;
        Ok(())
    }

    async fn list_roles_for_policy(&self, policy_arn: &str) -> CloudResult<Vec<String>> {
        const OP: &str = "iam:ListEntitiesForPolicy";
        let mut roles = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let output = self
                .iam
                .list_entities_for_policy()
                .policy_arn(policy_arn)
                .entity_filter(EntityType::Role)
                .set_marker(marker.take())
                .send()
                .await
                .map_err(|e| classify(OP, &format!("policy {policy_arn}"), e))?;

            roles.extend(
                output
                    .policy_roles()
                    .iter()
                    .filter_map(|role| role.role_name().present().map(str::to_string)),
            );

            match output.marker() {
                Some(next) => marker = Some(next.to_string()),
                None => break,
            }
        }

        Ok(roles)
    }

    async fn delete_policy(&self, policy_arn: &str) -> CloudResult<()> {
        self.iam
            .delete_policy()
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(|e| classify("iam:DeletePolicy", &format!("policy {policy_arn}"), e))?;
        Ok(())
    }

    async fn delete_role(&self, name: &str) -> CloudResult<()> {
        self.iam
            .delete_role()
            .role_name(name)
            .send()
            .await
            .map_err(|e| classify("iam:DeleteRole", &format!("role {name}"), e))?;
        Ok(())
    }
}
