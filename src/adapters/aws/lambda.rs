use async_trait::async_trait;
use aws_sdk_lambda::primitives::Blob;
use aws_sdk_lambda::types::{FunctionCode, Runtime};

use super::{classify, required, AwsCloud};
use crate::domain::error::CloudResult;
use crate::domain::ports::FunctionPort;
use crate::domain::resources::{FunctionSpec, InvokePermission};

#[async_trait]
impl FunctionPort for AwsCloud {
    async fn create_function(&self, spec: &FunctionSpec) -> CloudResult<String> {
        const OP: &str = "lambda:CreateFunction";
        let output = self
            .lambda
            .create_function()
            .function_name(&spec.name)
            .runtime(Runtime::from(spec.runtime.as_str()))
            .role(&spec.role_arn)
            .handler(&spec.handler)
            .timeout(spec.timeout_secs as i32)
            .description(&spec.description)
            .code(FunctionCode::builder().zip_file(Blob::new(spec.package.clone())).build())
            .send()
            .await
            .map_err(|e| classify(OP, &format!("function {}", spec.name), e))?;

        Ok(required(output.function_arn(), OP, "function arn")?.to_string())
    }

    async fn get_function_arn(&self, name: &str) -> CloudResult<String> {
        const OP: &str = "lambda:GetFunction";
        let output = self
            .lambda
            .get_function()
            .function_name(name)
            .send()
            .await
            .map_err(|e| classify(OP, &format!("function {name}"), e))?;

        let configuration = required(output.configuration(), OP, "configuration")?;
        Ok(required(configuration.function_arn(), OP, "function arn")?.to_string())
    }

    async fn add_permission(&self, permission: &InvokePermission) -> CloudResult<()> {
        self.lambda
            .add_permission()
            .function_name(&permission.function_name)
            .statement_id(&permission.statement_id)
            .action(&permission.action)
            .principal(&permission.principal)
            .source_arn(&permission.source_arn)
            .send()
            .await
            .map_err(|e| {
                classify(
                    "lambda:AddPermission",
                    &format!(
                        "permission {} on {}",
                        permission.statement_id, permission.function_name
                    ),
                    e,
                )
            })?;
        Ok(())
    }

    async fn delete_function(&self, name: &str) -> CloudResult<()> {
        self.lambda
            .delete_function()
            .function_name(name)
            .send()
            .await
            .map_err(|e| classify("lambda:DeleteFunction", &format!("function {name}"), e))?;
        Ok(())
    }
}
