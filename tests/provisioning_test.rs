use std::sync::Arc;

use virtual_assistant::adapters::in_memory_cloud::InMemoryCloud;
use virtual_assistant::config::Settings;
use virtual_assistant::domain::policy::{Principal, RoleKind, LAMBDA_BASIC_EXECUTION_POLICY_ARN};
use virtual_assistant::domain::ports::CloudClients;
use virtual_assistant::domain::resources::TEST_ALIAS_ID;
use virtual_assistant::provisioning::{ProvisionError, Provisioner, StepOutcome};

const REGION: &str = "us-east-1";
const ACCOUNT: &str = "123456789012";
const SECRET_ARN: &str = "arn:aws:secretsmanager:us-east-1:123456789012:secret:pinekey";

fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.vector_store.connection_string = "https://index.svc.pinecone.io".to_string();
    settings.vector_store.credentials_secret = SECRET_ARN.to_string();
    settings.wait.poll_interval_ms = 1;
    settings.wait.resource_timeout_secs = 5;
    settings.wait.prepare_timeout_secs = 5;
    settings.wait.retry_max_elapsed_secs = 5;
    settings
}

fn provisioner(cloud: &Arc<InMemoryCloud>) -> Provisioner {
    Provisioner::new(CloudClients::from_shared(cloud.clone()), settings())
        .with_callback_package(b"zip".to_vec())
}

fn cloud() -> Arc<InMemoryCloud> {
    Arc::new(InMemoryCloud::new(REGION, ACCOUNT))
}

#[tokio::test]
async fn test_setup_derives_suffixed_names() {
    let cloud = cloud();
    let outputs = provisioner(&cloud).setup().await.unwrap();

    assert_eq!(outputs.bucket, "virtual-assistant-agent-us-east-1-123456789012");
    assert_eq!(outputs.region, REGION);
    assert_eq!(outputs.account_id, ACCOUNT);
    assert_eq!(
        cloud.knowledge_base_names().await,
        vec!["virtual-assistant-kb-us-east-1-123456789012".to_string()]
    );
    assert_eq!(cloud.agent_names().await, vec!["virtual-assistant-agent".to_string()]);
    assert_ne!(outputs.agent_alias_id, TEST_ALIAS_ID);
    assert!(outputs.ingestion_job_id.is_some());
}

#[tokio::test]
async fn test_setup_wires_agent_together() {
    let cloud = cloud();
    let outputs = provisioner(&cloud).setup().await.unwrap();

    let groups = cloud.agent_action_groups(&outputs.agent_id).await;
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].name, "PasswordResetActionGroup");
    assert_eq!(
        cloud.agent_knowledge_bases(&outputs.agent_id).await,
        vec![outputs.knowledge_base_id.clone()]
    );

    let function = "virtual-assistant-agent-us-east-1-123456789012";
    assert_eq!(cloud.function_names().await, vec![function.to_string()]);
    assert_eq!(cloud.function_timeout(function).await, Some(180));
    let permissions = cloud.function_permissions(function).await;
    assert_eq!(permissions.len(), 1);
    assert_eq!(permissions[0].statement_id, "allow_bedrock");
    assert_eq!(permissions[0].principal, "bedrock.amazonaws.com");

    let bucket = &outputs.bucket;
    let schema = cloud
        .object_body(bucket, "virtual-assistant-agent-schema.json")
        .await
        .unwrap();
    let schema: serde_json::Value = serde_json::from_slice(&schema).unwrap();
    assert!(schema["paths"]["/reset"]["post"].is_object());

    let sources = cloud.data_source_specs().await;
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].inclusion_prefixes, vec!["kbdocuments".to_string()]);
    assert_eq!(sources[0].chunking.max_tokens, 512);
    assert_eq!(sources[0].chunking.overlap_percentage, 20);
}

#[tokio::test]
async fn test_roles_trust_their_service_only() {
    let cloud = cloud();
    provisioner(&cloud).setup().await.unwrap();

    let suffix = "us-east-1-123456789012";
    let expectations = [
        (format!("BedrockExecutionRoleForKB_va-{suffix}"), "bedrock.amazonaws.com"),
        (format!("AmazonBedrockExecutionRoleForAgents_va-{suffix}"), "bedrock.amazonaws.com"),
        (format!("virtual-assistant-agent-lambda-role-{suffix}"), "lambda.amazonaws.com"),
    ];
    for (role, service) in expectations {
        let trust = cloud.role_trust(&role).await.unwrap();
        assert_eq!(
            trust.principals(),
            vec![&Principal::Service(service.to_string())],
            "trust of {role}"
        );
    }

    let callback_role = format!("virtual-assistant-agent-lambda-role-{suffix}");
    assert!(cloud
        .attached_policies(&callback_role)
        .await
        .contains(&LAMBDA_BASIC_EXECUTION_POLICY_ARN.to_string()));
}

#[tokio::test]
async fn test_secret_readable_by_knowledge_base_role() {
    let cloud = cloud();
    provisioner(&cloud).setup().await.unwrap();

    let policy = cloud.secret_policy(SECRET_ARN).await.unwrap();
    let role_arn = format!(
        "arn:aws:iam::{ACCOUNT}:role/BedrockExecutionRoleForKB_va-us-east-1-123456789012"
    );
    assert_eq!(policy.principals(), vec![&Principal::Aws(role_arn)]);
    assert_eq!(policy.actions(), vec!["secretsmanager:GetSecretValue"]);
}

#[tokio::test]
async fn test_setup_twice_reuses_everything() {
    let cloud = cloud();
    let provisioner = provisioner(&cloud);

    let first = provisioner.setup().await.unwrap();
    let policies = cloud.policy_names().await;
    let roles = cloud.role_names().await;

    let second = provisioner.setup().await.unwrap();

    assert_eq!(first.knowledge_base_id, second.knowledge_base_id);
    assert_eq!(first.data_source_id, second.data_source_id);
    assert_eq!(first.agent_id, second.agent_id);
    assert_eq!(first.agent_alias_id, second.agent_alias_id);
    assert_eq!(cloud.bucket_count().await, 1);
    assert_eq!(cloud.knowledge_base_names().await.len(), 1);
    assert_eq!(cloud.agent_names().await.len(), 1);
    assert_eq!(cloud.policy_names().await, policies);
    assert_eq!(cloud.role_names().await, roles);
    assert_eq!(cloud.alias_names(&second.agent_id).await.len(), 2);
    assert_eq!(cloud.agent_action_groups(&second.agent_id).await.len(), 1);
}

#[tokio::test]
async fn test_outputs_rediscovers_deployment() {
    let cloud = cloud();
    let provisioner = provisioner(&cloud);

    let setup = provisioner.setup().await.unwrap();
    let outputs = provisioner.outputs().await.unwrap();

    assert_eq!(outputs.agent_id, setup.agent_id);
    assert_eq!(outputs.agent_alias_id, setup.agent_alias_id);
    assert_eq!(outputs.knowledge_base_arn, setup.knowledge_base_arn);
    assert_eq!(outputs.data_source_id, setup.data_source_id);
}

#[tokio::test]
async fn test_outputs_before_setup_is_not_deployed() {
    let cloud = cloud();
    let err = provisioner(&cloud).outputs().await.unwrap_err();
    assert!(matches!(err, ProvisionError::NotDeployed(_)));
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let cloud = cloud();
    cloud.inject_transient("iam:CreateRole", 2).await;
    cloud.inject_transient("bedrock:CreateAgent", 1).await;

    provisioner(&cloud).setup().await.unwrap();

    // Three roles plus the two injected failures
    assert_eq!(cloud.count_calls("iam:CreateRole").await, 5);
    assert_eq!(cloud.count_calls("bedrock:CreateAgent").await, 2);
}

#[tokio::test]
async fn test_preparation_failure_publishes_no_alias() {
    let cloud = Arc::new(InMemoryCloud::new(REGION, ACCOUNT).with_failed_preparation());

    let err = provisioner(&cloud).setup().await.unwrap_err();

    let ProvisionError::PreparationFailed { agent_id } = err else {
        panic!("expected preparation failure, got {err}");
    };
    assert_eq!(cloud.alias_names(&agent_id).await, vec!["AgentTestAlias".to_string()]);
    assert_eq!(cloud.count_calls("bedrock:CreateAgentAlias").await, 0);
}

#[tokio::test]
async fn test_teardown_after_setup_leaves_nothing() {
    let cloud = cloud();
    let provisioner = provisioner(&cloud);
    provisioner.setup().await.unwrap();

    let report = provisioner.teardown().await.unwrap();

    assert!(report.failures().is_empty(), "{:?}", report.failures());
    assert!(!report.deleted().is_empty());
    assert!(cloud.is_empty().await);
}

#[tokio::test]
async fn test_second_teardown_is_noop() {
    let cloud = cloud();
    let provisioner = provisioner(&cloud);
    provisioner.setup().await.unwrap();
    provisioner.teardown().await.unwrap();

    let report = provisioner.teardown().await.unwrap();

    assert!(report.is_noop(), "{:?}", report.steps);
}

#[tokio::test]
async fn test_teardown_of_empty_account() {
    let cloud = cloud();

    let report = provisioner(&cloud).teardown().await.unwrap();

    assert!(report.failures().is_empty());
    assert!(report.deleted().is_empty());
    assert!(report.is_noop());
}

#[tokio::test]
async fn test_teardown_after_partial_setup() {
    let cloud = Arc::new(InMemoryCloud::new(REGION, ACCOUNT).with_failed_preparation());
    let provisioner = provisioner(&cloud);
    assert!(provisioner.setup().await.is_err());

    let report = provisioner.teardown().await.unwrap();

    assert!(report.failures().is_empty(), "{:?}", report.failures());
    assert!(cloud.is_empty().await);
}

#[tokio::test]
async fn test_teardown_reports_failure_and_continues() {
    let cloud = cloud();
    let provisioner = provisioner(&cloud);
    provisioner.setup().await.unwrap();

    let mut settings = settings();
    settings.wait.retry_max_elapsed_secs = 0;
    let impatient = Provisioner::new(CloudClients::from_shared(cloud.clone()), settings);
    cloud.inject_transient("iam:DeleteRole", 100).await;

    let report = impatient.teardown().await.unwrap();

    let failed: Vec<_> = report
        .failures()
        .iter()
        .map(|step| step.step.clone())
        .collect();
    assert_eq!(failed.len(), RoleKind::ALL.len());
    assert!(failed.iter().all(|step| step.starts_with("delete role")));
    assert_eq!(cloud.function_names().await, Vec::<String>::new());
    assert_eq!(cloud.bucket_count().await, 0);
    assert!(report
        .steps
        .iter()
        .any(|step| step.step.starts_with("delete agent") && step.outcome == StepOutcome::Deleted));
}
