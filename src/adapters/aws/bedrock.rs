use async_trait::async_trait;
use aws_sdk_bedrockagent::types::{
    ActionGroupExecutor, ApiSchema, ChunkingConfiguration, ChunkingStrategy, DataSourceConfiguration,
    DataSourceType, FixedSizeChunkingConfiguration, KnowledgeBaseConfiguration,
    KnowledgeBaseStorageType, KnowledgeBaseType, PineconeConfiguration, PineconeFieldMapping,
    S3DataSourceConfiguration, S3Identifier, StorageConfiguration, VectorIngestionConfiguration,
    VectorKnowledgeBaseConfiguration,
};

use super::{build_error, classify, required, AwsCloud, Present};
use crate::domain::error::CloudResult;
use crate::domain::ports::AgentControlPort;
use crate::domain::resources::{
    ActionGroupSpec, AgentSpec, AgentState, AgentStatus, AliasState, DataSourceSpec,
    DataSourceState, KnowledgeBaseAssociation, KnowledgeBaseSpec, KnowledgeBaseState,
    ResourceStatus,
};

fn knowledge_base_state(
    kb: &aws_sdk_bedrockagent::types::KnowledgeBase,
    op: &str,
) -> CloudResult<KnowledgeBaseState> {
    Ok(KnowledgeBaseState {
        id: required(kb.knowledge_base_id(), op, "knowledge base id")?.to_string(),
        arn: required(kb.knowledge_base_arn(), op, "knowledge base arn")?.to_string(),
        status: ResourceStatus::from_provider(required(kb.status(), op, "status")?.as_str()),
    })
}

fn data_source_state(
    ds: &aws_sdk_bedrockagent::types::DataSource,
    op: &str,
) -> CloudResult<DataSourceState> {
    Ok(DataSourceState {
        id: required(ds.data_source_id(), op, "data source id")?.to_string(),
        status: ResourceStatus::from_provider(required(ds.status(), op, "status")?.as_str()),
    })
}

fn agent_state(agent: &aws_sdk_bedrockagent::types::Agent, op: &str) -> CloudResult<AgentState> {
    Ok(AgentState {
        id: required(agent.agent_id(), op, "agent id")?.to_string(),
        name: required(agent.agent_name(), op, "agent name")?.to_string(),
        status: AgentStatus::from_provider(required(agent.agent_status(), op, "agent status")?.as_str()),
    })
}

fn alias_state(alias: &aws_sdk_bedrockagent::types::AgentAlias, op: &str) -> CloudResult<AliasState> {
    Ok(AliasState {
        id: required(alias.agent_alias_id(), op, "alias id")?.to_string(),
        name: required(alias.agent_alias_name(), op, "alias name")?.to_string(),
        status: ResourceStatus::from_provider(
            required(alias.agent_alias_status(), op, "alias status")?.as_str(),
        ),
    })
}

#[async_trait]
impl AgentControlPort for AwsCloud {
    async fn create_knowledge_base(&self, spec: &KnowledgeBaseSpec) -> CloudResult<KnowledgeBaseState> {
        const OP: &str = "bedrock:CreateKnowledgeBase";

        let vector = VectorKnowledgeBaseConfiguration::builder()
            .embedding_model_arn(&spec.embedding_model_arn)
            .build()
            .map_err(|e| build_error(OP, e))?;
        let kb_configuration = KnowledgeBaseConfiguration::builder()
            .r#type(KnowledgeBaseType::Vector)
            .vector_knowledge_base_configuration(vector)
            .build()
            .map_err(|e| build_error(OP, e))?;

        let store = &spec.vector_store;
        let field_mapping = PineconeFieldMapping::builder()
            .text_field(&store.text_field)
            .metadata_field(&store.metadata_field)
            .build()
            .map_err(|e| build_error(OP, e))?;
        let pinecone = PineconeConfiguration::builder()
            .connection_string(&store.connection_string)
            .credentials_secret_arn(&store.credentials_secret_arn)
            .set_namespace(store.namespace.clone())
            .field_mapping(field_mapping)
            .build()
            .map_err(|e| build_error(OP, e))?;
        let storage = StorageConfiguration::builder()
            .r#type(KnowledgeBaseStorageType::Pinecone)
            .pinecone_configuration(pinecone)
            .build()
            .map_err(|e| build_error(OP, e))?;

        let output = self
            .agent
            .create_knowledge_base()
            .name(&spec.name)
            .description(&spec.description)
            .role_arn(&spec.role_arn)
            .knowledge_base_configuration(kb_configuration)
            .storage_configuration(storage)
            .tags("Name", &spec.name)
            .send()
            .await
            .map_err(|e| classify(OP, &format!("knowledge base {}", spec.name), e))?;

        knowledge_base_state(required(output.knowledge_base(), OP, "knowledge base")?, OP)
    }

    async fn get_knowledge_base(&self, id: &str) -> CloudResult<KnowledgeBaseState> {
        const OP: &str = "bedrock:GetKnowledgeBase";
        let output = self
            .agent
            .get_knowledge_base()
            .knowledge_base_id(id)
            .send()
            .await
            .map_err(|e| classify(OP, &format!("knowledge base {id}"), e))?;

        knowledge_base_state(required(output.knowledge_base(), OP, "knowledge base")?, OP)
    }

    async fn find_knowledge_base(&self, name: &str) -> CloudResult<Option<String>> {
        const OP: &str = "bedrock:ListKnowledgeBases";
        let mut next_token: Option<String> = None;

        loop {
            let output = self
                .agent
                .list_knowledge_bases()
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| classify(OP, "knowledge bases", e))?;

            for summary in output.knowledge_base_summaries() {
                if summary.name().present() == Some(name) {
                    return Ok(summary.knowledge_base_id().present().map(str::to_string));
                }
            }

            match output.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => return Ok(None),
            }
        }
    }

    async fn delete_knowledge_base(&self, id: &str) -> CloudResult<()> {
        self.agent
            .delete_knowledge_base()
            .knowledge_base_id(id)
            .send()
            .await
            .map_err(|e| classify("bedrock:DeleteKnowledgeBase", &format!("knowledge base {id}"), e))?;
        Ok(())
    }

    async fn create_data_source(&self, spec: &DataSourceSpec) -> CloudResult<DataSourceState> {
        const OP: &str = "bedrock:CreateDataSource";

        let s3 = S3DataSourceConfiguration::builder()
            .bucket_arn(&spec.bucket_arn)
            .set_inclusion_prefixes(Some(spec.inclusion_prefixes.clone()))
            .build()
            .map_err(|e| build_error(OP, e))?;
        let source = DataSourceConfiguration::builder()
            .r#type(DataSourceType::S3)
            .s3_configuration(s3)
            .build()
            .map_err(|e| build_error(OP, e))?;

        let fixed = FixedSizeChunkingConfiguration::builder()
            .max_tokens(spec.chunking.max_tokens as i32)
            .overlap_percentage(spec.chunking.overlap_percentage as i32)
            .build()
            .map_err(|e| build_error(OP, e))?;
        let chunking = ChunkingConfiguration::builder()
            .chunking_strategy(ChunkingStrategy::FixedSize)
            .fixed_size_chunking_configuration(fixed)
            .build()
            .map_err(|e| build_error(OP, e))?;
        let ingestion = VectorIngestionConfiguration::builder()
            .chunking_configuration(chunking)
            .build();

        let output = self
            .agent
            .create_data_source()
            .knowledge_base_id(&spec.knowledge_base_id)
            .name(&spec.name)
            .description(&spec.description)
            .data_source_configuration(source)
            .vector_ingestion_configuration(ingestion)
            .send()
            .await
            .map_err(|e| classify(OP, &format!("data source {}", spec.name), e))?;

        data_source_state(required(output.data_source(), OP, "data source")?, OP)
    }

    async fn get_data_source(&self, knowledge_base_id: &str, id: &str) -> CloudResult<DataSourceState> {
        const OP: &str = "bedrock:GetDataSource";
        let output = self
            .agent
            .get_data_source()
            .knowledge_base_id(knowledge_base_id)
            .data_source_id(id)
            .send()
            .await
            .map_err(|e| classify(OP, &format!("data source {id}"), e))?;

        data_source_state(required(output.data_source(), OP, "data source")?, OP)
    }

    async fn find_data_source(&self, knowledge_base_id: &str, name: &str) -> CloudResult<Option<String>> {
        const OP: &str = "bedrock:ListDataSources";
        let mut next_token: Option<String> = None;

        loop {
            let output = self
                .agent
                .list_data_sources()
                .knowledge_base_id(knowledge_base_id)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| classify(OP, &format!("data sources of {knowledge_base_id}"), e))?;

            for summary in output.data_source_summaries() {
                if summary.name().present() == Some(name) {
                    return Ok(summary.data_source_id().present().map(str::to_string));
                }
            }

            match output.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => return Ok(None),
            }
        }
    }

    async fn start_ingestion_job(&self, knowledge_base_id: &str, data_source_id: &str) -> CloudResult<String> {
        const OP: &str = "bedrock:StartIngestionJob";
        let output = self
            .agent
            .start_ingestion_job()
            .knowledge_base_id(knowledge_base_id)
            .data_source_id(data_source_id)
            .send()
            .await
            .map_err(|e| classify(OP, &format!("ingestion into {knowledge_base_id}"), e))?;

        let job = required(output.ingestion_job(), OP, "ingestion job")?;
        Ok(required(job.ingestion_job_id(), OP, "ingestion job id")?.to_string())
    }

    async fn create_agent(&self, spec: &AgentSpec) -> CloudResult<AgentState> {
        const OP: &str = "bedrock:CreateAgent";
        let output = self
            .agent
            .create_agent()
            .agent_name(&spec.name)
            .agent_resource_role_arn(&spec.role_arn)
            .description(&spec.description)
            .idle_session_ttl_in_seconds(spec.idle_session_ttl_secs as i32)
            .foundation_model(&spec.foundation_model)
            .instruction(&spec.instruction)
            .send()
            .await
            .map_err(|e| classify(OP, &format!("agent {}", spec.name), e))?;

        agent_state(required(output.agent(), OP, "agent")?, OP)
    }

    async fn get_agent(&self, id: &str) -> CloudResult<AgentState> {
        const OP: &str = "bedrock:GetAgent";
        let output = self
            .agent
            .get_agent()
            .agent_id(id)
            .send()
            .await
            .map_err(|e| classify(OP, &format!("agent {id}"), e))?;

        agent_state(required(output.agent(), OP, "agent")?, OP)
    }

    async fn find_agent(&self, name: &str) -> CloudResult<Option<String>> {
        const OP: &str = "bedrock:ListAgents";
        let mut next_token: Option<String> = None;

        loop {
            let output = self
                .agent
                .list_agents()
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| classify(OP, "agents", e))?;

            for summary in output.agent_summaries() {
                if summary.agent_name().present() == Some(name) {
                    return Ok(summary.agent_id().present().map(str::to_string));
                }
            }

            match output.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => return Ok(None),
            }
        }
    }

    async fn delete_agent(&self, id: &str) -> CloudResult<()> {
        self.agent
            .delete_agent()
            .agent_id(id)
            .skip_resource_in_use_check(true)
            .send()
            .await
            .map_err(|e| classify("bedrock:DeleteAgent", &format!("agent {id}"), e))?;
        Ok(())
    }

    async fn create_action_group(&self, spec: &ActionGroupSpec) -> CloudResult<()> {
        let schema = S3Identifier::builder()
            .s3_bucket_name(&spec.schema_bucket)
            .s3_object_key(&spec.schema_key)
            .build();

        self.agent
            .create_agent_action_group()
            .agent_id(&spec.agent_id)
            .agent_version(&spec.agent_version)
            .action_group_name(&spec.name)
            .description(&spec.description)
            .action_group_executor(ActionGroupExecutor::Lambda(spec.function_arn.clone()))
            .api_schema(ApiSchema::S3(schema))
            .send()
            .await
            .map_err(|e| {
                classify(
                    "bedrock:CreateAgentActionGroup",
                    &format!("action group {}", spec.name),
                    e,
                )
            })?;
        Ok(())
    }

    async fn associate_knowledge_base(&self, association: &KnowledgeBaseAssociation) -> CloudResult<()> {
        self.agent
            .associate_agent_knowledge_base()
            .agent_id(&association.agent_id)
            .agent_version(&association.agent_version)
            .knowledge_base_id(&association.knowledge_base_id)
            .description(&association.description)
            .send()
            .await
            .map_err(|e| {
                classify(
                    "bedrock:AssociateAgentKnowledgeBase",
                    &format!(
                        "association of {} with {}",
                        association.knowledge_base_id, association.agent_id
                    ),
                    e,
                )
            })?;
        Ok(())
    }

    async fn prepare_agent(&self, id: &str) -> CloudResult<AgentStatus> {
        const OP: &str = "bedrock:PrepareAgent";
        let output = self
            .agent
            .prepare_agent()
            .agent_id(id)
            .send()
            .await
            .map_err(|e| classify(OP, &format!("agent {id}"), e))?;

        Ok(AgentStatus::from_provider(
            required(output.agent_status(), OP, "agent status")?.as_str(),
        ))
    }

    async fn create_alias(&self, agent_id: &str, name: &str, description: &str) -> CloudResult<AliasState> {
        const OP: &str = "bedrock:CreateAgentAlias";
        let output = self
            .agent
            .create_agent_alias()
            .agent_id(agent_id)
            .agent_alias_name(name)
            .description(description)
            .send()
            .await
            .map_err(|e| classify(OP, &format!("alias {name} of {agent_id}"), e))?;

        alias_state(required(output.agent_alias(), OP, "agent alias")?, OP)
    }

    async fn get_alias(&self, agent_id: &str, alias_id: &str) -> CloudResult<AliasState> {
        const OP: &str = "bedrock:GetAgentAlias";
        let output = self
            .agent
            .get_agent_alias()
            .agent_id(agent_id)
            .agent_alias_id(alias_id)
            .send()
            .await
            .map_err(|e| classify(OP, &format!("alias {alias_id} of {agent_id}"), e))?;

        alias_state(required(output.agent_alias(), OP, "agent alias")?, OP)
    }

    async fn list_aliases(&self, agent_id: &str) -> CloudResult<Vec<AliasState>> {
        const OP: &str = "bedrock:ListAgentAliases";
        let mut aliases = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let output = self
                .agent
                .list_agent_aliases()
                .agent_id(agent_id)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| classify(OP, &format!("aliases of {agent_id}"), e))?;

            for summary in output.agent_alias_summaries() {
                aliases.push(AliasState {
                    id: required(summary.agent_alias_id(), OP, "alias id")?.to_string(),
                    name: required(summary.agent_alias_name(), OP, "alias name")?.to_string(),
                    status: ResourceStatus::from_provider(
                        required(summary.agent_alias_status(), OP, "alias status")?.as_str(),
                    ),
                });
            }

            match output.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => return Ok(aliases),
            }
        }
    }

    async fn delete_alias(&self, agent_id: &str, alias_id: &str) -> CloudResult<()> {
        self.agent
            .delete_agent_alias()
            .agent_id(agent_id)
            .agent_alias_id(alias_id)
            .send()
            .await
            .map_err(|e| {
                classify(
                    "bedrock:DeleteAgentAlias",
                    &format!("alias {alias_id} of {agent_id}"),
                    e,
                )
            })?;
        Ok(())
    }
}
