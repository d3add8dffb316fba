use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod validator;

use crate::cli::Cli;
use crate::domain::resources::ChunkingPolicy;

pub const DEFAULT_INSTRUCTION: &str = "You are an expert customer service agent helping faculty and students to resolve their queries like accessing the grades, eligibility, login issues, powerschool access issues. You can also guide users with navigation and other assistance on their portal. If the user request for a password reset, ask for email address, name and ID which are required information before fulfilling the <user-request>, once you have all the required information, you can reset the password and provide temporary password to the user";

pub const DEFAULT_KNOWLEDGE_BASE_INSTRUCTION: &str = "Answer queries from prompts. Double check each source you reference from the CMS help guide to provide a good response. Ask if anything else is needed.";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub deployment: DeploymentSettings,
    #[serde(default)]
    pub vector_store: VectorStoreSettings,
    #[serde(default)]
    pub chunking: ChunkingSettings,
    #[serde(default)]
    pub wait: WaitSettings,
    #[serde(default)]
    pub chat: ChatSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8501,
        }
    }
}

/// What gets provisioned and how it is named
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeploymentSettings {
    /// Every derived resource name starts with this
    pub base_name: String,
    pub policy_prefix: String,
    /// Overrides the ambient region when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub description: String,
    pub foundation_model: String,
    pub embedding_model: String,
    pub instruction: String,
    /// Tells the agent how to use the associated knowledge base
    pub knowledge_base_instruction: String,
    pub idle_session_ttl_secs: u32,
    pub alias_name: String,
    /// OpenAPI document for the action group; a built-in one is used when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_file: Option<PathBuf>,
    /// Every PDF in this directory is uploaded as a source document
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documents_dir: Option<PathBuf>,
    pub document_prefix: String,
    #[serde(default)]
    pub document_urls: Vec<String>,
    /// Zipped callback function package
    pub callback_artifact: PathBuf,
    pub callback_runtime: String,
    pub callback_handler: String,
    pub callback_timeout_secs: u32,
}

impl Default for DeploymentSettings {
    fn default() -> Self {
        Self {
            base_name: "virtual-assistant".to_string(),
            policy_prefix: "va".to_string(),
            region: None,
            description: "Virtual assistant agent with ability to reset the password.".to_string(),
            foundation_model: "anthropic.claude-3-haiku-20240307-v1:0".to_string(),
            embedding_model: "cohere.embed-english-v3".to_string(),
            instruction: DEFAULT_INSTRUCTION.to_string(),
            knowledge_base_instruction: DEFAULT_KNOWLEDGE_BASE_INSTRUCTION.to_string(),
            idle_session_ttl_secs: 1800,
            alias_name: "latest".to_string(),
            schema_file: None,
            documents_dir: None,
            document_prefix: "kbdocuments".to_string(),
            document_urls: Vec::new(),
            callback_artifact: PathBuf::from("target/lambda/password-reset/bootstrap.zip"),
            callback_runtime: "provided.al2023".to_string(),
            callback_handler: "bootstrap".to_string(),
            callback_timeout_secs: 180,
        }
    }
}

/// External vector store backing the knowledge base
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VectorStoreSettings {
    pub connection_string: String,
    /// Secret ARN, or a secret name resolved in the deployment account
    pub credentials_secret: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub text_field: String,
    pub metadata_field: String,
}

impl Default for VectorStoreSettings {
    fn default() -> Self {
        Self {
            connection_string: String::new(),
            credentials_secret: String::new(),
            namespace: Some("datafield".to_string()),
            text_field: "textfield".to_string(),
            metadata_field: "metadata".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChunkingSettings {
    pub max_tokens: u32,
    pub overlap_percentage: u32,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            overlap_percentage: 20,
        }
    }
}

impl ChunkingSettings {
    pub fn policy(&self) -> ChunkingPolicy {
        ChunkingPolicy {
            max_tokens: self.max_tokens,
            overlap_percentage: self.overlap_percentage,
        }
    }
}

/// Status polling and retry bounds
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WaitSettings {
    pub poll_interval_ms: u64,
    pub resource_timeout_secs: u64,
    pub prepare_timeout_secs: u64,
    /// Total time spent retrying a throttled or not-yet-visible call
    pub retry_max_elapsed_secs: u64,
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            resource_timeout_secs: 300,
            prepare_timeout_secs: 300,
            retry_max_elapsed_secs: 60,
        }
    }
}

impl WaitSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn resource_timeout(&self) -> Duration {
        Duration::from_secs(self.resource_timeout_secs)
    }

    pub fn prepare_timeout(&self) -> Duration {
        Duration::from_secs(self.prepare_timeout_secs)
    }

    pub fn retry_max_elapsed(&self) -> Duration {
        Duration::from_secs(self.retry_max_elapsed_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChatSettings {
    /// Resolved by agent name at startup when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Resolved by alias name at startup when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_alias_id: Option<String>,
    pub title: String,
    /// Sessions untouched for this long are dropped from memory
    pub session_ttl_secs: u64,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            agent_id: None,
            agent_alias_id: None,
            title: "Virtual Assistant".to_string(),
            session_ttl_secs: 1800,
        }
    }
}

impl ChatSettings {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}

impl Settings {
    /// Create settings from CLI arguments (config file, then env vars, then CLI overrides)
    pub fn new_with_cli(cli: &Cli) -> Result<Self, anyhow::Error> {
        let mut settings = Self::load(&cli.config)?;

        // CLI > env vars > config file
        settings.apply_cli_overrides(cli);

        settings.validate()?;
        Ok(settings)
    }

    /// Load a config file and the `VA_` environment without CLI overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let settings = Self::load(path.as_ref())?;
        settings.validate()?;
        Ok(settings)
    }

    fn load(path: &Path) -> Result<Self, anyhow::Error> {
        let s = Config::builder()
            .add_source(File::from(path.to_path_buf()).required(false))
            .add_source(
                Environment::with_prefix("VA")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(s.try_deserialize()?)
    }

    fn apply_cli_overrides(&mut self, cli: &Cli) {
        if let Some(host) = &cli.host {
            self.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(region) = &cli.region {
            self.deployment.region = Some(region.clone());
        }
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        validator::ConfigValidator::validate(self).map_err(|errors| {
            let error_messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            anyhow::anyhow!(
                "Configuration validation failed:\n{}",
                error_messages.join("\n")
            )
        })
    }

    /// Stricter checks that only apply when provisioning
    pub fn validate_for_setup(&self) -> Result<(), anyhow::Error> {
        validator::ConfigValidator::validate_for_setup(self).map_err(|errors| {
            let error_messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            anyhow::anyhow!(
                "Setup configuration validation failed:\n{}",
                error_messages.join("\n")
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 8501);
        assert_eq!(settings.deployment.base_name, "virtual-assistant");
        assert_eq!(settings.deployment.alias_name, "latest");
        assert_eq!(settings.deployment.callback_timeout_secs, 180);
        assert_eq!(settings.chunking.policy().max_tokens, 512);
        assert_eq!(settings.chunking.policy().overlap_percentage, 20);
        assert_eq!(settings.vector_store.namespace.as_deref(), Some("datafield"));
        assert_eq!(settings.wait.poll_interval(), Duration::from_secs(2));
        assert_eq!(settings.chat.session_ttl(), Duration::from_secs(30 * 60));
    }

    #[test]
    fn test_cli_overrides() {
        use clap::Parser;

        let cli = Cli::parse_from(["va", "--host", "0.0.0.0", "--port", "9000", "--region", "eu-west-1"]);
        let mut settings = Settings::default();
        settings.apply_cli_overrides(&cli);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.deployment.region.as_deref(), Some("eu-west-1"));
    }
}
