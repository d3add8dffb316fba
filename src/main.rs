use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use virtual_assistant::adapters::aws::AwsCloud;
use virtual_assistant::adapters::chat_handler::ChatApiState;
use virtual_assistant::adapters::health_handler::HealthHandler;
use virtual_assistant::adapters::in_memory_cloud::InMemoryCloud;
use virtual_assistant::chat::{resolve_target, AgentInvoker, BedrockAgentInvoker};
use virtual_assistant::cli::{Cli, Command};
use virtual_assistant::config::Settings;
use virtual_assistant::domain::ports::CloudClients;
use virtual_assistant::domain::resources::AgentTarget;
use virtual_assistant::provisioning::Provisioner;

const DRY_RUN_REGION: &str = "us-east-1";
const DRY_RUN_ACCOUNT: &str = "000000000000";
const DRY_RUN_POLL_INTERVAL_MS: u64 = 10;
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let settings = Settings::new_with_cli(&cli)?;

    match cli.command() {
        Command::Setup { dry_run } => setup(settings, dry_run).await,
        Command::Teardown { dry_run } => teardown(settings, dry_run).await,
        Command::Serve => serve(settings).await,
        Command::Outputs => outputs(settings).await,
    }
}

async fn aws_clients(settings: &Settings) -> anyhow::Result<CloudClients> {
    let cloud = AwsCloud::load(settings.deployment.region.as_deref()).await?;
    Ok(cloud.into_clients())
}

/// Provisioner over the cloud, or over an in-process provider for dry runs
async fn provisioner(mut settings: Settings, dry_run: bool) -> anyhow::Result<Provisioner> {
    if !dry_run {
        let clients = aws_clients(&settings).await?;
        return Ok(Provisioner::new(clients, settings));
    }

    info!("dry run: using the in-process provider");
    let region = settings
        .deployment
        .region
        .clone()
        .unwrap_or_else(|| DRY_RUN_REGION.to_string());
    let clients = CloudClients::from_shared(Arc::new(InMemoryCloud::new(region, DRY_RUN_ACCOUNT)));
    settings.wait.poll_interval_ms = DRY_RUN_POLL_INTERVAL_MS;

    let package = match tokio::fs::read(&settings.deployment.callback_artifact).await {
        Ok(package) => package,
        Err(e) => {
            warn!(
                artifact = %settings.deployment.callback_artifact.display(),
                error = %e,
                "callback artifact unavailable, deploying an empty package"
            );
            Vec::new()
        }
    };
    Ok(Provisioner::new(clients, settings).with_callback_package(package))
}

async fn setup(settings: Settings, dry_run: bool) -> anyhow::Result<()> {
    settings.validate_for_setup()?;
    let provisioner = provisioner(settings, dry_run).await?;

    let outputs = provisioner.setup().await?;
    println!("{}", serde_json::to_string_pretty(&outputs)?);
    Ok(())
}

async fn teardown(settings: Settings, dry_run: bool) -> anyhow::Result<()> {
    let provisioner = provisioner(settings, dry_run).await?;

    let report = provisioner.teardown().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    let failures = report.failures();
    if !failures.is_empty() {
        warn!(count = failures.len(), "some resources could not be deleted; rerun teardown to retry");
    }
    Ok(())
}

async fn outputs(settings: Settings) -> anyhow::Result<()> {
    let provisioner = provisioner(settings, false).await?;
    let outputs = provisioner.outputs().await?;
    println!("{}", serde_json::to_string_pretty(&outputs)?);
    Ok(())
}

/// Find the alias to chat with; the server still starts when there is none
async fn chat_target(clients: &CloudClients, settings: &Settings) -> Option<AgentTarget> {
    let chat = &settings.chat;
    let agent_name = if chat.agent_id.is_some() && chat.agent_alias_id.is_some() {
        String::new()
    } else {
        let provisioner = Provisioner::new(clients.clone(), settings.clone());
        match provisioner.resolve_names().await {
            Ok(names) => names.agent_name(),
            Err(e) => {
                warn!(error = %e, "cannot derive the agent name");
                return None;
            }
        }
    };

    match resolve_target(clients.agents.as_ref(), chat, &agent_name, &settings.deployment.alias_name).await {
        Ok(Some(target)) => {
            info!(agent_id = %target.agent_id, alias_id = %target.agent_alias_id, "chatting with agent");
            Some(target)
        }
        Ok(None) => {
            warn!(agent = %agent_name, "no deployed agent alias found; run `va setup` first");
            None
        }
        Err(e) => {
            warn!(error = %e, "cannot resolve the agent alias");
            None
        }
    }
}

async fn serve(settings: Settings) -> anyhow::Result<()> {
    let host = settings.server.host.clone();
    let port = settings.server.port;
    info!("Starting Virtual Assistant on {}:{}", host, port);

    let clients = aws_clients(&settings).await?;
    let target = chat_target(&clients, &settings).await;

    let health_handler = Arc::new(HealthHandler::new(target.is_some()));
    let invoker = target.map(|target| {
        Arc::new(BedrockAgentInvoker::new(clients.runtime.clone(), target)) as Arc<dyn AgentInvoker>
    });
    let session_ttl = settings.chat.session_ttl();
    let chat_state =
        ChatApiState::new(invoker, settings.chat.title.clone()).with_session_ttl(session_ttl);
    let _sweeper = chat_state
        .sessions
        .spawn_eviction(SESSION_SWEEP_INTERVAL.min(session_ttl));
    let app = virtual_assistant::create_app(chat_state, health_handler);

    // Start server
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
