use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

use clap::Parser;
use virtual_assistant::cli::Cli;
use virtual_assistant::config::Settings;

#[test]
fn test_load_config_file() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("virtual-assistant.toml");

    let toml = r#"
[server]
host = "0.0.0.0"
port = 9100

[deployment]
base_name = "helpdesk"
policy_prefix = "hd"
documents_dir = "docs"
document_urls = ["https://example.com/guides/portal-guide.pdf"]

[vector_store]
connection_string = "https://index.svc.pinecone.io"
credentials_secret = "pinekey"

[chunking]
max_tokens = 300
overlap_percentage = 10

[chat]
agent_id = "AGENT1"
agent_alias_id = "ALIAS1"
"#;
    fs::write(&path, toml)?;

    let settings = Settings::from_file(&path)?;

    assert_eq!(settings.server.host, "0.0.0.0");
    assert_eq!(settings.server.port, 9100);
    assert_eq!(settings.deployment.base_name, "helpdesk");
    assert_eq!(settings.deployment.policy_prefix, "hd");
    assert_eq!(settings.deployment.documents_dir, Some(PathBuf::from("docs")));
    assert_eq!(settings.deployment.document_urls.len(), 1);
    assert_eq!(settings.chunking.max_tokens, 300);
    assert_eq!(settings.chat.agent_id.as_deref(), Some("AGENT1"));

    // Untouched keys keep their defaults
    assert_eq!(settings.deployment.alias_name, "latest");
    assert_eq!(settings.deployment.document_prefix, "kbdocuments");
    assert_eq!(settings.vector_store.text_field, "textfield");
    assert_eq!(settings.wait.prepare_timeout_secs, 300);

    settings.validate_for_setup()?;
    Ok(())
}

#[test]
fn test_missing_file_uses_defaults() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;

    let settings = Settings::from_file(temp_dir.path().join("absent.toml"))?;

    assert_eq!(settings.server.port, 8501);
    assert_eq!(settings.deployment.base_name, "virtual-assistant");
    assert!(settings.validate_for_setup().is_err());
    Ok(())
}

#[test]
fn test_invalid_file_reports_every_problem() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("virtual-assistant.toml");
    fs::write(
        &path,
        r#"
[server]
port = 0

[chunking]
overlap_percentage = 0
"#,
    )?;

    let err = Settings::from_file(&path).unwrap_err().to_string();

    assert!(err.contains("server.port"), "{err}");
    assert!(err.contains("chunking.overlap_percentage"), "{err}");
    Ok(())
}

#[test]
fn test_cli_overrides_file_and_environment() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("virtual-assistant.toml");
    fs::write(
        &path,
        r#"
[server]
port = 9100

[chat]
title = "From file"
"#,
    )?;

    std::env::set_var("VA_CHAT__TITLE", "From environment");
    let cli = Cli::parse_from([
        "va",
        "--config",
        path.to_str().unwrap(),
        "--port",
        "9200",
        "--region",
        "eu-west-1",
        "serve",
    ]);
    let settings = Settings::new_with_cli(&cli);
    std::env::remove_var("VA_CHAT__TITLE");
    let settings = settings?;

    assert_eq!(settings.server.port, 9200);
    assert_eq!(settings.deployment.region.as_deref(), Some("eu-west-1"));
    assert_eq!(settings.chat.title, "From environment");
    Ok(())
}
