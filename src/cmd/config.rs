//! Configuration view and validation commands (`glu config`).

use std::path::Path;

use anyhow::Result;
use glu::config::{CredentialConfig, GluConfig, LogFormat};

use super::super::ConfigCommands;

pub fn cmd_config(config_path: &Path, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Glu Configuration");
            println!("=================");
            println!();

            let config = if config_path.exists() {
                println!("Config file: {}", config_path.display());
                println!();
                GluConfig::load(config_path)?
            } else {
                println!("No glu.toml found at {}", config_path.display());
                println!("Using default configuration.");
                println!();
                GluConfig::default()
            };
            show(&config);

            if !config_path.exists() {
                println!("Run 'glu config init' to create a glu.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No glu.toml found. Using defaults (valid).");
                return Ok(());
            }

            let config = GluConfig::load(config_path)?;
            let warnings = config.validate()?;

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("glu.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if let Some(parent) = config_path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)?;
            }

            GluConfig::example().save(config_path)?;

            println!("Created glu.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [log] level, format");
            println!("  - [storage] path");
            println!("  - [repositories.<name>] remote, default_branch, credentials");
            println!();
        }
    }

    Ok(())
}

fn show(config: &GluConfig) {
    println!("[log]");
    println!("  level = \"{}\"", config.log.level);
    let format = match config.log.format {
        LogFormat::Text => "text",
        LogFormat::Json => "json",
    };
    println!("  format = \"{}\"", format);
    println!();

    println!("[storage]");
    match &config.storage.path {
        Some(path) => println!("  path = \"{}\"", path.display()),
        None => println!("  (in memory)"),
    }
    println!();

    for (name, repo) in &config.repositories {
        println!("[repositories.{}]", name);
        if let Some(remote) = &repo.remote {
            println!("  remote = \"{}\"", remote);
        }
        println!("  default_branch = \"{}\"", repo.default_branch);
        if let Some(path) = &repo.path {
            println!("  path = \"{}\"", path.display());
        }
        if repo.poll_interval_secs > 0 {
            println!("  poll_interval_secs = {}", repo.poll_interval_secs);
        }
        if let Some(credentials) = &repo.credentials {
            println!("  credentials = \"{}\"", credentials);
        }
        if !repo.proposals.labels.is_empty() {
            println!("  proposals.labels = {:?}", repo.proposals.labels);
        }
        println!();
    }

    // Secrets are never printed.
    for (name, credentials) in &config.credentials {
        println!("[credentials.{}]", name);
        let kind = match credentials {
            CredentialConfig::Basic { .. } => "basic",
            CredentialConfig::Token { .. } => "token",
            CredentialConfig::SshAgent { .. } => "ssh-agent",
            CredentialConfig::SshKey { .. } => "ssh-key",
        };
        println!("  type = \"{}\"", kind);
        println!();
    }
}
