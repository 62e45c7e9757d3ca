use crate::output::print_json;
use crate::session::Session;
use anyhow::Context;
use clap::Subcommand;
use playbook_core::config::{has_errors, Config, WarnLevel};

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show the effective configuration (file plus environment), token hidden
    Show,

    /// Validate the config for common mistakes
    Validate,

    /// Write one key to the config file (environment overrides are not saved)
    Set {
        /// endpoint, project_id, auth_token, workspace_id, timeout_secs or verify_deletes
        key: String,
        /// New value; empty clears auth_token or workspace_id
        value: String,
    },
}

pub fn run(session: &Session, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Show => show(session, json),
        ConfigSubcommand::Validate => validate(session, json),
        ConfigSubcommand::Set { key, value } => set(session, &key, &value, json),
    }
}

fn show(session: &Session, json: bool) -> anyhow::Result<()> {
    let config = session.config.redacted();
    if json {
        print_json(&serde_json::json!({
            "path": session.config_path,
            "config": config,
        }))?;
    } else {
        if let Some(path) = &session.config_path {
            println!("# {}", path.display());
        }
        print!("{}", serde_yaml::to_string(&config)?);
    }
    Ok(())
}

fn validate(session: &Session, json: bool) -> anyhow::Result<()> {
    let warnings = session.config.validate();

    if json {
        print_json(&serde_json::json!({ "warnings": warnings }))?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if has_errors(&warnings) {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}

fn set(session: &Session, key: &str, value: &str, json: bool) -> anyhow::Result<()> {
    let path = session
        .config_path
        .as_deref()
        .context("no config location; pass --config")?;
    let mut config = Config::load_or_default(path)
        .with_context(|| format!("failed to load config {}", path.display()))?;
    config.set(key, value)?;
    config
        .save(path)
        .with_context(|| format!("failed to write {}", path.display()))?;

    let shown = if key == "auth_token" && !value.is_empty() {
        "<redacted>"
    } else {
        value
    };
    if json {
        print_json(&serde_json::json!({ "path": path, "key": key, "value": shown }))?;
    } else {
        println!("Set {key} = {shown} in {}", path.display());
    }
    Ok(())
}
