use crate::output::{or_dash, print_fields, print_json};
use crate::session::Session;
use anyhow::Context;
use clap::Subcommand;
use playbook_core::types::{PlaybookRule, RuleFields};
use std::path::{Path, PathBuf};

#[derive(Subcommand)]
pub enum RuleSubcommand {
    /// Show a version's rule
    Show { version_id: String, rule_id: String },
    /// Create the rule of a version from a JSON file
    Create {
        version_id: String,
        /// JSON with `expression` (conditions, logics) and optional `schedule`
        #[arg(long)]
        file: PathBuf,
    },
    /// Replace a rule from a JSON file
    Update {
        version_id: String,
        rule_id: String,
        #[arg(long)]
        file: PathBuf,
    },
    /// Delete a rule
    Delete { version_id: String, rule_id: String },
}

pub fn run(session: &Session, subcmd: RuleSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        RuleSubcommand::Show {
            version_id,
            rule_id,
        } => show(session, &version_id, &rule_id, json),
        RuleSubcommand::Create { version_id, file } => create(session, &version_id, &file, json),
        RuleSubcommand::Update {
            version_id,
            rule_id,
            file,
        } => update(session, &version_id, &rule_id, &file, json),
        RuleSubcommand::Delete {
            version_id,
            rule_id,
        } => delete(session, &version_id, &rule_id, json),
    }
}

fn read_rule(path: &Path) -> anyhow::Result<RuleFields> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("{} is not a valid rule", path.display()))
}

fn describe(rule: &PlaybookRule) -> Vec<(&'static str, String)> {
    let conditions: Vec<String> = rule
        .expression
        .conditions
        .iter()
        .map(|c| format!("{}[{}]", c.name, c.data.join(",")))
        .collect();
    vec![
        ("id", rule.id.clone()),
        ("version", rule.version_id.clone()),
        ("type", or_dash(Some(&rule.expression_type))),
        ("conditions", or_dash(Some(&conditions.join(" ")))),
        ("logics", or_dash(Some(&rule.expression.logics.join(" ")))),
        ("cron", or_dash(Some(&rule.schedule.cron))),
        ("schedule", or_dash(Some(&rule.schedule.schedule_type))),
    ]
}

fn show(session: &Session, version_id: &str, rule_id: &str, json: bool) -> anyhow::Result<()> {
    let ws = session.workspace()?;
    let rule = session
        .orchestrator()?
        .repository()
        .get_playbook_rule(&ws, version_id, rule_id)
        .with_context(|| format!("failed to read rule '{rule_id}'"))?;

    if json {
        print_json(&rule)?;
    } else {
        print_fields(&describe(&rule));
    }
    Ok(())
}

fn create(session: &Session, version_id: &str, file: &Path, json: bool) -> anyhow::Result<()> {
    let fields = read_rule(file)?;
    let ws = session.workspace()?;
    let id = session
        .orchestrator()?
        .repository()
        .create_playbook_rule(&ws, version_id, &fields)
        .with_context(|| format!("failed to create rule on version '{version_id}'"))?;

    if json {
        print_json(&serde_json::json!({ "version_id": version_id, "rule_id": id }))?;
    } else {
        println!("Created rule {id}");
    }
    Ok(())
}

fn update(
    session: &Session,
    version_id: &str,
    rule_id: &str,
    file: &Path,
    json: bool,
) -> anyhow::Result<()> {
    let fields = read_rule(file)?;
    let ws = session.workspace()?;
    session
        .orchestrator()?
        .repository()
        .update_playbook_rule(&ws, version_id, rule_id, &fields)
        .with_context(|| format!("failed to update rule '{rule_id}'"))?;

    if json {
        print_json(&serde_json::json!({ "rule_id": rule_id, "updated": true }))?;
    } else {
        println!("Updated rule {rule_id}");
    }
    Ok(())
}

fn delete(session: &Session, version_id: &str, rule_id: &str, json: bool) -> anyhow::Result<()> {
    let ws = session.workspace()?;
    session
        .orchestrator()?
        .repository()
        .delete_playbook_rule(&ws, version_id, rule_id)
        .with_context(|| format!("failed to delete rule '{rule_id}'"))?;

    if json {
        print_json(&serde_json::json!({ "rule_id": rule_id, "deleted": true }))?;
    } else {
        println!("Deleted rule {rule_id}");
    }
    Ok(())
}
