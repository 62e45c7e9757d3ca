use crate::cmd::version::PlaybookArg;
use crate::output::{or_dash, print_json, print_table};
use crate::session::Session;
use anyhow::Context;
use clap::Subcommand;
use playbook_core::types::ActionFields;

#[derive(Subcommand)]
pub enum ActionSubcommand {
    /// List the actions of a version
    List { version_id: String },
    /// Attach an action to a version
    Create {
        version_id: String,
        /// Workflow or action definition to run
        action_id: String,
        #[arg(long, default_value = "")]
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long = "type", default_value = "")]
        action_type: String,
        #[arg(long)]
        sort_order: Option<i32>,
    },
    /// Change an action; omitted flags keep their current values
    Update {
        version_id: String,
        id: String,
        #[arg(long)]
        action_id: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long = "type")]
        action_type: Option<String>,
        #[arg(long)]
        sort_order: Option<i32>,
    },
    /// Delete an action, deactivating its version first if it is active
    Delete {
        version_id: String,
        id: String,
        #[command(flatten)]
        target: PlaybookArg,
    },
}

pub fn run(session: &Session, subcmd: ActionSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ActionSubcommand::List { version_id } => list(session, &version_id, json),
        ActionSubcommand::Create {
            version_id,
            action_id,
            name,
            description,
            action_type,
            sort_order,
        } => {
            let fields = ActionFields {
                action_id,
                name,
                description,
                action_type,
                sort_order,
            };
            create(session, &version_id, &fields, json)
        }
        ActionSubcommand::Update {
            version_id,
            id,
            action_id,
            name,
            description,
            action_type,
            sort_order,
        } => {
            let changes = ActionChanges {
                action_id,
                name,
                description,
                action_type,
                sort_order,
            };
            update(session, &version_id, &id, changes, json)
        }
        ActionSubcommand::Delete {
            version_id,
            id,
            target,
        } => delete(session, &version_id, &id, &target, json),
    }
}

struct ActionChanges {
    action_id: Option<String>,
    name: Option<String>,
    description: Option<String>,
    action_type: Option<String>,
    sort_order: Option<i32>,
}

fn list(session: &Session, version_id: &str, json: bool) -> anyhow::Result<()> {
    let ws = session.workspace()?;
    let actions = session
        .orchestrator()?
        .repository()
        .list_playbook_actions(&ws, version_id)
        .with_context(|| format!("failed to list actions of version '{version_id}'"))?;

    if json {
        print_json(&actions)?;
        return Ok(());
    }
    if actions.is_empty() {
        println!("No actions.");
        return Ok(());
    }
    let rows = actions
        .iter()
        .map(|a| {
            vec![
                a.id.clone(),
                a.sort_order.to_string(),
                a.action_id.clone(),
                or_dash(Some(&a.name)),
                or_dash(Some(&a.action_type)),
            ]
        })
        .collect();
    print_table(&["ID", "ORDER", "ACTION", "NAME", "TYPE"], rows);
    Ok(())
}

fn create(session: &Session, version_id: &str, fields: &ActionFields, json: bool) -> anyhow::Result<()> {
    let ws = session.workspace()?;
    let id = session
        .orchestrator()?
        .repository()
        .create_playbook_action(&ws, version_id, fields)
        .with_context(|| format!("failed to add action to version '{version_id}'"))?;

    if json {
        print_json(&serde_json::json!({ "version_id": version_id, "id": id }))?;
    } else {
        println!("Created action {id}");
    }
    Ok(())
}

fn update(
    session: &Session,
    version_id: &str,
    id: &str,
    changes: ActionChanges,
    json: bool,
) -> anyhow::Result<()> {
    let ws = session.workspace()?;
    let orch = session.orchestrator()?;
    let repo = orch.repository();
    let current = repo
        .list_playbook_actions(&ws, version_id)
        .with_context(|| format!("failed to list actions of version '{version_id}'"))?
        .into_iter()
        .find(|a| a.id == id)
        .with_context(|| format!("action '{id}' not found on version '{version_id}'"))?;

    let fields = ActionFields {
        action_id: changes.action_id.unwrap_or(current.action_id),
        name: changes.name.unwrap_or(current.name),
        description: changes.description.unwrap_or(current.description),
        action_type: changes.action_type.unwrap_or(current.action_type),
        sort_order: Some(changes.sort_order.unwrap_or(current.sort_order)),
    };
    repo.update_playbook_action(&ws, version_id, id, &fields)
        .with_context(|| format!("failed to update action '{id}'"))?;

    if json {
        print_json(&fields)?;
    } else {
        println!("Updated action {id}");
    }
    Ok(())
}

fn delete(
    session: &Session,
    version_id: &str,
    id: &str,
    target: &PlaybookArg,
    json: bool,
) -> anyhow::Result<()> {
    let ws = session.workspace()?;
    let orch = session.orchestrator()?;
    let playbook_id = target.resolve(&orch, &ws, version_id)?;
    let outcome = orch
        .delete_action(&ws, &playbook_id, version_id, id)
        .with_context(|| format!("failed to delete action '{id}'"))?;

    if json {
        print_json(&serde_json::json!({
            "id": id,
            "deleted": true,
            "deactivated": outcome.deactivated,
        }))?;
    } else {
        if outcome.deactivated {
            println!("Deactivated version {version_id}; activate it again when ready");
        }
        println!("Deleted action {id}");
    }
    Ok(())
}
