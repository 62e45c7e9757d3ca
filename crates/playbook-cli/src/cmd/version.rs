use crate::output::{or_dash, print_fields, print_json, print_table};
use crate::session::Session;
use anyhow::Context;
use clap::{Args, Subcommand};
use playbook_core::types::{PlaybookVersion, VersionFields, VersionPatch};
use playbook_core::{HttpApiClient, PlaybookOrchestrator, Transition};

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum VersionSubcommand {
    /// Create a version under a playbook
    Create {
        playbook_id: String,
        /// Data class the version's trigger watches
        #[arg(long)]
        dataclass: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value = "")]
        trigger_type: String,
        #[arg(long, default_value = "")]
        action_strategy: String,
        #[arg(long)]
        rule_id: Option<String>,
        #[arg(long)]
        rule_enable: bool,
        /// Trigger on data object creation
        #[arg(long)]
        on_create: bool,
        /// Trigger on data object update
        #[arg(long)]
        on_update: bool,
        /// Trigger on data object deletion
        #[arg(long)]
        on_delete: bool,
    },
    /// Show a version
    Show { version_id: String },
    /// List the versions of a playbook
    List { playbook_id: String },
    /// Edit version fields (only the description while the version is active)
    Edit {
        version_id: String,
        #[command(flatten)]
        target: PlaybookArg,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        dataclass: Option<String>,
        #[arg(long)]
        trigger_type: Option<String>,
        #[arg(long)]
        action_strategy: Option<String>,
        #[arg(long)]
        rule_id: Option<String>,
        #[arg(long)]
        rule_enable: Option<bool>,
        #[arg(long)]
        on_create: Option<bool>,
        #[arg(long)]
        on_update: Option<bool>,
        #[arg(long)]
        on_delete: Option<bool>,
    },
    /// Delete a version, deactivating it first if it is active
    Delete {
        version_id: String,
        #[command(flatten)]
        target: PlaybookArg,
    },
    /// Make this the playbook's active version
    Activate {
        version_id: String,
        #[command(flatten)]
        target: PlaybookArg,
    },
    /// Switch this version off
    Deactivate {
        version_id: String,
        #[command(flatten)]
        target: PlaybookArg,
    },
    /// Set the workflow status of a version
    Status {
        version_id: String,
        status: String,
        #[command(flatten)]
        target: PlaybookArg,
    },
}

#[derive(Args)]
pub struct PlaybookArg {
    /// Owning playbook (default: read from the version)
    #[arg(long)]
    playbook: Option<String>,
}

impl PlaybookArg {
    pub(crate) fn resolve(
        &self,
        orch: &PlaybookOrchestrator<HttpApiClient>,
        ws: &str,
        version_id: &str,
    ) -> anyhow::Result<String> {
        match &self.playbook {
            Some(p) => Ok(p.clone()),
            None => orch
                .owning_playbook(ws, version_id)
                .with_context(|| format!("failed to find the playbook of version '{version_id}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(session: &Session, subcmd: VersionSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        VersionSubcommand::Create {
            playbook_id,
            dataclass,
            description,
            trigger_type,
            action_strategy,
            rule_id,
            rule_enable,
            on_create,
            on_update,
            on_delete,
        } => {
            let fields = VersionFields {
                dataclass_id: dataclass,
                description,
                rule_enable,
                rule_id,
                trigger_type,
                dataobject_create: on_create,
                dataobject_update: on_update,
                dataobject_delete: on_delete,
                action_strategy,
            };
            create(session, &playbook_id, &fields, json)
        }
        VersionSubcommand::Show { version_id } => show(session, &version_id, json),
        VersionSubcommand::List { playbook_id } => list(session, &playbook_id, json),
        VersionSubcommand::Edit {
            version_id,
            target,
            description,
            dataclass,
            trigger_type,
            action_strategy,
            rule_id,
            rule_enable,
            on_create,
            on_update,
            on_delete,
        } => {
            let patch = VersionPatch {
                description,
                dataclass_id: dataclass,
                rule_enable,
                rule_id,
                trigger_type,
                dataobject_create: on_create,
                dataobject_update: on_update,
                dataobject_delete: on_delete,
                action_strategy,
                ..Default::default()
            };
            edit(session, &version_id, &target, &patch, json)
        }
        VersionSubcommand::Delete { version_id, target } => {
            delete(session, &version_id, &target, json)
        }
        VersionSubcommand::Activate { version_id, target } => {
            transition(session, &version_id, &target, json, "activated", |o, ws, pb, v| {
                o.activate(ws, pb, v)
            })
        }
        VersionSubcommand::Deactivate { version_id, target } => {
            transition(session, &version_id, &target, json, "deactivated", |o, ws, pb, v| {
                o.deactivate(ws, pb, v)
            })
        }
        VersionSubcommand::Status {
            version_id,
            status,
            target,
        } => transition(session, &version_id, &target, json, "updated", |o, ws, pb, v| {
            o.set_status(ws, pb, v, &status)
        }),
    }
}

// ---------------------------------------------------------------------------
// Read / write
// ---------------------------------------------------------------------------

fn create(
    session: &Session,
    playbook_id: &str,
    fields: &VersionFields,
    json: bool,
) -> anyhow::Result<()> {
    let ws = session.workspace()?;
    let id = session
        .orchestrator()?
        .repository()
        .create_playbook_version(&ws, playbook_id, fields)
        .with_context(|| format!("failed to create a version of playbook '{playbook_id}'"))?;

    if json {
        print_json(&serde_json::json!({ "playbook_id": playbook_id, "version_id": id }))?;
    } else {
        println!("Created version {id}");
    }
    Ok(())
}

fn version_fields(v: &PlaybookVersion) -> Vec<(&'static str, String)> {
    vec![
        ("id", v.id.clone()),
        ("playbook", v.playbook_id.clone()),
        ("version", or_dash(Some(&v.version))),
        ("state", v.state().to_string()),
        ("status", or_dash(Some(&v.status))),
        ("dataclass", or_dash(Some(&v.dataclass_id))),
        ("description", or_dash(Some(&v.description))),
        ("trigger type", or_dash(Some(&v.trigger_type))),
        (
            "triggers on",
            format!(
                "create={} update={} delete={}",
                v.dataobject_create, v.dataobject_update, v.dataobject_delete
            ),
        ),
        ("action strategy", or_dash(Some(&v.action_strategy))),
        (
            "rule",
            format!("{} (enabled={})", or_dash(v.rule_id.as_deref()), v.rule_enable),
        ),
        (
            "updated",
            or_dash(v.update_time.map(|t| t.to_rfc3339()).as_deref()),
        ),
    ]
}

fn show(session: &Session, version_id: &str, json: bool) -> anyhow::Result<()> {
    let ws = session.workspace()?;
    let version = session
        .orchestrator()?
        .repository()
        .get_playbook_version(&ws, version_id)
        .with_context(|| format!("failed to read version '{version_id}'"))?;

    if json {
        print_json(&version)?;
    } else {
        print_fields(&version_fields(&version));
    }
    Ok(())
}

fn list(session: &Session, playbook_id: &str, json: bool) -> anyhow::Result<()> {
    let ws = session.workspace()?;
    let versions = session
        .orchestrator()?
        .repository()
        .list_playbook_versions(&ws, playbook_id)
        .with_context(|| format!("failed to list versions of playbook '{playbook_id}'"))?;

    if json {
        print_json(&versions)?;
        return Ok(());
    }
    if versions.is_empty() {
        println!("No versions.");
        return Ok(());
    }
    let rows = versions
        .iter()
        .map(|v| {
            vec![
                v.id.clone(),
                or_dash(Some(&v.version)),
                v.state().to_string(),
                or_dash(Some(&v.status)),
                or_dash(Some(&v.dataclass_id)),
            ]
        })
        .collect();
    print_table(&["ID", "VERSION", "STATE", "STATUS", "DATACLASS"], rows);
    Ok(())
}

fn edit(
    session: &Session,
    version_id: &str,
    target: &PlaybookArg,
    patch: &VersionPatch,
    json: bool,
) -> anyhow::Result<()> {
    let ws = session.workspace()?;
    let orch = session.orchestrator()?;
    let playbook_id = target.resolve(&orch, &ws, version_id)?;
    let version = orch
        .edit_version(&ws, &playbook_id, version_id, patch)
        .with_context(|| format!("failed to edit version '{version_id}'"))?;

    if json {
        print_json(&version)?;
    } else {
        println!("Updated version {version_id}");
    }
    Ok(())
}

fn delete(session: &Session, version_id: &str, target: &PlaybookArg, json: bool) -> anyhow::Result<()> {
    let ws = session.workspace()?;
    let orch = session.orchestrator()?;
    let playbook_id = target.resolve(&orch, &ws, version_id)?;
    let outcome = orch
        .delete_version(&ws, &playbook_id, version_id)
        .with_context(|| format!("failed to delete version '{version_id}'"))?;

    if json {
        print_json(&serde_json::json!({
            "version_id": version_id,
            "deleted": true,
            "deactivated": outcome.deactivated,
        }))?;
    } else {
        if outcome.deactivated {
            println!("Deactivated version {version_id}");
        }
        println!("Deleted version {version_id}");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Lifecycle commands
// ---------------------------------------------------------------------------

fn transition(
    session: &Session,
    version_id: &str,
    target: &PlaybookArg,
    json: bool,
    verb: &str,
    apply: impl FnOnce(
        &PlaybookOrchestrator<HttpApiClient>,
        &str,
        &str,
        &str,
    ) -> playbook_core::Result<Transition>,
) -> anyhow::Result<()> {
    let ws = session.workspace()?;
    let orch = session.orchestrator()?;
    let playbook_id = target.resolve(&orch, &ws, version_id)?;
    let t = apply(&orch, &ws, &playbook_id, version_id)
        .with_context(|| format!("version '{version_id}' was not {verb}"))?;

    if json {
        print_json(&t)?;
    } else {
        for other in &t.displaced {
            println!("Deactivated version {other}");
        }
        println!(
            "Version {version_id} {verb} ({}, status {})",
            t.version.state(),
            or_dash(Some(&t.version.status))
        );
    }
    Ok(())
}
