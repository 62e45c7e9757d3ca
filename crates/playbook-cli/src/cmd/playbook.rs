use crate::output::{or_dash, print_fields, print_json};
use crate::session::Session;
use anyhow::Context;
use clap::Subcommand;
use playbook_core::types::{NewPlaybook, Playbook, PlaybookPatch, VersionFields};

#[derive(Subcommand)]
pub enum PlaybookSubcommand {
    /// Create a playbook, optionally with its first version
    Create {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Also create a first version bound to this data class
        #[arg(long)]
        dataclass: Option<String>,
    },
    /// Show a playbook
    Show { playbook_id: String },
    /// Rename a playbook or change its description
    Update {
        playbook_id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Delete a playbook
    Delete { playbook_id: String },
    /// Check that at most one version is enabled and the playbook points at it
    Audit { playbook_id: String },
}

pub fn run(session: &Session, subcmd: PlaybookSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        PlaybookSubcommand::Create {
            name,
            description,
            dataclass,
        } => create(session, &name, &description, dataclass.as_deref(), json),
        PlaybookSubcommand::Show { playbook_id } => show(session, &playbook_id, json),
        PlaybookSubcommand::Update {
            playbook_id,
            name,
            description,
        } => update(session, &playbook_id, name, description, json),
        PlaybookSubcommand::Delete { playbook_id } => delete(session, &playbook_id, json),
        PlaybookSubcommand::Audit { playbook_id } => audit(session, &playbook_id, json),
    }
}

// ---------------------------------------------------------------------------
// create / show / update / delete
// ---------------------------------------------------------------------------

fn create(
    session: &Session,
    name: &str,
    description: &str,
    dataclass: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let ws = session.workspace()?;
    let orch = session.orchestrator()?;
    let new = NewPlaybook::new(name, description);

    let (playbook_id, version_id) = match dataclass {
        Some(dc) => {
            let created = orch
                .create_playbook_with_version(&ws, &new, &VersionFields::new(dc))
                .with_context(|| format!("failed to create playbook '{name}'"))?;
            (created.playbook_id, Some(created.version_id))
        }
        None => {
            let id = orch
                .repository()
                .create_playbook(&ws, &new)
                .with_context(|| format!("failed to create playbook '{name}'"))?;
            (id, None)
        }
    };

    if json {
        print_json(&serde_json::json!({
            "playbook_id": playbook_id,
            "version_id": version_id,
        }))?;
    } else {
        println!("Created playbook {playbook_id}");
        if let Some(v) = version_id {
            println!("Created version {v}");
        }
    }
    Ok(())
}

fn playbook_fields(pb: &Playbook) -> Vec<(&'static str, String)> {
    vec![
        ("id", pb.id.clone()),
        ("name", pb.name.clone()),
        ("description", or_dash(Some(&pb.description))),
        ("enabled", pb.enabled.to_string()),
        ("active version", or_dash(pb.active_version_id.as_deref())),
        (
            "updated",
            or_dash(pb.update_time.map(|t| t.to_rfc3339()).as_deref()),
        ),
    ]
}

fn show(session: &Session, playbook_id: &str, json: bool) -> anyhow::Result<()> {
    let ws = session.workspace()?;
    let pb = session
        .orchestrator()?
        .repository()
        .get_playbook(&ws, playbook_id)
        .with_context(|| format!("failed to read playbook '{playbook_id}'"))?;

    if json {
        print_json(&pb)?;
    } else {
        print_fields(&playbook_fields(&pb));
    }
    Ok(())
}

fn update(
    session: &Session,
    playbook_id: &str,
    name: Option<String>,
    description: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    if name.is_none() && description.is_none() {
        anyhow::bail!("nothing to update: pass --name and/or --description");
    }
    let ws = session.workspace()?;
    let orch = session.orchestrator()?;
    let repo = orch.repository();

    // The update payload always carries the name.
    let name = match name {
        Some(n) => n,
        None => repo
            .get_playbook(&ws, playbook_id)
            .with_context(|| format!("failed to read playbook '{playbook_id}'"))?
            .name,
    };
    let patch = PlaybookPatch {
        name: Some(name),
        description,
        ..Default::default()
    };
    repo.update_playbook(&ws, playbook_id, &patch)
        .with_context(|| format!("failed to update playbook '{playbook_id}'"))?;

    if json {
        print_json(&serde_json::json!({ "playbook_id": playbook_id, "updated": true }))?;
    } else {
        println!("Updated playbook {playbook_id}");
    }
    Ok(())
}

fn delete(session: &Session, playbook_id: &str, json: bool) -> anyhow::Result<()> {
    let ws = session.workspace()?;
    session
        .orchestrator()?
        .repository()
        .delete_playbook(&ws, playbook_id)
        .with_context(|| format!("failed to delete playbook '{playbook_id}'"))?;

    if json {
        print_json(&serde_json::json!({ "playbook_id": playbook_id, "deleted": true }))?;
    } else {
        println!("Deleted playbook {playbook_id}");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// audit
// ---------------------------------------------------------------------------

fn audit(session: &Session, playbook_id: &str, json: bool) -> anyhow::Result<()> {
    let ws = session.workspace()?;
    let report = session
        .orchestrator()?
        .audit(&ws, playbook_id)
        .with_context(|| format!("failed to audit playbook '{playbook_id}'"))?;

    if json {
        print_json(&report)?;
    } else {
        print_fields(&[
            ("playbook", report.playbook_id.clone()),
            ("enabled", report.playbook_enabled.to_string()),
            ("active version", or_dash(report.active_version_id.as_deref())),
            ("versions", report.version_count.to_string()),
            ("enabled versions", or_dash(Some(&report.enabled_versions.join(", ")))),
        ]);
        for v in &report.violations {
            println!("[violation] {v}");
        }
    }

    if !report.is_consistent() {
        anyhow::bail!(
            "playbook '{playbook_id}' has {} invariant violation(s)",
            report.violations.len()
        );
    }
    Ok(())
}
