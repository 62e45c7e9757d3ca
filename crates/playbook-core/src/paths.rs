use crate::error::{PlaybookError, Result};
use regex::{Captures, Regex};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Endpoint templates
// ---------------------------------------------------------------------------

pub const PLAYBOOKS: &str = "v1/{project_id}/workspaces/{workspace_id}/soc/playbooks";
pub const PLAYBOOK: &str = "v1/{project_id}/workspaces/{workspace_id}/soc/playbooks/{playbook_id}";
pub const PLAYBOOK_VERSIONS: &str =
    "v1/{project_id}/workspaces/{workspace_id}/soc/playbooks/{playbook_id}/versions";
pub const VERSION: &str =
    "v1/{project_id}/workspaces/{workspace_id}/soc/playbooks/versions/{version_id}";
pub const VERSION_ACTIONS: &str =
    "v1/{project_id}/workspaces/{workspace_id}/soc/playbooks/versions/{version_id}/actions";
pub const VERSION_ACTION: &str =
    "v1/{project_id}/workspaces/{workspace_id}/soc/playbooks/versions/{version_id}/actions/{action_id}";
pub const VERSION_RULES: &str =
    "v1/{project_id}/workspaces/{workspace_id}/soc/playbooks/versions/{version_id}/rules";
pub const VERSION_RULE: &str =
    "v1/{project_id}/workspaces/{workspace_id}/soc/playbooks/versions/{version_id}/rules/{rule_id}";

// ---------------------------------------------------------------------------
// Substitution
// ---------------------------------------------------------------------------

static PLACEHOLDER_RE: OnceLock<Regex> = OnceLock::new();

fn placeholder_re() -> &'static Regex {
    PLACEHOLDER_RE.get_or_init(|| Regex::new(r"\{([a-z_]+)\}").unwrap())
}

/// Fill every `{name}` placeholder in `template` from `params`.
///
/// A missing parameter, an empty value, or a value containing `/` would
/// address a different resource than intended, so all three are rejected.
pub fn render(template: &str, params: &[(&str, &str)]) -> Result<String> {
    for (name, value) in params {
        if value.trim().is_empty() {
            return Err(PlaybookError::InvalidRequest(format!(
                "{name} must not be empty"
            )));
        }
        if value.contains('/') {
            return Err(PlaybookError::InvalidRequest(format!(
                "{name} '{value}' must not contain '/'"
            )));
        }
    }

    let mut missing = None;
    let rendered = placeholder_re().replace_all(template, |caps: &Captures| {
        let name = &caps[1];
        match params.iter().find(|(k, _)| *k == name) {
            Some((_, v)) => v.to_string(),
            None => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(name) => Err(PlaybookError::InvalidRequest(format!(
            "missing path parameter '{name}'"
        ))),
        None => Ok(rendered.into_owned()),
    }
}

pub fn with_page(path: &str, offset: usize, limit: usize) -> String {
    format!("{path}?offset={offset}&limit={limit}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
