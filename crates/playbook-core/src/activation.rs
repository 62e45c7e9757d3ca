//! Version activation state machine.
//!
//! A version is `Active` when its `enabled` flag is set. Each playbook has at
//! most one active version, and the playbook's `active_version_id` points at
//! it. Every transition reads fresh state before writing; nothing is cached.
//!
//! Commands issued through [`VersionActivationManager::execute`] are one-shot
//! actions: asking for the state a version is already in is a caller error.
//! The `ensure_*` methods reconcile instead and succeed without writing.

use crate::client::ApiClient;
use crate::error::{PlaybookError, Result};
use crate::lock::KeyedLock;
use crate::repository::PlaybookRepository;
use crate::types::{PlaybookPatch, PlaybookVersion, VersionPatch};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

const NO_NEED: &str = "no need to perform this action again";

// ---------------------------------------------------------------------------
// PlaybookContext
// ---------------------------------------------------------------------------

/// The playbook a transition runs against. The name is required by the
/// playbook update payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybookContext {
    pub workspace_id: String,
    pub playbook_id: String,
    pub playbook_name: String,
}

impl PlaybookContext {
    pub fn new(
        workspace_id: impl Into<String>,
        playbook_id: impl Into<String>,
        playbook_name: impl Into<String>,
    ) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            playbook_id: playbook_id.into(),
            playbook_name: playbook_name.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", content = "status", rename_all = "snake_case")]
pub enum VersionCommand {
    Activate,
    Deactivate,
    SetStatus(String),
}

impl VersionCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionCommand::Activate => "activate",
            VersionCommand::Deactivate => "deactivate",
            VersionCommand::SetStatus(_) => "set_status",
        }
    }
}

impl fmt::Display for VersionCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionCommand::SetStatus(s) => write!(f, "set_status({s})"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// A caller's change request as it arrives from outside: either an enable
/// toggle or a status edit, never both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionChangeRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl VersionChangeRequest {
    pub fn into_command(self) -> Result<VersionCommand> {
        match (self.enabled, self.status) {
            (Some(_), Some(_)) => Err(PlaybookError::InvalidRequest(
                "status and enabled cannot be changed in the same request".into(),
            )),
            (Some(true), None) => Ok(VersionCommand::Activate),
            (Some(false), None) => Ok(VersionCommand::Deactivate),
            (None, Some(status)) if status.trim().is_empty() => Err(
                PlaybookError::InvalidRequest("status must not be empty".into()),
            ),
            (None, Some(status)) => Ok(VersionCommand::SetStatus(status)),
            (None, None) => Err(PlaybookError::InvalidRequest(
                "either enabled or status must be given".into(),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition {
    /// The version as last written (or read, when nothing changed).
    pub version: PlaybookVersion,
    pub changed: bool,
    /// Versions of the same playbook that were switched off to make room.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub displaced: Vec<String>,
}

impl Transition {
    fn unchanged(version: PlaybookVersion) -> Self {
        Self {
            version,
            changed: false,
            displaced: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeleteOutcome {
    /// The owning version was switched off before the delete went through.
    pub deactivated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    OneShot,
    Reconcile,
}

// ---------------------------------------------------------------------------
// VersionActivationManager
// ---------------------------------------------------------------------------

pub struct VersionActivationManager<C> {
    repo: PlaybookRepository<C>,
    locks: KeyedLock,
    verify_deletes: bool,
}

impl<C: ApiClient> VersionActivationManager<C> {
    pub fn new(repo: PlaybookRepository<C>) -> Self {
        Self {
            repo,
            locks: KeyedLock::new(),
            verify_deletes: true,
        }
    }

    /// Whether deletes are confirmed by reading the record back.
    pub fn with_verify_deletes(mut self, verify: bool) -> Self {
        self.verify_deletes = verify;
        self
    }

    pub fn repository(&self) -> &PlaybookRepository<C> {
        &self.repo
    }

    /// Run a one-shot command. Requesting the state the version is already
    /// in fails with `InvalidRequest` and issues no writes.
    pub fn execute(
        &self,
        ctx: &PlaybookContext,
        version_id: &str,
        command: &VersionCommand,
    ) -> Result<Transition> {
        self.locks.with_lock(&ctx.playbook_id, || match command {
            VersionCommand::Activate => self.activate_locked(ctx, version_id, Mode::OneShot),
            VersionCommand::Deactivate => self.deactivate_locked(ctx, version_id, Mode::OneShot),
            VersionCommand::SetStatus(status) => self.set_status_locked(ctx, version_id, status),
        })
    }

    pub fn ensure_active(&self, ctx: &PlaybookContext, version_id: &str) -> Result<Transition> {
        self.locks.with_lock(&ctx.playbook_id, || {
            self.activate_locked(ctx, version_id, Mode::Reconcile)
        })
    }

    pub fn ensure_inactive(&self, ctx: &PlaybookContext, version_id: &str) -> Result<Transition> {
        self.locks.with_lock(&ctx.playbook_id, || {
            self.deactivate_locked(ctx, version_id, Mode::Reconcile)
        })
    }

    /// Edit version fields. `enabled` and `status` go through commands, and
    /// only the description may change while the version is active.
    pub fn edit(
        &self,
        ctx: &PlaybookContext,
        version_id: &str,
        patch: &VersionPatch,
    ) -> Result<PlaybookVersion> {
        if patch.touches_lifecycle() {
            return Err(PlaybookError::InvalidRequest(
                "enabled and status are changed with activate, deactivate or status, not edit"
                    .into(),
            ));
        }
        if patch.is_empty() {
            return Err(PlaybookError::InvalidRequest("nothing to change".into()));
        }

        self.locks.with_lock(&ctx.playbook_id, || {
            let version = self.read_owned(ctx, version_id)?;
            let guarded = patch.guarded_fields();
            if version.enabled && !guarded.is_empty() {
                return Err(PlaybookError::InvalidRequest(format!(
                    "this version has been activated and cannot be edited ({})",
                    guarded.join(", ")
                )));
            }
            self.repo
                .update_playbook_version(&ctx.workspace_id, version_id, patch)
        })
    }

    pub fn delete_version(&self, ctx: &PlaybookContext, version_id: &str) -> Result<DeleteOutcome> {
        let ws = ctx.workspace_id.as_str();
        self.locks.with_lock(&ctx.playbook_id, || {
            self.guarded_delete(
                ctx,
                version_id,
                || self.repo.delete_playbook_version(ws, version_id),
                || match self.repo.get_playbook_version(ws, version_id) {
                    Ok(_) => Ok(true),
                    Err(e) if e.is_not_found() => Ok(false),
                    Err(e) => Err(e),
                },
                &format!("version {version_id}"),
            )
        })
    }

    /// Delete an action. An active owning version is switched off first and
    /// stays off afterwards.
    pub fn delete_action(
        &self,
        ctx: &PlaybookContext,
        version_id: &str,
        action_id: &str,
    ) -> Result<DeleteOutcome> {
        let ws = ctx.workspace_id.as_str();
        self.locks.with_lock(&ctx.playbook_id, || {
            self.guarded_delete(
                ctx,
                version_id,
                || self.repo.delete_playbook_action(ws, version_id, action_id),
                || {
                    Ok(self
                        .repo
                        .list_playbook_actions(ws, version_id)?
                        .iter()
                        .any(|a| a.id == action_id))
                },
                &format!("action {action_id}"),
            )
        })
    }

    // -----------------------------------------------------------------------
    // Transitions (caller holds the playbook lock)
    // -----------------------------------------------------------------------

    fn read_owned(&self, ctx: &PlaybookContext, version_id: &str) -> Result<PlaybookVersion> {
        let version = self
            .repo
            .get_playbook_version(&ctx.workspace_id, version_id)?;
        if !version.playbook_id.is_empty() && version.playbook_id != ctx.playbook_id {
            return Err(PlaybookError::InvalidRequest(format!(
                "version {version_id} belongs to playbook {}, not {}",
                version.playbook_id, ctx.playbook_id
            )));
        }
        Ok(version)
    }

    fn activate_locked(
        &self,
        ctx: &PlaybookContext,
        version_id: &str,
        mode: Mode,
    ) -> Result<Transition> {
        let ws = ctx.workspace_id.as_str();
        let version = self.read_owned(ctx, version_id)?;
        let playbook = self.repo.get_playbook(ws, &ctx.playbook_id)?;

        if version.enabled && playbook.enabled && playbook.is_active_version(version_id) {
            return match mode {
                Mode::OneShot => Err(PlaybookError::InvalidRequest(format!(
                    "version {version_id} is already active, {NO_NEED}"
                ))),
                Mode::Reconcile => Ok(Transition::unchanged(version)),
            };
        }

        let mut displaced = Vec::new();
        for other in self.repo.list_playbook_versions(ws, &ctx.playbook_id)? {
            if other.id == version_id || !other.enabled {
                continue;
            }
            match self
                .repo
                .update_playbook_version(ws, &other.id, &VersionPatch::enabled(false))
            {
                Ok(_) => {
                    info!(playbook = %ctx.playbook_id, version = %other.id, "deactivated previously active version");
                    displaced.push(other.id);
                }
                Err(e) if e.is_not_found() => {
                    warn!(playbook = %ctx.playbook_id, version = %other.id, "previously active version vanished");
                }
                Err(e) if displaced.is_empty() => return Err(e),
                Err(e) => return Err(self.interrupted_activation(ctx, version_id, &displaced, e)),
            }
        }

        let version = if version.enabled {
            version
        } else {
            match self
                .repo
                .update_playbook_version(ws, version_id, &VersionPatch::enabled(true))
            {
                Ok(v) => v,
                Err(e) if displaced.is_empty() => return Err(e),
                Err(e) => return Err(self.interrupted_activation(ctx, version_id, &displaced, e)),
            }
        };

        let patch = PlaybookPatch::activate(&ctx.playbook_name, version_id);
        if let Err(err) = self.repo.update_playbook(ws, &ctx.playbook_id, &patch) {
            warn!(playbook = %ctx.playbook_id, version = version_id, error = %err,
                "playbook update failed after enabling version, re-reading");
            return match self.repo.get_playbook(ws, &ctx.playbook_id) {
                Ok(pb) if pb.enabled && pb.is_active_version(version_id) => {
                    info!(playbook = %ctx.playbook_id, version = version_id, "playbook already converged");
                    Ok(Transition {
                        version,
                        changed: true,
                        displaced,
                    })
                }
                _ => Err(self.interrupted_activation(ctx, version_id, &displaced, err)),
            };
        }

        info!(playbook = %ctx.playbook_id, version = version_id, "version activated");
        Ok(Transition {
            version,
            changed: true,
            displaced,
        })
    }

    fn deactivate_locked(
        &self,
        ctx: &PlaybookContext,
        version_id: &str,
        mode: Mode,
    ) -> Result<Transition> {
        let ws = ctx.workspace_id.as_str();
        let version = self.read_owned(ctx, version_id)?;
        let playbook = self.repo.get_playbook(ws, &ctx.playbook_id)?;
        let referenced = playbook.is_active_version(version_id);

        if !version.enabled && !referenced {
            return match mode {
                Mode::OneShot => Err(PlaybookError::InvalidRequest(format!(
                    "version {version_id} is already inactive, {NO_NEED}"
                ))),
                Mode::Reconcile => Ok(Transition::unchanged(version)),
            };
        }

        let was_enabled = version.enabled;
        let version = if was_enabled {
            self.repo
                .update_playbook_version(ws, version_id, &VersionPatch::enabled(false))?
        } else {
            version
        };
        if referenced {
            let patch = PlaybookPatch::deactivate(&ctx.playbook_name);
            if let Err(err) = self.repo.update_playbook(ws, &ctx.playbook_id, &patch) {
                warn!(playbook = %ctx.playbook_id, version = version_id, error = %err,
                    "playbook update failed after disabling version, re-reading");
                match self.repo.get_playbook(ws, &ctx.playbook_id) {
                    Ok(pb) if !pb.is_active_version(version_id) => {
                        info!(playbook = %ctx.playbook_id, version = version_id, "playbook already converged");
                    }
                    _ if !was_enabled => return Err(err),
                    _ => {
                        return Err(PlaybookError::Transient(format!(
                            "version {version_id} is disabled but playbook {} still references it ({err}); retry the deactivation",
                            ctx.playbook_id
                        )))
                    }
                }
            }
        }

        info!(playbook = %ctx.playbook_id, version = version_id, "version deactivated");
        Ok(Transition {
            version,
            changed: true,
            displaced: Vec::new(),
        })
    }

    /// Turn a failure after the first write of an activation into a
    /// retryable error. A playbook still pointing at a version this
    /// activation switched off has its reference cleared first.
    fn interrupted_activation(
        &self,
        ctx: &PlaybookContext,
        version_id: &str,
        displaced: &[String],
        err: PlaybookError,
    ) -> PlaybookError {
        let ws = ctx.workspace_id.as_str();
        match self.repo.get_playbook(ws, &ctx.playbook_id) {
            Ok(pb)
                if pb
                    .active_version_id
                    .as_ref()
                    .is_some_and(|active| displaced.contains(active)) =>
            {
                let patch = PlaybookPatch::deactivate(&ctx.playbook_name);
                match self.repo.update_playbook(ws, &ctx.playbook_id, &patch) {
                    Ok(()) => {
                        info!(playbook = %ctx.playbook_id, "cleared reference to displaced version")
                    }
                    Err(e) => {
                        warn!(playbook = %ctx.playbook_id, error = %e, "could not clear reference to displaced version")
                    }
                }
            }
            Ok(_) => {}
            Err(e) => warn!(playbook = %ctx.playbook_id, error = %e, "could not re-read playbook"),
        }
        PlaybookError::Transient(format!(
            "activation of version {version_id} stopped part-way ({err}); retry the activation"
        ))
    }

    fn set_status_locked(
        &self,
        ctx: &PlaybookContext,
        version_id: &str,
        status: &str,
    ) -> Result<Transition> {
        let version = self.read_owned(ctx, version_id)?;
        if version.status == status {
            return Err(PlaybookError::InvalidRequest(format!(
                "version {version_id} already has status {status}, {NO_NEED}"
            )));
        }
        let version = self.repo.update_playbook_version(
            &ctx.workspace_id,
            version_id,
            &VersionPatch::status(status),
        )?;
        info!(playbook = %ctx.playbook_id, version = version_id, status, "version status changed");
        Ok(Transition {
            version,
            changed: true,
            displaced: Vec::new(),
        })
    }

    /// Deactivate-then-delete. A `Conflict` from the delete earns one more
    /// deactivation and one retry; a second `Conflict` is returned as is.
    fn guarded_delete(
        &self,
        ctx: &PlaybookContext,
        version_id: &str,
        delete: impl Fn() -> Result<()>,
        still_present: impl Fn() -> Result<bool>,
        what: &str,
    ) -> Result<DeleteOutcome> {
        // Clears a stale playbook reference even when the version is already off.
        let mut deactivated = self
            .deactivate_locked(ctx, version_id, Mode::Reconcile)?
            .changed;
        if deactivated {
            warn!(playbook = %ctx.playbook_id, version = version_id, "deactivated version before deleting {what}");
        }

        match delete() {
            Ok(()) => {}
            Err(PlaybookError::Conflict(msg)) => {
                warn!(playbook = %ctx.playbook_id, version = version_id, conflict = %msg,
                    "delete of {what} rejected, deactivating and retrying once");
                let t = self.deactivate_locked(ctx, version_id, Mode::Reconcile)?;
                deactivated |= t.changed;
                delete()?;
            }
            Err(e) => return Err(e),
        }

        if self.verify_deletes && still_present()? {
            return Err(PlaybookError::Inconsistent(format!(
                "delete of {what} was acknowledged but it still exists"
            )));
        }
        info!(playbook = %ctx.playbook_id, version = version_id, deactivated, "deleted {what}");
        Ok(DeleteOutcome { deactivated })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
