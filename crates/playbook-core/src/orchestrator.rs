//! Multi-entity operations callers invoke as a unit.
//!
//! Nothing here is transactional. When a sequence fails part-way, the
//! records already created are reported in [`PlaybookError::PartialFailure`]
//! so the caller can retry or clean up.

use crate::activation::{
    DeleteOutcome, PlaybookContext, Transition, VersionActivationManager, VersionChangeRequest,
    VersionCommand,
};
use crate::client::ApiClient;
use crate::error::{PlaybookError, Result};
use crate::repository::PlaybookRepository;
use crate::types::{ActionFields, NewPlaybook, PlaybookVersion, RuleFields, VersionFields, VersionPatch};
use serde::Serialize;
use std::fmt;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedPlaybook {
    pub playbook_id: String,
    pub version_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AttachedIds {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    pub action_ids: Vec<String>,
}

impl AttachedIds {
    fn created(&self) -> Vec<String> {
        self.rule_id
            .iter()
            .chain(self.action_ids.iter())
            .cloned()
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditViolation {
    MultipleActive { versions: Vec<String> },
    DanglingReference { version_id: String },
    ReferenceToInactive { version_id: String },
    UnreferencedActive { version_id: String },
    EnabledWithoutVersion,
}

impl fmt::Display for AuditViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditViolation::MultipleActive { versions } => {
                write!(f, "more than one enabled version: {}", versions.join(", "))
            }
            AuditViolation::DanglingReference { version_id } => {
                write!(f, "active_version_id {version_id} does not exist")
            }
            AuditViolation::ReferenceToInactive { version_id } => {
                write!(f, "active_version_id {version_id} is not enabled")
            }
            AuditViolation::UnreferencedActive { version_id } => {
                write!(f, "version {version_id} is enabled but not referenced by the playbook")
            }
            AuditViolation::EnabledWithoutVersion => {
                f.write_str("playbook is enabled without an active version")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub playbook_id: String,
    pub playbook_enabled: bool,
    pub active_version_id: Option<String>,
    pub version_count: usize,
    pub enabled_versions: Vec<String>,
    pub violations: Vec<AuditViolation>,
}

impl AuditReport {
    pub fn is_consistent(&self) -> bool {
        self.violations.is_empty()
    }
}

// ---------------------------------------------------------------------------
// PlaybookOrchestrator
// ---------------------------------------------------------------------------

pub struct PlaybookOrchestrator<C> {
    manager: VersionActivationManager<C>,
}

impl<C: ApiClient> PlaybookOrchestrator<C> {
    pub fn new(repo: PlaybookRepository<C>) -> Self {
        Self::with_manager(VersionActivationManager::new(repo))
    }

    pub fn with_manager(manager: VersionActivationManager<C>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &VersionActivationManager<C> {
        &self.manager
    }

    pub fn repository(&self) -> &PlaybookRepository<C> {
        self.manager.repository()
    }

    /// Read the playbook to learn its name.
    pub fn context(&self, ws: &str, playbook_id: &str) -> Result<PlaybookContext> {
        let playbook = self.repository().get_playbook(ws, playbook_id)?;
        Ok(PlaybookContext::new(ws, playbook.id, playbook.name))
    }

    pub fn owning_playbook(&self, ws: &str, version_id: &str) -> Result<String> {
        let version = self.repository().get_playbook_version(ws, version_id)?;
        if version.playbook_id.is_empty() {
            return Err(PlaybookError::InvalidRequest(format!(
                "version {version_id} does not report its playbook; pass the playbook id"
            )));
        }
        Ok(version.playbook_id)
    }

    pub fn create_playbook_with_version(
        &self,
        ws: &str,
        playbook: &NewPlaybook,
        fields: &VersionFields,
    ) -> Result<CreatedPlaybook> {
        let playbook_id = self.repository().create_playbook(ws, playbook)?;
        match self
            .repository()
            .create_playbook_version(ws, &playbook_id, fields)
        {
            Ok(version_id) => {
                info!(playbook = %playbook_id, version = %version_id, "created playbook with first version");
                Ok(CreatedPlaybook {
                    playbook_id,
                    version_id,
                })
            }
            Err(source) => {
                warn!(playbook = %playbook_id, error = %source, "version creation failed, playbook left behind");
                Err(PlaybookError::PartialFailure {
                    orphaned: vec![playbook_id],
                    source: Box::new(source),
                })
            }
        }
    }

    /// Create the rule (if any), then each action in the order given.
    /// `sort_order` is passed through and repeated `action_id`s are kept.
    pub fn attach_rule_and_actions(
        &self,
        ws: &str,
        version_id: &str,
        rule: Option<&RuleFields>,
        actions: &[ActionFields],
    ) -> Result<AttachedIds> {
        let mut attached = AttachedIds::default();
        let result = (|| -> Result<()> {
            if let Some(rule) = rule {
                attached.rule_id = Some(self.repository().create_playbook_rule(ws, version_id, rule)?);
            }
            for action in actions {
                let id = self
                    .repository()
                    .create_playbook_action(ws, version_id, action)?;
                attached.action_ids.push(id);
            }
            Ok(())
        })();

        match result {
            Ok(()) => Ok(attached),
            Err(source) => {
                let orphaned = attached.created();
                if orphaned.is_empty() {
                    return Err(source);
                }
                warn!(version = version_id, created = orphaned.len(), error = %source, "attach stopped part-way");
                Err(PlaybookError::PartialFailure {
                    orphaned,
                    source: Box::new(source),
                })
            }
        }
    }

    pub fn activate(&self, ws: &str, playbook_id: &str, version_id: &str) -> Result<Transition> {
        let ctx = self.context(ws, playbook_id)?;
        self.manager
            .execute(&ctx, version_id, &VersionCommand::Activate)
    }

    pub fn deactivate(&self, ws: &str, playbook_id: &str, version_id: &str) -> Result<Transition> {
        let ctx = self.context(ws, playbook_id)?;
        self.manager
            .execute(&ctx, version_id, &VersionCommand::Deactivate)
    }

    pub fn set_status(
        &self,
        ws: &str,
        playbook_id: &str,
        version_id: &str,
        status: &str,
    ) -> Result<Transition> {
        let request = VersionChangeRequest {
            status: Some(status.to_string()),
            ..Default::default()
        };
        self.apply_change(ws, playbook_id, version_id, request)
    }

    /// Validate the request before touching the API, then run it as a
    /// one-shot command.
    pub fn apply_change(
        &self,
        ws: &str,
        playbook_id: &str,
        version_id: &str,
        request: VersionChangeRequest,
    ) -> Result<Transition> {
        let command = request.into_command()?;
        let ctx = self.context(ws, playbook_id)?;
        self.manager.execute(&ctx, version_id, &command)
    }

    pub fn edit_version(
        &self,
        ws: &str,
        playbook_id: &str,
        version_id: &str,
        patch: &VersionPatch,
    ) -> Result<PlaybookVersion> {
        let ctx = self.context(ws, playbook_id)?;
        self.manager.edit(&ctx, version_id, patch)
    }

    pub fn delete_version(&self, ws: &str, playbook_id: &str, version_id: &str) -> Result<DeleteOutcome> {
        let ctx = self.context(ws, playbook_id)?;
        self.manager.delete_version(&ctx, version_id)
    }

    pub fn delete_action(
        &self,
        ws: &str,
        playbook_id: &str,
        version_id: &str,
        action_id: &str,
    ) -> Result<DeleteOutcome> {
        let ctx = self.context(ws, playbook_id)?;
        self.manager.delete_action(&ctx, version_id, action_id)
    }

    /// Check the single-active-version and back-reference invariants
    /// against live state.
    pub fn audit(&self, ws: &str, playbook_id: &str) -> Result<AuditReport> {
        let playbook = self.repository().get_playbook(ws, playbook_id)?;
        let versions = self.repository().list_playbook_versions(ws, playbook_id)?;
        let enabled: Vec<String> = versions
            .iter()
            .filter(|v| v.enabled)
            .map(|v| v.id.clone())
            .collect();

        let mut violations = Vec::new();
        if enabled.len() > 1 {
            violations.push(AuditViolation::MultipleActive {
                versions: enabled.clone(),
            });
        }
        match playbook.active_version_id.as_deref() {
            Some(active) => match versions.iter().find(|v| v.id == active) {
                None => violations.push(AuditViolation::DanglingReference {
                    version_id: active.to_string(),
                }),
                Some(v) if !v.enabled => violations.push(AuditViolation::ReferenceToInactive {
                    version_id: active.to_string(),
                }),
                Some(_) => {}
            },
            None if playbook.enabled => violations.push(AuditViolation::EnabledWithoutVersion),
            None => {}
        }
        for id in &enabled {
            if !playbook.is_active_version(id) {
                violations.push(AuditViolation::UnreferencedActive {
                    version_id: id.clone(),
                });
            }
        }

        if !violations.is_empty() {
            warn!(playbook = playbook_id, violations = violations.len(), "playbook invariants violated");
        }
        Ok(AuditReport {
            playbook_id: playbook.id,
            playbook_enabled: playbook.enabled,
            active_version_id: playbook.active_version_id,
            version_count: versions.len(),
            enabled_versions: enabled,
            violations,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Method;
    use crate::error::ErrorKind;
    use crate::fake::FakeSocApi;
    use crate::types::{RuleCondition, RuleExpression};
    use serde_json::json;
    use std::sync::Arc;

    fn orchestrator() -> (Arc<FakeSocApi>, PlaybookOrchestrator<Arc<FakeSocApi>>) {
        let api = Arc::new(FakeSocApi::new("proj"));
        let orch = PlaybookOrchestrator::new(PlaybookRepository::new(api.clone()));
        (api, orch)
    }

    fn created(orch: &PlaybookOrchestrator<Arc<FakeSocApi>>) -> CreatedPlaybook {
        orch.create_playbook_with_version(
            "ws",
            &NewPlaybook::new("n", "d"),
            &VersionFields::new("dc1"),
        )
        .unwrap()
    }

    #[test]
    fn create_with_version_round_trips() {
        let (_api, orch) = orchestrator();
        let ids = created(&orch);

        let pb = orch.repository().get_playbook("ws", &ids.playbook_id).unwrap();
        assert_eq!(pb.name, "n");
        assert_eq!(pb.description, "d");
        assert!(!pb.enabled);

        let v = orch
            .repository()
            .get_playbook_version("ws", &ids.version_id)
            .unwrap();
        assert_eq!(v.dataclass_id, "dc1");
        assert_eq!(v.playbook_id, ids.playbook_id);
        assert!(!v.enabled);
    }

    #[test]
    fn failed_version_create_reports_orphaned_playbook() {
        let (api, orch) = orchestrator();
        api.fail_next(
            Method::Post,
            "/versions",
            400,
            json!({"code": "SecMaster.00000001", "message": "unknown dataclass"}),
        );

        let err = orch
            .create_playbook_with_version("ws", &NewPlaybook::new("n", ""), &VersionFields::new("dc?"))
            .unwrap_err();

        match err {
            PlaybookError::PartialFailure { orphaned, source } => {
                assert_eq!(orphaned.len(), 1);
                assert!(api.playbook(&orphaned[0]).is_some());
                assert_eq!(source.kind(), ErrorKind::Api);
            }
            other => panic!("expected PartialFailure, got {other:?}"),
        }
    }

    #[test]
    fn attach_creates_rule_then_actions_in_order() {
        let (api, orch) = orchestrator();
        let ids = created(&orch);
        let rule = RuleFields::new(RuleExpression {
            conditions: vec![RuleCondition {
                name: "c1".into(),
                detail: String::new(),
                data: vec!["a".into(), "b".into()],
            }],
            logics: vec!["AND".into()],
        });
        let actions: Vec<ActionFields> = [(3, "wf-a"), (1, "wf-b"), (2, "wf-a")]
            .into_iter()
            .map(|(order, action_id)| ActionFields {
                sort_order: Some(order),
                ..ActionFields::new(action_id, format!("step {order}"))
            })
            .collect();

        let attached = orch
            .attach_rule_and_actions("ws", &ids.version_id, Some(&rule), &actions)
            .unwrap();

        assert!(attached.rule_id.is_some());
        assert_eq!(attached.action_ids.len(), 3);
        let posts: Vec<String> = api
            .calls()
            .into_iter()
            .filter(|c| c.method == Method::Post && c.path.contains("/versions/"))
            .map(|c| c.path)
            .collect();
        assert!(posts[0].ends_with("/rules"));
        assert!(posts[1..].iter().all(|p| p.ends_with("/actions")));

        let listed = orch
            .repository()
            .list_playbook_actions("ws", &ids.version_id)
            .unwrap();
        let orders: Vec<i32> = listed.iter().map(|a| a.sort_order).collect();
        assert_eq!(orders, vec![3, 1, 2]);
        assert_eq!(listed.iter().filter(|a| a.action_id == "wf-a").count(), 2);
    }

    #[test]
    fn attach_failure_names_created_records() {
        let (api, orch) = orchestrator();
        let ids = created(&orch);
        let actions = vec![ActionFields::new("wf-1", "one"), ActionFields::new("wf-2", "two")];
        api.fail_next(Method::Post, "/actions", 502, json!({"message": "bad gateway"}));
        // The first action post fails; the rule is the only record left behind.
        let err = orch
            .attach_rule_and_actions(
                "ws",
                &ids.version_id,
                Some(&RuleFields::new(RuleExpression::default())),
                &actions,
            )
            .unwrap_err();

        match err {
            PlaybookError::PartialFailure { orphaned, source } => {
                assert_eq!(orphaned.len(), 1);
                assert!(orphaned[0].starts_with("rule-"));
                assert!(source.is_retryable());
            }
            other => panic!("expected PartialFailure, got {other:?}"),
        }
    }

    #[test]
    fn attach_failure_before_anything_created_is_plain() {
        let (api, orch) = orchestrator();
        let ids = created(&orch);
        api.fail_next(Method::Post, "/actions", 404, json!({"message": "no such version"}));
        let err = orch
            .attach_rule_and_actions("ws", &ids.version_id, None, &[ActionFields::new("wf", "x")])
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn activate_resolves_playbook_name() {
        let (api, orch) = orchestrator();
        let ids = created(&orch);

        orch.activate("ws", &ids.playbook_id, &ids.version_id).unwrap();

        let body = api
            .last_body(Method::Put, &format!("playbooks/{}", ids.playbook_id))
            .unwrap();
        assert_eq!(body["name"], "n");
        assert_eq!(body["enabled"], true);
        assert_eq!(body["active_version_id"], json!(ids.version_id));
        assert!(orch.audit("ws", &ids.playbook_id).unwrap().is_consistent());
    }

    #[test]
    fn conflicting_change_request_makes_no_calls() {
        let (api, orch) = orchestrator();
        let ids = created(&orch);
        api.clear_calls();

        let err = orch
            .apply_change(
                "ws",
                &ids.playbook_id,
                &ids.version_id,
                VersionChangeRequest {
                    enabled: Some(true),
                    status: Some("APPROVING".into()),
                },
            )
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        assert!(api.calls().is_empty());
    }

    #[test]
    fn delete_version_through_orchestrator() {
        let (api, orch) = orchestrator();
        let ids = created(&orch);
        orch.activate("ws", &ids.playbook_id, &ids.version_id).unwrap();

        let out = orch
            .delete_version("ws", &ids.playbook_id, &ids.version_id)
            .unwrap();

        assert!(out.deactivated);
        assert!(api.version(&ids.version_id).is_none());
        let report = orch.audit("ws", &ids.playbook_id).unwrap();
        assert_eq!(report.version_count, 0);
        assert_eq!(report.active_version_id, None);
    }

    #[test]
    fn owning_playbook_comes_from_version() {
        let (_api, orch) = orchestrator();
        let ids = created(&orch);
        assert_eq!(
            orch.owning_playbook("ws", &ids.version_id).unwrap(),
            ids.playbook_id
        );
    }

    #[test]
    fn audit_flags_broken_invariants() {
        let (api, orch) = orchestrator();
        let ids = created(&orch);
        let v2 = orch
            .repository()
            .create_playbook_version("ws", &ids.playbook_id, &VersionFields::new("dc1"))
            .unwrap();
        api.poke_version(&ids.version_id, "enabled", json!(true));
        api.poke_version(&v2, "enabled", json!(true));
        api.poke_playbook(&ids.playbook_id, "enabled", json!(true));
        api.poke_playbook(&ids.playbook_id, "active_version_id", json!("ver-gone"));

        let report = orch.audit("ws", &ids.playbook_id).unwrap();

        assert!(!report.is_consistent());
        assert_eq!(report.enabled_versions.len(), 2);
        assert!(report
            .violations
            .iter()
            .any(|v| matches!(v, AuditViolation::MultipleActive { .. })));
        assert!(report.violations.contains(&AuditViolation::DanglingReference {
            version_id: "ver-gone".into()
        }));
        assert_eq!(
            report
                .violations
                .iter()
                .filter(|v| matches!(v, AuditViolation::UnreferencedActive { .. }))
                .count(),
            2
        );
    }

    #[test]
    fn audit_flags_enabled_playbook_without_version() {
        let (api, orch) = orchestrator();
        let ids = created(&orch);
        api.poke_playbook(&ids.playbook_id, "enabled", json!(true));

        let report = orch.audit("ws", &ids.playbook_id).unwrap();
        assert_eq!(report.violations, vec![AuditViolation::EnabledWithoutVersion]);
        assert_eq!(
            report.violations[0].to_string(),
            "playbook is enabled without an active version"
        );
    }
}
