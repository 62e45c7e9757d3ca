//! Entity-level operations over the SOC API.
//!
//! The repository renders paths, builds request bodies, unwraps the `data`
//! envelope into typed records and classifies failures. It applies no
//! lifecycle rules of its own, with one exception: version updates are always
//! read-modify-write, because the endpoint replaces the whole record.

use crate::classify::ErrorTable;
use crate::client::{ApiClient, Method};
use crate::error::{Entity, PlaybookError, Result};
use crate::paths;
use crate::types::{
    schedule_members, ActionFields, NewPlaybook, Playbook, PlaybookAction, PlaybookPatch,
    PlaybookRule, PlaybookVersion, RuleExpression, RuleFields, RuleSchedule, VersionFields,
    VersionPatch,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Page size used when walking paginated list endpoints.
pub const PAGE_LIMIT: usize = 100;

/// Upper bound on records collected by one [`PlaybookRepository::fetch_all`].
pub const MAX_FETCH_ITEMS: usize = 10_000;

/// Actions are listed in one page; the server caps the result at this size.
pub const ACTION_LIST_LIMIT: usize = 1000;

// ---------------------------------------------------------------------------
// Wire envelopes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct CreatedId {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    data: Vec<Value>,
    #[serde(default)]
    total: Option<usize>,
}

/// A rule as the API stores it: the expression travels as a JSON string.
#[derive(Debug, Deserialize)]
struct RuleRecord {
    id: String,
    #[serde(default, alias = "playbook_version_id")]
    version_id: Option<String>,
    #[serde(default)]
    expression_type: String,
    #[serde(default)]
    rule: Option<String>,
    #[serde(flatten)]
    schedule: RuleSchedule,
}

impl RuleRecord {
    fn into_rule(self, version_id: &str) -> Result<PlaybookRule> {
        let expression = match self.rule.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => serde_json::from_str::<RuleExpression>(raw)?,
            _ => RuleExpression::default(),
        };
        Ok(PlaybookRule {
            id: self.id,
            version_id: self
                .version_id
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| version_id.to_string()),
            expression_type: self.expression_type,
            expression,
            schedule: self.schedule,
        })
    }
}

fn rule_body(fields: &RuleFields) -> Result<Value> {
    let mut map = schedule_members(&fields.schedule);
    map.insert(
        "expression_type".into(),
        Value::String(fields.expression_type.clone()),
    );
    map.insert(
        "rule".into(),
        Value::String(serde_json::to_string(&fields.expression)?),
    );
    Ok(Value::Object(map))
}

// ---------------------------------------------------------------------------
// PlaybookRepository
// ---------------------------------------------------------------------------

pub struct PlaybookRepository<C> {
    client: C,
    errors: ErrorTable,
}

impl<C: ApiClient> PlaybookRepository<C> {
    pub fn new(client: C) -> Self {
        Self::with_error_table(client, ErrorTable::default())
    }

    pub fn with_error_table(client: C, errors: ErrorTable) -> Self {
        Self { client, errors }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn error_table(&self) -> &ErrorTable {
        &self.errors
    }

    // -----------------------------------------------------------------------
    // Plumbing
    // -----------------------------------------------------------------------

    fn path(&self, template: &str, ws: &str, params: &[(&str, &str)]) -> Result<String> {
        let mut all = vec![("project_id", self.client.project_id()), ("workspace_id", ws)];
        all.extend_from_slice(params);
        paths::render(template, &all)
    }

    fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        entity: Entity,
        id: &str,
    ) -> Result<Value> {
        let resp = self.client.request(method, path, body)?;
        if resp.is_success() {
            Ok(resp.body)
        } else {
            let err = self.errors.to_error(resp.status, &resp.body, entity, id);
            debug!(%method, path, status = resp.status, error = %err, "SOC API call failed");
            Err(err)
        }
    }

    fn call_data<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        entity: Entity,
        id: &str,
    ) -> Result<T> {
        let value = self.call(method, path, body, entity, id)?;
        let envelope: Envelope<T> = serde_json::from_value(value)?;
        Ok(envelope.data)
    }

    fn create(&self, path: &str, body: &Value, entity: Entity, parent: &str) -> Result<String> {
        let created: CreatedId = self.call_data(Method::Post, path, Some(body), entity, parent)?;
        Ok(created.id)
    }

    /// Walk an offset/limit list endpoint until a short page (or the reported
    /// total) ends it. A page that brings no unseen ids also ends the walk,
    /// as does reaching [`MAX_FETCH_ITEMS`].
    pub fn fetch_all(&self, path: &str, limit: usize, entity: Entity, id: &str) -> Result<Vec<Value>> {
        let limit = limit.max(1);
        let mut items = Vec::new();
        let mut seen = HashSet::new();
        let mut offset = 0;
        loop {
            let page_path = paths::with_page(path, offset, limit);
            let page: Page = serde_json::from_value(self.call(Method::Get, &page_path, None, entity, id)?)?;
            let count = page.data.len();
            let before = items.len();
            for item in page.data {
                let fresh = match item.get("id").and_then(Value::as_str) {
                    Some(item_id) => seen.insert(item_id.to_string()),
                    None => true,
                };
                if fresh {
                    items.push(item);
                }
            }
            if count > 0 && items.len() == before {
                warn!(path, offset, "list endpoint repeated a page, stopping");
                break;
            }
            offset += count;
            let exhausted = page.total.is_some_and(|total| offset >= total);
            if count < limit || exhausted || offset >= MAX_FETCH_ITEMS {
                break;
            }
        }
        Ok(items)
    }

    // -----------------------------------------------------------------------
    // Playbooks
    // -----------------------------------------------------------------------

    pub fn create_playbook(&self, ws: &str, new: &NewPlaybook) -> Result<String> {
        let path = self.path(paths::PLAYBOOKS, ws, &[])?;
        self.create(&path, &new.to_body(ws), Entity::Workspace, ws)
    }

    pub fn get_playbook(&self, ws: &str, id: &str) -> Result<Playbook> {
        let path = self.path(paths::PLAYBOOK, ws, &[("playbook_id", id)])?;
        self.call_data(Method::Get, &path, None, Entity::Playbook, id)
    }

    pub fn update_playbook(&self, ws: &str, id: &str, patch: &PlaybookPatch) -> Result<()> {
        let path = self.path(paths::PLAYBOOK, ws, &[("playbook_id", id)])?;
        self.call(Method::Put, &path, Some(&patch.to_body()), Entity::Playbook, id)?;
        Ok(())
    }

    pub fn delete_playbook(&self, ws: &str, id: &str) -> Result<()> {
        let path = self.path(paths::PLAYBOOK, ws, &[("playbook_id", id)])?;
        self.call(Method::Delete, &path, None, Entity::Playbook, id)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Versions
    // -----------------------------------------------------------------------

    pub fn list_playbook_versions(&self, ws: &str, playbook_id: &str) -> Result<Vec<PlaybookVersion>> {
        let path = self.path(paths::PLAYBOOK_VERSIONS, ws, &[("playbook_id", playbook_id)])?;
        self.fetch_all(&path, PAGE_LIMIT, Entity::Playbook, playbook_id)?
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(PlaybookError::from))
            .collect()
    }

    pub fn get_playbook_version(&self, ws: &str, id: &str) -> Result<PlaybookVersion> {
        let path = self.path(paths::VERSION, ws, &[("version_id", id)])?;
        self.call_data(Method::Get, &path, None, Entity::Version, id)
    }

    pub fn create_playbook_version(
        &self,
        ws: &str,
        playbook_id: &str,
        fields: &VersionFields,
    ) -> Result<String> {
        let path = self.path(paths::PLAYBOOK_VERSIONS, ws, &[("playbook_id", playbook_id)])?;
        self.create(&path, &fields.to_body(), Entity::Playbook, playbook_id)
    }

    /// Read the current version, merge `patch` onto it and write the full
    /// record back. Fields absent from `patch` keep their current values.
    pub fn update_playbook_version(
        &self,
        ws: &str,
        id: &str,
        patch: &VersionPatch,
    ) -> Result<PlaybookVersion> {
        let mut version = self.get_playbook_version(ws, id)?;
        patch.apply_to(&mut version);
        let path = self.path(paths::VERSION, ws, &[("version_id", id)])?;
        self.call(
            Method::Put,
            &path,
            Some(&version.to_update_body()),
            Entity::Version,
            id,
        )?;
        Ok(version)
    }

    pub fn delete_playbook_version(&self, ws: &str, id: &str) -> Result<()> {
        let path = self.path(paths::VERSION, ws, &[("version_id", id)])?;
        self.call(Method::Delete, &path, None, Entity::Version, id)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Actions
    // -----------------------------------------------------------------------

    pub fn list_playbook_actions(&self, ws: &str, version_id: &str) -> Result<Vec<PlaybookAction>> {
        let path = self.path(paths::VERSION_ACTIONS, ws, &[("version_id", version_id)])?;
        let page_path = paths::with_page(&path, 0, ACTION_LIST_LIMIT);
        let value = self.call(Method::Get, &page_path, None, Entity::Version, version_id)?;
        let page: Page = serde_json::from_value(value)?;
        page.data
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(PlaybookError::from))
            .collect()
    }

    pub fn create_playbook_action(
        &self,
        ws: &str,
        version_id: &str,
        fields: &ActionFields,
    ) -> Result<String> {
        let path = self.path(paths::VERSION_ACTIONS, ws, &[("version_id", version_id)])?;
        self.create(&path, &fields.to_body(), Entity::Version, version_id)
    }

    pub fn update_playbook_action(
        &self,
        ws: &str,
        version_id: &str,
        action_id: &str,
        fields: &ActionFields,
    ) -> Result<()> {
        let path = self.path(
            paths::VERSION_ACTION,
            ws,
            &[("version_id", version_id), ("action_id", action_id)],
        )?;
        self.call(Method::Put, &path, Some(&fields.to_body()), Entity::Action, action_id)?;
        Ok(())
    }

    pub fn delete_playbook_action(&self, ws: &str, version_id: &str, action_id: &str) -> Result<()> {
        let path = self.path(
            paths::VERSION_ACTION,
            ws,
            &[("version_id", version_id), ("action_id", action_id)],
        )?;
        self.call(Method::Delete, &path, None, Entity::Action, action_id)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Rules
    // -----------------------------------------------------------------------

    pub fn get_playbook_rule(&self, ws: &str, version_id: &str, rule_id: &str) -> Result<PlaybookRule> {
        let path = self.path(
            paths::VERSION_RULE,
            ws,
            &[("version_id", version_id), ("rule_id", rule_id)],
        )?;
        let record: RuleRecord = self.call_data(Method::Get, &path, None, Entity::Rule, rule_id)?;
        record.into_rule(version_id)
    }

    pub fn create_playbook_rule(&self, ws: &str, version_id: &str, fields: &RuleFields) -> Result<String> {
        let path = self.path(paths::VERSION_RULES, ws, &[("version_id", version_id)])?;
        self.create(&path, &rule_body(fields)?, Entity::Version, version_id)
    }

    pub fn update_playbook_rule(
        &self,
        ws: &str,
        version_id: &str,
        rule_id: &str,
        fields: &RuleFields,
    ) -> Result<()> {
        let path = self.path(
            paths::VERSION_RULE,
            ws,
            &[("version_id", version_id), ("rule_id", rule_id)],
        )?;
        self.call(Method::Put, &path, Some(&rule_body(fields)?), Entity::Rule, rule_id)?;
        Ok(())
    }

    pub fn delete_playbook_rule(&self, ws: &str, version_id: &str, rule_id: &str) -> Result<()> {
        let path = self.path(
            paths::VERSION_RULE,
            ws,
            &[("version_id", version_id), ("rule_id", rule_id)],
        )?;
        self.call(Method::Delete, &path, None, Entity::Rule, rule_id)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::HttpApiClient;
    use crate::classify::WORKSPACE_NOT_FOUND;
    use crate::error::ErrorKind;
    use crate::fake::FakeSocApi;
    use crate::types::RuleCondition;
    use mockito::Matcher;
    use serde_json::json;
    use std::sync::Arc;

    fn http_repo(server: &mockito::Server) -> PlaybookRepository<HttpApiClient> {
        PlaybookRepository::new(HttpApiClient::new(server.url(), "proj").unwrap())
    }

    #[test]
    fn workspace_not_found_is_classified() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/v1/proj/workspaces/missing/soc/playbooks/p1")
            .with_status(403)
            .with_body(format!(r#"{{"code": "{WORKSPACE_NOT_FOUND}", "message": "no ws"}}"#))
            .create();

        let err = http_repo(&server).get_playbook("missing", "p1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WorkspaceNotFound);
    }

    #[test]
    fn version_read_unwraps_envelope() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/v1/proj/workspaces/ws/soc/playbooks/versions/v1")
            .with_status(200)
            .with_body(
                r#"{"data": {"id": "v1", "playbook_id": "p1", "dataclass_id": "dc1",
                    "enabled": false, "version": "v1.0.0", "create_time": 1700000000000}}"#,
            )
            .create();

        let version = http_repo(&server).get_playbook_version("ws", "v1").unwrap();
        assert_eq!(version.playbook_id, "p1");
        assert_eq!(version.dataclass_id, "dc1");
        assert_eq!(version.version, "v1.0.0");
    }

    #[test]
    fn delete_of_active_version_is_conflict() {
        let mut server = mockito::Server::new();
        server
            .mock("DELETE", "/v1/proj/workspaces/ws/soc/playbooks/versions/v1")
            .with_status(409)
            .with_body(r#"{"code": "SecMaster.20048001", "message": "version is enabled"}"#)
            .create();

        let err = http_repo(&server).delete_playbook_version("ws", "v1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(err.to_string().contains("version is enabled"));
    }

    #[test]
    fn fetch_all_walks_pages() {
        let mut server = mockito::Server::new();
        let base = "/v1/proj/workspaces/ws/soc/playbooks/p1/versions";
        let first: Vec<Value> = (0..PAGE_LIMIT)
            .map(|i| json!({"id": format!("v{i}"), "playbook_id": "p1"}))
            .collect();
        server
            .mock("GET", base)
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("offset".into(), "0".into()),
                Matcher::UrlEncoded("limit".into(), PAGE_LIMIT.to_string()),
            ]))
            .with_status(200)
            .with_body(json!({"data": first, "total": PAGE_LIMIT + 1}).to_string())
            .create();
        server
            .mock("GET", base)
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("offset".into(), PAGE_LIMIT.to_string()),
                Matcher::UrlEncoded("limit".into(), PAGE_LIMIT.to_string()),
            ]))
            .with_status(200)
            .with_body(json!({"data": [{"id": "last", "playbook_id": "p1"}], "total": PAGE_LIMIT + 1}).to_string())
            .create();

        let versions = http_repo(&server).list_playbook_versions("ws", "p1").unwrap();
        assert_eq!(versions.len(), PAGE_LIMIT + 1);
        assert_eq!(versions.last().unwrap().id, "last");
    }

    #[test]
    fn fetch_all_stops_when_offset_is_ignored() {
        let mut server = mockito::Server::new();
        let same: Vec<Value> = (0..PAGE_LIMIT)
            .map(|i| json!({"id": format!("v{i}"), "playbook_id": "p1"}))
            .collect();
        let mock = server
            .mock("GET", "/v1/proj/workspaces/ws/soc/playbooks/p1/versions")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(json!({"data": same}).to_string())
            .expect(2)
            .create();

        let versions = http_repo(&server).list_playbook_versions("ws", "p1").unwrap();
        assert_eq!(versions.len(), PAGE_LIMIT);
        mock.assert();
    }

    #[test]
    fn update_version_backfills_unpatched_fields() {
        let api = Arc::new(FakeSocApi::new("proj"));
        let repo = PlaybookRepository::new(api.clone());
        let pb = repo.create_playbook("ws", &NewPlaybook::new("p", "")).unwrap();
        let fields = VersionFields {
            dataclass_id: "dc1".into(),
            description: "first".into(),
            trigger_type: "EVENT".into(),
            dataobject_create: true,
            action_strategy: "SYNC".into(),
            ..Default::default()
        };
        let vid = repo.create_playbook_version("ws", &pb, &fields).unwrap();

        repo.update_playbook_version("ws", &vid, &VersionPatch::status("APPROVING"))
            .unwrap();

        let after = repo.get_playbook_version("ws", &vid).unwrap();
        assert_eq!(after.status, "APPROVING");
        assert_eq!(after.dataclass_id, "dc1");
        assert_eq!(after.description, "first");
        assert_eq!(after.trigger_type, "EVENT");
        assert!(after.dataobject_create);
        assert_eq!(after.action_strategy, "SYNC");
    }

    #[test]
    fn rule_round_trips_through_json_string() {
        let api = Arc::new(FakeSocApi::new("proj"));
        let repo = PlaybookRepository::new(api.clone());
        let pb = repo.create_playbook("ws", &NewPlaybook::new("p", "")).unwrap();
        let vid = repo
            .create_playbook_version("ws", &pb, &VersionFields::new("dc1"))
            .unwrap();

        let fields = RuleFields::new(RuleExpression {
            conditions: vec![RuleCondition {
                name: "c1".into(),
                detail: "severity".into(),
                data: vec!["a".into(), "b".into()],
            }],
            logics: vec!["AND".into()],
        });
        let rid = repo.create_playbook_rule("ws", &vid, &fields).unwrap();

        let posted = api.last_body(Method::Post, "/rules").unwrap();
        assert!(posted["rule"].is_string(), "rule must travel as a string");

        let rule = repo.get_playbook_rule("ws", &vid, &rid).unwrap();
        assert_eq!(rule.expression, fields.expression);
        assert_eq!(rule.version_id, vid);
    }

    #[test]
    fn action_crud_scoped_to_version() {
        let api = Arc::new(FakeSocApi::new("proj"));
        let repo = PlaybookRepository::new(api.clone());
        let pb = repo.create_playbook("ws", &NewPlaybook::new("p", "")).unwrap();
        let vid = repo
            .create_playbook_version("ws", &pb, &VersionFields::new("dc1"))
            .unwrap();

        let mut fields = ActionFields::new("wf-1", "notify");
        fields.sort_order = Some(2);
        let aid = repo.create_playbook_action("ws", &vid, &fields).unwrap();
        fields.name = "notify-oncall".into();
        repo.update_playbook_action("ws", &vid, &aid, &fields).unwrap();

        let actions = repo.list_playbook_actions("ws", &vid).unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].name, "notify-oncall");
        assert_eq!(actions[0].sort_order, 2);

        repo.delete_playbook_action("ws", &vid, &aid).unwrap();
        assert!(repo.list_playbook_actions("ws", &vid).unwrap().is_empty());
    }
}
