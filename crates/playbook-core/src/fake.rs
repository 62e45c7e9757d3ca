//! In-memory emulation of the SOC playbook endpoints for unit tests.
//!
//! Mirrors the behaviours the lifecycle code depends on: `data` envelopes,
//! full-record replacement on version PUT, 409 when deleting an enabled
//! version, and offset/limit paging. Every request is recorded so tests can
//! assert on call order and on which calls mutated state.

use crate::client::{ApiClient, ApiResponse, Method};
use crate::error::Result;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

struct Failure {
    method: Method,
    path_contains: String,
    status: u16,
    body: Value,
    apply: bool,
}

#[derive(Default)]
struct State {
    next_id: u64,
    playbooks: BTreeMap<String, Value>,
    versions: BTreeMap<String, Value>,
    actions: BTreeMap<String, Value>,
    rules: BTreeMap<String, Value>,
}

impl State {
    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }
}

pub struct FakeSocApi {
    project_id: String,
    state: Mutex<State>,
    calls: Mutex<Vec<RecordedCall>>,
    failures: Mutex<Vec<Failure>>,
    ghost_deletes: Mutex<bool>,
}

const VERSION_MUTABLE: &[&str] = &[
    "dataclass_id",
    "description",
    "rule_enable",
    "rule_id",
    "trigger_type",
    "dataobject_create",
    "dataobject_update",
    "dataobject_delete",
    "action_strategy",
    "status",
    "enabled",
];

fn version_default(field: &str) -> Value {
    match field {
        "rule_id" => Value::Null,
        "status" => json!("EDITING"),
        "rule_enable" | "dataobject_create" | "dataobject_update" | "dataobject_delete"
        | "enabled" => json!(false),
        _ => json!(""),
    }
}

fn ok(body: Value) -> ApiResponse {
    ApiResponse::new(200, body)
}

fn not_found(what: &str) -> ApiResponse {
    ApiResponse::new(
        404,
        json!({"code": "SecMaster.20030005", "message": format!("{what} does not exist")}),
    )
}

impl FakeSocApi {
    pub fn new(project_id: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            state: Mutex::new(State::default()),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            ghost_deletes: Mutex::new(false),
        }
    }

    // -----------------------------------------------------------------------
    // Test controls
    // -----------------------------------------------------------------------

    /// Fail the next request matching `method` and `path_contains`.
    pub fn fail_next(&self, method: Method, path_contains: &str, status: u16, body: Value) {
        self.failures.lock().unwrap().push(Failure {
            method,
            path_contains: path_contains.to_string(),
            status,
            body,
            apply: false,
        });
    }

    /// Apply the next matching request, then answer it with a gateway
    /// timeout as if the response had been lost.
    pub fn lose_next_response(&self, method: Method, path_contains: &str) {
        self.failures.lock().unwrap().push(Failure {
            method,
            path_contains: path_contains.to_string(),
            status: 504,
            body: json!({"message": "gateway timeout"}),
            apply: true,
        });
    }

    /// Acknowledge deletes without removing anything.
    pub fn set_ghost_deletes(&self, on: bool) {
        *self.ghost_deletes.lock().unwrap() = on;
    }

    /// Overwrite a stored version field behind the client's back.
    pub fn poke_version(&self, id: &str, field: &str, value: Value) {
        let mut state = self.state.lock().unwrap();
        if let Some(Value::Object(v)) = state.versions.get_mut(id) {
            v.insert(field.to_string(), value);
        }
    }

    pub fn poke_playbook(&self, id: &str, field: &str, value: Value) {
        let mut state = self.state.lock().unwrap();
        if let Some(Value::Object(p)) = state.playbooks.get_mut(id) {
            p.insert(field.to_string(), value);
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn mutating_calls(&self) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.method.is_mutating())
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn last_body(&self, method: Method, path_contains: &str) -> Option<Value> {
        self.calls()
            .into_iter()
            .rev()
            .find(|c| c.method == method && c.path.contains(path_contains))
            .and_then(|c| c.body)
    }

    pub fn version(&self, id: &str) -> Option<Value> {
        self.state.lock().unwrap().versions.get(id).cloned()
    }

    pub fn playbook(&self, id: &str) -> Option<Value> {
        self.state.lock().unwrap().playbooks.get(id).cloned()
    }

    pub fn enabled_versions(&self, playbook_id: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .versions
            .values()
            .filter(|v| v["playbook_id"] == playbook_id && v["enabled"] == true)
            .map(|v| v["id"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    // -----------------------------------------------------------------------
    // Routing
    // -----------------------------------------------------------------------

    fn take_failure(&self, method: Method, path: &str) -> Option<Failure> {
        let mut failures = self.failures.lock().unwrap();
        let pos = failures
            .iter()
            .position(|f| f.method == method && path.contains(&f.path_contains))?;
        Some(failures.remove(pos))
    }

    fn route(&self, method: Method, path: &str, body: Option<&Value>) -> ApiResponse {
        let (path, query) = path.split_once('?').unwrap_or((path, ""));
        let page = parse_page(query);
        let prefix = format!("v1/{}/workspaces/", self.project_id);
        let Some(rest) = path.trim_start_matches('/').strip_prefix(&prefix) else {
            return ApiResponse::new(400, json!({"code": "APIGW.0101", "message": "bad path"}));
        };
        let segments: Vec<&str> = rest.split('/').collect();
        let (ws, tail) = match segments.as_slice() {
            [ws, "soc", "playbooks", tail @ ..] => (*ws, tail),
            _ => return ApiResponse::new(404, json!({"message": "no route"})),
        };
        if ws == "missing" {
            return ApiResponse::new(
                403,
                json!({"code": "SecMaster.20010001", "message": "workspace not found"}),
            );
        }

        let body = body.cloned().unwrap_or(Value::Null);
        let mut state = self.state.lock().unwrap();
        let ghost = *self.ghost_deletes.lock().unwrap();

        match (method, tail) {
            (Method::Post, []) => {
                let id = state.id("pb");
                let mut record = object(&body);
                record.insert("id".into(), json!(id));
                record.insert("enabled".into(), json!(false));
                record.insert("active_version_id".into(), Value::Null);
                record.insert("create_time".into(), json!(1_700_000_000_000i64));
                state.playbooks.insert(id.clone(), Value::Object(record));
                ok(json!({"data": {"id": id}}))
            }
            (Method::Get, ["versions", vid]) => match state.versions.get(*vid) {
                Some(v) => ok(json!({"data": v})),
                None => not_found("version"),
            },
            (Method::Put, ["versions", vid]) => {
                let Some(current) = state.versions.get(*vid).cloned() else {
                    return not_found("version");
                };
                // Full replacement: anything the body omits is reset.
                let mut record = Map::new();
                for keep in ["id", "playbook_id", "version", "version_type", "create_time"] {
                    record.insert(keep.into(), current[keep].clone());
                }
                for field in VERSION_MUTABLE {
                    let value = body
                        .get(*field)
                        .cloned()
                        .unwrap_or_else(|| version_default(field));
                    record.insert((*field).into(), value);
                }
                state.versions.insert(vid.to_string(), Value::Object(record));
                ok(json!({"data": {"id": vid}}))
            }
            (Method::Delete, ["versions", vid]) => {
                let Some(current) = state.versions.get(*vid).cloned() else {
                    return not_found("version");
                };
                if current["enabled"] == true {
                    return ApiResponse::new(
                        409,
                        json!({"code": "SecMaster.20048001", "message": "the version is enabled"}),
                    );
                }
                if !ghost {
                    state.versions.remove(*vid);
                    state.actions.retain(|_, a| a["version_id"] != *vid);
                    state.rules.retain(|_, r| r["version_id"] != *vid);
                    let owner = current["playbook_id"].as_str().unwrap_or_default().to_string();
                    if let Some(Value::Object(pb)) = state.playbooks.get_mut(&owner) {
                        if pb.get("active_version_id") == Some(&json!(vid)) {
                            pb.insert("active_version_id".into(), Value::Null);
                        }
                    }
                }
                ok(Value::Null)
            }
            (Method::Get, ["versions", vid, "actions"]) => {
                let items: Vec<Value> = state
                    .actions
                    .values()
                    .filter(|a| a["version_id"] == *vid)
                    .cloned()
                    .collect();
                paged(items, page)
            }
            (Method::Post, ["versions", vid, "actions"]) => {
                let Some(version) = state.versions.get(*vid).cloned() else {
                    return not_found("version");
                };
                let id = state.id("act");
                let mut record = object(&body);
                record.insert("id".into(), json!(id));
                record.insert("version_id".into(), json!(vid));
                record.insert("playbook_id".into(), version["playbook_id"].clone());
                state.actions.insert(id.clone(), Value::Object(record));
                ok(json!({"data": {"id": id}}))
            }
            (Method::Put, ["versions", vid, "actions", aid]) => {
                let Some(Value::Object(existing)) = state.actions.get_mut(*aid) else {
                    return not_found("action");
                };
                for (k, v) in object(&body) {
                    existing.insert(k, v);
                }
                existing.insert("version_id".into(), json!(vid));
                ok(json!({"data": {"id": aid}}))
            }
            (Method::Delete, ["versions", _vid, "actions", aid]) => {
                if !state.actions.contains_key(*aid) {
                    return not_found("action");
                }
                if !ghost {
                    state.actions.remove(*aid);
                }
                ok(Value::Null)
            }
            (Method::Post, ["versions", vid, "rules"]) => {
                if !state.versions.contains_key(*vid) {
                    return not_found("version");
                }
                if body.get("rule").is_some_and(|r| !r.is_string()) {
                    return ApiResponse::new(
                        400,
                        json!({"code": "SecMaster.00000001", "message": "rule must be a string"}),
                    );
                }
                let id = state.id("rule");
                let mut record = object(&body);
                record.insert("id".into(), json!(id));
                record.insert("version_id".into(), json!(vid));
                state.rules.insert(id.clone(), Value::Object(record));
                ok(json!({"data": {"id": id}}))
            }
            (Method::Get, ["versions", _vid, "rules", rid]) => match state.rules.get(*rid) {
                Some(r) => ok(json!({"data": r})),
                None => not_found("rule"),
            },
            (Method::Put, ["versions", vid, "rules", rid]) => {
                if !state.rules.contains_key(*rid) {
                    return not_found("rule");
                }
                let mut record = object(&body);
                record.insert("id".into(), json!(rid));
                record.insert("version_id".into(), json!(vid));
                state.rules.insert(rid.to_string(), Value::Object(record));
                ok(json!({"data": {"id": rid}}))
            }
            (Method::Delete, ["versions", _vid, "rules", rid]) => {
                if state.rules.remove(*rid).is_none() {
                    return not_found("rule");
                }
                ok(Value::Null)
            }
            (Method::Get, [pid]) => match state.playbooks.get(*pid) {
                Some(p) => ok(json!({"data": p})),
                None => not_found("playbook"),
            },
            (Method::Put, [pid]) => {
                let Some(Value::Object(pb)) = state.playbooks.get_mut(*pid) else {
                    return not_found("playbook");
                };
                for (k, v) in body.as_object().cloned().unwrap_or_default() {
                    pb.insert(k, v);
                }
                ok(json!({"data": {"id": pid}}))
            }
            (Method::Delete, [pid]) => {
                if state.playbooks.remove(*pid).is_none() {
                    return not_found("playbook");
                }
                ok(Value::Null)
            }
            (Method::Get, [pid, "versions"]) => {
                let items: Vec<Value> = state
                    .versions
                    .values()
                    .filter(|v| v["playbook_id"] == *pid)
                    .cloned()
                    .collect();
                paged(items, page)
            }
            (Method::Post, [pid, "versions"]) => {
                if !state.playbooks.contains_key(*pid) {
                    return not_found("playbook");
                }
                let id = state.id("ver");
                let count = state
                    .versions
                    .values()
                    .filter(|v| v["playbook_id"] == *pid)
                    .count();
                let mut record = Map::new();
                record.insert("id".into(), json!(id));
                record.insert("playbook_id".into(), json!(pid));
                record.insert("version".into(), json!(format!("v1.0.{count}")));
                record.insert("version_type".into(), json!(0));
                record.insert("create_time".into(), json!(1_700_000_000_000i64));
                for field in VERSION_MUTABLE {
                    let value = body
                        .get(*field)
                        .cloned()
                        .unwrap_or_else(|| version_default(field));
                    record.insert((*field).into(), value);
                }
                record.insert("enabled".into(), json!(false));
                state.versions.insert(id.clone(), Value::Object(record));
                ok(json!({"data": {"id": id}}))
            }
            _ => ApiResponse::new(404, json!({"message": "no route"})),
        }
    }
}

fn object(body: &Value) -> Map<String, Value> {
    body.as_object().cloned().unwrap_or_default()
}

fn parse_page(query: &str) -> (usize, usize) {
    let mut offset = 0;
    let mut limit = usize::MAX;
    for pair in query.split('&') {
        match pair.split_once('=') {
            Some(("offset", v)) => offset = v.parse().unwrap_or(0),
            Some(("limit", v)) => limit = v.parse().unwrap_or(usize::MAX),
            _ => {}
        }
    }
    (offset, limit)
}

fn paged(items: Vec<Value>, (offset, limit): (usize, usize)) -> ApiResponse {
    let total = items.len();
    let data: Vec<Value> = items.into_iter().skip(offset).take(limit).collect();
    ok(json!({"data": data, "total": total}))
}

impl ApiClient for FakeSocApi {
    fn project_id(&self) -> &str {
        &self.project_id
    }

    fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<ApiResponse> {
        self.calls.lock().unwrap().push(RecordedCall {
            method,
            path: path.to_string(),
            body: body.cloned(),
        });
        match self.take_failure(method, path) {
            Some(failure) => {
                if failure.apply {
                    self.route(method, path, body);
                }
                Ok(ApiResponse::new(failure.status, failure.body))
            }
            None => Ok(self.route(method, path, body)),
        }
    }
}
