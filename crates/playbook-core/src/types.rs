use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

// ---------------------------------------------------------------------------
// Deserialization helpers
// ---------------------------------------------------------------------------

/// The API reports "no value" as either a missing field, `null`, or `""`.
fn empty_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.trim().is_empty()))
}

/// Timestamps arrive as epoch milliseconds or RFC 3339 strings.
fn flexible_timestamp<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Value> = Option::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|t| t.with_timezone(&Utc))
            .or_else(|| {
                s.parse::<i64>()
                    .ok()
                    .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            }),
        _ => None,
    })
}

/// Drop `null` and empty-string members; booleans and numbers always survive.
pub fn compact(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null() && v.as_str().map_or(true, |s| !s.is_empty()))
                .collect(),
        ),
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Playbook
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Playbook {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub active_version_id: Option<String>,
    #[serde(default, deserialize_with = "flexible_timestamp")]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "flexible_timestamp")]
    pub update_time: Option<DateTime<Utc>>,
}

impl Playbook {
    pub fn is_active_version(&self, version_id: &str) -> bool {
        self.active_version_id.as_deref() == Some(version_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewPlaybook {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl NewPlaybook {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }

    pub fn to_body(&self, workspace_id: &str) -> Value {
        compact(json!({
            "name": self.name,
            "description": self.description,
            "workspace_id": workspace_id,
        }))
    }
}

/// How an update treats the playbook's `active_version_id` back-reference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ActiveVersionChange {
    #[default]
    Keep,
    Set(String),
    Clear,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybookPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub enabled: Option<bool>,
    pub active_version: ActiveVersionChange,
}

impl PlaybookPatch {
    pub fn activate(name: &str, version_id: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            enabled: Some(true),
            active_version: ActiveVersionChange::Set(version_id.to_string()),
            ..Default::default()
        }
    }

    pub fn deactivate(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            enabled: Some(false),
            active_version: ActiveVersionChange::Clear,
            ..Default::default()
        }
    }

    /// Wire body. Empty strings are suppressed, but `enabled` is sent whenever
    /// it is part of the patch: the API reads a missing `enabled` differently
    /// from `enabled = false`.
    pub fn to_body(&self) -> Value {
        let mut body = compact(json!({
            "name": self.name,
            "description": self.description,
        }));
        if let Value::Object(map) = &mut body {
            if let Some(enabled) = self.enabled {
                map.insert("enabled".into(), Value::Bool(enabled));
            }
            match &self.active_version {
                ActiveVersionChange::Keep => {}
                ActiveVersionChange::Set(id) => {
                    map.insert("active_version_id".into(), Value::String(id.clone()));
                }
                ActiveVersionChange::Clear => {
                    map.insert("active_version_id".into(), Value::Null);
                }
            }
        }
        body
    }
}

// ---------------------------------------------------------------------------
// VersionState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionState {
    Inactive,
    Active,
}

impl VersionState {
    pub fn as_str(self) -> &'static str {
        match self {
            VersionState::Inactive => "inactive",
            VersionState::Active => "active",
        }
    }
}

impl fmt::Display for VersionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// PlaybookVersion
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaybookVersion {
    pub id: String,
    #[serde(default)]
    pub playbook_id: String,
    #[serde(default)]
    pub dataclass_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub rule_enable: bool,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub rule_id: Option<String>,
    #[serde(default)]
    pub trigger_type: String,
    #[serde(default)]
    pub dataobject_create: bool,
    #[serde(default)]
    pub dataobject_update: bool,
    #[serde(default)]
    pub dataobject_delete: bool,
    #[serde(default)]
    pub action_strategy: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub version_type: i32,
    #[serde(default, deserialize_with = "flexible_timestamp")]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "flexible_timestamp")]
    pub update_time: Option<DateTime<Utc>>,
}

impl PlaybookVersion {
    pub fn state(&self) -> VersionState {
        if self.enabled {
            VersionState::Active
        } else {
            VersionState::Inactive
        }
    }

    /// The full record the update endpoint expects. The endpoint replaces the
    /// stored version wholesale, so every mutable field is always present.
    pub fn to_update_body(&self) -> Value {
        json!({
            "dataclass_id": self.dataclass_id,
            "description": self.description,
            "rule_enable": self.rule_enable,
            "rule_id": self.rule_id,
            "trigger_type": self.trigger_type,
            "dataobject_create": self.dataobject_create,
            "dataobject_update": self.dataobject_update,
            "dataobject_delete": self.dataobject_delete,
            "action_strategy": self.action_strategy,
            "status": self.status,
            "enabled": self.enabled,
        })
    }
}

/// Fields supplied when creating a version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionFields {
    pub dataclass_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub rule_enable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    #[serde(default)]
    pub trigger_type: String,
    #[serde(default)]
    pub dataobject_create: bool,
    #[serde(default)]
    pub dataobject_update: bool,
    #[serde(default)]
    pub dataobject_delete: bool,
    #[serde(default)]
    pub action_strategy: String,
}

impl VersionFields {
    pub fn new(dataclass_id: impl Into<String>) -> Self {
        Self {
            dataclass_id: dataclass_id.into(),
            ..Default::default()
        }
    }

    pub fn to_body(&self) -> Value {
        compact(json!({
            "dataclass_id": self.dataclass_id,
            "description": self.description,
            "rule_enable": self.rule_enable,
            "rule_id": self.rule_id,
            "trigger_type": self.trigger_type,
            "dataobject_create": self.dataobject_create,
            "dataobject_update": self.dataobject_update,
            "dataobject_delete": self.dataobject_delete,
            "action_strategy": self.action_strategy,
        }))
    }
}

/// A partial change to a version, merged onto the current record before it
/// is written back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataclass_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_enable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataobject_create: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataobject_update: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataobject_delete: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_strategy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

impl VersionPatch {
    pub fn enabled(enabled: bool) -> Self {
        Self {
            enabled: Some(enabled),
            ..Default::default()
        }
    }

    pub fn status(status: impl Into<String>) -> Self {
        Self {
            status: Some(status.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Names of fields that cannot change while the version is active.
    /// Only the description is editable on a live version.
    pub fn guarded_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.dataclass_id.is_some() {
            fields.push("dataclass_id");
        }
        if self.rule_enable.is_some() {
            fields.push("rule_enable");
        }
        if self.rule_id.is_some() {
            fields.push("rule_id");
        }
        if self.trigger_type.is_some() {
            fields.push("trigger_type");
        }
        if self.dataobject_create.is_some() {
            fields.push("dataobject_create");
        }
        if self.dataobject_update.is_some() {
            fields.push("dataobject_update");
        }
        if self.dataobject_delete.is_some() {
            fields.push("dataobject_delete");
        }
        if self.action_strategy.is_some() {
            fields.push("action_strategy");
        }
        fields
    }

    pub fn touches_lifecycle(&self) -> bool {
        self.enabled.is_some() || self.status.is_some()
    }

    pub fn apply_to(&self, version: &mut PlaybookVersion) {
        if let Some(v) = &self.description {
            version.description = v.clone();
        }
        if let Some(v) = &self.dataclass_id {
            version.dataclass_id = v.clone();
        }
        if let Some(v) = self.rule_enable {
            version.rule_enable = v;
        }
        if let Some(v) = &self.rule_id {
            version.rule_id = Some(v.clone()).filter(|s| !s.is_empty());
        }
        if let Some(v) = &self.trigger_type {
            version.trigger_type = v.clone();
        }
        if let Some(v) = self.dataobject_create {
            version.dataobject_create = v;
        }
        if let Some(v) = self.dataobject_update {
            version.dataobject_update = v;
        }
        if let Some(v) = self.dataobject_delete {
            version.dataobject_delete = v;
        }
        if let Some(v) = &self.action_strategy {
            version.action_strategy = v.clone();
        }
        if let Some(v) = &self.status {
            version.status = v.clone();
        }
        if let Some(v) = self.enabled {
            version.enabled = v;
        }
    }
}

// ---------------------------------------------------------------------------
// PlaybookAction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaybookAction {
    pub id: String,
    #[serde(default, alias = "playbook_version_id")]
    pub version_id: String,
    #[serde(default)]
    pub action_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub action_type: String,
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default)]
    pub playbook_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionFields {
    pub action_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub action_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<i32>,
}

impl ActionFields {
    pub fn new(action_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            action_id: action_id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn to_body(&self) -> Value {
        compact(json!({
            "action_id": self.action_id,
            "name": self.name,
            "description": self.description,
            "action_type": self.action_type,
            "sort_order": self.sort_order,
        }))
    }
}

// ---------------------------------------------------------------------------
// PlaybookRule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleCondition {
    pub name: String,
    #[serde(default)]
    pub detail: String,
    #[serde(default)]
    pub data: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleExpression {
    #[serde(default)]
    pub conditions: Vec<RuleCondition>,
    #[serde(default)]
    pub logics: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSchedule {
    #[serde(default)]
    pub cron: String,
    #[serde(default)]
    pub schedule_type: String,
    #[serde(default)]
    pub start_type: String,
    #[serde(default)]
    pub end_type: String,
    #[serde(default)]
    pub end_time: String,
    #[serde(default)]
    pub repeat_range: String,
    #[serde(default)]
    pub only_once: bool,
    #[serde(default)]
    pub execution_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybookRule {
    pub id: String,
    #[serde(default)]
    pub version_id: String,
    #[serde(default)]
    pub expression_type: String,
    #[serde(default)]
    pub expression: RuleExpression,
    #[serde(default)]
    pub schedule: RuleSchedule,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleFields {
    #[serde(default = "default_expression_type")]
    pub expression_type: String,
    #[serde(default)]
    pub expression: RuleExpression,
    #[serde(default)]
    pub schedule: RuleSchedule,
}

fn default_expression_type() -> String {
    "common".to_string()
}

impl RuleFields {
    pub fn new(expression: RuleExpression) -> Self {
        Self {
            expression_type: default_expression_type(),
            expression,
            schedule: RuleSchedule::default(),
        }
    }
}

/// Schedule fields flattened into a JSON object, empties dropped.
pub(crate) fn schedule_members(schedule: &RuleSchedule) -> Map<String, Value> {
    let value = compact(json!({
        "cron": schedule.cron,
        "schedule_type": schedule.schedule_type,
        "start_type": schedule.start_type,
        "end_type": schedule.end_type,
        "end_time": schedule.end_time,
        "repeat_range": schedule.repeat_range,
        "only_once": schedule.only_once,
        "execution_type": schedule.execution_type,
    }));
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
