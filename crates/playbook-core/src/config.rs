use crate::classify::{ErrorCodeOverride, ErrorTable};
use crate::error::{PlaybookError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub const CONFIG_DIR: &str = ".socpb";
pub const CONFIG_FILE: &str = "config.yaml";

pub const ENV_CONFIG: &str = "SOCPB_CONFIG";
pub const ENV_ENDPOINT: &str = "SOCPB_ENDPOINT";
pub const ENV_PROJECT_ID: &str = "SOCPB_PROJECT_ID";
pub const ENV_TOKEN: &str = "SOCPB_TOKEN";
pub const ENV_WORKSPACE: &str = "SOCPB_WORKSPACE";

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

impl ConfigWarning {
    fn warning(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Warning,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Error,
            message: message.into(),
        }
    }
}

pub fn has_errors(warnings: &[ConfigWarning]) -> bool {
    warnings.iter().any(|w| w.level == WarnLevel::Error)
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// Used when a command does not name a workspace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Read a record back after deleting it and fail if it is still there.
    #[serde(default = "default_verify_deletes")]
    pub verify_deletes: bool,
    /// Extra vendor codes, consulted before the built-in table.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub error_codes: Vec<ErrorCodeOverride>,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_verify_deletes() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            project_id: String::new(),
            auth_token: None,
            workspace_id: None,
            timeout_secs: default_timeout_secs(),
            verify_deletes: default_verify_deletes(),
            error_codes: Vec::new(),
        }
    }
}

impl Config {
    pub fn new(endpoint: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            project_id: project_id.into(),
            ..Default::default()
        }
    }

    /// `~/.socpb/config.yaml`, when a home directory can be found.
    pub fn default_path() -> Option<PathBuf> {
        home::home_dir().map(|h| h.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PlaybookError::Config(format!(
                "no config file at {}",
                path.display()
            )));
        }
        let data = std::fs::read_to_string(path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    /// Like [`Config::load`], but a missing file yields the defaults so that
    /// environment variables alone can configure the client.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }

    /// Keys accepted by [`Config::set`].
    pub const SETTABLE_KEYS: &'static [&'static str] = &[
        "endpoint",
        "project_id",
        "auth_token",
        "workspace_id",
        "timeout_secs",
        "verify_deletes",
    ];

    /// Set one scalar key from its string form. An empty value clears the
    /// optional keys.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        let optional = |v: &str| (!v.is_empty()).then(|| v.to_string());
        match key {
            "endpoint" => self.endpoint = value.trim_end_matches('/').to_string(),
            "project_id" => self.project_id = value.to_string(),
            "auth_token" => self.auth_token = optional(value),
            "workspace_id" => self.workspace_id = optional(value),
            "timeout_secs" => {
                self.timeout_secs = value.parse().map_err(|_| {
                    PlaybookError::Config(format!("timeout_secs must be a whole number, got '{value}'"))
                })?
            }
            "verify_deletes" => {
                self.verify_deletes = value.parse().map_err(|_| {
                    PlaybookError::Config(format!("verify_deletes must be true or false, got '{value}'"))
                })?
            }
            other => {
                return Err(PlaybookError::Config(format!(
                    "unknown key '{other}' (expected one of: {})",
                    Self::SETTABLE_KEYS.join(", ")
                )))
            }
        }
        Ok(())
    }

    /// Overlay `SOCPB_*` variables; `lookup` is `std::env::var` in production.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let set = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if let Some(v) = set(ENV_ENDPOINT) {
            self.endpoint = v;
        }
        if let Some(v) = set(ENV_PROJECT_ID) {
            self.project_id = v;
        }
        if let Some(v) = set(ENV_TOKEN) {
            self.auth_token = Some(v);
        }
        if let Some(v) = set(ENV_WORKSPACE) {
            self.workspace_id = Some(v);
        }
    }

    pub fn error_table(&self) -> ErrorTable {
        if self.error_codes.is_empty() {
            ErrorTable::default()
        } else {
            ErrorTable::with_overrides(&self.error_codes)
        }
    }

    /// The workspace to operate on: `explicit` wins over the configured one.
    pub fn workspace(&self, explicit: Option<&str>) -> Result<String> {
        explicit
            .map(str::to_string)
            .or_else(|| self.workspace_id.clone())
            .filter(|w| !w.trim().is_empty())
            .ok_or_else(|| {
                PlaybookError::Config(format!(
                    "no workspace given; pass --workspace or set {ENV_WORKSPACE}"
                ))
            })
    }

    /// A copy safe to print.
    pub fn redacted(&self) -> Self {
        Self {
            auth_token: self.auth_token.as_ref().map(|_| "<redacted>".to_string()),
            ..self.clone()
        }
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        let endpoint = self.endpoint.trim();
        if endpoint.is_empty() {
            warnings.push(ConfigWarning::error(format!(
                "endpoint is not set (config or {ENV_ENDPOINT})"
            )));
        } else if !(endpoint.starts_with("https://") || endpoint.starts_with("http://")) {
            warnings.push(ConfigWarning::error(format!(
                "endpoint '{endpoint}' must start with http:// or https://"
            )));
        } else if endpoint.starts_with("http://") {
            warnings.push(ConfigWarning::warning(format!(
                "endpoint '{endpoint}' is not https; the token is sent in clear text"
            )));
        }

        if self.project_id.trim().is_empty() {
            warnings.push(ConfigWarning::error(format!(
                "project_id is not set (config or {ENV_PROJECT_ID})"
            )));
        }

        if self.auth_token.as_deref().map_or(true, |t| t.trim().is_empty()) {
            warnings.push(ConfigWarning::warning(format!(
                "no auth_token (config or {ENV_TOKEN}); requests will be unauthenticated"
            )));
        }

        if self.timeout_secs == 0 {
            warnings.push(ConfigWarning::error("timeout_secs must be greater than 0"));
        } else if self.timeout_secs > 300 {
            warnings.push(ConfigWarning::warning(format!(
                "timeout_secs={} (>300 is unusual)",
                self.timeout_secs
            )));
        }

        let mut seen = HashSet::new();
        for o in &self.error_codes {
            if o.code.trim().is_empty() {
                warnings.push(ConfigWarning::error("error_codes entry has an empty code"));
                continue;
            }
            if let Some(status) = o.status {
                if !(400..600).contains(&status) {
                    warnings.push(ConfigWarning::warning(format!(
                        "error code '{}' is mapped for status {status}, which is not an error status",
                        o.code
                    )));
                }
            }
            if !seen.insert((o.status, o.code.as_str())) {
                warnings.push(ConfigWarning::warning(format!(
                    "error code '{}' is listed more than once; the first entry wins",
                    o.code
                )));
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
