//! Vendor error-code classification.
//!
//! The SOC API reports failures as an HTTP status plus a vendor code carried
//! under `code` or `error_code`. Every non-2xx response passes through one
//! [`ErrorTable`], which maps it onto the [`ErrorKind`] taxonomy. Rules are
//! evaluated in order; specific vendor codes come before status-only rules.

use crate::error::{Entity, ErrorKind, PlaybookError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;

pub const WORKSPACE_NOT_FOUND: &str = "SecMaster.20010001";
pub const RESOURCE_NOT_EXISTS: &str = "SecMaster.20030005";
pub const DELETE_TARGET_NOT_FOUND: &str = "SecMaster.10011001";

// ---------------------------------------------------------------------------
// StatusMatch / ErrorRule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusMatch {
    Exact(u16),
    ServerError,
    Any,
}

impl StatusMatch {
    fn matches(self, status: u16) -> bool {
        match self {
            StatusMatch::Exact(s) => s == status,
            StatusMatch::ServerError => (500..600).contains(&status),
            StatusMatch::Any => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRule {
    pub status: StatusMatch,
    pub code: Option<String>,
    pub kind: ErrorKind,
}

impl ErrorRule {
    pub fn status(status: StatusMatch, kind: ErrorKind) -> Self {
        Self {
            status,
            code: None,
            kind,
        }
    }

    pub fn code(status: StatusMatch, code: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            status,
            code: Some(code.into()),
            kind,
        }
    }

    fn matches(&self, status: u16, code: Option<&str>) -> bool {
        if !self.status.matches(status) {
            return false;
        }
        match (&self.code, code) {
            (None, _) => true,
            (Some(want), Some(got)) => want == got,
            (Some(_), None) => false,
        }
    }
}

/// A vendor code mapping supplied through configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorCodeOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub code: String,
    pub kind: ErrorKind,
}

impl From<&ErrorCodeOverride> for ErrorRule {
    fn from(o: &ErrorCodeOverride) -> Self {
        let status = o.status.map(StatusMatch::Exact).unwrap_or(StatusMatch::Any);
        ErrorRule::code(status, o.code.clone(), o.kind)
    }
}

// ---------------------------------------------------------------------------
// VendorError
// ---------------------------------------------------------------------------

/// The error fields of a failed response body, whichever spelling was used.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VendorError {
    pub code: Option<String>,
    pub message: String,
}

impl VendorError {
    pub fn parse(body: &Value) -> Self {
        let field = |names: &[&str]| {
            names
                .iter()
                .find_map(|n| body.get(*n).and_then(Value::as_str))
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let message = field(&["message", "error_msg", "msg"]).unwrap_or_else(|| match body {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        });
        Self {
            code: field(&["code", "error_code"]),
            message,
        }
    }
}

// ---------------------------------------------------------------------------
// ErrorTable
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorTable {
    rules: Vec<ErrorRule>,
}

static STANDARD: OnceLock<ErrorTable> = OnceLock::new();

fn standard_rules() -> Vec<ErrorRule> {
    vec![
        ErrorRule::code(
            StatusMatch::Exact(403),
            WORKSPACE_NOT_FOUND,
            ErrorKind::WorkspaceNotFound,
        ),
        ErrorRule::code(StatusMatch::Exact(400), RESOURCE_NOT_EXISTS, ErrorKind::NotFound),
        ErrorRule::code(
            StatusMatch::Exact(400),
            DELETE_TARGET_NOT_FOUND,
            ErrorKind::NotFound,
        ),
        ErrorRule::status(StatusMatch::Exact(404), ErrorKind::NotFound),
        ErrorRule::status(StatusMatch::Exact(409), ErrorKind::Conflict),
        ErrorRule::status(StatusMatch::Exact(401), ErrorKind::Unauthorized),
        ErrorRule::status(StatusMatch::Exact(403), ErrorKind::Unauthorized),
        ErrorRule::status(StatusMatch::Exact(429), ErrorKind::Transient),
        ErrorRule::status(StatusMatch::ServerError, ErrorKind::Transient),
    ]
}

impl ErrorTable {
    /// The built-in table, constructed once per process.
    pub fn standard() -> &'static ErrorTable {
        STANDARD.get_or_init(|| ErrorTable {
            rules: standard_rules(),
        })
    }

    /// Built-in rules with `overrides` consulted first.
    pub fn with_overrides(overrides: &[ErrorCodeOverride]) -> Self {
        let mut rules: Vec<ErrorRule> = overrides.iter().map(ErrorRule::from).collect();
        rules.extend(standard_rules());
        Self { rules }
    }

    pub fn rules(&self) -> &[ErrorRule] {
        &self.rules
    }

    pub fn classify(&self, status: u16, code: Option<&str>) -> Option<ErrorKind> {
        self.rules
            .iter()
            .find(|r| r.matches(status, code))
            .map(|r| r.kind)
    }

    /// Turn a failed response into a typed error about `entity`/`id`.
    pub fn to_error(&self, status: u16, body: &Value, entity: Entity, id: &str) -> PlaybookError {
        let vendor = VendorError::parse(body);
        let code = vendor.code.clone().unwrap_or_default();
        let detail = if code.is_empty() {
            format!("HTTP {status}: {}", vendor.message)
        } else {
            format!("HTTP {status} {code}: {}", vendor.message)
        };

        match self.classify(status, vendor.code.as_deref()) {
            Some(ErrorKind::NotFound) => PlaybookError::not_found(entity, id),
            Some(ErrorKind::WorkspaceNotFound) => PlaybookError::WorkspaceNotFound(detail),
            Some(ErrorKind::Conflict) => PlaybookError::Conflict(detail),
            Some(ErrorKind::InvalidRequest) => PlaybookError::InvalidRequest(detail),
            Some(ErrorKind::Unauthorized) => PlaybookError::Unauthorized(detail),
            Some(ErrorKind::Transient) => PlaybookError::Transient(detail),
            Some(ErrorKind::Inconsistent) => PlaybookError::Inconsistent(detail),
            _ => PlaybookError::Api {
                status,
                code,
                message: vendor.message,
            },
        }
    }
}

impl Default for ErrorTable {
    fn default() -> Self {
        ErrorTable::standard().clone()
    }
}
