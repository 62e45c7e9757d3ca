pub mod activation;
pub mod classify;
pub mod client;
pub mod config;
pub mod error;
pub mod io;
pub mod lock;
pub mod orchestrator;
pub mod paths;
pub mod repository;
pub mod types;

#[cfg(test)]
pub(crate) mod fake;

pub use activation::{
    DeleteOutcome, PlaybookContext, Transition, VersionActivationManager, VersionChangeRequest,
    VersionCommand,
};
pub use client::{ApiClient, ApiResponse, HttpApiClient, Method};
pub use config::Config;
pub use error::{Entity, ErrorKind, PlaybookError, Result};
pub use orchestrator::{AttachedIds, AuditReport, AuditViolation, CreatedPlaybook, PlaybookOrchestrator};
pub use repository::PlaybookRepository;
