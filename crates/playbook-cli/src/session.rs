use anyhow::Context;
use playbook_core::config::{has_errors, Config};
use playbook_core::{HttpApiClient, PlaybookOrchestrator, PlaybookRepository, VersionActivationManager};
use std::path::{Path, PathBuf};

/// Resolved configuration for one invocation.
pub struct Session {
    pub config: Config,
    pub config_path: Option<PathBuf>,
    workspace: Option<String>,
}

impl Session {
    /// An explicit `--config` must exist; the default location is optional
    /// because the `SOCPB_*` variables can stand in for it.
    pub fn load(explicit: Option<&Path>, workspace: Option<String>) -> anyhow::Result<Self> {
        let (mut config, config_path) = match explicit {
            Some(path) => (
                Config::load(path)
                    .with_context(|| format!("failed to load config {}", path.display()))?,
                Some(path.to_path_buf()),
            ),
            None => match Config::default_path() {
                Some(path) => (
                    Config::load_or_default(&path)
                        .with_context(|| format!("failed to load config {}", path.display()))?,
                    Some(path),
                ),
                None => (Config::default(), None),
            },
        };
        config.apply_env(|name| std::env::var(name).ok());

        Ok(Self {
            config,
            config_path,
            workspace,
        })
    }

    pub fn workspace(&self) -> anyhow::Result<String> {
        Ok(self.config.workspace(self.workspace.as_deref())?)
    }

    pub fn orchestrator(&self) -> anyhow::Result<PlaybookOrchestrator<HttpApiClient>> {
        let warnings = self.config.validate();
        if has_errors(&warnings) {
            let messages: Vec<&str> = warnings.iter().map(|w| w.message.as_str()).collect();
            anyhow::bail!("invalid configuration: {}", messages.join("; "));
        }
        let client = HttpApiClient::from_config(&self.config).context("failed to build API client")?;
        let repo = PlaybookRepository::with_error_table(client, self.config.error_table());
        let manager =
            VersionActivationManager::new(repo).with_verify_deletes(self.config.verify_deletes);
        Ok(PlaybookOrchestrator::with_manager(manager))
    }
}
