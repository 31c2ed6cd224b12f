//! Configuration types for stack-migrate.
//!
//! A run is described by one YAML document. Everything is read once at
//! startup; workers only ever see `&RunConfig`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::modules::ModuleKind;
use crate::retry::RetryConfig;
use crate::store::ChunkLimits;

/// Main run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Remote stack credentials and hosts.
    pub stack: StackConfig,
    /// Root of the exported content (export target, import source).
    pub data_dir: PathBuf,
    /// Copy of `data_dir` the import works from; generated when absent.
    #[serde(default)]
    pub backup_dir: Option<PathBuf>,
    /// Branches to process; discovered from the stack when absent.
    #[serde(default)]
    pub branches: Option<Vec<String>>,
    /// Run only this module.
    #[serde(default)]
    pub single_module: Option<ModuleKind>,
    /// Module order and per-module options.
    #[serde(default)]
    pub modules: ModulesConfig,
    /// Defaults applied to every module.
    #[serde(default)]
    pub defaults: ModuleDefaults,
    /// Retry policy for remote calls.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Do not publish imported entries and assets.
    #[serde(default)]
    pub skip_publish: bool,
    /// Import against an in-memory stack instead of the remote one.
    #[serde(default)]
    pub dry_run: bool,
    /// Status given to imported webhooks.
    #[serde(default)]
    pub import_webhook_status: WebhookStatus,
    /// Render terminal progress bars.
    #[serde(default = "default_true")]
    pub show_progress: bool,
}

/// Credentials and hosts of the remote stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackConfig {
    /// Stack API key.
    pub api_key: String,
    /// Management token (preferred).
    #[serde(default)]
    pub management_token: Option<String>,
    /// User session token, used when no management token is set.
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Content management API base url.
    #[serde(default = "default_host")]
    pub host: String,
    /// Marketplace API base url.
    #[serde(default = "default_marketplace_host")]
    pub marketplace_host: String,
    /// Personalization API base url.
    #[serde(default = "default_personalize_host")]
    pub personalize_host: String,
    /// Organization owning the stack (marketplace and personalization).
    #[serde(default)]
    pub organization_uid: Option<String>,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Module order plus per-module overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModulesConfig {
    /// Modules to run; reordered to satisfy dependencies.
    #[serde(default = "ModuleKind::default_order")]
    pub types: Vec<ModuleKind>,
    /// Overrides keyed by module name (e.g. `assets`).
    #[serde(flatten)]
    pub options: BTreeMap<ModuleKind, ModuleOptions>,
}

impl Default for ModulesConfig {
    fn default() -> Self {
        Self {
            types: ModuleKind::default_order(),
            options: BTreeMap::new(),
        }
    }
}

/// Per-module overrides; unset fields fall back to [`ModuleDefaults`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleOptions {
    /// Directory under the data root.
    pub dir_name: Option<String>,
    /// Primary document / chunk index file name.
    pub file_name: Option<String>,
    /// Page size for fetches.
    pub batch_limit: Option<u64>,
    /// Concurrent read calls.
    pub fetch_concurrency: Option<usize>,
    /// Concurrent write calls.
    pub write_concurrency: Option<usize>,
    /// Chunk threshold in megabytes.
    pub chunk_file_size_mb: Option<f64>,
    /// Export earlier asset versions too.
    #[serde(default)]
    pub include_versioned_assets: bool,
    /// Asset urls require authentication to download.
    #[serde(default)]
    pub secured_assets: bool,
    /// Concurrent binary downloads.
    pub download_limit: Option<usize>,
}

/// Defaults for every module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleDefaults {
    /// Page size for fetches.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: u64,
    /// Concurrent read calls.
    #[serde(default = "default_concurrency")]
    pub fetch_concurrency: usize,
    /// Concurrent write calls.
    #[serde(default = "default_concurrency")]
    pub write_concurrency: usize,
    /// Chunk threshold in megabytes.
    #[serde(default = "default_chunk_mb")]
    pub chunk_file_size_mb: f64,
}

impl Default for ModuleDefaults {
    fn default() -> Self {
        Self {
            batch_limit: default_batch_limit(),
            fetch_concurrency: default_concurrency(),
            write_concurrency: default_concurrency(),
            chunk_file_size_mb: default_chunk_mb(),
        }
    }
}

/// Effective settings of one module after applying defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleSettings {
    /// Directory under the data root.
    pub dir_name: String,
    /// Primary document / chunk index file name.
    pub file_name: String,
    /// Page size for fetches.
    pub batch_limit: u64,
    /// Concurrent read calls.
    pub fetch_concurrency: usize,
    /// Concurrent write calls.
    pub write_concurrency: usize,
    /// Concurrent binary downloads.
    pub download_limit: usize,
    /// Chunk threshold.
    pub chunk_limits: ChunkLimits,
    /// Export earlier asset versions too.
    pub include_versioned_assets: bool,
    /// Asset urls require authentication to download.
    pub secured_assets: bool,
}

/// Status of imported webhooks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookStatus {
    /// Create every webhook disabled.
    #[default]
    Disable,
    /// Keep the exported enabled/disabled state.
    Current,
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "https://api.contentstack.io/v3".to_string()
}

fn default_marketplace_host() -> String {
    "https://developerhub-api.contentstack.com".to_string()
}

fn default_personalize_host() -> String {
    "https://personalize-api.contentstack.com".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_batch_limit() -> u64 {
    100
}

fn default_concurrency() -> usize {
    5
}

fn default_chunk_mb() -> f64 {
    1.0
}

impl RunConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.stack.api_key.trim().is_empty() {
            return Err(Error::Config("stack.api_key cannot be empty".to_string()));
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(Error::Config("data_dir cannot be empty".to_string()));
        }
        if self.modules.types.is_empty() && self.single_module.is_none() {
            return Err(Error::Config("modules.types cannot be empty".to_string()));
        }
        if self.defaults.batch_limit == 0 {
            return Err(Error::Config("defaults.batch_limit must be greater than 0".to_string()));
        }
        if self.defaults.fetch_concurrency == 0 || self.defaults.write_concurrency == 0 {
            return Err(Error::Config("concurrency must be greater than 0".to_string()));
        }
        if self.defaults.chunk_file_size_mb <= 0.0 {
            return Err(Error::Config("chunk_file_size_mb must be positive".to_string()));
        }
        for (kind, options) in &self.modules.options {
            if options.batch_limit == Some(0)
                || options.fetch_concurrency == Some(0)
                || options.write_concurrency == Some(0)
                || options.download_limit == Some(0)
            {
                return Err(Error::Config(format!(
                    "modules.{}: limits must be greater than 0",
                    kind.as_str()
                )));
            }
        }
        if let Some(branches) = &self.branches {
            if branches.iter().any(|b| b.trim().is_empty()) {
                return Err(Error::Config("branch uid cannot be empty".to_string()));
            }
        }
        Ok(())
    }

    /// Effective settings for `kind`.
    #[must_use]
    pub fn module_settings(&self, kind: ModuleKind) -> ModuleSettings {
        let options = self
            .modules
            .options
            .get(&kind)
            .cloned()
            .unwrap_or_default();
        let write_concurrency = options
            .write_concurrency
            .unwrap_or(self.defaults.write_concurrency);

        ModuleSettings {
            dir_name: options
                .dir_name
                .unwrap_or_else(|| kind.dir_name().to_string()),
            file_name: options
                .file_name
                .unwrap_or_else(|| kind.file_name().to_string()),
            batch_limit: options.batch_limit.unwrap_or(self.defaults.batch_limit),
            fetch_concurrency: options
                .fetch_concurrency
                .unwrap_or(self.defaults.fetch_concurrency),
            write_concurrency,
            download_limit: options.download_limit.unwrap_or(write_concurrency),
            chunk_limits: ChunkLimits::megabytes(
                options
                    .chunk_file_size_mb
                    .unwrap_or(self.defaults.chunk_file_size_mb),
            ),
            include_versioned_assets: options.include_versioned_assets,
            secured_assets: options.secured_assets,
        }
    }

    /// Modules to run, in dependency order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the selection has a dependency cycle.
    pub fn resolved_modules(&self) -> Result<Vec<ModuleKind>> {
        match self.single_module {
            Some(kind) => Ok(vec![kind]),
            None => ModuleKind::dependency_order(&self.modules.types),
        }
    }
}
