//! Export and import orchestration.
//!
//! An orchestrator resolves the branches to process, then runs the
//! selected modules of each branch one after the other in dependency
//! order. Branches are processed sequentially and the first module
//! failure aborts the whole run with an error naming the module and the
//! branch.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{error, info, info_span, warn, Instrument};

use crate::client::memory::MemoryStack;
use crate::client::SharedClient;
use crate::config::RunConfig;
use crate::error::{Error, Result};
use crate::mapper::UidMapper;
use crate::modules::{create_exporter, create_importer, ModuleContext, ModuleKind};
use crate::progress::{ModuleSummary, ProgressRegistry, ResultCounts, StrategyRegistry};
use crate::retry::with_retry;
use crate::store::{copy_dir_all, create_folder_if_not_exist};

/// Counts of one branch (or of the unbranched stack).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchSummary {
    /// Branch uid, `None` when the stack has no branches.
    pub branch: Option<String>,
    /// One line per module that reported progress.
    pub modules: Vec<ModuleSummary>,
    /// Failures of every sub-process, including those a module's summary
    /// line does not show.
    pub failed_items: u64,
}

/// Final report of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Per-branch results in processing order.
    pub branches: Vec<BranchSummary>,
    /// Set when some items failed, so the caller should not claim full success.
    pub no_success_msg: bool,
}

impl RunSummary {
    fn push(&mut self, branch: BranchSummary) {
        if branch.failed_items > 0 || branch.modules.iter().any(|m| m.counts.failures > 0) {
            self.no_success_msg = true;
        }
        self.branches.push(branch);
    }

    /// Counts summed over every branch and module.
    #[must_use]
    pub fn totals(&self) -> ResultCounts {
        self.branches
            .iter()
            .flat_map(|b| &b.modules)
            .fold(ResultCounts::default(), |acc, m| ResultCounts {
                total: acc.total + m.counts.total,
                success: acc.success + m.counts.success,
                failures: acc.failures + m.counts.failures,
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Export,
    Import,
}

impl Direction {
    fn verb(self) -> &'static str {
        match self {
            Self::Export => "export",
            Self::Import => "import",
        }
    }
}

/// Branches to process: the configured list, else the stack's own list,
/// else a single unbranched pass.
async fn resolve_branches(config: &RunConfig, client: &SharedClient) -> Result<Vec<Option<String>>> {
    if let Some(branches) = &config.branches {
        return Ok(branches.iter().cloned().map(Some).collect());
    }
    let discovered = with_retry(&config.retry, "list branches", || client.branches()).await?;
    match discovered {
        Some(branches) if !branches.is_empty() => {
            info!(branches = branches.len(), "stack has branches");
            Ok(branches.into_iter().map(|b| Some(b.uid)).collect())
        }
        _ => Ok(vec![None]),
    }
}

/// Runs every selected module of one branch.
async fn run_branch(
    direction: Direction,
    config: &Arc<RunConfig>,
    client: &SharedClient,
    root: &Path,
    branch: Option<&str>,
) -> Result<BranchSummary> {
    let modules = config.resolved_modules()?;
    let client = client.scoped(branch);
    let mapper = Arc::new(UidMapper::new(root));
    let registry = ProgressRegistry::new(
        StrategyRegistry::with_module_defaults(),
        config.show_progress,
    );

    info!(
        branch = branch.unwrap_or("-"),
        root = %root.display(),
        modules = modules.len(),
        "starting {}",
        direction.verb()
    );

    for kind in modules {
        let progress = registry.module(kind.display_name());
        let ctx = ModuleContext::new(
            kind,
            Arc::clone(config),
            Arc::clone(&client),
            Arc::clone(&mapper),
            progress.clone(),
            root.to_path_buf(),
            branch.map(str::to_string),
        );
        let result = run_module(direction, ctx).await;
        progress.finish();
        if let Err(e) = result {
            error!(module = kind.as_str(), branch = branch.unwrap_or("-"), "module failed: {}", e);
            let e = e.in_module(kind.display_name());
            return Err(match branch {
                Some(uid) => e.in_branch(uid),
                None => e,
            });
        }
        if let Some(summary) = registry.summarize(kind.display_name()) {
            info!(
                module = kind.as_str(),
                total = summary.counts.total,
                success = summary.counts.success,
                failures = summary.counts.failures,
                "module complete"
            );
        }
    }

    Ok(BranchSummary {
        branch: branch.map(str::to_string),
        modules: registry.summaries(),
        failed_items: registry.failed_items(),
    })
}

async fn run_module(direction: Direction, ctx: ModuleContext) -> Result<()> {
    let mut runner = match direction {
        Direction::Export => create_exporter(ctx),
        Direction::Import => create_importer(ctx)?,
    };
    let span = info_span!("module", name = runner.kind().as_str());
    runner.start().instrument(span).await
}

/// Exports a stack into the content directory.
pub struct Exporter {
    config: Arc<RunConfig>,
    client: SharedClient,
}

impl Exporter {
    /// Creates an exporter reading from `client`.
    #[must_use]
    pub fn new(config: RunConfig, client: SharedClient) -> Self {
        Self {
            config: Arc::new(config),
            client,
        }
    }

    /// Content root of `branch`.
    #[must_use]
    pub fn branch_root(&self, branch: Option<&str>) -> PathBuf {
        match branch {
            Some(uid) => self.config.data_dir.join(uid),
            None => self.config.data_dir.clone(),
        }
    }

    /// Runs the export.
    ///
    /// # Errors
    ///
    /// Returns the first module failure, wrapped with its module and branch.
    pub async fn run(&self) -> Result<RunSummary> {
        self.config.validate()?;
        create_folder_if_not_exist(&self.config.data_dir)?;

        let mut summary = RunSummary::default();
        for branch in resolve_branches(&self.config, &self.client).await? {
            let root = self.branch_root(branch.as_deref());
            create_folder_if_not_exist(&root)?;
            let result = run_branch(
                Direction::Export,
                &self.config,
                &self.client,
                &root,
                branch.as_deref(),
            )
            .await?;
            summary.push(result);
        }
        info!(
            branches = summary.branches.len(),
            failures = summary.totals().failures,
            "export finished"
        );
        Ok(summary)
    }
}

/// Imports a content directory into a stack.
pub struct Importer {
    config: Arc<RunConfig>,
    client: SharedClient,
}

impl Importer {
    /// Creates an importer writing to `client`.
    ///
    /// With `dry_run` set the client is replaced by an empty in-memory
    /// stack, so the whole pipeline runs without touching the target.
    #[must_use]
    pub fn new(config: RunConfig, client: SharedClient) -> Self {
        let client: SharedClient = if config.dry_run {
            info!("dry run, importing into an in-memory stack");
            Arc::new(MemoryStack::new())
        } else {
            client
        };
        Self {
            config: Arc::new(config),
            client,
        }
    }

    /// Directory the import reads from and writes mapper files into.
    #[must_use]
    pub fn backup_root(&self) -> PathBuf {
        self.config.backup_dir.clone().unwrap_or_else(|| {
            let secs = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default();
            let mut name = self.config.data_dir.as_os_str().to_os_string();
            name.push(format!("_backup_{}", secs));
            PathBuf::from(name)
        })
    }

    /// Copies the content directory into the backup, unless the backup
    /// already exists (a resumed import keeps its uid maps).
    fn prepare_backup(&self) -> Result<PathBuf> {
        let backup = self.backup_root();
        if !self.config.data_dir.is_dir() {
            return Err(Error::Config(format!(
                "content directory {} does not exist",
                self.config.data_dir.display()
            )));
        }
        if backup.is_dir() {
            info!(backup = %backup.display(), "reusing existing backup");
        } else {
            info!(from = %self.config.data_dir.display(), to = %backup.display(), "creating backup");
            copy_dir_all(&self.config.data_dir, &backup)?;
        }
        Ok(backup)
    }

    /// Runs the import.
    ///
    /// # Errors
    ///
    /// Returns the first module failure, wrapped with its module and branch.
    pub async fn run(&self) -> Result<RunSummary> {
        self.config.validate()?;
        let backup = self.prepare_backup()?;

        let mut summary = RunSummary::default();
        for branch in resolve_branches(&self.config, &self.client).await? {
            let root = match branch.as_deref() {
                Some(uid) if backup.join(uid).is_dir() => backup.join(uid),
                Some(uid) => {
                    warn!(branch = uid, "no branch directory in export, using content root");
                    backup.clone()
                }
                None => backup.clone(),
            };
            let result = run_branch(
                Direction::Import,
                &self.config,
                &self.client,
                &root,
                branch.as_deref(),
            )
            .await?;
            summary.push(result);
        }
        info!(
            branches = summary.branches.len(),
            failures = summary.totals().failures,
            backup = %backup.display(),
            "import finished"
        );
        Ok(summary)
    }
}

/// Modules whose uid maps another module needs but that are not selected.
///
/// Used by the CLI to warn before a partial import.
#[must_use]
pub fn missing_prerequisites(config: &RunConfig) -> Vec<(ModuleKind, ModuleKind)> {
    let Ok(selected) = config.resolved_modules() else {
        return Vec::new();
    };
    selected
        .iter()
        .flat_map(|kind| {
            kind.dependencies()
                .iter()
                .filter(|dep| !selected.contains(dep))
                .map(move |dep| (*kind, *dep))
        })
        .collect()
}
