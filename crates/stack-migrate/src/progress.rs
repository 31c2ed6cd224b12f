//! Per-run progress counters and result aggregation.
//!
//! Each module reports against one or more named sub-processes
//! (folders, items, downloads, publish, ...). At the end of a module the
//! [`StrategyRegistry`] turns those counters into the single
//! `{total, success, failures}` line shown to the user.
//!
//! A [`ProgressRegistry`] is created once per run and handed to every
//! module runner; there is no process-wide state.

use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use crate::modules::ModuleKind;

/// Well-known sub-process names.
pub mod process {
    /// Main item fetch/write loop of a module.
    pub const ITEMS: &str = "items";
    /// Asset folder structure.
    pub const FOLDERS: &str = "folders";
    /// Asset binary downloads.
    pub const DOWNLOADS: &str = "downloads";
    /// Earlier asset versions.
    pub const VERSIONS: &str = "versions";
    /// Second pass that writes full schemas / references.
    pub const REFERENCES: &str = "references";
    /// Publishing imported items to environments.
    pub const PUBLISH: &str = "publish";
    /// Marketplace app installation.
    pub const INSTALL: &str = "install";
    /// Restoring marketplace app configuration.
    pub const CONFIGURE: &str = "configure";
    /// Taxonomy terms.
    pub const TERMS: &str = "terms";
}

/// Counters of one sub-process. Monotonic until the module completes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessCounter {
    /// Items expected.
    pub total: u64,
    /// Items completed successfully.
    pub success: u64,
    /// Items that failed.
    pub failures: u64,
}

/// Aggregated counts for a module.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultCounts {
    /// Items expected.
    pub total: u64,
    /// Items completed successfully.
    pub success: u64,
    /// Items that failed.
    pub failures: u64,
}

impl From<ProcessCounter> for ResultCounts {
    fn from(c: ProcessCounter) -> Self {
        Self {
            total: c.total,
            success: c.success,
            failures: c.failures,
        }
    }
}

/// Sub-process counters of one module, keyed by process name.
pub type ProcessMap = BTreeMap<String, ProcessCounter>;

/// Custom aggregation function.
pub type AggregateFn = Arc<dyn Fn(&ProcessMap) -> Option<ResultCounts> + Send + Sync>;

/// How a module's sub-processes collapse into one result.
#[derive(Clone)]
pub enum Strategy {
    /// Sum every sub-process.
    Default,
    /// Report one sub-process as representative of the module.
    Primary(String),
    /// Arbitrary function over all sub-processes.
    Custom(AggregateFn),
}

impl std::fmt::Debug for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => write!(f, "Default"),
            Self::Primary(p) => write!(f, "Primary({p})"),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

impl Strategy {
    /// Applies the strategy; `None` means "not started yet", not zero.
    #[must_use]
    pub fn aggregate(&self, processes: &ProcessMap) -> Option<ResultCounts> {
        if processes.is_empty() {
            return None;
        }
        match self {
            Self::Default => Some(processes.values().fold(ResultCounts::default(), |acc, c| {
                ResultCounts {
                    total: acc.total + c.total,
                    success: acc.success + c.success,
                    failures: acc.failures + c.failures,
                }
            })),
            Self::Primary(name) => processes.get(name).copied().map(ResultCounts::from),
            Self::Custom(f) => f(processes),
        }
    }
}

/// Maps module display name → aggregation strategy.
#[derive(Debug, Clone, Default)]
pub struct StrategyRegistry {
    strategies: HashMap<String, Strategy>,
}

impl StrategyRegistry {
    /// Registers (or replaces) the strategy for `module`.
    pub fn register(&mut self, module: &str, strategy: Strategy) {
        self.strategies.insert(module.to_string(), strategy);
    }

    /// Strategy for `module`, falling back to [`Strategy::Default`].
    #[must_use]
    pub fn get(&self, module: &str) -> &Strategy {
        static DEFAULT: Strategy = Strategy::Default;
        self.strategies.get(module).unwrap_or(&DEFAULT)
    }

    /// Strategies used by the built-in modules.
    ///
    /// Each module reports its main process as the total, while failures
    /// of every other sub-process (downloads, reference passes, publishing,
    /// configuration) are still counted.
    #[must_use]
    pub fn with_module_defaults() -> Self {
        let mut registry = Self::default();

        for kind in [
            ModuleKind::Assets,
            ModuleKind::ContentTypes,
            ModuleKind::GlobalFields,
            ModuleKind::Entries,
        ] {
            registry.register(kind.display_name(), primary_with_failures(&[process::ITEMS]));
        }
        registry.register(
            ModuleKind::MarketplaceApps.display_name(),
            primary_with_failures(&[process::INSTALL, process::ITEMS]),
        );

        registry
    }
}

/// Totals of the first present process in `primary`, with the failures
/// of all processes. Sums everything when no primary process reported.
fn primary_with_failures(primary: &'static [&'static str]) -> Strategy {
    Strategy::Custom(Arc::new(move |processes: &ProcessMap| {
        let all_failures: u64 = processes.values().map(|c| c.failures).sum();
        match primary.iter().find_map(|name| processes.get(*name)) {
            Some(main) => Some(ResultCounts {
                total: main.total,
                success: main.success,
                failures: all_failures,
            }),
            None => Strategy::Default.aggregate(processes),
        }
    }))
}

/// Summary line for one module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSummary {
    /// Module display name.
    pub module: String,
    /// Aggregated counts.
    #[serde(flatten)]
    pub counts: ResultCounts,
}

/// Live counters for every module of a run.
#[derive(Debug)]
pub struct ProgressRegistry {
    modules: Mutex<Vec<(String, ProcessMap)>>,
    strategies: StrategyRegistry,
    show_bars: bool,
}

impl ProgressRegistry {
    /// Creates a registry using the given strategies.
    #[must_use]
    pub fn new(strategies: StrategyRegistry, show_bars: bool) -> Arc<Self> {
        Arc::new(Self {
            modules: Mutex::new(Vec::new()),
            strategies,
            show_bars,
        })
    }

    /// Registry with the built-in strategies and no terminal output.
    #[must_use]
    pub fn quiet() -> Arc<Self> {
        Self::new(StrategyRegistry::with_module_defaults(), false)
    }

    /// Handle through which `module` reports progress.
    pub fn module(self: &Arc<Self>, module: &str) -> ModuleProgress {
        self.update(module, |_| {});
        let bar = if self.show_bars {
            create_progress_bar(module)
        } else {
            ProgressBar::hidden()
        };
        ModuleProgress {
            registry: Arc::clone(self),
            module: module.to_string(),
            bar,
        }
    }

    /// Current sub-process counters of `module`.
    #[must_use]
    pub fn processes(&self, module: &str) -> ProcessMap {
        self.modules
            .lock()
            .ok()
            .and_then(|m| {
                m.iter()
                    .find(|(name, _)| name == module)
                    .map(|(_, p)| p.clone())
            })
            .unwrap_or_default()
    }

    /// Aggregated counts of `module`, `None` if it has no data yet.
    #[must_use]
    pub fn summarize(&self, module: &str) -> Option<ModuleSummary> {
        let processes = self.processes(module);
        self.strategies
            .get(module)
            .aggregate(&processes)
            .map(|counts| ModuleSummary {
                module: module.to_string(),
                counts,
            })
    }

    /// Failures recorded by any sub-process of any module, before
    /// aggregation.
    #[must_use]
    pub fn failed_items(&self) -> u64 {
        self.modules
            .lock()
            .map(|m| {
                m.iter()
                    .flat_map(|(_, processes)| processes.values())
                    .map(|c| c.failures)
                    .sum()
            })
            .unwrap_or_default()
    }

    /// Summaries of every module that reported data, in registration order.
    #[must_use]
    pub fn summaries(&self) -> Vec<ModuleSummary> {
        let names: Vec<String> = self
            .modules
            .lock()
            .map(|m| m.iter().map(|(name, _)| name.clone()).collect())
            .unwrap_or_default();
        names.iter().filter_map(|n| self.summarize(n)).collect()
    }

    fn update(&self, module: &str, f: impl FnOnce(&mut ProcessMap)) {
        let Ok(mut modules) = self.modules.lock() else {
            return;
        };
        let idx = match modules.iter().position(|(name, _)| name == module) {
            Some(idx) => idx,
            None => {
                modules.push((module.to_string(), ProcessMap::new()));
                modules.len() - 1
            }
        };
        f(&mut modules[idx].1);
    }
}

/// Progress handle of one module.
#[derive(Clone)]
pub struct ModuleProgress {
    registry: Arc<ProgressRegistry>,
    module: String,
    bar: ProgressBar,
}

impl std::fmt::Debug for ModuleProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleProgress")
            .field("module", &self.module)
            .finish()
    }
}

impl ModuleProgress {
    /// Module display name.
    #[must_use]
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Adds `n` expected items to `process`.
    pub fn add_total(&self, process: &str, n: u64) {
        self.registry
            .update(&self.module, |p| p.entry(process.to_string()).or_default().total += n);
        self.bar.inc_length(n);
    }

    /// Records `n` successes for `process`.
    pub fn success(&self, process: &str, n: u64) {
        self.registry.update(&self.module, |p| {
            p.entry(process.to_string()).or_default().success += n;
        });
        self.bar.inc(n);
    }

    /// Records `n` failures for `process`.
    pub fn failure(&self, process: &str, n: u64) {
        self.registry.update(&self.module, |p| {
            p.entry(process.to_string()).or_default().failures += n;
        });
        self.bar.inc(n);
    }

    /// Stops the terminal bar.
    pub fn finish(&self) {
        self.bar.finish_with_message(format!("{} done", self.module));
    }
}

fn create_progress_bar(module: &str) -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} {msg:<20} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb.set_message(module.to_string());
    pb
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters(entries: &[(&str, u64, u64, u64)]) -> ProcessMap {
        entries
            .iter()
            .map(|(name, total, success, failures)| {
                (
                    (*name).to_string(),
                    ProcessCounter {
                        total: *total,
                        success: *success,
                        failures: *failures,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_default_strategy_sums() {
        let map = counters(&[("folders", 2, 2, 0), ("items", 10, 8, 2)]);
        let counts = Strategy::Default.aggregate(&map).unwrap();
        assert_eq!(counts, ResultCounts { total: 12, success: 10, failures: 2 });
    }

    #[test]
    fn test_primary_strategy_picks_one_process() {
        let map = counters(&[("folders", 2, 2, 0), ("items", 10, 8, 2)]);
        let counts = Strategy::Primary("items".into()).aggregate(&map).unwrap();
        assert_eq!(counts.total, 10);
    }

    #[test]
    fn test_custom_strategy_sees_all_processes() {
        let strategy = Strategy::Custom(Arc::new(|p: &ProcessMap| {
            Some(ResultCounts {
                total: p.len() as u64,
                success: 0,
                failures: 0,
            })
        }));
        let map = counters(&[("a", 1, 1, 0), ("b", 1, 1, 0), ("c", 1, 0, 1)]);
        assert_eq!(strategy.aggregate(&map).unwrap().total, 3);
    }

    #[test]
    fn test_empty_processes_is_none_not_zero() {
        assert!(Strategy::Default.aggregate(&ProcessMap::new()).is_none());
        let registry = ProgressRegistry::quiet();
        assert!(registry.summarize("Environments").is_none());
    }

    #[test]
    fn test_registry_tracks_modules_in_order() {
        let registry = ProgressRegistry::quiet();
        let env = registry.module("Environments");
        env.add_total(process::ITEMS, 2);
        env.success(process::ITEMS, 2);

        let assets = registry.module(ModuleKind::Assets.display_name());
        assets.add_total(process::FOLDERS, 3);
        assets.success(process::FOLDERS, 3);
        assets.add_total(process::ITEMS, 5);
        assets.success(process::ITEMS, 4);
        assets.failure(process::ITEMS, 1);

        let summaries = registry.summaries();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].module, "Environments");
        assert_eq!(
            summaries[1].counts,
            ResultCounts { total: 5, success: 4, failures: 1 }
        );
    }

    #[test]
    fn test_marketplace_apps_without_install_step() {
        let strategies = StrategyRegistry::with_module_defaults();
        let name = ModuleKind::MarketplaceApps.display_name();

        let without = counters(&[("items", 3, 3, 0)]);
        assert_eq!(strategies.get(name).aggregate(&without).unwrap().total, 3);

        let with = counters(&[("install", 2, 1, 1), ("configure", 1, 0, 1)]);
        assert_eq!(
            strategies.get(name).aggregate(&with).unwrap(),
            ResultCounts { total: 2, success: 1, failures: 2 }
        );
    }

    #[test]
    fn test_entries_include_publish_and_reference_failures() {
        let strategies = StrategyRegistry::with_module_defaults();
        let map = counters(&[("items", 3, 3, 0), ("references", 2, 1, 1), ("publish", 3, 2, 1)]);
        let counts = strategies
            .get(ModuleKind::Entries.display_name())
            .aggregate(&map)
            .unwrap();
        assert_eq!(counts, ResultCounts { total: 3, success: 3, failures: 2 });
    }

    #[test]
    fn test_assets_count_failed_downloads() {
        let strategies = StrategyRegistry::with_module_defaults();
        let map = counters(&[("folders", 1, 1, 0), ("items", 2, 2, 0), ("downloads", 2, 1, 1)]);
        let counts = strategies
            .get(ModuleKind::Assets.display_name())
            .aggregate(&map)
            .unwrap();
        assert_eq!(counts, ResultCounts { total: 2, success: 2, failures: 1 });
    }

    #[test]
    fn test_content_types_count_failed_reference_pass() {
        let strategies = StrategyRegistry::with_module_defaults();
        let map = counters(&[("items", 4, 4, 0), ("references", 4, 3, 1)]);
        for kind in [ModuleKind::ContentTypes, ModuleKind::GlobalFields] {
            let counts = strategies.get(kind.display_name()).aggregate(&map).unwrap();
            assert_eq!(counts.failures, 1);
        }
    }

    #[test]
    fn test_failed_items_reads_raw_counters() {
        let mut strategies = StrategyRegistry::default();
        strategies.register("Custom", Strategy::Primary("items".into()));
        let registry = ProgressRegistry::new(strategies, false);

        let custom = registry.module("Custom");
        custom.add_total("items", 1);
        custom.success("items", 1);
        custom.add_total("extra", 2);
        custom.failure("extra", 2);
        registry.module("Labels").failure(process::REFERENCES, 1);

        assert_eq!(registry.summarize("Custom").unwrap().counts.failures, 0);
        assert_eq!(registry.failed_items(), 3);
    }

    #[test]
    fn test_separate_registries_are_isolated() {
        let a = ProgressRegistry::quiet();
        let b = ProgressRegistry::quiet();
        a.module("Labels").add_total(process::ITEMS, 1);
        assert!(b.summarize("Labels").is_none());
    }
}
