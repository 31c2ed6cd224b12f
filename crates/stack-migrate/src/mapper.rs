//! Old-uid → new-uid tables that keep references valid across stacks.
//!
//! Tables live under `<root>/mapper/<module>/`. The main table is
//! `uid-mapping.json`; modules may keep auxiliary tables next to it
//! (asset folders, asset urls). Item-level failures are kept in
//! `failed.json` so an operator can retry them by hand.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

use crate::error::{Error, Result};
use crate::store::{read_json_file, write_json_file};

/// Directory holding every module's tables.
pub const MAPPER_DIR: &str = "mapper";
/// Main uid table file name.
pub const UID_MAPPING_FILE: &str = "uid-mapping.json";
/// Failure ledger file name.
pub const FAILED_FILE: &str = "failed.json";

/// A loaded mapping table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UidMap {
    entries: BTreeMap<String, String>,
}

impl UidMap {
    /// New uid for `old`, if mapped.
    #[must_use]
    pub fn get(&self, old: &str) -> Option<&str> {
        self.entries.get(old).map(String::as_str)
    }

    /// Number of mapped uids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is mapped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates `(old, new)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Inserts a pair (used when building maps in memory).
    pub fn insert(&mut self, old: impl Into<String>, new: impl Into<String>) {
        self.entries.insert(old.into(), new.into());
    }
}

impl FromIterator<(String, String)> for UidMap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// One item that could not be imported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedItem {
    /// Source uid of the item.
    pub uid: String,
    /// Title or name, when the item has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Locale for localized items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    /// Error message.
    pub error: String,
}

/// Persists and loads uid tables for one data root.
#[derive(Debug)]
pub struct UidMapper {
    root: PathBuf,
    cache: Mutex<HashMap<PathBuf, BTreeMap<String, String>>>,
}

impl UidMapper {
    /// Creates a mapper rooted at `root` (tables go to `root/mapper`).
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Directory for `module`'s tables.
    #[must_use]
    pub fn module_dir(&self, module: &str) -> PathBuf {
        self.root.join(MAPPER_DIR).join(module)
    }

    /// Records `old → new` in `module`'s main table. Last write wins.
    pub fn write(&self, module: &str, old: &str, new: &str) -> Result<()> {
        self.write_table(module, UID_MAPPING_FILE, [(old, new)])
    }

    /// Records pairs in an auxiliary table of `module`.
    pub fn write_table<'a>(
        &self,
        module: &str,
        table: &str,
        pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<()> {
        let path = self.module_dir(module).join(table);
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| Error::Structural("uid mapper lock poisoned".to_string()))?;

        if !cache.contains_key(&path) {
            let existing = load_table(&path)?;
            cache.insert(path.clone(), existing);
        }
        let Some(entries) = cache.get_mut(&path) else {
            return Err(Error::Structural("uid mapper cache miss".to_string()));
        };

        let before = entries.clone();
        for (old, new) in pairs {
            entries.insert(old.to_string(), new.to_string());
        }
        if *entries != before {
            write_json_file(&path, &*entries)?;
        }
        Ok(())
    }

    /// Loads `module`'s main table; empty when the module never ran.
    pub fn read(&self, module: &str) -> Result<UidMap> {
        self.read_table(module, UID_MAPPING_FILE)
    }

    /// Loads an auxiliary table; empty when absent.
    pub fn read_table(&self, module: &str, table: &str) -> Result<UidMap> {
        Ok(self.load_table(module, table)?.unwrap_or_default())
    }

    /// Loads `module`'s main table, or `None` when the file does not exist.
    ///
    /// Importers whose correctness depends on a prerequisite use this to
    /// receive the map as a typed handle at construction time.
    pub fn load(&self, module: &str) -> Result<Option<UidMap>> {
        self.load_table(module, UID_MAPPING_FILE)
    }

    fn load_table(&self, module: &str, table: &str) -> Result<Option<UidMap>> {
        let path = self.module_dir(module).join(table);
        if let Ok(cache) = self.cache.lock() {
            if let Some(entries) = cache.get(&path) {
                return Ok(Some(UidMap {
                    entries: entries.clone(),
                }));
            }
        }
        let raw: Option<BTreeMap<String, String>> = read_json_file(&path)?;
        Ok(raw.map(|entries| UidMap { entries }))
    }

    /// Appends item failures to `module`'s failure ledger.
    pub fn record_failures(&self, module: &str, failures: &[FailedItem]) -> Result<()> {
        if failures.is_empty() {
            return Ok(());
        }
        let path = self.module_dir(module).join(FAILED_FILE);
        let mut existing: Vec<FailedItem> = read_json_file(&path)?.unwrap_or_default();
        existing.extend_from_slice(failures);
        warn!(
            "{}: {} item(s) failed, details in {}",
            module,
            failures.len(),
            path.display()
        );
        write_json_file(&path, &existing)
    }

    /// Reads `module`'s failure ledger.
    pub fn read_failures(&self, module: &str) -> Result<Vec<FailedItem>> {
        Ok(read_json_file(&self.module_dir(module).join(FAILED_FILE))?.unwrap_or_default())
    }
}

fn load_table(path: &Path) -> Result<BTreeMap<String, String>> {
    Ok(read_json_file(path)?.unwrap_or_default())
}
