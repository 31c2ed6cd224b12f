//! Size-bounded chunk files with a meta index.
//!
//! Layout of one chunked set inside its directory:
//!
//! ```text
//! <dir>/<index file>     {"1": "chunk-1.json", "2": "chunk-2.json"}
//! <dir>/chunk-N.json     {"<uid>": {...item...}, ...}
//! <dir>/metadata.json    {"chunk-1.json": [{picked keys}, ...], ...}
//! ```
//!
//! The whole item set is recoverable from the index plus the chunk files
//! it names; `metadata.json` carries a few picked fields per item so
//! later steps (asset dedup, entry counts) do not have to load chunks.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{create_folder_if_not_exist, read_json_file, write_json_file};
use crate::error::{Error, Result};

/// Name of the meta index written next to the chunks.
pub const META_FILE: &str = "metadata.json";

/// Threshold at which a new chunk file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLimits {
    /// Maximum serialized bytes per chunk.
    pub max_bytes: u64,
    /// Optional maximum items per chunk.
    pub max_items: Option<usize>,
}

impl ChunkLimits {
    /// Limit by size in megabytes only.
    #[must_use]
    pub fn megabytes(mb: f64) -> Self {
        Self {
            max_bytes: (mb * 1024.0 * 1024.0) as u64,
            max_items: None,
        }
    }

    fn exceeded_by(&self, bytes: u64, items: usize) -> bool {
        bytes > self.max_bytes || self.max_items.is_some_and(|max| items > max)
    }
}

impl Default for ChunkLimits {
    fn default() -> Self {
        Self::megabytes(1.0)
    }
}

/// Writes a module's items into chunk files.
#[derive(Debug)]
pub struct ChunkedJsonWriter {
    dir: PathBuf,
    index_file: String,
    key_field: String,
    meta_pick_keys: Vec<String>,
    limits: ChunkLimits,
    current: Map<String, Value>,
    current_bytes: u64,
    current_meta: Vec<Value>,
    index: BTreeMap<usize, String>,
    meta: BTreeMap<String, Vec<Value>>,
    written: usize,
}

impl ChunkedJsonWriter {
    /// Opens a writer in `dir`; the directory is created if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Structural`] if the directory cannot be created.
    pub fn create(dir: impl Into<PathBuf>, index_file: &str, limits: ChunkLimits) -> Result<Self> {
        let dir = dir.into();
        create_folder_if_not_exist(&dir)?;
        Ok(Self {
            dir,
            index_file: index_file.to_string(),
            key_field: "uid".to_string(),
            meta_pick_keys: vec!["uid".to_string()],
            limits,
            current: Map::new(),
            current_bytes: 0,
            current_meta: Vec::new(),
            index: BTreeMap::new(),
            meta: BTreeMap::new(),
            written: 0,
        })
    }

    /// Fields copied into the meta index for each item.
    #[must_use]
    pub fn with_meta_keys(mut self, keys: &[&str]) -> Self {
        self.meta_pick_keys = keys.iter().map(|k| (*k).to_string()).collect();
        self
    }

    /// Field used as the key inside a chunk (default `uid`).
    #[must_use]
    pub fn with_key_field(mut self, key: &str) -> Self {
        self.key_field = key.to_string();
        self
    }

    /// Number of items accepted so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.written
    }

    /// True when nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.written == 0
    }

    /// Appends items, flushing the current chunk once the threshold is crossed.
    pub fn write_into_file(&mut self, items: impl IntoIterator<Item = Value>) -> Result<()> {
        for item in items {
            let size = serde_json::to_vec(&item)?.len() as u64;
            if !self.current.is_empty()
                && self
                    .limits
                    .exceeded_by(self.current_bytes + size, self.current.len() + 1)
            {
                self.flush_chunk()?;
            }

            let key = item
                .get(&self.key_field)
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("item-{}", self.written));

            self.current_meta.push(pick(&item, &self.meta_pick_keys));
            self.current.insert(key, item);
            self.current_bytes += size;
            self.written += 1;
        }
        Ok(())
    }

    /// Flushes the open chunk and writes the index and meta files.
    ///
    /// After this returns every written item is reachable from the index.
    pub fn complete_file(mut self) -> Result<ChunkedJsonReader> {
        if !self.current.is_empty() {
            self.flush_chunk()?;
        }

        let index: BTreeMap<String, String> = self
            .index
            .iter()
            .map(|(n, name)| (n.to_string(), name.clone()))
            .collect();
        write_json_file(&self.dir.join(&self.index_file), &index)?;
        write_json_file(&self.dir.join(META_FILE), &self.meta)?;

        debug!(
            "completed {} items in {} chunks under {}",
            self.written,
            self.index.len(),
            self.dir.display()
        );

        Ok(ChunkedJsonReader {
            dir: self.dir,
            index: self.index,
        })
    }

    fn flush_chunk(&mut self) -> Result<()> {
        let number = self.index.len() + 1;
        let name = format!("chunk-{}.json", number);
        write_json_file(&self.dir.join(&name), &self.current)?;

        self.meta
            .insert(name.clone(), std::mem::take(&mut self.current_meta));
        self.index.insert(number, name);
        self.current = Map::new();
        self.current_bytes = 0;
        Ok(())
    }
}

fn pick(item: &Value, keys: &[String]) -> Value {
    let mut picked = Map::new();
    for key in keys {
        if let Some(value) = item.get(key) {
            picked.insert(key.clone(), value.clone());
        }
    }
    Value::Object(picked)
}

/// Reads a chunked set written by [`ChunkedJsonWriter`].
#[derive(Debug, Clone)]
pub struct ChunkedJsonReader {
    dir: PathBuf,
    index: BTreeMap<usize, String>,
}

impl ChunkedJsonReader {
    /// Opens the set in `dir`; `None` when the index file is absent.
    pub fn open(dir: &Path, index_file: &str) -> Result<Option<Self>> {
        let raw: Option<BTreeMap<String, String>> = read_json_file(&dir.join(index_file))?;
        let Some(raw) = raw else {
            return Ok(None);
        };

        let mut index = BTreeMap::new();
        for (number, name) in raw {
            let number = number.parse::<usize>().map_err(|_| {
                Error::Structural(format!(
                    "corrupt chunk index in '{}': key '{}'",
                    dir.display(),
                    number
                ))
            })?;
            index.insert(number, name);
        }

        Ok(Some(Self {
            dir: dir.to_path_buf(),
            index,
        }))
    }

    /// Chunk file names in write order.
    pub fn chunk_names(&self) -> impl Iterator<Item = &str> {
        self.index.values().map(String::as_str)
    }

    /// Loads one chunk.
    pub fn read_chunk(&self, name: &str) -> Result<Map<String, Value>> {
        read_json_file(&self.dir.join(name))?.ok_or_else(|| {
            Error::Structural(format!(
                "chunk '{}' listed in index but missing from '{}'",
                name,
                self.dir.display()
            ))
        })
    }

    /// Loads every item in chunk order.
    pub fn read_all(&self) -> Result<Vec<Value>> {
        let mut items = Vec::new();
        for name in self.chunk_names() {
            items.extend(self.read_chunk(name)?.into_iter().map(|(_, v)| v));
        }
        Ok(items)
    }

    /// Flattened meta records of every chunk, in chunk order.
    pub fn get_plain_meta(&self) -> Result<Vec<Value>> {
        let meta: BTreeMap<String, Vec<Value>> =
            read_json_file(&self.dir.join(META_FILE))?.unwrap_or_default();
        Ok(self
            .chunk_names()
            .filter_map(|name| meta.get(name))
            .flatten()
            .cloned()
            .collect())
    }
}

#[cfg(test)]
#[path = "chunked_tests.rs"]
mod tests;
