//! In-process stack.
//!
//! Holds every collection in memory, per branch. Dry-run imports write
//! here instead of the remote target, and the test suites use it as both
//! the source and the target of a migration. Collections preserve insertion
//! order so pagination is deterministic.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use super::{Branch, PublishTarget, Query, Resource, StackClient};
use crate::error::{Error, Result};

const DEFAULT_BRANCH: &str = "main";
const DEFAULT_MASTER_LOCALE: &str = "en-us";

/// A recorded publish call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRecord {
    /// Plural key of the published resource (`entries`, `assets`).
    pub kind: String,
    /// Uid on this stack.
    pub uid: String,
    /// Requested target.
    pub target: PublishTarget,
}

#[derive(Debug, Default)]
struct BranchState {
    collections: HashMap<String, Vec<Value>>,
    settings: Option<Value>,
    settings_writes: u64,
    published: Vec<PublishRecord>,
}

#[derive(Debug, Default)]
struct StackState {
    branches: BTreeMap<String, BranchState>,
    branch_list: Option<Vec<Branch>>,
    master_locale: Option<String>,
    binaries: HashMap<String, Vec<u8>>,
    failing: Vec<(String, Option<&'static str>, &'static str)>,
    stalls: Vec<(&'static str, u64)>,
    calls: HashMap<&'static str, u64>,
}

/// In-memory [`StackClient`].
///
/// Clones share state; [`StackClient::scoped`] views another branch of
/// the same stack.
#[derive(Debug, Clone, Default)]
pub struct MemoryStack {
    state: Arc<Mutex<StackState>>,
    branch: Option<String>,
}

impl MemoryStack {
    /// Empty stack without branch support.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares the stack's branches.
    pub fn set_branches(&self, uids: &[&str]) {
        if let Ok(mut state) = self.state.lock() {
            state.branch_list = Some(
                uids.iter()
                    .map(|uid| Branch {
                        uid: (*uid).to_string(),
                        source: None,
                    })
                    .collect(),
            );
        }
    }

    /// Sets the master locale (default `en-us`).
    pub fn set_master_locale(&self, code: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.master_locale = Some(code.to_string());
        }
    }

    /// Makes every call on `resource`'s kind in `branch` fail with a
    /// non-retryable error.
    pub fn fail_resource(&self, branch: Option<&str>, resource: &Resource) {
        if let Ok(mut state) = self.state.lock() {
            state
                .failing
                .push((branch_key(branch).to_string(), None, resource.plural_key()));
        }
    }

    /// Like [`fail_resource`](Self::fail_resource), for operation `op`
    /// (`update`, `publish`, ...) only.
    pub fn fail_operation(&self, branch: Option<&str>, op: &'static str, resource: &Resource) {
        if let Ok(mut state) = self.state.lock() {
            state
                .failing
                .push((branch_key(branch).to_string(), Some(op), resource.plural_key()));
        }
    }

    /// Makes operation `op` (`create`, ...) hang forever once it has been
    /// called `after` times, like a request that never returns.
    pub fn stall_after(&self, op: &'static str, after: u64) {
        if let Ok(mut state) = self.state.lock() {
            state.stalls.push((op, after));
        }
    }

    /// Inserts items as-is (uids preserved).
    pub fn seed(&self, resource: &Resource, items: Vec<Value>) {
        if let Ok(mut state) = self.state.lock() {
            let collection = state
                .branches
                .entry(branch_key(self.branch.as_deref()).to_string())
                .or_default()
                .collections
                .entry(collection_key(resource))
                .or_default();
            for mut item in items {
                if let (Resource::Entry { locale, .. }, Value::Object(map)) = (resource, &mut item) {
                    map.insert("locale".to_string(), json!(locale));
                }
                collection.push(item);
            }
        }
    }

    /// Inserts an asset with its binary; `url` is generated when absent.
    pub fn seed_asset(&self, mut metadata: Value, bytes: Vec<u8>) -> Value {
        let uid = metadata
            .get("uid")
            .and_then(Value::as_str)
            .map_or_else(new_uid, str::to_string);
        let filename = metadata
            .get("filename")
            .and_then(Value::as_str)
            .unwrap_or("file")
            .to_string();
        let url = metadata
            .get("url")
            .and_then(Value::as_str)
            .map_or_else(|| asset_url(&uid, &filename), str::to_string);

        if let Value::Object(map) = &mut metadata {
            map.insert("uid".to_string(), json!(uid));
            map.insert("url".to_string(), json!(url));
            map.insert("file_size".to_string(), json!(bytes.len().to_string()));
            map.entry("is_dir").or_insert(json!(false));
        }
        if let Ok(mut state) = self.state.lock() {
            state.binaries.insert(url, bytes);
        }
        self.seed(&Resource::Asset, vec![metadata.clone()]);
        metadata
    }

    /// Serves `bytes` at `url` without listing an asset (earlier versions).
    pub fn seed_binary(&self, url: &str, bytes: Vec<u8>) {
        if let Ok(mut state) = self.state.lock() {
            state.binaries.insert(url.to_string(), bytes);
        }
    }

    /// Replaces the stack settings.
    pub fn seed_settings(&self, settings: Value) {
        if let Ok(mut state) = self.state.lock() {
            state
                .branches
                .entry(branch_key(self.branch.as_deref()).to_string())
                .or_default()
                .settings = Some(settings);
        }
    }

    /// Items of `resource` on this branch.
    #[must_use]
    pub fn items(&self, resource: &Resource) -> Vec<Value> {
        self.lock()
            .map(|state| {
                state
                    .branches
                    .get(branch_key(self.branch.as_deref()))
                    .and_then(|b| b.collections.get(&collection_key(resource)))
                    .map(|items| filter(resource, items).cloned().collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Publish calls received on this branch.
    #[must_use]
    pub fn published(&self) -> Vec<PublishRecord> {
        self.with_branch(|b| b.published.clone())
    }

    /// Number of `add_settings` calls on this branch.
    #[must_use]
    pub fn settings_writes(&self) -> u64 {
        self.with_branch(|b| b.settings_writes)
    }

    /// Calls made to operation `op` (`find`, `download`, ...) across branches.
    #[must_use]
    pub fn calls(&self, op: &str) -> u64 {
        self.lock()
            .ok()
            .and_then(|state| state.calls.get(op).copied())
            .unwrap_or(0)
    }

    /// Total calls of every operation.
    #[must_use]
    pub fn total_calls(&self) -> u64 {
        self.lock()
            .map(|state| state.calls.values().sum())
            .unwrap_or(0)
    }

    fn with_branch<T: Default>(&self, f: impl FnOnce(&BranchState) -> T) -> T {
        self.lock()
            .ok()
            .and_then(|state| state.branches.get(branch_key(self.branch.as_deref())).map(f))
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, StackState>> {
        self.state
            .lock()
            .map_err(|_| Error::Structural("memory stack lock poisoned".to_string()))
    }

    /// Locks the state, counts the call and applies failure injection.
    fn begin(&self, op: &'static str, kind: Option<&Resource>) -> Result<MutexGuard<'_, StackState>> {
        let mut state = self.lock()?;
        *state.calls.entry(op).or_default() += 1;
        if let Some(resource) = kind {
            let branch = branch_key(self.branch.as_deref());
            if state
                .failing
                .iter()
                .any(|(b, o, k)| {
                    b == branch && o.map_or(true, |o| o == op) && *k == resource.plural_key()
                })
            {
                return Err(Error::Api {
                    status: 400,
                    message: format!("{} unavailable on branch '{}'", resource.plural_key(), branch),
                });
            }
        }
        Ok(state)
    }

    async fn hold_if_stalled(&self, op: &'static str) {
        let stalled = self.lock().is_ok_and(|state| {
            let made = state.calls.get(op).copied().unwrap_or(0);
            state.stalls.iter().any(|(o, after)| *o == op && made >= *after)
        });
        if stalled {
            futures::future::pending::<()>().await;
        }
    }

    fn branch_mut<'a>(&self, state: &'a mut StackState) -> &'a mut BranchState {
        state
            .branches
            .entry(branch_key(self.branch.as_deref()).to_string())
            .or_default()
    }
}

fn branch_key(branch: Option<&str>) -> &str {
    branch.unwrap_or(DEFAULT_BRANCH)
}

fn collection_key(resource: &Resource) -> String {
    resource.path()
}

fn new_uid() -> String {
    format!("blt{}", &Uuid::new_v4().simple().to_string()[..16])
}

fn asset_url(uid: &str, filename: &str) -> String {
    format!("memory://assets/{}/{}", uid, filename)
}

fn id_of<'a>(resource: &Resource, item: &'a Value) -> Option<&'a str> {
    item.get(resource.id_field()).and_then(Value::as_str)
}

/// Whether an item of a shared collection belongs to `resource`.
fn belongs(resource: &Resource, item: &Value) -> bool {
    match resource {
        Resource::Asset => item.get("is_dir").and_then(Value::as_bool) != Some(true),
        Resource::AssetFolder => item.get("is_dir").and_then(Value::as_bool) == Some(true),
        Resource::Entry { locale, .. } => {
            item.get("locale").and_then(Value::as_str) == Some(locale.as_str())
        }
        _ => true,
    }
}

fn filter<'a>(resource: &'a Resource, items: &'a [Value]) -> impl Iterator<Item = &'a Value> {
    items.iter().filter(move |item| belongs(resource, item))
}

/// Pointer to the value that must be unique on create, and whether the
/// caller chooses the uid.
fn uniqueness(resource: &Resource) -> (Option<&'static str>, bool) {
    match resource {
        Resource::ContentType
        | Resource::GlobalField
        | Resource::Taxonomy
        | Resource::Term { .. } => (Some("/uid"), true),
        Resource::Locale => (Some("/code"), true),
        Resource::Environment | Resource::Label | Resource::Workflow | Resource::Role => {
            (Some("/name"), false)
        }
        Resource::AppInstallation => (Some("/manifest/uid"), false),
        _ => (None, false),
    }
}

fn page(items: Vec<Value>, query: &Query) -> Vec<Value> {
    let skip = usize::try_from(query.skip).unwrap_or(usize::MAX);
    let iter = items.into_iter().skip(skip);
    if query.limit == 0 {
        iter.collect()
    } else {
        iter.take(usize::try_from(query.limit).unwrap_or(usize::MAX))
            .collect()
    }
}

#[async_trait]
impl StackClient for MemoryStack {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn scoped(&self, branch: Option<&str>) -> Arc<dyn StackClient> {
        Arc::new(self.scoped_stack(branch))
    }

    async fn branches(&self) -> Result<Option<Vec<Branch>>> {
        let state = self.begin("branches", None)?;
        Ok(state.branch_list.clone())
    }

    async fn count(&self, resource: &Resource, _query: &Query) -> Result<u64> {
        drop(self.begin("count", Some(resource))?);
        Ok(self.items(resource).len() as u64)
    }

    async fn find(&self, resource: &Resource, query: &Query) -> Result<Vec<Value>> {
        drop(self.begin("find", Some(resource))?);
        Ok(page(self.items(resource), query))
    }

    async fn create(&self, resource: &Resource, payload: Value) -> Result<Value> {
        self.hold_if_stalled("create").await;
        let mut state = self.begin("create", Some(resource))?;
        let (unique, caller_uid) = uniqueness(resource);
        if let Some(pointer) = unique {
            if let Some(value) = payload.pointer(pointer).and_then(Value::as_str) {
                let taken = self
                    .branch_mut(&mut state)
                    .collections
                    .get(&collection_key(resource))
                    .is_some_and(|items| {
                        filter(resource, items)
                            .any(|item| item.pointer(pointer).and_then(Value::as_str) == Some(value))
                    });
                if taken {
                    return Err(Error::Conflict(format!(
                        "{} '{}' already exists",
                        resource.singular_key(),
                        value
                    )));
                }
            }
        }
        let Value::Object(mut doc) = payload else {
            return Err(Error::Api {
                status: 422,
                message: format!("{} payload must be an object", resource.singular_key()),
            });
        };

        if !(caller_uid && doc.get("uid").and_then(Value::as_str).is_some()) {
            doc.insert("uid".to_string(), json!(new_uid()));
        }
        match resource {
            Resource::Entry { locale, .. } => {
                doc.insert("locale".to_string(), json!(locale));
            }
            Resource::AssetFolder => {
                doc.insert("is_dir".to_string(), json!(true));
            }
            _ => {}
        }

        let doc = Value::Object(doc);
        self.branch_mut(&mut state)
            .collections
            .entry(collection_key(resource))
            .or_default()
            .push(doc.clone());
        Ok(doc)
    }

    async fn update(&self, resource: &Resource, uid: &str, payload: Value) -> Result<Value> {
        let mut state = self.begin("update", Some(resource))?;
        let Value::Object(mut doc) = payload else {
            return Err(Error::Api {
                status: 422,
                message: format!("{} payload must be an object", resource.singular_key()),
            });
        };
        doc.insert(resource.id_field().to_string(), json!(uid));
        if let Resource::Entry { locale, .. } = resource {
            doc.insert("locale".to_string(), json!(locale));
        }
        let doc = Value::Object(doc);

        let collection = self
            .branch_mut(&mut state)
            .collections
            .entry(collection_key(resource))
            .or_default();
        if let Some(slot) = collection
            .iter_mut()
            .find(|item| id_of(resource, item) == Some(uid) && belongs(resource, item))
        {
            *slot = doc.clone();
            return Ok(doc);
        }
        // Localizing an entry that exists in another locale.
        if matches!(resource, Resource::Entry { .. })
            && collection.iter().any(|item| id_of(resource, item) == Some(uid))
        {
            collection.push(doc.clone());
            return Ok(doc);
        }
        Err(Error::NotFound(format!("{} '{}'", resource.singular_key(), uid)))
    }

    async fn upload_asset(&self, metadata: Value, file_name: &str, bytes: Vec<u8>) -> Result<Value> {
        let mut state = self.begin("upload", Some(&Resource::Asset))?;
        let uid = new_uid();
        let url = asset_url(&uid, file_name);

        let mut doc = Map::new();
        for field in ["title", "description", "parent_uid", "tags"] {
            if let Some(value) = metadata.get(field) {
                doc.insert(field.to_string(), value.clone());
            }
        }
        doc.insert("uid".to_string(), json!(uid));
        doc.insert("url".to_string(), json!(url));
        doc.insert("filename".to_string(), json!(file_name));
        doc.insert("file_size".to_string(), json!(bytes.len().to_string()));
        doc.insert("is_dir".to_string(), json!(false));
        let doc = Value::Object(doc);

        state.binaries.insert(url, bytes);
        self.branch_mut(&mut state)
            .collections
            .entry(collection_key(&Resource::Asset))
            .or_default()
            .push(doc.clone());
        Ok(doc)
    }

    async fn download(&self, url: &str, _authenticated: bool) -> Result<Vec<u8>> {
        let state = self.begin("download", None)?;
        state
            .binaries
            .get(url)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("binary '{}'", url)))
    }

    async fn publish(&self, resource: &Resource, uid: &str, target: &PublishTarget) -> Result<()> {
        let mut state = self.begin("publish", Some(resource))?;
        if target.environments.is_empty() {
            return Err(Error::Api {
                status: 422,
                message: "publish requires at least one environment".to_string(),
            });
        }
        self.branch_mut(&mut state).published.push(PublishRecord {
            kind: resource.plural_key().to_string(),
            uid: uid.to_string(),
            target: target.clone(),
        });
        Ok(())
    }

    async fn master_locale(&self) -> Result<String> {
        let state = self.begin("master_locale", None)?;
        Ok(state
            .master_locale
            .clone()
            .unwrap_or_else(|| DEFAULT_MASTER_LOCALE.to_string()))
    }

    async fn stack_settings(&self) -> Result<Value> {
        let mut state = self.begin("stack_settings", None)?;
        Ok(self
            .branch_mut(&mut state)
            .settings
            .clone()
            .unwrap_or_else(|| json!({})))
    }

    async fn add_settings(&self, settings: Value) -> Result<Value> {
        let mut state = self.begin("add_settings", None)?;
        let branch = self.branch_mut(&mut state);
        branch.settings_writes += 1;
        branch.settings = Some(settings.clone());
        Ok(settings)
    }
}

impl MemoryStack {
    /// Typed view of another branch of this stack.
    #[must_use]
    pub fn scoped_stack(&self, branch: Option<&str>) -> Self {
        Self {
            state: Arc::clone(&self.state),
            branch: branch.map(str::to_string),
        }
    }
}
