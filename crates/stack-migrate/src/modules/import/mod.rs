//! Module importers.
//!
//! An importer reads its module's exported documents, rewrites references
//! through the uid maps of the modules it depends on, creates the entities
//! on the target through the module's write [`BoundedCaller`] and records
//! `old uid → new uid` so later modules can follow.
//!
//! [`BoundedCaller`]: crate::concurrency::BoundedCaller

mod assets;
mod entries;
mod labels;
mod list;
mod locales;
mod marketplace;
mod schema;
mod settings;
mod taxonomies;

pub use assets::{AssetsImporter, FOLDER_MAPPING_FILE, URL_MAPPING_FILE};
pub use entries::EntriesImporter;
pub use labels::LabelsImporter;
pub use list::ListImporter;
pub use locales::LocalesImporter;
pub use marketplace::MarketplaceAppsImporter;
pub use schema::{SchemaImporter, PENDING_GLOBAL_FIELDS_FILE};
pub use settings::StackSettingsImporter;
pub use taxonomies::TaxonomiesImporter;

use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info, warn};

use super::refs::ReferenceRewriter;
use super::ModuleContext;
use crate::client::{PublishTarget, Query, Resource};
use crate::concurrency::BatchOutcome;
use crate::error::{Error, Result};
use crate::mapper::{FailedItem, UidMap, UID_MAPPING_FILE};
use crate::progress::process;
use crate::retry::with_retry;
use crate::store::read_json_file;

/// Fields owned by the source stack; never sent to the target.
pub const SYSTEM_FIELDS: [&str; 12] = [
    "uid",
    "created_at",
    "updated_at",
    "created_by",
    "updated_by",
    "_version",
    "publish_details",
    "_in_progress",
    "locale",
    "_workflow",
    "ACL",
    "_metadata",
];

/// Removes [`SYSTEM_FIELDS`] from a top-level document.
pub fn strip_system_fields(doc: &mut Value) {
    if let Value::Object(fields) = doc {
        for field in SYSTEM_FIELDS {
            fields.remove(field);
        }
    }
}

/// Sets a top-level field of an object payload.
pub fn set_field(doc: &mut Value, field: &str, value: Value) {
    if let Value::Object(fields) = doc {
        fields.insert(field.to_string(), value);
    }
}

/// One exported entity on its way to the target.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingItem {
    /// Uid (or code) on the source stack.
    pub uid: String,
    /// Title or name, for the failure ledger.
    pub title: Option<String>,
    /// Locale of localized items.
    pub locale: Option<String>,
    /// Body sent to the target.
    pub payload: Value,
}

impl PendingItem {
    /// Builds an item from an exported record.
    ///
    /// The source `id_field` is kept in the payload only when the target
    /// lets the caller choose it (`keep_id`).
    #[must_use]
    pub fn from_record(record: &Value, id_field: &str, keep_id: bool) -> Option<Self> {
        let uid = record.get(id_field)?.as_str()?.to_string();
        let title = ["title", "name"]
            .iter()
            .find_map(|f| record.get(*f).and_then(Value::as_str))
            .map(str::to_string);
        let mut payload = record.clone();
        strip_system_fields(&mut payload);
        if keep_id {
            if let Value::Object(fields) = &mut payload {
                fields.insert(id_field.to_string(), Value::String(uid.clone()));
            }
        }
        Some(Self {
            uid,
            title,
            locale: None,
            payload,
        })
    }

    /// Sets the locale.
    #[must_use]
    pub fn in_locale(mut self, locale: &str) -> Self {
        self.locale = Some(locale.to_string());
        self
    }

    /// Ledger record for this item.
    #[must_use]
    pub fn failed(&self, error: impl ToString) -> FailedItem {
        FailedItem {
            uid: self.uid.clone(),
            title: self.title.clone(),
            locale: self.locale.clone(),
            error: error.to_string(),
        }
    }
}

/// Reads the module's primary document (uid → record).
///
/// `None` when the module was not exported.
pub fn read_document(ctx: &ModuleContext) -> Result<Option<BTreeMap<String, Value>>> {
    read_json_file(&ctx.primary_file())
}

/// Pending items for every record of an exported document.
pub fn pending_items(
    records: &BTreeMap<String, Value>,
    id_field: &str,
    keep_id: bool,
) -> Vec<PendingItem> {
    records
        .values()
        .filter_map(|record| PendingItem::from_record(record, id_field, keep_id))
        .collect()
}

/// Where created entities are recorded and how an existing one is found.
#[derive(Debug, Clone, Copy)]
pub struct CreateSpec<'a> {
    /// Collection created into.
    pub resource: &'a Resource,
    /// JSON pointer identifying an already existing entity (`/name`).
    pub identity: &'a str,
    /// Progress sub-process.
    pub process: &'a str,
    /// Mapper table receiving the pairs.
    pub table: &'a str,
}

impl<'a> CreateSpec<'a> {
    /// Spec writing to the module's main uid table.
    #[must_use]
    pub fn new(resource: &'a Resource, identity: &'a str) -> Self {
        Self {
            resource,
            identity,
            process: process::ITEMS,
            table: UID_MAPPING_FILE,
        }
    }

    /// Uses another progress sub-process.
    #[must_use]
    pub fn process(mut self, process: &'a str) -> Self {
        self.process = process;
        self
    }

    /// Uses an auxiliary mapper table.
    #[must_use]
    pub fn table(mut self, table: &'a str) -> Self {
        self.table = table;
        self
    }
}

/// Creates `items` on the target and records their new uids.
///
/// Items already present in the table are skipped. A create rejected
/// with [`Error::Conflict`] is resolved against the entities already on
/// the target by [`CreateSpec::identity`]. Returns the table's pairs for
/// `items`, including skipped ones.
pub async fn create_all(
    ctx: &ModuleContext,
    spec: CreateSpec<'_>,
    items: Vec<PendingItem>,
) -> Result<UidMap> {
    let known = ctx.mapper.read_table(ctx.map_key(), spec.table)?;
    let mut result = UidMap::default();
    let mut todo = Vec::with_capacity(items.len());
    for item in items {
        match known.get(&item.uid) {
            Some(new) => {
                debug!(uid = %item.uid, "already imported, skipping");
                result.insert(item.uid.clone(), new);
            }
            None => todo.push(item),
        }
    }

    let progress = &ctx.progress;
    progress.add_total(spec.process, (todo.len() + result.len()) as u64);
    progress.success(spec.process, result.len() as u64);
    if todo.is_empty() {
        return Ok(result);
    }

    let client = &ctx.client;
    let resource = spec.resource;
    let mut pairs: Vec<(String, String)> = Vec::new();
    let mut unreadable: Vec<PendingItem> = Vec::new();
    let mut rejected: Vec<(PendingItem, Error)> = Vec::new();
    ctx.writer()
        .run(
            &format!("create {}", resource.singular_key()),
            todo,
            |item: PendingItem| async move { client.create(resource, item.payload).await },
            |item, response| {
                let Some(new) = response.get(resource.id_field()).and_then(Value::as_str) else {
                    unreadable.push(item);
                    return Ok(());
                };
                // Persisted per item so an interrupted batch can resume.
                ctx.mapper
                    .write_table(ctx.map_key(), spec.table, [(item.uid.as_str(), new)])?;
                progress.success(spec.process, 1);
                pairs.push((item.uid, new.to_string()));
                Ok(())
            },
            |item, e| rejected.push((item, e)),
        )
        .await?;

    let mut failures: Vec<FailedItem> = unreadable
        .iter()
        .map(|item| item.failed("response carries no uid"))
        .collect();
    let (conflicts, errors): (Vec<_>, Vec<_>) = rejected
        .into_iter()
        .partition(|(_, e)| matches!(e, Error::Conflict(_)));
    for (item, e) in errors {
        warn!(module = ctx.kind.as_str(), uid = %item.uid, "create failed: {}", e);
        failures.push(item.failed(e));
    }
    if !conflicts.is_empty() {
        let mut existing = Vec::new();
        resolve_existing(ctx, spec, conflicts, &mut existing, &mut failures).await;
        ctx.mapper.write_table(
            ctx.map_key(),
            spec.table,
            existing.iter().map(|(old, new)| (old.as_str(), new.as_str())),
        )?;
        progress.success(spec.process, existing.len() as u64);
        pairs.extend(existing);
    }

    progress.failure(spec.process, failures.len() as u64);
    ctx.mapper.record_failures(ctx.map_key(), &failures)?;

    for (old, new) in pairs {
        result.insert(old, new);
    }
    Ok(result)
}

/// Maps items that already exist on the target onto the existing entity.
async fn resolve_existing(
    ctx: &ModuleContext,
    spec: CreateSpec<'_>,
    conflicts: Vec<(PendingItem, Error)>,
    pairs: &mut Vec<(String, String)>,
    failures: &mut Vec<FailedItem>,
) {
    let existing = match fetch_all(ctx, spec.resource).await {
        Ok(existing) => existing,
        Err(e) => {
            warn!(module = ctx.kind.as_str(), "cannot list existing entities: {}", e);
            failures.extend(conflicts.iter().map(|(item, conflict)| item.failed(conflict)));
            return;
        }
    };
    let by_identity: HashMap<&str, &str> = existing
        .iter()
        .filter_map(|entity| {
            let key = entity.pointer(spec.identity)?.as_str()?;
            let id = entity.get(spec.resource.id_field())?.as_str()?;
            Some((key, id))
        })
        .collect();

    for (item, conflict) in conflicts {
        let found = item
            .payload
            .pointer(spec.identity)
            .and_then(Value::as_str)
            .and_then(|key| by_identity.get(key));
        match found {
            Some(id) => {
                info!(
                    module = ctx.kind.as_str(),
                    uid = %item.uid,
                    existing = %id,
                    "already exists on target, mapping to it"
                );
                pairs.push((item.uid, (*id).to_string()));
            }
            None => failures.push(item.failed(conflict)),
        }
    }
}

/// Creates a tree of items whose `parent_field` holds the source uid of
/// another item, parents first.
///
/// Items whose parent was not imported are recorded as failures.
pub async fn create_tree(
    ctx: &ModuleContext,
    spec: CreateSpec<'_>,
    parent_field: &str,
    items: Vec<PendingItem>,
) -> Result<UidMap> {
    let mut map = ctx.mapper.read_table(ctx.map_key(), spec.table)?;
    let all: HashSet<String> = items.iter().map(|item| item.uid.clone()).collect();
    let mut remaining = items;
    let mut result = UidMap::default();

    let parent_of = |item: &PendingItem| -> Option<String> {
        item.payload
            .get(parent_field)
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    while !remaining.is_empty() {
        let (mut ready, waiting): (Vec<_>, Vec<_>) =
            remaining.into_iter().partition(|item| match parent_of(item) {
                None => true,
                Some(parent) => map.get(&parent).is_some() || !all.contains(&parent),
            });

        if ready.is_empty() {
            let failures: Vec<FailedItem> = waiting
                .iter()
                .map(|item| item.failed("parent was not imported"))
                .collect();
            ctx.progress.add_total(spec.process, failures.len() as u64);
            ctx.progress.failure(spec.process, failures.len() as u64);
            ctx.mapper.record_failures(ctx.map_key(), &failures)?;
            break;
        }

        let mut rewriter = ReferenceRewriter::new(ctx.map_key(), &map);
        for item in &mut ready {
            if let Some(parent) = item.payload.get_mut(parent_field) {
                rewriter.rewrite(parent);
            }
        }

        let created = create_all(ctx, spec, ready).await?;
        for (old, new) in created.iter() {
            map.insert(old, new);
            result.insert(old, new);
        }
        remaining = waiting;
    }
    Ok(result)
}

/// Replaces existing target entities. `items` pairs a target uid with
/// the item to send.
pub async fn update_all(
    ctx: &ModuleContext,
    resource: &Resource,
    process: &str,
    items: Vec<(String, PendingItem)>,
) -> Result<BatchOutcome> {
    if items.is_empty() {
        return Ok(BatchOutcome::default());
    }
    let client = &ctx.client;
    let progress = &ctx.progress;
    let mut failures = Vec::new();
    progress.add_total(process, items.len() as u64);

    let outcome = ctx
        .writer()
        .run(
            &format!("update {}", resource.singular_key()),
            items,
            |(uid, item): (String, PendingItem)| async move {
                client.update(resource, &uid, item.payload).await
            },
            |_, _| {
                progress.success(process, 1);
                Ok(())
            },
            |(_, item), e| {
                warn!(module = ctx.kind.as_str(), uid = %item.uid, "update failed: {}", e);
                progress.failure(process, 1);
                failures.push(item.failed(e));
            },
        )
        .await?;

    ctx.mapper.record_failures(ctx.map_key(), &failures)?;
    Ok(outcome)
}

/// Lists every entity of `resource` on the target.
pub async fn fetch_all(ctx: &ModuleContext, resource: &Resource) -> Result<Vec<Value>> {
    let limit = ctx.settings.batch_limit.max(1);
    let mut all = Vec::new();
    loop {
        let query = Query::page(all.len() as u64, limit);
        let page = with_retry(&ctx.config.retry, "list existing", || {
            ctx.client.find(resource, &query)
        })
        .await?;
        let last = (page.len() as u64) < limit;
        all.extend(page);
        if last {
            return Ok(all);
        }
    }
}

/// Publish target of an exported record, from its `publish_details`.
///
/// Environments are translated through `environments`; unmapped ones are
/// dropped. `None` when nothing is left to publish to.
#[must_use]
pub fn publish_target(
    record: &Value,
    environments: &UidMap,
    locales: Option<&UidMap>,
) -> Option<PublishTarget> {
    let details = match record.get("publish_details")? {
        Value::Array(details) => details.clone(),
        single @ Value::Object(_) => vec![single.clone()],
        _ => return None,
    };

    let mut target = PublishTarget::default();
    for detail in &details {
        if let Some(env) = detail.get("environment").and_then(Value::as_str) {
            match environments.get(env) {
                Some(new) if !target.environments.iter().any(|e| e == new) => {
                    target.environments.push(new.to_string());
                }
                Some(_) => {}
                None => warn!(environment = env, "publish environment not mapped, dropping"),
            }
        }
        if let Some(locale) = detail.get("locale").and_then(Value::as_str) {
            let locale = locales.and_then(|m| m.get(locale)).unwrap_or(locale);
            if !target.locales.iter().any(|l| l == locale) {
                target.locales.push(locale.to_string());
            }
        }
    }
    (!target.environments.is_empty()).then_some(target)
}

/// Something to publish on the target.
#[derive(Debug, Clone)]
pub struct PublishJob {
    /// Collection of the entity.
    pub resource: Resource,
    /// Uid on the target.
    pub uid: String,
    /// Source item, for the failure ledger.
    pub item: PendingItem,
    /// Where to publish.
    pub target: PublishTarget,
}

/// Publishes every job; failures are item-level.
pub async fn publish_all(ctx: &ModuleContext, jobs: Vec<PublishJob>) -> Result<BatchOutcome> {
    if ctx.config.skip_publish || jobs.is_empty() {
        return Ok(BatchOutcome::default());
    }
    let client = &ctx.client;
    let progress = &ctx.progress;
    let mut failures = Vec::new();
    progress.add_total(process::PUBLISH, jobs.len() as u64);

    let outcome = ctx
        .writer()
        .run(
            "publish",
            jobs,
            |job: PublishJob| async move {
                client.publish(&job.resource, &job.uid, &job.target).await
            },
            |_, ()| {
                progress.success(process::PUBLISH, 1);
                Ok(())
            },
            |job, e| {
                warn!(module = ctx.kind.as_str(), uid = %job.item.uid, "publish failed: {}", e);
                progress.failure(process::PUBLISH, 1);
                failures.push(job.item.failed(format!("publish: {}", e)));
            },
        )
        .await?;

    ctx.mapper.record_failures(ctx.map_key(), &failures)?;
    Ok(outcome)
}

#[cfg(test)]
#[path = "import_tests.rs"]
mod tests;
