//! The Resource Engine (`spec.md` §4.5): CRUD, upsert/patch, list/query,
//! paranoid delete, and the orchestration of schema validation, behavior
//! split, locking, partition refs, hooks, and events around each
//! operation.

use crate::behavior::{self, MAX_METADATA_BYTES};
use crate::events::EventBus;
use crate::hooks::{HookContext, HookError, HookRegistry};
use crate::lock::{LockError, LockManager};
use crate::partition::{self, PartitionManager};
use crate::secret::SecretCipher;
use crate::{EngineError, EngineResult};
use s3db_core::{EngineConfig, IdGenerator};
use s3db_model::{BehaviorKind, Document, Event, PartitionDef, Value};
use s3db_schema::{validator, Mapper, ParsedSchema};
use s3db_storage::{ListOptions, StorageClient};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

const SYS_SCHEMA_VERSION: &str = "_v";
const SYS_CREATED_AT: &str = "_c";
const SYS_UPDATED_AT: &str = "_u";
const SYS_DELETED_AT: &str = "_d";

impl From<LockError> for EngineError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Timeout { scope, key, waited_ms } => EngineError::LockTimeout { scope, key, waited_ms },
            LockError::Storage(e) => EngineError::Storage(e),
        }
    }
}

impl From<HookError> for EngineError {
    fn from(err: HookError) -> Self {
        match err {
            HookError::Abort(reason) => EngineError::Aborted(reason),
            HookError::Failed(e) => EngineError::Internal(e),
        }
    }
}

/// A page of documents plus an opaque continuation token for the next page.
#[derive(Debug, Clone, Default)]
pub struct Page {
    /// The documents in this page.
    pub documents: Vec<Document>,
    /// Token to pass back in as `continuation` for the next page, or `None`
    /// if this was the last page.
    pub continuation: Option<String>,
}

/// Options shared by `list`/`query`.
#[derive(Debug, Clone, Default)]
pub struct PageOptions {
    /// Desired page size; clamped to the resource's configured maximum.
    pub limit: Option<usize>,
    /// Opaque continuation token from a previous page.
    pub continuation: Option<String>,
    /// Include tombstoned (paranoid-deleted) documents.
    pub include_deleted: bool,
}

/// An equality filter restricted to a declared partition's fields, the
/// only filter shape `query()` can serve (`spec.md` §4.5: "`query` only
/// supports partition-backed equality filters; anything else is an
/// `UnsupportedQueryError`").
#[derive(Debug, Clone)]
pub struct Query {
    /// Partition name to serve the query from.
    pub partition: String,
    /// Ordered `(field, value)` equality pairs, matching the partition's
    /// declared field order.
    pub filters: Vec<(String, String)>,
}

/// A previously-declared schema version's mapper/behavior, kept around
/// (keyed by version hash on [`Resource::versions`]) so documents written
/// under an older version stay decodable after a schema upgrade
/// (`spec.md` §4.2: "existing documents remain readable via the version
/// recorded in their metadata"; §8 scenario D).
#[derive(Debug, Clone)]
struct VersionEntry {
    schema: ParsedSchema,
    mapper: Mapper,
    behavior: BehaviorKind,
}

/// One schema-bound, partitioned collection of documents, the unit the
/// Database Controller hands out via `getResource`.
pub struct Resource {
    name: String,
    prefix: String,
    schema: ParsedSchema,
    mapper: Mapper,
    behavior: BehaviorKind,
    partitions: Vec<PartitionDef>,
    schema_version: String,
    paranoid: bool,
    storage: Arc<dyn StorageClient>,
    locks: Arc<LockManager>,
    partitions_manager: Arc<PartitionManager>,
    events: Arc<EventBus>,
    secret: Arc<SecretCipher>,
    ids: Arc<dyn IdGenerator>,
    hooks: HookRegistry,
    config: EngineConfig,
    versions: BTreeMap<String, VersionEntry>,
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource").field("name", &self.name).field("schema_version", &self.schema_version).finish()
    }
}

#[allow(clippy::too_many_arguments)]
impl Resource {
    /// Build a resource. Called by the Database Controller once per
    /// registered resource at connect time.
    pub fn new(
        name: impl Into<String>,
        prefix: impl Into<String>,
        schema: ParsedSchema,
        mapper: Mapper,
        behavior: BehaviorKind,
        partitions: Vec<PartitionDef>,
        schema_version: impl Into<String>,
        paranoid: bool,
        storage: Arc<dyn StorageClient>,
        locks: Arc<LockManager>,
        partitions_manager: Arc<PartitionManager>,
        events: Arc<EventBus>,
        secret: Arc<SecretCipher>,
        ids: Arc<dyn IdGenerator>,
        hooks: HookRegistry,
        config: EngineConfig,
    ) -> Self {
        let schema_version = schema_version.into();
        let mut versions = BTreeMap::new();
        versions.insert(schema_version.clone(), VersionEntry { schema: schema.clone(), mapper: mapper.clone(), behavior });
        Self {
            name: name.into(),
            prefix: prefix.into(),
            schema,
            mapper,
            behavior,
            partitions,
            schema_version,
            paranoid,
            storage,
            locks,
            partitions_manager,
            events,
            secret,
            ids,
            hooks,
            config,
            versions,
        }
    }

    /// Register a historical schema version's mapper/behavior for
    /// decode-only use. Called by the Database Controller when
    /// reconstructing a resource that has more than one catalog version, so
    /// documents written before the most recent upgrade still decode with
    /// the mapper they were written under.
    pub fn install_version(&mut self, version: impl Into<String>, schema: ParsedSchema, mapper: Mapper, behavior: BehaviorKind) {
        self.versions.insert(version.into(), VersionEntry { schema, mapper, behavior });
    }

    /// Resource name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The schema version hash this resource was built against.
    #[must_use]
    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    /// Mutable access to this resource's hook registry, for callers
    /// wiring plugins up at resource-creation time.
    pub fn hooks_mut(&mut self) -> &mut HookRegistry {
        &mut self.hooks
    }

    fn doc_key(&self, id: &str) -> String {
        format!("{}/resource={}/data/id={id}", self.prefix.trim_end_matches('/'), self.name)
    }

    fn ctx(&self, database_id: &str, dependencies: Arc<BTreeMap<String, serde_json::Value>>) -> HookContext {
        HookContext { resource: self.name.clone(), database_id: database_id.to_string(), dependencies }
    }

    /// Insert a new document. Fails with [`EngineError::Conflict`] if
    /// `id` already has a document (live or tombstoned) — use `upsert` to
    /// insert-or-replace.
    pub async fn insert(
        &self,
        id: Option<String>,
        mut attributes: BTreeMap<String, Value>,
        database_id: &str,
        dependencies: Arc<BTreeMap<String, serde_json::Value>>,
    ) -> EngineResult<Document> {
        let id = id.unwrap_or_else(|| self.ids.generate());
        let ctx = self.ctx(database_id, dependencies);

        self.hooks.run_before_insert(&mut attributes, &ctx)?;
        apply_defaults(&self.schema, &mut attributes);
        let issues = validator::validate(&self.schema, &attributes);
        if !issues.is_empty() {
            return Err(issues.into());
        }

        let key = self.doc_key(&id);
        let (guard, retries) = self.locks.acquire("resource", &format!("{}:{id}", self.name), "insert").await?;
        if retries > 0 {
            self.events.emit(Event::LockContended { scope: "resource".into(), key: id.clone(), retries });
        }

        if self.storage.exists(&key).await? {
            return Err(EngineError::Conflict { resource: self.name.clone(), id, reason: "document already exists".into() });
        }

        let now = chrono::Utc::now();
        let doc = Document { id: id.clone(), attributes, schema_version: self.schema_version.clone(), created_at: now, updated_at: now, deleted_at: None };
        self.write_document(&doc).await?;
        drop(guard);

        let diff = partition::diff_refs(&self.name, &id, &self.partitions, None, &doc.attributes);
        if let Err(err) = self.partitions_manager.apply(&self.name, &id, diff).await {
            warn!(resource = %self.name, id, error = %err, "partition ref write failed after insert");
        }

        self.events.emit(Event::Inserted { resource: self.name.clone(), id: id.clone(), doc: doc.clone() });
        self.hooks.run_after_insert(&doc, &ctx);
        debug!(resource = %self.name, id, "inserted document");
        Ok(doc)
    }

    /// Insert-or-replace: creates the document if absent, otherwise fully
    /// replaces its attributes (distinct from `patch`, which merges).
    pub async fn upsert(
        &self,
        id: String,
        mut attributes: BTreeMap<String, Value>,
        database_id: &str,
        dependencies: Arc<BTreeMap<String, serde_json::Value>>,
    ) -> EngineResult<Document> {
        let ctx = self.ctx(database_id, dependencies.clone());
        let (guard, retries) = self.locks.acquire("resource", &format!("{}:{id}", self.name), "upsert").await?;
        if retries > 0 {
            self.events.emit(Event::LockContended { scope: "resource".into(), key: id.clone(), retries });
        }

        let existing = self.load_raw(&id).await?;
        let before = existing.clone();

        self.hooks.run_before_insert(&mut attributes, &ctx)?;
        apply_defaults(&self.schema, &mut attributes);
        let issues = validator::validate(&self.schema, &attributes);
        if !issues.is_empty() {
            return Err(issues.into());
        }

        let now = chrono::Utc::now();
        let created_at = existing.as_ref().map_or(now, |d| d.created_at);
        let doc = Document { id: id.clone(), attributes, schema_version: self.schema_version.clone(), created_at, updated_at: now, deleted_at: None };
        self.write_document(&doc).await?;
        drop(guard);

        let old_attrs = before.as_ref().map(|d| &d.attributes);
        let diff = partition::diff_refs(&self.name, &id, &self.partitions, old_attrs, &doc.attributes);
        if let Err(err) = self.partitions_manager.apply(&self.name, &id, diff).await {
            warn!(resource = %self.name, id, error = %err, "partition ref write failed after upsert");
        }

        match before {
            Some(before) => {
                self.events.emit(Event::Updated { resource: self.name.clone(), id: id.clone(), before, after: doc.clone() });
                self.hooks.run_after_update(&doc, &ctx);
            }
            None => {
                self.events.emit(Event::Inserted { resource: self.name.clone(), id: id.clone(), doc: doc.clone() });
                self.hooks.run_after_insert(&doc, &ctx);
            }
        }
        Ok(doc)
    }

    /// Fully replace an existing document's attributes.
    pub async fn update(
        &self,
        id: &str,
        attributes: BTreeMap<String, Value>,
        database_id: &str,
        dependencies: Arc<BTreeMap<String, serde_json::Value>>,
    ) -> EngineResult<Document> {
        self.patch_or_update(id, attributes, true, database_id, dependencies).await
    }

    /// Merge `patch` into an existing document's attributes. `patch({})`
    /// is a no-op up to `updatedAt` (`spec.md` §8 universal invariant).
    pub async fn patch(
        &self,
        id: &str,
        patch: BTreeMap<String, Value>,
        database_id: &str,
        dependencies: Arc<BTreeMap<String, serde_json::Value>>,
    ) -> EngineResult<Document> {
        self.patch_or_update(id, patch, false, database_id, dependencies).await
    }

    async fn patch_or_update(
        &self,
        id: &str,
        incoming: BTreeMap<String, Value>,
        replace: bool,
        database_id: &str,
        dependencies: Arc<BTreeMap<String, serde_json::Value>>,
    ) -> EngineResult<Document> {
        let ctx = self.ctx(database_id, dependencies);
        let (guard, retries) = self.locks.acquire("resource", &format!("{}:{id}", self.name), "update").await?;
        if retries > 0 {
            self.events.emit(Event::LockContended { scope: "resource".into(), key: id.to_string(), retries });
        }

        let Some(before) = self.load_raw(id).await? else {
            return Err(EngineError::NotFound { resource: self.name.clone(), id: id.to_string() });
        };

        if incoming.is_empty() && !replace {
            return Ok(before);
        }

        let mut attributes = if replace { incoming.clone() } else { before.attributes.clone() };
        if !replace {
            attributes.extend(incoming);
        }

        self.hooks.run_before_update(&mut attributes, &ctx)?;
        let issues = validator::validate(&self.schema, &attributes);
        if !issues.is_empty() {
            return Err(issues.into());
        }

        // An update/patch against a tombstoned document restores it to
        // `Live` (`spec.md` §4.5: "tombstoned -> live restore via update/patch").
        let doc = Document {
            id: id.to_string(),
            attributes,
            schema_version: self.schema_version.clone(),
            created_at: before.created_at,
            updated_at: chrono::Utc::now(),
            deleted_at: None,
        };
        self.write_document(&doc).await?;
        drop(guard);

        let diff = partition::diff_refs(&self.name, id, &self.partitions, Some(&before.attributes), &doc.attributes);
        if let Err(err) = self.partitions_manager.apply(&self.name, id, diff).await {
            warn!(resource = %self.name, id, error = %err, "partition ref write failed after update");
        }

        self.events.emit(Event::Updated { resource: self.name.clone(), id: id.to_string(), before, after: doc.clone() });
        self.hooks.run_after_update(&doc, &ctx);
        Ok(doc)
    }

    /// Fetch a document by id. `None` if absent, or tombstoned without
    /// `include_deleted`.
    pub async fn get(&self, id: &str, include_deleted: bool) -> EngineResult<Option<Document>> {
        let Some(doc) = self.load_raw(id).await? else { return Ok(None) };
        if doc.is_tombstoned() && !include_deleted {
            return Ok(None);
        }
        Ok(Some(doc))
    }

    /// `true` iff `get` would return a document (`spec.md` §8: `exists`
    /// and `NotFoundError` must agree).
    pub async fn exists(&self, id: &str, include_deleted: bool) -> EngineResult<bool> {
        Ok(self.get(id, include_deleted).await?.is_some())
    }

    /// Delete a document. When the resource is `paranoid`, this tombstones
    /// the document (retaining the body); otherwise it purges immediately.
    pub async fn delete(
        &self,
        id: &str,
        database_id: &str,
        dependencies: Arc<BTreeMap<String, serde_json::Value>>,
    ) -> EngineResult<()> {
        let ctx = self.ctx(database_id, dependencies);
        let (guard, retries) = self.locks.acquire("resource", &format!("{}:{id}", self.name), "delete").await?;
        if retries > 0 {
            self.events.emit(Event::LockContended { scope: "resource".into(), key: id.to_string(), retries });
        }

        let Some(before) = self.load_raw(id).await? else {
            return Err(EngineError::NotFound { resource: self.name.clone(), id: id.to_string() });
        };
        if before.is_tombstoned() {
            return Err(EngineError::NotFound { resource: self.name.clone(), id: id.to_string() });
        }

        self.hooks.run_before_delete(&before, &ctx)?;

        if self.paranoid {
            let tombstoned = Document { deleted_at: Some(chrono::Utc::now()), updated_at: chrono::Utc::now(), ..before.clone() };
            self.write_document(&tombstoned).await?;
        } else {
            self.storage.delete(&self.doc_key(id)).await?;
            let diff = partition::diff_refs(&self.name, id, &self.partitions, Some(&before.attributes), &BTreeMap::new());
            if let Err(err) = self.partitions_manager.apply(&self.name, id, diff).await {
                warn!(resource = %self.name, id, error = %err, "partition ref cleanup failed after delete");
            }
        }
        drop(guard);

        self.events.emit(Event::Deleted { resource: self.name.clone(), id: id.to_string(), before: before.clone() });
        self.hooks.run_after_delete(&before, &ctx);
        Ok(())
    }

    /// List documents under this resource in primary-key order.
    pub async fn list(&self, options: PageOptions, database_id: &str, dependencies: Arc<BTreeMap<String, serde_json::Value>>) -> EngineResult<Page> {
        let limit = options.limit.unwrap_or(self.config.default_page_size).min(self.config.max_page_size);
        if limit == 0 {
            return Ok(Page::default());
        }

        let list_prefix = format!("{}/resource={}/data", self.prefix.trim_end_matches('/'), self.name);
        let listed = self
            .storage
            .list(&list_prefix, ListOptions { continuation: options.continuation, limit: Some(limit) })
            .await?;

        let mut documents = Vec::with_capacity(listed.keys.len());
        for key in &listed.keys {
            let Some(id) = key.rsplit('/').next().and_then(|s| s.strip_prefix("id=")) else { continue };
            if let Some(doc) = self.load_raw(id).await? {
                if doc.is_tombstoned() && !options.include_deleted {
                    continue;
                }
                documents.push(doc);
            }
        }

        let ctx = self.ctx(database_id, dependencies);
        self.hooks.run_before_list(&mut documents, &ctx)?;
        self.hooks.run_after_list(&mut documents, &ctx)?;

        Ok(Page { documents, continuation: listed.continuation })
    }

    /// Count live documents under this resource. Not cheap: walks every
    /// page (`spec.md` §4.5 notes this is best-effort, not O(1)).
    pub async fn count(&self, include_deleted: bool) -> EngineResult<usize> {
        let mut total = 0;
        let mut continuation = None;
        loop {
            let page = self
                .list(
                    PageOptions { limit: Some(self.config.max_page_size), continuation, include_deleted },
                    "count",
                    Arc::new(BTreeMap::new()),
                )
                .await?;
            total += page.documents.len();
            continuation = page.continuation;
            if continuation.is_none() {
                break;
            }
        }
        Ok(total)
    }

    /// Serve a query restricted to a declared partition's equality
    /// filters; anything else is [`EngineError::UnsupportedQuery`].
    pub async fn query(&self, query: Query, options: PageOptions) -> EngineResult<Page> {
        let def = self
            .partitions
            .iter()
            .find(|p| p.name == query.partition)
            .ok_or_else(|| EngineError::UnsupportedQuery { reason: format!("no partition named {}", query.partition) })?;

        if query.filters.iter().map(|(f, _)| f.as_str()).collect::<Vec<_>>() != def.fields.iter().map(String::as_str).collect::<Vec<_>>() {
            return Err(EngineError::UnsupportedQuery {
                reason: "query filters must cover exactly the partition's declared fields in order".into(),
            });
        }

        let limit = options.limit.unwrap_or(self.config.default_page_size).min(self.config.max_page_size);
        if limit == 0 {
            return Ok(Page::default());
        }

        let storage = self.storage.clone();
        let name = self.name.clone();
        let ids = self
            .partitions_manager
            .list_partition(
                &self.name,
                &query.partition,
                &query.filters,
                ListOptions { continuation: options.continuation, limit: Some(limit) },
                |_id| true,
            )
            .await?;

        let mut documents = Vec::with_capacity(ids.len());
        for id in ids {
            let key = format!("{}/resource={}/data/id={}", self.prefix.trim_end_matches('/'), name, id);
            if storage.exists(&key).await.unwrap_or(false) {
                if let Some(doc) = self.load_raw(&id).await? {
                    if !doc.is_tombstoned() || options.include_deleted {
                        documents.push(doc);
                    }
                }
            }
        }

        Ok(Page { documents, continuation: None })
    }

    /// Stream every live document in this resource to a bounded channel,
    /// paging internally (`spec.md` §4.5: "`stream` exists for full-table
    /// scans too large to materialize as a single `Vec`").
    pub fn stream(self: Arc<Self>, include_deleted: bool) -> tokio::sync::mpsc::Receiver<EngineResult<Document>> {
        let (tx, rx) = tokio::sync::mpsc::channel(self.config.default_page_size.max(1));
        let resource = self;
        tokio::spawn(async move {
            let mut continuation = None;
            loop {
                let page = match resource
                    .list(
                        PageOptions { limit: Some(resource.config.max_page_size), continuation, include_deleted },
                        "stream",
                        Arc::new(BTreeMap::new()),
                    )
                    .await
                {
                    Ok(page) => page,
                    Err(err) => {
                        let _ = tx.send(Err(err)).await;
                        return;
                    }
                };
                for doc in page.documents {
                    if tx.send(Ok(doc)).await.is_err() {
                        return;
                    }
                }
                continuation = page.continuation;
                if continuation.is_none() {
                    return;
                }
            }
        });
        rx
    }

    /// Reconcile this resource's partition refs against its live documents.
    pub async fn rebuild_partitions(&self) -> EngineResult<usize> {
        let mut continuation = None;
        let mut rebuilt = 0;
        loop {
            let list_prefix = format!("{}/resource={}/data", self.prefix.trim_end_matches('/'), self.name);
            let listed = self.storage.list(&list_prefix, ListOptions { continuation, limit: Some(self.config.max_page_size) }).await?;
            let mut remaining: Vec<(String, BTreeMap<String, Value>)> = Vec::new();
            for key in &listed.keys {
                let Some(id) = key.rsplit('/').next().and_then(|s| s.strip_prefix("id=")) else { continue };
                if let Some(doc) = self.load_raw(id).await? {
                    if !doc.is_tombstoned() {
                        remaining.push((id.to_string(), doc.attributes));
                    }
                }
            }
            rebuilt += self
                .partitions_manager
                .rebuild(&self.name, &self.partitions, || remaining.pop())
                .await?;
            continuation = listed.continuation;
            if continuation.is_none() {
                break;
            }
        }
        Ok(rebuilt)
    }

    async fn load_raw(&self, id: &str) -> EngineResult<Option<Document>> {
        let key = self.doc_key(id);
        match self.storage.get(&key).await {
            Ok(result) => Ok(Some(self.decode_document(id, &result.metadata, &result.body)?)),
            Err(s3db_storage::StorageError::NoSuchKey { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn decode_document(&self, id: &str, metadata: &std::collections::HashMap<String, String>, body: &bytes::Bytes) -> EngineResult<Document> {
        let schema_version = metadata.get(SYS_SCHEMA_VERSION).cloned().unwrap_or_else(|| self.schema_version.clone());
        let (schema, mapper, behavior) = match self.versions.get(&schema_version) {
            Some(entry) => (&entry.schema, &entry.mapper, entry.behavior),
            None => (&self.schema, &self.mapper, self.behavior),
        };

        let btree_metadata: BTreeMap<String, String> = metadata.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let wire = behavior::reassemble(schema, mapper, behavior, &btree_metadata, (!body.is_empty()).then_some(body.as_ref()));
        let mut attributes = mapper.reverse(&wire);
        self.decrypt_secrets(schema, &mut attributes)?;

        let created_at = metadata.get(SYS_CREATED_AT).and_then(|v| v.parse().ok()).unwrap_or_else(chrono::Utc::now);
        let updated_at = metadata.get(SYS_UPDATED_AT).and_then(|v| v.parse().ok()).unwrap_or(created_at);
        let deleted_at = metadata.get(SYS_DELETED_AT).and_then(|v| v.parse().ok());

        Ok(Document { id: id.to_string(), attributes, schema_version, created_at, updated_at, deleted_at })
    }

    /// Replace every `secret`-typed attribute's stored ciphertext with its
    /// plaintext (`spec.md` §3: secret fields "never appearing in
    /// plaintext in metadata, body, or logs" — only the returned document
    /// given to the caller sees plaintext).
    fn decrypt_secrets(&self, schema: &ParsedSchema, attributes: &mut BTreeMap<String, Value>) -> EngineResult<()> {
        for (name, node) in &schema.attributes {
            if !matches!(node.primitive, s3db_schema::ast::Primitive::Secret { .. }) {
                continue;
            }
            let Some(Value::String(ciphertext)) = attributes.get(name) else { continue };
            let plaintext = self.secret.decrypt(ciphertext).map_err(|e| EngineError::Internal(anyhow::anyhow!(e)))?;
            attributes.insert(name.clone(), Value::String(plaintext));
        }
        Ok(())
    }

    async fn write_document(&self, doc: &Document) -> EngineResult<()> {
        let wire = self.mapper.forward(&doc.attributes);
        let result = behavior::split(&self.schema, &self.mapper, self.behavior, &wire, &self.secret);

        let mut metadata = std::collections::HashMap::new();
        metadata.insert(SYS_SCHEMA_VERSION.to_string(), doc.schema_version.clone());
        metadata.insert(SYS_CREATED_AT.to_string(), doc.created_at.to_rfc3339());
        metadata.insert(SYS_UPDATED_AT.to_string(), doc.updated_at.to_rfc3339());
        if let Some(deleted_at) = doc.deleted_at {
            metadata.insert(SYS_DELETED_AT.to_string(), deleted_at.to_rfc3339());
        }
        for (k, v) in result.metadata {
            metadata.insert(k, v);
        }

        if matches!(self.behavior, BehaviorKind::UserManaged | BehaviorKind::EnforceLimits) {
            let size: usize = metadata.iter().map(|(k, v)| k.len() + v.len()).sum();
            if size > MAX_METADATA_BYTES {
                return Err(EngineError::MetadataTooLarge { behavior: self.behavior.to_string(), bytes_over: size - MAX_METADATA_BYTES });
            }
        }

        if !result.truncated_fields.is_empty() {
            warn!(resource = %self.name, id = %doc.id, fields = ?result.truncated_fields, "fields truncated to fit metadata budget");
        }

        let body = result.body.map(bytes::Bytes::from).unwrap_or_default();
        self.storage.put(&self.doc_key(&doc.id), body, metadata).await?;
        Ok(())
    }
}

fn apply_defaults(schema: &ParsedSchema, attributes: &mut BTreeMap<String, Value>) {
    for (name, node) in &schema.attributes {
        if attributes.contains_key(name) {
            continue;
        }
        if let Some(default) = node.default_literal() {
            attributes.insert(name.clone(), default_value_for(&node.primitive, default));
        }
    }
}

fn default_value_for(primitive: &s3db_schema::ast::Primitive, literal: &str) -> Value {
    use s3db_schema::ast::Primitive;
    match primitive {
        Primitive::Number => literal.parse::<f64>().map(Value::Number).unwrap_or(Value::String(literal.to_string())),
        Primitive::Boolean => literal.parse::<bool>().map(Value::Bool).unwrap_or(Value::String(literal.to_string())),
        _ => Value::String(literal.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use s3db_schema::ast::AttributeSpec;
    use s3db_schema::parser::parse_schema;
    use s3db_storage::MemoryBackend;

    fn build_resource(dsl: &[(&str, &str)], partitions: Vec<PartitionDef>) -> Arc<Resource> {
        let mut spec = BTreeMap::new();
        for (name, token) in dsl {
            spec.insert((*name).to_string(), AttributeSpec::Leaf((*token).to_string()));
        }
        let partition_map: BTreeMap<String, Vec<String>> = partitions.iter().map(|p| (p.name.clone(), p.fields.clone())).collect();
        let schema = parse_schema(&spec, "user-managed", partition_map).expect("parses");
        let mapper = Mapper::build(&schema);
        let storage: Arc<dyn StorageClient> = Arc::new(MemoryBackend::default());
        let config = EngineConfig::default();
        let events = Arc::new(EventBus::new(64));
        let locks = Arc::new(LockManager::local(&config));
        let partitions_manager = Arc::new(PartitionManager::new(storage.clone(), events.clone(), "db", 2, 32, false));
        let secret = Arc::new(SecretCipher::generate());
        let ids: Arc<dyn IdGenerator> = Arc::new(s3db_core::UuidGenerator);

        Arc::new(Resource::new(
            "orders",
            "db",
            schema,
            mapper,
            BehaviorKind::UserManaged,
            partitions,
            "v1",
            true,
            storage,
            locks,
            partitions_manager,
            events,
            secret,
            ids,
            HookRegistry::default(),
            config,
        ))
    }

    fn deps() -> Arc<BTreeMap<String, serde_json::Value>> {
        Arc::new(BTreeMap::new())
    }

    #[tokio::test]
    async fn test_should_insert_and_get_document() {
        let resource = build_resource(&[("name", "string|required")], vec![]);
        let attrs = BTreeMap::from([("name".to_string(), Value::String("Alice".into()))]);
        let doc = resource.insert(Some("o1".into()), attrs, "db1", deps()).await.expect("insert");
        assert_eq!(doc.id, "o1");

        let fetched = resource.get("o1", false).await.expect("get").expect("present");
        assert_eq!(fetched.get("name"), Some(&Value::String("Alice".into())));
    }

    #[tokio::test]
    async fn test_should_reject_duplicate_insert() {
        let resource = build_resource(&[("name", "string|required")], vec![]);
        let attrs = BTreeMap::from([("name".to_string(), Value::String("Alice".into()))]);
        resource.insert(Some("o1".into()), attrs.clone(), "db1", deps()).await.expect("first insert");
        let err = resource.insert(Some("o1".into()), attrs, "db1", deps()).await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_should_fail_validation_for_missing_required_field() {
        let resource = build_resource(&[("name", "string|required")], vec![]);
        let err = resource.insert(Some("o1".into()), BTreeMap::new(), "db1", deps()).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_patch_empty_is_noop_up_to_updated_at() {
        let resource = build_resource(&[("name", "string|required")], vec![]);
        let attrs = BTreeMap::from([("name".to_string(), Value::String("Alice".into()))]);
        let inserted = resource.insert(Some("o1".into()), attrs, "db1", deps()).await.expect("insert");
        let patched = resource.patch("o1", BTreeMap::new(), "db1", deps()).await.expect("patch");
        assert_eq!(patched.attributes, inserted.attributes);
        assert_eq!(patched.updated_at, inserted.updated_at);
    }

    #[tokio::test]
    async fn test_should_tombstone_then_hide_from_get_when_paranoid() {
        let resource = build_resource(&[("name", "string|required")], vec![]);
        let attrs = BTreeMap::from([("name".to_string(), Value::String("Alice".into()))]);
        resource.insert(Some("o1".into()), attrs, "db1", deps()).await.expect("insert");
        resource.delete("o1", "db1", deps()).await.expect("delete");

        assert!(resource.get("o1", false).await.expect("get").is_none());
        let restored = resource.get("o1", true).await.expect("get-include-deleted").expect("tombstone present");
        assert!(restored.is_tombstoned());
    }

    #[tokio::test]
    async fn test_should_restore_tombstoned_document_via_update() {
        let resource = build_resource(&[("name", "string|required")], vec![]);
        let attrs = BTreeMap::from([("name".to_string(), Value::String("Alice".into()))]);
        resource.insert(Some("o1".into()), attrs.clone(), "db1", deps()).await.expect("insert");
        resource.delete("o1", "db1", deps()).await.expect("delete");

        let restored = resource.update("o1", attrs, "db1", deps()).await.expect("update restores");
        assert!(!restored.is_tombstoned());
        assert!(resource.get("o1", false).await.expect("get").is_some());
    }

    #[tokio::test]
    async fn test_should_query_by_partition_equality() {
        let partitions = vec![PartitionDef::new("byTenant", vec!["tenantId".to_string()])];
        let resource = build_resource(&[("name", "string|required"), ("tenantId", "string|required")], partitions);
        let attrs = BTreeMap::from([
            ("name".to_string(), Value::String("Alice".into())),
            ("tenantId".to_string(), Value::String("t1".into())),
        ]);
        resource.insert(Some("o1".into()), attrs, "db1", deps()).await.expect("insert");

        let page = resource
            .query(
                Query { partition: "byTenant".into(), filters: vec![("tenantId".to_string(), "t1".to_string())] },
                PageOptions::default(),
            )
            .await
            .expect("query");
        assert_eq!(page.documents.len(), 1);
        assert_eq!(page.documents[0].id, "o1");
    }

    #[tokio::test]
    async fn test_should_reject_unsupported_query_filter() {
        let resource = build_resource(&[("name", "string|required")], vec![]);
        let err = resource
            .query(Query { partition: "nonexistent".into(), filters: vec![] }, PageOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedQuery { .. }));
    }

    #[tokio::test]
    async fn test_should_return_empty_page_for_zero_limit() {
        let resource = build_resource(&[("name", "string|required")], vec![]);
        let page = resource.list(PageOptions { limit: Some(0), ..Default::default() }, "db1", deps()).await.expect("list");
        assert!(page.documents.is_empty());
    }

    #[tokio::test]
    async fn test_should_stream_inserted_documents() {
        let resource = build_resource(&[("name", "string|required")], vec![]);
        for i in 0..3 {
            let attrs = BTreeMap::from([("name".to_string(), Value::String(format!("n{i}")))]);
            resource.insert(Some(format!("o{i}")), attrs, "db1", deps()).await.expect("insert");
        }
        let mut rx = resource.clone().stream(false);
        let mut seen = 0;
        while let Some(item) = rx.recv().await {
            item.expect("document");
            seen += 1;
        }
        assert_eq!(seen, 3);
    }
}
