//! The Database Controller (`spec.md` §4.7): connects to a backend,
//! owns the schema catalog (`<prefix>/s3db.json`), and hands out
//! [`Resource`] handles. Per the REDESIGN FLAGS arena+index model, a
//! `Database` owns its `Resource`s directly (`DashMap<String, Arc<Resource>>`)
//! rather than `Resource`s holding a pointer back to their owner.

use crate::cron::CronManager;
use crate::events::EventBus;
use crate::lock::LockManager;
use crate::partition::PartitionManager;
use crate::plugin::{Plugin, PluginRegistry};
use crate::resource::Resource;
use crate::secret::SecretCipher;
use crate::{EngineError, EngineResult};
use bytes::Bytes;
use dashmap::DashMap;
use s3db_core::{Backend, ConnectionString, EngineConfig, IdGenerator};
use s3db_model::{BehaviorKind, Catalog, PartitionDef, ResourceCatalogEntry, SchemaVersionRecord};
use s3db_schema::ast::AttributeSpec;
use s3db_schema::{parser, version, Mapper};
use s3db_storage::{FilesystemBackend, FilesystemOptions, MemoryBackend, StorageClient, StorageError};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

/// A caller's declaration of a resource's desired shape, as given to
/// [`Database::create_resource`]. Creating a resource whose attributes
/// hash differently from the current version is an in-place schema
/// upgrade (`spec.md` §4.2: "coexistence of old and new schema versions").
#[derive(Debug, Clone)]
pub struct ResourceSpec {
    /// Resource name.
    pub name: String,
    /// Attribute declarations, leaf DSL strings or nested maps.
    pub attributes: BTreeMap<String, AttributeSpec>,
    /// Write/read split policy.
    pub behavior: BehaviorKind,
    /// Declared secondary indexes.
    pub partitions: BTreeMap<String, Vec<String>>,
    /// Whether deletes tombstone (`true`) or purge immediately (`false`).
    pub paranoid: bool,
}

fn memory_registry() -> &'static DashMap<String, Arc<MemoryBackend>> {
    static REGISTRY: OnceLock<DashMap<String, Arc<MemoryBackend>>> = OnceLock::new();
    REGISTRY.get_or_init(DashMap::new)
}

async fn build_storage(backend: &Backend) -> EngineResult<Arc<dyn StorageClient>> {
    match backend {
        Backend::Memory { name } => {
            let store = memory_registry().entry(name.clone()).or_insert_with(|| Arc::new(MemoryBackend::default())).clone();
            Ok(store as Arc<dyn StorageClient>)
        }
        Backend::Filesystem { path } => {
            let options = FilesystemOptions::builder().root(std::path::PathBuf::from(path)).build();
            Ok(Arc::new(FilesystemBackend::new(options)) as Arc<dyn StorageClient>)
        }
        Backend::S3 { access_key, secret_key, bucket, region, endpoint, force_path_style } => {
            let mut options = s3db_storage::S3Options::new(bucket.clone());
            options.region = region.clone();
            options.endpoint = endpoint.clone();
            options.force_path_style = *force_path_style;
            if !access_key.is_empty() {
                options.static_credentials = Some((access_key.clone(), secret_key.clone()));
            }
            let backend = s3db_storage::S3Backend::connect(options)
                .await
                .map_err(|e| EngineError::Connection { backend: "s3".into(), cause: e.to_string() })?;
            Ok(Arc::new(backend) as Arc<dyn StorageClient>)
        }
    }
}

fn encode_attribute_spec(spec: &AttributeSpec) -> String {
    match spec {
        AttributeSpec::Leaf(dsl) => dsl.clone(),
        AttributeSpec::Nested(_) => serde_json::to_string(spec).expect("attribute spec serializes"),
    }
}

fn decode_attribute_spec(raw: &str) -> AttributeSpec {
    if raw.trim_start().starts_with('{') {
        serde_json::from_str(raw).unwrap_or_else(|_| AttributeSpec::Leaf(raw.to_string()))
    } else {
        AttributeSpec::Leaf(raw.to_string())
    }
}

/// A connected database: a storage backend plus the schema catalog and
/// live resources built on top of it.
pub struct Database {
    id: String,
    prefix: String,
    storage: Arc<dyn StorageClient>,
    config: EngineConfig,
    events: Arc<EventBus>,
    locks: Arc<LockManager>,
    partitions_manager: Arc<PartitionManager>,
    secret: Arc<SecretCipher>,
    ids: Arc<dyn IdGenerator>,
    resources: DashMap<String, Arc<Resource>>,
    plugins: PluginRegistry,
    cron: CronManager,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("id", &self.id).field("prefix", &self.prefix).field("resources", &self.resources.len()).finish()
    }
}

impl Database {
    /// Connect to `connection_string` (`spec.md` §6 grammar), verifying
    /// the backend is reachable and loading (or creating) the schema
    /// catalog.
    pub async fn connect(connection_string: &str, config: EngineConfig) -> EngineResult<Self> {
        let parsed = ConnectionString::parse(connection_string)
            .map_err(|e| EngineError::Connection { backend: "connection-string".into(), cause: e.to_string() })?;
        let storage = build_storage(&parsed.backend).await?;

        // Verify reachability before anything else.
        storage
            .list(&parsed.prefix, s3db_storage::ListOptions { limit: Some(1), continuation: None })
            .await
            .map_err(EngineError::from)?;

        let id = s3db_core::UuidGenerator.generate();
        let events = Arc::new(EventBus::new(256));
        let locks = Arc::new(LockManager::with_storage(storage.clone(), parsed.prefix.clone(), &config));
        let partitions_manager = Arc::new(PartitionManager::new(
            storage.clone(),
            events.clone(),
            parsed.prefix.clone(),
            config.partition_worker_concurrency,
            config.partition_worker_queue,
            true,
        ));

        let database = Self {
            id,
            prefix: parsed.prefix,
            storage,
            config,
            events,
            locks,
            partitions_manager,
            secret: Arc::new(SecretCipher::generate()),
            ids: Arc::new(s3db_core::UuidGenerator),
            resources: DashMap::new(),
            plugins: PluginRegistry::default(),
            cron: CronManager::default(),
        };

        let catalog = database.ensure_catalog().await?;
        database.reconstruct_resources(&catalog)?;
        info!(database_id = %database.id, resources = database.resources.len(), "database connected");
        Ok(database)
    }

    /// This connection's opaque id, the handle carried by [`crate::hooks::HookContext`].
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The event bus every resource on this connection emits through.
    #[must_use]
    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    /// The cron manager owned by this connection.
    #[must_use]
    pub fn cron(&self) -> &CronManager {
        &self.cron
    }

    fn catalog_key(&self) -> String {
        if self.prefix.is_empty() { "s3db.json".to_string() } else { format!("{}/s3db.json", self.prefix.trim_end_matches('/')) }
    }

    async fn ensure_catalog(&self) -> EngineResult<Catalog> {
        match self.storage.get(&self.catalog_key()).await {
            Ok(result) => Ok(serde_json::from_slice(&result.body).map_err(|e| EngineError::Internal(e.into()))?),
            Err(StorageError::NoSuchKey { .. }) => {
                let catalog = Catalog::empty();
                let body = serde_json::to_vec(&catalog).expect("empty catalog serializes");
                self.storage.put(&self.catalog_key(), Bytes::from(body), HashMap::new()).await?;
                Ok(catalog)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn load_catalog_with_etag(&self) -> EngineResult<(Catalog, String)> {
        match self.storage.get(&self.catalog_key()).await {
            Ok(result) => {
                let catalog = serde_json::from_slice(&result.body).map_err(|e| EngineError::Internal(e.into()))?;
                Ok((catalog, result.etag))
            }
            Err(StorageError::NoSuchKey { .. }) => Ok((Catalog::empty(), String::new())),
            Err(e) => Err(e.into()),
        }
    }

    /// Read-modify-write the catalog with a bounded number of
    /// compare-and-swap attempts (`spec.md` §6: "optimistic concurrency
    /// via storage etags"). Retries from a fresh read whenever the catalog
    /// changed underneath us between read and write.
    async fn save_catalog_cas(&self, mutate: impl Fn(&mut Catalog)) -> EngineResult<Catalog> {
        const ATTEMPTS: u32 = 5;
        for _ in 0..ATTEMPTS {
            let (mut catalog, etag) = self.load_catalog_with_etag().await?;
            mutate(&mut catalog);

            let current_etag = match self.storage.head(&self.catalog_key()).await {
                Ok(head) => head.etag,
                Err(StorageError::NoSuchKey { .. }) => String::new(),
                Err(e) => return Err(e.into()),
            };
            if current_etag != etag {
                continue;
            }

            let body = serde_json::to_vec(&catalog).expect("catalog serializes");
            self.storage.put(&self.catalog_key(), Bytes::from(body), HashMap::new()).await?;
            return Ok(catalog);
        }
        Err(EngineError::Conflict {
            resource: "catalog".into(),
            id: "s3db.json".into(),
            reason: "too many concurrent catalog updates".into(),
        })
    }

    fn reconstruct_resources(&self, catalog: &Catalog) -> EngineResult<()> {
        for (name, entry) in &catalog.resources {
            let Some(record) = entry.current() else { continue };
            let mut resource = self.build_resource(name, record)?;
            self.install_historical_versions(&mut resource, entry, &record.hash)?;
            self.resources.insert(name.clone(), Arc::new(resource));
        }
        Ok(())
    }

    /// Register every non-current version on `entry` as a decode-only
    /// [`Resource::install_version`] so documents written under an older
    /// schema stay readable (`spec.md` §4.2, §8 scenario D).
    fn install_historical_versions(&self, resource: &mut Resource, entry: &ResourceCatalogEntry, current_hash: &str) -> EngineResult<()> {
        for (hash, record) in &entry.versions {
            if hash == current_hash {
                continue;
            }
            let spec: BTreeMap<String, AttributeSpec> =
                record.attributes.iter().map(|(k, v)| (k.clone(), decode_attribute_spec(v))).collect();
            let partition_map: BTreeMap<String, Vec<String>> =
                record.partitions.iter().map(|p| (p.name.clone(), p.fields.clone())).collect();
            let schema = parser::parse_schema(&spec, record.behavior.id(), partition_map)?;
            let mapper = Mapper::build(&schema);
            resource.install_version(hash.clone(), schema, mapper, record.behavior);
        }
        Ok(())
    }

    fn build_resource(&self, name: &str, record: &SchemaVersionRecord) -> EngineResult<Resource> {
        let spec: BTreeMap<String, AttributeSpec> =
            record.attributes.iter().map(|(k, v)| (k.clone(), decode_attribute_spec(v))).collect();
        let partition_map: BTreeMap<String, Vec<String>> =
            record.partitions.iter().map(|p| (p.name.clone(), p.fields.clone())).collect();
        let schema = parser::parse_schema(&spec, record.behavior.id(), partition_map)?;
        let mapper = Mapper::build(&schema);

        Ok(Resource::new(
            name,
            self.prefix.clone(),
            schema,
            mapper,
            record.behavior,
            record.partitions.clone(),
            record.hash.clone(),
            record.paranoid,
            self.storage.clone(),
            self.locks.clone(),
            self.partitions_manager.clone(),
            self.events.clone(),
            self.secret.clone(),
            self.ids.clone(),
            crate::hooks::HookRegistry::default(),
            self.config.clone(),
        ))
    }

    /// Declare (or upgrade) a resource, persisting its schema version in
    /// the catalog and returning the live [`Resource`] handle.
    pub async fn create_resource(&self, spec: ResourceSpec) -> EngineResult<Arc<Resource>> {
        let partition_defs: Vec<PartitionDef> = spec.partitions.iter().map(|(name, fields)| PartitionDef::new(name.clone(), fields.clone())).collect();
        let schema = parser::parse_schema(&spec.attributes, spec.behavior.id(), spec.partitions.clone())?;
        let mapper = Mapper::build(&schema);
        let hash = version::compute_hash(&schema);

        let encoded_attributes: BTreeMap<String, String> =
            spec.attributes.iter().map(|(k, v)| (k.clone(), encode_attribute_spec(v))).collect();

        let record = SchemaVersionRecord {
            attributes: encoded_attributes,
            behavior: spec.behavior,
            partitions: partition_defs.clone(),
            name_map: mapper.name_map(),
            hash: hash.clone(),
            paranoid: spec.paranoid,
            created_at: chrono::Utc::now(),
        };

        let name = spec.name.clone();
        let previous_hash = self
            .resources
            .get(&name)
            .map(|r| r.schema_version().to_string());

        let catalog = self
            .save_catalog_cas(|catalog| {
                let entry = catalog.resources.entry(name.clone()).or_insert_with(|| ResourceCatalogEntry {
                    current_version: hash.clone(),
                    versions: BTreeMap::new(),
                });
                entry.versions.insert(hash.clone(), record.clone());
                entry.current_version = hash.clone();
            })
            .await?;

        let mut resource = Resource::new(
            spec.name.clone(),
            self.prefix.clone(),
            schema,
            mapper,
            spec.behavior,
            partition_defs,
            hash.clone(),
            spec.paranoid,
            self.storage.clone(),
            self.locks.clone(),
            self.partitions_manager.clone(),
            self.events.clone(),
            self.secret.clone(),
            self.ids.clone(),
            crate::hooks::HookRegistry::default(),
            self.config.clone(),
        );
        if let Some(entry) = catalog.resources.get(&name) {
            self.install_historical_versions(&mut resource, entry, &hash)?;
        }
        let resource = Arc::new(resource);
        self.resources.insert(spec.name.clone(), resource.clone());

        if let Some(previous_hash) = previous_hash {
            if previous_hash != hash {
                self.events.emit(s3db_model::Event::SchemaUpgraded { resource: spec.name.clone(), from: previous_hash, to: hash });
            }
        }

        debug!(resource = %spec.name, "resource declared");
        Ok(resource)
    }

    /// Re-declare a resource with a new schema; a thin alias over
    /// [`Database::create_resource`], which already treats a changed
    /// attribute hash as an in-place upgrade.
    pub async fn upgrade_schema(&self, spec: ResourceSpec) -> EngineResult<Arc<Resource>> {
        self.create_resource(spec).await
    }

    /// Look up an already-declared resource.
    #[must_use]
    pub fn get_resource(&self, name: &str) -> Option<Arc<Resource>> {
        self.resources.get(name).map(|r| r.clone())
    }

    /// List every declared resource's name.
    #[must_use]
    pub fn list_resources(&self) -> Vec<String> {
        self.resources.iter().map(|e| e.key().clone()).collect()
    }

    /// Read the current schema catalog.
    pub async fn get_catalog(&self) -> EngineResult<Catalog> {
        let (catalog, _etag) = self.load_catalog_with_etag().await?;
        Ok(catalog)
    }

    /// Register and immediately start a plugin against this connection.
    pub async fn use_plugin(&mut self, plugin: Arc<dyn Plugin>) -> EngineResult<()> {
        self.plugins.register(plugin.clone());
        plugin
            .start(&self.id)
            .await
            .map_err(|e| EngineError::Internal(e))?;
        Ok(())
    }

    /// Disconnect: stop cron jobs, stop plugins in reverse dependency
    /// order. The partition worker pool's background tasks are detached
    /// (`tokio::spawn`) and drain naturally as their channel senders drop
    /// with the database.
    pub async fn disconnect(&self) {
        self.cron.stop_all();
        self.plugins.stop_all().await;
        info!(database_id = %self.id, "database disconnected");
    }
}
