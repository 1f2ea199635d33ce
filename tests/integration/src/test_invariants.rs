//! `spec.md` §8 universal invariants, driven end-to-end through
//! [`s3db_engine::Database`] wherever the public engine surface reaches
//! far enough, and through a hand-wired [`s3db_engine::Resource`] (same
//! pattern the engine crate's own unit tests use) for the couple of
//! invariants that need a peek at the raw stored bytes.

#[cfg(test)]
mod tests {
    use crate::{leaf, no_deps, simple_spec, test_database};
    use s3db_engine::{EngineError, EventBus, LockManager, PageOptions, Resource, SecretCipher};
    use s3db_engine::partition::PartitionManager;
    use s3db_model::{BehaviorKind, Value};
    use s3db_schema::Mapper;
    use s3db_schema::ast::AttributeSpec;
    use s3db_storage::{MemoryBackend, StorageClient};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn string(s: &str) -> Value {
        Value::String(s.to_string())
    }

    /// Build a resource directly over a `MemoryBackend` we keep a handle
    /// to, so tests can inspect raw stored metadata/body without going
    /// through a `Database`.
    fn wired_resource(dsl: &[(&str, &str)], behavior: BehaviorKind) -> (Arc<Resource>, Arc<dyn StorageClient>) {
        let mut spec = BTreeMap::new();
        for (name, token) in dsl {
            spec.insert((*name).to_string(), AttributeSpec::Leaf((*token).to_string()));
        }
        let schema = s3db_schema::parser::parse_schema(&spec, behavior.id(), BTreeMap::new()).expect("parses");
        let mapper = Mapper::build(&schema);
        let storage: Arc<dyn StorageClient> = Arc::new(MemoryBackend::default());
        let config = s3db_core::EngineConfig::default();
        let events = Arc::new(EventBus::new(64));
        let locks = Arc::new(LockManager::local(&config));
        let partitions_manager = Arc::new(PartitionManager::new(storage.clone(), events.clone(), "db", 2, 32, false));
        let secret = Arc::new(SecretCipher::generate());
        let ids: Arc<dyn s3db_core::IdGenerator> = Arc::new(s3db_core::UuidGenerator);

        let resource = Arc::new(Resource::new(
            "things",
            "db",
            schema,
            mapper,
            behavior,
            vec![],
            "v1",
            true,
            storage.clone(),
            locks,
            partitions_manager,
            events,
            secret,
            ids,
            s3db_engine::HookRegistry::default(),
            config,
        ));
        (resource, storage)
    }

    /// 1. `decode(encode(d, S), S) == d` for a document exercising every
    /// scalar primitive the schema DSL supports.
    #[tokio::test]
    async fn test_invariant_round_trips_every_scalar_primitive() {
        let db = test_database("invariant-roundtrip").await;
        let spec = s3db_engine::ResourceSpec {
            name: "items".into(),
            attributes: BTreeMap::from([
                ("label".to_string(), leaf("string|required")),
                ("qty".to_string(), leaf("number|required")),
                ("active".to_string(), leaf("boolean|required")),
                ("issuedAt".to_string(), leaf("date|required")),
            ]),
            behavior: BehaviorKind::UserManaged,
            partitions: BTreeMap::new(),
            paranoid: true,
        };
        let items = db.create_resource(spec).await.expect("create");

        let when = chrono::Utc::now();
        let attrs = BTreeMap::from([
            ("label".to_string(), string("widget")),
            ("qty".to_string(), Value::Number(7.0)),
            ("active".to_string(), Value::Bool(true)),
            ("issuedAt".to_string(), Value::Date(when)),
        ]);
        let inserted = items.insert(Some("i1".into()), attrs.clone(), db.id(), no_deps()).await.expect("insert");
        let fetched = items.get("i1", false).await.expect("get").expect("present");
        assert_eq!(fetched.attributes, inserted.attributes);
        assert_eq!(fetched.get("label"), Some(&string("widget")));
        assert_eq!(fetched.get("qty"), Some(&Value::Number(7.0)));
        assert_eq!(fetched.get("active"), Some(&Value::Bool(true)));
    }

    /// 3. After `insert(x)`, `get(x)` returns it; after `delete(x)` (not
    /// paranoid), `get(x)` fails to find it and `exists` agrees (property 5).
    #[tokio::test]
    async fn test_invariant_insert_then_get_then_delete_then_not_found() {
        let db = test_database("invariant-lifecycle").await;
        let spec = s3db_engine::ResourceSpec {
            name: "things".into(),
            attributes: BTreeMap::from([("name".to_string(), leaf("string|required"))]),
            behavior: BehaviorKind::UserManaged,
            partitions: BTreeMap::new(),
            paranoid: false,
        };
        let things = db.create_resource(spec).await.expect("create");

        things.insert(Some("x".into()), BTreeMap::from([("name".to_string(), string("Alice"))]), db.id(), no_deps()).await.expect("insert");
        assert!(things.get("x", false).await.expect("get").is_some());
        assert!(things.exists("x", false).await.expect("exists"));

        things.delete("x", db.id(), no_deps()).await.expect("delete");
        assert!(things.get("x", false).await.expect("get").is_none());
        assert!(!things.exists("x", false).await.expect("exists"));
        let err = things.get("x", false).await.expect("get ok");
        assert!(err.is_none());
    }

    /// 4. `patch(x, {})` is a no-op up to `updatedAt`.
    #[tokio::test]
    async fn test_invariant_empty_patch_is_noop_up_to_updated_at() {
        let db = test_database("invariant-empty-patch").await;
        let resource = db.create_resource(simple_spec("things")).await.expect("create");
        let inserted = resource.insert(Some("x".into()), BTreeMap::from([("name".to_string(), string("Alice"))]), db.id(), no_deps()).await.expect("insert");

        let patched = resource.patch("x", BTreeMap::new(), db.id(), no_deps()).await.expect("empty patch");
        assert_eq!(patched.attributes, inserted.attributes);
        assert_eq!(patched.updated_at, inserted.updated_at);
        assert_eq!(patched.created_at, inserted.created_at);
    }

    /// 6. N concurrent inserts with distinct ids all succeed.
    #[tokio::test]
    async fn test_invariant_concurrent_inserts_distinct_ids_all_succeed() {
        let db = test_database("invariant-distinct-ids").await;
        let resource = db.create_resource(simple_spec("things")).await.expect("create");

        let mut handles = Vec::new();
        for i in 0..20 {
            let resource = resource.clone();
            let database_id = db.id().to_string();
            handles.push(tokio::spawn(async move {
                resource
                    .insert(Some(format!("id-{i}")), BTreeMap::from([("name".to_string(), Value::String(format!("n{i}")))]), &database_id, no_deps())
                    .await
            }));
        }
        for handle in handles {
            handle.await.expect("task panicked").expect("insert should succeed");
        }
        assert_eq!(resource.count(false).await.expect("count"), 20);
    }

    /// 7. N concurrent `patch` calls to the same id converge to some
    /// serial interleaving: per-key locking means no write is lost, so the
    /// final document carries every patch's field.
    #[tokio::test]
    async fn test_invariant_concurrent_patches_serialize_without_lost_updates() {
        let db = test_database("invariant-concurrent-patch").await;
        let spec = s3db_engine::ResourceSpec {
            name: "things".into(),
            attributes: (0..10).map(|i| (format!("f{i}"), leaf("string"))).chain(std::iter::once(("name".to_string(), leaf("string|required")))).collect(),
            behavior: BehaviorKind::UserManaged,
            partitions: BTreeMap::new(),
            paranoid: true,
        };
        let resource = db.create_resource(spec).await.expect("create");
        resource.insert(Some("x".into()), BTreeMap::from([("name".to_string(), string("seed"))]), db.id(), no_deps()).await.expect("insert");

        let mut handles = Vec::new();
        for i in 0..10 {
            let resource = resource.clone();
            let database_id = db.id().to_string();
            handles.push(tokio::spawn(async move {
                resource.patch("x", BTreeMap::from([(format!("f{i}"), Value::String(format!("v{i}")))]), &database_id, no_deps()).await
            }));
        }
        for handle in handles {
            handle.await.expect("task panicked").expect("patch should succeed");
        }

        let final_doc = resource.get("x", false).await.expect("get").expect("present");
        for i in 0..10 {
            assert_eq!(final_doc.get(&format!("f{i}")), Some(&Value::String(format!("v{i}"))), "patch f{i} was lost under concurrent writers");
        }
    }

    /// 9. Secret-typed fields never appear in plaintext in stored metadata
    /// or body.
    #[tokio::test]
    async fn test_invariant_secret_fields_never_persist_as_plaintext() {
        let (resource, storage) = wired_resource(&[("apiKey", "secret"), ("name", "string|required")], BehaviorKind::UserManaged);
        resource
            .insert(
                Some("s1".into()),
                BTreeMap::from([("apiKey".to_string(), string("sk-live-super-secret")), ("name".to_string(), string("svc"))]),
                "db1",
                no_deps(),
            )
            .await
            .expect("insert");

        let raw = storage.get("db/resource=things/data/id=s1").await.expect("raw get");
        for value in raw.metadata.values() {
            assert!(!value.contains("sk-live-super-secret"), "secret plaintext leaked into metadata");
        }
        assert!(!String::from_utf8_lossy(&raw.body).contains("sk-live-super-secret"));

        // The engine itself still decrypts transparently for the owning caller.
        let fetched = resource.get("s1", false).await.expect("get").expect("present");
        assert_eq!(fetched.get("apiKey"), Some(&string("sk-live-super-secret")));
    }

    /// 2 (partial, engine-level). `query` against a partition with
    /// multiple documents returns exactly the matching set and nothing
    /// else, modulo no in-flight async writes (this resource runs
    /// partitions synchronously).
    #[tokio::test]
    async fn test_invariant_partition_listing_matches_exact_predicate() {
        let db = test_database("invariant-partition").await;
        let spec = s3db_engine::ResourceSpec {
            name: "events".into(),
            attributes: BTreeMap::from([("kind".to_string(), leaf("string|required"))]),
            behavior: BehaviorKind::UserManaged,
            partitions: BTreeMap::from([("byKind".to_string(), vec!["kind".to_string()])]),
            paranoid: true,
        };
        let events = db.create_resource(spec).await.expect("create");

        for (id, kind) in [("e1", "click"), ("e2", "view"), ("e3", "click"), ("e4", "click")] {
            events.insert(Some(id.into()), BTreeMap::from([("kind".to_string(), string(kind))]), db.id(), no_deps()).await.expect("insert");
        }

        let clicks = events
            .query(s3db_engine::Query { partition: "byKind".into(), filters: vec![("kind".to_string(), "click".to_string())] }, PageOptions::default())
            .await
            .expect("query");
        let mut ids: Vec<&str> = clicks.documents.iter().map(|d| d.id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["e1", "e3", "e4"]);
    }

    /// `UnsupportedQueryError` when the filter isn't backed by a partition.
    #[tokio::test]
    async fn test_invariant_query_without_matching_partition_is_unsupported() {
        let db = test_database("invariant-unsupported-query").await;
        let resource = db.create_resource(simple_spec("things")).await.expect("create");
        let err = resource
            .query(s3db_engine::Query { partition: "nope".into(), filters: vec![] }, PageOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedQuery { .. }));
    }
}
