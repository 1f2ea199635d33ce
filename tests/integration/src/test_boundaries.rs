//! `spec.md` §8 boundary behaviors.

#[cfg(test)]
mod tests {
    use crate::{no_deps, simple_spec, test_database};
    use s3db_engine::{EngineError, EventBus, LockManager, PageOptions, Resource, SecretCipher};
    use s3db_engine::partition::PartitionManager;
    use s3db_model::{BehaviorKind, Value};
    use s3db_schema::Mapper;
    use s3db_schema::ast::AttributeSpec;
    use s3db_storage::{MemoryBackend, StorageClient};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    fn wired_resource(spec: BTreeMap<String, AttributeSpec>, behavior: BehaviorKind) -> (Arc<Resource>, Arc<dyn StorageClient>) {
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

    /// A document whose total stored metadata sits exactly at the
    /// behavior's byte budget persists; one byte past it is rejected.
    /// Rather than hand-computing the sys-field overhead (timestamp
    /// formatting width varies run to run), binary-search the crossover
    /// point live and confirm it against the real stored bytes.
    #[tokio::test]
    async fn test_boundary_metadata_budget_enforced_at_the_byte_limit() {
        let spec = BTreeMap::from([("v".to_string(), AttributeSpec::Leaf("string|required".to_string()))]);
        let (resource, storage) = wired_resource(spec, BehaviorKind::UserManaged);

        let mut lo = 0usize;
        let mut hi = 4096usize;
        while hi - lo > 1 {
            let mid = (lo + hi) / 2;
            let id = format!("probe-{mid}");
            match resource.insert(Some(id), BTreeMap::from([("v".to_string(), Value::String("x".repeat(mid)))]), "db1", no_deps()).await {
                Ok(_) => lo = mid,
                Err(EngineError::MetadataTooLarge { .. }) => hi = mid,
                Err(other) => panic!("unexpected error during boundary search: {other}"),
            }
        }

        resource
            .insert(Some("at-budget".into()), BTreeMap::from([("v".to_string(), Value::String("x".repeat(lo)))]), "db1", no_deps())
            .await
            .expect("the largest value that fit during the search must still fit here");

        let raw = storage.get("db/resource=things/data/id=at-budget").await.expect("raw get");
        let total: usize = raw.metadata.iter().map(|(k, v)| k.len() + v.len()).sum();
        assert!(total <= 2048, "document at the discovered boundary exceeds the 2048 byte budget: {total}");
        assert!(total > 2048usize.saturating_sub(64), "boundary search converged far from the real budget: {total}");

        let over = resource
            .insert(Some("over-budget".into()), BTreeMap::from([("v".to_string(), Value::String("x".repeat(lo + 1)))]), "db1", no_deps())
            .await;
        assert!(matches!(over, Err(EngineError::MetadataTooLarge { .. })), "one byte past the limit must be rejected");
    }

    /// A nested object 5 levels deep validates and round-trips.
    #[tokio::test]
    async fn test_boundary_deeply_nested_object_round_trips() {
        let db = test_database("boundary-nested").await;

        fn nested_spec(depth: usize) -> AttributeSpec {
            if depth == 0 {
                AttributeSpec::Leaf("string|required".to_string())
            } else {
                AttributeSpec::Nested(BTreeMap::from([("child".to_string(), nested_spec(depth - 1))]))
            }
        }
        fn nested_value(depth: usize, leaf: &str) -> Value {
            if depth == 0 {
                Value::String(leaf.to_string())
            } else {
                Value::Object(BTreeMap::from([("child".to_string(), nested_value(depth - 1, leaf))]))
            }
        }

        let spec = s3db_engine::ResourceSpec {
            name: "trees".into(),
            attributes: BTreeMap::from([("root".to_string(), nested_spec(5))]),
            behavior: BehaviorKind::UserManaged,
            partitions: BTreeMap::new(),
            paranoid: true,
        };
        let trees = db.create_resource(spec).await.expect("create");

        let value = nested_value(5, "leaf-value");
        trees.insert(Some("n1".into()), BTreeMap::from([("root".to_string(), value.clone())]), db.id(), no_deps()).await.expect("insert");

        let fetched = trees.get("n1", false).await.expect("get").expect("present");
        assert_eq!(fetched.get("root"), Some(&value));
    }

    /// `list` with `limit=0` returns an empty page and doesn't touch storage.
    #[tokio::test]
    async fn test_boundary_zero_limit_list_is_empty_and_skips_storage() {
        let db = test_database("boundary-zero-limit").await;
        let resource = db.create_resource(simple_spec("things")).await.expect("create");
        resource.insert(Some("a".into()), BTreeMap::from([("name".to_string(), Value::String("Alice".into()))]), db.id(), no_deps()).await.expect("insert");

        let page = resource
            .list(PageOptions { limit: Some(0), continuation: None, include_deleted: false }, db.id(), no_deps())
            .await
            .expect("list");
        assert!(page.documents.is_empty());
        assert!(page.continuation.is_none());
    }

    /// Rebuilding partitions on an empty resource is a cheap no-op.
    #[tokio::test]
    async fn test_boundary_rebuild_partitions_on_empty_resource_is_fast_noop() {
        let db = test_database("boundary-empty-rebuild").await;
        let spec = s3db_engine::ResourceSpec {
            name: "empties".into(),
            attributes: BTreeMap::from([("tag".to_string(), crate::leaf("string|required"))]),
            behavior: BehaviorKind::UserManaged,
            partitions: BTreeMap::from([("byTag".to_string(), vec!["tag".to_string()])]),
            paranoid: true,
        };
        let resource = db.create_resource(spec).await.expect("create");

        let rebuilt = tokio::time::timeout(Duration::from_secs(5), resource.rebuild_partitions())
            .await
            .expect("rebuild_partitions on an empty resource must not hang")
            .expect("rebuild_partitions should succeed");
        assert_eq!(rebuilt, 0);
    }
}
