//! `spec.md` §8 end-to-end scenarios A-F.

#[cfg(test)]
mod tests {
    use crate::{leaf, no_deps, simple_spec, test_database};
    use s3db_engine::{EngineError, PageOptions, Query, ResourceSpec};
    use s3db_model::{BehaviorKind, Value};
    use std::collections::BTreeMap;

    fn string(s: &str) -> Value {
        Value::String(s.to_string())
    }

    /// A. Multi-tenant insert + partitioned read.
    #[tokio::test]
    async fn test_scenario_a_multi_tenant_insert_and_partitioned_read() {
        let db = test_database("scenario-a").await;
        let spec = ResourceSpec {
            name: "orders".into(),
            attributes: BTreeMap::from([
                ("tenantId".to_string(), leaf("string|required")),
                ("userId".to_string(), leaf("string|required")),
                ("total".to_string(), leaf("number|required")),
            ]),
            behavior: BehaviorKind::UserManaged,
            partitions: BTreeMap::from([("byTenantUser".to_string(), vec!["tenantId".to_string(), "userId".to_string()])]),
            paranoid: true,
        };
        let orders = db.create_resource(spec).await.expect("create orders");

        orders
            .insert(
                Some("o1".into()),
                BTreeMap::from([("tenantId".to_string(), string("t1")), ("userId".to_string(), string("u1")), ("total".to_string(), Value::Number(50.0))]),
                db.id(),
                no_deps(),
            )
            .await
            .expect("insert o1");
        orders
            .insert(
                Some("o2".into()),
                BTreeMap::from([("tenantId".to_string(), string("t1")), ("userId".to_string(), string("u2")), ("total".to_string(), Value::Number(30.0))]),
                db.id(),
                no_deps(),
            )
            .await
            .expect("insert o2");
        orders
            .insert(
                Some("o3".into()),
                BTreeMap::from([("tenantId".to_string(), string("t2")), ("userId".to_string(), string("u1")), ("total".to_string(), Value::Number(80.0))]),
                db.id(),
                no_deps(),
            )
            .await
            .expect("insert o3");

        let t1u1 = orders
            .query(
                Query { partition: "byTenantUser".into(), filters: vec![("tenantId".to_string(), "t1".to_string()), ("userId".to_string(), "u1".to_string())] },
                PageOptions::default(),
            )
            .await
            .expect("query t1/u1");
        assert_eq!(t1u1.documents.iter().map(|d| d.id.as_str()).collect::<Vec<_>>(), vec!["o1"]);

        let t1u2 = orders
            .query(
                Query { partition: "byTenantUser".into(), filters: vec![("tenantId".to_string(), "t1".to_string()), ("userId".to_string(), "u2".to_string())] },
                PageOptions::default(),
            )
            .await
            .expect("query t1/u2");
        assert_eq!(t1u2.documents.iter().map(|d| d.id.as_str()).collect::<Vec<_>>(), vec!["o2"]);
    }

    /// B. Update that moves partition.
    #[tokio::test]
    async fn test_scenario_b_update_moves_partition() {
        let db = test_database("scenario-b").await;
        let spec = ResourceSpec {
            name: "orders".into(),
            attributes: BTreeMap::from([
                ("tenantId".to_string(), leaf("string|required")),
                ("userId".to_string(), leaf("string|required")),
                ("total".to_string(), leaf("number|required")),
            ]),
            behavior: BehaviorKind::UserManaged,
            partitions: BTreeMap::from([("byTenantUser".to_string(), vec!["tenantId".to_string(), "userId".to_string()])]),
            paranoid: true,
        };
        let orders = db.create_resource(spec).await.expect("create orders");

        orders
            .insert(
                Some("o1".into()),
                BTreeMap::from([("tenantId".to_string(), string("t1")), ("userId".to_string(), string("u1")), ("total".to_string(), Value::Number(50.0))]),
                db.id(),
                no_deps(),
            )
            .await
            .expect("insert o1");
        orders
            .insert(
                Some("o2".into()),
                BTreeMap::from([("tenantId".to_string(), string("t1")), ("userId".to_string(), string("u2")), ("total".to_string(), Value::Number(30.0))]),
                db.id(),
                no_deps(),
            )
            .await
            .expect("insert o2");

        orders.patch("o1", BTreeMap::from([("userId".to_string(), string("u2"))]), db.id(), no_deps()).await.expect("patch o1");

        let old_slot = orders
            .query(
                Query { partition: "byTenantUser".into(), filters: vec![("tenantId".to_string(), "t1".to_string()), ("userId".to_string(), "u1".to_string())] },
                PageOptions::default(),
            )
            .await
            .expect("query old slot");
        assert!(old_slot.documents.is_empty());

        let new_slot = orders
            .query(
                Query { partition: "byTenantUser".into(), filters: vec![("tenantId".to_string(), "t1".to_string()), ("userId".to_string(), "u2".to_string())] },
                PageOptions::default(),
            )
            .await
            .expect("query new slot");
        let mut ids: Vec<&str> = new_slot.documents.iter().map(|d| d.id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["o1", "o2"]);
    }

    /// C. `body-overflow` behavior with a large field.
    #[tokio::test]
    async fn test_scenario_c_body_overflow_round_trips_large_field() {
        let db = test_database("scenario-c").await;
        let spec = ResourceSpec {
            name: "docs".into(),
            attributes: BTreeMap::from([("content".to_string(), leaf("string|required"))]),
            behavior: BehaviorKind::BodyOverflow,
            partitions: BTreeMap::new(),
            paranoid: true,
        };
        let docs = db.create_resource(spec).await.expect("create docs");

        let content = "x".repeat(4 * 1024);
        docs.insert(Some("d1".into()), BTreeMap::from([("content".to_string(), string(&content))]), db.id(), no_deps())
            .await
            .expect("insert d1");

        let fetched = docs.get("d1", false).await.expect("get").expect("present");
        assert_eq!(fetched.get("content"), Some(&string(&content)));
    }

    /// D. Schema upgrade coexistence.
    #[tokio::test]
    async fn test_scenario_d_schema_upgrade_coexistence() {
        let db = test_database("scenario-d").await;
        let v1 = ResourceSpec {
            name: "users".into(),
            attributes: BTreeMap::from([("name".to_string(), leaf("string|required"))]),
            behavior: BehaviorKind::UserManaged,
            partitions: BTreeMap::new(),
            paranoid: true,
        };
        let users_v1 = db.create_resource(v1).await.expect("create v1");
        let v1_hash = users_v1.schema_version().to_string();

        users_v1
            .insert(Some("u1".into()), BTreeMap::from([("name".to_string(), string("Alice"))]), db.id(), no_deps())
            .await
            .expect("insert u1");

        let v2 = ResourceSpec {
            name: "users".into(),
            attributes: BTreeMap::from([
                ("name".to_string(), leaf("string|required")),
                ("email".to_string(), leaf("string|optional")),
            ]),
            behavior: BehaviorKind::UserManaged,
            partitions: BTreeMap::new(),
            paranoid: true,
        };
        let users_v2 = db.upgrade_schema(v2).await.expect("upgrade to v2");
        assert_ne!(users_v2.schema_version(), v1_hash);

        let fetched = users_v2.get("u1", false).await.expect("get").expect("present");
        assert_eq!(fetched.get("name"), Some(&string("Alice")));
        assert!(fetched.get("email").is_none());
        assert_eq!(fetched.schema_version, v1_hash);

        let patched = users_v2.patch("u1", BTreeMap::from([("email".to_string(), string("x@y"))]), db.id(), no_deps()).await.expect("patch adds email");
        assert_eq!(patched.get("email"), Some(&string("x@y")));
        assert_eq!(patched.schema_version, users_v2.schema_version());
    }

    /// E. Concurrent inserts with an identical id: exactly one succeeds.
    #[tokio::test]
    async fn test_scenario_e_concurrent_inserts_same_id_exactly_one_wins() {
        let db = test_database("scenario-e").await;
        let resource = db.create_resource(simple_spec("things")).await.expect("create");

        let mut handles = Vec::new();
        for i in 0..50 {
            let resource = resource.clone();
            let database_id = db.id().to_string();
            handles.push(tokio::spawn(async move {
                resource
                    .insert(Some("k".into()), BTreeMap::from([("name".to_string(), Value::String(format!("n{i}")))]), &database_id, no_deps())
                    .await
            }));
        }

        let mut successes = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.expect("task panicked") {
                Ok(_) => successes += 1,
                Err(EngineError::Conflict { .. }) => conflicts += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(conflicts, 49);

        let stored = resource.get("k", false).await.expect("get").expect("present");
        assert!(stored.get("name").is_some());
    }

    /// F. Paranoid delete + restore.
    #[tokio::test]
    async fn test_scenario_f_paranoid_delete_then_restore_via_include_deleted() {
        let db = test_database("scenario-f").await;
        let resource = db.create_resource(simple_spec("things")).await.expect("create");

        resource.insert(Some("p1".into()), BTreeMap::from([("name".to_string(), string("Alice"))]), db.id(), no_deps()).await.expect("insert");
        resource.delete("p1", db.id(), no_deps()).await.expect("delete");

        let err = resource.get("p1", false).await.expect("get ok");
        assert!(err.is_none());

        let tombstoned = resource.get("p1", true).await.expect("get include_deleted").expect("tombstone present");
        assert!(tombstoned.is_tombstoned());
        assert!(tombstoned.deleted_at.is_some());

        let page = resource.list(PageOptions::default(), db.id(), no_deps()).await.expect("list");
        assert!(page.documents.iter().all(|d| d.id != "p1"));
    }
}
