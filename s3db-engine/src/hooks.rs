//! Resource hooks (`spec.md` §4.5, §9): `beforeInsert`/`afterInsert`,
//! `beforeUpdate`/`afterUpdate`, `beforeDelete`/`afterDelete`,
//! `beforeList`/`afterList`.
//!
//! Per the REDESIGN FLAGS, hooks use a uniform `Result`-returning
//! convention instead of exception-driven control flow: a hook either
//! mutates-and-returns-ok, or returns [`HookError::Abort`] to intentionally
//! short-circuit the operation, distinguished from [`HookError::Failed`]
//! (an unexpected bug in the hook itself).

use s3db_model::Document;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Context passed to every hook invocation: the database's user-supplied
/// dependency bag and a resource-scoped tracing span, per `spec.md` §4.5
/// ("context carries the database handle, a logger, and user-supplied
/// dependencies"). The database handle itself is an opaque id rather than
/// a pointer, per the REDESIGN FLAGS arena+index model: plugins/hooks that
/// need to call back into the database resolve it through the id via
/// whatever registry the host application maintains.
#[derive(Clone)]
pub struct HookContext {
    /// Owning resource name.
    pub resource: String,
    /// Opaque handle identifying the owning database, for hooks that need
    /// to resolve it through an external registry.
    pub database_id: String,
    /// User-supplied dependencies, injected at resource-creation time
    /// (e.g. a metrics client, a replication queue handle).
    pub dependencies: Arc<BTreeMap<String, serde_json::Value>>,
}

/// An error a hook may return to abort or fail the operation it guards.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    /// The hook intentionally short-circuited the operation (not a bug).
    #[error("{0}")]
    Abort(String),
    /// The hook failed unexpectedly.
    #[error("hook failed: {0}")]
    Failed(#[from] anyhow::Error),
}

/// A write hook: may mutate the candidate document attributes in place
/// and either allow the write to proceed or abort/fail it.
pub trait WriteHook: Send + Sync {
    /// Run the hook against `attributes`, mutating them in place.
    fn call(&self, attributes: &mut BTreeMap<String, s3db_model::Value>, ctx: &HookContext) -> Result<(), HookError>;
}

/// A post-write hook: observes the stored document; cannot mutate it.
pub trait AfterWriteHook: Send + Sync {
    /// Observe the stored document. Returning `Err` surfaces a warning but
    /// never rolls back the already-committed write.
    fn call(&self, doc: &Document, ctx: &HookContext) -> Result<(), HookError>;
}

/// A delete hook, observing the document about to be removed/tombstoned.
pub trait DeleteHook: Send + Sync {
    /// Run the hook. Returning `Err(HookError::Abort)` cancels the delete.
    fn call(&self, doc: &Document, ctx: &HookContext) -> Result<(), HookError>;
}

/// A list hook: observes and may filter/reorder a page of documents.
pub trait ListHook: Send + Sync {
    /// Run the hook against the page, mutating it in place.
    fn call(&self, page: &mut Vec<Document>, ctx: &HookContext) -> Result<(), HookError>;
}

/// The ordered hook chains registered for one resource.
#[derive(Default)]
pub struct HookRegistry {
    before_insert: Vec<Box<dyn WriteHook>>,
    after_insert: Vec<Box<dyn AfterWriteHook>>,
    before_update: Vec<Box<dyn WriteHook>>,
    after_update: Vec<Box<dyn AfterWriteHook>>,
    before_delete: Vec<Box<dyn DeleteHook>>,
    after_delete: Vec<Box<dyn AfterWriteHook>>,
    before_list: Vec<Box<dyn ListHook>>,
    after_list: Vec<Box<dyn ListHook>>,
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("before_insert", &self.before_insert.len())
            .field("after_insert", &self.after_insert.len())
            .field("before_update", &self.before_update.len())
            .field("after_update", &self.after_update.len())
            .field("before_delete", &self.before_delete.len())
            .field("after_delete", &self.after_delete.len())
            .field("before_list", &self.before_list.len())
            .field("after_list", &self.after_list.len())
            .finish()
    }
}

impl HookRegistry {
    /// Register a `beforeInsert` hook, run in registration order.
    pub fn on_before_insert(&mut self, hook: impl WriteHook + 'static) -> &mut Self {
        self.before_insert.push(Box::new(hook));
        self
    }

    /// Register an `afterInsert` hook.
    pub fn on_after_insert(&mut self, hook: impl AfterWriteHook + 'static) -> &mut Self {
        self.after_insert.push(Box::new(hook));
        self
    }

    /// Register a `beforeUpdate` hook (also run for `patch`).
    pub fn on_before_update(&mut self, hook: impl WriteHook + 'static) -> &mut Self {
        self.before_update.push(Box::new(hook));
        self
    }

    /// Register an `afterUpdate` hook.
    pub fn on_after_update(&mut self, hook: impl AfterWriteHook + 'static) -> &mut Self {
        self.after_update.push(Box::new(hook));
        self
    }

    /// Register a `beforeDelete` hook.
    pub fn on_before_delete(&mut self, hook: impl DeleteHook + 'static) -> &mut Self {
        self.before_delete.push(Box::new(hook));
        self
    }

    /// Register an `afterDelete` hook.
    pub fn on_after_delete(&mut self, hook: impl AfterWriteHook + 'static) -> &mut Self {
        self.after_delete.push(Box::new(hook));
        self
    }

    /// Register a `beforeList` hook.
    pub fn on_before_list(&mut self, hook: impl ListHook + 'static) -> &mut Self {
        self.before_list.push(Box::new(hook));
        self
    }

    /// Register an `afterList` hook.
    pub fn on_after_list(&mut self, hook: impl ListHook + 'static) -> &mut Self {
        self.after_list.push(Box::new(hook));
        self
    }

    pub(crate) fn run_before_insert(
        &self,
        attributes: &mut BTreeMap<String, s3db_model::Value>,
        ctx: &HookContext,
    ) -> Result<(), HookError> {
        for hook in &self.before_insert {
            hook.call(attributes, ctx)?;
        }
        Ok(())
    }

    pub(crate) fn run_after_insert(&self, doc: &Document, ctx: &HookContext) {
        run_after(&self.after_insert, doc, ctx);
    }

    pub(crate) fn run_before_update(
        &self,
        attributes: &mut BTreeMap<String, s3db_model::Value>,
        ctx: &HookContext,
    ) -> Result<(), HookError> {
        for hook in &self.before_update {
            hook.call(attributes, ctx)?;
        }
        Ok(())
    }

    pub(crate) fn run_after_update(&self, doc: &Document, ctx: &HookContext) {
        run_after(&self.after_update, doc, ctx);
    }

    pub(crate) fn run_before_delete(&self, doc: &Document, ctx: &HookContext) -> Result<(), HookError> {
        for hook in &self.before_delete {
            hook.call(doc, ctx)?;
        }
        Ok(())
    }

    pub(crate) fn run_after_delete(&self, doc: &Document, ctx: &HookContext) {
        run_after(&self.after_delete, doc, ctx);
    }

    pub(crate) fn run_before_list(&self, page: &mut Vec<Document>, ctx: &HookContext) -> Result<(), HookError> {
        for hook in &self.before_list {
            hook.call(page, ctx)?;
        }
        Ok(())
    }

    pub(crate) fn run_after_list(&self, page: &mut Vec<Document>, ctx: &HookContext) -> Result<(), HookError> {
        for hook in &self.after_list {
            hook.call(page, ctx)?;
        }
        Ok(())
    }
}

fn run_after(hooks: &[Box<dyn AfterWriteHook>], doc: &Document, ctx: &HookContext) {
    for hook in hooks {
        if let Err(err) = hook.call(doc, ctx) {
            tracing::warn!(resource = %ctx.resource, error = %err, "after-hook reported an error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RejectEmptyName;
    impl WriteHook for RejectEmptyName {
        fn call(&self, attributes: &mut BTreeMap<String, s3db_model::Value>, _ctx: &HookContext) -> Result<(), HookError> {
            if matches!(attributes.get("name"), Some(s3db_model::Value::String(s)) if s.is_empty()) {
                return Err(HookError::Abort("name must not be empty".into()));
            }
            Ok(())
        }
    }

    struct Stamp;
    impl WriteHook for Stamp {
        fn call(&self, attributes: &mut BTreeMap<String, s3db_model::Value>, _ctx: &HookContext) -> Result<(), HookError> {
            attributes.insert("stamped".to_string(), s3db_model::Value::Bool(true));
            Ok(())
        }
    }

    fn ctx() -> HookContext {
        HookContext { resource: "orders".into(), database_id: "db1".into(), dependencies: Arc::new(BTreeMap::new()) }
    }

    #[test]
    fn test_should_run_before_insert_hooks_in_order_and_mutate() {
        let mut registry = HookRegistry::default();
        registry.on_before_insert(Stamp);
        let mut attrs = BTreeMap::new();
        registry.run_before_insert(&mut attrs, &ctx()).expect("ok");
        assert_eq!(attrs.get("stamped"), Some(&s3db_model::Value::Bool(true)));
    }

    #[test]
    fn test_should_abort_on_hook_rejection() {
        let mut registry = HookRegistry::default();
        registry.on_before_insert(RejectEmptyName);
        let mut attrs = BTreeMap::from([("name".to_string(), s3db_model::Value::String(String::new()))]);
        let err = registry.run_before_insert(&mut attrs, &ctx()).unwrap_err();
        assert!(matches!(err, HookError::Abort(_)));
    }
}
