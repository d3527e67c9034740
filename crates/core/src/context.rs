//! Request-scoped context bound to the current worker thread.
//!
//! Requests are served thread-per-request: the inbound layer installs a
//! [`RequestContext`] on the worker thread, every component running on that
//! thread reads it through the associated functions below, and the guard
//! returned by [`RequestContext::install`] puts the previous context back when
//! the request ends (on every exit path, including panics and early returns).
//!
//! Worker threads are pooled, so nothing in here may outlive the guard that
//! installed it.
//!
//! ## Attributes
//!
//! Besides tenant and correlation id the context carries the well-known
//! idempotency attributes (idempotency key, command id, "store result" flag).
//! Attributes are keyed by [`AttributeScope`]: the enclosing request, or one
//! item of a batch request entered with [`RequestContext::enter_batch_item`],
//! so batch items never overwrite each other's flags.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::id::{CommandId, CorrelationId, TenantId};

thread_local! {
    static CURRENT: RefCell<RequestContext> = RefCell::new(RequestContext::default());
}

/// Key under which request attributes are stored.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum AttributeScope {
    /// The inbound request itself.
    Request,
    /// One sub-request of a batch, identified by its request id.
    BatchItem(u64),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Attributes {
    idempotency_key: Option<String>,
    command_id: Option<CommandId>,
    store_result: Option<bool>,
}

/// Per-request key/value state (tenant, correlation, idempotency attributes).
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    tenant_id: Option<TenantId>,
    correlation_id: Option<CorrelationId>,
    batch_item: Option<u64>,
    attributes: HashMap<AttributeScope, Attributes>,
}

impl RequestContext {
    pub fn new(tenant_id: TenantId) -> Self {
        Self {
            tenant_id: Some(tenant_id),
            ..Self::default()
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn tenant_id(&self) -> Option<&TenantId> {
        self.tenant_id.as_ref()
    }

    pub fn correlation_id(&self) -> Option<&CorrelationId> {
        self.correlation_id.as_ref()
    }

    fn scope(&self) -> AttributeScope {
        self.batch_item
            .map(AttributeScope::BatchItem)
            .unwrap_or(AttributeScope::Request)
    }

    fn attributes(&self) -> Option<&Attributes> {
        self.attributes.get(&self.scope())
    }

    fn attributes_mut(&mut self) -> &mut Attributes {
        let scope = self.scope();
        self.attributes.entry(scope).or_default()
    }

    // ── thread-bound access ────────────────────────────────────────────────

    /// Install `self` as the current thread's context.
    ///
    /// The returned guard restores whatever context was active before.
    #[must_use = "dropping the guard immediately uninstalls the context"]
    pub fn install(self) -> ContextGuard {
        let previous = CURRENT.with(|c| std::mem::replace(&mut *c.borrow_mut(), self));
        ContextGuard {
            previous: Some(previous),
        }
    }

    /// Clone of the current thread's context (empty if none installed).
    pub fn current() -> RequestContext {
        CURRENT.with(|c| c.borrow().clone())
    }

    pub fn current_tenant() -> Option<TenantId> {
        CURRENT.with(|c| c.borrow().tenant_id.clone())
    }

    pub fn current_correlation_id() -> Option<CorrelationId> {
        CURRENT.with(|c| c.borrow().correlation_id.clone())
    }

    /// Reset the current thread's context to empty.
    pub fn clear() {
        CURRENT.with(|c| *c.borrow_mut() = RequestContext::default());
    }

    /// Capture tenant, correlation and the idempotency key of the current
    /// attribute scope.
    pub fn snapshot() -> ContextSnapshot {
        CURRENT.with(|c| {
            let ctx = c.borrow();
            ContextSnapshot {
                tenant_id: ctx.tenant_id.clone(),
                correlation_id: ctx.correlation_id.clone(),
                idempotency_key: ctx.attributes().and_then(|a| a.idempotency_key.clone()),
            }
        })
    }

    /// Key subsequent attribute reads/writes by batch item `request_id`.
    ///
    /// The item's attributes are discarded when the guard drops.
    #[must_use = "dropping the guard immediately leaves the batch item"]
    pub fn enter_batch_item(request_id: u64) -> BatchItemGuard {
        let previous = CURRENT.with(|c| c.borrow_mut().batch_item.replace(request_id));
        BatchItemGuard {
            request_id,
            previous,
        }
    }

    pub fn current_scope() -> AttributeScope {
        CURRENT.with(|c| c.borrow().scope())
    }

    pub fn idempotency_key() -> Option<String> {
        CURRENT.with(|c| c.borrow().attributes().and_then(|a| a.idempotency_key.clone()))
    }

    pub fn set_idempotency_key(key: impl Into<String>) {
        let key = key.into();
        CURRENT.with(|c| c.borrow_mut().attributes_mut().idempotency_key = Some(key));
    }

    pub fn command_id() -> Option<CommandId> {
        CURRENT.with(|c| c.borrow().attributes().and_then(|a| a.command_id))
    }

    pub fn set_command_id(command_id: CommandId) {
        CURRENT.with(|c| c.borrow_mut().attributes_mut().command_id = Some(command_id));
    }

    /// `Some(true)`: the command's result still needs storing.
    /// `Some(false)`: the result was already stored (replayed request).
    pub fn store_result_flag() -> Option<bool> {
        CURRENT.with(|c| c.borrow().attributes().and_then(|a| a.store_result))
    }

    pub fn set_store_result_flag(store: bool) {
        CURRENT.with(|c| c.borrow_mut().attributes_mut().store_result = Some(store));
    }
}

/// Restores the previously installed context on drop.
#[derive(Debug)]
pub struct ContextGuard {
    previous: Option<RequestContext>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            // The thread-local may already be gone during thread teardown.
            let _ = CURRENT.try_with(|c| *c.borrow_mut() = previous);
        }
    }
}

/// Leaves a batch item on drop, discarding the item's attributes.
#[derive(Debug)]
pub struct BatchItemGuard {
    request_id: u64,
    previous: Option<u64>,
}

impl Drop for BatchItemGuard {
    fn drop(&mut self) {
        let _ = CURRENT.try_with(|c| {
            let mut ctx = c.borrow_mut();
            ctx.attributes
                .remove(&AttributeScope::BatchItem(self.request_id));
            ctx.batch_item = self.previous;
        });
    }
}

/// Tenant, correlation and idempotency key captured at one moment,
/// restorable later on the same or another thread.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextSnapshot {
    tenant_id: Option<TenantId>,
    correlation_id: Option<CorrelationId>,
    idempotency_key: Option<String>,
}

impl ContextSnapshot {
    pub fn tenant_id(&self) -> Option<&TenantId> {
        self.tenant_id.as_ref()
    }

    pub fn correlation_id(&self) -> Option<&CorrelationId> {
        self.correlation_id.as_ref()
    }

    pub fn idempotency_key(&self) -> Option<&str> {
        self.idempotency_key.as_deref()
    }

    /// Make this snapshot's tenant, correlation and idempotency key current.
    ///
    /// The key lands in the current attribute scope; the other attributes are
    /// left untouched. The guard puts the replaced values back.
    #[must_use = "dropping the guard immediately undoes the restore"]
    pub fn restore(&self) -> SnapshotGuard {
        let replaced = CURRENT.with(|c| {
            let mut ctx = c.borrow_mut();
            let tenant_id = std::mem::replace(&mut ctx.tenant_id, self.tenant_id.clone());
            let correlation_id =
                std::mem::replace(&mut ctx.correlation_id, self.correlation_id.clone());
            let idempotency_key = std::mem::replace(
                &mut ctx.attributes_mut().idempotency_key,
                self.idempotency_key.clone(),
            );
            ContextSnapshot {
                tenant_id,
                correlation_id,
                idempotency_key,
            }
        });
        SnapshotGuard {
            replaced: Some(replaced),
        }
    }
}

/// Puts back the values replaced by [`ContextSnapshot::restore`].
#[derive(Debug)]
pub struct SnapshotGuard {
    replaced: Option<ContextSnapshot>,
}

impl Drop for SnapshotGuard {
    fn drop(&mut self) {
        if let Some(replaced) = self.replaced.take() {
            let _ = CURRENT.try_with(|c| {
                let mut ctx = c.borrow_mut();
                ctx.tenant_id = replaced.tenant_id;
                ctx.correlation_id = replaced.correlation_id;
                ctx.attributes_mut().idempotency_key = replaced.idempotency_key;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant(id: &str) -> TenantId {
        TenantId::parse(id).unwrap()
    }

    #[test]
    fn install_restores_previous_context() {
        assert!(RequestContext::current_tenant().is_none());
        {
            let _outer = RequestContext::new(tenant("outer")).install();
            {
                let _inner = RequestContext::new(tenant("inner")).install();
                assert_eq!(RequestContext::current_tenant(), Some(tenant("inner")));
            }
            assert_eq!(RequestContext::current_tenant(), Some(tenant("outer")));
        }
        assert!(RequestContext::current_tenant().is_none());
    }

    #[test]
    fn snapshot_restore_swaps_tenant_correlation_and_key() {
        let _ctx = RequestContext::new(tenant("a"))
            .with_correlation_id(CorrelationId::new("c-a"))
            .install();
        RequestContext::set_idempotency_key("k1");
        let snap = RequestContext::snapshot();

        let _other = RequestContext::new(tenant("b")).install();
        RequestContext::set_idempotency_key("k2");
        RequestContext::set_store_result_flag(true);
        {
            let _restored = snap.restore();
            assert_eq!(RequestContext::current_tenant(), Some(tenant("a")));
            assert_eq!(
                RequestContext::current_correlation_id(),
                Some(CorrelationId::new("c-a"))
            );
            assert_eq!(RequestContext::idempotency_key().as_deref(), Some("k1"));
            assert_eq!(RequestContext::store_result_flag(), Some(true));
        }
        assert_eq!(RequestContext::current_tenant(), Some(tenant("b")));
        assert!(RequestContext::current_correlation_id().is_none());
        assert_eq!(RequestContext::idempotency_key().as_deref(), Some("k2"));
    }

    #[test]
    fn snapshot_keeps_a_batch_items_key_after_the_item_ends() {
        let _ctx = RequestContext::new(tenant("t")).install();
        let snap = {
            let _item = RequestContext::enter_batch_item(4);
            RequestContext::set_idempotency_key("item-4");
            RequestContext::snapshot()
        };
        assert_eq!(snap.idempotency_key(), Some("item-4"));
        assert_eq!(RequestContext::idempotency_key(), None);

        let restored = snap.restore();
        assert_eq!(RequestContext::idempotency_key().as_deref(), Some("item-4"));
        drop(restored);
        assert_eq!(RequestContext::idempotency_key(), None);
    }

    #[test]
    fn batch_items_do_not_share_attributes() {
        let _ctx = RequestContext::new(tenant("t")).install();
        RequestContext::set_store_result_flag(true);

        {
            let _item = RequestContext::enter_batch_item(1);
            assert_eq!(RequestContext::current_scope(), AttributeScope::BatchItem(1));
            assert_eq!(RequestContext::store_result_flag(), None);
            RequestContext::set_idempotency_key("item-1");
            RequestContext::set_store_result_flag(false);
            {
                let _nested = RequestContext::enter_batch_item(2);
                assert_eq!(RequestContext::idempotency_key(), None);
            }
            assert_eq!(RequestContext::idempotency_key().as_deref(), Some("item-1"));
            assert_eq!(RequestContext::store_result_flag(), Some(false));
        }

        assert_eq!(RequestContext::current_scope(), AttributeScope::Request);
        assert_eq!(RequestContext::store_result_flag(), Some(true));
        assert_eq!(RequestContext::idempotency_key(), None);
    }

    #[test]
    fn clear_drops_everything() {
        let _ctx = RequestContext::new(tenant("t")).install();
        RequestContext::set_command_id(CommandId::new(7));
        RequestContext::clear();
        assert!(RequestContext::current_tenant().is_none());
        assert!(RequestContext::command_id().is_none());
    }
}
