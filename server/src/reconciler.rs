//! Tenant object cache and the reconcile handler run by the syncer.

use std::collections::HashMap;

use serde_json::Value;
use syncer_core::{index_func, HandlerError, Indexers, ThreadSafeStore};

use crate::error::Result;
use crate::protocol::InputEvent;

/// Name of the index over `TenantObject::tenant`.
pub const TENANT_INDEX: &str = "tenant";

/// An object owned by a tenant.
#[derive(Debug, Clone, PartialEq)]
pub struct TenantObject {
    pub id: String,
    pub tenant: String,
    pub spec: Value,
}

/// Store shared between the input loop and the workers.
pub type TenantStore = ThreadSafeStore<TenantObject>;

/// Create an empty store with the tenant index registered.
pub fn tenant_store() -> TenantStore {
    let mut indexers: Indexers<TenantObject> = HashMap::new();
    indexers.insert(
        TENANT_INDEX.to_string(),
        index_func(|obj: &TenantObject| {
            if obj.tenant.is_empty() {
                Err("tenant must not be empty".to_string())
            } else {
                Ok(vec![obj.tenant.clone()])
            }
        }),
    );
    ThreadSafeStore::new(indexers)
}

/// Apply an input event to the store and return the key to sync.
pub fn apply(store: &TenantStore, event: InputEvent) -> Result<String> {
    match event {
        InputEvent::Upsert { id, tenant, spec } => {
            store.add(
                id.clone(),
                TenantObject {
                    id: id.clone(),
                    tenant,
                    spec,
                },
            )?;
            Ok(id)
        }
        InputEvent::Delete { id } => {
            store.delete(&id);
            Ok(id)
        }
    }
}

/// Bring the world in line with the cached object under `key`.
///
/// Objects with `"fail": true` in their spec fail on purpose so retry
/// behaviour can be observed from the command line.
pub async fn reconcile(store: TenantStore, key: String) -> std::result::Result<(), HandlerError> {
    let Some(obj) = store.get(&key) else {
        tracing::info!(key = %key, "Object removed; nothing to reconcile");
        return Ok(());
    };

    if obj.spec.get("fail").and_then(Value::as_bool) == Some(true) {
        return Err(HandlerError::new(format!("object {key} requested failure")));
    }

    let peers = store.index_keys(TENANT_INDEX, &obj.tenant)?;
    tracing::info!(
        key = %key,
        tenant = %obj.tenant,
        peers = peers.len(),
        "Reconciled object"
    );
    Ok(())
}
