//! StateStore — redb persistence for local cloud resources and nodes.
//!
//! Typed put/get/list/delete over the tables in [`crate::tables`]. Each call
//! runs in its own transaction; callers that need several calls to appear
//! atomic serialize them themselves (see [`crate::LocalCloud`]).

use std::path::Path;
use std::sync::Arc;

use gridform_core::{ClusterNode, Resource, kinds};
use redb::{Database, ReadableDatabase, ReadableTable};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "local cloud store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store.
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory local cloud store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(RESOURCES).map_err(map_err!(Table))?;
        txn.open_table(NODES).map_err(map_err!(Table))?;
        txn.open_table(NODE_BY_INSTANCE).map_err(map_err!(Table))?;
        txn.open_table(META).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Resources ──────────────────────────────────────────────────

    /// Insert or replace a resource under `{kind}/{name}`.
    pub fn put_resource(&self, resource: &Resource) -> StateResult<()> {
        let key = resource.key();
        let value = serde_json::to_vec(resource).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(RESOURCES).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "resource stored");
        Ok(())
    }

    pub fn get_resource(&self, kind: &str, name: &str) -> StateResult<Option<Resource>> {
        let key = format!("{kind}/{name}");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RESOURCES).map_err(map_err!(Table))?;
        let guard = table.get(key.as_str()).map_err(map_err!(Read))?;
        guard.map(|g| decode(g.value())).transpose()
    }

    /// All resources, ordered by key.
    pub fn list_resources(&self) -> StateResult<Vec<Resource>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RESOURCES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    /// Resources of one kind. Keys share the `{kind}/` prefix.
    pub fn list_resources_of_kind(&self, kind: &str) -> StateResult<Vec<Resource>> {
        let prefix = format!("{kind}/");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RESOURCES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.range::<&str>(prefix.as_str()..).map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(&prefix) {
                break;
            }
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    /// Delete a resource. Returns true if it existed.
    pub fn delete_resource(&self, kind: &str, name: &str) -> StateResult<bool> {
        let key = format!("{kind}/{name}");
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(RESOURCES).map_err(map_err!(Table))?;
            existed = table.remove(key.as_str()).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, existed, "resource deleted");
        Ok(existed)
    }

    // ── Nodes ──────────────────────────────────────────────────────

    /// Insert or replace a node and index it by its instance id.
    pub fn put_node(&self, node: &ClusterNode) -> StateResult<()> {
        let value = serde_json::to_vec(node).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut nodes = txn.open_table(NODES).map_err(map_err!(Table))?;
            nodes
                .insert(node.name.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            let mut index = txn.open_table(NODE_BY_INSTANCE).map_err(map_err!(Table))?;
            index
                .insert(node.external_id.as_str(), node.name.as_str())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    pub fn get_node(&self, name: &str) -> StateResult<Option<ClusterNode>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(NODES).map_err(map_err!(Table))?;
        let guard = table.get(name).map_err(map_err!(Read))?;
        guard.map(|g| decode(g.value())).transpose()
    }

    /// The node registered for an instance, if any.
    pub fn node_for_instance(&self, instance_id: &str) -> StateResult<Option<ClusterNode>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let index = txn.open_table(NODE_BY_INSTANCE).map_err(map_err!(Table))?;
        let Some(name) = index.get(instance_id).map_err(map_err!(Read))? else {
            return Ok(None);
        };
        let nodes = txn.open_table(NODES).map_err(map_err!(Table))?;
        let guard = nodes.get(name.value()).map_err(map_err!(Read))?;
        guard.map(|g| decode(g.value())).transpose()
    }

    pub fn list_nodes(&self) -> StateResult<Vec<ClusterNode>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(NODES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    /// Remove an `instance` resource together with the node it registered,
    /// in one transaction. Returns the removed node's name.
    pub fn remove_instance(&self, instance_id: &str) -> StateResult<Option<String>> {
        let key = format!("{}/{instance_id}", kinds::INSTANCE);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let node_name;
        {
            let mut index = txn.open_table(NODE_BY_INSTANCE).map_err(map_err!(Table))?;
            node_name = index
                .remove(instance_id)
                .map_err(map_err!(Write))?
                .map(|guard| guard.value().to_string());
            if let Some(name) = &node_name {
                let mut nodes = txn.open_table(NODES).map_err(map_err!(Table))?;
                nodes.remove(name.as_str()).map_err(map_err!(Write))?;
            }
            let mut resources = txn.open_table(RESOURCES).map_err(map_err!(Table))?;
            resources.remove(key.as_str()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(instance = %instance_id, node = ?node_name, "instance removed");
        Ok(node_name)
    }

    // ── Counters ───────────────────────────────────────────────────

    /// Increment and return the named counter. The first value is 1.
    pub fn next_seq(&self, counter: &str) -> StateResult<u64> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let next;
        {
            let mut table = txn.open_table(META).map_err(map_err!(Table))?;
            let current = table
                .get(counter)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value())
                .unwrap_or(0);
            next = current + 1;
            table.insert(counter, next).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(next)
    }
}
