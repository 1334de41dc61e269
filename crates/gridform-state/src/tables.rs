//! redb table definitions for the local cloud.
//!
//! Resource and node values are JSON-serialized into `&[u8]` columns.

use redb::TableDefinition;

/// Cloud resources keyed by `{kind}/{name}`.
pub const RESOURCES: TableDefinition<&str, &[u8]> = TableDefinition::new("resources");

/// Cluster nodes keyed by node name.
pub const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");

/// Monotonic id counters keyed by counter name.
pub const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

/// Node name keyed by the instance id it reports.
pub const NODE_BY_INSTANCE: TableDefinition<&str, &str> = TableDefinition::new("node_by_instance");
