//! redb table definitions for the Quarry node inventory.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain
//! types).

use redb::TableDefinition;

/// Node records keyed by hostname.
pub const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");

/// Application deployment targets keyed by `{tenant}.{application}.{instance}`.
pub const APPLICATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("applications");
