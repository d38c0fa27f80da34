//! redb table definitions for the fleet status store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized records).

use redb::TableDefinition;

/// Host status records keyed by `{hostname}`.
pub const HOST_STATUS: TableDefinition<&str, &[u8]> = TableDefinition::new("host_status");

/// Application status records keyed by `{tenant}:{instance}`.
pub const APPLICATION_STATUS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("application_status");
