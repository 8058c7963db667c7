pub mod coordinator;
pub mod entities;
pub mod error;
pub mod index;
pub mod log;
pub mod maintenance;
pub mod read;
pub mod relations;
pub mod saga;
pub mod types;

use rusqlite::types::Type;
use std::collections::BTreeSet;

/// Serialize a string set into the JSON array stored in TEXT columns.
pub(crate) fn encode_set(set: &BTreeSet<String>) -> serde_json::Result<String> {
    serde_json::to_string(set)
}

/// Read a JSON array column back into a set. Used inside rusqlite row mappers,
/// so decode failures surface as conversion errors on that column.
pub(crate) fn decode_set(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<BTreeSet<String>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}
