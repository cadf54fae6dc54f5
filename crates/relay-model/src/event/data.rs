use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Column description attached to row-level changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    /// Source-native type name, when the extractor knows it.
    pub type_name: Option<String>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>) -> Self {
        ColumnSpec {
            name: name.into(),
            type_name: None,
        }
    }
}

/// One row-level delta inside a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RowChange {
    Insert {
        columns: Vec<ColumnSpec>,
        values: Vec<Value>,
    },
    Update {
        key_columns: Vec<ColumnSpec>,
        key_values: Vec<Value>,
        columns: Vec<ColumnSpec>,
        values: Vec<Value>,
    },
    Delete {
        key_columns: Vec<ColumnSpec>,
        key_values: Vec<Value>,
    },
}

/// One DBMS change unit: either a statement to replay as text or a set of
/// row-level deltas against a single table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DbmsData {
    Statement {
        default_schema: Option<String>,
        sql: String,
    },
    RowChange {
        schema: Option<String>,
        table: String,
        changes: Vec<RowChange>,
    },
}

impl DbmsData {
    pub fn statement(sql: impl Into<String>) -> Self {
        DbmsData::Statement {
            default_schema: None,
            sql: sql.into(),
        }
    }
}
