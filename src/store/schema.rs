//! Table schema descriptors
//!
//! Maps logical field names to physical columns. Descriptors are plain
//! values built once at startup and shared by `Arc`.

use super::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    BigInt,
    Timestamp,
}

impl ColumnType {
    fn ddl(&self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT NOT NULL DEFAULT ''",
            ColumnType::BigInt => "BIGINT NOT NULL DEFAULT 0",
            ColumnType::Timestamp => "TIMESTAMPTZ NULL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    pub field: &'static str,
    pub db_name: &'static str,
    pub kind: ColumnType,
}

impl ColumnSchema {
    pub fn new(field: &'static str, db_name: &'static str, kind: ColumnType) -> Self {
        Self {
            field,
            db_name,
            kind,
        }
    }
}

/// One table: columns, the unique identity field and the state field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: &'static str,
    pub comment: &'static str,
    /// Auto-increment surrogate key (DDL only, never read or written)
    pub primary_key: &'static str,
    pub columns: Vec<ColumnSchema>,
    /// Unique business identity, e.g. the record id
    pub identity: &'static str,
    pub state: &'static str,
    /// Non-unique secondary indexes (logical field names)
    pub indexes: Vec<&'static str>,
    /// Fields fixed at insert; state changes may not write them
    pub immutable: Vec<&'static str>,
}

impl TableSchema {
    pub fn column(&self, field: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.field == field)
    }

    pub fn db_name(&self, field: &str) -> Result<&'static str, StoreError> {
        self.column(field)
            .map(|c| c.db_name)
            .ok_or_else(|| StoreError::Corrupt {
                table: self.name.to_string(),
                detail: format!("unknown field '{}'", field),
            })
    }

    /// PostgreSQL DDL: table plus secondary indexes
    pub fn create_table_sql(&self) -> Vec<String> {
        let mut cols = vec![format!("{} BIGSERIAL PRIMARY KEY", self.primary_key)];
        for c in &self.columns {
            if c.field == self.identity {
                cols.push(format!("{} TEXT NOT NULL UNIQUE", c.db_name));
            } else {
                cols.push(format!("{} {}", c.db_name, c.kind.ddl()));
            }
        }

        let mut stmts = vec![format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            self.name,
            cols.join(",\n    ")
        )];
        stmts.push(format!(
            "COMMENT ON TABLE {} IS '{}'",
            self.name,
            self.comment.replace('\'', "''")
        ));
        for field in &self.indexes {
            if let Some(col) = self.column(field) {
                stmts.push(format!(
                    "CREATE INDEX IF NOT EXISTS idx_{}_{} ON {} ({})",
                    self.name,
                    col.db_name.to_lowercase(),
                    self.name,
                    col.db_name
                ));
            }
        }
        stmts
    }
}
