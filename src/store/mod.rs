//! Storage Collaborator
//!
//! The narrow contract the state machine and the payment repositories are
//! written against. Implementations only need to offer three primitives on a
//! [`Session`] (filtered select, insert with a conflict policy, update
//! conditioned on a filter) and a way to open a [`Transaction`].
//!
//! ```text
//! Database ──session()──▶ Session (autocommit)
//!    │
//!    └──begin()──▶ Transaction ──session()──▶ Session (tx scoped)
//!                      │
//!                      └── commit() / rollback()
//! ```
//!
//! Rows are untyped maps from logical field name to [`Value`]; the
//! [`schema::TableSchema`] maps logical fields to physical columns.

pub mod memory;
pub mod postgres;
pub mod schema;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

pub use crate::error::StoreError;
pub use schema::{ColumnSchema, ColumnType, TableSchema};

/// A single column value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Null,
    Int(i64),
    Text(String),
    Time(DateTime<Utc>),
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Time(v)
    }
}

impl From<Option<DateTime<Utc>>> for Value {
    fn from(v: Option<DateTime<Utc>>) -> Self {
        v.map(Value::Time).unwrap_or(Value::Null)
    }
}

/// One row, keyed by logical field name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row(BTreeMap<&'static str, Value>);

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter
    pub fn with(mut self, field: &'static str, value: impl Into<Value>) -> Self {
        self.0.insert(field, value.into());
        self
    }

    pub fn set(&mut self, field: &'static str, value: impl Into<Value>) {
        self.0.insert(field, value.into());
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn text(&self, field: &str) -> Option<&str> {
        match self.0.get(field) {
            Some(Value::Text(s)) => Some(s),
            _ => None,
        }
    }

    pub fn int(&self, field: &str) -> Option<i64> {
        match self.0.get(field) {
            Some(Value::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// `None` when the field is missing or not a timestamp; `Some(None)` for NULL.
    pub fn time(&self, field: &str) -> Option<Option<DateTime<Utc>>> {
        match self.0.get(field) {
            Some(Value::Time(t)) => Some(Some(*t)),
            Some(Value::Null) => Some(None),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Value)> {
        self.0.iter().map(|(k, v)| (*k, v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// WHERE predicate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Eq(&'static str, Value),
    In(&'static str, Vec<Value>),
}

impl Condition {
    pub fn field(&self) -> &'static str {
        match self {
            Condition::Eq(f, _) | Condition::In(f, _) => f,
        }
    }

    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Condition::Eq(field, expected) => match row.get(field) {
                Some(v) => v == expected,
                None => *expected == Value::Null,
            },
            Condition::In(field, values) => row.get(field).is_some_and(|v| values.contains(v)),
        }
    }
}

/// Conjunction of conditions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter(Vec<Condition>);

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: &'static str, value: impl Into<Value>) -> Self {
        self.0.push(Condition::Eq(field, value.into()));
        self
    }

    pub fn any_of(mut self, field: &'static str, values: Vec<Value>) -> Self {
        self.0.push(Condition::In(field, values));
        self
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.0.iter().all(|c| c.matches(row))
    }
}

/// `SET field = value`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnUpdate {
    pub field: &'static str,
    pub value: Value,
}

impl ColumnUpdate {
    pub fn new(field: &'static str, value: impl Into<Value>) -> Self {
        Self {
            field,
            value: value.into(),
        }
    }
}

/// What `insert` does when the identity already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnConflict {
    /// Fail with [`StoreError::UniqueViolation`]
    Fail,
    /// Leave the existing row untouched and report 0 rows affected
    Ignore,
}

/// Data access bound either to autocommit or to one open transaction
#[async_trait]
pub trait Session: Send + Sync {
    /// All rows matching `filter`, in insertion order
    async fn select(&self, table: &TableSchema, filter: &Filter) -> Result<Vec<Row>, StoreError>;

    /// Insert one row; returns rows affected (0 only with [`OnConflict::Ignore`])
    async fn insert(
        &self,
        table: &TableSchema,
        row: &Row,
        on_conflict: OnConflict,
    ) -> Result<u64, StoreError>;

    /// `UPDATE .. SET updates WHERE filter`; returns the number of matched rows
    async fn update(
        &self,
        table: &TableSchema,
        updates: &[ColumnUpdate],
        filter: &Filter,
    ) -> Result<u64, StoreError>;

    async fn select_first(
        &self,
        table: &TableSchema,
        filter: &Filter,
    ) -> Result<Option<Row>, StoreError> {
        Ok(self.select(table, filter).await?.into_iter().next())
    }
}

/// An open transaction. Dropping it without `commit` discards its writes.
#[async_trait]
pub trait Transaction: Send + Sync {
    fn session(&self) -> Arc<dyn Session>;

    async fn commit(&self) -> Result<(), StoreError>;

    async fn rollback(&self) -> Result<(), StoreError>;
}

/// Connection-level handle
#[async_trait]
pub trait Database: Send + Sync {
    /// Autocommit session
    fn session(&self) -> Arc<dyn Session>;

    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError>;
}
