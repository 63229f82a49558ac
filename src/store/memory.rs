//! In-process storage
//!
//! Tables live behind one async mutex. Autocommit operations take the lock
//! per call; a transaction takes it for its whole lifetime and works on a
//! copy that replaces the tables on commit. Transactions are therefore fully
//! serialized, which is stricter than what a relational store gives but
//! keeps the conditional-update semantics identical.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::{
    ColumnUpdate, Database, Filter, OnConflict, Row, Session, StoreError, TableSchema,
    Transaction, Value,
};

type Tables = HashMap<&'static str, Vec<Row>>;

/// Pending fault injected by tests: table, then updates to let through first
type Fault = Arc<Mutex<Option<(&'static str, usize)>>>;

fn unknown_field(table: &TableSchema, field: &str) -> StoreError {
    StoreError::Corrupt {
        table: table.name.to_string(),
        detail: format!("unknown field '{}'", field),
    }
}

fn check_filter(table: &TableSchema, filter: &Filter) -> Result<(), StoreError> {
    for c in filter.conditions() {
        if table.column(c.field()).is_none() {
            return Err(unknown_field(table, c.field()));
        }
    }
    Ok(())
}

fn select(tables: &Tables, table: &TableSchema, filter: &Filter) -> Result<Vec<Row>, StoreError> {
    check_filter(table, filter)?;
    Ok(tables
        .get(table.name)
        .map(|rows| rows.iter().filter(|r| filter.matches(r)).cloned().collect())
        .unwrap_or_default())
}

fn insert(
    tables: &mut Tables,
    table: &TableSchema,
    row: &Row,
    on_conflict: OnConflict,
) -> Result<u64, StoreError> {
    if let Some((field, _)) = row.iter().find(|(f, _)| table.column(f).is_none()) {
        return Err(unknown_field(table, field));
    }
    let identity = match row.get(table.identity) {
        Some(v) if *v != Value::Null => v.clone(),
        _ => {
            return Err(StoreError::Corrupt {
                table: table.name.to_string(),
                detail: format!("missing identity field '{}'", table.identity),
            });
        }
    };

    let rows = tables.entry(table.name).or_default();
    if rows.iter().any(|r| r.get(table.identity) == Some(&identity)) {
        return match on_conflict {
            OnConflict::Ignore => Ok(0),
            OnConflict::Fail => Err(StoreError::UniqueViolation {
                table: table.name.to_string(),
                detail: format!("{} = {:?}", table.identity, identity),
            }),
        };
    }
    rows.push(row.clone());
    Ok(1)
}

fn update(
    tables: &mut Tables,
    table: &TableSchema,
    updates: &[ColumnUpdate],
    filter: &Filter,
) -> Result<u64, StoreError> {
    check_filter(table, filter)?;
    if let Some(u) = updates.iter().find(|u| table.column(u.field).is_none()) {
        return Err(unknown_field(table, u.field));
    }
    let Some(rows) = tables.get_mut(table.name) else {
        return Ok(0);
    };

    let mut matched = 0;
    for row in rows.iter_mut().filter(|r| filter.matches(r)) {
        for u in updates {
            row.set(u.field, u.value.clone());
        }
        matched += 1;
    }
    Ok(matched)
}

fn take_fault(fault: &Fault, table: &TableSchema) -> Result<(), StoreError> {
    let mut slot = fault.lock().map_err(|_| StoreError::Poisoned)?;
    match slot.as_mut() {
        Some((name, skip)) if *name == table.name => {
            if *skip > 0 {
                *skip -= 1;
                return Ok(());
            }
            *slot = None;
            Err(StoreError::Database(format!(
                "injected failure on {}",
                table.name
            )))
        }
        _ => Ok(()),
    }
}

/// In-memory [`Database`]
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    tables: Arc<AsyncMutex<Tables>>,
    fault: Fault,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a table's committed rows
    pub async fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .lock()
            .await
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// Make the next update against `table` fail with a database error
    pub fn fail_next_update(&self, table: &'static str) {
        self.fail_update_after(table, 0);
    }

    /// Let `skip` updates against `table` through, then fail the next one
    pub fn fail_update_after(&self, table: &'static str, skip: usize) {
        if let Ok(mut slot) = self.fault.lock() {
            *slot = Some((table, skip));
        }
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    fn session(&self) -> Arc<dyn Session> {
        Arc::new(AutocommitSession {
            tables: self.tables.clone(),
            fault: self.fault.clone(),
        })
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        let guard = self.tables.clone().lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(MemoryTransaction {
            session: Arc::new(TxSession {
                scope: Mutex::new(Some(TxScope { guard, work })),
                fault: self.fault.clone(),
            }),
        }))
    }
}

struct AutocommitSession {
    tables: Arc<AsyncMutex<Tables>>,
    fault: Fault,
}

#[async_trait]
impl Session for AutocommitSession {
    async fn select(&self, table: &TableSchema, filter: &Filter) -> Result<Vec<Row>, StoreError> {
        let tables = self.tables.lock().await;
        select(&tables, table, filter)
    }

    async fn insert(
        &self,
        table: &TableSchema,
        row: &Row,
        on_conflict: OnConflict,
    ) -> Result<u64, StoreError> {
        let mut tables = self.tables.lock().await;
        insert(&mut tables, table, row, on_conflict)
    }

    async fn update(
        &self,
        table: &TableSchema,
        updates: &[ColumnUpdate],
        filter: &Filter,
    ) -> Result<u64, StoreError> {
        let mut tables = self.tables.lock().await;
        take_fault(&self.fault, table)?;
        update(&mut tables, table, updates, filter)
    }
}

struct TxScope {
    guard: OwnedMutexGuard<Tables>,
    work: Tables,
}

struct TxSession {
    scope: Mutex<Option<TxScope>>,
    fault: Fault,
}

impl TxSession {
    fn with_work<T>(
        &self,
        f: impl FnOnce(&mut Tables) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut scope = self.scope.lock().map_err(|_| StoreError::Poisoned)?;
        let scope = scope.as_mut().ok_or(StoreError::TransactionFinished)?;
        f(&mut scope.work)
    }

    fn finish(&self) -> Result<TxScope, StoreError> {
        self.scope
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .take()
            .ok_or(StoreError::TransactionFinished)
    }
}

#[async_trait]
impl Session for TxSession {
    async fn select(&self, table: &TableSchema, filter: &Filter) -> Result<Vec<Row>, StoreError> {
        self.with_work(|work| select(work, table, filter))
    }

    async fn insert(
        &self,
        table: &TableSchema,
        row: &Row,
        on_conflict: OnConflict,
    ) -> Result<u64, StoreError> {
        self.with_work(|work| insert(work, table, row, on_conflict))
    }

    async fn update(
        &self,
        table: &TableSchema,
        updates: &[ColumnUpdate],
        filter: &Filter,
    ) -> Result<u64, StoreError> {
        take_fault(&self.fault, table)?;
        self.with_work(|work| update(work, table, updates, filter))
    }
}

struct MemoryTransaction {
    session: Arc<TxSession>,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    fn session(&self) -> Arc<dyn Session> {
        self.session.clone()
    }

    async fn commit(&self) -> Result<(), StoreError> {
        let TxScope { mut guard, work } = self.session.finish()?;
        *guard = work;
        Ok(())
    }

    async fn rollback(&self) -> Result<(), StoreError> {
        self.session.finish().map(|_| ())
    }
}
