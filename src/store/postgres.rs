//! PostgreSQL storage
//!
//! SQL is generated from the [`TableSchema`] descriptors. State changes are
//! plain `UPDATE .. WHERE identity = $ AND state = $`; PostgreSQL reports
//! matched rows as affected, so an idempotent re-application still counts.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row as _};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::{
    ColumnType, ColumnUpdate, Condition, Database, Filter, OnConflict, Row, Session, StoreError,
    TableSchema, Transaction, Value,
};
use crate::config::DatabaseConfig;

fn push_value(qb: &mut QueryBuilder<'static, Postgres>, value: &Value) {
    match value {
        Value::Null => {
            qb.push("NULL");
        }
        Value::Int(v) => {
            qb.push_bind(*v);
        }
        Value::Text(v) => {
            qb.push_bind(v.clone());
        }
        Value::Time(v) => {
            qb.push_bind(*v);
        }
    }
}

fn push_where(
    qb: &mut QueryBuilder<'static, Postgres>,
    table: &TableSchema,
    filter: &Filter,
) -> Result<(), StoreError> {
    for (i, cond) in filter.conditions().iter().enumerate() {
        qb.push(if i == 0 { " WHERE " } else { " AND " });
        let col = table.db_name(cond.field())?;
        match cond {
            Condition::Eq(_, Value::Null) => {
                qb.push(col).push(" IS NULL");
            }
            Condition::Eq(_, v) => {
                qb.push(col).push(" = ");
                push_value(qb, v);
            }
            Condition::In(_, values) if values.is_empty() => {
                qb.push("FALSE");
            }
            Condition::In(_, values) => {
                qb.push(col).push(" IN (");
                for (j, v) in values.iter().enumerate() {
                    if j > 0 {
                        qb.push(", ");
                    }
                    push_value(qb, v);
                }
                qb.push(")");
            }
        }
    }
    Ok(())
}

/// Selects `table.columns` in declaration order; [`decode_row`] reads by position.
fn select_sql(
    table: &TableSchema,
    filter: &Filter,
) -> Result<QueryBuilder<'static, Postgres>, StoreError> {
    let cols: Vec<&str> = table.columns.iter().map(|c| c.db_name).collect();
    let mut qb = QueryBuilder::new(format!("SELECT {} FROM {}", cols.join(", "), table.name));
    push_where(&mut qb, table, filter)?;
    qb.push(format!(" ORDER BY {}", table.primary_key));
    Ok(qb)
}

fn insert_sql(
    table: &TableSchema,
    row: &Row,
    on_conflict: OnConflict,
) -> Result<QueryBuilder<'static, Postgres>, StoreError> {
    let mut cols = Vec::with_capacity(row.len());
    for (field, _) in row.iter() {
        cols.push(table.db_name(field)?);
    }
    let mut qb = QueryBuilder::new(format!(
        "INSERT INTO {} ({}) VALUES (",
        table.name,
        cols.join(", ")
    ));
    for (i, (_, v)) in row.iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        push_value(&mut qb, v);
    }
    qb.push(")");
    if on_conflict == OnConflict::Ignore {
        qb.push(format!(
            " ON CONFLICT ({}) DO NOTHING",
            table.db_name(table.identity)?
        ));
    }
    Ok(qb)
}

fn update_sql(
    table: &TableSchema,
    updates: &[ColumnUpdate],
    filter: &Filter,
) -> Result<QueryBuilder<'static, Postgres>, StoreError> {
    let mut qb = QueryBuilder::new(format!("UPDATE {} SET ", table.name));
    for (i, u) in updates.iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        qb.push(table.db_name(u.field)?).push(" = ");
        push_value(&mut qb, &u.value);
    }
    push_where(&mut qb, table, filter)?;
    Ok(qb)
}

/// Unquoted identifiers come back lowercased (`Fpay_id` as `fpay_id`),
/// so columns are matched by ordinal, never by name.
fn decode_row(table: &TableSchema, row: &PgRow) -> Result<Row, StoreError> {
    let mut out = Row::new();
    for (i, c) in table.columns.iter().enumerate() {
        let value = match c.kind {
            ColumnType::Text => row.try_get::<Option<String>, _>(i)?.map(Value::Text),
            ColumnType::BigInt => row.try_get::<Option<i64>, _>(i)?.map(Value::Int),
            ColumnType::Timestamp => row
                .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(i)?
                .map(Value::Time),
        };
        out.set(c.field, value.unwrap_or(Value::Null));
    }
    Ok(out)
}

/// PostgreSQL connection pool
#[derive(Clone)]
pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    pub async fn connect(config: &DatabaseConfig, url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(url)
            .await?;

        tracing::info!("PostgreSQL connection pool established");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// `CREATE TABLE IF NOT EXISTS` for every table
    pub async fn ensure_schema(&self, tables: &[&TableSchema]) -> Result<(), StoreError> {
        for table in tables {
            for stmt in table.create_table_sql() {
                sqlx::query(&stmt).execute(&self.pool).await?;
            }
            tracing::info!(table = table.name, "Table ensured");
        }
        Ok(())
    }
}

#[async_trait]
impl Database for PgDatabase {
    fn session(&self) -> Arc<dyn Session> {
        Arc::new(PoolSession {
            pool: self.pool.clone(),
        })
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction {
            session: Arc::new(TxSession {
                tx: Mutex::new(Some(tx)),
            }),
        }))
    }
}

struct PoolSession {
    pool: PgPool,
}

#[async_trait]
impl Session for PoolSession {
    async fn select(&self, table: &TableSchema, filter: &Filter) -> Result<Vec<Row>, StoreError> {
        let mut qb = select_sql(table, filter)?;
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(|r| decode_row(table, r)).collect()
    }

    async fn insert(
        &self,
        table: &TableSchema,
        row: &Row,
        on_conflict: OnConflict,
    ) -> Result<u64, StoreError> {
        let mut qb = insert_sql(table, row, on_conflict)?;
        Ok(qb.build().execute(&self.pool).await?.rows_affected())
    }

    async fn update(
        &self,
        table: &TableSchema,
        updates: &[ColumnUpdate],
        filter: &Filter,
    ) -> Result<u64, StoreError> {
        let mut qb = update_sql(table, updates, filter)?;
        Ok(qb.build().execute(&self.pool).await?.rows_affected())
    }
}

struct TxSession {
    tx: Mutex<Option<sqlx::Transaction<'static, Postgres>>>,
}

#[async_trait]
impl Session for TxSession {
    async fn select(&self, table: &TableSchema, filter: &Filter) -> Result<Vec<Row>, StoreError> {
        let mut qb = select_sql(table, filter)?;
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::TransactionFinished)?;
        let rows = qb.build().fetch_all(&mut **tx).await?;
        rows.iter().map(|r| decode_row(table, r)).collect()
    }

    async fn insert(
        &self,
        table: &TableSchema,
        row: &Row,
        on_conflict: OnConflict,
    ) -> Result<u64, StoreError> {
        let mut qb = insert_sql(table, row, on_conflict)?;
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::TransactionFinished)?;
        Ok(qb.build().execute(&mut **tx).await?.rows_affected())
    }

    async fn update(
        &self,
        table: &TableSchema,
        updates: &[ColumnUpdate],
        filter: &Filter,
    ) -> Result<u64, StoreError> {
        let mut qb = update_sql(table, updates, filter)?;
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::TransactionFinished)?;
        Ok(qb.build().execute(&mut **tx).await?.rows_affected())
    }
}

struct PgTransaction {
    session: Arc<TxSession>,
}

impl PgTransaction {
    async fn take(&self) -> Result<sqlx::Transaction<'static, Postgres>, StoreError> {
        self.session
            .tx
            .lock()
            .await
            .take()
            .ok_or(StoreError::TransactionFinished)
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    fn session(&self) -> Arc<dyn Session> {
        self.session.clone()
    }

    async fn commit(&self) -> Result<(), StoreError> {
        self.take().await?.commit().await?;
        Ok(())
    }

    async fn rollback(&self) -> Result<(), StoreError> {
        self.take().await?.rollback().await?;
        Ok(())
    }
}
