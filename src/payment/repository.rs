//! Order and record repositories
//!
//! Typed access to `pay_order` / `pay_record`. Each repository owns the
//! state machine of its table; `with_session` rebinds both to a transaction.

use std::sync::Arc;
use tracing::{debug, info};

use super::reconcile::RecordSet;
use super::schema::{PAY_ORDER_TABLE, PAY_RECORD_TABLE, Schema, field};
use super::state::{OrderState, PayAction, RecordState, order_actions, record_actions};
use super::types::{PayOrder, PaymentRecord};
use crate::error::{PaymentError, Result};
use crate::fsm::StateMachine;
use crate::store::{Database, Filter, OnConflict, Session, TableSchema};

pub type OrderMachine = StateMachine<OrderState, PayAction>;
pub type RecordMachine = StateMachine<RecordState, PayAction>;

#[derive(Clone)]
pub struct OrderRepository {
    machine: OrderMachine,
}

impl OrderRepository {
    pub fn new(schema: &Schema, database: Arc<dyn Database>) -> Self {
        Self {
            machine: StateMachine::new(
                Arc::new(order_actions()),
                schema.pay_order.clone(),
                database,
            ),
        }
    }

    pub fn with_session(&self, session: Arc<dyn Session>) -> Self {
        Self {
            machine: self.machine.with_session(session),
        }
    }

    pub fn machine(&self) -> &OrderMachine {
        &self.machine
    }

    fn table(&self) -> &TableSchema {
        self.machine.table()
    }

    /// Insert-only upsert; returns whether a row was written
    pub async fn insert_if_absent(&self, order: &PayOrder) -> Result<bool> {
        let rows = self
            .machine
            .session()
            .insert(self.table(), &order.to_row(), OnConflict::Ignore)
            .await?;
        if rows > 0 {
            info!(order_id = %order.order_id, amount = order.order_amount, "Order created");
        }
        Ok(rows > 0)
    }

    pub async fn get(&self, order_id: &str) -> Result<Option<PayOrder>> {
        let filter = Filter::new().eq(field::ORDER_ID, order_id);
        let row = self
            .machine
            .session()
            .select_first(self.table(), &filter)
            .await?;
        debug!(order_id = %order_id, found = row.is_some(), "Loaded order");
        Ok(row.as_ref().map(PayOrder::from_row).transpose()?)
    }

    pub async fn get_must(&self, order_id: &str) -> Result<PayOrder> {
        self.get(order_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound {
                entity: PAY_ORDER_TABLE,
                identity: order_id.to_string(),
            })
    }
}

#[derive(Clone)]
pub struct RecordRepository {
    machine: RecordMachine,
}

impl RecordRepository {
    pub fn new(schema: &Schema, database: Arc<dyn Database>) -> Self {
        Self {
            machine: StateMachine::new(
                Arc::new(record_actions()),
                schema.pay_record.clone(),
                database,
            ),
        }
    }

    pub fn with_session(&self, session: Arc<dyn Session>) -> Self {
        Self {
            machine: self.machine.with_session(session),
        }
    }

    pub fn machine(&self) -> &RecordMachine {
        &self.machine
    }

    fn table(&self) -> &TableSchema {
        self.machine.table()
    }

    /// Fails with a validation error if the record id exists
    pub async fn insert(&self, record: &PaymentRecord) -> Result<()> {
        self.machine
            .session()
            .insert(self.table(), &record.to_row(), OnConflict::Fail)
            .await?;
        info!(
            record_id = %record.record_id,
            order_id = %record.order_id,
            amount = record.pay_amount,
            channel = %record.channel,
            "Payment record created"
        );
        Ok(())
    }

    pub async fn get(&self, record_id: &str) -> Result<Option<PaymentRecord>> {
        let filter = Filter::new().eq(field::PAY_ID, record_id);
        let row = self
            .machine
            .session()
            .select_first(self.table(), &filter)
            .await?;
        debug!(record_id = %record_id, found = row.is_some(), "Loaded payment record");
        Ok(row.as_ref().map(PaymentRecord::from_row).transpose()?)
    }

    pub async fn get_must(&self, record_id: &str) -> Result<PaymentRecord> {
        self.get(record_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound {
                entity: PAY_RECORD_TABLE,
                identity: record_id.to_string(),
            })
    }

    pub async fn get_by_order(&self, order_id: &str) -> Result<RecordSet> {
        let records = self.find(&Filter::new().eq(field::ORDER_ID, order_id)).await?;
        debug!(order_id = %order_id, count = records.len(), "Loaded payment records");
        Ok(RecordSet::new(records))
    }

    /// Records matching `filter`, in creation order
    pub async fn find(&self, filter: &Filter) -> Result<Vec<PaymentRecord>> {
        if filter.is_empty() {
            return Err(PaymentError::validation(
                "refusing to load every payment record without a filter",
            ));
        }
        let rows = self.machine.session().select(self.table(), filter).await?;
        Ok(rows
            .iter()
            .map(PaymentRecord::from_row)
            .collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub async fn find_first(&self, filter: &Filter) -> Result<Option<PaymentRecord>> {
        Ok(self.find(filter).await?.into_iter().next())
    }
}
