//! Payment Orchestration Service
//!
//! Composes reconciliation and the two state machines into the order-level
//! operations. Every multi-row change runs in one transaction; any error
//! rolls the whole operation back.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use super::reconcile::RecordSet;
use super::repository::{OrderRepository, RecordRepository};
use super::schema::{Schema, field};
use super::state::{OrderState, PayAction, RecordState};
use super::types::{CreateOrderIn, CreateRecordIn, PayIn, PayOrder, PaymentRecord, StateChangeIn};
use crate::error::{PaymentError, Result};
use crate::fsm::run_in_transaction;
use crate::store::{ColumnUpdate, Database, Filter, Session};

pub struct PaymentService {
    database: Arc<dyn Database>,
    orders: OrderRepository,
    records: RecordRepository,
}

impl PaymentService {
    pub fn new(schema: &Schema, database: Arc<dyn Database>) -> Self {
        Self {
            orders: OrderRepository::new(schema, database.clone()),
            records: RecordRepository::new(schema, database.clone()),
            database,
        }
    }

    pub fn orders(&self) -> &OrderRepository {
        &self.orders
    }

    pub fn records(&self) -> &RecordRepository {
        &self.records
    }

    fn bind(&self, session: Arc<dyn Session>) -> (OrderRepository, RecordRepository) {
        (
            self.orders.with_session(session.clone()),
            self.records.with_session(session),
        )
    }

    /// Create the order row if absent. Returns whether it was created.
    pub async fn create_order(&self, input: CreateOrderIn) -> Result<bool> {
        input.validate()?;
        let order = PayOrder::new(&input, Utc::now());
        let order = &order;

        run_in_transaction(self.database.as_ref(), |session| async move {
            let (orders, _) = self.bind(session);
            if let Some(existing) = orders.get(&order.order_id).await? {
                if existing.order_amount != order.order_amount {
                    return Err(PaymentError::AmountInconsistency {
                        order_id: order.order_id.clone(),
                        committed: existing.order_amount,
                        requested: order.order_amount,
                    });
                }
                return Ok(false);
            }
            orders.insert_if_absent(order).await
        })
        .await
    }

    /// Single-request form of [`Self::create_records`]
    pub async fn create_record(&self, input: CreateRecordIn) -> Result<String> {
        self.create_records(vec![input])
            .await?
            .pop()
            .ok_or_else(|| PaymentError::Persistence("record was not created".to_string()))
    }

    /// Create pending records for one order, all or nothing.
    ///
    /// Every request is checked against the stored records plus the requests
    /// accepted before it. The order row is inserted if absent and locked
    /// before the records are read, so concurrent creators of one order
    /// check against each other's committed records. Returns the record ids
    /// in request order.
    pub async fn create_records(&self, inputs: Vec<CreateRecordIn>) -> Result<Vec<String>> {
        let Some(first) = inputs.first() else {
            return Err(PaymentError::validation("no payment records to create"));
        };

        let now = Utc::now();
        let mut pending = Vec::with_capacity(inputs.len());
        for input in &inputs {
            let channel = input.validate()?;
            if input.order_id != first.order_id {
                return Err(PaymentError::validation(format!(
                    "records of one request must share order {}, got {}",
                    first.order_id, input.order_id
                )));
            }
            pending.push(PaymentRecord::pending(input, channel, now));
        }
        let order = PayOrder::new(&CreateOrderIn::from(first), now);
        let (order, pending) = (&order, &pending);

        let ids = run_in_transaction(self.database.as_ref(), |session| async move {
            let (orders, records) = self.bind(session);
            let order_id = order.order_id.as_str();

            orders.insert_if_absent(order).await?;
            let existing = orders.get_must(order_id).await?;
            orders.machine().lock(order_id, existing.state).await?;
            if existing.state == OrderState::Closed {
                return Err(PaymentError::validation(format!(
                    "order {} is closed",
                    order_id
                )));
            }
            if existing.order_amount != order.order_amount {
                return Err(PaymentError::AmountInconsistency {
                    order_id: order_id.to_string(),
                    committed: existing.order_amount,
                    requested: order.order_amount,
                });
            }

            let mut set = records.get_by_order(order_id).await?;
            for record in pending {
                set.check_creatable(order_id, record.order_amount, record.pay_amount)?;
                set.push(record.clone());
            }

            for record in pending {
                records.insert(record).await?;
            }
            Ok(pending
                .iter()
                .map(|r| r.record_id.clone())
                .collect::<Vec<_>>())
        })
        .await?;

        info!(order_id = %order.order_id, count = ids.len(), "Payment records accepted");
        Ok(ids)
    }

    /// Mark a record paid. Returns whether the order is now fully paid.
    ///
    /// The order row is locked before the records are summed, so of two
    /// concurrent final payments the later one sees the earlier and moves the
    /// order row to paid in its own transaction. A failed record pays again
    /// only if the order still has room for its amount.
    pub async fn pay(&self, input: PayIn) -> Result<bool> {
        if input.record_id.is_empty() {
            return Err(PaymentError::validation("record id must not be empty"));
        }
        let input = &input;

        let finished = run_in_transaction(self.database.as_ref(), |session| async move {
            let (orders, records) = self.bind(session);
            let record = records.get_must(&input.record_id).await?;
            let order = orders.get(&record.order_id).await?;
            let record = match &order {
                Some(order) => {
                    // a closed order accepts no more money
                    orders
                        .machine()
                        .check(&order.order_id, order.state, PayAction::Pay)?;
                    orders.machine().lock(&order.order_id, order.state).await?;
                    records.get_must(&input.record_id).await?
                }
                None => record,
            };

            if record.state == RecordState::Failed {
                let total = order.as_ref().map_or(record.order_amount, |o| o.order_amount);
                records
                    .get_by_order(&record.order_id)
                    .await?
                    .check_creatable(&record.order_id, total, record.pay_amount)?;
            }

            let now = Utc::now();
            let mut updates = Vec::new();
            if record.paid_at.is_none() {
                updates.push(ColumnUpdate::new(field::PAID_AT, now));
            }
            if let Some(remark) = &input.remark {
                updates.push(ColumnUpdate::new(field::REMARK, remark.as_str()));
            }
            updates.extend(input.extra.iter().cloned());
            records
                .machine()
                .transform(PayAction::Pay, record.state, &record.record_id, updates)
                .await?;

            let finished = records
                .get_by_order(&record.order_id)
                .await?
                .is_pay_finished()?;
            if finished && let Some(order) = order {
                let mut updates = Vec::new();
                if order.paid_at.is_none() {
                    updates.push(ColumnUpdate::new(field::PAID_AT, now));
                }
                orders
                    .machine()
                    .transform(PayAction::Pay, order.state, &order.order_id, updates)
                    .await?;
            }
            Ok(finished)
        })
        .await?;

        info!(record_id = %input.record_id, finished, "Payment applied");
        Ok(finished)
    }

    /// Close the order and every open record of it, all or nothing.
    ///
    /// Records already closed, expired or failed are skipped. Any other
    /// record that cannot be closed (e.g. paid) aborts the operation with
    /// `StateTransitionDenied` naming that record. Returns the ids of the
    /// records closed.
    pub async fn close_order(&self, order_id: &str, reason: &str) -> Result<Vec<String>> {
        let closed = run_in_transaction(self.database.as_ref(), |session| async move {
            let (orders, records) = self.bind(session);
            let order = orders.get_must(order_id).await?;
            orders
                .machine()
                .check(order_id, order.state, PayAction::Close)?;
            orders.machine().lock(order_id, order.state).await?;

            let set = records.get_by_order(order_id).await?;
            let open: Vec<&PaymentRecord> = set
                .records()
                .iter()
                .filter(|r| !r.state.is_dead())
                .collect();
            for r in &open {
                records
                    .machine()
                    .check(&r.record_id, r.state, PayAction::Close)
                    .inspect_err(|_| {
                        warn!(order_id = %order_id, record_id = %r.record_id, state = %r.state, "Record blocks order close");
                    })?;
            }

            let now = Utc::now();
            let mut updates = vec![ColumnUpdate::new(field::REMARK, reason)];
            if order.closed_at.is_none() {
                updates.push(ColumnUpdate::new(field::CLOSED_AT, now));
            }
            orders
                .machine()
                .transform(PayAction::Close, order.state, order_id, updates)
                .await?;

            for r in &open {
                let updates = vec![
                    ColumnUpdate::new(field::CLOSED_AT, now),
                    ColumnUpdate::new(field::REMARK, reason),
                ];
                records
                    .machine()
                    .transform(PayAction::Close, r.state, &r.record_id, updates)
                    .await?;
            }
            Ok(open.iter().map(|r| r.record_id.clone()).collect::<Vec<_>>())
        })
        .await?;

        info!(order_id = %order_id, records = closed.len(), "Order closed");
        Ok(closed)
    }

    async fn change_record(
        &self,
        action: PayAction,
        stamp: &'static str,
        input: StateChangeIn,
    ) -> Result<()> {
        if input.record_id.is_empty() {
            return Err(PaymentError::validation("record id must not be empty"));
        }
        let mut updates = vec![
            ColumnUpdate::new(stamp, Utc::now()),
            ColumnUpdate::new(field::REMARK, input.reason.as_str()),
        ];
        updates.extend(input.extra);
        self.records
            .machine()
            .transform_by_identity(action, &input.record_id, updates)
            .await?;
        Ok(())
    }

    pub async fn close_record(&self, input: StateChangeIn) -> Result<()> {
        self.change_record(PayAction::Close, field::CLOSED_AT, input)
            .await
    }

    pub async fn expire_record(&self, input: StateChangeIn) -> Result<()> {
        self.change_record(PayAction::Expire, field::EXPIRED_AT, input)
            .await
    }

    pub async fn fail_record(&self, input: StateChangeIn) -> Result<()> {
        self.change_record(PayAction::Fail, field::FAILED_AT, input)
            .await
    }

    pub async fn get_record(&self, record_id: &str) -> Result<PaymentRecord> {
        self.records.get_must(record_id).await
    }

    pub async fn get_records_by_order(&self, order_id: &str) -> Result<Vec<PaymentRecord>> {
        Ok(self.records.get_by_order(order_id).await?.into_records())
    }

    /// Records matching an arbitrary filter over logical fields
    pub async fn find_records(&self, filter: &Filter) -> Result<Vec<PaymentRecord>> {
        self.records.find(filter).await
    }

    /// Records that count towards the order amount (pending or paid)
    pub async fn order_pay_info(&self, order_id: &str) -> Result<Vec<PaymentRecord>> {
        Ok(self
            .records
            .get_by_order(order_id)
            .await?
            .effective()
            .into_records())
    }

    pub async fn get_order(&self, order_id: &str) -> Result<PayOrder> {
        self.orders.get_must(order_id).await
    }

    async fn order_with_records(&self, order_id: &str) -> Result<(PayOrder, RecordSet)> {
        let order = self.orders.get_must(order_id).await?;
        let records = self.records.get_by_order(order_id).await?;
        Ok((order, records))
    }

    /// Amount still available for new records of the order
    pub async fn remaining_creatable(&self, order_id: &str) -> Result<i64> {
        let (order, records) = self.order_with_records(order_id).await?;
        records.remaining_creatable(order.order_amount)
    }

    /// Paid records cover the order total
    pub async fn is_order_paid(&self, order_id: &str) -> Result<bool> {
        let (order, records) = self.order_with_records(order_id).await?;
        records.is_paid_against(order.order_amount)
    }
}
