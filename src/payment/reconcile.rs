//! Amount Reconciliation
//!
//! Pure functions over the records of ONE order. No I/O.
//!
//! ```text
//! effective  = records in {pending, paid}
//! order total = order_amount of the first effective record
//! remaining  = total - (paid + pending)
//! ```

use crate::error::{PaymentError, Result};

use super::state::RecordState;
use super::types::PaymentRecord;

/// Snapshot of all records of one order, in creation order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordSet {
    records: Vec<PaymentRecord>,
}

impl RecordSet {
    pub fn new(records: Vec<PaymentRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[PaymentRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<PaymentRecord> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn push(&mut self, record: PaymentRecord) {
        self.records.push(record);
    }

    pub fn filter_by_state<'a>(
        &'a self,
        states: &'a [RecordState],
    ) -> impl Iterator<Item = &'a PaymentRecord> + 'a {
        self.records.iter().filter(move |r| states.contains(&r.state))
    }

    /// Records in {pending, paid}
    pub fn effective(&self) -> RecordSet {
        RecordSet::new(
            self.records
                .iter()
                .filter(|r| r.state.is_effective())
                .cloned()
                .collect(),
        )
    }

    /// Order total as committed by the first effective record
    pub fn effective_amount(&self) -> Option<i64> {
        self.records
            .iter()
            .find(|r| r.state.is_effective())
            .map(|r| r.order_amount)
    }

    fn sum(&self, state: RecordState) -> Result<i64> {
        self.filter_by_state(&[state]).try_fold(0i64, |acc, r| {
            acc.checked_add(r.pay_amount).ok_or_else(|| {
                PaymentError::validation(format!(
                    "{} amount of order {} overflows",
                    state, r.order_id
                ))
            })
        })
    }

    pub fn paid_amount(&self) -> Result<i64> {
        self.sum(RecordState::Paid)
    }

    pub fn pending_amount(&self) -> Result<i64> {
        self.sum(RecordState::Pending)
    }

    fn committed_amount(&self) -> Result<i64> {
        self.paid_amount()?
            .checked_add(self.pending_amount()?)
            .ok_or_else(|| PaymentError::validation("paid + pending amount overflows"))
    }

    /// Paid amount covers the order total. An empty set is vacuously finished.
    pub fn is_pay_finished(&self) -> Result<bool> {
        if self.records.is_empty() {
            return Ok(true);
        }
        Ok(self.paid_amount()? >= self.effective_amount().unwrap_or(0))
    }

    /// Paid amount covers `order_total`
    pub fn is_paid_against(&self, order_total: i64) -> Result<bool> {
        Ok(self.paid_amount()? >= order_total)
    }

    /// Amount still available for new records, never negative
    pub fn remaining_creatable(&self, order_total: i64) -> Result<i64> {
        Ok(order_total.saturating_sub(self.committed_amount()?).max(0))
    }

    /// Whether a new record of `pay_amount` may be created for an order
    /// totalling `order_amount`.
    pub fn check_creatable(&self, order_id: &str, order_amount: i64, pay_amount: i64) -> Result<()> {
        if let Some(committed) = self.effective_amount()
            && committed != order_amount
        {
            return Err(PaymentError::AmountInconsistency {
                order_id: order_id.to_string(),
                committed,
                requested: order_amount,
            });
        }

        let paid = self.paid_amount()?;
        if paid >= order_amount {
            return Err(PaymentError::validation(format!(
                "order {} is already fully paid",
                order_id
            )));
        }

        let pending = self.pending_amount()?;
        let committed = self.committed_amount()?;
        if committed >= order_amount {
            return Err(PaymentError::validation(format!(
                "pending records of order {} already cover the order amount, finish them first",
                order_id
            )));
        }

        let max_amount = order_amount - committed;
        if pay_amount > max_amount {
            return Err(PaymentError::validation(format!(
                "pay amount {} exceeds remaining amount of order {} (total {}, paid {}, pending {}, max {})",
                pay_amount, order_id, order_amount, paid, pending, max_amount
            )));
        }
        Ok(())
    }
}

impl From<Vec<PaymentRecord>> for RecordSet {
    fn from(records: Vec<PaymentRecord>) -> Self {
        Self::new(records)
    }
}
