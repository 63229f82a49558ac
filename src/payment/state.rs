//! Order and Payment-Record States
//!
//! States are stored as lowercase text in the `Fstate` column.

use serde::Serialize;
use std::fmt;

use crate::fsm::{Action, ActionTable, FsmAction, FsmState};

/// Order states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderState {
    Pending,
    Paid,
    Closed,
}

impl FsmState for OrderState {
    fn as_str(&self) -> &'static str {
        match self {
            OrderState::Pending => "pending",
            OrderState::Paid => "paid",
            OrderState::Closed => "closed",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OrderState::Pending),
            "paid" => Some(OrderState::Paid),
            "closed" => Some(OrderState::Closed),
            _ => None,
        }
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment record states
///
/// ```text
/// pending ──pay──▶ paid ◀──pay── failed
///    │ └──fail──────────────────▶ failed
///    ├──expire──▶ expired
///    └──close───▶ closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordState {
    Pending,
    Paid,
    Failed,
    Expired,
    Closed,
}

impl RecordState {
    /// Counts towards the order amount (pending or paid)
    #[inline]
    pub fn is_effective(&self) -> bool {
        matches!(self, RecordState::Pending | RecordState::Paid)
    }

    /// Holds no money and never will without a new attempt
    #[inline]
    pub fn is_dead(&self) -> bool {
        matches!(
            self,
            RecordState::Closed | RecordState::Expired | RecordState::Failed
        )
    }
}

impl FsmState for RecordState {
    fn as_str(&self) -> &'static str {
        match self {
            RecordState::Pending => "pending",
            RecordState::Paid => "paid",
            RecordState::Failed => "failed",
            RecordState::Expired => "expired",
            RecordState::Closed => "closed",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RecordState::Pending),
            "paid" => Some(RecordState::Paid),
            "failed" => Some(RecordState::Failed),
            "expired" => Some(RecordState::Expired),
            "closed" => Some(RecordState::Closed),
            _ => None,
        }
    }
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Actions shared by orders and records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayAction {
    Pay,
    Expire,
    Fail,
    Close,
}

impl FsmAction for PayAction {
    fn as_str(&self) -> &'static str {
        match self {
            PayAction::Pay => "pay",
            PayAction::Expire => "expire",
            PayAction::Fail => "fail",
            PayAction::Close => "close",
        }
    }
}

impl fmt::Display for PayAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn order_actions() -> ActionTable<OrderState, PayAction> {
    use OrderState::*;
    ActionTable::new(vec![
        Action::new(PayAction::Pay, &[Pending, Paid], Paid),
        Action::new(PayAction::Close, &[Pending, Closed], Closed),
    ])
}

pub fn record_actions() -> ActionTable<RecordState, PayAction> {
    use RecordState::*;
    ActionTable::new(vec![
        // failed -> paid: retry after e.g. insufficient balance
        Action::new(PayAction::Pay, &[Pending, Failed, Paid], Paid),
        Action::new(PayAction::Expire, &[Pending, Expired], Expired),
        Action::new(PayAction::Fail, &[Pending, Failed], Failed),
        Action::new(PayAction::Close, &[Pending, Closed], Closed),
    ])
}
