//! Payment schema registry
//!
//! Built once at startup and handed to repositories by `Arc`.

use std::sync::Arc;

use crate::store::{ColumnSchema, ColumnType, TableSchema};

pub const PAY_ORDER_TABLE: &str = "pay_order";
pub const PAY_RECORD_TABLE: &str = "pay_record";

/// Logical field names
pub mod field {
    pub const PAY_ID: &str = "payId";
    pub const ORDER_ID: &str = "orderId";
    pub const ORDER_AMOUNT: &str = "orderAmount";
    pub const PAY_AMOUNT: &str = "payAmount";
    pub const PAY_AGENT: &str = "payAgent";
    pub const STATE: &str = "state";
    pub const USER_ID: &str = "userId";
    pub const CLIENT_IP: &str = "clientIp";
    pub const PAY_URL: &str = "payUrl";
    pub const RETURN_URL: &str = "returnUrl";
    pub const NOTIFY_URL: &str = "notifyUrl";
    pub const PAY_PARAM: &str = "payParam";
    pub const RECIPIENT_ACCOUNT: &str = "recipientAccount";
    pub const RECIPIENT_NAME: &str = "recipientName";
    pub const PAYMENT_ACCOUNT: &str = "paymentAccount";
    pub const PAYMENT_NAME: &str = "paymentName";
    pub const REMARK: &str = "remark";
    pub const EXPIRE: &str = "expire";
    pub const CREATED_AT: &str = "createdAt";
    pub const PAID_AT: &str = "paidAt";
    pub const CLOSED_AT: &str = "closedAt";
    pub const EXPIRED_AT: &str = "expiredAt";
    pub const FAILED_AT: &str = "failedAt";
}

#[derive(Debug, Clone)]
pub struct Schema {
    pub pay_order: Arc<TableSchema>,
    pub pay_record: Arc<TableSchema>,
}

impl Default for Schema {
    fn default() -> Self {
        Self::new()
    }
}

impl Schema {
    pub fn new() -> Self {
        Self {
            pay_order: Arc::new(pay_order()),
            pay_record: Arc::new(pay_record()),
        }
    }

    pub fn tables(&self) -> [&TableSchema; 2] {
        [self.pay_order.as_ref(), self.pay_record.as_ref()]
    }
}

fn pay_order() -> TableSchema {
    use ColumnType::*;
    TableSchema {
        name: PAY_ORDER_TABLE,
        comment: "payment orders",
        primary_key: "Fid",
        columns: vec![
            ColumnSchema::new(field::ORDER_ID, "Forder_id", Text),
            ColumnSchema::new(field::ORDER_AMOUNT, "Forder_amount", BigInt),
            ColumnSchema::new(field::STATE, "Fstate", Text),
            ColumnSchema::new(field::USER_ID, "Fuser_id", Text),
            ColumnSchema::new(field::REMARK, "Fremark", Text),
            ColumnSchema::new(field::EXPIRE, "Fexpire", BigInt),
            ColumnSchema::new(field::CREATED_AT, "Fcreated_at", Timestamp),
            ColumnSchema::new(field::PAID_AT, "Fpaid_at", Timestamp),
            ColumnSchema::new(field::CLOSED_AT, "Fclosed_at", Timestamp),
        ],
        identity: field::ORDER_ID,
        state: field::STATE,
        indexes: vec![field::USER_ID],
        immutable: vec![field::ORDER_AMOUNT, field::CREATED_AT],
    }
}

fn pay_record() -> TableSchema {
    use ColumnType::*;
    TableSchema {
        name: PAY_RECORD_TABLE,
        comment: "payment records, one per payment attempt",
        primary_key: "Fid",
        columns: vec![
            ColumnSchema::new(field::PAY_ID, "Fpay_id", Text),
            ColumnSchema::new(field::ORDER_ID, "Forder_id", Text),
            ColumnSchema::new(field::ORDER_AMOUNT, "Forder_amount", BigInt),
            ColumnSchema::new(field::PAY_AMOUNT, "Fpay_amount", BigInt),
            ColumnSchema::new(field::PAY_AGENT, "Fpay_agent", Text),
            ColumnSchema::new(field::STATE, "Fstate", Text),
            ColumnSchema::new(field::USER_ID, "Fuser_id", Text),
            ColumnSchema::new(field::CLIENT_IP, "Fclient_ip", Text),
            ColumnSchema::new(field::PAY_URL, "Fpay_url", Text),
            ColumnSchema::new(field::RETURN_URL, "Freturn_url", Text),
            ColumnSchema::new(field::NOTIFY_URL, "Fnotify_url", Text),
            ColumnSchema::new(field::PAY_PARAM, "Fpay_param", Text),
            ColumnSchema::new(field::RECIPIENT_ACCOUNT, "Frecipient_account", Text),
            ColumnSchema::new(field::RECIPIENT_NAME, "Frecipient_name", Text),
            ColumnSchema::new(field::PAYMENT_ACCOUNT, "Fpayment_account", Text),
            ColumnSchema::new(field::PAYMENT_NAME, "Fpayment_name", Text),
            ColumnSchema::new(field::REMARK, "Fremark", Text),
            ColumnSchema::new(field::EXPIRE, "Fexpire", BigInt),
            ColumnSchema::new(field::CREATED_AT, "Fcreated_at", Timestamp),
            ColumnSchema::new(field::PAID_AT, "Fpaid_at", Timestamp),
            ColumnSchema::new(field::CLOSED_AT, "Fclosed_at", Timestamp),
            ColumnSchema::new(field::EXPIRED_AT, "Fexpired_at", Timestamp),
            ColumnSchema::new(field::FAILED_AT, "Ffailed_at", Timestamp),
        ],
        identity: field::PAY_ID,
        state: field::STATE,
        indexes: vec![field::ORDER_ID, field::USER_ID],
        immutable: vec![
            field::ORDER_ID,
            field::ORDER_AMOUNT,
            field::PAY_AMOUNT,
            field::CREATED_AT,
        ],
    }
}
