//! Payment domain types
//!
//! Amounts are integer minor units (fen/cents).

use chrono::{DateTime, Local, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::schema::{PAY_ORDER_TABLE, PAY_RECORD_TABLE, field};
use super::state::{OrderState, RecordState};
use crate::error::{PaymentError, Result};
use crate::fsm::FsmState;
use crate::store::{ColumnUpdate, Row, StoreError};

/// Paying channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PayChannel {
    Alipay,
    Wechat,
    Coupon,
}

impl PayChannel {
    pub const ALL: [PayChannel; 3] = [PayChannel::Alipay, PayChannel::Wechat, PayChannel::Coupon];

    pub fn as_str(&self) -> &'static str {
        match self {
            PayChannel::Alipay => "alipay",
            PayChannel::Wechat => "wechat",
            PayChannel::Coupon => "coupon",
        }
    }
}

impl fmt::Display for PayChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PayChannel {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self> {
        PayChannel::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| {
                let allowed: Vec<&str> = PayChannel::ALL.iter().map(|c| c.as_str()).collect();
                PaymentError::validation(format!(
                    "unknown pay channel '{}', expected one of: {}",
                    s,
                    allowed.join(",")
                ))
            })
    }
}

/// `YYYYMMDDHHMMSS` (local time) followed by four random digits in 1..=9
pub fn generate_record_id() -> String {
    let mut rng = rand::thread_rng();
    let mut id = Local::now().format("%Y%m%d%H%M%S").to_string();
    for _ in 0..4 {
        let digit: u8 = rng.gen_range(1..=9);
        id.push(char::from(b'0' + digit));
    }
    id
}

fn corrupt(table: &str, detail: String) -> StoreError {
    StoreError::Corrupt {
        table: table.to_string(),
        detail,
    }
}

fn required_text(row: &Row, table: &str, f: &str) -> std::result::Result<String, StoreError> {
    row.text(f)
        .map(str::to_string)
        .ok_or_else(|| corrupt(table, format!("missing text field '{}'", f)))
}

fn required_int(row: &Row, table: &str, f: &str) -> std::result::Result<i64, StoreError> {
    row.int(f)
        .ok_or_else(|| corrupt(table, format!("missing integer field '{}'", f)))
}

fn text_or_empty(row: &Row, f: &str) -> String {
    row.text(f).unwrap_or_default().to_string()
}

fn time(row: &Row, f: &str) -> Option<DateTime<Utc>> {
    row.time(f).flatten()
}

fn parse_state<S: FsmState>(row: &Row, table: &str) -> std::result::Result<S, StoreError> {
    let raw = required_text(row, table, field::STATE)?;
    S::parse(&raw).ok_or_else(|| corrupt(table, format!("unknown state '{}'", raw)))
}

/// Order row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayOrder {
    pub order_id: String,
    /// Fixed once the first record exists
    pub order_amount: i64,
    pub state: OrderState,
    pub user_id: String,
    pub remark: String,
    /// Minutes, informational
    pub expire: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl PayOrder {
    pub fn new(input: &CreateOrderIn, now: DateTime<Utc>) -> Self {
        Self {
            order_id: input.order_id.clone(),
            order_amount: input.order_amount,
            state: OrderState::Pending,
            user_id: input.user_id.clone(),
            remark: input.remark.clone(),
            expire: input.expire,
            created_at: Some(now),
            paid_at: None,
            closed_at: None,
        }
    }

    pub fn to_row(&self) -> Row {
        Row::new()
            .with(field::ORDER_ID, self.order_id.as_str())
            .with(field::ORDER_AMOUNT, self.order_amount)
            .with(field::STATE, self.state.as_str())
            .with(field::USER_ID, self.user_id.as_str())
            .with(field::REMARK, self.remark.as_str())
            .with(field::EXPIRE, self.expire)
            .with(field::CREATED_AT, self.created_at)
            .with(field::PAID_AT, self.paid_at)
            .with(field::CLOSED_AT, self.closed_at)
    }

    pub fn from_row(row: &Row) -> std::result::Result<Self, StoreError> {
        let t = PAY_ORDER_TABLE;
        Ok(Self {
            order_id: required_text(row, t, field::ORDER_ID)?,
            order_amount: required_int(row, t, field::ORDER_AMOUNT)?,
            state: parse_state(row, t)?,
            user_id: text_or_empty(row, field::USER_ID),
            remark: text_or_empty(row, field::REMARK),
            expire: row.int(field::EXPIRE).unwrap_or_default(),
            created_at: time(row, field::CREATED_AT),
            paid_at: time(row, field::PAID_AT),
            closed_at: time(row, field::CLOSED_AT),
        })
    }
}

/// Channel-specific metadata carried by a record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelMeta {
    pub client_ip: String,
    pub pay_url: String,
    pub return_url: String,
    pub notify_url: String,
    pub pay_param: String,
    pub recipient_account: String,
    pub recipient_name: String,
    pub payment_account: String,
    pub payment_name: String,
}

/// Payment record row: one (possibly partial) attempt to pay an order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    pub record_id: String,
    pub order_id: String,
    /// Order total this record was created against
    pub order_amount: i64,
    pub pay_amount: i64,
    pub channel: PayChannel,
    pub state: RecordState,
    pub user_id: String,
    #[serde(flatten)]
    pub meta: ChannelMeta,
    pub remark: String,
    pub expire: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl PaymentRecord {
    /// New pending record from a validated request
    pub fn pending(input: &CreateRecordIn, channel: PayChannel, now: DateTime<Utc>) -> Self {
        Self {
            record_id: input.record_id.clone().unwrap_or_else(generate_record_id),
            order_id: input.order_id.clone(),
            order_amount: input.order_amount,
            pay_amount: input.pay_amount,
            channel,
            state: RecordState::Pending,
            user_id: input.user_id.clone(),
            meta: input.meta.clone(),
            remark: input.remark.clone(),
            expire: input.expire,
            created_at: Some(now),
            paid_at: None,
            closed_at: None,
            expired_at: None,
            failed_at: None,
        }
    }

    pub fn to_row(&self) -> Row {
        let m = &self.meta;
        Row::new()
            .with(field::PAY_ID, self.record_id.as_str())
            .with(field::ORDER_ID, self.order_id.as_str())
            .with(field::ORDER_AMOUNT, self.order_amount)
            .with(field::PAY_AMOUNT, self.pay_amount)
            .with(field::PAY_AGENT, self.channel.as_str())
            .with(field::STATE, self.state.as_str())
            .with(field::USER_ID, self.user_id.as_str())
            .with(field::CLIENT_IP, m.client_ip.as_str())
            .with(field::PAY_URL, m.pay_url.as_str())
            .with(field::RETURN_URL, m.return_url.as_str())
            .with(field::NOTIFY_URL, m.notify_url.as_str())
            .with(field::PAY_PARAM, m.pay_param.as_str())
            .with(field::RECIPIENT_ACCOUNT, m.recipient_account.as_str())
            .with(field::RECIPIENT_NAME, m.recipient_name.as_str())
            .with(field::PAYMENT_ACCOUNT, m.payment_account.as_str())
            .with(field::PAYMENT_NAME, m.payment_name.as_str())
            .with(field::REMARK, self.remark.as_str())
            .with(field::EXPIRE, self.expire)
            .with(field::CREATED_AT, self.created_at)
            .with(field::PAID_AT, self.paid_at)
            .with(field::CLOSED_AT, self.closed_at)
            .with(field::EXPIRED_AT, self.expired_at)
            .with(field::FAILED_AT, self.failed_at)
    }

    pub fn from_row(row: &Row) -> std::result::Result<Self, StoreError> {
        let t = PAY_RECORD_TABLE;
        let agent = required_text(row, t, field::PAY_AGENT)?;
        let channel = agent
            .parse::<PayChannel>()
            .map_err(|_| corrupt(t, format!("unknown pay channel '{}'", agent)))?;
        Ok(Self {
            record_id: required_text(row, t, field::PAY_ID)?,
            order_id: required_text(row, t, field::ORDER_ID)?,
            order_amount: required_int(row, t, field::ORDER_AMOUNT)?,
            pay_amount: required_int(row, t, field::PAY_AMOUNT)?,
            channel,
            state: parse_state(row, t)?,
            user_id: text_or_empty(row, field::USER_ID),
            meta: ChannelMeta {
                client_ip: text_or_empty(row, field::CLIENT_IP),
                pay_url: text_or_empty(row, field::PAY_URL),
                return_url: text_or_empty(row, field::RETURN_URL),
                notify_url: text_or_empty(row, field::NOTIFY_URL),
                pay_param: text_or_empty(row, field::PAY_PARAM),
                recipient_account: text_or_empty(row, field::RECIPIENT_ACCOUNT),
                recipient_name: text_or_empty(row, field::RECIPIENT_NAME),
                payment_account: text_or_empty(row, field::PAYMENT_ACCOUNT),
                payment_name: text_or_empty(row, field::PAYMENT_NAME),
            },
            remark: text_or_empty(row, field::REMARK),
            expire: row.int(field::EXPIRE).unwrap_or_default(),
            created_at: time(row, field::CREATED_AT),
            paid_at: time(row, field::PAID_AT),
            closed_at: time(row, field::CLOSED_AT),
            expired_at: time(row, field::EXPIRED_AT),
            failed_at: time(row, field::FAILED_AT),
        })
    }
}

/// Record creation request
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateRecordIn {
    /// Generated when absent
    #[serde(rename = "payId")]
    pub record_id: Option<String>,
    pub order_id: String,
    pub order_amount: i64,
    pub pay_amount: i64,
    #[serde(rename = "payAgent")]
    pub channel: String,
    pub user_id: String,
    pub expire: i64,
    pub remark: String,
    #[serde(flatten)]
    pub meta: ChannelMeta,
}

impl CreateRecordIn {
    /// Input-only checks, no storage access
    pub fn validate(&self) -> Result<PayChannel> {
        if let Some(id) = &self.record_id
            && id.is_empty()
        {
            return Err(PaymentError::validation("record id must not be empty"));
        }
        if self.order_id.is_empty() {
            return Err(PaymentError::validation("order id must not be empty"));
        }
        let channel = self.channel.parse::<PayChannel>()?;
        if self.order_amount <= 0 {
            return Err(PaymentError::validation(format!(
                "order amount must be greater than 0, got {}",
                self.order_amount
            )));
        }
        if self.pay_amount <= 0 {
            return Err(PaymentError::validation(format!(
                "pay amount must be greater than 0, got {}",
                self.pay_amount
            )));
        }
        Ok(channel)
    }
}

/// Order creation request
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateOrderIn {
    pub order_id: String,
    pub order_amount: i64,
    pub user_id: String,
    pub expire: i64,
    pub remark: String,
}

impl CreateOrderIn {
    pub fn validate(&self) -> Result<()> {
        if self.order_id.is_empty() {
            return Err(PaymentError::validation("order id must not be empty"));
        }
        if self.order_amount <= 0 {
            return Err(PaymentError::validation(format!(
                "order amount must be greater than 0, got {}",
                self.order_amount
            )));
        }
        Ok(())
    }
}

impl From<&CreateRecordIn> for CreateOrderIn {
    fn from(input: &CreateRecordIn) -> Self {
        Self {
            order_id: input.order_id.clone(),
            order_amount: input.order_amount,
            user_id: input.user_id.clone(),
            expire: input.expire,
            remark: input.remark.clone(),
        }
    }
}

/// Pay request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayIn {
    pub record_id: String,
    pub remark: Option<String>,
    /// Channel metadata written together with the state, e.g. payer account
    pub extra: Vec<ColumnUpdate>,
}

impl PayIn {
    pub fn new(record_id: impl Into<String>) -> Self {
        Self {
            record_id: record_id.into(),
            ..Default::default()
        }
    }
}

/// Close / expire / fail request for one record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateChangeIn {
    pub record_id: String,
    /// Stored in the remark column
    pub reason: String,
    pub extra: Vec<ColumnUpdate>,
}

impl StateChangeIn {
    pub fn new(record_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            record_id: record_id.into(),
            reason: reason.into(),
            extra: Vec::new(),
        }
    }
}
