//! Integration Tests for the payment service
//!
//! Full order/record flows against the in-memory store.

use std::sync::Arc;

use crate::error::PaymentError;
use crate::payment::schema::{PAY_ORDER_TABLE, Schema};
use crate::payment::service::PaymentService;
use crate::payment::state::{OrderState, RecordState};
use crate::payment::types::{CreateOrderIn, CreateRecordIn, PayIn, StateChangeIn};
use crate::store::memory::MemoryDatabase;

struct TestHarness {
    db: MemoryDatabase,
    service: PaymentService,
}

impl TestHarness {
    fn new() -> Self {
        let db = MemoryDatabase::new();
        let service = PaymentService::new(&Schema::new(), Arc::new(db.clone()));
        Self { db, service }
    }

    async fn create(&self, record_id: &str, order_amount: i64, pay_amount: i64) -> String {
        self.service
            .create_record(record_in("o1", record_id, order_amount, pay_amount))
            .await
            .unwrap()
    }

    async fn record_state(&self, record_id: &str) -> RecordState {
        self.service.get_record(record_id).await.unwrap().state
    }

    async fn order_state(&self) -> OrderState {
        self.service.get_order("o1").await.unwrap().state
    }
}

fn record_in(order_id: &str, record_id: &str, order_amount: i64, pay_amount: i64) -> CreateRecordIn {
    CreateRecordIn {
        record_id: Some(record_id.to_string()),
        order_id: order_id.to_string(),
        order_amount,
        pay_amount,
        channel: "alipay".to_string(),
        user_id: "u1".to_string(),
        ..Default::default()
    }
}

// ========================================================================
// Partial Payment Flow
// ========================================================================

/// create r1 -> pay r1 -> create r2 -> pay r2 -> order paid -> no more records
#[tokio::test]
async fn test_partial_payments_complete_order() {
    let h = TestHarness::new();

    h.create("r1", 5000, 1000).await;
    assert_eq!(h.service.remaining_creatable("o1").await.unwrap(), 4000);
    assert_eq!(h.order_state().await, OrderState::Pending);

    assert!(!h.service.pay(PayIn::new("r1")).await.unwrap());
    assert!(!h.service.is_order_paid("o1").await.unwrap());
    assert_eq!(h.order_state().await, OrderState::Pending);

    h.create("r2", 5000, 4000).await;
    assert_eq!(h.service.remaining_creatable("o1").await.unwrap(), 0);
    assert!(h.service.pay(PayIn::new("r2")).await.unwrap());
    assert!(h.service.is_order_paid("o1").await.unwrap());

    let order = h.service.get_order("o1").await.unwrap();
    assert_eq!(order.state, OrderState::Paid);
    assert!(order.paid_at.is_some());

    let err = h
        .service
        .create_record(record_in("o1", "r3", 5000, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::Validation(ref m) if m.contains("already fully paid")));
}

#[tokio::test]
async fn test_remaining_decreases_by_created_amount() {
    let h = TestHarness::new();
    let mut remaining = 1000;
    for (i, amount) in [100, 250, 400, 250].into_iter().enumerate() {
        h.create(&format!("r{}", i), 1000, amount).await;
        let now = h.service.remaining_creatable("o1").await.unwrap();
        assert_eq!(now, remaining - amount);
        remaining = now;
    }
    assert_eq!(remaining, 0);

    let err = h
        .service
        .create_record(record_in("o1", "r9", 1000, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::Validation(ref m) if m.contains("finish them first")));
}

#[tokio::test]
async fn test_pay_with_remark_and_extra_columns() {
    let h = TestHarness::new();
    h.create("r1", 100, 100).await;

    let pay = PayIn {
        record_id: "r1".into(),
        remark: Some("paid by wechat".into()),
        extra: vec![crate::store::ColumnUpdate::new(
            crate::payment::schema::field::PAYMENT_ACCOUNT,
            "acct-42",
        )],
    };
    assert!(h.service.pay(pay).await.unwrap());

    let record = h.service.get_record("r1").await.unwrap();
    assert_eq!(record.remark, "paid by wechat");
    assert_eq!(record.meta.payment_account, "acct-42");
}

#[tokio::test]
async fn test_pay_rejects_extra_updates_to_amounts() {
    use crate::payment::schema::field;
    use crate::store::{ColumnUpdate, Value};

    let h = TestHarness::new();
    h.create("r1", 5000, 1000).await;

    for (name, value) in [
        (field::PAY_AMOUNT, Value::from(5000i64)),
        (field::ORDER_AMOUNT, Value::from(1000i64)),
        (field::ORDER_ID, Value::from("o2")),
    ] {
        let pay = PayIn {
            record_id: "r1".into(),
            remark: None,
            extra: vec![ColumnUpdate::new(name, value)],
        };
        let err = h.service.pay(pay).await.unwrap_err();
        assert!(matches!(err, PaymentError::Validation(ref m) if m.contains(name)));
    }

    let record = h.service.get_record("r1").await.unwrap();
    assert_eq!(record.state, RecordState::Pending);
    assert_eq!(record.pay_amount, 1000);
    assert_eq!(record.order_amount, 5000);
    assert!(!h.service.is_order_paid("o1").await.unwrap());

    let err = h
        .service
        .close_record(StateChangeIn {
            extra: vec![ColumnUpdate::new(field::PAY_AMOUNT, 1i64)],
            ..StateChangeIn::new("r1", "cancel")
        })
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::Validation(_)));
    assert_eq!(h.record_state("r1").await, RecordState::Pending);
}

#[tokio::test]
async fn test_generated_record_id() {
    let h = TestHarness::new();
    let mut input = record_in("o1", "", 100, 10);
    input.record_id = None;
    let id = h.service.create_record(input).await.unwrap();
    assert_eq!(id.len(), 18);
    assert_eq!(h.record_state(&id).await, RecordState::Pending);
}

// ========================================================================
// Creation Checks
// ========================================================================

#[tokio::test]
async fn test_batch_is_checked_cumulatively() {
    let h = TestHarness::new();

    let err = h
        .service
        .create_records(vec![
            record_in("o1", "r1", 5000, 3000),
            record_in("o1", "r2", 5000, 3000),
        ])
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::Validation(_)));
    // nothing written, not even the order
    assert!(h.service.get_records_by_order("o1").await.unwrap().is_empty());
    assert!(matches!(
        h.service.get_order("o1").await,
        Err(PaymentError::NotFound { .. })
    ));

    let ids = h
        .service
        .create_records(vec![
            record_in("o1", "r1", 5000, 2000),
            record_in("o1", "r2", 5000, 3000),
        ])
        .await
        .unwrap();
    assert_eq!(ids, vec!["r1".to_string(), "r2".to_string()]);
    assert_eq!(h.service.remaining_creatable("o1").await.unwrap(), 0);
}

#[tokio::test]
async fn test_batch_rejects_mixed_orders() {
    let h = TestHarness::new();
    let err = h
        .service
        .create_records(vec![
            record_in("o1", "r1", 5000, 100),
            record_in("o2", "r2", 5000, 100),
        ])
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::Validation(_)));
    assert!(h.service.create_records(vec![]).await.is_err());
}

#[tokio::test]
async fn test_order_total_is_fixed() {
    let h = TestHarness::new();
    h.create("r1", 5000, 1000).await;

    let err = h
        .service
        .create_record(record_in("o1", "r2", 6000, 1000))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        PaymentError::AmountInconsistency {
            order_id: "o1".into(),
            committed: 5000,
            requested: 6000
        }
    );
    assert_eq!(h.service.get_order("o1").await.unwrap().order_amount, 5000);
}

#[tokio::test]
async fn test_create_order_is_insert_only() {
    let h = TestHarness::new();
    let input = CreateOrderIn {
        order_id: "o1".into(),
        order_amount: 800,
        ..Default::default()
    };
    assert!(h.service.create_order(input.clone()).await.unwrap());
    assert!(!h.service.create_order(input.clone()).await.unwrap());

    let changed = CreateOrderIn {
        order_amount: 900,
        ..input
    };
    assert!(matches!(
        h.service.create_order(changed).await,
        Err(PaymentError::AmountInconsistency { committed: 800, .. })
    ));

    // records must agree with the stored order
    assert!(matches!(
        h.service
            .create_record(record_in("o1", "r1", 900, 100))
            .await,
        Err(PaymentError::AmountInconsistency { .. })
    ));
    h.create("r1", 800, 100).await;
}

#[tokio::test]
async fn test_invalid_requests_write_nothing() {
    let h = TestHarness::new();

    let mut bad = record_in("o1", "r1", 5000, 100);
    bad.channel = "paypal".into();
    assert!(matches!(
        h.service.create_record(bad).await,
        Err(PaymentError::Validation(_))
    ));
    assert!(matches!(
        h.service.create_record(record_in("o1", "r1", 5000, 0)).await,
        Err(PaymentError::Validation(_))
    ));
    assert!(h.db.rows("pay_record").await.is_empty());

    h.create("r1", 5000, 100).await;
    assert!(matches!(
        h.service.create_record(record_in("o1", "r1", 5000, 100)).await,
        Err(PaymentError::Validation(_))
    ));
    assert_eq!(h.db.rows("pay_record").await.len(), 1);
}

// ========================================================================
// Record Lifecycle
// ========================================================================

#[tokio::test]
async fn test_pay_is_idempotent() {
    let h = TestHarness::new();
    h.create("r1", 1000, 1000).await;

    assert!(h.service.pay(PayIn::new("r1")).await.unwrap());
    let first = h.service.get_record("r1").await.unwrap().paid_at;
    assert!(h.service.pay(PayIn::new("r1")).await.unwrap());

    let record = h.service.get_record("r1").await.unwrap();
    assert_eq!(record.state, RecordState::Paid);
    assert_eq!(record.paid_at, first);
    assert_eq!(h.order_state().await, OrderState::Paid);
}

#[tokio::test]
async fn test_failed_record_can_be_paid() {
    let h = TestHarness::new();
    h.create("r1", 1000, 1000).await;

    h.service
        .fail_record(StateChangeIn::new("r1", "insufficient balance"))
        .await
        .unwrap();
    let record = h.service.get_record("r1").await.unwrap();
    assert_eq!(record.state, RecordState::Failed);
    assert!(record.failed_at.is_some());
    assert!(record.expired_at.is_none());
    assert_eq!(record.remark, "insufficient balance");

    // failed records free their amount
    assert_eq!(h.service.remaining_creatable("o1").await.unwrap(), 1000);
    assert!(h.service.order_pay_info("o1").await.unwrap().is_empty());

    assert!(h.service.pay(PayIn::new("r1")).await.unwrap());
    assert_eq!(h.record_state("r1").await, RecordState::Paid);
}

/// A failed record released its amount; paying it again must not overbook
#[tokio::test]
async fn test_failed_record_repay_respects_remaining() {
    let h = TestHarness::new();
    h.create("r1", 5000, 1000).await;
    h.service
        .fail_record(StateChangeIn::new("r1", "declined"))
        .await
        .unwrap();
    h.create("r2", 5000, 5000).await;

    let err = h.service.pay(PayIn::new("r1")).await.unwrap_err();
    assert!(matches!(err, PaymentError::Validation(_)));
    assert_eq!(h.record_state("r1").await, RecordState::Failed);
    assert_eq!(h.service.remaining_creatable("o1").await.unwrap(), 0);

    // room again once r2 is closed
    h.service
        .close_record(StateChangeIn::new("r2", "cancel"))
        .await
        .unwrap();
    assert!(!h.service.pay(PayIn::new("r1")).await.unwrap());
    assert_eq!(h.record_state("r1").await, RecordState::Paid);
    assert_eq!(h.service.remaining_creatable("o1").await.unwrap(), 4000);
}

#[tokio::test]
async fn test_expired_record_cannot_be_paid() {
    let h = TestHarness::new();
    h.create("r1", 1000, 500).await;

    h.service
        .expire_record(StateChangeIn::new("r1", "timeout"))
        .await
        .unwrap();
    h.service
        .expire_record(StateChangeIn::new("r1", "timeout"))
        .await
        .unwrap();
    assert!(h.service.get_record("r1").await.unwrap().expired_at.is_some());

    let err = h.service.pay(PayIn::new("r1")).await.unwrap_err();
    let denied = err.denied().unwrap();
    assert_eq!(denied.entity, "pay_record");
    assert_eq!(denied.identity, "r1");
    assert_eq!(denied.current_state, "expired");
    assert_eq!(denied.available_actions, vec!["expire".to_string()]);
}

#[tokio::test]
async fn test_close_record() {
    let h = TestHarness::new();
    h.create("r1", 1000, 500).await;
    h.create("r2", 1000, 500).await;

    h.service
        .close_record(StateChangeIn::new("r1", "user cancelled"))
        .await
        .unwrap();
    assert_eq!(h.record_state("r1").await, RecordState::Closed);
    assert_eq!(h.service.order_pay_info("o1").await.unwrap().len(), 1);

    h.service.pay(PayIn::new("r2")).await.unwrap();
    assert!(matches!(
        h.service
            .close_record(StateChangeIn::new("r2", "too late"))
            .await,
        Err(PaymentError::StateTransitionDenied(_))
    ));
}

#[tokio::test]
async fn test_unknown_record() {
    let h = TestHarness::new();
    assert!(matches!(
        h.service.pay(PayIn::new("nope")).await,
        Err(PaymentError::NotFound { entity: "pay_record", .. })
    ));
    assert!(matches!(
        h.service.expire_record(StateChangeIn::new("nope", "")).await,
        Err(PaymentError::NotFound { .. })
    ));
    assert!(matches!(
        h.service.remaining_creatable("nope").await,
        Err(PaymentError::NotFound { entity: "pay_order", .. })
    ));
    assert!(matches!(
        h.service.pay(PayIn::new("")).await,
        Err(PaymentError::Validation(_))
    ));
}

// ========================================================================
// Order Close
// ========================================================================

#[tokio::test]
async fn test_close_order_closes_open_records() {
    let h = TestHarness::new();
    h.create("r1", 3000, 1000).await;
    h.create("r2", 3000, 1000).await;
    h.create("r3", 3000, 1000).await;
    h.service
        .expire_record(StateChangeIn::new("r3", "timeout"))
        .await
        .unwrap();

    let closed = h.service.close_order("o1", "user cancelled").await.unwrap();
    assert_eq!(closed, vec!["r1".to_string(), "r2".to_string()]);
    assert_eq!(h.record_state("r1").await, RecordState::Closed);
    assert_eq!(h.record_state("r2").await, RecordState::Closed);
    assert_eq!(h.record_state("r3").await, RecordState::Expired);

    let order = h.service.get_order("o1").await.unwrap();
    assert_eq!(order.state, OrderState::Closed);
    assert_eq!(order.remark, "user cancelled");
    assert!(order.closed_at.is_some());

    // replay is a no-op
    assert!(h.service.close_order("o1", "again").await.unwrap().is_empty());

    let err = h
        .service
        .create_record(record_in("o1", "r4", 3000, 100))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::Validation(ref m) if m.contains("closed")));
}

/// One paid and one pending record: the paid record blocks, nothing changes
#[tokio::test]
async fn test_close_order_is_all_or_nothing() {
    let h = TestHarness::new();
    h.create("r1", 5000, 1000).await;
    h.create("r2", 5000, 1000).await;
    h.service.pay(PayIn::new("r1")).await.unwrap();

    let err = h.service.close_order("o1", "cancel").await.unwrap_err();
    let denied = err.denied().unwrap();
    assert_eq!(denied.entity, "pay_record");
    assert_eq!(denied.identity, "r1");
    assert_eq!(denied.current_state, "paid");
    assert_eq!(denied.action, "close");

    assert_eq!(h.record_state("r1").await, RecordState::Paid);
    assert_eq!(h.record_state("r2").await, RecordState::Pending);
    assert_eq!(h.order_state().await, OrderState::Pending);
}

#[tokio::test]
async fn test_close_paid_order_denied() {
    let h = TestHarness::new();
    h.create("r1", 100, 100).await;
    h.service.pay(PayIn::new("r1")).await.unwrap();

    let err = h.service.close_order("o1", "cancel").await.unwrap_err();
    assert_eq!(err.denied().unwrap().entity, PAY_ORDER_TABLE);
    assert_eq!(h.order_state().await, OrderState::Paid);
}

#[tokio::test]
async fn test_failed_record_of_closed_order_cannot_be_paid() {
    let h = TestHarness::new();
    h.create("r1", 100, 100).await;
    h.service
        .fail_record(StateChangeIn::new("r1", "declined"))
        .await
        .unwrap();
    assert!(h.service.close_order("o1", "cancel").await.unwrap().is_empty());

    let err = h.service.pay(PayIn::new("r1")).await.unwrap_err();
    let denied = err.denied().unwrap();
    assert_eq!(denied.entity, "pay_order");
    assert_eq!(denied.current_state, "closed");
    assert_eq!(h.record_state("r1").await, RecordState::Failed);
}

// ========================================================================
// Transactions
// ========================================================================

/// Order update fails after the record update: both roll back
#[tokio::test]
async fn test_pay_rolls_back_record_when_order_update_fails() {
    let h = TestHarness::new();
    h.create("r1", 100, 100).await;

    // the first order update is the lock, the second is the transition
    h.db.fail_update_after("pay_order", 1);
    let err = h.service.pay(PayIn::new("r1")).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(h.record_state("r1").await, RecordState::Pending);
    assert_eq!(h.order_state().await, OrderState::Pending);

    // retry from scratch succeeds
    assert!(h.service.pay(PayIn::new("r1")).await.unwrap());
    assert_eq!(h.record_state("r1").await, RecordState::Paid);
    assert_eq!(h.order_state().await, OrderState::Paid);
}

#[tokio::test]
async fn test_close_order_rolls_back_on_record_failure() {
    let h = TestHarness::new();
    h.create("r1", 100, 50).await;

    h.db.fail_next_update("pay_record");
    assert!(matches!(
        h.service.close_order("o1", "cancel").await,
        Err(PaymentError::Persistence(_))
    ));
    assert_eq!(h.order_state().await, OrderState::Pending);
    assert_eq!(h.record_state("r1").await, RecordState::Pending);
}
