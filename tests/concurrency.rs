//! Concurrent access against one order
//!
//! Conditional updates are the only concurrency control: of several writers
//! starting from the same observed state, exactly one may win.
//!
//! The in-memory store serializes whole transactions; the same races against
//! PostgreSQL live in `postgres_flow.rs`.

use std::sync::Arc;

use payment_record::payment::{PayAction, RecordState};
use payment_record::store::memory::MemoryDatabase;
use payment_record::{CreateRecordIn, PayIn, PaymentError, PaymentService, Schema};

fn service() -> (MemoryDatabase, Arc<PaymentService>) {
    let db = MemoryDatabase::new();
    let service = PaymentService::new(&Schema::new(), Arc::new(db.clone()));
    (db, Arc::new(service))
}

fn record_in(record_id: &str, order_amount: i64, pay_amount: i64) -> CreateRecordIn {
    CreateRecordIn {
        record_id: Some(record_id.to_string()),
        order_id: "o1".to_string(),
        order_amount,
        pay_amount,
        channel: "wechat".to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_two_stale_pays_one_wins() {
    let (_db, service) = service();
    service.create_record(record_in("r1", 100, 100)).await.unwrap();

    let machine = service.records().machine();
    let (a, b) = tokio::join!(
        machine.transform(PayAction::Pay, RecordState::Pending, "r1", vec![]),
        machine.transform(PayAction::Pay, RecordState::Pending, "r1", vec![]),
    );

    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    let loser = outcomes.into_iter().find_map(|r| r.err()).unwrap();
    assert!(matches!(loser, PaymentError::Persistence(_)));
    assert!(loser.is_retryable());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_writers_from_same_state() {
    let (_db, service) = service();
    service.create_record(record_in("r1", 100, 100)).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let machine = service.records().machine().clone();
        let action = if i % 2 == 0 {
            PayAction::Close
        } else {
            PayAction::Expire
        };
        handles.push(tokio::spawn(async move {
            machine
                .transform(action, RecordState::Pending, "r1", vec![])
                .await
        }));
    }

    let mut won = 0;
    for result in futures::future::join_all(handles).await {
        match result.unwrap() {
            Ok(()) => won += 1,
            Err(e) => assert!(matches!(e, PaymentError::Persistence(_)), "{}", e),
        }
    }
    assert_eq!(won, 1);

    let state = service.get_record("r1").await.unwrap().state;
    assert!(matches!(state, RecordState::Closed | RecordState::Expired));
}

/// Service-level pays serialize through transactions and converge
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_service_pays_converge() {
    let (_db, service) = service();
    service
        .create_records(vec![record_in("r1", 300, 100), record_in("r2", 300, 200)])
        .await
        .unwrap();

    let mut handles = Vec::new();
    for id in ["r1", "r2", "r1", "r2"] {
        let service = service.clone();
        handles.push(tokio::spawn(async move { service.pay(PayIn::new(id)).await }));
    }
    for result in futures::future::join_all(handles).await {
        result.unwrap().unwrap();
    }

    assert!(service.is_order_paid("o1").await.unwrap());
    let order = service.get_order("o1").await.unwrap();
    assert_eq!(order.state, payment_record::OrderState::Paid);
}

/// Concurrent creations never overbook the order
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creations_never_overbook() {
    let (_db, service) = service();

    let mut handles = Vec::new();
    for i in 0..10 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service
                .create_record(record_in(&format!("r{}", i), 1000, 300))
                .await
        }));
    }

    let mut created = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            created += 1;
        }
    }
    assert_eq!(created, 3);
    assert_eq!(service.remaining_creatable("o1").await.unwrap(), 100);
}
