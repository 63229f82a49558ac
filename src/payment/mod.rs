//! Payment orders and payment records
//!
//! One order is paid by one or more records (partial payments, possibly
//! through different channels). The record aggregate is the system of
//! record; the order row's own state is moved in the same transaction as
//! the record event that changes it.
//!
//! # State Machines
//!
//! ```text
//! order:   pending ──pay──▶ paid
//!             └────close──▶ closed
//!
//! record:  pending ──pay────▶ paid ◀─pay─ failed
//!             ├────fail─────▶ failed
//!             ├────expire───▶ expired
//!             └────close────▶ closed
//! ```
//!
//! # Amount Invariants
//!
//! 1. **Fixed total**: an order's total never changes once a record exists
//! 2. **No overbooking**: paid + pending never exceeds the order total
//! 3. **Finished is final**: a fully paid order accepts no new records

pub mod reconcile;
pub mod repository;
pub mod schema;
pub mod service;
pub mod state;
pub mod types;

#[cfg(test)]
mod integration_tests;

pub use reconcile::RecordSet;
pub use repository::{OrderRepository, RecordRepository};
pub use schema::Schema;
pub use service::PaymentService;
pub use state::{OrderState, PayAction, RecordState};
pub use types::{
    ChannelMeta, CreateOrderIn, CreateRecordIn, PayChannel, PayIn, PayOrder, PaymentRecord,
    StateChangeIn, generate_record_id,
};
