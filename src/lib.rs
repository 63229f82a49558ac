//! payment_record - Payment orders and partial payment records
//!
//! Tracks orders and the payment records that pay them, keeping state
//! transitions and amounts consistent under concurrent access.
//!
//! # Modules
//!
//! - [`fsm`] - Generic state machine over a stored state column
//! - [`store`] - Storage contract, in-memory and PostgreSQL implementations
//! - [`payment`] - Order/record states, amount reconciliation, service
//! - [`error`] - Error taxonomy
//! - [`config`] - YAML configuration
//! - [`logging`] - tracing subscriber setup

pub mod config;
pub mod error;
pub mod fsm;
pub mod logging;
pub mod payment;
pub mod store;

pub use error::{PaymentError, Result, StoreError, TransitionDenied};
pub use payment::{
    CreateOrderIn, CreateRecordIn, OrderState, PayChannel, PayIn, PayOrder, PaymentRecord,
    PaymentService, RecordState, Schema, StateChangeIn,
};
