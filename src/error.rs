//! Error taxonomy for the order core.
//!
//! Only failures that a caller can act on are represented here. Degradations
//! that are recovered locally (unmapped products, sequence lookup failures,
//! gateway outages on the read path, repeated payment notifications) are
//! logged where they happen and never surface as an `OrderError`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrderError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Duplicate {field} after retry: {value}")]
    DuplicateAssignment { field: &'static str, value: String },

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Order id {0} matches more than one order, use the order's row id")]
    AmbiguousOrderId(String),

    #[error("Invalid admin status: {0}")]
    InvalidAdminStatus(String),

    #[error("Invalid order id: {0}")]
    InvalidOrderId(String),

    #[error("Invalid invoice number: {0}")]
    InvalidInvoiceNumber(String),

    #[error("Payment gateway error: {0}")]
    Gateway(String),

    #[error("Payment gateway timed out")]
    GatewayTimeout,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Credential store error: {0}")]
    Credential(String),

    #[error("Database lock poisoned: {0}")]
    Lock(String),
}

pub type OrderResult<T> = Result<T, OrderError>;

impl OrderError {
    /// True when the storage layer rejected a write because of a UNIQUE
    /// constraint on `order_id` or `invoice_number`.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            OrderError::Database(rusqlite::Error::SqliteFailure(err, _)) => {
                err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
            }
            _ => false,
        }
    }
}
