//! Order status merge.
//!
//! Two independent sources feed the status an admin or customer sees:
//! the admin-set processing stage and the payment state reported by the
//! gateway. The admin stage always wins for the display text; the payment
//! flags are always derived from the payment state alone. Only the two
//! sources are persisted, the merged view is recomputed on every read.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

use crate::error::{OrderError, OrderResult};

// ---------------------------------------------------------------------------
// Admin stage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdminStatus {
    #[serde(rename = "belum diproses")]
    BelumDiproses,
    #[serde(rename = "sedang diproses")]
    SedangDiproses,
    #[serde(rename = "selesai")]
    Selesai,
}

impl AdminStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdminStatus::BelumDiproses => "belum diproses",
            AdminStatus::SedangDiproses => "sedang diproses",
            AdminStatus::Selesai => "selesai",
        }
    }

    /// Parse admin input. Blank clears the stage; anything outside the
    /// three known stages is rejected.
    pub fn parse(raw: &str) -> OrderResult<Option<Self>> {
        let normalized = raw
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        match normalized.as_str() {
            "" => Ok(None),
            "belum diproses" => Ok(Some(AdminStatus::BelumDiproses)),
            "sedang diproses" => Ok(Some(AdminStatus::SedangDiproses)),
            "selesai" => Ok(Some(AdminStatus::Selesai)),
            _ => Err(OrderError::InvalidAdminStatus(raw.to_string())),
        }
    }

    /// Lenient read of a stored column: unknown values are logged and
    /// treated as unset so a bad row never breaks the read path.
    pub fn from_stored(raw: Option<&str>) -> Option<Self> {
        let raw = raw?;
        match Self::parse(raw) {
            Ok(status) => status,
            Err(_) => {
                warn!(admin_status = raw, "Ignoring unknown stored admin status");
                None
            }
        }
    }
}

impl fmt::Display for AdminStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Payment state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    Paid,
    Pending,
    Failed,
    Unknown,
}

impl PaymentState {
    /// Classify a raw gateway `transaction_status`.
    pub fn from_gateway(transaction_status: &str, fraud_status: Option<&str>) -> Self {
        match transaction_status.trim().to_lowercase().as_str() {
            "settlement" => PaymentState::Paid,
            "capture"
                if fraud_status
                    .map(|f| f.trim().eq_ignore_ascii_case("accept"))
                    .unwrap_or(false) =>
            {
                PaymentState::Paid
            }
            "pending" => PaymentState::Pending,
            "deny" | "cancel" | "expire" | "failure" => PaymentState::Failed,
            _ => PaymentState::Unknown,
        }
    }
}

/// Raw gateway status as stored on the order or freshly fetched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSnapshot {
    pub transaction_status: String,
    #[serde(default)]
    pub fraud_status: Option<String>,
}

impl PaymentSnapshot {
    pub fn new(transaction_status: &str, fraud_status: Option<&str>) -> Self {
        Self {
            transaction_status: transaction_status.trim().to_lowercase(),
            fraud_status: fraud_status
                .map(|f| f.trim().to_lowercase())
                .filter(|f| !f.is_empty()),
        }
    }

    pub fn state(&self) -> PaymentState {
        PaymentState::from_gateway(&self.transaction_status, self.fraud_status.as_deref())
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Display status with the tier that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayStatus {
    Admin(AdminStatus),
    Payment(PaymentState),
}

impl DisplayStatus {
    pub fn label(&self) -> &'static str {
        match self {
            DisplayStatus::Admin(admin) => admin.as_str(),
            DisplayStatus::Payment(PaymentState::Paid) => "processing",
            DisplayStatus::Payment(PaymentState::Pending) => "awaiting_payment",
            DisplayStatus::Payment(PaymentState::Failed) => "cancelled",
            DisplayStatus::Payment(PaymentState::Unknown) => "pending",
        }
    }

    pub fn is_admin_override(&self) -> bool {
        matches!(self, DisplayStatus::Admin(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub display_status: String,
    pub is_paid: bool,
    pub is_pending: bool,
    pub is_failed: bool,
    pub payment_state: PaymentState,
    pub admin_override: bool,
}

/// Merge the admin stage with the payment state.
///
/// A fresher gateway snapshot, when present, replaces the stored one.
pub fn reconcile(
    admin: Option<AdminStatus>,
    stored: &PaymentSnapshot,
    gateway: Option<&PaymentSnapshot>,
) -> StatusView {
    let payment = gateway.unwrap_or(stored).state();
    let display = match admin {
        Some(admin) => DisplayStatus::Admin(admin),
        None => DisplayStatus::Payment(payment),
    };

    StatusView {
        display_status: display.label().to_string(),
        is_paid: payment == PaymentState::Paid,
        is_pending: payment == PaymentState::Pending,
        is_failed: payment == PaymentState::Failed,
        payment_state: payment,
        admin_override: display.is_admin_override(),
    }
}
