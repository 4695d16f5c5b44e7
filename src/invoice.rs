//! Invoice numbers: `INV<YYYYMMDD><seq3>`, issued once per order at its
//! first paid transition. The date is the issuance day, not the order's
//! creation day.

use chrono::{Datelike, NaiveDate};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use tracing::{error, info};

use crate::clock::Clock;
use crate::error::{OrderError, OrderResult};
use crate::sequence::{timestamp_sequence, SequenceKey, SequenceStore};
use crate::status::PaymentState;

pub const INVOICE_PREFIX: &str = "INV";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InvoiceNumber(String);

/// Components recovered from an invoice number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvoiceParts {
    pub date: NaiveDate,
    pub sequence: u32,
}

impl InvoiceParts {
    pub fn year(&self) -> i32 {
        self.date.year()
    }

    pub fn month(&self) -> u32 {
        self.date.month()
    }

    pub fn day(&self) -> u32 {
        self.date.day()
    }
}

impl InvoiceNumber {
    pub fn new(date: NaiveDate, sequence: u32) -> Self {
        Self(format!("{}{sequence:03}", day_prefix(date)))
    }

    pub fn parse(raw: &str) -> OrderResult<Self> {
        let raw = raw.trim();
        Self::split(raw)?;
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn parts(&self) -> InvoiceParts {
        // Constructed only through `new` / `parse`, both of which validate.
        Self::split(&self.0).unwrap_or(InvoiceParts {
            date: NaiveDate::MIN,
            sequence: 0,
        })
    }

    fn split(raw: &str) -> OrderResult<InvoiceParts> {
        let invalid = || OrderError::InvalidInvoiceNumber(raw.to_string());
        let rest = raw.strip_prefix(INVOICE_PREFIX).ok_or_else(invalid)?;
        if rest.len() != 11 || !rest.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let (date, seq) = rest.split_at(8);
        let date = NaiveDate::parse_from_str(date, "%Y%m%d").map_err(|_| invalid())?;
        let sequence = seq.parse().map_err(|_| invalid())?;
        Ok(InvoiceParts { date, sequence })
    }
}

impl fmt::Display for InvoiceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Deref for InvoiceNumber {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<&str> for InvoiceNumber {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl FromSql for InvoiceNumber {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Self::parse(value.as_str()?).map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

impl ToSql for InvoiceNumber {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0.as_str()))
    }
}

impl TryFrom<String> for InvoiceNumber {
    type Error = OrderError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<InvoiceNumber> for String {
    fn from(n: InvoiceNumber) -> Self {
        n.0
    }
}

/// `INV` followed by the 8-digit issuance date.
pub fn day_prefix(date: NaiveDate) -> String {
    format!("{INVOICE_PREFIX}{}", date.format("%Y%m%d"))
}

/// Whether a gateway report means the money has arrived: `settlement`, or
/// `capture` with an accepted fraud check.
pub fn is_paid_transition(transaction_status: &str, fraud_status: Option<&str>) -> bool {
    PaymentState::from_gateway(transaction_status, fraud_status) == PaymentState::Paid
}

pub struct InvoiceGenerator {
    clock: Arc<dyn Clock>,
}

impl InvoiceGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Issue the next invoice number for today.
    ///
    /// Callers guarantee at-most-once per order; see
    /// `orders::reconcile_and_persist`.
    pub fn next(&self, store: &dyn SequenceStore) -> InvoiceNumber {
        let today = self.clock.today();
        let prefix = day_prefix(today);
        let key = SequenceKey::invoice(&prefix, today);

        let sequence = match store.next_value(&key) {
            Ok(seq) => seq,
            Err(e) => {
                let seq = timestamp_sequence(self.clock.now());
                error!(
                    prefix = %prefix,
                    error = %e,
                    fallback_sequence = seq,
                    "Invoice sequence lookup failed, using timestamp-derived suffix"
                );
                seq
            }
        };

        let number = InvoiceNumber::new(today, sequence);
        info!(invoice_number = %number, "Issued invoice number");
        number
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::sequence::MemorySequenceStore;

    #[test]
    fn test_first_invoice_of_each_day() {
        let clock = Arc::new(FixedClock::on(2025, 9, 16));
        let invoices = InvoiceGenerator::new(clock.clone());
        let store = MemorySequenceStore::new();

        assert_eq!(invoices.next(&store).as_str(), "INV20250916001");
        assert_eq!(invoices.next(&store).as_str(), "INV20250916002");

        clock.advance_days(1);
        assert_eq!(invoices.next(&store).as_str(), "INV20250917001");
    }

    #[test]
    fn test_parse_recovers_date_and_sequence() {
        let clock = Arc::new(FixedClock::on(2025, 12, 31));
        let invoices = InvoiceGenerator::new(clock);
        let store = MemorySequenceStore::new();
        for _ in 0..11 {
            invoices.next(&store);
        }
        let issued = invoices.next(&store);
        let parsed = InvoiceNumber::parse(issued.as_str()).unwrap();
        let parts = parsed.parts();
        assert_eq!((parts.year(), parts.month(), parts.day()), (2025, 12, 31));
        assert_eq!(parts.sequence, 12);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(InvoiceNumber::parse("INV2025091601").is_err());
        assert!(InvoiceNumber::parse("INV20251301001").is_err());
        assert!(InvoiceNumber::parse("INX20250916001").is_err());
        assert!(InvoiceNumber::parse("INV2025091600A").is_err());
        assert!(InvoiceNumber::parse("INV20250916001").is_ok());
    }

    #[test]
    fn test_paid_transition_rules() {
        assert!(is_paid_transition("settlement", None));
        assert!(is_paid_transition("Settlement", Some("challenge")));
        assert!(is_paid_transition("capture", Some("accept")));
        assert!(!is_paid_transition("capture", None));
        assert!(!is_paid_transition("capture", Some("challenge")));
        assert!(!is_paid_transition("pending", Some("accept")));
        assert!(!is_paid_transition("deny", None));
        assert!(!is_paid_transition("", None));
    }

    #[test]
    fn test_paid_transition_normalizes_like_payment_state() {
        assert!(is_paid_transition("  CAPTURE ", Some(" Accept ")));
        assert!(!is_paid_transition("refund", Some("accept")));
        assert!(!is_paid_transition("expire", None));
    }
}
