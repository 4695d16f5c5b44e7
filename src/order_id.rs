//! Order id generation: `<CODE><seq3>`, e.g. `PRAPL001`.

use chrono::NaiveDate;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use tracing::{debug, error};

use crate::clock::Clock;
use crate::error::{OrderError, OrderResult};
use crate::product_code::{is_valid_code, CodeMatch, ProductCodeTable};
use crate::sequence::{timestamp_sequence, SequenceKey, SequenceStore};

/// A validated order id. The letter prefix is the product code, the last
/// three digits are the daily sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrderId(String);

impl OrderId {
    pub fn new(code: &str, sequence: u32) -> OrderResult<Self> {
        Self::parse(&format!("{code}{sequence:03}"))
    }

    pub fn parse(raw: &str) -> OrderResult<Self> {
        let raw = raw.trim();
        if raw.len() < 5 || !raw.is_ascii() {
            return Err(OrderError::InvalidOrderId(raw.to_string()));
        }
        let (prefix, digits) = raw.split_at(raw.len() - 3);
        if !is_valid_code(prefix) || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(OrderError::InvalidOrderId(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn prefix(&self) -> &str {
        &self.0[..self.0.len() - 3]
    }

    pub fn sequence(&self) -> u32 {
        self.0[self.0.len() - 3..].parse().unwrap_or(0)
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Deref for OrderId {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<&str> for OrderId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl FromSql for OrderId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Self::parse(value.as_str()?).map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

impl ToSql for OrderId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0.as_str()))
    }
}

impl TryFrom<String> for OrderId {
    type Error = OrderError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<OrderId> for String {
    fn from(id: OrderId) -> Self {
        id.0
    }
}

/// Result of one generation: the id plus how it was produced, so callers
/// can audit fallback usage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedOrderId {
    pub id: OrderId,
    /// Calendar day the sequence was drawn for.
    pub day: NaiveDate,
    pub matched: CodeMatch,
    pub sequence_fallback: bool,
}

pub struct OrderIdGenerator {
    codes: ProductCodeTable,
    clock: Arc<dyn Clock>,
}

impl OrderIdGenerator {
    pub fn new(codes: ProductCodeTable, clock: Arc<dyn Clock>) -> Self {
        Self { codes, clock }
    }

    /// Generate the next order id for today.
    ///
    /// Never fails: an unmapped product falls back to a category code and a
    /// counter failure falls back to a timestamp-derived suffix.
    pub fn generate(
        &self,
        store: &dyn SequenceStore,
        product_name: &str,
        product_category: &str,
    ) -> GeneratedOrderId {
        let resolved = self.codes.resolve(product_name, product_category);
        let day = self.clock.today();
        let key = SequenceKey::order_id(&resolved.code, day);

        let (sequence, sequence_fallback) = match store.next_value(&key) {
            Ok(seq) => (seq, false),
            Err(e) => {
                let seq = timestamp_sequence(self.clock.now());
                error!(
                    code = %resolved.code,
                    day = %day,
                    error = %e,
                    fallback_sequence = seq,
                    "Order sequence lookup failed, using timestamp-derived suffix"
                );
                (seq, true)
            }
        };

        // Codes in the table are validated at construction and the fallback
        // codes are constants, so this only formats.
        let id = OrderId(format!("{}{sequence:03}", resolved.code));
        debug!(order_id = %id, matched = ?resolved.matched, "Generated order id");

        GeneratedOrderId {
            id,
            day,
            matched: resolved.matched,
            sequence_fallback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::sequence::{MemorySequenceStore, SequenceError};

    struct DownStore;

    impl SequenceStore for DownStore {
        fn next_value(&self, _key: &SequenceKey) -> Result<u32, SequenceError> {
            Err(SequenceError::Unavailable("connection refused".into()))
        }
    }

    fn generator(clock: Arc<FixedClock>) -> OrderIdGenerator {
        OrderIdGenerator::new(ProductCodeTable::default(), clock)
    }

    fn matches_format(id: &str) -> bool {
        let prefix_len = id.len().saturating_sub(3);
        id.len() >= 5
            && id[..prefix_len].bytes().all(|b| b.is_ascii_uppercase())
            && id[prefix_len..].bytes().all(|b| b.is_ascii_digit())
    }

    #[test]
    fn test_sequential_ids_are_gapless_from_001() {
        let clock = Arc::new(FixedClock::on(2025, 9, 16));
        let order_ids = generator(clock);
        let store = MemorySequenceStore::new();

        let ids: Vec<String> = (0..5)
            .map(|_| {
                let generated = order_ids.generate(&store, "Aplikasi Absensi", "Produk");
                generated.id.to_string()
            })
            .collect();
        assert_eq!(
            ids,
            vec!["PRAPL001", "PRAPL002", "PRAPL003", "PRAPL004", "PRAPL005"]
        );
    }

    #[test]
    fn test_sequence_restarts_next_day() {
        let clock = Arc::new(FixedClock::on(2025, 9, 16));
        let order_ids = generator(clock.clone());
        let store = MemorySequenceStore::new();

        let website = |order_ids: &OrderIdGenerator| {
            order_ids.generate(&store, "Produk Website", "Produk").id
        };
        assert_eq!(website(&order_ids), "PRAWB001");
        assert_eq!(website(&order_ids), "PRAWB002");
        clock.advance_days(1);
        assert_eq!(website(&order_ids), "PRAWB001");
    }

    #[test]
    fn test_fallback_codes_and_format() {
        let clock = Arc::new(FixedClock::on(2025, 9, 16));
        let order_ids = generator(clock);
        let store = MemorySequenceStore::new();

        let generated = order_ids.generate(&store, "", "");
        assert_eq!(generated.id.as_str(), "ORDOTH001");
        assert_eq!(generated.matched, CodeMatch::Category);

        let product = order_ids.generate(&store, "Kursi", "Produk");
        assert_eq!(product.id, "PROTH001");
        let service = order_ids.generate(&store, "Kursi", "Layanan");
        assert_eq!(service.id, "LAYOTH001");
        let domain = order_ids.generate(&store, "Layanan Sewa Domain Microsoft", "Layanan");
        assert!(matches_format(&domain.id));
    }

    #[test]
    fn test_store_failure_degrades_to_timestamp_suffix() {
        let clock = Arc::new(FixedClock::on(2025, 9, 16));
        let order_ids = generator(clock.clone());

        let generated = order_ids.generate(&DownStore, "Produk Aplikasi", "Produk");
        assert!(generated.sequence_fallback);
        assert_eq!(generated.id.prefix(), "PRAPL");
        assert!(matches_format(generated.id.as_str()));
        assert_eq!(generated.id.sequence(), timestamp_sequence(clock.now()));
    }

    #[test]
    fn test_order_id_parse() {
        let id = OrderId::parse("LAYSDMM042").unwrap();
        assert_eq!(id.prefix(), "LAYSDMM");
        assert_eq!(id.sequence(), 42);

        assert!(OrderId::parse("prapl001").is_err());
        assert!(OrderId::parse("PRAPL01").is_err());
        assert!(OrderId::parse("P001").is_err());
        assert!(OrderId::parse("ABCDEFGHI001").is_err());
        assert!(OrderId::parse("PRAPL1000").is_err());
        assert_eq!(OrderId::new("PRAWB", 7).unwrap().as_str(), "PRAWB007");
    }

    #[test]
    fn test_order_id_serde() {
        let id: OrderId = serde_json::from_str("\"PRAPL001\"").unwrap();
        assert_eq!(id.as_str(), "PRAPL001");
        assert!(serde_json::from_str::<OrderId>("\"bad\"").is_err());
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"PRAPL001\"");
    }
}
