//! Order persistence for the order core.
//!
//! Implements order creation (id assignment inside the insert transaction),
//! admin stage updates, and payment reconciliation. Invoice numbers are
//! issued inside the same transaction as the payment status update that
//! triggers them, guarded by `invoice_number IS NULL`, so duplicate webhook
//! deliveries and status polls never issue a second invoice.
//!
//! Orders are addressed either by their row id (a UUID, also used as the
//! gateway transaction reference) or by their human-facing order id. Order
//! ids restart daily, so on reads a bare order id resolves to the most
//! recent order carrying it. Writes only accept a bare order id that
//! matches exactly one order.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::db::DbState;
use crate::error::{OrderError, OrderResult};
use crate::gateway::{fetch_with_fallback, PaymentGateway, DEFAULT_GATEWAY_TIMEOUT};
use crate::invoice::{is_paid_transition, InvoiceGenerator, InvoiceNumber};
use crate::order_id::{GeneratedOrderId, OrderId, OrderIdGenerator};
use crate::product_code::ProductCodeTable;
use crate::sequence::SqliteSequenceStore;
use crate::status::{reconcile, AdminStatus, PaymentSnapshot, StatusView};

const ORDER_COLUMNS: &str = "id, order_id, invoice_number, client_request_id, product_name, \
     product_category, customer_id, total_amount, payment_status, fraud_status, admin_status, \
     paid_at, created_day, created_at, updated_at";

/// Attempts per id assignment: the first try plus one recompute after a
/// uniqueness conflict.
const ASSIGNMENT_ATTEMPTS: u32 = 2;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub order_id: OrderId,
    pub invoice_number: Option<InvoiceNumber>,
    pub client_request_id: Option<String>,
    pub product_name: String,
    pub product_category: String,
    pub customer_id: Option<String>,
    pub total_amount: i64,
    pub payment_status: String,
    pub fraud_status: Option<String>,
    pub admin_status: Option<String>,
    pub paid_at: Option<String>,
    pub created_day: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Order {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            order_id: row.get(1)?,
            invoice_number: row.get(2)?,
            client_request_id: row.get(3)?,
            product_name: row.get(4)?,
            product_category: row.get(5)?,
            customer_id: row.get(6)?,
            total_amount: row.get(7)?,
            payment_status: row.get(8)?,
            fraud_status: row.get(9)?,
            admin_status: row.get(10)?,
            paid_at: row.get(11)?,
            created_day: row.get(12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }

    pub fn payment_snapshot(&self) -> PaymentSnapshot {
        PaymentSnapshot::new(&self.payment_status, self.fraud_status.as_deref())
    }

    pub fn admin_stage(&self) -> Option<AdminStatus> {
        AdminStatus::from_stored(self.admin_status.as_deref())
    }

    pub fn status_view(&self) -> StatusView {
        reconcile(self.admin_stage(), &self.payment_snapshot(), None)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    #[serde(default, alias = "product_name")]
    pub product_name: String,
    #[serde(default, alias = "product_category")]
    pub product_category: String,
    #[serde(default, alias = "customer_id")]
    pub customer_id: Option<String>,
    #[serde(default, alias = "total_amount")]
    pub total_amount: i64,
    #[serde(default, alias = "client_request_id")]
    pub client_request_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedOrder {
    pub order: Order,
    pub deduplicated: bool,
    pub sequence_fallback: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderWithStatus {
    pub order: Order,
    pub status: StatusView,
}

impl From<Order> for OrderWithStatus {
    fn from(order: Order) -> Self {
        let status = order.status_view();
        Self { order, status }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileOutcome {
    pub order: Order,
    pub status: StatusView,
    pub invoice_issued: bool,
    pub payment_status_changed: bool,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct OrderService {
    db: Arc<DbState>,
    clock: Arc<dyn Clock>,
    order_ids: OrderIdGenerator,
    invoices: InvoiceGenerator,
    gateway: Option<Arc<dyn PaymentGateway>>,
    gateway_timeout: Duration,
}

impl OrderService {
    pub fn new(db: Arc<DbState>, codes: ProductCodeTable, clock: Arc<dyn Clock>) -> Self {
        Self {
            order_ids: OrderIdGenerator::new(codes, clock.clone()),
            invoices: InvoiceGenerator::new(clock.clone()),
            db,
            clock,
            gateway: None,
            gateway_timeout: DEFAULT_GATEWAY_TIMEOUT,
        }
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn PaymentGateway>, timeout: Duration) -> Self {
        self.gateway = Some(gateway);
        self.gateway_timeout = timeout;
        self
    }

    pub fn db(&self) -> &DbState {
        &self.db
    }

    // -- Creation ------------------------------------------------------------

    /// Create an order and assign its order id in the insert transaction.
    ///
    /// A repeated `client_request_id` returns the existing order without
    /// drawing a new sequence number. A uniqueness conflict on the order id
    /// is retried once with a recomputed sequence.
    pub fn create_order(&self, new: &NewOrder) -> OrderResult<CreatedOrder> {
        let mut conn = self.db.lock()?;

        let client_request_id = new
            .client_request_id
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty());

        if let Some(req_id) = client_request_id {
            let existing = conn
                .query_row(
                    &format!("SELECT {ORDER_COLUMNS} FROM orders WHERE client_request_id = ?1 LIMIT 1"),
                    params![req_id],
                    Order::from_row,
                )
                .optional()?;
            if let Some(order) = existing {
                info!(
                    order_id = %order.order_id,
                    client_request_id = %req_id,
                    "Order create deduplicated via client_request_id"
                );
                return Ok(CreatedOrder {
                    order,
                    deduplicated: true,
                    sequence_fallback: false,
                });
            }
        }

        let mut last_collision = String::new();
        for attempt in 1..=ASSIGNMENT_ATTEMPTS {
            let tx = conn.transaction()?;
            let generated = self.order_ids.generate(
                &SqliteSequenceStore::new(&tx),
                &new.product_name,
                &new.product_category,
            );

            match insert_order(&tx, &generated, new, client_request_id, self.clock.now()) {
                Ok(order) => {
                    tx.commit()?;
                    info!(
                        order_id = %order.order_id,
                        id = %order.id,
                        product = %order.product_name,
                        "Order created"
                    );
                    return Ok(CreatedOrder {
                        order,
                        deduplicated: false,
                        sequence_fallback: generated.sequence_fallback,
                    });
                }
                Err(e) if e.is_unique_violation() => {
                    warn!(
                        order_id = %generated.id,
                        attempt,
                        "Order id already taken, recomputing sequence"
                    );
                    last_collision = generated.id.to_string();
                }
                Err(e) => return Err(e),
            }
        }

        Err(OrderError::DuplicateAssignment {
            field: "order_id",
            value: last_collision,
        })
    }

    // -- Reads ---------------------------------------------------------------

    pub fn get_order(&self, key: &str) -> OrderResult<Order> {
        let conn = self.db.lock()?;
        find_order(&conn, key)
    }

    /// Order with its merged display status, from stored state only.
    pub fn order_status(&self, key: &str) -> OrderResult<OrderWithStatus> {
        self.get_order(key).map(OrderWithStatus::from)
    }

    /// Orders newest first, optionally restricted to one creation day.
    pub fn list_orders(&self, day: Option<NaiveDate>) -> OrderResult<Vec<OrderWithStatus>> {
        let conn = self.db.lock()?;
        let day = day.map(|d| d.format("%Y-%m-%d").to_string());
        let mut stmt = conn.prepare(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders
             WHERE (?1 IS NULL OR created_day = ?1)
             ORDER BY created_at DESC, order_id DESC"
        ))?;
        let orders = stmt
            .query_map(params![day], Order::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(orders.into_iter().map(OrderWithStatus::from).collect())
    }

    // -- Admin stage ---------------------------------------------------------

    /// Set (or clear, with a blank value) the admin processing stage. This
    /// never touches payment fields.
    pub fn set_admin_status(&self, key: &str, raw_status: &str) -> OrderResult<OrderWithStatus> {
        let stage = AdminStatus::parse(raw_status)?;
        let conn = self.db.lock()?;
        let order = find_order_for_update(&conn, key)?;

        conn.execute(
            "UPDATE orders SET admin_status = ?1, updated_at = ?2 WHERE id = ?3",
            params![
                stage.map(|s| s.as_str()),
                self.clock.now().to_rfc3339(),
                order.id
            ],
        )?;
        info!(
            order_id = %order.order_id,
            admin_status = stage.map(|s| s.as_str()).unwrap_or("(cleared)"),
            "Admin status updated"
        );

        find_by_id(&conn, &order.id).map(OrderWithStatus::from)
    }

    // -- Payment reconciliation ----------------------------------------------

    /// Apply a gateway-reported status to an order.
    ///
    /// Persists the raw status, and on the first paid transition issues an
    /// invoice number and stamps `paid_at` in the same transaction. Repeated
    /// deliveries of a paid status are no-ops. A bare order id carried by
    /// orders on several days is rejected with `AmbiguousOrderId`.
    pub fn reconcile_and_persist(
        &self,
        key: &str,
        snapshot: &PaymentSnapshot,
    ) -> OrderResult<ReconcileOutcome> {
        let mut conn = self.db.lock()?;
        let tx = conn.transaction()?;
        let order = find_order_for_update(&tx, key)?;

        let payment_status_changed = order.payment_status != snapshot.transaction_status
            || order.fraud_status != snapshot.fraud_status;
        let paid = is_paid_transition(
            &snapshot.transaction_status,
            snapshot.fraud_status.as_deref(),
        );
        let now = self.clock.now().to_rfc3339();

        let mut invoice_issued = false;
        if paid && order.invoice_number.is_none() {
            invoice_issued = self.issue_invoice(&tx, &order, snapshot, &now)?;
        } else {
            if paid {
                debug!(
                    order_id = %order.order_id,
                    invoice_number = order.invoice_number.as_deref().unwrap_or_default(),
                    "Invoice already issued, skipping"
                );
            }
            if payment_status_changed {
                update_payment_status(&tx, &order.id, snapshot, &now)?;
            }
        }

        let updated = find_by_id(&tx, &order.id)?;
        tx.commit()?;

        if payment_status_changed {
            info!(
                order_id = %updated.order_id,
                from = %order.payment_status,
                to = %updated.payment_status,
                "Payment status updated"
            );
        }

        Ok(ReconcileOutcome {
            status: updated.status_view(),
            order: updated,
            invoice_issued,
            payment_status_changed,
        })
    }

    fn issue_invoice(
        &self,
        tx: &Connection,
        order: &Order,
        snapshot: &PaymentSnapshot,
        now: &str,
    ) -> OrderResult<bool> {
        let mut last_collision = String::new();
        for attempt in 1..=ASSIGNMENT_ATTEMPTS {
            let invoice = self.invoices.next(&SqliteSequenceStore::new(tx));
            let result = tx.execute(
                "UPDATE orders SET
                    payment_status = ?1,
                    fraud_status = ?2,
                    invoice_number = ?3,
                    paid_at = ?4,
                    updated_at = ?4
                 WHERE id = ?5 AND invoice_number IS NULL",
                params![
                    snapshot.transaction_status,
                    snapshot.fraud_status,
                    invoice,
                    now,
                    order.id
                ],
            );

            match result.map_err(OrderError::from) {
                Ok(0) => {
                    // Another writer issued first; only the raw status moves.
                    update_payment_status(tx, &order.id, snapshot, now)?;
                    return Ok(false);
                }
                Ok(_) => {
                    info!(
                        order_id = %order.order_id,
                        invoice_number = %invoice,
                        "Invoice issued on first paid transition"
                    );
                    return Ok(true);
                }
                Err(e) if e.is_unique_violation() => {
                    warn!(
                        invoice_number = %invoice,
                        attempt,
                        "Invoice number already taken, recomputing sequence"
                    );
                    last_collision = invoice.to_string();
                }
                Err(e) => return Err(e),
            }
        }

        Err(OrderError::DuplicateAssignment {
            field: "invoice_number",
            value: last_collision,
        })
    }

    /// Refresh an order's payment status from the live gateway and return
    /// the merged view. Gateway failures fall back to the stored status.
    pub async fn refresh_payment_status(&self, key: &str) -> OrderResult<OrderWithStatus> {
        let order = {
            let conn = self.db.lock()?;
            find_order_for_update(&conn, key)?
        };

        let Some(gateway) = self.gateway.as_deref() else {
            return Ok(OrderWithStatus::from(order));
        };

        match fetch_with_fallback(gateway, &order.id, self.gateway_timeout).await {
            Some(snapshot) => {
                let outcome = self.reconcile_and_persist(&order.id, &snapshot)?;
                Ok(OrderWithStatus {
                    order: outcome.order,
                    status: outcome.status,
                })
            }
            None => Ok(OrderWithStatus::from(order)),
        }
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

fn insert_order(
    conn: &Connection,
    generated: &GeneratedOrderId,
    new: &NewOrder,
    client_request_id: Option<&str>,
    now: DateTime<Utc>,
) -> OrderResult<Order> {
    let id = Uuid::new_v4().to_string();
    let now = now.to_rfc3339();

    conn.execute(
        "INSERT INTO orders (
            id, order_id, client_request_id, product_name, product_category,
            customer_id, total_amount, payment_status, created_day, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', ?8, ?9, ?9)",
        params![
            id,
            generated.id,
            client_request_id,
            new.product_name.trim(),
            new.product_category.trim(),
            new.customer_id,
            new.total_amount,
            generated.day.format("%Y-%m-%d").to_string(),
            now,
        ],
    )?;

    find_by_id(conn, &id)
}

fn update_payment_status(
    conn: &Connection,
    id: &str,
    snapshot: &PaymentSnapshot,
    now: &str,
) -> OrderResult<()> {
    conn.execute(
        "UPDATE orders SET payment_status = ?1, fraud_status = ?2, updated_at = ?3 WHERE id = ?4",
        params![snapshot.transaction_status, snapshot.fraud_status, now, id],
    )?;
    Ok(())
}

fn find_by_id(conn: &Connection, id: &str) -> OrderResult<Order> {
    conn.query_row(
        &format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?1"),
        params![id],
        Order::from_row,
    )
    .optional()?
    .ok_or_else(|| OrderError::OrderNotFound(id.to_string()))
}

/// Resolve by row id first, then by order id (latest day wins). Read paths
/// only.
fn find_order(conn: &Connection, key: &str) -> OrderResult<Order> {
    let key = key.trim();
    conn.query_row(
        &format!(
            "SELECT {ORDER_COLUMNS} FROM orders
             WHERE id = ?1 OR order_id = ?1
             ORDER BY (id = ?1) DESC, created_day DESC, created_at DESC
             LIMIT 1"
        ),
        params![key],
        Order::from_row,
    )
    .optional()?
    .ok_or_else(|| OrderError::OrderNotFound(key.to_string()))
}

/// Resolve for a write: a row id, or an order id carried by exactly one
/// order.
fn find_order_for_update(conn: &Connection, key: &str) -> OrderResult<Order> {
    let key = key.trim();
    let by_row_id = conn
        .query_row(
            &format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?1"),
            params![key],
            Order::from_row,
        )
        .optional()?;
    if let Some(order) = by_row_id {
        return Ok(order);
    }

    let mut stmt = conn.prepare(&format!(
        "SELECT {ORDER_COLUMNS} FROM orders WHERE order_id = ?1 LIMIT 2"
    ))?;
    let mut matches = stmt
        .query_map(params![key], Order::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    if matches.len() > 1 {
        warn!(
            order_id = %key,
            "Order id is carried by orders on several days, refusing write"
        );
        return Err(OrderError::AmbiguousOrderId(key.to_string()));
    }
    matches
        .pop()
        .ok_or_else(|| OrderError::OrderNotFound(key.to_string()))
}

// ===========================================================================
// Tests
// ===========================================================================
