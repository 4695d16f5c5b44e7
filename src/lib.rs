//! Cowork Orders - order core for the coworking space dashboard.
//!
//! Assigns human-readable order ids (`PRAPL001`), issues invoice numbers
//! (`INV20250916001`) exactly once when an order is first paid, and merges
//! the admin processing stage with the gateway payment state for display.
//!
//! The `commands` module is the JSON boundary used by the dashboard and the
//! payment webhook; everything below it is plain Rust.

use anyhow::Context;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;

pub mod clock;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod invoice;
pub mod logging;
pub mod order_id;
pub mod orders;
pub mod product_code;
pub mod sequence;
pub mod status;
pub mod storage;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::AppConfig;
pub use error::{OrderError, OrderResult};
pub use gateway::{MidtransGateway, PaymentGateway};
pub use invoice::{InvoiceGenerator, InvoiceNumber};
pub use order_id::{OrderId, OrderIdGenerator};
pub use orders::{NewOrder, Order, OrderService, OrderWithStatus, ReconcileOutcome};
pub use product_code::ProductCodeTable;
pub use status::{reconcile, AdminStatus, PaymentSnapshot, PaymentState, StatusView};

/// Wired-up application: configuration, database and order service.
pub struct App {
    pub config: AppConfig,
    pub orders: OrderService,
    _log_guard: Option<WorkerGuard>,
}

impl App {
    /// Load configuration from the environment, install logging and open
    /// the database under the configured data directory.
    pub fn bootstrap() -> anyhow::Result<Self> {
        let config = AppConfig::from_env().context("Failed to load configuration")?;

        let log_dir = logging::log_dir(&config.data_dir);
        let guard = logging::init(&log_dir)
            .with_context(|| format!("Failed to initialize logging in {}", log_dir.display()))?;

        info!("Starting cowork orders v{}", env!("CARGO_PKG_VERSION"));

        let mut app = Self::with_config(config)?;
        app._log_guard = Some(guard);
        Ok(app)
    }

    /// Build the app from an explicit configuration without touching the
    /// global logger.
    pub fn with_config(config: AppConfig) -> anyhow::Result<Self> {
        let db = db::init(&config.data_dir).with_context(|| {
            format!(
                "Failed to initialize database in {}",
                config.data_dir.display()
            )
        })?;

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let mut orders = OrderService::new(Arc::new(db), config.product_codes.clone(), clock);

        match config.gateway.server_key.as_deref() {
            Some(server_key) => {
                let gateway = MidtransGateway::new(
                    &config.gateway.base_url,
                    server_key,
                    config.gateway.timeout,
                )
                .context("Failed to create payment gateway client")?;
                orders = orders.with_gateway(Arc::new(gateway), config.gateway.timeout);
                info!(base_url = %config.gateway.base_url, "Payment gateway configured");
            }
            None => {
                warn!("No gateway server key configured, payment refresh uses stored status only");
            }
        }

        Ok(Self {
            config,
            orders,
            _log_guard: None,
        })
    }
}
