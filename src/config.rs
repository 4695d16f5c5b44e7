//! Runtime configuration from the environment (and `.env` when present).

use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{OrderError, OrderResult};
use crate::gateway::{normalize_base_url, DEFAULT_GATEWAY_TIMEOUT, SANDBOX_BASE_URL};
use crate::product_code::{CodeEntry, ProductCodeTable};
use crate::storage;

pub const ENV_DATA_DIR: &str = "COWORK_DATA_DIR";
pub const ENV_MIDTRANS_BASE_URL: &str = "MIDTRANS_BASE_URL";
pub const ENV_MIDTRANS_SERVER_KEY: &str = "MIDTRANS_SERVER_KEY";
pub const ENV_MIDTRANS_TIMEOUT_MS: &str = "MIDTRANS_TIMEOUT_MS";
pub const ENV_PRODUCT_CODES_PATH: &str = "PRODUCT_CODES_PATH";

const DEFAULT_DATA_DIR: &str = "./data";

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub server_key: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub gateway: GatewayConfig,
    pub product_codes: ProductCodeTable,
}

impl AppConfig {
    /// Load from the process environment. A missing server key falls back to
    /// the OS keyring; without either the gateway refresh is disabled.
    pub fn from_env() -> OrderResult<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self::from_lookup(|key| env::var(key).ok())?;
        if config.gateway.server_key.is_none() {
            config.gateway.server_key = storage::gateway_server_key();
            if config.gateway.server_key.is_some() {
                debug!("Gateway server key loaded from keyring");
            }
        }
        Ok(config)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> OrderResult<Self> {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let data_dir = PathBuf::from(var(ENV_DATA_DIR).unwrap_or_else(|| DEFAULT_DATA_DIR.into()));

        let base_url = normalize_base_url(
            &var(ENV_MIDTRANS_BASE_URL).unwrap_or_else(|| SANDBOX_BASE_URL.to_string()),
        );

        let timeout = match var(ENV_MIDTRANS_TIMEOUT_MS) {
            Some(raw) => {
                let ms: u64 = raw.parse().map_err(|_| {
                    OrderError::Config(format!("{ENV_MIDTRANS_TIMEOUT_MS} must be milliseconds, got '{raw}'"))
                })?;
                if ms == 0 {
                    return Err(OrderError::Config(format!(
                        "{ENV_MIDTRANS_TIMEOUT_MS} must be greater than zero"
                    )));
                }
                Duration::from_millis(ms)
            }
            None => DEFAULT_GATEWAY_TIMEOUT,
        };

        let product_codes = match var(ENV_PRODUCT_CODES_PATH) {
            Some(path) => load_product_codes(Path::new(&path))?,
            None => ProductCodeTable::default(),
        };

        Ok(Self {
            data_dir,
            gateway: GatewayConfig {
                base_url,
                server_key: var(ENV_MIDTRANS_SERVER_KEY),
                timeout,
            },
            product_codes,
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CodeFile {
    Entries(Vec<CodeEntry>),
    Wrapped { entries: Vec<CodeEntry> },
}

/// Read a product-code table from a JSON file. Accepts either a bare array
/// of `{ "matcher", "code" }` objects or `{ "entries": [...] }`.
pub fn load_product_codes(path: &Path) -> OrderResult<ProductCodeTable> {
    let content = fs::read_to_string(path).map_err(|e| {
        OrderError::Config(format!("Failed to read product codes {}: {e}", path.display()))
    })?;
    let file: CodeFile = serde_json::from_str(&content).map_err(|e| {
        OrderError::Config(format!("Failed to parse product codes {}: {e}", path.display()))
    })?;
    let entries = match file {
        CodeFile::Entries(entries) | CodeFile::Wrapped { entries } => entries,
    };
    if entries.is_empty() {
        warn!(path = %path.display(), "Product code table is empty, every order will use a fallback code");
    }

    let table = ProductCodeTable::new(entries)?;
    info!(
        path = %path.display(),
        entries = table.entries().len(),
        "Loaded product code table"
    );
    Ok(table)
}
