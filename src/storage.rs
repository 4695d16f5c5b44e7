//! Gateway credential storage using the OS credential store.
//!
//! On Windows this uses DPAPI (via the `keyring` crate), on macOS Keychain,
//! and on Linux the Secret Service API. The environment takes precedence;
//! the keyring is the fallback for installs that keep the server key out
//! of `.env` files.

use keyring::Entry;
use tracing::{info, warn};

use crate::error::{OrderError, OrderResult};

const SERVICE_NAME: &str = "cowork-orders";

pub const KEY_MIDTRANS_SERVER_KEY: &str = "midtrans_server_key";

/// Retrieve a single credential from the OS keyring. Returns `None` when the
/// entry does not exist (or the platform returns a "not found" error).
pub fn get_credential(key: &str) -> Option<String> {
    let entry = match Entry::new(SERVICE_NAME, key) {
        Ok(e) => e,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to create entry");
            return None;
        }
    };
    match entry.get_password() {
        Ok(pw) if !pw.trim().is_empty() => Some(pw.trim().to_string()),
        Ok(_) | Err(keyring::Error::NoEntry) => None,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to read credential");
            None
        }
    }
}

/// Store a credential in the OS keyring.
pub fn set_credential(key: &str, value: &str) -> OrderResult<()> {
    let entry =
        Entry::new(SERVICE_NAME, key).map_err(|e| OrderError::Credential(e.to_string()))?;
    entry
        .set_password(value)
        .map_err(|e| OrderError::Credential(e.to_string()))?;
    info!(key, "keyring: credential stored");
    Ok(())
}

pub fn gateway_server_key() -> Option<String> {
    get_credential(KEY_MIDTRANS_SERVER_KEY)
}
