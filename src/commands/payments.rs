use serde_json::Value;
use tracing::info;

use super::{err_string, payload_arg0_as_string, to_json, value_str, ORDER_KEY_FIELDS};
use crate::gateway::parse_status_body;
use crate::orders::OrderService;
use crate::storage;

/// Gateway payment notification (webhook). Duplicate deliveries are safe:
/// the invoice is only issued on the first paid transition.
pub fn payment_notification(arg0: Option<Value>, service: &OrderService) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing notification payload")?;
    let order_key = value_str(&payload, ORDER_KEY_FIELDS).ok_or("Missing order_id")?;
    let snapshot = parse_status_body(&payload).map_err(err_string)?;

    info!(
        order = %order_key,
        transaction_status = %snapshot.transaction_status,
        "Payment notification received"
    );

    let outcome = service
        .reconcile_and_persist(&order_key, &snapshot)
        .map_err(err_string)?;
    let mut resp = to_json(&outcome)?;
    if let Some(obj) = resp.as_object_mut() {
        obj.insert("success".to_string(), Value::Bool(true));
    }
    Ok(resp)
}

/// Poll the gateway for an order's live status. Falls back to the stored
/// status when the gateway is unreachable.
pub async fn payment_refresh(
    arg0: Option<Value>,
    arg1: Option<String>,
    service: &OrderService,
) -> Result<Value, String> {
    let key = payload_arg0_as_string(arg0, ORDER_KEY_FIELDS)
        .or(arg1)
        .ok_or("Missing order ID")?;
    let refreshed = service
        .refresh_payment_status(&key)
        .await
        .map_err(err_string)?;
    to_json(&refreshed)
}

/// Store the gateway server key in the OS keyring.
pub fn payment_set_server_key(arg0: Option<Value>) -> Result<Value, String> {
    let key = payload_arg0_as_string(arg0, &["serverKey", "server_key"])
        .ok_or("Missing serverKey")?;
    storage::set_credential(storage::KEY_MIDTRANS_SERVER_KEY, &key).map_err(err_string)?;
    Ok(serde_json::json!({ "success": true }))
}
