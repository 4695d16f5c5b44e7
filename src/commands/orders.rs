use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;

use super::{err_string, payload_arg0_as_string, to_json, value_str, ORDER_KEY_FIELDS};
use crate::orders::{NewOrder, OrderService};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdminStatusPayload {
    #[serde(alias = "order_id")]
    #[serde(alias = "id")]
    order_id: String,
    #[serde(default, alias = "admin_status", alias = "status")]
    admin_status: Option<String>,
}

fn parse_new_order(payload: Value) -> Result<NewOrder, String> {
    let payload = payload.get("orderData").cloned().unwrap_or(payload);
    if !payload.is_object() {
        return Err("Order payload must be an object".into());
    }
    let parsed: NewOrder =
        serde_json::from_value(payload).map_err(|e| format!("Invalid order payload: {e}"))?;
    if parsed.total_amount < 0 {
        return Err("totalAmount must not be negative".into());
    }
    Ok(parsed)
}

fn parse_admin_status_payload(
    arg0: Option<Value>,
    arg1: Option<String>,
) -> Result<AdminStatusPayload, String> {
    let payload = match arg0 {
        Some(Value::Object(mut obj)) => {
            let has_status = ["adminStatus", "admin_status", "status"]
                .iter()
                .any(|k| obj.contains_key(*k));
            if !has_status {
                if let Some(status) = arg1 {
                    obj.insert("adminStatus".to_string(), Value::String(status));
                }
            }
            Value::Object(obj)
        }
        Some(Value::String(order_id)) => {
            serde_json::json!({ "orderId": order_id, "adminStatus": arg1 })
        }
        Some(v) => v,
        None => serde_json::json!({ "adminStatus": arg1 }),
    };
    let mut parsed: AdminStatusPayload = serde_json::from_value(payload)
        .map_err(|e| format!("Invalid admin status payload: {e}"))?;
    parsed.order_id = parsed.order_id.trim().to_string();
    if parsed.order_id.is_empty() {
        return Err("Missing orderId".into());
    }
    Ok(parsed)
}

fn parse_day(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| format!("Invalid day '{raw}', expected YYYY-MM-DD"))
}

pub fn order_create(arg0: Option<Value>, service: &OrderService) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing order payload")?;
    let new_order = parse_new_order(payload)?;
    let created = service.create_order(&new_order).map_err(err_string)?;
    let status = created.order.status_view();

    Ok(serde_json::json!({
        "success": true,
        "orderId": created.order.order_id,
        "id": created.order.id,
        "deduplicated": created.deduplicated,
        "sequenceFallback": created.sequence_fallback,
        "order": to_json(&created.order)?,
        "status": to_json(&status)?,
    }))
}

pub fn order_get(
    arg0: Option<Value>,
    arg1: Option<String>,
    service: &OrderService,
) -> Result<Value, String> {
    let key = payload_arg0_as_string(arg0, ORDER_KEY_FIELDS)
        .or(arg1)
        .ok_or("Missing order ID")?;
    let order = service.order_status(&key).map_err(err_string)?;
    to_json(&order)
}

pub fn orders_list(arg0: Option<Value>, service: &OrderService) -> Result<Value, String> {
    let day = match &arg0 {
        Some(Value::String(raw)) if !raw.trim().is_empty() => Some(parse_day(raw)?),
        Some(v @ Value::Object(_)) => value_str(v, &["day", "createdDay", "created_day"])
            .map(|raw| parse_day(&raw))
            .transpose()?,
        _ => None,
    };
    let orders = service.list_orders(day).map_err(err_string)?;
    Ok(serde_json::json!({
        "success": true,
        "count": orders.len(),
        "orders": to_json(&orders)?,
    }))
}

pub fn order_update_admin_status(
    arg0: Option<Value>,
    arg1: Option<String>,
    service: &OrderService,
) -> Result<Value, String> {
    let payload = parse_admin_status_payload(arg0, arg1)?;
    let updated = service
        .set_admin_status(
            &payload.order_id,
            payload.admin_status.as_deref().unwrap_or_default(),
        )
        .map_err(err_string)?;
    Ok(serde_json::json!({
        "success": true,
        "order": to_json(&updated.order)?,
        "status": to_json(&updated.status)?,
    }))
}
