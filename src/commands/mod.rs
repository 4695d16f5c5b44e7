//! JSON boundary handlers.
//!
//! Each handler takes the loosely-shaped payload a dashboard or webhook
//! sends (camelCase or snake_case keys, or a bare id string), delegates to
//! `OrderService`, and answers with a JSON value or a user-readable error
//! string.

pub mod orders;
pub mod payments;

use serde::Serialize;
use serde_json::Value;

use crate::error::OrderError;

pub(crate) const ORDER_KEY_FIELDS: &[&str] = &["orderId", "order_id", "id"];

pub(crate) fn value_str(v: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = v.get(*key).and_then(|x| x.as_str()) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

pub(crate) fn payload_arg0_as_string(arg0: Option<Value>, keys: &[&str]) -> Option<String> {
    match arg0 {
        Some(Value::String(s)) => {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        }
        Some(Value::Object(obj)) => value_str(&Value::Object(obj), keys),
        _ => None,
    }
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<Value, String> {
    serde_json::to_value(value).map_err(|e| format!("serialize response: {e}"))
}

pub(crate) fn err_string(e: OrderError) -> String {
    e.to_string()
}
