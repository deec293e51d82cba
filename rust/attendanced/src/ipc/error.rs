use super::types::{ErrorBody, Response};
use serde_json::Value;

fn to_value(resp: Response<'_>) -> Value {
    // Envelopes hold only strings and JSON values, so this cannot fail.
    serde_json::to_value(resp).unwrap_or(Value::Null)
}

pub fn ok(id: &str, result: Value) -> Value {
    to_value(Response {
        id,
        ok: true,
        result: Some(result),
        error: None,
    })
}

pub fn err(id: &str, code: &str, message: impl Into<String>, details: Option<Value>) -> Value {
    to_value(Response {
        id,
        ok: false,
        result: None,
        error: Some(ErrorBody {
            code,
            message: message.into(),
            details,
        }),
    })
}
