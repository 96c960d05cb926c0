use crate::error::ScoreError;
use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

pub fn no_workspace(id: &str) -> serde_json::Value {
    err(id, "no_workspace", "select a workspace first", None)
}

/// Maps engine error kinds to protocol codes. Storage failures are logged
/// and reported with a generic message.
pub fn score_err(id: &str, e: &ScoreError) -> serde_json::Value {
    match e {
        ScoreError::Validation(m) => err(id, "bad_params", m.as_str(), None),
        ScoreError::NotFound(m) => err(id, "not_found", m.as_str(), None),
        ScoreError::Conflict(m) => err(id, "conflict", m.as_str(), None),
        ScoreError::Storage(inner) => {
            tracing::error!(request_id = %id, error = %inner, "storage failure");
            err(id, "db_failed", "storage failure", None)
        }
    }
}
