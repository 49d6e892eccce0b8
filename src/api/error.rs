use super::types::ApiResponse;
use crate::error::StoreError;
use crate::session::AuthError;
use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> ApiResponse {
    with_status(id, 200, result)
}

pub fn created(id: &str, result: serde_json::Value) -> ApiResponse {
    with_status(id, 201, result)
}

fn with_status(id: &str, status: u16, result: serde_json::Value) -> ApiResponse {
    ApiResponse {
        status,
        body: json!({
            "id": id,
            "ok": true,
            "result": result
        }),
    }
}

pub fn err(
    id: &str,
    status: u16,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> ApiResponse {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    ApiResponse {
        status,
        body: json!({
            "id": id,
            "ok": false,
            "error": error,
        }),
    }
}

pub fn store_err(id: &str, e: &StoreError) -> ApiResponse {
    match e {
        StoreError::NotFound { entity, key } => err(
            id,
            404,
            "not_found",
            e.to_string(),
            Some(json!({ "entity": entity, "key": key })),
        ),
        StoreError::Unavailable(_) => {
            tracing::error!(error = %e, request_id = id, "storage failure");
            err(
                id,
                500,
                "storage_unavailable",
                e.to_string(),
                Some(json!({ "retryable": true })),
            )
        }
    }
}

pub fn auth_err(id: &str, e: &AuthError) -> ApiResponse {
    let code = match e {
        AuthError::Unauthenticated(_) => "unauthenticated",
        AuthError::InvalidCredential(_) | AuthError::Encoding(_) => "invalid_credential",
        AuthError::StaleIdentity { .. } => "stale_identity",
        AuthError::Storage(store) => return store_err(id, store),
    };
    tracing::warn!(request_id = id, code, error = %e, "request rejected by session guard");
    err(id, 401, code, e.to_string(), None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_storage_is_retryable_500() {
        let resp = store_err("r1", &StoreError::Unavailable(rusqlite::Error::InvalidQuery));
        assert_eq!(resp.status, 500);
        assert_eq!(resp.body["ok"], json!(false));
        assert_eq!(resp.body["error"]["code"], json!("storage_unavailable"));
        assert_eq!(resp.body["error"]["details"]["retryable"], json!(true));
    }

    #[test]
    fn missing_row_is_404_with_entity() {
        let resp = store_err("r2", &StoreError::not_found("batch", 7));
        assert_eq!(resp.status, 404);
        assert_eq!(resp.body["error"]["details"], json!({ "entity": "batch", "key": "7" }));
    }
}
