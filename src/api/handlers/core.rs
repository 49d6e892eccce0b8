use crate::api::error::ok;
use crate::api::types::{ApiRequest, ApiResponse, AppState};
use serde_json::json;

fn handle_health(state: &mut AppState, req: &ApiRequest) -> ApiResponse {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "maxPeriods": state.config.schedule.max_periods,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &ApiRequest) -> Option<ApiResponse> {
    match (req.method.as_str(), req.path.as_str()) {
        ("GET", "/health") => Some(handle_health(state, req)),
        _ => None,
    }
}
