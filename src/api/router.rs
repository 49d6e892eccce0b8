use super::error::err;
use super::handlers;
use super::types::{ApiRequest, ApiResponse, AppState};

pub fn handle_request(state: &mut AppState, req: ApiRequest) -> ApiResponse {
    if let Some(resp) = handlers::core::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::timetable::try_handle(state, &req) {
        return resp;
    }

    err(
        &req.id,
        404,
        "not_implemented",
        format!("unknown route: {} {}", req.method, req.path),
        None,
    )
}
