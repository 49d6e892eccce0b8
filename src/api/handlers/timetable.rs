use crate::api::error::{auth_err, created, err, ok, store_err};
use crate::api::types::{ApiRequest, ApiResponse, AppState};
use crate::authz::{capable_of, Action, Scope};
use crate::error::StoreError;
use crate::hierarchy;
use crate::session::{self, Identity};
use crate::timetable::{
    propose_slot, remove_slot, store, Outcome, RawSlotKey, RemoveOutcome, SlotProposal, Violation,
};
use serde_json::json;

/// Runs the session guard; on failure returns the response to send instead.
fn authenticate(state: &AppState, req: &ApiRequest) -> Result<Identity, ApiResponse> {
    session::authenticate(
        &state.db,
        &state.config.auth,
        req.authorization.as_deref(),
    )
    .map_err(|e| auth_err(&req.id, &e))
}

fn reason_json(v: &Violation) -> serde_json::Value {
    let mut value = serde_json::to_value(v).unwrap_or_else(|_| json!({ "code": v.code() }));
    value["message"] = json!(v.to_string());
    value
}

fn rejected(req: &ApiRequest, reasons: &[Violation]) -> ApiResponse {
    let forbidden = reasons
        .iter()
        .any(|r| matches!(r, Violation::Forbidden { .. }));
    let (status, code) = if forbidden {
        (403, "forbidden")
    } else {
        (409, "slot_rejected")
    };
    let mut resp = err(
        &req.id,
        status,
        code,
        format!("{} rule(s) violated", reasons.len()),
        None,
    );
    resp.body["reasons"] = json!(reasons.iter().map(reason_json).collect::<Vec<_>>());
    resp
}

/// `GET /timetable?batchId&sectionId`. Reads pass the session guard too, so
/// a missing or stale credential is 401 before the 200/404 outcomes.
fn handle_timetable_get(state: &mut AppState, req: &ApiRequest) -> ApiResponse {
    let identity = match authenticate(state, req) {
        Ok(i) => i,
        Err(resp) => return resp,
    };
    let (batch_id, section_id) = match (req.query_i64("batchId"), req.query_i64("sectionId")) {
        (Ok(b), Ok(s)) => (b, s),
        (Err(e), _) | (_, Err(e)) => return err(&req.id, 400, "bad_params", e, None),
    };
    if !capable_of(identity.role, Action::ReadTimetable).is_granted() {
        return err(&req.id, 403, "forbidden", "cannot read the timetable", None);
    }

    let batch = match hierarchy::resolve_batch(&state.db, batch_id) {
        Ok(b) => b,
        Err(e) => return store_err(&req.id, &e),
    };
    let section = match hierarchy::resolve_section(&state.db, section_id) {
        Ok(section) if section.batch_id != batch_id => {
            return store_err(
                &req.id,
                &StoreError::not_found("section", format!("{section_id} in batch {batch_id}")),
            );
        }
        Ok(section) => section,
        Err(e) => return store_err(&req.id, &e),
    };

    match store::get(&state.db, batch_id, section_id) {
        Ok(slots) => ok(
            &req.id,
            json!({
                "batch": {
                    "id": batch.id,
                    "startYear": batch.start_year,
                    "endYear": batch.end_year,
                    "currentSemester": batch.current_semester,
                },
                "section": { "id": section.id, "name": section.name },
                "slots": slots,
            }),
        ),
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_faculty_schedule(state: &mut AppState, req: &ApiRequest) -> ApiResponse {
    let identity = match authenticate(state, req) {
        Ok(i) => i,
        Err(resp) => return resp,
    };
    let faculty_id = match req.query_i64("facultyId") {
        Ok(v) => v,
        Err(e) => return err(&req.id, 400, "bad_params", e, None),
    };
    let allowed = match capable_of(identity.role, Action::ReadFacultySchedule) {
        Scope::Institution => true,
        Scope::OwnRecords => identity.user_id == faculty_id,
        Scope::AssignedSections | Scope::Denied => false,
    };
    if !allowed {
        return err(
            &req.id,
            403,
            "forbidden",
            format!("cannot read the schedule of user {faculty_id}"),
            None,
        );
    }

    match store::faculty_schedule(&state.db, faculty_id) {
        Ok(slots) => ok(&req.id, json!({ "facultyId": faculty_id, "slots": slots })),
        Err(e) => store_err(&req.id, &e),
    }
}

/// POST creates; PUT updates the slot at `update_key`, defaulting to the
/// proposal's own key.
fn handle_timetable_write(state: &mut AppState, req: &ApiRequest, is_update: bool) -> ApiResponse {
    let identity = match authenticate(state, req) {
        Ok(i) => i,
        Err(resp) => return resp,
    };
    let mut proposal: SlotProposal = match serde_json::from_str(&req.body) {
        Ok(p) => p,
        Err(e) => return err(&req.id, 400, "bad_json", e.to_string(), None),
    };
    if is_update && proposal.update_key.is_none() {
        proposal.update_key = Some(RawSlotKey {
            batch_id: proposal.batch_id,
            section_id: proposal.section_id,
            day: proposal.day.clone(),
            period: proposal.period,
        });
    }

    let today = chrono::Local::now().date_naive();
    match propose_slot(&mut state.db, &state.config.schedule, &identity, &proposal, today) {
        Ok(Outcome::Accepted {
            slot,
            replaced,
            warnings,
        }) => {
            let result = json!({
                "slot": slot,
                "replaced": replaced,
                "warnings": warnings.iter().map(reason_json).collect::<Vec<_>>(),
            });
            if replaced {
                ok(&req.id, result)
            } else {
                created(&req.id, result)
            }
        }
        Ok(Outcome::Rejected(reasons)) => rejected(req, &reasons),
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_timetable_delete(state: &mut AppState, req: &ApiRequest) -> ApiResponse {
    let identity = match authenticate(state, req) {
        Ok(i) => i,
        Err(resp) => return resp,
    };
    let key = match (
        req.query_i64("batchId"),
        req.query_i64("sectionId"),
        req.query_str("day"),
        req.query_i64("period"),
    ) {
        (Ok(batch_id), Ok(section_id), Ok(day), Ok(period)) => RawSlotKey {
            batch_id,
            section_id,
            day: day.to_string(),
            period,
        },
        (Err(e), ..) | (_, Err(e), ..) | (_, _, Err(e), _) | (.., Err(e)) => {
            return err(&req.id, 400, "bad_params", e, None)
        }
    };

    match remove_slot(&mut state.db, &state.config.schedule, &identity, &key) {
        Ok(RemoveOutcome::Removed(slot)) => ok(&req.id, json!({ "removed": slot })),
        Ok(RemoveOutcome::Empty) => err(
            &req.id,
            404,
            "not_found",
            format!(
                "no slot at batch {} section {} {} period {}",
                key.batch_id, key.section_id, key.day, key.period
            ),
            None,
        ),
        Ok(RemoveOutcome::Rejected(reasons)) => rejected(req, &reasons),
        Err(e) => store_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &ApiRequest) -> Option<ApiResponse> {
    match (req.method.as_str(), req.path.as_str()) {
        ("GET", "/timetable") => Some(handle_timetable_get(state, req)),
        ("POST", "/timetable") => Some(handle_timetable_write(state, req, false)),
        ("PUT", "/timetable") => Some(handle_timetable_write(state, req, true)),
        ("DELETE", "/timetable") => Some(handle_timetable_delete(state, req)),
        ("GET", "/timetable/faculty") => Some(handle_faculty_schedule(state, req)),
        _ => None,
    }
}
