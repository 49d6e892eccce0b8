//! Admission rules for timetable writes.
//!
//! A proposal is evaluated inside one `IMMEDIATE` transaction (see
//! [`store::begin_write`]) so the conflict scan and the commit see the same
//! timetable. Authorization short-circuits. Reference and value checks are
//! all reported together and stop evaluation when any fails. The conflict
//! rules (occupancy, faculty, room, semester) are all reported together.

use super::model::{RawSlotKey, SlotKey, SlotProposal, SlotType, TimetableSlot, Weekday};
use super::store::{self, PutError};
use crate::authz::{capable_of, Action, Scope};
use crate::config::ScheduleConfig;
use crate::error::StoreError;
use crate::hierarchy::{self, Batch, Subject};
use crate::session::Identity;
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// The slot a conflict was found against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompetingSlot {
    pub slot_id: String,
    pub batch_id: i64,
    pub section_id: i64,
    pub day: Weekday,
    pub period: u8,
    pub subject_code: String,
    pub faculty_id: i64,
    pub room: Option<String>,
}

impl From<&TimetableSlot> for CompetingSlot {
    fn from(s: &TimetableSlot) -> Self {
        Self {
            slot_id: s.id.clone(),
            batch_id: s.batch_id,
            section_id: s.section_id,
            day: s.day,
            period: s.period,
            subject_code: s.subject_code.clone(),
            faculty_id: s.faculty_id,
            room: s.room.clone(),
        }
    }
}

/// One violated admission rule. Also used for admin-only warnings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "code")]
pub enum Violation {
    #[error("forbidden: {message}")]
    Forbidden { message: String },

    #[error("invalid reference in {field}: {message}")]
    InvalidReference { field: &'static str, message: String },

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: &'static str, message: String },

    #[error("batch {batch_id} section {section_id} already has a slot on {day} period {period}")]
    SlotOccupied {
        batch_id: i64,
        section_id: i64,
        day: Weekday,
        period: u8,
        existing: Option<CompetingSlot>,
    },

    #[error(
        "faculty {faculty_id} already teaches batch {} section {} on {} period {}",
        .competing.batch_id, .competing.section_id, .competing.day, .competing.period
    )]
    FacultyConflict {
        faculty_id: i64,
        competing: CompetingSlot,
    },

    #[error(
        "room {room} is already used by batch {} section {} on {} period {}",
        .competing.batch_id, .competing.section_id, .competing.day, .competing.period
    )]
    RoomConflict {
        room: String,
        competing: CompetingSlot,
    },

    #[error("subject {subject_code} is a semester {subject_semester} subject but the batch is in semester {batch_semester}")]
    SemesterMismatch {
        subject_code: String,
        subject_semester: i64,
        batch_semester: i64,
    },
}

impl Violation {
    pub fn code(&self) -> &'static str {
        match self {
            Violation::Forbidden { .. } => "Forbidden",
            Violation::InvalidReference { .. } => "InvalidReference",
            Violation::InvalidValue { .. } => "InvalidValue",
            Violation::SlotOccupied { .. } => "SlotOccupied",
            Violation::FacultyConflict { .. } => "FacultyConflict",
            Violation::RoomConflict { .. } => "RoomConflict",
            Violation::SemesterMismatch { .. } => "SemesterMismatch",
        }
    }

    fn invalid_value(field: &'static str, message: impl Into<String>) -> Self {
        Violation::InvalidValue {
            field,
            message: message.into(),
        }
    }

    fn invalid_reference(field: &'static str, message: impl Into<String>) -> Self {
        Violation::InvalidReference {
            field,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Accepted {
        slot: TimetableSlot,
        /// True when an existing slot was rewritten rather than a new one created.
        replaced: bool,
        warnings: Vec<Violation>,
    },
    Rejected(Vec<Violation>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RemoveOutcome {
    Removed(TimetableSlot),
    Empty,
    Rejected(Vec<Violation>),
}

/// Everything rules 4–7 need once the structural checks have passed.
struct Validated {
    key: SlotKey,
    batch: Batch,
    subject: Subject,
    faculty_id: i64,
    room: Option<String>,
    slot_type: SlotType,
    replacing: Option<TimetableSlot>,
}

/// Evaluates `proposal` and, when every rule passes, commits it.
pub fn propose_slot(
    conn: &mut Connection,
    schedule: &ScheduleConfig,
    identity: &Identity,
    proposal: &SlotProposal,
    today: NaiveDate,
) -> Result<Outcome, StoreError> {
    let tx = store::begin_write(conn)?;
    let outcome = evaluate(&tx, schedule, identity, proposal, today)?;
    match &outcome {
        Outcome::Accepted {
            slot,
            replaced,
            warnings,
        } => {
            tx.commit()?;
            tracing::info!(
                slot_id = %slot.id,
                batch_id = slot.batch_id,
                section_id = slot.section_id,
                day = %slot.day,
                period = slot.period,
                user_id = identity.user_id,
                replaced,
                warnings = warnings.len(),
                "timetable slot accepted"
            );
        }
        Outcome::Rejected(reasons) => {
            tracing::warn!(
                batch_id = proposal.batch_id,
                section_id = proposal.section_id,
                user_id = identity.user_id,
                reasons = ?reasons.iter().map(Violation::code).collect::<Vec<_>>(),
                "timetable slot rejected"
            );
        }
    }
    Ok(outcome)
}

fn evaluate(
    conn: &Connection,
    schedule: &ScheduleConfig,
    identity: &Identity,
    proposal: &SlotProposal,
    today: NaiveDate,
) -> Result<Outcome, StoreError> {
    let mut sections = vec![proposal.section_id];
    if let Some(k) = &proposal.update_key {
        if k.section_id != proposal.section_id {
            sections.push(k.section_id);
        }
    }
    if let Some(denied) = authorize_write(conn, identity, &sections)? {
        return Ok(Outcome::Rejected(vec![denied]));
    }

    let validated = match validate_structure(conn, schedule, proposal, today)? {
        Ok(v) => v,
        Err(violations) => return Ok(Outcome::Rejected(violations)),
    };

    let mut violations = Vec::new();
    let mut warnings = Vec::new();
    let key = validated.key;
    let replacing_id = validated.replacing.as_ref().map(|s| s.id.as_str());

    let occupant = store::find_by_key(conn, &key)?;
    let occupant_id = occupant.as_ref().map(|s| s.id.clone());
    if let Some(existing) = &occupant {
        if Some(existing.id.as_str()) != replacing_id {
            violations.push(Violation::SlotOccupied {
                batch_id: key.batch_id,
                section_id: key.section_id,
                day: key.day,
                period: key.period,
                existing: Some(existing.into()),
            });
        }
    }
    // The occupant of the target key is reported once, as SlotOccupied.
    let not_occupant = |s: &TimetableSlot| Some(&s.id) != occupant_id.as_ref();

    for clash in store::faculty_clashes(
        conn,
        key.day,
        key.period,
        validated.faculty_id,
        replacing_id,
    )?
    .iter()
    .filter(|s| not_occupant(*s))
    {
        violations.push(Violation::FacultyConflict {
            faculty_id: validated.faculty_id,
            competing: clash.into(),
        });
    }

    if let Some(room) = &validated.room {
        for clash in store::room_clashes(conn, key.day, key.period, room, replacing_id)?
            .iter()
            .filter(|s| not_occupant(*s))
        {
            violations.push(Violation::RoomConflict {
                room: room.clone(),
                competing: clash.into(),
            });
        }
    }

    if validated.subject.semester != validated.batch.current_semester {
        let mismatch = Violation::SemesterMismatch {
            subject_code: validated.subject.code.clone(),
            subject_semester: validated.subject.semester,
            batch_semester: validated.batch.current_semester,
        };
        if capable_of(identity.role, Action::OverrideSemester).is_granted() {
            warnings.push(mismatch);
        } else {
            violations.push(mismatch);
        }
    }

    if !violations.is_empty() {
        return Ok(Outcome::Rejected(violations));
    }

    let slot = TimetableSlot {
        id: validated
            .replacing
            .as_ref()
            .map(|s| s.id.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        batch_id: key.batch_id,
        section_id: key.section_id,
        day: key.day,
        period: key.period,
        subject_code: validated.subject.code.clone(),
        faculty_id: validated.faculty_id,
        room: validated.room.clone(),
        slot_type: validated.slot_type,
    };

    match store::put(conn, &slot, replacing_id) {
        Ok(stored) => Ok(Outcome::Accepted {
            slot: stored,
            replaced: validated.replacing.is_some(),
            warnings,
        }),
        Err(PutError::Conflict(key)) => {
            let existing = store::find_by_key(conn, &key)?;
            Ok(Outcome::Rejected(vec![Violation::SlotOccupied {
                batch_id: key.batch_id,
                section_id: key.section_id,
                day: key.day,
                period: key.period,
                existing: existing.as_ref().map(CompetingSlot::from),
            }]))
        }
        Err(PutError::Storage(e)) => Err(e),
    }
}

/// Rule 1. Returns the `Forbidden` violation when `identity` may not write
/// every section in `sections`.
fn authorize_write(
    conn: &Connection,
    identity: &Identity,
    sections: &[i64],
) -> Result<Option<Violation>, StoreError> {
    match capable_of(identity.role, Action::WriteTimetable) {
        Scope::Institution => Ok(None),
        Scope::AssignedSections => {
            for &section_id in sections {
                if !hierarchy::tutor_manages_section(conn, identity.user_id, section_id)? {
                    return Ok(Some(Violation::Forbidden {
                        message: format!(
                            "user {} is not assigned to manage section {section_id}",
                            identity.user_id
                        ),
                    }));
                }
            }
            Ok(None)
        }
        Scope::OwnRecords | Scope::Denied => Ok(Some(Violation::Forbidden {
            message: format!("role {} cannot edit the timetable", identity.role),
        })),
    }
}

fn parse_day(raw: &str, field: &'static str) -> Result<Weekday, Violation> {
    raw.parse::<Weekday>()
        .map_err(|_| Violation::invalid_value(field, format!("'{raw}' is not a day from Monday to Saturday")))
}

fn parse_period(raw: i64, max: u8, field: &'static str) -> Result<u8, Violation> {
    u8::try_from(raw)
        .ok()
        .filter(|p| (1..=max).contains(p))
        .ok_or_else(|| Violation::invalid_value(field, format!("period {raw} is outside 1..={max}")))
}

fn parse_key(raw: &RawSlotKey, max: u8) -> Result<SlotKey, Violation> {
    Ok(SlotKey {
        batch_id: raw.batch_id,
        section_id: raw.section_id,
        day: parse_day(&raw.day, "update_key.day")?,
        period: parse_period(raw.period, max, "update_key.period")?,
    })
}

/// Rules 2 and 3.
fn validate_structure(
    conn: &Connection,
    schedule: &ScheduleConfig,
    proposal: &SlotProposal,
    today: NaiveDate,
) -> Result<Result<Validated, Vec<Violation>>, StoreError> {
    let mut violations = Vec::new();

    let batch = match hierarchy::resolve_batch(conn, proposal.batch_id) {
        Ok(b) => Some(b),
        Err(StoreError::NotFound { .. }) => {
            violations.push(Violation::invalid_reference(
                "batch_id",
                format!("batch {} does not exist", proposal.batch_id),
            ));
            None
        }
        Err(e) => return Err(e),
    };

    match hierarchy::resolve_section(conn, proposal.section_id) {
        Ok(section) if section.batch_id != proposal.batch_id => {
            violations.push(Violation::invalid_reference(
                "section_id",
                format!(
                    "section {} belongs to batch {}, not batch {}",
                    section.id, section.batch_id, proposal.batch_id
                ),
            ));
        }
        Ok(_) => {}
        Err(StoreError::NotFound { .. }) => {
            violations.push(Violation::invalid_reference(
                "section_id",
                format!("section {} does not exist", proposal.section_id),
            ));
        }
        Err(e) => return Err(e),
    }

    let code = proposal.subject_code.trim();
    let subject = match (&batch, code.is_empty()) {
        (_, true) => {
            violations.push(Violation::invalid_value(
                "subject_code",
                "subject code must not be empty",
            ));
            None
        }
        (Some(batch), false) => match hierarchy::resolve_subject(conn, code, batch.department_id) {
            Ok(s) => Some(s),
            Err(StoreError::NotFound { .. }) => {
                violations.push(Violation::invalid_reference(
                    "subject_code",
                    format!(
                        "subject {code} does not exist in department {}",
                        batch.department_id
                    ),
                ));
                None
            }
            Err(e) => return Err(e),
        },
        // Without a batch there is no department to look the subject up in.
        (None, false) => None,
    };

    match hierarchy::resolve_user(conn, proposal.faculty_id) {
        Ok(user) => {
            let eligible = user.enabled
                && user
                    .role
                    .is_some_and(|r| capable_of(r, Action::TeachSlot).is_granted());
            if !eligible {
                violations.push(Violation::invalid_reference(
                    "faculty_id",
                    format!("user {} cannot be assigned to teach a slot", user.id),
                ));
            }
        }
        Err(StoreError::NotFound { .. }) => {
            violations.push(Violation::invalid_reference(
                "faculty_id",
                format!("user {} does not exist", proposal.faculty_id),
            ));
        }
        Err(e) => return Err(e),
    }

    let day = parse_day(&proposal.day, "day").map_err(|v| violations.push(v)).ok();
    let period = parse_period(proposal.period, schedule.max_periods, "period")
        .map_err(|v| violations.push(v))
        .ok();
    let slot_type = proposal
        .slot_type
        .parse::<SlotType>()
        .map_err(|_| {
            violations.push(Violation::invalid_value(
                "type",
                format!("'{}' is not one of theory, lab, practical", proposal.slot_type),
            ))
        })
        .ok();

    let effective_date = proposal.effective_date.unwrap_or(today);
    if let Some(batch) = &batch {
        if !batch.window_contains(effective_date) {
            violations.push(Violation::invalid_value(
                "effective_date",
                format!(
                    "{effective_date} is outside the semester window of batch {}",
                    batch.id
                ),
            ));
        }
    }

    let mut replacing = None;
    if let Some(raw) = &proposal.update_key {
        match parse_key(raw, schedule.max_periods) {
            Ok(target) => match store::find_by_key(conn, &target)? {
                Some(existing) => replacing = Some(existing),
                None => violations.push(Violation::invalid_reference(
                    "update_key",
                    format!(
                        "no slot to update at batch {} section {} {} period {}",
                        target.batch_id, target.section_id, target.day, target.period
                    ),
                )),
            },
            Err(v) => violations.push(v),
        }
    }

    match (batch, subject, day, period, slot_type) {
        (Some(batch), Some(subject), Some(day), Some(period), Some(slot_type))
            if violations.is_empty() =>
        {
            Ok(Ok(Validated {
                key: SlotKey {
                    batch_id: proposal.batch_id,
                    section_id: proposal.section_id,
                    day,
                    period,
                },
                batch,
                subject,
                faculty_id: proposal.faculty_id,
                room: proposal.normalized_room(),
                slot_type,
                replacing,
            }))
        }
        _ => Ok(Err(violations)),
    }
}

/// Deletes the slot at `raw`, under the same authorization as a write.
pub fn remove_slot(
    conn: &mut Connection,
    schedule: &ScheduleConfig,
    identity: &Identity,
    raw: &RawSlotKey,
) -> Result<RemoveOutcome, StoreError> {
    let tx = store::begin_write(conn)?;
    if let Some(denied) = authorize_write(&tx, identity, &[raw.section_id])? {
        return Ok(RemoveOutcome::Rejected(vec![denied]));
    }
    let key = SlotKey {
        batch_id: raw.batch_id,
        section_id: raw.section_id,
        day: match parse_day(&raw.day, "day") {
            Ok(d) => d,
            Err(v) => return Ok(RemoveOutcome::Rejected(vec![v])),
        },
        period: match parse_period(raw.period, schedule.max_periods, "period") {
            Ok(p) => p,
            Err(v) => return Ok(RemoveOutcome::Rejected(vec![v])),
        },
    };
    let removed = store::delete(&tx, &key)?;
    tx.commit()?;
    Ok(match removed {
        Some(slot) => {
            tracing::info!(slot_id = %slot.id, user_id = identity.user_id, "timetable slot removed");
            RemoveOutcome::Removed(slot)
        }
        None => RemoveOutcome::Empty,
    })
}
