use super::model::{SlotKey, SlotType, TimetableSlot, Weekday};
use crate::error::StoreError;
use rusqlite::types::Type;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, Transaction, TransactionBehavior};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PutError {
    /// The key was taken between the scan and the commit.
    #[error("slot {0:?} is already occupied")]
    Conflict(SlotKey),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

const SLOT_COLUMNS: &str =
    "id, batch_id, section_id, day, period, subject_code, faculty_id, room, type";

fn slot_from_row(row: &Row<'_>) -> rusqlite::Result<TimetableSlot> {
    let day: i64 = row.get(3)?;
    let day = Weekday::from_ordinal(day).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(3, Type::Integer, format!("day {day}").into())
    })?;
    let period: i64 = row.get(4)?;
    let period = u8::try_from(period).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, Type::Integer, Box::new(e))
    })?;
    let slot_type: String = row.get(8)?;
    let slot_type = slot_type.parse::<SlotType>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(8, Type::Text, e.into())
    })?;
    Ok(TimetableSlot {
        id: row.get(0)?,
        batch_id: row.get(1)?,
        section_id: row.get(2)?,
        day,
        period,
        subject_code: row.get(5)?,
        faculty_id: row.get(6)?,
        room: row.get(7)?,
        slot_type,
    })
}

fn query_slots<P: rusqlite::Params>(
    conn: &Connection,
    where_clause: &str,
    params: P,
) -> Result<Vec<TimetableSlot>, StoreError> {
    let sql = format!(
        "SELECT {SLOT_COLUMNS} FROM timetable WHERE {where_clause}
         ORDER BY day, period, batch_id, section_id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params, slot_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Weekly grid of one section, ordered by day then period.
pub fn get(conn: &Connection, batch_id: i64, section_id: i64) -> Result<Vec<TimetableSlot>, StoreError> {
    query_slots(
        conn,
        "batch_id = ? AND section_id = ?",
        (batch_id, section_id),
    )
}

/// One instructor's week across every section.
pub fn faculty_schedule(conn: &Connection, faculty_id: i64) -> Result<Vec<TimetableSlot>, StoreError> {
    query_slots(conn, "faculty_id = ?", [faculty_id])
}

pub fn find_by_key(conn: &Connection, key: &SlotKey) -> Result<Option<TimetableSlot>, StoreError> {
    let sql = format!(
        "SELECT {SLOT_COLUMNS} FROM timetable
         WHERE batch_id = ? AND section_id = ? AND day = ? AND period = ?"
    );
    let slot = conn
        .query_row(
            &sql,
            (key.batch_id, key.section_id, key.day.ordinal(), key.period),
            slot_from_row,
        )
        .optional()?;
    Ok(slot)
}

/// Slots at `(day, period)` taught by `faculty_id`, other than `exclude_id`.
pub fn faculty_clashes(
    conn: &Connection,
    day: Weekday,
    period: u8,
    faculty_id: i64,
    exclude_id: Option<&str>,
) -> Result<Vec<TimetableSlot>, StoreError> {
    query_slots(
        conn,
        "day = ? AND period = ? AND faculty_id = ? AND id IS NOT ?",
        (day.ordinal(), period, faculty_id, exclude_id),
    )
}

/// Slots at `(day, period)` held in `room` (case-insensitive), other than
/// `exclude_id`.
pub fn room_clashes(
    conn: &Connection,
    day: Weekday,
    period: u8,
    room: &str,
    exclude_id: Option<&str>,
) -> Result<Vec<TimetableSlot>, StoreError> {
    query_slots(
        conn,
        "day = ? AND period = ? AND room = ? COLLATE NOCASE AND id IS NOT ?",
        (day.ordinal(), period, room, exclude_id),
    )
}

/// Opens the write scope for one proposal. `IMMEDIATE` takes SQLite's
/// reserved lock up front, so no other writer can commit between the
/// conflict scan and our commit. Waiting longer than the busy timeout fails
/// with `Unavailable`.
pub fn begin_write(conn: &mut Connection) -> Result<Transaction<'_>, StoreError> {
    Ok(conn.transaction_with_behavior(TransactionBehavior::Immediate)?)
}

/// Writes `slot`. With `replacing`, the row with that id is rewritten in
/// place (possibly under a new key); otherwise a new row is inserted.
pub fn put(
    conn: &Connection,
    slot: &TimetableSlot,
    replacing: Option<&str>,
) -> Result<TimetableSlot, PutError> {
    let now = chrono::Utc::now().to_rfc3339();
    let result = match replacing {
        Some(existing_id) => conn.execute(
            "UPDATE timetable
             SET batch_id = ?, section_id = ?, day = ?, period = ?, subject_code = ?,
                 faculty_id = ?, room = ?, type = ?, updated_at = ?
             WHERE id = ?",
            rusqlite::params![
                slot.batch_id,
                slot.section_id,
                slot.day.ordinal(),
                slot.period,
                slot.subject_code,
                slot.faculty_id,
                slot.room,
                slot.slot_type.as_str(),
                now,
                existing_id,
            ],
        ),
        None => conn.execute(
            "INSERT INTO timetable(id, batch_id, section_id, day, period, subject_code,
                                   faculty_id, room, type, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                slot.id,
                slot.batch_id,
                slot.section_id,
                slot.day.ordinal(),
                slot.period,
                slot.subject_code,
                slot.faculty_id,
                slot.room,
                slot.slot_type.as_str(),
                now,
            ],
        ),
    };

    match result {
        Ok(0) => Err(StoreError::not_found("slot", replacing.unwrap_or(&slot.id)).into()),
        Ok(_) => {
            let mut stored = slot.clone();
            if let Some(existing_id) = replacing {
                stored.id = existing_id.to_string();
            }
            Ok(stored)
        }
        // Only the (batch_id, section_id, day, period) key is UNIQUE; NOT NULL
        // and foreign-key failures stay storage errors.
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == ErrorCode::ConstraintViolation
                && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            Err(PutError::Conflict(slot.key()))
        }
        Err(e) => Err(StoreError::from(e).into()),
    }
}

/// Removes the slot at `key`. Returns the removed slot, if any.
pub fn delete(conn: &Connection, key: &SlotKey) -> Result<Option<TimetableSlot>, StoreError> {
    let Some(existing) = find_by_key(conn, key)? else {
        return Ok(None);
    };
    conn.execute("DELETE FROM timetable WHERE id = ?", [&existing.id])?;
    Ok(Some(existing))
}
