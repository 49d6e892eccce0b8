//! Read-only lookups over the academic hierarchy.
//!
//! Rows are created by the portal's administrative screens. Every lookup
//! returns [`StoreError::NotFound`] on a miss; callers never substitute a
//! default.

use crate::authz::Role;
use crate::error::StoreError;
use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};

#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub id: i64,
    pub department_id: i64,
    pub start_year: i64,
    pub end_year: i64,
    pub current_semester: i64,
    pub semester_start_date: Option<NaiveDate>,
    pub semester_end_date: Option<NaiveDate>,
}

impl Batch {
    /// True when `date` lies inside the semester window, or no window is set.
    /// A half-open window only bounds the side that is present.
    pub fn window_contains(&self, date: NaiveDate) -> bool {
        let after_start = self.semester_start_date.map_or(true, |s| date >= s);
        let before_end = self.semester_end_date.map_or(true, |e| date <= e);
        after_start && before_end
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub id: i64,
    pub batch_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Subject {
    pub code: String,
    pub semester: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub name: String,
    /// `None` when the stored role is not one this service knows.
    pub role: Option<Role>,
    pub enabled: bool,
}

/// Reads an optional `YYYY-MM-DD` column. Only NULL means "no bound"; any
/// other text that does not parse is a conversion failure.
fn date_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

pub fn resolve_batch(conn: &Connection, batch_id: i64) -> Result<Batch, StoreError> {
    conn.query_row(
        "SELECT id, department_id, start_year, end_year, current_semester,
                semester_start_date, semester_end_date
         FROM batches WHERE id = ?",
        [batch_id],
        |row| {
            Ok(Batch {
                id: row.get(0)?,
                department_id: row.get(1)?,
                start_year: row.get(2)?,
                end_year: row.get(3)?,
                current_semester: row.get(4)?,
                semester_start_date: date_column(row, 5)?,
                semester_end_date: date_column(row, 6)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("batch", batch_id))
}

pub fn resolve_section(conn: &Connection, section_id: i64) -> Result<Section, StoreError> {
    conn.query_row(
        "SELECT id, batch_id, name FROM sections WHERE id = ?",
        [section_id],
        |row| {
            Ok(Section {
                id: row.get(0)?,
                batch_id: row.get(1)?,
                name: row.get(2)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("section", section_id))
}

pub fn resolve_subject(
    conn: &Connection,
    code: &str,
    department_id: i64,
) -> Result<Subject, StoreError> {
    conn.query_row(
        "SELECT code, semester FROM subjects WHERE code = ? AND department_id = ?",
        (code, department_id),
        |row| {
            Ok(Subject {
                code: row.get(0)?,
                semester: row.get(1)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("subject", format!("{code} in department {department_id}")))
}

pub fn resolve_user(conn: &Connection, user_id: i64) -> Result<User, StoreError> {
    conn.query_row(
        "SELECT id, email, name, role, enabled FROM users WHERE id = ?",
        [user_id],
        |row| {
            let role: String = row.get(3)?;
            let enabled: i64 = row.get(4)?;
            Ok(User {
                id: row.get(0)?,
                email: row.get(1)?,
                name: row.get(2)?,
                role: role.parse().ok(),
                enabled: enabled != 0,
            })
        },
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("user", user_id))
}

pub fn tutor_manages_section(
    conn: &Connection,
    user_id: i64,
    section_id: i64,
) -> Result<bool, StoreError> {
    let hit: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM tutor_sections WHERE user_id = ? AND section_id = ?",
            (user_id, section_id),
            |r| r.get(0),
        )
        .optional()?;
    Ok(hit.is_some())
}
