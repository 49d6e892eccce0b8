use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

pub fn open_db(path: &Path, busy_timeout: Duration) -> anyhow::Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    conn.busy_timeout(busy_timeout)?;
    // WAL keeps readers on a snapshot while a proposal holds the write lock.
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS departments(
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            code TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS batches(
            id INTEGER PRIMARY KEY,
            department_id INTEGER NOT NULL,
            start_year INTEGER NOT NULL,
            end_year INTEGER NOT NULL,
            current_semester INTEGER NOT NULL DEFAULT 1,
            semester_start_date TEXT,
            semester_end_date TEXT,
            FOREIGN KEY(department_id) REFERENCES departments(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_batches_department ON batches(department_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sections(
            id INTEGER PRIMARY KEY,
            batch_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(batch_id) REFERENCES batches(id),
            UNIQUE(batch_id, name)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id INTEGER PRIMARY KEY,
            department_id INTEGER NOT NULL,
            code TEXT NOT NULL,
            name TEXT NOT NULL,
            semester INTEGER NOT NULL,
            type TEXT NOT NULL DEFAULT 'theory',
            FOREIGN KEY(department_id) REFERENCES departments(id),
            UNIQUE(department_id, code)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id INTEGER PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            role TEXT NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;
    // Databases created by the portal before account disabling existed.
    ensure_users_enabled(conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS faculty_profiles(
            user_id INTEGER PRIMARY KEY,
            employee_id TEXT,
            designation TEXT,
            department_id INTEGER,
            FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE,
            FOREIGN KEY(department_id) REFERENCES departments(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS tutor_sections(
            user_id INTEGER NOT NULL,
            section_id INTEGER NOT NULL,
            PRIMARY KEY(user_id, section_id),
            FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE,
            FOREIGN KEY(section_id) REFERENCES sections(id)
        )",
        [],
    )?;

    // day is stored as 1 (Monday) ..= 6 (Saturday) so ORDER BY day, period
    // yields the weekly grid order.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS timetable(
            id TEXT PRIMARY KEY,
            batch_id INTEGER NOT NULL,
            section_id INTEGER NOT NULL,
            day INTEGER NOT NULL,
            period INTEGER NOT NULL,
            subject_code TEXT NOT NULL,
            faculty_id INTEGER NOT NULL,
            room TEXT,
            type TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(batch_id) REFERENCES batches(id),
            FOREIGN KEY(section_id) REFERENCES sections(id),
            UNIQUE(batch_id, section_id, day, period)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_timetable_faculty_slot ON timetable(day, period, faculty_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_timetable_room_slot ON timetable(day, period, room)",
        [],
    )?;
    ensure_timetable_updated_at(conn)?;

    Ok(())
}

fn ensure_users_enabled(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "users", "enabled")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE users ADD COLUMN enabled INTEGER NOT NULL DEFAULT 1",
        [],
    )?;
    Ok(())
}

fn ensure_timetable_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "timetable", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE timetable ADD COLUMN updated_at TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    // Table names come from the fixed list above, never from request input.
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
