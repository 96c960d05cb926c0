use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE_NAME: &str = "scoreboard.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            points INTEGER NOT NULL DEFAULT 0,
            total INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            version INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exam_details(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            exam TEXT NOT NULL,
            points INTEGER NOT NULL CHECK(points >= 0),
            total INTEGER NOT NULL CHECK(total >= 1),
            created_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exam_details_student_seq ON exam_details(student_id, seq)",
        [],
    )?;

    // Workspaces created before optimistic writes have neither column.
    ensure_students_updated_at(conn)?;
    ensure_students_version(conn)?;

    repair_student_aggregates(conn)?;

    Ok(())
}

fn ensure_students_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE students ADD COLUMN updated_at TEXT", [])?;
    Ok(())
}

fn ensure_students_version(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "version")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE students ADD COLUMN version INTEGER NOT NULL DEFAULT 1",
        [],
    )?;
    Ok(())
}

/// Rewrites stored aggregates that disagree with the detail rows. Only rows
/// written outside this daemon can be out of sync.
fn repair_student_aggregates(conn: &Connection) -> anyhow::Result<usize> {
    let repaired = conn.execute(
        "UPDATE students
         SET points = (SELECT COALESCE(SUM(d.points), 0) FROM exam_details d WHERE d.student_id = students.id),
             total = (SELECT COALESCE(SUM(d.total), 0) FROM exam_details d WHERE d.student_id = students.id),
             version = version + 1
         WHERE points != (SELECT COALESCE(SUM(d.points), 0) FROM exam_details d WHERE d.student_id = students.id)
            OR total != (SELECT COALESCE(SUM(d.total), 0) FROM exam_details d WHERE d.student_id = students.id)",
        [],
    )?;
    if repaired > 0 {
        tracing::warn!(repaired, "repaired student aggregates on open");
    }
    Ok(repaired)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
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
