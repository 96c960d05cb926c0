use crate::db;
use crate::error::StoreError;
use crate::model::{format_timestamp, parse_timestamp, ExamDetail, Student};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Persistence operations the score engine depends on.
pub trait StudentStore {
    fn find_by_name(&self, name: &str) -> Result<Option<Student>, StoreError>;
    fn find_by_id(&self, id: &str) -> Result<Option<Student>, StoreError>;
    /// All students in insertion order.
    fn find_all(&self) -> Result<Vec<Student>, StoreError>;
    /// Inserts a new record (`version == 0`) or replaces an existing one.
    /// Replacing fails with [`StoreError::Stale`] when the stored version no
    /// longer matches `student.version`. On success `student.version` holds
    /// the stored version.
    fn save(&self, student: &mut Student) -> Result<(), StoreError>;
    /// Returns false when no record had the id.
    fn delete_by_id(&self, id: &str) -> Result<bool, StoreError>;
}

pub struct SqliteStore {
    conn: Connection,
}

struct StudentRow {
    id: String,
    name: String,
    points: i64,
    total: i64,
    created_at: String,
    updated_at: Option<String>,
    version: i64,
}

struct DetailRow {
    id: String,
    student_id: String,
    exam: String,
    points: i64,
    total: i64,
    created_at: String,
}

const STUDENT_COLUMNS: &str = "id, name, points, total, created_at, updated_at, version";

impl SqliteStore {
    pub fn open(workspace: &Path, busy_timeout: Duration) -> anyhow::Result<Self> {
        let conn = db::open_db(workspace)?;
        conn.busy_timeout(busy_timeout)?;
        Ok(SqliteStore { conn })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        db::init_schema(&conn)?;
        Ok(SqliteStore { conn })
    }

    fn find_one(&self, column: &str, value: &str) -> Result<Option<Student>, StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        let sql = format!(
            "SELECT {} FROM students WHERE {} = ?",
            STUDENT_COLUMNS, column
        );
        let row = tx.query_row(&sql, [value], read_student_row).optional()?;
        let student = match row {
            Some(row) => {
                let details = load_details(&tx, Some(&row.id))?
                    .into_iter()
                    .map(DetailRow::into_detail)
                    .collect::<Result<Vec<_>, _>>()?;
                Some(row.into_student(details)?)
            }
            None => None,
        };
        tx.commit()?;
        Ok(student)
    }
}

impl StudentStore for SqliteStore {
    fn find_by_name(&self, name: &str) -> Result<Option<Student>, StoreError> {
        self.find_one("name", name)
    }

    fn find_by_id(&self, id: &str) -> Result<Option<Student>, StoreError> {
        self.find_one("id", id)
    }

    fn find_all(&self) -> Result<Vec<Student>, StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        let rows = {
            let sql = format!("SELECT {} FROM students ORDER BY rowid", STUDENT_COLUMNS);
            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt
                .query_map([], read_student_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let mut by_student: HashMap<String, Vec<ExamDetail>> = HashMap::new();
        for row in load_details(&tx, None)? {
            let student_id = row.student_id.clone();
            by_student
                .entry(student_id)
                .or_default()
                .push(row.into_detail()?);
        }
        tx.commit()?;

        rows.into_iter()
            .map(|row| {
                let details = by_student.remove(&row.id).unwrap_or_default();
                row.into_student(details)
            })
            .collect()
    }

    fn save(&self, student: &mut Student) -> Result<(), StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        let created_at = format_timestamp(&student.created_at);
        let updated_at = student.updated_at.as_ref().map(format_timestamp);

        let written = if student.version == 0 {
            tx.execute(
                "INSERT INTO students(id, name, points, total, created_at, updated_at, version)
                 VALUES(?, ?, ?, ?, ?, ?, 1)",
                (
                    &student.id,
                    &student.name,
                    student.points,
                    student.total,
                    &created_at,
                    updated_at.as_deref(),
                ),
            )
        } else {
            tx.execute(
                "UPDATE students
                 SET name = ?, points = ?, total = ?, updated_at = ?, version = version + 1
                 WHERE id = ? AND version = ?",
                (
                    &student.name,
                    student.points,
                    student.total,
                    updated_at.as_deref(),
                    &student.id,
                    student.version,
                ),
            )
        };
        let written = written.map_err(|e| {
            if is_unique_name_violation(&e) {
                StoreError::DuplicateName(student.name.clone())
            } else {
                StoreError::Sqlite(e)
            }
        })?;
        if written == 0 {
            return Err(StoreError::Stale {
                id: student.id.clone(),
            });
        }

        replace_details(&tx, student)?;
        tx.commit()?;

        student.version += 1;
        Ok(())
    }

    fn delete_by_id(&self, id: &str) -> Result<bool, StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM exam_details WHERE student_id = ?", [id])?;
        let deleted = tx.execute("DELETE FROM students WHERE id = ?", [id])?;
        tx.commit()?;
        Ok(deleted > 0)
    }
}

fn replace_details(tx: &Transaction<'_>, student: &Student) -> Result<(), StoreError> {
    tx.execute(
        "DELETE FROM exam_details WHERE student_id = ?",
        [&student.id],
    )?;
    let mut stmt = tx.prepare(
        "INSERT INTO exam_details(id, student_id, seq, exam, points, total, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
    )?;
    for (seq, d) in student.details.iter().enumerate() {
        stmt.execute((
            &d.id,
            &student.id,
            seq as i64,
            &d.exam,
            d.points,
            d.total,
            format_timestamp(&d.created_at),
        ))?;
    }
    Ok(())
}

fn read_student_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StudentRow> {
    Ok(StudentRow {
        id: row.get(0)?,
        name: row.get(1)?,
        points: row.get(2)?,
        total: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
        version: row.get(6)?,
    })
}

fn read_detail_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DetailRow> {
    Ok(DetailRow {
        id: row.get(0)?,
        student_id: row.get(1)?,
        exam: row.get(2)?,
        points: row.get(3)?,
        total: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn load_details(
    tx: &Transaction<'_>,
    student_id: Option<&str>,
) -> Result<Vec<DetailRow>, StoreError> {
    let rows = match student_id {
        Some(id) => {
            let mut stmt = tx.prepare(
                "SELECT id, student_id, exam, points, total, created_at
                 FROM exam_details
                 WHERE student_id = ?
                 ORDER BY seq",
            )?;
            let rows = stmt
                .query_map([id], read_detail_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let mut stmt = tx.prepare(
                "SELECT id, student_id, exam, points, total, created_at
                 FROM exam_details
                 ORDER BY student_id, seq",
            )?;
            let rows = stmt
                .query_map([], read_detail_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
    };
    Ok(rows)
}

fn parse_stored_timestamp(table: &'static str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    parse_timestamp(raw).ok_or_else(|| StoreError::Corrupt {
        table,
        message: format!("invalid timestamp: {}", raw),
    })
}

impl StudentRow {
    fn into_student(self, details: Vec<ExamDetail>) -> Result<Student, StoreError> {
        let created_at = parse_stored_timestamp("students", &self.created_at)?;
        let updated_at = match self.updated_at.as_deref() {
            Some(raw) => Some(parse_stored_timestamp("students", raw)?),
            None => None,
        };
        Ok(Student {
            id: self.id,
            name: self.name,
            points: self.points,
            total: self.total,
            details,
            created_at,
            updated_at,
            version: self.version,
        })
    }
}

impl DetailRow {
    fn into_detail(self) -> Result<ExamDetail, StoreError> {
        let created_at = parse_stored_timestamp("exam_details", &self.created_at)?;
        Ok(ExamDetail {
            id: self.id,
            exam: self.exam,
            points: self.points,
            total: self.total,
            created_at,
        })
    }
}

fn is_unique_name_violation(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(f, Some(msg)) => {
            f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                && msg.contains("students.name")
        }
        _ => false,
    }
}
