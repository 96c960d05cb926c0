use crate::error::{Result, ScoreError};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde_json::json;

#[derive(Debug, Clone, PartialEq)]
pub struct ExamDetail {
    pub id: String,
    pub exam: String,
    pub points: i64,
    pub total: i64,
    pub created_at: DateTime<Utc>,
}

impl ExamDetail {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "exam": self.exam,
            "points": self.points,
            "total": self.total,
            "createdAt": format_timestamp(&self.created_at),
        })
    }
}

/// A student record. `points` and `total` always equal the sums over
/// `details`, which are kept in insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct Student {
    pub id: String,
    pub name: String,
    pub points: i64,
    pub total: i64,
    pub details: Vec<ExamDetail>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Zero until the first save.
    pub version: i64,
}

impl Student {
    pub fn new(id: String, name: &StudentName, created_at: DateTime<Utc>) -> Self {
        Student {
            id,
            name: name.as_str().to_string(),
            points: 0,
            total: 0,
            details: Vec::new(),
            created_at,
            updated_at: None,
            version: 0,
        }
    }

    /// Full record as served by `students.get` and `students.list`.
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "name": self.name,
            "points": self.points,
            "total": self.total,
            "details": self.details.iter().map(ExamDetail::to_json).collect::<Vec<_>>(),
            "createdAt": format_timestamp(&self.created_at),
            "updatedAt": self.updated_at.as_ref().map(format_timestamp),
            "version": self.version,
        })
    }

    pub fn summary(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "name": self.name,
            "points": self.points,
            "total": self.total,
        })
    }

    /// Copy of the record with details ordered newest first. Details created
    /// in the same instant keep the later insertion first.
    pub fn with_details_newest_first(&self) -> Student {
        let mut out = self.clone();
        out.details.reverse();
        out.details.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StudentRef {
    Id(String),
    Name(String),
}

/// Trimmed, non-empty student name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentName(String);

impl StudentName {
    pub fn parse(raw: &str) -> Result<Self> {
        let name = raw.trim();
        if name.is_empty() {
            return Err(ScoreError::validation("student name is required"));
        }
        Ok(StudentName(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A validated exam entry ready to be appended to a student.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDetail {
    exam: String,
    points: i64,
    total: i64,
}

impl NewDetail {
    pub fn new(exam: &str, points: i64, total: i64) -> Result<Self> {
        let exam = parse_exam(exam)?;
        check_score_bounds(points, total)?;
        Ok(NewDetail {
            exam,
            points,
            total,
        })
    }

    pub fn exam(&self) -> &str {
        &self.exam
    }

    pub fn points(&self) -> i64 {
        self.points
    }

    pub fn total(&self) -> i64 {
        self.total
    }
}

/// Partial update for an exam detail. Bounds are checked against the merged
/// result, see [`DetailPatch::merge`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetailPatch {
    pub exam: Option<String>,
    pub points: Option<i64>,
    pub total: Option<i64>,
}

/// Values an exam detail will hold after a patch is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedDetail {
    pub exam: String,
    pub points: i64,
    pub total: i64,
}

impl DetailPatch {
    pub fn merge(&self, current: &ExamDetail) -> Result<MergedDetail> {
        let exam = match self.exam.as_deref() {
            Some(raw) => parse_exam(raw)?,
            None => current.exam.clone(),
        };
        let points = self.points.unwrap_or(current.points);
        let total = self.total.unwrap_or(current.total);
        check_score_bounds(points, total)?;
        Ok(MergedDetail {
            exam,
            points,
            total,
        })
    }
}

fn parse_exam(raw: &str) -> Result<String> {
    let exam = raw.trim();
    if exam.is_empty() {
        return Err(ScoreError::validation("exam name is required"));
    }
    Ok(exam.to_string())
}

pub fn check_score_bounds(points: i64, total: i64) -> Result<()> {
    if points < 0 {
        return Err(ScoreError::validation(
            "points must be a non-negative number",
        ));
    }
    if total < 1 {
        return Err(ScoreError::validation(
            "total must be a number greater than zero",
        ));
    }
    if points > total {
        return Err(ScoreError::validation("points cannot exceed total"));
    }
    Ok(())
}

/// Coerces a request value into a whole score. Accepts integers, integral
/// floats and numeric strings.
pub fn parse_score_value(field: &str, value: &serde_json::Value) -> Result<i64> {
    let not_whole = || ScoreError::validation(format!("{} must be a whole number", field));
    match value {
        serde_json::Value::Number(n) => {
            if let Some(v) = n.as_i64() {
                return Ok(v);
            }
            n.as_f64().and_then(whole_f64).ok_or_else(not_whole)
        }
        serde_json::Value::String(s) => {
            let s = s.trim();
            if let Ok(v) = s.parse::<i64>() {
                return Ok(v);
            }
            s.parse::<f64>()
                .ok()
                .and_then(whole_f64)
                .ok_or_else(not_whole)
        }
        _ => Err(ScoreError::validation(format!("{} must be a number", field))),
    }
}

fn whole_f64(v: f64) -> Option<i64> {
    // i64::MAX as f64 rounds up to 2^63, so the upper bound is exclusive.
    if v.is_finite() && v.fract() == 0.0 && v >= i64::MIN as f64 && v < i64::MAX as f64 {
        Some(v as i64)
    } else {
        None
    }
}

/// Current time truncated to what storage round-trips.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}
