//! Turns loosely-typed request params into validated engine inputs.

use crate::error::{Result, ScoreError};
use crate::model::{parse_score_value, DetailPatch, NewDetail, StudentName, StudentRef};
use serde_json::Value;

fn field<'a>(params: &'a Value, key: &str) -> Option<&'a Value> {
    params.get(key).filter(|v| !v.is_null())
}

fn optional_str<'a>(params: &'a Value, key: &str) -> Result<Option<&'a str>> {
    match field(params, key) {
        None => Ok(None),
        Some(v) => v
            .as_str()
            .map(Some)
            .ok_or_else(|| ScoreError::validation(format!("{} must be a string", key))),
    }
}

pub fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    optional_str(params, key)?.ok_or_else(|| ScoreError::validation(format!("missing {}", key)))
}

pub fn student_name(params: &Value) -> Result<StudentName> {
    match optional_str(params, "name")? {
        Some(raw) => StudentName::parse(raw),
        None => Err(ScoreError::validation("student name is required")),
    }
}

/// `studentId` wins over `name` when both are present.
pub fn student_ref(params: &Value) -> Result<StudentRef> {
    if let Some(id) = optional_str(params, "studentId")? {
        return Ok(StudentRef::Id(id.to_string()));
    }
    match optional_str(params, "name")? {
        Some(name) => Ok(StudentRef::Name(name.trim().to_string())),
        None => Err(ScoreError::validation("missing studentId or name")),
    }
}

fn optional_score(params: &Value, key: &str) -> Result<Option<i64>> {
    field(params, key)
        .map(|v| parse_score_value(key, v))
        .transpose()
}

pub fn new_detail(params: &Value) -> Result<NewDetail> {
    let exam = optional_str(params, "exam")?.unwrap_or("");
    let points = optional_score(params, "points")?
        .ok_or_else(|| ScoreError::validation("points must be a non-negative number"))?;
    let total = optional_score(params, "total")?
        .ok_or_else(|| ScoreError::validation("total must be a number greater than zero"))?;
    NewDetail::new(exam, points, total)
}

pub fn detail_patch(params: &Value) -> Result<DetailPatch> {
    Ok(DetailPatch {
        exam: optional_str(params, "exam")?.map(str::to_string),
        points: optional_score(params, "points")?,
        total: optional_score(params, "total")?,
    })
}
