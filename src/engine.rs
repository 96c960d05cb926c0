//! Aggregate engine.
//!
//! Every mutation keeps `student.points`/`student.total` equal to the sums
//! over the student's exam details. Aggregates move by deltas; nothing is
//! re-summed. The `apply_*` functions are the pure part and leave the student
//! untouched when they fail. [`Engine`] wraps them in a load/apply/save cycle
//! that retries when the store reports a concurrent write.

use crate::error::{Result, ScoreError, StoreError};
use crate::model::{
    now, DetailPatch, ExamDetail, NewDetail, Student, StudentName, StudentRef,
};
use crate::store::StudentStore;
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

/// Attempts per mutation before a stale write is reported as a storage failure.
pub const MAX_WRITE_ATTEMPTS: usize = 3;

fn checked_aggregate(current: i64, delta: i64) -> Result<i64> {
    current
        .checked_add(delta)
        .ok_or_else(|| ScoreError::validation("score aggregate out of range"))
}

/// Appends a detail and adds its scores to the aggregates.
pub fn apply_add(
    student: &mut Student,
    new: &NewDetail,
    created_at: DateTime<Utc>,
) -> Result<ExamDetail> {
    let points = checked_aggregate(student.points, new.points())?;
    let total = checked_aggregate(student.total, new.total())?;

    let detail = ExamDetail {
        id: Uuid::new_v4().to_string(),
        exam: new.exam().to_string(),
        points: new.points(),
        total: new.total(),
        created_at,
    };
    student.details.push(detail.clone());
    student.points = points;
    student.total = total;
    Ok(detail)
}

/// Patches a detail in place, moving the aggregates by the difference.
pub fn apply_update(
    student: &mut Student,
    detail_id: &str,
    patch: &DetailPatch,
) -> Result<ExamDetail> {
    let idx = student
        .details
        .iter()
        .position(|d| d.id == detail_id)
        .ok_or_else(ScoreError::detail_not_found)?;
    let merged = patch.merge(&student.details[idx])?;

    let points_diff = merged.points - student.details[idx].points;
    let total_diff = merged.total - student.details[idx].total;
    let points = checked_aggregate(student.points, points_diff)?;
    let total = checked_aggregate(student.total, total_diff)?;

    let detail = &mut student.details[idx];
    detail.exam = merged.exam;
    detail.points = merged.points;
    detail.total = merged.total;
    let updated = detail.clone();

    student.points = points;
    student.total = total;
    Ok(updated)
}

/// Subtracts a detail's scores from the aggregates and drops it.
pub fn apply_remove(student: &mut Student, detail_id: &str) -> Result<ExamDetail> {
    let idx = student
        .details
        .iter()
        .position(|d| d.id == detail_id)
        .ok_or_else(ScoreError::detail_not_found)?;
    let points = checked_aggregate(student.points, -student.details[idx].points)?;
    let total = checked_aggregate(student.total, -student.details[idx].total)?;

    student.points = points;
    student.total = total;
    Ok(student.details.remove(idx))
}

/// Orders students by points, highest first. Ties go to the most recently
/// created student; identical timestamps fall back to reverse insertion order.
pub fn leaderboard_order(mut students: Vec<Student>) -> Vec<Student> {
    students.reverse();
    students.sort_by(|a, b| {
        b.points
            .cmp(&a.points)
            .then_with(|| b.created_at.cmp(&a.created_at))
    });
    students
}

pub struct Engine<'a, S: StudentStore> {
    store: &'a S,
}

impl<'a, S: StudentStore> Engine<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Engine { store }
    }

    fn find(&self, target: &StudentRef) -> Result<Option<Student>> {
        let found = match target {
            StudentRef::Id(id) => self.store.find_by_id(id)?,
            StudentRef::Name(name) => self.store.find_by_name(name)?,
        };
        Ok(found)
    }

    fn load(&self, target: &StudentRef) -> Result<Student> {
        self.find(target)?.ok_or_else(ScoreError::student_not_found)
    }

    /// Load, apply, save. A stale save reloads the record and applies the
    /// change again on the fresh copy.
    fn mutate<T>(
        &self,
        target: &StudentRef,
        mut apply: impl FnMut(&mut Student) -> Result<T>,
    ) -> Result<(Student, T)> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut student = self.load(target)?;
            let out = apply(&mut student)?;
            student.updated_at = Some(now());
            match self.store.save(&mut student) {
                Ok(()) => return Ok((student, out)),
                Err(StoreError::Stale { id }) if attempt < MAX_WRITE_ATTEMPTS => {
                    warn!(student_id = %id, attempt, "concurrent write detected, retrying");
                }
                Err(StoreError::DuplicateName(_)) => return Err(ScoreError::student_exists()),
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn create_student(&self, name: &StudentName) -> Result<Student> {
        if self.store.find_by_name(name.as_str())?.is_some() {
            return Err(ScoreError::student_exists());
        }
        let mut student = Student::new(Uuid::new_v4().to_string(), name, now());
        self.store.save(&mut student).map_err(|e| match e {
            StoreError::DuplicateName(_) => ScoreError::student_exists(),
            other => other.into(),
        })?;
        info!(student_id = %student.id, name = %student.name, "student created");
        Ok(student)
    }

    pub fn rename_student(&self, student_id: &str, name: &StudentName) -> Result<Student> {
        let target = StudentRef::Id(student_id.to_string());
        let current = self.load(&target)?;
        if current.name != name.as_str() {
            if let Some(other) = self.store.find_by_name(name.as_str())? {
                if other.id != current.id {
                    return Err(ScoreError::student_exists());
                }
            }
        }

        let (student, previous) = self.mutate(&target, |s| {
            Ok(std::mem::replace(&mut s.name, name.as_str().to_string()))
        })?;
        info!(student_id = %student.id, from = %previous, to = %student.name, "student renamed");
        Ok(student)
    }

    pub fn delete_student(&self, student_id: &str) -> Result<()> {
        if !self.store.delete_by_id(student_id)? {
            return Err(ScoreError::student_not_found());
        }
        info!(student_id = %student_id, "student deleted");
        Ok(())
    }

    pub fn add_detail(&self, target: &StudentRef, new: &NewDetail) -> Result<(Student, ExamDetail)> {
        let (student, detail) = self.mutate(target, |s| apply_add(s, new, now()))?;
        info!(
            student_id = %student.id,
            detail_id = %detail.id,
            points = student.points,
            total = student.total,
            "exam detail added"
        );
        Ok((student, detail))
    }

    pub fn update_detail(
        &self,
        target: &StudentRef,
        detail_id: &str,
        patch: &DetailPatch,
    ) -> Result<(Student, ExamDetail)> {
        let (student, detail) = self.mutate(target, |s| apply_update(s, detail_id, patch))?;
        info!(
            student_id = %student.id,
            detail_id = %detail.id,
            points = student.points,
            total = student.total,
            "exam detail updated"
        );
        Ok((student, detail))
    }

    pub fn remove_detail(&self, target: &StudentRef, detail_id: &str) -> Result<Student> {
        let (student, removed) = self.mutate(target, |s| apply_remove(s, detail_id))?;
        info!(
            student_id = %student.id,
            detail_id = %removed.id,
            points = student.points,
            total = student.total,
            "exam detail removed"
        );
        Ok(student)
    }

    pub fn list_students(&self) -> Result<Vec<Student>> {
        Ok(leaderboard_order(self.store.find_all()?))
    }

    /// Single student with details newest first.
    pub fn get_student(&self, target: &StudentRef) -> Result<Student> {
        Ok(self.load(target)?.with_details_newest_first())
    }
}
