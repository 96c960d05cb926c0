use crate::engine::Engine;
use crate::ipc::error::{no_workspace, ok, score_err};
use crate::ipc::params;
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_ref() else {
        return no_workspace(&req.id);
    };

    match Engine::new(store).list_students() {
        Ok(students) => {
            let students: Vec<_> = students.iter().map(|s| s.to_json()).collect();
            ok(&req.id, json!({ "students": students }))
        }
        Err(e) => score_err(&req.id, &e),
    }
}

fn handle_students_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_ref() else {
        return no_workspace(&req.id);
    };
    let target = match params::student_ref(&req.params) {
        Ok(v) => v,
        Err(e) => return score_err(&req.id, &e),
    };

    match Engine::new(store).get_student(&target) {
        Ok(student) => ok(&req.id, student.to_json()),
        Err(e) => score_err(&req.id, &e),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_ref() else {
        return no_workspace(&req.id);
    };
    let name = match params::student_name(&req.params) {
        Ok(v) => v,
        Err(e) => return score_err(&req.id, &e),
    };

    match Engine::new(store).create_student(&name) {
        Ok(student) => ok(&req.id, student.summary()),
        Err(e) => score_err(&req.id, &e),
    }
}

fn handle_students_rename(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_ref() else {
        return no_workspace(&req.id);
    };
    let parsed = params::required_str(&req.params, "studentId")
        .and_then(|id| Ok((id, params::student_name(&req.params)?)));
    let (student_id, name) = match parsed {
        Ok(v) => v,
        Err(e) => return score_err(&req.id, &e),
    };

    match Engine::new(store).rename_student(student_id, &name) {
        Ok(student) => ok(&req.id, student.summary()),
        Err(e) => score_err(&req.id, &e),
    }
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_ref() else {
        return no_workspace(&req.id);
    };
    let student_id = match params::required_str(&req.params, "studentId") {
        Ok(v) => v,
        Err(e) => return score_err(&req.id, &e),
    };

    match Engine::new(store).delete_student(student_id) {
        Ok(()) => ok(&req.id, json!({ "message": "student deleted" })),
        Err(e) => score_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.get" => Some(handle_students_get(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.rename" => Some(handle_students_rename(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
