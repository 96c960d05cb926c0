use crate::engine::Engine;
use crate::ipc::error::{no_workspace, ok, score_err};
use crate::ipc::params;
use crate::ipc::types::{AppState, Request};
use crate::model::{ExamDetail, Student};

fn with_detail(student: &Student, detail: &ExamDetail) -> serde_json::Value {
    let mut out = student.summary();
    out["detail"] = detail.to_json();
    out
}

fn handle_details_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_ref() else {
        return no_workspace(&req.id);
    };
    let parsed = params::new_detail(&req.params)
        .and_then(|d| Ok((params::student_ref(&req.params)?, d)));
    let (target, new) = match parsed {
        Ok(v) => v,
        Err(e) => return score_err(&req.id, &e),
    };

    match Engine::new(store).add_detail(&target, &new) {
        Ok((student, detail)) => ok(&req.id, with_detail(&student, &detail)),
        Err(e) => score_err(&req.id, &e),
    }
}

fn handle_details_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_ref() else {
        return no_workspace(&req.id);
    };
    let target = match params::student_ref(&req.params) {
        Ok(v) => v,
        Err(e) => return score_err(&req.id, &e),
    };
    let detail_id = match params::required_str(&req.params, "detailId") {
        Ok(v) => v,
        Err(e) => return score_err(&req.id, &e),
    };
    let patch = match params::detail_patch(&req.params) {
        Ok(v) => v,
        Err(e) => return score_err(&req.id, &e),
    };

    match Engine::new(store).update_detail(&target, detail_id, &patch) {
        Ok((student, detail)) => ok(&req.id, with_detail(&student, &detail)),
        Err(e) => score_err(&req.id, &e),
    }
}

fn handle_details_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_ref() else {
        return no_workspace(&req.id);
    };
    let target = match params::student_ref(&req.params) {
        Ok(v) => v,
        Err(e) => return score_err(&req.id, &e),
    };
    let detail_id = match params::required_str(&req.params, "detailId") {
        Ok(v) => v,
        Err(e) => return score_err(&req.id, &e),
    };

    match Engine::new(store).remove_detail(&target, detail_id) {
        Ok(student) => {
            let mut out = student.summary();
            out["message"] = "exam detail deleted".into();
            ok(&req.id, out)
        }
        Err(e) => score_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "details.add" => Some(handle_details_add(state, req)),
        "details.update" => Some(handle_details_update(state, req)),
        "details.delete" => Some(handle_details_delete(state, req)),
        _ => None,
    }
}
