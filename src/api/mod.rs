use axum::Json;
use axum::extract::Path;
use axum::routing::{delete, patch, post};
use axum::{Router, extract::State, http::StatusCode, routing::get};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::*;
use crate::services::RecordStore;
use crate::state::AppState;
use crate::store::Stored;

#[derive(Debug, Default, Serialize)]
pub struct OkResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed: Option<bool>,
}

impl OkResponse {
    fn ok() -> Json<Self> {
        Json(Self {
            ok: true,
            ..Default::default()
        })
    }

    fn with_id(id: String) -> Json<Self> {
        Json(Self {
            ok: true,
            id: Some(id),
            ..Default::default()
        })
    }
}

#[derive(Deserialize)]
struct NewCourseRequest {
    name: String,
    #[serde(default)]
    students: Vec<String>,
}

#[derive(Deserialize)]
struct StudentsRequest {
    students: Vec<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metadata", get(load_metadata).put(save_metadata))
        .route("/entries", get(list_entries).post(add_entry))
        .route("/entries/{id}", patch(update_entry).delete(delete_entry))
        .route("/entries/{id}/lock", post(toggle_lock))
        .route("/courses", post(add_course))
        .route("/courses/{id}", delete(delete_course))
        .route(
            "/courses/{id}/students",
            get(get_students).put(update_course_students),
        )
        .route("/maintenance/ensure-defaults", post(ensure_defaults))
        .with_state(state)
}

fn records(state: &AppState) -> Result<&RecordStore, AppError> {
    state.backend.record_store()
}

async fn health(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    records(&state)?.ping().await?;
    Ok(StatusCode::OK)
}

async fn load_metadata(State(state): State<AppState>) -> Result<Json<Metadata>, AppError> {
    Ok(Json(records(&state)?.load_metadata().await))
}

async fn save_metadata(
    State(state): State<AppState>,
    Json(req): Json<MetadataPatch>,
) -> Result<Json<OkResponse>, AppError> {
    records(&state)?.save_metadata(req).await?;
    Ok(OkResponse::ok())
}

async fn list_entries(
    State(state): State<AppState>,
) -> Result<Json<Vec<Stored<Entry>>>, AppError> {
    Ok(Json(records(&state)?.list_entries().await))
}

async fn add_entry(
    State(state): State<AppState>,
    Json(req): Json<Entry>,
) -> Result<Json<OkResponse>, AppError> {
    let id = records(&state)?.add_entry(req).await?;
    Ok(OkResponse::with_id(id))
}

async fn update_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<EntryPatch>,
) -> Result<Json<OkResponse>, AppError> {
    let id = records(&state)?.update_entry(&id, req).await?;
    Ok(OkResponse::with_id(id))
}

async fn delete_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OkResponse>, AppError> {
    records(&state)?.delete_entry_by_id(&id).await?;
    Ok(OkResponse::ok())
}

async fn toggle_lock(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OkResponse>, AppError> {
    let locked = records(&state)?.toggle_lock_entry(&id).await?;
    Ok(Json(OkResponse {
        ok: true,
        id: Some(id),
        locked: Some(locked),
        ..Default::default()
    }))
}

async fn add_course(
    State(state): State<AppState>,
    Json(req): Json<NewCourseRequest>,
) -> Result<Json<OkResponse>, AppError> {
    let id = records(&state)?.add_course(&req.name, req.students).await?;
    Ok(OkResponse::with_id(id))
}

async fn get_students(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<String>>, AppError> {
    Ok(Json(records(&state)?.get_students_for_course(&id).await))
}

async fn update_course_students(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<StudentsRequest>,
) -> Result<Json<OkResponse>, AppError> {
    records(&state)?
        .update_course_students(&id, req.students)
        .await?;
    Ok(OkResponse::ok())
}

async fn delete_course(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OkResponse>, AppError> {
    records(&state)?.delete_course(&id).await?;
    Ok(OkResponse::ok())
}

async fn ensure_defaults(State(state): State<AppState>) -> Result<Json<OkResponse>, AppError> {
    let changed = records(&state)?.ensure_defaults().await?;
    Ok(Json(OkResponse {
        ok: true,
        changed: Some(changed),
        ..Default::default()
    }))
}
