use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use shared_database::AppState;
use shared_models::auth::User;
use shared_models::error::AppError;
use shared_models::time_format::format_time;
use shared_utils::validation::{parse_date, parse_time, require};

use crate::models::{
    CreateScheduleRequest, DoctorProfile, ScheduleFilters, ScheduleView, SlotRequest,
    UpdateScheduleRequest,
};
use crate::services::{AvailabilityService, DoctorService, ScheduleService};

#[derive(Debug, Deserialize)]
pub struct DoctorListQuery {
    pub include_inactive: Option<bool>,
}

// Dates and times arrive as raw strings so malformed values get a 400 with a
// readable message.
#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub date: Option<String>,
    pub time: Option<String>,
    pub duration_minutes: Option<i64>,
    pub exclude_appointment_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SlotsQuery {
    pub date: Option<String>,
    pub exclude_appointment_id: Option<i64>,
}

// ==============================================================================
// DOCTORS
// ==============================================================================

#[axum::debug_handler]
pub async fn list_doctors(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DoctorListQuery>,
) -> Result<Json<Value>, AppError> {
    let doctor_service = DoctorService::new(&state);

    let doctors: Vec<DoctorProfile> = doctor_service
        .list_doctors(query.include_inactive.unwrap_or(false))
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

    Ok(Json(json!({
        "doctors": doctors,
        "total": doctors.len()
    })))
}

#[axum::debug_handler]
pub async fn get_doctor(
    State(state): State<Arc<AppState>>,
    Path(doctor_id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    let doctor_service = DoctorService::new(&state);
    let doctor = doctor_service.get_doctor(doctor_id).await?;

    Ok(Json(json!(DoctorProfile::from(doctor))))
}

#[axum::debug_handler]
pub async fn get_weekly_schedule(
    State(state): State<Arc<AppState>>,
    Path(doctor_id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    let schedule_service = ScheduleService::new(&state);
    let weekly = schedule_service.weekly_schedule(doctor_id).await?;

    Ok(Json(json!(weekly)))
}

#[axum::debug_handler]
pub async fn check_availability(
    State(state): State<Arc<AppState>>,
    Path(doctor_id): Path<i64>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<Value>, AppError> {
    let date = parse_date(require(query.date.as_deref(), "date")?, "date")?;
    let start_time = parse_time(require(query.time.as_deref(), "time")?, "time")?;

    if query.duration_minutes.is_some_and(|d| d <= 0) {
        return Err(AppError::ValidationError(
            "duration_minutes must be positive".to_string(),
        ));
    }

    let availability_service = AvailabilityService::new(&state);
    let decision = availability_service
        .check_availability(SlotRequest {
            doctor_id,
            date,
            start_time,
            duration_minutes: query.duration_minutes,
            exclude_appointment_id: query.exclude_appointment_id,
        })
        .await?;

    let check = decision.to_check();
    Ok(Json(json!({
        "doctor_id": doctor_id,
        "date": date,
        "start_time": format_time(&decision.start_time),
        "end_time": decision.end_time().map(|t| format_time(&t)),
        "duration_minutes": decision.duration_minutes,
        "available": check.available,
        "reason": check.reason
    })))
}

#[axum::debug_handler]
pub async fn get_available_slots(
    State(state): State<Arc<AppState>>,
    Path(doctor_id): Path<i64>,
    Query(query): Query<SlotsQuery>,
) -> Result<Json<Value>, AppError> {
    let date = parse_date(require(query.date.as_deref(), "date")?, "date")?;

    let availability_service = AvailabilityService::new(&state);
    let slots = availability_service
        .available_slots(doctor_id, date, query.exclude_appointment_id)
        .await?;

    Ok(Json(json!({
        "doctor_id": doctor_id,
        "date": date,
        "slots": slots,
        "total": slots.len()
    })))
}

// ==============================================================================
// SCHEDULES
// ==============================================================================

#[axum::debug_handler]
pub async fn list_schedules(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Query(filters): Query<ScheduleFilters>,
) -> Result<Json<Value>, AppError> {
    let schedule_service = ScheduleService::new(&state);

    let schedules: Vec<ScheduleView> = schedule_service
        .list_schedules(&user, filters)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

    Ok(Json(json!({
        "schedules": schedules,
        "total": schedules.len()
    })))
}

#[axum::debug_handler]
pub async fn get_schedule(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(schedule_id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    let schedule_service = ScheduleService::new(&state);
    let schedule = schedule_service.get_schedule(&user, schedule_id).await?;

    Ok(Json(json!(ScheduleView::from(schedule))))
}

#[axum::debug_handler]
pub async fn create_schedule(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateScheduleRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let schedule_service = ScheduleService::new(&state);
    let schedule = schedule_service.create_schedule(&user, request).await?;

    Ok((StatusCode::CREATED, Json(json!(ScheduleView::from(schedule)))))
}

#[axum::debug_handler]
pub async fn update_schedule(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(schedule_id): Path<i64>,
    Json(request): Json<UpdateScheduleRequest>,
) -> Result<Json<Value>, AppError> {
    let schedule_service = ScheduleService::new(&state);
    let schedule = schedule_service.update_schedule(&user, schedule_id, request).await?;

    Ok(Json(json!(ScheduleView::from(schedule))))
}

#[axum::debug_handler]
pub async fn delete_schedule(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(schedule_id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    let schedule_service = ScheduleService::new(&state);
    schedule_service.delete_schedule(&user, schedule_id).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Schedule deleted successfully"
    })))
}
