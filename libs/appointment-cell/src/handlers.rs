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
use shared_utils::validation::{parse_date, parse_time};

use crate::models::{
    AppointmentFilters, AppointmentStatus, BookAppointmentRequest, UpdateAppointmentRequest,
    UpdateStatusRequest,
};
use crate::services::AppointmentBookingService;

// ==============================================================================
// QUERY PARAMETER STRUCTS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct AppointmentQueryParams {
    pub status: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub doctor_id: Option<i64>,
    pub patient_id: Option<i64>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl AppointmentQueryParams {
    fn into_filters(self) -> Result<AppointmentFilters, AppError> {
        let status = self
            .status
            .as_deref()
            .map(str::parse::<AppointmentStatus>)
            .transpose()
            .map_err(|e| AppError::ValidationError(e.to_string()))?;

        Ok(AppointmentFilters {
            status,
            date_from: self.date_from.as_deref().map(|d| parse_date(d, "date_from")).transpose()?,
            date_to: self.date_to.as_deref().map(|d| parse_date(d, "date_to")).transpose()?,
            doctor_id: self.doctor_id,
            patient_id: self.patient_id,
            limit: self.limit,
            offset: self.offset,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ValidateQuery {
    pub doctor_id: Option<i64>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub appointment_id: Option<i64>,
}

// ==============================================================================
// APPOINTMENT HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn book_appointment(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let booking_service = AppointmentBookingService::new(&state);
    let appointment = booking_service.book_appointment(&user, request).await?;

    Ok((StatusCode::CREATED, Json(json!(appointment))))
}

#[axum::debug_handler]
pub async fn list_appointments(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Query(params): Query<AppointmentQueryParams>,
) -> Result<Json<Value>, AppError> {
    let filters = params.into_filters()?;
    let (limit, offset) = filters.page();

    let booking_service = AppointmentBookingService::new(&state);
    let appointments = booking_service.search_appointments(&user, filters).await?;

    Ok(Json(json!({
        "appointments": appointments,
        "total": appointments.len(),
        "limit": limit,
        "offset": offset
    })))
}

/// Dry-run of a booking. Missing or malformed parameters answer 400 in the
/// same `{valid, message}` shape.
#[axum::debug_handler]
pub async fn validate_appointment(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ValidateQuery>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let (Some(doctor_id), Some(date), Some(time)) = (query.doctor_id, query.date, query.time) else {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(json!({ "valid": false, "message": "Missing required parameters" })),
        ));
    };

    let parsed = parse_date(&date, "date").and_then(|d| Ok((d, parse_time(&time, "time")?)));
    let (date, start_time) = match parsed {
        Ok(parsed) => parsed,
        Err(AppError::ValidationError(message)) => {
            return Ok((
                StatusCode::BAD_REQUEST,
                Json(json!({ "valid": false, "message": message })),
            ))
        }
        Err(other) => return Err(other),
    };

    let booking_service = AppointmentBookingService::new(&state);
    let check = booking_service
        .validate_booking(doctor_id, date, start_time, query.appointment_id)
        .await?;

    let message = check.reason.unwrap_or_else(|| "Appointment is valid".to_string());
    Ok((
        StatusCode::OK,
        Json(json!({ "valid": check.available, "message": message })),
    ))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    let booking_service = AppointmentBookingService::new(&state);
    let appointment = booking_service.get_appointment(&user, appointment_id).await?;

    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn update_appointment(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<i64>,
    Json(request): Json<UpdateAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let booking_service = AppointmentBookingService::new(&state);
    let appointment = booking_service
        .update_appointment(&user, appointment_id, request)
        .await?;

    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn update_appointment_status(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<i64>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<Value>, AppError> {
    let booking_service = AppointmentBookingService::new(&state);
    let appointment = booking_service
        .update_status(&user, appointment_id, request.status)
        .await?;

    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn delete_appointment(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    let booking_service = AppointmentBookingService::new(&state);
    booking_service.delete_appointment(&user, appointment_id).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Appointment deleted successfully"
    })))
}
