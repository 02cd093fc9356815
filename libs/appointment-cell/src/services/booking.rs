use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use tracing::{debug, info, instrument, warn};

use doctor_cell::models::{AvailabilityCheck, SlotRequest};
use doctor_cell::services::availability::{check_slot, local_now, AvailabilityService};
use doctor_cell::services::doctor::fetch_active_doctor;
use shared_database::{AppState, Database};
use shared_models::auth::{Role, User};

use crate::models::{
    clean_text, Appointment, AppointmentError, AppointmentFilters, AppointmentListing,
    AppointmentStatus, BookAppointmentRequest, UpdateAppointmentRequest, MAX_NOTES_LEN, MAX_REASON_LEN,
    MIN_REASON_LEN,
};
use crate::services::lifecycle::AppointmentLifecycleService;

async fn fetch_appointment(
    conn: &mut SqliteConnection,
    appointment_id: i64,
) -> Result<Option<Appointment>, sqlx::Error> {
    let row = sqlx::query("SELECT * FROM appointments WHERE id = ?")
        .bind(appointment_id)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(Appointment::from_row).transpose()
}

async fn patient_exists(conn: &mut SqliteConnection, patient_id: i64) -> Result<bool, sqlx::Error> {
    let found: Option<(i64,)> = sqlx::query_as("SELECT id FROM patients WHERE id = ?")
        .bind(patient_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(found.is_some())
}

/// Duration implied by an explicit end time or length, if either is given.
fn requested_duration(
    start_time: NaiveTime,
    end_time: Option<NaiveTime>,
    duration_minutes: Option<i64>,
) -> Result<Option<i64>, AppointmentError> {
    match (end_time, duration_minutes) {
        (Some(end), _) if end <= start_time => Err(AppointmentError::Validation(
            "End time must be after start time".to_string(),
        )),
        (Some(end), _) => Ok(Some((end - start_time).num_minutes())),
        (None, Some(minutes)) if minutes <= 0 => Err(AppointmentError::Validation(
            "duration_minutes must be positive".to_string(),
        )),
        (None, minutes) => Ok(minutes),
    }
}

/// The unique index on active bookings is the last line of defence against
/// a concurrent writer; its violation means the slot is taken.
fn map_insert_error(err: sqlx::Error) -> AppointmentError {
    let unique_violation = err
        .as_database_error()
        .is_some_and(|db_err| db_err.is_unique_violation());

    if unique_violation {
        warn!("Active booking already exists for this doctor and start time");
        AppointmentError::SlotUnavailable(
            "Appointment conflicts with an existing appointment".to_string(),
        )
    } else {
        AppointmentError::Database(err)
    }
}

pub struct AppointmentBookingService {
    db: Database,
    state: Arc<AppState>,
    default_duration_minutes: i64,
    lifecycle: AppointmentLifecycleService,
}

impl AppointmentBookingService {
    pub fn new(state: &Arc<AppState>) -> Self {
        Self {
            db: state.db.clone(),
            state: Arc::clone(state),
            default_duration_minutes: state.config.default_appointment_duration_minutes,
            lifecycle: AppointmentLifecycleService::new(),
        }
    }

    /// Books an appointment. The availability check and the insert share one
    /// write transaction, so two requests for the same slot cannot both pass.
    #[instrument(skip(self, user, request), fields(doctor_id = request.doctor_id, date = %request.appointment_date))]
    pub async fn book_appointment(
        &self,
        user: &User,
        request: BookAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        let patient_id = match (user.role, request.patient_id) {
            (Role::Patient { patient_id }, _) => patient_id,
            (Role::Admin | Role::Receptionist, Some(patient_id)) => patient_id,
            (Role::Admin | Role::Receptionist, None) => {
                return Err(AppointmentError::Validation("patient_id is required".to_string()))
            }
            (Role::Doctor { .. }, _) => {
                return Err(AppointmentError::Forbidden(
                    "Doctors cannot book appointments".to_string(),
                ))
            }
        };

        let reason = clean_text(request.reason, "Reason", MIN_REASON_LEN, MAX_REASON_LEN)?
            .ok_or_else(|| AppointmentError::Validation("Reason is required".to_string()))?;
        let notes = clean_text(request.notes, "Notes", 0, MAX_NOTES_LEN)?;
        let duration = requested_duration(request.start_time, request.end_time, request.duration_minutes)?;

        let mut tx = self.db.begin_write().await?;

        if !patient_exists(tx.conn(), patient_id).await? {
            return Err(AppointmentError::PatientNotFound);
        }
        fetch_active_doctor(tx.conn(), request.doctor_id).await?;

        let decision = check_slot(
            tx.conn(),
            &SlotRequest {
                doctor_id: request.doctor_id,
                date: request.appointment_date,
                start_time: request.start_time,
                duration_minutes: duration,
                exclude_appointment_id: None,
            },
            self.default_duration_minutes,
            local_now(),
        )
        .await?;

        if let Err(unavailable) = decision.outcome {
            warn!("Booking rejected: {}", unavailable);
            return Err(AppointmentError::SlotUnavailable(unavailable.to_string()));
        }
        let end_time = decision.end_time().ok_or_else(|| {
            AppointmentError::SlotUnavailable("Requested time is outside of doctor's working hours".to_string())
        })?;

        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO appointments
                (patient_id, doctor_id, appointment_date, start_time, end_time, status,
                 reason, notes, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(patient_id)
        .bind(request.doctor_id)
        .bind(request.appointment_date)
        .bind(request.start_time)
        .bind(end_time)
        .bind(AppointmentStatus::Scheduled.as_str())
        .bind(&reason)
        .bind(notes.as_deref())
        .bind(now)
        .bind(now)
        .execute(tx.conn())
        .await
        .map_err(map_insert_error)?;

        let appointment = fetch_appointment(tx.conn(), result.last_insert_rowid())
            .await?
            .ok_or(AppointmentError::NotFound)?;
        tx.commit().await?;

        info!(
            "Booked appointment {} for patient {} with doctor {} on {} at {}",
            appointment.id, patient_id, appointment.doctor_id, appointment.appointment_date, appointment.start_time
        );
        Ok(appointment)
    }

    pub async fn get_appointment(&self, user: &User, appointment_id: i64) -> Result<Appointment, AppointmentError> {
        let mut conn = self.db.pool().acquire().await?;
        let appointment = fetch_appointment(&mut conn, appointment_id)
            .await?
            .ok_or(AppointmentError::NotFound)?;

        self.lifecycle.ensure_can_view(user, &appointment)?;
        Ok(appointment)
    }

    /// Role-scoped listing ordered by date then start time, with patient and
    /// doctor names attached.
    pub async fn search_appointments(
        &self,
        user: &User,
        filters: AppointmentFilters,
    ) -> Result<Vec<AppointmentListing>, AppointmentError> {
        let (doctor_id, patient_id) = match user.role {
            Role::Patient { patient_id } => (filters.doctor_id, Some(patient_id)),
            Role::Doctor { doctor_id } => (Some(doctor_id), filters.patient_id),
            Role::Admin | Role::Receptionist => (filters.doctor_id, filters.patient_id),
        };
        let (limit, offset) = filters.page();

        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT a.*, \
                    p.first_name || ' ' || p.last_name AS patient_name, \
                    'Dr. ' || d.first_name || ' ' || d.last_name AS doctor_name \
             FROM appointments a \
             JOIN patients p ON p.id = a.patient_id \
             JOIN doctors d ON d.id = a.doctor_id \
             WHERE 1 = 1",
        );

        if let Some(doctor_id) = doctor_id {
            query.push(" AND a.doctor_id = ").push_bind(doctor_id);
        }
        if let Some(patient_id) = patient_id {
            query.push(" AND a.patient_id = ").push_bind(patient_id);
        }
        if let Some(status) = filters.status {
            query.push(" AND a.status = ").push_bind(status.as_str());
        }
        if let Some(from) = filters.date_from {
            query.push(" AND a.appointment_date >= ").push_bind(from);
        }
        if let Some(to) = filters.date_to {
            query.push(" AND a.appointment_date <= ").push_bind(to);
        }
        query
            .push(" ORDER BY a.appointment_date, a.start_time LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let rows = query.build().fetch_all(self.db.pool()).await?;
        let appointments = rows
            .iter()
            .map(AppointmentListing::from_row)
            .collect::<Result<Vec<_>, _>>()?;

        debug!("Found {} appointments for {}", appointments.len(), user.role);
        Ok(appointments)
    }

    /// Staff edit. A changed doctor, date or time is re-checked against the
    /// ledger with this appointment excluded.
    #[instrument(skip(self, user, request))]
    pub async fn update_appointment(
        &self,
        user: &User,
        appointment_id: i64,
        request: UpdateAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        self.lifecycle.ensure_staff(user)?;

        let reason = match request.reason.clone() {
            Some(reason) => Some(
                clean_text(Some(reason), "Reason", MIN_REASON_LEN, MAX_REASON_LEN)?
                    .ok_or_else(|| AppointmentError::Validation("Reason cannot be empty".to_string()))?,
            ),
            None => None,
        };
        let notes = match request.notes.clone() {
            Some(notes) => Some(clean_text(Some(notes), "Notes", 0, MAX_NOTES_LEN)?),
            None => None,
        };

        let mut tx = self.db.begin_write().await?;

        let existing = fetch_appointment(tx.conn(), appointment_id)
            .await?
            .ok_or(AppointmentError::NotFound)?;

        let mut doctor_id = existing.doctor_id;
        let mut date = existing.appointment_date;
        let mut start_time = existing.start_time;
        let mut end_time = existing.end_time;

        if request.changes_slot() {
            if existing.status.is_terminal() {
                return Err(AppointmentError::Validation(format!(
                    "A {} appointment cannot be rescheduled",
                    existing.status
                )));
            }

            doctor_id = request.doctor_id.unwrap_or(existing.doctor_id);
            date = request.appointment_date.unwrap_or(existing.appointment_date);
            start_time = request.start_time.unwrap_or(existing.start_time);
            let duration = requested_duration(start_time, request.end_time, request.duration_minutes)?
                .unwrap_or_else(|| existing.duration_minutes());

            if doctor_id != existing.doctor_id {
                fetch_active_doctor(tx.conn(), doctor_id).await?;
            }

            let decision = check_slot(
                tx.conn(),
                &SlotRequest {
                    doctor_id,
                    date,
                    start_time,
                    duration_minutes: Some(duration),
                    exclude_appointment_id: Some(appointment_id),
                },
                self.default_duration_minutes,
                local_now(),
            )
            .await?;

            if let Err(unavailable) = decision.outcome {
                warn!("Reschedule of appointment {} rejected: {}", appointment_id, unavailable);
                return Err(AppointmentError::SlotUnavailable(unavailable.to_string()));
            }
            end_time = decision.end_time().ok_or_else(|| {
                AppointmentError::SlotUnavailable("Requested time is outside of doctor's working hours".to_string())
            })?;
        }

        sqlx::query(
            r#"
            UPDATE appointments
            SET doctor_id = ?, appointment_date = ?, start_time = ?, end_time = ?,
                reason = ?, notes = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(doctor_id)
        .bind(date)
        .bind(start_time)
        .bind(end_time)
        .bind(reason.or(existing.reason))
        .bind(notes.unwrap_or(existing.notes))
        .bind(Utc::now())
        .bind(appointment_id)
        .execute(tx.conn())
        .await
        .map_err(map_insert_error)?;

        let appointment = fetch_appointment(tx.conn(), appointment_id)
            .await?
            .ok_or(AppointmentError::NotFound)?;
        tx.commit().await?;

        info!("Updated appointment {}", appointment_id);
        Ok(appointment)
    }

    pub async fn update_status(
        &self,
        user: &User,
        appointment_id: i64,
        new_status: AppointmentStatus,
    ) -> Result<Appointment, AppointmentError> {
        self.update_status_at(user, appointment_id, new_status, local_now()).await
    }

    pub async fn update_status_at(
        &self,
        user: &User,
        appointment_id: i64,
        new_status: AppointmentStatus,
        now: NaiveDateTime,
    ) -> Result<Appointment, AppointmentError> {
        let mut tx = self.db.begin_write().await?;

        let existing = fetch_appointment(tx.conn(), appointment_id)
            .await?
            .ok_or(AppointmentError::NotFound)?;

        self.lifecycle.ensure_can_view(user, &existing)?;
        if existing.status == new_status {
            debug!("Appointment {} already {}", appointment_id, new_status);
            return Ok(existing);
        }

        self.lifecycle.authorize_status_change(user, &existing, new_status, now)?;
        self.lifecycle.validate_status_transition(existing.status, new_status)?;

        sqlx::query("UPDATE appointments SET status = ?, updated_at = ? WHERE id = ?")
            .bind(new_status.as_str())
            .bind(Utc::now())
            .bind(appointment_id)
            .execute(tx.conn())
            .await?;

        let appointment = fetch_appointment(tx.conn(), appointment_id)
            .await?
            .ok_or(AppointmentError::NotFound)?;
        tx.commit().await?;

        info!(
            "Appointment {} moved from {} to {} by {}",
            appointment_id, existing.status, new_status, user.role
        );
        Ok(appointment)
    }

    pub async fn delete_appointment(&self, user: &User, appointment_id: i64) -> Result<(), AppointmentError> {
        self.lifecycle.ensure_staff(user)?;

        let mut tx = self.db.begin_write().await?;
        let deleted = sqlx::query("DELETE FROM appointments WHERE id = ?")
            .bind(appointment_id)
            .execute(tx.conn())
            .await?
            .rows_affected();

        if deleted == 0 {
            return Err(AppointmentError::NotFound);
        }
        tx.commit().await?;

        info!("Deleted appointment {}", appointment_id);
        Ok(())
    }

    /// Dry run of the booking check for a prospective appointment.
    pub async fn validate_booking(
        &self,
        doctor_id: i64,
        date: NaiveDate,
        start_time: NaiveTime,
        exclude_appointment_id: Option<i64>,
    ) -> Result<AvailabilityCheck, AppointmentError> {
        let availability_service = AvailabilityService::new(&self.state);
        let decision = availability_service
            .check_availability(SlotRequest {
                doctor_id,
                date,
                start_time,
                duration_minutes: None,
                exclude_appointment_id,
            })
            .await?;

        Ok(decision.to_check())
    }
}
