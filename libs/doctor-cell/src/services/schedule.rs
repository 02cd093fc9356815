use std::sync::Arc;

use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use tracing::{debug, info, warn};

use shared_database::{AppState, Database};
use shared_models::auth::{Role, User};

use crate::models::{
    day_name, CreateScheduleRequest, Doctor, DoctorError, Schedule, ScheduleDraft, ScheduleError,
    ScheduleFilters, TimeInterval, UpdateScheduleRequest, WeeklySchedule,
};
use crate::services::doctor::fetch_doctor;

const DEFAULT_SLOT_MINUTES: i64 = 30;

/// Owning doctor or staff may change a doctor's schedules.
fn authorize_manage(user: &User, doctor_id: i64) -> Result<(), ScheduleError> {
    match user.role {
        Role::Admin | Role::Receptionist => Ok(()),
        Role::Doctor { doctor_id: own } if own == doctor_id => Ok(()),
        Role::Doctor { .. } => Err(ScheduleError::Forbidden(
            "Doctors can only manage their own schedules".to_string(),
        )),
        Role::Patient { .. } => Err(ScheduleError::Forbidden(
            "Patients cannot manage schedules".to_string(),
        )),
    }
}

/// First active schedule among `existing` whose window overlaps `window`.
pub fn find_overlap<'a>(existing: &'a [Schedule], window: &TimeInterval) -> Option<&'a Schedule> {
    existing
        .iter()
        .filter(|s| s.is_active)
        .find(|s| s.window().overlaps(window))
}

async fn fetch_schedule(
    conn: &mut SqliteConnection,
    schedule_id: i64,
) -> Result<Option<Schedule>, sqlx::Error> {
    let row = sqlx::query("SELECT * FROM schedules WHERE id = ?")
        .bind(schedule_id)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(Schedule::from_row).transpose()
}

/// Rejects `draft` when it would overlap another active schedule of the same
/// doctor on the same day. Inactive drafts are never checked.
async fn guard_overlap(
    conn: &mut SqliteConnection,
    draft: &ScheduleDraft,
    exclude_schedule_id: Option<i64>,
) -> Result<(), ScheduleError> {
    if !draft.is_active {
        return Ok(());
    }

    let rows = sqlx::query(
        r#"
        SELECT * FROM schedules
        WHERE doctor_id = ? AND day_of_week = ? AND is_active = 1
          AND (? IS NULL OR id <> ?)
        ORDER BY start_time
        "#,
    )
    .bind(draft.doctor_id)
    .bind(draft.day_of_week)
    .bind(exclude_schedule_id)
    .bind(exclude_schedule_id)
    .fetch_all(&mut *conn)
    .await?;

    let existing = rows
        .iter()
        .map(Schedule::from_row)
        .collect::<Result<Vec<_>, _>>()?;

    match find_overlap(&existing, &draft.window) {
        Some(conflict) => {
            warn!(
                "Schedule for doctor {} ({}) overlaps schedule {}",
                draft.doctor_id, draft.window, conflict.id
            );
            Err(ScheduleError::Overlap {
                window: conflict.window(),
                day: day_name(draft.day_of_week),
            })
        }
        None => Ok(()),
    }
}

pub struct ScheduleService {
    db: Database,
}

impl ScheduleService {
    pub fn new(state: &Arc<AppState>) -> Self {
        Self {
            db: state.db.clone(),
        }
    }

    /// Doctors see only their own schedules, patients only active ones.
    pub async fn list_schedules(
        &self,
        user: &User,
        filters: ScheduleFilters,
    ) -> Result<Vec<Schedule>, ScheduleError> {
        let (doctor_id, is_active) = match user.role {
            Role::Doctor { doctor_id } => (Some(doctor_id), filters.is_active),
            Role::Patient { .. } => (filters.doctor_id, Some(true)),
            Role::Admin | Role::Receptionist => (filters.doctor_id, filters.is_active),
        };

        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM schedules WHERE 1 = 1");

        if let Some(doctor_id) = doctor_id {
            query.push(" AND doctor_id = ").push_bind(doctor_id);
        }
        if let Some(day) = filters.day_of_week {
            query.push(" AND day_of_week = ").push_bind(day);
        }
        if let Some(active) = is_active {
            query.push(" AND is_active = ").push_bind(active);
        }
        query.push(" ORDER BY doctor_id, day_of_week, start_time");

        let rows = query.build().fetch_all(self.db.pool()).await?;
        let schedules = rows
            .iter()
            .map(Schedule::from_row)
            .collect::<Result<Vec<_>, _>>()?;

        debug!("Found {} schedules for {}", schedules.len(), user.role);
        Ok(schedules)
    }

    pub async fn get_schedule(&self, user: &User, schedule_id: i64) -> Result<Schedule, ScheduleError> {
        let mut conn = self.db.pool().acquire().await?;
        let schedule = fetch_schedule(&mut conn, schedule_id)
            .await?
            .ok_or(ScheduleError::NotFound)?;

        match user.role {
            Role::Doctor { doctor_id } if doctor_id != schedule.doctor_id => Err(
                ScheduleError::Forbidden("Doctors can only view their own schedules".to_string()),
            ),
            Role::Patient { .. } if !schedule.is_active => Err(ScheduleError::NotFound),
            _ => Ok(schedule),
        }
    }

    pub async fn create_schedule(
        &self,
        user: &User,
        request: CreateScheduleRequest,
    ) -> Result<Schedule, ScheduleError> {
        let doctor_id = match (user.role, request.doctor_id) {
            (Role::Doctor { doctor_id }, None) => doctor_id,
            (_, Some(doctor_id)) => doctor_id,
            (_, None) => {
                return Err(ScheduleError::Validation("doctor_id is required".to_string()))
            }
        };
        authorize_manage(user, doctor_id)?;

        let draft = ScheduleDraft::new(
            doctor_id,
            request.day_of_week,
            request.start_time,
            request.end_time,
            request.slot_duration_minutes.unwrap_or(DEFAULT_SLOT_MINUTES),
            request.break_duration_minutes.unwrap_or(0),
            request.is_active.unwrap_or(true),
            request.notes,
        )?;

        let mut tx = self.db.begin_write().await?;

        fetch_doctor(tx.conn(), doctor_id)
            .await?
            .ok_or(ScheduleError::DoctorNotFound)?;

        guard_overlap(tx.conn(), &draft, None).await?;

        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO schedules
                (doctor_id, day_of_week, start_time, end_time, slot_duration_minutes,
                 break_duration_minutes, is_active, notes, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(draft.doctor_id)
        .bind(draft.day_of_week)
        .bind(draft.window.start)
        .bind(draft.window.end)
        .bind(draft.slot_duration_minutes)
        .bind(draft.break_duration_minutes)
        .bind(draft.is_active)
        .bind(draft.notes.as_deref())
        .bind(now)
        .bind(now)
        .execute(tx.conn())
        .await?;

        let schedule = fetch_schedule(tx.conn(), result.last_insert_rowid())
            .await?
            .ok_or(ScheduleError::NotFound)?;
        tx.commit().await?;

        info!(
            "Created schedule {} for doctor {} on {} {}",
            schedule.id,
            schedule.doctor_id,
            schedule.day_name(),
            schedule.window()
        );
        Ok(schedule)
    }

    pub async fn update_schedule(
        &self,
        user: &User,
        schedule_id: i64,
        request: UpdateScheduleRequest,
    ) -> Result<Schedule, ScheduleError> {
        let mut tx = self.db.begin_write().await?;

        let existing = fetch_schedule(tx.conn(), schedule_id)
            .await?
            .ok_or(ScheduleError::NotFound)?;
        authorize_manage(user, existing.doctor_id)?;

        let draft = ScheduleDraft::merged(&existing, request)?;
        guard_overlap(tx.conn(), &draft, Some(schedule_id)).await?;

        sqlx::query(
            r#"
            UPDATE schedules
            SET day_of_week = ?, start_time = ?, end_time = ?, slot_duration_minutes = ?,
                break_duration_minutes = ?, is_active = ?, notes = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(draft.day_of_week)
        .bind(draft.window.start)
        .bind(draft.window.end)
        .bind(draft.slot_duration_minutes)
        .bind(draft.break_duration_minutes)
        .bind(draft.is_active)
        .bind(draft.notes.as_deref())
        .bind(Utc::now())
        .bind(schedule_id)
        .execute(tx.conn())
        .await?;

        let schedule = fetch_schedule(tx.conn(), schedule_id)
            .await?
            .ok_or(ScheduleError::NotFound)?;
        tx.commit().await?;

        info!("Updated schedule {} for doctor {}", schedule.id, schedule.doctor_id);
        Ok(schedule)
    }

    pub async fn delete_schedule(&self, user: &User, schedule_id: i64) -> Result<(), ScheduleError> {
        let mut tx = self.db.begin_write().await?;

        let existing = fetch_schedule(tx.conn(), schedule_id)
            .await?
            .ok_or(ScheduleError::NotFound)?;
        authorize_manage(user, existing.doctor_id)?;

        sqlx::query("DELETE FROM schedules WHERE id = ?")
            .bind(schedule_id)
            .execute(tx.conn())
            .await?;
        tx.commit().await?;

        info!("Deleted schedule {} of doctor {}", schedule_id, existing.doctor_id);
        Ok(())
    }

    /// The doctor with their active schedules ordered by day then start time.
    pub async fn weekly_schedule(&self, doctor_id: i64) -> Result<WeeklySchedule, DoctorError> {
        let mut tx = self.db.begin().await?;

        let doctor: Doctor = fetch_doctor(&mut tx, doctor_id)
            .await?
            .ok_or(DoctorError::NotFound)?;

        let rows = sqlx::query(
            r#"
            SELECT * FROM schedules
            WHERE doctor_id = ? AND is_active = 1
            ORDER BY day_of_week, start_time
            "#,
        )
        .bind(doctor_id)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        let schedules = rows
            .iter()
            .map(Schedule::from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(WeeklySchedule {
            doctor: doctor.into(),
            schedules: schedules.into_iter().map(Into::into).collect(),
        })
    }
}
