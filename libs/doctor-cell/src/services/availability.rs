use std::sync::Arc;

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};
use sqlx::SqliteConnection;
use tracing::{debug, warn};

use shared_database::{AppState, Database};

use crate::models::{
    day_of_week, BookedInterval, DoctorError, Schedule, SlotDecision, SlotRequest, TimeInterval,
    Unavailable,
};
use crate::services::doctor::fetch_doctor;

/// Decides whether `[start_time, start_time + duration)` on `date` is bookable.
///
/// Pure over its inputs: `schedules` may hold any of the doctor's schedules
/// (only active ones for the date's weekday are considered), `booked` holds
/// the active appointments on `date`.
pub fn resolve_availability(
    schedules: &[Schedule],
    booked: &[BookedInterval],
    date: NaiveDate,
    start_time: NaiveTime,
    duration_minutes: i64,
    now: NaiveDateTime,
) -> Result<(), Unavailable> {
    if date < now.date() {
        return Err(Unavailable::PastDate);
    }
    if date == now.date() && start_time <= now.time() {
        return Err(Unavailable::PastTime);
    }

    let day = day_of_week(date);
    let windows: Vec<TimeInterval> = schedules
        .iter()
        .filter(|s| s.is_active && s.day_of_week == day)
        .map(Schedule::window)
        .collect();

    if windows.is_empty() {
        return Err(Unavailable::NoOfficeHours);
    }

    let requested = TimeInterval::from_start(start_time, duration_minutes)
        .ok_or(Unavailable::OutsideWorkingHours)?;

    if !windows.iter().any(|w| w.contains(&requested)) {
        return Err(Unavailable::OutsideWorkingHours);
    }

    let conflict = booked
        .iter()
        .filter(|b| b.interval.overlaps(&requested))
        .map(|b| b.interval.start)
        .min();

    match conflict {
        Some(start) => Err(Unavailable::Conflict { start }),
        None => Ok(()),
    }
}

/// Enumerates the slot grid of every active window on `date`'s weekday and
/// drops slots that overlap a booked interval. Sorted by start time.
pub fn generate_slots(schedules: &[Schedule], booked: &[BookedInterval], date: NaiveDate) -> Vec<TimeInterval> {
    let day = day_of_week(date);
    let mut slots = Vec::new();

    for schedule in schedules.iter().filter(|s| s.is_active && s.day_of_week == day) {
        let step = schedule.slot_duration_minutes + schedule.break_duration_minutes;
        if schedule.slot_duration_minutes <= 0 || step <= 0 {
            warn!("Skipping schedule {} with invalid slot length", schedule.id);
            continue;
        }

        let window = schedule.window();
        let mut cursor = Some(window.start);

        while let Some(start) = cursor {
            let slot = match TimeInterval::from_start(start, schedule.slot_duration_minutes) {
                Some(slot) if slot.end <= window.end => slot,
                _ => break,
            };

            if !booked.iter().any(|b| b.interval.overlaps(&slot)) {
                slots.push(slot);
            }

            cursor = TimeInterval::from_start(start, step).map(|next| next.end);
        }
    }

    slots.sort();
    slots.dedup();
    slots
}

/// Slot length to use when a caller gives only a start time: the window
/// containing `start_time`, else the first active window, else `fallback`.
pub fn default_duration(schedules: &[Schedule], start_time: NaiveTime, fallback: i64) -> i64 {
    let active: Vec<&Schedule> = schedules.iter().filter(|s| s.is_active).collect();

    active
        .iter()
        .find(|s| s.start_time <= start_time && start_time < s.end_time)
        .or_else(|| active.first())
        .map(|s| s.slot_duration_minutes)
        .unwrap_or(fallback)
}

pub async fn load_day_schedules(
    conn: &mut SqliteConnection,
    doctor_id: i64,
    date: NaiveDate,
) -> Result<Vec<Schedule>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM schedules
        WHERE doctor_id = ? AND day_of_week = ? AND is_active = 1
        ORDER BY start_time
        "#,
    )
    .bind(doctor_id)
    .bind(day_of_week(date))
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(Schedule::from_row).collect()
}

/// Active (scheduled or confirmed) appointments of a doctor on a date.
pub async fn load_booked_intervals(
    conn: &mut SqliteConnection,
    doctor_id: i64,
    date: NaiveDate,
    exclude_appointment_id: Option<i64>,
) -> Result<Vec<BookedInterval>, sqlx::Error> {
    let rows: Vec<(i64, NaiveTime, NaiveTime)> = sqlx::query_as(
        r#"
        SELECT id, start_time, end_time FROM appointments
        WHERE doctor_id = ? AND appointment_date = ?
          AND status IN ('scheduled', 'confirmed')
          AND (? IS NULL OR id <> ?)
        ORDER BY start_time
        "#,
    )
    .bind(doctor_id)
    .bind(date)
    .bind(exclude_appointment_id)
    .bind(exclude_appointment_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .into_iter()
        .filter_map(|(appointment_id, start, end)| {
            TimeInterval::new(start, end).map(|interval| BookedInterval {
                appointment_id,
                interval,
            })
        })
        .collect())
}

/// Runs the resolver against whatever view `conn` has. Booking calls this
/// with its write transaction so the check and the insert agree.
pub async fn check_slot(
    conn: &mut SqliteConnection,
    request: &SlotRequest,
    fallback_duration: i64,
    now: NaiveDateTime,
) -> Result<SlotDecision, sqlx::Error> {
    let schedules = load_day_schedules(conn, request.doctor_id, request.date).await?;
    let booked = load_booked_intervals(
        conn,
        request.doctor_id,
        request.date,
        request.exclude_appointment_id,
    )
    .await?;

    let duration_minutes = request
        .duration_minutes
        .unwrap_or_else(|| default_duration(&schedules, request.start_time, fallback_duration));

    let outcome = resolve_availability(
        &schedules,
        &booked,
        request.date,
        request.start_time,
        duration_minutes,
        now,
    );

    debug!(
        "Slot check doctor={} date={} start={} duration={} -> {:?}",
        request.doctor_id, request.date, request.start_time, duration_minutes, outcome
    );

    Ok(SlotDecision {
        start_time: request.start_time,
        duration_minutes,
        outcome,
    })
}

pub fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

pub struct AvailabilityService {
    db: Database,
    default_duration_minutes: i64,
}

impl AvailabilityService {
    pub fn new(state: &Arc<AppState>) -> Self {
        Self {
            db: state.db.clone(),
            default_duration_minutes: state.config.default_appointment_duration_minutes,
        }
    }

    pub async fn check_availability(&self, request: SlotRequest) -> Result<SlotDecision, DoctorError> {
        self.check_availability_at(request, local_now()).await
    }

    pub async fn check_availability_at(
        &self,
        request: SlotRequest,
        now: NaiveDateTime,
    ) -> Result<SlotDecision, DoctorError> {
        let mut tx = self.db.begin().await?;

        fetch_doctor(&mut tx, request.doctor_id)
            .await?
            .ok_or(DoctorError::NotFound)?;

        let decision = check_slot(&mut tx, &request, self.default_duration_minutes, now).await?;
        tx.commit().await?;

        Ok(decision)
    }

    pub async fn available_slots(
        &self,
        doctor_id: i64,
        date: NaiveDate,
        exclude_appointment_id: Option<i64>,
    ) -> Result<Vec<TimeInterval>, DoctorError> {
        self.available_slots_at(doctor_id, date, exclude_appointment_id, local_now())
            .await
    }

    /// Bookable slots for a date. Slots that are already in the past at
    /// `now` are left out.
    pub async fn available_slots_at(
        &self,
        doctor_id: i64,
        date: NaiveDate,
        exclude_appointment_id: Option<i64>,
        now: NaiveDateTime,
    ) -> Result<Vec<TimeInterval>, DoctorError> {
        let mut tx = self.db.begin().await?;

        fetch_doctor(&mut tx, doctor_id)
            .await?
            .ok_or(DoctorError::NotFound)?;

        if date < now.date() {
            debug!("No slots for doctor {} on past date {}", doctor_id, date);
            return Ok(Vec::new());
        }

        let schedules = load_day_schedules(&mut tx, doctor_id, date).await?;
        let booked = load_booked_intervals(&mut tx, doctor_id, date, exclude_appointment_id).await?;
        tx.commit().await?;

        let mut slots = generate_slots(&schedules, &booked, date);
        if date == now.date() {
            slots.retain(|slot| slot.start > now.time());
        }

        debug!("{} slots available for doctor {} on {}", slots.len(), doctor_id, date);
        Ok(slots)
    }
}
