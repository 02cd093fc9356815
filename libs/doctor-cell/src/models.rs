use std::fmt;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row};
use thiserror::Error;

use shared_models::error::AppError;
use shared_models::time_format;

pub const MIN_SLOT_MINUTES: i64 = 5;
pub const MAX_SLOT_MINUTES: i64 = 240;
pub const MAX_BREAK_MINUTES: i64 = 60;
pub const MAX_NOTES_LEN: usize = 500;
pub const MINUTES_PER_DAY: i64 = 24 * 60;

const DAY_NAMES: [&str; 7] = [
    "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday", "Sunday",
];

/// Name of a `day_of_week` value (Monday = 0).
pub fn day_name(day_of_week: i32) -> &'static str {
    usize::try_from(day_of_week)
        .ok()
        .and_then(|i| DAY_NAMES.get(i))
        .copied()
        .unwrap_or("Unknown")
}

/// Day-of-week index of a date, Monday = 0 through Sunday = 6.
pub fn day_of_week(date: NaiveDate) -> i32 {
    date.weekday().num_days_from_monday() as i32
}

// ==============================================================================
// TIME INTERVALS
// ==============================================================================

/// A time-of-day range `[start, end)` on a single day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeInterval {
    #[serde(rename = "start_time", with = "time_format")]
    pub start: NaiveTime,
    #[serde(rename = "end_time", with = "time_format")]
    pub end: NaiveTime,
}

impl TimeInterval {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    /// Interval of `minutes` starting at `start`. `None` when the duration is
    /// not positive or the interval would run past midnight.
    pub fn from_start(start: NaiveTime, minutes: i64) -> Option<Self> {
        if minutes <= 0 || minutes > MINUTES_PER_DAY {
            return None;
        }
        let (end, wrapped) = start.overflowing_add_signed(Duration::minutes(minutes));
        if wrapped != 0 {
            return None;
        }
        Self::new(start, end)
    }

    pub fn overlaps(&self, other: &TimeInterval) -> bool {
        self.start < other.end && self.end > other.start
    }

    pub fn contains(&self, other: &TimeInterval) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }
}

impl fmt::Display for TimeInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            time_format::format_time(&self.start),
            time_format::format_time(&self.end)
        )
    }
}

/// An active appointment as seen by the availability resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookedInterval {
    pub appointment_id: i64,
    pub interval: TimeInterval,
}

// ==============================================================================
// DOCTORS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Doctor {
    pub id: i64,
    pub user_id: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub specialization: String,
    pub bio: Option<String>,
    pub phone: Option<String>,
    pub qualification: Option<String>,
    pub experience_years: Option<i32>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Doctor {
    pub fn full_name(&self) -> String {
        format!("Dr. {} {}", self.first_name, self.last_name)
    }

    pub fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            specialization: row.try_get("specialization")?,
            bio: row.try_get("bio")?,
            phone: row.try_get("phone")?,
            qualification: row.try_get("qualification")?,
            experience_years: row.try_get("experience_years")?,
            is_active: row.try_get("is_active")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DoctorProfile {
    #[serde(flatten)]
    pub doctor: Doctor,
    pub full_name: String,
}

impl From<Doctor> for DoctorProfile {
    fn from(doctor: Doctor) -> Self {
        let full_name = doctor.full_name();
        Self { doctor, full_name }
    }
}

// ==============================================================================
// WEEKLY SCHEDULES
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: i64,
    pub doctor_id: i64,
    pub day_of_week: i32,
    #[serde(with = "time_format")]
    pub start_time: NaiveTime,
    #[serde(with = "time_format")]
    pub end_time: NaiveTime,
    pub slot_duration_minutes: i64,
    pub break_duration_minutes: i64,
    pub is_active: bool,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Schedule {
    pub fn day_name(&self) -> &'static str {
        day_name(self.day_of_week)
    }

    pub fn window(&self) -> TimeInterval {
        TimeInterval {
            start: self.start_time,
            end: self.end_time,
        }
    }

    pub fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            doctor_id: row.try_get("doctor_id")?,
            day_of_week: row.try_get("day_of_week")?,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
            slot_duration_minutes: row.try_get("slot_duration_minutes")?,
            break_duration_minutes: row.try_get("break_duration_minutes")?,
            is_active: row.try_get("is_active")?,
            notes: row.try_get("notes")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleView {
    #[serde(flatten)]
    pub schedule: Schedule,
    pub day_name: &'static str,
}

impl From<Schedule> for ScheduleView {
    fn from(schedule: Schedule) -> Self {
        let day_name = schedule.day_name();
        Self { schedule, day_name }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WeeklySchedule {
    pub doctor: DoctorProfile,
    pub schedules: Vec<ScheduleView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateScheduleRequest {
    /// Required for staff; doctors always create for themselves.
    pub doctor_id: Option<i64>,
    pub day_of_week: i32,
    #[serde(with = "time_format")]
    pub start_time: NaiveTime,
    #[serde(with = "time_format")]
    pub end_time: NaiveTime,
    pub slot_duration_minutes: Option<i64>,
    pub break_duration_minutes: Option<i64>,
    pub is_active: Option<bool>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateScheduleRequest {
    pub day_of_week: Option<i32>,
    #[serde(default, with = "time_format::option")]
    pub start_time: Option<NaiveTime>,
    #[serde(default, with = "time_format::option")]
    pub end_time: Option<NaiveTime>,
    pub slot_duration_minutes: Option<i64>,
    pub break_duration_minutes: Option<i64>,
    pub is_active: Option<bool>,
    /// Absent keeps the current notes, a blank string clears them.
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScheduleFilters {
    pub doctor_id: Option<i64>,
    pub day_of_week: Option<i32>,
    pub is_active: Option<bool>,
}

/// The fields of a schedule that the write path validates and persists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleDraft {
    pub doctor_id: i64,
    pub day_of_week: i32,
    pub window: TimeInterval,
    pub slot_duration_minutes: i64,
    pub break_duration_minutes: i64,
    pub is_active: bool,
    pub notes: Option<String>,
}

impl ScheduleDraft {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        doctor_id: i64,
        day_of_week: i32,
        start_time: NaiveTime,
        end_time: NaiveTime,
        slot_duration_minutes: i64,
        break_duration_minutes: i64,
        is_active: bool,
        notes: Option<String>,
    ) -> Result<Self, ScheduleError> {
        if !(0..=6).contains(&day_of_week) {
            return Err(ScheduleError::Validation(
                "Day of week must be between 0 (Monday) and 6 (Sunday)".to_string(),
            ));
        }

        let window = TimeInterval::new(
            time_format::truncate_to_minute(start_time),
            time_format::truncate_to_minute(end_time),
        )
        .ok_or(ScheduleError::InvalidTimeRange)?;

        if !(MIN_SLOT_MINUTES..=MAX_SLOT_MINUTES).contains(&slot_duration_minutes) {
            return Err(ScheduleError::Validation(format!(
                "Slot duration must be between {} and {} minutes",
                MIN_SLOT_MINUTES, MAX_SLOT_MINUTES
            )));
        }

        if !(0..=MAX_BREAK_MINUTES).contains(&break_duration_minutes) {
            return Err(ScheduleError::Validation(format!(
                "Break duration must be between 0 and {} minutes",
                MAX_BREAK_MINUTES
            )));
        }

        let notes = notes.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        if notes.as_ref().is_some_and(|n| n.chars().count() > MAX_NOTES_LEN) {
            return Err(ScheduleError::Validation(format!(
                "Notes cannot be longer than {} characters",
                MAX_NOTES_LEN
            )));
        }

        Ok(Self {
            doctor_id,
            day_of_week,
            window,
            slot_duration_minutes,
            break_duration_minutes,
            is_active,
            notes,
        })
    }

    /// Applies a partial edit on top of an existing schedule.
    pub fn merged(existing: &Schedule, update: UpdateScheduleRequest) -> Result<Self, ScheduleError> {
        Self::new(
            existing.doctor_id,
            update.day_of_week.unwrap_or(existing.day_of_week),
            update.start_time.unwrap_or(existing.start_time),
            update.end_time.unwrap_or(existing.end_time),
            update.slot_duration_minutes.unwrap_or(existing.slot_duration_minutes),
            update.break_duration_minutes.unwrap_or(existing.break_duration_minutes),
            update.is_active.unwrap_or(existing.is_active),
            match update.notes {
                Some(notes) => Some(notes),
                None => existing.notes.clone(),
            },
        )
    }
}

// ==============================================================================
// AVAILABILITY
// ==============================================================================

/// Why a requested slot cannot be booked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unavailable {
    PastDate,
    PastTime,
    NoOfficeHours,
    OutsideWorkingHours,
    Conflict { start: NaiveTime },
}

impl fmt::Display for Unavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unavailable::PastDate => write!(f, "Cannot book appointments in the past"),
            Unavailable::PastTime => write!(f, "Appointment time must be in the future"),
            Unavailable::NoOfficeHours => write!(f, "Doctor does not have office hours on this day"),
            Unavailable::OutsideWorkingHours => {
                write!(f, "Requested time is outside of doctor's working hours")
            }
            Unavailable::Conflict { start } => write!(
                f,
                "Appointment conflicts with an existing appointment at {}",
                time_format::format_time(start)
            ),
        }
    }
}

/// A request to check one candidate slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRequest {
    pub doctor_id: i64,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    /// `None` uses the slot length of the matching schedule window.
    pub duration_minutes: Option<i64>,
    pub exclude_appointment_id: Option<i64>,
}

/// Outcome of checking a [`SlotRequest`], with the duration actually used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotDecision {
    pub start_time: NaiveTime,
    pub duration_minutes: i64,
    pub outcome: Result<(), Unavailable>,
}

impl SlotDecision {
    pub fn is_available(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn end_time(&self) -> Option<NaiveTime> {
        TimeInterval::from_start(self.start_time, self.duration_minutes).map(|i| i.end)
    }

    pub fn to_check(&self) -> AvailabilityCheck {
        AvailabilityCheck {
            available: self.is_available(),
            reason: self.outcome.err().map(|u| u.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityCheck {
    pub available: bool,
    pub reason: Option<String>,
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Error, Debug)]
pub enum DoctorError {
    #[error("Doctor not found")]
    NotFound,

    #[error("Doctor is not active")]
    Inactive,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<DoctorError> for AppError {
    fn from(err: DoctorError) -> Self {
        match err {
            DoctorError::NotFound => AppError::NotFound(err.to_string()),
            DoctorError::Inactive => AppError::ValidationError(err.to_string()),
            DoctorError::Database(e) => AppError::Database(e.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Schedule not found")]
    NotFound,

    #[error("Doctor not found")]
    DoctorNotFound,

    #[error("Start time must be before end time")]
    InvalidTimeRange,

    #[error("{0}")]
    Validation(String),

    #[error("Schedule overlaps with an existing schedule ({window}) on {day}")]
    Overlap { window: TimeInterval, day: &'static str },

    #[error("{0}")]
    Forbidden(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<ScheduleError> for AppError {
    fn from(err: ScheduleError) -> Self {
        match err {
            ScheduleError::NotFound | ScheduleError::DoctorNotFound => {
                AppError::NotFound(err.to_string())
            }
            ScheduleError::InvalidTimeRange
            | ScheduleError::Validation(_)
            | ScheduleError::Overlap { .. } => AppError::ValidationError(err.to_string()),
            ScheduleError::Forbidden(msg) => AppError::Forbidden(msg),
            ScheduleError::Database(e) => AppError::Database(e.to_string()),
        }
    }
}
