//! Fixture helpers for tests. They write rows directly, skipping the
//! business rules, so tests can set up states the API would refuse
//! (past bookings, cancelled rows, inactive doctors).

use anyhow::Result;
use chrono::{NaiveDate, NaiveTime, Utc};

use crate::database::Database;

pub struct Fixtures<'a> {
    db: &'a Database,
}

impl<'a> Fixtures<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub async fn doctor(&self, first_name: &str, last_name: &str, specialization: &str) -> Result<i64> {
        self.doctor_with_status(first_name, last_name, specialization, true).await
    }

    pub async fn doctor_with_status(
        &self,
        first_name: &str,
        last_name: &str,
        specialization: &str,
        is_active: bool,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO doctors (first_name, last_name, specialization, is_active, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(first_name)
        .bind(last_name)
        .bind(specialization)
        .bind(is_active)
        .bind(Utc::now())
        .execute(self.db.pool())
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn patient(&self, first_name: &str, last_name: &str) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO patients (first_name, last_name, created_at) VALUES (?, ?, ?)",
        )
        .bind(first_name)
        .bind(last_name)
        .bind(Utc::now())
        .execute(self.db.pool())
        .await?;

        Ok(result.last_insert_rowid())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn schedule(
        &self,
        doctor_id: i64,
        day_of_week: i32,
        start_time: NaiveTime,
        end_time: NaiveTime,
        slot_duration_minutes: i64,
        break_duration_minutes: i64,
        is_active: bool,
    ) -> Result<i64> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO schedules
                (doctor_id, day_of_week, start_time, end_time, slot_duration_minutes,
                 break_duration_minutes, is_active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(doctor_id)
        .bind(day_of_week)
        .bind(start_time)
        .bind(end_time)
        .bind(slot_duration_minutes)
        .bind(break_duration_minutes)
        .bind(is_active)
        .bind(now)
        .bind(now)
        .execute(self.db.pool())
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn appointment(
        &self,
        doctor_id: i64,
        patient_id: i64,
        date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
        status: &str,
    ) -> Result<i64> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO appointments
                (patient_id, doctor_id, appointment_date, start_time, end_time, status,
                 reason, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, 'Check-up', ?, ?)
            "#,
        )
        .bind(patient_id)
        .bind(doctor_id)
        .bind(date)
        .bind(start_time)
        .bind(end_time)
        .bind(status)
        .bind(now)
        .bind(now)
        .execute(self.db.pool())
        .await?;

        Ok(result.last_insert_rowid())
    }
}

/// Shorthand for `NaiveTime` literals in tests.
pub fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}
