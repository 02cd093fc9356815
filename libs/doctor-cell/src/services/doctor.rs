use std::sync::Arc;

use sqlx::SqliteConnection;
use tracing::debug;

use shared_database::{AppState, Database};

use crate::models::{Doctor, DoctorError};

pub async fn fetch_doctor(
    conn: &mut SqliteConnection,
    doctor_id: i64,
) -> Result<Option<Doctor>, sqlx::Error> {
    let row = sqlx::query("SELECT * FROM doctors WHERE id = ?")
        .bind(doctor_id)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(Doctor::from_row).transpose()
}

/// A doctor that can take new appointments.
pub async fn fetch_active_doctor(
    conn: &mut SqliteConnection,
    doctor_id: i64,
) -> Result<Doctor, DoctorError> {
    let doctor = fetch_doctor(conn, doctor_id)
        .await?
        .ok_or(DoctorError::NotFound)?;

    if !doctor.is_active {
        return Err(DoctorError::Inactive);
    }
    Ok(doctor)
}

pub struct DoctorService {
    db: Database,
}

impl DoctorService {
    pub fn new(state: &Arc<AppState>) -> Self {
        Self {
            db: state.db.clone(),
        }
    }

    /// Doctors ordered by last then first name. Inactive ones only on request.
    pub async fn list_doctors(&self, include_inactive: bool) -> Result<Vec<Doctor>, DoctorError> {
        debug!("Listing doctors (include_inactive={})", include_inactive);

        let rows = sqlx::query(
            r#"
            SELECT * FROM doctors
            WHERE ? OR is_active = 1
            ORDER BY last_name, first_name
            "#,
        )
        .bind(include_inactive)
        .fetch_all(self.db.pool())
        .await?;

        let doctors = rows
            .iter()
            .map(Doctor::from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(doctors)
    }

    pub async fn get_doctor(&self, doctor_id: i64) -> Result<Doctor, DoctorError> {
        debug!("Fetching doctor {}", doctor_id);

        let mut conn = self.db.pool().acquire().await?;
        fetch_doctor(&mut conn, doctor_id)
            .await?
            .ok_or(DoctorError::NotFound)
    }
}
