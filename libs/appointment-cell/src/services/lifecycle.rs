use chrono::NaiveDateTime;
use tracing::{debug, warn};

use shared_models::auth::{Role, User};

use crate::models::{Appointment, AppointmentError, AppointmentStatus};

pub struct AppointmentLifecycleService;

impl Default for AppointmentLifecycleService {
    fn default() -> Self {
        Self::new()
    }
}

impl AppointmentLifecycleService {
    pub fn new() -> Self {
        Self
    }

    /// Validate that a status transition is allowed
    pub fn validate_status_transition(
        &self,
        current_status: AppointmentStatus,
        new_status: AppointmentStatus,
    ) -> Result<(), AppointmentError> {
        debug!("Validating status transition from {} to {}", current_status, new_status);

        if current_status == new_status {
            return Ok(());
        }

        if !self.get_valid_transitions(current_status).contains(&new_status) {
            warn!("Invalid status transition attempted: {} -> {}", current_status, new_status);
            return Err(AppointmentError::InvalidStatusTransition {
                from: current_status,
                to: new_status,
            });
        }

        Ok(())
    }

    /// Get all valid next statuses for a given current status
    pub fn get_valid_transitions(&self, current_status: AppointmentStatus) -> Vec<AppointmentStatus> {
        match current_status {
            AppointmentStatus::Scheduled => vec![
                AppointmentStatus::Confirmed,
                AppointmentStatus::Completed,
                AppointmentStatus::Cancelled,
                AppointmentStatus::NoShow,
            ],
            AppointmentStatus::Confirmed => vec![
                AppointmentStatus::Completed,
                AppointmentStatus::Cancelled,
                AppointmentStatus::NoShow,
            ],
            // Terminal states - no transitions allowed
            AppointmentStatus::Completed
            | AppointmentStatus::Cancelled
            | AppointmentStatus::NoShow => vec![],
        }
    }

    /// Patients and doctors only see their own appointments.
    pub fn ensure_can_view(&self, user: &User, appointment: &Appointment) -> Result<(), AppointmentError> {
        match user.role {
            Role::Admin | Role::Receptionist => Ok(()),
            Role::Doctor { doctor_id } if doctor_id == appointment.doctor_id => Ok(()),
            Role::Patient { patient_id } if patient_id == appointment.patient_id => Ok(()),
            _ => Err(AppointmentError::Forbidden(
                "You do not have access to this appointment".to_string(),
            )),
        }
    }

    /// Who may move an appointment to `new_status`. Patients may only cancel
    /// their own upcoming appointments.
    pub fn authorize_status_change(
        &self,
        user: &User,
        appointment: &Appointment,
        new_status: AppointmentStatus,
        now: NaiveDateTime,
    ) -> Result<(), AppointmentError> {
        self.ensure_can_view(user, appointment)?;

        match user.role {
            Role::Admin | Role::Receptionist | Role::Doctor { .. } => Ok(()),
            Role::Patient { .. } => {
                if new_status != AppointmentStatus::Cancelled {
                    return Err(AppointmentError::Forbidden(
                        "Patients can only cancel appointments".to_string(),
                    ));
                }
                if !appointment.can_be_cancelled(now) {
                    return Err(AppointmentError::Validation(
                        "This appointment can no longer be cancelled".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Only staff may edit or delete appointments.
    pub fn ensure_staff(&self, user: &User) -> Result<(), AppointmentError> {
        if user.role.is_staff() {
            Ok(())
        } else {
            Err(AppointmentError::Forbidden(
                "Only administrators and receptionists can modify appointments".to_string(),
            ))
        }
    }
}
