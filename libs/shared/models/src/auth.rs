use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtHeader {
    pub alg: String,
    pub typ: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub exp: Option<u64>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub app_metadata: Option<Value>,
    pub user_metadata: Option<Value>,
    pub aud: Option<String>,
    pub iat: Option<u64>,
}

/// The caller's role, carrying the record id a patient or doctor acts as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Role {
    Patient { patient_id: i64 },
    Doctor { doctor_id: i64 },
    Admin,
    Receptionist,
}

impl Role {
    /// Builds the role from the `role` claim and the record ids stored in `app_metadata`.
    pub fn from_claims(role: Option<&str>, app_metadata: Option<&Value>) -> Result<Self, String> {
        let record_id = |key: &str| {
            app_metadata
                .and_then(|meta| meta.get(key))
                .and_then(Value::as_i64)
                .ok_or_else(|| format!("Token is missing {}", key))
        };

        match role {
            Some("patient") => Ok(Role::Patient { patient_id: record_id("patient_id")? }),
            Some("doctor") => Ok(Role::Doctor { doctor_id: record_id("doctor_id")? }),
            Some("admin") => Ok(Role::Admin),
            Some("receptionist") => Ok(Role::Receptionist),
            Some(other) => Err(format!("Unsupported role: {}", other)),
            None => Err("Token has no role".to_string()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Role::Patient { .. } => "patient",
            Role::Doctor { .. } => "doctor",
            Role::Admin => "admin",
            Role::Receptionist => "receptionist",
        }
    }

    /// Admins and receptionists manage every doctor's appointments and schedules.
    pub fn is_staff(&self) -> bool {
        matches!(self, Role::Admin | Role::Receptionist)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub role: Role,
    pub metadata: Option<Value>,
    pub created_at: Option<DateTime<Utc>>,
}
