use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use chrono::{Datelike, Duration, Local, NaiveDate, Utc, Weekday};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::{Role, User};

pub struct TestConfig {
    pub jwt_secret: String,
    pub database_url: String,
    pub default_appointment_duration_minutes: i64,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            database_url: "sqlite::memory:".to_string(),
            default_appointment_duration_minutes: 30,
        }
    }
}

impl TestConfig {
    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            database_url: self.database_url.clone(),
            database_max_connections: 1,
            jwt_secret: self.jwt_secret.clone(),
            default_appointment_duration_minutes: self.default_appointment_duration_minutes,
            ..AppConfig::default()
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct TestUser {
    pub id: String,
    pub email: String,
    pub role: String,
    pub record_id: Option<i64>,
}

impl TestUser {
    pub fn new(role: &str, record_id: Option<i64>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: format!("{}@clinic.test", role),
            role: role.to_string(),
            record_id,
        }
    }

    pub fn patient(patient_id: i64) -> Self {
        Self::new("patient", Some(patient_id))
    }

    pub fn doctor(doctor_id: i64) -> Self {
        Self::new("doctor", Some(doctor_id))
    }

    pub fn admin() -> Self {
        Self::new("admin", None)
    }

    pub fn receptionist() -> Self {
        Self::new("receptionist", None)
    }

    fn app_metadata(&self) -> serde_json::Value {
        match (self.role.as_str(), self.record_id) {
            ("patient", Some(id)) => json!({ "patient_id": id }),
            ("doctor", Some(id)) => json!({ "doctor_id": id }),
            _ => json!({}),
        }
    }

    pub fn to_user(&self) -> User {
        let role = Role::from_claims(Some(&self.role), Some(&self.app_metadata()))
            .expect("test user has a valid role");

        User {
            id: self.id.clone(),
            email: Some(self.email.clone()),
            role,
            metadata: None,
            created_at: Some(Utc::now()),
        }
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let now = Utc::now();
        let exp = now + Duration::hours(exp_hours.unwrap_or(24));

        let header = json!({
            "alg": "HS256",
            "typ": "JWT"
        });

        let payload = json!({
            "sub": user.id,
            "email": user.email,
            "role": user.role,
            "app_metadata": user.app_metadata(),
            "iat": now.timestamp(),
            "exp": exp.timestamp()
        });

        let header_encoded = general_purpose::URL_SAFE_NO_PAD.encode(header.to_string());
        let payload_encoded = general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());

        let signing_input = format!("{}.{}", header_encoded, payload_encoded);

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_encoded = general_purpose::URL_SAFE_NO_PAD.encode(signature);

        format!("{}.{}", signing_input, signature_encoded)
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }

    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, "wrong-secret", Some(24))
    }

    pub fn create_malformed_token() -> String {
        "invalid.token.format".to_string()
    }

    pub fn bearer(user: &TestUser, secret: &str) -> String {
        format!("Bearer {}", Self::create_test_token(user, secret, None))
    }
}

/// The next date falling on `weekday`, at least one day after today.
pub fn next_weekday(weekday: Weekday) -> NaiveDate {
    let today = Local::now().date_naive();
    let ahead = (7 + weekday.num_days_from_monday() as i64
        - today.weekday().num_days_from_monday() as i64)
        % 7;
    let ahead = if ahead == 0 { 7 } else { ahead };
    today + Duration::days(ahead)
}

pub fn days_from_today(days: i64) -> NaiveDate {
    Local::now().date_naive() + Duration::days(days)
}
