use std::env;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub jwt_secret: String,
    pub server_host: String,
    pub server_port: u16,
    pub default_appointment_duration_minutes: i64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://clinic.db".to_string(),
            database_max_connections: 5,
            jwt_secret: String::new(),
            server_host: "0.0.0.0".to_string(),
            server_port: 3000,
            default_appointment_duration_minutes: 30,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let config = Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("DATABASE_URL not set, using {}", defaults.database_url);
                    defaults.database_url.clone()
                }),
            database_max_connections: parse_var(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
            jwt_secret: env::var("JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("JWT_SECRET not set, using empty value");
                    String::new()
                }),
            server_host: env::var("SERVER_HOST")
                .unwrap_or_else(|_| defaults.server_host.clone()),
            server_port: parse_var("SERVER_PORT", defaults.server_port),
            default_appointment_duration_minutes: parse_var(
                "DEFAULT_APPOINTMENT_DURATION_MINUTES",
                defaults.default_appointment_duration_minutes,
            ),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.jwt_secret.is_empty() && !self.database_url.is_empty()
    }

    pub fn is_in_memory_database(&self) -> bool {
        self.database_url.contains(":memory:")
    }
}

fn parse_var<T>(name: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display + Copy,
{
    match env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} has invalid value {:?}, using default {}", name, raw, default);
            default
        }),
        Err(_) => default,
    }
}
