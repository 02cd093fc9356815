use std::sync::Arc;

use shared_config::AppConfig;

use crate::database::Database;

/// Shared state handed to every cell router.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Database,
}

impl AppState {
    pub fn new(config: AppConfig, db: Database) -> Arc<Self> {
        Arc::new(Self {
            config: Arc::new(config),
            db,
        })
    }
}
