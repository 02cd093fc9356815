pub mod database;
pub mod schema;
pub mod state;
pub mod test_utils;

pub use database::{Database, WriteTransaction};
pub use state::AppState;
