pub mod auth;
pub mod data;
pub mod models;
pub mod responses;
pub mod router;
pub mod state;
pub mod token;
pub mod uploads;

pub use responses::{ApiError, json_error};
pub use state::AppState;
