pub mod aggregation;
pub mod agreements;
pub mod app;
pub mod calendar;
pub mod config;
pub mod errors;
pub mod feed;
pub mod handlers;
pub mod models;
pub mod roles;
pub mod session;
pub mod state;
pub mod stats;
pub mod storage;
pub mod weekly;

pub use app::router;
pub use config::Settings;
pub use state::AppState;
pub use storage::{DiaryStore, load_data};
