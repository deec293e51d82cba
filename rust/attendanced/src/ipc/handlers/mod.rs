pub mod analytics;
pub mod attendance;
pub mod backup_exchange;
pub mod core;
pub mod reports;
pub mod setup;
pub mod students;
