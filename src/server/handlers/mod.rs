pub mod config;
pub mod health;
pub mod sessions;
pub mod sources;
pub mod ui;
pub mod utils;
