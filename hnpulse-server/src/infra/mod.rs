pub mod app_state;
pub mod config;
pub mod errors;
pub mod refresh;
pub mod startup;
