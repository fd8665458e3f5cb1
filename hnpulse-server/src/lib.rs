//! # hnpulse Server
//!
//! HTTP control plane for the Hacker News summary pipeline.
//!
//! ## Overview
//!
//! - **Refresh API**: status polling and guarded manual refreshes
//! - **Progress stream**: Server-Sent Events narrating the running job
//! - **Ad-hoc summaries**: single-article runs under a daily quota
//! - **Daily scheduler**: one automatic refresh inside a wall-clock window
//!
//! The router is built by [`routes::create_app`] around an
//! [`infra::app_state::AppState`].

pub mod handlers;
pub mod infra;
pub mod routes;

pub use infra::app_state::AppState;
