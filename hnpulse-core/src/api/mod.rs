//! API-facing facade (routes and transport DTOs).

pub mod routes;
pub mod types;
