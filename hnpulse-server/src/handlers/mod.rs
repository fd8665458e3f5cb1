//! HTTP request handlers organized by functionality

pub mod adhoc;
pub mod refresh;
