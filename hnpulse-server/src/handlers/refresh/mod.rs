pub mod handle_refresh;
pub mod handle_stream;

pub use handle_refresh::{refresh_status_handler, trigger_refresh_handler};
pub use handle_stream::{build_refresh_stream, refresh_stream_handler};
