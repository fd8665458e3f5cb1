pub mod handle_adhoc;

pub use handle_adhoc::{adhoc_status_handler, summarize_single_handler};
