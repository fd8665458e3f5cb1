macro_rules! api_path {
    ($path:literal) => {
        concat!("/api", $path)
    };
}

/// Route definitions shared by the server and its clients
pub const ROOT: &str = "/api";

pub const STATUS: &str = api_path!("/status");

pub mod refresh {
    pub const TRIGGER: &str = api_path!("/refresh");
    pub const STREAM: &str = api_path!("/refresh/stream");
}

pub mod adhoc {
    pub const SUMMARIZE_SINGLE: &str = api_path!("/summarize-single");
    pub const STATUS: &str = api_path!("/adhoc-status");
}
