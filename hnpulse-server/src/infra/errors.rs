use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use hnpulse_core::{
    AdmissionError, api::types::ActionResponse, error::InvalidItemId,
};
use std::{fmt, time::Duration};

pub type AppResult<T> = Result<T, AppError>;

/// Error body shared by every endpoint: `{ success: false, error, code }`.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    pub code: &'static str,
    pub retry_after: Option<Duration>,
}

impl AppError {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            message: message.into(),
            code,
            retry_after: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    pub fn rate_limited(
        code: &'static str,
        message: impl Into<String>,
        retry_after: Option<Duration>,
    ) -> Self {
        Self {
            retry_after,
            ..Self::new(StatusCode::TOO_MANY_REQUESTS, code, message)
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl From<AdmissionError> for AppError {
    fn from(err: AdmissionError) -> Self {
        match err {
            AdmissionError::AlreadyInProgress => {
                AppError::new(StatusCode::CONFLICT, err.code(), err.to_string())
            }
            AdmissionError::RateLimited { .. }
            | AdmissionError::DailyQuotaExceeded { .. } => {
                AppError::rate_limited(
                    err.code(),
                    err.to_string(),
                    err.retry_after(),
                )
            }
        }
    }
}

impl From<InvalidItemId> for AppError {
    fn from(err: InvalidItemId) -> Self {
        AppError::bad_request(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(ActionResponse::failed(self.message, self.code));
        let mut response = (self.status, body).into_response();

        if let Some(wait) = self.retry_after {
            let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
            if let Ok(value) = HeaderValue::from_str(&secs.max(1).to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }

        response
    }
}
