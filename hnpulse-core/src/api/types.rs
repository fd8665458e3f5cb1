use serde::{Deserialize, Serialize};

/// `GET /api/status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub in_progress: bool,
    /// Raw `generated_at` of the latest daily summary.
    pub last_refresh: Option<String>,
    pub can_refresh: bool,
    pub rate_limit_message: Option<String>,
}

/// Body returned by the trigger endpoints, on success and on denial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_today: Option<u32>,
}

impl ActionResponse {
    pub fn started(message: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
            code: None,
            run_id: Some(run_id.into()),
            remaining_today: None,
        }
    }

    pub fn failed(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.into()),
            code: Some(code.into()),
            run_id: None,
            remaining_today: None,
        }
    }

    pub fn with_remaining_today(mut self, remaining: u32) -> Self {
        self.remaining_today = Some(remaining);
        self
    }
}

/// `POST /api/summarize-single`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummarizeSingleRequest {
    pub item_id: String,
    #[serde(default)]
    pub url: Option<String>,
}

/// Query of `GET /api/adhoc-status`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdhocStatusQuery {
    #[serde(default)]
    pub item_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdhocStatusResponse {
    pub can_refresh: bool,
    pub remaining_today: u32,
    pub daily_limit: u32,
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn started_body_omits_error_fields() {
        let body = ActionResponse::started("Refresh started", "run-1");
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({
                "success": true,
                "message": "Refresh started",
                "run_id": "run-1",
            })
        );
    }

    #[test]
    fn summarize_request_url_is_optional() {
        let req: SummarizeSingleRequest =
            serde_json::from_value(json!({ "item_id": "42117" })).unwrap();
        assert_eq!(req.url, None);
    }
}
