//! Engine API models

use serde::{Deserialize, Serialize};

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Deployment modes the engine will accept
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModesResponse {
    pub modes: Vec<String>,
}

/// Body returned when a request is rejected before a deployment starts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_omits_empty_details() {
        let json = serde_json::to_value(ErrorResponse::new("bad request")).unwrap();
        assert_eq!(json["error"], "bad request");
        assert!(json.get("details").is_none());

        let response = ErrorResponse::new("bad").with_details("missing field");
        let json = serde_json::to_value(response).unwrap();
        assert_eq!(json["details"], "missing field");
    }
}
