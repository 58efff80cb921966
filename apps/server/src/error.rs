use std::io::Error as IoError;

use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use deadman::LivenessError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0:#}")]
    Io(#[from] IoError),
    #[error("Address parsing error: {0}")]
    AddrParse(#[from] std::net::AddrParseError),
    #[error("Configuration error: {0}")]
    Config(#[from] deadman::config::Error),
    #[error("{0:#}")]
    Engine(#[from] anyhow::Error),
    #[error(transparent)]
    Liveness(#[from] LivenessError),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Engine error as seen by HTTP clients
#[derive(Debug, Error)]
#[error(transparent)]
pub struct ApiError(#[from] LivenessError);

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match &self.0 {
            LivenessError::NotFound(_) => StatusCode::NOT_FOUND,
            LivenessError::AlreadyExpired { .. } => StatusCode::GONE,
            LivenessError::Conflict(_) => StatusCode::CONFLICT,
            LivenessError::InvalidMonitor { .. } | LivenessError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match &self.0 {
            LivenessError::AlreadyExpired { recorded, .. } => {
                json!({ "error": self.to_string(), "status": "expired", "recorded": recorded })
            }
            LivenessError::InvalidMonitor { .. } | LivenessError::Store(_) => {
                tracing::error!("Request failed: {}", self.0);
                json!({ "error": "internal error" })
            }
            _ => json!({ "error": self.to_string() }),
        };
        HttpResponse::build(self.status_code()).json(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_status_mapping() {
        let id = Uuid::new_v4();
        assert_eq!(ApiError(LivenessError::NotFound(id)).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError(LivenessError::AlreadyExpired { id, recorded: true }).status_code(),
            StatusCode::GONE
        );
        assert_eq!(ApiError(LivenessError::Conflict(id)).status_code(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError(LivenessError::InvalidMonitor { id, reason: "zero interval".into() }).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
