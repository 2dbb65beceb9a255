use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::DbErr),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("{}", duplicate_message(.barcode, .first_recorded_at))]
    DuplicateRecord {
        barcode: String,
        first_recorded_at: Option<DateTime<Utc>>,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("External API error: {0}")]
    ExternalApiError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("HTTP request error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),
}

/// 重复兑换提示；能查到首次记录时间时一并带上
pub fn duplicate_message(barcode: &str, first_recorded_at: &Option<DateTime<Utc>>) -> String {
    match first_recorded_at {
        Some(ts) => format!(
            "Barcode {barcode} has already been redeemed (first recorded at {})",
            ts.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        None => format!("Barcode {barcode} has already been redeemed"),
    }
}

impl AppError {
    /// 对外暴露的错误码，客户端据此还原错误类型
    pub fn code(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::DuplicateRecord { .. } => "DUPLICATE_RECORD",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::ExternalApiError(_) | AppError::ReqwestError(_) => "EXTERNAL_API_ERROR",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            _ => "INTERNAL_ERROR",
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, AppError::DuplicateRecord { .. })
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::DuplicateRecord { .. } => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ExternalApiError(_) | AppError::ReqwestError(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            AppError::ValidationError(msg) => {
                log::warn!("Validation error: {msg}");
                msg.clone()
            }
            AppError::DuplicateRecord { barcode, .. } => {
                log::warn!("Duplicate redemption rejected: {barcode}");
                self.to_string()
            }
            AppError::NotFound(msg) => msg.clone(),
            AppError::ExternalApiError(msg) => {
                log::error!("External API error: {msg}");
                msg.clone()
            }
            AppError::DatabaseError(err) => {
                log::error!("Database error: {err}");
                "Database error".to_string()
            }
            _ => {
                log::error!("Internal error: {self}");
                "Internal server error".to_string()
            }
        };

        let mut error = json!({
            "code": self.code(),
            "message": message,
        });
        if let AppError::DuplicateRecord {
            barcode,
            first_recorded_at,
        } = self
        {
            error["details"] = json!({
                "barcode": barcode,
                "first_recorded_at": first_recorded_at,
            });
        }

        HttpResponse::build(self.status_code()).json(json!({
            "success": false,
            "error": error
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_duplicate_message_with_timestamp() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap();
        let err = AppError::DuplicateRecord {
            barcode: "U159001922437".to_string(),
            first_recorded_at: Some(ts),
        };
        let msg = err.to_string();
        assert!(msg.contains("U159001922437"));
        assert!(msg.contains("2024-05-01 08:30:00 UTC"));
    }

    #[test]
    fn test_duplicate_message_without_timestamp() {
        let err = AppError::DuplicateRecord {
            barcode: "ABC".to_string(),
            first_recorded_at: None,
        };
        assert_eq!(err.to_string(), "Barcode ABC has already been redeemed");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::ValidationError("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        let dup = AppError::DuplicateRecord {
            barcode: "x".into(),
            first_recorded_at: None,
        };
        assert_eq!(dup.status_code(), StatusCode::CONFLICT);
        assert_eq!(dup.code(), "DUPLICATE_RECORD");
    }
}
