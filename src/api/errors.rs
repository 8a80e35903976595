use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use std::fmt;

pub const REQUEST_ERROR_CODE: &str = "E101";
pub const INTERNAL_ERROR_CODE: &str = "E102";

/// Error body returned by the notification API: `{error_code, message}`
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    pub error_code: &'static str,
    pub message: String,
    #[serde(skip)]
    status: StatusCode,
}

impl ApiError {
    /// Malformed or incomplete request body (422)
    pub fn request(message: impl Into<String>) -> Self {
        Self {
            error_code: REQUEST_ERROR_CODE,
            message: message.into(),
            status: StatusCode::UNPROCESSABLE_ENTITY,
        }
    }

    /// Anything that went wrong after the request was accepted (500)
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            error_code: INTERNAL_ERROR_CODE,
            message: message.into(),
            status: StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error code: {}, message: {}", self.error_code, self.message)
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        self.status
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status).json(self)
    }
}
