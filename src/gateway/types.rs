//! Response envelope shared by every gateway endpoint.

use serde::Serialize;
use utoipa::ToSchema;

/// Wire envelope: `code` 0 means success and `data` is present; any other
/// code is an error described by `msg`.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiResponse<T> {
    #[schema(example = 0)]
    pub code: i32,
    #[schema(example = "ok")]
    pub msg: String,
    /// Omitted from the JSON entirely on errors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: error_codes::SUCCESS,
            msg: "ok".to_string(),
            data: Some(data),
        }
    }

    /// An error envelope carries no data, only the code and message.
    pub fn error(code: i32, msg: impl Into<String>) -> Self {
        Self {
            code,
            msg: msg.into(),
            data: None,
        }
    }
}

/// Stable error codes, grouped by the HTTP class they usually ship with.
pub mod error_codes {
    pub const SUCCESS: i32 = 0;

    // 4xx class
    pub const INVALID_PARAMETER: i32 = 1001;

    // 5xx class
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const SERVICE_UNAVAILABLE: i32 = 5001;
}
