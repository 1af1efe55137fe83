use std::time::Duration;

use http::StatusCode;
use serde::Deserialize;
use serde::Serialize;

use crate::ExtractionError;

const REQUEST_FAILED: &str = "Request Failed";
const AT_CAPACITY: &str = "The API is at capacity, try again later.";

/// The JSON body sent with a rejection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub status: String,
    pub body: String,
}

impl Message {
    pub fn new(status: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            body: body.into(),
        }
    }

    /// `{"status":"Request Failed","body":"The API is at capacity, try again later."}`
    pub fn at_capacity() -> Self {
        Self::new(REQUEST_FAILED, AT_CAPACITY)
    }
}

/// Errors produced by the admission middleware.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AdmissionError {
    /// The client's bucket is empty.
    ///
    /// The server never retries on the client's behalf. When the `axum` feature
    /// is enabled, this converts to `429 Too Many Requests` with a `Retry-After`
    /// header.
    #[error("Rate limit exceeded; retry after {retry_after:?}")]
    RateLimited {
        /// The duration until the client's next token is available.
        retry_after: Duration,
    },

    /// The client could not be identified, so no admission decision was made.
    ///
    /// When the `axum` feature is enabled, this converts to `500 Internal Server Error`.
    #[error("Could not identify client: {0}")]
    Extraction(#[from] ExtractionError),

    /// An unexpected error occurred in the inner service.
    ///
    /// The string contains the `Display` representation of the inner error.
    /// When the `axum` feature is enabled, this converts to `500 Internal Server Error`.
    #[error("Internal service error: {0}")]
    Inner(String),
}

impl AdmissionError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Extraction(_) | Self::Inner(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whole seconds to advertise in `Retry-After`, rounded up and never zero.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after } => {
                let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
                Some(secs.max(1))
            }
            _ => None,
        }
    }

    pub fn message(&self) -> Message {
        match self {
            Self::RateLimited { .. } => Message::at_capacity(),
            _ => Message::new(REQUEST_FAILED, self.to_string()),
        }
    }
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for AdmissionError {
    fn into_response(self) -> axum::response::Response {
        let mut response = (self.status_code(), axum::Json(self.message())).into_response();
        if let Some(secs) = self.retry_after_secs() {
            response
                .headers_mut()
                .insert(http::header::RETRY_AFTER, http::HeaderValue::from(secs));
        }
        response
    }
}

/// Converts errors surfacing from the admission stack into responses.
///
/// The signature matches what `axum::error_handling::HandleErrorLayer` expects.
#[cfg(feature = "axum")]
pub async fn handle_admission_error(err: tower::BoxError) -> axum::response::Response {
    use axum::response::IntoResponse;

    match err.downcast::<AdmissionError>() {
        Ok(admission) => (*admission).into_response(),
        Err(other) => AdmissionError::Inner(other.to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_rounds_retry_after_up_to_whole_seconds() {
        let secs = |ms| {
            AdmissionError::RateLimited {
                retry_after: Duration::from_millis(ms),
            }
            .retry_after_secs()
        };
        assert_eq!(secs(0), Some(1));
        assert_eq!(secs(50), Some(1));
        assert_eq!(secs(1000), Some(1));
        assert_eq!(secs(1500), Some(2));
        assert_eq!(
            AdmissionError::Inner("boom".to_string()).retry_after_secs(),
            None
        );
    }

    #[test]
    fn rejection_body_is_fixed() {
        let err = AdmissionError::RateLimited {
            retry_after: Duration::from_millis(50),
        };
        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            serde_json::to_string(&err.message()).unwrap(),
            r#"{"status":"Request Failed","body":"The API is at capacity, try again later."}"#
        );
    }

    #[test]
    fn extraction_failures_are_server_errors() {
        let err = AdmissionError::from(ExtractionError::MissingPeerAddr);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            err.message(),
            Message::new(
                "Request Failed",
                "Could not identify client: request carries no peer address"
            )
        );
    }
}
