use thiserror::Error;

/// Type alias for Result with FootprintError
pub type Result<T> = std::result::Result<T, FootprintError>;

/// Error types for service discovery, privacy requests and credential storage
#[derive(Error, Debug)]
pub enum FootprintError {
    /// Malformed input such as an unknown request type
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown record, or a record owned by someone else
    #[error("Not found: {0}")]
    NotFound(String),

    /// Missing or malformed configuration (including the encryption key)
    #[error("Configuration error: {0}")]
    Config(String),

    /// AEAD tag verification failed: the stored token was tampered with or corrupted
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Per-user request throttle tripped
    #[error("Too many requests, retry after {retry_after} seconds")]
    Throttled { retry_after: u64 },

    /// Uniqueness constraint violated by a concurrent writer
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Email provider returned an error
    #[error("Provider API error: {0}")]
    ApiError(String),

    /// Provider rate limit exceeded - should retry after specified seconds
    #[error("Provider rate limit exceeded, retry after {retry_after} seconds")]
    RateLimitExceeded { retry_after: u64 },

    /// Network-related error (connection issues, TLS, etc.)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Provider call exceeded its deadline
    #[error("Timed out after {0} seconds")]
    Timeout(u64),

    /// Server returned 5xx error
    #[error("Server error (HTTP {status}): {message}")]
    ServerError { status: u16, message: String },

    /// Bad request (400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Forbidden (403)
    #[error("Access forbidden: {0}")]
    Forbidden(String),

    /// Invalid message format or parsing error
    #[error("Invalid message format: {0}")]
    InvalidMessageFormat(String),

    /// Persistence layer failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl FootprintError {
    /// Check if the error is transient and a caller may reasonably retry
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FootprintError::RateLimitExceeded { .. }
                | FootprintError::Throttled { .. }
                | FootprintError::ServerError { .. }
                | FootprintError::NetworkError(_)
                | FootprintError::Timeout(_)
        )
    }

    /// Check if the error is permanent and should not be retried
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }
}

/// Parse the Retry-After header from an HTTP response
///
/// The Retry-After header can be specified in two formats:
/// 1. Delay-seconds: An integer indicating seconds to wait (e.g., "120")
/// 2. HTTP-date: An HTTP date format (e.g., "Wed, 21 Oct 2015 07:28:00 GMT")
///
/// Returns the number of seconds to wait. If the header is missing or invalid,
/// returns a default of 5 seconds.
fn parse_retry_after_header<B>(response: &hyper::Response<B>) -> u64 {
    const DEFAULT_RETRY_AFTER: u64 = 5;

    if let Some(retry_after_value) = response.headers().get("retry-after") {
        if let Ok(retry_after_str) = retry_after_value.to_str() {
            if let Ok(seconds) = retry_after_str.parse::<u64>() {
                return seconds;
            }

            if let Ok(http_date) = httpdate::parse_http_date(retry_after_str) {
                let now = std::time::SystemTime::now();
                if let Ok(duration) = http_date.duration_since(now) {
                    return duration.as_secs();
                }
            }
        }
    }

    DEFAULT_RETRY_AFTER
}

impl From<google_gmail1::Error> for FootprintError {
    fn from(error: google_gmail1::Error) -> Self {
        match error {
            google_gmail1::Error::Failure(ref response) => {
                let status = response.status();
                let status_code = status.as_u16();
                let message = format!(
                    "HTTP {}: {}",
                    status_code,
                    status.canonical_reason().unwrap_or("Unknown")
                );

                match status_code {
                    429 => {
                        let retry_after = parse_retry_after_header(response);
                        FootprintError::RateLimitExceeded { retry_after }
                    }
                    404 => FootprintError::NotFound("Provider resource not found".to_string()),
                    400 => FootprintError::BadRequest(message),
                    401 | 403 => FootprintError::Forbidden(message),
                    500..=599 => FootprintError::ServerError {
                        status: status_code,
                        message,
                    },
                    _ => FootprintError::ApiError(message),
                }
            }
            google_gmail1::Error::BadRequest(ref err) => {
                FootprintError::BadRequest(format!("{}", err))
            }
            google_gmail1::Error::HttpError(ref err) => {
                FootprintError::NetworkError(format!("Connection error: {}", err))
            }
            google_gmail1::Error::Io(err) => FootprintError::NetworkError(err.to_string()),
            _ => FootprintError::ApiError(error.to_string()),
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for FootprintError {
    fn from(error: rusqlite::Error) -> Self {
        match error {
            rusqlite::Error::SqliteFailure(ref err, ref detail)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                FootprintError::Conflict(
                    detail
                        .clone()
                        .unwrap_or_else(|| "unique constraint violated".to_string()),
                )
            }
            other => FootprintError::Storage(other.to_string()),
        }
    }
}
