use actix_web::http::StatusCode;
use serde::{Serialize, Serializer};
use std::fmt;

/// Category of an error code, determined by its leading digit group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// 1xxx
    Validation,
    /// 2xxx
    Upstream,
    /// 4xxx
    RateLimit,
    /// 5xxx
    Internal,
    /// 6xxx
    Unauthenticated,
    /// 7xxx
    NotFound,
    /// 8xxx
    Configuration,
    /// 9xxx
    Critical,
}

/// Every code the gateway can put in an error envelope.
///
/// Clients branch on the class (leading digit) and never on the message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InvalidJson,
    ValidationFailed,
    PayloadTooLarge,
    UpstreamFailure,
    RateLimitExceeded,
    TemporarilyBlocked,
    RateLimiterUnavailable,
    Internal,
    AuthBackendUnavailable,
    MissingAuthorization,
    MalformedAuthorization,
    InvalidSession,
    UnknownApiKey,
    RevokedApiKey,
    ExpiredApiKey,
    EndpointNotFound,
    ResourceNotFound,
    Misconfigured,
    Critical,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidJson => "CN-1000",
            ErrorCode::ValidationFailed => "CN-1001",
            ErrorCode::PayloadTooLarge => "CN-1002",
            ErrorCode::UpstreamFailure => "CN-2000",
            ErrorCode::RateLimitExceeded => "CN-4000",
            ErrorCode::TemporarilyBlocked => "CN-4001",
            ErrorCode::RateLimiterUnavailable => "CN-4002",
            ErrorCode::Internal => "CN-5000",
            ErrorCode::AuthBackendUnavailable => "CN-5002",
            ErrorCode::MissingAuthorization => "CN-6000",
            ErrorCode::MalformedAuthorization => "CN-6001",
            ErrorCode::InvalidSession => "CN-6002",
            ErrorCode::UnknownApiKey => "CN-6003",
            ErrorCode::RevokedApiKey => "CN-6004",
            ErrorCode::ExpiredApiKey => "CN-6005",
            ErrorCode::EndpointNotFound => "CN-7000",
            ErrorCode::ResourceNotFound => "CN-7001",
            ErrorCode::Misconfigured => "CN-8000",
            ErrorCode::Critical => "CN-9000",
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            ErrorCode::InvalidJson | ErrorCode::ValidationFailed | ErrorCode::PayloadTooLarge => {
                ErrorClass::Validation
            }
            ErrorCode::UpstreamFailure => ErrorClass::Upstream,
            ErrorCode::RateLimitExceeded
            | ErrorCode::TemporarilyBlocked
            | ErrorCode::RateLimiterUnavailable => ErrorClass::RateLimit,
            ErrorCode::Internal | ErrorCode::AuthBackendUnavailable => ErrorClass::Internal,
            ErrorCode::MissingAuthorization
            | ErrorCode::MalformedAuthorization
            | ErrorCode::InvalidSession
            | ErrorCode::UnknownApiKey
            | ErrorCode::RevokedApiKey
            | ErrorCode::ExpiredApiKey => ErrorClass::Unauthenticated,
            ErrorCode::EndpointNotFound | ErrorCode::ResourceNotFound => ErrorClass::NotFound,
            ErrorCode::Misconfigured => ErrorClass::Configuration,
            ErrorCode::Critical => ErrorClass::Critical,
        }
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidJson | ErrorCode::ValidationFailed => StatusCode::BAD_REQUEST,
            ErrorCode::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorCode::UpstreamFailure => StatusCode::BAD_GATEWAY,
            ErrorCode::RateLimitExceeded | ErrorCode::TemporarilyBlocked => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::RateLimiterUnavailable | ErrorCode::AuthBackendUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ErrorCode::Internal | ErrorCode::Misconfigured | ErrorCode::Critical => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ErrorCode::MissingAuthorization
            | ErrorCode::MalformedAuthorization
            | ErrorCode::InvalidSession
            | ErrorCode::UnknownApiKey
            | ErrorCode::RevokedApiKey
            | ErrorCode::ExpiredApiKey => StatusCode::UNAUTHORIZED,
            ErrorCode::EndpointNotFound | ErrorCode::ResourceNotFound => StatusCode::NOT_FOUND,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ErrorCode; 19] = [
        ErrorCode::InvalidJson,
        ErrorCode::ValidationFailed,
        ErrorCode::PayloadTooLarge,
        ErrorCode::UpstreamFailure,
        ErrorCode::RateLimitExceeded,
        ErrorCode::TemporarilyBlocked,
        ErrorCode::RateLimiterUnavailable,
        ErrorCode::Internal,
        ErrorCode::AuthBackendUnavailable,
        ErrorCode::MissingAuthorization,
        ErrorCode::MalformedAuthorization,
        ErrorCode::InvalidSession,
        ErrorCode::UnknownApiKey,
        ErrorCode::RevokedApiKey,
        ErrorCode::ExpiredApiKey,
        ErrorCode::EndpointNotFound,
        ErrorCode::ResourceNotFound,
        ErrorCode::Misconfigured,
        ErrorCode::Critical,
    ];

    #[test]
    fn leading_digit_matches_class() {
        for code in ALL {
            let digit = code.as_str().chars().nth(3).unwrap();
            let expected = match code.class() {
                ErrorClass::Validation => '1',
                ErrorClass::Upstream => '2',
                ErrorClass::RateLimit => '4',
                ErrorClass::Internal => '5',
                ErrorClass::Unauthenticated => '6',
                ErrorClass::NotFound => '7',
                ErrorClass::Configuration => '8',
                ErrorClass::Critical => '9',
            };
            assert_eq!(digit, expected, "{} has the wrong class", code);
        }
    }

    #[test]
    fn codes_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for code in ALL {
            assert!(seen.insert(code.as_str()), "duplicate code {}", code);
        }
    }

    #[test]
    fn every_auth_failure_is_401() {
        for code in ALL.iter().filter(|c| c.class() == ErrorClass::Unauthenticated) {
            assert_eq!(code.http_status(), StatusCode::UNAUTHORIZED);
        }
    }
}
