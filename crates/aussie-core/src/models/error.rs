use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

/// Result alias used throughout the pipeline.
pub type AussieResult<T> = Result<T, AussieError>;

/// The gateway's error taxonomy (spec §7). Every variant renders as an
/// RFC 7807 `application/problem+json` body via [`ResponseError`].
#[derive(Debug, Error)]
pub enum AussieError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflicting authentication")]
    ConflictingAuthentication,

    #[error("authentication required or failed: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("payload too large: {0} bytes exceeds limit of {1} bytes")]
    PayloadTooLarge(u64, u64),

    #[error("request header fields too large: {0}")]
    RequestHeaderFieldsTooLarge(String),

    #[error("too many requests, retry after {retry_after_secs}s")]
    TooManyRequests {
        retry_after_secs: u64,
        limit: Option<u64>,
        remaining: Option<u64>,
        reset_at_secs: Option<u64>,
    },

    #[error("upstream error: {0}")]
    BadGateway(String),

    #[error("upstream timed out")]
    GatewayTimeout,

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

/// RFC 7807 problem body.
#[derive(Debug, Serialize)]
struct ProblemDetails {
    #[serde(rename = "type")]
    problem_type: String,
    title: String,
    status: u16,
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl AussieError {
    fn problem_type(&self) -> &'static str {
        match self {
            AussieError::BadRequest(_) => "bad-request",
            AussieError::ConflictingAuthentication => "conflicting-authentication",
            AussieError::Unauthorized(_) => "unauthorized",
            AussieError::Forbidden(_) => "forbidden",
            AussieError::NotFound(_) => "not-found",
            AussieError::PayloadTooLarge(_, _) => "payload-too-large",
            AussieError::RequestHeaderFieldsTooLarge(_) => "header-fields-too-large",
            AussieError::TooManyRequests { .. } => "too-many-requests",
            AussieError::BadGateway(_) => "bad-gateway",
            AussieError::GatewayTimeout => "gateway-timeout",
            AussieError::StoreUnavailable(_) => "store-unavailable",
        }
    }

    fn error_code(&self) -> Option<&'static str> {
        match self {
            AussieError::ConflictingAuthentication => Some("conflicting_authentication"),
            _ => None,
        }
    }
}

impl ResponseError for AussieError {
    fn status_code(&self) -> StatusCode {
        match self {
            AussieError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AussieError::ConflictingAuthentication => StatusCode::BAD_REQUEST,
            AussieError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AussieError::Forbidden(_) => StatusCode::FORBIDDEN,
            AussieError::NotFound(_) => StatusCode::NOT_FOUND,
            AussieError::PayloadTooLarge(_, _) => StatusCode::PAYLOAD_TOO_LARGE,
            AussieError::RequestHeaderFieldsTooLarge(_) => {
                StatusCode::from_u16(431).unwrap_or(StatusCode::BAD_REQUEST)
            }
            AussieError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            AussieError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            AussieError::GatewayTimeout => StatusCode::GATEWAY_TIMEOUT,
            AussieError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let body = ProblemDetails {
            problem_type: format!("https://aussie.dev/problems/{}", self.problem_type()),
            title: status
                .canonical_reason()
                .unwrap_or("Error")
                .to_string(),
            status: status.as_u16(),
            detail: self.to_string(),
            error: self.error_code().map(|s| s.to_string()),
        };

        let mut builder = HttpResponse::build(status);
        builder.content_type("application/problem+json");

        // Retry-After is only meaningful on 429 (spec §7); 504 leaves it unset.
        if let AussieError::TooManyRequests {
            retry_after_secs, ..
        } = self
        {
            builder.insert_header(("Retry-After", retry_after_secs.to_string()));
        }

        builder.json(body)
    }
}
