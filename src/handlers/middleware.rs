use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::{error, warn};

use super::api::{error_response, ApiError};

/// Size limits applied before a request reaches the API handlers
#[derive(Debug, Clone, Copy)]
pub struct RequestLimits {
    pub max_request_size: usize,
}

impl RequestLimits {
    pub fn new(max_request_size: usize) -> Self {
        Self { max_request_size }
    }
}

/// Request validation middleware
pub async fn request_validation_middleware(
    State(limits): State<RequestLimits>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let multipart = validate_content_type(&request)?;

    // Image uploads are bounded by the route's own body limit
    if !multipart {
        validate_request_size(&request, limits.max_request_size)?;
    }

    Ok(next.run(request).await)
}

fn has_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

fn content_length(request: &Request) -> Option<u64> {
    request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
}

/// Returns whether the request carries a multipart body
fn validate_content_type(request: &Request) -> Result<bool, ApiError> {
    if !has_body(request.method()) {
        return Ok(false);
    }

    let Some(content_type) = request.headers().get(header::CONTENT_TYPE) else {
        // Body-less POSTs (e.g. admin actions) carry no content type
        if content_length(request).unwrap_or(0) == 0 {
            return Ok(false);
        }
        warn!("Missing content type header");
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "Content-Type header is required for requests with body",
            &[],
        ));
    };

    let content_type = content_type.to_str().unwrap_or("").to_ascii_lowercase();

    if content_type.starts_with("application/json") {
        Ok(false)
    } else if content_type.starts_with("multipart/form-data") {
        Ok(true)
    } else {
        warn!("Invalid content type: {}", content_type);
        Err(error_response(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "Content-Type must be application/json or multipart/form-data",
            &[],
        ))
    }
}

fn validate_request_size(request: &Request, max_request_size: usize) -> Result<(), ApiError> {
    let Some(length) = content_length(request) else {
        return Ok(());
    };

    if length > max_request_size as u64 {
        error!("Request too large: {} bytes", length);
        return Err(error_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            format!(
                "Request size {} bytes exceeds maximum of {} bytes",
                length, max_request_size
            ),
            &[],
        ));
    }

    Ok(())
}

/// Security headers middleware
pub async fn security_headers_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'self'"),
    );

    response
}
