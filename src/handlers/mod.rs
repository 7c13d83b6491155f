pub mod admin;
pub mod api;
pub mod auth;
pub mod dish;
pub mod health;
pub mod menu;
pub mod metrics;
pub mod middleware;

pub use admin::{create_admin_router, AdminState};
pub use api::{create_api_router, error_response, service_error_to_response, ApiError, ApiState};
pub use auth::{require_api_token, AuthState};
pub use health::health_check;
pub use metrics::metrics_handler;
pub use middleware::{request_validation_middleware, security_headers_middleware, RequestLimits};
