use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Map, Value};
use std::sync::Arc;

use super::dish::{create_dish, delete_dish, get_dish, list_dishes, patch_dish, replace_dish, upload_image};
use super::menu::{create_menu, delete_menu, get_menu, list_menus, patch_menu, replace_menu};
use crate::models::{RepositoryError, ServiceError};
use crate::services::{DishService, MenuService};

/// Error half of every handler result
pub type ApiError = (StatusCode, Json<Value>);

/// Shared application state containing the public API services
#[derive(Clone)]
pub struct ApiState {
    pub menu_service: Arc<MenuService>,
    pub dish_service: Arc<DishService>,
}

/// Create the menu and dish API router
pub fn create_api_router(state: ApiState, max_upload_size: usize) -> Router {
    Router::new()
        .route("/api/menus", get(list_menus).post(create_menu))
        .route(
            "/api/menus/:menu_id",
            get(get_menu)
                .put(replace_menu)
                .patch(patch_menu)
                .delete(delete_menu),
        )
        .route("/api/dishes", get(list_dishes).post(create_dish))
        .route(
            "/api/dishes/:dish_id",
            get(get_dish)
                .put(replace_dish)
                .patch(patch_dish)
                .delete(delete_dish),
        )
        .route(
            "/api/dishes/:dish_id/upload-image",
            post(upload_image).layer(DefaultBodyLimit::max(max_upload_size)),
        )
        .with_state(state)
}

/// Build a JSON error body with optional extra members
pub fn error_response(status: StatusCode, message: impl Into<String>, extra: &[(&str, &str)]) -> ApiError {
    let mut body = Map::new();
    body.insert("error".to_string(), Value::String(message.into()));
    for (key, value) in extra {
        body.insert((*key).to_string(), Value::String((*value).to_string()));
    }
    body.insert(
        "timestamp".to_string(),
        json!(chrono::Utc::now().to_rfc3339()),
    );

    (status, Json(Value::Object(body)))
}

/// Convert ServiceError to HTTP response
pub fn service_error_to_response(err: ServiceError) -> ApiError {
    match &err {
        ServiceError::MenuNotFound { .. } | ServiceError::DishNotFound { .. } => {
            error_response(StatusCode::NOT_FOUND, err.to_string(), &[])
        }
        ServiceError::ValidationError { field, message }
        | ServiceError::UniqueConstraintViolation { field, message } => {
            error_response(StatusCode::BAD_REQUEST, message.as_str(), &[("field", field.as_str())])
        }
        ServiceError::InvalidImage { reason } => {
            error_response(StatusCode::BAD_REQUEST, reason.as_str(), &[("field", "image")])
        }
        ServiceError::ReconciliationFailed { menu_id, .. } => error_response(
            StatusCode::CONFLICT,
            err.to_string(),
            &[("menu_id", menu_id.as_str())],
        ),
        ServiceError::Repository { source } => match source {
            RepositoryError::NotFound => {
                error_response(StatusCode::NOT_FOUND, "Resource not found", &[])
            }
            RepositoryError::UniqueConstraintViolation { field, .. } => {
                error_response(StatusCode::BAD_REQUEST, source.to_string(), &[("field", field.as_str())])
            }
            RepositoryError::ConnectionFailed => error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "Database connection failed",
                &[],
            ),
            RepositoryError::Timeout => {
                error_response(StatusCode::REQUEST_TIMEOUT, "Request timeout", &[])
            }
            _ => error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", &[]),
        },
        ServiceError::Storage { .. } => {
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Storage error", &[])
        }
        ServiceError::Configuration { .. } => {
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Configuration error", &[])
        }
        ServiceError::ExternalService { .. } => {
            error_response(StatusCode::BAD_GATEWAY, "External service error", &[])
        }
    }
}
