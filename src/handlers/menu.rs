use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use tracing::{error, info, instrument};

use super::api::{service_error_to_response, ApiError, ApiState};
use crate::models::{
    CreateMenuRequest, MenuListQuery, MenuListResponse, MenuResponse, ReplaceMenuRequest,
    ServiceError, UpdateMenuRequest,
};

/// List menus with optional filters and ordering
#[instrument(name = "list_menus", skip(state), fields(
    title = query.title.as_deref(),
    ordering = query.ordering.as_deref(),
))]
pub async fn list_menus(
    State(state): State<ApiState>,
    Query(query): Query<MenuListQuery>,
) -> Result<Json<MenuListResponse>, ApiError> {
    let (filters, ordering) = query
        .into_parts()
        .map_err(|e| service_error_to_response(ServiceError::from(e)))?;

    match state.menu_service.list_menus(filters, ordering).await {
        Ok(response) => Ok(Json(response)),
        Err(err) => {
            error!("Failed to list menus: {}", err);
            Err(service_error_to_response(err))
        }
    }
}

#[instrument(name = "get_menu", skip(state), fields(menu_id = %menu_id))]
pub async fn get_menu(
    State(state): State<ApiState>,
    Path(menu_id): Path<String>,
) -> Result<Json<MenuResponse>, ApiError> {
    state
        .menu_service
        .get_menu(&menu_id)
        .await
        .map(Json)
        .map_err(service_error_to_response)
}

/// Create a menu together with its embedded dishes
#[instrument(name = "create_menu", skip(state, request), fields(title = %request.title))]
pub async fn create_menu(
    State(state): State<ApiState>,
    Json(request): Json<CreateMenuRequest>,
) -> Result<(StatusCode, Json<MenuResponse>), ApiError> {
    match state.menu_service.create_menu(request).await {
        Ok(menu) => {
            crate::info_with_trace!(menu_id = %menu.id, "Menu created");
            Ok((StatusCode::CREATED, Json(menu)))
        }
        Err(err) => {
            crate::warn_with_trace!("Failed to create menu: {}", err);
            Err(service_error_to_response(err))
        }
    }
}

/// Full update (PUT): title is required, omitted dishes keep the association
#[instrument(name = "replace_menu", skip(state, request), fields(menu_id = %menu_id))]
pub async fn replace_menu(
    State(state): State<ApiState>,
    Path(menu_id): Path<String>,
    Json(request): Json<ReplaceMenuRequest>,
) -> Result<Json<MenuResponse>, ApiError> {
    update(&state, &menu_id, request.into()).await
}

/// Partial update (PATCH)
#[instrument(name = "patch_menu", skip(state, request), fields(menu_id = %menu_id))]
pub async fn patch_menu(
    State(state): State<ApiState>,
    Path(menu_id): Path<String>,
    Json(request): Json<UpdateMenuRequest>,
) -> Result<Json<MenuResponse>, ApiError> {
    update(&state, &menu_id, request).await
}

async fn update(
    state: &ApiState,
    menu_id: &str,
    request: UpdateMenuRequest,
) -> Result<Json<MenuResponse>, ApiError> {
    match state.menu_service.update_menu(menu_id, request).await {
        Ok(menu) => {
            info!(dish_count = menu.dish_count, "Menu updated");
            Ok(Json(menu))
        }
        Err(err) => {
            crate::warn_with_trace!("Failed to update menu {}: {}", menu_id, err);
            Err(service_error_to_response(err))
        }
    }
}

#[instrument(name = "delete_menu", skip(state), fields(menu_id = %menu_id))]
pub async fn delete_menu(
    State(state): State<ApiState>,
    Path(menu_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .menu_service
        .delete_menu(&menu_id)
        .await
        .map(|()| StatusCode::NO_CONTENT)
        .map_err(service_error_to_response)
}
