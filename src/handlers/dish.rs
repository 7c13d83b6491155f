use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::Json,
};
use tracing::{error, instrument, warn};

use super::api::{error_response, service_error_to_response, ApiError, ApiState};
use crate::models::{
    CreateDishRequest, DishListResponse, DishPayload, DishResponse, UpdateDishRequest,
};

/// Multipart field carrying the uploaded image
const IMAGE_FIELD: &str = "image";

#[instrument(name = "list_dishes", skip(state))]
pub async fn list_dishes(
    State(state): State<ApiState>,
) -> Result<Json<DishListResponse>, ApiError> {
    match state.dish_service.list_dishes().await {
        Ok(response) => Ok(Json(response)),
        Err(err) => {
            error!("Failed to list dishes: {}", err);
            Err(service_error_to_response(err))
        }
    }
}

#[instrument(name = "get_dish", skip(state), fields(dish_id = %dish_id))]
pub async fn get_dish(
    State(state): State<ApiState>,
    Path(dish_id): Path<String>,
) -> Result<Json<DishResponse>, ApiError> {
    state
        .dish_service
        .get_dish(&dish_id)
        .await
        .map(Json)
        .map_err(service_error_to_response)
}

#[instrument(name = "create_dish", skip(state, request), fields(title = %request.title))]
pub async fn create_dish(
    State(state): State<ApiState>,
    Json(request): Json<CreateDishRequest>,
) -> Result<(StatusCode, Json<DishResponse>), ApiError> {
    match state.dish_service.create_dish(request).await {
        Ok(dish) => Ok((StatusCode::CREATED, Json(dish))),
        Err(err) => {
            crate::warn_with_trace!("Failed to create dish: {}", err);
            Err(service_error_to_response(err))
        }
    }
}

/// Full update (PUT): every dish field is required
#[instrument(name = "replace_dish", skip(state, request), fields(dish_id = %dish_id))]
pub async fn replace_dish(
    State(state): State<ApiState>,
    Path(dish_id): Path<String>,
    Json(request): Json<DishPayload>,
) -> Result<Json<DishResponse>, ApiError> {
    update(&state, &dish_id, request.into()).await
}

/// Partial update (PATCH)
#[instrument(name = "patch_dish", skip(state, request), fields(dish_id = %dish_id))]
pub async fn patch_dish(
    State(state): State<ApiState>,
    Path(dish_id): Path<String>,
    Json(request): Json<UpdateDishRequest>,
) -> Result<Json<DishResponse>, ApiError> {
    update(&state, &dish_id, request).await
}

async fn update(
    state: &ApiState,
    dish_id: &str,
    request: UpdateDishRequest,
) -> Result<Json<DishResponse>, ApiError> {
    match state.dish_service.update_dish(dish_id, request).await {
        Ok(dish) => Ok(Json(dish)),
        Err(err) => {
            crate::warn_with_trace!("Failed to update dish {}: {}", dish_id, err);
            Err(service_error_to_response(err))
        }
    }
}

#[instrument(name = "delete_dish", skip(state), fields(dish_id = %dish_id))]
pub async fn delete_dish(
    State(state): State<ApiState>,
    Path(dish_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .dish_service
        .delete_dish(&dish_id)
        .await
        .map(|()| StatusCode::NO_CONTENT)
        .map_err(service_error_to_response)
}

/// Attach an image sent as the multipart field `image`
#[instrument(name = "upload_image", skip(state, multipart), fields(dish_id = %dish_id))]
pub async fn upload_image(
    State(state): State<ApiState>,
    Path(dish_id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<DishResponse>, ApiError> {
    let mut image = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        warn!("Malformed multipart upload: {}", e);
        error_response(e.status(), e.body_text(), &[("field", IMAGE_FIELD)])
    })? {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }

        let bytes = field.bytes().await.map_err(|e| {
            warn!("Failed to read uploaded image: {}", e);
            error_response(e.status(), e.body_text(), &[("field", IMAGE_FIELD)])
        })?;
        image = Some(bytes.to_vec());
        break;
    }

    let Some(bytes) = image else {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "No image was submitted",
            &[("field", IMAGE_FIELD)],
        ));
    };

    match state.dish_service.attach_image(&dish_id, bytes).await {
        Ok(dish) => Ok(Json(dish)),
        Err(err) => {
            crate::warn_with_trace!("Failed to attach image to dish {}: {}", dish_id, err);
            Err(service_error_to_response(err))
        }
    }
}
