use std::sync::Arc;
use tracing::{instrument, warn};

use crate::models::{
    CreateDishRequest, Dish, DishListResponse, DishResponse, RepositoryError, ServiceError,
    ServiceResult, UpdateDishRequest, Validate,
};
use crate::observability::Metrics;
use crate::repositories::DishRepository;
use crate::services::ImageStorage;

/// Service for standalone dish management and image attachment
pub struct DishService {
    repository: Arc<dyn DishRepository>,
    images: Arc<dyn ImageStorage>,
    media_url: String,
    metrics: Option<Arc<Metrics>>,
}

impl DishService {
    pub fn new(
        repository: Arc<dyn DishRepository>,
        images: Arc<dyn ImageStorage>,
        media_url: impl Into<String>,
    ) -> Self {
        Self {
            repository,
            images,
            media_url: media_url.into(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// List all dishes ordered by title, ties by id
    #[instrument(skip(self))]
    pub async fn list_dishes(&self) -> ServiceResult<DishListResponse> {
        crate::info_with_trace!("Listing dishes");

        let mut dishes = self.repository.find_all().await?;
        dishes.sort_by(|a, b| a.title.cmp(&b.title).then_with(|| a.id.cmp(&b.id)));

        let dishes: Vec<DishResponse> = dishes
            .iter()
            .map(|dish| dish.to_response(&self.media_url))
            .collect();
        let total_count = dishes.len();

        Ok(DishListResponse {
            dishes,
            total_count,
        })
    }

    #[instrument(skip(self), fields(dish_id = %id))]
    pub async fn get_dish(&self, id: &str) -> ServiceResult<DishResponse> {
        let dish = self.load_dish(id).await?;
        Ok(dish.to_response(&self.media_url))
    }

    #[instrument(skip(self, request), fields(title = %request.title))]
    pub async fn create_dish(&self, request: CreateDishRequest) -> ServiceResult<DishResponse> {
        crate::info_with_trace!("Creating new dish");

        let result = self.create_dish_inner(request).await;
        self.record("create", result.is_ok());

        let dish = result?;
        crate::info_with_trace!(dish_id = %dish.id, "Dish created successfully");
        Ok(dish.to_response(&self.media_url))
    }

    /// Apply a full or partial update; absent fields are kept
    #[instrument(skip(self, request), fields(dish_id = %id))]
    pub async fn update_dish(
        &self,
        id: &str,
        request: UpdateDishRequest,
    ) -> ServiceResult<DishResponse> {
        crate::info_with_trace!("Updating dish");

        let result = self.update_dish_inner(id, request).await;
        self.record("update", result.is_ok());

        Ok(result?.to_response(&self.media_url))
    }

    /// Delete a dish, detaching it from every menu and dropping its image
    #[instrument(skip(self), fields(dish_id = %id))]
    pub async fn delete_dish(&self, id: &str) -> ServiceResult<()> {
        crate::info_with_trace!("Deleting dish");

        let result = self.delete_dish_inner(id).await;
        self.record("delete", result.is_ok());

        if let Some(image) = result?.image {
            self.discard_image(&image).await;
        }

        crate::info_with_trace!("Dish deleted successfully");
        Ok(())
    }

    /// Store an uploaded image and attach it to the dish, replacing any previous one
    #[instrument(skip(self, bytes), fields(dish_id = %id, size = bytes.len()))]
    pub async fn attach_image(&self, id: &str, bytes: Vec<u8>) -> ServiceResult<DishResponse> {
        crate::info_with_trace!("Attaching image to dish");

        let result = self.attach_image_inner(id, bytes).await;
        self.record("upload_image", result.is_ok());
        result
    }

    async fn create_dish_inner(&self, request: CreateDishRequest) -> ServiceResult<Dish> {
        request.validate()?;
        self.repository
            .create(Dish::new(request.into()))
            .await
            .map_err(ServiceError::from_repository)
    }

    async fn update_dish_inner(&self, id: &str, request: UpdateDishRequest) -> ServiceResult<Dish> {
        request.validate()?;

        let mut dish = self.load_dish(id).await?;
        dish.update(request);
        self.repository
            .update(dish)
            .await
            .map_err(|e| dish_error(id, e))
    }

    async fn delete_dish_inner(&self, id: &str) -> ServiceResult<Dish> {
        let dish = self.load_dish(id).await?;
        self.repository
            .delete(id)
            .await
            .map_err(|e| dish_error(id, e))?;
        Ok(dish)
    }

    async fn attach_image_inner(&self, id: &str, bytes: Vec<u8>) -> ServiceResult<DishResponse> {
        let mut dish = self.load_dish(id).await?;
        let path = self.images.store(bytes).await?;
        let previous = dish.image.take();

        dish.set_image(path.clone());
        let stored = match self.repository.update(dish).await {
            Ok(stored) => stored,
            Err(e) => {
                self.discard_image(&path).await;
                return Err(dish_error(id, e));
            }
        };

        if let Some(previous) = previous {
            self.discard_image(&previous).await;
        }

        crate::info_with_trace!(image = %path, "Image attached successfully");
        Ok(stored.to_response(&self.media_url))
    }

    async fn load_dish(&self, id: &str) -> ServiceResult<Dish> {
        if id.is_empty() {
            return Err(ServiceError::ValidationError {
                field: "id".to_string(),
                message: "Dish ID cannot be empty".to_string(),
            });
        }

        self.repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::DishNotFound { id: id.to_string() })
    }

    async fn discard_image(&self, path: &str) {
        if let Err(e) = self.images.remove(path).await {
            warn!(path = %path, error = %e, "Failed to remove dish image");
        }
    }

    fn record(&self, operation: &str, success: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.record_dish_operation(operation, success);
        }
    }
}

fn dish_error(id: &str, err: RepositoryError) -> ServiceError {
    match err {
        RepositoryError::NotFound => ServiceError::DishNotFound { id: id.to_string() },
        other => ServiceError::from_repository(other),
    }
}
