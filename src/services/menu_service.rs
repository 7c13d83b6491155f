use std::sync::Arc;
use tracing::{instrument, warn};

use crate::models::{
    CreateMenuRequest, DishFields, DishPayload, Menu, MenuFilters, MenuListResponse, MenuOrdering,
    MenuResponse, RepositoryError, RepositoryResult, ServiceError, ServiceResult,
    UpdateMenuRequest, Validate,
};
use crate::observability::Metrics;
use crate::repositories::{DishRepository, MenuRepository};

/// Service for menus and the reconciliation of their embedded dishes
pub struct MenuService {
    menus: Arc<dyn MenuRepository>,
    dishes: Arc<dyn DishRepository>,
    media_url: String,
    metrics: Option<Arc<Metrics>>,
}

impl MenuService {
    pub fn new(
        menus: Arc<dyn MenuRepository>,
        dishes: Arc<dyn DishRepository>,
        media_url: impl Into<String>,
    ) -> Self {
        Self {
            menus,
            dishes,
            media_url: media_url.into(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// List non-empty menus matching the filters in the requested order
    #[instrument(skip(self), fields(filters = ?filters, ordering = %ordering))]
    pub async fn list_menus(
        &self,
        filters: MenuFilters,
        ordering: MenuOrdering,
    ) -> ServiceResult<MenuListResponse> {
        crate::info_with_trace!("Listing menus");

        let mut menus: Vec<Menu> = self
            .menus
            .find_all(filters.clone())
            .await?
            .into_iter()
            .filter(|menu| menu.dish_count() > 0 && menu.matches_filters(&filters))
            .collect();

        ordering.sort(&mut menus);

        let summaries: Vec<_> = menus.iter().map(Menu::to_summary).collect();
        let total_count = summaries.len();

        crate::info_with_trace!("Found {} menus matching criteria", total_count);

        Ok(MenuListResponse {
            menus: summaries,
            total_count,
        })
    }

    /// Get a menu with its dishes expanded
    #[instrument(skip(self), fields(menu_id = %id))]
    pub async fn get_menu(&self, id: &str) -> ServiceResult<MenuResponse> {
        crate::info_with_trace!("Retrieving menu details");

        let menu = self.load_menu(id).await?;
        self.menu_response(menu).await
    }

    /// Create a menu and reconcile its embedded dishes
    #[instrument(skip(self, request), fields(title = %request.title, dishes = request.dishes.len()))]
    pub async fn create_menu(&self, request: CreateMenuRequest) -> ServiceResult<MenuResponse> {
        crate::info_with_trace!("Creating new menu");

        let result = self.create_menu_inner(request).await;
        self.record("create", result.is_ok());
        result
    }

    async fn create_menu_inner(&self, request: CreateMenuRequest) -> ServiceResult<MenuResponse> {
        request.validate()?;
        self.ensure_title_available(&request.title, None).await?;

        let menu = self
            .menus
            .create(Menu::new(request.title, request.description))
            .await
            .map_err(ServiceError::from_repository)?;

        if request.dishes.is_empty() {
            crate::info_with_trace!(menu_id = %menu.id, "Menu created without dishes");
            return self.menu_response(menu).await;
        }

        match self.reconcile_dishes(&request.dishes, &menu.id).await {
            Ok(menu) => {
                crate::info_with_trace!(
                    menu_id = %menu.id,
                    dish_count = menu.dish_count(),
                    "Menu created successfully"
                );
                self.menu_response(menu).await
            }
            Err(e) => {
                crate::error_with_trace!(
                    menu_id = %menu.id,
                    error = %e,
                    "Dish reconciliation failed, removing new menu"
                );
                if let Err(rollback) = self.menus.delete(&menu.id).await {
                    warn!(menu_id = %menu.id, error = %rollback, "Failed to remove menu after reconciliation error");
                }
                Err(ServiceError::from_repository(e))
            }
        }
    }

    /// Update a menu. `dishes: Some(..)` replaces the association, `None` keeps it.
    #[instrument(skip(self, request), fields(menu_id = %id))]
    pub async fn update_menu(
        &self,
        id: &str,
        request: UpdateMenuRequest,
    ) -> ServiceResult<MenuResponse> {
        crate::info_with_trace!("Updating menu");

        let result = self.update_menu_inner(id, request).await;
        self.record("update", result.is_ok());
        result
    }

    async fn update_menu_inner(
        &self,
        id: &str,
        request: UpdateMenuRequest,
    ) -> ServiceResult<MenuResponse> {
        request.validate()?;

        let mut menu = self.load_menu(id).await?;

        if let Some(title) = &request.title {
            if *title != menu.title {
                self.ensure_title_available(title, Some(id)).await?;
            }
        }

        if let Some(payloads) = &request.dishes {
            self.menus
                .clear_dishes(id)
                .await
                .map_err(|e| menu_error(id, e))?;

            if let Err(e) = self.reconcile_dishes(payloads, id).await {
                crate::error_with_trace!(
                    menu_id = %id,
                    error = %e,
                    "Dish reconciliation failed after clearing menu dishes"
                );
                return Err(ServiceError::ReconciliationFailed {
                    menu_id: id.to_string(),
                    source: e,
                });
            }
        }

        menu.update(&request);
        let stored = self
            .menus
            .update(menu)
            .await
            .map_err(|e| menu_error(id, e))?;

        crate::info_with_trace!(dish_count = stored.dish_count(), "Menu updated successfully");

        self.menu_response(stored).await
    }

    /// Delete a menu; its dishes are kept
    #[instrument(skip(self), fields(menu_id = %id))]
    pub async fn delete_menu(&self, id: &str) -> ServiceResult<()> {
        crate::info_with_trace!("Deleting menu");

        let result = self.menus.delete(id).await.map_err(|e| menu_error(id, e));
        self.record("delete", result.is_ok());

        if result.is_ok() {
            crate::info_with_trace!("Menu deleted successfully");
        }
        result
    }

    /// Resolve each payload to an existing or new dish by natural key and add
    /// the resolved dishes to the menu. Never removes existing associations.
    #[instrument(skip(self, payloads), fields(menu_id = %menu_id, payloads = payloads.len()))]
    pub async fn reconcile_dishes(
        &self,
        payloads: &[DishPayload],
        menu_id: &str,
    ) -> RepositoryResult<Menu> {
        let mut dish_ids = Vec::with_capacity(payloads.len());

        for payload in payloads {
            let (dish, created) = self
                .dishes
                .get_or_create(DishFields::from(payload.clone()))
                .await?;

            if let Some(metrics) = &self.metrics {
                metrics.record_reconciliation(created);
            }

            crate::info_with_trace!(dish_id = %dish.id, created, "Resolved embedded dish");
            dish_ids.push(dish.id);
        }

        if dish_ids.is_empty() {
            return self
                .menus
                .find_by_id(menu_id)
                .await?
                .ok_or(RepositoryError::NotFound);
        }

        self.menus.attach_dishes(menu_id, &dish_ids).await
    }

    async fn load_menu(&self, id: &str) -> ServiceResult<Menu> {
        if id.is_empty() {
            return Err(ServiceError::ValidationError {
                field: "id".to_string(),
                message: "Menu ID cannot be empty".to_string(),
            });
        }

        self.menus
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::MenuNotFound { id: id.to_string() })
    }

    /// Reject a title held by a menu other than `current_id`
    async fn ensure_title_available(&self, title: &str, current_id: Option<&str>) -> ServiceResult<()> {
        match self.menus.find_by_title(title).await? {
            Some(existing) if Some(existing.id.as_str()) != current_id => {
                warn!(title = %title, existing_id = %existing.id, "Menu title already taken");
                Err(ServiceError::UniqueConstraintViolation {
                    field: "title".to_string(),
                    message: format!("menu with this title already exists: {}", title),
                })
            }
            _ => Ok(()),
        }
    }

    async fn menu_response(&self, menu: Menu) -> ServiceResult<MenuResponse> {
        let ids: Vec<String> = menu.dishes.iter().cloned().collect();
        let mut dishes = self.dishes.find_by_ids(&ids).await?;
        dishes.sort_by(|a, b| a.title.cmp(&b.title).then_with(|| a.id.cmp(&b.id)));

        let dishes = dishes
            .iter()
            .map(|dish| dish.to_response(&self.media_url))
            .collect();

        Ok(menu.to_response(dishes))
    }

    fn record(&self, operation: &str, success: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.record_menu_operation(operation, success);
        }
    }
}

fn menu_error(id: &str, err: RepositoryError) -> ServiceError {
    match err {
        RepositoryError::NotFound => ServiceError::MenuNotFound { id: id.to_string() },
        other => ServiceError::from_repository(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Dish;
    use crate::repositories::InMemoryStore;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use mockall::mock;
    use rust_decimal_macros::dec;

    mock! {
        TestDishRepository {}

        #[async_trait]
        impl DishRepository for TestDishRepository {
            async fn find_all(&self) -> Result<Vec<Dish>, RepositoryError>;
            async fn find_by_id(&self, id: &str) -> Result<Option<Dish>, RepositoryError>;
            async fn find_by_ids(&self, ids: &[String]) -> Result<Vec<Dish>, RepositoryError>;
            async fn find_by_fields(&self, fields: &DishFields) -> Result<Option<Dish>, RepositoryError>;
            async fn find_changed_on(&self, date: NaiveDate) -> Result<Vec<Dish>, RepositoryError>;
            async fn create(&self, dish: Dish) -> Result<Dish, RepositoryError>;
            async fn get_or_create(&self, fields: DishFields) -> Result<(Dish, bool), RepositoryError>;
            async fn update(&self, dish: Dish) -> Result<Dish, RepositoryError>;
            async fn delete(&self, id: &str) -> Result<(), RepositoryError>;
            async fn count(&self) -> Result<usize, RepositoryError>;
        }
    }

    fn payload(title: &str, price: rust_decimal::Decimal) -> DishPayload {
        DishPayload {
            title: title.to_string(),
            description: String::new(),
            price,
            time_minutes: 15,
            vegetarian: true,
        }
    }

    fn service(store: &InMemoryStore) -> MenuService {
        MenuService::new(Arc::new(store.clone()), Arc::new(store.clone()), "/media")
    }

    fn create_request(title: &str, dishes: Vec<DishPayload>) -> CreateMenuRequest {
        CreateMenuRequest {
            title: title.to_string(),
            description: String::new(),
            dishes,
        }
    }

    fn failing_dishes() -> MockTestDishRepository {
        let mut mock_repo = MockTestDishRepository::new();
        mock_repo
            .expect_get_or_create()
            .returning(|_| Err(RepositoryError::ConnectionFailed));
        mock_repo.expect_find_by_ids().returning(|_| Ok(vec![]));
        mock_repo
    }

    #[tokio::test]
    async fn test_create_menu_creates_new_dishes() {
        let store = InMemoryStore::new();
        let service = service(&store);

        let response = service
            .create_menu(create_request(
                "Menu card 1",
                vec![payload("Pancakes", dec!(5.00)), payload("Omelette", dec!(4.50))],
            ))
            .await
            .unwrap();

        assert_eq!(response.dish_count, 2);
        assert_eq!(response.dishes.len(), 2);
        // Dishes come back ordered by title
        assert_eq!(response.dishes[0].title, "Omelette");
        assert_eq!(DishRepository::count(&store).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_create_menu_reuses_existing_dish() {
        let store = InMemoryStore::new();
        let service = service(&store);

        let meatballs = payload("Meatballs", dec!(6.50));
        let (existing, _) = DishRepository::get_or_create(&store, meatballs.clone().into())
            .await
            .unwrap();

        let response = service
            .create_menu(create_request("Dinner", vec![meatballs]))
            .await
            .unwrap();

        assert_eq!(response.dishes.len(), 1);
        assert_eq!(response.dishes[0].id, existing.id);
        assert_eq!(DishRepository::count(&store).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_same_title_different_price_creates_distinct_dish() {
        let store = InMemoryStore::new();
        let service = service(&store);

        let response = service
            .create_menu(create_request(
                "Dinner",
                vec![payload("Meatballs", dec!(6.50)), payload("Meatballs", dec!(7.00))],
            ))
            .await
            .unwrap();

        assert_eq!(response.dish_count, 2);
    }

    #[tokio::test]
    async fn test_reconcile_same_tuple_twice_attaches_once() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let menu = MenuRepository::create(&store, Menu::new("Dinner", ""))
            .await
            .unwrap();

        let meatballs = payload("Meatballs", dec!(6.50));
        service
            .reconcile_dishes(&[meatballs.clone()], &menu.id)
            .await
            .unwrap();
        let menu = service
            .reconcile_dishes(&[meatballs.clone(), meatballs], &menu.id)
            .await
            .unwrap();

        assert_eq!(menu.dish_count(), 1);
        assert_eq!(DishRepository::count(&store).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_create_menu_rejects_taken_title() {
        let store = InMemoryStore::new();
        let service = service(&store);

        service
            .create_menu(create_request("Sweet menu", vec![]))
            .await
            .unwrap();
        let result = service
            .create_menu(create_request("Sweet menu", vec![payload("Cake", dec!(3))]))
            .await;

        match result {
            Err(ServiceError::UniqueConstraintViolation { field, .. }) => assert_eq!(field, "title"),
            other => panic!("Expected UniqueConstraintViolation, got {:?}", other),
        }
        // Nothing was written for the rejected request
        assert_eq!(DishRepository::count(&store).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_create_menu_validates_before_writing() {
        let store = InMemoryStore::new();
        let service = service(&store);

        let mut bad = payload("Soup", dec!(4.00));
        bad.time_minutes = -1;
        let result = service
            .create_menu(create_request("Dinner", vec![payload("Bread", dec!(1)), bad]))
            .await;

        match result {
            Err(ServiceError::ValidationError { field, .. }) => {
                assert_eq!(field, "dishes[1].time_minutes")
            }
            other => panic!("Expected ValidationError, got {:?}", other),
        }
        assert_eq!(DishRepository::count(&store).await.unwrap(), 0);
        assert_eq!(MenuRepository::count(&store).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_create_menu_rolls_back_on_reconciliation_failure() {
        let store = InMemoryStore::new();
        let service = MenuService::new(Arc::new(store.clone()), Arc::new(failing_dishes()), "");

        let result = service
            .create_menu(create_request("Dinner", vec![payload("Soup", dec!(4))]))
            .await;

        assert!(matches!(result, Err(ServiceError::Repository { .. })));
        assert!(MenuRepository::find_by_title(&store, "Dinner")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_update_menu_with_empty_dishes_clears_association() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let created = service
            .create_menu(create_request("Dinner", vec![payload("Soup", dec!(4))]))
            .await
            .unwrap();

        let response = service
            .update_menu(
                &created.id,
                UpdateMenuRequest {
                    dishes: Some(vec![]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(response.dish_count, 0);
        assert!(response.dishes.is_empty());
        assert_eq!(DishRepository::count(&store).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_menu_replaces_dishes() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let created = service
            .create_menu(create_request("Dinner", vec![payload("Soup", dec!(4))]))
            .await
            .unwrap();

        let response = service
            .update_menu(
                &created.id,
                UpdateMenuRequest {
                    dishes: Some(vec![payload("Steak", dec!(20))]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(response.dish_count, 1);
        assert_eq!(response.dishes[0].title, "Steak");
        assert_eq!(response.title, "Dinner");
    }

    #[tokio::test]
    async fn test_update_menu_title_keeps_dishes() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let created = service
            .create_menu(create_request("Dinner", vec![payload("Soup", dec!(4))]))
            .await
            .unwrap();

        let response = service
            .update_menu(
                &created.id,
                UpdateMenuRequest {
                    title: Some("Supper".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(response.title, "Supper");
        assert_eq!(response.dish_count, 1);
    }

    #[tokio::test]
    async fn test_update_menu_rejects_title_of_other_menu() {
        let store = InMemoryStore::new();
        let service = service(&store);
        service
            .create_menu(create_request("Lunch", vec![]))
            .await
            .unwrap();
        let dinner = service
            .create_menu(create_request("Dinner", vec![payload("Soup", dec!(4))]))
            .await
            .unwrap();

        let result = service
            .update_menu(
                &dinner.id,
                UpdateMenuRequest {
                    title: Some("Lunch".to_string()),
                    dishes: Some(vec![]),
                    ..Default::default()
                },
            )
            .await;

        assert!(matches!(
            result,
            Err(ServiceError::UniqueConstraintViolation { .. })
        ));
        // Rejected before the association was touched
        let menu = service.get_menu(&dinner.id).await.unwrap();
        assert_eq!(menu.dish_count, 1);
    }

    #[tokio::test]
    async fn test_update_menu_not_found() {
        let store = InMemoryStore::new();
        let service = service(&store);

        let result = service
            .update_menu("Mmissing0", UpdateMenuRequest::default())
            .await;
        assert!(matches!(result, Err(ServiceError::MenuNotFound { .. })));
    }

    #[tokio::test]
    async fn test_update_menu_partial_failure_leaves_menu_empty() {
        let store = InMemoryStore::new();
        let (dish, _) = DishRepository::get_or_create(&store, payload("Soup", dec!(4)).into())
            .await
            .unwrap();
        let menu = MenuRepository::create(&store, Menu::new("Dinner", ""))
            .await
            .unwrap();
        store.attach_dishes(&menu.id, &[dish.id.clone()]).await.unwrap();

        let service = MenuService::new(Arc::new(store.clone()), Arc::new(failing_dishes()), "");
        let result = service
            .update_menu(
                &menu.id,
                UpdateMenuRequest {
                    dishes: Some(vec![payload("Steak", dec!(20))]),
                    ..Default::default()
                },
            )
            .await;

        match result {
            Err(ServiceError::ReconciliationFailed { menu_id, .. }) => assert_eq!(menu_id, menu.id),
            other => panic!("Expected ReconciliationFailed, got {:?}", other),
        }

        let stored = MenuRepository::find_by_id(&store, &menu.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.dish_count(), 0);
        assert!(DishRepository::find_by_id(&store, &dish.id)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_list_menus_excludes_empty_and_orders() {
        let store = InMemoryStore::new();
        let service = service(&store);

        service
            .create_menu(create_request("Empty menu", vec![]))
            .await
            .unwrap();
        service
            .create_menu(create_request("Breakfast", vec![payload("Toast", dec!(2))]))
            .await
            .unwrap();
        service
            .create_menu(create_request(
                "Dinner",
                vec![payload("Soup", dec!(4)), payload("Steak", dec!(20))],
            ))
            .await
            .unwrap();
        service
            .create_menu(create_request("Brunch", vec![payload("Eggs", dec!(3))]))
            .await
            .unwrap();

        let default_order = service
            .list_menus(MenuFilters::default(), MenuOrdering::default())
            .await
            .unwrap();
        let titles: Vec<_> = default_order.menus.iter().map(|m| m.title.as_str()).collect();
        assert_eq!(titles, vec!["Breakfast", "Brunch", "Dinner"]);
        assert_eq!(default_order.total_count, 3);

        let by_count = service
            .list_menus(MenuFilters::default(), MenuOrdering::DishCountDesc)
            .await
            .unwrap();
        let titles: Vec<_> = by_count.menus.iter().map(|m| m.title.as_str()).collect();
        assert_eq!(titles, vec!["Dinner", "Breakfast", "Brunch"]);
        assert_eq!(by_count.menus[0].dish_count, 2);
    }

    #[tokio::test]
    async fn test_list_menus_filters_title_case_insensitively() {
        let store = InMemoryStore::new();
        let service = service(&store);

        service
            .create_menu(create_request("Monday menu", vec![payload("Soup", dec!(4))]))
            .await
            .unwrap();
        service
            .create_menu(create_request("Tuesday menu", vec![payload("Soup", dec!(4))]))
            .await
            .unwrap();

        let filters = MenuFilters {
            title: Some("monday".to_string()),
            ..Default::default()
        };
        let response = service
            .list_menus(filters, MenuOrdering::default())
            .await
            .unwrap();

        assert_eq!(response.total_count, 1);
        assert_eq!(response.menus[0].title, "Monday menu");
    }

    #[tokio::test]
    async fn test_empty_menu_still_retrievable_by_id() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let created = service
            .create_menu(create_request("Empty menu", vec![]))
            .await
            .unwrap();

        let menu = service.get_menu(&created.id).await.unwrap();
        assert_eq!(menu.dish_count, 0);
    }

    #[tokio::test]
    async fn test_delete_menu_keeps_dishes() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let created = service
            .create_menu(create_request("Dinner", vec![payload("Soup", dec!(4))]))
            .await
            .unwrap();

        service.delete_menu(&created.id).await.unwrap();

        assert!(matches!(
            service.get_menu(&created.id).await,
            Err(ServiceError::MenuNotFound { .. })
        ));
        assert!(matches!(
            service.delete_menu(&created.id).await,
            Err(ServiceError::MenuNotFound { .. })
        ));
        assert_eq!(DishRepository::count(&store).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reconciliation_metrics_recorded() {
        let store = InMemoryStore::new();
        let metrics = Arc::new(Metrics::new().unwrap());
        let service = service(&store).with_metrics(metrics.clone());

        service
            .create_menu(create_request(
                "Dinner",
                vec![payload("Soup", dec!(4)), payload("Soup", dec!(4))],
            ))
            .await
            .unwrap();

        let encoded = metrics.encode().unwrap();
        assert!(encoded.contains("outcome=\"created\""));
        assert!(encoded.contains("outcome=\"reused\""));
        assert!(encoded.contains("menu_operations_total"));
    }

    #[tokio::test]
    async fn test_menu_detail_counts_only_resolved_dishes() {
        let store = InMemoryStore::new();
        let (dish, _) = DishRepository::get_or_create(&store, payload("Soup", dec!(4)).into())
            .await
            .unwrap();
        let menu = MenuRepository::create(&store, Menu::new("Dinner", ""))
            .await
            .unwrap();
        store.attach_dishes(&menu.id, &[dish.id.clone()]).await.unwrap();

        // The dish is gone from the dish table but still listed by the menu
        let mut dishes = MockTestDishRepository::new();
        dishes.expect_find_by_ids().returning(|_| Ok(vec![]));
        let service = MenuService::new(Arc::new(store.clone()), Arc::new(dishes), "/media");

        let response = service.get_menu(&menu.id).await.unwrap();
        assert_eq!(response.dish_count, 0);
        assert!(response.dishes.is_empty());
    }
}
