use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::Arc;

use super::{DishRepository, MenuRepository};
use crate::models::{Dish, DishFields, Menu, MenuFilters, RepositoryResult};
use crate::observability::DatabaseTracingMiddleware;

/// Dish repository decorator recording every call as a database operation
pub struct MeteredDishRepository {
    inner: Arc<dyn DishRepository>,
    tracer: DatabaseTracingMiddleware,
    table: String,
}

impl MeteredDishRepository {
    pub fn new(
        inner: Arc<dyn DishRepository>,
        tracer: DatabaseTracingMiddleware,
        table: impl Into<String>,
    ) -> Self {
        Self {
            inner,
            tracer,
            table: table.into(),
        }
    }
}

#[async_trait]
impl DishRepository for MeteredDishRepository {
    async fn find_all(&self) -> RepositoryResult<Vec<Dish>> {
        self.tracer
            .trace_operation("find_all", &self.table, self.inner.find_all())
            .await
    }

    async fn find_by_id(&self, id: &str) -> RepositoryResult<Option<Dish>> {
        self.tracer
            .trace_operation("find_by_id", &self.table, self.inner.find_by_id(id))
            .await
    }

    async fn find_by_ids(&self, ids: &[String]) -> RepositoryResult<Vec<Dish>> {
        self.tracer
            .trace_operation("find_by_ids", &self.table, self.inner.find_by_ids(ids))
            .await
    }

    async fn find_by_fields(&self, fields: &DishFields) -> RepositoryResult<Option<Dish>> {
        self.tracer
            .trace_operation(
                "find_by_fields",
                &self.table,
                self.inner.find_by_fields(fields),
            )
            .await
    }

    async fn find_changed_on(&self, date: NaiveDate) -> RepositoryResult<Vec<Dish>> {
        self.tracer
            .trace_operation(
                "find_changed_on",
                &self.table,
                self.inner.find_changed_on(date),
            )
            .await
    }

    async fn create(&self, dish: Dish) -> RepositoryResult<Dish> {
        self.tracer
            .trace_operation("create", &self.table, self.inner.create(dish))
            .await
    }

    async fn get_or_create(&self, fields: DishFields) -> RepositoryResult<(Dish, bool)> {
        self.tracer
            .trace_operation("get_or_create", &self.table, self.inner.get_or_create(fields))
            .await
    }

    async fn update(&self, dish: Dish) -> RepositoryResult<Dish> {
        self.tracer
            .trace_operation("update", &self.table, self.inner.update(dish))
            .await
    }

    async fn delete(&self, id: &str) -> RepositoryResult<()> {
        self.tracer
            .trace_operation("delete", &self.table, self.inner.delete(id))
            .await
    }

    async fn count(&self) -> RepositoryResult<usize> {
        self.tracer
            .trace_operation("count", &self.table, self.inner.count())
            .await
    }
}

/// Menu repository decorator recording every call as a database operation
pub struct MeteredMenuRepository {
    inner: Arc<dyn MenuRepository>,
    tracer: DatabaseTracingMiddleware,
    table: String,
}

impl MeteredMenuRepository {
    pub fn new(
        inner: Arc<dyn MenuRepository>,
        tracer: DatabaseTracingMiddleware,
        table: impl Into<String>,
    ) -> Self {
        Self {
            inner,
            tracer,
            table: table.into(),
        }
    }
}

#[async_trait]
impl MenuRepository for MeteredMenuRepository {
    async fn find_all(&self, filters: MenuFilters) -> RepositoryResult<Vec<Menu>> {
        self.tracer
            .trace_operation("find_all", &self.table, self.inner.find_all(filters))
            .await
    }

    async fn find_by_id(&self, id: &str) -> RepositoryResult<Option<Menu>> {
        self.tracer
            .trace_operation("find_by_id", &self.table, self.inner.find_by_id(id))
            .await
    }

    async fn find_by_title(&self, title: &str) -> RepositoryResult<Option<Menu>> {
        self.tracer
            .trace_operation("find_by_title", &self.table, self.inner.find_by_title(title))
            .await
    }

    async fn create(&self, menu: Menu) -> RepositoryResult<Menu> {
        self.tracer
            .trace_operation("create", &self.table, self.inner.create(menu))
            .await
    }

    async fn update(&self, menu: Menu) -> RepositoryResult<Menu> {
        self.tracer
            .trace_operation("update", &self.table, self.inner.update(menu))
            .await
    }

    async fn delete(&self, id: &str) -> RepositoryResult<()> {
        self.tracer
            .trace_operation("delete", &self.table, self.inner.delete(id))
            .await
    }

    async fn attach_dishes(&self, menu_id: &str, dish_ids: &[String]) -> RepositoryResult<Menu> {
        self.tracer
            .trace_operation(
                "attach_dishes",
                &self.table,
                self.inner.attach_dishes(menu_id, dish_ids),
            )
            .await
    }

    async fn clear_dishes(&self, menu_id: &str) -> RepositoryResult<Menu> {
        self.tracer
            .trace_operation("clear_dishes", &self.table, self.inner.clear_dishes(menu_id))
            .await
    }

    async fn count(&self) -> RepositoryResult<usize> {
        self.tracer
            .trace_operation("count", &self.table, self.inner.count())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::Metrics;
    use crate::repositories::InMemoryStore;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_metered_repositories_record_operations() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let tracer = DatabaseTracingMiddleware::new(metrics.clone());
        let store = InMemoryStore::new();

        let dishes = MeteredDishRepository::new(Arc::new(store.clone()), tracer.clone(), "dishes");
        let menus = MeteredMenuRepository::new(Arc::new(store), tracer, "menus");

        let (dish, created) = dishes
            .get_or_create(DishFields::new("Soup", "", dec!(4), 10, true))
            .await
            .unwrap();
        assert!(created);

        let menu = menus.create(Menu::new("Dinner", "")).await.unwrap();
        let menu = menus.attach_dishes(&menu.id, &[dish.id]).await.unwrap();
        assert_eq!(menu.dish_count(), 1);

        assert!(menus.delete("Mmissing0").await.is_err());

        let encoded = metrics.encode().unwrap();
        assert!(encoded.contains("operation=\"get_or_create\""));
        assert!(encoded.contains("table=\"menus\""));
        assert!(encoded.contains("status=\"error\""));
    }
}
