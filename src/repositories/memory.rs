use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use super::{DishRepository, MenuRepository};
use crate::models::{
    today, Dish, DishFields, Menu, MenuFilters, RepositoryError, RepositoryResult,
};

#[derive(Debug, Default)]
struct State {
    dishes: HashMap<String, Dish>,
    dish_keys: HashMap<DishFields, String>,
    menus: HashMap<String, Menu>,
    menu_titles: HashMap<String, String>,
}

/// In-process store implementing both repositories over one shared state.
///
/// Every operation runs under a single lock acquisition, so natural-key and
/// title uniqueness checks are atomic with the write that depends on them.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn dish_violation(fields: &DishFields) -> RepositoryError {
        RepositoryError::UniqueConstraintViolation {
            entity: "dish".to_string(),
            field: "natural_key".to_string(),
            value: fields.title.clone(),
        }
    }

    fn menu_violation(title: &str) -> RepositoryError {
        RepositoryError::UniqueConstraintViolation {
            entity: "menu".to_string(),
            field: "title".to_string(),
            value: title.to_string(),
        }
    }
}

impl State {
    fn insert_dish(&mut self, dish: Dish) -> RepositoryResult<Dish> {
        let fields = dish.fields();
        if self.dish_keys.contains_key(&fields) {
            return Err(InMemoryStore::dish_violation(&fields));
        }
        if self.dishes.contains_key(&dish.id) {
            return Err(RepositoryError::ConstraintViolation {
                message: format!("Dish id already exists: {}", dish.id),
            });
        }

        self.dish_keys.insert(fields, dish.id.clone());
        self.dishes.insert(dish.id.clone(), dish.clone());
        Ok(dish)
    }
}

#[async_trait]
impl DishRepository for InMemoryStore {
    async fn find_all(&self) -> RepositoryResult<Vec<Dish>> {
        let state = self.state.read().await;
        Ok(state.dishes.values().cloned().collect())
    }

    async fn find_by_id(&self, id: &str) -> RepositoryResult<Option<Dish>> {
        let state = self.state.read().await;
        Ok(state.dishes.get(id).cloned())
    }

    async fn find_by_ids(&self, ids: &[String]) -> RepositoryResult<Vec<Dish>> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.dishes.get(id).cloned())
            .collect())
    }

    async fn find_by_fields(&self, fields: &DishFields) -> RepositoryResult<Option<Dish>> {
        let state = self.state.read().await;
        Ok(state
            .dish_keys
            .get(fields)
            .and_then(|id| state.dishes.get(id))
            .cloned())
    }

    async fn find_changed_on(&self, date: NaiveDate) -> RepositoryResult<Vec<Dish>> {
        let state = self.state.read().await;
        Ok(state
            .dishes
            .values()
            .filter(|dish| dish.changed_on(date))
            .cloned()
            .collect())
    }

    #[instrument(skip(self, dish), fields(id = %dish.id))]
    async fn create(&self, dish: Dish) -> RepositoryResult<Dish> {
        let mut state = self.state.write().await;
        state.insert_dish(dish)
    }

    #[instrument(skip(self, fields), fields(title = %fields.title))]
    async fn get_or_create(&self, fields: DishFields) -> RepositoryResult<(Dish, bool)> {
        let mut state = self.state.write().await;

        if let Some(existing) = state.dish_keys.get(&fields).and_then(|id| state.dishes.get(id)) {
            debug!(dish_id = %existing.id, "Reusing dish with matching natural key");
            return Ok((existing.clone(), false));
        }

        let dish = state.insert_dish(Dish::new(fields))?;
        debug!(dish_id = %dish.id, "Created dish");
        Ok((dish, true))
    }

    #[instrument(skip(self, dish), fields(id = %dish.id))]
    async fn update(&self, mut dish: Dish) -> RepositoryResult<Dish> {
        let mut state = self.state.write().await;

        let current = state
            .dishes
            .get(&dish.id)
            .cloned()
            .ok_or(RepositoryError::NotFound)?;

        let old_fields = current.fields();
        let new_fields = dish.fields();
        if old_fields != new_fields {
            if state.dish_keys.contains_key(&new_fields) {
                return Err(Self::dish_violation(&new_fields));
            }
            state.dish_keys.remove(&old_fields);
            state.dish_keys.insert(new_fields, dish.id.clone());
        }

        dish.created_date = current.created_date;
        dish.touch();
        state.dishes.insert(dish.id.clone(), dish.clone());
        Ok(dish)
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: &str) -> RepositoryResult<()> {
        let mut state = self.state.write().await;

        let dish = state.dishes.remove(id).ok_or(RepositoryError::NotFound)?;
        state.dish_keys.remove(&dish.fields());
        for menu in state.menus.values_mut() {
            menu.dishes.remove(id);
        }
        Ok(())
    }

    async fn count(&self) -> RepositoryResult<usize> {
        Ok(self.state.read().await.dishes.len())
    }
}

#[async_trait]
impl MenuRepository for InMemoryStore {
    async fn find_all(&self, filters: MenuFilters) -> RepositoryResult<Vec<Menu>> {
        let state = self.state.read().await;
        Ok(state
            .menus
            .values()
            .filter(|menu| menu.matches_filters(&filters))
            .cloned()
            .collect())
    }

    async fn find_by_id(&self, id: &str) -> RepositoryResult<Option<Menu>> {
        let state = self.state.read().await;
        Ok(state.menus.get(id).cloned())
    }

    async fn find_by_title(&self, title: &str) -> RepositoryResult<Option<Menu>> {
        let state = self.state.read().await;
        Ok(state
            .menu_titles
            .get(title)
            .and_then(|id| state.menus.get(id))
            .cloned())
    }

    #[instrument(skip(self, menu), fields(id = %menu.id))]
    async fn create(&self, menu: Menu) -> RepositoryResult<Menu> {
        let mut state = self.state.write().await;

        if state.menu_titles.contains_key(&menu.title) {
            return Err(Self::menu_violation(&menu.title));
        }
        if state.menus.contains_key(&menu.id) {
            return Err(RepositoryError::ConstraintViolation {
                message: format!("Menu id already exists: {}", menu.id),
            });
        }

        state.menu_titles.insert(menu.title.clone(), menu.id.clone());
        state.menus.insert(menu.id.clone(), menu.clone());
        Ok(menu)
    }

    #[instrument(skip(self, menu), fields(id = %menu.id))]
    async fn update(&self, menu: Menu) -> RepositoryResult<Menu> {
        let mut state = self.state.write().await;

        let current_title = state
            .menus
            .get(&menu.id)
            .map(|stored| stored.title.clone())
            .ok_or(RepositoryError::NotFound)?;

        if current_title != menu.title {
            if state.menu_titles.contains_key(&menu.title) {
                return Err(Self::menu_violation(&menu.title));
            }
            state.menu_titles.remove(&current_title);
            state.menu_titles.insert(menu.title.clone(), menu.id.clone());
        }

        let stored = state
            .menus
            .get_mut(&menu.id)
            .ok_or(RepositoryError::NotFound)?;
        stored.title = menu.title;
        stored.description = menu.description;
        stored.modified_date = today();
        Ok(stored.clone())
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: &str) -> RepositoryResult<()> {
        let mut state = self.state.write().await;

        let menu = state.menus.remove(id).ok_or(RepositoryError::NotFound)?;
        state.menu_titles.remove(&menu.title);
        Ok(())
    }

    #[instrument(skip(self, dish_ids), fields(count = dish_ids.len()))]
    async fn attach_dishes(&self, menu_id: &str, dish_ids: &[String]) -> RepositoryResult<Menu> {
        let mut state = self.state.write().await;

        if let Some(missing) = dish_ids.iter().find(|id| !state.dishes.contains_key(*id)) {
            return Err(RepositoryError::ConstraintViolation {
                message: format!("Unknown dish id: {}", missing),
            });
        }

        let menu = state
            .menus
            .get_mut(menu_id)
            .ok_or(RepositoryError::NotFound)?;
        menu.dishes.extend(dish_ids.iter().cloned());
        Ok(menu.clone())
    }

    #[instrument(skip(self))]
    async fn clear_dishes(&self, menu_id: &str) -> RepositoryResult<Menu> {
        let mut state = self.state.write().await;

        let menu = state
            .menus
            .get_mut(menu_id)
            .ok_or(RepositoryError::NotFound)?;
        menu.dishes.clear();
        Ok(menu.clone())
    }

    async fn count(&self) -> RepositoryResult<usize> {
        Ok(self.state.read().await.menus.len())
    }
}
