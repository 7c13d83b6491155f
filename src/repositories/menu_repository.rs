use async_trait::async_trait;
use aws_sdk_dynamodb::operation::update_item::UpdateItemError;
use aws_sdk_dynamodb::types::{
    AttributeValue, ConditionCheck, Delete, Put, ReturnValue, Select, TransactWriteItem, Update,
};
use aws_sdk_dynamodb::Client as DynamoDbClient;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{info, instrument, warn, Instrument};

use super::dynamodb::{
    cancellation_codes, condition_failed, date_attr, dynamodb_span, format_date, guard_item,
    map_build_error, map_dynamodb_error, string_attr, Item, GUARD_KEY, GUARD_OWNER,
};
use crate::models::{today, Menu, MenuFilters, RepositoryError, RepositoryResult};

/// Trait defining the interface for menu data access operations
#[async_trait]
pub trait MenuRepository: Send + Sync {
    /// Find menus; implementations may pre-apply the date bounds of the filters
    async fn find_all(&self, filters: MenuFilters) -> RepositoryResult<Vec<Menu>>;

    /// Find a menu by its ID
    async fn find_by_id(&self, id: &str) -> RepositoryResult<Option<Menu>>;

    /// Find a menu by its exact title
    async fn find_by_title(&self, title: &str) -> RepositoryResult<Option<Menu>>;

    /// Create a new menu; the title must be free
    async fn create(&self, menu: Menu) -> RepositoryResult<Menu>;

    /// Persist title and description, refreshing the modified date.
    /// The dish association is left as stored.
    async fn update(&self, menu: Menu) -> RepositoryResult<Menu>;

    /// Delete a menu; its dishes are kept
    async fn delete(&self, id: &str) -> RepositoryResult<()>;

    /// Add dishes to the menu's association
    async fn attach_dishes(&self, menu_id: &str, dish_ids: &[String]) -> RepositoryResult<Menu>;

    /// Remove every dish from the menu's association
    async fn clear_dishes(&self, menu_id: &str) -> RepositoryResult<Menu>;

    /// Count stored menus
    async fn count(&self) -> RepositoryResult<usize>;
}

/// Guard key reserving a menu title in the unique-keys table
pub fn menu_title_guard_key(title: &str) -> String {
    format!("menu-title#{}", title)
}

/// Items DynamoDB accepts in a single TransactWriteItems call
const MAX_TRANSACT_ITEMS: usize = 100;

/// First dish whose existence check cancelled an attach transaction
fn missing_dish<'a>(codes: &[String], dish_ids: &'a [String]) -> Option<&'a String> {
    dish_ids
        .iter()
        .enumerate()
        .find(|(index, _)| condition_failed(codes, *index))
        .map(|(_, dish_id)| dish_id)
}

/// DynamoDB implementation of the MenuRepository trait
pub struct DynamoDbMenuRepository {
    client: Arc<DynamoDbClient>,
    table_name: String,
    dishes_table_name: String,
    unique_keys_table_name: String,
    region: String,
}

impl DynamoDbMenuRepository {
    /// Create a new DynamoDB menu repository
    pub fn new(
        client: Arc<DynamoDbClient>,
        table_name: String,
        dishes_table_name: String,
        unique_keys_table_name: String,
        region: String,
    ) -> Self {
        Self {
            client,
            table_name,
            dishes_table_name,
            unique_keys_table_name,
            region,
        }
    }

    /// Get the table name (for testing)
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Convert a Menu struct to DynamoDB attribute values
    pub fn menu_to_item(&self, menu: &Menu) -> Item {
        let mut item = HashMap::new();

        item.insert("id".to_string(), AttributeValue::S(menu.id.clone()));
        item.insert("title".to_string(), AttributeValue::S(menu.title.clone()));
        item.insert(
            "description".to_string(),
            AttributeValue::S(menu.description.clone()),
        );
        item.insert(
            "created_date".to_string(),
            AttributeValue::S(format_date(menu.created_date)),
        );
        item.insert(
            "modified_date".to_string(),
            AttributeValue::S(format_date(menu.modified_date)),
        );
        // DynamoDB rejects empty sets
        if !menu.dishes.is_empty() {
            item.insert(
                "dish_ids".to_string(),
                AttributeValue::Ss(menu.dishes.iter().cloned().collect()),
            );
        }

        item
    }

    /// Convert DynamoDB item to Menu struct
    pub fn item_to_menu(&self, item: Item) -> RepositoryResult<Menu> {
        let created_date = date_attr(&item, "created_date")?;
        let modified_date = date_attr(&item, "modified_date").unwrap_or(created_date);

        let dishes: BTreeSet<String> = item
            .get("dish_ids")
            .and_then(|v| v.as_ss().ok())
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();

        Ok(Menu {
            id: string_attr(&item, "id")?,
            title: string_attr(&item, "title")?,
            description: item
                .get("description")
                .and_then(|v| v.as_s().ok())
                .cloned()
                .unwrap_or_default(),
            created_date,
            modified_date,
            dishes,
        })
    }

    /// Build the scan filter for the date bounds; title matching stays with the caller
    fn date_filter_expression(filters: &MenuFilters) -> Option<(String, Item)> {
        let mut expressions = Vec::new();
        let mut values = HashMap::new();

        let bounds = [
            ("created_date", ">=", ":created_from", filters.created_from),
            ("created_date", "<=", ":created_to", filters.created_to),
            ("modified_date", ">=", ":modified_from", filters.modified_from),
            ("modified_date", "<=", ":modified_to", filters.modified_to),
        ];

        for (attribute, operator, placeholder, bound) in bounds {
            if let Some(date) = bound {
                expressions.push(format!("{} {} {}", attribute, operator, placeholder));
                values.insert(
                    placeholder.to_string(),
                    AttributeValue::S(format_date(date)),
                );
            }
        }

        if expressions.is_empty() {
            None
        } else {
            Some((expressions.join(" AND "), values))
        }
    }

    async fn guard_owner(&self, key: &str) -> RepositoryResult<Option<String>> {
        let get_span = dynamodb_span("GetItem", &self.unique_keys_table_name, &self.region);

        let response = async {
            self.client
                .get_item()
                .table_name(&self.unique_keys_table_name)
                .key(GUARD_KEY, AttributeValue::S(key.to_string()))
                .consistent_read(true)
                .send()
                .await
                .map_err(|e| map_dynamodb_error(e.into(), &self.unique_keys_table_name))
        }
        .instrument(get_span)
        .await?;

        Ok(response
            .item
            .as_ref()
            .and_then(|item| string_attr(item, GUARD_OWNER).ok()))
    }

    fn map_update_error(
        &self,
        error: aws_sdk_dynamodb::error::SdkError<UpdateItemError>,
    ) -> RepositoryError {
        match error.as_service_error() {
            Some(e) if e.is_conditional_check_failed_exception() => RepositoryError::NotFound,
            _ => map_dynamodb_error(error.into(), &self.table_name),
        }
    }

    /// Existence checks for each dish, then the `ADD` to the menu's set
    fn attach_transaction(
        &self,
        menu_id: &str,
        dish_ids: &[String],
    ) -> RepositoryResult<Vec<TransactWriteItem>> {
        let mut transact_items = Vec::with_capacity(dish_ids.len() + 1);

        for dish_id in dish_ids {
            let check = ConditionCheck::builder()
                .table_name(&self.dishes_table_name)
                .key("id", AttributeValue::S(dish_id.clone()))
                .condition_expression("attribute_exists(id)")
                .build()
                .map_err(map_build_error)?;
            transact_items.push(TransactWriteItem::builder().condition_check(check).build());
        }

        let update = Update::builder()
            .table_name(&self.table_name)
            .key("id", AttributeValue::S(menu_id.to_string()))
            .update_expression("ADD dish_ids :dish_ids")
            .condition_expression("attribute_exists(id)")
            .expression_attribute_values(":dish_ids", AttributeValue::Ss(dish_ids.to_vec()))
            .build()
            .map_err(map_build_error)?;
        transact_items.push(TransactWriteItem::builder().update(update).build());

        Ok(transact_items)
    }

    fn unique_violation(title: &str) -> RepositoryError {
        RepositoryError::UniqueConstraintViolation {
            entity: "menu".to_string(),
            field: "title".to_string(),
            value: title.to_string(),
        }
    }
}

#[async_trait]
impl MenuRepository for DynamoDbMenuRepository {
    #[instrument(skip(self), fields(table = %self.table_name))]
    async fn find_all(&self, filters: MenuFilters) -> RepositoryResult<Vec<Menu>> {
        info!("Finding all menus with filters");

        let filter = Self::date_filter_expression(&filters);
        let scan_span = dynamodb_span("Scan", &self.table_name, &self.region);

        let menus = async {
            let mut menus = Vec::new();
            let mut start_key: Option<Item> = None;

            loop {
                let mut scan_builder = self
                    .client
                    .scan()
                    .table_name(&self.table_name)
                    .select(Select::AllAttributes)
                    .set_exclusive_start_key(start_key.take());

                if let Some((expression, values)) = &filter {
                    scan_builder = scan_builder
                        .filter_expression(expression.clone())
                        .set_expression_attribute_values(Some(values.clone()));
                }

                let response = scan_builder
                    .send()
                    .await
                    .map_err(|e| map_dynamodb_error(e.into(), &self.table_name))?;

                for item in response.items.unwrap_or_default() {
                    match self.item_to_menu(item) {
                        Ok(menu) => menus.push(menu),
                        Err(e) => {
                            warn!("Failed to parse menu item: {}", e);
                            continue;
                        }
                    }
                }

                match response.last_evaluated_key {
                    Some(key) if !key.is_empty() => start_key = Some(key),
                    _ => break,
                }
            }

            Ok::<_, RepositoryError>(menus)
        }
        .instrument(scan_span)
        .await?;

        info!("Found {} menus", menus.len());
        Ok(menus)
    }

    #[instrument(skip(self), fields(table = %self.table_name, id = %id))]
    async fn find_by_id(&self, id: &str) -> RepositoryResult<Option<Menu>> {
        info!("Finding menu by ID");

        let get_span = dynamodb_span("GetItem", &self.table_name, &self.region);

        let response = async {
            self.client
                .get_item()
                .table_name(&self.table_name)
                .key("id", AttributeValue::S(id.to_string()))
                .consistent_read(true)
                .send()
                .await
                .map_err(|e| map_dynamodb_error(e.into(), &self.table_name))
        }
        .instrument(get_span)
        .await?;

        match response.item {
            Some(item) => Ok(Some(self.item_to_menu(item)?)),
            None => {
                info!("Menu not found");
                Ok(None)
            }
        }
    }

    #[instrument(skip(self), fields(table = %self.table_name, title = %title))]
    async fn find_by_title(&self, title: &str) -> RepositoryResult<Option<Menu>> {
        let owner = match self.guard_owner(&menu_title_guard_key(title)).await? {
            Some(owner) => owner,
            None => return Ok(None),
        };

        match self.find_by_id(&owner).await? {
            Some(menu) if menu.title == title => Ok(Some(menu)),
            _ => {
                warn!(menu_id = %owner, "Stale menu title guard");
                Ok(None)
            }
        }
    }

    #[instrument(skip(self, menu), fields(table = %self.table_name, id = %menu.id))]
    async fn create(&self, menu: Menu) -> RepositoryResult<Menu> {
        info!("Creating new menu");

        let guard = Put::builder()
            .table_name(&self.unique_keys_table_name)
            .set_item(Some(guard_item(&menu_title_guard_key(&menu.title), &menu.id)))
            .condition_expression("attribute_not_exists(pk)")
            .build()
            .map_err(map_build_error)?;
        let put = Put::builder()
            .table_name(&self.table_name)
            .set_item(Some(self.menu_to_item(&menu)))
            .condition_expression("attribute_not_exists(id)")
            .build()
            .map_err(map_build_error)?;

        let transact_span = dynamodb_span("TransactWriteItems", &self.table_name, &self.region);

        async {
            self.client
                .transact_write_items()
                .transact_items(TransactWriteItem::builder().put(guard).build())
                .transact_items(TransactWriteItem::builder().put(put).build())
                .send()
                .await
                .map_err(|e| match cancellation_codes(&e) {
                    Some(codes) if condition_failed(&codes, 0) => {
                        Self::unique_violation(&menu.title)
                    }
                    Some(codes) if condition_failed(&codes, 1) => {
                        RepositoryError::ConstraintViolation {
                            message: format!("Menu id already exists: {}", menu.id),
                        }
                    }
                    _ => map_dynamodb_error(e.into(), &self.table_name),
                })
        }
        .instrument(transact_span)
        .await?;

        info!("Menu created successfully");
        Ok(menu)
    }

    #[instrument(skip(self, menu), fields(table = %self.table_name, id = %menu.id))]
    async fn update(&self, menu: Menu) -> RepositoryResult<Menu> {
        info!("Updating menu");

        let current = self
            .find_by_id(&menu.id)
            .await?
            .ok_or(RepositoryError::NotFound)?;

        let update = Update::builder()
            .table_name(&self.table_name)
            .key("id", AttributeValue::S(menu.id.clone()))
            .update_expression("SET #title = :title, #description = :description, modified_date = :modified")
            .condition_expression("attribute_exists(id)")
            .expression_attribute_names("#title", "title")
            .expression_attribute_names("#description", "description")
            .expression_attribute_values(":title", AttributeValue::S(menu.title.clone()))
            .expression_attribute_values(
                ":description",
                AttributeValue::S(menu.description.clone()),
            )
            .expression_attribute_values(":modified", AttributeValue::S(format_date(today())))
            .build()
            .map_err(map_build_error)?;

        let mut transact_items = Vec::new();
        if current.title != menu.title {
            transact_items.push(
                TransactWriteItem::builder()
                    .put(
                        Put::builder()
                            .table_name(&self.unique_keys_table_name)
                            .set_item(Some(guard_item(
                                &menu_title_guard_key(&menu.title),
                                &menu.id,
                            )))
                            .condition_expression("attribute_not_exists(pk)")
                            .build()
                            .map_err(map_build_error)?,
                    )
                    .build(),
            );
            transact_items.push(
                TransactWriteItem::builder()
                    .delete(
                        Delete::builder()
                            .table_name(&self.unique_keys_table_name)
                            .key(
                                GUARD_KEY,
                                AttributeValue::S(menu_title_guard_key(&current.title)),
                            )
                            .build()
                            .map_err(map_build_error)?,
                    )
                    .build(),
            );
        }
        let update_index = transact_items.len();
        transact_items.push(TransactWriteItem::builder().update(update).build());

        let transact_span = dynamodb_span("TransactWriteItems", &self.table_name, &self.region);

        async {
            self.client
                .transact_write_items()
                .set_transact_items(Some(transact_items))
                .send()
                .await
                .map_err(|e| match cancellation_codes(&e) {
                    Some(codes) if update_index > 0 && condition_failed(&codes, 0) => {
                        Self::unique_violation(&menu.title)
                    }
                    Some(codes) if condition_failed(&codes, update_index) => {
                        RepositoryError::NotFound
                    }
                    _ => map_dynamodb_error(e.into(), &self.table_name),
                })
        }
        .instrument(transact_span)
        .await?;

        info!("Menu updated successfully");
        self.find_by_id(&menu.id)
            .await?
            .ok_or(RepositoryError::NotFound)
    }

    #[instrument(skip(self), fields(table = %self.table_name, id = %id))]
    async fn delete(&self, id: &str) -> RepositoryResult<()> {
        info!("Deleting menu");

        let menu = self.find_by_id(id).await?.ok_or(RepositoryError::NotFound)?;

        let delete_menu = Delete::builder()
            .table_name(&self.table_name)
            .key("id", AttributeValue::S(id.to_string()))
            .condition_expression("attribute_exists(id)")
            .build()
            .map_err(map_build_error)?;
        let delete_guard = Delete::builder()
            .table_name(&self.unique_keys_table_name)
            .key(GUARD_KEY, AttributeValue::S(menu_title_guard_key(&menu.title)))
            .build()
            .map_err(map_build_error)?;

        let transact_span = dynamodb_span("TransactWriteItems", &self.table_name, &self.region);

        async {
            self.client
                .transact_write_items()
                .transact_items(TransactWriteItem::builder().delete(delete_menu).build())
                .transact_items(TransactWriteItem::builder().delete(delete_guard).build())
                .send()
                .await
                .map_err(|e| match cancellation_codes(&e) {
                    Some(codes) if condition_failed(&codes, 0) => RepositoryError::NotFound,
                    _ => map_dynamodb_error(e.into(), &self.table_name),
                })
        }
        .instrument(transact_span)
        .await?;

        info!("Menu deleted successfully");
        Ok(())
    }

    #[instrument(skip(self, dish_ids), fields(table = %self.table_name, id = %menu_id, count = dish_ids.len()))]
    async fn attach_dishes(&self, menu_id: &str, dish_ids: &[String]) -> RepositoryResult<Menu> {
        // One slot per chunk goes to the menu update
        for chunk in dish_ids.chunks(MAX_TRANSACT_ITEMS - 1) {
            let transact_items = self.attach_transaction(menu_id, chunk)?;
            let transact_span =
                dynamodb_span("TransactWriteItems", &self.table_name, &self.region);

            async {
                self.client
                    .transact_write_items()
                    .set_transact_items(Some(transact_items))
                    .send()
                    .await
                    .map_err(|e| match cancellation_codes(&e) {
                        Some(codes) => match missing_dish(&codes, chunk) {
                            Some(dish_id) => RepositoryError::ConstraintViolation {
                                message: format!("Unknown dish id: {}", dish_id),
                            },
                            None if condition_failed(&codes, chunk.len()) => {
                                RepositoryError::NotFound
                            }
                            None => map_dynamodb_error(e.into(), &self.table_name),
                        },
                        None => map_dynamodb_error(e.into(), &self.table_name),
                    })
            }
            .instrument(transact_span)
            .await?;
        }

        let menu = self
            .find_by_id(menu_id)
            .await?
            .ok_or(RepositoryError::NotFound)?;
        info!(dish_count = menu.dish_count(), "Dishes attached");
        Ok(menu)
    }

    #[instrument(skip(self), fields(table = %self.table_name, id = %menu_id))]
    async fn clear_dishes(&self, menu_id: &str) -> RepositoryResult<Menu> {
        let update_span = dynamodb_span("UpdateItem", &self.table_name, &self.region);

        let response = async {
            self.client
                .update_item()
                .table_name(&self.table_name)
                .key("id", AttributeValue::S(menu_id.to_string()))
                .update_expression("REMOVE dish_ids")
                .condition_expression("attribute_exists(id)")
                .return_values(ReturnValue::AllNew)
                .send()
                .await
                .map_err(|e| self.map_update_error(e))
        }
        .instrument(update_span)
        .await?;

        info!("Dishes cleared");
        self.item_to_menu(response.attributes.unwrap_or_default())
    }

    #[instrument(skip(self), fields(table = %self.table_name))]
    async fn count(&self) -> RepositoryResult<usize> {
        let mut count = 0usize;
        let mut start_key: Option<Item> = None;

        loop {
            let response = self
                .client
                .scan()
                .table_name(&self.table_name)
                .select(Select::Count)
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(|e| map_dynamodb_error(e.into(), &self.table_name))?;

            count += response.count() as usize;

            match response.last_evaluated_key {
                Some(key) if !key.is_empty() => start_key = Some(key),
                _ => break,
            }
        }

        info!("Menu count: {}", count);
        Ok(count)
    }
}
