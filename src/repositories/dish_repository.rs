use async_trait::async_trait;
use aws_sdk_dynamodb::operation::RequestId;
use aws_sdk_dynamodb::types::{AttributeValue, Delete, Put, Select, TransactWriteItem};
use aws_sdk_dynamodb::Client as DynamoDbClient;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn, Instrument};

use super::dynamodb::{
    cancellation_codes, condition_failed, date_attr, dynamodb_span, format_date, guard_item,
    map_build_error, map_dynamodb_error, string_attr, Item, GUARD_KEY, GUARD_OWNER,
};
use crate::models::{normalize_price, Dish, DishFields, RepositoryError, RepositoryResult};

const DETACH_ATTEMPTS: u32 = 3;

/// Trait defining the interface for dish data access operations
#[async_trait]
pub trait DishRepository: Send + Sync {
    /// Find all dishes
    async fn find_all(&self) -> RepositoryResult<Vec<Dish>>;

    /// Find a dish by its ID
    async fn find_by_id(&self, id: &str) -> RepositoryResult<Option<Dish>>;

    /// Find the dishes with the given IDs, skipping unknown ones
    async fn find_by_ids(&self, ids: &[String]) -> RepositoryResult<Vec<Dish>>;

    /// Find the dish carrying exactly this natural key
    async fn find_by_fields(&self, fields: &DishFields) -> RepositoryResult<Option<Dish>>;

    /// Find dishes created or modified on the given day
    async fn find_changed_on(&self, date: NaiveDate) -> RepositoryResult<Vec<Dish>>;

    /// Create a new dish; the natural key must be free
    async fn create(&self, dish: Dish) -> RepositoryResult<Dish>;

    /// Return the dish with this natural key, creating it when absent.
    /// The flag is true when a new record was written.
    async fn get_or_create(&self, fields: DishFields) -> RepositoryResult<(Dish, bool)>;

    /// Update an existing dish, refreshing its modified date
    async fn update(&self, dish: Dish) -> RepositoryResult<Dish>;

    /// Delete a dish and detach it from every menu
    async fn delete(&self, id: &str) -> RepositoryResult<()>;

    /// Count stored dishes
    async fn count(&self) -> RepositoryResult<usize>;
}

/// Guard key reserving a dish natural key in the unique-keys table
pub fn dish_guard_key(fields: &DishFields) -> String {
    format!("dish#{}", fields.key_id())
}

/// DynamoDB implementation of the DishRepository trait
pub struct DynamoDbDishRepository {
    client: Arc<DynamoDbClient>,
    table_name: String,
    menus_table_name: String,
    unique_keys_table_name: String,
    region: String,
}

impl DynamoDbDishRepository {
    /// Create a new DynamoDB dish repository
    pub fn new(
        client: Arc<DynamoDbClient>,
        table_name: String,
        menus_table_name: String,
        unique_keys_table_name: String,
        region: String,
    ) -> Self {
        Self {
            client,
            table_name,
            menus_table_name,
            unique_keys_table_name,
            region,
        }
    }

    /// Get the table name (for testing)
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Convert a Dish struct to DynamoDB attribute values
    pub fn dish_to_item(&self, dish: &Dish) -> Item {
        let mut item = HashMap::new();

        item.insert("id".to_string(), AttributeValue::S(dish.id.clone()));
        item.insert("title".to_string(), AttributeValue::S(dish.title.clone()));
        item.insert(
            "description".to_string(),
            AttributeValue::S(dish.description.clone()),
        );
        item.insert(
            "price".to_string(),
            AttributeValue::N(dish.price.to_string()),
        );
        item.insert(
            "time_minutes".to_string(),
            AttributeValue::N(dish.time_minutes.to_string()),
        );
        item.insert(
            "vegetarian".to_string(),
            AttributeValue::Bool(dish.vegetarian),
        );
        item.insert(
            "created_date".to_string(),
            AttributeValue::S(format_date(dish.created_date)),
        );
        item.insert(
            "modified_date".to_string(),
            AttributeValue::S(format_date(dish.modified_date)),
        );
        if let Some(ref image_path) = dish.image {
            item.insert("image".to_string(), AttributeValue::S(image_path.clone()));
        }

        item
    }

    /// Convert DynamoDB item to Dish struct
    pub fn item_to_dish(&self, item: Item) -> RepositoryResult<Dish> {
        let price = item
            .get("price")
            .and_then(|v| v.as_n().ok())
            .and_then(|s| Decimal::from_str(s).ok())
            .map(normalize_price)
            .ok_or_else(|| RepositoryError::InvalidQuery {
                message: "Invalid price".to_string(),
            })?;

        let time_minutes = item
            .get("time_minutes")
            .and_then(|v| v.as_n().ok())
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| RepositoryError::InvalidQuery {
                message: "Invalid time_minutes".to_string(),
            })?;

        let vegetarian = item
            .get("vegetarian")
            .and_then(|v| v.as_bool().ok())
            .copied()
            .unwrap_or(false);

        let description = item
            .get("description")
            .and_then(|v| v.as_s().ok())
            .cloned()
            .unwrap_or_default();

        let created_date = date_attr(&item, "created_date")?;
        let modified_date = date_attr(&item, "modified_date").unwrap_or(created_date);

        Ok(Dish {
            id: string_attr(&item, "id")?,
            title: string_attr(&item, "title")?,
            description,
            price,
            time_minutes,
            vegetarian,
            created_date,
            modified_date,
            image: item.get("image").and_then(|v| v.as_s().ok()).cloned(),
        })
    }

    fn parse_items(&self, items: Vec<Item>) -> Vec<Dish> {
        let mut dishes = Vec::with_capacity(items.len());
        for item in items {
            match self.item_to_dish(item) {
                Ok(dish) => dishes.push(dish),
                Err(e) => {
                    warn!("Failed to parse dish item: {}", e);
                    continue;
                }
            }
        }
        dishes
    }

    /// Scan the dishes table following pagination, with an optional filter
    async fn scan_dishes(
        &self,
        filter: Option<(&str, HashMap<String, AttributeValue>)>,
    ) -> RepositoryResult<Vec<Dish>> {
        let scan_span = dynamodb_span("Scan", &self.table_name, &self.region);

        async {
            let mut dishes = Vec::new();
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
                        .filter_expression(*expression)
                        .set_expression_attribute_values(Some(values.clone()));
                }

                let response = scan_builder
                    .send()
                    .await
                    .map_err(|e| map_dynamodb_error(e.into(), &self.table_name))?;

                dishes.extend(self.parse_items(response.items.unwrap_or_default()));

                match response.last_evaluated_key {
                    Some(key) if !key.is_empty() => start_key = Some(key),
                    _ => break,
                }
            }

            Ok(dishes)
        }
        .instrument(scan_span)
        .await
    }

    /// Look up the owner of a guard key
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

    /// Remove a dish id from every menu association that holds it
    async fn detach_from_menus(&self, dish_id: &str) -> RepositoryResult<usize> {
        let scan_span = dynamodb_span("Scan", &self.menus_table_name, &self.region);

        let menu_ids = async {
            let mut menu_ids = Vec::new();
            let mut start_key: Option<Item> = None;

            loop {
                let response = self
                    .client
                    .scan()
                    .table_name(&self.menus_table_name)
                    .projection_expression("id")
                    .filter_expression("contains(dish_ids, :dish_id)")
                    .consistent_read(true)
                    .expression_attribute_values(":dish_id", AttributeValue::S(dish_id.to_string()))
                    .set_exclusive_start_key(start_key.take())
                    .send()
                    .await
                    .map_err(|e| map_dynamodb_error(e.into(), &self.menus_table_name))?;

                for item in response.items.unwrap_or_default() {
                    menu_ids.push(string_attr(&item, "id")?);
                }

                match response.last_evaluated_key {
                    Some(key) if !key.is_empty() => start_key = Some(key),
                    _ => break,
                }
            }

            Ok::<_, RepositoryError>(menu_ids)
        }
        .instrument(scan_span)
        .await?;

        for menu_id in &menu_ids {
            let update_span = dynamodb_span("UpdateItem", &self.menus_table_name, &self.region);

            async {
                self.client
                    .update_item()
                    .table_name(&self.menus_table_name)
                    .key("id", AttributeValue::S(menu_id.clone()))
                    .update_expression("DELETE dish_ids :dish_ids")
                    .expression_attribute_values(
                        ":dish_ids",
                        AttributeValue::Ss(vec![dish_id.to_string()]),
                    )
                    .send()
                    .await
                    .map_err(|e| map_dynamodb_error(e.into(), &self.menus_table_name))
            }
            .instrument(update_span)
            .await?;
        }

        Ok(menu_ids.len())
    }

    fn unique_violation(fields: &DishFields) -> RepositoryError {
        RepositoryError::UniqueConstraintViolation {
            entity: "dish".to_string(),
            field: "natural_key".to_string(),
            value: fields.title.clone(),
        }
    }
}

#[async_trait]
impl DishRepository for DynamoDbDishRepository {
    #[instrument(skip(self), fields(table = %self.table_name))]
    async fn find_all(&self) -> RepositoryResult<Vec<Dish>> {
        info!("Finding all dishes");

        let dishes = self.scan_dishes(None).await?;

        info!("Found {} dishes", dishes.len());
        Ok(dishes)
    }

    #[instrument(skip(self), fields(table = %self.table_name, id = %id))]
    async fn find_by_id(&self, id: &str) -> RepositoryResult<Option<Dish>> {
        info!("Finding dish by ID");

        let get_span = dynamodb_span("GetItem", &self.table_name, &self.region);

        let response = async {
            let result = self
                .client
                .get_item()
                .table_name(&self.table_name)
                .key("id", AttributeValue::S(id.to_string()))
                .consistent_read(true)
                .send()
                .await;

            match &result {
                Ok(output) => {
                    tracing::Span::current().record("http.status_code", 200);
                    if let Some(request_id) = output.request_id() {
                        tracing::Span::current().record("aws.request_id", request_id);
                    }
                }
                Err(e) => {
                    tracing::Span::current().record("http.status_code", 400);
                    error!("DynamoDB GetItem failed: {}", e);
                }
            }

            result.map_err(|e| map_dynamodb_error(e.into(), &self.table_name))
        }
        .instrument(get_span)
        .await?;

        match response.item {
            Some(item) => Ok(Some(self.item_to_dish(item)?)),
            None => {
                info!("Dish not found");
                Ok(None)
            }
        }
    }

    #[instrument(skip(self, ids), fields(table = %self.table_name, count = ids.len()))]
    async fn find_by_ids(&self, ids: &[String]) -> RepositoryResult<Vec<Dish>> {
        let mut dishes = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(dish) = self.find_by_id(id).await? {
                dishes.push(dish);
            }
        }
        Ok(dishes)
    }

    #[instrument(skip(self, fields), fields(table = %self.table_name, title = %fields.title))]
    async fn find_by_fields(&self, fields: &DishFields) -> RepositoryResult<Option<Dish>> {
        let owner = match self.guard_owner(&dish_guard_key(fields)).await? {
            Some(owner) => owner,
            None => return Ok(None),
        };

        // A guard whose dish is gone or no longer matches is stale
        match self.find_by_id(&owner).await? {
            Some(dish) if dish.fields() == *fields => Ok(Some(dish)),
            _ => {
                warn!(dish_id = %owner, "Stale natural-key guard");
                Ok(None)
            }
        }
    }

    #[instrument(skip(self), fields(table = %self.table_name, date = %date))]
    async fn find_changed_on(&self, date: NaiveDate) -> RepositoryResult<Vec<Dish>> {
        let mut values = HashMap::new();
        values.insert(":date".to_string(), AttributeValue::S(format_date(date)));

        let dishes = self
            .scan_dishes(Some((
                "created_date = :date OR modified_date = :date",
                values,
            )))
            .await?;

        info!("Found {} dishes changed on {}", dishes.len(), date);
        Ok(dishes)
    }

    #[instrument(skip(self, dish), fields(table = %self.table_name, id = %dish.id))]
    async fn create(&self, dish: Dish) -> RepositoryResult<Dish> {
        info!("Creating new dish");

        let fields = dish.fields();
        let guard = Put::builder()
            .table_name(&self.unique_keys_table_name)
            .set_item(Some(guard_item(&dish_guard_key(&fields), &dish.id)))
            .condition_expression("attribute_not_exists(pk)")
            .build()
            .map_err(map_build_error)?;
        let put = Put::builder()
            .table_name(&self.table_name)
            .set_item(Some(self.dish_to_item(&dish)))
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
                    Some(codes) if condition_failed(&codes, 0) => Self::unique_violation(&fields),
                    Some(codes) if condition_failed(&codes, 1) => {
                        RepositoryError::ConstraintViolation {
                            message: format!("Dish id already exists: {}", dish.id),
                        }
                    }
                    _ => map_dynamodb_error(e.into(), &self.table_name),
                })
        }
        .instrument(transact_span)
        .await?;

        info!("Dish created successfully");
        Ok(dish)
    }

    #[instrument(skip(self, fields), fields(table = %self.table_name, title = %fields.title))]
    async fn get_or_create(&self, fields: DishFields) -> RepositoryResult<(Dish, bool)> {
        if let Some(existing) = self.find_by_fields(&fields).await? {
            return Ok((existing, false));
        }

        match self.create(Dish::new(fields.clone())).await {
            Ok(dish) => Ok((dish, true)),
            Err(RepositoryError::UniqueConstraintViolation { .. }) => {
                // Lost the race: reuse the record of the first committer
                info!("Natural key taken concurrently, reading winner back");
                self.find_by_fields(&fields)
                    .await?
                    .map(|dish| (dish, false))
                    .ok_or(RepositoryError::TransactionFailed {
                        message: "Natural-key guard exists without a matching dish".to_string(),
                    })
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self, dish), fields(table = %self.table_name, id = %dish.id))]
    async fn update(&self, mut dish: Dish) -> RepositoryResult<Dish> {
        info!("Updating dish");

        let current = self
            .find_by_id(&dish.id)
            .await?
            .ok_or(RepositoryError::NotFound)?;

        dish.created_date = current.created_date;
        dish.touch();

        let old_fields = current.fields();
        let new_fields = dish.fields();

        let put = Put::builder()
            .table_name(&self.table_name)
            .set_item(Some(self.dish_to_item(&dish)))
            .condition_expression("attribute_exists(id)")
            .build()
            .map_err(map_build_error)?;

        let mut transact_items = Vec::new();
        if old_fields != new_fields {
            transact_items.push(
                TransactWriteItem::builder()
                    .put(
                        Put::builder()
                            .table_name(&self.unique_keys_table_name)
                            .set_item(Some(guard_item(&dish_guard_key(&new_fields), &dish.id)))
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
                            .key(GUARD_KEY, AttributeValue::S(dish_guard_key(&old_fields)))
                            .build()
                            .map_err(map_build_error)?,
                    )
                    .build(),
            );
        }
        let put_index = transact_items.len();
        transact_items.push(TransactWriteItem::builder().put(put).build());

        let transact_span = dynamodb_span("TransactWriteItems", &self.table_name, &self.region);

        async {
            self.client
                .transact_write_items()
                .set_transact_items(Some(transact_items))
                .send()
                .await
                .map_err(|e| match cancellation_codes(&e) {
                    Some(codes) if put_index > 0 && condition_failed(&codes, 0) => {
                        Self::unique_violation(&new_fields)
                    }
                    Some(codes) if condition_failed(&codes, put_index) => RepositoryError::NotFound,
                    _ => map_dynamodb_error(e.into(), &self.table_name),
                })
        }
        .instrument(transact_span)
        .await?;

        info!("Dish updated successfully");
        Ok(dish)
    }

    #[instrument(skip(self), fields(table = %self.table_name, id = %id))]
    async fn delete(&self, id: &str) -> RepositoryResult<()> {
        info!("Deleting dish");

        let dish = self.find_by_id(id).await?.ok_or(RepositoryError::NotFound)?;

        // Detach first so a failure here leaves the dish and every menu intact
        let detached = self.detach_from_menus(id).await?;

        let delete_dish = Delete::builder()
            .table_name(&self.table_name)
            .key("id", AttributeValue::S(id.to_string()))
            .condition_expression("attribute_exists(id)")
            .build()
            .map_err(map_build_error)?;
        let delete_guard = Delete::builder()
            .table_name(&self.unique_keys_table_name)
            .key(GUARD_KEY, AttributeValue::S(dish_guard_key(&dish.fields())))
            .build()
            .map_err(map_build_error)?;

        let transact_span = dynamodb_span("TransactWriteItems", &self.table_name, &self.region);

        async {
            self.client
                .transact_write_items()
                .transact_items(TransactWriteItem::builder().delete(delete_dish).build())
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

        // Menus that attached the dish while it was being deleted
        let mut attempt = 1;
        let swept = loop {
            match self.detach_from_menus(id).await {
                Ok(swept) => break swept,
                Err(e) if attempt < DETACH_ATTEMPTS => {
                    warn!(attempt, error = %e, "Retrying detach of deleted dish");
                    tokio::time::sleep(Duration::from_millis(100 * attempt as u64)).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(error = %e, "Deleted dish is still listed by some menus");
                    return Err(e);
                }
            }
        };

        info!(detached_from = detached + swept, "Dish deleted successfully");
        Ok(())
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

        info!("Dish count: {}", count);
        Ok(count)
    }
}
