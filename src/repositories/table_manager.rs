use aws_sdk_dynamodb::types::{
    AttributeDefinition, BillingMode, KeySchemaElement, KeyType, ScalarAttributeType, TableStatus,
};
use aws_sdk_dynamodb::{Client as DynamoDbClient, Error as DynamoDbError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use crate::models::{RepositoryError, RepositoryResult};

/// Table names managed for the DynamoDB backend
#[derive(Debug, Clone)]
pub struct TableNames {
    pub dishes: String,
    pub menus: String,
    pub unique_keys: String,
}

/// Manages DynamoDB table creation and configuration
pub struct TableManager {
    client: Arc<DynamoDbClient>,
    wait_interval: Duration,
    max_wait_attempts: u32,
}

impl TableManager {
    /// Create a new table manager
    pub fn new(client: Arc<DynamoDbClient>) -> Self {
        Self {
            client,
            wait_interval: Duration::from_secs(10),
            max_wait_attempts: 30,
        }
    }

    /// Create a table keyed by a single string hash attribute
    #[instrument(skip(self), fields(table_name = %table_name, key = %key_attribute))]
    pub async fn create_string_keyed_table(
        &self,
        table_name: &str,
        key_attribute: &str,
    ) -> RepositoryResult<bool> {
        if self.table_exists(table_name).await? {
            info!("Table {} already exists", table_name);
            return Ok(false);
        }

        let attribute_definition = AttributeDefinition::builder()
            .attribute_name(key_attribute)
            .attribute_type(ScalarAttributeType::S)
            .build()
            .map_err(|e| RepositoryError::AwsSdk {
                message: format!("Failed to build attribute definition: {}", e),
            })?;

        let key_schema = KeySchemaElement::builder()
            .attribute_name(key_attribute)
            .key_type(KeyType::Hash)
            .build()
            .map_err(|e| RepositoryError::AwsSdk {
                message: format!("Failed to build key schema: {}", e),
            })?;

        self.client
            .create_table()
            .table_name(table_name)
            .attribute_definitions(attribute_definition)
            .key_schema(key_schema)
            .billing_mode(BillingMode::PayPerRequest)
            .send()
            .await
            .map_err(|e| self.map_dynamodb_error(e.into()))?;

        info!("Table creation initiated, waiting for table to become active");
        self.wait_for_table_active(table_name).await?;
        info!("Table {} created successfully", table_name);

        Ok(true)
    }

    /// Check if a table exists
    #[instrument(skip(self), fields(table_name = %table_name))]
    pub async fn table_exists(&self, table_name: &str) -> RepositoryResult<bool> {
        match self.client.describe_table().table_name(table_name).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                let not_found = e
                    .as_service_error()
                    .map(|service_error| service_error.is_resource_not_found_exception())
                    .unwrap_or(false);

                if not_found {
                    info!("Table {} does not exist", table_name);
                    Ok(false)
                } else {
                    error!("Error checking table existence: {}", e);
                    Err(RepositoryError::ConnectionFailed)
                }
            }
        }
    }

    /// Wait for a table to become active
    #[instrument(skip(self), fields(table_name = %table_name))]
    async fn wait_for_table_active(&self, table_name: &str) -> RepositoryResult<()> {
        let mut attempts = 0;

        loop {
            match self.client.describe_table().table_name(table_name).send().await {
                Ok(response) => {
                    if let Some(table) = response.table {
                        match table.table_status {
                            Some(TableStatus::Active) => {
                                info!("Table {} is now active", table_name);
                                return Ok(());
                            }
                            Some(status) => {
                                info!("Table {} status: {:?}, waiting...", table_name, status);
                            }
                            None => {
                                warn!("Table {} status unknown, waiting...", table_name);
                            }
                        }
                    }
                }
                Err(e) => {
                    error!("Error checking table status: {}", e);
                    return Err(self.map_dynamodb_error(e.into()));
                }
            }

            attempts += 1;
            if attempts >= self.max_wait_attempts {
                error!("Timeout waiting for table {} to become active", table_name);
                return Err(RepositoryError::Timeout);
            }

            tokio::time::sleep(self.wait_interval).await;
        }
    }

    /// Create the dishes, menus and unique-keys tables.
    /// Returns the names of the tables that were newly created.
    #[instrument(skip(self))]
    pub async fn create_all_tables(&self, names: &TableNames) -> RepositoryResult<Vec<String>> {
        info!("Creating all tables");

        let (dishes, menus, unique_keys) = tokio::join!(
            self.create_string_keyed_table(&names.dishes, "id"),
            self.create_string_keyed_table(&names.menus, "id"),
            self.create_string_keyed_table(&names.unique_keys, "pk"),
        );

        let mut created = Vec::new();
        for (name, result) in [
            (&names.dishes, dishes),
            (&names.menus, menus),
            (&names.unique_keys, unique_keys),
        ] {
            if result? {
                created.push(name.clone());
            }
        }

        info!(created = created.len(), "All tables ready");
        Ok(created)
    }

    /// Convert DynamoDB error to RepositoryError
    fn map_dynamodb_error(&self, error: DynamoDbError) -> RepositoryError {
        error!("DynamoDB error: {:?}", error);
        RepositoryError::AwsSdk {
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_manager_creation() {
        let config = aws_sdk_dynamodb::Config::builder()
            .region(aws_sdk_dynamodb::config::Region::new("us-east-1"))
            .behavior_version(aws_sdk_dynamodb::config::BehaviorVersion::latest())
            .build();
        let client = Arc::new(aws_sdk_dynamodb::Client::from_conf(config));
        let manager = TableManager::new(client);

        assert_eq!(manager.wait_interval, Duration::from_secs(10));
        assert_eq!(manager.max_wait_attempts, 30);
    }
}
