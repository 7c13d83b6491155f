//! Helpers shared by the DynamoDB-backed repositories.

use aws_sdk_dynamodb::error::{BuildError, SdkError};
use aws_sdk_dynamodb::operation::transact_write_items::TransactWriteItemsError;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Error as DynamoDbError;
use chrono::NaiveDate;
use std::collections::HashMap;
use tracing::error;

use crate::models::{RepositoryError, RepositoryResult};

pub(crate) type Item = HashMap<String, AttributeValue>;

/// Partition key attribute of the unique-keys guard table
pub(crate) const GUARD_KEY: &str = "pk";
/// Attribute of a guard item naming the entity that owns the key
pub(crate) const GUARD_OWNER: &str = "owner_id";

const DATE_FORMAT: &str = "%Y-%m-%d";
const CONDITIONAL_CHECK_FAILED: &str = "ConditionalCheckFailed";

/// Create a DynamoDB client span carrying the X-Ray and OpenTelemetry attributes
pub(crate) fn dynamodb_span(operation: &str, table_name: &str, region: &str) -> tracing::Span {
    tracing::info_span!(
        "DynamoDB",
        "aws.service" = "DynamoDB",
        "aws.operation" = operation,
        "aws.region" = %region,
        "aws.dynamodb.table_name" = %table_name,
        "aws.request_id" = tracing::field::Empty,
        "aws.remote.service" = "AWS::DynamoDB",
        "aws.remote.operation" = operation,
        "aws.remote.resource.type" = "AWS::DynamoDB::Table",
        "aws.remote.resource.identifier" = %table_name,
        "otel.kind" = "client",
        "otel.name" = format!("DynamoDB.{}", operation),
        "rpc.system" = "aws-api",
        "rpc.service" = "AmazonDynamoDBv2",
        "rpc.method" = operation,
        "http.status_code" = tracing::field::Empty,
        "db.system" = "dynamodb",
        "db.name" = %table_name,
        "db.operation" = operation,
        "component" = "aws-sdk-dynamodb",
    )
}

/// Convert DynamoDB error to RepositoryError
pub(crate) fn map_dynamodb_error(error: DynamoDbError, table_name: &str) -> RepositoryError {
    error!("DynamoDB error: {:?}", error);

    if let DynamoDbError::ResourceNotFoundException(_) = error {
        return RepositoryError::TableNotFound {
            table_name: table_name.to_string(),
        };
    }

    RepositoryError::AwsSdk {
        message: error.to_string(),
    }
}

pub(crate) fn map_build_error(error: BuildError) -> RepositoryError {
    RepositoryError::AwsSdk {
        message: format!("Failed to build request: {}", error),
    }
}

/// Cancellation reason codes of a cancelled transaction, in request order
pub(crate) fn cancellation_codes(error: &SdkError<TransactWriteItemsError>) -> Option<Vec<String>> {
    match error.as_service_error() {
        Some(TransactWriteItemsError::TransactionCanceledException(cancelled)) => Some(
            cancelled
                .cancellation_reasons()
                .iter()
                .map(|reason| reason.code().unwrap_or("None").to_string())
                .collect(),
        ),
        _ => None,
    }
}

/// Whether the condition of the transaction item at `index` failed
pub(crate) fn condition_failed(codes: &[String], index: usize) -> bool {
    codes
        .get(index)
        .map_or(false, |code| code == CONDITIONAL_CHECK_FAILED)
}

pub(crate) fn guard_item(key: &str, owner_id: &str) -> Item {
    let mut item = HashMap::new();
    item.insert(GUARD_KEY.to_string(), AttributeValue::S(key.to_string()));
    item.insert(GUARD_OWNER.to_string(), AttributeValue::S(owner_id.to_string()));
    item
}

pub(crate) fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub(crate) fn string_attr(item: &Item, name: &str) -> RepositoryResult<String> {
    item.get(name)
        .and_then(|v| v.as_s().ok())
        .cloned()
        .ok_or_else(|| RepositoryError::InvalidQuery {
            message: format!("Missing {}", name),
        })
}

pub(crate) fn date_attr(item: &Item, name: &str) -> RepositoryResult<NaiveDate> {
    item.get(name)
        .and_then(|v| v.as_s().ok())
        .and_then(|s| NaiveDate::parse_from_str(s, DATE_FORMAT).ok())
        .ok_or_else(|| RepositoryError::InvalidQuery {
            message: format!("Invalid {}", name),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_failed() {
        let codes = vec!["ConditionalCheckFailed".to_string(), "None".to_string()];

        assert!(condition_failed(&codes, 0));
        assert!(!condition_failed(&codes, 1));
        assert!(!condition_failed(&codes, 2));
    }

    #[test]
    fn test_date_attr_round_trip() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let mut item = HashMap::new();
        item.insert(
            "created_date".to_string(),
            AttributeValue::S(format_date(date)),
        );

        assert_eq!(format_date(date), "2024-02-29");
        assert_eq!(date_attr(&item, "created_date").unwrap(), date);
        assert!(date_attr(&item, "modified_date").is_err());
    }

    #[test]
    fn test_guard_item_layout() {
        let item = guard_item("menu-title#Sweet menu", "M1234abcd");

        assert_eq!(string_attr(&item, GUARD_KEY).unwrap(), "menu-title#Sweet menu");
        assert_eq!(string_attr(&item, GUARD_OWNER).unwrap(), "M1234abcd");
    }
}
