//! AWS DynamoDB table backend.
//!
//! Key layout:
//! - `pk` (hash key)  = partition key
//! - `sk` (range key) = row key (item id)
//! - `value`, `updated_at` plain string attributes
//!
//! Point reads use strongly consistent reads so a read immediately after a
//! successful write observes it.

use std::collections::HashMap;
use std::time::Duration;

use aws_sdk_dynamodb::types::{
    AttributeDefinition, AttributeValue, BillingMode, KeySchemaElement, KeyType,
    ScalarAttributeType, TableStatus,
};
use aws_sdk_dynamodb::Client;
use tracing::{debug, info};

use super::store::{ItemRecord, TableBackend, TableFuture};
use crate::config::DynamoDbConfig;

const ATTR_PK: &str = "pk";
const ATTR_SK: &str = "sk";
const ATTR_VALUE: &str = "value";
const ATTR_UPDATED_AT: &str = "updated_at";

/// How many times `ensure_table` polls for an ACTIVE table.
const ACTIVE_POLL_ATTEMPTS: u32 = 30;
const ACTIVE_POLL_DELAY: Duration = Duration::from_secs(1);

fn item_to_strings(item: &HashMap<String, AttributeValue>) -> HashMap<String, String> {
    let mut result = HashMap::new();
    for (key, value) in item {
        if let AttributeValue::S(s) = value {
            result.insert(key.clone(), s.clone());
        } else if let AttributeValue::N(n) = value {
            result.insert(key.clone(), n.clone());
        }
    }
    result
}

fn item_to_record(item: &HashMap<String, AttributeValue>) -> anyhow::Result<ItemRecord> {
    let mut map = item_to_strings(item);
    let mut take = |name: &str| {
        map.remove(name)
            .ok_or_else(|| anyhow::anyhow!("DynamoDB item is missing attribute '{name}'"))
    };
    Ok(ItemRecord {
        partition_key: take(ATTR_PK)?,
        row_key: take(ATTR_SK)?,
        value: take(ATTR_VALUE)?,
        updated_at: take(ATTR_UPDATED_AT).unwrap_or_default(),
    })
}

fn record_to_item(record: ItemRecord) -> HashMap<String, AttributeValue> {
    let mut item = HashMap::new();
    item.insert(ATTR_PK.to_string(), AttributeValue::S(record.partition_key));
    item.insert(ATTR_SK.to_string(), AttributeValue::S(record.row_key));
    item.insert(ATTR_VALUE.to_string(), AttributeValue::S(record.value));
    item.insert(
        ATTR_UPDATED_AT.to_string(),
        AttributeValue::S(record.updated_at),
    );
    item
}

pub struct DynamoDbTableBackend {
    client: Client,
    table_name: String,
}

impl DynamoDbTableBackend {
    /// Build a client from the AWS provider chain plus any region/endpoint
    /// overrides in `config`.
    pub async fn new(config: &DynamoDbConfig, table_name: &str) -> anyhow::Result<Self> {
        let mut builder = aws_config::defaults(aws_config::BehaviorVersion::latest());

        if let Some(region) = &config.region {
            builder = builder.region(aws_config::Region::new(region.clone()));
        }

        if let Some(endpoint_url) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint_url);
        }

        let cfg = builder.load().await;
        Ok(Self::with_client(Client::new(&cfg), table_name))
    }

    /// Wrap an existing client.
    pub fn with_client(client: Client, table_name: &str) -> Self {
        Self {
            client,
            table_name: table_name.to_string(),
        }
    }

    /// Returns the table status, or `None` if the table does not exist.
    async fn table_status(&self) -> anyhow::Result<Option<TableStatus>> {
        match self
            .client
            .describe_table()
            .table_name(&self.table_name)
            .send()
            .await
        {
            Ok(resp) => Ok(Some(
                resp.table()
                    .and_then(|t| t.table_status().cloned())
                    .unwrap_or(TableStatus::Active),
            )),
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_resource_not_found_exception()) =>
            {
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn create_table(&self) -> anyhow::Result<()> {
        let key_schema = vec![
            KeySchemaElement::builder()
                .attribute_name(ATTR_PK)
                .key_type(KeyType::Hash)
                .build()?,
            KeySchemaElement::builder()
                .attribute_name(ATTR_SK)
                .key_type(KeyType::Range)
                .build()?,
        ];
        let attribute_definitions = vec![
            AttributeDefinition::builder()
                .attribute_name(ATTR_PK)
                .attribute_type(ScalarAttributeType::S)
                .build()?,
            AttributeDefinition::builder()
                .attribute_name(ATTR_SK)
                .attribute_type(ScalarAttributeType::S)
                .build()?,
        ];

        let result = self
            .client
            .create_table()
            .table_name(&self.table_name)
            .set_key_schema(Some(key_schema))
            .set_attribute_definitions(Some(attribute_definitions))
            .billing_mode(BillingMode::PayPerRequest)
            .send()
            .await;

        match result {
            Ok(_) => {
                info!("Created DynamoDB table {}", self.table_name);
                Ok(())
            }
            // Another process won the race; fall through to the ACTIVE wait.
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_resource_in_use_exception()) =>
            {
                debug!("DynamoDB table {} is being created elsewhere", self.table_name);
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

impl TableBackend for DynamoDbTableBackend {
    fn ensure_table(&self) -> TableFuture<'_, ()> {
        Box::pin(async move {
            if self.table_status().await?.is_none() {
                self.create_table().await?;
            }

            for _ in 0..ACTIVE_POLL_ATTEMPTS {
                if let Some(TableStatus::Active) = self.table_status().await? {
                    return Ok(());
                }
                tokio::time::sleep(ACTIVE_POLL_DELAY).await;
            }

            anyhow::bail!(
                "Timed out waiting for DynamoDB table {} to become active",
                self.table_name
            )
        })
    }

    fn upsert(&self, record: ItemRecord) -> TableFuture<'_, ()> {
        Box::pin(async move {
            self.client
                .put_item()
                .table_name(&self.table_name)
                .set_item(Some(record_to_item(record)))
                .send()
                .await?;
            Ok(())
        })
    }

    fn get(&self, partition_key: &str, row_key: &str) -> TableFuture<'_, Option<ItemRecord>> {
        let partition_key = partition_key.to_string();
        let row_key = row_key.to_string();
        Box::pin(async move {
            let result = self
                .client
                .get_item()
                .table_name(&self.table_name)
                .key(ATTR_PK, AttributeValue::S(partition_key))
                .key(ATTR_SK, AttributeValue::S(row_key))
                .consistent_read(true)
                .send()
                .await?;

            result.item().map(item_to_record).transpose()
        })
    }

    fn delete(&self, partition_key: &str, row_key: &str) -> TableFuture<'_, bool> {
        let partition_key = partition_key.to_string();
        let row_key = row_key.to_string();
        Box::pin(async move {
            let result = self
                .client
                .delete_item()
                .table_name(&self.table_name)
                .key(ATTR_PK, AttributeValue::S(partition_key))
                .key(ATTR_SK, AttributeValue::S(row_key))
                .return_values(aws_sdk_dynamodb::types::ReturnValue::AllOld)
                .send()
                .await?;
            Ok(result.attributes().is_some_and(|a| !a.is_empty()))
        })
    }

    fn list_partition(&self, partition_key: &str) -> TableFuture<'_, Vec<ItemRecord>> {
        let partition_key = partition_key.to_string();
        Box::pin(async move {
            let mut records = Vec::new();
            let mut exclusive_start_key: Option<HashMap<String, AttributeValue>> = None;

            loop {
                let result = self
                    .client
                    .query()
                    .table_name(&self.table_name)
                    .key_condition_expression("#pk = :pk")
                    .expression_attribute_names("#pk", ATTR_PK)
                    .expression_attribute_values(":pk", AttributeValue::S(partition_key.clone()))
                    .consistent_read(true)
                    .set_exclusive_start_key(exclusive_start_key.take())
                    .send()
                    .await?;

                for item in result.items() {
                    records.push(item_to_record(item)?);
                }

                match result.last_evaluated_key() {
                    Some(key) if !key.is_empty() => exclusive_start_key = Some(key.clone()),
                    _ => break,
                }
            }

            // Query returns range-key order already; sort defensively for
            // parity with the other backends.
            records.sort_by(|a, b| a.row_key.cmp(&b.row_key));
            Ok(records)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ItemRecord {
        ItemRecord {
            partition_key: "items".to_string(),
            row_key: "P001".to_string(),
            value: "Laptop".to_string(),
            updated_at: "2026-02-23T00:00:00.000Z".to_string(),
        }
    }

    #[test]
    fn test_record_item_mapping() {
        let item = record_to_item(sample());
        assert_eq!(item.len(), 4);
        assert_eq!(item.get(ATTR_PK), Some(&AttributeValue::S("items".into())));
        assert_eq!(item.get(ATTR_SK), Some(&AttributeValue::S("P001".into())));
        assert_eq!(item_to_record(&item).unwrap(), sample());
    }

    #[test]
    fn test_item_missing_value_is_error() {
        let mut item = record_to_item(sample());
        item.remove(ATTR_VALUE);
        assert!(item_to_record(&item).is_err());
    }

    #[test]
    fn test_item_missing_timestamp_defaults() {
        let mut item = record_to_item(sample());
        item.remove(ATTR_UPDATED_AT);
        let record = item_to_record(&item).unwrap();
        assert_eq!(record.updated_at, "");
        assert_eq!(record.value, "Laptop");
    }

    #[test]
    fn test_item_to_strings_ignores_non_scalar() {
        let mut item = HashMap::new();
        item.insert("s".to_string(), AttributeValue::S("x".into()));
        item.insert("n".to_string(), AttributeValue::N("42".into()));
        item.insert("b".to_string(), AttributeValue::Bool(true));
        let map = item_to_strings(&item);
        assert_eq!(map.len(), 2);
        assert_eq!(map["n"], "42");
    }
}
