use async_trait::async_trait;
use aws_sdk_dynamodb::operation::put_item::PutItemError;
use aws_sdk_dynamodb::operation::update_item::UpdateItemOutput;
use aws_sdk_dynamodb::types::{AttributeValue, ReturnValue};
use aws_sdk_dynamodb::Client as DynamoClient;
use std::collections::HashMap;
use std::fmt::Display;

use super::error::TodoError;
use super::model::{NewTodo, Todo};

const COUNTER_PK: &str = "COUNTER";
const TODO_SK: &str = "TODO";

/// Data access for todo rows. Implementations are shared across requests.
#[async_trait]
pub trait TodoRepository: Send + Sync {
    /// All rows owned by `owner_id`, ascending by id
    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Todo>, TodoError>;

    /// Insert a row; the store assigns the id
    async fn create(&self, todo: NewTodo) -> Result<Todo, TodoError>;

    /// Overwrite an existing row; a row that is gone is `NotFound`, never re-created
    async fn save(&self, todo: Todo) -> Result<Todo, TodoError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<Todo>, TodoError>;

    /// Missing ids are not an error
    async fn delete_by_id(&self, id: i64) -> Result<(), TodoError>;
}

/// Single-table DynamoDB store.
///
/// Rows live at `PK=TODO#{id}, SK=TODO` and are projected into the owner
/// index as `GSI1PK=USER#{owner}, GSI1SK=TODO#{id:020}` so owner queries come
/// back in id order. Ids come from an atomic counter at `PK=COUNTER, SK=TODO`.
#[derive(Debug, Clone)]
pub struct DynamoTodoRepository {
    client: DynamoClient,
    table_name: String,
    owner_index: String,
}

impl DynamoTodoRepository {
    pub fn new(client: DynamoClient, table_name: &str, owner_index: &str) -> Self {
        Self {
            client,
            table_name: table_name.to_string(),
            owner_index: owner_index.to_string(),
        }
    }

    async fn next_id(&self) -> Result<i64, TodoError> {
        let result = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .key("PK", AttributeValue::S(COUNTER_PK.to_string()))
            .key("SK", AttributeValue::S(TODO_SK.to_string()))
            .update_expression("ADD next_id :one")
            .expression_attribute_values(":one", AttributeValue::N("1".to_string()))
            .return_values(ReturnValue::UpdatedNew)
            .send()
            .await
            .map_err(|e| TodoError::Store(format!("DynamoDB update_item error: {}", e)))?;

        counter_value(&result)
    }
}

#[async_trait]
impl TodoRepository for DynamoTodoRepository {
    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Todo>, TodoError> {
        let mut todos = Vec::new();
        let mut start_key: Option<HashMap<String, AttributeValue>> = None;

        loop {
            let result = self
                .client
                .query()
                .table_name(&self.table_name)
                .index_name(&self.owner_index)
                .key_condition_expression("GSI1PK = :pk AND begins_with(GSI1SK, :sk_prefix)")
                .expression_attribute_values(":pk", AttributeValue::S(owner_pk(owner_id)))
                .expression_attribute_values(":sk_prefix", AttributeValue::S("TODO#".to_string()))
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(|e| TodoError::Store(format!("DynamoDB query error: {}", e)))?;

            todos.extend(result.items().iter().filter_map(item_to_todo));

            start_key = next_page(result.last_evaluated_key());
            if start_key.is_none() {
                break;
            }
        }

        Ok(todos)
    }

    async fn create(&self, todo: NewTodo) -> Result<Todo, TodoError> {
        let id = self.next_id().await?;
        let todo = todo.with_id(id);
        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(todo_to_item(&todo)))
            .send()
            .await
            .map_err(|e| TodoError::Store(format!("DynamoDB put_item error: {}", e)))?;
        tracing::debug!(id, "Inserted todo row");
        Ok(todo)
    }

    async fn save(&self, todo: Todo) -> Result<Todo, TodoError> {
        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(todo_to_item(&todo)))
            .condition_expression("attribute_exists(PK)")
            .send()
            .await
            .map_err(|e| overwrite_error(todo.id, e.as_service_error(), &e))?;
        Ok(todo)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Todo>, TodoError> {
        let result = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("PK", AttributeValue::S(todo_pk(id)))
            .key("SK", AttributeValue::S(TODO_SK.to_string()))
            .send()
            .await
            .map_err(|e| TodoError::Store(format!("DynamoDB get_item error: {}", e)))?;

        Ok(result.item().and_then(item_to_todo))
    }

    async fn delete_by_id(&self, id: i64) -> Result<(), TodoError> {
        self.client
            .delete_item()
            .table_name(&self.table_name)
            .key("PK", AttributeValue::S(todo_pk(id)))
            .key("SK", AttributeValue::S(TODO_SK.to_string()))
            .send()
            .await
            .map_err(|e| TodoError::Store(format!("DynamoDB delete_item error: {}", e)))?;

        Ok(())
    }
}

fn todo_pk(id: i64) -> String {
    format!("TODO#{}", id)
}

fn owner_pk(owner_id: &str) -> String {
    format!("USER#{}", owner_id)
}

/// The counter value written by `ADD next_id :one`
fn counter_value(output: &UpdateItemOutput) -> Result<i64, TodoError> {
    output
        .attributes()
        .and_then(|attrs| attrs.get("next_id"))
        .and_then(|v| v.as_n().ok())
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| TodoError::Store("DynamoDB counter returned no next_id".to_string()))
}

/// DynamoDB signals the last page with a missing or empty `LastEvaluatedKey`
fn next_page(
    last_evaluated_key: Option<&HashMap<String, AttributeValue>>,
) -> Option<HashMap<String, AttributeValue>> {
    last_evaluated_key.filter(|key| !key.is_empty()).cloned()
}

/// A failed `attribute_exists(PK)` check means the row was deleted underneath us
fn overwrite_error(id: i64, service_error: Option<&PutItemError>, detail: &dyn Display) -> TodoError {
    match service_error {
        Some(PutItemError::ConditionalCheckFailedException(_)) => {
            tracing::debug!(id, "Todo row vanished before overwrite");
            TodoError::NotFound(id)
        }
        _ => TodoError::Store(format!("DynamoDB put_item error: {}", detail)),
    }
}

pub(crate) fn todo_to_item(todo: &Todo) -> HashMap<String, AttributeValue> {
    HashMap::from([
        ("PK".to_string(), AttributeValue::S(todo_pk(todo.id))),
        ("SK".to_string(), AttributeValue::S(TODO_SK.to_string())),
        ("GSI1PK".to_string(), AttributeValue::S(owner_pk(&todo.owner_id))),
        ("GSI1SK".to_string(), AttributeValue::S(format!("TODO#{:020}", todo.id))),
        ("id".to_string(), AttributeValue::N(todo.id.to_string())),
        ("task".to_string(), AttributeValue::S(todo.description.clone())),
        ("is_completed".to_string(), AttributeValue::Bool(todo.completed)),
        ("user_id".to_string(), AttributeValue::S(todo.owner_id.clone())),
    ])
}

/// Rows without a parseable id are skipped; other attributes fall back to defaults
pub(crate) fn item_to_todo(item: &HashMap<String, AttributeValue>) -> Option<Todo> {
    let id = item
        .get("id")
        .and_then(|v| v.as_n().ok())
        .and_then(|n| n.parse().ok())?;

    Some(Todo {
        id,
        description: item
            .get("task")
            .and_then(|v| v.as_s().ok())
            .map(|s| s.to_string())
            .unwrap_or_default(),
        completed: item
            .get("is_completed")
            .and_then(|v| v.as_bool().ok())
            .copied()
            .unwrap_or(false),
        owner_id: item
            .get("user_id")
            .and_then(|v| v.as_s().ok())
            .map(|s| s.to_string())
            .unwrap_or_default(),
    })
}
