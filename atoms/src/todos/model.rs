use serde::{Deserialize, Serialize};

use super::error::TodoError;

/// Todo row as held by the store - never sent to clients directly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Todo {
    pub id: i64,
    pub description: String,
    pub completed: bool,
    /// Subject of the caller that created the row; set once
    pub owner_id: String,
}

/// Todo that has not been given an id by the store yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTodo {
    pub description: String,
    pub completed: bool,
    pub owner_id: String,
}

impl NewTodo {
    pub fn for_owner(description: String, owner_id: &str) -> Self {
        Self {
            description,
            completed: false,
            owner_id: owner_id.to_string(),
        }
    }

    pub fn with_id(self, id: i64) -> Todo {
        Todo {
            id,
            description: self.description,
            completed: self.completed,
            owner_id: self.owner_id,
        }
    }
}

/// Outward representation - the FE expects `task` / `isCompleted`
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TodoDto {
    pub id: i64,
    pub task: String,
    #[serde(rename = "isCompleted")]
    pub is_completed: bool,
}

impl From<Todo> for TodoDto {
    fn from(todo: Todo) -> Self {
        Self {
            id: todo.id,
            task: todo.description,
            is_completed: todo.completed,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct CreateTodoRequest {
    pub task: String,
}

/// Partial update; absent (or null) fields are left untouched
#[derive(Debug, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct TaskPatch {
    #[serde(default)]
    pub task: Option<String>,
    #[serde(default, rename = "isCompleted")]
    pub is_completed: Option<bool>,
}

impl CreateTodoRequest {
    /// Bind a raw request body to the create schema
    pub fn decode(body: &[u8]) -> Result<Self, TodoError> {
        decode_json(body)
    }
}

impl TaskPatch {
    /// Bind a raw request body to the patch schema
    pub fn decode(body: &[u8]) -> Result<Self, TodoError> {
        decode_json(body)
    }

    pub fn apply(self, todo: &mut Todo) {
        if let Some(task) = self.task {
            todo.description = task;
        }
        if let Some(is_completed) = self.is_completed {
            todo.completed = is_completed;
        }
    }
}

fn decode_json<T: for<'de> Deserialize<'de>>(body: &[u8]) -> Result<T, TodoError> {
    serde_json::from_slice(body)
        .map_err(|e| TodoError::Validation(format!("Invalid request body: {}", e)))
}
