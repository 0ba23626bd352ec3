use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::error::TodoError;
use super::model::{NewTodo, Todo};
use super::repository::TodoRepository;

#[derive(Debug)]
struct Rows {
    next_id: i64,
    by_id: BTreeMap<i64, Todo>,
}

/// In-process store for local runs and tests; ids start at 1
#[derive(Debug)]
pub struct InMemoryTodoRepository {
    rows: RwLock<Rows>,
}

impl Default for InMemoryTodoRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTodoRepository {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(Rows {
                next_id: 1,
                by_id: BTreeMap::new(),
            }),
        }
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl TodoRepository for InMemoryTodoRepository {
    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Todo>, TodoError> {
        let rows = self.rows.read().await;
        Ok(rows
            .by_id
            .values()
            .filter(|todo| todo.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn create(&self, todo: NewTodo) -> Result<Todo, TodoError> {
        let mut rows = self.rows.write().await;
        let id = rows.next_id;
        rows.next_id += 1;
        let todo = todo.with_id(id);
        rows.by_id.insert(id, todo.clone());
        Ok(todo)
    }

    async fn save(&self, todo: Todo) -> Result<Todo, TodoError> {
        let mut rows = self.rows.write().await;
        match rows.by_id.get_mut(&todo.id) {
            Some(row) => {
                *row = todo.clone();
                Ok(todo)
            }
            None => Err(TodoError::NotFound(todo.id)),
        }
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Todo>, TodoError> {
        Ok(self.rows.read().await.by_id.get(&id).cloned())
    }

    async fn delete_by_id(&self, id: i64) -> Result<(), TodoError> {
        self.rows.write().await.by_id.remove(&id);
        Ok(())
    }
}
