use std::sync::Arc;

use super::error::TodoError;
use super::model::{CreateTodoRequest, NewTodo, TaskPatch, TodoDto};
use super::repository::TodoRepository;

/// Maps between API representations and stored rows (pure domain logic, no HTTP)
#[derive(Clone)]
pub struct TodoService {
    repository: Arc<dyn TodoRepository>,
}

impl std::fmt::Debug for TodoService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TodoService").finish_non_exhaustive()
    }
}

impl TodoService {
    pub fn new(repository: Arc<dyn TodoRepository>) -> Self {
        Self { repository }
    }

    /// All todos for the given owner, ascending by id
    pub async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<TodoDto>, TodoError> {
        let todos = self.repository.list_by_owner(owner_id).await?;
        Ok(todos.into_iter().map(TodoDto::from).collect())
    }

    /// New todos always start out not completed
    pub async fn create(
        &self,
        request: CreateTodoRequest,
        owner_id: &str,
    ) -> Result<TodoDto, TodoError> {
        let saved = self
            .repository
            .create(NewTodo::for_owner(request.task, owner_id))
            .await?;
        Ok(saved.into())
    }

    /// Apply a partial update. Rows owned by someone else are reported as missing.
    pub async fn patch(
        &self,
        id: i64,
        owner_id: &str,
        patch: TaskPatch,
    ) -> Result<TodoDto, TodoError> {
        let mut todo = self
            .repository
            .find_by_id(id)
            .await?
            .filter(|todo| todo.owner_id == owner_id)
            .ok_or(TodoError::NotFound(id))?;

        patch.apply(&mut todo);

        let updated = self.repository.save(todo).await?;
        Ok(updated.into())
    }

    /// Succeeds whether or not the row existed
    pub async fn delete(&self, id: i64, owner_id: &str) -> Result<(), TodoError> {
        match self.repository.find_by_id(id).await? {
            Some(todo) if todo.owner_id == owner_id => self.repository.delete_by_id(id).await,
            Some(_) => {
                tracing::warn!(id, "Ignoring delete of a todo owned by another user");
                Ok(())
            }
            None => Ok(()),
        }
    }
}
