use lambda_http::{http::StatusCode, Body, Error, Response};

use super::error::TodoError;
use super::model::{CreateTodoRequest, TaskPatch};
use super::service::TodoService;
use crate::responses::{empty_response, error_response, json_response};

/// GET /api/todos
pub async fn list_todos(service: &TodoService, owner_id: &str) -> Result<Response<Body>, Error> {
    match service.list_for_owner(owner_id).await {
        Ok(todos) => json_response(StatusCode::OK, &todos),
        Err(e) => todo_error_response(&e),
    }
}

/// POST /api/todos
pub async fn create_todo(
    service: &TodoService,
    owner_id: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let request = match CreateTodoRequest::decode(body) {
        Ok(req) => req,
        Err(e) => return todo_error_response(&e),
    };

    match service.create(request, owner_id).await {
        Ok(todo) => {
            tracing::info!(id = todo.id, "Created todo");
            json_response(StatusCode::CREATED, &todo)
        }
        Err(e) => todo_error_response(&e),
    }
}

/// PATCH /api/todos/{id}
pub async fn patch_todo(
    service: &TodoService,
    owner_id: &str,
    id: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let result = async {
        let id = parse_id(id)?;
        let patch = TaskPatch::decode(body)?;
        service.patch(id, owner_id, patch).await
    }
    .await;

    match result {
        Ok(todo) => json_response(StatusCode::OK, &todo),
        Err(e) => todo_error_response(&e),
    }
}

/// DELETE /api/todos/{id}
pub async fn delete_todo(
    service: &TodoService,
    owner_id: &str,
    id: &str,
) -> Result<Response<Body>, Error> {
    let result = async {
        let id = parse_id(id)?;
        service.delete(id, owner_id).await
    }
    .await;

    match result {
        Ok(()) => empty_response(StatusCode::NO_CONTENT),
        Err(e) => todo_error_response(&e),
    }
}

fn parse_id(raw: &str) -> Result<i64, TodoError> {
    raw.parse()
        .map_err(|_| TodoError::Validation(format!("Invalid todo id: {}", raw)))
}

/// Store failures are logged here and reported without detail
pub fn todo_error_response(err: &TodoError) -> Result<Response<Body>, Error> {
    match err {
        TodoError::Store(detail) => {
            tracing::error!("Todo store failure: {}", detail);
            error_response(err.status(), err.kind(), "Internal server error")
        }
        _ => error_response(err.status(), err.kind(), err.to_string()),
    }
}
