
// Re-export model types, the store seam and service/controller functions
pub mod error;
pub mod model;
pub mod repository;
pub mod memory;
pub mod service;
pub mod http;

pub use error::TodoError;
pub use model::{Todo, NewTodo, TodoDto, CreateTodoRequest, TaskPatch};
pub use repository::{TodoRepository, DynamoTodoRepository};
pub use memory::InMemoryTodoRepository;
pub use service::TodoService;
pub use http::*;
