pub mod auth;
pub mod config;
pub mod cors;

use stack_atoms::todos::{DynamoTodoRepository, InMemoryTodoRepository, TodoRepository, TodoService};
use std::sync::Arc;

use auth::{SecurityPolicy, TokenVerifier};
use config::{Config, StoreBackend};
use cors::CorsPolicy;

/// Everything a request needs, built once per cold start
#[derive(Debug)]
pub struct AppState {
    pub config: Config,
    pub todos: TodoService,
    pub security: SecurityPolicy,
    pub cors: CorsPolicy,
}

impl AppState {
    /// Wire store -> repository -> service, then the request gate
    pub async fn from_config(config: Config) -> Self {
        let repository: Arc<dyn TodoRepository> = match config.store {
            StoreBackend::DynamoDb => {
                let aws_config = aws_config::load_from_env().await;
                let client = aws_sdk_dynamodb::Client::new(&aws_config);
                Arc::new(DynamoTodoRepository::new(
                    client,
                    &config.table_name,
                    &config.owner_index,
                ))
            }
            StoreBackend::Memory => {
                tracing::warn!("Using in-memory todo store; data is lost on restart");
                Arc::new(InMemoryTodoRepository::new())
            }
        };

        Self::with_repository(config, repository)
    }

    pub fn with_repository(config: Config, repository: Arc<dyn TodoRepository>) -> Self {
        let todos = TodoService::new(repository);
        let security = SecurityPolicy::new(
            TokenVerifier::from_config(&config.jwt),
            config.identity_source,
        );
        let cors = CorsPolicy::new(&config.cors_allowed_origin);

        Self {
            config,
            todos,
            security,
            cors,
        }
    }
}
