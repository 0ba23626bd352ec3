use lambda_http::{
    http::{Method, StatusCode},
    Body, Error, Request, Response,
};
use stack_atoms::responses::{json_response, method_not_allowed, not_found};
use stack_atoms::todos;
use stack_shared::{auth::SecurityPolicy, cors::CorsPolicy, AppState};
use std::sync::Arc;

/// Todo routes, resolved before the owner is looked up
enum Route<'a> {
    List,
    Create,
    Patch(&'a str),
    Delete(&'a str),
}

fn finalize_response(
    resp: Result<Response<Body>, Error>,
    cors: &CorsPolicy,
    request_origin: Option<&str>,
) -> Result<Response<Body>, Error> {
    resp.map(|r| cors.with_cors_headers(r, request_origin))
}

/// Main Lambda handler - CORS, then the bearer-token gate, then the todo routes
pub async fn function_handler(event: Request, state: Arc<AppState>) -> Result<Response<Body>, Error> {
    let method = event.method();
    let path = event.uri().path();
    let headers = event.headers();
    let request_origin = headers.get("Origin").and_then(|v| v.to_str().ok());
    tracing::info!("🚀 Todo API invoked - Method: {} Path: {}", method, path);

    // Handle CORS preflight before any auth
    if CorsPolicy::is_preflight(method, request_origin) {
        return state.cors.preflight_response(request_origin);
    }
    if state.cors.rejects(request_origin) {
        return state.cors.rejected();
    }

    // Public routes (no token)
    if !SecurityPolicy::requires_authentication(path) {
        let resp = match (method, path) {
            (&Method::GET, "/") => json_response(StatusCode::OK, &serde_json::json!({"status": "ok"})),
            _ => not_found(),
        };
        return finalize_response(resp, &state.cors, request_origin);
    }

    // Everything under /api requires a valid bearer token
    let auth_ctx = match state.security.authenticate_request(headers).await {
        Ok(ctx) => ctx,
        Err(resp) => return Ok(state.cors.with_cors_headers(resp, request_origin)),
    };

    let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let route = match (method, parts.as_slice()) {
        // GET /api/todos - list caller's todos
        (&Method::GET, ["api", "todos"]) => Route::List,
        // POST /api/todos - create todo
        (&Method::POST, ["api", "todos"]) => Route::Create,
        // PATCH /api/todos/{id} - partial update
        (&Method::PATCH, ["api", "todos", id]) => Route::Patch(*id),
        // DELETE /api/todos/{id} - delete (idempotent)
        (&Method::DELETE, ["api", "todos", id]) => Route::Delete(*id),
        (_, ["api", "todos"]) | (_, ["api", "todos", _]) => {
            return finalize_response(method_not_allowed(), &state.cors, request_origin);
        }
        _ => {
            tracing::warn!("⚠️ No route matched - Method: {} Path: {}", method, path);
            return finalize_response(not_found(), &state.cors, request_origin);
        }
    };

    let owner_id = match state.security.caller_identity(&auth_ctx, headers) {
        Ok(owner_id) => owner_id,
        Err(e) => {
            return finalize_response(todos::todo_error_response(&e), &state.cors, request_origin)
        }
    };

    let body = event.body();
    let resp = match route {
        Route::List => todos::list_todos(&state.todos, &owner_id).await,
        Route::Create => todos::create_todo(&state.todos, &owner_id, body).await,
        Route::Patch(id) => todos::patch_todo(&state.todos, &owner_id, id, body).await,
        Route::Delete(id) => todos::delete_todo(&state.todos, &owner_id, id).await,
    };

    finalize_response(resp, &state.cors, request_origin)
}
