//! HTTP route handlers for the chat log API.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Json, Router, middleware};
use serde::{Deserialize, Serialize};

use crate::common::config::PaginationConfig;
use crate::common::identity::AuthUser;
use crate::storage::{ChatLogEntry, ChatLogRecord, Message, PageQuery};

use super::auth::{require_admin, require_verified_user};
use super::error::ApiError;
use super::extract::{ApiJson, ApiQuery};
use super::state::AppState;

/// Prefix shared by every chat log route.
pub const CHAT_LOGS_PATH: &str = "/api/chat_logs";

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    let collection = get(list_chat_logs).post(create_chat_log);
    let chat_logs = Router::new()
        .route(CHAT_LOGS_PATH, collection.clone())
        .route(&format!("{CHAT_LOGS_PATH}/"), collection)
        .route(
            &format!("{CHAT_LOGS_PATH}/admin"),
            get(admin_list_chat_logs).delete(admin_delete_chat_logs),
        )
        .route(
            &format!("{CHAT_LOGS_PATH}/{{conversation_id}}"),
            get(get_chat_log)
                .put(update_chat_log)
                .delete(delete_chat_log),
        )
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            require_verified_user,
        ));

    Router::new()
        .route("/health", get(health_check))
        .merge(chat_logs)
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "chatlog-service",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// List filter, read from the query string.
#[derive(Debug, Default, Deserialize)]
pub struct ChatLogFilter {
    /// Owner filter (admin listing and deletion only).
    pub user_id: Option<String>,
    /// Conversation filter.
    pub conversation_id: Option<String>,
    /// Model filter.
    pub model: Option<String>,
    /// Page size.
    pub limit: Option<u32>,
    /// Rows to skip.
    pub skip: Option<u32>,
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|v| !v.is_empty())
}

impl ChatLogFilter {
    fn user_id(&self) -> Option<&str> {
        non_empty(self.user_id.as_ref())
    }

    fn conversation_id(&self) -> Option<&str> {
        non_empty(self.conversation_id.as_ref())
    }

    fn page_query(&self, pagination: &PaginationConfig) -> Result<PageQuery, ApiError> {
        let limit = self.limit.unwrap_or(pagination.default_limit);
        if limit == 0 || limit > pagination.max_limit {
            return Err(ApiError::BadRequest(format!(
                "limit must be between 1 and {}",
                pagination.max_limit
            )));
        }
        let query = PageQuery::new(self.skip.unwrap_or(0), limit);
        Ok(match non_empty(self.model.as_ref()) {
            Some(model) => query.with_model(model),
            None => query,
        })
    }
}

/// A chat log as returned by every endpoint.
#[derive(Debug, Serialize)]
pub struct ChatLogResponse {
    /// Conversation id.
    pub conversation_id: String,
    /// Owning user id.
    pub user_id: String,
    /// Owner display name, or the configured placeholder.
    pub user_name: String,
    /// Model identifier.
    pub model: String,
    /// Exchanged turns.
    pub messages: Vec<Message>,
    /// Latest response.
    pub response: Option<String>,
    /// Creation time in epoch seconds.
    pub created_at: i64,
    /// Last update time in epoch seconds.
    pub updated_at: i64,
}

impl ChatLogResponse {
    /// Build a response from a stored record.
    #[must_use]
    pub fn new(record: ChatLogRecord, user_name: String) -> Self {
        Self {
            conversation_id: record.conversation_id,
            user_id: record.user_id,
            user_name,
            model: record.model,
            messages: record.messages,
            response: record.response,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// List envelope.
#[derive(Debug, Serialize)]
pub struct ChatLogsResponse {
    /// Page of logs.
    pub data: Vec<ChatLogResponse>,
    /// Page length, or the table total on the unfiltered admin listing.
    pub count: u64,
}

/// Create request. The owner is always the caller.
#[derive(Debug, Deserialize)]
pub struct CreateChatLogRequest {
    /// Conversation id.
    pub conversation_id: String,
    /// Model identifier.
    pub model: String,
    /// Exchanged turns.
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Generated response.
    #[serde(default)]
    pub response: Option<String>,
}

/// Full-overwrite update request.
#[derive(Debug, Deserialize)]
pub struct UpdateChatLogRequest {
    /// Model identifier.
    pub model: String,
    /// Exchanged turns.
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Generated response.
    #[serde(default)]
    pub response: Option<String>,
}

/// Admin bulk delete result.
#[derive(Debug, Serialize)]
pub struct AdminDeleteResponse {
    /// Always true when returned.
    pub success: bool,
    /// Rows removed.
    pub deleted: usize,
}

/// Fetch a record the caller owns (or any record, for admins).
async fn find_accessible(
    state: &AppState,
    user: &AuthUser,
    conversation_id: &str,
) -> Result<ChatLogRecord, ApiError> {
    let log = state
        .chat_logs
        .get_by_conversation_id(conversation_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("chat log not found".to_string()))?;

    if !user.can_access(&log.user_id) {
        tracing::debug!(user_id = %user.id, conversation_id, "chat log access denied");
        return Err(ApiError::Forbidden(
            "access denied to this chat log".to_string(),
        ));
    }
    Ok(log)
}

/// List the caller's logs, or one conversation's logs when filtered.
async fn list_chat_logs(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    ApiQuery(filter): ApiQuery<ChatLogFilter>,
) -> Result<Json<ChatLogsResponse>, ApiError> {
    let query = filter.page_query(&state.config.pagination)?;

    let logs = if let Some(conversation_id) = filter.conversation_id() {
        let mut logs = state
            .chat_logs
            .list_by_conversation_id(conversation_id, query)
            .await?;
        if !user.is_admin() {
            logs.retain(|log| log.user_id == user.id);
        }
        logs
    } else {
        state.chat_logs.list_by_user_id(&user.id, query).await?
    };

    let count = logs.len() as u64;
    Ok(Json(ChatLogsResponse {
        data: state.render(logs).await,
        count,
    }))
}

/// List logs across all users.
async fn admin_list_chat_logs(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    ApiQuery(filter): ApiQuery<ChatLogFilter>,
) -> Result<Json<ChatLogsResponse>, ApiError> {
    require_admin(&user)?;
    let query = filter.page_query(&state.config.pagination)?;

    let (logs, count) = if let Some(conversation_id) = filter.conversation_id() {
        let logs = state
            .chat_logs
            .list_by_conversation_id(conversation_id, query)
            .await?;
        let count = logs.len() as u64;
        (logs, count)
    } else if let Some(user_id) = filter.user_id() {
        let logs = state.chat_logs.list_by_user_id(user_id, query).await?;
        let count = logs.len() as u64;
        (logs, count)
    } else {
        let unfiltered = query.model.is_none();
        let logs = state.chat_logs.list_all(query).await?;
        let count = if unfiltered {
            state.chat_logs.count_all().await?
        } else {
            logs.len() as u64
        };
        (logs, count)
    };

    Ok(Json(ChatLogsResponse {
        data: state.render(logs).await,
        count,
    }))
}

/// Ingest a new log owned by the caller.
async fn create_chat_log(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    ApiJson(request): ApiJson<CreateChatLogRequest>,
) -> Result<(StatusCode, Json<ChatLogResponse>), ApiError> {
    let entry = ChatLogEntry {
        conversation_id: request.conversation_id,
        user_id: user.id,
        model: request.model,
        messages: request.messages,
        response: request.response,
    };
    let log = state.chat_logs.create(entry).await?;
    tracing::info!(conversation_id = %log.conversation_id, user_id = %log.user_id, "chat log created");

    Ok((StatusCode::CREATED, Json(state.render_one(log).await)))
}

/// Return one log.
async fn get_chat_log(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(conversation_id): Path<String>,
) -> Result<Json<ChatLogResponse>, ApiError> {
    let log = find_accessible(&state, &user, &conversation_id).await?;
    Ok(Json(state.render_one(log).await))
}

/// Overwrite a log's model, messages and response. The owner is kept.
async fn update_chat_log(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(conversation_id): Path<String>,
    ApiJson(request): ApiJson<UpdateChatLogRequest>,
) -> Result<Json<ChatLogResponse>, ApiError> {
    let existing = find_accessible(&state, &user, &conversation_id).await?;
    let entry = ChatLogEntry {
        conversation_id,
        user_id: existing.user_id,
        model: request.model,
        messages: request.messages,
        response: request.response,
    };

    let log = state
        .chat_logs
        .update(entry)
        .await?
        .ok_or_else(|| ApiError::NotFound("chat log not found".to_string()))?;
    Ok(Json(state.render_one(log).await))
}

/// Delete one log.
async fn delete_chat_log(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(conversation_id): Path<String>,
) -> Result<Json<bool>, ApiError> {
    find_accessible(&state, &user, &conversation_id).await?;

    if state
        .chat_logs
        .delete_by_conversation_id(&conversation_id)
        .await?
    {
        tracing::info!(conversation_id = %conversation_id, user_id = %user.id, "chat log deleted");
        Ok(Json(true))
    } else {
        Err(ApiError::NotFound("chat log not found".to_string()))
    }
}

/// Delete by conversation id, else by user id, else everything.
async fn admin_delete_chat_logs(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    ApiQuery(filter): ApiQuery<ChatLogFilter>,
) -> Result<Json<AdminDeleteResponse>, ApiError> {
    require_admin(&user)?;

    let deleted = if let Some(conversation_id) = filter.conversation_id() {
        usize::from(
            state
                .chat_logs
                .delete_by_conversation_id(conversation_id)
                .await?,
        )
    } else if let Some(user_id) = filter.user_id() {
        state.chat_logs.delete_by_user_id(user_id).await?
    } else {
        state.chat_logs.delete_all().await?
    };

    tracing::info!(
        admin_id = %user.id,
        conversation_id = ?filter.conversation_id(),
        user_id = ?filter.user_id(),
        deleted,
        "admin chat log deletion"
    );

    Ok(Json(AdminDeleteResponse {
        success: true,
        deleted,
    }))
}
