//! Support chat endpoints. Owners see their own chats, admins see all.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use uuid::Uuid;

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::support::{
        ChatMessage, ListChatsQuery, OpenChatRequest, PostMessageRequest, SupportChat,
    },
    services::support_service,
    state::AppState,
};

/// POST /api/v1/support/chats
///
/// ```json
/// { "subject": "Bundle not received", "message": "Order DB2501014F3A9C0B12 shows delivered but..." }
/// ```
pub async fn open_chat(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<OpenChatRequest>,
) -> Result<(StatusCode, Json<SupportChat>), AppError> {
    let chat = support_service::open_chat(&state.pool, &auth, request).await?;
    Ok((StatusCode::CREATED, Json(chat)))
}

pub async fn list_chats(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListChatsQuery>,
) -> Result<Json<Vec<SupportChat>>, AppError> {
    let chats = support_service::list_chats(&state.pool, &auth, &query).await?;
    Ok(Json(chats))
}

pub async fn list_messages(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(chat_id): Path<Uuid>,
) -> Result<Json<Vec<ChatMessage>>, AppError> {
    let messages = support_service::list_messages(&state.pool, &auth, chat_id).await?;
    Ok(Json(messages))
}

/// POST /api/v1/support/chats/{id}/messages
///
/// Closed chats reject new messages with 409.
pub async fn post_message(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(chat_id): Path<Uuid>,
    Json(request): Json<PostMessageRequest>,
) -> Result<(StatusCode, Json<ChatMessage>), AppError> {
    let message = support_service::post_message(&state.pool, &auth, chat_id, &request.body).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn close_chat(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(chat_id): Path<Uuid>,
) -> Result<Json<SupportChat>, AppError> {
    let chat = support_service::close_chat(&state.pool, &auth, chat_id).await?;
    Ok(Json(chat))
}
