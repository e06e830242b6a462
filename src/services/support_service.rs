//! Support chat between users and staff.
//!
//! Chat owners see their own threads; admins see and answer all of them.

use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    middleware::auth::AuthContext,
    models::support::{
        ChatMessage, ChatStatus, ListChatsQuery, OpenChatRequest, SupportChat,
    },
    validation,
};

const MAX_MESSAGE_LEN: usize = 2_000;

pub async fn open_chat(
    pool: &DbPool,
    auth: &AuthContext,
    request: OpenChatRequest,
) -> Result<SupportChat, AppError> {
    let subject = validation::require_text(&request.subject, "subject", 120)?;
    let message = validation::require_text(&request.message, "message", MAX_MESSAGE_LEN)?;

    let mut tx = pool.begin().await?;
    let chat = sqlx::query_as::<_, SupportChat>(
        "INSERT INTO support_chats (user_id, subject) VALUES ($1, $2) RETURNING *",
    )
    .bind(auth.user_id)
    .bind(subject)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("INSERT INTO chat_messages (chat_id, sender_id, body, from_staff) VALUES ($1, $2, $3, $4)")
        .bind(chat.id)
        .bind(auth.user_id)
        .bind(message)
        .bind(false)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    tracing::info!(chat_id = %chat.id, user_id = %auth.user_id, "support chat opened");
    Ok(chat)
}

pub async fn list_chats(
    pool: &DbPool,
    auth: &AuthContext,
    query: &ListChatsQuery,
) -> Result<Vec<SupportChat>, AppError> {
    let chats = sqlx::query_as::<_, SupportChat>(
        r#"
        SELECT * FROM support_chats
        WHERE ($1 OR user_id = $2) AND ($3::TEXT IS NULL OR status = $3)
        ORDER BY updated_at DESC
        LIMIT 200
        "#,
    )
    .bind(auth.is_admin())
    .bind(auth.user_id)
    .bind(query.status)
    .fetch_all(pool)
    .await?;
    Ok(chats)
}

/// A chat the caller owns, or any chat for admins.
pub async fn get_chat(pool: &DbPool, auth: &AuthContext, chat_id: Uuid) -> Result<SupportChat, AppError> {
    sqlx::query_as::<_, SupportChat>(
        "SELECT * FROM support_chats WHERE id = $1 AND ($2 OR user_id = $3)",
    )
    .bind(chat_id)
    .bind(auth.is_admin())
    .bind(auth.user_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Chat"))
}

pub async fn list_messages(
    pool: &DbPool,
    auth: &AuthContext,
    chat_id: Uuid,
) -> Result<Vec<ChatMessage>, AppError> {
    let chat = get_chat(pool, auth, chat_id).await?;
    let messages = sqlx::query_as::<_, ChatMessage>(
        "SELECT * FROM chat_messages WHERE chat_id = $1 ORDER BY created_at",
    )
    .bind(chat.id)
    .fetch_all(pool)
    .await?;
    Ok(messages)
}

pub async fn post_message(
    pool: &DbPool,
    auth: &AuthContext,
    chat_id: Uuid,
    body: &str,
) -> Result<ChatMessage, AppError> {
    let chat = get_chat(pool, auth, chat_id).await?;
    if chat.status == ChatStatus::Closed {
        return Err(AppError::Conflict("This chat is closed".to_string()));
    }
    let body = validation::require_text(body, "body", MAX_MESSAGE_LEN)?;

    let mut tx = pool.begin().await?;
    let message = sqlx::query_as::<_, ChatMessage>(
        r#"
        INSERT INTO chat_messages (chat_id, sender_id, body, from_staff)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(chat.id)
    .bind(auth.user_id)
    .bind(body)
    .bind(auth.is_admin() && chat.user_id != auth.user_id)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("UPDATE support_chats SET updated_at = NOW() WHERE id = $1")
        .bind(chat.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(message)
}

pub async fn close_chat(pool: &DbPool, auth: &AuthContext, chat_id: Uuid) -> Result<SupportChat, AppError> {
    let chat = get_chat(pool, auth, chat_id).await?;
    let chat = sqlx::query_as::<_, SupportChat>(
        "UPDATE support_chats SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(chat.id)
    .bind(ChatStatus::Closed)
    .fetch_one(pool)
    .await?;

    tracing::info!(chat_id = %chat.id, closed_by = %auth.user_id, "support chat closed");
    Ok(chat)
}
