//! Support chat models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

text_enum! {
    pub enum ChatStatus {
        Open => "open",
        Closed => "closed",
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct SupportChat {
    pub id: Uuid,
    pub user_id: Uuid,
    pub subject: String,
    pub status: ChatStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub sender_id: Uuid,
    pub body: String,
    /// Sent by an admin rather than the chat owner.
    pub from_staff: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct OpenChatRequest {
    pub subject: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct PostMessageRequest {
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct ListChatsQuery {
    pub status: Option<ChatStatus>,
}
