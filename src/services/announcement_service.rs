use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    middleware::auth::AuthContext,
    models::{
        announcement::{Announcement, CreateAnnouncementRequest},
        user::Role,
    },
    validation,
};

pub async fn create(
    pool: &DbPool,
    auth: &AuthContext,
    request: CreateAnnouncementRequest,
) -> Result<Announcement, AppError> {
    let title = validation::require_text(&request.title, "title", 120)?;
    let body = validation::require_text(&request.body, "body", 4_000)?;

    let announcement = sqlx::query_as::<_, Announcement>(
        r#"
        INSERT INTO announcements (title, body, audience, created_by)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(title)
    .bind(body)
    .bind(request.audience.as_str())
    .bind(auth.user_id)
    .fetch_one(pool)
    .await?;

    tracing::info!(announcement_id = %announcement.id, audience = %announcement.audience, "announcement created");
    Ok(announcement)
}

pub async fn set_active(pool: &DbPool, id: Uuid, is_active: bool) -> Result<Announcement, AppError> {
    sqlx::query_as::<_, Announcement>(
        "UPDATE announcements SET is_active = $2 WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .bind(is_active)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Announcement"))
}

pub async fn delete(pool: &DbPool, id: Uuid) -> Result<(), AppError> {
    let result = sqlx::query("DELETE FROM announcements WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Announcement"));
    }
    Ok(())
}

/// Active announcements addressed to everyone or to `role`, newest first.
pub async fn list_active(pool: &DbPool, role: Role) -> Result<Vec<Announcement>, AppError> {
    let announcements = sqlx::query_as::<_, Announcement>(
        r#"
        SELECT * FROM announcements
        WHERE is_active AND audience IN ('all', $1)
        ORDER BY created_at DESC
        "#,
    )
    .bind(role)
    .fetch_all(pool)
    .await?;
    Ok(announcements)
}

pub async fn list_all(pool: &DbPool) -> Result<Vec<Announcement>, AppError> {
    let announcements =
        sqlx::query_as::<_, Announcement>("SELECT * FROM announcements ORDER BY created_at DESC")
            .fetch_all(pool)
            .await?;
    Ok(announcements)
}
