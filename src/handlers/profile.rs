// src/handlers/profile.rs

use axum::{Extension, Json, extract::State, response::IntoResponse};
use sqlx::SqlitePool;

use crate::{
    error::AppError,
    models::user::{AuthUser, ProfileResponse},
};

/// Get current user's profile and statistics.
pub async fn get_profile(
    State(pool): State<SqlitePool>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, AppError> {
    let profile = sqlx::query_as::<_, ProfileResponse>(
        r#"
        SELECT
            u.id, u.username, u.email, u.created_at,
            (SELECT COUNT(*) FROM comments WHERE user_id = u.id) AS comments_count,
            (SELECT COALESCE(SUM(upvote_count), 0) FROM comments WHERE user_id = u.id) AS upvotes_received
        FROM users u
        WHERE u.id = ?
        "#,
    )
    .bind(user.id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound("User not found".to_string()))?;

    Ok(Json(profile))
}
