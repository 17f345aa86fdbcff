// src/handlers/comment.rs

use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::{
    error::{AppError, is_foreign_key_violation},
    extractors::{ApiPath, ValidatedJson},
    models::{
        comment::{
            Comment, CommentForest, CommentNode, CreateCommentRequest, CreatedComment, ParentInfo,
            PathEntry, Upvote, UpvoteResponse,
        },
        user::AuthUser,
    },
};

const SELECT_COMMENT: &str = r#"
    SELECT id, user_id, username, text, parent_id, is_reply, upvote_count, created_at
    FROM comments
    WHERE id = ?
"#;

async fn fetch_comment(pool: &SqlitePool, id: i64) -> Result<Option<Comment>, AppError> {
    Ok(sqlx::query_as::<_, Comment>(SELECT_COMMENT)
        .bind(id)
        .fetch_optional(pool)
        .await?)
}

async fn find_comment(pool: &SqlitePool, id: i64) -> Result<Comment, AppError> {
    fetch_comment(pool, id)
        .await?
        .ok_or(AppError::NotFound("Comment not found".to_string()))
}

/// All comments below `root_id`, at any depth, in no particular order.
async fn load_descendants(pool: &SqlitePool, root_id: i64) -> Result<Vec<Comment>, AppError> {
    let rows = sqlx::query_as::<_, Comment>(
        r#"
        WITH RECURSIVE subtree(id) AS (
            SELECT id FROM comments WHERE parent_id = ?
            UNION
            SELECT c.id FROM comments c JOIN subtree s ON c.parent_id = s.id
        )
        SELECT c.id, c.user_id, c.username, c.text, c.parent_id, c.is_reply,
               c.upvote_count, c.created_at
        FROM comments c
        JOIN subtree s ON c.id = s.id
        "#,
    )
    .bind(root_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Upvote rows for the given comments, in the order they were cast.
async fn load_upvotes(pool: &SqlitePool, comment_ids: &[i64]) -> Result<Vec<Upvote>, AppError> {
    if comment_ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut builder: QueryBuilder<Sqlite> =
        QueryBuilder::new("SELECT comment_id, user_id FROM comment_upvotes WHERE comment_id IN (");
    let mut ids = builder.separated(", ");
    for id in comment_ids {
        ids.push_bind(*id);
    }
    ids.push_unseparated(") ORDER BY created_at, user_id");

    Ok(builder.build_query_as::<Upvote>().fetch_all(pool).await?)
}

/// List every top-level comment (newest first) with its full reply tree.
pub async fn list_comments(
    State(pool): State<SqlitePool>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, AppError> {
    let comments = sqlx::query_as::<_, Comment>(
        r#"
        SELECT id, user_id, username, text, parent_id, is_reply, upvote_count, created_at
        FROM comments
        "#,
    )
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to list comments: {:?}", e);
        AppError::from(e)
    })?;

    let upvotes = sqlx::query_as::<_, Upvote>(
        "SELECT comment_id, user_id FROM comment_upvotes ORDER BY created_at, user_id",
    )
    .fetch_all(&pool)
    .await?;

    tracing::debug!(count = comments.len(), "assembling comment forest");

    Ok(Json(CommentForest::new(comments, upvotes, user.id).top_level()))
}

/// Get a single comment, replies attached.
pub async fn get_comment(
    State(pool): State<SqlitePool>,
    Extension(user): Extension<AuthUser>,
    ApiPath(id): ApiPath<i64>,
) -> Result<impl IntoResponse, AppError> {
    let root = find_comment(&pool, id).await?;
    let descendants = load_descendants(&pool, id).await?;

    let ids: Vec<i64> = std::iter::once(root.id)
        .chain(descendants.iter().map(|c| c.id))
        .collect();
    let upvotes = load_upvotes(&pool, &ids).await?;

    Ok(Json(
        CommentForest::new(descendants, upvotes, user.id).subtree_of(root),
    ))
}

/// Get the replies of a comment (oldest first), each with its own replies nested.
pub async fn get_replies(
    State(pool): State<SqlitePool>,
    Extension(user): Extension<AuthUser>,
    ApiPath(id): ApiPath<i64>,
) -> Result<impl IntoResponse, AppError> {
    find_comment(&pool, id).await?;
    let descendants = load_descendants(&pool, id).await?;

    let ids: Vec<i64> = descendants.iter().map(|c| c.id).collect();
    let upvotes = load_upvotes(&pool, &ids).await?;

    Ok(Json(
        CommentForest::new(descendants, upvotes, user.id).replies_to(id),
    ))
}

/// Create a new top-level comment, or a reply when `parentId` is given.
pub async fn create_comment(
    State(pool): State<SqlitePool>,
    Extension(user): Extension<AuthUser>,
    ValidatedJson(payload): ValidatedJson<CreateCommentRequest>,
) -> Result<impl IntoResponse, AppError> {
    // Stored as typed; clients render it as plain text.
    let text = payload.text.trim();
    if text.is_empty() {
        return Err(AppError::BadRequest("Comment text is required".to_string()));
    }

    let parent = match payload.parent_id {
        Some(parent_id) => Some(
            fetch_comment(&pool, parent_id)
                .await?
                .ok_or(AppError::NotFound("Parent comment not found".to_string()))?,
        ),
        None => None,
    };
    let parent_id = parent.as_ref().map(|p| p.id);

    let comment = sqlx::query_as::<_, Comment>(
        r#"
        INSERT INTO comments (user_id, username, text, parent_id, is_reply, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        RETURNING id, user_id, username, text, parent_id, is_reply, upvote_count, created_at
        "#,
    )
    .bind(user.id)
    .bind(&user.username)
    .bind(text)
    .bind(parent_id)
    .bind(parent_id.is_some())
    .bind(Utc::now())
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to create comment: {:?}", e);
        AppError::from(e)
    })?;

    tracing::info!(
        comment_id = comment.id,
        parent_id = ?comment.parent_id,
        user_id = user.id,
        "comment created"
    );

    Ok((
        StatusCode::CREATED,
        Json(CreatedComment {
            comment: CommentNode::new(comment, Vec::new(), user.id, Vec::new()),
            parent_info: parent.as_ref().map(ParentInfo::from_parent),
        }),
    ))
}

/// Ancestor chain of a comment: root first, the comment itself last.
pub async fn get_parent_path(
    State(pool): State<SqlitePool>,
    ApiPath(id): ApiPath<i64>,
) -> Result<impl IntoResponse, AppError> {
    // Parents always predate their replies, so ids strictly decrease going up.
    let chain = sqlx::query_as::<_, PathEntry>(
        r#"
        WITH RECURSIVE ancestry(id, parent_id, depth) AS (
            SELECT id, parent_id, 0 FROM comments WHERE id = ?
            UNION ALL
            SELECT c.id, c.parent_id, a.depth + 1
            FROM comments c
            JOIN ancestry a ON c.id = a.parent_id
            WHERE c.id < a.id
        )
        SELECT c.id, c.text, c.username, c.is_reply, c.created_at
        FROM comments c
        JOIN ancestry a ON c.id = a.id
        ORDER BY a.depth DESC
        "#,
    )
    .bind(id)
    .fetch_all(&pool)
    .await?;

    if chain.is_empty() {
        return Err(AppError::NotFound("Comment not found".to_string()));
    }

    Ok(Json(chain))
}

/// Add the current user to a comment's upvote set.
///
/// The insert is the transaction's first statement, so the write lock is taken
/// up front and concurrent voters queue on the busy timeout instead of failing.
pub async fn upvote_comment(
    State(pool): State<SqlitePool>,
    Extension(user): Extension<AuthUser>,
    ApiPath(id): ApiPath<i64>,
) -> Result<impl IntoResponse, AppError> {
    let mut tx = pool.begin().await?;

    let inserted = sqlx::query(
        r#"
        INSERT INTO comment_upvotes (comment_id, user_id, created_at)
        VALUES (?, ?, ?)
        ON CONFLICT (comment_id, user_id) DO NOTHING
        "#,
    )
    .bind(id)
    .bind(user.id)
    .bind(Utc::now())
    .execute(&mut *tx)
    .await
    .map_err(|e| {
        if is_foreign_key_violation(&e) {
            AppError::NotFound("Comment not found".to_string())
        } else {
            AppError::from(e)
        }
    })?
    .rows_affected();

    if inserted == 0 {
        return Err(AppError::BadRequest(
            "You have already upvoted this comment".to_string(),
        ));
    }

    let count = sqlx::query_scalar::<_, i64>(
        "UPDATE comments SET upvote_count = upvote_count + 1 WHERE id = ? RETURNING upvote_count",
    )
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(Json(UpvoteResponse {
        id,
        upvotes: count,
        user_has_upvoted: true,
    }))
}

/// Remove the current user from a comment's upvote set.
///
/// Deletes first for the same locking reason as `upvote_comment`; a missing
/// comment is told apart from a missing vote only when nothing was deleted.
pub async fn remove_upvote(
    State(pool): State<SqlitePool>,
    Extension(user): Extension<AuthUser>,
    ApiPath(id): ApiPath<i64>,
) -> Result<impl IntoResponse, AppError> {
    let mut tx = pool.begin().await?;

    let removed = sqlx::query("DELETE FROM comment_upvotes WHERE comment_id = ? AND user_id = ?")
        .bind(id)
        .bind(user.id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    let count = if removed == 0 {
        None
    } else {
        sqlx::query_scalar::<_, i64>(
            "UPDATE comments SET upvote_count = MAX(0, upvote_count - 1) WHERE id = ? RETURNING upvote_count",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
    };

    let Some(count) = count else {
        let exists = sqlx::query_scalar::<_, i64>("SELECT id FROM comments WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        return Err(match exists {
            Some(_) => AppError::BadRequest("You have not upvoted this comment".to_string()),
            None => AppError::NotFound("Comment not found".to_string()),
        });
    };

    tx.commit().await?;

    Ok(Json(UpvoteResponse {
        id,
        upvotes: count,
        user_has_upvoted: false,
    }))
}
