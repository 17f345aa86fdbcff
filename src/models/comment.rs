// src/models/comment.rs

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Length of the parent excerpt attached to a freshly created reply.
const PARENT_EXCERPT_CHARS: usize = 50;

/// Represents the 'comments' table in the database.
#[derive(Debug, Clone, FromRow)]
pub struct Comment {
    pub id: i64,
    pub user_id: i64,
    /// Author's username at the time of posting.
    pub username: String,
    pub text: String,
    pub parent_id: Option<i64>,
    pub is_reply: bool,
    pub upvote_count: i64,
    pub created_at: DateTime<Utc>,
}

/// One row of the 'comment_upvotes' table.
#[derive(Debug, Clone, FromRow)]
pub struct Upvote {
    pub comment_id: i64,
    pub user_id: i64,
}

/// DTO for creating a new comment or reply.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateCommentRequest {
    #[serde(default)]
    #[validate(length(max = 5000, message = "Comment must be at most 5000 characters"))]
    pub text: String,

    /// Optional: the ID of the comment being replied to.
    #[serde(default, alias = "parent_id")]
    pub parent_id: Option<i64>,
}

/// Upvote aggregate as seen by one viewer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Upvotes {
    pub count: i64,
    pub users: Vec<i64>,
    pub user_has_upvoted: bool,
}

/// A comment with its reply subtree attached.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentNode {
    pub id: i64,
    #[serde(rename = "user")]
    pub user_id: i64,
    pub username: String,
    pub text: String,
    pub parent_id: Option<i64>,
    pub is_reply: bool,
    pub upvotes: Upvotes,
    pub created_at: DateTime<Utc>,
    pub replies: Vec<CommentNode>,
}

impl CommentNode {
    pub fn new(comment: Comment, voters: Vec<i64>, viewer: i64, replies: Vec<CommentNode>) -> Self {
        let user_has_upvoted = voters.contains(&viewer);
        CommentNode {
            id: comment.id,
            user_id: comment.user_id,
            username: comment.username,
            text: comment.text,
            parent_id: comment.parent_id,
            is_reply: comment.is_reply,
            upvotes: Upvotes {
                count: comment.upvote_count,
                users: voters,
                user_has_upvoted,
            },
            created_at: comment.created_at,
            replies,
        }
    }
}

/// Short summary of the parent returned alongside a new reply.
#[derive(Debug, Clone, Serialize)]
pub struct ParentInfo {
    pub id: i64,
    pub text: String,
    pub username: String,
}

impl ParentInfo {
    pub fn from_parent(parent: &Comment) -> Self {
        ParentInfo {
            id: parent.id,
            text: excerpt(&parent.text, PARENT_EXCERPT_CHARS),
            username: parent.username.clone(),
        }
    }
}

/// First `max_chars` characters of `text`, with "..." appended when cut.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Response for `POST /api/comments`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedComment {
    #[serde(flatten)]
    pub comment: CommentNode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_info: Option<ParentInfo>,
}

/// Response for the upvote endpoints.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpvoteResponse {
    pub id: i64,
    pub upvotes: i64,
    pub user_has_upvoted: bool,
}

/// One step of a parent path, root first.
#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PathEntry {
    pub id: i64,
    pub text: String,
    pub username: String,
    pub is_reply: bool,
    pub created_at: DateTime<Utc>,
}

/// Flat comment rows grouped by parent, ready to be assembled into trees.
///
/// Assembly consumes the rows: each stored row is attached at most once, so it
/// terminates even if the parent pointers were ever to form a cycle.
pub struct CommentForest {
    children: HashMap<Option<i64>, Vec<Comment>>,
    voters: HashMap<i64, Vec<i64>>,
    viewer: i64,
}

impl CommentForest {
    pub fn new(comments: Vec<Comment>, upvotes: Vec<Upvote>, viewer: i64) -> Self {
        let mut children: HashMap<Option<i64>, Vec<Comment>> = HashMap::new();
        for comment in comments {
            children.entry(comment.parent_id).or_default().push(comment);
        }

        let mut voters: HashMap<i64, Vec<i64>> = HashMap::new();
        for upvote in upvotes {
            voters.entry(upvote.comment_id).or_default().push(upvote.user_id);
        }

        CommentForest {
            children,
            voters,
            viewer,
        }
    }

    /// Top-level comments, newest first, each with its full subtree.
    pub fn top_level(mut self) -> Vec<CommentNode> {
        let mut roots = self.children.remove(&None).unwrap_or_default();
        roots.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        roots.into_iter().map(|c| self.attach(c)).collect()
    }

    /// Replies to `parent_id`, oldest first, each with its full subtree.
    pub fn replies_to(mut self, parent_id: i64) -> Vec<CommentNode> {
        self.take_replies(parent_id)
    }

    /// Builds the node for `root`, which need not be among the forest's rows.
    pub fn subtree_of(mut self, root: Comment) -> CommentNode {
        self.attach(root)
    }

    fn take_replies(&mut self, parent_id: i64) -> Vec<CommentNode> {
        let mut replies = self.children.remove(&Some(parent_id)).unwrap_or_default();
        replies.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        replies.into_iter().map(|c| self.attach(c)).collect()
    }

    fn attach(&mut self, comment: Comment) -> CommentNode {
        let replies = self.take_replies(comment.id);
        let voters = self.voters.remove(&comment.id).unwrap_or_default();
        CommentNode::new(comment, voters, self.viewer, replies)
    }
}
