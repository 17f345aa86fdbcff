// src/models/user.rs

use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Represents the 'users' table in the database.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub id: i64,

    pub username: String,

    /// Unique login identifier.
    pub email: String,

    /// Argon2 password hash.
    /// Skipped during serialization to prevent leaking sensitive data.
    #[serde(skip)]
    pub password: String,

    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// The account behind a verified bearer token, injected by the auth middleware.
#[derive(Debug, Clone, FromRow)]
pub struct AuthUser {
    pub id: i64,
    pub username: String,
    pub email: String,
}

/// Deserializes a string with surrounding whitespace removed, so length
/// rules see the value that will be stored.
fn trimmed<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(raw.trim().to_string())
}

/// DTO for creating a new user (Registration).
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[serde(default, deserialize_with = "trimmed")]
    #[validate(length(
        min = 3,
        max = 50,
        message = "Username length must be between 3 and 50 characters."
    ))]
    pub username: String,

    #[serde(default, deserialize_with = "trimmed")]
    #[validate(email(message = "Please provide a valid email address."))]
    pub email: String,

    #[serde(default)]
    #[validate(length(
        min = 6,
        max = 128,
        message = "Password length must be between 6 and 128 characters."
    ))]
    pub password: String,
}

/// DTO for user login.
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[serde(default)]
    #[validate(length(min = 1, max = 254, message = "Email is required."))]
    pub email: String,

    #[serde(default)]
    #[validate(length(min = 1, max = 128, message = "Password is required."))]
    pub password: String,
}

/// Returned by register and login: the account plus a fresh bearer token.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub token: String,
}

/// Profile of the current user with activity counters.
#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub comments_count: i64,
    pub upvotes_received: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(username: &str, email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            username: username.to_string(),
            email: email.to_string(),
            password: password.to_string(),
        }
    }

    #[test]
    fn valid_registration_passes() {
        assert!(register("alice", "alice@example.com", "secret1").validate().is_ok());
    }

    #[test]
    fn short_password_fails() {
        let errors = register("alice", "alice@example.com", "12345")
            .validate()
            .unwrap_err();
        assert!(errors.field_errors().contains_key("password"));
    }

    #[test]
    fn malformed_email_fails() {
        let errors = register("alice", "not-an-email", "secret1")
            .validate()
            .unwrap_err();
        assert!(errors.field_errors().contains_key("email"));
    }

    #[test]
    fn username_is_trimmed_before_validation() {
        let req: RegisterRequest = serde_json::from_value(serde_json::json!({
            "username": "  ab  ",
            "email": " ab@example.com ",
            "password": "secret1"
        }))
        .unwrap();
        assert_eq!(req.username, "ab");
        assert_eq!(req.email, "ab@example.com");
        let errors = req.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("username"));
    }

    #[test]
    fn password_hash_is_never_serialized() {
        let user = User {
            id: 1,
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            password: "$argon2id$...".to_string(),
            created_at: chrono::Utc::now(),
        };
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password").is_none());
    }
}
