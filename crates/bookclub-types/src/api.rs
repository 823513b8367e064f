use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Book, Comment, Review};

// -- Auth --

/// Login accepts either identifier field; whichever is present is matched
/// against both the userName and email columns.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    #[serde(rename = "userName")]
    pub user_name: Option<String>,
    pub email: Option<String>,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
}

/// A user record as returned by the API. The stored password hash is
/// stripped on every path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: Uuid,
    pub user_name: String,
    pub email: String,
    pub profile_image: String,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user: UserResponse,
    pub tokens: AuthTokens,
}

/// Google sign-in payload: the ID token issued by Google Identity Services.
#[derive(Debug, Deserialize)]
pub struct GoogleLoginRequest {
    pub credential: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Entry in the online-users listing, for the chat presence sidebar.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineUser {
    pub id: Uuid,
    pub user_name: String,
    pub socket_id: String,
}

// -- Posts --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostResponse {
    pub id: Uuid,
    pub user_name: String,
    pub title: String,
    pub book: Book,
    pub review: Review,
    pub image: Option<String>,
    pub comments: Vec<Comment>,
    pub created_at: String,
}
