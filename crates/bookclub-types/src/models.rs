use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- JWT Claims --

/// JWT claims shared across bookclub-api (REST handlers and middleware) and
/// bookclub-gateway. Both access and refresh tokens carry the same claim set;
/// they differ only in expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    #[serde(rename = "userName")]
    pub user_name: String,
    pub exp: usize,
}

/// A private chat message relayed between two connected users.
/// Never persisted by the relay — live traffic only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender: Uuid,
    pub receiver: Uuid,
    pub text: String,
}

/// Book metadata attached to a post.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Book {
    pub title: String,
    pub authors: String,
    pub image: String,
}

/// The review part of a post. Rating is bounded to 1..=5.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    pub rating: u8,
    pub description: String,
}

/// One comment on a post. Comments retain insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub username: String,
    pub content: String,
}
