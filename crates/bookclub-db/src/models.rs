/// Database row types — these map directly to SQLite rows.
/// Distinct from bookclub-types API models to keep the DB layer independent.

pub struct UserRow {
    pub id: String,
    pub user_name: String,
    pub email: String,
    pub password: String,
    pub profile_image: String,
    pub socket_id: Option<String>,
    pub created_at: String,
}

pub struct PostRow {
    pub id: String,
    pub user_name: String,
    pub title: String,
    pub book_title: String,
    pub book_authors: String,
    pub book_image: String,
    pub rating: u8,
    pub description: String,
    pub image: Option<String>,
    pub created_at: String,
}

pub struct CommentRow {
    pub post_id: String,
    pub seq: i64,
    pub user_name: String,
    pub content: String,
}
