use crate::Database;
use crate::models::{CommentRow, PostRow, UserRow};
use anyhow::Result;
use rusqlite::Connection;

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        user_name: &str,
        email: &str,
        password_hash: &str,
        profile_image: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, user_name, email, password, profile_image) VALUES (?1, ?2, ?3, ?4, ?5)",
                (id, user_name, email, password_hash, profile_image),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id = ?1", &[&id]))
    }

    pub fn get_user_by_user_name(&self, user_name: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "user_name = ?1", &[&user_name]))
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email = ?1", &[&email]))
    }

    /// Login identifier resolution: matches userName OR email in one query.
    pub fn get_user_by_identifier(&self, identifier: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            query_user(conn, "user_name = ?1 OR email = ?1", &[&identifier])
        })
    }

    pub fn get_all_users(&self) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{} ORDER BY created_at", USER_SELECT))?;
            let rows = stmt
                .query_map([], map_user_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Full-record replace. Returns false if the user does not exist.
    pub fn update_user(
        &self,
        id: &str,
        user_name: &str,
        email: &str,
        password_hash: &str,
        profile_image: &str,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET user_name = ?2, email = ?3, password = ?4, profile_image = ?5 WHERE id = ?1",
                (id, user_name, email, password_hash, profile_image),
            )?;
            Ok(changed > 0)
        })
    }

    pub fn delete_user(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM users WHERE id = ?1", [id])?;
            Ok(changed > 0)
        })
    }

    // -- Socket association (one live connection per user) --

    pub fn set_socket(&self, user_id: &str, socket_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET socket_id = ?2 WHERE id = ?1",
                (user_id, socket_id),
            )?;
            Ok(changed > 0)
        })
    }

    /// Disconnect events only carry the socket id, so clearing searches by
    /// socket id. Returns the owning user's id when an association was cleared.
    pub fn clear_socket(&self, socket_id: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let owner: Option<String> = conn
                .query_row(
                    "SELECT id FROM users WHERE socket_id = ?1",
                    [socket_id],
                    |row| row.get(0),
                )
                .optional()?;

            if owner.is_some() {
                conn.execute(
                    "UPDATE users SET socket_id = NULL WHERE socket_id = ?1",
                    [socket_id],
                )?;
            }
            Ok(owner)
        })
    }

    /// All users currently holding a socket association, except the caller.
    pub fn list_online(&self, excluding_user_id: &str) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{} WHERE socket_id IS NOT NULL AND id != ?1",
                USER_SELECT
            ))?;
            let rows = stmt
                .query_map([excluding_user_id], map_user_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Refresh tokens --

    pub fn add_refresh_token(&self, user_id: &str, token: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO refresh_tokens (user_id, token) VALUES (?1, ?2)",
                (user_id, token),
            )?;
            Ok(())
        })
    }

    /// Removing an absent token is a no-op, not an error (logout idempotency).
    /// Returns whether a token was actually removed.
    pub fn remove_refresh_token(&self, user_id: &str, token: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM refresh_tokens WHERE user_id = ?1 AND token = ?2",
                (user_id, token),
            )?;
            Ok(changed > 0)
        })
    }

    pub fn has_refresh_token(&self, user_id: &str, token: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM refresh_tokens WHERE user_id = ?1 AND token = ?2",
                    (user_id, token),
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    // -- Posts --

    pub fn insert_post(&self, post: &PostRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO posts (id, user_name, title, book_title, book_authors, book_image, rating, description, image)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    post.id,
                    post.user_name,
                    post.title,
                    post.book_title,
                    post.book_authors,
                    post.book_image,
                    post.rating,
                    post.description,
                    post.image,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_post(&self, id: &str) -> Result<Option<(PostRow, Vec<CommentRow>)>> {
        self.with_conn(|conn| {
            let post = query_posts(conn, "WHERE id = ?1", &[&id])?.into_iter().next();
            match post {
                None => Ok(None),
                Some(post) => {
                    let comments = query_comments(conn, std::slice::from_ref(&post.id))?;
                    Ok(Some((post, comments)))
                }
            }
        })
    }

    pub fn get_all_posts(&self) -> Result<Vec<(PostRow, Vec<CommentRow>)>> {
        self.with_conn(|conn| {
            let posts = query_posts(conn, "", &[])?;
            attach_comments(conn, posts)
        })
    }

    pub fn get_posts_by_user(&self, user_name: &str) -> Result<Vec<(PostRow, Vec<CommentRow>)>> {
        self.with_conn(|conn| {
            let posts = query_posts(conn, "WHERE user_name = ?1", &[&user_name])?;
            attach_comments(conn, posts)
        })
    }

    /// Whole-record replace, comment list included: the supplied comments
    /// become the post's entire comment list in the supplied order.
    /// Returns false if the post does not exist.
    pub fn replace_post(&self, post: &PostRow, comments: &[CommentRow]) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let changed = tx.execute(
                "UPDATE posts SET user_name = ?2, title = ?3, book_title = ?4, book_authors = ?5,
                        book_image = ?6, rating = ?7, description = ?8, image = ?9
                 WHERE id = ?1",
                rusqlite::params![
                    post.id,
                    post.user_name,
                    post.title,
                    post.book_title,
                    post.book_authors,
                    post.book_image,
                    post.rating,
                    post.description,
                    post.image,
                ],
            )?;

            if changed == 0 {
                return Ok(false);
            }

            tx.execute("DELETE FROM comments WHERE post_id = ?1", [&post.id])?;
            for (seq, comment) in comments.iter().enumerate() {
                tx.execute(
                    "INSERT INTO comments (post_id, seq, user_name, content) VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![post.id, seq as i64, comment.user_name, comment.content],
                )?;
            }

            tx.commit()?;
            Ok(true)
        })
    }

    pub fn delete_post(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM posts WHERE id = ?1", [id])?;
            Ok(changed > 0)
        })
    }
}

const USER_SELECT: &str =
    "SELECT id, user_name, email, password, profile_image, socket_id, created_at FROM users";

fn map_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        user_name: row.get(1)?,
        email: row.get(2)?,
        password: row.get(3)?,
        profile_image: row.get(4)?,
        socket_id: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn query_user(
    conn: &Connection,
    predicate: &str,
    params: &[&dyn rusqlite::types::ToSql],
) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(&format!("{} WHERE {}", USER_SELECT, predicate))?;
    let row = stmt.query_row(params, map_user_row).optional()?;
    Ok(row)
}

fn query_posts(
    conn: &Connection,
    predicate: &str,
    params: &[&dyn rusqlite::types::ToSql],
) -> Result<Vec<PostRow>> {
    let sql = format!(
        "SELECT id, user_name, title, book_title, book_authors, book_image, rating, description, image, created_at
         FROM posts {} ORDER BY created_at DESC",
        predicate
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params, |row| {
            Ok(PostRow {
                id: row.get(0)?,
                user_name: row.get(1)?,
                title: row.get(2)?,
                book_title: row.get(3)?,
                book_authors: row.get(4)?,
                book_image: row.get(5)?,
                rating: row.get(6)?,
                description: row.get(7)?,
                image: row.get(8)?,
                created_at: row.get(9)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Batch-fetch comments for a set of post IDs, in insertion order.
fn query_comments(conn: &Connection, post_ids: &[String]) -> Result<Vec<CommentRow>> {
    if post_ids.is_empty() {
        return Ok(vec![]);
    }

    let placeholders: Vec<String> = (1..=post_ids.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "SELECT post_id, seq, user_name, content FROM comments WHERE post_id IN ({}) ORDER BY post_id, seq",
        placeholders.join(", ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let params: Vec<&dyn rusqlite::types::ToSql> = post_ids
        .iter()
        .map(|id| id as &dyn rusqlite::types::ToSql)
        .collect();

    let rows = stmt
        .query_map(params.as_slice(), |row| {
            Ok(CommentRow {
                post_id: row.get(0)?,
                seq: row.get(1)?,
                user_name: row.get(2)?,
                content: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn attach_comments(
    conn: &Connection,
    posts: Vec<PostRow>,
) -> Result<Vec<(PostRow, Vec<CommentRow>)>> {
    let post_ids: Vec<String> = posts.iter().map(|p| p.id.clone()).collect();
    let all_comments = query_comments(conn, &post_ids)?;

    // Group comments by post_id (single batch query, no N+1)
    let mut by_post: std::collections::HashMap<String, Vec<CommentRow>> =
        std::collections::HashMap::new();
    for comment in all_comments {
        by_post.entry(comment.post_id.clone()).or_default().push(comment);
    }

    Ok(posts
        .into_iter()
        .map(|post| {
            let comments = by_post.remove(&post.id).unwrap_or_default();
            (post, comments)
        })
        .collect())
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn add_user(db: &Database, id: &str, name: &str, email: &str) {
        db.create_user(id, name, email, "hash", "/uploads/default-avatar.png")
            .unwrap();
    }

    fn sample_post(id: &str, user: &str) -> PostRow {
        PostRow {
            id: id.into(),
            user_name: user.into(),
            title: "A quiet masterpiece".into(),
            book_title: "Meditations".into(),
            book_authors: "Marcus Aurelius".into(),
            book_image: "https://covers.example/meditations.jpg".into(),
            rating: 5,
            description: "Held up better than expected.".into(),
            image: None,
            created_at: String::new(),
        }
    }

    #[test]
    fn duplicate_user_name_and_email_rejected() {
        let db = db();
        add_user(&db, "u1", "ada", "ada@example.com");

        assert!(
            db.create_user("u2", "ada", "other@example.com", "hash", "img")
                .is_err()
        );
        assert!(
            db.create_user("u3", "grace", "ada@example.com", "hash", "img")
                .is_err()
        );
    }

    #[test]
    fn identifier_matches_user_name_or_email() {
        let db = db();
        add_user(&db, "u1", "ada", "ada@example.com");

        assert!(db.get_user_by_identifier("ada").unwrap().is_some());
        assert!(db.get_user_by_identifier("ada@example.com").unwrap().is_some());
        assert!(db.get_user_by_identifier("nobody").unwrap().is_none());
    }

    #[test]
    fn socket_set_and_clear_by_socket_id() {
        let db = db();
        add_user(&db, "u1", "ada", "ada@example.com");

        assert!(db.set_socket("u1", "sock-1").unwrap());
        let user = db.get_user_by_id("u1").unwrap().unwrap();
        assert_eq!(user.socket_id.as_deref(), Some("sock-1"));

        // Clear is keyed by socket id, and reports the owner
        assert_eq!(db.clear_socket("sock-1").unwrap().as_deref(), Some("u1"));
        assert!(db.get_user_by_id("u1").unwrap().unwrap().socket_id.is_none());

        // Clearing an unknown socket id is a no-op
        assert!(db.clear_socket("sock-404").unwrap().is_none());
    }

    #[test]
    fn online_listing_excludes_caller() {
        let db = db();
        add_user(&db, "u1", "ada", "ada@example.com");
        add_user(&db, "u2", "grace", "grace@example.com");
        add_user(&db, "u3", "alan", "alan@example.com");

        db.set_socket("u1", "sock-1").unwrap();
        db.set_socket("u2", "sock-2").unwrap();

        let online = db.list_online("u1").unwrap();
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].id, "u2");
    }

    #[test]
    fn refresh_token_remove_is_idempotent() {
        let db = db();
        add_user(&db, "u1", "ada", "ada@example.com");

        db.add_refresh_token("u1", "tok").unwrap();
        assert!(db.has_refresh_token("u1", "tok").unwrap());

        assert!(db.remove_refresh_token("u1", "tok").unwrap());
        assert!(!db.has_refresh_token("u1", "tok").unwrap());

        // Second removal is a no-op, not an error
        assert!(!db.remove_refresh_token("u1", "tok").unwrap());
    }

    #[test]
    fn post_roundtrip_with_empty_comments() {
        let db = db();
        db.insert_post(&sample_post("p1", "ada")).unwrap();

        let (post, comments) = db.get_post("p1").unwrap().unwrap();
        assert_eq!(post.title, "A quiet masterpiece");
        assert_eq!(post.rating, 5);
        assert_eq!(post.description, "Held up better than expected.");
        assert!(comments.is_empty());
    }

    #[test]
    fn replace_post_swaps_entire_comment_list() {
        let db = db();
        let post = sample_post("p1", "ada");
        db.insert_post(&post).unwrap();

        let first = vec![
            CommentRow { post_id: "p1".into(), seq: 0, user_name: "grace".into(), content: "agreed".into() },
            CommentRow { post_id: "p1".into(), seq: 0, user_name: "alan".into(), content: "meh".into() },
        ];
        assert!(db.replace_post(&post, &first).unwrap());

        // Delete-by-index semantics: the caller submits the list minus one
        let second = vec![CommentRow {
            post_id: "p1".into(),
            seq: 0,
            user_name: "alan".into(),
            content: "meh".into(),
        }];
        assert!(db.replace_post(&post, &second).unwrap());

        let (_, comments) = db.get_post("p1").unwrap().unwrap();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].user_name, "alan");
    }

    #[test]
    fn replace_missing_post_reports_absence() {
        let db = db();
        assert!(!db.replace_post(&sample_post("ghost", "ada"), &[]).unwrap());
    }

    #[test]
    fn delete_missing_post_is_not_an_error() {
        let db = db();
        assert!(!db.delete_post("ghost").unwrap());
    }

    #[test]
    fn deleting_user_cascades_refresh_tokens() {
        let db = db();
        add_user(&db, "u1", "ada", "ada@example.com");
        db.add_refresh_token("u1", "tok").unwrap();

        assert!(db.delete_user("u1").unwrap());
        assert!(!db.has_refresh_token("u1", "tok").unwrap());
    }
}
