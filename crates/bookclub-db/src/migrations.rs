use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id              TEXT PRIMARY KEY,
            user_name       TEXT NOT NULL UNIQUE,
            email           TEXT NOT NULL UNIQUE,
            password        TEXT NOT NULL,
            profile_image   TEXT NOT NULL,
            socket_id       TEXT,
            created_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- The user's revocable refresh-token set. Access tokens are never
        -- stored; they expire on their own claims.
        CREATE TABLE IF NOT EXISTS refresh_tokens (
            user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            token       TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(user_id, token)
        );

        CREATE INDEX IF NOT EXISTS idx_refresh_tokens_user
            ON refresh_tokens(user_id);

        CREATE TABLE IF NOT EXISTS posts (
            id              TEXT PRIMARY KEY,
            user_name       TEXT NOT NULL,
            title           TEXT NOT NULL,
            book_title      TEXT NOT NULL,
            book_authors    TEXT NOT NULL,
            book_image      TEXT NOT NULL,
            rating          INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 5),
            description     TEXT NOT NULL,
            image           TEXT,
            created_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_posts_user
            ON posts(user_name, created_at);

        -- Comments are an ordered list owned by the post; seq is the
        -- insertion position. The whole list is replaced on post update.
        CREATE TABLE IF NOT EXISTS comments (
            post_id     TEXT NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
            seq         INTEGER NOT NULL,
            user_name   TEXT NOT NULL,
            content     TEXT NOT NULL,
            PRIMARY KEY (post_id, seq)
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
