pub mod auth;
pub mod error;
pub mod google;
pub mod middleware;
pub mod posts;
pub mod token;
pub mod uploads;
pub mod users;

use std::path::PathBuf;
use std::sync::Arc;

use bookclub_db::Database;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub auth: AuthConfig,
    pub upload_dir: PathBuf,
    pub http: reqwest::Client,
}

/// Token issuance settings. Both tokens are signed with the same secret and
/// differ only in expiry; refresh revocation lives in the DB token set.
#[derive(Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub access_ttl_secs: i64,
    pub refresh_ttl_secs: i64,
}
