use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{
    Json,
    extract::{Multipart, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Bearer};
use tracing::info;
use uuid::Uuid;

use bookclub_db::Database;
use bookclub_db::models::UserRow;
use bookclub_types::api::{
    GoogleLoginRequest, LoginRequest, LoginResponse, MessageResponse, UserResponse,
};

use crate::error::ApiError;
use crate::google::GoogleTokenInfo;
use crate::{AppState, AuthConfig, google, token, uploads};

const MISSING_FIELDS: &str = "Please provide all required fields";

pub struct RegisterForm {
    pub user_name: String,
    pub email: String,
    pub password: String,
    pub profile_image: Option<String>,
}

// -- Handlers --

pub async fn register(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut user_name = String::new();
    let mut email = String::new();
    let mut password = String::new();
    let mut profile_image = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        match field.name().unwrap_or("") {
            "userName" => user_name = read_text(field).await?,
            "email" => email = read_text(field).await?,
            "password" => password = read_text(field).await?,
            "image" => {
                let original = field.file_name().unwrap_or("image").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.to_string()))?;
                profile_image = Some(uploads::save_image(&state.upload_dir, &original, &data).await?);
            }
            _ => {}
        }
    }

    let form = RegisterForm {
        user_name,
        email,
        password,
        profile_image,
    };
    let user = register_user(&state.db, form)?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let identifier = resolve_identifier(req.user_name, req.email)
        .ok_or_else(|| ApiError::BadRequest(MISSING_FIELDS.into()))?;
    if req.password.is_empty() {
        return Err(ApiError::BadRequest(MISSING_FIELDS.into()));
    }

    let response = login_user(&state.db, &state.auth, &identifier, &req.password)?;
    info!("User {} logged in", response.user.user_name);
    Ok(Json(response))
}

pub async fn logout(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
) -> Result<impl IntoResponse, ApiError> {
    let TypedHeader(bearer) = bearer.ok_or(ApiError::InvalidToken)?;
    logout_user(&state.db, &state.auth.jwt_secret, bearer.token())?;
    Ok(Json(MessageResponse {
        message: "User logged out successfully".into(),
    }))
}

pub async fn get_user(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
) -> Result<impl IntoResponse, ApiError> {
    let TypedHeader(bearer) = bearer.ok_or(ApiError::InvalidToken)?;
    let user = current_user(&state.db, &state.auth.jwt_secret, bearer.token())?;
    Ok(Json(user))
}

pub async fn google_login(
    State(state): State<AppState>,
    Json(req): Json<GoogleLoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let info = google::verify_id_token(&state.http, &req.credential).await?;
    let response = google_session(&state.db, &state.auth, info)?;
    Ok(Json(response))
}

/// An empty identifier field counts as absent: a login carrying
/// `userName: ""` alongside a real email resolves against the email.
fn resolve_identifier(user_name: Option<String>, email: Option<String>) -> Option<String> {
    user_name
        .filter(|s| !s.is_empty())
        .or_else(|| email.filter(|s| !s.is_empty()))
}

// -- Service layer --

pub fn register_user(db: &Database, form: RegisterForm) -> Result<UserResponse, ApiError> {
    if form.user_name.is_empty() || form.email.is_empty() || form.password.is_empty() {
        return Err(ApiError::BadRequest(MISSING_FIELDS.into()));
    }

    // Distinct conflict per identifier field
    if db.get_user_by_email(&form.email)?.is_some() {
        return Err(ApiError::Conflict("Email already exists".into()));
    }
    if db.get_user_by_user_name(&form.user_name)?.is_some() {
        return Err(ApiError::Conflict("Username already exists".into()));
    }

    let password_hash = hash_password(&form.password)?;
    let user_id = Uuid::new_v4();
    let profile_image = form
        .profile_image
        .unwrap_or_else(|| uploads::DEFAULT_IMAGE.to_string());

    // The existence checks above and this insert take the connection
    // separately, so a concurrent registration can still lose the race;
    // the constraint failure maps to the same field-specific conflict.
    db.create_user(
        &user_id.to_string(),
        &form.user_name,
        &form.email,
        &password_hash,
        &profile_image,
    )
    .map_err(map_unique_conflict)?;

    let row = db
        .get_user_by_id(&user_id.to_string())?
        .ok_or_else(|| ApiError::Internal("created user vanished".into()))?;
    to_user_response(row)
}

fn map_unique_conflict(e: anyhow::Error) -> ApiError {
    let msg = e.to_string();
    if msg.contains("UNIQUE constraint failed: users.email") {
        ApiError::Conflict("Email already exists".into())
    } else if msg.contains("UNIQUE constraint failed: users.user_name") {
        ApiError::Conflict("Username already exists".into())
    } else {
        ApiError::Internal(msg)
    }
}

/// Identifier resolves against both userName and email. Unknown identifier
/// and wrong password produce the exact same failure, by design.
pub fn login_user(
    db: &Database,
    auth: &AuthConfig,
    identifier: &str,
    password: &str,
) -> Result<LoginResponse, ApiError> {
    let row = db
        .get_user_by_identifier(identifier)?
        .ok_or(ApiError::InvalidCredentials)?;

    if !verify_password(password, &row.password) {
        return Err(ApiError::InvalidCredentials);
    }

    issue_session(db, auth, row)
}

/// Verified refresh tokens are removed from the user's set; removing one
/// that is already gone is a success (idempotent logout).
pub fn logout_user(db: &Database, secret: &str, refresh_token: &str) -> Result<(), ApiError> {
    let claims = token::verify_token(secret, refresh_token).map_err(|_| ApiError::InvalidToken)?;
    db.remove_refresh_token(&claims.sub.to_string(), refresh_token)?;
    Ok(())
}

pub fn current_user(db: &Database, secret: &str, access_token: &str) -> Result<UserResponse, ApiError> {
    let claims = token::verify_token(secret, access_token).map_err(|_| ApiError::InvalidToken)?;
    let row = db
        .get_user_by_id(&claims.sub.to_string())?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;
    to_user_response(row)
}

/// Exchange a Google-verified identity for a local session, creating the
/// user on first sight. Reuses the same token-issuance path as login.
pub fn google_session(
    db: &Database,
    auth: &AuthConfig,
    info: GoogleTokenInfo,
) -> Result<LoginResponse, ApiError> {
    let row = match db.get_user_by_email(&info.email)? {
        Some(row) => row,
        None => {
            let user_id = Uuid::new_v4();
            let user_name = pick_user_name(db, &info)?;
            // Google users authenticate through Google only; the local
            // password slot is filled with an unguessable random hash.
            let password_hash = hash_password(&Uuid::new_v4().to_string())?;
            let profile_image = info
                .picture
                .unwrap_or_else(|| uploads::DEFAULT_IMAGE.to_string());

            db.create_user(
                &user_id.to_string(),
                &user_name,
                &info.email,
                &password_hash,
                &profile_image,
            )
            .map_err(map_unique_conflict)?;
            info!("Created user {} from Google sign-in", user_name);

            db.get_user_by_id(&user_id.to_string())?
                .ok_or_else(|| ApiError::Internal("created user vanished".into()))?
        }
    };

    issue_session(db, auth, row)
}

fn issue_session(db: &Database, auth: &AuthConfig, row: UserRow) -> Result<LoginResponse, ApiError> {
    let user = to_user_response(row)?;
    let tokens = token::issue_tokens(auth, user.id, &user.user_name)?;
    db.add_refresh_token(&user.id.to_string(), &tokens.refresh_token)?;
    Ok(LoginResponse { user, tokens })
}

fn pick_user_name(db: &Database, info: &GoogleTokenInfo) -> Result<String, ApiError> {
    let base = info
        .name
        .as_deref()
        .map(|n| n.to_lowercase().replace(' ', "."))
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| {
            info.email
                .split('@')
                .next()
                .unwrap_or("reader")
                .to_string()
        });

    if db.get_user_by_user_name(&base)?.is_none() {
        return Ok(base);
    }

    // Taken: disambiguate with a short random suffix
    let suffix = Uuid::new_v4().simple().to_string();
    Ok(format!("{}-{}", base, &suffix[..6]))
}

// -- Helpers --

pub(crate) fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| ApiError::Internal(format!("password hashing failed: {}", e)))
}

fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// DB row -> API shape. The stored password hash is never serialized out.
pub(crate) fn to_user_response(row: UserRow) -> Result<UserResponse, ApiError> {
    let id = row
        .id
        .parse()
        .map_err(|_| ApiError::Internal(format!("corrupt user id '{}'", row.id)))?;
    Ok(UserResponse {
        id,
        user_name: row.user_name,
        email: row.email,
        profile_image: row.profile_image,
        created_at: row.created_at,
    })
}

pub(crate) async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn auth() -> AuthConfig {
        AuthConfig {
            jwt_secret: "test-secret".into(),
            access_ttl_secs: 3600,
            refresh_ttl_secs: 30 * 24 * 3600,
        }
    }

    fn form(user_name: &str, email: &str, password: &str) -> RegisterForm {
        RegisterForm {
            user_name: user_name.into(),
            email: email.into(),
            password: password.into(),
            profile_image: None,
        }
    }

    #[test]
    fn register_strips_password_and_defaults_avatar() {
        let db = db();
        let user = register_user(&db, form("ada", "ada@example.com", "s3cret")).unwrap();

        assert_eq!(user.user_name, "ada");
        assert_eq!(user.profile_image, uploads::DEFAULT_IMAGE);

        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password").is_none());
    }

    #[test]
    fn duplicate_registration_conflicts_per_field() {
        let db = db();
        register_user(&db, form("ada", "ada@example.com", "s3cret")).unwrap();

        // Same email, different username
        let err = register_user(&db, form("ada2", "ada@example.com", "other")).unwrap_err();
        assert_eq!(err, ApiError::Conflict("Email already exists".into()));

        // Same username, different email
        let err = register_user(&db, form("ada", "ada2@example.com", "other")).unwrap_err();
        assert_eq!(err, ApiError::Conflict("Username already exists".into()));
    }

    #[test]
    fn missing_fields_rejected() {
        let db = db();
        let err = register_user(&db, form("ada", "", "s3cret")).unwrap_err();
        assert_eq!(err, ApiError::BadRequest(MISSING_FIELDS.into()));
    }

    #[test]
    fn empty_identifier_field_falls_through_to_the_other() {
        assert_eq!(
            resolve_identifier(Some(String::new()), Some("ada@example.com".into())),
            Some("ada@example.com".into())
        );
        assert_eq!(
            resolve_identifier(Some("ada".into()), Some(String::new())),
            Some("ada".into())
        );
        assert_eq!(resolve_identifier(Some(String::new()), Some(String::new())), None);
        assert_eq!(resolve_identifier(None, None), None);
    }

    #[test]
    fn lost_insert_race_still_reports_field_conflict() {
        let db = db();
        register_user(&db, form("ada", "ada@example.com", "s3cret")).unwrap();

        // An insert slipping past the existence checks hits the UNIQUE
        // constraint; the raw DB error maps to the same per-field 409
        let email_err = db
            .create_user("u2", "ada2", "ada@example.com", "hash", "img")
            .map_err(map_unique_conflict)
            .unwrap_err();
        assert_eq!(email_err, ApiError::Conflict("Email already exists".into()));

        let name_err = db
            .create_user("u3", "ada", "ada3@example.com", "hash", "img")
            .map_err(map_unique_conflict)
            .unwrap_err();
        assert_eq!(name_err, ApiError::Conflict("Username already exists".into()));
    }

    #[test]
    fn login_resolves_user_name_and_email() {
        let db = db();
        register_user(&db, form("ada", "ada@example.com", "s3cret")).unwrap();

        assert!(login_user(&db, &auth(), "ada", "s3cret").is_ok());
        assert!(login_user(&db, &auth(), "ada@example.com", "s3cret").is_ok());
    }

    #[test]
    fn login_failures_are_indistinguishable() {
        let db = db();
        register_user(&db, form("ada", "ada@example.com", "s3cret")).unwrap();

        let wrong_password = login_user(&db, &auth(), "ada", "wrong").unwrap_err();
        let unknown_user = login_user(&db, &auth(), "nobody", "s3cret").unwrap_err();

        // Same variant, same body, same status — no account enumeration
        assert_eq!(wrong_password, unknown_user);
        assert_eq!(wrong_password.to_string(), unknown_user.to_string());
        assert_eq!(wrong_password.status(), unknown_user.status());
    }

    #[test]
    fn login_stores_the_refresh_token() {
        let db = db();
        let user = register_user(&db, form("ada", "ada@example.com", "s3cret")).unwrap();

        let session = login_user(&db, &auth(), "ada", "s3cret").unwrap();
        assert!(
            db.has_refresh_token(&user.id.to_string(), &session.tokens.refresh_token)
                .unwrap()
        );
    }

    #[test]
    fn logout_is_idempotent() {
        let db = db();
        let cfg = auth();
        let user = register_user(&db, form("ada", "ada@example.com", "s3cret")).unwrap();
        let session = login_user(&db, &cfg, "ada", "s3cret").unwrap();
        let refresh = session.tokens.refresh_token;

        logout_user(&db, &cfg.jwt_secret, &refresh).unwrap();
        assert!(!db.has_refresh_token(&user.id.to_string(), &refresh).unwrap());

        // Second logout with the same (still valid) token is a no-op success
        logout_user(&db, &cfg.jwt_secret, &refresh).unwrap();
    }

    #[test]
    fn logout_rejects_garbage_tokens() {
        let db = db();
        let err = logout_user(&db, "test-secret", "not-a-jwt").unwrap_err();
        assert_eq!(err, ApiError::InvalidToken);
    }

    #[test]
    fn current_user_after_delete_is_not_found() {
        let db = db();
        let cfg = auth();
        let user = register_user(&db, form("ada", "ada@example.com", "s3cret")).unwrap();
        let session = login_user(&db, &cfg, "ada", "s3cret").unwrap();

        db.delete_user(&user.id.to_string()).unwrap();

        let err = current_user(&db, &cfg.jwt_secret, &session.tokens.access_token).unwrap_err();
        assert_eq!(err, ApiError::NotFound("User not found".into()));
    }

    #[test]
    fn google_session_creates_then_reuses_the_user() {
        let db = db();
        let cfg = auth();

        let info = || GoogleTokenInfo {
            sub: "google-sub-1".into(),
            email: "ada@example.com".into(),
            name: Some("Ada Lovelace".into()),
            picture: None,
        };

        let first = google_session(&db, &cfg, info()).unwrap();
        assert_eq!(first.user.user_name, "ada.lovelace");

        let second = google_session(&db, &cfg, info()).unwrap();
        assert_eq!(second.user.id, first.user.id);
    }
}
