use axum::{
    Extension, Json,
    extract::{Multipart, Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

use bookclub_db::Database;
use bookclub_types::api::{MessageResponse, OnlineUser, UserResponse};
use bookclub_types::models::Claims;

use crate::auth::{RegisterForm, read_text, to_user_response};
use crate::error::ApiError;
use crate::{AppState, auth, uploads};

// -- Handlers --

/// Full-record replace: all credential fields are required and the password
/// is re-hashed. Omitting the image file resets the avatar to the default.
pub async fn update_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
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
    let user = update_user_record(&state.db, user_id, form)?;
    Ok(Json(user))
}

pub async fn delete_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    delete_user_record(&state.db, user_id)?;
    Ok(Json(MessageResponse {
        message: "User deleted successfully".into(),
    }))
}

/// Presence listing for the chat sidebar: everyone currently holding a
/// socket association, except the caller.
pub async fn get_online_users(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let online = online_users(&state.db, claims.sub)?;
    Ok(Json(online))
}

pub async fn get_all_users(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let users = state
        .db
        .get_all_users()?
        .into_iter()
        .map(to_user_response)
        .collect::<Result<Vec<UserResponse>, _>>()?;
    Ok(Json(users))
}

// -- Service layer --

pub fn update_user_record(
    db: &Database,
    user_id: Uuid,
    form: RegisterForm,
) -> Result<UserResponse, ApiError> {
    if form.user_name.is_empty() || form.email.is_empty() || form.password.is_empty() {
        return Err(ApiError::BadRequest("Please provide all required fields".into()));
    }

    let password_hash = auth::hash_password(&form.password)?;
    let profile_image = form
        .profile_image
        .unwrap_or_else(|| uploads::DEFAULT_IMAGE.to_string());

    let updated = db
        .update_user(
            &user_id.to_string(),
            &form.user_name,
            &form.email,
            &password_hash,
            &profile_image,
        )
        .map_err(|e| {
            if e.to_string().contains("UNIQUE constraint failed") {
                ApiError::Conflict("Username already in use".into())
            } else {
                ApiError::Internal(e.to_string())
            }
        })?;

    if !updated {
        return Err(ApiError::NotFound("User not found".into()));
    }

    let row = db
        .get_user_by_id(&user_id.to_string())?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;
    to_user_response(row)
}

pub fn delete_user_record(db: &Database, user_id: Uuid) -> Result<(), ApiError> {
    if !db.delete_user(&user_id.to_string())? {
        return Err(ApiError::NotFound("User not found".into()));
    }
    Ok(())
}

pub fn online_users(db: &Database, caller: Uuid) -> Result<Vec<OnlineUser>, ApiError> {
    db.list_online(&caller.to_string())?
        .into_iter()
        .map(|row| {
            let id = row
                .id
                .parse()
                .map_err(|_| ApiError::Internal(format!("corrupt user id '{}'", row.id)))?;
            Ok(OnlineUser {
                id,
                user_name: row.user_name,
                // list_online only returns rows with a live association
                socket_id: row.socket_id.unwrap_or_default(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::register_user;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
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
    fn update_replaces_the_whole_record() {
        let db = db();
        let user = register_user(&db, form("ada", "ada@example.com", "s3cret")).unwrap();

        let updated =
            update_user_record(&db, user.id, form("ada.l", "ada.l@example.com", "newpass")).unwrap();
        assert_eq!(updated.user_name, "ada.l");
        assert_eq!(updated.email, "ada.l@example.com");
    }

    #[test]
    fn update_to_taken_user_name_conflicts() {
        let db = db();
        register_user(&db, form("grace", "grace@example.com", "pw")).unwrap();
        let user = register_user(&db, form("ada", "ada@example.com", "pw")).unwrap();

        let err =
            update_user_record(&db, user.id, form("grace", "ada@example.com", "pw")).unwrap_err();
        assert_eq!(err, ApiError::Conflict("Username already in use".into()));
    }

    #[test]
    fn update_unknown_user_is_not_found() {
        let db = db();
        let err =
            update_user_record(&db, Uuid::new_v4(), form("x", "x@example.com", "pw")).unwrap_err();
        assert_eq!(err, ApiError::NotFound("User not found".into()));
    }

    #[test]
    fn delete_unknown_user_is_not_found() {
        let db = db();
        let err = delete_user_record(&db, Uuid::new_v4()).unwrap_err();
        assert_eq!(err, ApiError::NotFound("User not found".into()));
    }

    #[test]
    fn online_listing_excludes_the_caller() {
        let db = db();
        let ada = register_user(&db, form("ada", "ada@example.com", "pw")).unwrap();
        let grace = register_user(&db, form("grace", "grace@example.com", "pw")).unwrap();

        db.set_socket(&ada.id.to_string(), "sock-a").unwrap();
        db.set_socket(&grace.id.to_string(), "sock-g").unwrap();

        let online = online_users(&db, ada.id).unwrap();
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].id, grace.id);
        assert_eq!(online[0].socket_id, "sock-g");
    }
}
