use axum::{
    Json,
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::error;
use uuid::Uuid;

use bookclub_db::Database;
use bookclub_db::models::{CommentRow, PostRow};
use bookclub_types::api::PostResponse;
use bookclub_types::models::{Book, Comment, Review};

use crate::AppState;
use crate::auth::read_text;
use crate::error::ApiError;
use crate::uploads;

const MISSING_FIELDS: &str = "Please provide all required fields";

pub struct PostForm {
    pub user_name: String,
    pub title: String,
    pub book_title: String,
    pub book_authors: String,
    pub book_image: String,
    pub rating: u8,
    pub description: String,
    pub image: Option<String>,
    /// Full comment list; on update it replaces the stored list wholesale.
    pub comments: Vec<Comment>,
}

// -- Handlers --

pub async fn get_all_posts(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    // Run blocking DB work off the async runtime
    let db = state.db.clone();
    let posts = tokio::task::spawn_blocking(move || fetch_all_posts(&db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(e.to_string())
        })??;
    Ok(Json(posts))
}

pub async fn get_post_by_id(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let post = fetch_post(&state.db, post_id)?;
    Ok(Json(post))
}

pub async fn get_posts_by_user(
    State(state): State<AppState>,
    Path(user_name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let posts = tokio::task::spawn_blocking(move || fetch_posts_by_user(&db, &user_name))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(e.to_string())
        })??;
    Ok(Json(posts))
}

pub async fn create_post(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let form = read_post_form(&state, multipart).await?;
    let post = create_post_record(&state.db, form)?;
    Ok((StatusCode::CREATED, Json(post)))
}

pub async fn update_post(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let form = read_post_form(&state, multipart).await?;
    let post = replace_post_record(&state.db, post_id, form)?;
    Ok(Json(post))
}

pub async fn delete_post(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    delete_post_record(&state.db, post_id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn read_post_form(state: &AppState, mut multipart: Multipart) -> Result<PostForm, ApiError> {
    let mut form = PostForm {
        user_name: String::new(),
        title: String::new(),
        book_title: String::new(),
        book_authors: String::new(),
        book_image: String::new(),
        rating: 0,
        description: String::new(),
        image: None,
        comments: Vec::new(),
    };

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        match field.name().unwrap_or("") {
            "userName" => form.user_name = read_text(field).await?,
            "title" => form.title = read_text(field).await?,
            "bookTitle" => form.book_title = read_text(field).await?,
            "bookAuthors" => form.book_authors = read_text(field).await?,
            "bookImage" => form.book_image = read_text(field).await?,
            "description" => form.description = read_text(field).await?,
            "rating" => {
                let raw = read_text(field).await?;
                form.rating = raw
                    .parse()
                    .map_err(|_| ApiError::BadRequest(format!("Invalid rating '{}'", raw)))?;
            }
            "comments" => {
                let raw = read_text(field).await?;
                form.comments = serde_json::from_str(&raw)
                    .map_err(|e| ApiError::BadRequest(format!("Invalid comments: {}", e)))?;
            }
            "image" => {
                let original = field.file_name().unwrap_or("image").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.to_string()))?;
                form.image = Some(uploads::save_image(&state.upload_dir, &original, &data).await?);
            }
            _ => {}
        }
    }

    Ok(form)
}

// -- Service layer --

fn validate(form: &PostForm) -> Result<(), ApiError> {
    if form.user_name.is_empty()
        || form.title.is_empty()
        || form.book_title.is_empty()
        || form.description.is_empty()
    {
        return Err(ApiError::BadRequest(MISSING_FIELDS.into()));
    }
    if !(1..=5).contains(&form.rating) {
        return Err(ApiError::BadRequest("Rating must be between 1 and 5".into()));
    }
    Ok(())
}

pub fn create_post_record(db: &Database, form: PostForm) -> Result<PostResponse, ApiError> {
    validate(&form)?;

    let post_id = Uuid::new_v4();
    let row = to_post_row(post_id, &form);
    db.insert_post(&row)?;

    fetch_post(db, post_id)
}

pub fn fetch_post(db: &Database, post_id: Uuid) -> Result<PostResponse, ApiError> {
    let (row, comments) = db
        .get_post(&post_id.to_string())?
        .ok_or_else(|| ApiError::NotFound("Post not found".into()))?;
    to_post_response(row, comments)
}

pub fn fetch_all_posts(db: &Database) -> Result<Vec<PostResponse>, ApiError> {
    db.get_all_posts()?
        .into_iter()
        .map(|(row, comments)| to_post_response(row, comments))
        .collect()
}

pub fn fetch_posts_by_user(db: &Database, user_name: &str) -> Result<Vec<PostResponse>, ApiError> {
    db.get_posts_by_user(user_name)?
        .into_iter()
        .map(|(row, comments)| to_post_response(row, comments))
        .collect()
}

/// Whole-document replace, comment list included. Concurrent edits resolve
/// by last-writer-wins on the entire post.
pub fn replace_post_record(
    db: &Database,
    post_id: Uuid,
    form: PostForm,
) -> Result<PostResponse, ApiError> {
    validate(&form)?;

    let row = to_post_row(post_id, &form);
    let comment_rows: Vec<CommentRow> = form
        .comments
        .iter()
        .enumerate()
        .map(|(seq, c)| CommentRow {
            post_id: post_id.to_string(),
            seq: seq as i64,
            user_name: c.username.clone(),
            content: c.content.clone(),
        })
        .collect();

    if !db.replace_post(&row, &comment_rows)? {
        return Err(ApiError::NotFound("Post not found".into()));
    }

    fetch_post(db, post_id)
}

pub fn delete_post_record(db: &Database, post_id: Uuid) -> Result<(), ApiError> {
    if !db.delete_post(&post_id.to_string())? {
        return Err(ApiError::NotFound("Post not found".into()));
    }
    Ok(())
}

fn to_post_row(post_id: Uuid, form: &PostForm) -> PostRow {
    PostRow {
        id: post_id.to_string(),
        user_name: form.user_name.clone(),
        title: form.title.clone(),
        book_title: form.book_title.clone(),
        book_authors: form.book_authors.clone(),
        book_image: form.book_image.clone(),
        rating: form.rating,
        description: form.description.clone(),
        image: form.image.clone(),
        created_at: String::new(),
    }
}

fn to_post_response(row: PostRow, comments: Vec<CommentRow>) -> Result<PostResponse, ApiError> {
    let id = row
        .id
        .parse()
        .map_err(|_| ApiError::Internal(format!("corrupt post id '{}'", row.id)))?;

    Ok(PostResponse {
        id,
        user_name: row.user_name,
        title: row.title,
        book: Book {
            title: row.book_title,
            authors: row.book_authors,
            image: row.book_image,
        },
        review: Review {
            rating: row.rating,
            description: row.description,
        },
        image: row.image,
        comments: comments
            .into_iter()
            .map(|c| Comment {
                username: c.user_name,
                content: c.content,
            })
            .collect(),
        created_at: row.created_at,
    })
}
