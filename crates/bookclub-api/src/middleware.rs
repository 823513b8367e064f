use axum::{
    extract::Request,
    http::header,
    middleware::Next,
    response::Response,
};

use crate::error::ApiError;
use crate::token;

/// Extract and validate the access JWT from the Authorization header.
/// Validated claims are attached as a request extension for handlers.
pub async fn require_auth(mut req: Request, next: Next) -> Result<Response, ApiError> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::InvalidToken)?;

    let bearer = auth_header
        .strip_prefix("Bearer ")
        .ok_or(ApiError::InvalidToken)?;

    let secret =
        std::env::var("BOOKCLUB_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());

    let claims = token::verify_token(&secret, bearer).map_err(|_| ApiError::InvalidToken)?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
