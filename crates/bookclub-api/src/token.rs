use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use uuid::Uuid;

use bookclub_types::api::AuthTokens;
use bookclub_types::models::Claims;

use crate::AuthConfig;

pub fn create_token(
    secret: &str,
    user_id: Uuid,
    user_name: &str,
    ttl_secs: i64,
) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        user_name: user_name.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::seconds(ttl_secs)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

/// Stateless signature + expiry verification. Revocation is only honored for
/// refresh tokens via the stored set, checked separately at logout.
pub fn verify_token(secret: &str, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(data.claims)
}

/// The pair every successful authentication returns. Google sign-in reuses
/// this same issuance path.
pub fn issue_tokens(auth: &AuthConfig, user_id: Uuid, user_name: &str) -> anyhow::Result<AuthTokens> {
    Ok(AuthTokens {
        access_token: create_token(&auth.jwt_secret, user_id, user_name, auth.access_ttl_secs)?,
        refresh_token: create_token(&auth.jwt_secret, user_id, user_name, auth.refresh_ttl_secs)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn roundtrip_preserves_claims() {
        let user_id = Uuid::new_v4();
        let token = create_token(SECRET, user_id, "ada", 3600).unwrap();

        let claims = verify_token(SECRET, &token).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.user_name, "ada");
    }

    #[test]
    fn wrong_secret_rejected() {
        let token = create_token(SECRET, Uuid::new_v4(), "ada", 3600).unwrap();
        assert!(verify_token("other-secret", &token).is_err());
    }

    #[test]
    fn tampered_token_rejected() {
        let token = create_token(SECRET, Uuid::new_v4(), "ada", 3600).unwrap();
        let mut tampered = token.clone();
        tampered.pop();
        tampered.push(if token.ends_with('A') { 'B' } else { 'A' });
        assert!(verify_token(SECRET, &tampered).is_err());
    }

    #[test]
    fn expired_token_rejected() {
        let token = create_token(SECRET, Uuid::new_v4(), "ada", -120).unwrap();
        assert!(verify_token(SECRET, &token).is_err());
    }
}
