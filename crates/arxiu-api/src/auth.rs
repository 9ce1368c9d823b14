//! HTTP Basic authentication against the users table.

use arxiu_core::{store::Store, user::User};
use argon2::{Argon2, PasswordHash, PasswordVerifier};
use axum::{
  extract::FromRequestParts,
  http::{HeaderMap, header, request::Parts},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as B64};

use crate::{AppState, error::ApiError};

/// The authenticated caller.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

/// `(username, password)` from an `Authorization: Basic` header.
pub fn basic_credentials(headers: &HeaderMap) -> Result<(String, String), ApiError> {
  let value = headers
    .get(header::AUTHORIZATION)
    .and_then(|v| v.to_str().ok())
    .ok_or(ApiError::Unauthorized)?;
  let encoded = value.strip_prefix("Basic ").ok_or(ApiError::Unauthorized)?;
  let decoded = B64.decode(encoded.trim()).map_err(|_| ApiError::Unauthorized)?;
  let creds = String::from_utf8(decoded).map_err(|_| ApiError::Unauthorized)?;
  let (username, password) = creds.split_once(':').ok_or(ApiError::Unauthorized)?;
  Ok((username.to_owned(), password.to_owned()))
}

/// Verify a password against an argon2 PHC string. CPU-heavy; run it off
/// the request task.
pub fn verify_password(password: &str, phc: &str) -> bool {
  let Ok(parsed) = PasswordHash::new(phc) else {
    return false;
  };
  Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok()
}

impl<S: Store + 'static> FromRequestParts<AppState<S>> for CurrentUser {
  type Rejection = ApiError;

  async fn from_request_parts(
    parts: &mut Parts,
    state: &AppState<S>,
  ) -> Result<Self, Self::Rejection> {
    let (username, password) = basic_credentials(&parts.headers)?;
    let user = state.engine.user_by_username(&username).await?.ok_or(ApiError::Unauthorized)?;

    let phc = user.password_hash.clone();
    let valid = tokio::task::spawn_blocking(move || verify_password(&password, &phc))
      .await
      .map_err(|e| ApiError::Internal(e.to_string()))?;
    if !valid {
      tracing::debug!(username, "rejected credentials");
      return Err(ApiError::Unauthorized);
    }
    Ok(CurrentUser(user))
  }
}

#[cfg(test)]
mod tests {
  use axum::http::HeaderValue;

  use super::*;

  fn headers(value: &str) -> HeaderMap {
    let mut h = HeaderMap::new();
    h.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
    h
  }

  #[test]
  fn parses_basic_header() {
    let value = format!("Basic {}", B64.encode("anna:se:cret"));
    let (user, pass) = basic_credentials(&headers(&value)).unwrap();
    assert_eq!(user, "anna");
    assert_eq!(pass, "se:cret");
  }

  #[test]
  fn rejects_malformed_headers() {
    assert!(basic_credentials(&HeaderMap::new()).is_err());
    assert!(basic_credentials(&headers("Bearer abc")).is_err());
    assert!(basic_credentials(&headers("Basic !!!not-base64!!!")).is_err());
    let no_colon = format!("Basic {}", B64.encode("anna"));
    assert!(basic_credentials(&headers(&no_colon)).is_err());
  }

  #[test]
  fn garbage_hash_never_verifies() {
    assert!(!verify_password("secret", "not a phc string"));
  }
}
