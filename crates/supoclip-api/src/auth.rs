//! Caller identity.
//!
//! Authentication happens upstream; the API trusts the `user_id` header set
//! by the front end and scopes every task operation to it.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use supoclip_models::UserId;

use crate::error::ApiError;

/// Header carrying the caller's user ID.
pub const USER_ID_HEADER: &str = "user_id";

/// Alternative spelling for proxies that drop underscore headers.
pub const USER_ID_HEADER_ALT: &str = "x-user-id";

const MAX_USER_ID_LENGTH: usize = 128;

/// Authenticated caller.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: UserId,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .or_else(|| parts.headers.get(USER_ID_HEADER_ALT))
            .ok_or_else(|| ApiError::unauthorized("User authentication required"))?;

        let user_id = raw
            .to_str()
            .map_err(|_| ApiError::bad_request("Invalid user ID format"))?
            .trim();

        if user_id.is_empty() {
            return Err(ApiError::unauthorized("User authentication required"));
        }
        if user_id.len() > MAX_USER_ID_LENGTH || user_id.chars().any(|c| c.is_control()) {
            return Err(ApiError::bad_request("Invalid user ID format"));
        }

        Ok(AuthUser {
            user_id: UserId::new(user_id),
        })
    }
}
