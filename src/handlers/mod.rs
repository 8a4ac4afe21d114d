// src/handlers/mod.rs
use axum::{
    extract::{FromRequestParts, Query},
    http::request::Parts,
};
use serde::Deserialize;

use crate::{
    errors::DispatchError as AppError,
    models::profile::Profile,
    state::SharedState,
    utils::id_generator::{IdGenerator, IdType},
};

pub mod driver_handler;
pub mod payment_handler;
pub mod ride_handler;
pub mod tracking_handler;
pub mod user_handler;

/// Header carrying the caller's profile id.
pub const USER_HEADER: &str = "x-user-id";

#[derive(Deserialize)]
struct UserQuery {
    user_id: Option<String>,
}

/// Profile of the caller, from `x-user-id` or, for browser sockets, `?user_id=`.
pub struct CurrentUser(pub Profile);

#[axum::async_trait]
impl FromRequestParts<SharedState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &SharedState) -> Result<Self, Self::Rejection> {
        let from_header = parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim().to_string());
        let user_id = match from_header {
            Some(id) => Some(id),
            None => Query::<UserQuery>::try_from_uri(&parts.uri)
                .ok()
                .and_then(|Query(query)| query.user_id),
        }
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::Unauthorized(format!("Missing {} header", USER_HEADER)))?;
        if !IdGenerator::validate_id(&user_id, Some(IdType::User)) {
            return Err(AppError::Unauthorized(format!("Malformed user id {}", user_id)));
        }

        let profile = state
            .store
            .get_profile(&user_id)
            .await
            .map_err(|_| AppError::Unauthorized(format!("Unknown user {}", user_id)))?;
        Ok(CurrentUser(profile))
    }
}
