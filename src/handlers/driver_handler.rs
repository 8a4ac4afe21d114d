// src/handlers/driver_handler.rs
use axum::{extract::State, Json};

use super::CurrentUser;
use crate::{
    errors::{DispatchError as AppError, DispatchResult},
    models::{
        payment::DriverStats,
        profile::{LocationFix, OnlineToggle, Profile},
    },
    services::{payment_service::PaymentOperations, profile_service::ProfileOperations},
    state::SharedState,
};

fn require_driver(user: &Profile) -> DispatchResult<()> {
    if user.is_driver() {
        Ok(())
    } else {
        Err(AppError::forbidden("Only drivers can use this endpoint"))
    }
}

pub async fn set_online(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Json(toggle): Json<OnlineToggle>,
) -> DispatchResult<Json<Profile>> {
    require_driver(&user)?;
    Ok(Json(state.profile_service.set_online(&user.id, toggle.is_online).await?))
}

pub async fn update_location(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Json(fix): Json<LocationFix>,
) -> DispatchResult<Json<Profile>> {
    require_driver(&user)?;
    Ok(Json(state.profile_service.update_location(&user.id, fix.lat, fix.lng).await?))
}

pub async fn driver_stats(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
) -> DispatchResult<Json<DriverStats>> {
    Ok(Json(state.payment_service.driver_stats(&user).await?))
}
