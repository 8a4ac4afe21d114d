// src/handlers/user_handler.rs
use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::{
    errors::DispatchResult,
    models::{
        profile::{Profile, RegisterProfileRequest},
        vehicle::VehicleType,
    },
    services::profile_service::ProfileOperations,
    state::SharedState,
};

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "sparrow-dispatch" }))
}

pub async fn register_user(
    State(state): State<SharedState>,
    Json(request): Json<RegisterProfileRequest>,
) -> DispatchResult<(StatusCode, Json<Profile>)> {
    let profile = state.profile_service.register_profile(request).await?;
    Ok((StatusCode::CREATED, Json(profile)))
}

pub async fn list_vehicle_types(State(state): State<SharedState>) -> DispatchResult<Json<Vec<VehicleType>>> {
    Ok(Json(state.profile_service.list_vehicle_types().await?))
}
