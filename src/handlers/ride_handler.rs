// src/handlers/ride_handler.rs
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use super::CurrentUser;
use crate::{
    errors::DispatchResult,
    models::ride::{
        CancelRideRequest, CreateRideRequest, DriverActionRequest, DriverActionResponse, FareEstimate,
        FareEstimateRequest, ProposalDecision, ProposeFareRequest, RideResponse, RideStatusUpdate,
        UpdateRideDetails,
    },
    services::ride_service::RideOperations,
    state::SharedState,
};

pub async fn create_ride(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<CreateRideRequest>,
) -> DispatchResult<(StatusCode, Json<RideResponse>)> {
    let ride = state.ride_service.create_ride(&user, request).await?;
    Ok((StatusCode::CREATED, Json(ride)))
}

pub async fn fare_estimate(
    State(state): State<SharedState>,
    CurrentUser(_user): CurrentUser,
    Json(request): Json<FareEstimateRequest>,
) -> DispatchResult<Json<FareEstimate>> {
    Ok(Json(state.ride_service.estimate_fare(request).await?))
}

pub async fn current_ride(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
) -> DispatchResult<Json<Option<RideResponse>>> {
    Ok(Json(state.ride_service.current_ride(&user).await?))
}

pub async fn my_rides(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
) -> DispatchResult<Json<Vec<RideResponse>>> {
    Ok(Json(state.ride_service.my_rides(&user).await?))
}

pub async fn available_rides(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
) -> DispatchResult<Json<Vec<RideResponse>>> {
    Ok(Json(state.ride_service.available_rides(&user).await?))
}

pub async fn get_ride(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(ride_id): Path<String>,
) -> DispatchResult<Json<RideResponse>> {
    Ok(Json(state.ride_service.get_ride(&user, &ride_id).await?))
}

pub async fn update_ride_details(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(ride_id): Path<String>,
    Json(patch): Json<UpdateRideDetails>,
) -> DispatchResult<Json<RideResponse>> {
    Ok(Json(state.ride_service.update_ride_details(&user, &ride_id, patch).await?))
}

pub async fn update_status(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(ride_id): Path<String>,
    Json(update): Json<RideStatusUpdate>,
) -> DispatchResult<Json<RideResponse>> {
    Ok(Json(state.ride_service.update_status(&user, &ride_id, update).await?))
}

pub async fn driver_action(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(ride_id): Path<String>,
    Json(request): Json<DriverActionRequest>,
) -> DispatchResult<Json<DriverActionResponse>> {
    Ok(Json(state.ride_service.driver_action(&user, &ride_id, request.action).await?))
}

pub async fn cancel_ride(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(ride_id): Path<String>,
    request: Option<Json<CancelRideRequest>>,
) -> DispatchResult<Json<RideResponse>> {
    let reason = request.and_then(|Json(body)| body.cancellation_reason);
    Ok(Json(state.ride_service.cancel_ride(&user, &ride_id, reason).await?))
}

pub async fn propose_fare(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(ride_id): Path<String>,
    Json(request): Json<ProposeFareRequest>,
) -> DispatchResult<Json<RideResponse>> {
    Ok(Json(state.ride_service.propose_fare(&user, &ride_id, request.proposed_fare).await?))
}

pub async fn respond_to_proposal(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(ride_id): Path<String>,
    Json(decision): Json<ProposalDecision>,
) -> DispatchResult<Json<DriverActionResponse>> {
    Ok(Json(state.ride_service.respond_to_proposal(&user, &ride_id, decision.accept).await?))
}
