// src/routes.rs
use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    handlers::{driver_handler, payment_handler, ride_handler, tracking_handler, user_handler},
    state::SharedState,
};

pub fn create_router(state: SharedState) -> Router {
    let cors = cors_layer(&state.config.allowed_origins);

    Router::new()
        .route("/health", get(user_handler::health))
        .route("/vehicle-types", get(user_handler::list_vehicle_types))
        .route("/users", post(user_handler::register_user))
        .route("/drivers/me/online", post(driver_handler::set_online))
        .route("/drivers/me/location", post(driver_handler::update_location))
        .route("/drivers/me/stats", get(driver_handler::driver_stats))
        .route("/rides", post(ride_handler::create_ride))
        .route("/rides/fare-estimate", post(ride_handler::fare_estimate))
        .route("/rides/current", get(ride_handler::current_ride))
        .route("/rides/mine", get(ride_handler::my_rides))
        .route("/rides/available", get(ride_handler::available_rides))
        .route(
            "/rides/:id",
            get(ride_handler::get_ride).patch(ride_handler::update_ride_details),
        )
        .route("/rides/:id/status", post(ride_handler::update_status))
        .route("/rides/:id/action", post(ride_handler::driver_action))
        .route("/rides/:id/cancel", post(ride_handler::cancel_ride))
        .route("/rides/:id/propose-fare", post(ride_handler::propose_fare))
        .route("/rides/:id/proposal", post(ride_handler::respond_to_proposal))
        .route("/payments/initiate", post(payment_handler::initiate_payment))
        .route("/payments/confirm-cash", post(payment_handler::confirm_cash))
        .route(
            "/payments/callback",
            get(payment_handler::callback_query).post(payment_handler::callback_form),
        )
        .route("/payments/demo-callback", get(payment_handler::demo_callback))
        .route("/wallet/stats", get(payment_handler::wallet_stats))
        .route("/ws/rides/:id", get(tracking_handler::ride_socket))
        .route("/ws/drivers", get(tracking_handler::pool_socket))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if allowed_origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin {}", origin);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}
