// src/handlers/payment_handler.rs
use axum::{
    extract::{Query, State},
    http::StatusCode,
    Form, Json,
};

use super::CurrentUser;
use crate::{
    errors::DispatchResult,
    models::payment::{
        CallbackData, ConfirmCashRequest, DemoCallbackQuery, InitiatePaymentRequest, InitiatePaymentResponse,
        SettlementOutcome, WalletStats,
    },
    services::payment_service::PaymentOperations,
    state::SharedState,
};

type SettlementReply = DispatchResult<(StatusCode, Json<SettlementOutcome>)>;

/// Declined payments answer 400 so the provider and the client see the failure.
fn settlement_reply(outcome: SettlementOutcome) -> (StatusCode, Json<SettlementOutcome>) {
    let status = match outcome {
        SettlementOutcome::Failed { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::OK,
    };
    (status, Json(outcome))
}

pub async fn initiate_payment(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<InitiatePaymentRequest>,
) -> DispatchResult<Json<InitiatePaymentResponse>> {
    Ok(Json(state.payment_service.initiate(&user, request).await?))
}

pub async fn confirm_cash(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<ConfirmCashRequest>,
) -> SettlementReply {
    let outcome = state.payment_service.confirm_cash(&user, request).await?;
    Ok(settlement_reply(outcome))
}

pub async fn callback_query(State(state): State<SharedState>, Query(data): Query<CallbackData>) -> SettlementReply {
    let outcome = state.payment_service.handle_callback(data).await?;
    Ok(settlement_reply(outcome))
}

pub async fn callback_form(State(state): State<SharedState>, Form(data): Form<CallbackData>) -> SettlementReply {
    let outcome = state.payment_service.handle_callback(data).await?;
    Ok(settlement_reply(outcome))
}

pub async fn demo_callback(
    State(state): State<SharedState>,
    Query(query): Query<DemoCallbackQuery>,
) -> SettlementReply {
    let outcome = state.payment_service.demo_callback(query).await?;
    Ok(settlement_reply(outcome))
}

pub async fn wallet_stats(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
) -> DispatchResult<Json<WalletStats>> {
    Ok(Json(state.payment_service.wallet_stats(&user).await?))
}
