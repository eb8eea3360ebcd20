// libs/payment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Extension, Path, Query, State},
    http::HeaderMap,
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use tracing::warn;

use inventory_cell::models::InventoryError;
use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{
    ConfirmPaymentRequest, CreateBillOrderRequest, CreateBookingOrderRequest, PaymentError,
    PaymentQueryParams, WebhookEvent,
};
use crate::services::coordinator::PaymentCoordinatorService;
use crate::services::provider::ProviderConfirmation;
use crate::services::webhook::verify_webhook_signature;

fn map_payment_error(e: PaymentError) -> AppError {
    match e {
        PaymentError::NotFound => AppError::NotFound("Payment record not found".to_string()),
        PaymentError::BillNotFound => AppError::NotFound("Bill not found".to_string()),
        PaymentError::DoctorNotFound => AppError::NotFound("Doctor not found".to_string()),
        PaymentError::SlotTaken
        | PaymentError::DoctorNotAvailable
        | PaymentError::PendingDues(_)
        | PaymentError::BillAlreadyPaid
        | PaymentError::BillCancelled => AppError::Conflict(e.to_string()),
        PaymentError::Unauthorized | PaymentError::InvalidSignature => {
            AppError::Auth(e.to_string())
        }
        PaymentError::NotCompletedByProvider => AppError::BadRequest(e.to_string()),
        PaymentError::ValidationError(msg) => AppError::ValidationError(msg),
        PaymentError::ProviderUnavailable(msg) => AppError::ProviderUnavailable(msg),
        PaymentError::ProviderRejected(msg) => AppError::ExternalService(msg),
        PaymentError::Inventory(inner) => match inner {
            InventoryError::InsufficientStock { .. } => {
                AppError::InsufficientStock(inner.to_string())
            }
            other => AppError::Database(other.to_string()),
        },
        PaymentError::DatabaseError(msg) => AppError::Database(msg),
    }
}

#[axum::debug_handler]
pub async fn create_booking_order(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateBookingOrderRequest>,
) -> Result<Json<Value>, AppError> {
    let coordinator = PaymentCoordinatorService::new(&state);
    let (payment, session) = coordinator
        .create_booking_order(&user, request, auth.token())
        .await
        .map_err(map_payment_error)?;

    Ok(Json(json!({
        "success": true,
        "order": {
            "id": session.session_id,
            "amount": payment.amount,
            "currency": payment.currency,
            "payment_type": payment.payment_type,
            "checkout_url": session.checkout_url,
        }
    })))
}

#[axum::debug_handler]
pub async fn create_bill_order(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateBillOrderRequest>,
) -> Result<Json<Value>, AppError> {
    let coordinator = PaymentCoordinatorService::new(&state);
    let (payment, session) = coordinator
        .create_bill_order(&user, request, auth.token())
        .await
        .map_err(map_payment_error)?;

    Ok(Json(json!({
        "success": true,
        "order": {
            "id": session.session_id,
            "amount": payment.amount,
            "currency": payment.currency,
            "payment_type": payment.payment_type,
            "bill_id": payment.bill_id,
            "checkout_url": session.checkout_url,
        }
    })))
}

/// Pull-side confirmation: the client reports the session, we verify with
/// the provider and run the same idempotent finalize the webhook uses.
#[axum::debug_handler]
pub async fn confirm_payment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<ConfirmPaymentRequest>,
) -> Result<Json<Value>, AppError> {
    let coordinator = PaymentCoordinatorService::new(&state);
    let outcome = coordinator
        .verify_and_finalize(&user, request, auth.token())
        .await
        .map_err(map_payment_error)?;

    Ok(Json(json!({
        "success": true,
        "message": if outcome.replayed {
            "Payment already processed"
        } else {
            "Payment verified successfully"
        },
        "payment": outcome.payment,
        "appointment": outcome.appointment,
        "bill": outcome.bill,
    })))
}

/// Provider push transport. No JWT: authenticity comes from the HMAC
/// signature over the raw body. The provider gets a success response only
/// once the local idempotent write has succeeded; other failures return an
/// error so the provider retries (replays are cheap no-ops).
#[axum::debug_handler]
pub async fn provider_webhook(
    State(state): State<Arc<AppConfig>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    if state.payment_webhook_secret.is_empty() {
        warn!("Webhook received with signature verification disabled");
    } else {
        let signature = headers
            .get("x-webhook-signature")
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::Auth("Missing webhook signature".to_string()))?;

        if !verify_webhook_signature(&body, signature, &state.payment_webhook_secret) {
            return Err(AppError::Auth("Invalid webhook signature".to_string()));
        }
    }

    let event: WebhookEvent = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Malformed webhook payload: {}", e)))?;

    if event.event_type != "checkout.session.completed" {
        return Ok(Json(json!({ "received": true, "ignored": true })));
    }

    let coordinator = PaymentCoordinatorService::new(&state);
    let confirmation = ProviderConfirmation {
        session_id: event.session_id,
        provider_payment_id: event.provider_payment_id,
        paid: true,
    };

    // The webhook carries no user token; writes run under the service's own
    // key.
    match coordinator.finalize(confirmation, &state.supabase_anon_key).await {
        Ok(outcome) => Ok(Json(json!({
            "received": true,
            "replayed": outcome.replayed,
        }))),
        // Business conflicts mean the local write and its compensation both
        // landed; a retry would change nothing, so the transport gets a
        // success.
        Err(
            e @ (PaymentError::SlotTaken
            | PaymentError::BillAlreadyPaid
            | PaymentError::BillCancelled
            | PaymentError::Inventory(InventoryError::InsufficientStock { .. })),
        ) => {
            warn!("Webhook finalization compensated: {}", e);
            Ok(Json(json!({ "received": true, "compensated": e.to_string() })))
        }
        Err(e) => Err(map_payment_error(e)),
    }
}

#[axum::debug_handler]
pub async fn get_my_payments(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(params): Query<PaymentQueryParams>,
) -> Result<Json<Value>, AppError> {
    let coordinator = PaymentCoordinatorService::new(&state);
    let payments = coordinator
        .list_for_patient(&user, params.payment_type, auth.token())
        .await
        .map_err(map_payment_error)?;

    Ok(Json(json!({
        "success": true,
        "count": payments.len(),
        "payments": payments
    })))
}

#[axum::debug_handler]
pub async fn get_payment_by_session(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let coordinator = PaymentCoordinatorService::new(&state);
    let payment = coordinator
        .get_payment_for_user(&user, &session_id, auth.token())
        .await
        .map_err(map_payment_error)?;

    Ok(Json(json!({
        "success": true,
        "payment": payment
    })))
}
