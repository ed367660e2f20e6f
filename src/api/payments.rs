use axum::{body::Bytes, extract::State, http::HeaderMap};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::domain::aggregates::{IntentSettlement, OrderError};
use crate::payments::{refund_key, verify_signature, PaymentIntentObject, StripeClient, StripeError, StripeEvent};
use crate::{Result, ShopError};
use super::extract::{Json, Path};
use super::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateIntentRequest {
    #[serde(alias = "orderId")]
    pub order_id: Uuid,
}

/// Refunds or voids the payment intent of an order being cancelled.
pub(super) async fn settle_intent(stripe: Option<&StripeClient>, order_id: Uuid, settlement: IntentSettlement) -> Result<()> {
    let stripe = stripe.ok_or(ShopError::PaymentsDisabled)?;
    stripe.settle(&settlement).await?;
    info!(order_id = %order_id, settlement = ?settlement, "payment intent settled");
    Ok(())
}

pub async fn create_intent(State(state): State<AppState>, user: AuthUser, Json(req): Json<CreateIntentRequest>) -> Result<Json<Value>> {
    let stripe = state.stripe()?;
    let order = state.store.find_order(req.order_id).await?.ok_or_else(|| ShopError::not_found("Order"))?;
    user.require_owner(order.user_id())?;
    order.check_payable()?;

    let metadata = [("orderId", order.id().to_string()), ("userId", user.id().to_string())];
    let intent = stripe.create_payment_intent(order.total_price(), &metadata).await?;
    let intent_id = intent.id.clone();
    let events = match state.store.update_order(order.id(), |o| Ok(o.attach_payment_intent(intent_id)?)).await {
        Ok((_, _, events)) => events,
        Err(e) => {
            // The order changed while the intent was created; it must not stay chargeable.
            if let Err(void) = stripe.settle(&IntentSettlement::Void(intent.id.clone())).await {
                warn!(payment_intent = %intent.id, error = %void, "could not void unattached payment intent");
            }
            return Err(e);
        }
    };
    state.bus.publish(events).await;

    Ok(Json(json!({
        "clientSecret": intent.client_secret,
        "amount": intent.amount,
        "currency": intent.currency,
    })))
}

/// Stripe calls this with the raw signed body.
pub async fn webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<Json<Value>> {
    let stripe = state.stripe()?;
    let secret = stripe.webhook_secret().ok_or(StripeError::MissingWebhookSecret)?;
    let signature = headers.get("stripe-signature").and_then(|v| v.to_str().ok());
    if let Err(e) = verify_signature(&body, signature, secret, stripe.webhook_tolerance_secs(), Utc::now().timestamp()) {
        warn!(error = %e, "rejected Stripe webhook");
        return Err(e.into());
    }
    let event: StripeEvent = serde_json::from_slice(&body).map_err(|e| ShopError::Validation(format!("Webhook Error: {e}")))?;

    match event.event_type.as_str() {
        "payment_intent.succeeded" => {
            let intent = event.payment_intent().map_err(|e| ShopError::Validation(format!("Webhook Error: {e}")))?;
            mark_paid(&state, &intent).await?;
        }
        "payment_intent.payment_failed" => {
            let intent = event.payment_intent().ok();
            warn!(
                event_id = %event.id,
                payment_intent = intent.as_ref().map(|i| i.id.as_str()).unwrap_or("unknown"),
                reason = intent.as_ref().and_then(PaymentIntentObject::failure_message).unwrap_or("unknown"),
                "payment failed"
            );
        }
        other => info!(event_id = %event.id, event_type = other, "unhandled Stripe event"),
    }
    Ok(Json(json!({ "received": true })))
}

/// Unknown or cancelled orders are logged and acknowledged so Stripe stops retrying.
async fn mark_paid(state: &AppState, intent: &PaymentIntentObject) -> Result<()> {
    let order_id = match intent.order_id().and_then(|s| Uuid::parse_str(s).ok()) {
        Some(id) => Some(id),
        None => state.store.find_order_id_by_intent(&intent.id).await?,
    };
    let Some(order_id) = order_id else {
        warn!(payment_intent = %intent.id, "payment succeeded for an unknown order");
        return Ok(());
    };
    let email = intent.receipt_email.clone();
    match state.store.update_order(order_id, |o| Ok(o.confirm_payment(&intent.id, email)?)).await {
        Ok((_, true, events)) => {
            info!(order_id = %order_id, payment_intent = %intent.id, amount = intent.amount, "order paid");
            state.bus.publish(events).await;
        }
        Ok((_, false, _)) => info!(order_id = %order_id, "order already paid"),
        Err(ShopError::NotFound(_)) => warn!(order_id = %order_id, "payment succeeded for a deleted order"),
        Err(ShopError::InvalidState(msg)) => {
            warn!(order_id = %order_id, payment_intent = %intent.id, reason = %msg, "payment succeeded for a cancelled order");
            refund_late_payment(state, order_id, &intent.id).await?;
        }
        Err(e) => return Err(e),
    }
    Ok(())
}

/// A charge that lands after cancellation is refunded. The refund shares its
/// idempotency key with the cancel path, so a void that already refunded is replayed.
async fn refund_late_payment(state: &AppState, order_id: Uuid, intent_id: &str) -> Result<()> {
    state.stripe()?.create_refund(intent_id, &refund_key(intent_id)).await?;
    match state.store.update_order(order_id, |o| Ok(o.record_late_refund(intent_id)?)).await {
        Ok((_, recorded, events)) => {
            info!(order_id = %order_id, payment_intent = %intent_id, recorded, "late payment refunded");
            state.bus.publish(events).await;
            Ok(())
        }
        Err(ShopError::NotFound(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Refunds the intent, cancels the order and restocks it in one transaction.
pub async fn refund_order(State(state): State<AppState>, user: AuthUser, Path(order_id): Path<Uuid>) -> Result<Json<Value>> {
    let stripe = state.stripe()?.clone();
    let (order, events) = state.store.cancel_order(
        order_id,
        |o| {
            user.require_owner_or_admin(o.user_id())?;
            if !o.is_paid() { return Err(OrderError::NotPaid.into()); }
            if o.paid_intent().is_none() { return Err(ShopError::NotFound("PaymentIntent not found".into())); }
            Ok(())
        },
        |id, settlement| async move { settle_intent(Some(&stripe), id, settlement).await },
    ).await?;
    state.bus.publish(events).await;
    Ok(Json(json!({ "message": "Order refunded and cancelled", "order": order })))
}
