use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;
use tokio::spawn;
use tracing::info;

use alloy_primitives::{Address, U256};
use chrono::Utc;

use super::models::*;
use crate::{
    compliance::{
        models::{VerifyBundleRequest, VerifyBundleResponse},
        ComplianceClient, ComplianceReconciler, Receipt, RecordTipRequest, RecordTipResponse,
    },
    error::{AppError, AppResult, ComplianceError},
    ledger::BatchPayoutLedger,
    relay::RelayService,
    token::units::format_token_amount,
};

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<BatchPayoutLedger>,
    pub relay: Arc<RelayService>,
    pub compliance: ComplianceClient,
    pub reconciler: Arc<ComplianceReconciler>,
    pub chain_id: u64,
    pub token_address: Address,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "Railpay Relayer".to_string(),
        relayer_addresses: state.relay.signer_addresses(),
        chain_id: state.chain_id,
        token_address: state.token_address,
        timestamp: Utc::now(),
    })
}

/// Execute a gasless batch payout
/// POST /relay-batch-payout
///
/// Full success returns every transaction hash plus the recorded payout id;
/// any failure aborts the remaining authorizations and reports the
/// succeeded/failed index split through the error body. Compliance
/// anchoring runs asynchronously after the response.
pub async fn relay_batch_payout(
    State(state): State<AppState>,
    Json(request): Json<BatchRelayRequest>,
) -> AppResult<Json<BatchRelayResponse>> {
    info!(
        "Relaying batch payout: {} authorizations ({})",
        request.authorizations.len(),
        request.payout_ref
    );

    let outcome = state
        .relay
        .relay_batch(&request.authorizations, &request.payout_ref, None)
        .await?;

    let response = BatchRelayResponse::from(&outcome);

    // Anchor each settled transfer with the compliance service off the
    // request path; anchoring is never a precondition for having paid
    let reconciler = state.reconciler.clone();
    let payout_ref = request.payout_ref.clone();
    spawn(async move {
        reconciler.submit_batch(&outcome, &payout_ref).await;
    });

    Ok(Json(response))
}

/// GET /api/v1/payouts
pub async fn list_payouts(State(state): State<AppState>) -> AppResult<Json<PayoutListResponse>> {
    let mut payouts = state.ledger.all_payouts().await;
    // Newest first, same ordering the dashboard expects
    payouts.sort_by(|a, b| b.payout_id.cmp(&a.payout_id));

    let mut responses = Vec::with_capacity(payouts.len());
    for payout in payouts {
        let recipients = state.ledger.payout_recipients(payout.payout_id).await?;
        responses.push(PayoutResponse::new(payout, Some(recipients)));
    }

    Ok(Json(PayoutListResponse {
        count: state.ledger.payout_count().await,
        payouts: responses,
    }))
}

/// GET /api/v1/payouts/stats
pub async fn get_payout_stats(
    State(state): State<AppState>,
) -> AppResult<Json<PayoutStatsResponse>> {
    let payouts = state.ledger.all_payouts().await;

    let total_payouts = payouts.len() as u64;
    let mut total_amount = U256::ZERO;
    let mut total_recipients = 0u64;
    let mut completed_payouts = 0u64;
    for payout in &payouts {
        total_amount = total_amount.saturating_add(payout.total_amount);
        total_recipients += payout.recipient_count;
        if payout.completed {
            completed_payouts += 1;
        }
    }
    let average = if total_payouts > 0 {
        total_amount / U256::from(total_payouts)
    } else {
        U256::ZERO
    };

    Ok(Json(PayoutStatsResponse {
        total_payouts,
        total_amount: format_token_amount(total_amount)?,
        total_recipients,
        pending_payouts: total_payouts - completed_payouts,
        completed_payouts,
        average_payout: format_token_amount(average)?,
    }))
}

/// GET /api/v1/payouts/:id
pub async fn get_payout(
    State(state): State<AppState>,
    Path(payout_id): Path<u64>,
) -> AppResult<Json<PayoutResponse>> {
    let payout = state.ledger.payout(payout_id).await?;
    let recipients = state.ledger.payout_recipients(payout_id).await?;
    Ok(Json(PayoutResponse::new(payout, Some(recipients))))
}

/// GET /api/v1/payouts/:id/recipients
pub async fn get_payout_recipients(
    State(state): State<AppState>,
    Path(payout_id): Path<u64>,
) -> AppResult<Json<Vec<RecipientPaymentResponse>>> {
    let recipients = state.ledger.payout_recipients(payout_id).await?;
    Ok(Json(recipients.into_iter().map(Into::into).collect()))
}

/// GET /api/v1/recipients/:address/history
pub async fn get_recipient_history(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> AppResult<Json<Vec<RecipientPaymentResponse>>> {
    let recipient: Address = address
        .parse()
        .map_err(|_| AppError::InvalidAddress(address.clone()))?;
    let history = state.ledger.recipient_history(recipient).await;
    Ok(Json(history.into_iter().map(Into::into).collect()))
}

/// GET /api/v1/receipts/:id
pub async fn get_receipt(
    State(state): State<AppState>,
    Path(receipt_id): Path<String>,
) -> AppResult<Json<Receipt>> {
    let receipt = state.compliance.get_receipt(&receipt_id).await?;
    Ok(Json(receipt))
}

/// POST /api/v1/compliance/record
///
/// Same-origin proxy for the compliance service's submit endpoint: the
/// service has no cross-origin access control, so browser callers go
/// through here and the API key stays server-side.
pub async fn record_compliance_receipt(
    State(state): State<AppState>,
    Json(request): Json<RecordTipRequest>,
) -> AppResult<Json<RecordTipResponse>> {
    if !state.compliance.has_api_key() {
        return Err(ComplianceError::MissingApiKey.into());
    }
    let response = state.compliance.record_tip(&request).await?;
    info!("🧾 Proxied compliance receipt: {}", response.receipt_id);
    Ok(Json(response))
}

/// POST /api/v1/compliance/verify
pub async fn verify_compliance_bundle(
    State(state): State<AppState>,
    Json(request): Json<VerifyBundleRequest>,
) -> AppResult<Json<VerifyBundleResponse>> {
    let response = state.compliance.verify_bundle(&request.bundle_url).await?;
    Ok(Json(response))
}
