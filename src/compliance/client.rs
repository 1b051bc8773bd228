//! HTTP client for the external compliance attestation service.
//!
//! The service is consumed only through its documented interface: submit,
//! fetch, verify, and a per-receipt event stream — all authenticated with a
//! static API key header. The client caches the last known state of each
//! receipt and treats updates after a terminal status as no-ops.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use reqwest::StatusCode;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use crate::error::ComplianceError;

use super::models::{
    Receipt, RecordTipRequest, RecordTipResponse, VerifyBundleRequest, VerifyBundleResponse,
};
use super::subscription::{ReceiptSubscription, SseParser};

const API_KEY_HEADER: &str = "x-api-key";
const SUBSCRIPTION_CHANNEL_CAPACITY: usize = 16;

#[derive(Clone)]
pub struct ComplianceClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    cache: Arc<RwLock<HashMap<String, Receipt>>>,
}

impl ComplianceClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn with_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header(API_KEY_HEADER, key),
            None => builder,
        }
    }

    async fn read_error(response: reqwest::Response) -> ComplianceError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        ComplianceError::Api { status, body }
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComplianceError> {
        if !response.status().is_success() {
            return Err(Self::read_error(response).await);
        }
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| ComplianceError::Decode(e.to_string()))
    }

    /// Submit one attestation request for a settled transfer
    pub async fn record_tip(
        &self,
        request: &RecordTipRequest,
    ) -> Result<RecordTipResponse, ComplianceError> {
        let url = format!("{}/v1/record-tip", self.base_url);
        let response = self
            .with_auth(self.http.post(&url))
            .json(request)
            .send()
            .await?;
        Self::decode(response).await
    }

    /// Fetch a receipt and merge it into the last-known-state cache
    pub async fn get_receipt(&self, receipt_id: &str) -> Result<Receipt, ComplianceError> {
        let url = format!("{}/v1/receipts/{}", self.base_url, receipt_id);
        let response = self.with_auth(self.http.get(&url)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(Self::read_error(response).await);
        }
        let receipt: Receipt = Self::decode(response).await?;
        Ok(self.apply_update(receipt).await)
    }

    pub async fn verify_bundle(
        &self,
        bundle_url: &str,
    ) -> Result<VerifyBundleResponse, ComplianceError> {
        let url = format!("{}/v1/verify", self.base_url);
        let response = self
            .with_auth(self.http.post(&url))
            .json(&VerifyBundleRequest {
                bundle_url: bundle_url.to_string(),
            })
            .send()
            .await?;
        Self::decode(response).await
    }

    pub async fn cached_receipt(&self, receipt_id: &str) -> Option<Receipt> {
        self.cache.read().await.get(receipt_id).cloned()
    }

    /// Merge an observed snapshot into the cache. Once a receipt has reached
    /// a terminal status any further update is a no-op and the terminal
    /// snapshot is returned instead.
    async fn apply_update(&self, receipt: Receipt) -> Receipt {
        let mut cache = self.cache.write().await;
        match cache.get(&receipt.receipt_id) {
            Some(known)
                if known.status.is_terminal()
                    && !known.status.can_transition_to(receipt.status) =>
            {
                debug!(
                    "Receipt {} already terminal ({:?}), ignoring update",
                    receipt.receipt_id, known.status
                );
                known.clone()
            }
            _ => {
                cache.insert(receipt.receipt_id.clone(), receipt.clone());
                receipt
            }
        }
    }

    /// Open the server-push event stream for a receipt. Snapshots are
    /// delivered until a terminal status; stream errors surface as typed
    /// failures on the subscription.
    pub async fn subscribe(
        &self,
        receipt_id: &str,
    ) -> Result<ReceiptSubscription, ComplianceError> {
        let url = format!("{}/v1/receipts/{}/events", self.base_url, receipt_id);
        let response = self
            .with_auth(self.http.get(&url))
            .header("accept", "text/event-stream")
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::read_error(response).await);
        }

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CHANNEL_CAPACITY);
        let client = self.clone();
        let task = tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut parser = SseParser::default();

            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx.send(Err(ComplianceError::Transport(e.to_string()))).await;
                        return;
                    }
                };

                for payload in parser.feed(&String::from_utf8_lossy(&chunk)) {
                    match serde_json::from_str::<Receipt>(&payload) {
                        Ok(receipt) => {
                            let receipt = client.apply_update(receipt).await;
                            let terminal = receipt.status.is_terminal();
                            if tx.send(Ok(receipt)).await.is_err() {
                                return;
                            }
                            if terminal {
                                return;
                            }
                        }
                        Err(e) => {
                            let _ = tx.send(Err(ComplianceError::Decode(e.to_string()))).await;
                        }
                    }
                }
            }

            let _ = tx.send(Err(ComplianceError::StreamClosed)).await;
        });

        Ok(ReceiptSubscription { rx, task })
    }

    /// Follow a receipt to its terminal status: subscribe first, fall back
    /// to polling if the stream fails or closes early.
    pub async fn watch_until_terminal(
        &self,
        receipt_id: &str,
        poll_interval: Duration,
        max_polls: u32,
    ) -> Result<Receipt, ComplianceError> {
        if let Some(receipt) = self.cached_receipt(receipt_id).await {
            if receipt.status.is_terminal() {
                return Ok(receipt);
            }
        }

        match self.subscribe(receipt_id).await {
            Ok(mut subscription) => {
                while let Some(update) = subscription.next().await {
                    match update {
                        Ok(receipt) if receipt.status.is_terminal() => return Ok(receipt),
                        Ok(_) => {}
                        Err(e) => {
                            warn!(
                                "Receipt {} event stream failed, falling back to polling: {}",
                                receipt_id, e
                            );
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(
                    "Receipt {} subscription unavailable, falling back to polling: {}",
                    receipt_id, e
                );
            }
        }

        for _ in 0..max_polls {
            let receipt = self.get_receipt(receipt_id).await?;
            if receipt.status.is_terminal() {
                return Ok(receipt);
            }
            tokio::time::sleep(poll_interval).await;
        }

        Err(ComplianceError::StreamClosed)
    }
}
