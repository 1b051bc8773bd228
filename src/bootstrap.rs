use std::sync::Arc;

use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tracing::{info, warn};

use crate::{
    api::handler::AppState,
    authorization::TypedDomain,
    compliance::{ComplianceClient, ComplianceReconciler},
    config::Config,
    error::AppResult,
    ledger::BatchPayoutLedger,
    relay::{RelayService, SignerPool},
    token::{InMemoryToken, TokenGateway},
};

pub async fn initialize_app_state(config: &Config) -> AppResult<AppState> {
    info!("Initializing application components ...");

    // Settlement token gateway, bound to the token's typed-data domain
    let domain = TypedDomain {
        name: config.token_name.clone(),
        version: config.token_version.clone(),
        chain_id: config.chain_id,
        verifying_contract: config.token_address,
    };
    let token = Arc::new(InMemoryToken::new(domain));
    for (account, amount) in &config.dev_seed_balances {
        token.mint(*account, *amount);
        info!("🌱 Seeded {} with {} units", account, amount);
    }
    let token: Arc<dyn TokenGateway> = token;
    info!(
        "✅ Token gateway initialized: {} v{} on chain {}",
        config.token_name, config.token_version, config.chain_id
    );

    // Settlement ledger (contract of record)
    let ledger = Arc::new(BatchPayoutLedger::new(
        config.payout_ledger_address,
        token.clone(),
    ));
    info!("✅ Settlement ledger initialized at {}", ledger.address());

    // Relay signer pool; each key serializes its own submissions
    let signers = SignerPool::from_hex_keys(&config.relayer_keys)?;
    info!("🔑 Relay signers: {:?}", signers.addresses());

    let relay = Arc::new(RelayService::new(
        token.clone(),
        ledger.clone(),
        signers,
        config.submission_margin_secs,
    ));
    info!(
        "✅ Relay service initialized (submission margin {}s)",
        config.submission_margin_secs
    );

    // Compliance client + reconciler
    let compliance = ComplianceClient::new(
        config.compliance_api_url.clone(),
        config.compliance_api_key.clone(),
    );
    if !compliance.has_api_key() {
        warn!("⚠️  PROOFRAILS_API_KEY not set - compliance proxy disabled");
    }
    let reconciler = Arc::new(ComplianceReconciler::new(
        compliance.clone(),
        ledger.clone(),
        config.compliance_chain.clone(),
        config.compliance_currency.clone(),
    ));
    info!(
        "✅ Compliance reconciler initialized for {}",
        config.compliance_api_url
    );

    // Index PayoutCreated events into the log
    let mut events = BroadcastStream::new(ledger.subscribe());
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                Ok(event) => info!(
                    "📣 PayoutCreated: id={} initiator={} total={} recipients={} ref={}",
                    event.payout_id,
                    event.initiator,
                    event.total_amount,
                    event.recipient_count,
                    event.reference
                ),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!("Payout event stream lagged, skipped {} events", skipped)
                }
            }
        }
    });
    info!("✅ Payout event indexing task started");

    Ok(AppState {
        ledger,
        relay,
        compliance,
        reconciler,
        chain_id: config.chain_id,
        token_address: config.token_address,
    })
}
