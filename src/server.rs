use axum::{
    routing::{get, post},
    Extension, Router,
};
use http::{HeaderName, HeaderValue};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};
use tracing::info;

use crate::{
    api::handler::{
        get_payout, get_payout_recipients, get_payout_stats, get_receipt,
        get_recipient_history, health_check, list_payouts, record_compliance_receipt,
        relay_batch_payout, verify_compliance_bundle, AppState,
    },
    middleware::{relay_rate_limit_middleware, RelayRateLimit},
};

pub async fn create_app(state: AppState) -> Router {
    info!("⚙️ Setting up HTTP routes...");

    let relay_limit = Arc::new(RelayRateLimit::new(30, 60));

    let app = Router::new()
        // Public health check endpoint
        .route("/health", get(health_check))

        // Relay endpoint at the root, where the original relayer exposes it
        .route(
            "/relay-batch-payout",
            post(relay_batch_payout)
                .route_layer(axum::middleware::from_fn(relay_rate_limit_middleware)),
        )

        // API v1 routes
        .nest(
            "/api/v1",
            Router::new()
                // Relay endpoint (same handler, versioned path)
                .route(
                    "/relay-batch-payout",
                    post(relay_batch_payout)
                        .route_layer(axum::middleware::from_fn(relay_rate_limit_middleware)),
                )

                // Payout ledger reads
                .route("/payouts", get(list_payouts))
                .route("/payouts/stats", get(get_payout_stats))
                .route("/payouts/:id", get(get_payout))
                .route("/payouts/:id/recipients", get(get_payout_recipients))
                .route("/recipients/:address/history", get(get_recipient_history))

                // Compliance receipts: fetch plus same-origin proxies
                .route("/receipts/:id", get(get_receipt))
                .route("/compliance/record", post(record_compliance_receipt))
                .route("/compliance/verify", post(verify_compliance_bundle)),
        )
        .layer(Extension(relay_limit))
        .layer(
            ServiceBuilder::new()
                // Add request tracing
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(SetResponseHeaderLayer::if_not_present(
                    HeaderName::from_static("x-content-type-options"),
                    HeaderValue::from_static("nosniff"),
                ))
                // Allow all origins in dev, restrict in prod
                .layer(CorsLayer::very_permissive()),
        )
        .with_state(state);

    info!("✓ HTTP routes configured");
    app
}

pub async fn run_server(app: Router, bind_address: &str) -> Result<(), Box<dyn std::error::Error>> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("🌐 Server listening on: {}", bind_address);

    axum::serve(listener, app).await?;
    Ok(())
}
