use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

/// Rate limit for the relay endpoint. A relayed batch fans out into one
/// chain submission per recipient, so the quota here is far tighter than
/// for read endpoints.
#[derive(Clone)]
pub struct RelayRateLimit {
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, governor::clock::DefaultClock>>,
}

impl RelayRateLimit {
    pub fn new(requests: u32, per_seconds: u64) -> Self {
        let quota = Quota::with_period(Duration::from_secs(per_seconds))
            .unwrap()
            .allow_burst(NonZeroU32::new(requests).unwrap());

        RelayRateLimit {
            limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    pub fn check(&self) -> Result<(), Response> {
        match self.limiter.check() {
            Ok(_) => Ok(()),
            Err(_) => Err((
                StatusCode::TOO_MANY_REQUESTS,
                "Rate limit exceeded. Please try again later.",
            )
                .into_response()),
        }
    }
}

// Applied as route middleware on the relay endpoints
pub async fn relay_rate_limit_middleware(
    req: Request,
    next: Next,
) -> Result<impl IntoResponse, Response> {
    let limiter = req
        .extensions()
        .get::<Arc<RelayRateLimit>>()
        .cloned()
        .unwrap_or_else(|| Arc::new(RelayRateLimit::new(30, 60))); // Default: 30 batches per minute

    limiter.check()?;
    Ok(next.run(req).await)
}
