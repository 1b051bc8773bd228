pub mod rate_limit;

pub use rate_limit::{relay_rate_limit_middleware, RelayRateLimit};
