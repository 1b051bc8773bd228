use alloy_primitives::{Address, U256};
use config::ConfigError;

/// Process configuration, loaded once at startup and passed down as
/// explicit context.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub chain_id: u64,
    pub token_address: Address,
    pub token_name: String,
    pub token_version: String,
    pub payout_ledger_address: Address,
    /// Relay signing key pool; one batch sticks to one key
    pub relayer_keys: Vec<String>,
    /// Submission plus confirmation latency that must fit inside an
    /// authorization's validity window
    pub submission_margin_secs: u64,
    pub compliance_api_url: String,
    pub compliance_api_key: Option<String>,
    pub compliance_chain: String,
    pub compliance_currency: String,
    /// Accounts credited on the embedded token at startup (dev only)
    pub dev_seed_balances: Vec<(Address, U256)>,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_address(key: &str, raw: &str) -> Result<Address, ConfigError> {
    raw.parse()
        .map_err(|_| ConfigError::Message(format!("{}: invalid address '{}'", key, raw)))
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let relayer_keys: Vec<String> = std::env::var("RELAYER_PRIVATE_KEYS")
            .or_else(|_| std::env::var("RELAYER_PRIVATE_KEY"))
            .map_err(|_| ConfigError::Message("RELAYER_PRIVATE_KEYS is required".to_string()))?
            .split(',')
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .collect();
        if relayer_keys.is_empty() {
            return Err(ConfigError::Message(
                "RELAYER_PRIVATE_KEYS is required".to_string(),
            ));
        }

        Ok(Self {
            bind_address: env_or("BIND_ADDRESS", "0.0.0.0:8080"),
            chain_id: env_or("CHAIN_ID", "114")
                .parse()
                .map_err(|_| ConfigError::Message("CHAIN_ID must be a number".to_string()))?,
            token_address: parse_address(
                "TOKEN_ADDRESS",
                // Flare mainnet USDT0 by default, same as the original client
                &env_or("TOKEN_ADDRESS", "0xe7cd86e13AC4309349F30B3435a9d337750fC82D"),
            )?,
            token_name: env_or("TOKEN_NAME", "USDT0"),
            token_version: env_or("TOKEN_VERSION", "1"),
            payout_ledger_address: parse_address(
                "PAYOUT_LEDGER_ADDRESS",
                &env_or(
                    "PAYOUT_LEDGER_ADDRESS",
                    "0x0000000000000000000000000000000000001001",
                ),
            )?,
            relayer_keys,
            submission_margin_secs: env_or("SUBMISSION_MARGIN_SECS", "30")
                .parse()
                .map_err(|_| {
                    ConfigError::Message("SUBMISSION_MARGIN_SECS must be a number".to_string())
                })?,
            compliance_api_url: env_or(
                "PROOFRAILS_API_URL",
                "https://middleware-iso20022-v13-production-5084.up.railway.app",
            ),
            compliance_api_key: std::env::var("PROOFRAILS_API_KEY").ok(),
            compliance_chain: env_or("COMPLIANCE_CHAIN", "coston2"),
            compliance_currency: env_or("COMPLIANCE_CURRENCY", "USDT0"),
            dev_seed_balances: parse_seed_balances(&env_or("DEV_SEED_BALANCES", ""))?,
        })
    }
}

/// `DEV_SEED_BALANCES=0xaddr=amount,0xaddr=amount` with amounts in smallest
/// token units
fn parse_seed_balances(raw: &str) -> Result<Vec<(Address, U256)>, ConfigError> {
    let mut balances = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (address, amount) = entry.split_once('=').ok_or_else(|| {
            ConfigError::Message(format!(
                "DEV_SEED_BALANCES: expected 'address=amount', got '{}'",
                entry
            ))
        })?;
        let address = parse_address("DEV_SEED_BALANCES", address.trim())?;
        let amount = amount.trim().parse::<U256>().map_err(|_| {
            ConfigError::Message(format!("DEV_SEED_BALANCES: invalid amount '{}'", amount))
        })?;
        balances.push((address, amount));
    }
    Ok(balances)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_seed_balances() {
        let balances = parse_seed_balances(
            "0x1111111111111111111111111111111111111111=1000000, \
             0x2222222222222222222222222222222222222222=5",
        )
        .unwrap();
        assert_eq!(balances.len(), 2);
        assert_eq!(balances[0].1, U256::from(1_000_000u64));
        assert_eq!(balances[1].0, Address::repeat_byte(0x22));

        assert!(parse_seed_balances("").unwrap().is_empty());
        assert!(parse_seed_balances("nonsense").is_err());
        assert!(parse_seed_balances("0x11=abc").is_err());
    }
}
