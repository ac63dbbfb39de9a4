use crate::entity::Role;
use anyhow::{Context, Result, ensure};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Longest receivable term accepted, about a century
pub const MAX_TERM_DAYS: i64 = 36_500;

/// Main configuration for the contract and its client
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LedgerConfig {
    pub storage: StorageConfig,
    pub contract: ContractConfig,
    pub client: ClientConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Directory of the sled database
    pub path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContractConfig {
    /// Identity allowed to issue RegisterUser
    pub admin_id: String,
    /// Days between signing and expiry of a receivable
    pub receivable_term_days: i64,
    /// Accounts written by InitLedger
    pub seed_users: Vec<SeedUser>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SeedUser {
    pub id: String,
    pub enterprise: String,
    pub role: Role,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Attempts per transaction when commits lose a version check
    pub max_retries: u32,
    /// First backoff delay, doubled on every retry
    pub backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// Emit JSON lines instead of human readable logs
    pub json: bool,
}

impl Default for ContractConfig {
    fn default() -> Self {
        let seed = |id: &str, enterprise: &str, role| SeedUser {
            id: id.to_string(),
            enterprise: enterprise.to_string(),
            role,
        };
        Self {
            admin_id: "admin".to_string(),
            receivable_term_days: 365,
            seed_users: vec![
                seed("user1", "Qulian Technology", Role::Company),
                seed("user2", "First Supplier", Role::Supplier),
                seed("user3", "Second Supplier", Role::Supplier),
                seed("user4", "XX Bank", Role::Financial),
            ],
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                path: ".rec-order/ledger.db".to_string(),
            },
            contract: ContractConfig::default(),
            client: ClientConfig {
                max_retries: 5,
                backoff_ms: 20,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                json: false,
            },
        }
    }
}

impl LedgerConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration file (rec-order.toml, or the given path)
    /// 3. Environment variables (REC_ORDER__SECTION__KEY)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = Config::try_from(&LedgerConfig::default())
            .context("failed to serialise default configuration")?;
        let mut builder = Config::builder().add_source(defaults);

        match path {
            Some(path) => {
                builder = builder.add_source(File::from(path));
            }
            None if Path::new("rec-order.toml").exists() => {
                builder = builder.add_source(File::with_name("rec-order"));
            }
            None => {}
        }

        builder = builder.add_source(
            Environment::with_prefix("REC_ORDER")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("failed to read configuration")?;
        let ledger_config: LedgerConfig = config
            .try_deserialize()
            .context("configuration has an unexpected shape")?;
        ledger_config.contract.validate()?;

        Ok(ledger_config)
    }
}

impl ContractConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            (1..=MAX_TERM_DAYS).contains(&self.receivable_term_days),
            "contract.receivable_term_days must be within 1..={MAX_TERM_DAYS}, got {}",
            self.receivable_term_days
        );
        ensure!(!self.admin_id.is_empty(), "contract.admin_id must not be empty");
        Ok(())
    }
}
