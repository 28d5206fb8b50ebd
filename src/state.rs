// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use jsonwebtoken::DecodingKey;

use crate::blockchain::{LedgerClient, NetworkConfig};
use crate::config::AppConfig;
use crate::custody::KeyVault;
use crate::provisioning::AccountProvisioner;
use crate::settlement::{BalanceReader, RewardSettlementEngine};
use crate::storage::{BalanceCache, RewardDatabase};
use crate::tasks::{TaskCatalog, TaskLedger};

/// Session token verification settings.
///
/// With no key configured the server runs in development mode: token
/// structure and expiry are checked, signatures are not.
#[derive(Clone, Default)]
pub struct AuthConfig {
    pub decoding_key: Option<DecodingKey>,
}

impl AuthConfig {
    pub fn hs256(secret: &str) -> Self {
        Self {
            decoding_key: Some(DecodingKey::from_secret(secret.as_bytes())),
        }
    }

    pub fn development() -> Self {
        Self::default()
    }

    pub fn is_production(&self) -> bool {
        self.decoding_key.is_some()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<RewardSettlementEngine>,
    pub db: Arc<RewardDatabase>,
    pub ledger: Arc<dyn LedgerClient>,
    pub network: NetworkConfig,
    pub auth_config: AuthConfig,
    pub token_symbol: String,
}

impl AppState {
    /// Wire the settlement engine and its collaborators from configuration.
    pub fn assemble(
        config: &AppConfig,
        db: Arc<RewardDatabase>,
        ledger: Arc<dyn LedgerClient>,
        vault: KeyVault,
        catalog: TaskCatalog,
        token_decimals: u8,
    ) -> Self {
        let settlement = config.settlement(token_decimals);
        let provisioner = Arc::new(AccountProvisioner::new(
            db.clone(),
            vault,
            ledger.clone(),
            settlement.finality,
        ));
        let balances = Arc::new(BalanceReader::new(
            db.clone(),
            ledger.clone(),
            BalanceCache::new(config.balance_cache_capacity, config.balance_cache_ttl),
        ));
        let engine = Arc::new(RewardSettlementEngine::new(
            Arc::new(catalog),
            TaskLedger::new(db.clone(), config.utc_offset),
            provisioner,
            ledger.clone(),
            balances,
            settlement,
        ));

        let auth_config = match &config.session_jwt_secret {
            Some(secret) => AuthConfig::hs256(secret),
            None => AuthConfig::development(),
        };

        Self {
            engine,
            db,
            ledger,
            network: config.network.clone(),
            auth_config,
            token_symbol: config.token_symbol.clone(),
        }
    }

    pub fn with_auth_config(mut self, auth_config: AuthConfig) -> Self {
        self.auth_config = auth_config;
        self
    }

    pub fn token_decimals(&self) -> u8 {
        self.engine.config().token_decimals
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::time::Duration;

    use super::*;
    use crate::blockchain::{FinalityPolicy, InMemoryLedger};
    use crate::config::LedgerMode;
    use crate::custody::MasterKey;

    pub const TEST_DECIMALS: u8 = 18;

    /// State over an in-memory ledger and a temporary database, in
    /// development auth mode.
    pub fn test_state() -> (AppState, Arc<InMemoryLedger>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(RewardDatabase::open(&dir.path().join("rewards.redb")).unwrap());
        let ledger = Arc::new(InMemoryLedger::new());

        let config = AppConfig {
            ledger_mode: LedgerMode::Memory,
            finality: FinalityPolicy {
                timeout: Duration::from_millis(200),
                poll_interval: Duration::from_millis(5),
            },
            ..AppConfig::default()
        };
        let state = AppState::assemble(
            &config,
            db,
            ledger.clone(),
            KeyVault::new(MasterKey::from_bytes([3u8; 32])),
            TaskCatalog::builtin(TEST_DECIMALS).unwrap(),
            TEST_DECIMALS,
        );
        (state, ledger, dir)
    }
}
