// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! All configuration is read from the environment once at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `DATA_DIR` | Directory holding `rewards.redb` | `/data` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |
//! | `KEY_ENCRYPTION_KEY` | 32-byte master key (hex or base64) for custodial keys | Required |
//! | `SESSION_JWT_SECRET` | HS256 secret of session tokens | Unset = development mode |
//! | `LEDGER_MODE` | `evm` or `memory` (`memory` needs the `dev` feature) | `evm` |
//! | `LEDGER_RPC_URL` | JSON-RPC endpoint | Avalanche Fuji |
//! | `LEDGER_CHAIN_ID` | Chain id | `43113` |
//! | `LEDGER_EXPLORER_URL` | Block explorer base URL | Snowtrace testnet |
//! | `REWARD_TOKEN_ADDRESS` | Reward token contract | Required in `evm` mode |
//! | `MINTER_PRIVATE_KEY` | Hex key of the minter / gas funder | Required in `evm` mode |
//! | `ACCOUNT_GAS_STIPEND_WEI` | Gas sent to each new custodial account | `50000000000000000` |
//! | `TOKEN_DECIMALS` | Reward token decimals | Read from contract, else `18` |
//! | `TOKEN_SYMBOL` | Display symbol | `TASK` |
//! | `TASK_CATALOG_PATH` | JSON task catalog | Built-in catalog |
//! | `PROOF_ACCEPTANCE_THRESHOLD` | Minimum proof confidence | `0.6` |
//! | `BALANCE_CACHE_TTL_SECS` | Balance cache TTL | `20` |
//! | `BALANCE_CACHE_CAPACITY` | Balance cache entries | `1024` |
//! | `FINALITY_TIMEOUT_SECS` | Wait for a transaction to become final | `45` |
//! | `FINALITY_POLL_INTERVAL_MS` | Finality poll interval | `1500` |
//! | `RESERVATION_TIMEOUT_SECS` | Age of a swept unsubmitted reservation | `120` |
//! | `RECONCILE_INTERVAL_SECS` | Background reconciliation interval | `30` |
//! | `LEDGER_UTC_OFFSET_MINUTES` | Timezone of the task day | `0` |
//! | `TLS_CERT_PATH` / `TLS_KEY_PATH` | PEM certificate chain and key | Unset = plain HTTP |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::U256;
use chrono::{FixedOffset, Offset, Utc};

use crate::blockchain::{FinalityPolicy, NetworkConfig};
use crate::settlement::SettlementConfig;
use crate::tasks::DEFAULT_ACCEPTANCE_THRESHOLD;

pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
/// Directory of the reward database. Must be on persistent storage: it is
/// the system of record for issued rewards.
pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";
pub const KEY_ENCRYPTION_KEY_ENV: &str = "KEY_ENCRYPTION_KEY";
pub const SESSION_JWT_SECRET_ENV: &str = "SESSION_JWT_SECRET";
pub const LEDGER_MODE_ENV: &str = "LEDGER_MODE";
pub const LEDGER_RPC_URL_ENV: &str = "LEDGER_RPC_URL";
pub const LEDGER_CHAIN_ID_ENV: &str = "LEDGER_CHAIN_ID";
pub const LEDGER_EXPLORER_URL_ENV: &str = "LEDGER_EXPLORER_URL";
pub const REWARD_TOKEN_ADDRESS_ENV: &str = "REWARD_TOKEN_ADDRESS";
/// Read directly by `main` so the key never sits in [`AppConfig`].
pub const MINTER_PRIVATE_KEY_ENV: &str = "MINTER_PRIVATE_KEY";
pub const ACCOUNT_GAS_STIPEND_WEI_ENV: &str = "ACCOUNT_GAS_STIPEND_WEI";
pub const TOKEN_DECIMALS_ENV: &str = "TOKEN_DECIMALS";
pub const TOKEN_SYMBOL_ENV: &str = "TOKEN_SYMBOL";
pub const TASK_CATALOG_PATH_ENV: &str = "TASK_CATALOG_PATH";
pub const PROOF_ACCEPTANCE_THRESHOLD_ENV: &str = "PROOF_ACCEPTANCE_THRESHOLD";
pub const BALANCE_CACHE_TTL_SECS_ENV: &str = "BALANCE_CACHE_TTL_SECS";
pub const BALANCE_CACHE_CAPACITY_ENV: &str = "BALANCE_CACHE_CAPACITY";
pub const FINALITY_TIMEOUT_SECS_ENV: &str = "FINALITY_TIMEOUT_SECS";
pub const FINALITY_POLL_INTERVAL_MS_ENV: &str = "FINALITY_POLL_INTERVAL_MS";
pub const RESERVATION_TIMEOUT_SECS_ENV: &str = "RESERVATION_TIMEOUT_SECS";
pub const RECONCILE_INTERVAL_SECS_ENV: &str = "RECONCILE_INTERVAL_SECS";
pub const LEDGER_UTC_OFFSET_MINUTES_ENV: &str = "LEDGER_UTC_OFFSET_MINUTES";
pub const TLS_CERT_PATH_ENV: &str = "TLS_CERT_PATH";
pub const TLS_KEY_PATH_ENV: &str = "TLS_KEY_PATH";

/// 0.05 of the native coin, enough for a few vault and approval calls.
const DEFAULT_GAS_STIPEND_WEI: u64 = 50_000_000_000_000_000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} is required{context}")]
    Missing { var: &'static str, context: &'static str },

    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerMode {
    Evm,
    /// In-process ledger, only honoured with the `dev` feature
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Startup configuration. Secrets other than the session secret are read
/// where they are used and never stored here.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub log_format: LogFormat,
    pub session_jwt_secret: Option<String>,
    pub ledger_mode: LedgerMode,
    pub network: NetworkConfig,
    pub reward_token_address: Option<String>,
    pub account_gas_stipend: U256,
    /// `None` means "ask the token contract"
    pub token_decimals: Option<u8>,
    pub token_symbol: String,
    pub task_catalog_path: Option<PathBuf>,
    pub proof_acceptance_threshold: f64,
    pub balance_cache_ttl: Duration,
    pub balance_cache_capacity: usize,
    pub finality: FinalityPolicy,
    pub reservation_timeout: Duration,
    pub reconcile_interval: Duration,
    pub utc_offset: FixedOffset,
    pub tls: Option<TlsPaths>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            data_dir: PathBuf::from("/data"),
            log_format: LogFormat::Pretty,
            session_jwt_secret: None,
            ledger_mode: LedgerMode::Evm,
            network: NetworkConfig::fuji(),
            reward_token_address: None,
            account_gas_stipend: U256::from(DEFAULT_GAS_STIPEND_WEI),
            token_decimals: None,
            token_symbol: "TASK".to_string(),
            task_catalog_path: None,
            proof_acceptance_threshold: DEFAULT_ACCEPTANCE_THRESHOLD,
            balance_cache_ttl: Duration::from_secs(20),
            balance_cache_capacity: 1024,
            finality: FinalityPolicy::default(),
            reservation_timeout: Duration::from_secs(120),
            reconcile_interval: Duration::from_secs(30),
            utc_offset: Utc.fix(),
            tls: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source; unset or empty variables
    /// keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let log_format = match get(LOG_FORMAT_ENV).as_deref() {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => return Err(invalid(LOG_FORMAT_ENV, other, "expected json or pretty")),
        };

        let ledger_mode = match get(LEDGER_MODE_ENV).as_deref() {
            None | Some("evm") => LedgerMode::Evm,
            Some("memory") => LedgerMode::Memory,
            Some(other) => return Err(invalid(LEDGER_MODE_ENV, other, "expected evm or memory")),
        };

        let mut network = defaults.network.clone();
        if let Some(url) = get(LEDGER_RPC_URL_ENV) {
            network.name = "Custom EVM network".to_string();
            network.rpc_url = url;
        }
        if let Some(chain_id) = parsed(&get, LEDGER_CHAIN_ID_ENV)? {
            network.chain_id = chain_id;
        }
        if let Some(explorer) = get(LEDGER_EXPLORER_URL_ENV) {
            network.explorer_url = explorer;
        }

        let account_gas_stipend = match get(ACCOUNT_GAS_STIPEND_WEI_ENV) {
            Some(raw) => U256::from_str_radix(&raw, 10)
                .map_err(|e| invalid(ACCOUNT_GAS_STIPEND_WEI_ENV, &raw, e))?,
            None => defaults.account_gas_stipend,
        };

        let proof_acceptance_threshold: f64 =
            parsed(&get, PROOF_ACCEPTANCE_THRESHOLD_ENV)?.unwrap_or(defaults.proof_acceptance_threshold);
        if !(0.0..=1.0).contains(&proof_acceptance_threshold) {
            return Err(invalid(
                PROOF_ACCEPTANCE_THRESHOLD_ENV,
                &proof_acceptance_threshold.to_string(),
                "must be within [0, 1]",
            ));
        }

        let utc_offset = match parsed::<i32, _>(&get, LEDGER_UTC_OFFSET_MINUTES_ENV)? {
            Some(minutes) => FixedOffset::east_opt(minutes.saturating_mul(60)).ok_or_else(|| {
                invalid(LEDGER_UTC_OFFSET_MINUTES_ENV, &minutes.to_string(), "out of range")
            })?,
            None => defaults.utc_offset,
        };

        let tls = match (get(TLS_CERT_PATH_ENV), get(TLS_KEY_PATH_ENV)) {
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert: PathBuf::from(cert),
                key: PathBuf::from(key),
            }),
            (None, None) => None,
            (Some(_), None) => {
                return Err(ConfigError::Missing {
                    var: TLS_KEY_PATH_ENV,
                    context: " when TLS_CERT_PATH is set",
                })
            }
            (None, Some(_)) => {
                return Err(ConfigError::Missing {
                    var: TLS_CERT_PATH_ENV,
                    context: " when TLS_KEY_PATH is set",
                })
            }
        };

        let secs = |var, default: Duration| -> Result<Duration, ConfigError> {
            Ok(parsed::<u64, _>(&get, var)?.map(Duration::from_secs).unwrap_or(default))
        };

        let config = Self {
            host: get(HOST_ENV).unwrap_or(defaults.host),
            port: parsed(&get, PORT_ENV)?.unwrap_or(defaults.port),
            data_dir: get(DATA_DIR_ENV).map(PathBuf::from).unwrap_or(defaults.data_dir),
            log_format,
            session_jwt_secret: get(SESSION_JWT_SECRET_ENV),
            ledger_mode,
            network,
            reward_token_address: get(REWARD_TOKEN_ADDRESS_ENV),
            account_gas_stipend,
            token_decimals: parsed(&get, TOKEN_DECIMALS_ENV)?,
            token_symbol: get(TOKEN_SYMBOL_ENV).unwrap_or(defaults.token_symbol),
            task_catalog_path: get(TASK_CATALOG_PATH_ENV).map(PathBuf::from),
            proof_acceptance_threshold,
            balance_cache_ttl: secs(BALANCE_CACHE_TTL_SECS_ENV, defaults.balance_cache_ttl)?,
            balance_cache_capacity: parsed(&get, BALANCE_CACHE_CAPACITY_ENV)?
                .unwrap_or(defaults.balance_cache_capacity),
            finality: FinalityPolicy {
                timeout: secs(FINALITY_TIMEOUT_SECS_ENV, defaults.finality.timeout)?,
                poll_interval: parsed::<u64, _>(&get, FINALITY_POLL_INTERVAL_MS_ENV)?
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.finality.poll_interval),
            },
            reservation_timeout: secs(RESERVATION_TIMEOUT_SECS_ENV, defaults.reservation_timeout)?,
            reconcile_interval: secs(RECONCILE_INTERVAL_SECS_ENV, defaults.reconcile_interval)?,
            utc_offset,
            tls,
        };

        if config.ledger_mode == LedgerMode::Evm && config.reward_token_address.is_none() {
            return Err(ConfigError::Missing {
                var: REWARD_TOKEN_ADDRESS_ENV,
                context: " in evm ledger mode",
            });
        }
        // Provisioning waits for finality twice before the mint is journaled
        if config.reservation_timeout <= config.finality.timeout * 2 {
            return Err(invalid(
                RESERVATION_TIMEOUT_SECS_ENV,
                &config.reservation_timeout.as_secs().to_string(),
                format!(
                    "must exceed twice {FINALITY_TIMEOUT_SECS_ENV} ({}s)",
                    config.finality.timeout.as_secs()
                ),
            ));
        }
        Ok(config)
    }

    /// Engine tunables, once the token's decimals are known.
    pub fn settlement(&self, token_decimals: u8) -> SettlementConfig {
        SettlementConfig {
            acceptance_threshold: self.proof_acceptance_threshold,
            finality: self.finality,
            reservation_timeout: self.reservation_timeout,
            token_decimals,
        }
    }
}

fn parsed<T, G>(get: &G, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    get(var)
        .map(|raw| raw.parse::<T>().map_err(|e| invalid(var, &raw, e)))
        .transpose()
}

fn invalid(var: &'static str, value: &str, reason: impl std::fmt::Display) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
