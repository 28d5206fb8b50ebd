// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! EVM ledger client.
//!
//! Account creation is an operator-funded gas stipend transfer to the address
//! derived from the new public key. Vault setup is `openVault()` signed by
//! the account itself, and minting is `mint(to, amount)` signed by the
//! operator key.
//!
//! Operator transactions are built and signed locally with an explicit
//! nonce, journaled by hash, and only then sent with
//! `eth_sendRawTransaction`. The submit lock is held from nonce lookup to
//! broadcast, so the node's pending nonce is always current.

use std::str::FromStr;

use alloy::{
    eips::{eip2718::Encodable2718, BlockNumberOrTag},
    network::{Ethereum, EthereumWallet, TransactionBuilder},
    primitives::{Address, TxHash, U256},
    providers::{Provider, ProviderBuilder, RootProvider},
    rpc::types::TransactionRequest,
    signers::local::PrivateKeySigner,
    sol_types::SolCall,
};
use async_trait::async_trait;
use k256::{PublicKey, SecretKey};
use tokio::sync::Mutex;

use super::client::{LedgerClient, LedgerError, SubmissionJournal};
use super::reward_token::IRewardToken;
use super::signing::signer_from_secret;
use super::types::{BalanceReading, NetworkConfig, SignedTx, SubmittedTx, TxStatus};
use crate::custody::derive_address;

/// Base fee assumed when the latest block does not report one (25 gwei).
const FALLBACK_BASE_FEE: u128 = 25_000_000_000;
/// Priority fee offered on operator transactions (1.5 gwei).
const PRIORITY_FEE: u128 = 1_500_000_000;

/// Static configuration of the EVM ledger client.
#[derive(Debug, Clone)]
pub struct EvmLedgerConfig {
    pub network: NetworkConfig,
    /// Reward token contract address
    pub token_address: String,
    /// Native amount (wei) sent to each new account to pay for its vault setup
    pub account_gas_stipend: U256,
}

pub struct EvmLedgerClient {
    config: EvmLedgerConfig,
    rpc_url: url::Url,
    token: Address,
    operator: Address,
    wallet: EthereumWallet,
    provider: RootProvider<Ethereum>,
    /// Serializes operator submissions so nonces are assigned in order.
    submit_lock: Mutex<()>,
}

impl EvmLedgerClient {
    pub fn new(config: EvmLedgerConfig, operator: PrivateKeySigner) -> Result<Self, LedgerError> {
        let rpc_url: url::Url = config
            .network
            .rpc_url
            .parse()
            .map_err(|e: url::ParseError| LedgerError::InvalidInput(format!("Invalid RPC URL: {e}")))?;
        let token = parse_address(&config.token_address)?;
        let operator_address = operator.address();
        let provider = RootProvider::<Ethereum>::new_http(rpc_url.clone());

        Ok(Self {
            config,
            rpc_url,
            token,
            operator: operator_address,
            wallet: EthereumWallet::from(operator),
            provider,
            submit_lock: Mutex::new(()),
        })
    }

    pub fn network(&self) -> &NetworkConfig {
        &self.config.network
    }

    /// Operator (minter) address.
    pub fn operator_address(&self) -> Address {
        self.operator
    }

    /// Token decimals as reported by the contract.
    pub async fn token_decimals(&self) -> Result<u8, LedgerError> {
        IRewardToken::new(self.token, &self.provider)
            .decimals()
            .call()
            .await
            .map_err(|e| LedgerError::Query(format!("decimals(): {e}")))
    }

    /// Max fee and priority fee for an EIP-1559 transaction.
    async fn gas_prices(&self) -> Result<(u128, u128), LedgerError> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Latest)
            .await
            .map_err(|e| LedgerError::Submission(format!("Failed to get block: {e}")))?
            .ok_or_else(|| LedgerError::Submission("No latest block".to_string()))?;

        let base_fee = block
            .header
            .base_fee_per_gas
            .map(u128::from)
            .unwrap_or(FALLBACK_BASE_FEE);
        // Room for two base fee increases
        let max_fee = base_fee.saturating_mul(2).saturating_add(PRIORITY_FEE);
        Ok((max_fee, PRIORITY_FEE))
    }

    /// Fill and sign an operator transaction without sending it.
    /// Must be called with the submit lock held.
    async fn sign_as_operator(&self, tx: TransactionRequest) -> Result<SignedTx, LedgerError> {
        let nonce = self
            .provider
            .get_transaction_count(self.operator)
            .pending()
            .await
            .map_err(|e| LedgerError::Submission(format!("Nonce lookup failed: {e}")))?;
        let tx = tx
            .with_from(self.operator)
            .with_nonce(nonce)
            .with_chain_id(self.config.network.chain_id);

        let gas_limit = self
            .provider
            .estimate_gas(tx.clone())
            .await
            .map_err(|e| LedgerError::Submission(format!("Gas estimation failed: {e}")))?;
        let (max_fee, priority_fee) = self.gas_prices().await?;
        let tx = tx
            .with_gas_limit(gas_limit)
            .with_max_fee_per_gas(max_fee)
            .with_max_priority_fee_per_gas(priority_fee);

        let envelope = <TransactionRequest as TransactionBuilder<Ethereum>>::build(tx, &self.wallet)
            .await
            .map_err(|e| LedgerError::Submission(format!("Signing failed: {e}")))?;
        Ok(SignedTx {
            tx_id: format!("{:?}", envelope.tx_hash()),
            payload: alloy::hex::encode_prefixed(envelope.encoded_2718()),
        })
    }

    async fn broadcast(&self, signed: &SignedTx) -> Result<(), LedgerError> {
        let raw = decode_payload(signed)?;
        self.provider
            .send_raw_transaction(&raw)
            .await
            .map_err(|e| LedgerError::Submission(e.to_string()))?;
        Ok(())
    }

    /// Sign, journal and broadcast an operator transaction.
    async fn submit_journaled(
        &self,
        tx: TransactionRequest,
        journal: &dyn SubmissionJournal,
    ) -> Result<String, LedgerError> {
        let _guard = self.submit_lock.lock().await;
        let signed = self.sign_as_operator(tx).await?;
        journal.record(&signed)?;
        self.broadcast(&signed).await?;
        Ok(signed.tx_id)
    }
}

#[async_trait]
impl LedgerClient for EvmLedgerClient {
    async fn create_account(
        &self,
        public_key: &PublicKey,
        journal: &dyn SubmissionJournal,
    ) -> Result<SubmittedTx, LedgerError> {
        let address = derive_address(public_key);
        let to = parse_address(&address)?;

        let tx = TransactionRequest::default()
            .with_to(to)
            .with_value(self.config.account_gas_stipend);
        let tx_id = self.submit_journaled(tx, journal).await?;

        tracing::info!(
            address = %address,
            tx_id = %tx_id,
            explorer = %self.config.network.tx_url(&tx_id),
            "Account funding submitted"
        );
        Ok(SubmittedTx { tx_id, address })
    }

    async fn initialize_vault(
        &self,
        address: &str,
        signer_key: &SecretKey,
    ) -> Result<String, LedgerError> {
        let account = parse_address(address)?;
        let signer = signer_from_secret(signer_key);
        if signer.address() != account {
            return Err(LedgerError::InvalidInput(
                "Signing key does not control the account".to_string(),
            ));
        }

        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(self.rpc_url.clone());
        let tx = TransactionRequest::default()
            .with_from(account)
            .with_to(self.token)
            .with_input(IRewardToken::openVaultCall {}.abi_encode());

        let pending = provider
            .send_transaction(tx)
            .await
            .map_err(|e| LedgerError::Submission(e.to_string()))?;
        let tx_id = format!("{:?}", pending.tx_hash());

        tracing::info!(address = %address, tx_id = %tx_id, "Vault initialization submitted");
        Ok(tx_id)
    }

    async fn mint(
        &self,
        address: &str,
        amount: U256,
        journal: &dyn SubmissionJournal,
    ) -> Result<String, LedgerError> {
        let to = parse_address(address)?;
        let data = IRewardToken::mintCall { to, amount }.abi_encode();
        let tx = TransactionRequest::default()
            .with_to(self.token)
            .with_input(data);

        let tx_id = self.submit_journaled(tx, journal).await?;
        tracing::info!(
            address = %address,
            amount = %amount,
            tx_id = %tx_id,
            explorer = %self.config.network.tx_url(&tx_id),
            "Mint submitted"
        );
        Ok(tx_id)
    }

    async fn rebroadcast(&self, signed: &SignedTx) -> Result<(), LedgerError> {
        decode_payload(signed)?;
        if self.transaction_status(&signed.tx_id).await? != TxStatus::NotFound {
            return Ok(());
        }
        let _guard = self.submit_lock.lock().await;
        self.broadcast(signed).await?;
        tracing::info!(tx_id = %signed.tx_id, "Journaled transaction broadcast again");
        Ok(())
    }

    async fn query_balance(&self, address: &str) -> Result<BalanceReading, LedgerError> {
        let account = parse_address(address)?;
        let token = IRewardToken::new(self.token, &self.provider);

        let has_vault: bool = token
            .hasVault(account)
            .call()
            .await
            .map_err(|e| LedgerError::Query(format!("hasVault(): {e}")))?;
        if !has_vault {
            return Ok(BalanceReading::NoVault);
        }

        let balance: U256 = token
            .balanceOf(account)
            .call()
            .await
            .map_err(|e| LedgerError::Query(format!("balanceOf(): {e}")))?;
        Ok(BalanceReading::Balance(balance))
    }

    async fn transaction_status(&self, tx_id: &str) -> Result<TxStatus, LedgerError> {
        let hash = TxHash::from_str(tx_id)
            .map_err(|e| LedgerError::InvalidInput(format!("Invalid tx hash: {e}")))?;

        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| LedgerError::Query(format!("Failed to get receipt: {e}")))?;

        match receipt {
            Some(r) => {
                let block_number = r.block_number.unwrap_or(0);
                Ok(if r.status() {
                    TxStatus::Confirmed { block_number }
                } else {
                    TxStatus::Reverted { block_number }
                })
            }
            None => {
                let known = self
                    .provider
                    .get_transaction_by_hash(hash)
                    .await
                    .map_err(|e| LedgerError::Query(format!("Failed to get transaction: {e}")))?;
                Ok(if known.is_some() {
                    TxStatus::Pending
                } else {
                    TxStatus::NotFound
                })
            }
        }
    }

    async fn health(&self) -> Result<u64, LedgerError> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| LedgerError::Query(e.to_string()))
    }
}

fn parse_address(raw: &str) -> Result<Address, LedgerError> {
    Address::from_str(raw).map_err(|e| LedgerError::InvalidInput(format!("Invalid address: {e}")))
}

fn decode_payload(signed: &SignedTx) -> Result<Vec<u8>, LedgerError> {
    alloy::hex::decode(&signed.payload).map_err(|e| {
        LedgerError::InvalidInput(format!("Invalid payload for {}: {e}", signed.tx_id))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::signing::signer_from_hex;

    fn config(rpc_url: &str, token: &str) -> EvmLedgerConfig {
        let mut network = NetworkConfig::fuji();
        network.rpc_url = rpc_url.to_string();
        EvmLedgerConfig {
            network,
            token_address: token.to_string(),
            account_gas_stipend: U256::from(1_000_000_000_000_000u64),
        }
    }

    fn operator() -> PrivateKeySigner {
        signer_from_hex(&"11".repeat(32)).unwrap()
    }

    #[test]
    fn new_rejects_bad_rpc_url() {
        let result = EvmLedgerClient::new(
            config("not a url", "0x0000000000000000000000000000000000000001"),
            operator(),
        );
        assert!(matches!(result, Err(LedgerError::InvalidInput(_))));
    }

    #[test]
    fn new_rejects_bad_token_address() {
        let result = EvmLedgerClient::new(config(FUJI_RPC_URL_FOR_TESTS, "0x1234"), operator());
        assert!(matches!(result, Err(LedgerError::InvalidInput(_))));
    }

    #[test]
    fn new_records_operator_address() {
        let signer = operator();
        let expected = signer.address();
        let client = EvmLedgerClient::new(
            config(FUJI_RPC_URL_FOR_TESTS, "0x0000000000000000000000000000000000000001"),
            signer,
        )
        .unwrap();
        assert_eq!(client.operator_address(), expected);
        assert_eq!(client.network().chain_id, 43113);
    }

    #[tokio::test]
    async fn transaction_status_rejects_malformed_hash() {
        let client = EvmLedgerClient::new(
            config(FUJI_RPC_URL_FOR_TESTS, "0x0000000000000000000000000000000000000001"),
            operator(),
        )
        .unwrap();
        let result = client.transaction_status("not-a-hash").await;
        assert!(matches!(result, Err(LedgerError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn rebroadcast_rejects_malformed_payload() {
        let client = EvmLedgerClient::new(
            config(FUJI_RPC_URL_FOR_TESTS, "0x0000000000000000000000000000000000000001"),
            operator(),
        )
        .unwrap();
        let signed = SignedTx {
            tx_id: format!("0x{}", "ab".repeat(32)),
            payload: "not hex".to_string(),
        };
        assert!(matches!(
            client.rebroadcast(&signed).await,
            Err(LedgerError::InvalidInput(_))
        ));
    }

    const FUJI_RPC_URL_FOR_TESTS: &str = "http://127.0.0.1:9650/ext/bc/C/rpc";
}
