//! Ethereum inbound channel access
//!
//! Reads use a plain HTTP provider; submissions build a wallet provider per call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, B256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::http::{Client, Http};
use async_trait::async_trait;
use tracing::{debug, info};

use super::ChainConnection;
use crate::contracts::inbound_channel::{to_abi, InboundChannel};
use crate::error::{submission_error, RelayError, Result};
use crate::types::MessagePackage;

#[async_trait]
pub trait InboundChannelApi: ChainConnection {
    /// Highest parachain block already accepted by the channel
    async fn latest_parachain_block(&self) -> Result<u32>;

    /// Next nonce for the relayer account, counting pending transactions
    async fn pending_nonce(&self) -> Result<u64>;

    /// Submit `package` with `nonce` and wait for a successful receipt
    async fn submit(&self, package: &MessagePackage, nonce: u64) -> Result<B256>;
}

pub struct AlloyInboundChannel {
    rpc_url: String,
    chain_id: u64,
    channel_address: Address,
    signer: PrivateKeySigner,
    provider: RootProvider<Http<Client>>,
    confirmation_timeout: Duration,
    closed: AtomicBool,
}

impl AlloyInboundChannel {
    pub fn new(
        rpc_url: impl Into<String>,
        chain_id: u64,
        private_key: &str,
        channel_address: Address,
        confirmation_timeout: Duration,
    ) -> Result<Self> {
        let rpc_url = rpc_url.into();
        let signer: PrivateKeySigner = private_key
            .parse()
            .map_err(|e| RelayError::verification(format!("invalid Ethereum private key: {}", e)))?;
        let parsed = rpc_url
            .parse()
            .map_err(|e| RelayError::transport(rpc_url.clone(), format!("invalid RPC URL: {}", e)))?;
        let provider = ProviderBuilder::new().on_http(parsed);

        Ok(Self {
            rpc_url,
            chain_id,
            channel_address,
            signer,
            provider,
            confirmation_timeout,
            closed: AtomicBool::new(false),
        })
    }

    pub fn relayer_address(&self) -> Address {
        self.signer.address()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RelayError::ConnectionClosed("ethereum"));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainConnection for AlloyInboundChannel {
    fn name(&self) -> &'static str {
        "ethereum"
    }

    async fn connect(&self) -> Result<()> {
        self.ensure_open()?;
        let chain_id = self
            .provider
            .get_chain_id()
            .await
            .map_err(|e| RelayError::transport(&self.rpc_url, e))?;
        if chain_id != self.chain_id {
            return Err(RelayError::verification(format!(
                "Ethereum endpoint reports chain id {}, expected {}",
                chain_id, self.chain_id
            )));
        }
        debug!(chain_id, relayer = %self.relayer_address(), "Ethereum endpoint verified");
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl InboundChannelApi for AlloyInboundChannel {
    async fn latest_parachain_block(&self) -> Result<u32> {
        self.ensure_open()?;
        let contract = InboundChannel::new(self.channel_address, &self.provider);
        let latest = contract
            .latestParachainBlock()
            .call()
            .await
            .map_err(|e| submission_error(&self.rpc_url, format!("latestParachainBlock: {}", e)))?;
        Ok(latest.blockNumber)
    }

    async fn pending_nonce(&self) -> Result<u64> {
        self.ensure_open()?;
        // get_transaction_count reads the pending block tag by default
        self.provider
            .get_transaction_count(self.relayer_address())
            .await
            .map_err(|e| RelayError::transport(&self.rpc_url, e))
    }

    async fn submit(&self, package: &MessagePackage, nonce: u64) -> Result<B256> {
        self.ensure_open()?;
        let wallet = EthereumWallet::from(self.signer.clone());
        let parsed = self
            .rpc_url
            .parse()
            .map_err(|e| RelayError::transport(self.rpc_url.clone(), format!("invalid RPC URL: {}", e)))?;
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(wallet)
            .on_http(parsed);

        let contract = InboundChannel::new(self.channel_address, &provider);
        let (messages, proof) = to_abi(package);

        debug!(
            parachain_block = package.parachain_block,
            messages = messages.len(),
            nonce,
            "Submitting message package"
        );

        let pending_tx = contract
            .submit(messages, proof)
            .nonce(nonce)
            .send()
            .await
            .map_err(|e| submission_error(&self.rpc_url, format!("failed to send transaction: {}", e)))?;

        let tx_hash = *pending_tx.tx_hash();
        info!(tx_hash = %tx_hash, nonce, "Transaction sent, waiting for confirmation");

        let receipt = tokio::time::timeout(self.confirmation_timeout, pending_tx.get_receipt())
            .await
            .map_err(|_| {
                RelayError::transport(
                    &self.rpc_url,
                    format!("timed out waiting for receipt of {}", tx_hash),
                )
            })?
            .map_err(|e| RelayError::transport(&self.rpc_url, format!("failed to get receipt: {}", e)))?;

        if !receipt.status() {
            return Err(RelayError::ContractRejected(format!(
                "transaction {} reverted",
                tx_hash
            )));
        }

        Ok(tx_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Anvil's first development key
    const TEST_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[test]
    fn test_relayer_address_from_key() {
        let channel = AlloyInboundChannel::new(
            "http://127.0.0.1:8545",
            1,
            TEST_KEY,
            Address::ZERO,
            Duration::from_secs(60),
        )
        .unwrap();
        assert_eq!(
            channel.relayer_address(),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".parse::<Address>().unwrap()
        );
    }

    #[test]
    fn test_invalid_key_rejected() {
        let result = AlloyInboundChannel::new(
            "http://127.0.0.1:8545",
            1,
            "not-a-key",
            Address::ZERO,
            Duration::from_secs(60),
        );
        assert!(matches!(result, Err(RelayError::Verification(_))));
    }

    #[tokio::test]
    async fn test_closed_channel_rejects_calls() {
        let channel = AlloyInboundChannel::new(
            "http://127.0.0.1:1",
            1,
            TEST_KEY,
            Address::ZERO,
            Duration::from_secs(60),
        )
        .unwrap();
        channel.close();
        assert!(matches!(
            channel.pending_nonce().await,
            Err(RelayError::ConnectionClosed("ethereum"))
        ));
    }
}
