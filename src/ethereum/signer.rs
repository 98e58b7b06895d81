use alloy::{
    consensus::{SignableTransaction, TxEnvelope, TxLegacy},
    eips::eip2718::Encodable2718,
    network::TxSignerSync,
    primitives::{Address, TxKind},
    signers::local::PrivateKeySigner,
};
use async_trait::async_trait;
use std::str::FromStr;

use super::backend::{SignedTransaction, TransactionSigner, UnsignedTransaction};
use super::error::{BindError, BindResult};

/// Signs legacy EIP-155 transactions with an in-process private key
#[derive(Clone)]
pub struct LocalSigner {
    inner: PrivateKeySigner,
}

impl LocalSigner {
    /// Parse a hex-encoded secp256k1 key, with or without `0x`
    pub fn from_private_key(key: &str) -> BindResult<Self> {
        let key = key.trim();
        let inner = PrivateKeySigner::from_str(key.strip_prefix("0x").unwrap_or(key))
            .map_err(|e| BindError::Signer(format!("Invalid private key: {}", e)))?;
        Ok(Self { inner })
    }

    /// Read the key from environment variable `var`
    pub fn from_env(var: &str) -> BindResult<Self> {
        let key = std::env::var(var).map_err(|_| {
            BindError::Signer(format!("Environment variable '{}' is not set", var))
        })?;
        Self::from_private_key(&key)
    }
}

impl std::fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSigner")
            .field("address", &self.inner.address())
            .finish()
    }
}

#[async_trait]
impl TransactionSigner for LocalSigner {
    fn address(&self) -> Address {
        self.inner.address()
    }

    async fn sign(&self, tx: UnsignedTransaction, chain_id: u64) -> BindResult<SignedTransaction> {
        let mut legacy = TxLegacy {
            chain_id: Some(chain_id),
            nonce: tx.nonce,
            gas_price: tx.gas_price.into(),
            gas_limit: tx.gas_limit.into(),
            to: tx.to.map_or(TxKind::Create, TxKind::Call),
            value: tx.value,
            input: tx.input.clone(),
        };

        let signature = self
            .inner
            .sign_transaction_sync(&mut legacy)
            .map_err(|e| BindError::Signer(format!("Failed to sign transaction: {}", e)))?;
        let signed = legacy.into_signed(signature);
        let hash = *signed.hash();
        let raw = TxEnvelope::Legacy(signed).encoded_2718();

        Ok(SignedTransaction {
            tx,
            from: self.inner.address(),
            chain_id,
            hash,
            raw: raw.into(),
        })
    }
}
