//! Capabilities the binding layer consumes but does not implement.
//!
//! A contract is bound against any combination of [`ContractReader`],
//! [`ContractWriter`] and [`EventSource`]; a full node client implements all
//! three and is therefore a [`ContractBackend`].

use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use std::future::pending;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::error::{BindError, BindResult};
use super::BlockRef;

/// A read-only message call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallMsg {
    pub from: Option<Address>,
    pub to: Option<Address>,
    pub value: Option<U256>,
    pub gas_price: Option<u128>,
    pub data: Bytes,
}

/// A log record as delivered by the node, kept for provenance after decoding
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: Option<u64>,
    pub block_hash: Option<B256>,
    pub transaction_hash: Option<B256>,
    pub transaction_index: Option<u64>,
    pub log_index: Option<u64>,
    /// Set when the log was dropped by a chain reorganisation
    pub removed: bool,
}

/// Log selection for filtering and watching.
///
/// `topics[i]` lists the accepted values at topic position `i`; an empty
/// set matches anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogQuery {
    pub address: Address,
    pub topics: Vec<Vec<B256>>,
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
}

/// A legacy (EIP-155) transaction before signing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    /// `None` creates a contract
    pub to: Option<Address>,
    pub value: U256,
    pub input: Bytes,
}

/// A signed transaction ready for submission; also the handle returned by
/// transact operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub tx: UnsignedTransaction,
    pub from: Address,
    pub chain_id: u64,
    pub hash: B256,
    /// Wire encoding sent with `eth_sendRawTransaction`
    pub raw: Bytes,
}

impl SignedTransaction {
    pub fn hash(&self) -> B256 {
        self.hash
    }
}

#[async_trait]
pub trait ContractReader: Send + Sync {
    async fn code_at(&self, address: Address, block: BlockRef) -> BindResult<Bytes>;

    async fn call_contract(&self, msg: CallMsg, block: BlockRef) -> BindResult<Bytes>;
}

#[async_trait]
pub trait ContractWriter: Send + Sync {
    async fn pending_nonce_at(&self, account: Address) -> BindResult<u64>;

    async fn suggest_gas_price(&self) -> BindResult<u128>;

    /// Reverts surface here as [`BindError::ContractRevert`]
    async fn estimate_gas(&self, msg: CallMsg) -> BindResult<u64>;

    async fn chain_id(&self) -> BindResult<u64>;

    async fn send_transaction(&self, tx: &SignedTransaction) -> BindResult<()>;
}

#[async_trait]
pub trait EventSource: Send + Sync {
    async fn filter_logs(&self, query: LogQuery) -> BindResult<Vec<RawLog>>;

    /// Open a live feed of matching logs starting at `query.from_block`
    async fn watch_logs(
        &self,
        query: LogQuery,
    ) -> BindResult<(mpsc::Receiver<RawLog>, LogSubscription)>;
}

/// Everything a contract needs from a node
pub trait ContractBackend: ContractReader + ContractWriter + EventSource {}

impl<T: ContractReader + ContractWriter + EventSource> ContractBackend for T {}

/// Delegated transaction signing; the binding layer never holds key material
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    fn address(&self) -> Address;

    async fn sign(&self, tx: UnsignedTransaction, chain_id: u64)
        -> BindResult<SignedTransaction>;
}

/// Handle on a live log feed.
///
/// `err()` resolves once the feed terminates: `Some` on failure, `None` when
/// the producer finished cleanly. `unsubscribe()` releases the feed; the
/// release runs at most once, also when the handle is dropped.
pub struct LogSubscription {
    err: Option<oneshot::Receiver<BindError>>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl LogSubscription {
    pub fn new(err: oneshot::Receiver<BindError>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            err: Some(err),
            release: Some(Box::new(release)),
        }
    }

    /// Wait for the feed to terminate. After it has resolved once, never
    /// resolves again.
    pub async fn err(&mut self) -> Option<BindError> {
        match self.err.as_mut() {
            Some(rx) => {
                let result = rx.await.ok();
                self.err = None;
                result
            }
            None => pending().await,
        }
    }

    pub fn unsubscribe(&mut self) {
        if let Some(release) = self.release.take() {
            debug!("Releasing log subscription");
            release();
        }
    }

    pub fn is_released(&self) -> bool {
        self.release.is_none()
    }
}

impl Drop for LogSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for LogSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSubscription")
            .field("terminated", &self.err.is_none())
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_release_runs_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let (_err_tx, err_rx) = oneshot::channel();
        let counter = count.clone();
        let mut sub = LogSubscription::new(err_rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        sub.unsubscribe();
        sub.unsubscribe();
        drop(sub);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_err_reports_failure_or_completion() {
        let (err_tx, err_rx) = oneshot::channel();
        let mut sub = LogSubscription::new(err_rx, || {});
        err_tx
            .send(BindError::Subscription("connection reset".to_string()))
            .unwrap();
        assert_eq!(
            sub.err().await,
            Some(BindError::Subscription("connection reset".to_string()))
        );

        let (err_tx, err_rx) = oneshot::channel::<BindError>();
        let mut sub = LogSubscription::new(err_rx, || {});
        drop(err_tx);
        assert_eq!(sub.err().await, None);
    }
}
