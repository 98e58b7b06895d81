//! Scripted in-memory backend for unit tests

use alloy::primitives::{address, keccak256, Address, Bytes, B256, U256};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

use super::backend::{
    CallMsg, ContractReader, ContractWriter, EventSource, LogQuery, LogSubscription, RawLog,
    SignedTransaction, TransactionSigner, UnsignedTransaction,
};
use super::error::{BindError, BindResult};
use super::BlockRef;

pub const CONTRACT: Address = address!("e09d7Ce1107Dc37C9c20d8019DD1786Ca82F6640");
pub const SENDER: Address = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");

pub struct MockBackend {
    pub code: Mutex<Bytes>,
    /// `None` echoes the calldata back without its selector
    pub call_result: Mutex<Option<BindResult<Bytes>>>,
    pub calls: Mutex<Vec<(CallMsg, BlockRef)>>,
    pub nonce: u64,
    pub gas_price: u128,
    pub chain_id: u64,
    pub estimate_result: Mutex<BindResult<u64>>,
    pub estimates: Mutex<Vec<CallMsg>>,
    pub send_result: Mutex<BindResult<()>>,
    pub sent: Mutex<Vec<SignedTransaction>>,
    pub logs: Mutex<BindResult<Vec<RawLog>>>,
    pub queries: Mutex<Vec<LogQuery>>,
    feeds: Mutex<VecDeque<(mpsc::Receiver<RawLog>, LogSubscription)>>,
    pub releases: Arc<AtomicUsize>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            code: Mutex::new(Bytes::from(vec![0x60, 0x80])),
            call_result: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            nonce: 7,
            gas_price: 2_000_000_000,
            chain_id: 11155111,
            estimate_result: Mutex::new(Ok(45_000)),
            estimates: Mutex::new(Vec::new()),
            send_result: Mutex::new(Ok(())),
            sent: Mutex::new(Vec::new()),
            logs: Mutex::new(Ok(Vec::new())),
            queries: Mutex::new(Vec::new()),
            feeds: Mutex::new(VecDeque::new()),
            releases: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn returning(output: impl Into<Bytes>) -> Self {
        let backend = Self::new();
        *backend.call_result.lock().unwrap() = Some(Ok(output.into()));
        backend
    }

    pub fn with_logs(logs: Vec<RawLog>) -> Self {
        let backend = Self::new();
        *backend.logs.lock().unwrap() = Ok(logs);
        backend
    }

    /// Script the next live feed handed out by `watch_logs`
    pub fn push_feed(&self) -> FeedDriver {
        let (log_tx, log_rx) = mpsc::channel(16);
        let (err_tx, err_rx) = oneshot::channel();
        let releases = self.releases.clone();
        let subscription = LogSubscription::new(err_rx, move || {
            releases.fetch_add(1, Ordering::SeqCst);
        });
        self.feeds
            .lock()
            .unwrap()
            .push_back((log_rx, subscription));
        FeedDriver {
            logs: log_tx,
            err: Some(err_tx),
        }
    }

    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

pub struct FeedDriver {
    pub logs: mpsc::Sender<RawLog>,
    err: Option<oneshot::Sender<BindError>>,
}

impl FeedDriver {
    pub async fn send(&self, log: RawLog) {
        self.logs.send(log).await.unwrap();
    }

    pub fn fail(&mut self, err: BindError) {
        if let Some(tx) = self.err.take() {
            let _ = tx.send(err);
        }
    }

    /// Signal clean completion of the feed
    pub fn finish(&mut self) {
        self.err.take();
    }
}

#[async_trait]
impl ContractReader for MockBackend {
    async fn code_at(&self, _address: Address, _block: BlockRef) -> BindResult<Bytes> {
        Ok(self.code.lock().unwrap().clone())
    }

    async fn call_contract(&self, msg: CallMsg, block: BlockRef) -> BindResult<Bytes> {
        self.calls.lock().unwrap().push((msg.clone(), block));
        match self.call_result.lock().unwrap().clone() {
            Some(result) => result,
            None => Ok(Bytes::from(msg.data[4..].to_vec())),
        }
    }
}

#[async_trait]
impl ContractWriter for MockBackend {
    async fn pending_nonce_at(&self, _account: Address) -> BindResult<u64> {
        Ok(self.nonce)
    }

    async fn suggest_gas_price(&self) -> BindResult<u128> {
        Ok(self.gas_price)
    }

    async fn estimate_gas(&self, msg: CallMsg) -> BindResult<u64> {
        self.estimates.lock().unwrap().push(msg);
        self.estimate_result.lock().unwrap().clone()
    }

    async fn chain_id(&self) -> BindResult<u64> {
        Ok(self.chain_id)
    }

    async fn send_transaction(&self, tx: &SignedTransaction) -> BindResult<()> {
        self.send_result.lock().unwrap().clone()?;
        self.sent.lock().unwrap().push(tx.clone());
        Ok(())
    }
}

#[async_trait]
impl EventSource for MockBackend {
    async fn filter_logs(&self, query: LogQuery) -> BindResult<Vec<RawLog>> {
        self.queries.lock().unwrap().push(query);
        self.logs.lock().unwrap().clone()
    }

    async fn watch_logs(
        &self,
        query: LogQuery,
    ) -> BindResult<(mpsc::Receiver<RawLog>, LogSubscription)> {
        self.queries.lock().unwrap().push(query);
        self.feeds
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| BindError::Subscription("No feed scripted".to_string()))
    }
}

pub struct MockSigner;

#[async_trait]
impl TransactionSigner for MockSigner {
    fn address(&self) -> Address {
        SENDER
    }

    async fn sign(
        &self,
        tx: UnsignedTransaction,
        chain_id: u64,
    ) -> BindResult<SignedTransaction> {
        let mut preimage = tx.nonce.to_be_bytes().to_vec();
        preimage.extend_from_slice(&chain_id.to_be_bytes());
        preimage.extend_from_slice(&tx.input);
        Ok(SignedTransaction {
            from: SENDER,
            chain_id,
            hash: keccak256(&preimage),
            raw: preimage.into(),
            tx,
        })
    }
}

pub fn signer() -> Arc<dyn TransactionSigner> {
    Arc::new(MockSigner)
}

/// An `Increment(uint256 by)` log as the Counter contract emits it
pub fn increment_log(by: u64, block: u64, index: u64) -> RawLog {
    RawLog {
        address: CONTRACT,
        topics: vec![keccak256("Increment(uint256)")],
        data: Bytes::from(U256::from(by).to_be_bytes::<32>().to_vec()),
        block_number: Some(block),
        block_hash: Some(B256::with_last_byte(block as u8)),
        transaction_hash: Some(keccak256(block.to_be_bytes())),
        transaction_index: Some(0),
        log_index: Some(index),
        removed: false,
    }
}
