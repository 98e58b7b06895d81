//! Typed binding for the `Counter` sample contract.
//!
//! ```solidity
//! contract Counter {
//!     uint256 public x;
//!     event Increment(uint256 by);
//!     function inc() public;
//!     function incBy(uint256 by) public;
//! }
//! ```

use alloy::dyn_abi::DynSolValue;
use alloy::primitives::{Address, U256};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::ethereum::{
    deploy, BindError, BindResult, BoundContract, CallOptions, ContractBackend, DecodedEvent,
    EventIterator, EventSubscription, FilterOptions, FromEvent, InterfaceDescriptor, RawLog,
    SignedTransaction, TransactOptions, WatchOptions,
};

pub const COUNTER_ABI: &str = r#"[{"type":"function","name":"inc","inputs":[],"outputs":[],"stateMutability":"nonpayable"},{"type":"function","name":"incBy","inputs":[{"name":"by","type":"uint256","internalType":"uint256"}],"outputs":[],"stateMutability":"nonpayable"},{"type":"function","name":"x","inputs":[],"outputs":[{"name":"","type":"uint256","internalType":"uint256"}],"stateMutability":"view"},{"type":"event","name":"Increment","inputs":[{"name":"by","type":"uint256","indexed":false,"internalType":"uint256"}],"anonymous":false}]"#;

/// Creation bytecode
pub const COUNTER_BIN: &str = "0x6080604052348015600e575f5ffd5b506103cf8061001c5f395ff3fe608060405234801561000f575f5ffd5b506004361061003f575f3560e01c80630c55699c14610043578063371303c01461006157806370119d061461006b575b5f5ffd5b61004b610087565b6040516100589190610187565b60405180910390f35b61006961008c565b005b610085600480360381019061008091906101ce565b6100dc565b005b5f5481565b5f5f81548092919061009d90610226565b91905055507f51af157c2eee40f68107a47a49c32fbbeb0a3c9e5cd37aa56e88e6be92368a8160016040516100d291906102af565b60405180910390a1565b5f811161011e576040517f08c379a000000000000000000000000000000000000000000000000000000000815260040161011590610348565b60405180910390fd5b805f5f82825461012e9190610366565b925050819055507f51af157c2eee40f68107a47a49c32fbbeb0a3c9e5cd37aa56e88e6be92368a81816040516101649190610187565b60405180910390a150565b5f819050919050565b6101818161016f565b82525050565b5f60208201905061019a5f830184610178565b92915050565b5f5ffd5b6101ad8161016f565b81146101b7575f5ffd5b50565b5f813590506101c8816101a4565b92915050565b5f602082840312156101e3576101e26101a0565b5b5f6101f0848285016101ba565b91505092915050565b7f4e487b71000000000000000000000000000000000000000000000000000000005f52601160045260245ffd5b5f6102308261016f565b91507fffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff8203610262576102616101f9565b5b600182019050919050565b5f819050919050565b5f819050919050565b5f61029961029461028f8461026d565b610276565b61016f565b9050919050565b6102a98161027f565b82525050565b5f6020820190506102c25f8301846102a0565b92915050565b5f82825260208201905092915050565b7f696e6342793a20696e6372656d656e742073686f756c6420626520706f7369745f8201527f6976650000000000000000000000000000000000000000000000000000000000602082015250565b5f6103326023836102c8565b915061033d826102d8565b604082019050919050565b5f6020820190508181035f83015261035f81610326565b9050919050565b5f6103708261016f565b915061037b8361016f565b9250828201905080821115610393576103926101f9565b5b9291505056fea264697066735822122089eb84d7252d4e1d450bdbb3c2ae3016bbbc1e0d0d78cb59d3839cc23e47a60b64736f6c63430008210033";

/// An `Increment` event emitted by the contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncrementEvent {
    pub by: U256,
    pub raw: RawLog,
}

impl FromEvent for IncrementEvent {
    fn from_event(event: DecodedEvent) -> BindResult<Self> {
        Ok(Self {
            by: event.uint("by")?,
            raw: event.raw,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Counter {
    contract: BoundContract,
}

impl Counter {
    pub fn descriptor() -> BindResult<Arc<InterfaceDescriptor>> {
        InterfaceDescriptor::parse(COUNTER_ABI).map(Arc::new)
    }

    /// Bind to a deployed instance. Performs no network access.
    pub fn new<B: ContractBackend + 'static>(address: Address, backend: Arc<B>) -> BindResult<Self> {
        let contract = BoundContract::bind(address, Self::descriptor()?, backend)?;
        Ok(Self { contract })
    }

    /// Wrap an already bound contract, e.g. one bound with a reduced capability set
    pub fn from_contract(contract: BoundContract) -> Self {
        Self { contract }
    }

    /// Deploy a fresh instance
    pub async fn deploy<B: ContractBackend + 'static>(
        opts: &TransactOptions,
        backend: Arc<B>,
    ) -> BindResult<(Address, SignedTransaction, Self)> {
        let bytecode = hex::decode(COUNTER_BIN.trim_start_matches("0x"))
            .map_err(|e| BindError::Encode(format!("Invalid Counter bytecode: {}", e)))?;
        let (address, tx, contract) =
            deploy(Self::descriptor()?, &bytecode, &[], opts, backend).await?;
        Ok((address, tx, Self { contract }))
    }

    pub fn address(&self) -> Address {
        self.contract.address()
    }

    pub fn contract(&self) -> &BoundContract {
        &self.contract
    }

    pub async fn x(&self, opts: &CallOptions) -> BindResult<U256> {
        self.contract.call("x", &[], opts).await?.into_uint()
    }

    pub async fn inc(&self, opts: &TransactOptions) -> BindResult<SignedTransaction> {
        self.contract.transact("inc", &[], opts).await
    }

    /// Reverts with `incBy: increment should be positive` when `by` is zero
    pub async fn inc_by(&self, by: U256, opts: &TransactOptions) -> BindResult<SignedTransaction> {
        self.contract
            .transact("incBy", &[DynSolValue::Uint(by, 256)], opts)
            .await
    }

    pub async fn filter_increment(
        &self,
        opts: &FilterOptions,
    ) -> BindResult<EventIterator<IncrementEvent>> {
        self.contract.filter_logs_with("Increment", opts, &[]).await
    }

    pub async fn watch_increment(
        &self,
        opts: &WatchOptions,
        sink: mpsc::Sender<IncrementEvent>,
    ) -> BindResult<EventSubscription> {
        self.contract
            .watch_logs_with("Increment", opts, &[], sink)
            .await
    }

    pub fn parse_increment(&self, log: &RawLog) -> BindResult<IncrementEvent> {
        IncrementEvent::from_event(self.contract.parse_log("Increment", log)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ethereum::testing::{increment_log, signer, MockBackend, CONTRACT, SENDER};
    use crate::ethereum::BlockRef;

    const REVERT_REASON: &str = "incBy: increment should be positive";

    #[tokio::test]
    async fn test_read_counter_value() {
        let backend = Arc::new(MockBackend::returning(
            U256::from(42).to_be_bytes::<32>().to_vec(),
        ));
        let counter = Counter::new(CONTRACT, backend.clone()).unwrap();

        let value = counter
            .x(&CallOptions::pending().from(SENDER))
            .await
            .unwrap();
        assert_eq!(value, U256::from(42));

        let calls = backend.calls.lock().unwrap();
        assert_eq!(calls[0].0.data.as_ref(), &[0x0c, 0x55, 0x69, 0x9c]);
        assert_eq!(calls[0].0.from, Some(SENDER));
        assert_eq!(calls[0].1, BlockRef::Pending);
    }

    #[tokio::test]
    async fn test_inc_submits_transaction() {
        let backend = Arc::new(MockBackend::new());
        let counter = Counter::new(CONTRACT, backend.clone()).unwrap();

        let tx = counter.inc(&TransactOptions::new(signer())).await.unwrap();
        assert_eq!(tx.tx.to, Some(CONTRACT));
        assert_eq!(tx.tx.input.as_ref(), &[0x37, 0x13, 0x03, 0xc0]);
        assert_eq!(tx.tx.nonce, 7);
        assert_eq!(tx.chain_id, 11155111);
        assert_eq!(backend.sent.lock().unwrap()[0].hash, tx.hash);
    }

    #[tokio::test]
    async fn test_inc_by_zero_reverts() {
        let backend = Arc::new(MockBackend::new());
        *backend.estimate_result.lock().unwrap() = Err(BindError::revert(REVERT_REASON));
        let counter = Counter::new(CONTRACT, backend.clone()).unwrap();

        let err = counter
            .inc_by(U256::ZERO, &TransactOptions::new(signer()))
            .await
            .unwrap_err();
        assert_eq!(err.revert_reason(), Some(REVERT_REASON));
        assert!(backend.sent.lock().unwrap().is_empty());

        let estimates = backend.estimates.lock().unwrap();
        assert_eq!(&estimates[0].data[..4], &[0x70, 0x11, 0x9d, 0x06]);
        assert_eq!(estimates[0].data.len(), 36);
    }

    #[tokio::test]
    async fn test_inc_by_zero_reverts_on_submission() {
        let backend = Arc::new(MockBackend::new());
        *backend.send_result.lock().unwrap() = Err(BindError::revert(REVERT_REASON));
        let counter = Counter::new(CONTRACT, backend.clone()).unwrap();

        let opts = TransactOptions::new(signer()).gas_limit(100_000);
        let err = counter.inc_by(U256::ZERO, &opts).await.unwrap_err();
        assert!(matches!(err, BindError::ContractRevert { .. }));
        assert_eq!(err.revert_reason(), Some(REVERT_REASON));
        assert!(backend.estimates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_filter_increment_events() {
        let backend = Arc::new(MockBackend::with_logs(vec![
            increment_log(1, 100, 0),
            increment_log(2, 101, 0),
            increment_log(3, 101, 1),
        ]));
        let counter = Counter::new(CONTRACT, backend).unwrap();

        let mut it = counter
            .filter_increment(&FilterOptions::range(100, Some(101)))
            .await
            .unwrap();
        let mut seen = Vec::new();
        while it.next().await {
            seen.push(it.take_event().unwrap().by);
        }
        assert_eq!(seen, vec![U256::from(1), U256::from(2), U256::from(3)]);
        assert!(it.error().is_none());
    }

    #[tokio::test]
    async fn test_watch_increment_events() {
        let backend = Arc::new(MockBackend::new());
        let feed = backend.push_feed();
        let counter = Counter::new(CONTRACT, backend.clone()).unwrap();

        let (sink, mut events) = mpsc::channel(8);
        let mut sub = counter
            .watch_increment(&WatchOptions::default(), sink)
            .await
            .unwrap();
        feed.send(increment_log(9, 5, 0)).await;

        let event = events.recv().await.unwrap();
        assert_eq!(event.by, U256::from(9));
        assert_eq!(event.raw.block_number, Some(5));

        sub.unsubscribe();
        assert_eq!(sub.err().await, None);
        assert_eq!(backend.release_count(), 1);
    }

    #[test]
    fn test_parse_increment() {
        let counter = Counter::new(CONTRACT, Arc::new(MockBackend::new())).unwrap();
        let event = counter.parse_increment(&increment_log(11, 1, 0)).unwrap();
        assert_eq!(event.by, U256::from(11));
    }

    #[tokio::test]
    async fn test_deploy_counter() {
        let backend = Arc::new(MockBackend::new());
        let (address, tx, counter) = Counter::deploy(&TransactOptions::new(signer()), backend)
            .await
            .unwrap();

        assert_eq!(address, SENDER.create(7));
        assert_eq!(counter.address(), address);
        assert_eq!(tx.tx.to, None);
        assert_eq!(&tx.tx.input[..4], &[0x60, 0x80, 0x60, 0x40]);
    }
}
