pub mod abi;
pub mod backend;
pub mod contract;
pub mod error;
pub mod events;
pub mod provider;
pub mod signer;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

use alloy::primitives::{Address, U256};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub use abi::{ContractArtifact, EventField, EventSpec, InterfaceDescriptor, MethodSpec};
pub use backend::{
    CallMsg, ContractBackend, ContractReader, ContractWriter, EventSource, LogQuery,
    LogSubscription, RawLog, SignedTransaction, TransactionSigner, UnsignedTransaction,
};
pub use contract::{deploy, BoundContract, CallOutput};
pub use error::{BindError, BindResult};
pub use events::{
    decode_log, DecodedEvent, EventIterator, EventSubscription, FromEvent, IteratorState,
};
pub use provider::RpcBackend;
pub use signer::LocalSigner;

/// Block a read call is evaluated against
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BlockRef {
    #[default]
    Latest,
    Pending,
    Number(u64),
}

/// Per-call options for read-only invocations
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub block: BlockRef,
    /// Caller address the call is evaluated as
    pub from: Option<Address>,
    pub cancel: Option<CancellationToken>,
}

impl CallOptions {
    pub fn pending() -> Self {
        Self {
            block: BlockRef::Pending,
            ..Self::default()
        }
    }

    pub fn at_block(number: u64) -> Self {
        Self {
            block: BlockRef::Number(number),
            ..Self::default()
        }
    }

    pub fn from(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Per-call options for state-changing invocations. Unset fields are
/// resolved through the backend before signing.
#[derive(Clone)]
pub struct TransactOptions {
    pub signer: Arc<dyn TransactionSigner>,
    pub nonce: Option<u64>,
    pub value: U256,
    pub gas_price: Option<u128>,
    pub gas_limit: Option<u64>,
    pub chain_id: Option<u64>,
    /// Sign but do not submit
    pub no_send: bool,
    pub cancel: Option<CancellationToken>,
}

impl TransactOptions {
    pub fn new(signer: Arc<dyn TransactionSigner>) -> Self {
        Self {
            signer,
            nonce: None,
            value: U256::ZERO,
            gas_price: None,
            gas_limit: None,
            chain_id: None,
            no_send: false,
            cancel: None,
        }
    }

    pub fn nonce(mut self, nonce: u64) -> Self {
        self.nonce = Some(nonce);
        self
    }

    pub fn value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn gas_price(mut self, gas_price: u128) -> Self {
        self.gas_price = Some(gas_price);
        self
    }

    pub fn gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }

    pub fn chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = Some(chain_id);
        self
    }

    pub fn no_send(mut self) -> Self {
        self.no_send = true;
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

impl std::fmt::Debug for TransactOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactOptions")
            .field("from", &self.signer.address())
            .field("nonce", &self.nonce)
            .field("value", &self.value)
            .field("gas_price", &self.gas_price)
            .field("gas_limit", &self.gas_limit)
            .field("chain_id", &self.chain_id)
            .field("no_send", &self.no_send)
            .finish()
    }
}

/// Options for historical log retrieval
#[derive(Debug, Clone, Default)]
pub struct FilterOptions {
    pub start: u64,
    /// Inclusive; `None` means up to the latest block
    pub end: Option<u64>,
    /// Continue with a live feed once the historical logs are exhausted
    pub follow: bool,
    pub cancel: Option<CancellationToken>,
}

impl FilterOptions {
    pub fn range(start: u64, end: Option<u64>) -> Self {
        Self {
            start,
            end,
            ..Self::default()
        }
    }

    pub fn follow(mut self) -> Self {
        self.follow = true;
        self
    }
}

/// Options for live log subscriptions
#[derive(Debug, Clone, Default)]
pub struct WatchOptions {
    /// First block to deliver logs from; `None` starts at the chain head
    pub start: Option<u64>,
    pub cancel: Option<CancellationToken>,
}

/// Run a backend request, aborting with [`BindError::Cancelled`] when the
/// caller's token fires first
pub(crate) async fn with_cancel<T, F>(cancel: Option<&CancellationToken>, fut: F) -> BindResult<T>
where
    F: Future<Output = BindResult<T>>,
{
    match cancel {
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(BindError::Cancelled),
                result = fut => result,
            }
        }
        None => fut.await,
    }
}
