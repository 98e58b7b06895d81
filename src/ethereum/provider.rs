use alloy::{
    eips::{BlockId, BlockNumberOrTag},
    primitives::{Address, Bytes},
    providers::{Provider, ProviderBuilder, RootProvider},
    rpc::types::{Filter, Log, TransactionRequest},
    transports::{
        http::{Client, Http},
        RpcError, TransportError,
    },
};
use async_trait::async_trait;
use std::future::IntoFuture;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backend::{
    CallMsg, ContractReader, ContractWriter, EventSource, LogQuery, LogSubscription, RawLog,
    SignedTransaction,
};
use super::error::{BindError, BindResult};
use super::utils;
use super::BlockRef;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(4);
const DEFAULT_BUFFER: usize = 256;

/// JSON-RPC node backend over HTTP.
///
/// Live log feeds are served by polling `eth_getLogs` over newly mined
/// block ranges, since plain HTTP offers no push subscriptions.
#[derive(Debug, Clone)]
pub struct RpcBackend {
    provider: RootProvider<Http<Client>>,
    poll_interval: Duration,
    buffer: usize,
}

impl RpcBackend {
    pub fn new(rpc_url: &str) -> BindResult<Self> {
        let url = rpc_url
            .parse()
            .map_err(|e| BindError::Transport(format!("Invalid RPC URL '{}': {}", rpc_url, e)))?;
        let provider = ProviderBuilder::new().on_http(url);

        Ok(Self {
            provider,
            poll_interval: DEFAULT_POLL_INTERVAL,
            buffer: DEFAULT_BUFFER,
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Capacity of the channel between the poller and the log consumer
    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    pub fn provider(&self) -> &RootProvider<Http<Client>> {
        &self.provider
    }

    /// Validates connectivity with detailed error information
    pub async fn validate_connection(&self) -> BindResult<u64> {
        self.provider.get_block_number().await.map_err(|e| {
            BindError::Transport(format!(
                "Cannot connect to RPC endpoint: {}. Please check your RPC endpoint configuration and network connectivity.",
                utils::interpret_rpc_error(&e.to_string())
            ))
        })
    }
}

fn block_id(block: BlockRef) -> BlockId {
    match block {
        BlockRef::Latest => BlockId::latest(),
        BlockRef::Pending => BlockId::pending(),
        BlockRef::Number(n) => BlockId::number(n),
    }
}

fn request(msg: CallMsg) -> TransactionRequest {
    let mut req = TransactionRequest::default().input(msg.data.into());
    if let Some(to) = msg.to {
        req = req.to(to);
    }
    if let Some(from) = msg.from {
        req = req.from(from);
    }
    if let Some(value) = msg.value {
        req = req.value(value);
    }
    if let Some(gas_price) = msg.gas_price {
        req.gas_price = Some(gas_price);
    }
    req
}

/// Maps a node error onto the binding taxonomy. Error responses carrying a
/// revert become [`BindError::ContractRevert`].
fn classify(err: TransportError) -> BindError {
    if let RpcError::ErrorResp(payload) = &err {
        let message = payload.message.to_string();
        let data = payload.data.as_ref().map(|d| d.get());
        if let Some(reason) = utils::revert_reason(&message, data) {
            debug!("Node reported revert: {}", reason);
            return BindError::revert(reason);
        }
    }
    BindError::Transport(utils::interpret_rpc_error(&err.to_string()))
}

fn to_filter(query: &LogQuery, from: u64, to: Option<u64>) -> BindResult<Filter> {
    let mut filter = Filter::new()
        .address(query.address)
        .from_block(from)
        .to_block(to.map_or(BlockNumberOrTag::Latest, BlockNumberOrTag::Number));

    for (position, set) in query.topics.iter().enumerate() {
        let set = set.clone();
        filter = match position {
            0 => filter.event_signature(set),
            1 => filter.topic1(set),
            2 => filter.topic2(set),
            3 => filter.topic3(set),
            _ => {
                return Err(BindError::Encode(format!(
                    "Log query has {} topic positions, at most 4 are supported",
                    query.topics.len()
                )))
            }
        };
    }
    Ok(filter)
}

fn raw_log(log: Log) -> RawLog {
    RawLog {
        address: log.inner.address,
        topics: log.inner.data.topics().to_vec(),
        data: log.inner.data.data.clone(),
        block_number: log.block_number,
        block_hash: log.block_hash,
        transaction_hash: log.transaction_hash,
        transaction_index: log.transaction_index,
        log_index: log.log_index,
        removed: log.removed,
    }
}

#[async_trait]
impl ContractReader for RpcBackend {
    async fn code_at(&self, address: Address, block: BlockRef) -> BindResult<Bytes> {
        self.provider
            .get_code_at(address)
            .block_id(block_id(block))
            .await
            .map_err(classify)
    }

    async fn call_contract(&self, msg: CallMsg, block: BlockRef) -> BindResult<Bytes> {
        let req = request(msg);
        self.provider
            .call(&req)
            .block(block_id(block))
            .await
            .map_err(classify)
    }
}

#[async_trait]
impl ContractWriter for RpcBackend {
    async fn pending_nonce_at(&self, account: Address) -> BindResult<u64> {
        self.provider
            .get_transaction_count(account)
            .pending()
            .await
            .map_err(classify)
    }

    async fn suggest_gas_price(&self) -> BindResult<u128> {
        self.provider.get_gas_price().await.map_err(classify)
    }

    async fn estimate_gas(&self, msg: CallMsg) -> BindResult<u64> {
        let req = request(msg);
        self.provider.estimate_gas(&req).await.map_err(classify)
    }

    async fn chain_id(&self) -> BindResult<u64> {
        self.provider.get_chain_id().await.map_err(classify)
    }

    async fn send_transaction(&self, tx: &SignedTransaction) -> BindResult<()> {
        let pending = self
            .provider
            .send_raw_transaction(&tx.raw)
            .await
            .map_err(classify)?;
        debug!("Node accepted transaction {}", pending.tx_hash());
        Ok(())
    }
}

#[async_trait]
impl EventSource for RpcBackend {
    async fn filter_logs(&self, query: LogQuery) -> BindResult<Vec<RawLog>> {
        let filter = to_filter(&query, query.from_block.unwrap_or(0), query.to_block)?;
        let logs = self.provider.get_logs(&filter).await.map_err(classify)?;
        Ok(logs.into_iter().map(raw_log).collect())
    }

    async fn watch_logs(
        &self,
        query: LogQuery,
    ) -> BindResult<(mpsc::Receiver<RawLog>, LogSubscription)> {
        let next = match query.from_block {
            Some(block) => block,
            None => self.provider.get_block_number().await.map_err(classify)? + 1,
        };
        // Reject malformed queries before spawning the poller
        to_filter(&query, next, None)?;

        let (log_tx, log_rx) = mpsc::channel(self.buffer);
        let (err_tx, err_rx) = oneshot::channel();
        let quit = CancellationToken::new();

        let poller = LogPoller {
            provider: self.provider.clone(),
            query,
            next,
            interval: self.poll_interval,
            quit: quit.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = poller.run(log_tx).await {
                warn!("Log feed failed: {}", e);
                let _ = err_tx.send(e);
            }
        });

        Ok((log_rx, LogSubscription::new(err_rx, move || quit.cancel())))
    }
}

struct LogPoller {
    provider: RootProvider<Http<Client>>,
    query: LogQuery,
    /// First block not yet scanned
    next: u64,
    interval: Duration,
    quit: CancellationToken,
}

impl LogPoller {
    /// Runs until released or the consumer goes away. `Ok` means a clean stop.
    async fn run(mut self, logs: mpsc::Sender<RawLog>) -> BindResult<()> {
        info!("Polling logs for {} from block {}", self.query.address, self.next);

        loop {
            let Some(head) = self.until_quit(self.provider.get_block_number()).await else {
                break;
            };
            let head = head.map_err(classify)?;

            if head >= self.next {
                let filter = to_filter(&self.query, self.next, Some(head))?;
                let Some(batch) = self.until_quit(self.provider.get_logs(&filter)).await else {
                    break;
                };
                let batch = batch.map_err(classify)?;
                if !batch.is_empty() {
                    debug!(
                        "Fetched {} logs in blocks {}..={}",
                        batch.len(),
                        self.next,
                        head
                    );
                }

                for log in batch {
                    if log.removed {
                        warn!("Forwarding removed log from block {:?}", log.block_number);
                    }
                    match self.until_quit(logs.send(raw_log(log))).await {
                        Some(Ok(())) => {}
                        _ => return Ok(()),
                    }
                }
                self.next = head + 1;
            }

            if self.until_quit(tokio::time::sleep(self.interval)).await.is_none() {
                break;
            }
        }

        debug!("Log poller for {} released", self.query.address);
        Ok(())
    }

    async fn until_quit<F: IntoFuture>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.quit.cancelled() => None,
            out = fut.into_future() => Some(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, b256, TxKind, B256, U256};

    const TOPIC: B256 = b256!("51af157c2eee40f68107a47a49c32fbbeb0a3c9e5cd37aa56e88e6be92368a81");

    #[test]
    fn test_invalid_url() {
        assert!(matches!(
            RpcBackend::new("not a url"),
            Err(BindError::Transport(_))
        ));
        assert!(RpcBackend::new("https://1rpc.io/sepolia").is_ok());
    }

    #[test]
    fn test_block_id_mapping() {
        assert_eq!(block_id(BlockRef::Latest), BlockId::latest());
        assert_eq!(block_id(BlockRef::Pending), BlockId::pending());
        assert_eq!(block_id(BlockRef::Number(12)), BlockId::number(12));
    }

    #[test]
    fn test_call_request_fields() {
        let target = address!("e09d7Ce1107Dc37C9c20d8019DD1786Ca82F6640");
        let req = request(CallMsg {
            to: Some(target),
            value: Some(U256::from(7)),
            gas_price: Some(3_000_000_000),
            data: Bytes::from(vec![0x0c, 0x55, 0x69, 0x9c]),
            ..Default::default()
        });
        assert_eq!(req.gas_price, Some(3_000_000_000));
        assert_eq!(req.value, Some(U256::from(7)));
        assert_eq!(req.from, None);
        assert_eq!(req.to, Some(TxKind::Call(target)));

        assert_eq!(request(CallMsg::default()).gas_price, None);
    }

    #[test]
    fn test_filter_topics() {
        let query = LogQuery {
            address: address!("e09d7Ce1107Dc37C9c20d8019DD1786Ca82F6640"),
            topics: vec![vec![TOPIC], vec![], vec![B256::ZERO, B256::with_last_byte(1)]],
            from_block: Some(5),
            to_block: None,
        };
        let filter = to_filter(&query, 5, Some(9)).unwrap();
        assert!(filter.topics[0].matches(&TOPIC));
        assert!(filter.topics[1].is_empty());
        assert!(filter.topics[2].matches(&B256::with_last_byte(1)));
        assert!(!filter.topics[2].matches(&TOPIC));
        assert_eq!(filter.get_from_block(), Some(5));
        assert_eq!(filter.get_to_block(), Some(9));

        let too_many = LogQuery {
            topics: vec![vec![]; 5],
            ..query
        };
        assert!(matches!(
            to_filter(&too_many, 0, None),
            Err(BindError::Encode(_))
        ));
    }

    #[test]
    fn test_raw_log_conversion() {
        let inner = alloy::primitives::Log::new_unchecked(
            address!("e09d7Ce1107Dc37C9c20d8019DD1786Ca82F6640"),
            vec![TOPIC],
            Bytes::from(U256::from(3).to_be_bytes::<32>().to_vec()),
        );
        let log = Log {
            inner,
            block_number: Some(8),
            log_index: Some(1),
            ..Default::default()
        };
        let raw = raw_log(log);
        assert_eq!(raw.topics, vec![TOPIC]);
        assert_eq!(raw.data.len(), 32);
        assert_eq!(raw.block_number, Some(8));
        assert_eq!(raw.log_index, Some(1));
        assert!(!raw.removed);
    }

    #[test]
    fn test_classify_transport_error() {
        let err = TransportError::local_usage_str("connection refused");
        assert!(matches!(classify(err), BindError::Transport(msg) if msg.contains("Cannot connect")));
    }
}
