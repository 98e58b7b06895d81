//! Event consumption: historical iteration (pull) and live watching (push).

use alloy::dyn_abi::{DynSolValue, EventExt};
use alloy::primitives::{Address, U256};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::abi::EventSpec;
use super::backend::{LogQuery, LogSubscription, RawLog};
use super::contract::BoundContract;
use super::error::{BindError, BindResult};
use super::{utils, with_cancel, FilterOptions, WatchOptions};

/// An event log decoded against the interface, with its raw log kept for
/// provenance
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEvent {
    pub name: String,
    /// Field values in declaration order
    pub fields: Vec<(String, DynSolValue)>,
    pub raw: RawLog,
}

impl DecodedEvent {
    pub fn field(&self, name: &str) -> Option<&DynSolValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn uint(&self, name: &str) -> BindResult<U256> {
        match self.field(name) {
            Some(DynSolValue::Uint(value, _)) => Ok(*value),
            Some(other) => Err(BindError::Decode(format!(
                "Field '{}' of {} is not an unsigned integer: {:?}",
                name, self.name, other
            ))),
            None => Err(BindError::Decode(format!(
                "Event {} has no field '{}'",
                self.name, name
            ))),
        }
    }

    pub fn to_json(&self) -> BindResult<Value> {
        let mut fields = Map::new();
        for (name, value) in &self.fields {
            fields.insert(name.clone(), utils::dyn_sol_value_to_json(value)?);
        }
        Ok(serde_json::json!({
            "event": self.name,
            "fields": fields,
            "block_number": self.raw.block_number,
            "transaction_hash": self.raw.transaction_hash.map(|h| format!("0x{:x}", h)),
            "log_index": self.raw.log_index,
        }))
    }
}

/// Conversion from a decoded log into a typed event
pub trait FromEvent: Sized + Send + 'static {
    fn from_event(event: DecodedEvent) -> BindResult<Self>;
}

impl FromEvent for DecodedEvent {
    fn from_event(event: DecodedEvent) -> BindResult<Self> {
        Ok(event)
    }
}

/// Decode one raw log against an event definition
pub fn decode_log(spec: &EventSpec, log: &RawLog) -> BindResult<DecodedEvent> {
    if !spec.anonymous && log.topics.first() != Some(&spec.topic) {
        return Err(BindError::Decode(format!(
            "Log topic does not match event {}",
            spec.signature
        )));
    }

    let decoded = spec
        .event()
        .decode_log_parts(log.topics.iter().copied(), &log.data, false)
        .map_err(|e| BindError::Decode(format!("{}: {}", spec.signature, e)))?;

    let mut indexed = decoded.indexed.into_iter();
    let mut body = decoded.body.into_iter();
    let fields = spec
        .fields
        .iter()
        .map(|field| {
            let value = if field.indexed {
                indexed.next()
            } else {
                body.next()
            };
            value.map(|v| (field.name.clone(), v)).ok_or_else(|| {
                BindError::Decode(format!(
                    "Missing value for field '{}' of {}",
                    field.name, spec.signature
                ))
            })
        })
        .collect::<BindResult<Vec<_>>>()?;

    Ok(DecodedEvent {
        name: spec.name.clone(),
        fields,
        raw: log.clone(),
    })
}

/// Build the log query for `spec`. `rules[i]` lists accepted values of the
/// i-th indexed field; an empty list accepts anything.
fn build_query(
    address: Address,
    spec: &EventSpec,
    rules: &[Vec<DynSolValue>],
) -> BindResult<LogQuery> {
    let indexed: Vec<_> = spec.indexed_fields().collect();
    if rules.len() > indexed.len() {
        return Err(BindError::Encode(format!(
            "Event {} has {} indexed fields, got {} topic rules",
            spec.signature,
            indexed.len(),
            rules.len()
        )));
    }

    let mut topics = Vec::with_capacity(rules.len() + 1);
    if !spec.anonymous {
        topics.push(vec![spec.topic]);
    }
    for (field, rule) in indexed.iter().zip(rules) {
        let words = rule
            .iter()
            .map(|value| {
                if !field.ty.matches(value) {
                    return Err(BindError::Encode(format!(
                        "Topic rule for '{}' does not match type {:?}",
                        field.name, field.ty
                    )));
                }
                utils::check_value_range(value)?;
                Ok(utils::topic_for_value(value))
            })
            .collect::<BindResult<Vec<_>>>()?;
        topics.push(words);
    }
    while topics.last().is_some_and(|t| t.is_empty()) {
        topics.pop();
    }

    Ok(LogQuery {
        address,
        topics,
        from_block: None,
        to_block: None,
    })
}

impl BoundContract {
    /// Decode a single log as `event`
    pub fn parse_log(&self, event: &str, log: &RawLog) -> BindResult<DecodedEvent> {
        decode_log(self.descriptor().event(event)?, log)
    }

    /// Retrieve historical `event` logs as an iterator
    pub async fn filter_logs(
        &self,
        event: &str,
        opts: &FilterOptions,
    ) -> BindResult<EventIterator<DecodedEvent>> {
        self.filter_logs_with(event, opts, &[]).await
    }

    /// Retrieve historical `event` logs matching indexed-field `rules`
    pub async fn filter_logs_with<T: FromEvent>(
        &self,
        event: &str,
        opts: &FilterOptions,
        rules: &[Vec<DynSolValue>],
    ) -> BindResult<EventIterator<T>> {
        let spec = self.descriptor().event(event)?.clone();
        let source = self.event_source()?;
        let cancel = opts.cancel.as_ref();

        let mut query = build_query(self.address(), &spec, rules)?;
        query.from_block = Some(opts.start);
        query.to_block = opts.end;

        let logs = with_cancel(cancel, source.filter_logs(query.clone())).await?;
        debug!(
            "Filtered {} {} logs from block {}",
            logs.len(),
            spec.name,
            opts.start
        );

        let live = if opts.follow {
            // Resume one past the newest block already covered
            let resume = opts
                .end
                .map(|end| end.saturating_add(1))
                .or_else(|| {
                    logs.iter()
                        .filter_map(|l| l.block_number)
                        .max()
                        .map(|b| b.saturating_add(1))
                })
                .unwrap_or(opts.start);
            query.from_block = Some(resume);
            query.to_block = None;

            let (logs, subscription) = with_cancel(cancel, source.watch_logs(query)).await?;
            debug!("Following {} logs from block {}", spec.name, resume);
            Some(LiveFeed { logs, subscription })
        } else {
            None
        };

        Ok(EventIterator::new(spec, logs, live))
    }

    /// Forward live `event` logs to `sink` until unsubscribed or the feed fails
    pub async fn watch_logs(
        &self,
        event: &str,
        opts: &WatchOptions,
        sink: mpsc::Sender<DecodedEvent>,
    ) -> BindResult<EventSubscription> {
        self.watch_logs_with(event, opts, &[], sink).await
    }

    /// Forward live `event` logs matching indexed-field `rules` to `sink`
    pub async fn watch_logs_with<T: FromEvent>(
        &self,
        event: &str,
        opts: &WatchOptions,
        rules: &[Vec<DynSolValue>],
        sink: mpsc::Sender<T>,
    ) -> BindResult<EventSubscription> {
        let spec = self.descriptor().event(event)?.clone();
        let source = self.event_source()?;

        let mut query = build_query(self.address(), &spec, rules)?;
        query.from_block = opts.start;

        let (logs, subscription) =
            with_cancel(opts.cancel.as_ref(), source.watch_logs(query)).await?;

        let quit = match &opts.cancel {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };
        info!("Watching {} events on {}", spec.name, self.address());
        let task = tokio::spawn(run_watcher(spec, logs, subscription, sink, quit.clone()));

        Ok(EventSubscription {
            quit,
            task: Some(task),
        })
    }
}

struct LiveFeed {
    logs: mpsc::Receiver<RawLog>,
    subscription: LogSubscription,
}

enum FeedSignal {
    Log(RawLog),
    /// Feed terminated, with its error if it failed
    Ended(Option<BindError>),
}

impl LiveFeed {
    async fn next_signal(&mut self) -> FeedSignal {
        let LiveFeed { logs, subscription } = self;
        tokio::select! {
            biased;
            log = logs.recv() => match log {
                Some(log) => FeedSignal::Log(log),
                None => FeedSignal::Ended(subscription.err().await),
            },
            err = subscription.err() => FeedSignal::Ended(err),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IteratorState {
    /// Historical logs remain buffered
    Open,
    /// Historical logs exhausted, waiting on the live feed
    Draining,
    /// Feed ended; remaining logs are drained without blocking
    Closed,
    Failed,
}

/// Forward-only cursor over historical logs, optionally followed by a live
/// feed.
///
/// `next()` takes `&mut self`, so a single consumer drives it. Errors are
/// reported through [`error`](Self::error) after `next()` returns false.
pub struct EventIterator<T: FromEvent = DecodedEvent> {
    spec: EventSpec,
    buffered: VecDeque<RawLog>,
    live: Option<LiveFeed>,
    state: IteratorState,
    pending_err: Option<BindError>,
    fail: Option<BindError>,
    event: Option<T>,
}

impl<T: FromEvent> EventIterator<T> {
    fn new(spec: EventSpec, logs: Vec<RawLog>, live: Option<LiveFeed>) -> Self {
        Self {
            spec,
            buffered: logs.into(),
            live,
            state: IteratorState::Open,
            pending_err: None,
            fail: None,
            event: None,
        }
    }

    /// Advance to the next event. Returns false once the logs are exhausted
    /// or an error occurred.
    pub async fn next(&mut self) -> bool {
        loop {
            match self.state {
                IteratorState::Failed => return false,
                IteratorState::Open => match self.buffered.pop_front() {
                    Some(log) => return self.deliver(log),
                    None => {
                        self.state = if self.live.is_some() {
                            IteratorState::Draining
                        } else {
                            IteratorState::Closed
                        };
                    }
                },
                IteratorState::Draining => {
                    let signal = match self.live.as_mut() {
                        Some(feed) => feed.next_signal().await,
                        None => FeedSignal::Ended(None),
                    };
                    match signal {
                        FeedSignal::Log(log) => return self.deliver(log),
                        FeedSignal::Ended(err) => {
                            if let Some(err) = &err {
                                warn!("{} log feed failed: {}", self.spec.name, err);
                            }
                            self.pending_err = err;
                            self.state = IteratorState::Closed;
                        }
                    }
                }
                IteratorState::Closed => {
                    let leftover = self.buffered.pop_front().or_else(|| {
                        self.live
                            .as_mut()
                            .and_then(|feed| feed.logs.try_recv().ok())
                    });
                    if let Some(log) = leftover {
                        return self.deliver(log);
                    }

                    if let Some(feed) = self.live.as_mut() {
                        feed.logs.close();
                    }
                    if let Some(err) = self.pending_err.take() {
                        self.fail = Some(err);
                        self.state = IteratorState::Failed;
                    }
                    return false;
                }
            }
        }
    }

    fn deliver(&mut self, log: RawLog) -> bool {
        match decode_log(&self.spec, &log).and_then(T::from_event) {
            Ok(event) => {
                self.event = Some(event);
                true
            }
            Err(err) => {
                warn!("Failed to decode {} log: {}", self.spec.name, err);
                self.fail = Some(err);
                self.state = IteratorState::Failed;
                false
            }
        }
    }

    /// The event produced by the last successful `next()`
    pub fn event(&self) -> Option<&T> {
        self.event.as_ref()
    }

    pub fn take_event(&mut self) -> Option<T> {
        self.event.take()
    }

    /// The retrieval or decoding error that stopped iteration
    pub fn error(&self) -> Option<&BindError> {
        self.fail.as_ref()
    }

    pub fn state(&self) -> IteratorState {
        self.state
    }

    /// Release the live feed, if any. Safe to call repeatedly.
    ///
    /// Later `next()` calls only return logs that were already received and
    /// never wait on the feed.
    pub fn close(&mut self) {
        if let Some(feed) = self.live.as_mut() {
            feed.subscription.unsubscribe();
            feed.logs.close();
        }
        if matches!(self.state, IteratorState::Open | IteratorState::Draining) {
            self.state = IteratorState::Closed;
        }
    }
}

/// Handle on a running event watcher
pub struct EventSubscription {
    quit: CancellationToken,
    task: Option<JoinHandle<BindResult<()>>>,
}

impl EventSubscription {
    /// Stop the watcher. No events reach the sink after it has observed the
    /// signal; the underlying feed is released exactly once.
    pub fn unsubscribe(&self) {
        self.quit.cancel();
    }

    /// Wait for the watcher to terminate and return its cause: `None` after
    /// cancellation or clean feed completion. Only the first call observes
    /// the outcome.
    pub async fn err(&mut self) -> Option<BindError> {
        let task = self.task.take()?;
        match task.await {
            Ok(result) => result.err(),
            Err(e) => Some(BindError::Subscription(format!(
                "Watcher task failed: {}",
                e
            ))),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |task| task.is_finished())
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.quit.cancel();
    }
}

async fn run_watcher<T: FromEvent>(
    spec: EventSpec,
    mut logs: mpsc::Receiver<RawLog>,
    mut subscription: LogSubscription,
    sink: mpsc::Sender<T>,
    quit: CancellationToken,
) -> BindResult<()> {
    let result = loop {
        let log = tokio::select! {
            biased;
            _ = quit.cancelled() => break Ok(()),
            log = logs.recv() => match log {
                Some(log) => log,
                None => break subscription.err().await.map_or(Ok(()), Err),
            },
            err = subscription.err() => break err.map_or(Ok(()), Err),
        };

        let event = match decode_log(&spec, &log).and_then(T::from_event) {
            Ok(event) => event,
            Err(err) => break Err(err),
        };

        // Blocks while the sink is full; the event is only handed over once
        // a slot is reserved
        let permit = tokio::select! {
            biased;
            _ = quit.cancelled() => break Ok(()),
            err = subscription.err() => break err.map_or(Ok(()), Err),
            permit = sink.reserve() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    debug!("{} sink dropped, stopping watcher", spec.name);
                    break Ok(());
                }
            },
        };
        permit.send(event);
    };

    subscription.unsubscribe();
    match &result {
        Ok(()) => info!("Stopped watching {} events", spec.name),
        Err(err) => warn!("{} watcher terminated: {}", spec.name, err),
    }
    result
}
