use crate::{
    config::HistoryConfig,
    error::{classify_rpc_error, Result, WalletError},
    types::ProviderEvent,
};
use alloy_primitives::{Address, Bytes, TxHash, U256};
use alloy_provider::{DynProvider, Provider, ProviderBuilder};
use alloy_rpc_types_eth::{Filter, Log, TransactionRequest};
use once_cell::sync::OnceCell;
use std::{sync::Arc, time::Duration};
use tokio::sync::broadcast;
use tracing::debug;
use url::Url;

/// Minimal view of a transaction used by the history reconciler.
#[derive(Debug, Clone)]
pub struct TxInfo {
    pub hash: TxHash,
    pub from: Address,
    pub to: Option<Address>,
    pub input: Bytes,
    pub value: U256,
    pub block_number: Option<u64>,
}

/// Minimal view of a transaction receipt.
#[derive(Debug, Clone, Copy)]
pub struct ReceiptInfo {
    pub status: bool,
    pub block_number: Option<u64>,
}

/// Uniform request/subscribe interface over a wallet-capable chain provider.
///
/// Production code talks to a node through [`RpcWalletProvider`]; tests
/// substitute a programmable fake. All chain I/O suspends the caller; nothing
/// here blocks the event loop.
#[allow(async_fn_in_trait)]
pub trait ChainProvider: Clone + Send + Sync + 'static {
    /// Accounts the wallet has already authorized. Never prompts.
    async fn authorized_accounts(&self) -> Result<Vec<Address>>;

    /// Requests account authorization; may prompt the user. Rejection is a
    /// normal outcome and surfaces as [`WalletError::ActionRejected`].
    async fn request_accounts(&self) -> Result<Vec<Address>>;

    /// Derives the signer for `account`, validating that the provider can
    /// send transactions on its behalf.
    async fn signer_account(&self, account: Address) -> Result<Address>;

    async fn block_number(&self) -> Result<u64>;

    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>>;

    /// Unix timestamp of the given block, `None` when the block is unknown.
    async fn block_timestamp(&self, number: u64) -> Result<Option<u64>>;

    async fn transaction_by_hash(&self, hash: TxHash) -> Result<Option<TxInfo>>;

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<ReceiptInfo>>;

    /// Polls for a receipt within the configured budget. `Ok(None)` means the
    /// transaction is still pending; a wallet-reported user rejection surfaces
    /// as [`WalletError::ActionRejected`].
    async fn wait_for_receipt(&self, hash: TxHash) -> Result<Option<ReceiptInfo>>;

    /// Read-only contract call.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes>;

    /// Submits a transaction through the wallet signer; returns the hash
    /// without waiting for inclusion.
    async fn send_transaction(&self, request: TransactionRequest) -> Result<TxHash>;

    /// Wallet session events (account/chain changes, wallet errors).
    fn subscribe_events(&self) -> broadcast::Receiver<ProviderEvent>;

    /// Live log subscription for the given filter. The returned handle
    /// deregisters on drop.
    fn subscribe_logs(&self, filter: Filter) -> Result<LogSubscription>;
}

/// Drop-based deregistration for a live subscription.
pub struct SubscriptionGuard {
    on_drop: Option<Box<dyn FnOnce() + Send>>,
}

impl SubscriptionGuard {
    #[must_use]
    pub fn new(on_drop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            on_drop: Some(Box::new(on_drop)),
        }
    }

    #[must_use]
    pub const fn noop() -> Self {
        Self { on_drop: None }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f();
        }
    }
}

/// A live log stream plus its deregistration guard.
pub struct LogSubscription {
    receiver: broadcast::Receiver<Log>,
    _guard: SubscriptionGuard,
}

impl LogSubscription {
    #[must_use]
    pub fn new(receiver: broadcast::Receiver<Log>, guard: SubscriptionGuard) -> Self {
        Self {
            receiver,
            _guard: guard,
        }
    }

    /// Next log, or `None` once the subscription is closed. Lagged windows
    /// are skipped; the reconciler rebuilds in full anyway.
    pub async fn recv(&mut self) -> Option<Log> {
        loop {
            match self.receiver.recv().await {
                Ok(log) => return Some(log),
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    debug!("log subscription lagged by {count} events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Locates a provider: an injected one wins, otherwise the SDK client is
/// constructed lazily, at most once, behind a single-assignment cell. Owned
/// and passed in explicitly so tests can substitute a fake.
pub struct ProviderSource<P> {
    injected: Option<P>,
    sdk: OnceCell<P>,
    factory: Option<Box<dyn Fn() -> Result<P> + Send + Sync>>,
}

impl<P: ChainProvider> ProviderSource<P> {
    /// Acquisition backed by an already-injected provider.
    #[must_use]
    pub fn injected(provider: P) -> Self {
        Self {
            injected: Some(provider),
            sdk: OnceCell::new(),
            factory: None,
        }
    }

    /// Acquisition backed by a lazily-constructed SDK client.
    #[must_use]
    pub fn with_factory(factory: impl Fn() -> Result<P> + Send + Sync + 'static) -> Self {
        Self {
            injected: None,
            sdk: OnceCell::new(),
            factory: Some(Box::new(factory)),
        }
    }

    /// No provider available at all.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            injected: None,
            sdk: OnceCell::new(),
            factory: None,
        }
    }

    /// Preference order: injected provider, then the (at most once
    /// constructed) SDK client.
    pub fn acquire(&self) -> Result<P> {
        if let Some(provider) = &self.injected {
            return Ok(provider.clone());
        }
        if let Some(factory) = &self.factory {
            return self.sdk.get_or_try_init(|| factory()).cloned();
        }
        Err(WalletError::NoProviderFound)
    }
}

/// Production provider over an alloy HTTP transport.
///
/// Wallet session events (`accountsChanged`, `chainChanged`, wallet errors)
/// originate in the embedding host and are fed in through [`Self::notify`];
/// log subscriptions are served by a poll loop since plain HTTP transports
/// have no push channel.
#[derive(Clone)]
pub struct RpcWalletProvider {
    // Type-erased but Sized, so generic `Provider` methods like
    // `raw_request` stay callable.
    inner: DynProvider,
    events: broadcast::Sender<ProviderEvent>,
    poll_interval: Duration,
    receipt_poll_attempts: u32,
}

impl RpcWalletProvider {
    #[must_use]
    pub fn connect_http(rpc_url: Url, history: &HistoryConfig) -> Self {
        let inner = ProviderBuilder::new().connect_http(rpc_url).erased();
        let (events, _) = broadcast::channel(64);
        Self {
            inner,
            events,
            poll_interval: Duration::from_secs(history.poll_interval_seconds.max(1)),
            receipt_poll_attempts: history.receipt_poll_attempts,
        }
    }

    /// Feeds a wallet session event into the subscription channel.
    pub fn notify(&self, event: ProviderEvent) {
        let _ = self.events.send(event);
    }
}

impl ChainProvider for RpcWalletProvider {
    async fn authorized_accounts(&self) -> Result<Vec<Address>> {
        self.inner.get_accounts().await.map_err(classify_rpc_error)
    }

    async fn request_accounts(&self) -> Result<Vec<Address>> {
        self.inner
            .raw_request("eth_requestAccounts".into(), ())
            .await
            .map_err(classify_rpc_error)
    }

    async fn signer_account(&self, account: Address) -> Result<Address> {
        let accounts = self.authorized_accounts().await?;
        if accounts.contains(&account) {
            Ok(account)
        } else {
            Err(WalletError::Binding(format!(
                "no signer available for {account}"
            )))
        }
    }

    async fn block_number(&self) -> Result<u64> {
        self.inner.get_block_number().await.map_err(classify_rpc_error)
    }

    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>> {
        self.inner.get_logs(filter).await.map_err(classify_rpc_error)
    }

    async fn block_timestamp(&self, number: u64) -> Result<Option<u64>> {
        let block = self
            .inner
            .get_block_by_number(number.into())
            .await
            .map_err(classify_rpc_error)?;
        Ok(block.map(|b| b.header.timestamp))
    }

    async fn transaction_by_hash(&self, hash: TxHash) -> Result<Option<TxInfo>> {
        use alloy_consensus::Transaction as _;

        let tx = self
            .inner
            .get_transaction_by_hash(hash)
            .await
            .map_err(classify_rpc_error)?;

        Ok(tx.map(|tx| TxInfo {
            hash,
            from: tx.inner.signer(),
            to: tx.inner.to(),
            input: tx.inner.input().clone(),
            value: tx.inner.value(),
            block_number: tx.block_number,
        }))
    }

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<ReceiptInfo>> {
        let receipt = self
            .inner
            .get_transaction_receipt(hash)
            .await
            .map_err(classify_rpc_error)?;

        Ok(receipt.map(|r| ReceiptInfo {
            status: r.status(),
            block_number: r.block_number,
        }))
    }

    async fn wait_for_receipt(&self, hash: TxHash) -> Result<Option<ReceiptInfo>> {
        for _ in 0..self.receipt_poll_attempts {
            if let Some(receipt) = self.transaction_receipt(hash).await? {
                return Ok(Some(receipt));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
        Ok(None)
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes> {
        let request = TransactionRequest {
            to: Some(to.into()),
            input: data.into(),
            ..Default::default()
        };
        self.inner.call(request).await.map_err(classify_rpc_error)
    }

    async fn send_transaction(&self, request: TransactionRequest) -> Result<TxHash> {
        let pending = self
            .inner
            .send_transaction(request)
            .await
            .map_err(|e| classify_rpc_error(e.into()))?;
        Ok(*pending.tx_hash())
    }

    fn subscribe_events(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }

    fn subscribe_logs(&self, filter: Filter) -> Result<LogSubscription> {
        let (sender, receiver) = broadcast::channel(256);
        let provider = self.inner.clone();
        let interval = self.poll_interval;

        let handle = tokio::spawn(async move {
            let mut next_from = match provider.get_block_number().await {
                Ok(head) => head + 1,
                Err(_) => 0,
            };
            loop {
                tokio::time::sleep(interval).await;
                let head = match provider.get_block_number().await {
                    Ok(head) => head,
                    Err(err) => {
                        debug!("log poll: head lookup failed: {err}");
                        continue;
                    }
                };
                if head < next_from {
                    continue;
                }
                let window = filter.clone().from_block(next_from).to_block(head);
                match provider.get_logs(&window).await {
                    Ok(logs) => {
                        for log in logs {
                            let _ = sender.send(log);
                        }
                        next_from = head + 1;
                    }
                    Err(err) => debug!("log poll: fetch failed: {err}"),
                }
            }
        });

        Ok(LogSubscription::new(
            receiver,
            SubscriptionGuard::new(move || handle.abort()),
        ))
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use crate::types::BlockRange;
    use alloy_rpc_types_eth::FilterBlockOption;
    use parking_lot::Mutex;
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    };

    /// Programmable in-memory provider for unit tests.
    #[derive(Debug, Clone)]
    pub struct FakeProvider {
        pub inner: Arc<FakeState>,
    }

    #[derive(Debug)]
    pub struct FakeState {
        pub authorized: Mutex<Vec<Address>>,
        pub reject_connect: AtomicBool,
        pub fail_signer: AtomicBool,
        pub prompts: AtomicUsize,
        pub latest_block: AtomicU64,
        pub block_times: Mutex<HashMap<u64, u64>>,
        pub logs: Mutex<Vec<Log>>,
        /// Widest block span the fake node will serve per request.
        pub max_range: Mutex<Option<u64>>,
        /// Whether range errors carry a node-suggested sub-range.
        pub suggest_ranges: AtomicBool,
        /// Every range passed to `get_logs`, for back-off assertions.
        pub requested_ranges: Mutex<Vec<BlockRange>>,
        /// When set, `get_logs` fails with a non-range RPC error after this
        /// many calls.
        pub fail_logs_after: Mutex<Option<usize>>,
        /// When set, every transaction lookup fails with an RPC error.
        pub fail_tx_lookup: AtomicBool,
        pub txs: Mutex<HashMap<TxHash, TxInfo>>,
        pub receipts: Mutex<HashMap<TxHash, ReceiptInfo>>,
        /// Hashes whose receipt wait reports a user rejection.
        pub rejected_txs: Mutex<Vec<TxHash>>,
        pub balances: Mutex<HashMap<(Address, Address), U256>>,
        pub sent: Mutex<Vec<TransactionRequest>>,
        pub events: broadcast::Sender<ProviderEvent>,
        pub log_feed: broadcast::Sender<Log>,
        pub live_log_subs: AtomicUsize,
    }

    impl Default for FakeProvider {
        fn default() -> Self {
            let (events, _) = broadcast::channel(64);
            let (log_feed, _) = broadcast::channel(64);
            Self {
                inner: Arc::new(FakeState {
                    authorized: Mutex::new(Vec::new()),
                    reject_connect: AtomicBool::new(false),
                    fail_signer: AtomicBool::new(false),
                    prompts: AtomicUsize::new(0),
                    latest_block: AtomicU64::new(0),
                    block_times: Mutex::new(HashMap::new()),
                    logs: Mutex::new(Vec::new()),
                    max_range: Mutex::new(None),
                    suggest_ranges: AtomicBool::new(false),
                    requested_ranges: Mutex::new(Vec::new()),
                    fail_logs_after: Mutex::new(None),
                    fail_tx_lookup: AtomicBool::new(false),
                    txs: Mutex::new(HashMap::new()),
                    receipts: Mutex::new(HashMap::new()),
                    rejected_txs: Mutex::new(Vec::new()),
                    balances: Mutex::new(HashMap::new()),
                    sent: Mutex::new(Vec::new()),
                    events,
                    log_feed,
                    live_log_subs: AtomicUsize::new(0),
                }),
            }
        }
    }

    impl FakeProvider {
        pub fn with_account(account: Address) -> Self {
            let fake = Self::default();
            fake.inner.authorized.lock().push(account);
            fake
        }

        pub fn set_latest_block(&self, number: u64) {
            self.inner.latest_block.store(number, Ordering::SeqCst);
        }

        pub fn set_block_time(&self, number: u64, timestamp: u64) {
            self.inner.block_times.lock().insert(number, timestamp);
        }

        pub fn push_log(&self, log: Log) {
            self.inner.logs.lock().push(log);
        }

        pub fn push_transfer_log(
            &self,
            contract: Address,
            from: Address,
            to: Address,
            value: U256,
            block_number: u64,
            hash: TxHash,
        ) {
            use alloy_sol_types::SolEvent;
            let event = crate::contracts::ICarbonToken::Transfer { from, to, value };
            let log = Log {
                inner: alloy_primitives::Log {
                    address: contract,
                    data: event.encode_log_data(),
                },
                block_hash: None,
                block_number: Some(block_number),
                block_timestamp: None,
                transaction_hash: Some(hash),
                transaction_index: None,
                log_index: None,
                removed: false,
            };
            self.push_log(log);
        }

        pub fn insert_tx(&self, tx: TxInfo) {
            self.inner.txs.lock().insert(tx.hash, tx);
        }

        pub fn insert_receipt(&self, hash: TxHash, receipt: ReceiptInfo) {
            self.inner.receipts.lock().insert(hash, receipt);
        }

        pub fn mark_rejected(&self, hash: TxHash) {
            self.inner.rejected_txs.lock().push(hash);
        }

        pub fn set_max_range(&self, cap: u64, suggest: bool) {
            *self.inner.max_range.lock() = Some(cap);
            self.inner.suggest_ranges.store(suggest, Ordering::SeqCst);
        }

        pub fn emit_event(&self, event: ProviderEvent) {
            let _ = self.inner.events.send(event);
        }

        pub fn emit_log(&self, log: Log) {
            let _ = self.inner.log_feed.send(log);
        }

        pub fn live_log_subs(&self) -> usize {
            self.inner.live_log_subs.load(Ordering::SeqCst)
        }

        fn filter_range(filter: &Filter) -> Option<BlockRange> {
            match filter.block_option {
                FilterBlockOption::Range {
                    from_block,
                    to_block,
                } => {
                    let from = from_block.and_then(|b| b.as_number())?;
                    let to = to_block.and_then(|b| b.as_number())?;
                    Some(BlockRange::new(from, to))
                }
                FilterBlockOption::AtBlockHash(_) => None,
            }
        }

        fn log_matches(filter: &Filter, log: &Log) -> bool {
            if !filter.address.is_empty() && !filter.address.matches(&log.inner.address) {
                return false;
            }
            let topics = log.inner.data.topics();
            for (i, set) in filter.topics.iter().enumerate() {
                if set.is_empty() {
                    continue;
                }
                match topics.get(i) {
                    Some(topic) if set.matches(topic) => {}
                    _ => return false,
                }
            }
            true
        }
    }

    impl ChainProvider for FakeProvider {
        async fn authorized_accounts(&self) -> Result<Vec<Address>> {
            Ok(self.inner.authorized.lock().clone())
        }

        async fn request_accounts(&self) -> Result<Vec<Address>> {
            self.inner.prompts.fetch_add(1, Ordering::SeqCst);
            if self.inner.reject_connect.load(Ordering::SeqCst) {
                return Err(WalletError::ActionRejected(
                    "User denied account authorization".to_string(),
                ));
            }
            Ok(self.inner.authorized.lock().clone())
        }

        async fn signer_account(&self, account: Address) -> Result<Address> {
            if self.inner.fail_signer.load(Ordering::SeqCst) {
                return Err(WalletError::Binding(format!(
                    "no signer available for {account}"
                )));
            }
            Ok(account)
        }

        async fn block_number(&self) -> Result<u64> {
            Ok(self.inner.latest_block.load(Ordering::SeqCst))
        }

        async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>> {
            let range = Self::filter_range(filter);

            if let Some(limit) = *self.inner.fail_logs_after.lock() {
                if self.inner.requested_ranges.lock().len() >= limit {
                    return Err(WalletError::Rpc(alloy_json_rpc::RpcError::ErrorResp(
                        alloy_json_rpc::ErrorPayload {
                            code: -32603,
                            message: "node unavailable".to_string().into(),
                            data: None,
                        },
                    )));
                }
            }

            if let Some(range) = range {
                self.inner.requested_ranges.lock().push(range);
                if let Some(cap) = *self.inner.max_range.lock() {
                    if range.width() > cap {
                        let suggested = self
                            .inner
                            .suggest_ranges
                            .load(Ordering::SeqCst)
                            .then(|| BlockRange::new(range.from, range.from + cap - 1));
                        return Err(WalletError::RangeTooLarge { suggested });
                    }
                }
            }

            let logs = self.inner.logs.lock();
            Ok(logs
                .iter()
                .filter(|log| {
                    let in_range = match (range, log.block_number) {
                        (Some(range), Some(number)) => number >= range.from && number <= range.to,
                        _ => true,
                    };
                    in_range && Self::log_matches(filter, log)
                })
                .cloned()
                .collect())
        }

        async fn block_timestamp(&self, number: u64) -> Result<Option<u64>> {
            Ok(self.inner.block_times.lock().get(&number).copied())
        }

        async fn transaction_by_hash(&self, hash: TxHash) -> Result<Option<TxInfo>> {
            if self.inner.fail_tx_lookup.load(Ordering::SeqCst) {
                return Err(WalletError::Rpc(alloy_json_rpc::RpcError::ErrorResp(
                    alloy_json_rpc::ErrorPayload {
                        code: -32603,
                        message: "node unavailable".to_string().into(),
                        data: None,
                    },
                )));
            }
            Ok(self.inner.txs.lock().get(&hash).cloned())
        }

        async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<ReceiptInfo>> {
            Ok(self.inner.receipts.lock().get(&hash).copied())
        }

        async fn wait_for_receipt(&self, hash: TxHash) -> Result<Option<ReceiptInfo>> {
            if self.inner.rejected_txs.lock().contains(&hash) {
                return Err(WalletError::ActionRejected(
                    "Transaction rejected in wallet".to_string(),
                ));
            }
            self.transaction_receipt(hash).await
        }

        async fn call(&self, to: Address, data: Bytes) -> Result<Bytes> {
            use alloy_sol_types::SolCall;
            if let Ok(call) = crate::contracts::ICarbonToken::balanceOfCall::abi_decode(&data) {
                let balance = self
                    .inner
                    .balances
                    .lock()
                    .get(&(to, call.owner))
                    .copied()
                    .unwrap_or(U256::ZERO);
                return Ok(balance.to_be_bytes::<32>().to_vec().into());
            }
            Ok(Bytes::new())
        }

        async fn send_transaction(&self, request: TransactionRequest) -> Result<TxHash> {
            let mut sent = self.inner.sent.lock();
            sent.push(request);
            let mut raw = [0u8; 32];
            raw[24..].copy_from_slice(&(sent.len() as u64).to_be_bytes());
            Ok(TxHash::from(raw))
        }

        fn subscribe_events(&self) -> broadcast::Receiver<ProviderEvent> {
            self.inner.events.subscribe()
        }

        fn subscribe_logs(&self, _filter: Filter) -> Result<LogSubscription> {
            self.inner.live_log_subs.fetch_add(1, Ordering::SeqCst);
            let state = self.inner.clone();
            Ok(LogSubscription::new(
                self.inner.log_feed.subscribe(),
                SubscriptionGuard::new(move || {
                    state.live_log_subs.fetch_sub(1, Ordering::SeqCst);
                }),
            ))
        }
    }
}
