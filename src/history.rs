use crate::{
    bindings::ContractBindings,
    config::{ContractConfig, HistoryConfig},
    connection::ConnectionManager,
    contracts::{decode_failed_call, ICarbonToken, TOKEN_DECIMALS},
    error::Result,
    provider::ChainProvider,
    scan::fetch_logs_in_range,
    types::{
        BlockRange, ContractKind, Direction, EntryKind, EntryStatus, EventRecord, LedgerEntry,
    },
};
use alloy_primitives::{utils::format_units, TxHash, U256};
use alloy_rpc_types_eth::{Filter, Log};
use alloy_sol_types::SolEvent;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use tracing::{debug, warn};

/// Tuning for one reconciliation pass.
pub struct HistoryOptions {
    pub lookback_blocks: u64,
    pub initial_step: u64,
    /// Kind assigned to a failed entry whose calldata could not be decoded.
    pub default_failed_kind: EntryKind,
    /// Kind per decoded method name for failed entries.
    pub failed_kinds: HashMap<String, EntryKind>,
}

impl HistoryOptions {
    #[must_use]
    pub fn from_config(history: &HistoryConfig) -> Self {
        Self {
            lookback_blocks: history.lookback_blocks,
            initial_step: history.initial_step,
            default_failed_kind: EntryKind::Purchase,
            failed_kinds: default_failed_kinds(),
        }
    }

    fn kind_for(&self, method: Option<&str>) -> EntryKind {
        method
            .and_then(|m| self.failed_kinds.get(m).copied())
            .unwrap_or(self.default_failed_kind)
    }
}

impl Default for HistoryOptions {
    fn default() -> Self {
        Self::from_config(&HistoryConfig::default())
    }
}

fn default_failed_kinds() -> HashMap<String, EntryKind> {
    HashMap::from([
        ("transfer".to_string(), EntryKind::Withdrawal),
        ("buyToken".to_string(), EntryKind::Purchase),
        ("listToken".to_string(), EntryKind::Sale),
        ("mintParcel".to_string(), EntryKind::Yield),
    ])
}

/// Rebuilds the full transaction ledger for the bound account.
///
/// Four `Transfer` queries (stablecoin and carbon credit, sent and received)
/// produce the completed entries; a separate raw log scan over the known
/// contracts surfaces the account's mined-but-reverted transactions, and
/// `tracked` hashes cover sends the node has no record of yet, including
/// wallet-rejected ones. The ledger is rebuilt from scratch on every call.
pub async fn reconcile<P: ChainProvider>(
    provider: &P,
    bindings: &ContractBindings<P>,
    tracked: &[TxHash],
    options: &HistoryOptions,
) -> Result<Vec<LedgerEntry>> {
    let latest = provider.block_number().await?;
    let window = BlockRange::new(latest.saturating_sub(options.lookback_blocks), latest);
    let account = bindings.account();
    let contracts = contract_addresses(bindings);

    let mut clock = BlockClock::default();
    let mut entries = Vec::new();
    let mut seen = HashSet::new();

    // Completed transfers, four (contract, direction) queries in parallel.
    let queries = [
        (&bindings.stablecoin, Direction::Sent),
        (&bindings.stablecoin, Direction::Received),
        (&bindings.carbon_credit, Direction::Sent),
        (&bindings.carbon_credit, Direction::Received),
    ];
    let scans = futures::future::join_all(queries.into_iter().map(|(handle, direction)| {
        let filter = handle.transfer_filter(direction, window);
        let kind = handle.kind();
        async move {
            let scan = fetch_logs_in_range(provider, &filter, window, options.initial_step).await;
            (kind, direction, scan)
        }
    }))
    .await;

    for (kind, direction, scan) in scans {
        if !scan.is_complete() {
            warn!(
                "{kind} {direction:?} query skipped {} sub-ranges",
                scan.skipped.len()
            );
        }
        for log in &scan.logs {
            let Some(record) = decode_transfer(log, kind, direction) else {
                continue;
            };
            if !seen.insert((record.transaction_hash, record.contract, record.direction)) {
                continue;
            }
            let timestamp = clock.resolve(provider, record.block_number).await;
            entries.push(completed_entry(&record, timestamp));
        }
    }

    // Mined-but-reverted transactions the account sent to any known contract.
    let raw_filter = Filter::new().address(vec![
        contracts.stablecoin,
        contracts.carbon_credit,
        contracts.forest_token,
        contracts.marketplace,
    ]);
    let raw_scan = fetch_logs_in_range(provider, &raw_filter, window, options.initial_step).await;
    let mut failed_checked = HashSet::new();
    for hash in raw_scan.logs.iter().filter_map(|l| l.transaction_hash) {
        if !failed_checked.insert(hash) {
            continue;
        }
        let tx = match provider.transaction_by_hash(hash).await {
            Ok(Some(tx)) => tx,
            Ok(None) => continue,
            Err(err) => {
                warn!("skipping {hash}: transaction lookup failed: {err}");
                continue;
            }
        };
        if tx.from != account {
            continue;
        }
        let receipt = match provider.transaction_receipt(hash).await {
            Ok(Some(receipt)) => receipt,
            Ok(None) => continue,
            Err(err) => {
                warn!("skipping {hash}: receipt lookup failed: {err}");
                continue;
            }
        };
        if receipt.status {
            continue;
        }
        let method = decode_failed_call(tx.to, &tx.input, &contracts);
        let timestamp = match receipt.block_number {
            Some(number) => clock.resolve(provider, number).await,
            None => Utc::now(),
        };
        entries.push(failed_entry(hash, timestamp, method, options));
    }

    // Sends the window scan cannot see: still pending, or rejected in the
    // wallet before ever reaching the node.
    for &hash in tracked {
        if !failed_checked.insert(hash) {
            continue;
        }
        let method = match provider.transaction_by_hash(hash).await {
            Ok(Some(tx)) => decode_failed_call(tx.to, &tx.input, &contracts),
            Ok(None) => None,
            Err(err) => {
                warn!("tracked {hash}: transaction lookup failed: {err}");
                None
            }
        };
        match provider.wait_for_receipt(hash).await {
            Ok(Some(receipt)) if receipt.status => {}
            Ok(Some(receipt)) => {
                let timestamp = match receipt.block_number {
                    Some(number) => clock.resolve(provider, number).await,
                    None => Utc::now(),
                };
                entries.push(failed_entry(hash, timestamp, method, options));
            }
            Ok(None) => {
                debug!("transaction {hash} still pending");
                entries.push(LedgerEntry {
                    id: hash,
                    timestamp: Utc::now(),
                    kind: options.kind_for(method),
                    amount: 0.0,
                    token: "N/A".to_string(),
                    status: EntryStatus::Pending,
                    description: "Pending Transaction".to_string(),
                });
            }
            Err(err) if err.is_user_rejection() => {
                entries.push(LedgerEntry {
                    id: hash,
                    timestamp: Utc::now(),
                    kind: options.kind_for(method),
                    amount: 0.0,
                    token: "N/A".to_string(),
                    status: EntryStatus::Failed,
                    description: "Transaction Rejected by User".to_string(),
                });
            }
            Err(err) => {
                warn!("tracked {hash}: receipt wait failed: {err}");
            }
        }
    }

    entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
    Ok(entries)
}

fn contract_addresses<P: ChainProvider>(bindings: &ContractBindings<P>) -> ContractConfig {
    ContractConfig {
        forest_token: bindings.forest_token.address(),
        carbon_credit: bindings.carbon_credit.address(),
        stablecoin: bindings.stablecoin.address(),
        marketplace: bindings.marketplace.address(),
    }
}

fn decode_transfer(log: &Log, contract: ContractKind, direction: Direction) -> Option<EventRecord> {
    let decoded = match ICarbonToken::Transfer::decode_log(&log.inner) {
        Ok(decoded) => decoded,
        Err(err) => {
            warn!("skipping undecodable transfer log: {err}");
            return None;
        }
    };
    Some(EventRecord {
        transaction_hash: log.transaction_hash?,
        block_number: log.block_number?,
        contract,
        direction,
        counterparty: match direction {
            Direction::Sent => decoded.data.to,
            Direction::Received => decoded.data.from,
        },
        raw_amount: decoded.data.value,
    })
}

fn completed_entry(record: &EventRecord, timestamp: DateTime<Utc>) -> LedgerEntry {
    let description = match (record.contract, record.direction) {
        (ContractKind::CarbonCredit, Direction::Sent) => {
            format!("Sold to {}", record.counterparty)
        }
        (ContractKind::CarbonCredit, Direction::Received) => {
            format!("Carbon credit yield from {}", record.counterparty)
        }
        (_, Direction::Sent) => format!("Sent to {}", record.counterparty),
        (_, Direction::Received) => format!("Received from {}", record.counterparty),
    };
    LedgerEntry {
        id: record.transaction_hash,
        timestamp,
        kind: EntryKind::for_transfer(record.contract, record.direction),
        amount: scale_amount(record.raw_amount),
        token: record.contract.symbol().to_string(),
        status: EntryStatus::Completed,
        description,
    }
}

fn failed_entry(
    hash: TxHash,
    timestamp: DateTime<Utc>,
    method: Option<&str>,
    options: &HistoryOptions,
) -> LedgerEntry {
    let description = match method {
        Some(method) => format!("Failed to {method}"),
        None => "Failed Transaction".to_string(),
    };
    LedgerEntry {
        id: hash,
        timestamp,
        kind: options.kind_for(method),
        amount: 0.0,
        token: "N/A".to_string(),
        status: EntryStatus::Failed,
        description,
    }
}

fn scale_amount(raw: U256) -> f64 {
    format_units(raw, TOKEN_DECIMALS)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_default()
}

/// Per-pass cache of block timestamps. Unknown blocks fall back to the time
/// of the fetch rather than failing the whole pass.
#[derive(Default)]
struct BlockClock {
    cache: HashMap<u64, DateTime<Utc>>,
}

impl BlockClock {
    async fn resolve<P: ChainProvider>(&mut self, provider: &P, number: u64) -> DateTime<Utc> {
        if let Some(cached) = self.cache.get(&number) {
            return *cached;
        }
        let timestamp = match provider.block_timestamp(number).await {
            Ok(Some(seconds)) => i64::try_from(seconds)
                .ok()
                .and_then(|s| DateTime::from_timestamp(s, 0))
                .unwrap_or_else(Utc::now),
            Ok(None) => Utc::now(),
            Err(err) => {
                warn!("block {number} timestamp lookup failed: {err}");
                Utc::now()
            }
        };
        self.cache.insert(number, timestamp);
        timestamp
    }
}

/// Session-scoped ledger view: resolves the current session from the
/// connection manager, tracks locally submitted transactions, and rebuilds
/// the ledger on demand.
pub struct TransactionHistory<P> {
    connection: Arc<ConnectionManager<P>>,
    options: HistoryOptions,
    tracked: Mutex<Vec<TxHash>>,
}

impl<P: ChainProvider> TransactionHistory<P> {
    #[must_use]
    pub fn new(connection: Arc<ConnectionManager<P>>, options: HistoryOptions) -> Self {
        Self {
            connection,
            options,
            tracked: Mutex::new(Vec::new()),
        }
    }

    /// Records a locally submitted transaction so its rejection or failure
    /// shows up in the ledger before the chain knows about it.
    pub fn track(&self, hash: TxHash) {
        self.tracked.lock().push(hash);
    }

    /// Full rebuild. An absent session yields an empty ledger, which is the
    /// normal disconnected presentation, not an error.
    pub async fn refresh(&self) -> Result<Vec<LedgerEntry>> {
        let Some((provider, bindings)) = self.connection.session() else {
            return Ok(Vec::new());
        };
        let tracked = self.tracked.lock().clone();
        reconcile(&provider, &bindings, &tracked, &self.options).await
    }
}
