use alloy_primitives::{Address, TxHash, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The four fixed contracts a wallet session binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContractKind {
    ForestToken,
    CarbonCredit,
    Stablecoin,
    Marketplace,
}

impl ContractKind {
    /// Display symbol used in ledger entries.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::ForestToken => "CFT",
            Self::CarbonCredit => "CC",
            Self::Stablecoin => "CFRST",
            Self::Marketplace => "MKT",
        }
    }
}

impl fmt::Display for ContractKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ForestToken => "forest-token",
            Self::CarbonCredit => "carbon-credit",
            Self::Stablecoin => "stablecoin",
            Self::Marketplace => "marketplace",
        };
        f.write_str(name)
    }
}

/// Direction of a token transfer relative to the session account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Sent,
    Received,
}

/// A decoded `Transfer` event before it is folded into the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub transaction_hash: TxHash,
    pub block_number: u64,
    pub contract: ContractKind,
    pub direction: Direction,
    pub counterparty: Address,
    pub raw_amount: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Deposit,
    Withdrawal,
    Yield,
    Purchase,
    Sale,
}

impl EntryKind {
    /// Kind assigned to a completed transfer, fixed by (contract, direction).
    ///
    /// The sale/yield split on carbon credits is a presentation convention
    /// carried over from the UI labels; at the contract level both are plain
    /// `Transfer` events with no semantic distinction.
    #[must_use]
    pub const fn for_transfer(contract: ContractKind, direction: Direction) -> Self {
        match (contract, direction) {
            (ContractKind::Stablecoin, Direction::Sent) => Self::Withdrawal,
            (ContractKind::Stablecoin, Direction::Received) => Self::Deposit,
            (_, Direction::Sent) => Self::Sale,
            (_, Direction::Received) => Self::Yield,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Completed,
    Pending,
    Failed,
}

/// One reconciled, user-facing transaction history record.
///
/// Rebuilt in full on every reconciliation pass; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: TxHash,
    pub timestamp: DateTime<Utc>,
    pub kind: EntryKind,
    pub amount: f64,
    pub token: String,
    pub status: EntryStatus,
    pub description: String,
}

/// Inclusive span of chain blocks, `from <= to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
}

impl BlockRange {
    #[must_use]
    pub const fn new(from: u64, to: u64) -> Self {
        Self { from, to }
    }

    #[must_use]
    pub const fn width(self) -> u64 {
        self.to - self.from + 1
    }

    /// Intersection of two ranges, `None` when they do not overlap.
    #[must_use]
    pub fn intersect(self, other: Self) -> Option<Self> {
        let from = self.from.max(other.from);
        let to = self.to.min(other.to);
        (from <= to).then_some(Self { from, to })
    }
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.from, self.to)
    }
}

/// Read-only view of the connection state handed to consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSnapshot {
    pub account: Option<Address>,
    pub connected: bool,
    pub error: Option<String>,
}

/// Events pushed by the wallet provider session.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    AccountsChanged(Vec<Address>),
    ChainChanged(u64),
    /// Raw provider-level error notification; classified before it reaches
    /// the state machine.
    WalletError(String),
}

/// Notifications emitted by the connection state machine after a completed
/// transition.
#[derive(Debug, Clone)]
pub enum ConnectionUpdate {
    Connected(Address),
    Disconnected,
    BindingsRebuilt(Address),
    /// A user-rejected wallet action; forwarded as a notification only.
    ActionRejected(String),
}
