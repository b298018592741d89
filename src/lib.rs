#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::wildcard_imports
)]

pub mod bindings;
pub mod config;
pub mod connection;
pub mod contracts;
pub mod error;
pub mod event_manager;
pub mod history;
pub mod provider;
pub mod scan;
pub mod types;

pub use bindings::{
    build_bindings, ContractBindings, ForestTokenHandle, MarketplaceHandle, TokenHandle,
};
pub use config::{Config, ContractConfig, HistoryConfig, NetworkConfig};
pub use connection::ConnectionManager;
pub use error::{classify_rpc_error, is_rejection_message, Result, WalletError};
pub use event_manager::{EventManager, WalletEventHandler};
pub use history::{reconcile, HistoryOptions, TransactionHistory};
pub use provider::{
    ChainProvider, LogSubscription, ProviderSource, ReceiptInfo, RpcWalletProvider,
    SubscriptionGuard, TxInfo,
};
pub use scan::{fetch_logs_in_range, LogScan};
pub use types::*;
