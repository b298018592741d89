use crate::{
    bindings::{build_bindings, ContractBindings},
    config::ContractConfig,
    error::{Result, WalletError},
    provider::{ChainProvider, ProviderSource},
    types::{ConnectionSnapshot, ConnectionUpdate, ProviderEvent},
};
use alloy_primitives::Address;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{info, warn};

struct ConnectionState<P> {
    provider: Option<P>,
    account: Option<Address>,
    bindings: Option<ContractBindings<P>>,
    error: Option<String>,
}

impl<P> ConnectionState<P> {
    const fn disconnected() -> Self {
        Self {
            provider: None,
            account: None,
            bindings: None,
            error: None,
        }
    }
}

/// Wallet connection state machine.
///
/// Owns the session tuple (provider, account, bindings, error) and replaces it
/// atomically on every transition, so observers never see a half-updated
/// session. Locks are released before any chain I/O; async work operates on
/// clones and commits its outcome in one write at the end.
pub struct ConnectionManager<P> {
    source: ProviderSource<P>,
    contracts: ContractConfig,
    state: RwLock<ConnectionState<P>>,
    updates: broadcast::Sender<ConnectionUpdate>,
}

impl<P: ChainProvider> ConnectionManager<P> {
    #[must_use]
    pub fn new(source: ProviderSource<P>, contracts: ContractConfig) -> Self {
        let (updates, _) = broadcast::channel(64);
        Self {
            source,
            contracts,
            state: RwLock::new(ConnectionState::disconnected()),
            updates,
        }
    }

    /// Explicit, user-initiated connection. May prompt the wallet; a declined
    /// prompt lands as [`WalletError::ConnectionRejected`] with the session
    /// left disconnected.
    pub async fn connect(&self) -> Result<Address> {
        let provider = match self.source.acquire() {
            Ok(provider) => provider,
            Err(err) => {
                self.state.write().error = Some(err.to_string());
                return Err(err);
            }
        };

        let accounts = match provider.request_accounts().await {
            Ok(accounts) => accounts,
            Err(err) => {
                let err = if err.is_user_rejection() {
                    WalletError::ConnectionRejected
                } else {
                    err
                };
                self.state.write().error = Some(err.to_string());
                return Err(err);
            }
        };
        let Some(account) = accounts.first().copied() else {
            let err = WalletError::ConnectionRejected;
            self.state.write().error = Some(err.to_string());
            return Err(err);
        };

        match build_bindings(provider.clone(), account, &self.contracts).await {
            Ok(bindings) => {
                *self.state.write() = ConnectionState {
                    provider: Some(provider),
                    account: Some(account),
                    bindings: Some(bindings),
                    error: None,
                };
                info!("wallet connected as {account}");
                let _ = self.updates.send(ConnectionUpdate::Connected(account));
                Ok(account)
            }
            Err(err) => {
                // Account authorization succeeded, so keep the session half
                // that is valid; only the bindings are withheld.
                *self.state.write() = ConnectionState {
                    provider: Some(provider),
                    account: Some(account),
                    bindings: None,
                    error: Some("Failed to initialize contracts".to_string()),
                };
                warn!("contract binding failed for {account}: {err}");
                Err(err)
            }
        }
    }

    /// Silent session restore at startup. Adopts an already-authorized account
    /// without prompting; `Ok(None)` when there is nothing to restore.
    pub async fn restore(&self) -> Result<Option<Address>> {
        let provider = match self.source.acquire() {
            Ok(provider) => provider,
            Err(err) => {
                self.state.write().error = Some(err.to_string());
                return Ok(None);
            }
        };

        let accounts = provider.authorized_accounts().await?;
        let Some(account) = accounts.first().copied() else {
            return Ok(None);
        };

        match build_bindings(provider.clone(), account, &self.contracts).await {
            Ok(bindings) => {
                *self.state.write() = ConnectionState {
                    provider: Some(provider),
                    account: Some(account),
                    bindings: Some(bindings),
                    error: None,
                };
                info!("restored wallet session for {account}");
                let _ = self.updates.send(ConnectionUpdate::Connected(account));
                Ok(Some(account))
            }
            Err(err) => {
                warn!("could not restore session for {account}: {err}");
                self.state.write().error = Some("Failed to initialize contracts".to_string());
                Ok(None)
            }
        }
    }

    /// Local disconnect; authorization in the wallet itself is untouched.
    /// Idempotent.
    pub fn disconnect(&self) {
        let was_connected = {
            let mut state = self.state.write();
            let had_account = state.account.is_some();
            *state = ConnectionState::disconnected();
            had_account
        };
        if was_connected {
            info!("wallet disconnected");
            let _ = self.updates.send(ConnectionUpdate::Disconnected);
        }
    }

    /// Applies a provider session event to the state machine.
    pub async fn handle_event(&self, event: ProviderEvent) {
        match event {
            ProviderEvent::AccountsChanged(accounts) => match accounts.first().copied() {
                None => {
                    info!("wallet revoked account authorization");
                    self.disconnect();
                }
                Some(account) => self.adopt_account(account).await,
            },
            ProviderEvent::ChainChanged(chain_id) => {
                info!("wallet switched to chain {chain_id}");
                let account = self.state.read().account;
                if let Some(account) = account {
                    // The old provider handle may belong to the previous
                    // chain; re-acquire before rebinding.
                    self.adopt_account(account).await;
                }
            }
            ProviderEvent::WalletError(message) => {
                if crate::error::is_rejection_message(&message) {
                    // A declined prompt is not a session fault; notify and
                    // leave the connection alone.
                    let _ = self.updates.send(ConnectionUpdate::ActionRejected(message));
                } else {
                    warn!("wallet session error: {message}");
                    // Reset first: the disconnect wipes the whole state, so
                    // the error must be recorded after it to stay visible.
                    self.disconnect();
                    self.state.write().error = Some(message);
                }
            }
        }
    }

    /// Switches the session to `account`, rebuilding the bindings wholesale.
    async fn adopt_account(&self, account: Address) {
        let provider = match self.source.acquire() {
            Ok(provider) => provider,
            Err(err) => {
                self.state.write().error = Some(err.to_string());
                return;
            }
        };

        let previous = self.state.read().account;
        match build_bindings(provider.clone(), account, &self.contracts).await {
            Ok(bindings) => {
                *self.state.write() = ConnectionState {
                    provider: Some(provider),
                    account: Some(account),
                    bindings: Some(bindings),
                    error: None,
                };
                if previous == Some(account) {
                    let _ = self.updates.send(ConnectionUpdate::BindingsRebuilt(account));
                } else {
                    info!("wallet session switched to {account}");
                    let _ = self.updates.send(ConnectionUpdate::Connected(account));
                }
            }
            Err(err) => {
                warn!("contract binding failed for {account}: {err}");
                *self.state.write() = ConnectionState {
                    provider: Some(provider),
                    account: Some(account),
                    bindings: None,
                    error: Some("Failed to initialize contracts".to_string()),
                };
            }
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> ConnectionSnapshot {
        let state = self.state.read();
        ConnectionSnapshot {
            account: state.account,
            connected: state.account.is_some() && state.bindings.is_some(),
            error: state.error.clone(),
        }
    }

    /// Current session handles when fully connected.
    #[must_use]
    pub fn session(&self) -> Option<(P, ContractBindings<P>)> {
        let state = self.state.read();
        match (&state.provider, &state.bindings) {
            (Some(provider), Some(bindings)) => Some((provider.clone(), bindings.clone())),
            _ => None,
        }
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<ConnectionUpdate> {
        self.updates.subscribe()
    }
}
