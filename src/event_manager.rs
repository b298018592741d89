use crate::{
    connection::ConnectionManager,
    history::TransactionHistory,
    provider::{ChainProvider, LogSubscription},
    types::{ConnectionSnapshot, ConnectionUpdate, LedgerEntry, ProviderEvent},
};
use alloy_rpc_types_eth::Log;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

/// Consumer-side sink for wallet session output: state snapshots, rebuilt
/// ledgers, and rejected-action notices.
pub trait WalletEventHandler: Send + 'static {
    fn on_connection_changed(&self, snapshot: &ConnectionSnapshot);
    fn on_ledger_rebuilt(&self, ledger: &[LedgerEntry]);
    fn on_action_rejected(&self, message: &str);
}

/// Drives the wallet session: forwards provider events into the connection
/// state machine, keeps live `Transfer` subscriptions in step with the
/// session, and rebuilds the ledger in full whenever anything relevant moves.
///
/// Subscriptions are torn down (dropped, which deregisters them) and recreated
/// wholesale on every session transition; nothing is patched in place.
pub struct EventManager<P, H> {
    connection: Arc<ConnectionManager<P>>,
    history: Arc<TransactionHistory<P>>,
    handler: H,
    // Subscribed at construction so transitions fired before the loop is
    // polled are not lost.
    updates: broadcast::Receiver<ConnectionUpdate>,
}

impl<P: ChainProvider, H: WalletEventHandler> EventManager<P, H> {
    #[must_use]
    pub fn new(
        connection: Arc<ConnectionManager<P>>,
        history: Arc<TransactionHistory<P>>,
        handler: H,
    ) -> Self {
        let updates = connection.subscribe_updates();
        Self {
            connection,
            history,
            handler,
            updates,
        }
    }

    /// Event loop; runs until the connection manager is dropped.
    pub async fn run(mut self) {
        let mut provider_events: Option<broadcast::Receiver<ProviderEvent>> = None;
        let mut log_subs: Vec<LogSubscription> = Vec::new();

        // Pick up a session restored before the loop started.
        self.resync(&mut provider_events, &mut log_subs);
        self.rebuild_ledger().await;

        loop {
            tokio::select! {
                update = self.updates.recv() => match update {
                    Ok(update) => {
                        self.apply_update(update, &mut provider_events, &mut log_subs)
                            .await;
                    }
                    Err(RecvError::Lagged(count)) => {
                        // Missed transitions; resync against current state.
                        warn!("connection updates lagged by {count}, resyncing");
                        self.resync(&mut provider_events, &mut log_subs);
                        self.rebuild_ledger().await;
                    }
                    Err(RecvError::Closed) => break,
                },
                event = next_provider_event(&mut provider_events) => {
                    self.connection.handle_event(event).await;
                }
                log = next_transfer(&mut log_subs) => {
                    debug!(
                        "live transfer on {} in tx {:?}",
                        log.inner.address, log.transaction_hash
                    );
                    self.rebuild_ledger().await;
                }
            }
        }
        info!("wallet event loop stopped");
    }

    async fn apply_update(
        &self,
        update: ConnectionUpdate,
        provider_events: &mut Option<broadcast::Receiver<ProviderEvent>>,
        log_subs: &mut Vec<LogSubscription>,
    ) {
        match update {
            ConnectionUpdate::Connected(_) | ConnectionUpdate::BindingsRebuilt(_) => {
                self.resync(provider_events, log_subs);
                self.handler.on_connection_changed(&self.connection.snapshot());
                self.rebuild_ledger().await;
            }
            ConnectionUpdate::Disconnected => {
                *provider_events = None;
                log_subs.clear();
                self.handler.on_connection_changed(&self.connection.snapshot());
                self.rebuild_ledger().await;
            }
            ConnectionUpdate::ActionRejected(message) => {
                self.handler.on_action_rejected(&message);
            }
        }
    }

    /// Rebuilds the provider-event and transfer-log subscriptions from the
    /// current session. The old subscriptions are dropped first so a failed
    /// resubscribe never leaves stale ones behind.
    fn resync(
        &self,
        provider_events: &mut Option<broadcast::Receiver<ProviderEvent>>,
        log_subs: &mut Vec<LogSubscription>,
    ) {
        *provider_events = None;
        log_subs.clear();

        let Some((provider, bindings)) = self.connection.session() else {
            return;
        };
        *provider_events = Some(provider.subscribe_events());
        for handle in [&bindings.stablecoin, &bindings.carbon_credit] {
            match provider.subscribe_logs(handle.transfer_event_filter()) {
                Ok(sub) => log_subs.push(sub),
                Err(err) => warn!("transfer subscription on {} failed: {err}", handle.kind()),
            }
        }
    }

    async fn rebuild_ledger(&self) {
        match self.history.refresh().await {
            Ok(ledger) => self.handler.on_ledger_rebuilt(&ledger),
            Err(err) => warn!("ledger rebuild failed: {err}"),
        }
    }
}

async fn next_provider_event(
    rx: &mut Option<broadcast::Receiver<ProviderEvent>>,
) -> ProviderEvent {
    let Some(receiver) = rx else {
        return futures::future::pending().await;
    };
    loop {
        match receiver.recv().await {
            Ok(event) => return event,
            Err(RecvError::Lagged(count)) => {
                debug!("provider events lagged by {count}");
            }
            Err(RecvError::Closed) => {
                *rx = None;
                return futures::future::pending().await;
            }
        }
    }
}

async fn next_transfer(subs: &mut Vec<LogSubscription>) -> Log {
    if subs.is_empty() {
        return futures::future::pending().await;
    }
    let (log, _, _) =
        futures::future::select_all(subs.iter_mut().map(|sub| Box::pin(sub.recv()))).await;
    match log {
        Some(log) => log,
        // A closed feed resolves on the next session transition.
        None => futures::future::pending().await,
    }
}
