//! Background refresher -- periodic address book fetch and membership swap.
//!
//! One scheduled task per pool, bound to a cancellation token. Rescheduling
//! cancels the previous token before spawning the new loop.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use ledgerlink_protocol::{AddressBook, LedgerId};
use tokio_util::sync::CancellationToken;

use crate::pool::{MembershipDiff, NetworkError, NodePool};
use crate::transport::BoxFuture;

/// Where fresh address books come from.
pub trait AddressBookSource: Send + Sync {
    fn fetch(&self, ledger_id: Option<LedgerId>) -> BoxFuture<'_, Result<AddressBook, NetworkError>>;
}

/// Serves one fixed book, e.g. an embedded snapshot.
pub struct StaticAddressBook {
    book: AddressBook,
}

impl StaticAddressBook {
    pub fn new(book: AddressBook) -> Self {
        Self { book }
    }
}

impl AddressBookSource for StaticAddressBook {
    fn fetch(&self, _ledger_id: Option<LedgerId>) -> BoxFuture<'_, Result<AddressBook, NetworkError>> {
        Box::pin(async move { Ok(self.book.clone()) })
    }
}

struct RefresherState {
    period: Duration,
    cancel: Option<CancellationToken>,
}

#[derive(Clone)]
pub struct NetworkRefresher {
    pool: NodePool,
    source: Arc<dyn AddressBookSource>,
    state: Arc<Mutex<RefresherState>>,
}

impl NetworkRefresher {
    pub fn new(pool: NodePool, source: Arc<dyn AddressBookSource>, period: Duration) -> Self {
        Self {
            pool,
            source,
            state: Arc::new(Mutex::new(RefresherState {
                period,
                cancel: None,
            })),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, RefresherState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Eager refresh, then the periodic schedule.
    pub async fn start(&self) {
        if let Err(e) = self.refresh_once().await {
            tracing::warn!(error = %e, "refresh: initial address book update failed");
        }
        let period = self.period();
        self.schedule(period);
    }

    /// Fetch and apply one address book. An empty book keeps the current
    /// membership.
    pub async fn refresh_once(&self) -> Result<MembershipDiff, NetworkError> {
        let ledger_id = self.pool.ledger_id().await;
        let book = self.source.fetch(ledger_id).await?;
        if book.is_empty() {
            tracing::debug!("refresh: empty address book, membership unchanged");
            return Ok(MembershipDiff::default());
        }
        let diff = self.pool.set_network_from_address_book(&book).await;
        tracing::debug!(
            entries = book.len(),
            added = diff.added,
            removed = diff.removed,
            "refresh: address book applied"
        );
        Ok(diff)
    }

    /// Fire-and-forget refresh on a spawned task.
    pub fn trigger(&self) {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.refresh_once().await {
                tracing::warn!(error = %e, "refresh: triggered address book update failed");
            }
        });
    }

    /// Restart the periodic loop with `period`. Zero disables it.
    pub fn schedule(&self, period: Duration) {
        let token = {
            let mut state = self.state();
            if let Some(previous) = state.cancel.take() {
                previous.cancel();
            }
            state.period = period;
            if period.is_zero() {
                tracing::info!("refresh: periodic address book update disabled");
                return;
            }
            let token = CancellationToken::new();
            state.cancel = Some(token.clone());
            token
        };

        tracing::info!(period_secs = period.as_secs(), "refresh: scheduled");
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::debug!("refresh: schedule cancelled");
                        break;
                    }
                    _ = tokio::time::sleep(period) => {
                        if let Err(e) = this.refresh_once().await {
                            tracing::warn!(error = %e, "refresh: periodic address book update failed");
                        }
                    }
                }
            }
        });
    }

    pub fn cancel(&self) {
        if let Some(token) = self.state().cancel.take() {
            token.cancel();
        }
    }

    pub fn period(&self) -> Duration {
        self.state().period
    }

    pub fn is_scheduled(&self) -> bool {
        self.state().cancel.is_some()
    }
}
