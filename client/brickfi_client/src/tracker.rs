//! Submit-and-track lifecycle for state-changing calls.
//!
//! One [`TxTracker`] replaces a hand-written hook per action: it takes any
//! [`ContractCall`] and drives
//!
//! ```text
//! Idle ──► Submitting ──► Pending(hash) ──► Confirmed(receipt)
//!               │                │
//!               └────────────────┴────────► Failed(error)
//! ```
//!
//! At most one call per tracker is outstanding, from submission until its
//! receipt resolves; re-invoking meanwhile is a no-op. Confirmation
//! invalidates the shared [`ReadCache`]. Nothing is retried automatically and
//! every failure leaves the tracker ready for the user to try again.
//!
//! Trackers are independent: two of them may be pending at once with no
//! ordering between them.
//!
//! There is no cancellation. Once submitted, a call runs to a settled state
//! even if the caller goes away.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, TxHash};
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::actions::{Action, ContractCall};
use crate::cache::ReadCache;
use crate::errors::{ClientError, TxError};
use crate::rpc::{CallRequest, ChainRpc, Wallet};
use crate::types::TxReceipt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TxStatus {
    #[default]
    Idle,
    Submitting,
    Pending,
    Confirmed,
    Failed,
}

/// Snapshot of one tracker's lifecycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxState {
    pub status: TxStatus,
    pub action: Option<Action>,
    pub hash: Option<TxHash>,
    pub receipt: Option<TxReceipt>,
    pub error: Option<TxError>,
}

impl TxState {
    /// Submitting or awaiting confirmation.
    pub fn is_loading(&self) -> bool {
        matches!(self.status, TxStatus::Submitting | TxStatus::Pending)
    }

    pub fn is_success(&self) -> bool {
        self.status == TxStatus::Confirmed
    }
}

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub poll_interval: Duration,
    pub confirmation_timeout: Duration,
    /// Dry-run every call with `eth_call` before handing it to the wallet.
    pub simulate: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            confirmation_timeout: Duration::from_secs(120),
            simulate: true,
        }
    }
}

pub type SuccessCallback = Arc<dyn Fn(&TxReceipt) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&TxError) + Send + Sync>;

#[derive(Clone, Default)]
pub struct TxCallbacks {
    on_success: Option<SuccessCallback>,
    on_error: Option<ErrorCallback>,
}

impl TxCallbacks {
    pub fn on_success(mut self, f: impl Fn(&TxReceipt) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&TxError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }
}

struct Inner {
    rpc: Arc<dyn ChainRpc>,
    wallet: Arc<dyn Wallet>,
    cache: ReadCache,
    config: TrackerConfig,
    callbacks: TxCallbacks,
    busy: AtomicBool,
    state: watch::Sender<TxState>,
}

/// Clones share the same lifecycle and busy flag.
#[derive(Clone)]
pub struct TxTracker {
    inner: Arc<Inner>,
}

impl TxTracker {
    pub fn new(
        rpc: Arc<dyn ChainRpc>,
        wallet: Arc<dyn Wallet>,
        cache: ReadCache,
        config: TrackerConfig,
    ) -> Self {
        Self::with_callbacks(rpc, wallet, cache, config, TxCallbacks::default())
    }

    pub fn with_callbacks(
        rpc: Arc<dyn ChainRpc>,
        wallet: Arc<dyn Wallet>,
        cache: ReadCache,
        config: TrackerConfig,
        callbacks: TxCallbacks,
    ) -> Self {
        let (state, _) = watch::channel(TxState::default());
        Self {
            inner: Arc::new(Inner {
                rpc,
                wallet,
                cache,
                config,
                callbacks,
                busy: AtomicBool::new(false),
                state,
            }),
        }
    }

    pub fn account(&self) -> Option<Address> {
        self.inner.wallet.account()
    }

    pub fn state(&self) -> TxState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TxState> {
        self.inner.state.subscribe()
    }

    pub fn is_busy(&self) -> bool {
        self.inner.busy.load(Ordering::Acquire)
    }

    /// Submit `call` and confirm it in the background.
    ///
    /// Returns `Ok(None)` without doing anything while a previous call is
    /// outstanding. Submission errors are recorded and returned; confirmation
    /// errors only reach the state and the error callback.
    ///
    /// The lifecycle runs on its own task. Dropping this future stops the
    /// wait for the hash, never the submission, and the tracker still
    /// settles.
    pub async fn submit(&self, call: ContractCall) -> Result<Option<TxHash>, TxError> {
        if !self.inner.try_acquire(call.action) {
            return Ok(None);
        }

        let (sent_tx, sent_rx) = oneshot::channel();
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let sent = inner.send(&call).await;
            let hash = sent.as_ref().ok().copied();
            // The caller may have stopped listening.
            let _ = sent_tx.send(sent);
            if let Some(hash) = hash {
                let _ = inner.confirm(hash).await;
            }
        });

        sent_rx
            .await
            .map_err(|_| TxError::Network("submission task ended early".to_string()))?
            .map(Some)
    }

    /// Submit `call` and wait for its receipt.
    ///
    /// Same guard and same detached lifecycle as [`TxTracker::submit`]:
    /// `Ok(None)` if busy.
    pub async fn submit_and_confirm(
        &self,
        call: ContractCall,
    ) -> Result<Option<TxReceipt>, TxError> {
        if !self.inner.try_acquire(call.action) {
            return Ok(None);
        }

        let inner = Arc::clone(&self.inner);
        let lifecycle = tokio::spawn(async move {
            let hash = inner.send(&call).await?;
            inner.confirm(hash).await
        });

        lifecycle
            .await
            .map_err(|e| TxError::Network(e.to_string()))?
            .map(Some)
    }
}

impl Inner {
    fn try_acquire(&self, action: Action) -> bool {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("{action} ignored: a transaction is already in flight");
            return false;
        }
        self.state.send_replace(TxState {
            status: TxStatus::Submitting,
            action: Some(action),
            ..TxState::default()
        });
        true
    }

    async fn send(&self, call: &ContractCall) -> Result<TxHash, TxError> {
        match self.simulate_and_send(call).await {
            Ok(hash) => {
                info!("{} submitted: {hash}", call.action);
                self.state.send_modify(|s| {
                    s.status = TxStatus::Pending;
                    s.hash = Some(hash);
                });
                Ok(hash)
            }
            Err(e) => {
                self.fail(e.clone());
                Err(e)
            }
        }
    }

    async fn simulate_and_send(&self, call: &ContractCall) -> Result<TxHash, TxError> {
        let from = self
            .wallet
            .account()
            .ok_or_else(|| TxError::from(ClientError::NoAccount))?;

        if self.config.simulate {
            self.rpc
                .call(&CallRequest::simulate(from, call))
                .await
                .map_err(|e| match e {
                    ClientError::Rpc { message, .. } => TxError::Simulation(message),
                    other => TxError::from(other),
                })?;
        }

        self.wallet
            .send_transaction(call)
            .await
            .map_err(|e| match e {
                ClientError::Rpc { message, .. } => TxError::Rejected(message),
                other => TxError::from(other),
            })
    }

    async fn confirm(&self, hash: TxHash) -> Result<TxReceipt, TxError> {
        match self.wait_for_receipt(hash).await {
            Ok(receipt) if receipt.succeeded() => {
                self.cache.invalidate_all().await;
                info!("{hash} confirmed in block {}", receipt.block_number);
                self.state.send_modify(|s| {
                    s.status = TxStatus::Confirmed;
                    s.receipt = Some(receipt.clone());
                });
                self.busy.store(false, Ordering::Release);
                if let Some(cb) = &self.callbacks.on_success {
                    cb(&receipt);
                }
                Ok(receipt)
            }
            Ok(receipt) => {
                self.state.send_modify(|s| s.receipt = Some(receipt.clone()));
                let e = TxError::Reverted(hash.to_string());
                self.fail(e.clone());
                Err(e)
            }
            Err(e) => {
                self.fail(e.clone());
                Err(e)
            }
        }
    }

    async fn wait_for_receipt(&self, hash: TxHash) -> Result<TxReceipt, TxError> {
        let poll = async {
            loop {
                match self.rpc.transaction_receipt(hash).await {
                    Ok(Some(receipt)) => return receipt,
                    Ok(None) => {}
                    Err(e) => warn!("Receipt poll for {hash} failed: {e}"),
                }
                tokio::time::sleep(self.config.poll_interval).await;
            }
        };
        tokio::time::timeout(self.config.confirmation_timeout, poll)
            .await
            .map_err(|_| TxError::ConfirmationTimeout(hash.to_string()))
    }

    fn fail(&self, e: TxError) {
        error!("Transaction failed: {e}");
        self.state.send_modify(|s| {
            s.status = TxStatus::Failed;
            s.error = Some(e.clone());
        });
        self.busy.store(false, Ordering::Release);
        if let Some(cb) = &self.callbacks.on_error {
            cb(&e);
        }
    }
}
