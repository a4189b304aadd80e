//! Connection Manager
//!
//! Owns the single shared `StoreHandle`. The handle is created lazily on
//! first use, gated on a readiness wait, and cached for the process
//! lifetime. A failed or timed-out initialisation is remembered so that
//! later callers degrade immediately instead of reconnecting on every call.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{error, info, warn};

use crate::config::RedisConfig;
use crate::error::{CacheError, Result};
use crate::store::{self, StoreHandle};

/// Future produced by a connector.
pub type ConnectFuture = Pin<Box<dyn Future<Output = Result<Arc<dyn StoreHandle>>> + Send>>;

/// Builds a new store connection on demand.
pub type Connector = Arc<dyn Fn() -> ConnectFuture + Send + Sync>;

/// Lifecycle of the shared handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
    Error,
}

enum Slot {
    Empty,
    Ready(Arc<dyn StoreHandle>),
    Failed,
}

// == Connection Manager ==
/// Produces a ready `StoreHandle` on demand, or `None` when the store is
/// disabled or unreachable.
pub struct ConnectionManager {
    enabled: bool,
    ready_timeout: Duration,
    connector: Connector,
    slot: RwLock<Slot>,
    init_lock: Mutex<()>,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl ConnectionManager {
    /// Manager that connects to redis as described by `config`.
    pub fn from_config(config: &RedisConfig) -> Self {
        let settings = config.clone();
        let connector: Connector = Arc::new(move || -> ConnectFuture {
            let settings = settings.clone();
            Box::pin(async move { store::connect(&settings).await })
        });
        Self::with_connector(
            config.enabled,
            Duration::from_millis(config.connect_timeout_ms),
            connector,
        )
    }

    /// Manager with a custom connector.
    pub fn with_connector(enabled: bool, ready_timeout: Duration, connector: Connector) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            enabled,
            ready_timeout,
            connector,
            slot: RwLock::new(Slot::Empty),
            init_lock: Mutex::new(()),
            state: Arc::new(state),
        }
    }

    /// Manager around an already connected handle, e.g. an in-memory store.
    pub fn with_handle(handle: Arc<dyn StoreHandle>) -> Self {
        let reconnect = Arc::clone(&handle);
        let connector: Connector = Arc::new(move || -> ConnectFuture {
            let handle = Arc::clone(&reconnect);
            Box::pin(async move { Ok(handle) })
        });
        let mut manager = Self::with_connector(true, Duration::from_secs(1), connector);
        manager.slot = RwLock::new(Slot::Ready(handle));
        manager.state.send_replace(ConnectionState::Ready);
        manager
    }

    /// Manager for a deployment without a store; every lookup yields `None`.
    pub fn disabled() -> Self {
        let connector: Connector =
            Arc::new(|| -> ConnectFuture { Box::pin(async { Err(CacheError::Unavailable) }) });
        Self::with_connector(false, Duration::ZERO, connector)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver for lifecycle transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    // == Get Handle ==
    /// Returns the shared handle, initialising it on first use.
    ///
    /// Concurrent first callers share one initialisation attempt.
    pub async fn get_handle(&self) -> Option<Arc<dyn StoreHandle>> {
        if !self.enabled {
            return None;
        }
        if let Some(cached) = self.cached().await {
            return cached;
        }

        let _guard = self.init_lock.lock().await;
        if let Some(cached) = self.cached().await {
            return cached;
        }

        let handle = self.initialize().await;
        *self.slot.write().await = match &handle {
            Some(h) => Slot::Ready(Arc::clone(h)),
            None => Slot::Failed,
        };
        handle
    }

    async fn cached(&self) -> Option<Option<Arc<dyn StoreHandle>>> {
        match &*self.slot.read().await {
            Slot::Ready(handle) => Some(Some(Arc::clone(handle))),
            Slot::Failed => Some(None),
            Slot::Empty => None,
        }
    }

    async fn initialize(&self) -> Option<Arc<dyn StoreHandle>> {
        self.state.send_replace(ConnectionState::Connecting);

        let state = Arc::clone(&self.state);
        let connect = (self.connector)();
        let task = tokio::spawn(async move {
            let outcome = connect.await;
            state.send_replace(if outcome.is_ok() {
                ConnectionState::Ready
            } else {
                ConnectionState::Error
            });
            outcome
        });

        match self.wait_for_ready(self.ready_timeout).await {
            ConnectionState::Connecting => {
                task.abort();
                self.state.send_replace(ConnectionState::Error);
                error!(
                    timeout_ms = self.ready_timeout.as_millis() as u64,
                    "Store did not become ready in time, continuing without it"
                );
                None
            }
            _ => match task.await {
                Ok(Ok(handle)) => {
                    info!(mode = ?handle.mode(), "Store connection ready");
                    Some(handle)
                }
                Ok(Err(e)) => {
                    error!(error = %e, "Store connection failed, continuing without it");
                    None
                }
                Err(e) => {
                    self.state.send_replace(ConnectionState::Error);
                    error!(error = %e, "Store connection task aborted");
                    None
                }
            },
        }
    }

    // == Wait For Ready ==
    /// Suspends until the state leaves `Connecting` or `timeout` elapses.
    ///
    /// Returns the settled state, or `Connecting` when the wait timed out.
    pub async fn wait_for_ready(&self, timeout: Duration) -> ConnectionState {
        let mut rx = self.state.subscribe();
        let settled = tokio::time::timeout(timeout, async move {
            rx.wait_for(|s| *s != ConnectionState::Connecting)
                .await
                .map(|s| *s)
        })
        .await;

        match settled {
            Ok(Ok(state)) => state,
            Ok(Err(_)) => ConnectionState::Error,
            Err(_) => ConnectionState::Connecting,
        }
    }

    // == Close ==
    /// Quits the handle if one exists. The reference is dropped even when
    /// the quit fails; calling this without a handle is a no-op.
    pub async fn close(&self) {
        let _guard = self.init_lock.lock().await;
        let previous = std::mem::replace(&mut *self.slot.write().await, Slot::Empty);
        self.state.send_replace(ConnectionState::Disconnected);

        if let Slot::Ready(handle) = previous {
            match handle.quit().await {
                Ok(()) => info!("Store connection closed"),
                Err(e) => warn!(error = %e, "Store quit failed, connection dropped"),
            }
        }
    }
}
