/// Time source.
pub mod clock;
/// Winning number source.
pub mod draw;
/// Pure session lifecycle rules.
pub mod lifecycle;
mod sse;

use std::{sync::Arc, time::SystemTime};

use tokio::sync::{RwLock, watch};

use crate::{config::AppConfig, dao::session_store::SessionStore, error::ServiceError};

pub use self::sse::SseHub;
use self::{
    clock::{Clock, SystemClock},
    draw::{NumberDraw, RandomDraw},
};

/// Handle to the application state shared by every task.
pub type SharedState = Arc<AppState>;

const PUBLIC_SSE_CAPACITY: usize = 64;

/// Central application state storing the store handle, time sources and broadcast hub.
pub struct AppState {
    config: AppConfig,
    clock: Arc<dyn Clock>,
    draw: Arc<dyn NumberDraw>,
    session_store: RwLock<Option<Arc<dyn SessionStore>>>,
    public_sse: SseHub,
    degraded: watch::Sender<bool>,
    shutdown: watch::Sender<bool>,
}

impl AppState {
    /// Construct a new [`AppState`] running on the system clock with random draws.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        Self::with_parts(config, Arc::new(SystemClock), Arc::new(RandomDraw))
    }

    /// Construct a new [`AppState`] with explicit time and draw sources.
    pub fn with_parts(
        config: AppConfig,
        clock: Arc<dyn Clock>,
        draw: Arc<dyn NumberDraw>,
    ) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        let (shutdown_tx, _rx) = watch::channel(false);
        Arc::new(Self {
            config,
            clock,
            draw,
            session_store: RwLock::new(None),
            public_sse: SseHub::new(PUBLIC_SSE_CAPACITY),
            degraded: degraded_tx,
            shutdown: shutdown_tx,
        })
    }

    /// Immutable runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Shared handle on the clock, for timers that outlive a borrow of the state.
    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Current time according to the configured clock.
    pub fn now(&self) -> SystemTime {
        self.clock.now()
    }

    /// Draw a winning number.
    pub fn draw_number(&self) -> u8 {
        self.draw.draw()
    }

    /// Obtain a handle to the current session store, if one is installed.
    pub async fn session_store(&self) -> Option<Arc<dyn SessionStore>> {
        let guard = self.session_store.read().await;
        guard.as_ref().cloned()
    }

    /// Obtain the current session store or fail with [`ServiceError::Degraded`].
    pub async fn require_session_store(&self) -> Result<Arc<dyn SessionStore>, ServiceError> {
        self.session_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new session store implementation and leave degraded mode.
    pub async fn install_session_store(&self, store: Arc<dyn SessionStore>) {
        {
            let mut guard = self.session_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false);
    }

    /// Remove the current session store and enter degraded mode.
    pub async fn clear_session_store(&self) {
        {
            let mut guard = self.session_store.write().await;
            guard.take();
        }
        self.update_degraded(true);
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    /// Ask long-running tasks (scheduler, SSE streams) to stop.
    pub fn begin_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Receiver that flips to `true` once [`AppState::begin_shutdown`] ran.
    pub fn shutdown_watcher(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Broadcast hub used for the public SSE stream.
    pub fn public_sse(&self) -> &SseHub {
        &self.public_sse
    }
}
