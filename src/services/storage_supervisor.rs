use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{session_store::SessionStore, storage::StorageError},
    state::SharedState,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_FAILED_HEALTH_CHECKS: u32 = 3;

/// Keep a store installed in the shared state, reconnecting with backoff.
///
/// While no store is installed the server runs in degraded mode. An installed
/// store is polled and replaced after [`MAX_FAILED_HEALTH_CHECKS`] consecutive
/// failed checks.
pub async fn run<F, Fut>(state: SharedState, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn SessionStore>, StorageError>> + Send,
{
    let mut delay = INITIAL_DELAY;

    loop {
        match connect().await {
            Ok(store) => {
                state.install_session_store(store.clone()).await;
                info!("storage connected");
                delay = INITIAL_DELAY;
                watch_until_unhealthy(&state, store.as_ref()).await;
                state.clear_session_store().await;
                warn!("storage dropped after repeated failures; reconnecting");
            }
            Err(err) => warn!(error = %err, retry_in = ?delay, "storage connection failed"),
        }
        sleep(delay).await;
        delay = (delay * 2).min(MAX_DELAY);
    }
}

/// Poll `store` and toggle degraded mode. Returns once the store is given up on.
async fn watch_until_unhealthy(state: &SharedState, store: &dyn SessionStore) {
    let mut failures = 0;
    while failures < MAX_FAILED_HEALTH_CHECKS {
        sleep(HEALTH_POLL_INTERVAL).await;
        match store.health_check().await {
            Ok(()) => {
                if state.is_degraded() {
                    info!("storage healthy again");
                    state.update_degraded(false);
                }
                failures = 0;
            }
            Err(err) => {
                failures += 1;
                warn!(failures, error = %err, "storage health check failed");
                state.update_degraded(true);
            }
        }
    }
}
