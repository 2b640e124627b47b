use tracing::warn;

use crate::{
    dto::health::{HealthResponse, HealthStatus},
    state::SharedState,
};

/// Check the installed store; any failure or a missing store reports degraded.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let status = match state.session_store().await {
        Some(store) => match store.health_check().await {
            Ok(()) if !state.is_degraded() => HealthStatus::Ok,
            Ok(()) => HealthStatus::Degraded,
            Err(err) => {
                warn!(error = %err, "storage health check failed");
                HealthStatus::Degraded
            }
        },
        None => {
            warn!("storage unavailable (degraded mode)");
            HealthStatus::Degraded
        }
    };
    status.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::fixture;

    #[tokio::test]
    async fn reports_store_availability() {
        let fx = fixture().await;
        assert!(health_status(&fx.state).await.is_ok());

        fx.store.set_online(false);
        assert_eq!(
            health_status(&fx.state).await.status,
            HealthStatus::Degraded
        );

        fx.store.set_online(true);
        fx.state.clear_session_store().await;
        assert!(!health_status(&fx.state).await.is_ok());
    }
}
