use serde::Serialize;
use utoipa::ToSchema;

/// Coarse availability of the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Storage reachable, sessions are running.
    Ok,
    /// No usable store; reads and writes answer 503.
    Degraded,
}

/// Body of the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Current availability.
    pub status: HealthStatus,
}

impl HealthResponse {
    /// Whether the service is fully available.
    pub fn is_ok(&self) -> bool {
        self.status == HealthStatus::Ok
    }
}

impl From<HealthStatus> for HealthResponse {
    fn from(status: HealthStatus) -> Self {
        Self { status }
    }
}
