//! Pure session lifecycle rules shared by the scheduler and the status endpoint.

use std::time::{Duration, SystemTime};

use crate::dao::models::SessionEntity;

/// Where the game stands at a given instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    /// A session is accepting players. `time_left` is zero once the deadline passed
    /// and the session is about to close.
    Active {
        /// The active session.
        session: SessionEntity,
        /// Remaining guessing time.
        time_left: Duration,
    },
    /// No session is active.
    Waiting {
        /// Remaining cooldown before the next session may open.
        next_session_in: Duration,
    },
}

impl SessionStatus {
    /// The active session, if any.
    pub fn active_session(&self) -> Option<&SessionEntity> {
        match self {
            SessionStatus::Active { session, .. } => Some(session),
            SessionStatus::Waiting { .. } => None,
        }
    }
}

/// Next step the scheduler should take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleAction {
    /// No session is active and the cooldown is over.
    Open,
    /// The active session reached its deadline.
    Close(SessionEntity),
    /// The active session is still running.
    Hold {
        /// Remaining guessing time.
        time_left: Duration,
    },
    /// Inside the cooldown.
    Wait {
        /// Remaining cooldown.
        next_session_in: Duration,
    },
}

/// Time elapsed from `earlier` to `now`, saturating at zero when the clock went backwards.
fn elapsed_since(now: SystemTime, earlier: SystemTime) -> Duration {
    now.duration_since(earlier).unwrap_or(Duration::ZERO)
}

/// Derive the current status without touching any state.
///
/// Without any ended session the wait defaults to the full cooldown.
pub fn compute_remaining_or_wait(
    now: SystemTime,
    active: Option<&SessionEntity>,
    last_ended: Option<&SessionEntity>,
    cooldown: Duration,
) -> SessionStatus {
    if let Some(session) = active {
        let time_left = session
            .deadline()
            .duration_since(now)
            .unwrap_or(Duration::ZERO);
        return SessionStatus::Active {
            session: session.clone(),
            time_left,
        };
    }

    let next_session_in = match last_ended.and_then(|session| session.ended_at) {
        Some(ended_at) => cooldown.saturating_sub(elapsed_since(now, ended_at)),
        None => cooldown,
    };
    SessionStatus::Waiting { next_session_in }
}

/// Decide the lifecycle transition for `now`.
pub fn decide(
    now: SystemTime,
    active: Option<&SessionEntity>,
    last_ended: Option<&SessionEntity>,
    cooldown: Duration,
) -> LifecycleAction {
    if let Some(session) = active {
        if session.is_expired_at(now) {
            return LifecycleAction::Close(session.clone());
        }
        return LifecycleAction::Hold {
            time_left: elapsed_since(session.deadline(), now),
        };
    }

    let Some(ended_at) = last_ended.and_then(|session| session.ended_at) else {
        return LifecycleAction::Open;
    };

    let idle_for = elapsed_since(now, ended_at);
    if idle_for >= cooldown {
        LifecycleAction::Open
    } else {
        LifecycleAction::Wait {
            next_session_in: cooldown - idle_for,
        }
    }
}
