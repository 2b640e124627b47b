use std::time::SystemTime;

use tracing::info;
use uuid::Uuid;

use crate::{
    dao::{
        models::{
            GuessEntity, MAX_NUMBER, MIN_NUMBER, Selection, SessionEntity, UserEntity,
            is_valid_number,
        },
        session_store::StoreTransaction,
    },
    dto::{
        session::{GuessResponse, JoinResponse},
        user::UserSummary,
        validation::validate_username,
    },
    error::ServiceError,
    services::sse_events,
    state::SharedState,
};

/// Register a player under a unique, trimmed username.
pub async fn register_user(
    state: &SharedState,
    username: &str,
) -> Result<UserSummary, ServiceError> {
    validate_username(username).map_err(|err| {
        ServiceError::InvalidInput(
            err.message
                .map(|message| message.into_owned())
                .unwrap_or_else(|| "invalid username".into()),
        )
    })?;

    let store = state.require_session_store().await?;
    let user = UserEntity::new(username.trim().to_owned(), state.now());
    store.create_user(user.clone()).await.map_err(|err| {
        match ServiceError::from(err) {
            ServiceError::Conflict(_) => {
                ServiceError::Conflict(format!("username `{}` is already taken", user.username))
            }
            other => other,
        }
    })?;

    info!(user_id = %user.id, username = %user.username, "user registered");
    Ok(user.into())
}

/// Add `user_id` to the session identified by `token`.
pub async fn join_session(
    state: &SharedState,
    token: &str,
    user_id: Uuid,
) -> Result<JoinResponse, ServiceError> {
    let store = state.require_session_store().await?;
    let now = state.now();
    let mut tx = store.begin().await?;

    let session = tx
        .find_session_by_token(token.to_owned())
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("session `{token}` not found")))?;
    let user = tx
        .find_user(user_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("user `{user_id}` not found")))?;
    ensure_open(&session, now)?;

    if tx.find_guess(session.id, user_id).await?.is_some() {
        return Err(ServiceError::PreconditionFailed("already joined".into()));
    }
    hold_open(&mut tx, &session).await?;

    tx.create_guess(GuessEntity::joined(session.id, user_id, now))
        .await?;
    let total_players = tx.count_guesses(session.id).await?;
    tx.commit().await?;

    info!(session_id = %session.id, %user_id, total_players, "player joined");
    sse_events::broadcast_player_joined(state, total_players, &user.username);

    Ok(JoinResponse {
        session_id: session.id,
        total_players,
    })
}

/// Record the number picked by a player who already joined the session.
pub async fn submit_guess(
    state: &SharedState,
    token: &str,
    user_id: Uuid,
    number: i64,
) -> Result<GuessResponse, ServiceError> {
    let number = match u8::try_from(number) {
        Ok(picked) if is_valid_number(number) => picked,
        _ => {
            return Err(ServiceError::PreconditionFailed(format!(
                "number must be between {MIN_NUMBER} and {MAX_NUMBER}"
            )));
        }
    };

    let store = state.require_session_store().await?;
    let now = state.now();
    let mut tx = store.begin().await?;

    let session = tx
        .find_session_by_token(token.to_owned())
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("session `{token}` not found")))?;
    ensure_open(&session, now)?;

    let guess = tx
        .find_guess(session.id, user_id)
        .await?
        .ok_or_else(|| ServiceError::PreconditionFailed("join before guessing".into()))?;
    if guess.selection != Selection::Unanswered {
        return Err(ServiceError::PreconditionFailed("already guessed".into()));
    }
    hold_open(&mut tx, &session).await?;

    if !tx.update_guess_selection(guess.id, number).await? {
        return Err(ServiceError::PreconditionFailed("already guessed".into()));
    }
    tx.commit().await?;

    info!(session_id = %session.id, %user_id, "guess recorded");
    Ok(GuessResponse {
        session_id: session.id,
        number,
    })
}

fn not_accepting() -> ServiceError {
    ServiceError::PreconditionFailed("session is not accepting players".into())
}

fn ensure_open(session: &SessionEntity, now: SystemTime) -> Result<(), ServiceError> {
    if !session.is_active || session.is_expired_at(now) {
        return Err(not_accepting());
    }
    Ok(())
}

/// Keep `session` from closing until `tx` ends, or fail if it already closed.
async fn hold_open(
    tx: &mut Box<dyn StoreTransaction>,
    session: &SessionEntity,
) -> Result<(), ServiceError> {
    if tx.hold_active_session(session.id).await? {
        Ok(())
    } else {
        Err(not_accepting())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        dao::session_store::SessionStore,
        services::test_support::{Fixture, fixture},
    };

    async fn guess_of(fx: &Fixture, session: &SessionEntity, user: &UserEntity) -> GuessEntity {
        let mut tx = fx.store.begin().await.unwrap();
        tx.find_guess(session.id, user.id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn register_trims_and_rejects_duplicates() {
        let fx = fixture().await;
        let user = register_user(&fx.state, "  ada  ").await.unwrap();
        assert_eq!(user.username, "ada");
        assert_eq!((user.wins, user.losses), (0, 0));

        let err = register_user(&fx.state, "ada").await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn register_rejects_invalid_usernames() {
        let fx = fixture().await;
        let too_long = "x".repeat(33);
        for name in ["", "   ", too_long.as_str()] {
            let err = register_user(&fx.state, name).await.unwrap_err();
            assert!(matches!(err, ServiceError::InvalidInput(_)), "{name:?}");
        }
    }

    #[tokio::test]
    async fn join_broadcasts_player_count() {
        let fx = fixture().await;
        let ada = fx.user("ada").await;
        let bob = fx.user("bob").await;
        let session = fx.open_session("tok").await;
        let mut events = fx.state.public_sse().subscribe();

        let first = join_session(&fx.state, "tok", ada.id).await.unwrap();
        let second = join_session(&fx.state, "tok", bob.id).await.unwrap();
        assert_eq!(first.total_players, 1);
        assert_eq!(second.total_players, 2);
        assert_eq!(second.session_id, session.id);

        let event = events.try_recv().unwrap();
        assert_eq!(event.event.as_deref(), Some("player.joined"));
        let payload: serde_json::Value = serde_json::from_str(&event.data).unwrap();
        assert_eq!(payload["username"], "ada");
        assert_eq!(payload["total_players"], 1);
    }

    #[tokio::test]
    async fn second_join_is_rejected() {
        let fx = fixture().await;
        let ada = fx.user("ada").await;
        fx.open_session("tok").await;

        join_session(&fx.state, "tok", ada.id).await.unwrap();
        let err = join_session(&fx.state, "tok", ada.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::PreconditionFailed(ref m) if m == "already joined"));
    }

    #[tokio::test]
    async fn join_requires_known_session_and_user() {
        let fx = fixture().await;
        let ada = fx.user("ada").await;
        fx.open_session("tok").await;

        let err = join_session(&fx.state, "nope", ada.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
        let err = join_session(&fx.state, "tok", Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn join_after_deadline_is_rejected() {
        let fx = fixture().await;
        let ada = fx.user("ada").await;
        fx.open_session("tok").await;
        fx.clock.advance(Duration::from_secs(30));

        let err = join_session(&fx.state, "tok", ada.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::PreconditionFailed(_)));
    }

    #[tokio::test]
    async fn join_reading_a_stale_session_writes_nothing() {
        let fx = fixture().await;
        let ada = fx.user("ada").await;
        let session = fx.open_session("tok").await;
        fx.end_session(&session).await;
        fx.use_stale_reads().await;

        let err = join_session(&fx.state, "tok", ada.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::PreconditionFailed(_)));
        let mut tx = fx.store.begin().await.unwrap();
        assert_eq!(tx.count_guesses(session.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn guess_reading_a_stale_session_keeps_it_unanswered() {
        let fx = fixture().await;
        let ada = fx.user("ada").await;
        let session = fx.open_session("tok").await;
        join_session(&fx.state, "tok", ada.id).await.unwrap();
        fx.end_session(&session).await;
        fx.use_stale_reads().await;

        let err = submit_guess(&fx.state, "tok", ada.id, 3).await.unwrap_err();
        assert!(matches!(err, ServiceError::PreconditionFailed(_)));
        assert_eq!(
            guess_of(&fx, &session, &ada).await.selection,
            Selection::Unanswered
        );
    }

    #[tokio::test]
    async fn guess_bounds_are_checked_before_the_store() {
        let fx = fixture().await;
        fx.store.set_online(false);
        for number in [0, 11, -1, 300] {
            let err = submit_guess(&fx.state, "tok", Uuid::new_v4(), number)
                .await
                .unwrap_err();
            assert!(matches!(err, ServiceError::PreconditionFailed(_)));
        }
    }

    #[tokio::test]
    async fn guess_is_recorded_once() {
        let fx = fixture().await;
        let ada = fx.user("ada").await;
        let session = fx.open_session("tok").await;
        join_session(&fx.state, "tok", ada.id).await.unwrap();

        let response = submit_guess(&fx.state, "tok", ada.id, 10).await.unwrap();
        assert_eq!(response.number, 10);
        assert_eq!(
            guess_of(&fx, &session, &ada).await.selection,
            Selection::Selected(10)
        );

        let err = submit_guess(&fx.state, "tok", ada.id, 1).await.unwrap_err();
        assert!(matches!(err, ServiceError::PreconditionFailed(ref m) if m == "already guessed"));
        assert_eq!(
            guess_of(&fx, &session, &ada).await.selection,
            Selection::Selected(10)
        );
    }

    #[tokio::test]
    async fn guess_without_joining_is_rejected() {
        let fx = fixture().await;
        let ada = fx.user("ada").await;
        fx.open_session("tok").await;

        let err = submit_guess(&fx.state, "tok", ada.id, 1).await.unwrap_err();
        assert!(
            matches!(err, ServiceError::PreconditionFailed(ref m) if m == "join before guessing")
        );
    }

    #[tokio::test]
    async fn guess_on_ended_session_is_rejected() {
        let fx = fixture().await;
        let ada = fx.user("ada").await;
        let session = fx.open_session("tok").await;
        join_session(&fx.state, "tok", ada.id).await.unwrap();
        fx.end_session(&session).await;

        let err = submit_guess(&fx.state, "tok", ada.id, 1).await.unwrap_err();
        assert!(matches!(err, ServiceError::PreconditionFailed(_)));
        assert_eq!(
            guess_of(&fx, &session, &ada).await.selection,
            Selection::Unanswered
        );
    }
}
