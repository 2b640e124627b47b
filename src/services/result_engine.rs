//! Settlement of finished sessions.
//!
//! Settling is idempotent: the first run marks every guess with its outcome and
//! bumps user stats, later runs find the marks and only rebuild the snapshot.

use std::collections::HashMap;

use indexmap::IndexSet;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    dto::session::{ResultSnapshot, ViewerOutcome},
    error::ServiceError,
    state::SharedState,
};

/// Settle `session_id` and return its outcome.
///
/// `viewer` adds the caller's own selection to the snapshot when they took part.
pub async fn settle(
    state: &SharedState,
    session_id: Uuid,
    viewer: Option<Uuid>,
) -> Result<ResultSnapshot, ServiceError> {
    let store = state.require_session_store().await?;
    let mut tx = store.begin().await?;

    let session = tx
        .find_session(session_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("session {session_id} not found")))?;
    let Some(winning_number) = session.winning_number else {
        return Err(ServiceError::PreconditionFailed(
            "session not finished".into(),
        ));
    };

    let total_players = tx.count_guesses(session_id).await?;
    let winners = tx.find_guesses_by_number(session_id, winning_number).await?;
    let guesses = tx.list_guesses(session_id).await?;

    let winner_ids: IndexSet<Uuid> = winners.iter().map(|guess| guess.user_id).collect();

    if guesses.iter().any(|guess| guess.is_winner.is_some()) {
        debug!(%session_id, "session already settled; skipping stats");
    } else {
        let loser_ids: IndexSet<Uuid> = guesses
            .iter()
            .map(|guess| guess.user_id)
            .filter(|id| !winner_ids.contains(id))
            .collect();

        tx.update_guess_outcome(session_id, winning_number).await?;
        tx.increment_user_wins(winner_ids.iter().copied().collect())
            .await?;
        tx.increment_user_losses(loser_ids.iter().copied().collect())
            .await?;
        info!(
            %session_id,
            winning_number,
            winners = winner_ids.len(),
            losers = loser_ids.len(),
            "session settled"
        );
    }

    let usernames: HashMap<Uuid, String> = tx
        .find_users(winner_ids.iter().copied().collect())
        .await?
        .into_iter()
        .map(|user| (user.id, user.username))
        .collect();
    let winner_names = winner_ids
        .iter()
        .filter_map(|id| usernames.get(id).cloned())
        .collect();

    let viewer = viewer.and_then(|viewer_id| {
        guesses
            .iter()
            .find(|guess| guess.user_id == viewer_id)
            .map(|guess| ViewerOutcome {
                selected_number: guess.selection.number(),
                is_winner: guess.selection.number() == Some(winning_number),
            })
    });

    tx.commit().await?;

    Ok(ResultSnapshot {
        session_id,
        winning_number,
        total_players,
        total_wins: winners.len() as u64,
        winners: winner_names,
        viewer,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        dao::models::{GuessEntity, SessionEntity, UserEntity},
        services::test_support::{Fixture, WINNING_NUMBER, fixture},
    };

    async fn join_and_pick(
        fx: &Fixture,
        session: &SessionEntity,
        user: &UserEntity,
        pick: Option<u8>,
    ) {
        let store = fx.state.require_session_store().await.unwrap();
        let mut tx = store.begin().await.unwrap();
        let guess = GuessEntity::joined(session.id, user.id, fx.state.now());
        let guess_id = guess.id;
        tx.create_guess(guess).await.unwrap();
        if let Some(number) = pick {
            assert!(tx.update_guess_selection(guess_id, number).await.unwrap());
        }
        tx.commit().await.unwrap();
        fx.clock.advance(Duration::from_secs(1));
    }

    #[tokio::test]
    async fn settling_twice_applies_stats_once() {
        let fx = fixture().await;
        let ada = fx.user("ada").await;
        let bob = fx.user("bob").await;
        let cy = fx.user("cy").await;
        let session = fx.open_session("s1").await;
        join_and_pick(&fx, &session, &ada, Some(WINNING_NUMBER)).await;
        join_and_pick(&fx, &session, &bob, Some(2)).await;
        join_and_pick(&fx, &session, &cy, None).await;
        fx.clock.advance(Duration::from_secs(30));
        fx.end_session(&session).await;

        for _ in 0..3 {
            let snapshot = settle(&fx.state, session.id, None).await.unwrap();
            assert_eq!(snapshot.winning_number, WINNING_NUMBER);
            assert_eq!(snapshot.total_players, 3);
            assert_eq!(snapshot.total_wins, 1);
            assert_eq!(snapshot.winners, vec!["ada".to_string()]);
        }

        assert_eq!(fx.stats(&ada).await, (1, 0));
        assert_eq!(fx.stats(&bob).await, (0, 1));
        assert_eq!(fx.stats(&cy).await, (0, 1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_settlements_apply_stats_once() {
        let fx = fixture().await;
        let ada = fx.user("ada").await;
        let bob = fx.user("bob").await;
        let session = fx.open_session("s1").await;
        join_and_pick(&fx, &session, &ada, Some(WINNING_NUMBER)).await;
        join_and_pick(&fx, &session, &bob, Some(4)).await;
        fx.clock.advance(Duration::from_secs(30));
        fx.end_session(&session).await;

        let session_id = session.id;
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let state = fx.state.clone();
                tokio::spawn(async move { settle(&state, session_id, None).await })
            })
            .collect();
        for handle in handles {
            let snapshot = handle.await.unwrap().unwrap();
            assert_eq!(snapshot.total_wins, 1);
            assert_eq!(snapshot.winners, vec!["ada".to_string()]);
        }

        assert_eq!(fx.stats(&ada).await, (1, 0));
        assert_eq!(fx.stats(&bob).await, (0, 1));
    }

    #[tokio::test]
    async fn winners_follow_join_order() {
        let fx = fixture().await;
        let zed = fx.user("zed").await;
        let amy = fx.user("amy").await;
        let session = fx.open_session("s1").await;
        join_and_pick(&fx, &session, &zed, Some(WINNING_NUMBER)).await;
        join_and_pick(&fx, &session, &amy, Some(WINNING_NUMBER)).await;
        fx.end_session(&session).await;

        let snapshot = settle(&fx.state, session.id, Some(amy.id)).await.unwrap();
        assert_eq!(snapshot.winners, vec!["zed".to_string(), "amy".to_string()]);
        assert_eq!(
            snapshot.viewer,
            Some(ViewerOutcome {
                selected_number: Some(WINNING_NUMBER),
                is_winner: true,
            })
        );
    }

    #[tokio::test]
    async fn viewer_who_never_guessed_is_a_loser() {
        let fx = fixture().await;
        let ada = fx.user("ada").await;
        let outsider = fx.user("outsider").await;
        let session = fx.open_session("s1").await;
        join_and_pick(&fx, &session, &ada, None).await;
        fx.end_session(&session).await;

        let snapshot = settle(&fx.state, session.id, Some(ada.id)).await.unwrap();
        assert_eq!(snapshot.total_wins, 0);
        assert!(snapshot.winners.is_empty());
        assert_eq!(
            snapshot.viewer,
            Some(ViewerOutcome {
                selected_number: None,
                is_winner: false,
            })
        );

        let snapshot = settle(&fx.state, session.id, Some(outsider.id))
            .await
            .unwrap();
        assert_eq!(snapshot.viewer, None);
    }

    #[tokio::test]
    async fn active_session_cannot_be_settled() {
        let fx = fixture().await;
        let ada = fx.user("ada").await;
        let session = fx.open_session("s1").await;
        join_and_pick(&fx, &session, &ada, Some(WINNING_NUMBER)).await;

        let err = settle(&fx.state, session.id, None).await.unwrap_err();
        assert!(matches!(err, ServiceError::PreconditionFailed(_)));
        assert_eq!(fx.stats(&ada).await, (0, 0));
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let fx = fixture().await;
        let err = settle(&fx.state, Uuid::new_v4(), None).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn empty_session_settles_cleanly() {
        let fx = fixture().await;
        let session = fx.open_session("s1").await;
        fx.end_session(&session).await;

        let snapshot = settle(&fx.state, session.id, None).await.unwrap();
        assert_eq!(snapshot.total_players, 0);
        assert_eq!(snapshot.total_wins, 0);
    }
}
