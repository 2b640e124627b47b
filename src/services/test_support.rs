//! Fixtures shared by the service tests.

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::{
        models::{GuessEntity, SessionEntity, UserEntity},
        session_store::{MemorySessionStore, SessionStore, StoreTransaction},
        storage::StorageResult,
    },
    state::{
        AppState, SharedState,
        clock::ManualClock,
        draw::{FixedDraw, NumberDraw},
    },
};

pub const WINNING_NUMBER: u8 = 7;

pub struct Fixture {
    pub state: SharedState,
    pub store: MemorySessionStore,
    pub clock: Arc<ManualClock>,
}

pub fn at(secs: u64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000 + secs)
}

pub async fn fixture() -> Fixture {
    fixture_with_draw(Arc::new(FixedDraw(WINNING_NUMBER))).await
}

pub async fn fixture_with_draw(draw: Arc<dyn NumberDraw>) -> Fixture {
    let clock = Arc::new(ManualClock::new(at(0)));
    let state = AppState::with_parts(AppConfig::default(), clock.clone(), draw);
    let store = MemorySessionStore::new();
    state.install_session_store(Arc::new(store.clone())).await;
    Fixture {
        state,
        store,
        clock,
    }
}

impl Fixture {
    pub async fn user(&self, name: &str) -> UserEntity {
        let user = UserEntity::new(name.into(), at(0));
        self.store.create_user(user.clone()).await.unwrap();
        user
    }

    /// Insert an active session started at the current clock time.
    pub async fn open_session(&self, token: &str) -> SessionEntity {
        let session = SessionEntity::open(
            token.into(),
            self.state.now(),
            self.state.config().session_duration.as_secs(),
        );
        let mut tx = self.store.begin().await.unwrap();
        tx.create_session(session.clone()).await.unwrap();
        tx.commit().await.unwrap();
        session
    }

    /// Close `session` with the fixture's winning number at the current clock time.
    pub async fn end_session(&self, session: &SessionEntity) {
        let mut tx = self.store.begin().await.unwrap();
        assert!(
            tx.end_session(session.id, WINNING_NUMBER, self.state.now())
                .await
                .unwrap()
        );
        tx.commit().await.unwrap();
    }

    /// Route the service layer through a [`StaleReadStore`] over the same data.
    pub async fn use_stale_reads(&self) {
        self.state
            .install_session_store(Arc::new(StaleReadStore(self.store.clone())))
            .await;
    }

    pub async fn stats(&self, user: &UserEntity) -> (u64, u64) {
        let stored = self.store.find_user(user.id).await.unwrap().unwrap();
        (stored.wins, stored.losses)
    }
}

/// Store whose transactions read every session as still active, like a
/// snapshot taken just before a concurrent close committed.
pub struct StaleReadStore(pub MemorySessionStore);

struct StaleReadTransaction(Box<dyn StoreTransaction>);

fn still_active(session: Option<SessionEntity>) -> Option<SessionEntity> {
    session.map(|mut session| {
        session.is_active = true;
        session.ended_at = None;
        session.winning_number = None;
        session
    })
}

impl SessionStore for StaleReadStore {
    fn begin(&self) -> BoxFuture<'static, StorageResult<Box<dyn StoreTransaction>>> {
        let begin = self.0.begin();
        Box::pin(async move {
            let inner = begin.await?;
            Ok(Box::new(StaleReadTransaction(inner)) as Box<dyn StoreTransaction>)
        })
    }

    fn create_user(&self, user: UserEntity) -> BoxFuture<'static, StorageResult<()>> {
        self.0.create_user(user)
    }

    fn find_user(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<UserEntity>>> {
        self.0.find_user(id)
    }

    fn top_users(&self, limit: usize) -> BoxFuture<'static, StorageResult<Vec<UserEntity>>> {
        self.0.top_users(limit)
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.0.health_check()
    }
}

impl StoreTransaction for StaleReadTransaction {
    fn find_active_session(&mut self) -> BoxFuture<'_, StorageResult<Option<SessionEntity>>> {
        self.0.find_active_session()
    }

    fn find_last_ended_session(&mut self) -> BoxFuture<'_, StorageResult<Option<SessionEntity>>> {
        self.0.find_last_ended_session()
    }

    fn find_session(&mut self, id: Uuid) -> BoxFuture<'_, StorageResult<Option<SessionEntity>>> {
        self.0.find_session(id)
    }

    fn find_session_by_token(
        &mut self,
        token: String,
    ) -> BoxFuture<'_, StorageResult<Option<SessionEntity>>> {
        Box::pin(async move { Ok(still_active(self.0.find_session_by_token(token).await?)) })
    }

    fn create_session(&mut self, session: SessionEntity) -> BoxFuture<'_, StorageResult<()>> {
        self.0.create_session(session)
    }

    fn end_session(
        &mut self,
        id: Uuid,
        winning_number: u8,
        ended_at: SystemTime,
    ) -> BoxFuture<'_, StorageResult<bool>> {
        self.0.end_session(id, winning_number, ended_at)
    }

    fn hold_active_session(&mut self, id: Uuid) -> BoxFuture<'_, StorageResult<bool>> {
        self.0.hold_active_session(id)
    }

    fn count_guesses(&mut self, session_id: Uuid) -> BoxFuture<'_, StorageResult<u64>> {
        self.0.count_guesses(session_id)
    }

    fn find_guess(
        &mut self,
        session_id: Uuid,
        user_id: Uuid,
    ) -> BoxFuture<'_, StorageResult<Option<GuessEntity>>> {
        self.0.find_guess(session_id, user_id)
    }

    fn create_guess(&mut self, guess: GuessEntity) -> BoxFuture<'_, StorageResult<()>> {
        self.0.create_guess(guess)
    }

    fn update_guess_selection(
        &mut self,
        guess_id: Uuid,
        number: u8,
    ) -> BoxFuture<'_, StorageResult<bool>> {
        self.0.update_guess_selection(guess_id, number)
    }

    fn list_guesses(&mut self, session_id: Uuid) -> BoxFuture<'_, StorageResult<Vec<GuessEntity>>> {
        self.0.list_guesses(session_id)
    }

    fn find_guesses_by_number(
        &mut self,
        session_id: Uuid,
        number: u8,
    ) -> BoxFuture<'_, StorageResult<Vec<GuessEntity>>> {
        self.0.find_guesses_by_number(session_id, number)
    }

    fn update_guess_outcome(
        &mut self,
        session_id: Uuid,
        winning_number: u8,
    ) -> BoxFuture<'_, StorageResult<u64>> {
        self.0.update_guess_outcome(session_id, winning_number)
    }

    fn increment_user_wins(&mut self, user_ids: Vec<Uuid>) -> BoxFuture<'_, StorageResult<()>> {
        self.0.increment_user_wins(user_ids)
    }

    fn increment_user_losses(&mut self, user_ids: Vec<Uuid>) -> BoxFuture<'_, StorageResult<()>> {
        self.0.increment_user_losses(user_ids)
    }

    fn find_user(&mut self, id: Uuid) -> BoxFuture<'_, StorageResult<Option<UserEntity>>> {
        self.0.find_user(id)
    }

    fn find_users(&mut self, ids: Vec<Uuid>) -> BoxFuture<'_, StorageResult<Vec<UserEntity>>> {
        self.0.find_users(ids)
    }

    fn commit(self: Box<Self>) -> BoxFuture<'static, StorageResult<()>> {
        let StaleReadTransaction(inner) = *self;
        inner.commit()
    }
}
