/// In-process store used by default and in tests.
pub mod memory;
/// MongoDB store.
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use std::time::SystemTime;

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::{
    models::{GuessEntity, SessionEntity, UserEntity},
    storage::StorageResult,
};

pub use memory::MemorySessionStore;

/// Abstraction over the persistence layer for sessions, guesses and users.
///
/// Every read-then-write of session or guess state goes through a
/// [`StoreTransaction`] obtained from [`SessionStore::begin`].
pub trait SessionStore: Send + Sync {
    /// Open a transaction. Dropping it without [`StoreTransaction::commit`] rolls it back.
    fn begin(&self) -> BoxFuture<'static, StorageResult<Box<dyn StoreTransaction>>>;
    /// Insert a user; a taken username yields [`StorageError::Conflict`](crate::dao::storage::StorageError::Conflict).
    fn create_user(&self, user: UserEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Look a user up outside any transaction.
    fn find_user(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<UserEntity>>>;
    /// Users ordered by wins (desc), losses (asc) and username.
    fn top_users(&self, limit: usize) -> BoxFuture<'static, StorageResult<Vec<UserEntity>>>;
    /// Cheap round trip proving the backend answers.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
}

/// Unit of work over the session store.
pub trait StoreTransaction: Send {
    /// The session flagged active, if any.
    fn find_active_session(&mut self) -> BoxFuture<'_, StorageResult<Option<SessionEntity>>>;
    /// Most recently ended session, by `ended_at`.
    fn find_last_ended_session(&mut self) -> BoxFuture<'_, StorageResult<Option<SessionEntity>>>;
    /// Session by id.
    fn find_session(&mut self, id: Uuid) -> BoxFuture<'_, StorageResult<Option<SessionEntity>>>;
    /// Session by public join token.
    fn find_session_by_token(
        &mut self,
        token: String,
    ) -> BoxFuture<'_, StorageResult<Option<SessionEntity>>>;
    /// Insert an active session; fails with a conflict if another one is active.
    fn create_session(&mut self, session: SessionEntity) -> BoxFuture<'_, StorageResult<()>>;
    /// Close the session if it is still active. Returns whether it was closed.
    fn end_session(
        &mut self,
        id: Uuid,
        winning_number: u8,
        ended_at: SystemTime,
    ) -> BoxFuture<'_, StorageResult<bool>>;
    /// Keep the session open for the rest of the transaction. Returns `false`
    /// once it ended.
    ///
    /// Backends without serializable transactions must write to the session
    /// here, so that a concurrent [`StoreTransaction::end_session`] conflicts
    /// with the caller instead of interleaving with it.
    fn hold_active_session(&mut self, id: Uuid) -> BoxFuture<'_, StorageResult<bool>>;
    /// Number of players who joined the session.
    fn count_guesses(&mut self, session_id: Uuid) -> BoxFuture<'_, StorageResult<u64>>;
    /// Guess of `user_id` in the session.
    fn find_guess(
        &mut self,
        session_id: Uuid,
        user_id: Uuid,
    ) -> BoxFuture<'_, StorageResult<Option<GuessEntity>>>;
    /// Insert a guess; a duplicate `(session, user)` pair yields a conflict.
    fn create_guess(&mut self, guess: GuessEntity) -> BoxFuture<'_, StorageResult<()>>;
    /// Set the number of a guess that is still unanswered. Returns whether it changed.
    fn update_guess_selection(
        &mut self,
        guess_id: Uuid,
        number: u8,
    ) -> BoxFuture<'_, StorageResult<bool>>;
    /// Guesses of the session in join order.
    fn list_guesses(&mut self, session_id: Uuid) -> BoxFuture<'_, StorageResult<Vec<GuessEntity>>>;
    /// Guesses of the session that picked `number`, in join order.
    fn find_guesses_by_number(
        &mut self,
        session_id: Uuid,
        number: u8,
    ) -> BoxFuture<'_, StorageResult<Vec<GuessEntity>>>;
    /// Mark every guess of the session as winner or loser. Returns the number of guesses updated.
    fn update_guess_outcome(
        &mut self,
        session_id: Uuid,
        winning_number: u8,
    ) -> BoxFuture<'_, StorageResult<u64>>;
    /// Add one win to each user.
    fn increment_user_wins(&mut self, user_ids: Vec<Uuid>) -> BoxFuture<'_, StorageResult<()>>;
    /// Add one loss to each user.
    fn increment_user_losses(&mut self, user_ids: Vec<Uuid>) -> BoxFuture<'_, StorageResult<()>>;
    /// User by id, as seen by the transaction.
    fn find_user(&mut self, id: Uuid) -> BoxFuture<'_, StorageResult<Option<UserEntity>>>;
    /// Users matching `ids`, in no particular order.
    fn find_users(&mut self, ids: Vec<Uuid>) -> BoxFuture<'_, StorageResult<Vec<UserEntity>>>;
    /// Make every change of the transaction visible atomically.
    fn commit(self: Box<Self>) -> BoxFuture<'static, StorageResult<()>>;
}
