//! In-process session store. Transactions hold an exclusive guard over the
//! tables and work on a staged copy, so they are serializable.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::SystemTime,
};

use futures::future::{self, BoxFuture};
use indexmap::IndexMap;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{SessionStore, StoreTransaction};
use crate::dao::{
    models::{GuessEntity, SessionEntity, Selection, UserEntity},
    storage::{StorageError, StorageResult},
};

#[derive(Debug, Error)]
#[error("memory store is offline")]
struct Offline;

#[derive(Debug, Clone, Default)]
struct MemoryTables {
    sessions: IndexMap<Uuid, SessionEntity>,
    guesses: IndexMap<Uuid, GuessEntity>,
    users: IndexMap<Uuid, UserEntity>,
}

/// Session store kept entirely in memory.
#[derive(Clone)]
pub struct MemorySessionStore {
    tables: Arc<Mutex<MemoryTables>>,
    online: Arc<AtomicBool>,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            tables: Arc::new(Mutex::new(MemoryTables::default())),
            online: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Toggle simulated availability; while offline every operation fails as unavailable.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Number of sessions flagged active. Used to check the single-active invariant.
    pub async fn active_session_count(&self) -> usize {
        let tables = self.tables.lock().await;
        tables.sessions.values().filter(|s| s.is_active).count()
    }

    /// Every session ever created, in creation order.
    pub async fn sessions(&self) -> Vec<SessionEntity> {
        let tables = self.tables.lock().await;
        tables.sessions.values().cloned().collect()
    }

    fn ensure_online(&self) -> StorageResult<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::unavailable("memory store offline".into(), Offline))
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn begin(&self) -> BoxFuture<'static, StorageResult<Box<dyn StoreTransaction>>> {
        let store = self.clone();
        Box::pin(async move {
            store.ensure_online()?;
            let guard = store.tables.clone().lock_owned().await;
            let staged = guard.clone();
            Ok(Box::new(MemoryTransaction { guard, staged }) as Box<dyn StoreTransaction>)
        })
    }

    fn create_user(&self, user: UserEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.ensure_online()?;
            let mut tables = store.tables.lock().await;
            if tables.users.values().any(|u| u.username == user.username) {
                return Err(StorageError::conflict(format!(
                    "username `{}` is already taken",
                    user.username
                )));
            }
            tables.users.insert(user.id, user);
            Ok(())
        })
    }

    fn find_user(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<UserEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.ensure_online()?;
            let tables = store.tables.lock().await;
            Ok(tables.users.get(&id).cloned())
        })
    }

    fn top_users(&self, limit: usize) -> BoxFuture<'static, StorageResult<Vec<UserEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.ensure_online()?;
            let tables = store.tables.lock().await;
            let mut users: Vec<UserEntity> = tables.users.values().cloned().collect();
            users.sort_by(|a, b| {
                b.wins
                    .cmp(&a.wins)
                    .then(a.losses.cmp(&b.losses))
                    .then_with(|| a.username.cmp(&b.username))
            });
            users.truncate(limit);
            Ok(users)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(future::ready(self.ensure_online()))
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryTables>,
    staged: MemoryTables,
}

fn ready<'a, T: Send + 'a>(value: StorageResult<T>) -> BoxFuture<'a, StorageResult<T>> {
    Box::pin(future::ready(value))
}

impl MemoryTransaction {
    fn session_guesses(&self, session_id: Uuid) -> impl Iterator<Item = &GuessEntity> {
        self.staged
            .guesses
            .values()
            .filter(move |guess| guess.session_id == session_id)
    }

    fn increment(&mut self, user_ids: Vec<Uuid>, win: bool) -> StorageResult<()> {
        for id in user_ids {
            let user = self
                .staged
                .users
                .get_mut(&id)
                .ok_or_else(|| StorageError::conflict(format!("user `{id}` vanished")))?;
            if win {
                user.wins += 1;
            } else {
                user.losses += 1;
            }
        }
        Ok(())
    }
}

impl StoreTransaction for MemoryTransaction {
    fn find_active_session(&mut self) -> BoxFuture<'_, StorageResult<Option<SessionEntity>>> {
        let found = self.staged.sessions.values().find(|s| s.is_active).cloned();
        ready(Ok(found))
    }

    fn find_last_ended_session(&mut self) -> BoxFuture<'_, StorageResult<Option<SessionEntity>>> {
        let found = self
            .staged
            .sessions
            .values()
            .filter(|s| s.ended_at.is_some())
            .max_by_key(|s| s.ended_at)
            .cloned();
        ready(Ok(found))
    }

    fn find_session(&mut self, id: Uuid) -> BoxFuture<'_, StorageResult<Option<SessionEntity>>> {
        ready(Ok(self.staged.sessions.get(&id).cloned()))
    }

    fn find_session_by_token(
        &mut self,
        token: String,
    ) -> BoxFuture<'_, StorageResult<Option<SessionEntity>>> {
        let found = self
            .staged
            .sessions
            .values()
            .find(|s| s.token == token)
            .cloned();
        ready(Ok(found))
    }

    fn create_session(&mut self, session: SessionEntity) -> BoxFuture<'_, StorageResult<()>> {
        if session.is_active && self.staged.sessions.values().any(|s| s.is_active) {
            return ready(Err(StorageError::conflict("an active session already exists")));
        }
        if self
            .staged
            .sessions
            .values()
            .any(|s| s.token == session.token)
        {
            return ready(Err(StorageError::conflict("session token collision")));
        }
        self.staged.sessions.insert(session.id, session);
        ready(Ok(()))
    }

    fn end_session(
        &mut self,
        id: Uuid,
        winning_number: u8,
        ended_at: SystemTime,
    ) -> BoxFuture<'_, StorageResult<bool>> {
        let closed = match self.staged.sessions.get_mut(&id) {
            Some(session) if session.is_active => {
                session.is_active = false;
                session.ended_at = Some(ended_at);
                session.winning_number = Some(winning_number);
                true
            }
            _ => false,
        };
        ready(Ok(closed))
    }

    fn hold_active_session(&mut self, id: Uuid) -> BoxFuture<'_, StorageResult<bool>> {
        let active = self
            .staged
            .sessions
            .get(&id)
            .is_some_and(|session| session.is_active);
        ready(Ok(active))
    }

    fn count_guesses(&mut self, session_id: Uuid) -> BoxFuture<'_, StorageResult<u64>> {
        let count = self.session_guesses(session_id).count() as u64;
        ready(Ok(count))
    }

    fn find_guess(
        &mut self,
        session_id: Uuid,
        user_id: Uuid,
    ) -> BoxFuture<'_, StorageResult<Option<GuessEntity>>> {
        let found = self
            .session_guesses(session_id)
            .find(|g| g.user_id == user_id)
            .cloned();
        ready(Ok(found))
    }

    fn create_guess(&mut self, guess: GuessEntity) -> BoxFuture<'_, StorageResult<()>> {
        let duplicate = self
            .session_guesses(guess.session_id)
            .any(|g| g.user_id == guess.user_id);
        if duplicate {
            return ready(Err(StorageError::conflict(format!(
                "user `{}` already joined session `{}`",
                guess.user_id, guess.session_id
            ))));
        }
        self.staged.guesses.insert(guess.id, guess);
        ready(Ok(()))
    }

    fn update_guess_selection(
        &mut self,
        guess_id: Uuid,
        number: u8,
    ) -> BoxFuture<'_, StorageResult<bool>> {
        let changed = match self.staged.guesses.get_mut(&guess_id) {
            Some(guess) if guess.selection == Selection::Unanswered => {
                guess.selection = Selection::Selected(number);
                true
            }
            _ => false,
        };
        ready(Ok(changed))
    }

    fn list_guesses(&mut self, session_id: Uuid) -> BoxFuture<'_, StorageResult<Vec<GuessEntity>>> {
        let guesses = self.session_guesses(session_id).cloned().collect();
        ready(Ok(guesses))
    }

    fn find_guesses_by_number(
        &mut self,
        session_id: Uuid,
        number: u8,
    ) -> BoxFuture<'_, StorageResult<Vec<GuessEntity>>> {
        let guesses = self
            .session_guesses(session_id)
            .filter(|g| g.selection == Selection::Selected(number))
            .cloned()
            .collect();
        ready(Ok(guesses))
    }

    fn update_guess_outcome(
        &mut self,
        session_id: Uuid,
        winning_number: u8,
    ) -> BoxFuture<'_, StorageResult<u64>> {
        let mut updated = 0;
        for guess in self
            .staged
            .guesses
            .values_mut()
            .filter(|g| g.session_id == session_id)
        {
            guess.is_winner = Some(guess.selection == Selection::Selected(winning_number));
            updated += 1;
        }
        ready(Ok(updated))
    }

    fn increment_user_wins(&mut self, user_ids: Vec<Uuid>) -> BoxFuture<'_, StorageResult<()>> {
        ready(self.increment(user_ids, true))
    }

    fn increment_user_losses(&mut self, user_ids: Vec<Uuid>) -> BoxFuture<'_, StorageResult<()>> {
        ready(self.increment(user_ids, false))
    }

    fn find_user(&mut self, id: Uuid) -> BoxFuture<'_, StorageResult<Option<UserEntity>>> {
        ready(Ok(self.staged.users.get(&id).cloned()))
    }

    fn find_users(&mut self, ids: Vec<Uuid>) -> BoxFuture<'_, StorageResult<Vec<UserEntity>>> {
        let users = ids
            .iter()
            .filter_map(|id| self.staged.users.get(id).cloned())
            .collect();
        ready(Ok(users))
    }

    fn commit(self: Box<Self>) -> BoxFuture<'static, StorageResult<()>> {
        let MemoryTransaction { mut guard, staged } = *self;
        *guard = staged;
        ready(Ok(()))
    }
}
