use std::{sync::Arc, time::SystemTime};

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    ClientSession, Collection, Database, IndexModel,
    bson::{DateTime, Document, doc},
    options::IndexOptions,
};
use uuid::Uuid;

use super::{
    config::MongoConfig,
    error::{MongoDaoError, MongoResult},
    models::{MongoGuessDocument, MongoSessionDocument, MongoUserDocument, doc_id, to_bson_uuid},
};
use crate::dao::{
    models::{GuessEntity, SessionEntity, UserEntity},
    session_store::{SessionStore, StoreTransaction},
    storage::StorageResult,
};

const SESSION_COLLECTION_NAME: &str = "sessions";
const GUESS_COLLECTION_NAME: &str = "guesses";
const USER_COLLECTION_NAME: &str = "users";
const HOLD_COUNTER_FIELD: &str = "hold_count";

/// MongoDB-backed session store using multi-document transactions.
#[derive(Clone)]
pub struct MongoSessionStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    client: mongodb::Client,
    database: Database,
}

#[derive(Clone)]
struct Collections {
    sessions: Collection<MongoSessionDocument>,
    guesses: Collection<MongoGuessDocument>,
    users: Collection<MongoUserDocument>,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        self.database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }
}

impl MongoSessionStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) = config.open().await?;

        let store = Self {
            inner: Arc::new(MongoInner { client, database }),
        };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let collections = self.collections();

        // At most one session may be flagged active.
        let single_active = IndexModel::builder()
            .keys(doc! {"is_active": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("session_single_active_idx".to_owned()))
                    .unique(Some(true))
                    .partial_filter_expression(Some(doc! {"is_active": true}))
                    .build(),
            )
            .build();
        create_index(
            &collections.sessions,
            single_active,
            SESSION_COLLECTION_NAME,
            "is_active",
        )
        .await?;

        let token = IndexModel::builder()
            .keys(doc! {"token": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("session_token_idx".to_owned()))
                    .unique(Some(true))
                    .build(),
            )
            .build();
        create_index(&collections.sessions, token, SESSION_COLLECTION_NAME, "token").await?;

        let ended = IndexModel::builder()
            .keys(doc! {"ended_at": -1})
            .options(
                IndexOptions::builder()
                    .name(Some("session_ended_at_idx".to_owned()))
                    .build(),
            )
            .build();
        create_index(
            &collections.sessions,
            ended,
            SESSION_COLLECTION_NAME,
            "ended_at",
        )
        .await?;

        let membership = IndexModel::builder()
            .keys(doc! {"session_id": 1, "user_id": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("guess_session_user_idx".to_owned()))
                    .unique(Some(true))
                    .build(),
            )
            .build();
        create_index(
            &collections.guesses,
            membership,
            GUESS_COLLECTION_NAME,
            "session_id,user_id",
        )
        .await?;

        let username = IndexModel::builder()
            .keys(doc! {"username": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("user_username_idx".to_owned()))
                    .unique(Some(true))
                    .build(),
            )
            .build();
        create_index(&collections.users, username, USER_COLLECTION_NAME, "username").await?;

        Ok(())
    }

    fn collections(&self) -> Collections {
        let database = &self.inner.database;
        Collections {
            sessions: database.collection(SESSION_COLLECTION_NAME),
            guesses: database.collection(GUESS_COLLECTION_NAME),
            users: database.collection(USER_COLLECTION_NAME),
        }
    }

    async fn begin(&self) -> MongoResult<MongoTransaction> {
        let mut session = self
            .inner
            .client
            .start_session()
            .await
            .map_err(|source| MongoDaoError::Transaction {
                action: "start",
                source,
            })?;
        session
            .start_transaction()
            .await
            .map_err(|source| MongoDaoError::Transaction {
                action: "start",
                source,
            })?;

        Ok(MongoTransaction {
            session,
            collections: self.collections(),
        })
    }

    async fn create_user(&self, user: UserEntity) -> MongoResult<()> {
        let collections = self.collections();
        let document: MongoUserDocument = user.into();
        collections
            .users
            .insert_one(&document)
            .await
            .map_err(|source| MongoDaoError::Users { source })?;
        Ok(())
    }

    async fn find_user(&self, id: Uuid) -> MongoResult<Option<UserEntity>> {
        let collections = self.collections();
        let document = collections
            .users
            .find_one(doc_id(id))
            .await
            .map_err(|source| MongoDaoError::Users { source })?;
        Ok(document.map(Into::into))
    }

    async fn top_users(&self, limit: usize) -> MongoResult<Vec<UserEntity>> {
        let collections = self.collections();
        let documents: Vec<MongoUserDocument> = collections
            .users
            .find(doc! {})
            .sort(doc! {"wins": -1, "losses": 1, "username": 1})
            .limit(limit as i64)
            .await
            .map_err(|source| MongoDaoError::Users { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::Users { source })?;
        Ok(documents.into_iter().map(Into::into).collect())
    }
}

async fn create_index<T: Send + Sync>(
    collection: &Collection<T>,
    model: IndexModel,
    collection_name: &'static str,
    index: &'static str,
) -> MongoResult<()> {
    collection
        .create_index(model)
        .await
        .map_err(|source| MongoDaoError::EnsureIndex {
            collection: collection_name,
            index,
            source,
        })?;
    Ok(())
}

fn into_guesses(documents: Vec<MongoGuessDocument>) -> MongoResult<Vec<GuessEntity>> {
    documents.into_iter().map(GuessEntity::try_from).collect()
}

struct MongoTransaction {
    session: ClientSession,
    collections: Collections,
}

impl MongoTransaction {
    async fn find_session_matching(&mut self, filter: Document) -> MongoResult<Option<SessionEntity>> {
        let document = self
            .collections
            .sessions
            .find_one(filter)
            .session(&mut self.session)
            .await
            .map_err(|source| MongoDaoError::LoadSession { source })?;
        document.map(SessionEntity::try_from).transpose()
    }

    async fn find_last_ended_session(&mut self) -> MongoResult<Option<SessionEntity>> {
        let document = self
            .collections
            .sessions
            .find_one(doc! {"ended_at": {"$ne": null}})
            .sort(doc! {"ended_at": -1})
            .session(&mut self.session)
            .await
            .map_err(|source| MongoDaoError::LoadSession { source })?;
        document.map(SessionEntity::try_from).transpose()
    }

    async fn create_session(&mut self, session: SessionEntity) -> MongoResult<()> {
        let id = session.id;
        let document: MongoSessionDocument = session.into();
        self.collections
            .sessions
            .insert_one(&document)
            .session(&mut self.session)
            .await
            .map_err(|source| MongoDaoError::SaveSession { id, source })?;
        Ok(())
    }

    async fn end_session(
        &mut self,
        id: Uuid,
        winning_number: u8,
        ended_at: SystemTime,
    ) -> MongoResult<bool> {
        let mut filter = doc_id(id);
        filter.insert("is_active", true);
        let result = self
            .collections
            .sessions
            .update_one(
                filter,
                doc! {"$set": {
                    "is_active": false,
                    "ended_at": DateTime::from_system_time(ended_at),
                    "winning_number": i32::from(winning_number),
                }},
            )
            .session(&mut self.session)
            .await
            .map_err(|source| MongoDaoError::SaveSession { id, source })?;
        Ok(result.modified_count == 1)
    }

    async fn hold_active_session(&mut self, id: Uuid) -> MongoResult<bool> {
        let mut filter = doc_id(id);
        filter.insert("is_active", true);
        // A real write makes a concurrent end_session conflict with this transaction.
        let result = self
            .collections
            .sessions
            .update_one(filter, doc! {"$inc": {HOLD_COUNTER_FIELD: 1_i64}})
            .session(&mut self.session)
            .await
            .map_err(|source| MongoDaoError::SaveSession { id, source })?;
        Ok(result.modified_count == 1)
    }

    async fn count_guesses(&mut self, session_id: Uuid) -> MongoResult<u64> {
        self.collections
            .guesses
            .count_documents(doc! {"session_id": to_bson_uuid(session_id)})
            .session(&mut self.session)
            .await
            .map_err(|source| MongoDaoError::Guesses { session_id, source })
    }

    async fn find_guess(&mut self, session_id: Uuid, user_id: Uuid) -> MongoResult<Option<GuessEntity>> {
        let document = self
            .collections
            .guesses
            .find_one(doc! {
                "session_id": to_bson_uuid(session_id),
                "user_id": to_bson_uuid(user_id),
            })
            .session(&mut self.session)
            .await
            .map_err(|source| MongoDaoError::Guesses { session_id, source })?;
        document.map(GuessEntity::try_from).transpose()
    }

    async fn create_guess(&mut self, guess: GuessEntity) -> MongoResult<()> {
        let session_id = guess.session_id;
        let document: MongoGuessDocument = guess.into();
        self.collections
            .guesses
            .insert_one(&document)
            .session(&mut self.session)
            .await
            .map_err(|source| MongoDaoError::Guesses { session_id, source })?;
        Ok(())
    }

    async fn update_guess_selection(&mut self, guess_id: Uuid, number: u8) -> MongoResult<bool> {
        let mut filter = doc_id(guess_id);
        filter.insert("selected_number", mongodb::bson::Bson::Null);
        let result = self
            .collections
            .guesses
            .update_one(filter, doc! {"$set": {"selected_number": i32::from(number)}})
            .session(&mut self.session)
            .await
            .map_err(|source| MongoDaoError::SaveGuess { id: guess_id, source })?;
        Ok(result.modified_count == 1)
    }

    async fn find_guesses(&mut self, session_id: Uuid, filter: Document) -> MongoResult<Vec<GuessEntity>> {
        let mut cursor = self
            .collections
            .guesses
            .find(filter)
            .sort(doc! {"joined_at": 1, "_id": 1})
            .session(&mut self.session)
            .await
            .map_err(|source| MongoDaoError::Guesses { session_id, source })?;
        let documents: Vec<MongoGuessDocument> = cursor
            .stream(&mut self.session)
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::Guesses { session_id, source })?;
        into_guesses(documents)
    }

    async fn update_guess_outcome(&mut self, session_id: Uuid, winning_number: u8) -> MongoResult<u64> {
        let number = i32::from(winning_number);

        let winners = self
            .collections
            .guesses
            .update_many(
                doc! {"session_id": to_bson_uuid(session_id), "selected_number": number},
                doc! {"$set": {"is_winner": true}},
            )
            .session(&mut self.session)
            .await
            .map_err(|source| MongoDaoError::Guesses { session_id, source })?;

        // `$ne` also matches guesses that never picked a number.
        let losers = self
            .collections
            .guesses
            .update_many(
                doc! {
                    "session_id": to_bson_uuid(session_id),
                    "selected_number": {"$ne": number},
                },
                doc! {"$set": {"is_winner": false}},
            )
            .session(&mut self.session)
            .await
            .map_err(|source| MongoDaoError::Guesses { session_id, source })?;

        Ok(winners.matched_count + losers.matched_count)
    }

    async fn increment_users(&mut self, user_ids: Vec<Uuid>, field: &str) -> MongoResult<()> {
        if user_ids.is_empty() {
            return Ok(());
        }
        let ids: Vec<_> = user_ids.into_iter().map(to_bson_uuid).collect();
        self.collections
            .users
            .update_many(doc! {"_id": {"$in": ids}}, doc! {"$inc": {field: 1_i64}})
            .session(&mut self.session)
            .await
            .map_err(|source| MongoDaoError::Users { source })?;
        Ok(())
    }

    async fn find_users(&mut self, user_ids: Vec<Uuid>) -> MongoResult<Vec<UserEntity>> {
        let ids: Vec<_> = user_ids.into_iter().map(to_bson_uuid).collect();
        let mut cursor = self
            .collections
            .users
            .find(doc! {"_id": {"$in": ids}})
            .session(&mut self.session)
            .await
            .map_err(|source| MongoDaoError::Users { source })?;
        let documents: Vec<MongoUserDocument> = cursor
            .stream(&mut self.session)
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::Users { source })?;
        Ok(documents.into_iter().map(Into::into).collect())
    }

    async fn find_user(&mut self, id: Uuid) -> MongoResult<Option<UserEntity>> {
        let document = self
            .collections
            .users
            .find_one(doc_id(id))
            .session(&mut self.session)
            .await
            .map_err(|source| MongoDaoError::Users { source })?;
        Ok(document.map(Into::into))
    }

    async fn commit(mut self) -> MongoResult<()> {
        self.session
            .commit_transaction()
            .await
            .map_err(|source| MongoDaoError::Transaction {
                action: "commit",
                source,
            })
    }
}

impl SessionStore for MongoSessionStore {
    fn begin(&self) -> BoxFuture<'static, StorageResult<Box<dyn StoreTransaction>>> {
        let store = self.clone();
        Box::pin(async move {
            let tx = store.begin().await?;
            Ok(Box::new(tx) as Box<dyn StoreTransaction>)
        })
    }

    fn create_user(&self, user: UserEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.create_user(user).await.map_err(Into::into) })
    }

    fn find_user(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<UserEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_user(id).await.map_err(Into::into) })
    }

    fn top_users(&self, limit: usize) -> BoxFuture<'static, StorageResult<Vec<UserEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.top_users(limit).await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }
}

impl StoreTransaction for MongoTransaction {
    fn find_active_session(&mut self) -> BoxFuture<'_, StorageResult<Option<SessionEntity>>> {
        Box::pin(async move {
            self.find_session_matching(doc! {"is_active": true})
                .await
                .map_err(Into::into)
        })
    }

    fn find_last_ended_session(&mut self) -> BoxFuture<'_, StorageResult<Option<SessionEntity>>> {
        Box::pin(async move { self.find_last_ended_session().await.map_err(Into::into) })
    }

    fn find_session(&mut self, id: Uuid) -> BoxFuture<'_, StorageResult<Option<SessionEntity>>> {
        Box::pin(async move { self.find_session_matching(doc_id(id)).await.map_err(Into::into) })
    }

    fn find_session_by_token(
        &mut self,
        token: String,
    ) -> BoxFuture<'_, StorageResult<Option<SessionEntity>>> {
        Box::pin(async move {
            self.find_session_matching(doc! {"token": token})
                .await
                .map_err(Into::into)
        })
    }

    fn create_session(&mut self, session: SessionEntity) -> BoxFuture<'_, StorageResult<()>> {
        Box::pin(async move { self.create_session(session).await.map_err(Into::into) })
    }

    fn end_session(
        &mut self,
        id: Uuid,
        winning_number: u8,
        ended_at: SystemTime,
    ) -> BoxFuture<'_, StorageResult<bool>> {
        Box::pin(async move {
            self.end_session(id, winning_number, ended_at)
                .await
                .map_err(Into::into)
        })
    }

    fn hold_active_session(&mut self, id: Uuid) -> BoxFuture<'_, StorageResult<bool>> {
        Box::pin(async move { self.hold_active_session(id).await.map_err(Into::into) })
    }

    fn count_guesses(&mut self, session_id: Uuid) -> BoxFuture<'_, StorageResult<u64>> {
        Box::pin(async move { self.count_guesses(session_id).await.map_err(Into::into) })
    }

    fn find_guess(
        &mut self,
        session_id: Uuid,
        user_id: Uuid,
    ) -> BoxFuture<'_, StorageResult<Option<GuessEntity>>> {
        Box::pin(async move { self.find_guess(session_id, user_id).await.map_err(Into::into) })
    }

    fn create_guess(&mut self, guess: GuessEntity) -> BoxFuture<'_, StorageResult<()>> {
        Box::pin(async move { self.create_guess(guess).await.map_err(Into::into) })
    }

    fn update_guess_selection(
        &mut self,
        guess_id: Uuid,
        number: u8,
    ) -> BoxFuture<'_, StorageResult<bool>> {
        Box::pin(async move {
            self.update_guess_selection(guess_id, number)
                .await
                .map_err(Into::into)
        })
    }

    fn list_guesses(&mut self, session_id: Uuid) -> BoxFuture<'_, StorageResult<Vec<GuessEntity>>> {
        Box::pin(async move {
            self.find_guesses(session_id, doc! {"session_id": to_bson_uuid(session_id)})
                .await
                .map_err(Into::into)
        })
    }

    fn find_guesses_by_number(
        &mut self,
        session_id: Uuid,
        number: u8,
    ) -> BoxFuture<'_, StorageResult<Vec<GuessEntity>>> {
        Box::pin(async move {
            self.find_guesses(
                session_id,
                doc! {
                    "session_id": to_bson_uuid(session_id),
                    "selected_number": i32::from(number),
                },
            )
            .await
            .map_err(Into::into)
        })
    }

    fn update_guess_outcome(
        &mut self,
        session_id: Uuid,
        winning_number: u8,
    ) -> BoxFuture<'_, StorageResult<u64>> {
        Box::pin(async move {
            self.update_guess_outcome(session_id, winning_number)
                .await
                .map_err(Into::into)
        })
    }

    fn increment_user_wins(&mut self, user_ids: Vec<Uuid>) -> BoxFuture<'_, StorageResult<()>> {
        Box::pin(async move { self.increment_users(user_ids, "wins").await.map_err(Into::into) })
    }

    fn increment_user_losses(&mut self, user_ids: Vec<Uuid>) -> BoxFuture<'_, StorageResult<()>> {
        Box::pin(async move {
            self.increment_users(user_ids, "losses")
                .await
                .map_err(Into::into)
        })
    }

    fn find_user(&mut self, id: Uuid) -> BoxFuture<'_, StorageResult<Option<UserEntity>>> {
        Box::pin(async move { self.find_user(id).await.map_err(Into::into) })
    }

    fn find_users(&mut self, ids: Vec<Uuid>) -> BoxFuture<'_, StorageResult<Vec<UserEntity>>> {
        Box::pin(async move { self.find_users(ids).await.map_err(Into::into) })
    }

    fn commit(self: Box<Self>) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async move { (*self).commit().await.map_err(Into::into) })
    }
}
