use mongodb::error::{
    Error as MongoError, ErrorKind, TRANSIENT_TRANSACTION_ERROR, UNKNOWN_TRANSACTION_COMMIT_RESULT,
    WriteFailure,
};
use thiserror::Error;
use uuid::Uuid;

/// Result alias for MongoDB store internals.
pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

const DUPLICATE_KEY_CODE: i32 = 11000;

/// Failures of the MongoDB backend, converted into [`StorageError`](crate::dao::storage::StorageError).
#[derive(Debug, Error)]
pub enum MongoDaoError {
    /// The connection string could not be parsed.
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        /// Offending URI.
        uri: String,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// The driver refused the client options.
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// The server never answered the startup ping.
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        /// Pings sent before giving up.
        attempts: u32,
        /// Last driver error.
        #[source]
        source: MongoError,
    },
    /// Periodic ping failed.
    #[error("MongoDB ping health check failed")]
    HealthPing {
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Index creation failed at startup.
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        /// Collection name.
        collection: &'static str,
        /// Index name.
        index: &'static str,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Starting, committing or aborting a transaction failed.
    #[error("failed to {action} transaction")]
    Transaction {
        /// Step that failed, such as `start` or `commit`.
        action: &'static str,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Reading sessions failed.
    #[error("failed to load sessions")]
    LoadSession {
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Writing a session failed.
    #[error("failed to write session `{id}`")]
    SaveSession {
        /// Session id.
        id: Uuid,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Reading or writing the guesses of a session failed.
    #[error("failed to access guesses of session `{session_id}`")]
    Guesses {
        /// Owning session.
        session_id: Uuid,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Writing a single guess failed.
    #[error("failed to update guess `{id}`")]
    SaveGuess {
        /// Guess id.
        id: Uuid,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Reading or writing users failed.
    #[error("failed to access users")]
    Users {
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// A stored document does not decode into an entity.
    #[error("stored document is malformed: {reason}")]
    Malformed {
        /// What did not decode.
        reason: String,
    },
    /// The deployment cannot run multi-document transactions.
    #[error("MongoDB deployment is standalone; transactions need a replica set")]
    TransactionsUnsupported,
}

impl MongoDaoError {
    fn source_error(&self) -> Option<&MongoError> {
        match self {
            MongoDaoError::InvalidUri { source, .. }
            | MongoDaoError::ClientConstruction { source }
            | MongoDaoError::InitialPing { source, .. }
            | MongoDaoError::HealthPing { source }
            | MongoDaoError::EnsureIndex { source, .. }
            | MongoDaoError::Transaction { source, .. }
            | MongoDaoError::LoadSession { source }
            | MongoDaoError::SaveSession { source, .. }
            | MongoDaoError::Guesses { source, .. }
            | MongoDaoError::SaveGuess { source, .. }
            | MongoDaoError::Users { source } => Some(source),
            MongoDaoError::Malformed { .. } | MongoDaoError::TransactionsUnsupported => None,
        }
    }

    /// Duplicate keys and transient transaction failures mean another writer won.
    pub fn is_conflict(&self) -> bool {
        let Some(source) = self.source_error() else {
            return false;
        };
        if source.contains_label(TRANSIENT_TRANSACTION_ERROR)
            || source.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT)
        {
            return true;
        }
        matches!(
            source.kind.as_ref(),
            ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY_CODE
        )
    }
}
