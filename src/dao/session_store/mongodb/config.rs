use std::time::Duration;

use mongodb::{Client, Database, bson::doc, options::ClientOptions};
use tokio::time::sleep;
use tracing::debug;

use super::error::{MongoDaoError, MongoResult};

const DEFAULT_DB: &str = "lucky_draw";
const PING_ATTEMPTS: u32 = 10;
const FIRST_RETRY_DELAY: Duration = Duration::from_millis(250);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Connection settings for the MongoDB backend.
///
/// Transactions require the target deployment to be a replica set or a sharded cluster.
#[derive(Clone)]
pub struct MongoConfig {
    /// Parsed driver options.
    pub options: ClientOptions,
    /// Database holding the collections.
    pub database_name: String,
}

impl MongoConfig {
    /// Parse `uri`; the database defaults to `lucky_draw`.
    pub async fn from_uri(uri: &str, db_name: Option<&str>) -> MongoResult<Self> {
        let options = ClientOptions::parse(uri)
            .await
            .map_err(|source| MongoDaoError::InvalidUri {
                uri: uri.to_owned(),
                source,
            })?;

        Ok(Self {
            options,
            database_name: db_name.unwrap_or(DEFAULT_DB).to_owned(),
        })
    }

    /// Build a client, wait for the server to answer and check it can run transactions.
    pub(super) async fn open(&self) -> MongoResult<(Client, Database)> {
        let client = Client::with_options(self.options.clone())
            .map_err(|source| MongoDaoError::ClientConstruction { source })?;
        let database = client.database(&self.database_name);

        let mut delay = FIRST_RETRY_DELAY;
        for attempt in 1..=PING_ATTEMPTS {
            match database.run_command(doc! { "ping": 1 }).await {
                Ok(_) => break,
                Err(source) if attempt == PING_ATTEMPTS => {
                    return Err(MongoDaoError::InitialPing {
                        attempts: attempt,
                        source,
                    });
                }
                Err(err) => {
                    debug!(attempt, error = %err, "MongoDB ping failed; retrying");
                    sleep(delay).await;
                    delay = (delay * 2).min(MAX_RETRY_DELAY);
                }
            }
        }

        let hello = database
            .run_command(doc! { "hello": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        let replica_set = hello.get_str("setName").is_ok();
        let sharded = hello.get_str("msg").is_ok_and(|msg| msg == "isdbgrid");
        if !replica_set && !sharded {
            return Err(MongoDaoError::TransactionsUnsupported);
        }

        Ok((client, database))
    }
}
