use mongodb::bson::{self, DateTime, Document, doc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::MongoDaoError;
use crate::dao::models::{GuessEntity, Selection, SessionEntity, UserEntity};

pub fn to_bson_uuid(id: Uuid) -> bson::Uuid {
    bson::Uuid::from_bytes(id.into_bytes())
}

pub fn from_bson_uuid(id: bson::Uuid) -> Uuid {
    Uuid::from_bytes(id.bytes())
}

pub fn doc_id(id: Uuid) -> Document {
    doc! {"_id": to_bson_uuid(id)}
}

fn narrow_number(value: i32, field: &str) -> Result<u8, MongoDaoError> {
    u8::try_from(value).map_err(|_| MongoDaoError::Malformed {
        reason: format!("{field} `{value}` is out of range"),
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoSessionDocument {
    #[serde(rename = "_id")]
    id: bson::Uuid,
    token: String,
    is_active: bool,
    started_at: DateTime,
    duration_secs: i64,
    ended_at: Option<DateTime>,
    winning_number: Option<i32>,
}

impl From<SessionEntity> for MongoSessionDocument {
    fn from(value: SessionEntity) -> Self {
        Self {
            id: to_bson_uuid(value.id),
            token: value.token,
            is_active: value.is_active,
            started_at: DateTime::from_system_time(value.started_at),
            duration_secs: value.duration_secs as i64,
            ended_at: value.ended_at.map(DateTime::from_system_time),
            winning_number: value.winning_number.map(i32::from),
        }
    }
}

impl TryFrom<MongoSessionDocument> for SessionEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoSessionDocument) -> Result<Self, Self::Error> {
        let winning_number = value
            .winning_number
            .map(|n| narrow_number(n, "winning_number"))
            .transpose()?;
        Ok(Self {
            id: from_bson_uuid(value.id),
            token: value.token,
            is_active: value.is_active,
            started_at: value.started_at.to_system_time(),
            duration_secs: value.duration_secs.max(0) as u64,
            ended_at: value.ended_at.map(|at| at.to_system_time()),
            winning_number,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoGuessDocument {
    #[serde(rename = "_id")]
    id: bson::Uuid,
    session_id: bson::Uuid,
    user_id: bson::Uuid,
    joined_at: DateTime,
    /// `None` while the player has only joined.
    selected_number: Option<i32>,
    is_winner: Option<bool>,
}

impl From<GuessEntity> for MongoGuessDocument {
    fn from(value: GuessEntity) -> Self {
        Self {
            id: to_bson_uuid(value.id),
            session_id: to_bson_uuid(value.session_id),
            user_id: to_bson_uuid(value.user_id),
            joined_at: DateTime::from_system_time(value.joined_at),
            selected_number: value.selection.number().map(i32::from),
            is_winner: value.is_winner,
        }
    }
}

impl TryFrom<MongoGuessDocument> for GuessEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoGuessDocument) -> Result<Self, Self::Error> {
        let selection = match value.selected_number {
            Some(number) => Selection::Selected(narrow_number(number, "selected_number")?),
            None => Selection::Unanswered,
        };
        Ok(Self {
            id: from_bson_uuid(value.id),
            session_id: from_bson_uuid(value.session_id),
            user_id: from_bson_uuid(value.user_id),
            joined_at: value.joined_at.to_system_time(),
            selection,
            is_winner: value.is_winner,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoUserDocument {
    #[serde(rename = "_id")]
    id: bson::Uuid,
    username: String,
    wins: i64,
    losses: i64,
    created_at: DateTime,
}

impl From<UserEntity> for MongoUserDocument {
    fn from(value: UserEntity) -> Self {
        Self {
            id: to_bson_uuid(value.id),
            username: value.username,
            wins: value.wins as i64,
            losses: value.losses as i64,
            created_at: DateTime::from_system_time(value.created_at),
        }
    }
}

impl From<MongoUserDocument> for UserEntity {
    fn from(value: MongoUserDocument) -> Self {
        Self {
            id: from_bson_uuid(value.id),
            username: value.username,
            wins: value.wins.max(0) as u64,
            losses: value.losses.max(0) as u64,
            created_at: value.created_at.to_system_time(),
        }
    }
}
