use common::EntityType;
use common::storage::ContentHash;
use sea_orm::{DatabaseConnection, DbErr, EntityTrait, PrimaryKeyTrait};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::entity::{ImageRecord, actor, director, screenshot, video};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no image of {entity} {id} matches the requested hash")]
    NotFound { entity: EntityType, id: i64 },

    #[error("record lookup failed: {0}")]
    Database(#[from] DbErr),
}

/// Maps a reference onto the origin URL it was derived from.
#[derive(Clone)]
pub struct OriginResolver {
    db: DatabaseConnection,
}

impl OriginResolver {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Find the candidate URL of `(entity, id)` whose MD5 equals `want`.
    #[instrument(skip(self, want), fields(want = %want))]
    pub async fn resolve(
        &self,
        entity: EntityType,
        id: i64,
        want: &ContentHash,
    ) -> Result<String, ResolveError> {
        let candidates = match entity {
            EntityType::Video => self.candidates::<video::Entity>(id).await?,
            EntityType::Actor => self.candidates::<actor::Entity>(id).await?,
            EntityType::Director => self.candidates::<director::Entity>(id).await?,
            EntityType::Screenshot => self.candidates::<screenshot::Entity>(id).await?,
        };
        debug!(count = candidates.len(), "loaded origin candidates");

        select_candidate(candidates.iter().map(String::as_str), want)
            .map(str::to_owned)
            .ok_or(ResolveError::NotFound { entity, id })
    }

    /// Candidate URLs of one record; empty when the record does not exist.
    async fn candidates<E>(&self, id: i64) -> Result<Vec<String>, DbErr>
    where
        E: EntityTrait,
        E::Model: ImageRecord,
        i64: Into<<E::PrimaryKey as PrimaryKeyTrait>::ValueType>,
    {
        let record = E::find_by_id(id).one(&self.db).await?;
        Ok(record
            .map(|r| r.candidate_urls().into_iter().map(str::to_owned).collect())
            .unwrap_or_default())
    }
}

/// First candidate whose URL string hashes to `want`.
pub fn select_candidate<'a>(
    candidates: impl IntoIterator<Item = &'a str>,
    want: &ContentHash,
) -> Option<&'a str> {
    candidates
        .into_iter()
        .find(|url| ContentHash::compute(url.as_bytes()) == *want)
}
