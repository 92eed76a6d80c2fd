use crate::portal_entities::{
    MammographyRecord, MammographyStudyEntity, NewUser, SavedImageIds, UserEntity,
};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    DatabaseError(String),

    #[error("Record already exists")]
    AlreadyExists,

    #[error("Entity extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),
}

pub fn current_time() -> chrono::NaiveDateTime {
    chrono::Local::now().naive_local()
}

#[async_trait]
pub trait DbProvider: Send + Sync {
    /// Create the portal tables when they do not exist yet.
    async fn ensure_schema(&self) -> Result<(), DbError>;

    /// Insert the directory row for a Firebase user. When `healthcenter` is given a new
    /// healthcenter row (not authorized) is created and linked in the same transaction.
    async fn register_user(
        &self,
        user: &NewUser,
        healthcenter: Option<&str>,
    ) -> Result<UserEntity, DbError>;

    async fn get_user_by_uid(&self, uid: &str) -> Result<Option<UserEntity>, DbError>;

    async fn delete_user_by_uid(&self, uid: &str) -> Result<bool, DbError>;

    async fn save_mammography_record(
        &self,
        record: &MammographyRecord,
    ) -> Result<SavedImageIds, DbError>;

    async fn get_study(
        &self,
        study_instance_uid: &str,
    ) -> Result<Option<MammographyStudyEntity>, DbError>;

    /// Series and images go with the study through `ON DELETE CASCADE`.
    async fn delete_study(&self, study_instance_uid: &str) -> Result<bool, DbError>;
}
