pub mod sqlite;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::AppError;
use crate::models::{Entry, Metadata, MetadataPatch};

pub use sqlite::SqliteStore;

/// A document as read from the backend, with the revision it was read at.
///
/// `revision` is opaque and changes on every write to the document; passing
/// it back to a conditional write makes the write fail with
/// `AppError::Conflict` if anything else wrote in between.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stored<T> {
    pub id: String,
    #[serde(skip)]
    pub revision: String,
    #[serde(flatten)]
    pub doc: T,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    async fn ping(&self) -> Result<(), AppError>;

    async fn get_metadata(&self) -> Result<Option<Stored<MetadataPatch>>, AppError>;

    /// Writes only the fields present in `patch`, creating the document if needed.
    async fn merge_metadata(&self, patch: &MetadataPatch) -> Result<(), AppError>;

    /// Replaces the document. `expected` of `None` requires that it does not
    /// exist yet; `Some(rev)` requires that it is still at `rev`.
    async fn put_metadata(&self, meta: &Metadata, expected: Option<&str>) -> Result<(), AppError>;

    async fn get_entry(&self, id: &str) -> Result<Option<Stored<Entry>>, AppError>;

    /// All entries ordered by `(date, hour)`.
    async fn list_entries_ordered(&self) -> Result<Vec<Stored<Entry>>, AppError>;

    async fn list_entries(&self) -> Result<Vec<Stored<Entry>>, AppError>;

    /// Atomically creates the entry if `id` is free, else `AppError::Duplicate`.
    async fn create_entry(&self, id: &str, entry: &Entry) -> Result<(), AppError>;

    async fn update_entry(&self, id: &str, entry: &Entry, expected: &str) -> Result<(), AppError>;

    /// Creates `to` and deletes `from` in one atomic write. Fails without
    /// touching either document if `to` exists or `from` moved past `from_revision`.
    async fn rename_entry(
        &self,
        from: &str,
        from_revision: &str,
        to: &str,
        entry: &Entry,
    ) -> Result<(), AppError>;

    async fn delete_entry(&self, id: &str) -> Result<(), AppError>;
}
