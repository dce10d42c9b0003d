use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use tracing::info;

use crate::error::AppError;
use crate::models::{Entry, Metadata, MetadataPatch};
use crate::store::{DocumentStore, Stored};

const METADATA_ID: &str = "metadata";

/// Local document store keeping each document as a JSON body next to a
/// revision counter.
#[derive(Clone)]
pub struct SqliteStore {
    db: SqlitePool,
}

#[derive(Debug, FromRow)]
struct EntryRow {
    id: String,
    body: String,
    revision: i64,
    created_at: String,
}

impl EntryRow {
    fn into_stored(self) -> Result<Stored<Entry>, AppError> {
        let mut doc: Entry = serde_json::from_str(&self.body)?;
        doc.created_at = Some(self.created_at);
        Ok(Stored {
            id: self.id,
            revision: self.revision.to_string(),
            doc,
        })
    }
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> Result<Self, AppError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        info!("connected to sqlite at {}", database_url);
        Self::new(pool).await
    }

    /// A private database that lives as long as the store. The pool is pinned
    /// to a single connection since every in-memory connection is its own database.
    pub async fn in_memory() -> Result<Self, AppError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::new(pool).await
    }

    pub async fn new(pool: SqlitePool) -> Result<Self, AppError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { db: pool })
    }

    fn select_entries(order: &str) -> String {
        format!("SELECT id, body, revision, created_at FROM entries {}", order)
    }
}

fn parse_revision(revision: &str) -> Result<i64, AppError> {
    revision
        .parse::<i64>()
        .map_err(|_| AppError::Conflict(format!("unknown revision {}", revision)))
}

fn entry_body(entry: &Entry) -> Result<String, AppError> {
    let mut doc = entry.clone();
    doc.created_at = None;
    Ok(serde_json::to_string(&doc)?)
}

#[async_trait]
impl DocumentStore for SqliteStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("select 1").execute(&self.db).await?;
        Ok(())
    }

    async fn get_metadata(&self) -> Result<Option<Stored<MetadataPatch>>, AppError> {
        let row = sqlx::query_as::<_, (String, i64)>(
            "SELECT body, revision FROM metadata WHERE id = ?",
        )
        .bind(METADATA_ID)
        .fetch_optional(&self.db)
        .await?;

        match row {
            Some((body, revision)) => Ok(Some(Stored {
                id: METADATA_ID.to_string(),
                revision: revision.to_string(),
                doc: serde_json::from_str(&body)?,
            })),
            None => Ok(None),
        }
    }

    async fn merge_metadata(&self, patch: &MetadataPatch) -> Result<(), AppError> {
        let body = serde_json::to_string(patch)?;
        let now = Utc::now().to_rfc3339();

        // json_patch replaces top-level keys wholesale, which is exactly a
        // field-level merge for this document.
        sqlx::query(
            r#"
            INSERT INTO metadata (id, body, revision, updated_at)
            VALUES (?1, ?2, 1, ?3)
            ON CONFLICT(id) DO UPDATE SET
                body = json_patch(metadata.body, excluded.body),
                revision = metadata.revision + 1,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(METADATA_ID)
        .bind(body)
        .bind(now)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn put_metadata(&self, meta: &Metadata, expected: Option<&str>) -> Result<(), AppError> {
        let body = serde_json::to_string(meta)?;
        let now = Utc::now().to_rfc3339();

        let affected = match expected {
            None => sqlx::query(
                "INSERT INTO metadata (id, body, revision, updated_at) VALUES (?, ?, 1, ?) ON CONFLICT(id) DO NOTHING",
            )
            .bind(METADATA_ID)
            .bind(body)
            .bind(now)
            .execute(&self.db)
            .await?
            .rows_affected(),
            Some(revision) => sqlx::query(
                "UPDATE metadata SET body = ?, revision = revision + 1, updated_at = ? WHERE id = ? AND revision = ?",
            )
            .bind(body)
            .bind(now)
            .bind(METADATA_ID)
            .bind(parse_revision(revision)?)
            .execute(&self.db)
            .await?
            .rows_affected(),
        };

        if affected == 0 {
            return Err(AppError::Conflict("metadata changed concurrently".to_string()));
        }
        Ok(())
    }

    async fn get_entry(&self, id: &str) -> Result<Option<Stored<Entry>>, AppError> {
        sqlx::query_as::<_, EntryRow>(&Self::select_entries("WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .map(EntryRow::into_stored)
            .transpose()
    }

    async fn list_entries_ordered(&self) -> Result<Vec<Stored<Entry>>, AppError> {
        // Numeric hours sort numerically ("2" before "10"); anything else casts to 0.
        sqlx::query_as::<_, EntryRow>(&Self::select_entries(
            "ORDER BY date ASC, CAST(hour AS INTEGER) ASC, hour ASC",
        ))
            .fetch_all(&self.db)
            .await?
            .into_iter()
            .map(EntryRow::into_stored)
            .collect()
    }

    async fn list_entries(&self) -> Result<Vec<Stored<Entry>>, AppError> {
        sqlx::query_as::<_, EntryRow>(&Self::select_entries(""))
            .fetch_all(&self.db)
            .await?
            .into_iter()
            .map(EntryRow::into_stored)
            .collect()
    }

    async fn create_entry(&self, id: &str, entry: &Entry) -> Result<(), AppError> {
        let now = Utc::now().to_rfc3339();

        let affected = sqlx::query(
            r#"
            INSERT INTO entries (id, course, date, hour, body, revision, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(&entry.course)
        .bind(&entry.date)
        .bind(&entry.hour)
        .bind(entry_body(entry)?)
        .bind(now)
        .execute(&self.db)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(AppError::Duplicate);
        }
        Ok(())
    }

    async fn update_entry(&self, id: &str, entry: &Entry, expected: &str) -> Result<(), AppError> {
        let now = Utc::now().to_rfc3339();

        let affected = sqlx::query(
            r#"
            UPDATE entries
            SET course = ?1,
                date = ?2,
                hour = ?3,
                body = ?4,
                revision = revision + 1,
                updated_at = ?5
            WHERE id = ?6 AND revision = ?7
            "#,
        )
        .bind(&entry.course)
        .bind(&entry.date)
        .bind(&entry.hour)
        .bind(entry_body(entry)?)
        .bind(now)
        .bind(id)
        .bind(parse_revision(expected)?)
        .execute(&self.db)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(AppError::Conflict(format!("entry {} changed concurrently", id)));
        }
        Ok(())
    }

    async fn rename_entry(
        &self,
        from: &str,
        from_revision: &str,
        to: &str,
        entry: &Entry,
    ) -> Result<(), AppError> {
        let expected = parse_revision(from_revision)?;
        let now = Utc::now().to_rfc3339();
        let created_at = entry.created_at.clone().unwrap_or_else(|| now.clone());

        // Dropping the transaction without commit rolls both writes back.
        let mut tx = self.db.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO entries (id, course, date, hour, body, revision, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?7)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(to)
        .bind(&entry.course)
        .bind(&entry.date)
        .bind(&entry.hour)
        .bind(entry_body(entry)?)
        .bind(created_at)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            return Err(AppError::DuplicateTarget);
        }

        let deleted = sqlx::query("DELETE FROM entries WHERE id = ? AND revision = ?")
            .bind(from)
            .bind(expected)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if deleted == 0 {
            return Err(AppError::Conflict(format!("entry {} changed concurrently", from)));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_entry(&self, id: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM entries WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Course;

    async fn setup_test_store() -> SqliteStore {
        SqliteStore::in_memory()
            .await
            .expect("Failed to create test store")
    }

    fn lesson(course: &str, date: &str, hour: &str) -> Entry {
        Entry {
            course: course.to_string(),
            date: date.to_string(),
            hour: hour.to_string(),
            content: "Lezione".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_and_get_entry() {
        let store = setup_test_store().await;

        store
            .create_entry("3A__2024-05-01__1", &lesson("3A", "2024-05-01", "1"))
            .await
            .expect("Failed to create entry");

        let stored = store
            .get_entry("3A__2024-05-01__1")
            .await
            .expect("Failed to get entry")
            .expect("Entry not found");
        assert_eq!(stored.doc.content, "Lezione");
        assert_eq!(stored.revision, "1");
        assert!(stored.doc.created_at.is_some());

        assert!(store.get_entry("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_twice_is_duplicate() {
        let store = setup_test_store().await;
        let first = lesson("3A", "2024-05-01", "1");
        store.create_entry("k", &first).await.unwrap();

        let mut second = first.clone();
        second.content = "Other".to_string();
        let result = store.create_entry("k", &second).await;
        assert!(matches!(result, Err(AppError::Duplicate)));

        let stored = store.get_entry("k").await.unwrap().unwrap();
        assert_eq!(stored.doc.content, "Lezione");
    }

    #[tokio::test]
    async fn test_update_with_stale_revision_conflicts() {
        let store = setup_test_store().await;
        store.create_entry("k", &lesson("3A", "2024-05-01", "1")).await.unwrap();
        let stored = store.get_entry("k").await.unwrap().unwrap();

        let mut next = stored.doc.clone();
        next.content = "v2".to_string();
        store.update_entry("k", &next, &stored.revision).await.unwrap();

        next.content = "v3".to_string();
        let result = store.update_entry("k", &next, &stored.revision).await;
        assert!(matches!(result, Err(AppError::Conflict(_))));

        let current = store.get_entry("k").await.unwrap().unwrap();
        assert_eq!(current.doc.content, "v2");
        assert_eq!(current.revision, "2");
    }

    #[tokio::test]
    async fn test_rename_onto_existing_leaves_both() {
        let store = setup_test_store().await;
        store.create_entry("a", &lesson("3A", "2024-05-01", "1")).await.unwrap();
        store.create_entry("b", &lesson("3A", "2024-05-01", "2")).await.unwrap();
        let a = store.get_entry("a").await.unwrap().unwrap();

        let result = store
            .rename_entry("a", &a.revision, "b", &lesson("3A", "2024-05-01", "2"))
            .await;
        assert!(matches!(result, Err(AppError::DuplicateTarget)));

        assert_eq!(store.get_entry("a").await.unwrap().unwrap().doc.hour, "1");
        assert_eq!(store.get_entry("b").await.unwrap().unwrap().doc.hour, "2");
    }

    #[tokio::test]
    async fn test_rename_with_stale_source_rolls_back() {
        let store = setup_test_store().await;
        store.create_entry("a", &lesson("3A", "2024-05-01", "1")).await.unwrap();

        let result = store
            .rename_entry("a", "99", "c", &lesson("3A", "2024-05-01", "3"))
            .await;
        assert!(matches!(result, Err(AppError::Conflict(_))));

        assert!(store.get_entry("a").await.unwrap().is_some());
        assert!(store.get_entry("c").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rename_preserves_created_at() {
        let store = setup_test_store().await;
        store.create_entry("a", &lesson("3A", "2024-05-01", "1")).await.unwrap();
        let a = store.get_entry("a").await.unwrap().unwrap();

        let mut moved = a.doc.clone();
        moved.hour = "4".to_string();
        store.rename_entry("a", &a.revision, "d", &moved).await.unwrap();

        assert!(store.get_entry("a").await.unwrap().is_none());
        let d = store.get_entry("d").await.unwrap().unwrap();
        assert_eq!(d.doc.hour, "4");
        assert_eq!(d.doc.created_at, a.doc.created_at);
    }

    #[tokio::test]
    async fn test_ordered_listing() {
        let store = setup_test_store().await;
        store.create_entry("x", &lesson("3A", "2024-05-02", "1")).await.unwrap();
        store.create_entry("y", &lesson("3A", "2024-05-01", "2")).await.unwrap();
        store.create_entry("z", &lesson("3A", "2024-05-01", "1")).await.unwrap();

        let ids: Vec<String> = store
            .list_entries_ordered()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["z", "y", "x"]);
        assert_eq!(store.list_entries().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_merge_metadata_keeps_other_fields() {
        let store = setup_test_store().await;
        store
            .merge_metadata(&MetadataPatch {
                subjects: Some(vec!["Storia".to_string()]),
                teachers: Some(vec!["Verdi".to_string()]),
                ..Default::default()
            })
            .await
            .unwrap();
        store
            .merge_metadata(&MetadataPatch {
                subjects: Some(vec!["Latino".to_string()]),
                ..Default::default()
            })
            .await
            .unwrap();

        let stored = store.get_metadata().await.unwrap().unwrap();
        assert_eq!(stored.doc.subjects, Some(vec!["Latino".to_string()]));
        assert_eq!(stored.doc.teachers, Some(vec!["Verdi".to_string()]));
        assert_eq!(stored.doc.courses, None);
        assert_eq!(stored.revision, "2");
    }

    #[tokio::test]
    async fn test_put_metadata_preconditions() {
        let store = setup_test_store().await;
        let meta = Metadata {
            courses: vec![Course::new("3A".to_string(), "3A".to_string(), vec![])],
            ..Default::default()
        };

        store.put_metadata(&meta, None).await.unwrap();
        let again = store.put_metadata(&meta, None).await;
        assert!(matches!(again, Err(AppError::Conflict(_))));

        let stored = store.get_metadata().await.unwrap().unwrap();
        store.put_metadata(&meta, Some(&stored.revision)).await.unwrap();
        let stale = store.put_metadata(&meta, Some(&stored.revision)).await;
        assert!(matches!(stale, Err(AppError::Conflict(_))));
    }
}
