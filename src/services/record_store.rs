use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::error::AppError;
use crate::models::{
    Course, Entry, EntryPatch, Metadata, MetadataPatch, course_id, is_entry_id, seed,
};
use crate::store::{DocumentStore, Stored};

#[derive(Clone, Debug)]
pub struct RecordStoreOptions {
    /// Seed demo content from `ensure_defaults` when the store is empty.
    pub seed_examples: bool,
    /// How many times a read-validate-write is retried after losing a race.
    pub max_write_attempts: usize,
}

impl Default for RecordStoreOptions {
    fn default() -> Self {
        Self {
            seed_examples: false,
            max_write_attempts: 5,
        }
    }
}

/// Facade between the class-record UI and the document backend.
///
/// Reads degrade to empty values when the backend fails. Writes return
/// `AppError` and never partially apply: every read-validate-write runs as a
/// conditional write against the revision it read, retried on conflict.
#[derive(Clone)]
pub struct RecordStore {
    store: Arc<dyn DocumentStore>,
    options: RecordStoreOptions,
}

impl RecordStore {
    pub fn new(store: Arc<dyn DocumentStore>, options: RecordStoreOptions) -> Self {
        Self { store, options }
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    pub async fn ping(&self) -> Result<(), AppError> {
        self.store.ping().await
    }

    pub async fn load_metadata(&self) -> Metadata {
        match self.store.get_metadata().await {
            Ok(Some(stored)) => Metadata::from(stored.doc),
            Ok(None) => Metadata::default(),
            Err(e) => {
                error!("Failed to load metadata: {}", e);
                Metadata::default()
            }
        }
    }

    pub async fn save_metadata(&self, patch: MetadataPatch) -> Result<(), AppError> {
        self.store
            .merge_metadata(&patch)
            .await
            .inspect_err(|e| log_failure("save_metadata", e))
    }

    pub async fn list_entries(&self) -> Vec<Stored<Entry>> {
        match self.store.list_entries_ordered().await {
            Ok(entries) => return entries,
            Err(e) => warn!("Ordered entry query failed, falling back to full scan: {}", e),
        }

        self.store.list_entries().await.unwrap_or_else(|e| {
            error!("Failed to list entries: {}", e);
            Vec::new()
        })
    }

    /// Creates the entry under its deterministic id. At most one entry can
    /// exist per course, date and hour.
    pub async fn add_entry(&self, mut entry: Entry) -> Result<String, AppError> {
        let id = entry.id()?;
        entry.created_at = None;

        self.store
            .create_entry(&id, &entry)
            .await
            .inspect_err(|e| log_failure("add_entry", e))?;

        info!("Added entry {}", id);
        Ok(id)
    }

    /// Applies `patch` and returns the entry's id, which changes when the
    /// patch moves it to another course, date or hour.
    pub async fn update_entry(&self, id: &str, patch: EntryPatch) -> Result<String, AppError> {
        check_id(id)?;
        let patch = &patch;

        self.retry_on_conflict("update_entry", || async move {
            let current = self.store.get_entry(id).await?.ok_or(AppError::NotFound)?;
            if current.doc.locked {
                return Err(AppError::Locked);
            }

            let next = current.doc.merged(patch);
            let target = if next.natural_key() == current.doc.natural_key() {
                id.to_string()
            } else {
                next.id()?
            };

            if target == id {
                self.store.update_entry(id, &next, &current.revision).await?;
            } else {
                self.store
                    .rename_entry(id, &current.revision, &target, &next)
                    .await?;
                info!("Moved entry {} to {}", id, target);
            }
            Ok::<_, AppError>(target)
        })
        .await
    }

    pub async fn delete_entry_by_id(&self, id: &str) -> Result<(), AppError> {
        match check_id(id) {
            Err(AppError::NotFound) => return Ok(()),
            other => other?,
        }
        self.store
            .delete_entry(id)
            .await
            .inspect_err(|e| log_failure("delete_entry_by_id", e))
    }

    /// Flips the lock flag and returns the new value.
    pub async fn toggle_lock_entry(&self, id: &str) -> Result<bool, AppError> {
        check_id(id)?;

        self.retry_on_conflict("toggle_lock_entry", || async move {
            let current = self.store.get_entry(id).await?.ok_or(AppError::NotFound)?;
            let mut next = current.doc.clone();
            next.locked = !next.locked;
            self.store.update_entry(id, &next, &current.revision).await?;
            Ok::<_, AppError>(next.locked)
        })
        .await
    }

    pub async fn get_students_for_course(&self, course_id: &str) -> Vec<String> {
        self.load_metadata()
            .await
            .find_course(course_id)
            .map(|course| course.students.clone())
            .unwrap_or_default()
    }

    pub async fn add_course(&self, name: &str, students: Vec<String>) -> Result<String, AppError> {
        let id = course_id(name)?;
        let name = name.trim();

        self.mutate_metadata("add_course", false, |meta| {
            if meta.find_course(&id).is_some() {
                return Err(AppError::Exists);
            }
            meta.courses
                .push(Course::new(id.clone(), name.to_string(), students.clone()));
            Ok(())
        })
        .await?;

        info!("Added course {}", id);
        Ok(id)
    }

    pub async fn update_course_students(
        &self,
        id: &str,
        students: Vec<String>,
    ) -> Result<(), AppError> {
        self.mutate_metadata("update_course_students", false, |meta| {
            let course = meta.find_course_mut(id).ok_or(AppError::NotFound)?;
            course.students = students.clone();
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Removes the course if present. Entries recorded for it are kept.
    pub async fn delete_course(&self, id: &str) -> Result<(), AppError> {
        let (_, changed) = self
            .mutate_metadata("delete_course", false, |meta| {
                meta.courses.retain(|c| c.id != id);
                Ok(())
            })
            .await?;
        if changed {
            info!("Deleted course {}", id);
        }
        Ok(())
    }

    /// Repairs the metadata document: every field present and every
    /// timetable on the weekday grid. Optionally seeds demo content into an
    /// empty store. Returns whether anything was written.
    pub async fn ensure_defaults(&self) -> Result<bool, AppError> {
        let may_seed = self.options.seed_examples
            && self
                .store
                .list_entries()
                .await
                .inspect_err(|e| log_failure("ensure_defaults", e))?
                .is_empty();

        // The sample entry is written after the metadata, so it is retried on
        // its own while the entries are still empty and the example course exists.
        let (seed_entry, changed) = self
            .mutate_metadata("ensure_defaults", true, |meta| {
                if may_seed && meta.is_empty() {
                    *meta = seed::example_metadata();
                }
                meta.normalize_timetables();
                Ok(may_seed && meta.find_course(seed::EXAMPLE_COURSE).is_some())
            })
            .await?;

        if seed_entry {
            let today = chrono::Local::now().format("%Y-%m-%d").to_string();
            match self.add_entry(seed::example_entry(&today)).await {
                Ok(_) | Err(AppError::Duplicate) => {}
                Err(e) => return Err(e),
            }
            info!("Seeded example data");
        }

        Ok(changed || seed_entry)
    }

    /// Read-modify-write of the metadata document under its revision.
    /// Nothing is written when `f` leaves the document unchanged, unless
    /// `repair` is set and the stored document is missing fields.
    async fn mutate_metadata<R, F>(
        &self,
        op: &str,
        repair: bool,
        mut f: F,
    ) -> Result<(R, bool), AppError>
    where
        F: FnMut(&mut Metadata) -> Result<R, AppError>,
    {
        for attempt in 1..=self.options.max_write_attempts {
            let stored = self
                .store
                .get_metadata()
                .await
                .inspect_err(|e| log_failure(op, e))?;

            let (mut meta, revision, complete) = match stored {
                Some(stored) => {
                    let complete = stored.doc.is_complete();
                    (Metadata::from(stored.doc), Some(stored.revision), complete)
                }
                None => (Metadata::default(), None, false),
            };

            let before = meta.clone();
            let out = f(&mut meta).inspect_err(|e| log_failure(op, e))?;
            if meta == before && (complete || !repair) {
                return Ok((out, false));
            }

            match self.store.put_metadata(&meta, revision.as_deref()).await {
                Ok(()) => return Ok((out, true)),
                Err(e) if e.is_conflict() => {
                    warn!("{}: metadata changed concurrently (attempt {})", op, attempt);
                }
                Err(e) => {
                    log_failure(op, &e);
                    return Err(e);
                }
            }
        }

        Err(self.exhausted(op))
    }

    async fn retry_on_conflict<T, F, Fut>(&self, op: &str, mut attempt_once: F) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        for attempt in 1..=self.options.max_write_attempts {
            match attempt_once().await {
                Err(e) if e.is_conflict() => {
                    warn!("{}: lost a concurrent write (attempt {})", op, attempt);
                }
                Err(e) => {
                    log_failure(op, &e);
                    return Err(e);
                }
                ok => return ok,
            }
        }

        Err(self.exhausted(op))
    }

    fn exhausted(&self, op: &str) -> AppError {
        let err = AppError::TransientBackendFailure(format!(
            "{} gave up after {} concurrent modifications",
            op, self.options.max_write_attempts
        ));
        error!("{}", err);
        err
    }
}

/// Ids `entry_id` could never produce name no entry.
fn check_id(id: &str) -> Result<(), AppError> {
    if id.trim().is_empty() {
        return Err(AppError::MissingArgument("id"));
    }
    if !is_entry_id(id) {
        debug!("rejecting malformed entry id {:?}", id);
        return Err(AppError::NotFound);
    }
    Ok(())
}

fn log_failure(op: &str, err: &AppError) {
    match err {
        AppError::Database(_)
        | AppError::Migrate(_)
        | AppError::Http(_)
        | AppError::Serialization(_)
        | AppError::BackendUnavailable(_)
        | AppError::TransientBackendFailure(_) => error!("{} failed: {}", op, err),
        _ => debug!("{} rejected: {}", op, err),
    }
}
