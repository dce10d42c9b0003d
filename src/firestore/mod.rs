pub mod dto;

use std::env;
use std::net::IpAddr;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::Serialize;
use tracing::debug;

use crate::error::AppError;
use crate::models::{Entry, Metadata, MetadataPatch};
use crate::store::{DocumentStore, Stored};

use dto::{Document, DocumentMask, FieldTransform, Precondition, Write};

const CREATED_AT_FIELD: &str = "createdAt";
const PAGE_SIZE: &str = "300";
const DATABASE: &str = "(default)";

#[derive(Clone, Debug)]
pub struct FirestoreConfig {
    pub base_url: String,
    pub project_id: String,
    pub api_token: Option<String>,
    /// `collection/document` path of the metadata singleton.
    pub metadata_path: String,
    pub entries_collection: String,
}

impl FirestoreConfig {
    pub fn new_from_env() -> Result<Self, AppError> {
        let project_id = env::var("FIRESTORE_PROJECT_ID").map_err(|_| {
            AppError::BackendUnavailable("FIRESTORE_PROJECT_ID is not set".to_string())
        })?;
        let base_url = env::var("FIRESTORE_BASE_URL")
            .unwrap_or_else(|_| "https://firestore.googleapis.com/v1".to_string());
        let api_token = env::var("FIRESTORE_TOKEN").ok().filter(|t| !t.is_empty());
        let metadata_path =
            env::var("METADATA_PATH").unwrap_or_else(|_| "config/metadata".to_string());
        let entries_collection =
            env::var("ENTRIES_COLLECTION").unwrap_or_else(|_| "entries".to_string());

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            project_id,
            api_token,
            metadata_path,
            entries_collection,
        })
    }
}

/// Firestore REST client speaking the subset of the v1 API the record
/// store needs. Conditional writes all go through `documents:commit` so
/// preconditions and multi-document writes are applied atomically.
pub struct FirestoreHttpClient {
    client: Client,
    config: FirestoreConfig,
}

impl FirestoreHttpClient {
    pub fn new(config: FirestoreConfig) -> Result<Self, AppError> {
        let mut builder = Client::builder();
        // The emulator is always reached directly.
        if is_loopback(&config.base_url) {
            builder = builder.no_proxy();
        }
        let client = builder.build().map_err(|e| {
            AppError::BackendUnavailable(format!("Failed to build http client: {}", e))
        })?;
        Ok(Self { client, config })
    }

    fn documents_root(&self) -> String {
        format!(
            "projects/{}/databases/{}/documents",
            self.config.project_id, DATABASE
        )
    }

    fn document_name(&self, path: &str) -> String {
        format!("{}/{}", self.documents_root(), path)
    }

    fn entry_name(&self, id: &str) -> String {
        self.document_name(&format!("{}/{}", self.config.entries_collection, id))
    }

    /// Appends `segments` to the base url, percent-encoding each one so an
    /// id can never spill into the query or a subcollection.
    fn url<I>(&self, segments: I) -> Result<Url, AppError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let base = &self.config.base_url;
        let mut url = Url::parse(base)
            .map_err(|e| AppError::Config(format!("Invalid FIRESTORE_BASE_URL {}: {}", base, e)))?;
        url.path_segments_mut()
            .map_err(|_| AppError::Config(format!("FIRESTORE_BASE_URL {} cannot be a base", base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn document_url(&self, path: &[&str]) -> Result<Url, AppError> {
        let root = [
            "projects",
            self.config.project_id.as_str(),
            "databases",
            DATABASE,
            "documents",
        ];
        self.url(root.iter().chain(path))
    }

    /// Url of a database-level RPC such as `documents:commit`.
    fn rpc_url(&self, rpc: &str) -> Result<Url, AppError> {
        let last = format!("documents:{}", rpc);
        self.url([
            "projects",
            self.config.project_id.as_str(),
            "databases",
            DATABASE,
            last.as_str(),
        ])
    }

    fn metadata_url(&self) -> Result<Url, AppError> {
        let path: Vec<&str> = self.config.metadata_path.split('/').collect();
        self.document_url(&path)
    }

    fn entry_url(&self, id: &str) -> Result<Url, AppError> {
        self.document_url(&[self.config.entries_collection.as_str(), id])
    }

    fn request(&self, method: Method, url: impl reqwest::IntoUrl) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.config.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send_json<B: Serialize>(
        &self,
        method: Method,
        url: Url,
        body: &B,
    ) -> Result<Response, AppError> {
        let response = self.request(method, url).json(body).send().await?;
        check(response).await
    }

    async fn get_document(&self, url: Url) -> Result<Option<Document>, AppError> {
        let response = self.request(Method::GET, url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check(response).await?;
        Ok(Some(response.json::<Document>().await?))
    }

    /// Posts the writes without interpreting the response status.
    async fn post_commit(&self, writes: Vec<Write>) -> Result<Response, AppError> {
        let url = self.rpc_url("commit")?;
        let response = self
            .request(Method::POST, url)
            .json(&dto::CommitRequest { writes })
            .send()
            .await?;
        Ok(response)
    }

    async fn commit(&self, writes: Vec<Write>) -> Result<(), AppError> {
        check(self.post_commit(writes).await?).await?;
        Ok(())
    }

    fn encode_entry(&self, id: &str, entry: &Entry) -> Result<Document, AppError> {
        let mut body = entry.clone();
        body.created_at = None;
        Document::encode(self.entry_name(id), &body)
    }
}

fn stored<T: serde::de::DeserializeOwned>(doc: Document) -> Result<Stored<T>, AppError> {
    let revision = doc.update_time.clone().ok_or_else(|| {
        AppError::TransientBackendFailure(format!("document {} has no updateTime", doc.name))
    })?;
    Ok(Stored {
        id: doc.id().to_string(),
        revision,
        doc: doc.decode()?,
    })
}

fn is_loopback(base_url: &str) -> bool {
    let Ok(url) = Url::parse(base_url) else {
        return false;
    };
    match url.host_str() {
        Some("localhost") => true,
        Some(host) => host
            .trim_matches(|c| c == '[' || c == ']')
            .parse::<IpAddr>()
            .is_ok_and(|ip| ip.is_loopback()),
        None => false,
    }
}

/// A non-success response, decoded from the Google error envelope.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    code: String,
    message: String,
}

impl ApiError {
    async fn read(response: Response) -> Self {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let (code, message) = match serde_json::from_str::<dto::ErrorEnvelope>(&body) {
            Ok(envelope) => (envelope.error.status, envelope.error.message),
            Err(_) => (String::new(), body),
        };
        debug!("firestore error {} {}: {}", status, code, message);
        Self {
            status,
            code,
            message,
        }
    }

    /// A `currentDocument` precondition did not hold. `ABORTED` is
    /// transaction contention and says nothing about the document.
    fn is_precondition_failure(&self) -> bool {
        matches!(self.code.as_str(), "FAILED_PRECONDITION" | "ALREADY_EXISTS")
    }
}

impl From<ApiError> for AppError {
    fn from(err: ApiError) -> Self {
        match err.code.as_str() {
            "FAILED_PRECONDITION" | "ABORTED" | "ALREADY_EXISTS" => AppError::Conflict(err.message),
            "NOT_FOUND" => AppError::NotFound,
            _ => AppError::TransientBackendFailure(format!(
                "Firestore error {}: {}",
                err.status, err.message
            )),
        }
    }
}

async fn check(response: Response) -> Result<Response, AppError> {
    if response.status().is_success() {
        return Ok(response);
    }
    Err(ApiError::read(response).await.into())
}

#[async_trait]
impl DocumentStore for FirestoreHttpClient {
    fn backend_name(&self) -> &'static str {
        "firestore"
    }

    async fn ping(&self) -> Result<(), AppError> {
        self.get_document(self.metadata_url()?).await?;
        Ok(())
    }

    async fn get_metadata(&self) -> Result<Option<Stored<MetadataPatch>>, AppError> {
        self.get_document(self.metadata_url()?)
            .await?
            .map(stored)
            .transpose()
    }

    async fn merge_metadata(&self, patch: &MetadataPatch) -> Result<(), AppError> {
        if patch.is_empty() {
            return Ok(());
        }
        let update = Document::encode(self.document_name(&self.config.metadata_path), patch)?;
        let field_paths = update.field_paths();

        self.commit(vec![Write {
            update: Some(update),
            update_mask: Some(DocumentMask { field_paths }),
            ..Default::default()
        }])
        .await
    }

    async fn put_metadata(&self, meta: &Metadata, expected: Option<&str>) -> Result<(), AppError> {
        let update = Document::encode(self.document_name(&self.config.metadata_path), meta)?;
        let precondition = match expected {
            Some(revision) => Precondition::UpdateTime(revision.to_string()),
            None => Precondition::Exists(false),
        };

        self.commit(vec![Write {
            update: Some(update),
            current_document: Some(precondition),
            ..Default::default()
        }])
        .await
        .map_err(|e| match e {
            AppError::NotFound => AppError::Conflict("metadata was removed".to_string()),
            other => other,
        })
    }

    async fn get_entry(&self, id: &str) -> Result<Option<Stored<Entry>>, AppError> {
        self.get_document(self.entry_url(id)?)
            .await?
            .map(stored)
            .transpose()
    }

    async fn list_entries_ordered(&self) -> Result<Vec<Stored<Entry>>, AppError> {
        let url = self.rpc_url("runQuery")?;
        // `hour` is stored as a string, so Firestore orders it lexically
        // ("10" before "2"). Slots run 1 to 6 per day.
        let request = dto::RunQueryRequest {
            structured_query: serde_json::json!({
                "from": [{ "collectionId": self.config.entries_collection }],
                "orderBy": [
                    { "field": { "fieldPath": "date" }, "direction": "ASCENDING" },
                    { "field": { "fieldPath": "hour" }, "direction": "ASCENDING" }
                ]
            }),
        };

        // A missing composite index surfaces as FAILED_PRECONDITION; report it
        // as a backend failure rather than a write conflict.
        let response = self
            .send_json(Method::POST, url, &request)
            .await
            .map_err(|e| AppError::TransientBackendFailure(e.to_string()))?;

        response
            .json::<Vec<dto::RunQueryResponseItem>>()
            .await?
            .into_iter()
            .filter_map(|item| item.document)
            .map(stored)
            .collect()
    }

    async fn list_entries(&self) -> Result<Vec<Stored<Entry>>, AppError> {
        let base = self.document_url(&[self.config.entries_collection.as_str()])?;
        let mut entries = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = base.clone();
            url.query_pairs_mut().append_pair("pageSize", PAGE_SIZE);
            if let Some(token) = &page_token {
                url.query_pairs_mut().append_pair("pageToken", token);
            }

            let response = check(self.request(Method::GET, url).send().await?).await?;
            let page: dto::ListDocumentsResponse = response.json().await?;

            for doc in page.documents {
                entries.push(stored(doc)?);
            }

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(entries)
    }

    async fn create_entry(&self, id: &str, entry: &Entry) -> Result<(), AppError> {
        let update = self.encode_entry(id, entry)?;

        let response = self
            .post_commit(vec![Write {
                update: Some(update),
                update_transforms: vec![FieldTransform::request_time(CREATED_AT_FIELD)],
                current_document: Some(Precondition::Exists(false)),
                ..Default::default()
            }])
            .await?;
        if response.status().is_success() {
            return Ok(());
        }

        let err = ApiError::read(response).await;
        if err.is_precondition_failure() {
            Err(AppError::Duplicate)
        } else {
            Err(err.into())
        }
    }

    async fn update_entry(&self, id: &str, entry: &Entry, expected: &str) -> Result<(), AppError> {
        let update = self.encode_entry(id, entry)?;
        // The mask leaves createdAt untouched.
        let field_paths = update.field_paths();

        self.commit(vec![Write {
            update: Some(update),
            update_mask: Some(DocumentMask { field_paths }),
            current_document: Some(Precondition::UpdateTime(expected.to_string())),
            ..Default::default()
        }])
        .await
        .map_err(|e| match e {
            AppError::NotFound => AppError::Conflict(format!("entry {} was removed", id)),
            other => other,
        })
    }

    async fn rename_entry(
        &self,
        from: &str,
        from_revision: &str,
        to: &str,
        entry: &Entry,
    ) -> Result<(), AppError> {
        let mut update = self.encode_entry(to, entry)?;
        let mut transforms = Vec::new();
        match &entry.created_at {
            Some(ts) => {
                update
                    .fields
                    .insert(CREATED_AT_FIELD.to_string(), dto::Value::TimestampValue(ts.clone()));
            }
            None => transforms.push(FieldTransform::request_time(CREATED_AT_FIELD)),
        }

        let result = self
            .commit(vec![
                Write {
                    update: Some(update),
                    update_transforms: transforms,
                    current_document: Some(Precondition::Exists(false)),
                    ..Default::default()
                },
                Write {
                    delete: Some(self.entry_name(from)),
                    current_document: Some(Precondition::UpdateTime(from_revision.to_string())),
                    ..Default::default()
                },
            ])
            .await;

        match result {
            // The commit does not say which precondition failed.
            Err(AppError::Conflict(_)) | Err(AppError::NotFound) => {
                if self.get_entry(to).await?.is_some() {
                    Err(AppError::DuplicateTarget)
                } else {
                    Err(AppError::Conflict(format!("entry {} changed concurrently", from)))
                }
            }
            other => other,
        }
    }

    async fn delete_entry(&self, id: &str) -> Result<(), AppError> {
        let url = self.entry_url(id)?;
        let response = self.request(Method::DELETE, url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check(response).await?;
        Ok(())
    }
}
