//! Firebase Storage and Firestore over their REST APIs.
//!
//! Both clients share one pooled `reqwest::Client`. The bearer token is taken
//! from configuration as-is; minting or refreshing it is the deployment's job.

use super::{DocumentStore, ObjectStore};
use crate::config::StorageConfig;
use crate::error::{LiewaveError, Result};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde_json::{Map, Value, json};
use std::time::{Duration, Instant};
use tracing::debug;

/// Field set by the server on every prediction write.
const TIMESTAMP_FIELD: &str = "timestamp";

pub fn http_client(config: &StorageConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| LiewaveError::ConfigInvalidValue {
            key: "storage".to_string(),
            message: format!("Failed to build HTTP client: {e}"),
        })
}

/// Map a non-success HTTP status to the storage error taxonomy.
pub fn status_error(status: StatusCode, path: &str, body: &str) -> LiewaveError {
    match status {
        StatusCode::NOT_FOUND => LiewaveError::NotFound {
            path: path.to_string(),
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LiewaveError::AuthFailure {
            message: format!("{status} for {path}: {}", body_excerpt(body)),
        },
        _ => LiewaveError::TransientIo {
            message: format!("{status} for {path}: {}", body_excerpt(body)),
        },
    }
}

fn transport_error(e: reqwest::Error, path: &str) -> LiewaveError {
    let kind = if e.is_timeout() {
        "timed out"
    } else if e.is_connect() {
        "connection failed"
    } else {
        "request failed"
    };
    LiewaveError::TransientIo {
        message: format!("{path}: {kind}: {e}"),
    }
}

fn body_excerpt(body: &str) -> &str {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(200) {
        Some((end, _)) => &trimmed[..end],
        None => trimmed,
    }
}

fn endpoint_url(endpoint: &str, segments: &[&str]) -> Result<Url> {
    let invalid = |message: String| LiewaveError::ConfigInvalidValue {
        key: "storage.endpoint".to_string(),
        message,
    };
    let mut url = Url::parse(endpoint).map_err(|e| invalid(format!("{endpoint}: {e}")))?;
    url.path_segments_mut()
        .map_err(|()| invalid(format!("{endpoint} cannot carry a path")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Media download URL; the object path is encoded as a single segment.
pub fn download_url(endpoint: &str, bucket: &str, path: &str) -> Result<Url> {
    let mut url = endpoint_url(endpoint, &["storage", "v1", "b", bucket, "o", path])?;
    url.set_query(Some("alt=media"));
    Ok(url)
}

pub fn commit_url(endpoint: &str, project: &str, database: &str) -> Result<Url> {
    endpoint_url(
        endpoint,
        &["v1", "projects", project, "databases", database, "documents:commit"],
    )
}

/// Encode a JSON value as a Firestore typed value.
pub fn to_firestore_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => match n.as_i64() {
            // Firestore carries 64-bit integers as strings
            Some(i) => json!({ "integerValue": i.to_string() }),
            None => json!({ "doubleValue": n.as_f64() }),
        },
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => json!({
            "arrayValue": { "values": items.iter().map(to_firestore_value).collect::<Vec<_>>() }
        }),
        Value::Object(map) => json!({ "mapValue": { "fields": to_firestore_fields(map) } }),
    }
}

fn to_firestore_fields(map: &Map<String, Value>) -> Map<String, Value> {
    map.iter()
        .map(|(k, v)| (k.clone(), to_firestore_value(v)))
        .collect()
}

/// Quote a field name for an update mask unless it is a simple identifier.
fn field_path(name: &str) -> String {
    let simple = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if simple {
        name.to_string()
    } else {
        format!("`{}`", name.replace('\\', "\\\\").replace('`', "\\`"))
    }
}

/// Body of a merge write: update the given fields, leave the rest, stamp server time.
pub fn commit_body(
    project: &str,
    database: &str,
    collection: &str,
    id: &str,
    fields: &Map<String, Value>,
) -> Value {
    let name = format!("projects/{project}/databases/{database}/documents/{collection}/{id}");
    let mask: Vec<String> = fields
        .keys()
        .filter(|k| k.as_str() != TIMESTAMP_FIELD)
        .map(|k| field_path(k))
        .collect();
    let mut written = fields.clone();
    written.remove(TIMESTAMP_FIELD);

    json!({
        "writes": [{
            "update": {
                "name": name,
                "fields": to_firestore_fields(&written),
            },
            "updateMask": { "fieldPaths": mask },
            "updateTransforms": [{
                "fieldPath": TIMESTAMP_FIELD,
                "setToServerValue": "REQUEST_TIME",
            }],
        }]
    })
}

fn authorize(request: reqwest::RequestBuilder, token: Option<&str>) -> reqwest::RequestBuilder {
    match token {
        Some(token) => request.bearer_auth(token),
        None => request,
    }
}

/// Firebase Storage (Google Cloud Storage JSON API) object reader.
#[derive(Debug, Clone)]
pub struct FirebaseStorage {
    client: reqwest::Client,
    endpoint: String,
    bucket: String,
    token: Option<String>,
}

impl FirebaseStorage {
    pub fn new(client: reqwest::Client, config: &StorageConfig) -> Self {
        Self {
            client,
            endpoint: config.storage_endpoint.clone(),
            bucket: config.bucket.clone(),
            token: config.access_token.clone(),
        }
    }
}

#[async_trait]
impl ObjectStore for FirebaseStorage {
    async fn get_object(&self, path: &str) -> Result<Vec<u8>> {
        let started = Instant::now();
        let url = download_url(&self.endpoint, &self.bucket, path)?;
        let response = authorize(self.client.get(url), self.token.as_deref())
            .send()
            .await
            .map_err(|e| transport_error(e, path))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, path, &body));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error(e, path))?;
        debug!(
            "Downloaded {} bytes of gs://{}/{} in {:?}",
            bytes.len(),
            self.bucket,
            path,
            started.elapsed()
        );
        Ok(bytes.to_vec())
    }
}

/// Firestore document writer using single-write commits.
#[derive(Debug, Clone)]
pub struct Firestore {
    client: reqwest::Client,
    endpoint: String,
    project: String,
    database: String,
    token: Option<String>,
}

impl Firestore {
    pub fn new(client: reqwest::Client, config: &StorageConfig) -> Self {
        Self {
            client,
            endpoint: config.firestore_endpoint.clone(),
            project: config.project.clone(),
            database: config.database.clone(),
            token: config.access_token.clone(),
        }
    }
}

#[async_trait]
impl DocumentStore for Firestore {
    async fn upsert(&self, collection: &str, id: &str, fields: Map<String, Value>) -> Result<()> {
        let document = format!("{collection}/{id}");
        let url = commit_url(&self.endpoint, &self.project, &self.database)?;
        let body = commit_body(&self.project, &self.database, collection, id, &fields);

        let response = authorize(self.client.post(url), self.token.as_deref())
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(e, &document))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &document, &body));
        }
        debug!("Committed {} to Firestore", document);
        Ok(())
    }
}
