use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{Identity, MessageStore, Profile, StoreError, StoreResult};
use crate::chat::{Message, OwnerRef};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const OWNER_PERMISSION_PREFIX: &str = "update(\"user:";
const OWNER_PERMISSION_SUFFIX: &str = "\")";
const READ_ANY_PERMISSION: &str = "read(\"any\")";

/// Thin HTTP client for an Appwrite project. Session cookies set by the
/// account endpoints are kept and replayed on every later request.
#[derive(Debug, Clone)]
pub struct AppwriteClient {
    http: reqwest::Client,
    endpoint: String,
    project: String,
}

impl AppwriteClient {
    pub fn new(endpoint: &str, project: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            project: project.to_string(),
        })
    }

    pub(crate) fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.endpoint, path))
            .header("X-Appwrite-Project", &self.project)
    }

    pub(crate) async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> StoreResult<T> {
        let response = request
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| StoreError::Unavailable(format!("unexpected response body: {}", e)))
    }

    /// Create a document with a caller-chosen id. Returns false when a
    /// document with that id already exists (409).
    pub(crate) async fn send_create(&self, request: RequestBuilder) -> StoreResult<bool> {
        let response = request
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(true)
        } else if status == StatusCode::CONFLICT {
            Ok(false)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(status_error(status, &body))
        }
    }

    /// For endpoints that answer with an empty body.
    pub(crate) async fn send_empty(&self, request: RequestBuilder) -> StoreResult<()> {
        let response = request
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(status_error(status, &body))
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

fn status_error(status: StatusCode, body: &str) -> StoreError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| body.trim().to_string());

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StoreError::PermissionDenied(message),
        StatusCode::NOT_FOUND => StoreError::NotFound(message),
        _ => StoreError::Unavailable(format!("{}: {}", status, message)),
    }
}

#[derive(Debug, Deserialize)]
struct DocumentList<T> {
    documents: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct MessageDocument {
    #[serde(rename = "$id")]
    id: String,
    #[serde(rename = "$createdAt")]
    created_at: DateTime<Utc>,
    #[serde(rename = "$permissions", default)]
    permissions: Vec<String>,
    #[serde(default)]
    text: String,
}

impl From<MessageDocument> for Message {
    fn from(document: MessageDocument) -> Self {
        let owner = owner_from_permissions(&document.permissions);
        Message::confirmed(document.id, document.text, document.created_at, owner)
    }
}

#[derive(Debug, Deserialize)]
struct AccountDocument {
    #[serde(default)]
    username: String,
}

fn owner_permission(owner: &OwnerRef) -> String {
    format!("{}{}{}", OWNER_PERMISSION_PREFIX, owner, OWNER_PERMISSION_SUFFIX)
}

/// Messages carry no author field; the author is whoever was granted
/// `update("user:<id>")` when the document was created.
pub fn owner_from_permissions(permissions: &[String]) -> Option<OwnerRef> {
    permissions.iter().find_map(|permission| {
        permission
            .strip_prefix(OWNER_PERMISSION_PREFIX)?
            .strip_suffix(OWNER_PERMISSION_SUFFIX)
            .filter(|id| !id.is_empty())
            .map(OwnerRef::new)
    })
}

/// Newest `limit` messages first.
fn list_queries(limit: usize) -> Vec<String> {
    vec![
        json!({ "method": "orderDesc", "attribute": "$createdAt" }).to_string(),
        json!({ "method": "limit", "values": [limit] }).to_string(),
    ]
}

fn message_body(text: &str, owner: &OwnerRef) -> serde_json::Value {
    json!({
        "documentId": "unique()",
        "data": { "text": text },
        "permissions": [READ_ANY_PERMISSION, owner_permission(owner)],
    })
}

fn profile_from_document(owner: &OwnerRef, account: AccountDocument) -> StoreResult<Profile> {
    let display_name = account.username.trim().to_string();
    if display_name.is_empty() {
        return Err(StoreError::NotFound(format!("profile {} has no username", owner)));
    }
    Ok(Profile { display_name })
}

/// Name, else email, else `Anonymous_<id>`.
fn account_username(identity: &Identity) -> String {
    identity
        .name
        .clone()
        .or_else(|| identity.email.clone())
        .unwrap_or_else(|| format!("Anonymous_{}", identity.user_id))
}

/// The profile document is keyed by the user id. Anyone may read it, only
/// its user may change or remove it.
fn account_body(identity: &Identity) -> serde_json::Value {
    let user = &identity.user_id;
    json!({
        "documentId": user.as_str(),
        "data": { "username": account_username(identity) },
        "permissions": [
            READ_ANY_PERMISSION,
            owner_permission(user),
            format!("delete(\"user:{}\")", user),
        ],
    })
}

/// Message store over the Appwrite document database.
pub struct AppwriteStore {
    client: AppwriteClient,
    database: String,
    messages_collection: String,
    accounts_collection: String,
}

impl AppwriteStore {
    pub fn new(
        client: AppwriteClient,
        database: &str,
        messages_collection: &str,
        accounts_collection: &str,
    ) -> Self {
        Self {
            client,
            database: database.to_string(),
            messages_collection: messages_collection.to_string(),
            accounts_collection: accounts_collection.to_string(),
        }
    }

    fn documents_path(&self, collection: &str) -> String {
        format!(
            "/databases/{}/collections/{}/documents",
            self.database, collection
        )
    }

    /// Make sure the signed-in user has a profile document so other members
    /// see their name. Returns true if it had to be created.
    pub async fn ensure_profile(&self, identity: &Identity) -> StoreResult<bool> {
        let request = self
            .client
            .request(Method::POST, &self.documents_path(&self.accounts_collection))
            .json(&account_body(identity));

        self.client.send_create(request).await
    }
}

#[async_trait]
impl MessageStore for AppwriteStore {
    async fn list_recent(&self, limit: usize) -> StoreResult<Vec<Message>> {
        let queries = list_queries(limit);
        let query_params: Vec<(&str, &str)> =
            queries.iter().map(|q| ("queries[]", q.as_str())).collect();

        let request = self
            .client
            .request(Method::GET, &self.documents_path(&self.messages_collection))
            .query(&query_params);

        let list: DocumentList<MessageDocument> = self.client.send_json(request).await?;
        Ok(list.documents.into_iter().map(Message::from).collect())
    }

    async fn append(&self, text: &str, owner: &OwnerRef) -> StoreResult<Message> {
        let request = self
            .client
            .request(Method::POST, &self.documents_path(&self.messages_collection))
            .json(&message_body(text, owner));

        let document: MessageDocument = self.client.send_json(request).await?;
        Ok(document.into())
    }

    async fn get_profile(&self, owner: &OwnerRef) -> StoreResult<Profile> {
        let path = format!(
            "{}/{}",
            self.documents_path(&self.accounts_collection),
            owner
        );
        let request = self.client.request(Method::GET, &path);

        let account: AccountDocument = self.client.send_json(request).await?;
        profile_from_document(owner, account)
    }
}
