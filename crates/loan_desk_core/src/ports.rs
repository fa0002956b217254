//! crates/loan_desk_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the loan desk's core logic.
//! These traits form the boundary of the hexagonal architecture: identity,
//! document storage, object storage and the chat decision backend are all
//! external collaborators reached through them.

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::pin::Pin;
use tokio::sync::watch;
use uuid::Uuid;

use crate::domain::{AuthSession, AuthUser, ChatId};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Document Addressing
//=========================================================================================

/// Slash-separated location of one document, always scoped under its owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentPath(String);

impl DocumentPath {
    /// `users/{uid}`
    pub fn profile(user_id: Uuid) -> Self {
        Self(format!("users/{user_id}"))
    }

    /// `users/{uid}/chatHistory/{chatId}`
    pub fn chat(user_id: Uuid, chat_id: &ChatId) -> Self {
        Self(format!("{}/{chat_id}", CollectionPath::chats(user_id)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The last path segment.
    pub fn id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Everything before the last segment.
    pub fn collection(&self) -> &str {
        self.0.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Location of a set of sibling documents.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionPath(String);

impl CollectionPath {
    /// `users/{uid}/chatHistory`
    pub fn chats(user_id: Uuid) -> Self {
        Self(format!("users/{user_id}/chatHistory"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether a raw document path is a direct child of this collection.
    pub fn contains(&self, document_path: &str) -> bool {
        document_path
            .rsplit_once('/')
            .is_some_and(|(parent, _)| parent == self.0)
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

//=========================================================================================
// Document Store Types
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// The written object becomes the whole document.
    Replace,
    /// Top-level fields are merged into the existing document (created if missing).
    Merge,
}

/// Ordering for collection queries. Documents lacking the field sort last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

impl OrderBy {
    pub fn descending(field: &str) -> Self {
        Self {
            field: field.to_string(),
            descending: true,
        }
    }
}

/// State of one document at the time of an event. `data` is `None` when the
/// document does not exist.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    pub path: DocumentPath,
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CollectionSnapshot {
    pub documents: Vec<StoredDocument>,
}

/// A live subscription. The first item is the current state; every later item
/// follows a change. Dropping the stream ends the subscription.
pub type SnapshotStream<T> = Pin<Box<dyn Stream<Item = PortResult<T>> + Send>>;

//=========================================================================================
// Chat Backend Types
//=========================================================================================

/// Body of `POST {API_URL}/chat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    pub user_id: String,
    pub chat_id: String,
}

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn current_user(&self) -> Option<AuthUser>;

    /// Auth-state changes, starting from the current state.
    fn watch(&self) -> watch::Receiver<Option<AuthUser>>;

    async fn sign_up(&self, email: &str, password: &str) -> PortResult<AuthSession>;

    async fn sign_in(&self, email: &str, password: &str) -> PortResult<AuthSession>;

    /// Re-establishes a previously issued session.
    async fn resume(&self, session_id: &str) -> PortResult<AuthUser>;

    async fn sign_out(&self) -> PortResult<()>;
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, path: &DocumentPath) -> PortResult<Option<Value>>;

    async fn set(&self, path: &DocumentPath, data: Value, mode: WriteMode) -> PortResult<()>;

    /// Adds `items` to the list at `field` with set-union semantics and merges
    /// `fields` into the same document, atomically.
    async fn append_to_list(
        &self,
        path: &DocumentPath,
        field: &str,
        items: Vec<Value>,
        fields: Value,
    ) -> PortResult<()>;

    async fn subscribe(&self, path: &DocumentPath) -> PortResult<SnapshotStream<DocumentSnapshot>>;

    async fn subscribe_collection(
        &self,
        path: &CollectionPath,
        order: OrderBy,
    ) -> PortResult<SnapshotStream<CollectionSnapshot>>;
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores `data` at `path` and returns a URL it can be retrieved from.
    async fn upload(&self, path: &str, data: Bytes) -> PortResult<String>;
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Returns the assistant's reply text.
    async fn reply(&self, request: &ChatRequest) -> PortResult<String>;
}
