#![allow(dead_code)]

use async_trait::async_trait;
use desk_lib::adapters::{MemoryDocumentStore, MemoryIdentityProvider};
use futures::StreamExt;
use loan_desk_core::domain::{AuthUser, ChatId};
use loan_desk_core::ports::{
    ChatBackend, ChatRequest, CollectionPath, CollectionSnapshot, DocumentPath, DocumentSnapshot,
    DocumentStore, OrderBy, PortError, PortResult, SnapshotStream, WriteMode,
};
use loan_desk_core::{ChatSessionManager, Message};
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use uuid::Uuid;

/// Replies with fixed text and records every request.
pub struct ScriptedBackend {
    reply: String,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedBackend {
    pub fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn reply(&self, request: &ChatRequest) -> PortResult<String> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(self.reply.clone())
    }
}

/// Holds every reply until `release` is called.
pub struct GatedBackend {
    gate: Notify,
    reply: String,
}

impl GatedBackend {
    pub fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            gate: Notify::new(),
            reply: reply.to_string(),
        })
    }

    pub fn release(&self) {
        self.gate.notify_one();
    }
}

#[async_trait]
impl ChatBackend for GatedBackend {
    async fn reply(&self, _request: &ChatRequest) -> PortResult<String> {
        self.gate.notified().await;
        Ok(self.reply.clone())
    }
}

/// Fails every call, like an unreachable backend.
pub struct FailingBackend;

#[async_trait]
impl ChatBackend for FailingBackend {
    async fn reply(&self, _request: &ChatRequest) -> PortResult<String> {
        Err(PortError::Unexpected("connection refused".to_string()))
    }
}

/// A memory store whose first `failures` plain writes are rejected.
pub struct FlakyStore {
    inner: Arc<MemoryDocumentStore>,
    failures: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryDocumentStore>, failures: usize) -> Arc<Self> {
        Arc::new(Self {
            inner,
            failures: AtomicUsize::new(failures),
        })
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn get(&self, path: &DocumentPath) -> PortResult<Option<Value>> {
        self.inner.get(path).await
    }

    async fn set(&self, path: &DocumentPath, data: Value, mode: WriteMode) -> PortResult<()> {
        let failing = self
            .failures
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(PortError::Unexpected("write rejected".to_string()));
        }
        self.inner.set(path, data, mode).await
    }

    async fn append_to_list(
        &self,
        path: &DocumentPath,
        field: &str,
        items: Vec<Value>,
        fields: Value,
    ) -> PortResult<()> {
        self.inner.append_to_list(path, field, items, fields).await
    }

    async fn subscribe(&self, path: &DocumentPath) -> PortResult<SnapshotStream<DocumentSnapshot>> {
        self.inner.subscribe(path).await
    }

    async fn subscribe_collection(
        &self,
        path: &CollectionPath,
        order: OrderBy,
    ) -> PortResult<SnapshotStream<CollectionSnapshot>> {
        self.inner.subscribe_collection(path, order).await
    }
}

pub struct Harness {
    pub identity: Arc<MemoryIdentityProvider>,
    pub store: Arc<MemoryDocumentStore>,
    pub manager: Arc<ChatSessionManager>,
    pub user: Option<AuthUser>,
}

impl Harness {
    pub async fn new(backend: Arc<dyn ChatBackend>, signed_in: bool) -> Self {
        let identity = Arc::new(MemoryIdentityProvider::new());
        let store = Arc::new(MemoryDocumentStore::new());
        let user = if signed_in {
            let user = test_user();
            identity.sign_in_as(user.clone()).await;
            Some(user)
        } else {
            None
        };
        let manager = Arc::new(ChatSessionManager::new(identity.clone(), store.clone(), backend));
        Self {
            identity,
            store,
            manager,
            user,
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.user.as_ref().map(|u| u.user_id).expect("harness is signed in")
    }

    pub async fn chat_document(&self, id: &ChatId) -> Option<Value> {
        self.store
            .get(&DocumentPath::chat(self.user_id(), id))
            .await
            .unwrap()
    }

    /// Ids of every chat document the user owns.
    pub async fn chat_ids(&self, user_id: Uuid) -> Vec<String> {
        let mut events = self
            .store
            .subscribe_collection(&CollectionPath::chats(user_id), OrderBy::descending("updatedAt"))
            .await
            .unwrap();
        let snapshot = events.next().await.unwrap().unwrap();
        snapshot.documents.into_iter().map(|d| d.id).collect()
    }
}

pub fn test_user() -> AuthUser {
    AuthUser {
        user_id: Uuid::new_v4(),
        email: Some("asha@example.com".to_string()),
        email_verified: false,
    }
}

/// Texts of a transcript, in order.
pub fn texts(messages: &[Message]) -> Vec<String> {
    messages.iter().map(|m| m.text.clone()).collect()
}

/// Waits until the watched value satisfies `predicate`, failing the test after a timeout.
pub async fn wait_until<T>(receiver: &mut watch::Receiver<T>, predicate: impl FnMut(&T) -> bool) -> T
where
    T: Clone,
{
    within(receiver.wait_for(predicate))
        .await
        .expect("watch channel closed")
        .clone()
}

pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("timed out")
}
