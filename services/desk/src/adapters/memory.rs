//! services/desk/src/adapters/memory.rs
//!
//! Process-local adapters used in offline mode and in tests. The document
//! store keeps the same write and subscription semantics as the Postgres
//! store; changed paths are fanned out over a broadcast channel.

use async_trait::async_trait;
use chrono::Utc;
use loan_desk_core::document::{into_object, merge_fields, union_into_list};
use loan_desk_core::domain::{AuthSession, AuthUser};
use loan_desk_core::ports::{
    CollectionPath, CollectionSnapshot, DocumentPath, DocumentSnapshot, DocumentStore,
    IdentityProvider, OrderBy, PortError, PortResult, SnapshotStream, StoredDocument, WriteMode,
};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::auth::{hash_password, normalize_email, session_lifetime, verify_password, AuthCell};

const CHANGE_BUFFER: usize = 256;

//=========================================================================================
// Document Store
//=========================================================================================

#[derive(Clone)]
pub struct MemoryDocumentStore {
    documents: Arc<RwLock<HashMap<String, Map<String, Value>>>>,
    changes: broadcast::Sender<String>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            documents: Arc::new(RwLock::new(HashMap::new())),
            changes,
        }
    }

    async fn read(&self, path: &str) -> Option<Value> {
        self.documents
            .read()
            .await
            .get(path)
            .map(|fields| Value::Object(fields.clone()))
    }

    async fn read_collection(&self, path: &CollectionPath, order: &OrderBy) -> CollectionSnapshot {
        let documents = self.documents.read().await;
        let mut rows: Vec<(&String, &Map<String, Value>)> = documents
            .iter()
            .filter(|(key, _)| path.contains(key))
            .collect();
        rows.sort_by(|(a_path, a), (b_path, b)| {
            let a_key = a.get(&order.field).and_then(Value::as_str);
            let b_key = b.get(&order.field).and_then(Value::as_str);
            let by_field = match (a_key, b_key) {
                (Some(a), Some(b)) if order.descending => b.cmp(a),
                (Some(a), Some(b)) => a.cmp(b),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            };
            by_field.then_with(|| a_path.cmp(b_path))
        });
        CollectionSnapshot {
            documents: rows
                .into_iter()
                .map(|(key, fields)| StoredDocument {
                    id: key.rsplit('/').next().unwrap_or_default().to_string(),
                    data: Value::Object(fields.clone()),
                })
                .collect(),
        }
    }

    fn notify(&self, path: &DocumentPath) {
        // No receivers is not an error here.
        let _ = self.changes.send(path.as_str().to_string());
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, path: &DocumentPath) -> PortResult<Option<Value>> {
        Ok(self.read(path.as_str()).await)
    }

    async fn set(&self, path: &DocumentPath, data: Value, mode: WriteMode) -> PortResult<()> {
        let data = into_object(data)?;
        {
            let mut documents = self.documents.write().await;
            match mode {
                WriteMode::Replace => {
                    documents.insert(path.as_str().to_string(), data);
                }
                WriteMode::Merge => {
                    let document = documents.entry(path.as_str().to_string()).or_default();
                    merge_fields(document, data);
                }
            }
        }
        self.notify(path);
        Ok(())
    }

    async fn append_to_list(
        &self,
        path: &DocumentPath,
        field: &str,
        items: Vec<Value>,
        fields: Value,
    ) -> PortResult<()> {
        let patch = into_object(fields)?;
        {
            let mut documents = self.documents.write().await;
            let document = documents.entry(path.as_str().to_string()).or_default();
            merge_fields(document, patch);
            union_into_list(document, field, items);
        }
        self.notify(path);
        Ok(())
    }

    async fn subscribe(&self, path: &DocumentPath) -> PortResult<SnapshotStream<DocumentSnapshot>> {
        let mut changes = self.changes.subscribe();
        let store = self.clone();
        let path = path.clone();

        let stream = async_stream::stream! {
            yield Ok(DocumentSnapshot { path: path.clone(), data: store.read(path.as_str()).await });
            loop {
                match changes.recv().await {
                    Ok(changed) if changed == path.as_str() => {}
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Document subscription lagged; re-reading");
                    }
                    Err(RecvError::Closed) => return,
                }
                yield Ok(DocumentSnapshot { path: path.clone(), data: store.read(path.as_str()).await });
            }
        };
        Ok(Box::pin(stream))
    }

    async fn subscribe_collection(
        &self,
        path: &CollectionPath,
        order: OrderBy,
    ) -> PortResult<SnapshotStream<CollectionSnapshot>> {
        let mut changes = self.changes.subscribe();
        let store = self.clone();
        let path = path.clone();

        let stream = async_stream::stream! {
            yield Ok(store.read_collection(&path, &order).await);
            loop {
                match changes.recv().await {
                    Ok(changed) if path.contains(&changed) => {}
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Collection subscription lagged; re-reading");
                    }
                    Err(RecvError::Closed) => return,
                }
                yield Ok(store.read_collection(&path, &order).await);
            }
        };
        Ok(Box::pin(stream))
    }
}

//=========================================================================================
// Identity Provider
//=========================================================================================

struct Account {
    user: AuthUser,
    hashed_password: String,
}

#[derive(Default)]
struct Registry {
    /// Keyed by normalized email.
    accounts: HashMap<String, Account>,
    sessions: HashMap<String, (AuthUser, chrono::DateTime<Utc>)>,
}

/// Email/password accounts that live only as long as the process.
pub struct MemoryIdentityProvider {
    registry: Mutex<Registry>,
    state: AuthCell,
}

impl MemoryIdentityProvider {
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            state: AuthCell::new(),
        }
    }

    /// Signs `user` in directly, without a password.
    pub async fn sign_in_as(&self, user: AuthUser) -> AuthSession {
        self.open_session(user).await
    }

    async fn open_session(&self, user: AuthUser) -> AuthSession {
        let session = AuthSession {
            id: Uuid::new_v4().to_string(),
            user: user.clone(),
            expires_at: Utc::now() + session_lifetime(),
        };
        self.registry
            .lock()
            .await
            .sessions
            .insert(session.id.clone(), (user.clone(), session.expires_at));
        self.state.establish(&session.id, user).await;
        info!(user_id = %session.user.user_id, "Signed in");
        session
    }
}

impl Default for MemoryIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    fn current_user(&self) -> Option<AuthUser> {
        self.state.current()
    }

    fn watch(&self) -> watch::Receiver<Option<AuthUser>> {
        self.state.watch()
    }

    async fn sign_up(&self, email: &str, password: &str) -> PortResult<AuthSession> {
        let email = normalize_email(email);
        let hashed_password = hash_password(password)?;
        let user = {
            let mut registry = self.registry.lock().await;
            if registry.accounts.contains_key(&email) {
                return Err(PortError::Unexpected(format!("An account already exists for {email}")));
            }
            let user = AuthUser {
                user_id: Uuid::new_v4(),
                email: Some(email.clone()),
                email_verified: false,
            };
            registry.accounts.insert(
                email,
                Account {
                    user: user.clone(),
                    hashed_password,
                },
            );
            user
        };
        Ok(self.open_session(user).await)
    }

    async fn sign_in(&self, email: &str, password: &str) -> PortResult<AuthSession> {
        let (user, hashed_password) = {
            let registry = self.registry.lock().await;
            let account = registry
                .accounts
                .get(&normalize_email(email))
                .ok_or(PortError::Unauthorized)?;
            (account.user.clone(), account.hashed_password.clone())
        };
        if !verify_password(password, &hashed_password)? {
            return Err(PortError::Unauthorized);
        }
        Ok(self.open_session(user).await)
    }

    async fn resume(&self, session_id: &str) -> PortResult<AuthUser> {
        let user = {
            let registry = self.registry.lock().await;
            match registry.sessions.get(session_id) {
                Some((user, expires_at)) if *expires_at > Utc::now() => user.clone(),
                _ => return Err(PortError::Unauthorized),
            }
        };
        self.state.establish(session_id, user.clone()).await;
        Ok(user)
    }

    async fn sign_out(&self) -> PortResult<()> {
        if let Some(session_id) = self.state.clear().await {
            self.registry.lock().await.sessions.remove(&session_id);
            debug!("Signed out");
        }
        Ok(())
    }
}
