//! crates/loan_desk_core/src/chat.rs
//!
//! The chat session manager: owns the "current chat" pointer, creates chat
//! documents lazily, appends user and assistant messages, and keeps a local
//! transcript that is updated optimistically and then overwritten by the
//! remote document whenever its subscription fires.

use chrono::Local;
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::document::field_str;
use crate::domain::{
    session_name, timestamp, AuthUser, ChatId, ChatSession, ChatSummary, LoanTopic, Message,
    DEFAULT_CHAT_NAME, GUEST_USER_ID,
};
use crate::ports::{
    ChatBackend, ChatRequest, CollectionPath, DocumentPath, DocumentStore, IdentityProvider,
    OrderBy, PortError, PortResult, StoredDocument, WriteMode,
};

/// How long a send waits for its own user message to come back through the
/// transcript subscription before calling the backend anyway.
const ECHO_TIMEOUT: Duration = Duration::from_secs(3);

//=========================================================================================
// Public Types
//=========================================================================================

/// Which screen the conversation area shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Home,
    Chat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    Blank,
    InFlight,
}

/// What happened to a `send` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Ignored(IgnoreReason),
    Delivered,
    /// The system error message was appended to the transcript.
    Failed,
}

/// The chat currently selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveChat {
    pub id: ChatId,
    pub name: String,
}

struct ChatState {
    current: Option<ActiveChat>,
    view: View,
    draft: String,
}

/// Clears the in-flight flag when the send finishes, however it finishes.
struct SendGuard<'a>(&'a AtomicBool);

impl<'a> SendGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SendGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

//=========================================================================================
// The Manager
//=========================================================================================

pub struct ChatSessionManager {
    identity: Arc<dyn IdentityProvider>,
    store: Arc<dyn DocumentStore>,
    backend: Arc<dyn ChatBackend>,
    state: Mutex<ChatState>,
    sending: AtomicBool,
    transcript: Arc<watch::Sender<Vec<Message>>>,
    chat_list: Arc<watch::Sender<Vec<ChatSummary>>>,
    /// Ids of the messages in the last remote snapshot applied to the transcript.
    echoed: Arc<watch::Sender<Vec<i64>>>,
    /// At most one transcript subscription is alive at a time.
    transcript_task: Mutex<Option<JoinHandle<()>>>,
    chat_list_task: Mutex<Option<JoinHandle<()>>>,
}

impl ChatSessionManager {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        store: Arc<dyn DocumentStore>,
        backend: Arc<dyn ChatBackend>,
    ) -> Self {
        let (transcript, _) = watch::channel(Vec::new());
        let (chat_list, _) = watch::channel(Vec::new());
        let (echoed, _) = watch::channel(Vec::new());
        Self {
            identity,
            store,
            backend,
            state: Mutex::new(ChatState {
                current: None,
                view: View::Home,
                draft: String::new(),
            }),
            sending: AtomicBool::new(false),
            transcript: Arc::new(transcript),
            chat_list: Arc::new(chat_list),
            echoed: Arc::new(echoed),
            transcript_task: Mutex::new(None),
            chat_list_task: Mutex::new(None),
        }
    }

    // --- Read Side ---

    pub fn transcript(&self) -> watch::Receiver<Vec<Message>> {
        self.transcript.subscribe()
    }

    pub fn chat_list(&self) -> watch::Receiver<Vec<ChatSummary>> {
        self.chat_list.subscribe()
    }

    pub async fn current(&self) -> Option<ActiveChat> {
        self.state.lock().await.current.clone()
    }

    pub async fn current_name(&self) -> String {
        self.current()
            .await
            .map(|chat| chat.name)
            .unwrap_or_else(|| DEFAULT_CHAT_NAME.to_string())
    }

    pub async fn view(&self) -> View {
        self.state.lock().await.view
    }

    pub fn is_sending(&self) -> bool {
        self.sending.load(Ordering::Acquire)
    }

    pub async fn draft(&self) -> String {
        self.state.lock().await.draft.clone()
    }

    pub async fn set_draft(&self, text: &str) {
        self.state.lock().await.draft = text.to_string();
    }

    // --- Sessions ---

    /// Returns the current chat, creating and persisting a new one first if
    /// none is selected. Concurrent callers observe the same chat.
    pub async fn ensure_session(&self, seed: Option<&str>) -> PortResult<ActiveChat> {
        let mut state = self.state.lock().await;
        if let Some(active) = &state.current {
            return Ok(active.clone());
        }

        let active = ActiveChat {
            id: ChatId::generate(),
            name: session_name(seed, Local::now()),
        };

        // The chat only becomes current once its document exists.
        let user = self.identity.current_user();
        if let Some(user) = &user {
            let session = ChatSession::new(active.id.clone(), active.name.clone());
            let document = serde_json::to_value(&session)
                .map_err(|e| PortError::Unexpected(e.to_string()))?;
            self.store
                .set(&DocumentPath::chat(user.user_id, &active.id), document, WriteMode::Replace)
                .await?;
            info!(chat_id = %active.id, name = %active.name, "Created chat session");
        } else {
            debug!(chat_id = %active.id, "Started guest chat session");
        }

        state.current = Some(active.clone());
        self.watch_transcript(user.as_ref(), &active.id).await;
        Ok(active)
    }

    /// Points the manager at another chat. The transcript follows through the
    /// subscription, not through a direct read.
    pub async fn switch_session(&self, id: ChatId, name: impl Into<String>) {
        let mut state = self.state.lock().await;
        state.current = Some(ActiveChat {
            id: id.clone(),
            name: name.into(),
        });
        state.view = View::Chat;
        let user = self.identity.current_user();
        self.watch_transcript(user.as_ref(), &id).await;
    }

    /// Deselects the current chat so the next send starts a new one.
    pub async fn new_chat(&self) {
        let mut state = self.state.lock().await;
        state.current = None;
        state.view = View::Home;
        if let Some(task) = self.transcript_task.lock().await.take() {
            task.abort();
        }
        self.transcript.send_replace(Vec::new());
    }

    /// Merges a new display name into the chat document, creating it if needed.
    pub async fn rename_session(&self, id: &ChatId, new_name: &str) -> PortResult<()> {
        let name = match new_name.trim() {
            "" => DEFAULT_CHAT_NAME,
            trimmed => trimmed,
        };
        if let Some(user) = self.identity.current_user() {
            self.store
                .set(
                    &DocumentPath::chat(user.user_id, id),
                    json!({ "chatName": name }),
                    WriteMode::Merge,
                )
                .await?;
        }
        let mut state = self.state.lock().await;
        if let Some(current) = state.current.as_mut().filter(|chat| &chat.id == id) {
            current.name = name.to_string();
        }
        Ok(())
    }

    // --- Sending ---

    /// Sends a message in the current chat. Blank text and sends made while
    /// another is in flight are dropped.
    pub async fn send(&self, text: &str) -> SendOutcome {
        if text.trim().is_empty() {
            return SendOutcome::Ignored(IgnoreReason::Blank);
        }
        let Some(_guard) = SendGuard::acquire(&self.sending) else {
            debug!("Send dropped: another send is in flight");
            return SendOutcome::Ignored(IgnoreReason::InFlight);
        };

        {
            let mut state = self.state.lock().await;
            state.view = View::Chat;
            state.draft.clear();
        }

        match self.deliver(text).await {
            Ok(()) => SendOutcome::Delivered,
            Err(e) => {
                error!("Chat send failed: {:?}", e);
                self.transcript
                    .send_modify(|messages| messages.push(Message::system_error()));
                SendOutcome::Failed
            }
        }
    }

    /// Sends whatever is in the input box.
    pub async fn send_draft(&self) -> SendOutcome {
        let draft = self.draft().await;
        self.send(&draft).await
    }

    /// Starts a conversation from one of the loan topic cards.
    pub async fn start_chat(&self, topic: LoanTopic) -> SendOutcome {
        self.state.lock().await.view = View::Chat;
        self.send(&topic.opening_message()).await
    }

    async fn deliver(&self, text: &str) -> PortResult<()> {
        let user = self.identity.current_user();
        let chat = self.ensure_session(Some(text)).await?;

        let user_message = Message::user(text);
        self.transcript
            .send_modify(|messages| messages.push(user_message.clone()));
        if let Some(user) = &user {
            self.persist_message(user.user_id, &chat.id, &user_message).await?;
            self.await_echo(user_message.id).await;
        }

        let request = ChatRequest {
            message: text.to_string(),
            user_id: user
                .as_ref()
                .map(|u| u.user_id.to_string())
                .unwrap_or_else(|| GUEST_USER_ID.to_string()),
            chat_id: chat.id.to_string(),
        };
        let reply = self.backend.reply(&request).await?;

        let bot_message = Message::assistant(reply);
        match &user {
            // The subscription brings the reply into the transcript.
            Some(user) => self.persist_message(user.user_id, &chat.id, &bot_message).await?,
            None => self.transcript.send_modify(|messages| messages.push(bot_message)),
        }
        Ok(())
    }

    async fn persist_message(&self, user_id: Uuid, chat_id: &ChatId, message: &Message) -> PortResult<()> {
        let item = serde_json::to_value(message).map_err(|e| PortError::Unexpected(e.to_string()))?;
        self.store
            .append_to_list(
                &DocumentPath::chat(user_id, chat_id),
                "messages",
                vec![item],
                json!({ "updatedAt": timestamp::now() }),
            )
            .await
            .map_err(|e| {
                error!(chat_id = %chat_id, "Failed to persist message: {:?}", e);
                e
            })
    }

    /// Waits until the transcript subscription has applied a snapshot holding
    /// message `id`, so that a later local-only message is not overwritten by
    /// the echo of this write.
    async fn await_echo(&self, id: i64) {
        let mut echoed = self.echoed.subscribe();
        let seen = tokio::time::timeout(ECHO_TIMEOUT, echoed.wait_for(|ids| ids.contains(&id)))
            .await
            .is_ok_and(|found| found.is_ok());
        if !seen {
            warn!(message_id = id, "Chat subscription did not echo the sent message");
        }
    }

    // --- Subscriptions ---

    /// Replaces the transcript subscription with one for `chat_id`. Guests get none.
    async fn watch_transcript(&self, user: Option<&AuthUser>, chat_id: &ChatId) {
        let mut slot = self.transcript_task.lock().await;
        if let Some(previous) = slot.take() {
            previous.abort();
        }
        let Some(user) = user else {
            return;
        };

        let path = DocumentPath::chat(user.user_id, chat_id);
        let store = self.store.clone();
        let transcript = self.transcript.clone();
        let echoed = self.echoed.clone();
        echoed.send_replace(Vec::new());
        *slot = Some(tokio::spawn(async move {
            mirror_transcript(store.as_ref(), &path, &transcript, &echoed).await;
        }));
    }

    /// Mirrors the signed-in user's chat list, following sign-in and sign-out.
    pub async fn watch_chat_list(&self) {
        let mut auth = self.identity.watch();
        let store = self.store.clone();
        let list = self.chat_list.clone();

        let task = tokio::spawn(async move {
            loop {
                let user = auth.borrow_and_update().clone();
                let Some(user) = user else {
                    list.send_replace(Vec::new());
                    if auth.changed().await.is_err() {
                        break;
                    }
                    continue;
                };

                // `None` means the subscription ended on its own.
                let auth_changed = tokio::select! {
                    _ = mirror_chat_list(store.as_ref(), user.user_id, &list) => None,
                    changed = auth.changed() => Some(changed.is_ok()),
                };
                let alive = match auth_changed {
                    Some(alive) => alive,
                    None => auth.changed().await.is_ok(),
                };
                if !alive {
                    break;
                }
            }
        });

        if let Some(previous) = self.chat_list_task.lock().await.replace(task) {
            previous.abort();
        }
    }
}

impl Drop for ChatSessionManager {
    fn drop(&mut self) {
        if let Some(task) = self.transcript_task.get_mut().take() {
            task.abort();
        }
        if let Some(task) = self.chat_list_task.get_mut().take() {
            task.abort();
        }
    }
}

//=========================================================================================
// Subscription Workers
//=========================================================================================

async fn mirror_transcript(
    store: &dyn DocumentStore,
    path: &DocumentPath,
    transcript: &watch::Sender<Vec<Message>>,
    echoed: &watch::Sender<Vec<i64>>,
) {
    let mut events = match store.subscribe(path).await {
        Ok(events) => events,
        Err(e) => {
            error!(path = %path, "Failed to subscribe to chat: {:?}", e);
            return;
        }
    };
    // A repeat of the last applied sequence is not a change.
    let mut applied: Option<Vec<Message>> = None;
    while let Some(event) = events.next().await {
        match event {
            Ok(snapshot) => {
                let Some(data) = snapshot.data else {
                    continue;
                };
                let messages = messages_of(&data);
                if applied.as_ref() == Some(&messages) {
                    continue;
                }
                transcript.send_replace(messages.clone());
                echoed.send_replace(messages.iter().map(|m| m.id).collect());
                applied = Some(messages);
            }
            Err(e) => warn!(path = %path, "Chat subscription error: {:?}", e),
        }
    }
    debug!(path = %path, "Chat subscription ended");
}

async fn mirror_chat_list(
    store: &dyn DocumentStore,
    user_id: Uuid,
    list: &watch::Sender<Vec<ChatSummary>>,
) {
    let path = CollectionPath::chats(user_id);
    let mut events = match store
        .subscribe_collection(&path, OrderBy::descending("updatedAt"))
        .await
    {
        Ok(events) => events,
        Err(e) => {
            error!(path = %path, "Failed to subscribe to chat list: {:?}", e);
            return;
        }
    };
    while let Some(event) = events.next().await {
        match event {
            Ok(snapshot) => {
                list.send_replace(snapshot.documents.iter().map(summary_of).collect());
            }
            Err(e) => warn!(path = %path, "Chat list subscription error: {:?}", e),
        }
    }
}

/// The `messages` field of a chat document. Entries that do not parse are skipped.
fn messages_of(document: &Value) -> Vec<Message> {
    let Some(items) = document.get("messages").and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match serde_json::from_value::<Message>(item.clone()) {
            Ok(message) => Some(message),
            Err(e) => {
                warn!("Skipping malformed message: {}", e);
                None
            }
        })
        .collect()
}

fn summary_of(document: &StoredDocument) -> ChatSummary {
    ChatSummary {
        id: ChatId::from(document.id.as_str()),
        name: field_str(&document.data, "chatName")
            .unwrap_or(DEFAULT_CHAT_NAME)
            .to_string(),
        updated_at: field_str(&document.data, "updatedAt").map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_of_skips_malformed_entries() {
        let doc = json!({
            "messages": [
                {"id": 1, "role": "user", "text": "hi", "timestamp": "2026-01-01T00:00:00.000Z"},
                {"id": 2, "role": "bot"},
                {"id": 3, "role": "bot", "text": "hello", "timestamp": "2026-01-01T00:00:01.000Z"}
            ]
        });
        let messages = messages_of(&doc);
        assert_eq!(messages.iter().map(|m| m.id).collect::<Vec<_>>(), vec![1, 3]);
        assert!(messages_of(&json!({"chatName": "x"})).is_empty());
    }

    #[test]
    fn summaries_fall_back_to_default_name() {
        let named = StoredDocument {
            id: "42".into(),
            data: json!({"chatName": "Car Loan • 10:00", "updatedAt": "2026-01-01T00:00:00.000Z"}),
        };
        let unnamed = StoredDocument {
            id: "43".into(),
            data: json!({}),
        };
        assert_eq!(summary_of(&named).name, "Car Loan • 10:00");
        assert_eq!(summary_of(&named).updated_at.as_deref(), Some("2026-01-01T00:00:00.000Z"));
        assert_eq!(summary_of(&unnamed).name, DEFAULT_CHAT_NAME);
        assert_eq!(summary_of(&unnamed).id, ChatId::from("43"));
    }

    #[test]
    fn send_guard_is_single_flight() {
        let flag = AtomicBool::new(false);
        let first = SendGuard::acquire(&flag);
        assert!(first.is_some());
        assert!(SendGuard::acquire(&flag).is_none());
        drop(first);
        assert!(SendGuard::acquire(&flag).is_some());
    }
}
