//! services/desk/src/adapters/chat_backend.rs
//!
//! This module contains the adapter for the loan decision backend's chat endpoint.
//! It implements the `ChatBackend` port from the `core` crate.

use async_trait::async_trait;
use loan_desk_core::ports::{ChatBackend, ChatRequest, PortError, PortResult};
use serde::Deserialize;
use tracing::debug;

#[derive(Deserialize)]
struct ChatReply {
    response: String,
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements the `ChatBackend` port over HTTP.
#[derive(Clone)]
pub struct HttpChatBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpChatBackend {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

//=========================================================================================
// `ChatBackend` Trait Implementation
//=========================================================================================

#[async_trait]
impl ChatBackend for HttpChatBackend {
    /// Posts the message to `{base}/chat` and returns the `response` field.
    async fn reply(&self, request: &ChatRequest) -> PortResult<String> {
        let url = format!("{}/chat", self.base_url);
        debug!(chat_id = %request.chat_id, "Calling chat backend");

        // Any failure, transport, status or body, is reported the same way.
        let reply = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| PortError::Unexpected(e.to_string()))?
            .json::<ChatReply>()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        Ok(reply.response)
    }
}
