//! crates/loan_desk_core/src/profile.rs
//!
//! The profile editor and document vault: reads and merge-writes the user's
//! profile document and uploads vault files to the object store.

use bytes::Bytes;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::domain::{AuthUser, ContactChannel, UserProfile, VaultSlot};
use crate::ports::{DocumentPath, DocumentStore, IdentityProvider, ObjectStore, PortError, PortResult, WriteMode};

pub struct ProfileVault {
    identity: Arc<dyn IdentityProvider>,
    store: Arc<dyn DocumentStore>,
    objects: Arc<dyn ObjectStore>,
}

impl ProfileVault {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        store: Arc<dyn DocumentStore>,
        objects: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            identity,
            store,
            objects,
        }
    }

    fn signed_in(&self) -> PortResult<AuthUser> {
        self.identity.current_user().ok_or(PortError::Unauthorized)
    }

    /// Loads the profile, filling the email and its verified flag from the
    /// identity provider when the document does not say otherwise.
    pub async fn load(&self) -> PortResult<UserProfile> {
        let user = self.signed_in()?;
        let mut profile = match self.store.get(&DocumentPath::profile(user.user_id)).await? {
            Some(data) => serde_json::from_value(data).map_err(|e| PortError::Unexpected(e.to_string()))?,
            None => UserProfile::default(),
        };
        if profile.email.is_none() {
            profile.email = user.email.clone();
        }
        profile.is_email_verified |= user.email_verified;
        Ok(profile)
    }

    /// Merge-writes the edited fields. Vault slot URLs are left to `upload`.
    pub async fn save(&self, profile: &UserProfile) -> PortResult<()> {
        let user = self.signed_in()?;
        let mut data = serde_json::to_value(profile).map_err(|e| PortError::Unexpected(e.to_string()))?;
        if let Some(fields) = data.as_object_mut() {
            fields.remove("documents");
        }
        self.write(&user, data).await
    }

    /// Marks a contact channel verified. There is no proof step behind this.
    pub async fn verify(&self, channel: ContactChannel) -> PortResult<()> {
        let user = self.signed_in()?;
        warn!(field = channel.flag_field(), "Marking contact verified without a proof step");
        let mut patch = Map::new();
        patch.insert(channel.flag_field().to_string(), Value::Bool(true));
        self.write(&user, Value::Object(patch)).await
    }

    /// Uploads a file into a vault slot and records its URL on the profile,
    /// both in `profile` and in the stored document.
    pub async fn upload(&self, profile: &mut UserProfile, slot: VaultSlot, data: Bytes) -> PortResult<String> {
        let user = self.signed_in()?;
        if let VaultSlot::Custom(index) = slot {
            if index >= profile.extra_docs.len() {
                return Err(PortError::NotFound(format!("Custom document #{}", index + 1)));
            }
        }

        let key = slot.key();
        let object_path = format!("users/{}/{}_{}", user.user_id, key, Utc::now().timestamp_millis());
        let url = self.objects.upload(&object_path, data).await.map_err(|e| {
            error!(slot = %key, "Upload failed: {:?}", e);
            e
        })?;

        let patch = match slot {
            VaultSlot::Custom(index) => {
                profile.extra_docs[index].url = url.clone();
                json!({ "extraDocs": profile.extra_docs })
            }
            VaultSlot::PanCard | VaultSlot::SalarySlip => {
                profile.documents.insert(key.clone(), url.clone());
                let mut documents = self.stored_documents(&user).await?;
                documents.insert(key.clone(), Value::String(url.clone()));
                json!({ "documents": documents })
            }
        };
        self.write(&user, patch).await.map_err(|e| {
            error!(slot = %key, "Failed to record uploaded document: {:?}", e);
            e
        })?;
        info!(slot = %key, "Stored vault document");
        Ok(url)
    }

    /// The stored `documents` map as written, including entries `UserProfile` skips.
    async fn stored_documents(&self, user: &AuthUser) -> PortResult<Map<String, Value>> {
        let stored = self.store.get(&DocumentPath::profile(user.user_id)).await?;
        Ok(match stored.as_ref().and_then(|data| data.get("documents")) {
            Some(Value::Object(documents)) => documents.clone(),
            _ => Map::new(),
        })
    }

    async fn write(&self, user: &AuthUser, data: Value) -> PortResult<()> {
        self.store
            .set(&DocumentPath::profile(user.user_id), data, WriteMode::Merge)
            .await
    }
}
