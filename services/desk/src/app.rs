//! services/desk/src/app.rs
//!
//! Wires the core services together and executes terminal commands against them.

use bytes::Bytes;
use loan_desk_core::domain::{today, ContactChannel, UserProfile, VaultSlot};
use loan_desk_core::ports::{ChatBackend, DocumentStore, IdentityProvider, ObjectStore, PortError};
use loan_desk_core::{ChatSessionManager, LoanStatusAggregator, ProfileVault, SanctionLetter, SendOutcome};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::commands::{Command, ProfileField};
use crate::error::DeskError;
use crate::render;

/// What the terminal loop should do after a command.
#[derive(Debug, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    /// Output arrives through the transcript instead.
    Silent,
    Quit,
}

pub struct App {
    identity: Arc<dyn IdentityProvider>,
    chats: Arc<ChatSessionManager>,
    status: LoanStatusAggregator,
    vault: ProfileVault,
    /// Working copy of the profile being edited; loaded on first use.
    profile: Mutex<Option<UserProfile>>,
    session_file: PathBuf,
    letters_dir: PathBuf,
}

impl App {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        store: Arc<dyn DocumentStore>,
        objects: Arc<dyn ObjectStore>,
        backend: Arc<dyn ChatBackend>,
        session_file: PathBuf,
        letters_dir: PathBuf,
    ) -> Self {
        Self {
            chats: Arc::new(ChatSessionManager::new(identity.clone(), store.clone(), backend)),
            status: LoanStatusAggregator::new(identity.clone(), store.clone()),
            vault: ProfileVault::new(identity.clone(), store, objects),
            identity,
            profile: Mutex::new(None),
            session_file,
            letters_dir,
        }
    }

    pub fn chats(&self) -> &Arc<ChatSessionManager> {
        &self.chats
    }

    /// Resumes the session saved by a previous run, if it is still valid.
    pub async fn restore_session(&self) {
        let Ok(saved) = tokio::fs::read_to_string(&self.session_file).await else {
            return;
        };
        match self.identity.resume(saved.trim()).await {
            Ok(user) => info!(user_id = %user.user_id, "Restored previous session"),
            Err(e) => {
                warn!("Saved session could not be resumed: {}", e);
                let _ = tokio::fs::remove_file(&self.session_file).await;
            }
        }
    }

    pub async fn handle(&self, command: Command) -> Result<Reply, DeskError> {
        let text = match command {
            Command::Send(text) => return Ok(self.send(text)),
            Command::Start(topic) => {
                let chats = self.chats.clone();
                tokio::spawn(async move { chats.start_chat(topic).await });
                return Ok(Reply::Silent);
            }
            Command::Quit => return Ok(Reply::Quit),
            Command::Help => render::help().to_string(),
            Command::Topics => {
                self.chats.new_chat().await;
                render::banner()
            }
            Command::NewChat => {
                self.chats.new_chat().await;
                "Started a new chat. Say hello!".to_string()
            }
            Command::Chats => {
                let current = self.chats.current().await.map(|chat| chat.id);
                let list = self.chats.chat_list().borrow().clone();
                render::chat_list(&list, current.as_ref())
            }
            Command::Switch(index) => {
                let chosen = self.chats.chat_list().borrow().get(index).cloned();
                let chat = chosen.ok_or_else(|| PortError::NotFound(format!("Chat #{}", index + 1)))?;
                self.chats.switch_session(chat.id, chat.name.clone()).await;
                format!("Switched to {}", chat.name)
            }
            Command::Rename(name) => {
                let chat = self
                    .chats
                    .current()
                    .await
                    .ok_or_else(|| PortError::NotFound("No chat is open".to_string()))?;
                self.chats.rename_session(&chat.id, &name).await?;
                format!("Renamed to {}", self.chats.current_name().await)
            }
            Command::Status => {
                let chat = self
                    .chats
                    .current()
                    .await
                    .ok_or_else(|| PortError::NotFound("No chat is open".to_string()))?;
                render::status(&self.status.snapshot(&chat.id).await?)
            }
            Command::Letter => self.save_letter().await?,
            Command::Profile => render::profile(&self.edit_profile(|_| Ok(())).await?),
            Command::Set(field, value) => {
                self.edit_profile(|profile| apply_field(profile, field, &value)).await?;
                "Updated. Use /save to store your profile.".to_string()
            }
            Command::Save => {
                let profile = self.edit_profile(|_| Ok(())).await?;
                self.vault.save(&profile).await?;
                "Profile saved.".to_string()
            }
            Command::Verify(channel) => {
                self.vault.verify(channel).await?;
                self.edit_profile(|profile| {
                    match channel {
                        ContactChannel::Email => profile.is_email_verified = true,
                        ContactChannel::Phone => profile.is_phone_verified = true,
                    }
                    Ok(())
                })
                .await?;
                "Marked verified.".to_string()
            }
            Command::Upload(slot, file) => self.upload(slot, file).await?,
            Command::AddDocument => {
                let profile = self
                    .edit_profile(|profile| {
                        profile.add_extra_document();
                        Ok(())
                    })
                    .await?;
                let position = profile.extra_docs.len();
                format!("Added custom document #{position}. Upload with /upload {position} <file>")
            }
            Command::RemoveDocument(index) => {
                self.edit_profile(|profile| {
                    profile
                        .remove_extra_document(index)
                        .map(|_| ())
                        .ok_or_else(|| PortError::NotFound(format!("Custom document #{}", index + 1)))
                })
                .await?;
                "Removed. Use /save to store your profile.".to_string()
            }
            Command::RenameDocument(index, name) => {
                self.edit_profile(|profile| {
                    if profile.rename_extra_document(index, &name) {
                        Ok(())
                    } else {
                        Err(PortError::NotFound(format!("Custom document #{}", index + 1)))
                    }
                })
                .await?;
                "Renamed. Use /save to store your profile.".to_string()
            }
            Command::SignUp { email, password } => {
                let session = self.identity.sign_up(&email, &password).await?;
                self.signed_in(&session.id).await?;
                format!("Welcome, {email}!")
            }
            Command::SignIn { email, password } => {
                let session = self.identity.sign_in(&email, &password).await?;
                self.signed_in(&session.id).await?;
                format!("Signed in as {}", session.user.email.unwrap_or(email))
            }
            Command::SignOut => {
                self.identity.sign_out().await?;
                *self.profile.lock().await = None;
                self.chats.new_chat().await;
                if let Err(e) = tokio::fs::remove_file(&self.session_file).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        return Err(e.into());
                    }
                }
                "Signed out.".to_string()
            }
        };
        Ok(Reply::Text(text))
    }

    fn send(&self, text: String) -> Reply {
        if text.trim().is_empty() {
            return Reply::Silent;
        }
        if self.chats.is_sending() {
            return Reply::Text("Still waiting for the last reply; message not sent.".to_string());
        }
        let chats = self.chats.clone();
        tokio::spawn(async move {
            if let SendOutcome::Failed = chats.send(&text).await {
                warn!("Message could not be delivered");
            }
        });
        Reply::Silent
    }

    async fn signed_in(&self, session_id: &str) -> Result<(), DeskError> {
        *self.profile.lock().await = None;
        self.chats.new_chat().await;
        tokio::fs::write(&self.session_file, session_id).await?;
        Ok(())
    }

    /// Applies `edit` to the working profile, loading it first if needed, and
    /// returns the edited copy.
    async fn edit_profile(
        &self,
        edit: impl FnOnce(&mut UserProfile) -> Result<(), PortError>,
    ) -> Result<UserProfile, DeskError> {
        let mut slot = self.profile.lock().await;
        let profile = match slot.take() {
            Some(profile) => profile,
            None => self.vault.load().await?,
        };
        let profile = slot.insert(profile);
        edit(profile)?;
        Ok(profile.clone())
    }

    async fn upload(&self, slot: VaultSlot, file: PathBuf) -> Result<String, DeskError> {
        let data = Bytes::from(tokio::fs::read(&file).await?);
        // Make sure the working copy exists before taking the lock for the upload.
        self.edit_profile(|_| Ok(())).await?;
        let mut guard = self.profile.lock().await;
        let profile = guard
            .as_mut()
            .ok_or(DeskError::ProfileNotLoaded)?;
        self.vault.upload(profile, slot, data).await?;
        Ok(format!("Uploaded {} for {}", file.display(), slot.label()))
    }

    async fn save_letter(&self) -> Result<String, DeskError> {
        let transcript = self.chats.transcript().borrow().clone();
        let message = transcript
            .iter()
            .rev()
            .find(|message| message.is_sanction_letter())
            .ok_or_else(|| PortError::NotFound("No sanction letter in this chat".to_string()))?;
        let letter = SanctionLetter::from_message(&message.text, today());
        let target = self.letters_dir.join(letter.file_name());
        tokio::fs::write(&target, letter.render()).await?;
        Ok(format!("Saved {}", target.display()))
    }
}

fn apply_field(profile: &mut UserProfile, field: ProfileField, value: &str) -> Result<(), PortError> {
    let value = value.trim();
    let text = (!value.is_empty()).then(|| value.to_string());
    match field {
        ProfileField::Name => profile.name = text,
        ProfileField::Phone => profile.phone = text,
        ProfileField::City => profile.city = text,
        ProfileField::Pan => profile.set_pan_number(value),
        ProfileField::Salary => {
            let cleaned: String = value.chars().filter(|c| *c != ',').collect();
            profile.salary = Some(
                cleaned
                    .parse()
                    .map_err(|_| PortError::Unexpected(format!("'{value}' is not a salary amount")))?,
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_are_applied_to_the_working_copy() {
        let mut profile = UserProfile::default();
        apply_field(&mut profile, ProfileField::Salary, "85,000").unwrap();
        apply_field(&mut profile, ProfileField::Pan, " abcde1234f ").unwrap();
        apply_field(&mut profile, ProfileField::City, "Pune").unwrap();
        assert_eq!(profile.salary, Some(85000));
        assert_eq!(profile.pan_card.as_deref(), Some("ABCDE1234F"));
        assert_eq!(profile.city.as_deref(), Some("Pune"));
        assert!(apply_field(&mut profile, ProfileField::Salary, "lots").is_err());
    }
}
