//! services/desk/src/adapters/auth.rs
//!
//! Email/password identity backed by Postgres. Passwords are hashed with
//! Argon2; a successful sign-in issues a 30-day auth session whose id can be
//! kept by the client and resumed on the next start.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use loan_desk_core::domain::{AuthSession, AuthUser};
use loan_desk_core::ports::{IdentityProvider, PortError, PortResult};
use sqlx::{FromRow, PgPool};
use tokio::sync::{watch, Mutex};
use tracing::{error, info};
use uuid::Uuid;

/// How long an issued auth session stays valid.
pub fn session_lifetime() -> Duration {
    Duration::days(30)
}

pub fn hash_password(password: &str) -> PortResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            error!("Failed to hash password: {:?}", e);
            PortError::Unexpected("Failed to hash password".to_string())
        })
}

pub fn verify_password(password: &str, hashed: &str) -> PortResult<bool> {
    let parsed = PasswordHash::new(hashed).map_err(|e| {
        error!("Failed to parse password hash: {:?}", e);
        PortError::Unexpected("Authentication error".to_string())
    })?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

//=========================================================================================
// Auth State Shared by the Identity Adapters
//=========================================================================================

/// The signed-in user and session id, with change notifications.
pub struct AuthCell {
    user: watch::Sender<Option<AuthUser>>,
    session_id: Mutex<Option<String>>,
}

impl AuthCell {
    pub fn new() -> Self {
        let (user, _) = watch::channel(None);
        Self {
            user,
            session_id: Mutex::new(None),
        }
    }

    pub fn current(&self) -> Option<AuthUser> {
        self.user.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Option<AuthUser>> {
        self.user.subscribe()
    }

    pub async fn establish(&self, session_id: &str, user: AuthUser) {
        *self.session_id.lock().await = Some(session_id.to_string());
        self.user.send_replace(Some(user));
    }

    /// Signs out locally and returns the session id that was active.
    pub async fn clear(&self) -> Option<String> {
        let session_id = self.session_id.lock().await.take();
        self.user.send_replace(None);
        session_id
    }
}

impl Default for AuthCell {
    fn default() -> Self {
        Self::new()
    }
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An identity adapter that implements the `IdentityProvider` port over Postgres.
pub struct PgIdentityProvider {
    pool: PgPool,
    state: AuthCell,
}

#[derive(FromRow)]
struct AccountRecord {
    user_id: Uuid,
    email: String,
    hashed_password: String,
    email_verified: bool,
}
impl AccountRecord {
    fn to_domain(&self) -> AuthUser {
        AuthUser {
            user_id: self.user_id,
            email: Some(self.email.clone()),
            email_verified: self.email_verified,
        }
    }
}

impl PgIdentityProvider {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            state: AuthCell::new(),
        }
    }

    async fn issue_session(&self, user: AuthUser) -> PortResult<AuthSession> {
        let session_id = Uuid::new_v4().to_string();
        let expires_at: DateTime<Utc> = Utc::now() + session_lifetime();
        sqlx::query("INSERT INTO auth_sessions (id, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(&session_id)
            .bind(user.user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        self.state.establish(&session_id, user.clone()).await;
        info!(user_id = %user.user_id, "Signed in");
        Ok(AuthSession {
            id: session_id,
            user,
            expires_at,
        })
    }
}

//=========================================================================================
// `IdentityProvider` Trait Implementation
//=========================================================================================

#[async_trait]
impl IdentityProvider for PgIdentityProvider {
    fn current_user(&self) -> Option<AuthUser> {
        self.state.current()
    }

    fn watch(&self) -> watch::Receiver<Option<AuthUser>> {
        self.state.watch()
    }

    async fn sign_up(&self, email: &str, password: &str) -> PortResult<AuthSession> {
        let email = normalize_email(email);
        let hashed = hash_password(password)?;
        let record = sqlx::query_as::<_, AccountRecord>(
            "INSERT INTO accounts (user_id, email, hashed_password) VALUES ($1, $2, $3) \
             RETURNING user_id, email, hashed_password, email_verified",
        )
        .bind(Uuid::new_v4())
        .bind(&email)
        .bind(&hashed)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                PortError::Unexpected(format!("An account already exists for {email}"))
            }
            other => PortError::Unexpected(other.to_string()),
        })?;
        self.issue_session(record.to_domain()).await
    }

    async fn sign_in(&self, email: &str, password: &str) -> PortResult<AuthSession> {
        let record = sqlx::query_as::<_, AccountRecord>(
            "SELECT user_id, email, hashed_password, email_verified FROM accounts WHERE email = $1",
        )
        .bind(normalize_email(email))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?
        .ok_or(PortError::Unauthorized)?;

        if !verify_password(password, &record.hashed_password)? {
            return Err(PortError::Unauthorized);
        }
        self.issue_session(record.to_domain()).await
    }

    async fn resume(&self, session_id: &str) -> PortResult<AuthUser> {
        let record = sqlx::query_as::<_, AccountRecord>(
            "SELECT a.user_id, a.email, a.hashed_password, a.email_verified \
             FROM auth_sessions s JOIN accounts a ON a.user_id = s.user_id \
             WHERE s.id = $1 AND s.expires_at > now()",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?
        .ok_or(PortError::Unauthorized)?;

        let user = record.to_domain();
        self.state.establish(session_id, user.clone()).await;
        info!(user_id = %user.user_id, "Resumed session");
        Ok(user)
    }

    async fn sign_out(&self) -> PortResult<()> {
        if let Some(session_id) = self.state.clear().await {
            sqlx::query("DELETE FROM auth_sessions WHERE id = $1")
                .bind(session_id)
                .execute(&self.pool)
                .await
                .map_err(|e| PortError::Unexpected(e.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passwords_verify_against_their_hash() {
        let hashed = hash_password("hunter22").unwrap();
        assert!(verify_password("hunter22", &hashed).unwrap());
        assert!(!verify_password("hunter23", &hashed).unwrap());
        assert!(verify_password("x", "not-a-hash").is_err());
    }

    #[tokio::test]
    async fn auth_cell_notifies_watchers() {
        let cell = AuthCell::new();
        let mut watcher = cell.watch();
        let user = AuthUser {
            user_id: Uuid::new_v4(),
            email: Some("a@b.c".into()),
            email_verified: false,
        };
        cell.establish("s1", user.clone()).await;
        watcher.changed().await.unwrap();
        assert_eq!(watcher.borrow().as_ref(), Some(&user));
        assert_eq!(cell.clear().await.as_deref(), Some("s1"));
        assert!(cell.current().is_none());
    }
}
