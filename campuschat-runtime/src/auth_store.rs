//! Signed-in state. The bearer token lives in a [`TokenVault`]; everything
//! else is plain JSON next to the other caches.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use campuschat_core::api::LoginResponse;
use campuschat_core::types::now_unix_ms;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::fsutil::{read_json, remove_if_exists, write_json_atomic};
use crate::secrets::TokenVault;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOutReason {
    /// Never signed in, or the user logged out.
    User,
    /// The server rejected the token.
    Invalidated,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    SignedOut(SignOutReason),
    SignedIn { email: Option<String> },
}

impl AuthState {
    pub fn is_signed_in(&self) -> bool {
        matches!(self, AuthState::SignedIn { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct AuthRecord {
    email: Option<String>,
    token_type: String,
    expires_at_unix_ms: Option<i64>,
}

impl AuthRecord {
    fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at_unix_ms.is_some_and(|t| t <= now_ms)
    }
}

/// A usable session: metadata plus the token itself.
#[derive(Clone)]
pub struct AuthSession {
    pub email: Option<String>,
    pub token_type: String,
    pub token: String,
    pub expires_at_unix_ms: Option<i64>,
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("email", &self.email)
            .field("token_type", &self.token_type)
            .field("token", &"[REDACTED]")
            .field("expires_at_unix_ms", &self.expires_at_unix_ms)
            .finish()
    }
}

pub struct AuthStore {
    path: PathBuf,
    vault: Arc<dyn TokenVault>,
    session: Mutex<Option<AuthSession>>,
    state: watch::Sender<AuthState>,
}

impl AuthStore {
    /// Hydrates from disk and the vault. A missing, expired or token-less
    /// record starts signed out.
    pub fn open(path: impl Into<PathBuf>, vault: Arc<dyn TokenVault>) -> anyhow::Result<Self> {
        let path = path.into();
        let record: Option<AuthRecord> = read_json(&path)?;

        let (session, initial) = match record {
            Some(rec) if rec.is_expired(now_unix_ms()) => {
                log::info!("stored session expired");
                (None, AuthState::SignedOut(SignOutReason::Expired))
            }
            Some(rec) => match vault.get()? {
                Some(token) if !token.trim().is_empty() => {
                    let state = AuthState::SignedIn {
                        email: rec.email.clone(),
                    };
                    let session = AuthSession {
                        email: rec.email,
                        token_type: rec.token_type,
                        token,
                        expires_at_unix_ms: rec.expires_at_unix_ms,
                    };
                    (Some(session), state)
                }
                _ => (None, AuthState::SignedOut(SignOutReason::User)),
            },
            None => (None, AuthState::SignedOut(SignOutReason::User)),
        };

        let (state, _) = watch::channel(initial);
        Ok(Self {
            path,
            vault,
            session: Mutex::new(session),
            state,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub fn session(&self) -> Option<AuthSession> {
        self.session.lock().ok().and_then(|s| s.clone())
    }

    /// The bearer token, unless missing or past its expiry.
    pub fn token(&self) -> Option<String> {
        let session = self.session()?;
        if session
            .expires_at_unix_ms
            .is_some_and(|t| t <= now_unix_ms())
        {
            self.drop_session(SignOutReason::Expired);
            return None;
        }
        Some(session.token)
    }

    pub fn sign_in(&self, login: &LoginResponse, fallback_email: &str) -> anyhow::Result<()> {
        let email = login
            .email
            .clone()
            .or_else(|| Some(fallback_email.to_string()).filter(|e| !e.is_empty()));
        let record = AuthRecord {
            email: email.clone(),
            token_type: login.token_type.clone(),
            expires_at_unix_ms: login
                .expires_in
                .map(|secs| now_unix_ms() + (secs as i64).saturating_mul(1000)),
        };

        self.vault.set(&login.access_token)?;
        write_json_atomic(&self.path, &record)?;

        if let Ok(mut guard) = self.session.lock() {
            *guard = Some(AuthSession {
                email: record.email,
                token_type: record.token_type,
                token: login.access_token.clone(),
                expires_at_unix_ms: record.expires_at_unix_ms,
            });
        }
        log::info!("signed in as {}", email.as_deref().unwrap_or("<unknown>"));
        self.state.send_replace(AuthState::SignedIn { email });
        Ok(())
    }

    pub fn sign_out(&self) -> anyhow::Result<()> {
        self.vault.delete()?;
        remove_if_exists(&self.path)?;
        self.drop_session(SignOutReason::User);
        Ok(())
    }

    /// Called when the server answers 401. Watchers see `SignedOut`.
    pub fn invalidate(&self) {
        let was_signed_in = self.state().is_signed_in();
        if let Err(e) = self.vault.delete() {
            log::warn!("failed to clear stored token: {e:#}");
        }
        if let Err(e) = remove_if_exists(&self.path) {
            log::warn!("failed to clear auth record: {e:#}");
        }
        self.drop_session(SignOutReason::Invalidated);
        if was_signed_in {
            log::warn!("session rejected by server; signed out");
        }
    }

    fn drop_session(&self, reason: SignOutReason) {
        if let Ok(mut guard) = self.session.lock() {
            *guard = None;
        }
        self.state.send_replace(AuthState::SignedOut(reason));
    }
}

impl std::fmt::Debug for AuthStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthStore")
            .field("path", &self.path)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::MemoryVault;

    fn login(expires_in: Option<u64>) -> LoginResponse {
        serde_json::from_value(serde_json::json!({
            "access_token": "secret-token",
            "token_type": "bearer",
            "expires_in": expires_in,
            "email": "student@uni.edu",
        }))
        .unwrap()
    }

    #[test]
    fn sign_in_persists_and_rehydrates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.json");
        let vault: Arc<dyn TokenVault> = Arc::new(MemoryVault::default());

        let store = AuthStore::open(&path, vault.clone()).unwrap();
        assert_eq!(store.state(), AuthState::SignedOut(SignOutReason::User));
        store.sign_in(&login(Some(3600)), "").unwrap();
        assert_eq!(store.token().as_deref(), Some("secret-token"));

        let reopened = AuthStore::open(&path, vault).unwrap();
        assert_eq!(
            reopened.state(),
            AuthState::SignedIn {
                email: Some("student@uni.edu".into())
            }
        );
        assert_eq!(reopened.token().as_deref(), Some("secret-token"));
    }

    #[test]
    fn token_is_not_written_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.json");
        let store = AuthStore::open(&path, Arc::new(MemoryVault::default())).unwrap();
        store.sign_in(&login(None), "").unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("secret-token"));
        assert!(!format!("{:?}", store.session()).contains("secret-token"));
    }

    #[test]
    fn invalidate_notifies_watchers() {
        let dir = tempfile::tempdir().unwrap();
        let store = AuthStore::open(dir.path().join("auth.json"), Arc::new(MemoryVault::default())).unwrap();
        store.sign_in(&login(None), "").unwrap();

        let mut rx = store.subscribe();
        rx.borrow_and_update();
        store.invalidate();

        assert!(rx.has_changed().unwrap());
        assert_eq!(
            *rx.borrow(),
            AuthState::SignedOut(SignOutReason::Invalidated)
        );
        assert!(store.token().is_none());
        assert!(!dir.path().join("auth.json").exists());
    }

    #[test]
    fn expired_record_starts_signed_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.json");
        write_json_atomic(
            &path,
            &AuthRecord {
                email: None,
                token_type: "bearer".into(),
                expires_at_unix_ms: Some(1),
            },
        )
        .unwrap();
        let store = AuthStore::open(&path, Arc::new(MemoryVault::with_token("old"))).unwrap();
        assert_eq!(store.state(), AuthState::SignedOut(SignOutReason::Expired));
        assert!(store.token().is_none());
    }

    #[test]
    fn login_without_email_uses_typed_one() {
        let dir = tempfile::tempdir().unwrap();
        let store = AuthStore::open(dir.path().join("auth.json"), Arc::new(MemoryVault::default())).unwrap();
        let mut resp = login(None);
        resp.email = None;
        store.sign_in(&resp, "typed@uni.edu").unwrap();
        assert_eq!(
            store.state(),
            AuthState::SignedIn {
                email: Some("typed@uni.edu".into())
            }
        );
    }
}
