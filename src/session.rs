//! Session context: the bearer token and its lifecycle.
//!
//! ```text
//! init (GTC_TOKEN or token_file) ──▶ token() on every request
//!                                        │
//!            sign_out() / 401·403 ◀──────┘ ──▶ cleared, observers notified
//! ```
//!
//! The gateway owns one [`Session`] and consults it for every outbound call.
//! Interested parties (the CLI, a UI shell) subscribe with
//! [`Session::on_session_expired`] or [`Session::on_session_changed`] instead
//! of polling shared state.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};
use tracing::{debug, warn};

use crate::config::SessionConfig;

/// Environment variable that seeds the session token.
pub const TOKEN_ENV: &str = "GTC_TOKEN";

/// A change in session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn,
    SignedOut,
    /// The backend rejected the token with this status (401 or 403).
    Expired { status: u16 },
}

type Listener = Box<dyn Fn(&SessionEvent) + Send + Sync>;

pub struct Session {
    token: RwLock<Option<String>>,
    token_file: Option<PathBuf>,
    listeners: Mutex<Vec<Listener>>,
}

impl Session {
    /// An anonymous, memory-only session.
    pub fn new() -> Self {
        Self {
            token: RwLock::new(None),
            token_file: None,
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// A memory-only session that starts signed in.
    pub fn with_token(token: impl Into<String>) -> Self {
        let session = Self::new();
        *session.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token.into());
        session
    }

    /// Initialize from configuration and the `GTC_TOKEN` environment variable.
    pub fn init(config: &SessionConfig) -> Result<Self> {
        Self::load(config, std::env::var(TOKEN_ENV).ok())
    }

    /// Initialize from configuration and an explicit token override.
    ///
    /// The override wins over the token file. A missing token file is an
    /// anonymous session, not an error.
    pub fn load(config: &SessionConfig, token_override: Option<String>) -> Result<Self> {
        let token = match token_override.filter(|t| !t.trim().is_empty()) {
            Some(t) => Some(t.trim().to_string()),
            None => match &config.token_file {
                Some(path) => read_token_file(path)?,
                None => None,
            },
        };

        Ok(Self {
            token: RwLock::new(token),
            token_file: config.token_file.clone(),
            listeners: Mutex::new(Vec::new()),
        })
    }

    pub fn token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token().is_some()
    }

    pub fn token_file(&self) -> Option<&Path> {
        self.token_file.as_deref()
    }

    /// Store a new token, persisting it when a token file is configured.
    pub fn set_token(&self, token: &str) -> Result<()> {
        let token = token.trim();
        if token.is_empty() {
            anyhow::bail!("token must not be empty");
        }
        if let Some(path) = &self.token_file {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create token directory: {}", parent.display())
                })?;
            }
            std::fs::write(path, token)
                .with_context(|| format!("Failed to write token file: {}", path.display()))?;
        }
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token.to_string());
        self.emit(&SessionEvent::SignedIn);
        Ok(())
    }

    /// Explicit sign-out.
    pub fn sign_out(&self) -> Result<()> {
        self.clear_token()?;
        self.emit(&SessionEvent::SignedOut);
        Ok(())
    }

    /// Forced sign-out after the backend rejected the token.
    ///
    /// Never fails: a token file that cannot be removed is logged and the
    /// in-memory token is cleared regardless.
    pub(crate) fn expire(&self, status: u16) {
        if let Err(e) = self.clear_token() {
            warn!(error = %e, "could not remove persisted session token");
        }
        debug!(status, "session expired");
        self.emit(&SessionEvent::Expired { status });
    }

    /// Register a callback fired after a 401/403 has cleared the session.
    pub fn on_session_expired<F>(&self, callback: F)
    where
        F: Fn(u16) + Send + Sync + 'static,
    {
        self.on_session_changed(move |event| {
            if let SessionEvent::Expired { status } = event {
                callback(*status);
            }
        });
    }

    /// Register a callback fired on every session change.
    ///
    /// Callbacks run synchronously and must not register further listeners.
    pub fn on_session_changed<F>(&self, callback: F)
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(callback));
    }

    fn clear_token(&self) -> Result<()> {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = None;
        if let Some(path) = &self.token_file {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("Failed to remove token file: {}", path.display())
                    })
                }
            }
        }
        Ok(())
    }

    fn emit(&self, event: &SessionEvent) {
        let listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        for listener in listeners.iter() {
            listener(event);
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("authenticated", &self.is_authenticated())
            .field("token_file", &self.token_file)
            .finish()
    }
}

fn read_token_file(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let token = content.trim();
            Ok((!token.is_empty()).then(|| token.to_string()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => {
            Err(e).with_context(|| format!("Failed to read token file: {}", path.display()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn file_config(tmp: &TempDir) -> SessionConfig {
        SessionConfig {
            token_file: Some(tmp.path().join("state").join("session.token")),
        }
    }

    #[test]
    fn test_missing_token_file_is_anonymous() {
        let tmp = TempDir::new().unwrap();
        let session = Session::load(&file_config(&tmp), None).unwrap();
        assert!(!session.is_authenticated());
    }

    #[test]
    fn test_override_beats_file() {
        let tmp = TempDir::new().unwrap();
        let cfg = file_config(&tmp);
        let seeded = Session::load(&cfg, None).unwrap();
        seeded.set_token("from-file").unwrap();

        let session = Session::load(&cfg, Some("from-env".into())).unwrap();
        assert_eq!(session.token().as_deref(), Some("from-env"));

        let session = Session::load(&cfg, Some("   ".into())).unwrap();
        assert_eq!(session.token().as_deref(), Some("from-file"));
    }

    #[test]
    fn test_set_token_persists_and_sign_out_removes() {
        let tmp = TempDir::new().unwrap();
        let cfg = file_config(&tmp);
        let session = Session::load(&cfg, None).unwrap();
        session.set_token("  abc  ").unwrap();

        let path = cfg.token_file.clone().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "abc");

        session.sign_out().unwrap();
        assert!(!session.is_authenticated());
        assert!(!path.exists());
    }

    #[test]
    fn test_expire_clears_and_notifies() {
        let tmp = TempDir::new().unwrap();
        let session = Session::load(&file_config(&tmp), None).unwrap();
        session.set_token("abc").unwrap();

        let expired = Arc::new(AtomicUsize::new(0));
        let seen = expired.clone();
        session.on_session_expired(move |status| {
            assert_eq!(status, 403);
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let changes = Arc::new(Mutex::new(Vec::new()));
        let log = changes.clone();
        session.on_session_changed(move |e| log.lock().unwrap().push(e.clone()));

        session.expire(403);
        assert!(!session.is_authenticated());
        assert_eq!(expired.load(Ordering::SeqCst), 1);
        assert_eq!(
            *changes.lock().unwrap(),
            vec![SessionEvent::Expired { status: 403 }]
        );
    }

    #[test]
    fn test_empty_token_rejected() {
        let session = Session::new();
        assert!(session.set_token("  ").is_err());
        assert!(!session.is_authenticated());
    }
}
