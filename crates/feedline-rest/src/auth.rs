//! Authentication state
//!
//! `AuthSession` drives login (with an optional two-factor step) and logout
//! against an `AuthBackend`, keeps the `ApiClient` bearer token in sync, and
//! persists the signed-in user through an `AuthStore` so the next start
//! knows whether it is authenticated.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use feedline_api::{ApiError, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::client::ApiClient;
use crate::models::{LoginRequest, LoginResponse, TokenResponse, TwoFactorRequest, User};

/// What survives a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthState {
    pub token: String,
    pub user: User,
}

pub trait AuthStore: Send + Sync {
    fn load(&self) -> Result<Option<AuthState>>;
    fn save(&self, state: &AuthState) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// Auth state kept as a JSON file.
pub struct FileAuthStore {
    path: PathBuf,
}

impl FileAuthStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, action: &str, e: std::io::Error) -> ApiError {
        ApiError::internal(format!(
            "Failed to {} auth state at {}: {}",
            action,
            self.path.display(),
            e
        ))
    }
}

impl AuthStore for FileAuthStore {
    fn load(&self) -> Result<Option<AuthState>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error("read", e)),
        };
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn save(&self, state: &AuthState) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_error("create directory for", e))?;
        }
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| ApiError::internal(format!("Failed to serialize auth state: {}", e)))?;
        fs::write(&self.path, json).map_err(|e| self.io_error("write", e))
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error("remove", e)),
        }
    }
}

#[derive(Default)]
pub struct MemoryAuthStore {
    state: Mutex<Option<AuthState>>,
}

impl MemoryAuthStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AuthStore for MemoryAuthStore {
    fn load(&self) -> Result<Option<AuthState>> {
        Ok(self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, state: &AuthState) -> Result<()> {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = Some(state.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

/// The auth endpoints, plus where the bearer token goes once issued.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn login(&self, credentials: &LoginRequest) -> Result<LoginResponse>;
    async fn verify_two_factor(&self, verification: &TwoFactorRequest) -> Result<TokenResponse>;
    async fn logout(&self) -> Result<()>;
    fn set_token(&self, token: Option<String>);
}

#[async_trait]
impl AuthBackend for ApiClient {
    async fn login(&self, credentials: &LoginRequest) -> Result<LoginResponse> {
        ApiClient::login(self, credentials).await
    }

    async fn verify_two_factor(&self, verification: &TwoFactorRequest) -> Result<TokenResponse> {
        ApiClient::verify_two_factor(self, verification).await
    }

    async fn logout(&self) -> Result<()> {
        ApiClient::logout(self).await
    }

    fn set_token(&self, token: Option<String>) {
        ApiClient::set_token(self, token)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthStatus {
    SignedOut,
    /// Password accepted, waiting for the one-time code
    TwoFactorPending { challenge: Option<String> },
    SignedIn { user: User },
}

impl AuthStatus {
    pub fn is_signed_in(&self) -> bool {
        matches!(self, AuthStatus::SignedIn { .. })
    }
}

pub struct AuthSession {
    backend: Arc<dyn AuthBackend>,
    store: Arc<dyn AuthStore>,
    status: watch::Sender<AuthStatus>,
}

impl AuthSession {
    /// Start from whatever `store` remembers.
    ///
    /// An unreadable store is treated as signed out.
    pub fn restore(backend: Arc<dyn AuthBackend>, store: Arc<dyn AuthStore>) -> Self {
        let status = match store.load() {
            Ok(Some(state)) => {
                info!(user = %state.user.id, "Restored signed-in session");
                backend.set_token(Some(state.token));
                AuthStatus::SignedIn { user: state.user }
            }
            Ok(None) => AuthStatus::SignedOut,
            Err(e) => {
                warn!(error = %e, "Could not read auth state, starting signed out");
                AuthStatus::SignedOut
            }
        };
        let (status, _) = watch::channel(status);
        Self {
            backend,
            store,
            status,
        }
    }

    pub fn status(&self) -> AuthStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthStatus> {
        self.status.subscribe()
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthStatus> {
        let credentials = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let status = match self.backend.login(&credentials).await? {
            LoginResponse::Authenticated { token, user } => self.sign_in(token, user)?,
            LoginResponse::TwoFactorRequired { challenge, .. } => {
                info!("Two-factor verification required");
                AuthStatus::TwoFactorPending { challenge }
            }
        };
        self.status.send_replace(status.clone());
        Ok(status)
    }

    /// Complete a login that asked for a two-factor code.
    pub async fn verify_two_factor(&self, code: &str) -> Result<AuthStatus> {
        let challenge = match self.status() {
            AuthStatus::TwoFactorPending { challenge } => challenge,
            other => {
                return Err(ApiError::InvalidOperation {
                    message: format!("No two-factor challenge pending (status: {:?})", other),
                });
            }
        };
        let verification = TwoFactorRequest {
            code: code.to_string(),
            challenge,
        };
        let TokenResponse { token, user } = self.backend.verify_two_factor(&verification).await?;
        let status = self.sign_in(token, user)?;
        self.status.send_replace(status.clone());
        Ok(status)
    }

    /// Sign out on the server and locally.
    ///
    /// The local session is cleared even when the server call fails.
    pub async fn logout(&self) -> Result<()> {
        if let Err(e) = self.backend.logout().await {
            warn!(error = %e, "Server logout failed, clearing local session anyway");
        }
        self.expire()
    }

    /// Drop the local session without calling the server, e.g. after a 401.
    pub fn expire(&self) -> Result<()> {
        self.backend.set_token(None);
        self.status.send_replace(AuthStatus::SignedOut);
        info!("Signed out");
        self.store.clear()
    }

    fn sign_in(&self, token: String, user: User) -> Result<AuthStatus> {
        let state = AuthState {
            token: token.clone(),
            user: user.clone(),
        };
        self.store.save(&state)?;
        self.backend.set_token(Some(token));
        info!(user = %user.id, "Signed in");
        Ok(AuthStatus::SignedIn { user })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedline_api::ItemId;
    use std::collections::VecDeque;

    fn ada() -> User {
        User {
            id: ItemId::from("u1"),
            name: "Ada".to_string(),
            username: None,
            avatar_url: None,
            followers_count: 0,
            following_count: 0,
        }
    }

    /// Scripted backend answering logins in order.
    #[derive(Default)]
    struct FakeAuthBackend {
        logins: Mutex<VecDeque<LoginResponse>>,
        token: Mutex<Option<String>>,
        verified_codes: Mutex<Vec<String>>,
        fail_logout: bool,
    }

    #[async_trait]
    impl AuthBackend for FakeAuthBackend {
        async fn login(&self, _credentials: &LoginRequest) -> Result<LoginResponse> {
            self.logins
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| ApiError::Unauthorized {
                    message: "bad credentials".to_string(),
                })
        }

        async fn verify_two_factor(&self, verification: &TwoFactorRequest) -> Result<TokenResponse> {
            self.verified_codes
                .lock()
                .unwrap()
                .push(verification.code.clone());
            Ok(TokenResponse {
                token: "2fa-token".to_string(),
                user: ada(),
            })
        }

        async fn logout(&self) -> Result<()> {
            if self.fail_logout {
                Err(ApiError::network("offline"))
            } else {
                Ok(())
            }
        }

        fn set_token(&self, token: Option<String>) {
            *self.token.lock().unwrap() = token;
        }
    }

    impl FakeAuthBackend {
        fn answering(response: LoginResponse) -> Self {
            let backend = Self::default();
            backend.logins.lock().unwrap().push_back(response);
            backend
        }

        fn token(&self) -> Option<String> {
            self.token.lock().unwrap().clone()
        }
    }

    #[tokio::test]
    async fn test_login_persists_and_sets_token() {
        let backend = Arc::new(FakeAuthBackend::answering(LoginResponse::Authenticated {
            token: "tok".to_string(),
            user: ada(),
        }));
        let store = Arc::new(MemoryAuthStore::new());
        let session = AuthSession::restore(backend.clone(), store.clone());
        assert_eq!(session.status(), AuthStatus::SignedOut);

        let status = session.login("ada@example.com", "pw").await.unwrap();

        assert!(status.is_signed_in());
        assert_eq!(backend.token().as_deref(), Some("tok"));
        assert_eq!(store.load().unwrap().unwrap().token, "tok");
    }

    #[tokio::test]
    async fn test_two_factor_flow() {
        let backend = Arc::new(FakeAuthBackend::answering(
            LoginResponse::TwoFactorRequired {
                two_factor: true,
                challenge: Some("c-1".to_string()),
            },
        ));
        let session = AuthSession::restore(backend.clone(), Arc::new(MemoryAuthStore::new()));

        let pending = session.login("ada@example.com", "pw").await.unwrap();
        assert!(matches!(pending, AuthStatus::TwoFactorPending { .. }));
        assert_eq!(backend.token(), None);

        let status = session.verify_two_factor("123456").await.unwrap();
        assert!(status.is_signed_in());
        assert_eq!(backend.token().as_deref(), Some("2fa-token"));
        assert_eq!(*backend.verified_codes.lock().unwrap(), vec!["123456"]);
    }

    #[tokio::test]
    async fn test_verify_without_challenge_is_rejected() {
        let session = AuthSession::restore(
            Arc::new(FakeAuthBackend::default()),
            Arc::new(MemoryAuthStore::new()),
        );
        let err = session.verify_two_factor("000000").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidOperation { .. }));
    }

    #[tokio::test]
    async fn test_logout_clears_locally_even_if_server_fails() {
        let backend = Arc::new(FakeAuthBackend {
            fail_logout: true,
            ..FakeAuthBackend::default()
        });
        let store = Arc::new(MemoryAuthStore::new());
        store
            .save(&AuthState {
                token: "old".to_string(),
                user: ada(),
            })
            .unwrap();

        let session = AuthSession::restore(backend.clone(), store.clone());
        assert!(session.status().is_signed_in());
        assert_eq!(backend.token().as_deref(), Some("old"));

        let mut status_rx = session.subscribe();
        session.logout().await.unwrap();

        assert_eq!(*status_rx.borrow_and_update(), AuthStatus::SignedOut);
        assert_eq!(backend.token(), None);
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileAuthStore::new(dir.path().join("nested").join("auth.json"));
        assert_eq!(store.load().unwrap(), None);

        let state = AuthState {
            token: "tok".to_string(),
            user: ada(),
        };
        store.save(&state).unwrap();
        assert_eq!(store.load().unwrap(), Some(state));

        store.clear().unwrap();
        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_corrupt_file_starts_signed_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.json");
        fs::write(&path, "not json").unwrap();

        let store = Arc::new(FileAuthStore::new(path));
        assert!(matches!(store.load(), Err(ApiError::Decode { .. })));

        let session = AuthSession::restore(Arc::new(FakeAuthBackend::default()), store);
        assert_eq!(session.status(), AuthStatus::SignedOut);
    }
}
