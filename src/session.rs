use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Deserialize;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::api::AuthApi;
use crate::error::{ClientError, Result};
use crate::models::User;
use crate::storage::KeyValueStore;

pub const REVALIDATE_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const TOKEN_KEY: &str = "token";

#[derive(Debug, Clone)]
pub struct Session {
    pub user: User,
    pub token: String,
    pub last_validated_at: Instant,
}

#[derive(Deserialize)]
struct Claims {
    exp: Option<i64>,
}

/// Holds the signed-in user and token, re-checking the token with the
/// backend at most once per [`REVALIDATE_INTERVAL`] unless forced.
pub struct SessionHolder {
    auth: Arc<dyn AuthApi>,
    store: Arc<dyn KeyValueStore>,
    session: RwLock<Option<Session>>,
    revalidate_every: Duration,
}

impl SessionHolder {
    #[must_use]
    pub fn new(auth: Arc<dyn AuthApi>, store: Arc<dyn KeyValueStore>) -> Self {
        SessionHolder {
            auth,
            store,
            session: RwLock::new(None),
            revalidate_every: REVALIDATE_INTERVAL,
        }
    }

    /// # Errors
    ///
    /// The backend error for rejected credentials, or a storage error.
    pub async fn login(&self, email: &str, password: &str) -> Result<User> {
        let response = self.auth.login(email, password).await?;
        self.store.set(TOKEN_KEY, response.token.clone()).await?;
        self.auth.use_token(Some(&response.token)).await;
        info!("logged in as {}", response.user.username);

        let user = response.user.clone();
        *self.session.write().await = Some(Session {
            user: response.user,
            token: response.token,
            last_validated_at: Instant::now(),
        });
        Ok(user)
    }

    /// Loads the stored token and validates it. `Ok(None)` means signed out.
    ///
    /// # Errors
    ///
    /// A storage error, or a network error while validating. A rejected token
    /// is not an error; it clears the session and returns `Ok(None)`.
    pub async fn restore(&self) -> Result<Option<User>> {
        let Some(token) = self.store.get(TOKEN_KEY).await? else {
            return Ok(None);
        };

        if token_expired(&token, Utc::now()) {
            info!("stored token has expired");
            self.clear().await?;
            return Ok(None);
        }

        match self.auth.me(&token).await {
            Ok(user) => {
                self.auth.use_token(Some(&token)).await;
                *self.session.write().await = Some(Session {
                    user: user.clone(),
                    token,
                    last_validated_at: Instant::now(),
                });
                Ok(Some(user))
            }
            Err(e) if e.is_unauthorized() => {
                warn!("stored token rejected: {e}");
                self.clear().await?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Returns the current user, re-validating if the last check is stale or
    /// `force` is set. A rejected token signs the user out.
    ///
    /// # Errors
    ///
    /// [`ClientError::Unauthenticated`] when signed out or when the backend
    /// rejects the token. Other failures during revalidation are returned
    /// as they are and keep the session.
    pub async fn ensure_valid(&self, force: bool) -> Result<User> {
        let (token, user) = {
            let session = self.session.read().await;
            let session = session.as_ref().ok_or(ClientError::Unauthenticated)?;
            if !force && session.last_validated_at.elapsed() < self.revalidate_every {
                return Ok(session.user.clone());
            }
            (session.token.clone(), session.user.clone())
        };

        if token_expired(&token, Utc::now()) {
            self.clear().await?;
            return Err(ClientError::Unauthenticated);
        }

        match self.auth.me(&token).await {
            Ok(fresh) => {
                if let Some(session) = self.session.write().await.as_mut() {
                    session.user = fresh.clone();
                    session.last_validated_at = Instant::now();
                }
                Ok(fresh)
            }
            Err(e) if e.is_unauthorized() => {
                warn!("session for {} rejected: {e}", user.username);
                self.clear().await?;
                Err(ClientError::Unauthenticated)
            }
            Err(e) => Err(e),
        }
    }

    /// # Errors
    ///
    /// The storage error when the token cannot be removed.
    pub async fn logout(&self) -> Result<()> {
        self.clear().await
    }

    pub async fn current_user(&self) -> Option<User> {
        self.session.read().await.as_ref().map(|s| s.user.clone())
    }

    pub async fn token(&self) -> Option<String> {
        self.session.read().await.as_ref().map(|s| s.token.clone())
    }

    async fn clear(&self) -> Result<()> {
        *self.session.write().await = None;
        self.auth.use_token(None).await;
        self.store.remove(TOKEN_KEY).await
    }
}

/// True only for a JWT whose `exp` claim has passed. Opaque tokens are
/// left to the backend.
#[must_use]
pub fn token_expired(token: &str, now: DateTime<Utc>) -> bool {
    let mut parts = token.split('.');
    let (Some(_), Some(payload), Some(_), None) = (parts.next(), parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    let Ok(bytes) = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')) else {
        return false;
    };
    match serde_json::from_slice::<Claims>(&bytes) {
        Ok(Claims { exp: Some(exp) }) => exp <= now.timestamp(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::AuthResponse;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    struct FakeAuth {
        me_calls: AtomicUsize,
        reject: StdMutex<bool>,
        current_token: StdMutex<Option<String>>,
    }

    impl FakeAuth {
        fn new() -> Self {
            Self {
                me_calls: AtomicUsize::new(0),
                reject: StdMutex::new(false),
                current_token: StdMutex::new(None),
            }
        }
    }

    fn user(name: &str) -> User {
        serde_json::from_value(serde_json::json!({"_id": format!("id-{name}"), "username": name})).unwrap()
    }

    #[async_trait]
    impl AuthApi for FakeAuth {
        async fn login(&self, email: &str, _password: &str) -> Result<AuthResponse> {
            Ok(AuthResponse { token: "T".to_string(), user: user(email) })
        }

        async fn me(&self, token: &str) -> Result<User> {
            self.me_calls.fetch_add(1, Ordering::SeqCst);
            if *self.reject.lock().unwrap() {
                return Err(ClientError::Http { status: 401, message: "jwt expired".to_string() });
            }
            Ok(user(&format!("owner-of-{token}")))
        }

        async fn use_token(&self, token: Option<&str>) {
            *self.current_token.lock().unwrap() = token.map(str::to_string);
        }
    }

    fn jwt_with_exp(exp: i64) -> String {
        let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"id":"u1","exp":{exp}}}"#));
        format!("eyJhbGciOiJIUzI1NiJ9.{payload}.sig")
    }

    #[tokio::test]
    async fn test_login_persists_token() {
        let auth = Arc::new(FakeAuth::new());
        let store = Arc::new(MemoryStore::new());
        let holder = SessionHolder::new(auth.clone(), store.clone());

        let user = holder.login("ana", "pw").await.unwrap();

        assert_eq!(user.username, "ana");
        assert_eq!(store.get(TOKEN_KEY).await.unwrap().as_deref(), Some("T"));
        assert_eq!(holder.token().await.as_deref(), Some("T"));
        assert_eq!(auth.current_token.lock().unwrap().as_deref(), Some("T"));
    }

    #[tokio::test]
    async fn test_restore_without_token_is_signed_out() {
        let holder = SessionHolder::new(Arc::new(FakeAuth::new()), Arc::new(MemoryStore::new()));
        assert!(holder.restore().await.unwrap().is_none());
        assert!(matches!(holder.ensure_valid(false).await, Err(ClientError::Unauthenticated)));
    }

    #[tokio::test]
    async fn test_restore_validates_stored_token() {
        let auth = Arc::new(FakeAuth::new());
        let store = Arc::new(MemoryStore::new());
        store.set(TOKEN_KEY, "T".to_string()).await.unwrap();
        let holder = SessionHolder::new(auth.clone(), store);

        let user = holder.restore().await.unwrap().unwrap();
        assert_eq!(user.username, "owner-of-T");
        assert_eq!(auth.me_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_restore_drops_rejected_token() {
        let auth = Arc::new(FakeAuth::new());
        *auth.reject.lock().unwrap() = true;
        let store = Arc::new(MemoryStore::new());
        store.set(TOKEN_KEY, "T".to_string()).await.unwrap();
        let holder = SessionHolder::new(auth, store.clone());

        assert!(holder.restore().await.unwrap().is_none());
        assert_eq!(store.get(TOKEN_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_restore_drops_expired_jwt_without_network() {
        let auth = Arc::new(FakeAuth::new());
        let store = Arc::new(MemoryStore::new());
        store.set(TOKEN_KEY, jwt_with_exp(1_000)).await.unwrap();
        let holder = SessionHolder::new(auth.clone(), store.clone());

        assert!(holder.restore().await.unwrap().is_none());
        assert_eq!(auth.me_calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.get(TOKEN_KEY).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_revalidates_at_most_every_five_minutes() {
        let auth = Arc::new(FakeAuth::new());
        let holder = SessionHolder::new(auth.clone(), Arc::new(MemoryStore::new()));
        holder.login("ana", "pw").await.unwrap();

        holder.ensure_valid(false).await.unwrap();
        tokio::time::advance(Duration::from_secs(4 * 60)).await;
        holder.ensure_valid(false).await.unwrap();
        assert_eq!(auth.me_calls.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_secs(61)).await;
        holder.ensure_valid(false).await.unwrap();
        assert_eq!(auth.me_calls.load(Ordering::SeqCst), 1);

        holder.ensure_valid(false).await.unwrap();
        assert_eq!(auth.me_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_forced_validation_and_rejection_signs_out() {
        let auth = Arc::new(FakeAuth::new());
        let store = Arc::new(MemoryStore::new());
        let holder = SessionHolder::new(auth.clone(), store.clone());
        holder.login("ana", "pw").await.unwrap();

        let refreshed = holder.ensure_valid(true).await.unwrap();
        assert_eq!(refreshed.username, "owner-of-T");

        *auth.reject.lock().unwrap() = true;
        assert!(matches!(holder.ensure_valid(true).await, Err(ClientError::Unauthenticated)));
        assert!(holder.current_user().await.is_none());
        assert_eq!(store.get(TOKEN_KEY).await.unwrap(), None);
        assert_eq!(*auth.current_token.lock().unwrap(), None);
    }

    #[test]
    fn test_token_expired() {
        let now = DateTime::from_timestamp(2_000, 0).unwrap();
        assert!(token_expired(&jwt_with_exp(1_999), now));
        assert!(!token_expired(&jwt_with_exp(2_001), now));
        assert!(!token_expired("opaque-session-token", now));
        assert!(!token_expired("a.!!!.c", now));
    }
}
