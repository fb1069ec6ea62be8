//! Authentication collaborator contract.
//!
//! The app host never inspects tokens. It hands an [`AuthClient`] to every
//! app through its props and lets the app ask for sessions. Production
//! desktops plug in a real identity service; [`InMemoryAuthClient`] is a
//! development and test implementation with opaque random tokens.

use crate::error::{AppHostError, AppHostResult};
use crate::lock;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

/// Default session lifetime.
pub const DEFAULT_SESSION_TTL_SECS: i64 = 3600;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub id: String,
    pub username: String,
    pub display_name: String,
}

/// Result of a successful `authenticate` or `refresh_token`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    pub token: String,
    pub user: UserInfo,
    pub permissions: Vec<String>,
    /// Seconds until the token expires.
    pub expires_in: i64,
}

/// Result of `verify_token`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenInfo {
    pub user: UserInfo,
    pub permissions: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait AuthClient: Send + Sync {
    async fn authenticate(&self, username: &str, password: &str) -> AppHostResult<AuthSession>;

    async fn verify_token(&self, token: &str) -> AppHostResult<TokenInfo>;

    /// Exchanges a valid token for a new one; the old token stops working.
    async fn refresh_token(&self, token: &str) -> AppHostResult<AuthSession>;

    async fn logout(&self, token: &str) -> AppHostResult<()>;
}

struct Account {
    password: String,
    user: UserInfo,
    permissions: Vec<String>,
}

struct SessionRecord {
    username: String,
    expires_at: DateTime<Utc>,
}

/// In-process auth service holding accounts and live sessions in memory.
pub struct InMemoryAuthClient {
    accounts: HashMap<String, Account>,
    sessions: Mutex<HashMap<String, SessionRecord>>,
    ttl: Duration,
}

impl Default for InMemoryAuthClient {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryAuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryAuthClient")
            .field("accounts", &self.accounts.len())
            .field("sessions", &self.active_sessions())
            .finish()
    }
}

impl InMemoryAuthClient {
    pub fn new() -> Self {
        Self {
            accounts: HashMap::new(),
            sessions: Mutex::new(HashMap::new()),
            ttl: Duration::seconds(DEFAULT_SESSION_TTL_SECS),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_user(
        mut self,
        username: &str,
        password: &str,
        display_name: &str,
        permissions: &[&str],
    ) -> Self {
        let user = UserInfo {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            display_name: display_name.to_string(),
        };
        self.accounts.insert(
            username.to_string(),
            Account {
                password: password.to_string(),
                user,
                permissions: permissions.iter().map(|p| p.to_string()).collect(),
            },
        );
        self
    }

    pub fn active_sessions(&self) -> usize {
        let now = Utc::now();
        lock(&self.sessions)
            .values()
            .filter(|s| s.expires_at > now)
            .count()
    }

    fn issue(&self, account: &Account) -> AuthSession {
        let token = Uuid::new_v4().simple().to_string();
        lock(&self.sessions).insert(
            token.clone(),
            SessionRecord {
                username: account.user.username.clone(),
                expires_at: Utc::now() + self.ttl,
            },
        );
        AuthSession {
            token,
            user: account.user.clone(),
            permissions: account.permissions.clone(),
            expires_in: self.ttl.num_seconds(),
        }
    }

    /// Returns the account behind a live token, evicting it if expired.
    fn live_account(&self, token: &str) -> AppHostResult<(&Account, DateTime<Utc>)> {
        let mut sessions = lock(&self.sessions);
        let record = sessions
            .get(token)
            .ok_or_else(|| AppHostError::Auth("invalid token".into()))?;
        if record.expires_at <= Utc::now() {
            sessions.remove(token);
            return Err(AppHostError::Auth("token expired".into()));
        }
        let expires_at = record.expires_at;
        let account = self
            .accounts
            .get(&record.username)
            .ok_or_else(|| AppHostError::Auth("account no longer exists".into()))?;
        Ok((account, expires_at))
    }
}

#[async_trait]
impl AuthClient for InMemoryAuthClient {
    async fn authenticate(&self, username: &str, password: &str) -> AppHostResult<AuthSession> {
        let account = self
            .accounts
            .get(username)
            .filter(|a| a.password == password)
            .ok_or_else(|| AppHostError::Auth("invalid username or password".into()))?;
        info!(username, "User authenticated");
        Ok(self.issue(account))
    }

    async fn verify_token(&self, token: &str) -> AppHostResult<TokenInfo> {
        let (account, expires_at) = self.live_account(token)?;
        Ok(TokenInfo {
            user: account.user.clone(),
            permissions: account.permissions.clone(),
            expires_at,
        })
    }

    async fn refresh_token(&self, token: &str) -> AppHostResult<AuthSession> {
        let (account, _) = self.live_account(token)?;
        lock(&self.sessions).remove(token);
        debug!(username = %account.user.username, "Token refreshed");
        Ok(self.issue(account))
    }

    async fn logout(&self, token: &str) -> AppHostResult<()> {
        if let Some(record) = lock(&self.sessions).remove(token) {
            info!(username = %record.username, "User logged out");
        }
        Ok(())
    }
}
