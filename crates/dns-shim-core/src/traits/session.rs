// # Session API Trait
//
// Authentication surface of the directory API. The session bootstrap in
// `crate::session` drives it once at startup.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A session known to the directory API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Session id used for revocation
    pub id: i64,
    /// Whether this is the session the request was made with
    #[serde(default)]
    pub current_session: bool,
    /// User agent that opened the session
    #[serde(default)]
    pub user_agent: Option<String>,
}

/// Trait for directory session management
///
/// Implementations hold the session credential and attach it to every
/// subsequent request, together with a fixed client identity.
#[async_trait]
pub trait SessionApi: Send + Sync {
    /// Exchange the shared secret for a session credential
    ///
    /// Must fail with [`crate::Error::Authentication`] when the secret is
    /// rejected.
    async fn authenticate(&self, secret: &str) -> Result<(), crate::Error>;

    /// List sessions visible to the current credential
    async fn list_sessions(&self) -> Result<Vec<SessionInfo>, crate::Error>;

    /// Revoke a session by id
    async fn revoke_session(&self, id: i64) -> Result<(), crate::Error>;

    /// Identity sent with every request, used to recognise our own sessions
    fn client_identity(&self) -> &str;
}
