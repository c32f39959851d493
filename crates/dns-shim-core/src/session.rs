//! Startup session bootstrap
//!
//! Authenticates against the directory API and revokes sessions left behind
//! by earlier runs of this client. Session renewal is the client's concern.

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::traits::SessionApi;

/// Authenticate and clean up stale sessions
///
/// Returns the number of stale sessions revoked. Only authentication is
/// fatal; failing to list or revoke sessions is logged and ignored.
pub async fn open_session(api: &dyn SessionApi, secret: &str) -> Result<usize> {
    if secret.is_empty() {
        return Err(Error::auth("no secret configured"));
    }

    api.authenticate(secret).await.map_err(|e| match e {
        Error::Authentication(_) => e,
        other => Error::auth(other.to_string()),
    })?;
    info!("Authenticated against the directory API");

    let sessions = match api.list_sessions().await {
        Ok(sessions) => sessions,
        Err(e) => {
            warn!("Failed to list sessions, skipping cleanup: {}", e);
            return Ok(0);
        }
    };

    let identity = api.client_identity();
    let mut revoked = 0;
    for session in sessions {
        if session.current_session || session.user_agent.as_deref() != Some(identity) {
            continue;
        }

        match api.revoke_session(session.id).await {
            Ok(()) => {
                debug!("Revoked stale session {}", session.id);
                revoked += 1;
            }
            Err(e) => warn!("Failed to revoke stale session {}: {}", session.id, e),
        }
    }

    if revoked > 0 {
        info!("Revoked {} stale sessions", revoked);
    }
    Ok(revoked)
}
