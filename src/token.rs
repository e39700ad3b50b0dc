/*!
Keeping an account's upstream access token valid
*/
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{AccessGrant, Account};
use crate::LOG;

#[derive(Debug, thiserror::Error)]
pub enum AuthRefreshError {
    #[error("account {0} has no refresh token")]
    MissingRefreshToken(i64),
    #[error("token refresh request failed: {0}")]
    Request(String),
    #[error("token refresh timed out after {0:?}")]
    Timeout(Duration),
    #[error("token endpoint responded with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed token refresh response: {0}")]
    MalformedResponse(#[from] serde_json::Error),
    #[error("token lifetime of {0} seconds is out of range")]
    InvalidLifetime(u64),
}

/// What the token endpoint hands back for a `refresh_token` grant.
/// Spotify may rotate the refresh token, in which case a new one is included.
#[derive(serde::Deserialize, Debug, Clone, PartialEq)]
pub struct RefreshedAccess {
    pub access_token: String,
    pub expires_in: u64,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Exchange a refresh token for a new access token. One request, no retries.
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedAccess, AuthRefreshError>;

    /// Upper bound on how long a single refresh may take
    fn timeout(&self) -> Duration;
}

impl Account {
    /// Whether the stored access token has expired. An account that
    /// never had an access token counts as expired.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match &self.access {
            Some(grant) => now > grant.expires,
            None => true,
        }
    }

    /// The stored access token, refreshing it first when it has expired
    pub async fn get_valid_token(
        &mut self,
        endpoint: &dyn TokenEndpoint,
    ) -> Result<String, AuthRefreshError> {
        if !self.is_expired() {
            if let Some(grant) = &self.access {
                return Ok(grant.token.clone());
            }
        }
        self.refresh(endpoint).await
    }

    /// Use the stored refresh token to get a new access token and
    /// store it along with its expiration time. Returns the new access token.
    pub async fn refresh(
        &mut self,
        endpoint: &dyn TokenEndpoint,
    ) -> Result<String, AuthRefreshError> {
        let refresh_token = self
            .refresh_token
            .as_deref()
            .ok_or(AuthRefreshError::MissingRefreshToken(self.user_id))?;

        slog::info!(LOG, "refreshing access token"; "user_id" => self.user_id);
        let timeout = endpoint.timeout();
        let access = async_std::future::timeout(timeout, endpoint.refresh(refresh_token))
            .await
            .map_err(|_| AuthRefreshError::Timeout(timeout))??;

        let expires = chrono::Duration::from_std(Duration::from_secs(access.expires_in))
            .ok()
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .ok_or(AuthRefreshError::InvalidLifetime(access.expires_in))?;
        self.access = Some(AccessGrant {
            token: access.access_token.clone(),
            expires,
        });
        if let Some(rotated) = access.refresh_token {
            self.refresh_token = Some(rotated);
        }
        slog::debug!(LOG, "access token refreshed"; "user_id" => self.user_id, "expires" => expires.to_rfc3339());
        Ok(access.access_token)
    }
}
