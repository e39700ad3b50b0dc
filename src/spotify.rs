use std::time::Duration;

use async_trait::async_trait;

use crate::token::{AuthRefreshError, RefreshedAccess, TokenEndpoint};
use crate::{se, Config, Result};

/// The listener's top artists and tracks, as the raw json the api returns
#[async_trait]
pub trait TopItems: Send + Sync {
    async fn top_artists(&self, access_token: &str) -> Result<String>;
    async fn top_tracks(&self, access_token: &str) -> Result<String>;
}

pub struct SpotifyClient {
    client_id: String,
    secret_id: Option<String>,
    accounts_url: String,
    api_url: String,
    limit: u32,
    refresh_timeout: Duration,
}

impl SpotifyClient {
    pub fn from_config(config: &Config) -> Self {
        Self {
            client_id: config.spotify_client_id.clone(),
            secret_id: config.spotify_secret_id.clone(),
            accounts_url: config.spotify_accounts_url.trim_end_matches('/').to_string(),
            api_url: config.spotify_api_url.trim_end_matches('/').to_string(),
            limit: config.top_items_limit,
            refresh_timeout: Duration::from_secs(config.refresh_timeout_seconds),
        }
    }

    fn top_url(&self, kind: &str) -> String {
        format!(
            "{}/v1/me/top/{}?limit={}&time_range=short_term",
            self.api_url, kind, self.limit
        )
    }

    async fn get_top(&self, kind: &str, access_token: &str) -> Result<String> {
        let mut resp = surf::get(self.top_url(kind))
            .header("authorization", format!("Bearer {}", access_token))
            .send()
            .await
            .map_err(|e| se!("get top {} error {}", kind, e))?;
        let body = resp
            .body_string()
            .await
            .map_err(|e| se!("get top {} body error {}", kind, e))?;
        if !resp.status().is_success() {
            return Err(se!("get top {} status {} {}", kind, resp.status(), body).into());
        }
        Ok(body)
    }
}

#[derive(serde::Serialize)]
struct RefreshParams<'a> {
    grant_type: &'a str,
    refresh_token: &'a str,
    client_id: &'a str,
}

#[async_trait]
impl TokenEndpoint for SpotifyClient {
    async fn refresh(&self, refresh_token: &str) -> std::result::Result<RefreshedAccess, AuthRefreshError> {
        let body = surf::Body::from_form(&RefreshParams {
            grant_type: "refresh_token",
            refresh_token,
            client_id: &self.client_id,
        })
        .map_err(|e| AuthRefreshError::Request(se!("error generating refresh form {}", e)))?;
        let mut req = surf::post(format!("{}/api/token", self.accounts_url)).body(body);
        if let Some(secret_id) = &self.secret_id {
            let auth = base64::encode(format!("{}:{}", self.client_id, secret_id).as_bytes());
            req = req.header("authorization", format!("Basic {}", auth));
        }
        let mut resp = req
            .send()
            .await
            .map_err(|e| AuthRefreshError::Request(se!("account refresh request error {}", e)))?;
        let body = resp
            .body_string()
            .await
            .map_err(|e| AuthRefreshError::Request(se!("account refresh body error {}", e)))?;
        if !resp.status().is_success() {
            return Err(AuthRefreshError::Status {
                status: resp.status().into(),
                body,
            });
        }
        Ok(serde_json::from_str(&body)?)
    }

    fn timeout(&self) -> Duration {
        self.refresh_timeout
    }
}

#[async_trait]
impl TopItems for SpotifyClient {
    async fn top_artists(&self, access_token: &str) -> Result<String> {
        self.get_top("artists", access_token).await
    }

    async fn top_tracks(&self, access_token: &str) -> Result<String> {
        self.get_top("tracks", access_token).await
    }
}
