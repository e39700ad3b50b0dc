use std::sync::Arc;

use tide::{Request, StatusCode};

use crate::models::{Account, Wrapped};
use crate::repo::{AccountRepository, WrappedRepository};
use crate::spotify::TopItems;
use crate::token::TokenEndpoint;
use crate::{resp, se, CONFIG, LOG};

/// Everything a request needs, handed in by whoever starts the server
#[derive(Clone)]
pub struct State {
    pub accounts: Arc<dyn AccountRepository>,
    pub wrappeds: Arc<dyn WrappedRepository>,
    pub tokens: Arc<dyn TokenEndpoint>,
    pub top_items: Arc<dyn TopItems>,
}

pub fn app(state: State) -> tide::Server<State> {
    let mut app = tide::with_state(state);
    app.at("/status").get(status);
    app.at("/accounts/:user_id/credentials").put(link_credentials);
    app.at("/accounts/:user_id/wrapped")
        .post(create_wrapped)
        .get(list_wrapped);
    app.at("/wrapped/:id").get(get_wrapped);
    app.with(crate::logging::LogMiddleware::new());
    app
}

fn server_error(e: crate::Error) -> tide::Error {
    tide::Error::from_str(StatusCode::InternalServerError, e.to_string())
}

macro_rules! user_id_or_400 {
    ($req:expr) => {{
        match $req.param("user_id").map(|id| id.parse::<i64>()) {
            Ok(Ok(id)) => id,
            _ => {
                return Ok(resp!(status => 400, message => "user id must be an integer"));
            }
        }
    }};
}

#[derive(serde::Serialize)]
struct Status<'a> {
    ok: &'a str,
    version: &'a str,
}

async fn status(_req: Request<State>) -> tide::Result {
    Ok(resp!(json => Status {
        ok: "ok",
        version: &CONFIG.version
    }))
}

#[derive(serde::Deserialize)]
struct Credentials {
    refresh_token: String,
}

/// Store a refresh token delegated to us for `user_id`. Any access token
/// we had is dropped, the next wrapped will mint a fresh one.
async fn link_credentials(mut req: Request<State>) -> tide::Result {
    let user_id = user_id_or_400!(req);
    let credentials: Credentials = match req.body_json().await {
        Ok(credentials) => credentials,
        Err(e) => {
            return Ok(resp!(status => 400, message => se!("invalid credentials {}", e)));
        }
    };
    let accounts = &req.state().accounts;
    let mut account = accounts
        .find(user_id)
        .await
        .map_err(server_error)?
        .unwrap_or_else(|| Account::new(user_id, None));
    account.refresh_token = Some(credentials.refresh_token);
    account.access = None;
    accounts.save(&account).await.map_err(server_error)?;
    slog::info!(LOG, "linked account credentials"; "user_id" => user_id);
    Ok(resp!(json => serde_json::json!({ "ok": "ok", "user_id": user_id })))
}

/// Pull the account's current top artists and tracks and turn them into a new wrapped
async fn create_wrapped(req: Request<State>) -> tide::Result {
    let user_id = user_id_or_400!(req);
    let state = req.state();
    let mut account = match state.accounts.find(user_id).await.map_err(server_error)? {
        Some(account) => account,
        None => {
            return Ok(resp!(status => 404, message => se!("unknown account {}", user_id)));
        }
    };

    let refreshing = account.is_expired();
    let access_token = match account.get_valid_token(&*state.tokens).await {
        Ok(token) => token,
        Err(e) => {
            slog::warn!(LOG, "unable to get a valid access token"; "user_id" => user_id, "error" => e.to_string());
            return Ok(resp!(status => 401, message => e.to_string()));
        }
    };
    if refreshing {
        state.accounts.save(&account).await.map_err(server_error)?;
    }

    let artists = match state.top_items.top_artists(&access_token).await {
        Ok(artists) => artists,
        Err(e) => return Ok(resp!(status => 502, message => se!("error fetching top artists {}", e))),
    };
    let tracks = match state.top_items.top_tracks(&access_token).await {
        Ok(tracks) => tracks,
        Err(e) => return Ok(resp!(status => 502, message => se!("error fetching top tracks {}", e))),
    };
    let wrapped = match Wrapped::create(user_id, &artists, &tracks) {
        Ok(wrapped) => wrapped,
        Err(e) => {
            slog::error!(LOG, "upstream sent an unusable payload"; "user_id" => user_id, "error" => e.to_string());
            return Ok(resp!(status => 502, message => e.to_string()));
        }
    };
    state.wrappeds.save(&wrapped).await.map_err(server_error)?;
    slog::info!(
        LOG, "created wrapped";
        "user_id" => user_id,
        "wrapped_id" => wrapped.id(),
        "slides" => wrapped.slides().len(),
    );
    Ok(resp!(status => 201, json => wrapped))
}

#[derive(serde::Serialize)]
struct WrappedList {
    count: usize,
    wrapped: Vec<Wrapped>,
}

async fn list_wrapped(req: Request<State>) -> tide::Result {
    let user_id = user_id_or_400!(req);
    let state = req.state();
    if state.accounts.find(user_id).await.map_err(server_error)?.is_none() {
        return Ok(resp!(status => 404, message => se!("unknown account {}", user_id)));
    }
    let wrapped = state
        .wrappeds
        .find_by_owner(user_id)
        .await
        .map_err(server_error)?;
    Ok(resp!(json => WrappedList {
        count: wrapped.len(),
        wrapped,
    }))
}

async fn get_wrapped(req: Request<State>) -> tide::Result {
    let id = req.param("id")?;
    match req.state().wrappeds.find(id).await.map_err(server_error)? {
        Some(wrapped) => Ok(resp!(json => wrapped)),
        None => Ok(resp!(status => 404, message => se!("unknown wrapped {}", id))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::{MemoryAccountRepository, MemoryWrappedRepository};
    use crate::token::tests::FakeTokenEndpoint;
    use async_trait::async_trait;
    use chrono::Utc;
    use tide::http::{Method, Url};

    const ARTISTS: &str = include_str!("../test_inputs/example_artists.json");
    const TRACKS: &str = include_str!("../test_inputs/example_tracks.json");

    struct FakeTopItems {
        artists: std::result::Result<String, String>,
        tracks: std::result::Result<String, String>,
        tokens: std::sync::Mutex<Vec<String>>,
    }

    impl FakeTopItems {
        fn new(artists: &str, tracks: &str) -> Self {
            Self {
                artists: Ok(artists.to_string()),
                tracks: Ok(tracks.to_string()),
                tokens: std::sync::Mutex::new(vec![]),
            }
        }
    }

    #[async_trait]
    impl TopItems for FakeTopItems {
        async fn top_artists(&self, access_token: &str) -> crate::Result<String> {
            self.tokens.lock().unwrap().push(access_token.to_string());
            Ok(self.artists.clone()?)
        }

        async fn top_tracks(&self, access_token: &str) -> crate::Result<String> {
            self.tokens.lock().unwrap().push(access_token.to_string());
            Ok(self.tracks.clone()?)
        }
    }

    struct Harness {
        app: tide::Server<State>,
        accounts: Arc<MemoryAccountRepository>,
        tokens: Arc<FakeTokenEndpoint>,
        top_items: Arc<FakeTopItems>,
    }

    fn harness(tokens: FakeTokenEndpoint, top_items: FakeTopItems) -> Harness {
        let accounts = Arc::new(MemoryAccountRepository::default());
        let tokens = Arc::new(tokens);
        let top_items = Arc::new(top_items);
        let app = app(State {
            accounts: accounts.clone(),
            wrappeds: Arc::new(MemoryWrappedRepository::default()),
            tokens: tokens.clone(),
            top_items: top_items.clone(),
        });
        Harness {
            app,
            accounts,
            tokens,
            top_items,
        }
    }

    async fn call(
        app: &tide::Server<State>,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let url = Url::parse(&format!("http://localhost{}", path)).unwrap();
        let mut req = tide::http::Request::new(method, url);
        if let Some(body) = body {
            req.set_body(tide::Body::from_json(&body).unwrap());
        }
        let mut resp: tide::http::Response = app.respond(req).await.unwrap();
        let json = resp.body_json().await.unwrap_or(serde_json::Value::Null);
        (resp.status(), json)
    }

    async fn link(h: &Harness, user_id: i64) {
        let (status, _) = call(
            &h.app,
            Method::Put,
            &format!("/accounts/{}/credentials", user_id),
            Some(serde_json::json!({ "refresh_token": "refresh-7" })),
        )
        .await;
        assert_eq!(status, StatusCode::Ok);
    }

    #[async_std::test]
    async fn status_reports_ok() {
        let h = harness(FakeTokenEndpoint::granting("a", 60), FakeTopItems::new(ARTISTS, TRACKS));
        let (status, body) = call(&h.app, Method::Get, "/status", None).await;
        assert_eq!(status, StatusCode::Ok);
        assert_eq!(body["ok"], "ok");
    }

    #[async_std::test]
    async fn create_refreshes_then_synthesizes_and_stores() {
        let h = harness(
            FakeTokenEndpoint::granting("fresh-token", 3600),
            FakeTopItems::new(ARTISTS, TRACKS),
        );
        link(&h, 7).await;

        let (status, created) = call(&h.app, Method::Post, "/accounts/7/wrapped", None).await;
        assert_eq!(status, StatusCode::Created);
        assert_eq!(created["owner"], 7);
        assert_eq!(created["type"], "Single Wrapped");
        assert_eq!(created["slides"].as_array().unwrap().len(), 8);
        assert_eq!(created["slides"][0], "Your number one artist was Artik & Asti!");
        assert_eq!(created["artist_images"].as_array().unwrap().len(), 5);
        assert!(created["artist_images"][4].is_null());

        // one refresh, the fresh token was used upstream and persisted
        assert_eq!(h.tokens.calls(), 1);
        assert_eq!(
            *h.top_items.tokens.lock().unwrap(),
            vec!["fresh-token".to_string(), "fresh-token".to_string()]
        );
        let account = h.accounts.find(7).await.unwrap().unwrap();
        assert_eq!(account.access.as_ref().unwrap().token, "fresh-token");
        assert!(!account.is_expired());

        let id = created["id"].as_str().unwrap();
        let (status, fetched) = call(&h.app, Method::Get, &format!("/wrapped/{}", id), None).await;
        assert_eq!(status, StatusCode::Ok);
        assert_eq!(fetched, created);

        // a second wrapped reuses the still valid token
        let (status, _) = call(&h.app, Method::Post, "/accounts/7/wrapped", None).await;
        assert_eq!(status, StatusCode::Created);
        assert_eq!(h.tokens.calls(), 1);

        let (status, listed) = call(&h.app, Method::Get, "/accounts/7/wrapped", None).await;
        assert_eq!(status, StatusCode::Ok);
        assert_eq!(listed["count"], 2);
    }

    #[async_std::test]
    async fn refresh_failure_is_unauthorized() {
        let h = harness(
            FakeTokenEndpoint::failing("invalid_grant"),
            FakeTopItems::new(ARTISTS, TRACKS),
        );
        link(&h, 7).await;

        let (status, body) = call(&h.app, Method::Post, "/accounts/7/wrapped", None).await;
        assert_eq!(status, StatusCode::Unauthorized);
        assert!(body["error"].as_str().unwrap().contains("invalid_grant"));
        assert!(h.top_items.tokens.lock().unwrap().is_empty());
        let (_, listed) = call(&h.app, Method::Get, "/accounts/7/wrapped", None).await;
        assert_eq!(listed["count"], 0);
    }

    #[async_std::test]
    async fn malformed_upstream_payload_creates_nothing() {
        let h = harness(
            FakeTokenEndpoint::granting("a", 3600),
            FakeTopItems::new(ARTISTS, r#"{"tracks": []}"#),
        );
        link(&h, 7).await;

        let (status, body) = call(&h.app, Method::Post, "/accounts/7/wrapped", None).await;
        assert_eq!(status, StatusCode::BadGateway);
        assert!(body["error"].as_str().unwrap().contains("top tracks"));
        let (_, listed) = call(&h.app, Method::Get, "/accounts/7/wrapped", None).await;
        assert_eq!(listed["count"], 0);
    }

    #[async_std::test]
    async fn upstream_fetch_failure_is_bad_gateway() {
        let mut top_items = FakeTopItems::new(ARTISTS, TRACKS);
        top_items.artists = Err("connection refused".to_string());
        let h = harness(FakeTokenEndpoint::granting("a", 3600), top_items);
        link(&h, 7).await;

        let (status, _) = call(&h.app, Method::Post, "/accounts/7/wrapped", None).await;
        assert_eq!(status, StatusCode::BadGateway);
    }

    #[async_std::test]
    async fn valid_token_skips_refresh() {
        let h = harness(FakeTokenEndpoint::failing("unused"), FakeTopItems::new(ARTISTS, TRACKS));
        let mut account = Account::new(9, Some("r".to_string()));
        account.access = Some(crate::models::AccessGrant {
            token: "still-good".to_string(),
            expires: Utc::now() + chrono::Duration::minutes(10),
        });
        h.accounts.save(&account).await.unwrap();

        let (status, _) = call(&h.app, Method::Post, "/accounts/9/wrapped", None).await;
        assert_eq!(status, StatusCode::Created);
        assert_eq!(h.tokens.calls(), 0);
        assert_eq!(h.top_items.tokens.lock().unwrap()[0], "still-good");
    }

    #[async_std::test]
    async fn unknown_ids() {
        let h = harness(FakeTokenEndpoint::granting("a", 60), FakeTopItems::new(ARTISTS, TRACKS));
        let (status, _) = call(&h.app, Method::Post, "/accounts/1/wrapped", None).await;
        assert_eq!(status, StatusCode::NotFound);
        let (status, _) = call(&h.app, Method::Get, "/accounts/1/wrapped", None).await;
        assert_eq!(status, StatusCode::NotFound);
        let (status, _) = call(&h.app, Method::Get, "/wrapped/nope", None).await;
        assert_eq!(status, StatusCode::NotFound);
        let (status, _) = call(&h.app, Method::Post, "/accounts/abc/wrapped", None).await;
        assert_eq!(status, StatusCode::BadRequest);
    }

    #[async_std::test]
    async fn linking_requires_a_refresh_token() {
        let h = harness(FakeTokenEndpoint::granting("a", 60), FakeTopItems::new(ARTISTS, TRACKS));
        let (status, _) = call(
            &h.app,
            Method::Put,
            "/accounts/3/credentials",
            Some(serde_json::json!({ "token": "x" })),
        )
        .await;
        assert_eq!(status, StatusCode::BadRequest);
        assert!(h.accounts.find(3).await.unwrap().is_none());
    }

    #[async_std::test]
    async fn relinking_drops_the_old_access_token() {
        let h = harness(FakeTokenEndpoint::granting("a", 60), FakeTopItems::new(ARTISTS, TRACKS));
        let mut account = Account::new(4, Some("old".to_string()));
        account.access = Some(crate::models::AccessGrant {
            token: "old-access".to_string(),
            expires: Utc::now() + chrono::Duration::minutes(10),
        });
        h.accounts.save(&account).await.unwrap();

        link(&h, 4).await;
        let account = h.accounts.find(4).await.unwrap().unwrap();
        assert_eq!(account.refresh_token.as_deref(), Some("refresh-7"));
        assert!(account.access.is_none());
    }
}
