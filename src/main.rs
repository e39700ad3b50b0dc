use slog::o;
use slog::Drain;
use std::io::Read;
use std::sync::Arc;
use std::{env, fs};

mod crypto;
mod logging;
mod models;
mod repo;
mod service;
mod spotify;
mod token;
mod wrapped;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Result<T> = std::result::Result<T, Error>;

/// Format an error message with context, ready for `?` into `crate::Error`
#[macro_export]
macro_rules! se {
    ($($arg:tt)*) => {{
        format!($($arg)*)
    }};
}

/// Build a tide response, either a json body or an error status with a message
#[macro_export]
macro_rules! resp {
    (json => $obj:expr) => {{
        $crate::resp!(status => 200, json => $obj)
    }};
    (status => $status:expr, json => $obj:expr) => {{
        tide::Response::builder($status)
            .content_type(tide::http::mime::JSON)
            .body(tide::Body::from_json(&$obj)?)
            .build()
    }};
    (status => $status:expr, message => $msg:expr) => {{
        tide::Response::builder($status)
            .content_type(tide::http::mime::JSON)
            .body(serde_json::json!({ "error": $msg }))
            .build()
    }};
}

fn env_or(k: &str, default: &str) -> String {
    env::var(k).unwrap_or_else(|_| default.to_string())
}

lazy_static::lazy_static! {
    pub static ref CONFIG: Config = Config::load();

    // The "base" logger that all crates should branch off of
    pub static ref BASE_LOG: slog::Logger = {
        let level: slog::Level = CONFIG.log_level
                .parse()
                .expect("invalid log_level");
        if CONFIG.log_format == "pretty" {
            let decorator = slog_term::TermDecorator::new().build();
            let drain = slog_term::CompactFormat::new(decorator).build().fuse();
            let drain = slog_async::Async::new(drain).build().fuse();
            let drain = slog::LevelFilter::new(drain, level).fuse();
            slog::Logger::root(drain, o!())
        } else {
            let drain = slog_json::Json::default(std::io::stderr()).fuse();
            let drain = slog_async::Async::new(drain).build().fuse();
            let drain = slog::LevelFilter::new(drain, level).fuse();
            slog::Logger::root(drain, o!())
        }
    };

    // Base logger
    pub static ref LOG: slog::Logger = BASE_LOG.new(slog::o!("app" => "wrapped"));
}

#[derive(serde::Deserialize)]
pub struct Config {
    pub version: String,
    pub ssl: bool,
    pub host: String,
    pub port: u16,
    pub log_format: String,
    pub log_level: String,
    pub spotify_client_id: String,
    pub spotify_secret_id: Option<String>,
    pub spotify_accounts_url: String,
    pub spotify_api_url: String,
    // unset means everything lives in memory for the lifetime of the process
    pub db_url: Option<String>,
    pub enc_key: String,
    pub refresh_timeout_seconds: u64,
    pub top_items_limit: u32,
}
impl Config {
    pub fn load() -> Self {
        let version = fs::File::open("commit_hash.txt")
            .map(|mut f| {
                let mut s = String::new();
                f.read_to_string(&mut s).expect("Error reading commit_hash");
                s.trim().to_string()
            })
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            version,
            ssl: env_or("SSL", "false") == "true",
            host: env_or("HOST", "localhost"),
            port: env_or("PORT", "3030").parse().expect("invalid port"),
            log_format: env_or("LOG_FORMAT", "json")
                .to_lowercase()
                .trim()
                .to_string(),
            log_level: env_or("LOG_LEVEL", "INFO"),
            spotify_client_id: env_or("SPOTIFY_CLIENT_ID", "fake"),
            spotify_secret_id: env::var("SPOTIFY_SECRET_ID").ok(),
            spotify_accounts_url: env_or("SPOTIFY_ACCOUNTS_URL", "https://accounts.spotify.com"),
            spotify_api_url: env_or("SPOTIFY_API_URL", "https://api.spotify.com"),
            db_url: env::var("DATABASE_URL").ok(),
            enc_key: env_or("ENC_KEY", "01234567890123456789012345678901"),
            refresh_timeout_seconds: env_or("REFRESH_TIMEOUT_SECONDS", "5")
                .parse()
                .expect("invalid refresh_timeout_seconds"),
            top_items_limit: env_or("TOP_ITEMS_LIMIT", "5")
                .parse()
                .expect("invalid top_items_limit"),
        }
    }
    pub fn initialize(&self) -> anyhow::Result<()> {
        if self.enc_key.len() != 32 {
            anyhow::bail!("ENC_KEY must be exactly 32 bytes, got {}", self.enc_key.len());
        }
        slog::info!(
            LOG, "initialized config";
            "version" => &self.version,
            "ssl" => &self.ssl,
            "host" => &self.host,
            "port" => &self.port,
            "log_format" => &self.log_format,
            "log_level" => &self.log_level,
            "storage" => if self.db_url.is_some() { "postgres" } else { "memory" },
            "refresh_timeout_seconds" => self.refresh_timeout_seconds,
            "top_items_limit" => self.top_items_limit,
        );
        Ok(())
    }
    pub fn host(&self) -> String {
        let p = if self.ssl { "https" } else { "http" };
        format!("{}://{}:{}", p, self.host, self.port)
    }
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

async fn storage() -> anyhow::Result<(
    Arc<dyn repo::AccountRepository>,
    Arc<dyn repo::WrappedRepository>,
)> {
    match &CONFIG.db_url {
        Some(db_url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(5)
                .connect(db_url)
                .await?;
            Ok((
                Arc::new(repo::PgAccountRepository::new(pool.clone())),
                Arc::new(repo::PgWrappedRepository::new(pool)),
            ))
        }
        None => {
            slog::warn!(LOG, "DATABASE_URL not set, accounts and wrappeds are kept in memory");
            Ok((
                Arc::new(repo::MemoryAccountRepository::default()),
                Arc::new(repo::MemoryWrappedRepository::default()),
            ))
        }
    }
}

#[async_std::main]
async fn main() -> anyhow::Result<()> {
    // try sourcing a .env if one exists
    dotenv::dotenv().ok();
    CONFIG.initialize()?;

    let (accounts, wrappeds) = storage().await?;
    let spotify = Arc::new(spotify::SpotifyClient::from_config(&CONFIG));
    let state = service::State {
        accounts,
        wrappeds,
        tokens: spotify.clone(),
        top_items: spotify,
    };
    let app = service::app(state);

    slog::info!(LOG, "running at {}", CONFIG.host());
    app.listen(CONFIG.listen_addr()).await?;
    Ok(())
}
