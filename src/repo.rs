/*!
Where accounts and wrappeds live

The postgres backend expects these tables to exist:

```sql
create table wrapped.accounts (
    user_id bigint primary key,
    access_token text,
    access_nonce text,
    access_expires timestamptz,
    refresh_token text,
    refresh_nonce text,
    created timestamptz not null default now(),
    modified timestamptz not null default now()
);

create table wrapped.wrappeds (
    id text primary key,
    user_id bigint not null references wrapped.accounts(user_id) on delete cascade,
    slides text[] not null,
    artist_images jsonb not null,
    track_images jsonb not null,
    kind text not null,
    created timestamptz not null
);
```
*/
use std::collections::HashMap;

use async_mutex::Mutex;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;

use crate::models::{AccessGrant, Account, Wrapped};
use crate::wrapped::Image;
use crate::{crypto, se, Result};

#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn find(&self, user_id: i64) -> Result<Option<Account>>;

    /// Insert or replace the stored account
    async fn save(&self, account: &Account) -> Result<()>;
}

#[async_trait]
pub trait WrappedRepository: Send + Sync {
    async fn save(&self, wrapped: &Wrapped) -> Result<String>;

    async fn find(&self, id: &str) -> Result<Option<Wrapped>>;

    /// All of an owner's wrappeds, newest first
    async fn find_by_owner(&self, owner: i64) -> Result<Vec<Wrapped>>;
}

#[derive(Default)]
pub struct MemoryAccountRepository {
    accounts: Mutex<HashMap<i64, Account>>,
}

#[async_trait]
impl AccountRepository for MemoryAccountRepository {
    async fn find(&self, user_id: i64) -> Result<Option<Account>> {
        Ok(self.accounts.lock().await.get(&user_id).cloned())
    }

    async fn save(&self, account: &Account) -> Result<()> {
        self.accounts
            .lock()
            .await
            .insert(account.user_id, account.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryWrappedRepository {
    wrappeds: Mutex<HashMap<String, Wrapped>>,
}

#[async_trait]
impl WrappedRepository for MemoryWrappedRepository {
    async fn save(&self, wrapped: &Wrapped) -> Result<String> {
        let mut lock = self.wrappeds.lock().await;
        if lock.contains_key(wrapped.id()) {
            return Err(se!("wrapped {} already exists", wrapped.id()).into());
        }
        lock.insert(wrapped.id().to_string(), wrapped.clone());
        Ok(wrapped.id().to_string())
    }

    async fn find(&self, id: &str) -> Result<Option<Wrapped>> {
        Ok(self.wrappeds.lock().await.get(id).cloned())
    }

    async fn find_by_owner(&self, owner: i64) -> Result<Vec<Wrapped>> {
        let lock = self.wrappeds.lock().await;
        let mut owned = lock
            .values()
            .filter(|w| w.owner() == owner)
            .cloned()
            .collect::<Vec<_>>();
        owned.sort_by(|a, b| b.created().cmp(&a.created()).then_with(|| a.id().cmp(b.id())));
        Ok(owned)
    }
}

#[derive(sqlx::FromRow, Debug)]
struct AccountRow {
    user_id: i64,
    // the spotify access token, AES_256_GCM encrypted with the
    // application's ENC_KEY and the `access_nonce` generated
    // when the value was encrypted.
    access_token: Option<String>,
    access_nonce: Option<String>,
    access_expires: Option<DateTime<Utc>>,
    // encrypted and stored the same way as the access token
    refresh_token: Option<String>,
    refresh_nonce: Option<String>,
}

impl AccountRow {
    fn into_account(self) -> Result<Account> {
        let access = match (self.access_token, self.access_nonce, self.access_expires) {
            (Some(value), Some(nonce), Some(expires)) => Some(AccessGrant {
                token: crypto::decrypt(&crypto::Enc { value, nonce })?,
                expires,
            }),
            _ => None,
        };
        let refresh_token = match (self.refresh_token, self.refresh_nonce) {
            (Some(value), Some(nonce)) => Some(crypto::decrypt(&crypto::Enc { value, nonce })?),
            _ => None,
        };
        Ok(Account {
            user_id: self.user_id,
            access,
            refresh_token,
        })
    }
}

pub struct PgAccountRepository {
    pool: PgPool,
}

impl PgAccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountRepository for PgAccountRepository {
    async fn find(&self, user_id: i64) -> Result<Option<Account>> {
        let row = sqlx::query_as::<_, AccountRow>(
            "
            select user_id, access_token, access_nonce, access_expires, refresh_token, refresh_nonce
            from wrapped.accounts where user_id = $1
            ",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| se!("error fetching account {} {}", user_id, e))?;
        row.map(AccountRow::into_account).transpose()
    }

    async fn save(&self, account: &Account) -> Result<()> {
        let access = account
            .access
            .as_ref()
            .map(|grant| crypto::encrypt(&grant.token).map(|enc| (enc, grant.expires)))
            .transpose()?;
        let refresh = account
            .refresh_token
            .as_deref()
            .map(crypto::encrypt)
            .transpose()?;
        let (access_token, access_nonce, access_expires) = match access {
            Some((enc, expires)) => (Some(enc.value), Some(enc.nonce), Some(expires)),
            None => (None, None, None),
        };
        let (refresh_token, refresh_nonce) = match refresh {
            Some(enc) => (Some(enc.value), Some(enc.nonce)),
            None => (None, None),
        };
        sqlx::query(
            "
            insert into
            wrapped.accounts (
                user_id,
                access_token, access_nonce, access_expires,
                refresh_token, refresh_nonce
            )
            values ($1, $2, $3, $4, $5, $6)
            on conflict (user_id) do update set
            access_token = excluded.access_token, access_nonce = excluded.access_nonce,
            access_expires = excluded.access_expires,
            refresh_token = excluded.refresh_token, refresh_nonce = excluded.refresh_nonce,
            modified = now()
            ",
        )
        .bind(account.user_id)
        .bind(access_token)
        .bind(access_nonce)
        .bind(access_expires)
        .bind(refresh_token)
        .bind(refresh_nonce)
        .execute(&self.pool)
        .await
        .map_err(|e| se!("error saving account {} {}", account.user_id, e))?;
        Ok(())
    }
}

#[derive(sqlx::FromRow, Debug)]
struct WrappedRow {
    id: String,
    user_id: i64,
    slides: Vec<String>,
    artist_images: Json<Vec<Option<Image>>>,
    track_images: Json<Vec<Option<Image>>>,
    kind: String,
    created: DateTime<Utc>,
}

impl From<WrappedRow> for Wrapped {
    fn from(row: WrappedRow) -> Self {
        Wrapped::restore(
            row.id,
            row.user_id,
            row.slides,
            row.artist_images.0,
            row.track_images.0,
            row.kind,
            row.created,
        )
    }
}

pub struct PgWrappedRepository {
    pool: PgPool,
}

impl PgWrappedRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WrappedRepository for PgWrappedRepository {
    async fn save(&self, wrapped: &Wrapped) -> Result<String> {
        let id = sqlx::query_scalar::<_, String>(
            "
            insert into
            wrapped.wrappeds (id, user_id, slides, artist_images, track_images, kind, created)
            values ($1, $2, $3, $4, $5, $6, $7)
            returning id
            ",
        )
        .bind(wrapped.id())
        .bind(wrapped.owner())
        .bind(wrapped.slides())
        .bind(Json(wrapped.artist_images()))
        .bind(Json(wrapped.track_images()))
        .bind(wrapped.kind())
        .bind(wrapped.created())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| se!("error inserting wrapped {} {}", wrapped.id(), e))?;
        Ok(id)
    }

    async fn find(&self, id: &str) -> Result<Option<Wrapped>> {
        let row = sqlx::query_as::<_, WrappedRow>("select * from wrapped.wrappeds where id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| se!("error fetching wrapped {} {}", id, e))?;
        Ok(row.map(Wrapped::from))
    }

    async fn find_by_owner(&self, owner: i64) -> Result<Vec<Wrapped>> {
        let rows = sqlx::query_as::<_, WrappedRow>(
            "
            select * from wrapped.wrappeds
            where user_id = $1
            order by created desc, id
            ",
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| se!("error fetching wrappeds for user {} {}", owner, e))?;
        Ok(rows.into_iter().map(Wrapped::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTISTS: &str = include_str!("../test_inputs/example_artists.json");
    const TRACKS: &str = include_str!("../test_inputs/example_tracks.json");

    #[async_std::test]
    async fn memory_accounts_round_trip() {
        let repo = MemoryAccountRepository::default();
        assert!(repo.find(1).await.unwrap().is_none());

        let mut account = Account::new(1, Some("refresh".to_string()));
        repo.save(&account).await.unwrap();
        assert_eq!(repo.find(1).await.unwrap(), Some(account.clone()));

        account.access = Some(AccessGrant {
            token: "access".to_string(),
            expires: Utc::now(),
        });
        repo.save(&account).await.unwrap();
        assert_eq!(repo.find(1).await.unwrap(), Some(account));
    }

    #[async_std::test]
    async fn memory_wrappeds_are_found_by_id_and_owner() {
        let repo = MemoryWrappedRepository::default();
        let first = Wrapped::create(1, ARTISTS, TRACKS).unwrap();
        async_std::task::sleep(std::time::Duration::from_millis(2)).await;
        let second = Wrapped::create(1, ARTISTS, TRACKS).unwrap();
        let other = Wrapped::create(2, ARTISTS, TRACKS).unwrap();
        for w in [&first, &second, &other].iter() {
            assert_eq!(repo.save(w).await.unwrap(), w.id());
        }

        assert_eq!(repo.find(first.id()).await.unwrap(), Some(first.clone()));
        assert!(repo.find("missing").await.unwrap().is_none());

        let owned = repo.find_by_owner(1).await.unwrap();
        assert_eq!(owned, vec![second, first]);
        assert!(repo.find_by_owner(3).await.unwrap().is_empty());
    }

    #[async_std::test]
    async fn memory_wrappeds_are_immutable() {
        let repo = MemoryWrappedRepository::default();
        let w = Wrapped::create(1, ARTISTS, TRACKS).unwrap();
        repo.save(&w).await.unwrap();
        assert!(repo.save(&w).await.is_err());
    }
}
