use chrono::{DateTime, Utc};

use crate::wrapped::{self, ArtistSummaryInput, Image, TrackSummaryInput};

/// A spotify access token along with the moment it stops being valid
#[derive(Debug, Clone, PartialEq)]
pub struct AccessGrant {
    pub token: String,
    pub expires: DateTime<Utc>,
}

/// The upstream credentials delegated to us by a user, one per user
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub user_id: i64,
    // absent until the first refresh
    pub access: Option<AccessGrant>,
    // the long lived token used to mint new access tokens
    pub refresh_token: Option<String>,
}

impl Account {
    pub fn new(user_id: i64, refresh_token: Option<String>) -> Self {
        Self {
            user_id,
            access: None,
            refresh_token,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PayloadFormatError {
    #[error("malformed top artists payload: {0}")]
    Artists(#[source] serde_json::Error),
    #[error("malformed top tracks payload: {0}")]
    Tracks(#[source] serde_json::Error),
}

pub const SINGLE_WRAPPED: &str = "Single Wrapped";

/// One generated wrapped. Never modified after it's created.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Wrapped {
    id: String,
    owner: i64,
    slides: Vec<String>,
    artist_images: Vec<Option<Image>>,
    track_images: Vec<Option<Image>>,
    #[serde(rename = "type")]
    kind: String,
    created: DateTime<Utc>,
}

impl Wrapped {
    /// Parse the raw top artists and top tracks payloads and synthesize
    /// a new wrapped for `owner`. Nothing is created if either payload is malformed.
    pub fn create(
        owner: i64,
        artist_payload: &str,
        track_payload: &str,
    ) -> Result<Self, PayloadFormatError> {
        let artists: ArtistSummaryInput =
            serde_json::from_str(artist_payload).map_err(PayloadFormatError::Artists)?;
        let tracks: TrackSummaryInput =
            serde_json::from_str(track_payload).map_err(PayloadFormatError::Tracks)?;
        let synthesis = wrapped::synthesize(&artists.items, &tracks.items);
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner,
            slides: synthesis.slides,
            artist_images: synthesis.artist_images,
            track_images: synthesis.track_images,
            kind: SINGLE_WRAPPED.to_string(),
            created: Utc::now(),
        })
    }

    /// Rebuild a wrapped that was previously stored
    pub fn restore(
        id: String,
        owner: i64,
        slides: Vec<String>,
        artist_images: Vec<Option<Image>>,
        track_images: Vec<Option<Image>>,
        kind: String,
        created: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            owner,
            slides,
            artist_images,
            track_images,
            kind,
            created,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn owner(&self) -> i64 {
        self.owner
    }

    pub fn slides(&self) -> &[String] {
        &self.slides
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn artist_images(&self) -> &[Option<Image>] {
        &self.artist_images
    }

    pub fn track_images(&self) -> &[Option<Image>] {
        &self.track_images
    }
}
