/*!
Turning a listener's top artists and top tracks into wrapped slides

The upstream payloads are already ranked, the first item is the
listener's number one. Nothing here re-sorts them.

A listener with no top artists gets a single slide and no image metadata
at all, not even for the tracks they did send.
*/
use std::collections::HashMap;

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, PartialEq)]
pub struct Image {
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(serde::Deserialize, Debug, Clone, PartialEq)]
pub struct Followers {
    pub total: i64,
}

#[derive(serde::Deserialize, Debug, Clone, PartialEq)]
pub struct Artist {
    pub name: String,
    pub popularity: i64,
    pub followers: Followers,
    pub genres: Vec<String>,
    pub images: Vec<Image>,
}

#[derive(serde::Deserialize, Debug, Clone, PartialEq)]
pub struct Album {
    pub images: Vec<Image>,
}

#[derive(serde::Deserialize, Debug, Clone, PartialEq)]
pub struct Track {
    pub name: String,
    pub popularity: i64,
    pub duration_ms: i64,
    pub explicit: bool,
    pub album: Album,
}

/// `{"items": [...]}`, the shape of both top-items endpoints
#[derive(serde::Deserialize, Debug, Clone, PartialEq)]
pub struct Items<T> {
    pub items: Vec<T>,
}

pub type ArtistSummaryInput = Items<Artist>;
pub type TrackSummaryInput = Items<Track>;

#[derive(Debug, Clone, PartialEq)]
pub struct Synthesis {
    pub slides: Vec<String>,
    pub artist_images: Vec<Option<Image>>,
    pub track_images: Vec<Option<Image>>,
}

pub fn synthesize(artists: &[Artist], tracks: &[Track]) -> Synthesis {
    let top_artist = match artists.first() {
        Some(artist) => artist,
        None => {
            return Synthesis {
                slides: vec!["You didn't listen to any music recently.".to_string()],
                artist_images: vec![],
                track_images: vec![],
            }
        }
    };

    let mut slides = vec![
        format!("Your number one artist was {}!", top_artist.name),
        format!("That makes you one of {} fans!", top_artist.followers.total),
    ];
    slides.push(match favorite_genre(artists) {
        Some(genre) => format!("Your most played genre was {}!", genre),
        None => "Your favorite artists are so niche, we don't know what genre they are!".to_string(),
    });
    let artist_popularity = mean(artists.iter().map(|a| a.popularity));
    slides.push(artist_popularity_slide(artist_popularity).to_string());

    if let Some(top_track) = tracks.first() {
        slides.push(format!("Your number one song was {}!", top_track.name));
        let duration = mean(tracks.iter().map(|t| t.duration_ms));
        slides.push(duration_slide(duration).to_string());
        let explicit = tracks.iter().filter(|t| t.explicit).count();
        slides.push(explicit_slide(explicit));
        let track_popularity = mean(tracks.iter().map(|t| t.popularity));
        slides.push(track_popularity_slide(track_popularity).to_string());
    } else {
        slides.push("You didn't listen to any songs recently.".to_string());
    }

    Synthesis {
        slides,
        artist_images: artists.iter().map(|a| a.images.first().cloned()).collect(),
        track_images: tracks
            .iter()
            .map(|t| t.album.images.first().cloned())
            .collect(),
    }
}

/// Only called with a non-empty iterator
fn mean(values: impl Iterator<Item = i64>) -> f64 {
    let (sum, count) = values.fold((0f64, 0usize), |(sum, count), v| (sum + v as f64, count + 1));
    sum / count as f64
}

/// Most common genre across all artists. On a tie the genre
/// that showed up first wins.
fn favorite_genre(artists: &[Artist]) -> Option<&str> {
    let mut order: Vec<&str> = vec![];
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for genre in artists.iter().flat_map(|a| a.genres.iter()) {
        let count = counts.entry(genre.as_str()).or_insert_with(|| {
            order.push(genre.as_str());
            0
        });
        *count += 1;
    }
    let mut best: Option<(&str, usize)> = None;
    for genre in order {
        let count = counts[genre];
        match best {
            Some((_, best_count)) if best_count >= count => (),
            _ => best = Some((genre, count)),
        }
    }
    best.map(|(genre, _)| genre)
}

fn artist_popularity_slide(popularity: f64) -> &'static str {
    if popularity >= 80.0 {
        "Everyone's on the same page about your favorite artists!"
    } else if popularity >= 60.0 {
        "Your favorite artists are interesting, but not controversial."
    } else if popularity >= 40.0 {
        "You have a niche taste in artists!"
    } else if popularity >= 20.0 {
        "You tend to enjoy the smaller creators!"
    } else {
        "Your taste in artists is quite unique!"
    }
}

fn duration_slide(duration_ms: f64) -> &'static str {
    if duration_ms <= 60_000.0 {
        "You tend to like shorter songs."
    } else if duration_ms <= 240_000.0 {
        "You tend to like mid-length songs."
    } else {
        "You tend to like longer songs."
    }
}

fn explicit_slide(explicit: usize) -> String {
    match explicit {
        0 => "None of your top 5 songs were explicit 😇".to_string(),
        1..=3 => format!("{} of your top 5 songs were explicit.", explicit),
        n => format!("Oh my! {} of your top 5 songs were explicit.", n),
    }
}

fn track_popularity_slide(popularity: f64) -> &'static str {
    if popularity >= 67.0 {
        "Your playlist was packed with songs everyone knows!"
    } else if popularity >= 33.0 {
        "Your playlist was a fresh change of pace for most people!"
    } else {
        "Your taste in songs is truly one of a kind!"
    }
}
