use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::placement::NotePosition;
use crate::session::SessionStore;
use crate::time::format_note_date;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Artist {
    #[serde(default)]
    pub id: String,
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AlbumImage {
    pub url: String,
    pub height: Option<u32>,
    pub width: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Album {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub images: Vec<AlbumImage>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Track {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub artists: Vec<Artist>,
    pub album: Album,
}

impl Track {
    /// Artist names joined the way the player header shows them.
    pub fn artist_names(&self) -> String {
        self.artists
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn cover_url(&self) -> Option<&str> {
        self.album.images.first().map(|i| i.url.as_str())
    }
}

/// Playback state as reported by the music service proxy.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CurrentlyPlaying {
    #[serde(default)]
    pub is_playing: bool,
    #[serde(default)]
    pub progress_ms: u64,
    pub item: Track,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct NoteAuthor {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct NoteLocation {
    pub city: String,
    pub country: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    pub track_id: String,
    pub content: String,
    #[serde(rename = "createdBy", default)]
    pub author: Option<NoteAuthor>,
    #[serde(default)]
    pub location: Option<NoteLocation>,
    pub created_at: String,
    #[serde(default)]
    pub formatted_date: Option<String>,
}

impl Note {
    pub fn author_name(&self) -> &str {
        match &self.author {
            Some(author) if !author.name.trim().is_empty() => &author.name,
            _ => "Anonymous",
        }
    }

    pub fn location_label(&self) -> Option<String> {
        self.location
            .as_ref()
            .map(|l| format!("{}, {}", l.city, l.country))
    }

    pub fn display_date(&self) -> String {
        match &self.formatted_date {
            Some(date) if !date.is_empty() => date.clone(),
            _ => format_note_date(&self.created_at),
        }
    }
}

/// A note together with its client-side placement, flattened for the renderer.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct PositionedNote {
    #[serde(flatten)]
    pub note: Note,
    pub position: NotePosition,
    pub author_name: String,
    pub location_label: Option<String>,
    pub display_date: String,
}

impl PositionedNote {
    pub fn new(note: Note, position: NotePosition) -> Self {
        Self {
            author_name: note.author_name().to_string(),
            location_label: note.location_label(),
            display_date: note.display_date(),
            note,
            position,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct UserImage {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub images: Vec<UserImage>,
}

// Global state types
pub type SharedSession = Arc<Mutex<SessionStore>>;

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_note() -> Note {
        serde_json::from_value(serde_json::json!({
            "id": "n1",
            "trackId": "t1",
            "content": "great bridge",
            "createdBy": { "id": "u1", "name": "Mara" },
            "location": { "city": "Berlin", "country": "Germany" },
            "createdAt": "2025-03-04T10:00:00Z",
            "formattedDate": "Mar 4, 2025"
        }))
        .unwrap()
    }

    #[test]
    fn parses_backend_note_shape() {
        let note = sample_note();
        assert_eq!(note.track_id, "t1");
        assert_eq!(note.author_name(), "Mara");
        assert_eq!(note.location_label().as_deref(), Some("Berlin, Germany"));
        assert_eq!(note.display_date(), "Mar 4, 2025");
    }

    #[test]
    fn note_without_author_or_date_falls_back() {
        let note: Note = serde_json::from_value(serde_json::json!({
            "id": "n2",
            "trackId": "t1",
            "content": "hi",
            "createdAt": "2025-03-04T10:00:00Z"
        }))
        .unwrap();
        assert_eq!(note.author_name(), "Anonymous");
        assert_eq!(note.location_label(), None);
        assert_eq!(note.display_date(), "03/04/2025");
    }

    #[test]
    fn parses_currently_playing_and_joins_artists() {
        let playing: CurrentlyPlaying = serde_json::from_value(serde_json::json!({
            "is_playing": true,
            "progress_ms": 1200,
            "item": {
                "id": "t1",
                "name": "Song",
                "duration_ms": 200000,
                "artists": [{ "id": "a1", "name": "One" }, { "id": "a2", "name": "Two" }],
                "album": { "id": "al", "name": "Record", "images": [{ "url": "http://img/1" }] }
            }
        }))
        .unwrap();
        assert_eq!(playing.item.artist_names(), "One, Two");
        assert_eq!(playing.item.cover_url(), Some("http://img/1"));
    }

    #[test]
    fn positioned_note_flattens_note_fields() {
        let positioned = PositionedNote::new(
            sample_note(),
            NotePosition {
                x: 12.0,
                y: 40.0,
                rotation: 3.0,
                color: "#fef08a".to_string(),
            },
        );
        let value = serde_json::to_value(&positioned).unwrap();
        assert_eq!(value["id"], "n1");
        assert_eq!(value["trackId"], "t1");
        assert_eq!(value["position"]["color"], "#fef08a");
        assert_eq!(value["author_name"], "Mara");
    }
}
