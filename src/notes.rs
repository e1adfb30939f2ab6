use serde::Serialize;
use thiserror::Error;

use crate::types::Track;

pub const MAX_NOTE_CHARS: usize = 500;

/// Field-level feedback for the note input. Never sent over the wire.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NoteValidationError {
    #[error("Note cannot be empty")]
    Empty,
    #[error("Note cannot exceed 500 characters")]
    TooLong,
    #[error("Note cannot be just whitespace")]
    Whitespace,
}

/// Checks raw input and returns the trimmed content to send.
pub fn validate_note_content(raw: &str) -> Result<String, NoteValidationError> {
    let length = raw.chars().count();
    if length == 0 {
        return Err(NoteValidationError::Empty);
    }
    if length > MAX_NOTE_CHARS {
        return Err(NoteValidationError::TooLong);
    }
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(NoteValidationError::Whitespace);
    }
    Ok(trimmed.to_string())
}

#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateNoteRequest {
    pub content: String,
    pub track_id: String,
    pub spotify_id: String,
    pub song_name: String,
    pub artist: String,
    pub album: String,
}

impl CreateNoteRequest {
    pub fn for_track(raw_content: &str, track: &Track) -> Result<Self, NoteValidationError> {
        let content = validate_note_content(raw_content)?;
        Ok(Self {
            content,
            track_id: track.id.clone(),
            spotify_id: track.id.clone(),
            song_name: track.name.clone(),
            artist: track.artist_names(),
            album: track.album.name.clone(),
        })
    }
}
