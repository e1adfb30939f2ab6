use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::auth::Route;
use crate::drag::{DragFeedback, NoteRect, Point, Viewport};
use crate::placement::NotePosition;
use crate::progress::ProgressEstimate;
use crate::time::now_millis;
use crate::types::{CurrentlyPlaying, Note, PositionedNote, User};

/// Envelope for everything exchanged with the renderer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiMessage {
    pub message_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub timestamp: u64,
}

impl UiMessage {
    pub fn new(message_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            message_type: message_type.into(),
            data,
            timestamp: now_millis().max(0) as u64,
        }
    }
}

/// Input from the renderer.
#[derive(Debug, Clone, PartialEq)]
pub enum DashboardCommand {
    /// Re-send current state, e.g. to a renderer that just connected.
    Sync,
    Refresh,
    PointerDown {
        note_id: String,
        pointer: Point,
        rect: NoteRect,
    },
    PointerMove {
        pointer: Point,
        viewport: Viewport,
    },
    PointerUp,
    SubmitNote {
        content: String,
    },
    DeleteNote {
        note_id: String,
    },
    Login,
    AuthCallback {
        query: String,
    },
    Logout,
    Navigate {
        path: String,
    },
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Unknown message type: {0}")]
    Unknown(String),
    #[error("Invalid {message_type} payload: {source}")]
    Payload {
        message_type: String,
        source: serde_json::Error,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PointerDownData {
    note_id: String,
    pointer: Point,
    rect: NoteRect,
}

#[derive(Deserialize)]
struct PointerMoveData {
    pointer: Point,
    viewport: Viewport,
}

#[derive(Deserialize)]
struct SubmitNoteData {
    content: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteNoteData {
    note_id: String,
}

#[derive(Deserialize)]
struct AuthCallbackData {
    query: String,
}

#[derive(Deserialize)]
struct NavigateData {
    path: String,
}

fn payload<T: serde::de::DeserializeOwned>(message: &UiMessage) -> Result<T, CommandError> {
    serde_json::from_value(message.data.clone()).map_err(|source| CommandError::Payload {
        message_type: message.message_type.clone(),
        source,
    })
}

pub fn parse_command(message: &UiMessage) -> Result<DashboardCommand, CommandError> {
    let command = match message.message_type.as_str() {
        "SYNC" => DashboardCommand::Sync,
        "REFRESH" => DashboardCommand::Refresh,
        "POINTER_DOWN" => {
            let data: PointerDownData = payload(message)?;
            DashboardCommand::PointerDown {
                note_id: data.note_id,
                pointer: data.pointer,
                rect: data.rect,
            }
        }
        "POINTER_MOVE" => {
            let data: PointerMoveData = payload(message)?;
            DashboardCommand::PointerMove {
                pointer: data.pointer,
                viewport: data.viewport,
            }
        }
        "POINTER_UP" => DashboardCommand::PointerUp,
        "SUBMIT_NOTE" => {
            let data: SubmitNoteData = payload(message)?;
            DashboardCommand::SubmitNote {
                content: data.content,
            }
        }
        "DELETE_NOTE" => {
            let data: DeleteNoteData = payload(message)?;
            DashboardCommand::DeleteNote {
                note_id: data.note_id,
            }
        }
        "LOGIN" => DashboardCommand::Login,
        "AUTH_CALLBACK" => {
            let data: AuthCallbackData = payload(message)?;
            DashboardCommand::AuthCallback { query: data.query }
        }
        "LOGOUT" => DashboardCommand::Logout,
        "NAVIGATE" => {
            let data: NavigateData = payload(message)?;
            DashboardCommand::Navigate { path: data.path }
        }
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(command)
}

/// Output to the renderer.
#[derive(Debug, Clone, PartialEq)]
pub enum DashboardEvent {
    NowPlaying(Option<CurrentlyPlaying>),
    Progress(ProgressEstimate),
    TrackEnded,
    NotesLoading,
    Notes(Vec<PositionedNote>),
    NoteMoved {
        note_id: String,
        position: NotePosition,
    },
    Drag(DragFeedback),
    NoteRejected {
        message: String,
    },
    NoteCreated(Note),
    NoteDeleted {
        note_id: String,
    },
    LoginUrl {
        url: String,
    },
    AuthFailed {
        message: String,
    },
    Authenticated {
        user: Option<User>,
    },
    SignedOut,
    Route(Route),
}

impl DashboardEvent {
    pub fn message_type(&self) -> &'static str {
        match self {
            DashboardEvent::NowPlaying(_) => "NOW_PLAYING",
            DashboardEvent::Progress(_) => "PROGRESS",
            DashboardEvent::TrackEnded => "TRACK_ENDED",
            DashboardEvent::NotesLoading => "NOTES_LOADING",
            DashboardEvent::Notes(_) => "NOTES",
            DashboardEvent::NoteMoved { .. } => "NOTE_MOVED",
            DashboardEvent::Drag(DragFeedback::Started { .. }) => "DRAG_STARTED",
            DashboardEvent::Drag(DragFeedback::Ended { .. }) => "DRAG_ENDED",
            DashboardEvent::NoteRejected { .. } => "NOTE_REJECTED",
            DashboardEvent::NoteCreated(_) => "NOTE_CREATED",
            DashboardEvent::NoteDeleted { .. } => "NOTE_DELETED",
            DashboardEvent::LoginUrl { .. } => "LOGIN_URL",
            DashboardEvent::AuthFailed { .. } => "AUTH_FAILED",
            DashboardEvent::Authenticated { .. } => "AUTHENTICATED",
            DashboardEvent::SignedOut => "SIGNED_OUT",
            DashboardEvent::Route(_) => "ROUTE",
        }
    }

    pub fn to_message(&self) -> UiMessage {
        let data = match self {
            DashboardEvent::NowPlaying(playing) => json!(playing),
            DashboardEvent::Progress(estimate) => json!(estimate),
            DashboardEvent::TrackEnded | DashboardEvent::NotesLoading | DashboardEvent::SignedOut => {
                json!({})
            }
            DashboardEvent::Notes(notes) => json!(notes),
            DashboardEvent::NoteMoved { note_id, position } => json!({
                "noteId": note_id,
                "position": position,
            }),
            DashboardEvent::Drag(DragFeedback::Started { note_id })
            | DashboardEvent::Drag(DragFeedback::Ended { note_id }) => json!({ "noteId": note_id }),
            DashboardEvent::NoteRejected { message } | DashboardEvent::AuthFailed { message } => {
                json!({ "message": message })
            }
            DashboardEvent::NoteCreated(note) => json!(note),
            DashboardEvent::NoteDeleted { note_id } => json!({ "noteId": note_id }),
            DashboardEvent::LoginUrl { url } => json!({ "url": url }),
            DashboardEvent::Authenticated { user } => json!({ "user": user }),
            DashboardEvent::Route(route) => json!({ "route": route, "path": route.path() }),
        };
        UiMessage::new(self.message_type(), data)
    }
}
