use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::api::{ApiClient, ApiOutcome};
use crate::auth::{self, resolve_route, Route, STATE_LENGTH};
use crate::commands::{DashboardCommand, DashboardEvent};
use crate::config::SpotifyConfig;
use crate::drag::DragEngine;
use crate::notes::CreateNoteRequest;
use crate::placement::PositionBook;
use crate::progress::{
    PlaybackSnapshot, ProgressEstimate, ProgressEvent, ProgressEventKind, ProgressTicker,
};
use crate::time::now_millis;
use crate::types::{CurrentlyPlaying, Note, PositionedNote};

pub const SAVE_FAILED_MESSAGE: &str = "Failed to save note. Please try again.";
pub const NO_TRACK_MESSAGE: &str = "No track playing";

/// Owns everything the dashboard screen shows and reacts to renderer input,
/// poll results and progress ticks on a single task.
pub struct Dashboard {
    api: ApiClient,
    spotify: SpotifyConfig,
    poll_interval: Duration,
    events: mpsc::UnboundedSender<DashboardEvent>,
    ticker: ProgressTicker,
    progress_rx: mpsc::UnboundedReceiver<ProgressEvent>,
    progress: Option<ProgressEstimate>,
    current: Option<CurrentlyPlaying>,
    notes: Vec<PositionedNote>,
    positions: PositionBook,
    drag: DragEngine,
    rng: StdRng,
}

impl Dashboard {
    pub fn new(
        api: ApiClient,
        spotify: SpotifyConfig,
        poll_interval: Duration,
        events: mpsc::UnboundedSender<DashboardEvent>,
    ) -> Self {
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        Self {
            api,
            spotify,
            poll_interval,
            events,
            ticker: ProgressTicker::new(progress_tx),
            progress_rx,
            progress: None,
            current: None,
            notes: Vec::new(),
            positions: PositionBook::new(),
            drag: DragEngine::new(),
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn current(&self) -> Option<&CurrentlyPlaying> {
        self.current.as_ref()
    }

    pub fn notes(&self) -> &[PositionedNote] {
        &self.notes
    }

    pub fn positions(&self) -> &PositionBook {
        &self.positions
    }

    pub fn drag(&self) -> &DragEngine {
        &self.drag
    }

    pub fn progress(&self) -> Option<&ProgressEstimate> {
        self.progress.as_ref()
    }

    fn emit(&self, event: DashboardEvent) {
        if self.events.send(event).is_err() {
            debug!("No event listener attached, dropping dashboard event");
        }
    }

    async fn is_authenticated(&self) -> bool {
        self.api
            .session()
            .lock()
            .await
            .session()
            .is_authenticated(now_millis())
    }

    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<DashboardCommand>,
        shutdown: CancellationToken,
    ) {
        info!("Dashboard started, polling every {:?}", self.poll_interval);
        let mut poll = tokio::time::interval(self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        info!("Command channel closed");
                        break;
                    }
                },
                Some(event) = self.progress_rx.recv() => {
                    if self.handle_progress(event) {
                        self.refresh_now_playing().await;
                    }
                }
                _ = poll.tick() => {
                    if self.is_authenticated().await {
                        self.refresh_now_playing().await;
                    }
                }
            }
        }

        self.ticker.stop();
        self.drag.cancel();
        info!("Dashboard stopped");
    }

    /// Applies a progress event. Returns true when the track just ended and
    /// playback should be polled again.
    pub fn handle_progress(&mut self, event: ProgressEvent) -> bool {
        if !self.ticker.is_current(event.generation) {
            debug!("Dropping stale progress tick from generation {}", event.generation);
            return false;
        }
        match event.kind {
            ProgressEventKind::Tick(estimate) => {
                self.progress = Some(estimate.clone());
                self.emit(DashboardEvent::Progress(estimate));
                false
            }
            ProgressEventKind::Ended(estimate) => {
                self.progress = Some(estimate.clone());
                self.emit(DashboardEvent::Progress(estimate));
                self.emit(DashboardEvent::TrackEnded);
                true
            }
        }
    }

    pub async fn handle_command(&mut self, command: DashboardCommand) {
        match command {
            DashboardCommand::Sync => self.sync().await,
            DashboardCommand::Refresh => self.refresh_now_playing().await,
            DashboardCommand::PointerDown {
                note_id,
                pointer,
                rect,
            } => {
                if self.positions.get(&note_id).is_none() {
                    warn!("Pointer-down on unknown note {}", note_id);
                    return;
                }
                if let Some(feedback) = self.drag.pointer_down(&note_id, pointer, rect) {
                    self.emit(DashboardEvent::Drag(feedback));
                }
            }
            DashboardCommand::PointerMove { pointer, viewport } => {
                if let Some((note_id, position)) =
                    self.drag.pointer_move(pointer, viewport, &mut self.positions)
                {
                    if let Some(entry) = self.notes.iter_mut().find(|n| n.note.id == note_id) {
                        *entry = PositionedNote::new(entry.note.clone(), position.clone());
                    }
                    self.emit(DashboardEvent::NoteMoved { note_id, position });
                }
            }
            DashboardCommand::PointerUp => {
                if let Some(feedback) = self.drag.pointer_up() {
                    self.emit(DashboardEvent::Drag(feedback));
                }
            }
            DashboardCommand::SubmitNote { content } => self.submit_note(&content).await,
            DashboardCommand::DeleteNote { note_id } => self.delete_note(&note_id).await,
            DashboardCommand::Login => self.begin_login().await,
            DashboardCommand::AuthCallback { query } => self.complete_login(&query).await,
            DashboardCommand::Logout => self.sign_out().await,
            DashboardCommand::Navigate { path } => {
                let route = resolve_route(&path, self.is_authenticated().await);
                debug!("Navigate {} -> {:?}", path, route);
                self.emit(DashboardEvent::Route(route));
            }
        }
    }

    async fn sync(&mut self) {
        let route = if self.is_authenticated().await {
            Route::Dashboard
        } else {
            Route::Login
        };
        self.emit(DashboardEvent::Route(route));
        self.emit(DashboardEvent::NowPlaying(self.current.clone()));
        if let Some(progress) = &self.progress {
            self.emit(DashboardEvent::Progress(progress.clone()));
        }
        if self.current.is_some() {
            self.emit(DashboardEvent::Notes(self.notes.clone()));
        }
    }

    pub async fn refresh_now_playing(&mut self) {
        match self.api.currently_playing().await {
            ApiOutcome::Success(Some(playing)) => self.adopt_playing(playing).await,
            ApiOutcome::Success(None) => self.clear_track(),
            ApiOutcome::NeedsReauth => self.signed_out(),
            ApiOutcome::TransientFailure(reason) => {
                warn!("Could not fetch currently playing: {}", reason);
                self.clear_track();
            }
        }
    }

    async fn adopt_playing(&mut self, playing: CurrentlyPlaying) {
        let track_changed = self.current.as_ref().map(|c| c.item.id.as_str()) != Some(playing.item.id.as_str());
        if track_changed {
            info!(
                "Now playing: {} by {}",
                playing.item.name,
                playing.item.artist_names()
            );
        }

        let estimate = self
            .ticker
            .reset(PlaybackSnapshot::from_playing(&playing, Instant::now()));
        self.progress = Some(estimate.clone());
        self.current = Some(playing.clone());
        self.emit(DashboardEvent::NowPlaying(Some(playing)));
        self.emit(DashboardEvent::Progress(estimate));

        if track_changed {
            self.drag.cancel();
            self.refresh_notes().await;
        }
    }

    fn clear_track(&mut self) {
        self.ticker.stop();
        self.drag.cancel();
        let had_track = self.current.take().is_some();
        self.progress = None;
        self.notes.clear();
        self.positions.clear();
        if had_track {
            info!("Nothing playing");
        }
        self.emit(DashboardEvent::NowPlaying(None));
    }

    pub async fn refresh_notes(&mut self) {
        let Some(track_id) = self.current.as_ref().map(|c| c.item.id.clone()) else {
            return;
        };

        self.emit(DashboardEvent::NotesLoading);
        let notes: Vec<Note> = match self.api.notes_for_track(&track_id).await {
            ApiOutcome::Success(notes) => notes,
            ApiOutcome::NeedsReauth => return self.signed_out(),
            ApiOutcome::TransientFailure(reason) => {
                warn!("Could not fetch notes for {}: {}", track_id, reason);
                Vec::new()
            }
        };

        if let Some(active) = self.drag.active_note_id() {
            if !notes.iter().any(|n| n.id == active) {
                self.drag.cancel();
            }
        }

        self.notes = self.positions.reconcile(&track_id, &notes, &mut self.rng);
        debug!("{} notes for track {}", self.notes.len(), track_id);
        self.emit(DashboardEvent::Notes(self.notes.clone()));
    }

    async fn submit_note(&mut self, content: &str) {
        let Some(track) = self.current.as_ref().map(|c| c.item.clone()) else {
            self.emit(DashboardEvent::NoteRejected {
                message: NO_TRACK_MESSAGE.to_string(),
            });
            return;
        };

        let request = match CreateNoteRequest::for_track(content, &track) {
            Ok(request) => request,
            Err(e) => {
                debug!("Rejected note input: {}", e);
                self.emit(DashboardEvent::NoteRejected {
                    message: e.to_string(),
                });
                return;
            }
        };

        match self.api.create_note(&request).await {
            ApiOutcome::Success(note) => {
                info!("Note {} added to {}", note.id, track.name);
                self.emit(DashboardEvent::NoteCreated(note));
                self.refresh_notes().await;
            }
            ApiOutcome::NeedsReauth => self.signed_out(),
            ApiOutcome::TransientFailure(reason) => {
                error!("Error creating note: {}", reason);
                self.emit(DashboardEvent::NoteRejected {
                    message: SAVE_FAILED_MESSAGE.to_string(),
                });
            }
        }
    }

    async fn delete_note(&mut self, note_id: &str) {
        match self.api.delete_note(note_id).await {
            ApiOutcome::Success(()) => {
                info!("Note {} deleted", note_id);
                self.emit(DashboardEvent::NoteDeleted {
                    note_id: note_id.to_string(),
                });
                self.refresh_notes().await;
            }
            ApiOutcome::NeedsReauth => self.signed_out(),
            ApiOutcome::TransientFailure(reason) => {
                error!("Error deleting note {}: {}", note_id, reason);
            }
        }
    }

    async fn begin_login(&mut self) {
        let state = auth::generate_state(STATE_LENGTH, &mut self.rng);
        match auth::authorize_url(&self.spotify, &state) {
            Ok(url) => {
                self.api
                    .session()
                    .lock()
                    .await
                    .update(|s| s.auth_state = Some(state));
                debug!("Redirecting to {}", url);
                self.emit(DashboardEvent::LoginUrl { url });
            }
            Err(e) => {
                error!("{}", e);
                self.emit(DashboardEvent::AuthFailed {
                    message: e.to_string(),
                });
            }
        }
    }

    async fn complete_login(&mut self, query: &str) {
        let params = auth::parse_callback_query(query);
        let stored_state = {
            let mut store = self.api.session().lock().await;
            let stored = store.session().auth_state.clone();
            if stored.is_some() {
                store.update(|s| s.auth_state = None);
            }
            stored
        };

        let code = match auth::validate_callback(&params, stored_state.as_deref()) {
            Ok(code) => code,
            Err(e) => return self.auth_failed(e),
        };

        let grant = match self.api.exchange_code(&code).await {
            Ok(grant) => grant,
            Err(e) => return self.auth_failed(e),
        };

        let user = {
            let mut store = self.api.session().lock().await;
            store.update(|s| s.apply_grant(grant, now_millis()));
            store.session().current_user.clone()
        };

        let user = match user {
            Some(user) => Some(user),
            None => match self.api.user_profile().await {
                ApiOutcome::Success(profile) => {
                    let mut store = self.api.session().lock().await;
                    store.update(|s| s.current_user = Some(profile.clone()));
                    Some(profile)
                }
                ApiOutcome::NeedsReauth => return self.signed_out(),
                ApiOutcome::TransientFailure(reason) => {
                    warn!("Signed in but could not load profile: {}", reason);
                    None
                }
            },
        };

        info!("Authentication successful");
        self.emit(DashboardEvent::Authenticated { user });
        self.emit(DashboardEvent::Route(Route::Dashboard));
        self.refresh_now_playing().await;
    }

    fn auth_failed(&self, e: auth::AuthError) {
        error!("Authentication error: {}", e);
        self.emit(DashboardEvent::AuthFailed {
            message: e.to_string(),
        });
    }

    async fn sign_out(&mut self) {
        self.api.session().lock().await.update(|s| s.logout());
        self.signed_out();
    }

    /// Resets local state once the session is gone.
    fn signed_out(&mut self) {
        info!("Signed out");
        self.ticker.stop();
        self.drag.cancel();
        self.current = None;
        self.progress = None;
        self.notes.clear();
        self.positions.clear();
        self.emit(DashboardEvent::SignedOut);
        self.emit(DashboardEvent::Route(Route::Login));
    }
}
