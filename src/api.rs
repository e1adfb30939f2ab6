use log::{debug, error, info, warn};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use crate::auth::AuthError;
use crate::config::AppConfig;
use crate::notes::CreateNoteRequest;
use crate::progress::DEFAULT_DURATION_MS;
use crate::session::TokenGrant;
use crate::time::now_millis;
use crate::types::{CurrentlyPlaying, Note, SharedSession, User};

/// One try plus one refresh-and-retry on an authorization failure.
pub const MAX_ATTEMPTS: usize = 2;

/// Result of an authenticated call.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiOutcome<T> {
    Success(T),
    /// Credentials are gone; the session has already been cleared.
    NeedsReauth,
    /// Network or service failure worth logging, not worth crashing over.
    TransientFailure(String),
}

impl<T> ApiOutcome<T> {
    pub fn map<U, F>(self, f: F) -> ApiOutcome<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            ApiOutcome::Success(value) => ApiOutcome::Success(f(value)),
            ApiOutcome::NeedsReauth => ApiOutcome::NeedsReauth,
            ApiOutcome::TransientFailure(reason) => ApiOutcome::TransientFailure(reason),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ApiOutcome::Success(_))
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP error: {0}")]
    Status(StatusCode),
    #[error("No refresh token available")]
    NoRefreshToken,
    #[error("No access token in refresh response")]
    MissingAccessToken,
}

/// Tokens read from the session right before a request goes out.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub jwt: Option<String>,
    pub spotify: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlayingEnvelope {
    #[serde(default)]
    data: Option<serde_json::Value>,
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    spotify_url: String,
    session: SharedSession,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, spotify_url: impl Into<String>, session: SharedSession) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            spotify_url: spotify_url.into().trim_end_matches('/').to_string(),
            session,
        }
    }

    pub fn from_config(config: &AppConfig, session: SharedSession) -> Self {
        Self::new(config.api_url.clone(), config.spotify.api_url.clone(), session)
    }

    pub fn session(&self) -> &SharedSession {
        &self.session
    }

    async fn credentials(&self) -> Credentials {
        let store = self.session.lock().await;
        let session = store.session();
        Credentials {
            jwt: session.jwt_token.clone(),
            spotify: session.spotify_access_token.clone(),
        }
    }

    async fn sign_out(&self) {
        self.session.lock().await.update(|s| s.logout());
    }

    /// Sends a request built from fresh credentials. A 401 triggers one
    /// refresh and one more attempt; a second 401 clears the session.
    async fn send<F>(&self, label: &str, build: F) -> ApiOutcome<Response>
    where
        F: Fn(&reqwest::Client, &Credentials) -> RequestBuilder,
    {
        for attempt in 0..MAX_ATTEMPTS {
            let credentials = self.credentials().await;
            let response = match build(&self.http, &credentials).send().await {
                Ok(response) => response,
                Err(e) => {
                    warn!("{} request failed: {}", label, e);
                    return ApiOutcome::TransientFailure(format!("Request failed: {}", e));
                }
            };

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED {
                if attempt + 1 < MAX_ATTEMPTS {
                    info!("{} returned 401, refreshing credentials", label);
                    match self.refresh().await {
                        Ok(()) => continue,
                        Err(_) => return ApiOutcome::NeedsReauth,
                    }
                }
                warn!("{} still unauthorized after refresh, signing out", label);
                self.sign_out().await;
                return ApiOutcome::NeedsReauth;
            }

            if !status.is_success() {
                warn!("{} returned HTTP {}", label, status);
                return ApiOutcome::TransientFailure(format!("HTTP error: {}", status));
            }

            return ApiOutcome::Success(response);
        }

        ApiOutcome::NeedsReauth
    }

    async fn decode<T: DeserializeOwned>(label: &str, outcome: ApiOutcome<Response>) -> ApiOutcome<T> {
        match outcome {
            ApiOutcome::Success(response) => match response.json::<T>().await {
                Ok(value) => ApiOutcome::Success(value),
                Err(e) => {
                    warn!("{} returned an unreadable body: {}", label, e);
                    ApiOutcome::TransientFailure(format!("JSON parse error: {}", e))
                }
            },
            ApiOutcome::NeedsReauth => ApiOutcome::NeedsReauth,
            ApiOutcome::TransientFailure(reason) => ApiOutcome::TransientFailure(reason),
        }
    }

    /// Exchanges the refresh token for new credentials. Any failure clears
    /// the session.
    pub async fn refresh(&self) -> Result<(), ApiError> {
        let refresh_token = {
            let store = self.session.lock().await;
            store.session().spotify_refresh_token.clone()
        };

        match self.request_refresh(refresh_token).await {
            Ok(grant) => {
                self.session
                    .lock()
                    .await
                    .update(|s| s.apply_grant(grant, now_millis()));
                info!("Access token refreshed");
                Ok(())
            }
            Err(e) => {
                error!("Failed to refresh token: {}", e);
                self.sign_out().await;
                Err(e)
            }
        }
    }

    async fn request_refresh(&self, refresh_token: Option<String>) -> Result<TokenGrant, ApiError> {
        let refresh_token = refresh_token.ok_or(ApiError::NoRefreshToken)?;
        let response = self
            .http
            .post(format!("{}/api/spotify/refresh", self.base_url))
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ApiError::Status(response.status()));
        }

        let grant: TokenGrant = response.json().await?;
        if grant.access_token.is_empty() {
            return Err(ApiError::MissingAccessToken);
        }
        Ok(grant)
    }

    /// Trades the callback's authorization code for tokens. Unauthenticated.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenGrant, AuthError> {
        let response = self
            .http
            .post(format!("{}/api/spotify/token", self.base_url))
            .json(&serde_json::json!({ "code": code }))
            .send()
            .await
            .map_err(|e| AuthError::Exchange(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::Exchange(format!("HTTP error: {}", response.status())));
        }

        response
            .json::<TokenGrant>()
            .await
            .map_err(|e| AuthError::Exchange(format!("JSON parse error: {}", e)))
    }

    pub async fn currently_playing(&self) -> ApiOutcome<Option<CurrentlyPlaying>> {
        let (has_token, needs_refresh) = {
            let store = self.session.lock().await;
            let session = store.session();
            (
                session.spotify_access_token.is_some(),
                session.needs_refresh(now_millis()),
            )
        };

        if !has_token {
            debug!("No Spotify access token, nothing to poll");
            return ApiOutcome::Success(None);
        }

        if needs_refresh && self.refresh().await.is_err() {
            return ApiOutcome::NeedsReauth;
        }

        let url = format!("{}/api/spotify/currently-playing", self.base_url);
        let outcome = self
            .send("currently-playing", |http, credentials| {
                let mut request = with_jwt(http.get(&url), credentials);
                if let Some(token) = &credentials.spotify {
                    request = request.header("X-Spotify-Token", token);
                }
                request
            })
            .await;

        Self::decode::<PlayingEnvelope>("currently-playing", outcome)
            .await
            .map(|envelope| normalize_playing(envelope.data))
    }

    pub async fn notes_for_track(&self, track_id: &str) -> ApiOutcome<Vec<Note>> {
        let url = format!(
            "{}/api/notes/song/{}",
            self.base_url,
            urlencoding::encode(track_id)
        );
        let outcome = self
            .send("notes", |http, credentials| with_jwt(http.get(&url), credentials))
            .await;
        Self::decode("notes", outcome).await
    }

    pub async fn create_note(&self, request: &CreateNoteRequest) -> ApiOutcome<Note> {
        let url = format!("{}/api/notes", self.base_url);
        let outcome = self
            .send("create-note", |http, credentials| {
                with_jwt(http.post(&url), credentials).json(request)
            })
            .await;
        Self::decode("create-note", outcome).await
    }

    pub async fn delete_note(&self, note_id: &str) -> ApiOutcome<()> {
        let url = format!("{}/api/notes/{}", self.base_url, urlencoding::encode(note_id));
        self.send("delete-note", |http, credentials| {
            with_jwt(http.delete(&url), credentials)
        })
        .await
        .map(|_| ())
    }

    /// Profile straight from the music service.
    pub async fn user_profile(&self) -> ApiOutcome<User> {
        let url = format!("{}/me", self.spotify_url);
        let outcome = self
            .send("profile", |http, credentials| {
                let request = http.get(&url);
                match &credentials.spotify {
                    Some(token) => request.bearer_auth(token),
                    None => request,
                }
            })
            .await;
        Self::decode("profile", outcome).await
    }
}

fn with_jwt(request: RequestBuilder, credentials: &Credentials) -> RequestBuilder {
    match &credentials.jwt {
        Some(jwt) => request.bearer_auth(jwt),
        None => request,
    }
}

fn normalize_playing(data: Option<serde_json::Value>) -> Option<CurrentlyPlaying> {
    let Some(data) = data.filter(|d| !d.is_null()) else {
        debug!("No track currently playing");
        return None;
    };

    let mut playing: CurrentlyPlaying = match serde_json::from_value(data) {
        Ok(playing) => playing,
        Err(e) => {
            error!("Unexpected currently-playing format: {}", e);
            return None;
        }
    };

    if playing.item.id.is_empty() {
        error!("Currently-playing item has no id");
        return None;
    }

    if playing.item.duration_ms == 0 {
        warn!("Missing duration_ms in track data, using {}ms", DEFAULT_DURATION_MS);
        playing.item.duration_ms = DEFAULT_DURATION_MS;
    }

    Some(playing)
}
