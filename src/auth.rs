use log::debug;
use rand::Rng;
use serde::Serialize;
use thiserror::Error;

use crate::config::SpotifyConfig;

pub const AUTHORIZE_URL: &str = "https://accounts.spotify.com/authorize";
pub const SCOPES: &str =
    "user-read-private user-read-email user-read-currently-playing user-read-playback-state";
pub const STATE_LENGTH: usize = 16;

const STATE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Spotify authentication error: {0}")]
    Provider(String),
    #[error("No authorization code received from Spotify")]
    MissingCode,
    #[error("State mismatch. Please try logging in again.")]
    StateMismatch,
    #[error("Login is not configured: {0}")]
    NotConfigured(&'static str),
    #[error("Token exchange failed: {0}")]
    Exchange(String),
}

pub fn generate_state<R: Rng + ?Sized>(length: usize, rng: &mut R) -> String {
    (0..length)
        .map(|_| STATE_ALPHABET[rng.gen_range(0..STATE_ALPHABET.len())] as char)
        .collect()
}

/// Authorization-code redirect URL for the identity provider.
pub fn authorize_url(config: &SpotifyConfig, state: &str) -> Result<String, AuthError> {
    let client_id = config
        .client_id
        .as_deref()
        .ok_or(AuthError::NotConfigured("SPOTIFY_CLIENT_ID is not set"))?;
    let redirect_uri = config
        .redirect_uri
        .as_deref()
        .ok_or(AuthError::NotConfigured("SPOTIFY_REDIRECT_URI is not set"))?;

    let params = [
        ("client_id", client_id),
        ("response_type", "code"),
        ("redirect_uri", redirect_uri),
        ("state", state),
        ("scope", SCOPES),
    ];
    let query = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    Ok(format!("{}?{}", AUTHORIZE_URL, query))
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// Parses the query string the provider redirects back with.
/// Accepts it with or without the leading `?`.
pub fn parse_callback_query(query: &str) -> CallbackParams {
    let mut params = CallbackParams::default();
    for pair in query.trim_start_matches('?').split('&') {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let value = urlencoding::decode(&value.replace('+', " "))
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| value.to_string());
        match key {
            "code" => params.code = Some(value),
            "state" => params.state = Some(value),
            "error" => params.error = Some(value),
            _ => debug!("Ignoring callback parameter {}", key),
        }
    }
    params
}

/// Returns the authorization code once the callback checks out. The state is
/// only compared when one was stored at redirect time.
pub fn validate_callback(params: &CallbackParams, stored_state: Option<&str>) -> Result<String, AuthError> {
    if let Some(error) = &params.error {
        return Err(AuthError::Provider(error.clone()));
    }
    let code = params
        .code
        .as_ref()
        .filter(|c| !c.is_empty())
        .ok_or(AuthError::MissingCode)?;
    if let Some(expected) = stored_state {
        if params.state.as_deref() != Some(expected) {
            return Err(AuthError::StateMismatch);
        }
    }
    Ok(code.clone())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    Login,
    Callback,
    Dashboard,
}

impl Route {
    pub fn path(&self) -> &'static str {
        match self {
            Route::Login => "/",
            Route::Callback => "/callback",
            Route::Dashboard => "/dashboard",
        }
    }
}

/// Screen to show for a client-side path, after auth redirects.
pub fn resolve_route(path: &str, authenticated: bool) -> Route {
    let path = path.split(['?', '#']).next().unwrap_or("/");
    match (path.trim_end_matches('/'), authenticated) {
        ("/callback", _) => Route::Callback,
        ("" | "/dashboard", true) => Route::Dashboard,
        _ => Route::Login,
    }
}
