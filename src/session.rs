use anyhow::Context;
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::types::User;

/// Refresh the music-service token this long before it expires.
pub const REFRESH_MARGIN_MS: i64 = 60_000;

/// Token response from the backend's code exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    /// Backend session token.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub user: Option<User>,
}

/// Everything the app remembers about the signed-in user between runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub spotify_access_token: Option<String>,
    pub spotify_refresh_token: Option<String>,
    /// Epoch milliseconds.
    pub spotify_token_expiry: Option<i64>,
    pub jwt_token: Option<String>,
    pub current_user: Option<User>,
    /// `state` sent with the last authorize redirect, checked on callback.
    pub auth_state: Option<String>,
}

impl Session {
    pub fn has_valid_token(&self, now_ms: i64) -> bool {
        match (&self.spotify_access_token, self.spotify_token_expiry) {
            (Some(_), Some(expiry)) => now_ms < expiry,
            _ => false,
        }
    }

    pub fn is_authenticated(&self, now_ms: i64) -> bool {
        (self.jwt_token.is_some() && self.current_user.is_some()) || self.has_valid_token(now_ms)
    }

    pub fn needs_refresh(&self, now_ms: i64) -> bool {
        match self.spotify_token_expiry {
            Some(expiry) => now_ms > expiry.saturating_sub(REFRESH_MARGIN_MS),
            None => false,
        }
    }

    pub fn apply_grant(&mut self, grant: TokenGrant, now_ms: i64) {
        self.spotify_access_token = Some(grant.access_token);
        let lifetime_ms = grant.expires_in.saturating_mul(1000);
        self.spotify_token_expiry = Some(now_ms.saturating_add(lifetime_ms));
        if let Some(refresh) = grant.refresh_token {
            self.spotify_refresh_token = Some(refresh);
        }
        if let Some(jwt) = grant.token {
            self.jwt_token = Some(jwt);
        }
        if let Some(user) = grant.user {
            self.current_user = Some(user);
        }
    }

    pub fn logout(&mut self) {
        *self = Session::default();
    }
}

/// A [`Session`] bound to the file it is persisted in.
#[derive(Debug)]
pub struct SessionStore {
    path: Option<PathBuf>,
    session: Session,
}

impl SessionStore {
    /// Loads the session from `path`; a missing file means signed out.
    pub fn load(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let session = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("reading session file {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("parsing session file {}", path.display()))?
        } else {
            info!("No session file at {}, starting signed out", path.display());
            Session::default()
        };
        Ok(Self {
            path: Some(path),
            session,
        })
    }

    /// A store that never touches disk.
    pub fn in_memory(session: Session) -> Self {
        Self {
            path: None,
            session,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Mutates the session and persists it.
    pub fn update<F>(&mut self, mutate: F)
    where
        F: FnOnce(&mut Session),
    {
        mutate(&mut self.session);
        if let Err(e) = self.save() {
            error!("Failed to persist session: {:#}", e);
        }
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(&self.session)?;
        fs::write(path, json).with_context(|| format!("writing session file {}", path.display()))?;
        debug!("Session saved to {}", path.display());
        Ok(())
    }
}
