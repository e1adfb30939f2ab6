use anyhow::Context;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://localhost:5000";
pub const DEFAULT_SPOTIFY_API_URL: &str = "https://api.spotify.com/v1";
pub const DEFAULT_SESSION_FILE: &str = "stickytrack-session.json";
pub const DEFAULT_UI_PORT: u16 = 8765;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq)]
pub struct SpotifyConfig {
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub api_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Notes backend, which also proxies the music service.
    pub api_url: String,
    pub spotify: SpotifyConfig,
    pub session_file: PathBuf,
    pub ui_port: u16,
    pub poll_interval: Duration,
}

impl AppConfig {
    /// Reads `.env` (if any) and the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let poll_secs = parse_or(
            "POLL_INTERVAL_SECS",
            get("POLL_INTERVAL_SECS"),
            DEFAULT_POLL_INTERVAL_SECS,
        )?;
        if poll_secs == 0 {
            anyhow::bail!("POLL_INTERVAL_SECS must be at least 1");
        }

        Ok(Self {
            api_url: trim_url(get("API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string())),
            spotify: SpotifyConfig {
                client_id: get("SPOTIFY_CLIENT_ID"),
                redirect_uri: get("SPOTIFY_REDIRECT_URI"),
                api_url: trim_url(
                    get("SPOTIFY_API_URL").unwrap_or_else(|| DEFAULT_SPOTIFY_API_URL.to_string()),
                ),
            },
            session_file: get("SESSION_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SESSION_FILE)),
            ui_port: parse_or("UI_PORT", get("UI_PORT"), DEFAULT_UI_PORT)?,
            poll_interval: Duration::from_secs(poll_secs),
        })
    }
}

fn parse_or<T>(key: &str, value: Option<String>, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: {:?}", key, raw)),
        None => Ok(default),
    }
}

fn trim_url(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> anyhow::Result<AppConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.spotify.api_url, DEFAULT_SPOTIFY_API_URL);
        assert_eq!(config.ui_port, 8765);
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert_eq!(config.spotify.client_id, None);
    }

    #[test]
    fn overrides_are_read_and_trailing_slash_dropped() {
        let config = config_from(&[
            ("API_URL", "https://notes.example.com/"),
            ("SPOTIFY_CLIENT_ID", "abc"),
            ("UI_PORT", "9000"),
            ("POLL_INTERVAL_SECS", "5"),
            ("SESSION_FILE", "/tmp/s.json"),
        ])
        .unwrap();
        assert_eq!(config.api_url, "https://notes.example.com");
        assert_eq!(config.spotify.client_id.as_deref(), Some("abc"));
        assert_eq!(config.ui_port, 9000);
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.session_file, PathBuf::from("/tmp/s.json"));
    }

    #[test]
    fn invalid_numbers_are_reported() {
        let err = config_from(&[("UI_PORT", "not-a-port")]).unwrap_err();
        assert!(err.to_string().contains("UI_PORT"));
        assert!(config_from(&[("POLL_INTERVAL_SECS", "0")]).is_err());
    }
}
