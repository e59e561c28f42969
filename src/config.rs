use crate::error::AuthError;
use std::time::Duration;

/// Sheet holding the inventory when `SHEET_NAME` is unset.
pub const DEFAULT_SHEET_NAME: &str = "inventory";
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
pub const DEFAULT_REDIRECT_URL: &str = "http://127.0.0.1:3000/auth/callback";
pub const DEFAULT_DISCOVERY_DOC: &str = "https://sheets.googleapis.com/$discovery/rest?version=v4";

/// Scopes requested at sign-in. The Drive metadata scope is needed for the
/// modification time that the poller watches.
pub const DEFAULT_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/spreadsheets",
    "https://www.googleapis.com/auth/drive.metadata.readonly",
    "email",
];

/// Header names hidden from the default column selection.
pub const DEFAULT_RESERVED_COLUMNS: &[&str] = &["Timestamp", "Email Address"];

const POLL_INTERVAL_SECS: u64 = 30;
const BACKOFF_SECS: u64 = 60;
const HTTP_TIMEOUT_SECS: u64 = 30;

/// Everything the session gateway needs to talk to the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSettings {
    pub api_key: String,
    pub client_id: String,
    pub client_secret: String,
    pub scopes: Vec<String>,
    pub discovery_docs: Vec<String>,
    pub redirect_url: String,
}

/// Target resource of the remote table client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetSettings {
    pub spreadsheet_id: String,
    pub sheet_name: String,
    pub reserved_columns: Vec<String>,
}

/// Timer settings for the polling synchronizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub backoff: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(POLL_INTERVAL_SECS),
            backoff: Duration::from_secs(BACKOFF_SECS),
        }
    }
}

/// Application configuration, read from the environment (and `.env` when present).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub auth: AuthSettings,
    pub sheet: SheetSettings,
    pub poll: PollSettings,
    pub bind_addr: String,
    pub http_timeout: Duration,
}

impl Config {
    /// Load `.env` (if any) and read the process environment.
    pub fn from_env() -> Result<Self, AuthError> {
        match dotenvy::dotenv() {
            Ok(path) => log::debug!("Loaded environment from {}", path.display()),
            Err(e) if e.not_found() => {}
            Err(e) => log::warn!("Ignoring unreadable .env file: {}", e),
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Listen address on its own, usable while the rest of the config is not.
    pub fn bind_addr_from_env() -> String {
        std::env::var("BIND_ADDR")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AuthError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let required = |key: &str| {
            get(key).ok_or_else(|| AuthError::Config(format!("{} is not set", key)))
        };
        let seconds = |key: &str, default: u64| -> Result<Duration, AuthError> {
            match get(key) {
                None => Ok(Duration::from_secs(default)),
                Some(raw) => match raw.parse::<u64>() {
                    Ok(0) | Err(_) => Err(AuthError::Config(format!(
                        "{} must be a positive number of seconds, got '{}'",
                        key, raw
                    ))),
                    Ok(secs) => Ok(Duration::from_secs(secs)),
                },
            }
        };

        let auth = AuthSettings {
            api_key: required("GOOGLE_API_KEY")?,
            client_id: required("GOOGLE_CLIENT_ID")?,
            client_secret: required("GOOGLE_CLIENT_SECRET")?,
            scopes: get("GOOGLE_SCOPES")
                .map(|s| split_list(&s, ' '))
                .unwrap_or_else(|| to_owned_list(DEFAULT_SCOPES)),
            discovery_docs: get("GOOGLE_DISCOVERY_DOCS")
                .map(|s| split_list(&s, ','))
                .unwrap_or_else(|| vec![DEFAULT_DISCOVERY_DOC.to_string()]),
            redirect_url: get("OAUTH_REDIRECT_URL")
                .unwrap_or_else(|| DEFAULT_REDIRECT_URL.to_string()),
        };

        let sheet = SheetSettings {
            spreadsheet_id: required("GOOGLE_SHEET_ID")?,
            sheet_name: get("SHEET_NAME").unwrap_or_else(|| DEFAULT_SHEET_NAME.to_string()),
            reserved_columns: get("RESERVED_COLUMNS")
                .map(|s| split_list(&s, ','))
                .unwrap_or_else(|| to_owned_list(DEFAULT_RESERVED_COLUMNS)),
        };

        let poll = PollSettings {
            interval: seconds("POLL_INTERVAL_SECS", POLL_INTERVAL_SECS)?,
            backoff: seconds("BACKOFF_SECS", BACKOFF_SECS)?,
        };

        Ok(Config {
            auth,
            sheet,
            poll,
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            http_timeout: seconds("HTTP_TIMEOUT_SECS", HTTP_TIMEOUT_SECS)?,
        })
    }
}

fn split_list(raw: &str, sep: char) -> Vec<String> {
    raw.split(sep)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn to_owned_list(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
