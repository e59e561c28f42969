//! Google OAuth 2.0 provider.
//!
//! Server-side authorization-code flow: the browser is redirected to the
//! consent screen, the callback hands the code to [`GoogleOAuth::sign_in`],
//! and the resulting access token is attached to Sheets/Drive requests.

use crate::config::AuthSettings;
use crate::error::AuthError;
use crate::session::{AuthProvider, SignedIn};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

const AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const REVOKE_ENDPOINT: &str = "https://oauth2.googleapis.com/revoke";
const TOKENINFO_ENDPOINT: &str = "https://oauth2.googleapis.com/tokeninfo";

/// Refresh this long before the reported expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Clone)]
struct Tokens {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Option<Instant>,
}

impl Tokens {
    fn from_response(response: TokenResponse, previous_refresh: Option<String>) -> Self {
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token.or(previous_refresh),
            expires_at: response
                .expires_in
                .map(|secs| Instant::now() + Duration::from_secs(secs)),
        }
    }

    fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(at) => Instant::now() + EXPIRY_MARGIN >= at,
            None => false,
        }
    }
}

/// [`AuthProvider`] backed by Google's OAuth endpoints.
pub struct GoogleOAuth {
    settings: AuthSettings,
    http: reqwest::Client,
    tokens: RwLock<Option<Tokens>>,
}

impl GoogleOAuth {
    pub fn new(settings: AuthSettings, http: reqwest::Client) -> Self {
        Self {
            settings,
            http,
            tokens: RwLock::new(None),
        }
    }

    /// Consent screen URL for the given CSRF state.
    pub fn authorization_url(&self, state: &str) -> String {
        let scope = self.settings.scopes.join(" ");
        let params = [
            ("client_id", self.settings.client_id.as_str()),
            ("redirect_uri", self.settings.redirect_url.as_str()),
            ("response_type", "code"),
            ("scope", scope.as_str()),
            ("access_type", "offline"),
            ("prompt", "select_account"),
            ("state", state),
        ];
        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{}", AUTH_ENDPOINT, query)
    }

    fn check_settings(&self) -> Result<(), AuthError> {
        let s = &self.settings;
        if s.client_id.is_empty() || s.api_key.is_empty() || s.client_secret.is_empty() {
            return Err(AuthError::Initialization(
                "client id, client secret and api key are required".into(),
            ));
        }
        if s.scopes.is_empty() {
            return Err(AuthError::Initialization("no API scopes configured".into()));
        }
        Ok(())
    }

    fn discovery_url(&self, doc: &str) -> String {
        let sep = if doc.contains('?') { '&' } else { '?' };
        format!("{}{}key={}", doc, sep, urlencoding::encode(&self.settings.api_key))
    }

    async fn fetch_discovery(&self, doc: &str) -> Result<(), AuthError> {
        log::debug!("Fetching discovery document {}", doc);
        let response = self
            .http
            .get(self.discovery_url(doc))
            .send()
            .await
            .map_err(|e| AuthError::Initialization(format!("{}: {}", doc, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Initialization(format!(
                "discovery document {} returned {}",
                doc, status
            )));
        }
        Ok(())
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> Result<TokenResponse, String> {
        let response = self
            .http
            .post(TOKEN_ENDPOINT)
            .form(form)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(format!("token endpoint returned {}: {}", status, body));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| e.to_string())
    }

    async fn lookup_email(&self, access_token: &str) -> Option<String> {
        let result = self
            .http
            .get(TOKENINFO_ENDPOINT)
            .query(&[("access_token", access_token)])
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                response.json::<TokenInfo>().await.ok().and_then(|i| i.email)
            }
            Ok(response) => {
                log::warn!("Token info lookup returned {}", response.status());
                None
            }
            Err(e) => {
                log::warn!("Token info lookup failed: {}", e);
                None
            }
        }
    }

    async fn refresh(&self, refresh_token: &str) -> Option<Tokens> {
        let form = [
            ("client_id", self.settings.client_id.as_str()),
            ("client_secret", self.settings.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];
        match self.request_token(&form).await {
            Ok(response) => {
                log::debug!("Access token refreshed");
                Some(Tokens::from_response(response, Some(refresh_token.to_string())))
            }
            Err(e) => {
                log::error!("Error refreshing access token: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl AuthProvider for GoogleOAuth {
    async fn initialize(&self) -> Result<Option<SignedIn>, AuthError> {
        self.check_settings()?;
        for doc in &self.settings.discovery_docs {
            self.fetch_discovery(doc).await?;
        }
        log::info!(
            "Google API client initialized ({} discovery documents)",
            self.settings.discovery_docs.len()
        );
        // Nothing is persisted between runs, so a fresh process is signed out.
        Ok(None)
    }

    async fn sign_in(&self, grant: &str) -> Result<SignedIn, AuthError> {
        if grant.trim().is_empty() {
            return Err(AuthError::SignIn("missing authorization code".into()));
        }

        let form = [
            ("code", grant),
            ("client_id", self.settings.client_id.as_str()),
            ("client_secret", self.settings.client_secret.as_str()),
            ("redirect_uri", self.settings.redirect_url.as_str()),
            ("grant_type", "authorization_code"),
        ];
        let response = self.request_token(&form).await.map_err(AuthError::SignIn)?;
        let tokens = Tokens::from_response(response, None);
        let account = self.lookup_email(&tokens.access_token).await;

        *self.tokens.write().await = Some(tokens);
        log::info!("Signed in as {}", account.as_deref().unwrap_or("<unknown>"));
        Ok(SignedIn { account })
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let Some(tokens) = self.tokens.write().await.take() else {
            return Ok(());
        };

        let response = self
            .http
            .post(REVOKE_ENDPOINT)
            .form(&[("token", tokens.access_token.as_str())])
            .send()
            .await
            .map_err(|e| AuthError::SignOut(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::SignOut(format!(
                "revoke endpoint returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn access_token(&self) -> Option<String> {
        let current = self.tokens.read().await.clone()?;
        if !current.is_expired() {
            return Some(current.access_token);
        }

        let refresh_token = current.refresh_token.as_deref()?;
        let refreshed = self.refresh(refresh_token).await?;
        let access_token = refreshed.access_token.clone();

        let mut tokens = self.tokens.write().await;
        // A concurrent sign-out wins over the refresh.
        if tokens.is_some() {
            *tokens = Some(refreshed);
            Some(access_token)
        } else {
            None
        }
    }

    fn sign_in_url(&self, state: &str) -> Option<String> {
        Some(self.authorization_url(state))
    }
}
