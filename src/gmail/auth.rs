//! OAuth authentication for Gmail API
//!
//! Handles the OAuth 2.0 installed-app flow:
//! - Loading client secrets
//! - Loading and persisting the authorized-user token file
//! - Refreshing expired access tokens
//! - Interactive browser-based authorization (the `auth` command)
//!
//! The token file uses the same layout as google-auth's authorized-user
//! JSON so an existing `token.json` keeps working.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::{gmail::TOKEN_URI, Config};
use crate::error::{AuthError, GmailMcpError, Result};

/// Tokens expiring within this window are refreshed first
const EXPIRY_SKEW_SECS: i64 = 300;

/// OAuth client secrets
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    /// Client ID
    pub client_id: String,

    /// Client secret
    pub client_secret: String,

    /// Auth URI
    pub auth_uri: String,

    /// Token URI
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

/// Client secrets file format (can be "installed" or "web")
#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    #[serde(alias = "web")]
    installed: Option<ClientSecrets>,
}

/// Authorized-user token file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizedUser {
    /// Access token
    #[serde(default)]
    pub token: Option<String>,

    /// Refresh token
    #[serde(default)]
    pub refresh_token: Option<String>,

    #[serde(default = "default_token_uri")]
    pub token_uri: String,

    #[serde(default)]
    pub client_id: Option<String>,

    #[serde(default)]
    pub client_secret: Option<String>,

    #[serde(default)]
    pub scopes: Vec<String>,

    /// Access token expiry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

impl AuthorizedUser {
    /// Whether the access token can be used as-is at `now`
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        match (&self.token, self.expiry) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(_), Some(expiry)) => expiry - now > Duration::seconds(EXPIRY_SKEW_SECS),
        }
    }
}

fn default_token_uri() -> String {
    TOKEN_URI.to_string()
}

/// Token response from OAuth token endpoint
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
}

/// OAuth authenticator
pub struct Authenticator {
    /// Configuration
    config: Config,

    /// HTTP client
    http_client: reqwest::Client,

    /// Cached token, loaded lazily from the token file
    token: Arc<RwLock<Option<AuthorizedUser>>>,
}

impl Authenticator {
    /// Create a new authenticator; nothing is read until a token is needed
    pub fn new(config: Config) -> Self {
        Self {
            config,
            http_client: reqwest::Client::new(),
            token: Arc::new(RwLock::new(None)),
        }
    }

    /// Load client secrets from file
    pub fn load_client_secrets(path: &Path) -> Result<ClientSecrets> {
        if !path.exists() {
            return Err(AuthError::CredentialsNotFound {
                path: path.display().to_string(),
            }
            .into());
        }

        let content = std::fs::read_to_string(path)?;
        let secrets_file: ClientSecretsFile = serde_json::from_str(&content)?;

        secrets_file
            .installed
            .ok_or_else(|| AuthError::InvalidSecretsFormat.into())
    }

    /// Load the token file, if any
    async fn load_token(&self) -> Result<Option<AuthorizedUser>> {
        if !self.config.token_exists() {
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(&self.config.token_path).await?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Save the token file
    async fn save_token(&self, token: &AuthorizedUser) -> Result<()> {
        let content = serde_json::to_string_pretty(token)?;
        tokio::fs::write(&self.config.token_path, content).await?;
        debug!(path = %self.config.token_path.display(), "token file written");
        Ok(())
    }

    /// Get a valid access token, refreshing if necessary
    pub async fn get_access_token(&self) -> Result<String> {
        if let Some(token) = self.token.read().await.as_ref() {
            if let (true, Some(access)) = (token.is_valid_at(Utc::now()), &token.token) {
                return Ok(access.clone());
            }
        }

        // Refreshes are serialised behind the write lock. The file is reread so
        // a concurrent refresh or a fresh `auth` run is picked up.
        let mut guard = self.token.write().await;
        *guard = self.load_token().await?;

        if let Some(token) = guard.as_ref() {
            if let (true, Some(access)) = (token.is_valid_at(Utc::now()), &token.token) {
                return Ok(access.clone());
            }

            if token.refresh_token.is_some() {
                let refreshed = self.refresh(token).await?;
                let access = refreshed.token.clone().unwrap_or_default();
                *guard = Some(refreshed);
                return Ok(access);
            }
        }

        if !self.config.credentials_exist() {
            return Err(AuthError::CredentialsNotFound {
                path: self.config.credentials_path.display().to_string(),
            }
            .into());
        }

        Err(AuthError::NotAuthenticated {
            path: self.config.token_path.display().to_string(),
        }
        .into())
    }

    /// Refresh the access token using the refresh token
    async fn refresh(&self, current: &AuthorizedUser) -> Result<AuthorizedUser> {
        let refresh_token = current.refresh_token.clone().ok_or_else(|| {
            GmailMcpError::Auth(AuthError::TokenRefreshFailed {
                message: "No refresh token available".to_string(),
            })
        })?;

        // Older token files may lack the client pair; fall back to the secrets file
        let (client_id, client_secret) = match (&current.client_id, &current.client_secret) {
            (Some(id), Some(secret)) => (id.clone(), secret.clone()),
            _ => {
                let secrets = Self::load_client_secrets(&self.config.credentials_path)?;
                (secrets.client_id, secrets.client_secret)
            }
        };

        let params = [
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
            ("refresh_token", refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ];

        info!("refreshing Gmail access token");

        let response = self
            .http_client
            .post(&current.token_uri)
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            warn!(%status, "token refresh rejected");
            return Err(AuthError::TokenRefreshFailed {
                message: format!("{}: {}", status, text),
            }
            .into());
        }

        let token_response: TokenResponse = response.json().await?;

        let refreshed = AuthorizedUser {
            token: Some(token_response.access_token),
            refresh_token: token_response.refresh_token.or(Some(refresh_token)),
            token_uri: current.token_uri.clone(),
            client_id: Some(client_id),
            client_secret: Some(client_secret),
            scopes: scopes_from(token_response.scope, &current.scopes),
            expiry: token_response
                .expires_in
                .map(|secs| Utc::now() + Duration::seconds(secs)),
        };

        self.save_token(&refreshed).await?;
        Ok(refreshed)
    }

    /// Generate the consent URL for a given redirect URI
    pub fn generate_auth_url(&self, secrets: &ClientSecrets, redirect_uri: &str) -> String {
        let scopes = self.config.scopes.join(" ");
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent",
            secrets.auth_uri,
            urlencoding::encode(&secrets.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&scopes)
        )
    }

    /// Exchange an authorization code for tokens and persist them
    pub async fn exchange_code(
        &self,
        secrets: &ClientSecrets,
        code: &str,
        redirect_uri: &str,
    ) -> Result<AuthorizedUser> {
        let params = [
            ("client_id", secrets.client_id.as_str()),
            ("client_secret", secrets.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri),
        ];

        let response = self
            .http_client
            .post(&secrets.token_uri)
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AuthError::TokenExchangeFailed { message: text }.into());
        }

        let token_response: TokenResponse = response.json().await?;

        let token = AuthorizedUser {
            token: Some(token_response.access_token),
            refresh_token: token_response.refresh_token,
            token_uri: secrets.token_uri.clone(),
            client_id: Some(secrets.client_id.clone()),
            client_secret: Some(secrets.client_secret.clone()),
            scopes: scopes_from(token_response.scope, &self.config.scopes),
            expiry: token_response
                .expires_in
                .map(|secs| Utc::now() + Duration::seconds(secs)),
        };

        self.save_token(&token).await?;
        *self.token.write().await = Some(token.clone());

        Ok(token)
    }

    /// Run interactive authorization with a loopback callback server
    pub async fn authenticate_interactive(&self) -> Result<()> {
        use axum::{extract::Query, response::Html, routing::get, Router};
        use std::collections::HashMap;
        use tokio::sync::oneshot;

        let secrets = Self::load_client_secrets(&self.config.credentials_path)?;

        // Bind first so the redirect URI carries the real port
        let addr = std::net::SocketAddr::from(([127, 0, 0, 1], self.config.oauth_callback_port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let port = listener.local_addr()?.port();
        let redirect_uri = format!("http://localhost:{}/", port);

        let auth_url = self.generate_auth_url(&secrets, &redirect_uri);
        eprintln!("\nPlease visit this URL to authorize this application:");
        eprintln!("{}\n", auth_url);

        if let Err(e) = open::that(&auth_url) {
            warn!("could not open browser automatically: {}", e);
        }

        let (tx, rx) = oneshot::channel::<std::result::Result<String, String>>();
        let tx = Arc::new(std::sync::Mutex::new(Some(tx)));

        let callback_handler = move |Query(params): Query<HashMap<String, String>>| {
            let tx = tx.clone();
            async move {
                let outcome = match (params.get("code"), params.get("error")) {
                    (Some(code), _) => Ok(code.clone()),
                    (None, Some(error)) => Err(error.clone()),
                    (None, None) => Err("no authorization code received".to_string()),
                };
                let page = match outcome {
                    Ok(_) => "<html><body><h1>Authorization complete</h1><p>You can close this window.</p></body></html>",
                    Err(_) => "<html><body><h1>Authorization failed</h1><p>Check the server log.</p></body></html>",
                };
                if let Some(tx) = tx.lock().ok().and_then(|mut slot| slot.take()) {
                    let _ = tx.send(outcome);
                }
                Html(page)
            }
        };

        let app = Router::new().route("/", get(callback_handler));

        info!(port, "waiting for OAuth callback");

        let server = axum::serve(listener, app);

        tokio::select! {
            result = server => {
                if let Err(e) = result {
                    return Err(AuthError::CallbackError {
                        message: e.to_string(),
                    }
                    .into());
                }
            }
            outcome = rx => {
                match outcome {
                    Ok(Ok(code)) => {
                        info!("received authorization code, exchanging for tokens");
                        self.exchange_code(&secrets, &code, &redirect_uri).await?;
                    }
                    Ok(Err(message)) => {
                        return Err(AuthError::CallbackError { message }.into());
                    }
                    Err(_) => return Err(AuthError::NoAuthCode.into()),
                }
            }
        }

        Ok(())
    }
}

fn scopes_from(granted: Option<String>, fallback: &[String]) -> Vec<String> {
    match granted {
        Some(scope) if !scope.trim().is_empty() => {
            scope.split_whitespace().map(str::to_string).collect()
        }
        _ => fallback.to_vec(),
    }
}
