use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::info;
use yup_oauth2::authenticator::DefaultAuthenticator;
use yup_oauth2::{
    authorized_user::AuthorizedUserSecret, AuthorizedUserAuthenticator, ServiceAccountAuthenticator,
    ServiceAccountKey,
};

/// Access needed to create, share, move and fill spreadsheets.
const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/spreadsheets",
    "https://www.googleapis.com/auth/drive",
];

#[derive(Debug)]
pub enum Credentials {
    /// Key file of a Google Cloud service account
    ServiceAccount(Box<ServiceAccountKey>),
    /// OAuth client credentials with a long-lived refresh token
    AuthorizedUser(AuthorizedUserSecret),
    /// A pre-issued access token, used as-is
    AccessToken(String),
}

#[derive(Deserialize)]
struct StaticToken {
    access_token: String,
}

impl Credentials {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read credentials: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Invalid credentials file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let raw: serde_json::Value =
            serde_json::from_str(content).context("Credentials are not JSON")?;

        match raw.get("type").and_then(|t| t.as_str()) {
            Some("service_account") => {
                let key: ServiceAccountKey =
                    serde_json::from_value(raw).context("Incomplete service_account key")?;
                Ok(Self::ServiceAccount(Box::new(key)))
            }
            Some("authorized_user") => {
                let secret: AuthorizedUserSecret = serde_json::from_value(raw)
                    .context("Incomplete authorized_user credentials")?;
                Ok(Self::AuthorizedUser(secret))
            }
            Some(other) => anyhow::bail!("Unsupported credentials type '{}'", other),
            None => {
                let token: StaticToken = serde_json::from_value(raw).context(
                    "Expected a service_account key, authorized_user credentials \
                     or {\"access_token\": ...}",
                )?;
                Ok(Self::AccessToken(token.access_token))
            }
        }
    }
}

enum TokenSource {
    Static(String),
    OAuth(DefaultAuthenticator),
}

/// Hands out bearer tokens for the Google APIs. OAuth tokens are cached and
/// refreshed by the authenticator.
pub struct TokenProvider {
    source: TokenSource,
}

impl TokenProvider {
    pub async fn new(credentials: Credentials) -> Result<Self> {
        let source = match credentials {
            Credentials::ServiceAccount(key) => {
                info!("Google auth: service account {}", key.client_email);
                let auth = ServiceAccountAuthenticator::builder(*key)
                    .build()
                    .await
                    .context("Failed to set up service account auth")?;
                TokenSource::OAuth(auth)
            }
            Credentials::AuthorizedUser(secret) => {
                info!("Google auth: refresh-token flow (client {})", secret.client_id);
                let auth = AuthorizedUserAuthenticator::builder(secret)
                    .build()
                    .await
                    .context("Failed to set up authorized_user auth")?;
                TokenSource::OAuth(auth)
            }
            Credentials::AccessToken(token) => {
                info!("Google auth: static access token");
                TokenSource::Static(token)
            }
        };
        Ok(Self { source })
    }

    pub async fn token(&self) -> Result<String> {
        match &self.source {
            TokenSource::Static(token) => Ok(token.clone()),
            TokenSource::OAuth(auth) => {
                let token = auth
                    .token(SCOPES)
                    .await
                    .context("Failed to obtain Google access token")?;
                token
                    .token()
                    .map(str::to_string)
                    .context("Google returned no access token")
            }
        }
    }
}
