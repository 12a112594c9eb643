use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::sync::Mutex;

use crate::error::SinkError;
use crate::logging::LogContext;

pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECONDS: i64 = 3600;
/// Tokens this close to expiry are renewed before use
const EXPIRY_MARGIN_SECONDS: i64 = 60;

/// The fields of a Google service-account key file the monitor needs
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub token_uri: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct AssertionClaims {
    pub iss: String,
    pub scope: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: i64,
}

/// Exchanges a signed RS256 assertion for an access token and keeps it until
/// shortly before it expires.
pub struct ServiceAccountAuth {
    client_email: String,
    token_uri: String,
    scope: String,
    key: EncodingKey,
    cache: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for ServiceAccountAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountAuth")
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountAuth {
    pub fn from_key(key: ServiceAccountKey) -> Result<Self, SinkError> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes()).map_err(|e| {
            SinkError::Authorization(format!("Invalid private key for {}: {}", key.client_email, e))
        })?;

        Ok(Self {
            token_uri: key.token_uri.unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string()),
            client_email: key.client_email,
            scope: SHEETS_SCOPE.to_string(),
            key: encoding_key,
            cache: Mutex::new(None),
        })
    }

    /// Load a service-account key file as downloaded from the cloud console
    pub fn from_file(path: &Path) -> Result<Self, SinkError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SinkError::Authorization(format!("Cannot read credentials file {}: {}", path.display(), e))
        })?;
        let key: ServiceAccountKey = serde_json::from_str(&content).map_err(|e| {
            SinkError::Authorization(format!("Malformed credentials file {}: {}", path.display(), e))
        })?;
        Self::from_key(key)
    }

    pub fn client_email(&self) -> &str {
        &self.client_email
    }

    pub fn token_uri(&self) -> &str {
        &self.token_uri
    }

    pub(crate) fn assertion(&self, issued_at: i64) -> Result<String, SinkError> {
        let claims = AssertionClaims {
            iss: self.client_email.clone(),
            scope: self.scope.clone(),
            aud: self.token_uri.clone(),
            iat: issued_at,
            exp: issued_at + ASSERTION_LIFETIME_SECONDS,
        };

        encode(&Header::new(Algorithm::RS256), &claims, &self.key)
            .map_err(|e| SinkError::Authorization(format!("Cannot sign token assertion: {}", e)))
    }

    /// Return a usable access token, exchanging a fresh assertion when the
    /// cached one is missing or about to expire
    pub async fn access_token(&self, client: &Client) -> Result<String, SinkError> {
        let mut cache = self.cache.lock().await;
        let now = Utc::now().timestamp();

        if let Some(cached) = cache.as_ref() {
            if cached.expires_at - EXPIRY_MARGIN_SECONDS > now {
                return Ok(cached.access_token.clone());
            }
        }

        let assertion = self.assertion(now)?;
        let response = client
            .post(&self.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| SinkError::Authorization(format!("Token exchange failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SinkError::Authorization(format!("Token exchange failed: {}", e)))?;
        if !status.is_success() {
            return Err(SinkError::Authorization(format!(
                "Token endpoint returned {}: {}",
                status.as_u16(),
                body
            )));
        }

        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| SinkError::Authorization(format!("Unexpected token response: {}", e)))?;

        LogContext::new("sheets_sink", "token_exchange")
            .debug(&format!("Obtained access token for {}, valid for {}s", self.client_email, token.expires_in));

        *cache = Some(CachedToken {
            access_token: token.access_token.clone(),
            expires_at: now + token.expires_in,
        });
        Ok(token.access_token)
    }
}
