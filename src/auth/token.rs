use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};

use crate::auth::credentials::CredentialMaterial;
use crate::error::GatewayError;

/// The single capability scope every minted token is bound to.
pub const TOKEN_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// A short-lived bearer token. Replaced, never mutated, on each refresh.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Seconds until expiry; negative once expired.
    pub fn expires_in_secs(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds()
    }
}

/// Capability seam for token minting; lets the composer and refresher be
/// exercised without a live token endpoint.
#[async_trait::async_trait]
pub trait TokenSource: Send + Sync {
    async fn mint(&self) -> Result<AccessToken, GatewayError>;
}

/// Mints tokens via the OAuth2 JWT-bearer grant against the key's token
/// endpoint. Requires a private-key-bearing service account.
pub struct ServiceAccountMinter {
    material: CredentialMaterial,
    http: reqwest::Client,
}

impl ServiceAccountMinter {
    pub fn new(material: CredentialMaterial) -> Self {
        ServiceAccountMinter {
            material,
            http: reqwest::Client::new(),
        }
    }

    pub fn material(&self) -> &CredentialMaterial {
        &self.material
    }

    fn signed_assertion(&self, now: DateTime<Utc>) -> Result<String, GatewayError> {
        let email = self
            .material
            .key
            .client_email
            .as_deref()
            .ok_or_else(|| GatewayError::AuthProvider("credentials have no client_email".into()))?;
        let private_key = self
            .material
            .key
            .private_key
            .as_deref()
            .ok_or_else(|| GatewayError::AuthProvider("credentials have no private key".into()))?;

        let claims = serde_json::json!({
            "iss": email,
            "scope": TOKEN_SCOPE,
            "aud": self.material.key.token_uri,
            "iat": now.timestamp(),
            "exp": now.timestamp() + ASSERTION_LIFETIME_SECS,
        });
        let key = EncodingKey::from_rsa_pem(private_key.as_bytes())
            .map_err(|e| GatewayError::AuthProvider(format!("bad private key: {}", e)))?;
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| GatewayError::AuthProvider(format!("JWT signing failed: {}", e)))
    }
}

#[derive(Debug, serde::Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Turn a token-endpoint response body into an `AccessToken`. The expiry is
/// always strictly after `now`; absent `expires_in` means the standard hour.
fn token_from_response(now: DateTime<Utc>, body: &str) -> Result<AccessToken, GatewayError> {
    let parsed: TokenResponse = serde_json::from_str(body)
        .map_err(|e| GatewayError::AuthProvider(format!("bad token response: {}", e)))?;
    let token = parsed
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| GatewayError::AuthProvider("token endpoint returned no token".into()))?;
    let lifetime = parsed
        .expires_in
        .filter(|s| *s > 0)
        .unwrap_or(ASSERTION_LIFETIME_SECS);
    Ok(AccessToken {
        token,
        expires_at: now + chrono::Duration::seconds(lifetime),
    })
}

#[async_trait::async_trait]
impl TokenSource for ServiceAccountMinter {
    async fn mint(&self) -> Result<AccessToken, GatewayError> {
        let now = Utc::now();
        let assertion = self.signed_assertion(now)?;

        let response = self
            .http
            .post(&self.material.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", &assertion)])
            .send()
            .await
            .map_err(|e| GatewayError::AuthProvider(format!("token exchange failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::AuthProvider(format!("token exchange failed: {}", e)))?;
        if !status.is_success() {
            return Err(GatewayError::AuthProvider(format!(
                "token endpoint returned {}: {}",
                status, body
            )));
        }
        token_from_response(now, &body)
    }
}
