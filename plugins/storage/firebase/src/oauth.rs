use std::time::{Duration, Instant};

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use tokio::sync::Mutex;

use bridge_api::{ConfigError, StoreError, now_secs};

/// Scopes, которых достаточно для чтения/записи RTDB.
const SCOPES: &str =
    "https://www.googleapis.com/auth/firebase.database https://www.googleapis.com/auth/userinfo.email";
const GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
/// Время жизни assertion'а; Google принимает не больше часа.
const ASSERTION_TTL_SECS: i64 = 3600;
/// Токен обновляется заранее, за столько до истечения.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".into()
}

/// JSON ключ service account'а (скачивается из Firebase console).
#[derive(Clone, serde::Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountKey {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::new(format!("service account key: {e}")))
    }

    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::new(format!("service_account_path '{path}': {e}")))?;
        Self::from_json(&json)
    }
}

#[derive(serde::Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(serde::Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

// ═══════════════════════════════════════════════════════════════
//  TokenSource
// ═══════════════════════════════════════════════════════════════

/// OAuth2 access token'ы для service account'а (JWT bearer grant, RS256).
///
/// Токен кэшируется и обновляется за `REFRESH_MARGIN` до истечения.
/// Mutex держится на время обмена, так что параллельные запросы
/// не запускают несколько обменов одновременно.
pub struct TokenSource {
    http: reqwest::Client,
    client_email: String,
    token_uri: String,
    key: EncodingKey,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenSource {
    pub fn new(http: reqwest::Client, key: &ServiceAccountKey) -> Result<Self, ConfigError> {
        let encoding = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| ConfigError::new(format!("service account private_key: {e}")))?;
        Ok(Self {
            http,
            client_email: key.client_email.clone(),
            token_uri: key.token_uri.clone(),
            key: encoding,
            cached: Mutex::new(None),
        })
    }

    pub fn client_email(&self) -> &str {
        &self.client_email
    }

    /// Действующий access token: из кэша или после нового обмена.
    pub async fn access_token(&self) -> Result<String, StoreError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() + REFRESH_MARGIN < token.expires_at {
                return Ok(token.value.clone());
            }
        }
        let fresh = self.exchange().await?;
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(value)
    }

    /// Забыть кэшированный токен.
    pub async fn clear(&self) {
        self.cached.lock().await.take();
    }

    fn assertion(&self) -> Result<String, StoreError> {
        let iat = now_secs();
        let claims = Claims {
            iss: &self.client_email,
            scope: SCOPES,
            aud: &self.token_uri,
            iat,
            exp: iat + ASSERTION_TTL_SECS,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.key)
            .map_err(|e| StoreError::fatal(format!("sign token assertion: {e}")))
    }

    async fn exchange(&self) -> Result<CachedToken, StoreError> {
        let assertion = self.assertion()?;
        let resp = self
            .http
            .post(&self.token_uri)
            .form(&[("grant_type", GRANT_TYPE), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| StoreError::retryable(format!("token exchange: {e}")))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| StoreError::retryable(format!("token exchange: {e}")))?;
        if !status.is_success() {
            let detail = format!("token exchange HTTP {}: {}", status.as_u16(), crate::body_error(&body));
            // 4xx: ключ отозван, неверные claims, часы не синхронизированы
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                StoreError::retryable(detail)
            } else {
                StoreError::fatal(detail)
            });
        }
        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| StoreError::fatal(format!("unexpected token response: {e}")))?;
        tracing::debug!(
            client_email = %self.client_email,
            expires_in = token.expires_in,
            "firebase access token refreshed"
        );
        Ok(CachedToken {
            value: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        })
    }
}
