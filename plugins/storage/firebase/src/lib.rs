mod config;
mod oauth;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bridge_api::{ConfigError, RemoteStore, StoreError, StoreFactory};

pub use config::FirebaseConfig;
pub use oauth::{ServiceAccountKey, TokenSource};

/// Символы, запрещённые в ключах Realtime Database.
const FORBIDDEN: &[char] = &['.', '$', '#', '[', ']'];

/// Ответ RTDB на POST: `{"name": "-Nx..."}`.
#[derive(serde::Deserialize)]
struct PushResponse {
    name: String,
}

/// Как запросы авторизуются в RTDB.
enum Auth {
    None,
    /// Database secret или ID token: `?auth=`.
    Token(String),
    /// OAuth2 access token service account'а: `Authorization: Bearer`.
    ServiceAccount(TokenSource),
}

impl Auth {
    fn describe(&self) -> &'static str {
        match self {
            Auth::None => "none",
            Auth::Token(_) => "token",
            Auth::ServiceAccount(_) => "service_account",
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  FirebaseStore
// ═══════════════════════════════════════════════════════════════

/// Firebase Realtime Database через REST API.
///
/// `append_child` = `POST {url}/{path}.json`: RTDB создаёт child с push id,
/// упорядоченным по времени создания. Каждый POST независим, соседние
/// children не перезаписываются.
pub struct FirebaseStore {
    http: reqwest::Client,
    base_url: String,
    auth: Auth,
}

impl FirebaseStore {
    pub fn new(config: &FirebaseConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let base_url = config.base_url()?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| ConfigError::new(format!("HTTP client: {e}")))?;
        let auth = match &config.service_account_path {
            Some(path) => {
                let key = ServiceAccountKey::load(path)?;
                Auth::ServiceAccount(TokenSource::new(http.clone(), &key)?)
            }
            None => config.resolve_token()?.map_or(Auth::None, Auth::Token),
        };
        Ok(Self { http, base_url, auth })
    }

    /// `/plant/esp32_01/readings` → `{base}/plant/esp32_01/readings.json`.
    fn node_url(&self, path: &str) -> Result<String, StoreError> {
        let segments = validate_path(path)?;
        if segments.is_empty() {
            return Ok(format!("{}/.json", self.base_url));
        }
        Ok(format!("{}/{}.json", self.base_url, segments.join("/")))
    }

    async fn with_auth(&self, req: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder, StoreError> {
        Ok(match &self.auth {
            Auth::None => req,
            Auth::Token(token) => req.query(&[("auth", token.as_str())]),
            Auth::ServiceAccount(tokens) => req.bearer_auth(tokens.access_token().await?),
        })
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<String, StoreError> {
        let resp = self.with_auth(req).await?.send().await.map_err(transport_error)?;
        let status = resp.status();
        let body = resp.text().await.map_err(transport_error)?;
        if status.is_success() {
            Ok(body)
        } else {
            Err(classify_status(status.as_u16(), &body))
        }
    }
}

/// Сегменты пути. Ключи RTDB не могут содержать `. $ # [ ]`.
fn validate_path(path: &str) -> Result<Vec<&str>, StoreError> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if let Some(bad) = segments.iter().find(|s| s.contains(FORBIDDEN)) {
        return Err(StoreError::fatal(format!(
            "invalid path '{path}': segment '{bad}' contains one of . $ # [ ]"
        )));
    }
    Ok(segments)
}

/// HTTP статус → категория ошибки.
fn classify_status(status: u16, body: &str) -> StoreError {
    let detail = format!("HTTP {status}: {}", body_error(body));
    match status {
        408 | 429 | 500..=599 => StoreError::retryable(detail),
        _ => StoreError::fatal(detail),
    }
}

/// RTDB и OAuth endpoint отдают `{"error": "..."}`; иначе тело как есть (обрезанное).
fn body_error(body: &str) -> String {
    #[derive(serde::Deserialize)]
    struct ErrorBody {
        error: String,
    }
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(b) => b.error,
        Err(_) => body.chars().take(200).collect(),
    }
}

/// Сеть и таймауты всегда retryable.
fn transport_error(e: reqwest::Error) -> StoreError {
    if e.is_timeout() {
        StoreError::retryable(format!("request timed out: {e}"))
    } else if e.is_builder() {
        StoreError::fatal(format!("request: {e}"))
    } else {
        StoreError::retryable(format!("request: {e}"))
    }
}

impl RemoteStore for FirebaseStore {
    fn init(&self) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        Box::pin(async move {
            let url = self.node_url("/")?;
            let req = self.http.get(url).query(&[("shallow", "true")]);
            self.send(req).await?;
            if let Auth::ServiceAccount(tokens) = &self.auth {
                tracing::info!(client_email = %tokens.client_email(), "firebase service account authorized");
            }
            tracing::info!(url = %self.base_url, auth = self.auth.describe(), "firebase reachable");
            Ok(())
        })
    }

    fn append_child(
        &self,
        path: &str,
        value: &serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<String, StoreError>> + Send + '_>> {
        let url = self.node_url(path);
        let path = path.to_string();
        let value = value.clone();
        Box::pin(async move {
            let url = url?;
            if validate_path(&path)?.is_empty() {
                return Err(StoreError::fatal("append to the database root is not allowed"));
            }
            let body = self.send(self.http.post(url).json(&value)).await?;
            let push: PushResponse = serde_json::from_str(&body)
                .map_err(|e| StoreError::fatal(format!("unexpected push response: {e}")))?;
            tracing::trace!(path = %path, key = %push.name, "firebase push");
            Ok(push.name)
        })
    }

    fn shutdown(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            if let Auth::ServiceAccount(tokens) = &self.auth {
                tokens.clear().await;
            }
            tracing::info!(url = %self.base_url, "firebase store closed");
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  FirebaseStoreFactory
// ═══════════════════════════════════════════════════════════════

pub struct FirebaseStoreFactory;

impl StoreFactory for FirebaseStoreFactory {
    fn create(&self, config_json: &str) -> Result<Arc<dyn RemoteStore>, ConfigError> {
        let config: FirebaseConfig = serde_json::from_str(config_json)?;
        Ok(Arc::new(FirebaseStore::new(&config)?))
    }
}
