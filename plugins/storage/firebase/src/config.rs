use bridge_api::ConfigError;

fn default_request_timeout_ms() -> u64 {
    10_000
}

/// `[storage_config]` для storage = "firebase".
#[derive(Debug, Clone, serde::Deserialize)]
pub struct FirebaseConfig {
    /// `https://<project>-default-rtdb.firebaseio.com`
    pub database_url: String,
    /// Database secret или ID token. Уходит в `?auth=`.
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Имя переменной окружения с токеном. Приоритетнее `auth_token`.
    #[serde(default)]
    pub auth_token_env: Option<String>,
    /// JSON ключ service account'а. Запросы идут с OAuth2 access token'ом.
    /// Несовместим с `auth_token`/`auth_token_env`.
    #[serde(default)]
    pub service_account_path: Option<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl FirebaseConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            auth_token: None,
            auth_token_env: None,
            service_account_path: None,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }

    /// Базовый URL без завершающего '/'.
    pub fn base_url(&self) -> Result<String, ConfigError> {
        let url = self.database_url.trim().trim_end_matches('/');
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(ConfigError::new(format!(
                "database_url must start with https:// (got '{}')",
                self.database_url
            )));
        }
        if url.len() <= "https://".len() {
            return Err(ConfigError::new("database_url has no host"));
        }
        Ok(url.to_string())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.base_url()?;
        if self.service_account_path.is_some() && (self.auth_token.is_some() || self.auth_token_env.is_some()) {
            return Err(ConfigError::new(
                "service_account_path cannot be combined with auth_token or auth_token_env",
            ));
        }
        Ok(())
    }

    /// Токен из env (если задан `auth_token_env`) или из конфига.
    pub fn resolve_token(&self) -> Result<Option<String>, ConfigError> {
        self.resolve_token_with(|name| std::env::var(name).ok())
    }

    fn resolve_token_with(&self, lookup: impl Fn(&str) -> Option<String>) -> Result<Option<String>, ConfigError> {
        if let Some(name) = &self.auth_token_env {
            return match lookup(name) {
                Some(token) if !token.is_empty() => Ok(Some(token)),
                _ => Err(ConfigError::new(format!("auth_token_env: variable {name} is not set"))),
            };
        }
        Ok(self.auth_token.clone().filter(|t| !t.is_empty()))
    }
}
