//! `.env`-style key/value config store.
//!
//! Read/mutate/atomically-rewrite semantics grounded in
//! `examples/original_source/oca_oauth2_token_manager.py`'s use of
//! `python-dotenv`'s `get_key`/`set_key`: comments and unrecognized lines
//! survive a rewrite untouched, and only the touched key's line changes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use crate::error::GatewayError;

/// A parsed `.env`-style file: ordered lines plus a key→line-index index so
/// `set` can rewrite in place without disturbing comments or ordering.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    lines: Vec<String>,
    index: HashMap<String, usize>,
}

impl ConfigStore {
    /// Load a config file, creating an empty in-memory store if it does not
    /// exist yet (the file is created on first `set`/`flush`).
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, GatewayError> {
        let path = path.as_ref().to_path_buf();
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };

        let mut lines = Vec::new();
        let mut index = HashMap::new();
        for line in contents.lines() {
            if let Some(key) = parse_key(line) {
                index.insert(key, lines.len());
            }
            lines.push(line.to_string());
        }

        Ok(Self { path, lines, index })
    }

    /// Look up a key's current value. Returns `None` if absent or blank.
    pub fn get(&self, key: &str) -> Option<&str> {
        let &i = self.index.get(key)?;
        parse_value(&self.lines[i])
    }

    pub fn get_owned(&self, key: &str) -> Option<String> {
        self.get(key).map(str::to_string)
    }

    /// Set a key's value in memory, appending a new line if the key is new.
    /// Does not touch disk; call [`ConfigStore::flush`] to persist.
    pub fn set(&mut self, key: &str, value: &str) {
        let line = format!("{key}={value}");
        match self.index.get(key) {
            Some(&i) => self.lines[i] = line,
            None => {
                self.index.insert(key.to_string(), self.lines.len());
                self.lines.push(line);
            }
        }
    }

    /// Atomically rewrite the backing file: write to a sibling temp file,
    /// then `rename` over the target (atomic on POSIX, same directory so no
    /// cross-filesystem rename can occur).
    pub async fn flush(&self) -> Result<(), GatewayError> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let tmp_path = dir.join(format!(
            ".{}.tmp-{}",
            self.path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("config"),
            uuid::Uuid::new_v4()
        ));

        let mut body = self.lines.join("\n");
        body.push('\n');

        let mut f = tokio::fs::File::create(&tmp_path).await?;
        f.write_all(body.as_bytes()).await?;
        f.sync_all().await?;
        drop(f);

        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }

    /// Convenience: set one key and flush immediately, as the token manager
    /// does after each refresh.
    pub async fn set_and_flush(&mut self, key: &str, value: &str) -> Result<(), GatewayError> {
        self.set(key, value);
        self.flush().await
    }
}

fn parse_key(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let (key, _) = trimmed.split_once('=')?;
    Some(key.trim().to_string())
}

fn parse_value(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    let (_, value) = trimmed.split_once('=')?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Startup-validated, service-level configuration: the required keys the
/// gateway refuses to start without, plus the handful of settings
/// `gateway-service` reads once at boot (bind address defaults live in the
/// CLI layer, not here). Distinct from the `ConfigStore` the token manager
/// owns internally for its own auth-related re-reads: keys that need to be
/// re-read before each call live closest to the component that needs them,
/// not duplicated into this struct.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub oauth_host: String,
    pub oauth_client_id: String,
    pub llm_api_url: String,
    pub llm_models_api_url: Option<String>,
    pub llm_model_name: Option<String>,
    pub llm_responses_api_url: Option<String>,
    /// Responses passthrough upstream URL: when set, `POST /v1/responses`
    /// bypasses every dialect converter entirely and relays bytes verbatim.
    pub llm_responses_passthrough_url: Option<String>,
    pub llm_reasoning_strength: Option<String>,
    pub llm_non_reasoning_strength: Option<String>,
    pub log_level: Option<String>,
    pub log_file_path: Option<String>,
}

impl GatewayConfig {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, GatewayError> {
        let store = ConfigStore::load(path).await?;
        Self::from_store(&store)
    }

    /// Re-read the config file from disk. Every passthrough request calls
    /// this to pick up runtime overrides without a process restart.
    pub async fn reload(path: impl AsRef<Path>) -> Result<Self, GatewayError> {
        Self::load(path).await
    }

    pub fn from_store(store: &ConfigStore) -> Result<Self, GatewayError> {
        let required = |key: &str| {
            store
                .get_owned(key)
                .ok_or_else(|| GatewayError::InvalidRequest(format!("missing required config key: {key}")))
        };

        Ok(Self {
            oauth_host: required("oauth_host")?,
            oauth_client_id: required("oauth_client_id")?,
            llm_api_url: required("llm_api_url")?,
            llm_models_api_url: store.get_owned("llm_models_api_url"),
            llm_model_name: store.get_owned("llm_model_name"),
            llm_responses_api_url: store.get_owned("llm_responses_api_url"),
            llm_responses_passthrough_url: store.get_owned("llm_responses_passthrough_url"),
            llm_reasoning_strength: store.get_owned("llm_reasoning_strength"),
            llm_non_reasoning_strength: store.get_owned("llm_non_reasoning_strength"),
            log_level: store.get_owned("log_level"),
            log_file_path: store.get_owned("log_file_path"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_through_disk() {
        let dir = std::env::temp_dir().join(format!("gw-cfg-test-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("gateway.env");
        tokio::fs::write(
            &path,
            "# comment\noauth_host=example.com\n\noauth_client_id=abc123\n",
        )
        .await
        .unwrap();

        let mut store = ConfigStore::load(&path).await.unwrap();
        assert_eq!(store.get("oauth_host"), Some("example.com"));
        assert_eq!(store.get("oauth_client_id"), Some("abc123"));
        assert_eq!(store.get("missing"), None);

        store
            .set_and_flush("oauth_access_token", "tok-1")
            .await
            .unwrap();

        let reloaded = ConfigStore::load(&path).await.unwrap();
        assert_eq!(reloaded.get("oauth_access_token"), Some("tok-1"));
        assert_eq!(reloaded.get("oauth_host"), Some("example.com"));

        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(raw.contains("# comment"));
        assert!(raw.contains("oauth_client_id=abc123"));

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn missing_file_starts_empty() {
        let path = std::env::temp_dir().join(format!("gw-cfg-missing-{}.env", uuid::Uuid::new_v4()));
        let store = ConfigStore::load(&path).await.unwrap();
        assert_eq!(store.get("anything"), None);
    }

    #[tokio::test]
    async fn gateway_config_rejects_missing_required_key() {
        let dir = std::env::temp_dir().join(format!("gw-cfg-req-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("gateway.env");
        tokio::fs::write(&path, "oauth_host=example.com\n").await.unwrap();

        let err = GatewayConfig::load(&path).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest(_)));

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn gateway_config_loads_required_and_optional_keys() {
        let dir = std::env::temp_dir().join(format!("gw-cfg-ok-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("gateway.env");
        tokio::fs::write(
            &path,
            "oauth_host=example.com\noauth_client_id=cid\nllm_api_url=https://api.example.com/v1/chat/completions\nlog_level=debug\n",
        )
        .await
        .unwrap();

        let cfg = GatewayConfig::load(&path).await.unwrap();
        assert_eq!(cfg.oauth_host, "example.com");
        assert_eq!(cfg.llm_api_url, "https://api.example.com/v1/chat/completions");
        assert_eq!(cfg.log_level.as_deref(), Some("debug"));
        assert_eq!(cfg.log_file_path, None);

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
