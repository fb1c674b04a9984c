use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use super::reconcile::ReconcilePolicy;

pub(super) const CONFIG_FILE_NAME: &str = "campus_config.json";

pub(super) const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
pub(super) const DEFAULT_PENDING_MATCH_WINDOW_MS: i64 = 60_000;
pub(super) const DEFAULT_RECONNECT_INITIAL_MS: u64 = 250;
pub(super) const DEFAULT_RECONNECT_MAX_MS: u64 = 8_000;

/// Shown when a sender's display attributes cannot be resolved.
pub(super) const UNKNOWN_SENDER_NAME: &str = "Unknown sender";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(super) struct AppConfig {
    pub(super) disable_network: Option<bool>,
    pub(super) backend_url: Option<String>,
    pub(super) anon_key: Option<String>,
    pub(super) request_timeout_ms: Option<u64>,
    pub(super) reconcile_policy: Option<ReconcilePolicy>,
    pub(super) pending_match_window_ms: Option<i64>,
    pub(super) reconnect_initial_ms: Option<u64>,
    pub(super) reconnect_max_ms: Option<u64>,
}

pub(super) fn load_app_config(data_dir: &str) -> AppConfig {
    let path = Path::new(data_dir).join(CONFIG_FILE_NAME);
    if !path.exists() {
        return AppConfig::default();
    }
    match read_app_config(&path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(err = %format!("{e:#}"), "invalid config; using defaults");
            AppConfig::default()
        }
    }
}

fn read_app_config(path: &Path) -> anyhow::Result<AppConfig> {
    let bytes =
        std::fs::read(path).with_context(|| format!("read config {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parse config {}", path.display()))
}

pub(crate) fn default_app_config_json() -> String {
    serde_json::json!({
        "disable_network": false,
        "backend_url": null,
        "anon_key": null,
        "request_timeout_ms": DEFAULT_REQUEST_TIMEOUT_MS,
        "reconcile_policy": "match_send",
        "pending_match_window_ms": DEFAULT_PENDING_MATCH_WINDOW_MS,
        "reconnect_initial_ms": DEFAULT_RECONNECT_INITIAL_MS,
        "reconnect_max_ms": DEFAULT_RECONNECT_MAX_MS,
    })
    .to_string()
}

impl AppConfig {
    pub(super) fn network_enabled(&self) -> bool {
        // Used to keep Rust tests deterministic and offline.
        if let Some(disable) = self.disable_network {
            return !disable;
        }
        std::env::var("CAMPUS_DISABLE_NETWORK").ok().as_deref() != Some("1")
    }

    pub(super) fn request_timeout(&self) -> Duration {
        Duration::from_millis(
            self.request_timeout_ms
                .filter(|ms| *ms > 0)
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS),
        )
    }

    pub(super) fn reconcile_policy(&self) -> ReconcilePolicy {
        self.reconcile_policy.unwrap_or_default()
    }

    pub(super) fn pending_match_window_ms(&self) -> i64 {
        self.pending_match_window_ms
            .filter(|ms| *ms >= 0)
            .unwrap_or(DEFAULT_PENDING_MATCH_WINDOW_MS)
    }

    pub(super) fn reconnect_backoff(&self) -> (Duration, Duration) {
        let initial = self
            .reconnect_initial_ms
            .filter(|ms| *ms > 0)
            .unwrap_or(DEFAULT_RECONNECT_INITIAL_MS);
        let max = self
            .reconnect_max_ms
            .unwrap_or(DEFAULT_RECONNECT_MAX_MS)
            .max(initial);
        (Duration::from_millis(initial), Duration::from_millis(max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_app_config(&dir.path().to_string_lossy());
        assert_eq!(config.request_timeout(), Duration::from_millis(10_000));
        assert_eq!(config.reconcile_policy(), ReconcilePolicy::MatchSend);
        assert_eq!(config.pending_match_window_ms(), 60_000);
    }

    #[test]
    fn parses_partial_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            r#"{"disable_network": true, "reconcile_policy": "clear_all", "reconnect_initial_ms": 50, "reconnect_max_ms": 10}"#,
        )
        .unwrap();
        let config = load_app_config(&dir.path().to_string_lossy());
        assert!(!config.network_enabled());
        assert_eq!(config.reconcile_policy(), ReconcilePolicy::ClearAll);
        // max is clamped up to initial.
        assert_eq!(
            config.reconnect_backoff(),
            (Duration::from_millis(50), Duration::from_millis(50))
        );
    }

    #[test]
    fn malformed_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), b"{not json").unwrap();
        let config = load_app_config(&dir.path().to_string_lossy());
        assert!(config.backend_url.is_none());
        assert_eq!(config.request_timeout(), Duration::from_millis(10_000));
    }

    #[test]
    fn default_payload_round_trips_into_config() {
        let json = default_app_config_json();
        let config: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.disable_network, Some(false));
        assert_eq!(config.reconcile_policy, Some(ReconcilePolicy::MatchSend));
    }
}
