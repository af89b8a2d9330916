//! Application config file.
//!
//! ```json
//! {
//!   "token": "…",
//!   "store": "/var/lib/mog",
//!   "boom_message": {
//!     "channel_id": "1147…",
//!     "dead_after": "24h",
//!     "save_after": "1m"
//!   }
//! }
//! ```
//!
//! Sections for features this binary does not run are ignored.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use mog_boom::BoomConfig;
use serde::Deserialize;

pub const DEFAULT_PATH: &str = "cfg/config.json";

/// Subdirectory of `store` used when `boom_message.message_dir` is unset.
const BOOM_DIR: &str = "boom-message";

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub token: String,
    /// Root of every on-disk state directory.
    #[serde(default)]
    pub store: PathBuf,
    pub boom_message: BoomConfig,
}

impl AppConfig {
    /// Read, apply defaults and validate.
    ///
    /// A non-empty `token_override` (from `DISCORD_TOKEN`) wins over the file.
    pub fn load(path: &Path, token_override: Option<String>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let mut config: AppConfig = serde_json::from_str(&raw)
            .with_context(|| format!("decode config {}", path.display()))?;

        if let Some(token) = token_override.filter(|t| !t.is_empty()) {
            config.token = token;
        }
        config.apply_defaults();
        config.validate()?;
        Ok(config)
    }

    fn apply_defaults(&mut self) {
        if self.boom_message.message_dir.as_os_str().is_empty() {
            self.boom_message.message_dir = self.store.join(BOOM_DIR);
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.token.trim().is_empty() {
            bail!("token is empty (set it in the config or DISCORD_TOKEN)");
        }
        self.boom_message.validate().context("boom_message")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn write(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("config.json");
        std::fs::write(&path, body).unwrap();
        path
    }

    const FULL: &str = r#"{
        "token": "from-file",
        "store": "/srv/mog",
        "welcome_voice": { "channel_id": "1", "emoji": "👋" },
        "boom_message": {
            "channel_id": "1147",
            "dead_after": "24h",
            "save_after": "1m 30s"
        }
    }"#;

    #[test]
    fn loads_and_defaults_message_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(&write(dir.path(), FULL), None).unwrap();
        assert_eq!(config.token, "from-file");
        assert_eq!(config.boom_message.dead_after, Duration::from_secs(86_400));
        assert_eq!(config.boom_message.save_after, Duration::from_secs(90));
        assert_eq!(
            config.boom_message.message_dir,
            PathBuf::from("/srv/mog/boom-message")
        );
    }

    #[test]
    fn explicit_message_dir_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let body = r#"{
            "token": "t",
            "boom_message": {
                "channel_id": "1",
                "dead_after": "5s",
                "save_after": "1s",
                "message_dir": "/tmp/boom"
            }
        }"#;
        let config = AppConfig::load(&write(dir.path(), body), None).unwrap();
        assert_eq!(config.boom_message.message_dir, PathBuf::from("/tmp/boom"));
    }

    #[test]
    fn env_token_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), FULL);
        let config = AppConfig::load(&path, Some("from-env".into())).unwrap();
        assert_eq!(config.token, "from-env");

        let config = AppConfig::load(&path, Some(String::new())).unwrap();
        assert_eq!(config.token, "from-file");
    }

    #[test]
    fn missing_token_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let body = r#"{"boom_message": {"channel_id": "1", "dead_after": "5s", "save_after": "1s"}}"#;
        let err = AppConfig::load(&write(dir.path(), body), None).unwrap_err();
        assert!(err.to_string().contains("token is empty"));
    }

    #[test]
    fn invalid_boom_section_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let body = r#"{"token": "t", "boom_message": {"channel_id": "1", "dead_after": "0s", "save_after": "1s"}}"#;
        let err = AppConfig::load(&write(dir.path(), body), None).unwrap_err();
        assert_eq!(err.to_string(), "boom_message");
        assert!(format!("{err:#}").contains("dead_after must be positive"));
    }

    #[test]
    fn missing_file_names_path() {
        let err = AppConfig::load(Path::new("/nonexistent/mog.json"), None).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/mog.json"));
    }
}
