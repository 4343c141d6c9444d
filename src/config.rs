use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::paginate::PageSize;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:5000/api";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub page_size: PageSize,
    pub state_dir: PathBuf,
    pub export_dir: PathBuf,
    pub login: LoginConfig,
    pub fines: FineConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoginConfig {
    pub max_attempts: u32,
    pub lockout_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FineConfig {
    /// Whether an already-paid fine may be flipped back to unpaid.
    pub allow_unpay: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout_secs: 15,
            page_size: PageSize::default(),
            state_dir: default_state_dir(),
            export_dir: PathBuf::from("."),
            login: LoginConfig::default(),
            fines: FineConfig::default(),
        }
    }
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            lockout_secs: 300,
        }
    }
}

impl Config {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn lockout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.login.lockout_secs as i64)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Reads `path` if it exists; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                debug!(path = %path.display(), "loaded config file");
                Self::from_toml(&content)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Resolves the effective config: CLI flag, then environment, then
    /// config file, then defaults.
    pub fn resolve(
        config_file: Option<PathBuf>,
        cli_api_url: Option<String>,
        cli_state_dir: Option<PathBuf>,
    ) -> Result<Self> {
        let mut config = match config_file.or_else(config_path) {
            Some(path) => Self::load_from(&path)?,
            None => Self::default(),
        };

        if let Ok(url) = std::env::var("ROLLCALL_API_URL") {
            if !url.is_empty() {
                config.api_base_url = url;
            }
        }
        if let Ok(dir) = std::env::var("ROLLCALL_STATE_DIR") {
            if !dir.is_empty() {
                config.state_dir = PathBuf::from(dir);
            }
        }
        if let Some(url) = cli_api_url {
            config.api_base_url = url;
        }
        if let Some(dir) = cli_state_dir {
            config.state_dir = dir;
        }

        config.api_base_url = config.api_base_url.trim_end_matches('/').to_string();
        Ok(config)
    }
}

fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("rollcall").join("config.toml"))
}

fn default_state_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rollcall")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let c = Config::from_toml("").unwrap();
        assert_eq!(c.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(c.login.max_attempts, 5);
        assert_eq!(c.page_size, PageSize::P100);
        assert!(!c.fines.allow_unpay);
    }

    #[test]
    fn partial_file_overrides_only_given_keys() {
        let c = Config::from_toml(
            r#"
            api_base_url = "https://example.test/api"
            page_size = 500

            [fines]
            allow_unpay = true
            "#,
        )
        .unwrap();
        assert_eq!(c.api_base_url, "https://example.test/api");
        assert_eq!(c.page_size, PageSize::P500);
        assert!(c.fines.allow_unpay);
        assert_eq!(c.login.lockout_secs, 300);
    }

    #[test]
    fn unrecognized_page_size_is_rejected() {
        assert!(Config::from_toml("page_size = 250").is_err());
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let c = Config::load_from(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(c.request_timeout_secs, 15);
    }

    #[test]
    fn cli_flag_beats_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "api_base_url = \"http://file/api/\"").unwrap();
        let c = Config::resolve(Some(path), Some("http://flag/api/".into()), None).unwrap();
        assert_eq!(c.api_base_url, "http://flag/api");
    }
}
