//! Configuration types and loading
//!
//! Config precedence: CLI arg > env vars > config file > defaults.
//! The refresh token override comes from TESLA_REFRESH_TOKEN only, never
//! from the TOML, so a committed config file cannot leak it.

use common::Secret;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Vendor API settings
#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Session/auth settings
#[derive(Debug, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_token_file")]
    pub token_file: PathBuf,
    /// Allow the session to prompt on stdin when a full login is needed.
    /// Off by default: a headless gateway repairs auth via /login/* instead.
    #[serde(default)]
    pub interactive: bool,
    /// Seeded from TESLA_REFRESH_TOKEN when the token file slot is empty.
    #[serde(skip)]
    pub refresh_token: Option<Secret<String>>,
}

fn default_base_url() -> String {
    tesla_api::DEFAULT_API_BASE.to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_max_connections() -> usize {
    256
}

fn default_token_file() -> PathBuf {
    PathBuf::from(tesla_auth::DEFAULT_TOKEN_FILE)
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_file: default_token_file(),
            interactive: false,
            refresh_token: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment
    /// variables.
    ///
    /// Overrides: `TESLA_API_BASE` over `api.base_url`, `TESLA_TOKEN_FILE`
    /// over `auth.token_file`, `TESLA_REFRESH_TOKEN` into the (otherwise
    /// unset) refresh token seed.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(base) = std::env::var("TESLA_API_BASE") {
            config.api.base_url = base;
        }
        if let Ok(file) = std::env::var("TESLA_TOKEN_FILE") {
            config.auth.token_file = PathBuf::from(file);
        }
        if let Ok(token) = std::env::var("TESLA_REFRESH_TOKEN") {
            let token = token.trim().to_owned();
            if !token.is_empty() {
                config.auth.refresh_token = Some(Secret::new(token));
            }
        }

        if !config.api.base_url.starts_with("http://")
            && !config.api.base_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "api.base_url must start with http:// or https://, got: {}",
                config.api.base_url
            )));
        }

        if config.api.timeout_secs == 0 {
            return Err(common::Error::Config(
                "api.timeout_secs must be greater than 0".into(),
            ));
        }

        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "server.max_connections must be greater than 0".into(),
            ));
        }

        if config.auth.token_file.as_os_str().is_empty() {
            return Err(common::Error::Config(
                "auth.token_file must not be empty".into(),
            ));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mutex to serialize tests that mutate environment variables, preventing
    /// data races when tests run in parallel.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    unsafe fn clear_overrides() {
        unsafe {
            remove_env("TESLA_API_BASE");
            remove_env("TESLA_TOKEN_FILE");
            remove_env("TESLA_REFRESH_TOKEN");
        }
    }

    fn valid_toml() -> &'static str {
        r#"
[server]
listen_addr = "127.0.0.1:8080"

[api]
base_url = "https://fleet-api.prd.na.vn.cloud.tesla.com"
timeout_secs = 30

[auth]
token_file = ".tesla_refresh_token"
"#
    }

    fn write_config(dir_name: &str, contents: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(dir_name);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn load_valid_config() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { clear_overrides() };
        let path = write_config("tesla-gateway-test-valid", valid_toml());

        let config = Config::load(&path).unwrap();
        assert_eq!(
            config.server.listen_addr,
            "127.0.0.1:8080".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(config.server.max_connections, 256);
        assert_eq!(config.api.timeout_secs, 30);
        assert_eq!(
            config.auth.token_file,
            PathBuf::from(".tesla_refresh_token")
        );
        assert!(!config.auth.interactive);
        assert!(config.auth.refresh_token.is_none());
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { clear_overrides() };
        let path = write_config(
            "tesla-gateway-test-minimal",
            "[server]\nlisten_addr = \"127.0.0.1:9000\"\n",
        );

        let config = Config::load(&path).unwrap();
        assert_eq!(config.api.base_url, tesla_api::DEFAULT_API_BASE);
        assert_eq!(config.api.timeout_secs, 30);
        assert_eq!(
            config.auth.token_file,
            PathBuf::from(tesla_auth::DEFAULT_TOKEN_FILE)
        );
    }

    #[test]
    fn load_missing_file_fails() {
        let result = Config::load(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn load_invalid_toml_fails() {
        let path = write_config("tesla-gateway-test-badtoml", "not valid {{{{ toml");
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn env_overrides_base_url_and_token_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let path = write_config("tesla-gateway-test-env", valid_toml());

        unsafe {
            clear_overrides();
            set_env("TESLA_API_BASE", "https://owner-api.teslamotors.com");
            set_env("TESLA_TOKEN_FILE", "/var/lib/tesla/token");
        }
        let config = Config::load(&path).unwrap();
        unsafe { clear_overrides() };

        assert_eq!(config.api.base_url, "https://owner-api.teslamotors.com");
        assert_eq!(config.auth.token_file, PathBuf::from("/var/lib/tesla/token"));
    }

    #[test]
    fn refresh_token_from_env_is_secret() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let path = write_config("tesla-gateway-test-rt", valid_toml());

        unsafe {
            clear_overrides();
            set_env("TESLA_REFRESH_TOKEN", "eyJrt-material");
        }
        let config = Config::load(&path).unwrap();
        unsafe { clear_overrides() };

        let secret = config.auth.refresh_token.unwrap();
        assert_eq!(secret.expose(), "eyJrt-material");
        assert_eq!(format!("{secret:?}"), "[REDACTED]");
    }

    #[test]
    fn whitespace_only_refresh_token_yields_none() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let path = write_config("tesla-gateway-test-rt-empty", valid_toml());

        unsafe {
            clear_overrides();
            set_env("TESLA_REFRESH_TOKEN", "  \n ");
        }
        let config = Config::load(&path).unwrap();
        unsafe { clear_overrides() };

        assert!(config.auth.refresh_token.is_none());
    }

    #[test]
    fn base_url_without_scheme_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { clear_overrides() };
        let path = write_config(
            "tesla-gateway-test-badurl",
            r#"
[server]
listen_addr = "127.0.0.1:8080"

[api]
base_url = "fleet-api.prd.na.vn.cloud.tesla.com"
"#,
        );

        let result = Config::load(&path);
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(
            err.contains("base_url must start with http"),
            "error message should explain the issue, got: {err}"
        );
    }

    #[test]
    fn zero_timeout_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { clear_overrides() };
        let path = write_config(
            "tesla-gateway-test-timeout",
            r#"
[server]
listen_addr = "127.0.0.1:8080"

[api]
timeout_secs = 0
"#,
        );

        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn zero_max_connections_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { clear_overrides() };
        let path = write_config(
            "tesla-gateway-test-maxconn",
            r#"
[server]
listen_addr = "127.0.0.1:8080"
max_connections = 0
"#,
        );

        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn resolve_path_cli_arg_wins() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/should-lose.toml") };
        let path = Config::resolve_path(Some("/cli/wins.toml"));
        unsafe { remove_env("CONFIG_PATH") };
        assert_eq!(path, PathBuf::from("/cli/wins.toml"));
    }

    #[test]
    fn resolve_path_env_var() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/path.toml") };
        let path = Config::resolve_path(None);
        unsafe { remove_env("CONFIG_PATH") };
        assert_eq!(path, PathBuf::from("/env/path.toml"));
    }

    #[test]
    fn resolve_path_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("CONFIG_PATH") };
        let path = Config::resolve_path(None);
        assert_eq!(path, PathBuf::from("config.toml"));
    }
}
