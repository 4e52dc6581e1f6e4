use std::fmt;
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::{ClientKey, ListenerConfig};

pub const DEFAULT_SCOPE: &str = "openid profile offline_access";
pub const DEFAULT_REDIRECT_HOST: &str = "127.0.0.1";
pub const DEFAULT_REDIRECT_PATH: &str = "/signin-oidc/";
pub const DEFAULT_REDIRECT_PORT: u16 = 18989;

/// Locates the per-user configuration directory.
#[derive(Debug, Clone)]
pub struct ConfigLocator {
    root: PathBuf,
}

impl ConfigLocator {
    /// Use the platform's per-user configuration directory.
    pub fn new() -> Result<Self, ConfigError> {
        let dirs = ProjectDirs::from("app", "desktop-auth", "desktop-auth")
            .ok_or(ConfigError::MissingProjectDirs)?;
        Self::with_root(dirs.config_dir())
    }

    /// Use `root`, creating it readable by the current user only.
    pub fn with_root(root: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(ConfigError::CreateDir)?;
        restrict_to_owner(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Default location of the login settings file.
    pub fn settings_file(&self) -> PathBuf {
        self.root.join("settings.json")
    }

    /// Load settings from [`settings_file`](Self::settings_file).
    pub fn load(&self) -> Result<AuthConfig, ConfigError> {
        AuthConfig::from_file(self.settings_file())
    }
}

#[cfg(unix)]
fn restrict_to_owner(dir: &Path) -> Result<(), ConfigError> {
    fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_to_owner(_dir: &Path) -> Result<(), ConfigError> {
    Ok(())
}

/// Identity-provider registration and local redirect endpoint settings.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthConfig {
    /// Identity-provider host, e.g. `login.example.com`.
    pub server: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub scope: String,
    pub redirect_host: String,
    pub redirect_path: String,
    pub redirect_port: u16,
    /// Accept responses whose correlation id was never issued here. Insecure.
    pub allow_unsolicited: bool,
    pub app_name: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            client_id: String::new(),
            client_secret: None,
            scope: DEFAULT_SCOPE.to_owned(),
            redirect_host: DEFAULT_REDIRECT_HOST.to_owned(),
            redirect_path: DEFAULT_REDIRECT_PATH.to_owned(),
            redirect_port: DEFAULT_REDIRECT_PORT,
            allow_unsolicited: false,
            app_name: None,
        }
    }
}

impl AuthConfig {
    pub fn new(server: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            client_id: client_id.into(),
            ..Self::default()
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Only presence is checked; values are passed to the engine untouched.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.trim().is_empty() {
            return Err(ConfigError::Missing("server"));
        }
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::Missing("clientId"));
        }
        Ok(())
    }

    pub fn listener_config(&self) -> ListenerConfig {
        ListenerConfig::new(
            self.redirect_host.clone(),
            self.redirect_port,
            self.redirect_path.clone(),
        )
    }

    /// Redirect URI as configured; the bound listener reports the effective one.
    pub fn redirect_uri(&self) -> String {
        format!(
            "http://{}:{}{}",
            self.redirect_host, self.redirect_port, self.redirect_path
        )
    }

    pub fn client_key(&self) -> ClientKey {
        ClientKey::new(
            self.server.clone(),
            self.client_id.clone(),
            self.scope.clone(),
        )
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("server", &self.server)
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("scope", &self.scope)
            .field("redirect_host", &self.redirect_host)
            .field("redirect_path", &self.redirect_path)
            .field("redirect_port", &self.redirect_port)
            .field("allow_unsolicited", &self.allow_unsolicited)
            .field("app_name", &self.app_name)
            .finish()
    }
}

/// Errors that can occur when locating or reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to determine configuration directory for desktop-auth")]
    MissingProjectDirs,
    #[error("failed to create configuration directory: {0}")]
    CreateDir(#[source] std::io::Error),
    #[error("filesystem error: {0}")]
    Io(#[source] std::io::Error),
    #[error("invalid settings in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("missing required setting '{0}'")]
    Missing(&'static str),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}
