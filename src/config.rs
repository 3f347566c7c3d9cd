//! Configuration loading and validation
//!
//! All configuration is declared in a single TOML file (departments, space
//! hierarchy, router tuning) and validated fully at load time, so malformed
//! config fails startup instead of surfacing mid-conversation.

use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

use crate::matrix::HomeserverTarget;

/// Configuration errors, all fatal at startup
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub departments: Vec<Department>,
    pub spaces: SpaceConfig,
    #[serde(default)]
    pub router: RouterConfig,
}

/// A routing category: which room/space a conversation belongs to and which
/// staff are invited. Immutable after load.
#[derive(Debug, Clone, Deserialize)]
pub struct Department {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub description: String,
    /// Homeserver base URL, e.g. `http://localhost:8008`
    pub homeserver: String,
    /// Bearer token used for all Matrix calls on behalf of this department
    pub access_token: String,
    /// The relay identity; never invited to its own rooms
    pub bot_user_id: String,
    /// Invited at power 50
    #[serde(default)]
    pub staff: Vec<String>,
    /// Invited at power 100
    #[serde(default)]
    pub admins: Vec<String>,
}

impl Department {
    pub fn target(&self) -> HomeserverTarget {
        HomeserverTarget {
            homeserver: self.homeserver.clone(),
            access_token: self.access_token.clone(),
        }
    }

    /// Button/menu label, e.g. `🛠️ Technical Support`
    pub fn label(&self) -> String {
        if self.icon.is_empty() {
            self.name.clone()
        } else {
            format!("{} {}", self.icon, self.name)
        }
    }
}

/// Two-level space hierarchy: one root, one space per communication channel
#[derive(Debug, Clone, Deserialize)]
pub struct SpaceConfig {
    pub root: SpaceNodeConfig,
    pub channels: Vec<ChannelSpaceConfig>,
}

impl SpaceConfig {
    pub fn channel(&self, key: &str) -> Option<&ChannelSpaceConfig> {
        self.channels.iter().find(|c| c.key == key)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpaceNodeConfig {
    pub name: String,
    #[serde(default)]
    pub topic: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelSpaceConfig {
    /// Stable cache key, e.g. `telegram`
    pub key: String,
    /// Display name, also used as the channel label in room names
    pub name: String,
    #[serde(default)]
    pub topic: String,
}

/// Router tuning knobs
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Sessions idle longer than this are evicted (default 6 h)
    pub session_ttl_secs: u64,
    /// How often the eviction sweep runs
    pub sweep_interval_secs: u64,
    /// Uniform timeout for outbound Matrix calls
    pub request_timeout_secs: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: 21_600,
            sweep_interval_secs: 60,
            request_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Load and validate configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Credentials for space operations: the first configured department's
    /// homeserver and token (validation guarantees one exists)
    pub fn space_target(&self) -> HomeserverTarget {
        self.departments[0].target()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.departments.is_empty() {
            return Err(ConfigError::Invalid("at least one department is required".into()));
        }

        let mut seen = HashSet::new();
        for dept in &self.departments {
            if dept.id.is_empty() {
                return Err(ConfigError::Invalid("department id must not be empty".into()));
            }
            if !seen.insert(dept.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate department id {:?}",
                    dept.id
                )));
            }
            if dept.name.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "department {:?}: name must not be empty",
                    dept.id
                )));
            }
            if !dept.homeserver.starts_with("http://") && !dept.homeserver.starts_with("https://") {
                return Err(ConfigError::Invalid(format!(
                    "department {:?}: homeserver must be an http(s) URL",
                    dept.id
                )));
            }
            if dept.access_token.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "department {:?}: access_token must not be empty",
                    dept.id
                )));
            }
            if dept.bot_user_id.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "department {:?}: bot_user_id must not be empty",
                    dept.id
                )));
            }
        }

        if self.spaces.root.name.is_empty() {
            return Err(ConfigError::Invalid("spaces.root.name must not be empty".into()));
        }
        if self.spaces.channels.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one channel space is required".into(),
            ));
        }
        let mut channel_keys = HashSet::new();
        for channel in &self.spaces.channels {
            if channel.key.is_empty() || channel.name.is_empty() {
                return Err(ConfigError::Invalid(
                    "channel space key and name must not be empty".into(),
                ));
            }
            if !channel_keys.insert(channel.key.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate channel space key {:?}",
                    channel.key
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
        [spaces.root]
        name = "Customer Support"
        topic = "All support conversations"

        [[spaces.channels]]
        key = "telegram"
        name = "Telegram"
        topic = "Conversations arriving via Telegram"

        [[departments]]
        id = "tech"
        name = "Technical Support"
        icon = "🛠️"
        description = "Technical issues, bugs, account problems"
        homeserver = "http://localhost:8008"
        access_token = "syt_tech"
        bot_user_id = "@deskhub:localhost"
        staff = ["@support:localhost"]
        admins = ["@admin:localhost"]

        [[departments]]
        id = "sales"
        name = "Sales"
        homeserver = "http://localhost:8008"
        access_token = "syt_sales"
        bot_user_id = "@deskhub:localhost"
    "#;

    #[test]
    fn parses_valid_config() {
        let config = Config::from_toml_str(VALID).unwrap();
        assert_eq!(config.departments.len(), 2);
        assert_eq!(config.departments[0].id, "tech");
        assert_eq!(config.departments[0].staff, vec!["@support:localhost"]);
        assert_eq!(config.spaces.channel("telegram").unwrap().name, "Telegram");
        assert!(config.spaces.channel("webchat").is_none());
    }

    #[test]
    fn router_defaults_apply() {
        let config = Config::from_toml_str(VALID).unwrap();
        assert_eq!(config.router.session_ttl_secs, 21_600);
        assert_eq!(config.router.sweep_interval_secs, 60);
        assert_eq!(config.router.request_timeout_secs, 30);
    }

    #[test]
    fn router_overrides_apply() {
        let toml = format!("{VALID}\n[router]\nsession_ttl_secs = 120\n");
        let config = Config::from_toml_str(&toml).unwrap();
        assert_eq!(config.router.session_ttl_secs, 120);
        assert_eq!(config.router.sweep_interval_secs, 60);
    }

    #[test]
    fn rejects_empty_departments() {
        let toml = r#"
            departments = []
            [spaces.root]
            name = "Support"
            [[spaces.channels]]
            key = "telegram"
            name = "Telegram"
        "#;
        assert!(matches!(
            Config::from_toml_str(toml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_duplicate_department_ids() {
        let toml = VALID.replace("id = \"sales\"", "id = \"tech\"");
        let err = Config::from_toml_str(&toml).unwrap_err();
        assert!(err.to_string().contains("duplicate department id"));
    }

    #[test]
    fn rejects_non_http_homeserver() {
        let toml = VALID.replace("http://localhost:8008", "localhost:8008");
        assert!(Config::from_toml_str(&toml).is_err());
    }

    #[test]
    fn department_label_with_and_without_icon() {
        let config = Config::from_toml_str(VALID).unwrap();
        assert_eq!(config.departments[0].label(), "🛠️ Technical Support");
        assert_eq!(config.departments[1].label(), "Sales");
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deskhub.toml");
        std::fs::write(&path, VALID).unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.space_target().access_token, "syt_tech");
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = Config::load(Path::new("/nonexistent/deskhub.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
