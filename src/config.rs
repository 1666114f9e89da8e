use anyhow::{anyhow, Result};
use config::Config;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::bootstrap::AdminAccount;
use crate::server::ServerConfig;

pub struct ZcmsConfig {
    /// Path to the directory holding zcms data
    pub data_dir: String,

    /// SQLite database file; defaults to `{data_dir}/zcms.sqlite3`
    pub database_path: String,

    /// Address the web server binds to
    pub address: String,

    /// Port the web server listens on
    pub port: u16,

    /// Bound on startup signal waits in seconds; 0 waits indefinitely
    pub signal_timeout_secs: u64,

    /// Initial administrator, created on first run only
    pub admin_email: String,
    pub admin_password: String,
}

const EMPTY_CONFIG: &str = r#"### zcms configuration file

### directory for zcms data
# data_dir = "~/.zcms"

### database file (default: <data_dir>/zcms.sqlite3)
# database_path = "~/.zcms/zcms.sqlite3"

### web server
# address = "127.0.0.1"
# port = 3000

### give up on a startup stage after this many seconds (0 = wait forever)
# signal_timeout_secs = 0

### administrator created on first run
# admin_email = "admin@localhost"
# admin_password = "admin"
"#;

fn home_dir() -> Result<String> {
    Ok(dirs::home_dir()
        .ok_or_else(|| anyhow!("Could not find home directory"))?
        .to_str()
        .ok_or_else(|| anyhow!("Could not convert home directory path to string"))?
        .to_owned())
}

fn database_path_in(data_dir: &str) -> String {
    format!("{}/zcms.sqlite3", data_dir.trim_end_matches('/'))
}

impl Default for ZcmsConfig {
    fn default() -> Self {
        let home_dir = dirs::home_dir()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|| ".".to_string());
        let data_dir = format!("{}/.zcms", home_dir);

        Self {
            database_path: database_path_in(&data_dir),
            data_dir,
            address: "127.0.0.1".to_string(),
            port: 3000,
            signal_timeout_secs: 0,
            admin_email: "admin@localhost".to_string(),
            admin_password: "admin".to_string(),
        }
    }
}

impl ZcmsConfig {
    /// Function to create and initialize a new configuration
    pub fn new(path: &Option<String>) -> Result<ZcmsConfig> {
        let mut builder = Config::builder();

        // Add in toml configuration file; write the template when missing
        match path {
            Some(p) => {
                let path = Path::new(p.as_str());
                if path.exists() {
                    builder = builder.add_source(config::File::from(path));
                } else {
                    std::fs::write(p.as_str(), EMPTY_CONFIG)
                        .map_err(|e| anyhow!("Unable to create config file: {}", e))?;
                }
            }
            None => {
                let zcms_dir = format!("{}/.zcms", home_dir()?);
                std::fs::create_dir_all(zcms_dir.as_str())
                    .map_err(|e| anyhow!("Unable to create zcms directory: {}", e))?;
                let p = format!("{}/zcms.toml", zcms_dir.as_str());
                if Path::new(p.as_str()).exists() {
                    builder = builder.add_source(config::File::from(Path::new(p.as_str())));
                } else {
                    std::fs::write(p.as_str(), EMPTY_CONFIG).map_err(|e| {
                        anyhow!("Unable to create config file {}: {}", p.as_str(), e)
                    })?;
                }
            }
        }

        // Add in settings from the environment (with a prefix of ZCMS)
        // E.g., `ZCMS_PORT=8080 ./zcms` would move the web server
        builder = builder.add_source(config::Environment::with_prefix("ZCMS"));

        let settings = builder
            .build()
            .map_err(|e| anyhow!("Failed to build configuration: {}", e))?;

        let config = settings
            .try_deserialize::<HashMap<String, String>>()
            .map_err(|e| anyhow!("Failed to deserialize configuration: {}", e))?;

        Self::from_settings(&config)
    }

    fn from_settings(config: &HashMap<String, String>) -> Result<ZcmsConfig> {
        let defaults = ZcmsConfig::default();

        let data_dir = match config.get("data_dir") {
            Some(p) => p.clone(),
            None => format!("{}/.zcms", home_dir()?),
        };
        std::fs::create_dir_all(data_dir.as_str())
            .map_err(|e| anyhow!("Unable to create data directory {}: {}", data_dir, e))?;

        let database_path = config
            .get("database_path")
            .cloned()
            .unwrap_or_else(|| database_path_in(&data_dir));

        let port = match config.get("port") {
            Some(s) => s
                .parse()
                .map_err(|e| anyhow!("Invalid port '{}': {}", s, e))?,
            None => defaults.port,
        };

        let signal_timeout_secs = match config.get("signal_timeout_secs") {
            Some(s) => s
                .parse()
                .map_err(|e| anyhow!("Invalid signal_timeout_secs '{}': {}", s, e))?,
            None => defaults.signal_timeout_secs,
        };

        Ok(ZcmsConfig {
            data_dir,
            database_path,
            address: config.get("address").cloned().unwrap_or(defaults.address),
            port,
            signal_timeout_secs,
            admin_email: config
                .get("admin_email")
                .cloned()
                .unwrap_or(defaults.admin_email),
            admin_password: config
                .get("admin_password")
                .cloned()
                .unwrap_or(defaults.admin_password),
        })
    }

    /// Startup wait bound, `None` when disabled
    pub fn signal_timeout(&self) -> Option<Duration> {
        match self.signal_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig::new()
            .with_address(self.address.as_str())
            .with_port(self.port)
    }

    pub fn admin_account(&self) -> AdminAccount {
        AdminAccount {
            email: self.admin_email.clone(),
            password: self.admin_password.clone(),
        }
    }

    /// Display configuration summary
    pub fn summary(&self) -> String {
        let timeout = match self.signal_timeout() {
            Some(t) => format!("{} seconds", t.as_secs()),
            None => "disabled".to_string(),
        };
        [
            format!("Data Directory:     {}", self.data_dir),
            format!("Database Path:      {}", self.database_path),
            format!("Listen Address:     {}:{}", self.address, self.port),
            format!("Signal Timeout:     {}", timeout),
        ]
        .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ZcmsConfig::default();
        assert!(config.data_dir.ends_with("/.zcms"));
        assert!(config.database_path.ends_with("/.zcms/zcms.sqlite3"));
        assert_eq!(config.port, 3000);
        assert_eq!(config.signal_timeout(), None);
        assert_eq!(config.server_config().bind_address(), "127.0.0.1:3000");
    }

    #[test]
    fn test_missing_file_gets_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zcms.toml");
        let path_str = path.to_str().unwrap().to_string();

        let config = ZcmsConfig::new(&Some(path_str)).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("### zcms configuration file"));
        assert_eq!(config.admin_email, "admin@localhost");
    }

    #[test]
    fn test_values_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        let path = dir.path().join("zcms.toml");
        std::fs::write(
            &path,
            format!(
                "data_dir = \"{}\"\nport = 8080\nsignal_timeout_secs = 30\nadmin_email = \"root@example.org\"\n",
                data_dir.to_str().unwrap()
            ),
        )
        .unwrap();

        let config = ZcmsConfig::new(&Some(path.to_str().unwrap().to_string())).unwrap();

        assert!(data_dir.is_dir());
        assert_eq!(
            config.database_path,
            format!("{}/zcms.sqlite3", data_dir.to_str().unwrap())
        );
        assert_eq!(config.port, 8080);
        assert_eq!(config.signal_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.admin_account().email, "root@example.org");
        assert_eq!(config.admin_account().password, "admin");
    }

    #[test]
    fn test_invalid_port_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = HashMap::new();
        settings.insert(
            "data_dir".to_string(),
            dir.path().to_str().unwrap().to_string(),
        );
        settings.insert("port".to_string(), "http".to_string());

        assert!(ZcmsConfig::from_settings(&settings).is_err());
    }
}
