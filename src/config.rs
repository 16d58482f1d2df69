use anyhow::Result;
use directories::{ProjectDirs, UserDirs};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_ENV_FILE: &str = "credentials.env";
pub const DEFAULT_PORTAL_URL: &str = "https://sistema.ssw.inf.br/bin/ssw0422";
pub const DEFAULT_DRIVER_PORT: u16 = 9516;

/// Operator credentials for the portal login form.
///
/// Values are taken as-is from the environment. Nothing is validated here; an
/// empty field only shows up later as a failed login.
#[derive(Clone, Default, PartialEq)]
pub struct Credentials {
    pub company: String,
    pub tax_id: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("company", &self.company)
            .field("tax_id", &self.tax_id)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).unwrap_or_default();
        Self {
            company: get("PORTAL_COMPANY"),
            tax_id: get("PORTAL_TAX_ID"),
            username: get("PORTAL_USERNAME"),
            password: get("PORTAL_PASSWORD"),
        }
    }
}

/// Runtime settings, loaded once at process start.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub credentials: Credentials,
    pub portal_url: String,
    pub download_dir: PathBuf,
    pub schedule_file: PathBuf,
    pub driver_port: u16,
    pub driver_path: Option<PathBuf>,
    pub headless: bool,
}

impl AppConfig {
    /// Load the env file (if any) into the process environment, then read settings from it.
    pub fn from_env() -> Self {
        let env_file = std::env::var("REPORT455_ENV_FILE").unwrap_or_else(|_| DEFAULT_ENV_FILE.to_string());
        match dotenvy::from_filename(&env_file) {
            Ok(path) => tracing::info!("Loaded environment from {}", path.display()),
            Err(e) if e.not_found() => tracing::debug!("No env file at {}", env_file),
            Err(e) => tracing::warn!("Could not read env file {}: {}", env_file, e),
        }

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let credentials = Credentials::from_lookup(&lookup);

        let portal_url = lookup("PORTAL_URL")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PORTAL_URL.to_string());

        let download_dir = lookup("REPORT_DOWNLOAD_DIR")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_download_dir);

        let schedule_file = lookup("REPORT_SCHEDULE_FILE")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_schedule_file);

        let driver_port = match lookup("CHROMEDRIVER_PORT") {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                tracing::warn!("Ignoring invalid CHROMEDRIVER_PORT {:?}", raw);
                DEFAULT_DRIVER_PORT
            }),
            None => DEFAULT_DRIVER_PORT,
        };

        let driver_path = lookup("CHROMEDRIVER_PATH")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        let headless = lookup("BROWSER_HEADLESS")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Self {
            credentials,
            portal_url,
            download_dir,
            schedule_file,
            driver_port,
            driver_path,
            headless,
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "report455", "report455")
}

fn default_download_dir() -> PathBuf {
    UserDirs::new()
        .and_then(|dirs| dirs.download_dir().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("downloads"))
}

fn default_schedule_file() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().join("schedules.json"))
        .unwrap_or_else(|| PathBuf::from("schedules.json"))
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum Theme {
    Light,
    Dark,
}

/// Control panel preferences persisted between launches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Preferences {
    pub theme: Theme,
    pub start_scheduler_on_launch: bool,
    pub start_hidden: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            theme: Theme::Dark,
            start_scheduler_on_launch: true,
            start_hidden: true,
        }
    }
}

impl Preferences {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)?;
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let proj_dirs = project_dirs()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

        Ok(proj_dirs.config_dir().join("config.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_missing_credentials_are_empty_not_errors() {
        let config = AppConfig::from_lookup(lookup_from(&[("PORTAL_USERNAME", "ops")]));
        assert_eq!(config.credentials.username, "ops");
        assert!(config.credentials.password.is_empty());
        assert!(config.credentials.company.is_empty());
        assert_eq!(config.portal_url, DEFAULT_PORTAL_URL);
        assert_eq!(config.driver_port, DEFAULT_DRIVER_PORT);
        assert!(!config.headless);
    }

    #[test]
    fn test_overrides_from_environment() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("REPORT_DOWNLOAD_DIR", "/mnt/reports"),
            ("REPORT_SCHEDULE_FILE", "/tmp/sched.json"),
            ("CHROMEDRIVER_PORT", "9999"),
            ("BROWSER_HEADLESS", "TRUE"),
        ]));
        assert_eq!(config.download_dir, PathBuf::from("/mnt/reports"));
        assert_eq!(config.schedule_file, PathBuf::from("/tmp/sched.json"));
        assert_eq!(config.driver_port, 9999);
        assert!(config.headless);
    }

    #[test]
    fn test_invalid_port_falls_back() {
        let config = AppConfig::from_lookup(lookup_from(&[("CHROMEDRIVER_PORT", "abc")]));
        assert_eq!(config.driver_port, DEFAULT_DRIVER_PORT);
    }

    #[test]
    fn test_password_is_redacted_in_debug() {
        let creds = Credentials {
            password: "hunter2".to_string(),
            ..Default::default()
        };
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_preferences_roundtrip_and_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        assert_eq!(Preferences::load_from(&path).unwrap(), Preferences::default());

        let prefs = Preferences {
            theme: Theme::Light,
            start_scheduler_on_launch: false,
            start_hidden: false,
        };
        prefs.save_to(&path).unwrap();
        assert_eq!(Preferences::load_from(&path).unwrap(), prefs);
    }
}
