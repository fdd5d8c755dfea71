use std::{fs, path::Path, time::Duration};

use anyhow::Context;
use serde::Deserialize;
use shared::domain::DismissalPolicy;
use tracing::warn;

pub const SETTINGS_FILE: &str = "skillsync.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub server_url: String,
    pub database_url: String,
    pub refresh_secs: u64,
    pub dismissal_policy: DismissalPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8080".into(),
            database_url: "sqlite://./data/skillsync.db".into(),
            refresh_secs: 60,
            dismissal_policy: DismissalPolicy::SingleSlot,
        }
    }
}

impl Settings {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_secs.max(1))
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    server_url: Option<String>,
    database_url: Option<String>,
    refresh_secs: Option<u64>,
    dismissal_policy: Option<DismissalPolicy>,
}

/// Defaults, then `skillsync.toml` in the working directory, then
/// `SKILLSYNC_*` environment variables.
pub fn load_settings() -> anyhow::Result<Settings> {
    load_settings_from(Path::new(SETTINGS_FILE), |key| std::env::var(key).ok())
}

pub fn load_settings_from(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    if path.exists() {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file '{}'", path.display()))?;
        let file_cfg: FileSettings = toml::from_str(&raw)
            .with_context(|| format!("invalid settings file '{}'", path.display()))?;

        if let Some(v) = file_cfg.server_url {
            settings.server_url = v;
        }
        if let Some(v) = file_cfg.database_url {
            settings.database_url = v;
        }
        if let Some(v) = file_cfg.refresh_secs {
            settings.refresh_secs = v;
        }
        if let Some(v) = file_cfg.dismissal_policy {
            settings.dismissal_policy = v;
        }
    }

    if let Some(v) = env("SKILLSYNC_SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = env("SKILLSYNC_DATABASE_URL") {
        settings.database_url = v;
    }
    if let Some(v) = env("SKILLSYNC_REFRESH_SECS") {
        match v.parse::<u64>() {
            Ok(parsed) => settings.refresh_secs = parsed,
            Err(_) => warn!("ignoring SKILLSYNC_REFRESH_SECS='{v}': not a number of seconds"),
        }
    }
    if let Some(v) = env("SKILLSYNC_DISMISSAL_POLICY") {
        match v.parse::<DismissalPolicy>() {
            Ok(parsed) => settings.dismissal_policy = parsed,
            Err(err) => warn!("ignoring SKILLSYNC_DISMISSAL_POLICY: {err}"),
        }
    }

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn missing_file_yields_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let settings = load_settings_from(&temp.path().join(SETTINGS_FILE), no_env).expect("load");
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn file_values_override_defaults_and_env_overrides_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(SETTINGS_FILE);
        fs::write(
            &path,
            r#"
server_url = "https://skillsync.example"
refresh_secs = 15
dismissal_policy = "session_set"
"#,
        )
        .expect("write settings");

        let env: HashMap<&str, &str> = HashMap::from([
            ("SKILLSYNC_REFRESH_SECS", "30"),
            ("SKILLSYNC_DATABASE_URL", "sqlite::memory:"),
        ]);
        let settings =
            load_settings_from(&path, |key| env.get(key).map(|v| v.to_string())).expect("load");

        assert_eq!(settings.server_url, "https://skillsync.example");
        assert_eq!(settings.database_url, "sqlite::memory:");
        assert_eq!(settings.refresh_secs, 30);
        assert_eq!(settings.dismissal_policy, DismissalPolicy::SessionSet);
    }

    #[test]
    fn unparseable_env_values_are_ignored() {
        let temp = tempfile::tempdir().expect("tempdir");
        let settings = load_settings_from(&temp.path().join(SETTINGS_FILE), |key| match key {
            "SKILLSYNC_REFRESH_SECS" => Some("soon".into()),
            "SKILLSYNC_DISMISSAL_POLICY" => Some("forever".into()),
            _ => None,
        })
        .expect("load");

        assert_eq!(settings.refresh_secs, 60);
        assert_eq!(settings.dismissal_policy, DismissalPolicy::SingleSlot);
    }

    #[test]
    fn zero_refresh_is_clamped() {
        let settings = Settings {
            refresh_secs: 0,
            ..Settings::default()
        };
        assert_eq!(settings.refresh_interval(), Duration::from_secs(1));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(SETTINGS_FILE);
        fs::write(&path, "refresh_secs = \"often\"").expect("write settings");
        assert!(load_settings_from(&path, no_env).is_err());
    }
}
