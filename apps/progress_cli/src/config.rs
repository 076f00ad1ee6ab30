use std::{fs, path::Path, time::Duration};

use anyhow::Context;
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "progress.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub server_url: String,
    pub student_id: Option<String>,
    pub poll_interval_seconds: u64,
    pub request_timeout_seconds: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8080".into(),
            student_id: None,
            poll_interval_seconds: 0,
            request_timeout_seconds: 15,
        }
    }
}

impl Settings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds.max(1))
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    server_url: Option<String>,
    student_id: Option<String>,
    poll_interval_seconds: Option<u64>,
    request_timeout_seconds: Option<u64>,
}

/// Defaults, then the config file (explicit path must exist; the default one
/// is optional), then environment variables.
pub fn load_settings(explicit_path: Option<&Path>) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();
    match explicit_path {
        Some(path) => apply_file(&mut settings, path)?,
        None => {
            let path = Path::new(DEFAULT_CONFIG_FILE);
            if path.exists() {
                apply_file(&mut settings, path)?;
            }
        }
    }
    apply_env(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn apply_file(settings: &mut Settings, path: &Path) -> anyhow::Result<()> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file '{}'", path.display()))?;
    let file_cfg: FileSettings = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config file '{}'", path.display()))?;

    if let Some(v) = file_cfg.server_url {
        settings.server_url = v;
    }
    if let Some(v) = file_cfg.student_id {
        settings.student_id = Some(v);
    }
    if let Some(v) = file_cfg.poll_interval_seconds {
        settings.poll_interval_seconds = v;
    }
    if let Some(v) = file_cfg.request_timeout_seconds {
        settings.request_timeout_seconds = v;
    }
    Ok(())
}

fn apply_env(settings: &mut Settings, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("PROGRESS_SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = var("APP__SERVER_URL") {
        settings.server_url = v;
    }

    if let Some(v) = var("APP__STUDENT_ID").filter(|v| !v.trim().is_empty()) {
        settings.student_id = Some(v);
    }

    if let Some(parsed) = var("APP__POLL_INTERVAL_SECONDS").and_then(|v| v.parse().ok()) {
        settings.poll_interval_seconds = parsed;
    }
    if let Some(parsed) = var("APP__REQUEST_TIMEOUT_SECONDS").and_then(|v| v.parse().ok()) {
        settings.request_timeout_seconds = parsed;
    }
}
