use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Duration;
use clap::Parser;
use config::{Config, Environment, File};
use messaging::{AttachmentPolicy, MessagingConfig};
use serde::Deserialize;

const DEFAULT_CONFIG_FILE: &str = "server.toml";
const DEFAULT_DATABASE_URL: &str = "sqlite://./data/messaging.db";

#[derive(Debug, Parser)]
#[command(name = "server", about = "Marketplace messaging server")]
pub struct Cli {
    /// Settings file; `server.toml` in the working directory when omitted.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Emit logs as JSON lines.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub bind_addr: String,
    pub database_url: String,
    pub messaging: MessagingSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8443".into(),
            database_url: DEFAULT_DATABASE_URL.into(),
            messaging: MessagingSettings::default(),
        }
    }
}

/// Flat, file- and env-friendly form of [`MessagingConfig`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MessagingSettings {
    pub edit_window_secs: i64,
    pub typing_ttl_secs: i64,
    pub search_scan_limit: u32,
    pub max_reference_depth: usize,
    pub notification_queue_capacity: usize,
    pub default_page_size: u32,
    pub max_page_size: u32,
    pub max_attachment_bytes: u64,
    pub max_attachments_per_message: usize,
    pub allowed_mime_types: Vec<String>,
}

impl Default for MessagingSettings {
    fn default() -> Self {
        let defaults = MessagingConfig::default();
        Self {
            edit_window_secs: defaults.edit_window.num_seconds(),
            typing_ttl_secs: defaults.typing_ttl.num_seconds(),
            search_scan_limit: defaults.search_scan_limit,
            max_reference_depth: defaults.max_reference_depth,
            notification_queue_capacity: defaults.notification_queue_capacity,
            default_page_size: defaults.default_page_size,
            max_page_size: defaults.max_page_size,
            max_attachment_bytes: defaults.attachments.max_file_bytes,
            max_attachments_per_message: defaults.attachments.max_files_per_message,
            allowed_mime_types: defaults.attachments.allowed_mime_types,
        }
    }
}

impl MessagingSettings {
    pub fn to_config(&self) -> anyhow::Result<MessagingConfig> {
        anyhow::ensure!(self.edit_window_secs >= 0, "edit_window_secs must not be negative");
        anyhow::ensure!(self.typing_ttl_secs >= 0, "typing_ttl_secs must not be negative");
        Ok(MessagingConfig {
            edit_window: Duration::seconds(self.edit_window_secs),
            typing_ttl: Duration::seconds(self.typing_ttl_secs),
            search_scan_limit: self.search_scan_limit,
            max_reference_depth: self.max_reference_depth,
            notification_queue_capacity: self.notification_queue_capacity,
            default_page_size: self.default_page_size,
            max_page_size: self.max_page_size,
            attachments: AttachmentPolicy {
                max_file_bytes: self.max_attachment_bytes,
                allowed_mime_types: self.allowed_mime_types.clone(),
                max_files_per_message: self.max_attachments_per_message,
            },
        })
    }
}

/// Defaults, then the settings file, then `APP__*` environment variables
/// (`APP__DATABASE_URL`, `APP__MESSAGING__EDIT_WINDOW_SECS`, ...).
pub fn load_settings(config_path: Option<&Path>) -> anyhow::Result<Settings> {
    let (path, required) = match config_path {
        Some(path) => (path.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
    };

    Config::builder()
        .add_source(File::from(path.clone()).required(required))
        .add_source(
            Environment::with_prefix("APP")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("messaging.allowed_mime_types"),
        )
        .build()
        .with_context(|| format!("failed to load settings from '{}'", path.display()))?
        .try_deserialize()
        .context("invalid server settings")
}

pub fn prepare_database_url(raw_database_url: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    storage::ensure_sqlite_parent_dir_exists(&database_url)?;
    Ok(database_url)
}

fn is_windows_drive_path(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return DEFAULT_DATABASE_URL.to_string();
    }
    if raw_database_url.starts_with("sqlite::memory:") {
        return raw_database_url.to_string();
    }

    let path = if let Some(rest) = raw_database_url.strip_prefix("sqlite://") {
        rest
    } else if let Some(rest) = raw_database_url.strip_prefix("sqlite:") {
        rest
    } else if raw_database_url.contains("://") {
        return raw_database_url.to_string();
    } else {
        raw_database_url
    };

    let path = path.replace('\\', "/");
    if is_windows_drive_path(&path) {
        format!("sqlite:{path}")
    } else {
        format!("sqlite://{path}")
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
