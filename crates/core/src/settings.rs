use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pager::DEFAULT_PAGE_SIZE;

const DEFAULT_MAX_RECENT_SOURCES: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ViewerSettings {
    pub default_page_size: usize,
    pub max_recent_sources: usize,
    pub recent_sources: Vec<String>,
    pub confirm_unsafe_save: bool,
    pub audit_enabled: bool,
    pub log_level: String,
}

impl Default for ViewerSettings {
    fn default() -> Self {
        Self {
            default_page_size: DEFAULT_PAGE_SIZE,
            max_recent_sources: DEFAULT_MAX_RECENT_SOURCES,
            recent_sources: Vec::new(),
            confirm_unsafe_save: true,
            audit_enabled: false,
            log_level: "info".to_string(),
        }
    }
}

impl ViewerSettings {
    fn normalize(&mut self) {
        if self.default_page_size == 0 {
            self.default_page_size = DEFAULT_PAGE_SIZE;
        }
        let mut seen = std::collections::HashSet::new();
        self.recent_sources
            .retain(|source| !source.trim().is_empty() && seen.insert(source.clone()));
        self.recent_sources.truncate(self.max_recent_sources);
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("config directory is unavailable for this platform")]
    ConfigDirUnavailable,
    #[error("failed to read settings file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to create config directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize settings: {source}")]
    Serialize {
        #[source]
        source: toml::ser::Error,
    },
    #[error("failed to write settings file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct FileSettingsStore {
    path: PathBuf,
    settings: ViewerSettings,
}

impl FileSettingsStore {
    pub fn load_default() -> Result<Self, SettingsError> {
        let path = default_settings_path()?;
        Self::load_from_path(path)
    }

    pub fn load_from_path(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        if !path.exists() {
            return Ok(Self {
                path,
                settings: ViewerSettings::default(),
            });
        }

        let raw = fs::read_to_string(&path).map_err(|source| SettingsError::Read {
            path: path.clone(),
            source,
        })?;

        if raw.trim().is_empty() {
            return Ok(Self {
                path,
                settings: ViewerSettings::default(),
            });
        }

        let mut settings: ViewerSettings =
            toml::from_str(&raw).map_err(|source| SettingsError::Parse {
                path: path.clone(),
                source,
            })?;
        settings.normalize();

        Ok(Self { path, settings })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn settings(&self) -> &ViewerSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut ViewerSettings {
        &mut self.settings
    }

    #[must_use]
    pub fn recent_sources(&self) -> &[String] {
        &self.settings.recent_sources
    }

    /// Moves `source` to the front of the recent list.
    pub fn push_recent(&mut self, source: impl Into<String>) {
        let source = source.into();
        self.settings
            .recent_sources
            .retain(|existing| *existing != source);
        self.settings.recent_sources.insert(0, source);
        self.settings
            .recent_sources
            .truncate(self.settings.max_recent_sources);
    }

    #[must_use]
    pub fn forget_recent(&mut self, source: &str) -> bool {
        let original_len = self.settings.recent_sources.len();
        self.settings
            .recent_sources
            .retain(|existing| existing != source);
        self.settings.recent_sources.len() != original_len
    }

    pub fn persist(&self) -> Result<(), SettingsError> {
        if let Some(parent_dir) = self.path.parent() {
            fs::create_dir_all(parent_dir).map_err(|source| SettingsError::CreateDir {
                path: parent_dir.to_path_buf(),
                source,
            })?;
        }

        let rendered = toml::to_string_pretty(&self.settings)
            .map_err(|source| SettingsError::Serialize { source })?;

        fs::write(&self.path, rendered).map_err(|source| SettingsError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

pub fn default_config_dir() -> Result<PathBuf, SettingsError> {
    if let Some(custom) = env::var_os("PARQVIEW_CONFIG_DIR") {
        return Ok(PathBuf::from(custom));
    }

    let base_dir = if cfg!(target_os = "windows") {
        env::var_os("APPDATA")
            .map(PathBuf::from)
            .ok_or(SettingsError::ConfigDirUnavailable)?
    } else if let Some(xdg_config_home) = env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config_home)
    } else {
        let home = env::var_os("HOME").ok_or(SettingsError::ConfigDirUnavailable)?;
        PathBuf::from(home).join(".config")
    };

    Ok(base_dir.join("parqview"))
}

pub fn default_settings_path() -> Result<PathBuf, SettingsError> {
    Ok(default_config_dir()?.join("settings.toml"))
}
