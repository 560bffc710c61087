use std::{fs::read_to_string, path::{Path, PathBuf}, time::Duration};

use anyhow::{Context, Result};
use colored::Colorize;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::engine::EngineSettings;

/// Global configuration values
///
/// Restclock's configuration is stored in a TOML file in the current user's
/// config directory, which is `~/.config/restclock/config.toml` by default.
///
/// A config can be loaded from a file with [`Config::load`].
/// You can also use [`Config::init`] to create a default config file if one
/// does not exist at the given path.
///
/// To save a config to the filesystem, use [`Config::save`].
///
/// ## File Format
///
/// The configuration file is written as a TOML file.
/// See the documentation for each field to learn how they are serialized.
#[derive(Debug, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Directory to find hook executables
    ///
    /// Default is a directory called `hooks` inside the config directory.
    /// Serialized as an absolute path.
    #[serde(default = "default_hooks_directory")]
    pub hooks_directory: PathBuf,
    /// File holding the records of running timers
    ///
    /// Default location is the user's state directory,
    /// which is usually `~/.local/state/restclock/timers.json`.
    /// Serialized as an absolute path.
    #[serde(default = "default_store_path")]
    pub store_file_path: PathBuf,
    /// Default duration for workout timers
    ///
    /// Default is 45 minutes (2700 seconds).
    /// Serialized as an integer count of seconds.
    #[serde(default = "default_workout_duration", with = "crate::time::duration::seconds")]
    pub workout_duration: Duration,
    /// Default duration for rests between sets
    ///
    /// Default is 90 seconds.
    /// Serialized as an integer count of seconds.
    #[serde(default = "default_set_rest_duration", with = "crate::time::duration::seconds")]
    pub set_rest_duration: Duration,
    /// Default duration for rests between exercises
    ///
    /// Default is 3 minutes (180 seconds).
    /// Serialized as an integer count of seconds.
    #[serde(default = "default_exercise_rest_duration", with = "crate::time::duration::seconds")]
    pub exercise_rest_duration: Duration,
    /// How long before a timer ends to schedule a desktop notification
    ///
    /// Default is 5 seconds; 0 turns notifications off.
    /// Serialized as an integer count of seconds.
    #[serde(default = "default_warn_before", with = "crate::time::duration::seconds")]
    pub warn_before: Duration,
    /// Whether alerts are shown on the desktop or only written to the log
    ///
    /// Desktop alerts are scheduled with `systemd-run` and shown with `notify-send`.
    /// Default is true.
    #[serde(default = "default_desktop_notifications")]
    pub desktop_notifications: bool,
    /// Age after which an abandoned timer record is thrown away instead of recovered
    ///
    /// Default is 24 hours (86400 seconds).
    /// Serialized as an integer count of seconds.
    #[serde(default = "default_stale_after", with = "crate::time::duration::seconds")]
    pub stale_after: Duration,
}

impl Config {
    /// Returns the current config, creating a default config file if one does not exist
    pub fn init(config_path: &Path) -> Result<Self> {
        if let Some(conf) = Config::load(config_path)? {
            Ok(conf)
        } else {
            let conf = Config::default();

            println!(
                "Creating config file at {}",
                config_path.display().to_string().cyan()
            );

            conf.save(config_path)?;

            Ok(conf)
        }
    }

    /// Reads a TOML config file
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if path.exists() {
            let config_str = read_to_string(path)?;

            toml::from_str(&config_str).with_context(|| "Failed to parse config from TOML")
        } else {
            Ok(None)
        }
    }

    /// Write this config file to the filesystem
    pub fn save(&self, path: &Path) -> Result<()> {
        let toml = toml::to_string(&self)
            .with_context(|| "Unable to format config as TOML")?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, toml)
            .with_context(|| format!("Unable to write config TOML to path {}", path.display()))
    }

    /// Engine settings derived from this config
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            warn_before: self.warn_before,
        }
    }

    /// Default duration for a timer of the given category, if it is a known one
    pub fn default_duration(&self, category: &str) -> Option<Duration> {
        match category {
            crate::session::WORKOUT => Some(self.workout_duration),
            crate::session::SET_REST => Some(self.set_rest_duration),
            crate::session::EXERCISE_REST => Some(self.exercise_rest_duration),
            _ => None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hooks_directory: default_hooks_directory(),
            store_file_path: default_store_path(),
            workout_duration: default_workout_duration(),
            set_rest_duration: default_set_rest_duration(),
            exercise_rest_duration: default_exercise_rest_duration(),
            warn_before: default_warn_before(),
            desktop_notifications: default_desktop_notifications(),
            stale_after: default_stale_after(),
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "Restclock", "Restclock")
}

/// Get the default location of the config file
pub fn default_config_path() -> Result<PathBuf> {
    let conf_path = project_dirs()
        .with_context(|| "Unable to determine XDG directories")?
        .config_dir()
        .join("config.toml");

    Ok(conf_path)
}

fn default_hooks_directory() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.config_dir().join("hooks"))
        .unwrap_or_else(|| PathBuf::from("hooks"))
}

fn default_store_path() -> PathBuf {
    project_dirs()
        .map(|dirs| {
            dirs.state_dir()
                .unwrap_or_else(|| dirs.data_local_dir())
                .join("timers.json")
        })
        .unwrap_or_else(|| PathBuf::from("timers.json"))
}

fn default_workout_duration() -> Duration {
    Duration::from_secs(45 * 60)
}

fn default_set_rest_duration() -> Duration {
    Duration::from_secs(90)
}

fn default_exercise_rest_duration() -> Duration {
    Duration::from_secs(3 * 60)
}

fn default_warn_before() -> Duration {
    Duration::from_secs(5)
}

fn default_desktop_notifications() -> bool {
    true
}

fn default_stale_after() -> Duration {
    crate::store::DEFAULT_MAX_AGE
}
