use log::{LevelFilter, debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, RwLock};
use std::time::Duration;

use crate::cache::{Budget, PagePart, Resolution};

pub const CURRENT_VERSION: u32 = 1;
const SETTINGS_FILENAME: &str = "config.yaml";
const APP_NAME: &str = "slidecache";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: u32,

    /// Bytes of compressed pages across all caches, `<= 0` for no limit
    #[serde(default = "default_max_cache_size")]
    pub max_cache_size: i64,

    /// Pages per cache, negative for all pages
    #[serde(default = "default_max_cache_count")]
    pub max_cache_count: i64,

    /// How long to wait for a render worker to stop before abandoning it
    #[serde(default = "default_worker_stop_timeout_ms")]
    pub worker_stop_timeout_ms: u64,

    #[serde(default = "default_dpi")]
    pub default_dpi: f32,

    #[serde(default)]
    pub page_part: PagePart,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

fn default_max_cache_size() -> i64 {
    100 << 20
}

fn default_max_cache_count() -> i64 {
    -1
}

fn default_worker_stop_timeout_ms() -> u64 {
    10_000
}

fn default_dpi() -> f32 {
    96.0
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            max_cache_size: default_max_cache_size(),
            max_cache_count: default_max_cache_count(),
            worker_stop_timeout_ms: default_worker_stop_timeout_ms(),
            default_dpi: default_dpi(),
            page_part: PagePart::default(),
            log_level: default_log_level(),
        }
    }
}

static SETTINGS: LazyLock<RwLock<Settings>> = LazyLock::new(|| RwLock::new(Settings::default()));

pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join(APP_NAME).join(SETTINGS_FILENAME))
}

pub fn load_settings() {
    let Some(path) = config_path() else {
        warn!("Could not determine config directory, using default settings");
        return;
    };
    if path.exists() {
        load_settings_from_path(&path);
    } else {
        info!("Settings file not found, creating with defaults at {path:?}");
        if let Ok(settings) = SETTINGS.read() {
            save_settings_to_file(&settings, &path);
        }
    }
}

pub fn load_settings_from_path(path: &Path) {
    match fs::read_to_string(path) {
        Ok(content) => match serde_yaml::from_str::<Settings>(&content) {
            Ok(mut settings) => {
                debug!("Loaded settings from {path:?}");

                if settings.version < CURRENT_VERSION {
                    migrate_settings(&mut settings);
                    save_settings_to_file(&settings, path);
                }

                if let Ok(mut global) = SETTINGS.write() {
                    *global = settings;
                }
            }
            Err(e) => {
                error!("Failed to parse settings file {path:?}: {e}");
            }
        },
        Err(e) => {
            error!("Failed to read settings file {path:?}: {e}");
        }
    }
}

fn migrate_settings(settings: &mut Settings) {
    info!(
        "Migrating settings from v{} to v{}",
        settings.version, CURRENT_VERSION
    );

    settings.version = CURRENT_VERSION;
}

pub fn save_settings_to_file(settings: &Settings, path: &Path) {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            if let Err(e) = fs::create_dir_all(parent) {
                error!("Failed to create config directory {parent:?}: {e}");
                return;
            }
        }
    }

    let content = match serde_yaml::to_string(settings) {
        Ok(yaml) => format!("{SETTINGS_HEADER}{yaml}"),
        Err(e) => {
            error!("Failed to serialize settings: {e}");
            return;
        }
    };

    match fs::write(path, content) {
        Ok(()) => debug!("Saved settings to {path:?}"),
        Err(e) => error!("Failed to save settings to {path:?}: {e}"),
    }
}

const SETTINGS_HEADER: &str = r#"# ============================================================================
# slidecache
# ============================================================================
# max_cache_size:  bytes of compressed pages kept in memory, 0 disables
#                  caching, negative means no limit
# max_cache_count: pages kept per cache, 0 disables caching, negative means
#                  all pages
# page_part:       full | left_half | right_half

"#;

// Public API for accessing/modifying settings

pub fn get_settings() -> Settings {
    SETTINGS.read().map(|s| s.clone()).unwrap_or_default()
}

pub fn get_cache_budget() -> Budget {
    SETTINGS
        .read()
        .map(|s| Budget::new(s.max_cache_size, s.max_cache_count))
        .unwrap_or_else(|_| Budget::new(default_max_cache_size(), default_max_cache_count()))
}

pub fn get_worker_stop_timeout() -> Duration {
    let millis = SETTINGS
        .read()
        .map(|s| s.worker_stop_timeout_ms)
        .unwrap_or_else(|_| default_worker_stop_timeout_ms());
    Duration::from_millis(millis)
}

pub fn get_default_resolution() -> Resolution {
    let dpi = SETTINGS
        .read()
        .map(|s| s.default_dpi)
        .unwrap_or_else(|_| default_dpi());
    Resolution::from_dpi(dpi)
}

pub fn get_page_part() -> PagePart {
    SETTINGS.read().map(|s| s.page_part).unwrap_or_default()
}

pub fn get_log_level() -> LevelFilter {
    let level = SETTINGS
        .read()
        .map(|s| s.log_level.clone())
        .unwrap_or_else(|_| default_log_level());
    level.parse().unwrap_or_else(|_| {
        warn!("Unknown log level {level:?}, using info");
        LevelFilter::Info
    })
}

#[cfg(test)]
pub(crate) fn replace_settings(settings: Settings) {
    if let Ok(mut global) = SETTINGS.write() {
        *global = settings;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn missing_fields_take_defaults() {
        let settings: Settings = serde_yaml::from_str("max_cache_count: 12\n").unwrap();
        assert_eq!(settings.max_cache_count, 12);
        assert_eq!(settings.max_cache_size, default_max_cache_size());
        assert_eq!(settings.worker_stop_timeout_ms, 10_000);
        assert_eq!(settings.page_part, PagePart::Full);
        assert_eq!(settings.version, CURRENT_VERSION);
    }

    #[test]
    fn page_part_uses_snake_case() {
        let settings: Settings = serde_yaml::from_str("page_part: right_half\n").unwrap();
        assert_eq!(settings.page_part, PagePart::RightHalf);
    }

    #[test]
    #[serial]
    fn saved_file_loads_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(SETTINGS_FILENAME);
        let settings = Settings {
            max_cache_size: 1 << 20,
            max_cache_count: 8,
            worker_stop_timeout_ms: 250,
            page_part: PagePart::LeftHalf,
            ..Settings::default()
        };

        save_settings_to_file(&settings, &path);
        assert!(path.exists());

        replace_settings(Settings::default());
        load_settings_from_path(&path);
        assert_eq!(get_settings(), settings);
        assert_eq!(get_cache_budget(), Budget::new(1 << 20, 8));
        assert_eq!(get_worker_stop_timeout(), Duration::from_millis(250));
        assert_eq!(get_page_part(), PagePart::LeftHalf);

        replace_settings(Settings::default());
    }

    #[test]
    #[serial]
    fn unversioned_file_is_migrated_and_rewritten() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SETTINGS_FILENAME);
        fs::write(&path, "version: 0\nmax_cache_count: 5\nlog_level: debug\n").unwrap();

        load_settings_from_path(&path);
        let loaded = get_settings();
        assert_eq!(loaded.version, CURRENT_VERSION);
        assert_eq!(loaded.max_cache_count, 5);
        assert_eq!(get_log_level(), LevelFilter::Debug);

        let rewritten = fs::read_to_string(&path).unwrap();
        assert!(rewritten.starts_with("# ===="));
        assert!(rewritten.contains(&format!("version: {CURRENT_VERSION}")));

        replace_settings(Settings::default());
    }

    #[test]
    #[serial]
    fn broken_file_keeps_current_settings() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SETTINGS_FILENAME);
        fs::write(&path, "max_cache_size: [not, a, number]\n").unwrap();

        replace_settings(Settings::default());
        load_settings_from_path(&path);
        assert_eq!(get_settings(), Settings::default());
    }
}
