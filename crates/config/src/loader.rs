use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::CourierConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "courier.toml",
    "courier.yaml",
    "courier.yml",
    "courier.json",
];

/// Fallback data directory when no platform directory can be resolved.
const LOCAL_DATA_DIR: &str = ".courier_cache";

static CONFIG_DIR_OVERRIDE: Mutex<Option<PathBuf>> = Mutex::new(None);
static DATA_DIR_OVERRIDE: Mutex<Option<PathBuf>> = Mutex::new(None);

/// Override the config directory for this process.
pub fn set_config_dir(dir: PathBuf) {
    let mut guard = CONFIG_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(|e| e.into_inner());
    *guard = Some(dir);
}

/// Override the data directory for this process.
pub fn set_data_dir(dir: PathBuf) {
    let mut guard = DATA_DIR_OVERRIDE.lock().unwrap_or_else(|e| e.into_inner());
    *guard = Some(dir);
}

/// Returns the config directory (`~/.config/courier/` unless overridden).
pub fn config_dir() -> Option<PathBuf> {
    if let Some(dir) = CONFIG_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .clone()
    {
        return Some(dir);
    }
    directories::ProjectDirs::from("", "", "courier").map(|d| d.config_dir().to_path_buf())
}

/// Returns the data directory. Falls back to `./.courier_cache`.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = DATA_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .clone()
    {
        return dir;
    }
    directories::ProjectDirs::from("", "", "courier")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(LOCAL_DATA_DIR))
}

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<CourierConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./courier.{toml,yaml,yml,json}` (project-local)
/// 2. `<config dir>/courier.{toml,yaml,yml,json}` (user-global)
///
/// Returns `CourierConfig::default()` if no config file is found or the file
/// fails to parse.
pub fn discover_and_load() -> CourierConfig {
    let mut config = if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                CourierConfig::default()
            },
        }
    } else {
        debug!("no config file found, using defaults");
        CourierConfig::default()
    };
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    config
}

/// Apply well-known environment variables on top of a loaded config.
///
/// `PORT` is honoured for compatibility with process managers that inject it.
pub fn apply_env_overrides(config: &mut CourierConfig, lookup: impl Fn(&str) -> Option<String>) {
    for name in ["COURIER_PORT", "PORT"] {
        if let Some(raw) = lookup(name) {
            match raw.trim().parse::<u16>() {
                Ok(port) => {
                    config.server.port = port;
                    break;
                },
                Err(e) => warn!(var = name, value = %raw, error = %e, "ignoring invalid port"),
            }
        }
    }
    if let Some(bind) = lookup("COURIER_BIND").filter(|b| !b.trim().is_empty()) {
        config.server.bind = bind;
    }
    if let Some(path) = lookup("COURIER_FFMPEG").filter(|p| !p.trim().is_empty()) {
        config.transcode.ffmpeg_path = Some(path);
    }
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<CourierConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_each_format() {
        let dir = tempfile::tempdir().unwrap();

        let toml_path = dir.path().join("courier.toml");
        std::fs::write(&toml_path, "[server]\nport = 4000\n").unwrap();
        assert_eq!(load_config(&toml_path).unwrap().server.port, 4000);

        let yaml_path = dir.path().join("courier.yaml");
        std::fs::write(&yaml_path, "server:\n  port: 4001\n").unwrap();
        assert_eq!(load_config(&yaml_path).unwrap().server.port, 4001);

        let json_path = dir.path().join("courier.json");
        std::fs::write(&json_path, r#"{"server":{"port":4002}}"#).unwrap();
        assert_eq!(load_config(&json_path).unwrap().server.port, 4002);
    }

    #[test]
    fn rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("courier.ini");
        std::fs::write(&path, "port=1").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn port_env_override() {
        let mut cfg = CourierConfig::default();
        apply_env_overrides(&mut cfg, |name| match name {
            "PORT" => Some("8081".into()),
            _ => None,
        });
        assert_eq!(cfg.server.port, 8081);
    }

    #[test]
    fn courier_port_beats_port() {
        let mut cfg = CourierConfig::default();
        apply_env_overrides(&mut cfg, |name| match name {
            "COURIER_PORT" => Some("9000".into()),
            "PORT" => Some("8081".into()),
            _ => None,
        });
        assert_eq!(cfg.server.port, 9000);
    }

    #[test]
    fn invalid_port_is_ignored() {
        let mut cfg = CourierConfig::default();
        apply_env_overrides(&mut cfg, |name| match name {
            "PORT" => Some("not-a-port".into()),
            _ => None,
        });
        assert_eq!(cfg.server.port, 3000);
    }
}
