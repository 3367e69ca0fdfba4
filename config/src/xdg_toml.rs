//! Load the `[env]` table from `<config-dir>/<app>/config.toml`.
//!
//! The per-user config directory is resolved through the `dirs` crate
//! (`$XDG_CONFIG_HOME`/`~/.config` on Linux, the platform-native location
//! elsewhere).

use std::collections::HashMap;
use std::path::PathBuf;

use crate::LoadError;

fn config_file_path(app_name: &str) -> Option<PathBuf> {
    let path = dirs::config_dir()?.join(app_name).join("config.toml");
    path.exists().then_some(path)
}

#[derive(serde::Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    env: HashMap<String, String>,
}

/// Returns env pairs from the `[env]` section. Missing file or section is empty.
pub fn load_env_map(app_name: &str) -> Result<HashMap<String, String>, LoadError> {
    let path = match config_file_path(app_name) {
        Some(p) => p,
        None => return Ok(HashMap::new()),
    };
    let content = std::fs::read_to_string(&path).map_err(LoadError::XdgRead)?;
    let config: ConfigFile = toml::from_str(&content)?;
    Ok(config.env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn with_xdg_home<R>(dir: &std::path::Path, f: impl FnOnce() -> R) -> R {
        let prev = env::var("XDG_CONFIG_HOME").ok();
        env::set_var("XDG_CONFIG_HOME", dir);
        let out = f();
        match prev {
            Some(p) => env::set_var("XDG_CONFIG_HOME", p),
            None => env::remove_var("XDG_CONFIG_HOME"),
        }
        out
    }

    /// **Scenario**: No config file means an empty map, not an error.
    #[test]
    fn missing_config_returns_empty_map() {
        let map = load_env_map("colloquy-test-nonexistent-98765").unwrap();
        assert!(map.is_empty());
    }

    /// **Scenario**: `[env]` pairs are read from the app's config.toml.
    #[test]
    fn reads_env_table() {
        let dir = tempfile::tempdir().unwrap();
        let app_dir = dir.path().join("appx");
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(
            app_dir.join("config.toml"),
            "[env]\nCEREBRAS_API_KEY = \"csk-1\"\n",
        )
        .unwrap();

        let map = with_xdg_home(dir.path(), || load_env_map("appx")).unwrap();
        assert_eq!(map.get("CEREBRAS_API_KEY").map(String::as_str), Some("csk-1"));
    }

    /// **Scenario**: A config.toml without `[env]` yields an empty map.
    #[test]
    fn config_without_env_section_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let app_dir = dir.path().join("noenv");
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(app_dir.join("config.toml"), "[other]\nk = \"v\"\n").unwrap();

        let map = with_xdg_home(dir.path(), || load_env_map("noenv")).unwrap();
        assert!(map.is_empty());
    }

    /// **Scenario**: Broken TOML is reported as a parse error.
    #[test]
    fn invalid_toml_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let app_dir = dir.path().join("bad");
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(app_dir.join("config.toml"), "nope [[[\n").unwrap();

        let result = with_xdg_home(dir.path(), || load_env_map("bad"));
        assert!(matches!(result, Err(LoadError::XdgParse(_))));
    }
}
