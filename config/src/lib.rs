//! Engine configuration loading.
//!
//! Two file sources feed the process environment: a project `.env` and the
//! per-user `config.toml` under the platform config directory. A variable
//! already present in the environment is never touched, and `.env` shadows
//! the TOML file — deployments pin values in the real environment, while a
//! developer keeps personal defaults in `~/.config/<app>/config.toml` and
//! per-checkout overrides in `.env`.
//!
//! After [`load_and_apply`], read the engine's recognized variables through
//! [`EngineEnv`] instead of scattering `std::env::var` calls.

mod dotenv;
mod engine_env;
mod xdg_toml;

use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

pub use engine_env::EngineEnv;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("read xdg config: {0}")]
    XdgRead(std::io::Error),
    #[error("parse xdg toml: {0}")]
    XdgParse(#[from] toml::de::Error),
    #[error("read .env: {0}")]
    DotenvRead(std::io::Error),
    #[error("missing configuration: {0}")]
    Missing(String),
}

/// Applies file-based configuration to the process environment and returns
/// how many variables were actually exported.
///
/// The file layers are merged lowest-precedence first — the TOML `[env]`
/// table, then `.env` from `override_dir` (or the current directory) on top —
/// and a merged key is only exported when the process environment does not
/// already define it. Missing files contribute nothing; a malformed TOML or
/// an unreadable `.env` is an error.
pub fn load_and_apply(app_name: &str, override_dir: Option<&Path>) -> Result<usize, LoadError> {
    let mut merged: HashMap<String, String> = xdg_toml::load_env_map(app_name)?;
    for (key, value) in dotenv::load_env_map(override_dir).map_err(LoadError::DotenvRead)? {
        merged.insert(key, value); // .env shadows the TOML table
    }

    let mut exported = 0;
    for (key, value) in merged {
        if std::env::var_os(&key).is_none() {
            std::env::set_var(&key, value);
            exported += 1;
        }
    }
    Ok(exported)
}
