// src/config/loader.rs

use std::path::{Path, PathBuf};

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;
use crate::fs::{FileSystem, RealFileSystem};

/// Load a configuration file from a given path and return the raw `RawConfigFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation (graph correctness, etc.). Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    load_raw(&RealFileSystem, path.as_ref())
}

fn load_raw(fs: &dyn FileSystem, path: &Path) -> Result<RawConfigFile> {
    let contents = fs.read_to_string(path)?;
    let config: RawConfigFile = toml::from_str(&contents)?;
    Ok(config)
}

/// Load a configuration file from path and run validation.
///
/// This is the recommended entry point for the rest of the application:
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks for:
///   - unknown `after` / `flow` / `skip_satisfied` references,
///   - cycles,
///   - fields required by each task kind.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    load_with_fs(&RealFileSystem, path)
}

/// Same as [`load_and_validate`], reading through `fs`.
pub fn load_with_fs(fs: &dyn FileSystem, path: impl AsRef<Path>) -> Result<ConfigFile> {
    let raw_config = load_raw(fs, path.as_ref())?;
    let config = ConfigFile::try_from(raw_config)?;
    Ok(config)
}

/// Default config path: `Pipedag.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Pipedag.toml")
}
