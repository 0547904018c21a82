//! TOML config file load/save, file-lock-guarded: a shared lock for reads
//! so concurrent readers don't block each other, an exclusive lock plus an
//! atomic tmp-then-rename write so a crash mid-write can't corrupt the
//! file. Defaults to `~/.sandrun/config.toml`.

use super::{ConfigBuilder, ConfigFile};
use crate::errors::ExecError;
use fs2::FileExt;
use std::fs;
use std::path::{Path, PathBuf};

pub fn default_config_path() -> Result<PathBuf, ExecError> {
    if let Some(home) = std::env::var_os("SANDRUN_HOME") {
        return Ok(PathBuf::from(home).join("config.toml"));
    }
    let home = dirs::home_dir()
        .ok_or_else(|| ExecError::invalid("could not determine home directory"))?;
    Ok(home.join(".sandrun").join("config.toml"))
}

/// Load config from `path` (or the default path), falling back to built-in
/// defaults when the file doesn't exist. Acquires a shared lock for the
/// duration of the read so a concurrent writer can't interleave a partial
/// write.
pub fn load_config(path: Option<&Path>) -> Result<ConfigBuilder, ExecError> {
    let default_path = default_config_path()?;
    let path = path.unwrap_or(&default_path);

    if !path.exists() {
        return Ok(ConfigFile::default().into_builder());
    }

    let file = fs::File::open(path).map_err(ExecError::Io)?;
    file.lock_shared()
        .map_err(|e| ExecError::invalid(format!("failed to lock config file: {e}")))?;
    let content = fs::read_to_string(path).map_err(ExecError::Io)?;
    drop(file); // lock released

    let parsed: ConfigFile = toml::from_str(&content)
        .map_err(|e| ExecError::invalid(format!("invalid config at {}: {e}", path.display())))?;
    Ok(parsed.into_builder())
}

/// Persist `config` to `path` (or the default path), via a sibling
/// `.lock` file so an exclusive lock survives the atomic rename used by
/// the write (flock is tied to the inode, which `rename` would otherwise
/// invalidate mid-write).
pub fn save_config(config: &ConfigFile, path: Option<&Path>) -> Result<(), ExecError> {
    let default_path = default_config_path()?;
    let path = path.unwrap_or(&default_path);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(ExecError::Io)?;
    }

    let lock_path = path.with_extension("toml.lock");
    let lock_file = fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&lock_path)
        .map_err(ExecError::Io)?;
    lock_file
        .lock_exclusive()
        .map_err(|e| ExecError::invalid(format!("failed to lock config file: {e}")))?;

    let serialized = toml::to_string_pretty(config)
        .map_err(|e| ExecError::invalid(format!("failed to serialize config: {e}")))?;

    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, serialized).map_err(ExecError::Io)?;
    fs::rename(&tmp_path, path).map_err(ExecError::Io)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_file_falls_back_to_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("does-not-exist.toml");
        let builder = load_config(Some(&path)).unwrap();
        let config = builder.build().unwrap();
        assert_eq!(config.max_sessions, 0);
    }

    #[test]
    fn save_then_load_round_trips() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        let mut file = ConfigFile::default();
        file.max_sessions = 7;
        file.session_ttl_secs = 120;
        save_config(&file, Some(&path)).unwrap();

        let loaded = load_config(Some(&path))
            .unwrap()
            .allowed_root(tmp.path())
            .build()
            .unwrap();
        assert_eq!(loaded.max_sessions, 7);
        assert_eq!(loaded.session_ttl, std::time::Duration::from_secs(120));
    }
}
