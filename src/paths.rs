use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub fn database_file_path(flag: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = resolve_override(flag, env::var_os("PODVOICE_DB")) {
        return Ok(path);
    }
    let base = dirs::data_dir().context("unable to resolve data directory")?;
    Ok(base.join("podvoice").join("catalog.db"))
}

pub fn config_file_path(flag: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = resolve_override(flag, env::var_os("PODVOICE_CONFIG")) {
        return Ok(path);
    }
    let base = dirs::config_dir().context("unable to resolve config directory")?;
    Ok(base.join("podvoice").join("config.json"))
}

fn resolve_override(flag: Option<&Path>, env_value: Option<OsString>) -> Option<PathBuf> {
    if let Some(path) = flag {
        return Some(path.to_path_buf());
    }
    match env_value {
        Some(value) if !value.is_empty() => Some(PathBuf::from(value)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_wins_over_environment() {
        let resolved = resolve_override(
            Some(Path::new("/tmp/flag.db")),
            Some(OsString::from("/tmp/env.db")),
        );
        assert_eq!(resolved, Some(PathBuf::from("/tmp/flag.db")));
    }

    #[test]
    fn empty_environment_value_is_ignored() {
        assert_eq!(resolve_override(None, Some(OsString::new())), None);
        assert_eq!(
            resolve_override(None, Some(OsString::from("/tmp/env.db"))),
            Some(PathBuf::from("/tmp/env.db"))
        );
    }
}
