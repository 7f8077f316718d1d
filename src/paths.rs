use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};

pub const DB_PATH_ENV: &str = "PLPROG_DB_PATH";

pub fn database_file_path() -> Result<PathBuf> {
    resolve_database_path(env::var_os(DB_PATH_ENV).map(PathBuf::from))
}

fn resolve_database_path(overridden: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = overridden.filter(|path| !path.as_os_str().is_empty()) {
        return Ok(path);
    }
    let base = dirs::data_dir().context("unable to resolve data directory")?;
    Ok(base.join("playlist-progress").join("progress.db"))
}
