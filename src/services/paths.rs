use std::path::PathBuf;
use std::sync::OnceLock;

static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

const SAVEDATA_DIR_NAME: &str = "savedata";
const DATA_DIR_ENV: &str = "PWLLAMA_DATA_DIR";

fn exe_dir() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    exe.parent().map(|p| p.to_path_buf())
}

fn resolve_data_dir() -> Result<PathBuf, String> {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    exe_dir()
        .map(|dir| dir.join(SAVEDATA_DIR_NAME))
        .ok_or_else(|| "Failed to resolve executable directory".to_string())
}

/// Resolve and create the application's data directory.
///
/// `PWLLAMA_DATA_DIR` wins; otherwise `<exe_dir>/savedata`.
pub fn data_dir() -> Result<PathBuf, String> {
    if let Some(dir) = DATA_DIR.get() {
        return Ok(dir.clone());
    }

    let dir = resolve_data_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| format!("Failed to create data directory: {e}"))?;
    let _ = DATA_DIR.set(dir.clone());
    Ok(dir)
}
