//! Central path resolution for agent-avatar data files.
//!
//! Resolved once at startup from: CLI `--data-dir` > `AGENT_AVATAR_DATA_DIR` env > `~/.agent-avatar`.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

static DATA_DIR: RwLock<Option<PathBuf>> = RwLock::new(None);

/// File name of the per-project override, looked up in the working directory.
pub const PROJECT_CONFIG_FILE: &str = ".agent-avatar.toml";

/// Initialize the global data directory. Returns the resolved path.
///
/// Priority: `explicit` arg > `AGENT_AVATAR_DATA_DIR` env > `~/.agent-avatar` default.
pub fn init_data_dir(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    let dir = if let Some(p) = explicit {
        p.to_path_buf()
    } else if let Ok(env_val) = std::env::var("AGENT_AVATAR_DATA_DIR") {
        PathBuf::from(env_val)
    } else {
        dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("HOME directory not found"))?
            .join(".agent-avatar")
    };

    let mut guard = DATA_DIR.write().unwrap_or_else(|e| e.into_inner());
    *guard = Some(dir.clone());
    Ok(dir)
}

/// Return the current data directory, falling back to `~/.agent-avatar`
/// (or `./.agent-avatar` without a home) when `init_data_dir` hasn't run.
pub fn data_dir() -> PathBuf {
    let guard = DATA_DIR.read().unwrap_or_else(|e| e.into_inner());
    guard.clone().unwrap_or_else(|| {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".agent-avatar")
    })
}

pub fn global_config_path() -> PathBuf {
    data_dir().join("config.toml")
}

pub fn avatars_dir() -> PathBuf {
    data_dir().join("avatars")
}

pub fn log_dir() -> PathBuf {
    data_dir().join("logs")
}

pub fn pid_file_path() -> PathBuf {
    data_dir().join("agent-avatar.pid")
}

pub fn project_config_path() -> Option<PathBuf> {
    std::env::current_dir()
        .ok()
        .map(|cwd| cwd.join(PROJECT_CONFIG_FILE))
}

/// Create all required subdirectories under the data dir.
pub fn ensure_dirs() -> io::Result<()> {
    let base = data_dir();
    std::fs::create_dir_all(&base)?;
    std::fs::create_dir_all(base.join("logs"))?;
    std::fs::create_dir_all(base.join("avatars"))?;
    Ok(())
}
