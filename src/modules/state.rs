use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::modules::config::data_dir;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Status {
    Initialized,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeState {
    pub status: Status,
    pub cycle: u64,
    pub strategy: Option<String>,
    pub message: Option<String>,
    /// RFC 3339 time of the last write.
    pub updated_at: Option<String>,
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self {
            status: Status::Initialized,
            cycle: 0,
            strategy: None,
            message: None,
            updated_at: None,
        }
    }
}

pub fn state_path_in(dir: &Path) -> PathBuf {
    dir.join("state.json")
}

pub fn state_file_path() -> PathBuf {
    state_path_in(&data_dir())
}

pub fn init_state_in(dir: &Path) -> io::Result<RuntimeState> {
    let state = RuntimeState::default();
    save_state_in(dir, &state)?;
    Ok(state)
}

pub fn load_state_in(dir: &Path) -> io::Result<Option<RuntimeState>> {
    let path = state_path_in(dir);
    if !path.exists() {
        return Ok(None);
    }

    let bytes = fs::read(&path)?;
    if bytes.is_empty() {
        return Ok(None);
    }

    let state: RuntimeState = serde_json::from_slice(&bytes).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "failed to parse state file {}; delete it or run `killbot init` to reset: {}",
                path.display(),
                e
            ),
        )
    })?;
    Ok(Some(state))
}

pub fn save_state_in(dir: &Path, state: &RuntimeState) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    let mut stamped = state.clone();
    stamped.updated_at = Some(Utc::now().to_rfc3339());
    let json = serde_json::to_vec_pretty(&stamped)?;
    fs::write(state_path_in(dir), json)?;
    Ok(())
}

pub fn set_status_in(
    dir: &Path,
    status: Status,
    cycle: u64,
    message: Option<String>,
) -> io::Result<RuntimeState> {
    let mut state = load_state_in(dir)?.unwrap_or_default();
    state.status = status;
    state.cycle = cycle;
    state.message = message;
    save_state_in(dir, &state)?;
    Ok(state)
}

pub fn load_state() -> io::Result<Option<RuntimeState>> {
    load_state_in(&data_dir())
}

pub fn set_status(status: Status, cycle: u64, message: Option<String>) -> io::Result<RuntimeState> {
    set_status_in(&data_dir(), status, cycle, message)
}
