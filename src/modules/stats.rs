use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::modules::config::data_dir;
use crate::modules::ledger::{EncodedAction, Identity, normalize_identity};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionStats {
    pub reinforce_count: u64,
    pub transfer_count: u64,
    pub engage_count: u64,
    pub approve_count: u64,
    pub rejected_batches: u64,
}

impl ActionStats {
    pub fn record(&mut self, action: &EncodedAction) {
        match action {
            EncodedAction::Reinforce { .. } => {
                self.reinforce_count = self.reinforce_count.saturating_add(1)
            }
            EncodedAction::Transfer { .. } => {
                self.transfer_count = self.transfer_count.saturating_add(1)
            }
            EncodedAction::Engage { .. } => self.engage_count = self.engage_count.saturating_add(1),
            EncodedAction::Approve { .. } => {
                self.approve_count = self.approve_count.saturating_add(1)
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionStatsStore {
    pub per_identity: HashMap<Identity, ActionStats>,
}

pub fn stats_path_in(dir: &Path) -> PathBuf {
    dir.join("action_stats.json")
}

pub fn load_action_stats_in(dir: &Path) -> io::Result<ActionStatsStore> {
    let path = stats_path_in(dir);
    if !path.exists() {
        return Ok(ActionStatsStore::default());
    }

    let bytes = fs::read(&path)?;
    if bytes.is_empty() {
        return Ok(ActionStatsStore::default());
    }

    let store: ActionStatsStore = serde_json::from_slice(&bytes)?;
    Ok(store)
}

pub fn save_action_stats_in(dir: &Path, store: &ActionStatsStore) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    let json = serde_json::to_vec_pretty(store)?;
    fs::write(stats_path_in(dir), json)?;
    Ok(())
}

pub fn load_action_stats() -> io::Result<ActionStatsStore> {
    load_action_stats_in(&data_dir())
}

pub fn reset_action_stats_in(dir: &Path) -> io::Result<()> {
    save_action_stats_in(dir, &ActionStatsStore::default())
}

pub fn record_confirmed_actions<'a>(
    store: &mut ActionStatsStore,
    identity: &str,
    actions: impl Iterator<Item = &'a EncodedAction>,
) {
    let stats = store
        .per_identity
        .entry(normalize_identity(identity))
        .or_default();
    for action in actions {
        stats.record(action);
    }
}

pub fn record_rejected_batch(store: &mut ActionStatsStore, identity: &str) {
    let stats = store
        .per_identity
        .entry(normalize_identity(identity))
        .or_default();
    stats.rejected_batches = stats.rejected_batches.saturating_add(1);
}
