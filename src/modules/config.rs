use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::modules::economy::{EconomyParams, Multiplier, Power, Units};
use crate::modules::error::ConfigError;
use crate::modules::grid::{CubeId, DEFAULT_SIDE, Grid};
use crate::modules::strategy::StrategyKind;

/// Local working directory for config, runtime state and counters.
pub const DATA_DIR: &str = ".killbot";

pub fn data_dir() -> PathBuf {
    PathBuf::from(DATA_DIR)
}

pub fn config_path_in(dir: &Path) -> PathBuf {
    dir.join("config.json")
}

pub fn default_config_path() -> PathBuf {
    config_path_in(&data_dir())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub identity: String,
    pub network: NetworkConfig,
    pub grid: GridConfig,
    pub economy: EconomyParams,
    pub strategy: StrategyConfig,
    pub runner: RunnerConfig,
    pub batch: BatchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// JSON-RPC signing gateway.
    pub gateway_url: String,
    /// GraphQL event indexer; required only by event-driven strategies.
    pub subgraph_url: Option<String>,
    pub timeout_ms: u64,
    /// Max cube ids per internal read request.
    pub read_chunk: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            gateway_url: "http://127.0.0.1:8787".into(),
            subgraph_url: None,
            timeout_ms: 15_000,
            read_chunk: 216,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub side: u16,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self { side: DEFAULT_SIDE }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub kind: StrategyKind,
    /// Never attack a stack whose effective power exceeds this.
    pub power_ceiling: Power,
    pub sniper: SniperConfig,
    pub predator: PredatorConfig,
    pub fortress: FortressConfig,
    pub aftershock: AftershockConfig,
    pub seeder: SeederConfig,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            kind: StrategyKind::Sniper,
            power_ceiling: 5_000_000,
            sniper: SniperConfig::default(),
            predator: PredatorConfig::default(),
            fortress: FortressConfig::default(),
            aftershock: AftershockConfig::default(),
            seeder: SeederConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SniperConfig {
    pub safety_multiplier: Multiplier,
    pub min_force: Units,
    /// Minimum ROI in basis points (2000 = +20%).
    pub roi_threshold_bps: i64,
}

impl Default for SniperConfig {
    fn default() -> Self {
        Self {
            safety_multiplier: Multiplier::whole(3),
            min_force: 1_000,
            roi_threshold_bps: 2_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PredatorConfig {
    pub safety_multiplier: Multiplier,
    pub min_force: Units,
}

impl Default for PredatorConfig {
    fn default() -> Self {
        Self {
            safety_multiplier: Multiplier::whole(3),
            min_force: 1_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct FortressConfig {
    pub hub: CubeId,
    /// Desired hub power.
    pub target_power: Power,
    /// Top up once hub power drops to `target_power - replenish_units` or below.
    pub replenish_units: Units,
    /// Manhattan radius from the hub inside which the fortress advances.
    pub safe_radius: u32,
    pub safety_multiplier: Multiplier,
    pub min_force: Units,
}

impl Default for FortressConfig {
    fn default() -> Self {
        Self {
            hub: 108,
            target_power: 5_000,
            replenish_units: 1_000,
            safe_radius: 2,
            safety_multiplier: Multiplier::whole(3),
            min_force: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct AftershockConfig {
    pub safety_multiplier: Multiplier,
    pub min_force: Units,
    /// How many recent events to page per detection pass.
    pub event_window: usize,
}

impl Default for AftershockConfig {
    fn default() -> Self {
        Self {
            safety_multiplier: Multiplier::from_bps(25_000),
            min_force: 666,
            event_window: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SeederConfig {
    /// Distinct cubes reinforced per cycle, balance permitting.
    pub batch_size: usize,
    pub units_per_cube: Units,
    /// Occupied cubes below this total power still count as seed targets.
    pub low_value_power: Power,
    pub rng_seed: Option<u64>,
}

impl Default for SeederConfig {
    fn default() -> Self {
        Self {
            batch_size: 3,
            units_per_cube: 100,
            low_value_power: 50,
            rng_seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub poll_delay_ms: u64,
    pub pending_capacity: usize,
    /// Units left behind on a stack that attacks or moves out.
    pub reserve_units: Units,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            poll_delay_ms: 6_000,
            pending_capacity: 8,
            reserve_units: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub gas_ceiling: u64,
    pub reinforce_gas: u64,
    pub transfer_gas: u64,
    pub engage_gas: u64,
    pub approve_gas: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            gas_ceiling: 2_500_000,
            reinforce_gas: 300_000,
            transfer_gas: 500_000,
            engage_gas: 800_000,
            approve_gas: 100_000,
        }
    }
}

impl AgentConfig {
    /// Checks everything that can be checked without touching the ledger.
    pub fn validate(&self) -> Result<Grid, ConfigError> {
        if self.identity.trim().is_empty() {
            return Err(ConfigError::MissingIdentity);
        }
        let grid = Grid::new(self.grid.side)?;
        grid.check(self.strategy.fortress.hub)
            .map_err(|source| ConfigError::InvalidCube {
                field: "strategy.fortress.hub",
                source,
            })?;

        let multipliers = [
            ("strategy.sniper.safety_multiplier", self.strategy.sniper.safety_multiplier),
            ("strategy.predator.safety_multiplier", self.strategy.predator.safety_multiplier),
            ("strategy.fortress.safety_multiplier", self.strategy.fortress.safety_multiplier),
            ("strategy.aftershock.safety_multiplier", self.strategy.aftershock.safety_multiplier),
        ];
        for (field, m) in multipliers {
            if m.bps() == 0 {
                return Err(ConfigError::Invalid(format!("{} must be positive", field)));
            }
        }
        if self.runner.pending_capacity == 0 {
            return Err(ConfigError::Invalid(
                "runner.pending_capacity must be at least 1".into(),
            ));
        }
        if self.network.read_chunk == 0 {
            return Err(ConfigError::Invalid("network.read_chunk must be at least 1".into()));
        }
        if self.economy.reaper_multiplier == 0 {
            return Err(ConfigError::Invalid("economy.reaper_multiplier must be positive".into()));
        }
        Ok(grid)
    }

    pub fn require_gateway(&self) -> Result<&str, ConfigError> {
        let url = self.network.gateway_url.trim();
        if url.is_empty() {
            return Err(ConfigError::MissingEndpoint("network.gateway_url"));
        }
        Ok(url)
    }
}

pub fn load_config(path: &Path) -> Result<AgentConfig, ConfigError> {
    let bytes = fs::read(path)?;
    let config: AgentConfig = serde_json::from_slice(&bytes)?;
    Ok(config)
}

pub fn save_config(path: &Path, config: &AgentConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec_pretty(config)?;
    fs::write(path, json)?;
    Ok(())
}
