use anyhow::Result;
use figment::{providers::{Env, Format, Toml}, Figment};
use serde::{Deserialize, Serialize};

use crate::simulation::{
    CellConfig, CoolingConfig, DistributorConfig, EnvironmentConfig, PanelConfig, Topology,
};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub environment: EnvironmentConfig,
    #[serde(default)]
    pub panel: PanelConfig,
    #[serde(default)]
    pub cooling: CoolingConfig,
    #[serde(default)]
    pub cell: CellConfig,
    #[serde(default)]
    pub distributor: DistributorConfig,
}

/// Orchestrator scheduling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Wall-clock tick cadence in milliseconds
    pub tick_millis: u64,
    /// Simulated time advanced per tick (minutes)
    pub sim_minutes_per_tick: i64,
    /// Iteration budget expressed in simulated days
    pub max_days: u64,
    /// Simulated clock starting point (ISO 8601, no timezone)
    pub start_time: chrono::NaiveDateTime,
    /// Panels provisioned by the runner binary at startup
    pub panel_count: u32,
    /// Storage cells provisioned by the runner binary at startup
    pub cell_count: u32,
    /// Whether active panel cooling is enabled at startup
    pub cooling_enabled: bool,
    /// Random seed for reproducibility (None = random)
    pub random_seed: Option<u64>,
    /// Declared storage array topology (informational)
    pub storage_topology: Topology,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        use chrono::NaiveDate;

        Self {
            tick_millis: 1000,
            sim_minutes_per_tick: 30,
            max_days: 1,
            start_time: NaiveDate::from_ymd_opt(2024, 5, 21)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            panel_count: 1,
            cell_count: 1,
            cooling_enabled: true,
            random_seed: None,
            storage_topology: Topology::default(),
        }
    }
}

impl SimulationConfig {
    /// Number of ticks that make up one simulated day.
    pub fn ticks_per_day(&self) -> u64 {
        let minutes = self.sim_minutes_per_tick.max(1) as u64;
        (24 * 60 / minutes).max(1)
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Toml::file("config/default.toml"))
            .merge(Env::prefixed("PVS__").split("__"));
        Ok(figment.extract()?)
    }
}
