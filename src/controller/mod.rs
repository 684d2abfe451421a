//! # System Orchestrator
//!
//! Owns the environment, panel array, storage array and power
//! distributor, and advances the whole installation one tick at a time
//! from a dedicated background task. Queries read an atomically published
//! snapshot, never a half-built aggregate; structural changes serialize
//! against the tick boundary through the single writer lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::simulation::{
    CellConfig, CellState, CoolingConfig, CoolingRecord, DistributorState, Environment,
    EnvironmentState, GridConnection, PanelArray, PanelArraySnapshot, PanelConfig, PanelError,
    PanelState, PowerDistributor, PowerError, SolarPanel, StorageArray, StorageArrayState,
    StorageCell, StorageError,
};

/// Orchestrator errors
#[derive(Debug, Error)]
pub enum SystemError {
    #[error("cannot start: no panels connected")]
    NoPanels,

    #[error("cannot start: no storage cells connected")]
    NoCells,

    #[error("system is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Panel(#[from] PanelError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Power(#[from] PowerError),
}

/// One entry of the orchestrator's append-only log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickRecord {
    /// Number of ticks completed before this one (zero-based)
    pub index: u64,
    /// Simulated timestamp at which the tick ran
    pub time: NaiveDateTime,
    /// Summed panel output for the tick (W)
    pub solar_output_w: f64,
    /// Energy held by the storage array after charging (W)
    pub stored_w: f64,
    /// Aggregate state of charge after charging
    pub state_of_charge: f64,
}

/// Outcome of one tick attempt.
#[derive(Debug, Clone)]
pub enum TickOutcome {
    Completed(TickRecord),
    /// The iteration budget is spent; the tick did not run.
    BudgetExhausted,
}

/// Consistent point-in-time view of the whole system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSnapshot {
    pub active: bool,
    pub iterations: u64,
    pub max_iterations: u64,
    pub cooling_enabled: bool,
    pub environment: EnvironmentState,
    pub panels: PanelArraySnapshot,
    pub panel_details: Vec<PanelState>,
    pub storage: StorageArrayState,
    pub distributor: DistributorState,
    pub last_tick: Option<TickRecord>,
    pub history_len: usize,
}

/// Simulation state. Mutated only under the orchestrator's writer lock:
/// by the tick task, and by structural operations between ticks.
struct Simulation {
    environment: Environment,
    panels: PanelArray,
    storage: StorageArray,
    distributor: PowerDistributor,
    history: Vec<TickRecord>,
    iterations: u64,
    max_iterations: u64,
    ticks_per_day: u64,
    clock: NaiveDateTime,
    step_interval: chrono::Duration,
    cooling_enabled: bool,
    rng: StdRng,
}

impl Simulation {
    fn new(cfg: &Config) -> Self {
        let rng = match cfg.simulation.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let ticks_per_day = cfg.simulation.ticks_per_day();

        Self {
            environment: Environment::new(cfg.environment.clone()),
            panels: PanelArray::new(),
            storage: StorageArray::new(cfg.simulation.storage_topology),
            distributor: PowerDistributor::new(cfg.distributor.clone()),
            history: Vec::new(),
            iterations: 0,
            max_iterations: cfg.simulation.max_days * ticks_per_day,
            ticks_per_day,
            clock: cfg.simulation.start_time,
            step_interval: chrono::Duration::minutes(cfg.simulation.sim_minutes_per_tick.max(1)),
            cooling_enabled: cfg.simulation.cooling_enabled,
            rng,
        }
    }

    /// Run one tick: advance the clock, refresh all panels (which
    /// evaluates cooling and arbitration), charge storage with the summed
    /// output, and append one log record. Refuses to run once the
    /// iteration budget is spent.
    fn step(&mut self) -> Result<TickOutcome, SystemError> {
        if self.iterations >= self.max_iterations {
            return Ok(TickOutcome::BudgetExhausted);
        }

        self.clock += self.step_interval;
        self.environment.advance(self.clock);

        let panels = self.panels.refresh_all(
            &self.environment,
            &mut self.distributor,
            &mut self.storage,
            &mut self.rng,
        )?;

        self.storage.charge(panels.total_output_w)?;
        let storage = self.storage.state();

        let record = TickRecord {
            index: self.iterations,
            time: self.clock,
            solar_output_w: panels.total_output_w,
            stored_w: storage.available_w,
            state_of_charge: storage.state_of_charge,
        };
        self.history.push(record.clone());
        self.iterations += 1;

        Ok(TickOutcome::Completed(record))
    }

    fn add_panel(
        &mut self,
        id: String,
        config: PanelConfig,
        cooling: CoolingConfig,
    ) -> Result<(), SystemError> {
        let mut panel = SolarPanel::new(id, config, cooling);
        // A panel attached mid-run inherits the current cooling policy.
        if self.cooling_enabled {
            panel.cooling_mut().start();
        }
        self.panels.add(panel)?;
        Ok(())
    }

    fn remove_panel(&mut self, id: &str) -> Result<(), SystemError> {
        let mut panel = self.panels.remove(id)?;
        let mut grid = GridConnection {
            distributor: &mut self.distributor,
            storage: &mut self.storage,
        };
        panel.release_cooling(&mut grid)?;
        self.distributor.release(id);
        Ok(())
    }

    fn add_cell(&mut self, id: String, config: CellConfig) -> Result<(), SystemError> {
        self.storage.add(StorageCell::new(id, config))?;
        Ok(())
    }

    fn remove_cell(&mut self, id: &str) -> Result<(), SystemError> {
        self.storage.remove(id)?;
        Ok(())
    }

    fn set_cooling(&mut self, enabled: bool) {
        self.cooling_enabled = enabled;
        for panel in self.panels.iter_mut() {
            if enabled {
                panel.cooling_mut().start();
            } else {
                panel.cooling_mut().stop();
                self.distributor.release(panel.id());
            }
        }
    }

    fn apply_cooling_policy(&mut self) {
        self.set_cooling(self.cooling_enabled);
    }

    fn set_iteration_budget(&mut self, days: u64) {
        self.max_iterations = days * self.ticks_per_day;
    }

    fn build_snapshot(&self, active: bool) -> SystemSnapshot {
        SystemSnapshot {
            active,
            iterations: self.iterations,
            max_iterations: self.max_iterations,
            cooling_enabled: self.cooling_enabled,
            environment: self.environment.state(),
            panels: self.panels.snapshot(),
            panel_details: self.panels.states(),
            storage: self.storage.state(),
            distributor: self.distributor.state(),
            last_tick: self.history.last().cloned(),
            history_len: self.history.len(),
        }
    }
}

/// The photovoltaic system facade.
///
/// Cheap to clone; all clones share the same simulation. The background
/// tick task is the only writer while running; queries read the published
/// snapshot or take a read lock.
#[derive(Clone)]
pub struct PvSystem {
    sim: Arc<RwLock<Simulation>>,
    published: Arc<RwLock<Arc<SystemSnapshot>>>,
    active: Arc<AtomicBool>,
    tick_interval: Duration,
    cooling_config: CoolingConfig,
}

impl PvSystem {
    pub fn new(cfg: &Config) -> Self {
        let sim = Simulation::new(cfg);
        let published = Arc::new(RwLock::new(Arc::new(sim.build_snapshot(false))));

        Self {
            sim: Arc::new(RwLock::new(sim)),
            published,
            active: Arc::new(AtomicBool::new(false)),
            tick_interval: Duration::from_millis(cfg.simulation.tick_millis.max(1)),
            cooling_config: cfg.cooling.clone(),
        }
    }

    /// Validate preconditions, apply the cooling policy to every panel
    /// and begin the background tick schedule.
    pub async fn start(&self) -> Result<(), SystemError> {
        if self.active.load(Ordering::SeqCst) {
            return Err(SystemError::AlreadyRunning);
        }

        {
            let mut sim = self.sim.write().await;
            if sim.panels.is_empty() {
                return Err(SystemError::NoPanels);
            }
            if sim.storage.is_empty() {
                return Err(SystemError::NoCells);
            }
            sim.apply_cooling_policy();
            *self.published.write().await = Arc::new(sim.build_snapshot(true));
        }

        self.active.store(true, Ordering::SeqCst);

        let sim = self.sim.clone();
        let published = self.published.clone();
        let active = self.active.clone();
        let tick_interval = self.tick_interval;
        tokio::spawn(async move {
            run_loop(sim, published, active, tick_interval).await;
        });

        info!("photovoltaic system started");
        Ok(())
    }

    /// Request a stop. Takes effect at the next iteration boundary; an
    /// in-flight tick always runs to completion.
    pub fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Latest published snapshot. Always complete and internally
    /// consistent, even while a tick is in flight.
    pub async fn snapshot(&self) -> Arc<SystemSnapshot> {
        self.published.read().await.clone()
    }

    /// Look up one panel by id.
    pub async fn panel(&self, id: &str) -> Result<PanelState, SystemError> {
        let sim = self.sim.read().await;
        sim.panels
            .get(id)
            .map(SolarPanel::state)
            .ok_or_else(|| PanelError::PanelNotFound(id.to_string()).into())
    }

    /// Look up one storage cell by id.
    pub async fn cell(&self, id: &str) -> Result<CellState, SystemError> {
        let sim = self.sim.read().await;
        sim.storage
            .get(id)
            .map(StorageCell::state)
            .ok_or_else(|| StorageError::CellNotFound(id.to_string()).into())
    }

    /// The full orchestrator log.
    pub async fn history(&self) -> Vec<TickRecord> {
        self.sim.read().await.history.clone()
    }

    /// Log records from `cursor` (zero-based index) onward, for
    /// incremental sync. The caller owns the cursor.
    pub async fn history_since(&self, cursor: usize) -> Vec<TickRecord> {
        let sim = self.sim.read().await;
        sim.history.iter().skip(cursor).cloned().collect()
    }

    /// A panel's cooling-controller diagnostic history from `cursor`
    /// onward.
    pub async fn cooling_history_since(
        &self,
        panel_id: &str,
        cursor: usize,
    ) -> Result<Vec<CoolingRecord>, SystemError> {
        let sim = self.sim.read().await;
        sim.panels
            .get(panel_id)
            .map(|panel| panel.cooling().history_since(cursor))
            .ok_or_else(|| PanelError::PanelNotFound(panel_id.to_string()).into())
    }

    pub async fn add_panel(
        &self,
        id: impl Into<String>,
        config: PanelConfig,
    ) -> Result<(), SystemError> {
        let mut sim = self.sim.write().await;
        sim.add_panel(id.into(), config, self.cooling_config.clone())?;
        self.republish(&sim).await;
        Ok(())
    }

    pub async fn remove_panel(&self, id: &str) -> Result<(), SystemError> {
        let mut sim = self.sim.write().await;
        sim.remove_panel(id)?;
        self.republish(&sim).await;
        Ok(())
    }

    pub async fn add_cell(
        &self,
        id: impl Into<String>,
        config: CellConfig,
    ) -> Result<(), SystemError> {
        let mut sim = self.sim.write().await;
        sim.add_cell(id.into(), config)?;
        self.republish(&sim).await;
        Ok(())
    }

    pub async fn remove_cell(&self, id: &str) -> Result<(), SystemError> {
        let mut sim = self.sim.write().await;
        sim.remove_cell(id)?;
        self.republish(&sim).await;
        Ok(())
    }

    /// Enable active cooling on every panel.
    pub async fn start_cooling(&self) {
        let mut sim = self.sim.write().await;
        sim.set_cooling(true);
        self.republish(&sim).await;
    }

    /// Disable active cooling on every panel and release the held power
    /// allocations.
    pub async fn stop_cooling(&self) {
        let mut sim = self.sim.write().await;
        sim.set_cooling(false);
        self.republish(&sim).await;
    }

    /// Reconfigure the iteration budget in simulated days. Does not touch
    /// the current iteration counter, so the remaining run length can
    /// shrink or grow.
    pub async fn set_iteration_budget(&self, days: u64) {
        let mut sim = self.sim.write().await;
        sim.set_iteration_budget(days);
        self.republish(&sim).await;
    }

    async fn republish(&self, sim: &Simulation) {
        *self.published.write().await = Arc::new(sim.build_snapshot(self.is_active()));
    }
}

async fn run_loop(
    sim: Arc<RwLock<Simulation>>,
    published: Arc<RwLock<Arc<SystemSnapshot>>>,
    active: Arc<AtomicBool>,
    tick_interval: Duration,
) {
    let mut interval = tokio::time::interval(tick_interval);

    loop {
        interval.tick().await;
        if !active.load(Ordering::SeqCst) {
            break;
        }

        let (outcome, snapshot) = {
            let mut sim = sim.write().await;
            let outcome = sim.step();
            let snapshot = Arc::new(sim.build_snapshot(true));
            (outcome, snapshot)
        };

        match outcome {
            Ok(TickOutcome::Completed(record)) => {
                *published.write().await = snapshot;
                debug!(
                    index = record.index,
                    solar_output_w = record.solar_output_w,
                    stored_w = record.stored_w,
                    state_of_charge = record.state_of_charge,
                    "tick complete"
                );
            }
            Ok(TickOutcome::BudgetExhausted) => {
                info!("iteration budget exhausted, stopping");
                publish_inactive(&sim, &published).await;
                active.store(false, Ordering::SeqCst);
                break;
            }
            Err(e) => {
                error!(error = %e, "tick failed");
                publish_inactive(&sim, &published).await;
                active.store(false, Ordering::SeqCst);
                break;
            }
        }
    }

    publish_inactive(&sim, &published).await;
    warn!("simulation loop stopped");
}

async fn publish_inactive(
    sim: &Arc<RwLock<Simulation>>,
    published: &Arc<RwLock<Arc<SystemSnapshot>>>,
) {
    let snapshot = {
        let sim = sim.read().await;
        Arc::new(sim.build_snapshot(false))
    };
    *published.write().await = snapshot;
}
