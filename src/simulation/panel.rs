//! # Thermal Panel Simulation
//!
//! A panel converts irradiance to output power through an efficiency that
//! degrades once the panel runs hotter than its optimum. Panel
//! temperature is ambient minus whatever relief the attached cooling
//! controller delivered this tick, which closes the feedback loop:
//! cooling draws power from storage, storage was charged by the very
//! output the cooling is protecting.

use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use super::cooling::{CoolingConfig, CoolingController, CoolingControllerState};
use super::distributor::{GridConnection, PowerDistributor, PowerError, PowerSource};
use super::environment::Environment;
use super::storage::StorageArray;

/// Rated-conditions divisor carried over from the reference output model.
const OUTPUT_NORMALIZATION: f64 = 3.0;

/// Upper bound on the passive heat relief applied when no cooling is
/// active (°C).
const PASSIVE_RELIEF_MAX_C: f64 = 1.5;

/// Panel-specific errors
#[derive(Debug, Error)]
pub enum PanelError {
    #[error("panel not found: {0}")]
    PanelNotFound(String),

    #[error("panel already connected: {0}")]
    DuplicatePanel(String),
}

/// Panel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelConfig {
    /// Rated power under standard conditions (W)
    pub power_rating_w: f64,
    /// Rated efficiency under standard conditions (1.0 = 100%)
    pub efficiency: f64,
    /// Efficiency lost per degree above the optimal temperature
    /// (0.004 = 0.4%/°C, typical for crystalline silicon)
    pub temp_coefficient: f64,
    /// Temperature at which the rated efficiency holds (°C)
    pub optimal_temperature_c: f64,
    /// Panel surface area (m²)
    pub area_m2: f64,
    /// Bounded output variation emulating sensor and generation noise
    /// (0.3 = ±30%)
    pub output_noise_band: f64,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            power_rating_w: 100.0,
            efficiency: 0.23,
            temp_coefficient: 0.004,
            optimal_temperature_c: 25.0,
            area_m2: 3.0,
            output_noise_band: 0.3,
        }
    }
}

/// Per-tick panel reading
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelStatus {
    pub id: String,
    pub output_w: f64,
    pub temperature_c: f64,
}

/// Full panel snapshot, including the attached cooling controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelState {
    pub id: String,
    pub power_rating_w: f64,
    pub efficiency: f64,
    pub temp_coefficient: f64,
    pub optimal_temperature_c: f64,
    pub area_m2: f64,
    pub temperature_c: f64,
    pub output_w: f64,
    pub cooling: CoolingControllerState,
}

/// A solar panel owning its cooling controller.
#[derive(Debug)]
pub struct SolarPanel {
    id: String,
    config: PanelConfig,
    temperature_c: f64,
    output_w: f64,
    cooling: CoolingController,
}

impl SolarPanel {
    pub fn new(id: impl Into<String>, config: PanelConfig, cooling_config: CoolingConfig) -> Self {
        let id = id.into();
        let cooling = CoolingController::new(id.clone(), cooling_config);
        Self {
            id,
            config,
            temperature_c: 0.0,
            output_w: 0.0,
            cooling,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn temperature_c(&self) -> f64 {
        self.temperature_c
    }

    pub fn output_w(&self) -> f64 {
        self.output_w
    }

    pub fn cooling(&self) -> &CoolingController {
        &self.cooling
    }

    pub fn cooling_mut(&mut self) -> &mut CoolingController {
        &mut self.cooling
    }

    /// Re-derive temperature and output from the live environment.
    ///
    /// Temperature is observable state, recomputed first: later reads of
    /// "current temperature" must reflect this tick. The cooling
    /// controller is evaluated as part of the temperature computation and
    /// draws its power through `power`. Without active cooling the panel
    /// sheds a small bounded random amount of heat instead, so the
    /// uncooled temperature curve is never perfectly flat.
    pub fn refresh(
        &mut self,
        env: &Environment,
        power: &mut dyn PowerSource,
        rng: &mut StdRng,
    ) -> Result<PanelStatus, PowerError> {
        let relief_c = if self.cooling.is_active() {
            self.cooling
                .evaluate(self.temperature_c, self.config.optimal_temperature_c, false, power)?
        } else {
            rng.gen_range(0.0..PASSIVE_RELIEF_MAX_C)
        };

        self.temperature_c = env.ambient_temperature() - relief_c;

        let efficiency = self.effective_efficiency();
        let band = self.config.output_noise_band;
        let noise = rng.gen_range((1.0 - band).max(0.0)..=1.0 + band);
        self.output_w =
            (env.irradiance() * self.config.area_m2 * efficiency / OUTPUT_NORMALIZATION * noise)
                .max(0.0);

        Ok(self.status())
    }

    /// Rated efficiency, derated by the temperature coefficient for every
    /// degree above the optimum. Going to zero or negative here means the
    /// coefficients are misconfigured; it is not a runtime fault.
    pub fn effective_efficiency(&self) -> f64 {
        if self.temperature_c > self.config.optimal_temperature_c {
            let above = self.temperature_c - self.config.optimal_temperature_c;
            self.config.efficiency - above * self.config.temp_coefficient
        } else {
            self.config.efficiency
        }
    }

    /// Release the cooling allocation held in the distributor's ledger.
    /// Used when the panel is detached from the system.
    pub fn release_cooling(&mut self, power: &mut dyn PowerSource) -> Result<(), PowerError> {
        if self.cooling.is_active() {
            self.cooling.evaluate(
                self.temperature_c,
                self.config.optimal_temperature_c,
                true,
                power,
            )?;
        }
        Ok(())
    }

    pub fn status(&self) -> PanelStatus {
        PanelStatus {
            id: self.id.clone(),
            output_w: self.output_w,
            temperature_c: self.temperature_c,
        }
    }

    pub fn state(&self) -> PanelState {
        PanelState {
            id: self.id.clone(),
            power_rating_w: self.config.power_rating_w,
            efficiency: self.config.efficiency,
            temp_coefficient: self.config.temp_coefficient,
            optimal_temperature_c: self.config.optimal_temperature_c,
            area_m2: self.config.area_m2,
            temperature_c: self.temperature_c,
            output_w: self.output_w,
            cooling: self.cooling.snapshot(),
        }
    }
}

/// Aggregate snapshot of the panel array
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelArraySnapshot {
    /// Mean panel temperature (°C); zero when the array is empty
    pub temperature_c: f64,
    /// Summed panel output (W)
    pub total_output_w: f64,
    pub panels: Vec<PanelStatus>,
}

/// Keyed, deterministically ordered collection of panels.
#[derive(Debug, Default)]
pub struct PanelArray {
    panels: BTreeMap<String, SolarPanel>,
}

impl PanelArray {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, panel: SolarPanel) -> Result<(), PanelError> {
        if self.panels.contains_key(panel.id()) {
            return Err(PanelError::DuplicatePanel(panel.id().to_string()));
        }
        self.panels.insert(panel.id().to_string(), panel);
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Result<SolarPanel, PanelError> {
        self.panels
            .remove(id)
            .ok_or_else(|| PanelError::PanelNotFound(id.to_string()))
    }

    pub fn get(&self, id: &str) -> Option<&SolarPanel> {
        self.panels.get(id)
    }

    pub fn len(&self) -> usize {
        self.panels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.panels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SolarPanel> {
        self.panels.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut SolarPanel> {
        self.panels.values_mut()
    }

    /// Refresh every panel against the live environment and aggregate the
    /// results. Each panel's cooling draws through a fresh coupling of
    /// the distributor and storage array.
    pub fn refresh_all(
        &mut self,
        env: &Environment,
        distributor: &mut PowerDistributor,
        storage: &mut StorageArray,
        rng: &mut StdRng,
    ) -> Result<PanelArraySnapshot, PowerError> {
        let mut statuses = Vec::with_capacity(self.panels.len());
        for panel in self.panels.values_mut() {
            let mut grid = GridConnection {
                distributor: &mut *distributor,
                storage: &mut *storage,
            };
            statuses.push(panel.refresh(env, &mut grid, rng)?);
        }
        Ok(Self::aggregate(statuses))
    }

    /// Aggregate a set of panel readings: mean temperature, summed output.
    fn aggregate(statuses: Vec<PanelStatus>) -> PanelArraySnapshot {
        let total_output_w = statuses.iter().map(|s| s.output_w).sum();
        let temperature_c = if statuses.is_empty() {
            0.0
        } else {
            statuses.iter().map(|s| s.temperature_c).sum::<f64>() / statuses.len() as f64
        };
        PanelArraySnapshot {
            temperature_c,
            total_output_w,
            panels: statuses,
        }
    }

    /// Aggregate snapshot from the panels' last refreshed readings,
    /// without re-evaluating cooling.
    pub fn snapshot(&self) -> PanelArraySnapshot {
        Self::aggregate(self.panels.values().map(SolarPanel::status).collect())
    }

    pub fn states(&self) -> Vec<PanelState> {
        self.panels.values().map(SolarPanel::state).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::distributor::PowerSource;
    use crate::simulation::environment::EnvironmentConfig;
    use chrono::NaiveDate;
    use rand::SeedableRng;

    struct GrantAll;
    impl PowerSource for GrantAll {
        fn request(&mut self, _consumer: &str, watts: f64) -> Result<f64, PowerError> {
            Ok(watts)
        }
    }

    struct DenyAll;
    impl PowerSource for DenyAll {
        fn request(&mut self, _consumer: &str, watts: f64) -> Result<f64, PowerError> {
            if watts > 0.0 {
                Err(PowerError::Insufficient {
                    projected: watts,
                    available: 0.0,
                })
            } else {
                Ok(0.0)
            }
        }
    }

    fn env_at_noon() -> Environment {
        let mut env = Environment::new(EnvironmentConfig::default());
        env.advance(
            NaiveDate::from_ymd_opt(2024, 5, 21)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
        );
        env
    }

    fn env_at_midnight() -> Environment {
        let mut env = Environment::new(EnvironmentConfig::default());
        env.advance(
            NaiveDate::from_ymd_opt(2024, 5, 21)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        );
        env
    }

    fn quiet_panel(id: &str) -> SolarPanel {
        // No output noise so assertions can be exact.
        SolarPanel::new(
            id,
            PanelConfig {
                output_noise_band: 0.0,
                ..Default::default()
            },
            CoolingConfig::default(),
        )
    }

    #[test]
    fn test_output_zero_at_night() {
        let env = env_at_midnight();
        let mut panel = quiet_panel("panel-1");
        let mut rng = StdRng::seed_from_u64(7);

        let status = panel.refresh(&env, &mut GrantAll, &mut rng).unwrap();
        assert_eq!(status.output_w, 0.0);
    }

    #[test]
    fn test_output_positive_at_noon() {
        let env = env_at_noon();
        let mut panel = quiet_panel("panel-1");
        let mut rng = StdRng::seed_from_u64(7);

        let status = panel.refresh(&env, &mut GrantAll, &mut rng).unwrap();
        assert!(status.output_w > 0.0);
    }

    #[test]
    fn test_noise_never_inverts_sign() {
        let env = env_at_noon();
        let mut panel = SolarPanel::new(
            "panel-1",
            PanelConfig::default(),
            CoolingConfig::default(),
        );
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..200 {
            let status = panel.refresh(&env, &mut GrantAll, &mut rng).unwrap();
            assert!(status.output_w >= 0.0);
        }
    }

    #[test]
    fn test_temperature_tracks_ambient_minus_relief() {
        let env = env_at_noon(); // ambient 35°C
        let mut panel = quiet_panel("panel-1");
        let mut rng = StdRng::seed_from_u64(7);

        // Uncooled: temperature within the passive relief band of ambient.
        let status = panel.refresh(&env, &mut GrantAll, &mut rng).unwrap();
        assert!(status.temperature_c <= 35.0);
        assert!(status.temperature_c > 35.0 - PASSIVE_RELIEF_MAX_C);
    }

    #[test]
    fn test_cooling_suppresses_temperature() {
        let env = env_at_noon();
        let mut panel = quiet_panel("panel-1");
        panel.cooling_mut().start();
        let mut rng = StdRng::seed_from_u64(7);

        // Let the setpoint ramp for a few ticks.
        for _ in 0..5 {
            panel.refresh(&env, &mut GrantAll, &mut rng).unwrap();
        }
        let status = panel.status();
        assert!(status.temperature_c < 35.0 - 3.0);
    }

    #[test]
    fn test_starved_cooling_leaves_panel_uncooled() {
        let env = env_at_noon();
        let mut panel = quiet_panel("panel-1");
        panel.cooling_mut().start();
        panel.temperature_c = 40.0; // hot panel, so the controller demands power
        let mut rng = StdRng::seed_from_u64(7);

        let status = panel.refresh(&env, &mut DenyAll, &mut rng).unwrap();
        // Effect forced to zero: temperature equals ambient exactly.
        assert_eq!(status.temperature_c, 35.0);
        assert_eq!(
            panel.cooling().state(),
            crate::simulation::cooling::CoolingState::Starved
        );
    }

    #[test]
    fn test_efficiency_derates_above_optimum() {
        let mut panel = quiet_panel("panel-1");
        panel.temperature_c = 30.0; // 5°C above the 25°C optimum
        let expected = 0.23 - 5.0 * 0.004;
        assert!((panel.effective_efficiency() - expected).abs() < 1e-9);

        panel.temperature_c = 20.0;
        assert_eq!(panel.effective_efficiency(), 0.23);
    }

    #[test]
    fn test_hot_panel_produces_less() {
        let env = env_at_noon();
        let mut rng = StdRng::seed_from_u64(7);

        let mut cooled = quiet_panel("cooled");
        cooled.cooling_mut().start();
        for _ in 0..10 {
            cooled.refresh(&env, &mut GrantAll, &mut rng).unwrap();
        }

        let mut uncooled = quiet_panel("uncooled");
        uncooled.refresh(&env, &mut GrantAll, &mut rng).unwrap();

        assert!(cooled.output_w() > uncooled.output_w());
    }

    #[test]
    fn test_array_aggregates_mean_and_sum() {
        let env = env_at_noon();
        let mut rng = StdRng::seed_from_u64(7);
        let mut array = PanelArray::new();
        array.add(quiet_panel("a")).unwrap();
        array.add(quiet_panel("b")).unwrap();

        let mut distributor = PowerDistributor::new(Default::default());
        let mut storage = StorageArray::new(Default::default());
        storage
            .add(crate::simulation::storage::StorageCell::new(
                "cell-1",
                Default::default(),
            ))
            .unwrap();

        let snapshot = array
            .refresh_all(&env, &mut distributor, &mut storage, &mut rng)
            .unwrap();
        assert_eq!(snapshot.panels.len(), 2);

        let expected_total: f64 = snapshot.panels.iter().map(|p| p.output_w).sum();
        assert!((snapshot.total_output_w - expected_total).abs() < 1e-9);

        let expected_mean =
            snapshot.panels.iter().map(|p| p.temperature_c).sum::<f64>() / 2.0;
        assert!((snapshot.temperature_c - expected_mean).abs() < 1e-9);
    }

    #[test]
    fn test_empty_array_snapshot() {
        let array = PanelArray::new();
        let snapshot = array.snapshot();
        assert_eq!(snapshot.total_output_w, 0.0);
        assert_eq!(snapshot.temperature_c, 0.0);
        assert!(snapshot.panels.is_empty());
    }

    #[test]
    fn test_duplicate_and_missing_panels() {
        let mut array = PanelArray::new();
        array.add(quiet_panel("a")).unwrap();
        assert!(matches!(
            array.add(quiet_panel("a")).unwrap_err(),
            PanelError::DuplicatePanel(_)
        ));
        assert!(matches!(
            array.remove("ghost").unwrap_err(),
            PanelError::PanelNotFound(_)
        ));
    }

    #[test]
    fn test_release_cooling_requests_zero() {
        struct LastRequest(Option<f64>);
        impl PowerSource for LastRequest {
            fn request(&mut self, _consumer: &str, watts: f64) -> Result<f64, PowerError> {
                self.0 = Some(watts);
                Ok(watts)
            }
        }

        let env = env_at_noon();
        let mut panel = quiet_panel("panel-1");
        panel.cooling_mut().start();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..3 {
            panel.refresh(&env, &mut GrantAll, &mut rng).unwrap();
        }
        assert!(panel.cooling().setpoint_c() > 0.0);

        let mut source = LastRequest(None);
        panel.release_cooling(&mut source).unwrap();
        assert_eq!(source.0, Some(0.0));
        assert_eq!(panel.cooling().setpoint_c(), 0.0);
    }
}
