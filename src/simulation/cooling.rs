//! # Panel Cooling Controller
//!
//! A bang-bang actuator attached to one panel. The setpoint moves by at
//! most one step per tick toward the panel's temperature gap, saturating
//! at the configured maximum, and the resulting demand is drawn through
//! the power distributor. A denied request starves the controller for
//! that tick: the effect drops to zero but the setpoint is preserved for
//! the next attempt.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::distributor::{PowerError, PowerSource};

/// Cooling controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoolingConfig {
    /// Maximum achievable cooling effect (°C)
    pub max_output_c: f64,
    /// Setpoint step applied per evaluation (°C)
    pub step_c: f64,
    /// Power drawn per degree of active cooling (W/°C)
    pub watts_per_degree: f64,
}

impl Default for CoolingConfig {
    fn default() -> Self {
        Self {
            max_output_c: 15.0,
            step_c: 1.0,
            watts_per_degree: 10.0,
        }
    }
}

/// Cooling controller operating state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CoolingState {
    /// Switched off; no power is requested.
    Inactive,
    /// Actively regulating; the last power request was granted.
    Regulating,
    /// Active but the last power request was denied; effect forced to
    /// zero for the tick, setpoint untouched.
    Starved,
}

impl fmt::Display for CoolingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoolingState::Inactive => write!(f, "inactive"),
            CoolingState::Regulating => write!(f, "regulating"),
            CoolingState::Starved => write!(f, "starved"),
        }
    }
}

/// One evaluation of the controller, kept in its diagnostic history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoolingRecord {
    pub state: CoolingState,
    pub setpoint_c: f64,
    pub effect_c: f64,
    pub granted_w: f64,
}

/// Snapshot of a cooling controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoolingControllerState {
    pub state: CoolingState,
    pub setpoint_c: f64,
    pub max_output_c: f64,
    pub watts_per_degree: f64,
    pub history_len: usize,
}

/// Proportional-step cooling actuator bound to one panel.
#[derive(Debug)]
pub struct CoolingController {
    consumer_id: String,
    config: CoolingConfig,
    setpoint_c: f64,
    state: CoolingState,
    history: Vec<CoolingRecord>,
}

impl CoolingController {
    /// Create an inactive controller. `consumer_id` is the identity used
    /// in the distributor's ledger (the owning panel's id).
    pub fn new(consumer_id: impl Into<String>, config: CoolingConfig) -> Self {
        Self {
            consumer_id: consumer_id.into(),
            config,
            setpoint_c: 0.0,
            state: CoolingState::Inactive,
            history: Vec::new(),
        }
    }

    pub fn consumer_id(&self) -> &str {
        &self.consumer_id
    }

    pub fn state(&self) -> CoolingState {
        self.state
    }

    pub fn setpoint_c(&self) -> f64 {
        self.setpoint_c
    }

    pub fn is_active(&self) -> bool {
        self.state != CoolingState::Inactive
    }

    /// Switch the controller on. Starved controllers resume regulating.
    pub fn start(&mut self) {
        self.state = CoolingState::Regulating;
    }

    /// Switch the controller off and zero the setpoint.
    pub fn stop(&mut self) {
        self.state = CoolingState::Inactive;
        self.setpoint_c = 0.0;
    }

    /// Run one evaluation and return the cooling effect for this tick.
    ///
    /// With `reset` the setpoint is forced to zero before anything else
    /// and the step adjustment is skipped, so the resulting zero-watt
    /// request deterministically releases the held allocation.
    ///
    /// A transient insufficient-power failure is absorbed here: the
    /// controller transitions to Starved, the effect is zero and the
    /// setpoint stays unchanged. Configuration faults propagate.
    pub fn evaluate(
        &mut self,
        panel_temperature_c: f64,
        optimal_temperature_c: f64,
        reset: bool,
        power: &mut dyn PowerSource,
    ) -> Result<f64, PowerError> {
        if reset {
            self.setpoint_c = 0.0;
        } else {
            let gap = panel_temperature_c - optimal_temperature_c;
            if self.setpoint_c < gap && self.setpoint_c < self.config.max_output_c {
                self.setpoint_c = (self.setpoint_c + self.config.step_c).min(self.config.max_output_c);
            } else if self.setpoint_c > 0.0 {
                self.setpoint_c = (self.setpoint_c - self.config.step_c).max(0.0);
            }
        }

        let demand_w = self.setpoint_c * self.config.watts_per_degree;
        match power.request(&self.consumer_id, demand_w) {
            Ok(granted_w) => {
                self.state = CoolingState::Regulating;
                let effect_c = self.setpoint_c;
                self.history.push(CoolingRecord {
                    state: self.state,
                    setpoint_c: self.setpoint_c,
                    effect_c,
                    granted_w,
                });
                Ok(effect_c)
            }
            Err(err) if err.is_transient() => {
                self.state = CoolingState::Starved;
                self.history.push(CoolingRecord {
                    state: self.state,
                    setpoint_c: self.setpoint_c,
                    effect_c: 0.0,
                    granted_w: 0.0,
                });
                Ok(0.0)
            }
            Err(err) => Err(err),
        }
    }

    pub fn history(&self) -> &[CoolingRecord] {
        &self.history
    }

    /// History records from `cursor` (zero-based) onward.
    pub fn history_since(&self, cursor: usize) -> Vec<CoolingRecord> {
        self.history.iter().skip(cursor).cloned().collect()
    }

    pub fn snapshot(&self) -> CoolingControllerState {
        CoolingControllerState {
            state: self.state,
            setpoint_c: self.setpoint_c,
            max_output_c: self.config.max_output_c,
            watts_per_degree: self.config.watts_per_degree,
            history_len: self.history.len(),
        }
    }
}
