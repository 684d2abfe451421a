//! # Environment Simulation
//!
//! Derives solar irradiance and ambient temperature from the simulated
//! time of day. Both quantities are pure functions of the current clock
//! value: a triangular ramp that peaks at the configured zenith time and
//! returns to its floor at the daylight window edges (irradiance) or at
//! midnight (temperature). No hidden history is kept between reads.

use chrono::{NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

/// Environment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Solar irradiance at the zenith time (W/m²)
    pub peak_irradiance_wm2: f64,
    /// Time of day at which irradiance and temperature peak
    pub zenith: NaiveTime,
    /// Start of the daylight window (irradiance is zero before this)
    pub daylight_start: NaiveTime,
    /// End of the daylight window (irradiance is zero from this time on)
    pub daylight_end: NaiveTime,
    /// Ambient temperature at midnight (°C)
    pub min_temperature_c: f64,
    /// Ambient temperature at the zenith time (°C)
    pub max_temperature_c: f64,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            peak_irradiance_wm2: 1000.0,
            zenith: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
            daylight_start: NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
            daylight_end: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            min_temperature_c: 4.0,
            max_temperature_c: 35.0,
        }
    }
}

/// Current state of the environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentState {
    /// Current simulated timestamp (None until the clock is first advanced)
    pub timestamp: Option<NaiveDateTime>,
    /// Solar irradiance in W/m²
    pub irradiance_wm2: f64,
    /// Ambient temperature in °C
    pub ambient_temperature_c: f64,
}

/// Simulated environment clock and weather curves
pub struct Environment {
    config: EnvironmentConfig,
    timestamp: Option<NaiveDateTime>,
}

impl Environment {
    /// Create a new environment with an unset clock.
    pub fn new(config: EnvironmentConfig) -> Self {
        Self {
            config,
            timestamp: None,
        }
    }

    /// Get the current simulated timestamp, if the clock has been set.
    pub fn current_time(&self) -> Option<NaiveDateTime> {
        self.timestamp
    }

    /// Set the simulated clock. Overwrites the previous value; no other
    /// state changes.
    pub fn advance(&mut self, timestamp: NaiveDateTime) {
        self.timestamp = Some(timestamp);
    }

    /// An unset clock reads as the earliest time of day; the tick loop
    /// must never stall on a clock read.
    fn time_of_day(&self) -> NaiveTime {
        self.timestamp.map(|t| t.time()).unwrap_or(NaiveTime::MIN)
    }

    /// Current solar irradiance in W/m².
    ///
    /// Zero outside the daylight window, rising linearly from the window
    /// start to the peak at zenith and falling symmetrically back to zero
    /// at the window end.
    pub fn irradiance(&self) -> f64 {
        let t = seconds_of_day(self.time_of_day());
        let start = seconds_of_day(self.config.daylight_start);
        let end = seconds_of_day(self.config.daylight_end);
        let zenith = seconds_of_day(self.config.zenith);

        if t < start || t >= end {
            return 0.0;
        }

        let fraction = if t <= zenith {
            let rise = zenith - start;
            if rise <= 0.0 {
                1.0
            } else {
                (t - start) / rise
            }
        } else {
            let fall = end - zenith;
            if fall <= 0.0 {
                1.0
            } else {
                (end - t) / fall
            }
        };

        self.config.peak_irradiance_wm2 * fraction
    }

    /// Current ambient temperature in °C.
    ///
    /// Linear interpolation between the configured minimum (midnight) and
    /// maximum (zenith), mirrored around the zenith time.
    pub fn ambient_temperature(&self) -> f64 {
        let t = seconds_of_day(self.time_of_day());
        let zenith = seconds_of_day(self.config.zenith);
        let span = zenith.max(86_400.0 - zenith);

        let distance = (t - zenith).abs();
        let fraction = (1.0 - distance / span).clamp(0.0, 1.0);

        self.config.min_temperature_c
            + (self.config.max_temperature_c - self.config.min_temperature_c) * fraction
    }

    /// Get current environment state snapshot
    pub fn state(&self) -> EnvironmentState {
        EnvironmentState {
            timestamp: self.timestamp,
            irradiance_wm2: self.irradiance(),
            ambient_temperature_c: self.ambient_temperature(),
        }
    }
}

fn seconds_of_day(time: NaiveTime) -> f64 {
    time.num_seconds_from_midnight() as f64
}
