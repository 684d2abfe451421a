//! # Energy Storage
//!
//! Storage cells and the array that aggregates them. A cell applies an
//! all-or-nothing charge: the requested wattage is clamped to the rated
//! charge rate, then dropped entirely if it would overfill the cell.
//! Discharge refuses to cross the configured floor and reports zero watts
//! drawn instead of raising. Both behaviors are compatibility contracts.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Storage-specific errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("discharge request of {requested}W exceeds rated discharge limit of {max}W")]
    DischargeRateExceeded { requested: f64, max: f64 },

    #[error("storage array has no connected cells")]
    EmptyArray,

    #[error("cell not found: {0}")]
    CellNotFound(String),

    #[error("cell already connected: {0}")]
    DuplicateCell(String),
}

/// Declared electrical topology of a storage array. Informational only;
/// the electrical circuit is not modeled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Topology {
    Series,
    Parallel,
}

impl Default for Topology {
    fn default() -> Self {
        Topology::Series
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topology::Series => write!(f, "series"),
            Topology::Parallel => write!(f, "parallel"),
        }
    }
}

/// Storage cell configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellConfig {
    /// Rated voltage (V)
    pub voltage_v: f64,
    /// Rated current (A)
    pub amperes: f64,
    /// Initial state of charge as a fraction (0.0 to 1.0)
    pub initial_soc: f64,
    /// Maximum charge rate (W)
    pub max_charge_rate_w: f64,
    /// Maximum discharge rate (W)
    pub max_discharge_rate_w: f64,
    /// Energy floor below which discharge is refused (W)
    pub discharge_floor_w: f64,
}

impl Default for CellConfig {
    fn default() -> Self {
        Self {
            voltage_v: 12.0,
            amperes: 50.0,
            initial_soc: 0.5,
            max_charge_rate_w: 1000.0,
            max_discharge_rate_w: 1000.0,
            discharge_floor_w: 0.0,
        }
    }
}

/// Snapshot of a single cell
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellState {
    pub id: String,
    pub voltage_v: f64,
    pub amperes: f64,
    pub capacity_w: f64,
    pub available_w: f64,
    pub state_of_charge: f64,
}

/// A single storage cell. Capacity is derived from rated voltage and
/// current; available energy only moves through `charge` and `discharge`.
#[derive(Debug, Clone)]
pub struct StorageCell {
    id: String,
    config: CellConfig,
    capacity_w: f64,
    available_w: f64,
}

impl StorageCell {
    pub fn new(id: impl Into<String>, config: CellConfig) -> Self {
        let capacity_w = config.voltage_v * config.amperes;
        let available_w = capacity_w * config.initial_soc.clamp(0.0, 1.0);
        Self {
            id: id.into(),
            config,
            capacity_w,
            available_w,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn capacity_w(&self) -> f64 {
        self.capacity_w
    }

    pub fn available_w(&self) -> f64 {
        self.available_w
    }

    pub fn state_of_charge(&self) -> f64 {
        if self.capacity_w > 0.0 {
            self.available_w / self.capacity_w
        } else {
            0.0
        }
    }

    /// Charge the cell, returning the watts actually applied.
    ///
    /// The request is clamped to the rated charge rate first; if the
    /// clamped amount would exceed capacity the whole charge is dropped.
    /// There is no partial charge.
    pub fn charge(&mut self, watts: f64) -> f64 {
        let clamped = watts.max(0.0).min(self.config.max_charge_rate_w);
        if self.available_w + clamped <= self.capacity_w {
            self.available_w += clamped;
            clamped
        } else {
            0.0
        }
    }

    /// Discharge the cell, returning the watts actually drawn.
    ///
    /// A request above the rated discharge limit is a caller wiring bug
    /// and fails fatally. A request that would take the cell to or below
    /// its floor is refused: state is unchanged and zero is reported.
    pub fn discharge(&mut self, watts: f64) -> Result<f64, StorageError> {
        if watts > self.config.max_discharge_rate_w {
            return Err(StorageError::DischargeRateExceeded {
                requested: watts,
                max: self.config.max_discharge_rate_w,
            });
        }
        if self.available_w - watts > self.config.discharge_floor_w {
            self.available_w -= watts;
            Ok(watts)
        } else {
            Ok(0.0)
        }
    }

    pub fn state(&self) -> CellState {
        CellState {
            id: self.id.clone(),
            voltage_v: self.config.voltage_v,
            amperes: self.config.amperes,
            capacity_w: self.capacity_w,
            available_w: self.available_w,
            state_of_charge: self.state_of_charge(),
        }
    }
}

/// Aggregate snapshot of a storage array, recomputed from live members on
/// every call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageArrayState {
    pub topology: Topology,
    pub capacity_w: f64,
    pub available_w: f64,
    pub state_of_charge: f64,
    pub cells: Vec<CellState>,
}

/// Keyed, deterministically ordered collection of storage cells.
#[derive(Debug, Default)]
pub struct StorageArray {
    topology: Topology,
    cells: BTreeMap<String, StorageCell>,
}

impl StorageArray {
    pub fn new(topology: Topology) -> Self {
        Self {
            topology,
            cells: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, cell: StorageCell) -> Result<(), StorageError> {
        if self.cells.contains_key(cell.id()) {
            return Err(StorageError::DuplicateCell(cell.id().to_string()));
        }
        self.cells.insert(cell.id().to_string(), cell);
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Result<StorageCell, StorageError> {
        self.cells
            .remove(id)
            .ok_or_else(|| StorageError::CellNotFound(id.to_string()))
    }

    pub fn get(&self, id: &str) -> Option<&StorageCell> {
        self.cells.get(id)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn capacity_w(&self) -> f64 {
        self.cells.values().map(StorageCell::capacity_w).sum()
    }

    pub fn available_w(&self) -> f64 {
        self.cells.values().map(StorageCell::available_w).sum()
    }

    pub fn state_of_charge(&self) -> f64 {
        let capacity = self.capacity_w();
        if capacity > 0.0 {
            self.available_w() / capacity
        } else {
            0.0
        }
    }

    /// Charge the array, splitting the request evenly across all members.
    ///
    /// Returns the total watts applied. Charging an empty array is an
    /// error, not a silent no-op.
    pub fn charge(&mut self, watts: f64) -> Result<f64, StorageError> {
        if self.cells.is_empty() {
            return Err(StorageError::EmptyArray);
        }
        let share = watts / self.cells.len() as f64;
        Ok(self.cells.values_mut().map(|cell| cell.charge(share)).sum())
    }

    /// Discharge the array, splitting the request evenly across members.
    ///
    /// Each cell is drawn independently; a cell refusing (at its floor)
    /// contributes zero without rolling back the other cells. Returns the
    /// total watts actually delivered.
    pub fn discharge(&mut self, watts: f64) -> Result<f64, StorageError> {
        if self.cells.is_empty() {
            return Err(StorageError::EmptyArray);
        }
        let share = watts / self.cells.len() as f64;
        let mut drawn = 0.0;
        for cell in self.cells.values_mut() {
            drawn += cell.discharge(share)?;
        }
        Ok(drawn)
    }

    pub fn state(&self) -> StorageArrayState {
        StorageArrayState {
            topology: self.topology,
            capacity_w: self.capacity_w(),
            available_w: self.available_w(),
            state_of_charge: self.state_of_charge(),
            cells: self.cells.values().map(StorageCell::state).collect(),
        }
    }
}
