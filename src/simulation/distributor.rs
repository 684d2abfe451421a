//! # Power Distribution
//!
//! Mediates every power request from consumers against the rated output
//! capacity and the energy actually held in the storage array. A ledger
//! records the last granted wattage per consumer so that the aggregate
//! draw stays bounded. The capacity check always runs before the
//! availability check: an oversized request is a wiring fault, a thin
//! battery is an operating condition.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use super::storage::{StorageArray, StorageError};

/// Power distribution errors
#[derive(Debug, Error)]
pub enum PowerError {
    #[error(
        "request of {requested}W for {consumer} projects {projected}W total, \
         exceeding rated capacity of {rated}W"
    )]
    CapacityExceeded {
        consumer: String,
        requested: f64,
        projected: f64,
        rated: f64,
    },

    #[error("insufficient stored power: {projected}W projected against {available}W available")]
    Insufficient { projected: f64, available: f64 },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl PowerError {
    /// Transient errors are absorbed by the consumer; everything else is
    /// a configuration fault that must propagate.
    pub fn is_transient(&self) -> bool {
        matches!(self, PowerError::Insufficient { .. })
    }
}

/// Power distributor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributorConfig {
    /// Aggregate output capacity across all consumers (W)
    pub rated_capacity_w: f64,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            rated_capacity_w: 1500.0,
        }
    }
}

/// Snapshot of the distributor ledger and fault state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributorState {
    pub rated_capacity_w: f64,
    pub allocated_w: f64,
    pub fault: bool,
    pub ledger: BTreeMap<String, f64>,
}

/// The seam consumers draw power through. Lets tests script grant and
/// starvation outcomes without a storage array.
pub trait PowerSource {
    fn request(&mut self, consumer: &str, watts: f64) -> Result<f64, PowerError>;
}

/// Arbitrates power requests against rated capacity and stored energy.
#[derive(Debug, Default)]
pub struct PowerDistributor {
    config: DistributorConfig,
    ledger: BTreeMap<String, f64>,
    fault: bool,
}

impl PowerDistributor {
    pub fn new(config: DistributorConfig) -> Self {
        Self {
            config,
            ledger: BTreeMap::new(),
            fault: false,
        }
    }

    pub fn rated_capacity_w(&self) -> f64 {
        self.config.rated_capacity_w
    }

    /// Sum of all currently granted wattages.
    pub fn allocated_w(&self) -> f64 {
        self.ledger.values().sum()
    }

    pub fn fault(&self) -> bool {
        self.fault
    }

    /// Request `watts` for `consumer`, drawing from `storage` on success.
    ///
    /// The projected total replaces the consumer's previous grant with the
    /// new request. Capacity violations fail fatally before availability
    /// is even considered; availability failures set the fault flag and
    /// leave the ledger untouched. A zero-watt request is a deterministic
    /// release: the grant is recorded as zero and nothing is drawn.
    pub fn request(
        &mut self,
        storage: &mut StorageArray,
        consumer: &str,
        watts: f64,
    ) -> Result<f64, PowerError> {
        let others: f64 = self
            .ledger
            .iter()
            .filter(|(id, _)| id.as_str() != consumer)
            .map(|(_, w)| w)
            .sum();
        let projected = others + watts;

        if projected > self.config.rated_capacity_w {
            return Err(PowerError::CapacityExceeded {
                consumer: consumer.to_string(),
                requested: watts,
                projected,
                rated: self.config.rated_capacity_w,
            });
        }

        if watts <= 0.0 {
            self.ledger.insert(consumer.to_string(), 0.0);
            return Ok(0.0);
        }

        let available = storage.available_w();
        if available <= projected {
            self.fault = true;
            return Err(PowerError::Insufficient {
                projected,
                available,
            });
        }

        let drawn = storage.discharge(watts)?;
        self.ledger.insert(consumer.to_string(), watts);
        self.fault = false;
        Ok(drawn)
    }

    /// Drop a consumer's ledger entry entirely. Used when the consumer is
    /// removed from the system.
    pub fn release(&mut self, consumer: &str) {
        self.ledger.remove(consumer);
    }

    /// Clear the fault flag. The ledger is not cleared.
    pub fn reset(&mut self) {
        self.fault = false;
    }

    pub fn state(&self) -> DistributorState {
        DistributorState {
            rated_capacity_w: self.config.rated_capacity_w,
            allocated_w: self.allocated_w(),
            fault: self.fault,
            ledger: self.ledger.clone(),
        }
    }
}

/// Couples the distributor with the storage array it draws from for the
/// duration of one evaluation pass.
pub struct GridConnection<'a> {
    pub distributor: &'a mut PowerDistributor,
    pub storage: &'a mut StorageArray,
}

impl PowerSource for GridConnection<'_> {
    fn request(&mut self, consumer: &str, watts: f64) -> Result<f64, PowerError> {
        self.distributor.request(self.storage, consumer, watts)
    }
}
