//! # Simulation Module
//!
//! Models the energy flow of a photovoltaic installation, one tick at a
//! time.
//!
//! ## Components
//!
//! - **Environment**: simulated clock plus irradiance and ambient
//!   temperature curves derived from the time of day
//! - **Panel**: irradiance-to-power conversion with thermal derating and
//!   an attached cooling controller
//! - **Cooling**: bang-bang actuator drawing power through the
//!   distributor to suppress panel temperature
//! - **Storage**: cells and the array that charges from panel output and
//!   feeds the distributor
//! - **Distributor**: arbitrates consumer power requests against rated
//!   capacity and stored energy
//!
//! The tick-level feedback loop: panel output depends on panel
//! temperature, temperature depends on granted cooling power, grants
//! depend on stored energy, and storage is charged by that same tick's
//! panel output.

pub mod cooling;
pub mod distributor;
pub mod environment;
pub mod panel;
pub mod storage;

pub use cooling::{
    CoolingConfig, CoolingController, CoolingControllerState, CoolingRecord, CoolingState,
};
pub use distributor::{
    DistributorConfig, DistributorState, GridConnection, PowerDistributor, PowerError, PowerSource,
};
pub use environment::{Environment, EnvironmentConfig, EnvironmentState};
pub use panel::{
    PanelArray, PanelArraySnapshot, PanelConfig, PanelError, PanelState, PanelStatus, SolarPanel,
};
pub use storage::{
    CellConfig, CellState, StorageArray, StorageArrayState, StorageCell, StorageError, Topology,
};
