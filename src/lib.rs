//! # PV Plant Simulator
//!
//! Time-stepped simulation of a photovoltaic installation: solar
//! generation with thermal feedback on efficiency, active cooling fed
//! through a power arbitration layer, and battery-style energy storage.
//! A background task advances the whole system one tick at a time while
//! queries read consistent published snapshots.

pub mod config;
pub mod controller;
pub mod simulation;
pub mod telemetry;
