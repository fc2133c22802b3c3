//! Rig Common Library
//!
//! Shared foundation for the rig control workspace:
//!
//! - [`capability`] - Control-point type taxonomy and capability flags
//! - [`config`] - Configuration model, loading and validation
//! - [`control`] - Control-point evaluators (linear scaling, deviation
//!   alarms, PI heater control) and their runtime state
//!
//! The engine crate (`rig_engine`) builds the device registry and the
//! control loop on top of these types.

pub mod capability;
pub mod config;
pub mod control;
