//! Rig Engine
//!
//! Device registry and control-loop engine for a networked sensor/actuator
//! rig. Binds the control points declared in configuration to physical
//! device channels, tracks presence and reconnects on the process bus, and
//! runs the fixed-period loop: input-timeout sweep, control evaluation,
//! output application.
//!
//! - [`bus`] - Transport collaborator contract and event types
//! - [`binding`] - Live input/output bindings and their value slots
//! - [`drivers`] - Static device-type table and per-device driver shims
//! - [`registry`] - Device presence tracking and dynamic binding
//! - [`failsafe`] - Input timeout sweep
//! - [`engine`] - The three-phase scheduler
//! - [`sim`] - In-tree simulation transport

pub mod binding;
pub mod bus;
pub mod drivers;
pub mod engine;
pub mod failsafe;
pub mod registry;
pub mod sim;
