//! Process-bus transport contract.
//!
//! The transport (connect/enumerate, value callbacks, set-value commands)
//! is an external collaborator. The engine only requires the operations in
//! [`Bus`]: a presence/event feed, periodic value delivery into a binding's
//! sink, channel configuration, and a bounded output write. Implementations
//! must time-bound `write` so one unresponsive module cannot stall a tick.

use std::time::Duration;

use thiserror::Error;

use crate::binding::ValueSink;

/// Presence change reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Discovered,
    Disconnected,
}

/// One enumeration event from the bus.
#[derive(Debug, Clone)]
pub struct BusEvent {
    pub uid: String,
    /// `None` for the bus root node.
    pub parent_uid: Option<String>,
    pub type_code: u16,
    pub kind: Presence,
}

/// Transport-level failure. Recovered locally at runtime; fatal only when
/// it prevents startup wiring.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("module '{uid}' did not answer within {timeout_ms} ms")]
    Timeout { uid: String, timeout_ms: u64 },

    #[error("module '{uid}' rejected the request: {reason}")]
    Rejected { uid: String, reason: String },

    #[error("transport failure: {0}")]
    Transport(String),
}

/// Per-channel configuration applied at bind time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelSetting {
    /// Probe kind code for a thermocouple module.
    ThermocoupleKind { code: u8 },
    /// PWM carrier frequency for a digital output channel.
    PwmFrequency { channel: u16, hertz: u32 },
}

/// One bounded write to an output module, tagged per output variant.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteCommand {
    /// All relay channels at once.
    Relay { levels: Vec<bool> },
    /// Analog level on one channel.
    Analog { channel: u16, value: f64 },
    /// PWM duty cycle in `[0, 1]` on one channel.
    Pwm { channel: u16, duty: f64 },
    /// Logic level on one channel.
    Digital { channel: u16, level: bool },
    /// Immediate motion stop (steppers).
    Halt,
}

/// Callback invoked by the transport for every enumeration event.
pub type EventListener = Box<dyn Fn(BusEvent) + Send + Sync>;

/// The transport collaborator contract.
pub trait Bus: Send + Sync {
    /// Install the enumeration listener. Called once by the registry.
    fn set_event_listener(&self, listener: EventListener);

    /// Ask every module on the bus to announce itself.
    fn enumerate(&self) -> Result<(), BusError>;

    /// Begin periodic value delivery from an input module into `sink`.
    ///
    /// The transport invokes the sink from its own callback context; the
    /// sink write is short, non-blocking and never re-enters the bus.
    fn subscribe(&self, uid: &str, period: Duration, sink: ValueSink) -> Result<(), BusError>;

    /// Apply a channel configuration on a module.
    fn configure(&self, uid: &str, setting: ChannelSetting) -> Result<(), BusError>;

    /// Issue a bounded write to an output module.
    fn write(&self, uid: &str, command: WriteCommand) -> Result<(), BusError>;
}
