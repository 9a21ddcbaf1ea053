// Licensed under the Apache-2.0 license

//! # TWI Hardware Abstraction Traits
//!
//! The engine never touches registers directly. It drives the peripheral through
//! two small capability traits so the real ATmega328P block and the simulated bus
//! are interchangeable.
//!
//! ```text
//! TwiHardwareCore (setup, interrupt flag)
//!     └── TwiBusControl (per-event bus actions)
//!             └── TwiHardware (blanket composite used by the engine)
//! ```

use crate::i2c::common::TimingConfig;
use embedded_hal::i2c::SevenBitAddress;

/// Setup operations, performed once by the engine's `init`.
pub trait TwiHardwareCore {
    /// Power the peripheral up and program bit rate, prescaler, own address and
    /// pullups. Auto-acknowledge starts disabled.
    fn init(&mut self, timing: &TimingConfig, own_address: SevenBitAddress, pullups: bool);

    /// Enable the peripheral. The bus-event interrupt is enabled only with
    /// `interrupt`; otherwise events are left for polling.
    fn enable(&mut self, interrupt: bool);

    /// True while a bus event is waiting to be handled (TWINT set).
    fn event_pending(&self) -> bool;
}

/// The bus actions the protocol state machine issues, one or two per event.
///
/// Each of `start`, `stop` and `step` acknowledges the event currently pending;
/// the next event (if any) is raised by the hardware afterwards.
pub trait TwiBusControl: TwiHardwareCore {
    /// Request a start condition. Raises a repeated start if the bus is still held.
    fn start(&mut self);

    /// Request a stop condition and release the bus. No event follows.
    fn stop(&mut self);

    /// Let the peripheral perform the next bus step. Also drops a start request
    /// that is still latched.
    fn step(&mut self);

    /// Current bus-event code.
    fn status(&self) -> u8;

    fn read_data(&self) -> u8;

    fn write_data(&mut self, byte: u8);

    /// Enable or disable acknowledging the next received byte.
    fn set_ack(&mut self, enabled: bool);
}

/// Everything the engine needs from a peripheral.
pub trait TwiHardware: TwiHardwareCore + TwiBusControl {}

/// Blanket implementation: any type implementing core + bus control is usable.
impl<T> TwiHardware for T where T: TwiHardwareCore + TwiBusControl {}
