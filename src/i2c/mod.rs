// Licensed under the Apache-2.0 license

//! TWI master driver.
//!
//! An interrupt-driven transaction engine for the ATmega328P two-wire interface,
//! usable in bare-metal `no_std` builds. The protocol state machine is written
//! against small hardware traits, so the same engine runs on the chip and on a
//! simulated bus.

pub mod avr_twi;
pub mod common;
pub mod i2c_controller;
pub mod sim_bus;
pub mod traits;
pub mod twi_master;

// Re-export common types for convenience
pub use common::{
    BusEvent, ConfigError, Error, I2cConfig, I2cConfigBuilder, I2cSpeed, Prescaler, ServiceMode,
    Status, TimingConfig, MAX_TRANSFER,
};

// Re-export hardware interfaces
pub use traits::{TwiBusControl, TwiHardware, TwiHardwareCore};

// Re-export the engine and its front ends
pub use avr_twi::{AvrTwi, MmioRegisters, RegisterAccess};
pub use i2c_controller::I2cController;
pub use sim_bus::{BusOp, SimBus, SimDevice};
pub use twi_master::{TraceEntry, TransactionContext, TwiMaster};
