// Licensed under the Apache-2.0 license

//! Common types and constants for the TWI master engine.
//!
//! This module provides the shared definitions for configuration, bus-event
//! codes, transaction status and error handling used across the driver.

use core::fmt;

use fugit::HertzU32;

/// Largest transfer the transaction slot can hold. Byte counts are 8-bit on the wire
/// protocol this engine was built for.
pub const MAX_TRANSFER: usize = 255;

/// Number of handled events kept in the debug trace.
pub const TRACE_DEPTH: usize = 32;

/// Direction bit appended to the 7-bit address during the address phase.
pub const DIRECTION_READ: u8 = 0x01;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum I2cSpeed {
    Standard = 100_000,
    Fast = 400_000,
    FastPlus = 1_000_000,
}

impl I2cSpeed {
    #[must_use]
    pub const fn frequency(self) -> HertzU32 {
        HertzU32::from_raw(self as u32)
    }
}

/// Who runs the protocol state machine.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ServiceMode {
    /// `poll()` services pending bus events itself.
    Polled,
    /// An interrupt handler calls `on_event()`; `poll()` only observes status.
    Interrupt,
}

/// TWI clock prescaler (TWPS1:0).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Prescaler {
    Div1 = 0,
    Div4 = 1,
    Div16 = 2,
    Div64 = 3,
}

impl Prescaler {
    pub const ALL: [Prescaler; 4] = [
        Prescaler::Div1,
        Prescaler::Div4,
        Prescaler::Div16,
        Prescaler::Div64,
    ];

    #[must_use]
    pub const fn bits(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub const fn factor(self) -> u32 {
        match self {
            Prescaler::Div1 => 1,
            Prescaler::Div4 => 4,
            Prescaler::Div16 => 16,
            Prescaler::Div64 => 64,
        }
    }
}

/// Bit-rate register value and prescaler producing the requested SCL frequency.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TimingConfig {
    pub bit_rate: u8,
    pub prescaler: Prescaler,
}

impl TimingConfig {
    /// Compute the divisor for `scl` given the peripheral clock `cpu`.
    ///
    /// SCL = CPU / (16 + 2 * TWBR * prescaler). The smallest prescaler that keeps
    /// TWBR within 8 bits wins, so 16 MHz / 100 kHz gives TWBR = 72, prescaler 1.
    ///
    /// # Errors
    ///
    /// [`ConfigError::SpeedTooHigh`] if even TWBR = 0 cannot reach `scl`,
    /// [`ConfigError::SpeedTooLow`] if TWBR overflows with the largest prescaler.
    pub fn for_speed(cpu: HertzU32, scl: HertzU32) -> Result<Self, ConfigError> {
        let scl = scl.raw();
        if scl == 0 {
            return Err(ConfigError::SpeedTooLow);
        }
        let ratio = cpu.raw() / scl;
        if ratio < 16 {
            return Err(ConfigError::SpeedTooHigh);
        }
        for prescaler in Prescaler::ALL {
            let twbr = (ratio - 16) / (2 * prescaler.factor());
            if let Ok(bit_rate) = u8::try_from(twbr) {
                return Ok(Self {
                    bit_rate,
                    prescaler,
                });
            }
        }
        Err(ConfigError::SpeedTooLow)
    }

    /// SCL frequency this timing produces for `cpu`.
    #[must_use]
    pub fn scl_frequency(&self, cpu: HertzU32) -> HertzU32 {
        let divisor = 16 + 2 * u32::from(self.bit_rate) * self.prescaler.factor();
        HertzU32::from_raw(cpu.raw() / divisor)
    }
}

/// Engine configuration. Build with [`I2cConfigBuilder`].
#[derive(Copy, Clone, Debug)]
pub struct I2cConfig {
    pub cpu_clock: HertzU32,
    pub speed: HertzU32,
    /// Own 7-bit slave address.
    pub own_address: u8,
    pub internal_pullups: bool,
    pub mode: ServiceMode,
    /// Record every handled event into the transaction trace.
    pub trace: bool,
    /// Called once each time a transaction reaches a terminal status.
    pub on_complete: Option<fn(Status)>,
    /// Idle polls a blocking call tolerates before giving up. `None` waits forever.
    pub timeout_polls: Option<u32>,
}

impl Default for I2cConfig {
    fn default() -> Self {
        I2cConfigBuilder::new().build()
    }
}

pub struct I2cConfigBuilder {
    cpu_clock: HertzU32,
    speed: HertzU32,
    own_address: u8,
    internal_pullups: bool,
    mode: ServiceMode,
    trace: bool,
    on_complete: Option<fn(Status)>,
    timeout_polls: Option<u32>,
}

impl Default for I2cConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl I2cConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cpu_clock: HertzU32::from_raw(16_000_000),
            speed: I2cSpeed::Standard.frequency(),
            own_address: 0,
            internal_pullups: false,
            mode: ServiceMode::Polled,
            trace: false,
            on_complete: None,
            timeout_polls: None,
        }
    }
    #[must_use]
    pub fn cpu_clock(mut self, clock: HertzU32) -> Self {
        self.cpu_clock = clock;
        self
    }
    #[must_use]
    pub fn speed(mut self, speed: I2cSpeed) -> Self {
        self.speed = speed.frequency();
        self
    }
    #[must_use]
    pub fn bus_frequency(mut self, frequency: HertzU32) -> Self {
        self.speed = frequency;
        self
    }
    #[must_use]
    pub fn own_address(mut self, address: u8) -> Self {
        self.own_address = address;
        self
    }
    #[must_use]
    pub fn internal_pullups(mut self, enabled: bool) -> Self {
        self.internal_pullups = enabled;
        self
    }
    #[must_use]
    pub fn mode(mut self, mode: ServiceMode) -> Self {
        self.mode = mode;
        self
    }
    #[must_use]
    pub fn trace(mut self, enabled: bool) -> Self {
        self.trace = enabled;
        self
    }
    #[must_use]
    pub fn on_complete(mut self, callback: fn(Status)) -> Self {
        self.on_complete = Some(callback);
        self
    }
    #[must_use]
    pub fn timeout_polls(mut self, polls: u32) -> Self {
        self.timeout_polls = Some(polls);
        self
    }
    #[must_use]
    pub fn build(self) -> I2cConfig {
        I2cConfig {
            cpu_clock: self.cpu_clock,
            speed: self.speed,
            own_address: self.own_address,
            internal_pullups: self.internal_pullups,
            mode: self.mode,
            trace: self.trace,
            on_complete: self.on_complete,
            timeout_polls: self.timeout_polls,
        }
    }
}

/// State of the transaction slot. Numeric values match the console's status codes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    /// Operation completed, no errors.
    Complete = 0,
    /// Transaction in flight.
    Working = 1,
    /// No slave acknowledged the address.
    NoSlaveAck = 2,
    /// Slave refused a data byte.
    SlaveDataNack = 3,
    /// Internal error: a bus event the state machine has no transition for.
    RepeatedStartInternalError = 4,
    ArbitrationLost = 5,
    BusError = 6,
}

impl Status {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Status::Working)
    }

    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Status::Complete => "I2C_COMPLETE",
            Status::Working => "I2C_WORKING",
            Status::NoSlaveAck => "I2C_NO_SLAVE_ACK",
            Status::SlaveDataNack => "I2C_SLAVE_DATA_NACK",
            Status::RepeatedStartInternalError => "I2C_REP_START",
            Status::ArbitrationLost => "I2C_MT_ARB_LOST",
            Status::BusError => "I2C_BUS_ERROR",
        }
    }

    /// Map a status onto the caller-facing result. `Working` reads as [`Error::Busy`].
    ///
    /// # Errors
    ///
    /// Every status except `Complete` maps to its [`Error`] variant.
    pub const fn into_result(self) -> Result<(), Error> {
        match self {
            Status::Complete => Ok(()),
            Status::Working => Err(Error::Busy),
            Status::NoSlaveAck => Err(Error::NoSlaveAck),
            Status::SlaveDataNack => Err(Error::SlaveDataNack),
            Status::RepeatedStartInternalError => Err(Error::Internal),
            Status::ArbitrationLost => Err(Error::ArbitrationLost),
            Status::BusError => Err(Error::Bus),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// TWSR status codes, prescaler bits masked off.
pub mod twsr {
    pub const STATUS_MASK: u8 = 0xF8;

    pub const START: u8 = 0x08;
    pub const REP_START: u8 = 0x10;
    pub const ARB_LOST: u8 = 0x38;
    // Master transmitter
    pub const MT_SLA_ACK: u8 = 0x18;
    pub const MT_SLA_NACK: u8 = 0x20;
    pub const MT_DATA_ACK: u8 = 0x28;
    pub const MT_DATA_NACK: u8 = 0x30;
    // Master receiver
    pub const MR_SLA_ACK: u8 = 0x40;
    pub const MR_SLA_NACK: u8 = 0x48;
    pub const MR_DATA_ACK: u8 = 0x50;
    pub const MR_DATA_NACK: u8 = 0x58;
    // Slave receiver
    pub const SR_SLA_ACK: u8 = 0x60;
    pub const SR_ARB_LOST_SLA_ACK: u8 = 0x68;
    pub const SR_GCALL_ACK: u8 = 0x70;
    pub const SR_ARB_LOST_GCALL_ACK: u8 = 0x78;
    pub const SR_DATA_ACK: u8 = 0x80;
    pub const SR_DATA_NACK: u8 = 0x88;
    pub const SR_GCALL_DATA_ACK: u8 = 0x90;
    pub const SR_GCALL_DATA_NACK: u8 = 0x98;
    pub const SR_STOP: u8 = 0xA0;
    // Slave transmitter
    pub const ST_SLA_ACK: u8 = 0xA8;
    pub const ST_ARB_LOST_SLA_ACK: u8 = 0xB0;
    pub const ST_DATA_ACK: u8 = 0xB8;
    pub const ST_DATA_NACK: u8 = 0xC0;
    pub const ST_LAST_DATA: u8 = 0xC8;
    // Misc
    pub const NO_INFO: u8 = 0xF8;
    pub const BUS_ERROR: u8 = 0x00;
}

/// Decoded bus event.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BusEvent {
    Start,
    RepeatedStart,
    ArbitrationLost,
    MtSlaAck,
    MtSlaNack,
    MtDataAck,
    MtDataNack,
    MrSlaAck,
    MrSlaNack,
    MrDataAck,
    MrDataNack,
    /// Any slave-receiver or slave-transmitter code.
    Slave(u8),
    NoInfo,
    BusError,
    Unknown(u8),
}

impl BusEvent {
    #[must_use]
    pub const fn from_code(code: u8) -> Self {
        match code & twsr::STATUS_MASK {
            twsr::START => BusEvent::Start,
            twsr::REP_START => BusEvent::RepeatedStart,
            twsr::ARB_LOST => BusEvent::ArbitrationLost,
            twsr::MT_SLA_ACK => BusEvent::MtSlaAck,
            twsr::MT_SLA_NACK => BusEvent::MtSlaNack,
            twsr::MT_DATA_ACK => BusEvent::MtDataAck,
            twsr::MT_DATA_NACK => BusEvent::MtDataNack,
            twsr::MR_SLA_ACK => BusEvent::MrSlaAck,
            twsr::MR_SLA_NACK => BusEvent::MrSlaNack,
            twsr::MR_DATA_ACK => BusEvent::MrDataAck,
            twsr::MR_DATA_NACK => BusEvent::MrDataNack,
            code @ twsr::SR_SLA_ACK..=twsr::ST_LAST_DATA => BusEvent::Slave(code),
            twsr::NO_INFO => BusEvent::NoInfo,
            twsr::BUS_ERROR => BusEvent::BusError,
            code => BusEvent::Unknown(code),
        }
    }
}

/// Driver error. Bus failures surface through the terminal status; the rest are
/// contract violations detected when a transaction is requested.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// A transaction is still in flight.
    Busy,
    NoSlaveAck,
    SlaveDataNack,
    ArbitrationLost,
    Bus,
    /// The state machine hit an event it has no transition for.
    Internal,
    /// Address does not fit in 7 bits.
    InvalidAddress,
    /// Transfer longer than [`MAX_TRANSFER`].
    Overflow,
    /// The configured poll budget ran out before a terminal status.
    Timeout,
    /// Operation sequence the engine cannot chain into one transaction.
    Unsupported,
}

impl embedded_hal::i2c::Error for Error {
    fn kind(&self) -> embedded_hal::i2c::ErrorKind {
        use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};
        match self {
            Error::NoSlaveAck => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address),
            Error::SlaveDataNack => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data),
            Error::ArbitrationLost => ErrorKind::ArbitrationLoss,
            Error::Bus => ErrorKind::Bus,
            Error::Overflow => ErrorKind::Overrun,
            Error::Busy
            | Error::Internal
            | Error::InvalidAddress
            | Error::Timeout
            | Error::Unsupported => ErrorKind::Other,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Error::Busy => "transaction in progress",
            Error::NoSlaveAck => "no slave acknowledged the address",
            Error::SlaveDataNack => "slave refused a data byte",
            Error::ArbitrationLost => "arbitration lost",
            Error::Bus => "bus error",
            Error::Internal => "unhandled bus event",
            Error::InvalidAddress => "slave address out of range",
            Error::Overflow => "transfer too long",
            Error::Timeout => "timed out waiting for the bus",
            Error::Unsupported => "operation sequence not supported",
        };
        f.write_str(text)
    }
}

/// Bus timing cannot be derived from the configuration.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    SpeedTooHigh,
    SpeedTooLow,
    InvalidOwnAddress,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ConfigError::SpeedTooHigh => "bus speed too high for the CPU clock",
            ConfigError::SpeedTooLow => "bus speed too low for the bit-rate divisor",
            ConfigError::InvalidOwnAddress => "own address does not fit in 7 bits",
        };
        f.write_str(text)
    }
}
