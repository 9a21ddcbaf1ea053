// Licensed under the Apache-2.0 license

//! Simulated TWI peripheral with register-style slave devices.
//!
//! `SimBus` answers the engine's bus actions the way the ATmega328P TWI block
//! does: every action that acknowledges an event produces the next status code,
//! and `stop` produces none. Each action is also appended to a [`BusOp`] log so
//! tests and the host console can see exactly what went out on the wire.
//!
//! Devices behave like 24Cxx EEPROMs or DS1307 RTCs: the first byte of a write
//! sets the register pointer, further bytes are stored with auto-increment, and
//! reads return registers from the pointer on.

use embedded_hal::i2c::SevenBitAddress;

use crate::i2c::common::{twsr, TimingConfig, DIRECTION_READ};
use crate::i2c::traits::{TwiBusControl, TwiHardwareCore};

pub const MAX_DEVICES: usize = 8;
pub const LOG_DEPTH: usize = 1024;

/// One observable action on the wire.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BusOp {
    Start,
    RepeatedStart,
    /// Address byte, direction bit included.
    Address(u8),
    Write(u8),
    Read { byte: u8, acked: bool },
    /// Master changed its acknowledge setting.
    Ack(bool),
    Stop,
    /// Master dropped off the bus after losing arbitration.
    Release,
}

pub struct SimDevice {
    address: SevenBitAddress,
    registers: [u8; 256],
    pointer: u8,
    pointer_loaded: bool,
    accept_limit: Option<usize>,
    accepted: usize,
}

impl SimDevice {
    #[must_use]
    pub fn new(address: SevenBitAddress) -> Self {
        Self {
            address,
            registers: [0xFF; 256],
            pointer: 0,
            pointer_loaded: false,
            accept_limit: None,
            accepted: 0,
        }
    }

    /// Preload registers starting at `start`. Wraps at the end of the map.
    #[must_use]
    pub fn with_registers(mut self, start: u8, values: &[u8]) -> Self {
        let mut reg = start;
        for value in values {
            if let Some(slot) = self.registers.get_mut(usize::from(reg)) {
                *slot = *value;
            }
            reg = reg.wrapping_add(1);
        }
        self
    }

    /// Refuse every data byte after the first `count` of a write.
    #[must_use]
    pub fn nack_after(mut self, count: usize) -> Self {
        self.accept_limit = Some(count);
        self
    }

    #[must_use]
    pub fn address(&self) -> SevenBitAddress {
        self.address
    }

    #[must_use]
    pub fn register(&self, reg: u8) -> u8 {
        self.registers.get(usize::from(reg)).copied().unwrap_or(0xFF)
    }

    #[must_use]
    pub fn pointer(&self) -> u8 {
        self.pointer
    }

    pub fn set_pointer(&mut self, reg: u8) {
        self.pointer = reg;
    }

    fn begin_write(&mut self) {
        self.pointer_loaded = false;
        self.accepted = 0;
    }

    fn write(&mut self, byte: u8) -> bool {
        if self.accept_limit.is_some_and(|limit| self.accepted >= limit) {
            return false;
        }
        self.accepted += 1;
        if self.pointer_loaded {
            if let Some(slot) = self.registers.get_mut(usize::from(self.pointer)) {
                *slot = byte;
            }
            self.pointer = self.pointer.wrapping_add(1);
        } else {
            self.pointer = byte;
            self.pointer_loaded = true;
        }
        true
    }

    fn read(&mut self) -> u8 {
        let byte = self.register(self.pointer);
        self.pointer = self.pointer.wrapping_add(1);
        byte
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    Addressing,
    Transmit(usize),
    Receive(usize),
    Rejected,
    Lost,
    Faulted,
}

pub struct SimBus {
    devices: heapless::Vec<SimDevice, MAX_DEVICES>,
    phase: Phase,
    data: u8,
    ack: bool,
    pending: Option<u8>,
    log: heapless::Vec<BusOp, LOG_DEPTH>,
    fault: Option<(usize, u8)>,
    stalled: bool,
    timing: Option<TimingConfig>,
    own_address: SevenBitAddress,
    pullups: bool,
    interrupts: bool,
}

impl Default for SimBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SimBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            devices: heapless::Vec::new(),
            phase: Phase::Idle,
            data: 0,
            ack: false,
            pending: None,
            log: heapless::Vec::new(),
            fault: None,
            stalled: false,
            timing: None,
            own_address: 0,
            pullups: false,
            interrupts: false,
        }
    }

    /// Attach `device`. Devices beyond [`MAX_DEVICES`] are ignored.
    #[must_use]
    pub fn with_device(mut self, device: SimDevice) -> Self {
        let _ = self.attach(device);
        self
    }

    /// # Errors
    ///
    /// Hands the device back when the bus is full.
    pub fn attach(&mut self, device: SimDevice) -> Result<(), SimDevice> {
        self.devices.push(device)
    }

    #[must_use]
    pub fn device(&self, address: SevenBitAddress) -> Option<&SimDevice> {
        self.devices.iter().find(|d| d.address == address)
    }

    pub fn device_mut(&mut self, address: SevenBitAddress) -> Option<&mut SimDevice> {
        self.devices.iter_mut().find(|d| d.address == address)
    }

    /// Wire actions since init or the last [`SimBus::clear_log`]. The oldest
    /// [`LOG_DEPTH`] actions are kept.
    #[must_use]
    pub fn log(&self) -> &[BusOp] {
        &self.log
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    /// Replace the event raised `after_events` events from now with `code`.
    /// `ARB_LOST` and `BUS_ERROR` also put the bus into the matching state.
    pub fn inject_fault(&mut self, after_events: usize, code: u8) {
        self.fault = Some((after_events, code));
    }

    /// While stalled, actions complete on the wire but raise no event.
    pub fn stall(&mut self, stalled: bool) {
        self.stalled = stalled;
    }

    /// Raise an unsolicited event, such as being addressed as a slave.
    pub fn raise_event(&mut self, code: u8) {
        self.pending = Some(code);
    }

    /// True while the master still owns the bus.
    #[must_use]
    pub fn is_held(&self) -> bool {
        matches!(
            self.phase,
            Phase::Addressing | Phase::Transmit(_) | Phase::Receive(_) | Phase::Rejected
        )
    }

    #[must_use]
    pub fn timing(&self) -> Option<TimingConfig> {
        self.timing
    }

    #[must_use]
    pub fn own_address(&self) -> SevenBitAddress {
        self.own_address
    }

    #[must_use]
    pub fn pullups(&self) -> bool {
        self.pullups
    }

    #[must_use]
    pub fn interrupts_enabled(&self) -> bool {
        self.interrupts
    }

    fn record(&mut self, op: BusOp) {
        let _ = self.log.push(op);
    }

    fn raise(&mut self, code: u8) {
        let code = match self.fault {
            Some((0, injected)) => {
                self.fault = None;
                match injected {
                    twsr::ARB_LOST => self.phase = Phase::Lost,
                    twsr::BUS_ERROR => self.phase = Phase::Faulted,
                    _ => {}
                }
                injected
            }
            Some((after, injected)) => {
                self.fault = Some((after - 1, injected));
                code
            }
            None => code,
        };
        if !self.stalled {
            self.pending = Some(code);
        }
    }

    fn address_slave(&mut self) {
        let target = self.data;
        self.record(BusOp::Address(target));
        let reading = target & DIRECTION_READ != 0;
        let found = self.devices.iter().position(|d| d.address == target >> 1);
        match (found, reading) {
            (Some(index), false) => {
                if let Some(device) = self.devices.get_mut(index) {
                    device.begin_write();
                }
                self.phase = Phase::Transmit(index);
                self.raise(twsr::MT_SLA_ACK);
            }
            (Some(index), true) => {
                self.phase = Phase::Receive(index);
                self.raise(twsr::MR_SLA_ACK);
            }
            (None, false) => {
                self.phase = Phase::Rejected;
                self.raise(twsr::MT_SLA_NACK);
            }
            (None, true) => {
                self.phase = Phase::Rejected;
                self.raise(twsr::MR_SLA_NACK);
            }
        }
    }
}

impl TwiHardwareCore for SimBus {
    fn init(&mut self, timing: &TimingConfig, own_address: SevenBitAddress, pullups: bool) {
        self.timing = Some(*timing);
        self.own_address = own_address;
        self.pullups = pullups;
        self.ack = false;
        self.phase = Phase::Idle;
        self.pending = None;
        self.log.clear();
    }

    fn enable(&mut self, interrupt: bool) {
        self.interrupts = interrupt;
    }

    fn event_pending(&self) -> bool {
        self.pending.is_some()
    }
}

impl TwiBusControl for SimBus {
    fn start(&mut self) {
        self.pending = None;
        let repeated = self.is_held();
        self.record(if repeated {
            BusOp::RepeatedStart
        } else {
            BusOp::Start
        });
        self.phase = Phase::Addressing;
        self.raise(if repeated {
            twsr::REP_START
        } else {
            twsr::START
        });
    }

    fn stop(&mut self) {
        self.pending = None;
        self.record(BusOp::Stop);
        self.phase = Phase::Idle;
    }

    fn step(&mut self) {
        self.pending = None;
        match self.phase {
            Phase::Addressing => self.address_slave(),
            Phase::Transmit(index) => {
                let byte = self.data;
                self.record(BusOp::Write(byte));
                let acked = self
                    .devices
                    .get_mut(index)
                    .is_some_and(|device| device.write(byte));
                self.raise(if acked {
                    twsr::MT_DATA_ACK
                } else {
                    twsr::MT_DATA_NACK
                });
            }
            Phase::Receive(index) => {
                let byte = self.devices.get_mut(index).map_or(0xFF, SimDevice::read);
                self.data = byte;
                let acked = self.ack;
                self.record(BusOp::Read { byte, acked });
                self.raise(if acked {
                    twsr::MR_DATA_ACK
                } else {
                    twsr::MR_DATA_NACK
                });
            }
            Phase::Lost => {
                self.record(BusOp::Release);
                self.phase = Phase::Idle;
            }
            Phase::Idle | Phase::Rejected | Phase::Faulted => {}
        }
    }

    fn status(&self) -> u8 {
        self.pending.unwrap_or(twsr::NO_INFO)
    }

    fn read_data(&self) -> u8 {
        self.data
    }

    fn write_data(&mut self, byte: u8) {
        self.data = byte;
    }

    fn set_ack(&mut self, enabled: bool) {
        self.ack = enabled;
        self.record(BusOp::Ack(enabled));
    }
}
