// Licensed under the Apache-2.0 license

//! ATmega328P TWI peripheral.
//!
//! Register access goes through [`RegisterAccess`] so the same driver runs on
//! the chip via [`MmioRegisters`] and against a plain register file in tests.
//! Addresses are data-space addresses (the memory-mapped view, not I/O space).

use embedded_hal::i2c::SevenBitAddress;

use crate::i2c::common::{twsr, TimingConfig};
use crate::i2c::traits::{TwiBusControl, TwiHardwareCore};

/// Data-space register addresses.
pub mod reg {
    pub const PORTC: u16 = 0x28;
    pub const MCUCR: u16 = 0x55;
    pub const PRR: u16 = 0x64;
    pub const TWBR: u16 = 0xB8;
    pub const TWSR: u16 = 0xB9;
    pub const TWAR: u16 = 0xBA;
    pub const TWDR: u16 = 0xBB;
    pub const TWCR: u16 = 0xBC;
}

/// TWCR bits.
pub mod twcr {
    pub const TWINT: u8 = 1 << 7;
    pub const TWEA: u8 = 1 << 6;
    pub const TWSTA: u8 = 1 << 5;
    pub const TWSTO: u8 = 1 << 4;
    pub const TWEN: u8 = 1 << 2;
    pub const TWIE: u8 = 1 << 0;
}

const PRR_TWI: u8 = 1 << 7;
const MCUCR_PUD: u8 = 1 << 4;
const PORTC_SDA: u8 = 1 << 4;
const PORTC_SCL: u8 = 1 << 5;
const TWSR_PRESCALER: u8 = 0x03;

pub trait RegisterAccess {
    fn read(&self, addr: u16) -> u8;
    fn write(&mut self, addr: u16, value: u8);

    fn modify(&mut self, addr: u16, f: impl FnOnce(u8) -> u8) {
        let value = self.read(addr);
        self.write(addr, f(value));
    }
}

/// Volatile access to the on-chip registers.
pub struct MmioRegisters {
    _private: (),
}

impl MmioRegisters {
    /// # Safety
    ///
    /// Must run on an ATmega328P, and nothing else may drive the TWI block or
    /// the PORTC pull-up bits for SDA and SCL.
    #[must_use]
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl RegisterAccess for MmioRegisters {
    fn read(&self, addr: u16) -> u8 {
        // SAFETY: fixed I/O register addresses on the target; see `new`.
        unsafe { core::ptr::read_volatile(usize::from(addr) as *const u8) }
    }

    fn write(&mut self, addr: u16, value: u8) {
        // SAFETY: fixed I/O register addresses on the target; see `new`.
        unsafe { core::ptr::write_volatile(usize::from(addr) as *mut u8, value) }
    }
}

pub struct AvrTwi<R: RegisterAccess> {
    regs: R,
}

impl<R: RegisterAccess> AvrTwi<R> {
    pub fn new(regs: R) -> Self {
        Self { regs }
    }

    pub fn registers(&self) -> &R {
        &self.regs
    }

    pub fn registers_mut(&mut self) -> &mut R {
        &mut self.regs
    }
}

impl<R: RegisterAccess> TwiHardwareCore for AvrTwi<R> {
    fn init(&mut self, timing: &TimingConfig, own_address: SevenBitAddress, pullups: bool) {
        self.regs.modify(reg::PRR, |v| v & !PRR_TWI);
        if pullups {
            self.regs.modify(reg::MCUCR, |v| v & !MCUCR_PUD);
            self.regs.modify(reg::PORTC, |v| v | PORTC_SDA | PORTC_SCL);
        } else {
            self.regs.modify(reg::PORTC, |v| v & !(PORTC_SDA | PORTC_SCL));
        }
        self.regs.modify(reg::TWSR, |v| {
            (v & !TWSR_PRESCALER) | timing.prescaler.bits()
        });
        self.regs.write(reg::TWBR, timing.bit_rate);
        self.regs.write(reg::TWAR, own_address << 1);
        self.regs
            .modify(reg::TWCR, |v| v & !(twcr::TWEA | twcr::TWINT));
    }

    fn enable(&mut self, interrupt: bool) {
        self.regs.modify(reg::TWCR, |v| {
            let v = (v & !(twcr::TWINT | twcr::TWIE)) | twcr::TWEN;
            if interrupt {
                v | twcr::TWIE
            } else {
                v
            }
        });
    }

    fn event_pending(&self) -> bool {
        self.regs.read(reg::TWCR) & twcr::TWINT != 0
    }
}

// TWINT is cleared by writing a one; every action below that writes it
// acknowledges the pending event.
impl<R: RegisterAccess> TwiBusControl for AvrTwi<R> {
    fn start(&mut self) {
        self.regs.modify(reg::TWCR, |v| {
            (v & !twcr::TWSTO) | twcr::TWINT | twcr::TWSTA
        });
    }

    fn stop(&mut self) {
        self.regs.modify(reg::TWCR, |v| {
            (v & !twcr::TWSTA) | twcr::TWINT | twcr::TWSTO
        });
    }

    fn step(&mut self) {
        self.regs.modify(reg::TWCR, |v| {
            (v & !(twcr::TWSTA | twcr::TWSTO)) | twcr::TWINT
        });
    }

    fn status(&self) -> u8 {
        self.regs.read(reg::TWSR) & twsr::STATUS_MASK
    }

    fn read_data(&self) -> u8 {
        self.regs.read(reg::TWDR)
    }

    fn write_data(&mut self, byte: u8) {
        self.regs.write(reg::TWDR, byte);
    }

    fn set_ack(&mut self, enabled: bool) {
        self.regs.modify(reg::TWCR, |v| {
            let v = v & !twcr::TWINT;
            if enabled {
                v | twcr::TWEA
            } else {
                v & !twcr::TWEA
            }
        });
    }
}
