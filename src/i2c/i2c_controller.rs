// Licensed under the Apache-2.0 license

//! embedded-hal front end for the TWI master engine.
//!
//! Lets generic device drivers written against `embedded_hal::i2c::I2c` run on
//! top of [`TwiMaster`]. Every call blocks until the engine reaches a terminal
//! status.

use crate::common::{Logger, NoOpLogger};
use crate::i2c::common::{Error, MAX_TRANSFER};
use crate::i2c::traits::TwiHardware;
use crate::i2c::twi_master::TwiMaster;
use embedded_hal::i2c::{Operation, SevenBitAddress};

pub struct I2cController<H: TwiHardware, L: Logger = NoOpLogger> {
    pub master: TwiMaster<H, L>,
}

impl<H: TwiHardware, L: Logger> I2cController<H, L> {
    pub fn new(master: TwiMaster<H, L>) -> Self {
        Self { master }
    }

    pub fn into_inner(self) -> TwiMaster<H, L> {
        self.master
    }
}

impl<H: TwiHardware, L: Logger> embedded_hal::i2c::ErrorType for I2cController<H, L> {
    type Error = Error;
}

impl<H: TwiHardware, L: Logger> embedded_hal::i2c::I2c for I2cController<H, L> {
    fn read(&mut self, addr: SevenBitAddress, buffer: &mut [u8]) -> Result<(), Self::Error> {
        self.master.blocking_read(addr, buffer)
    }

    fn write(&mut self, addr: SevenBitAddress, bytes: &[u8]) -> Result<(), Self::Error> {
        self.master.blocking_write(addr, bytes, false)
    }

    fn write_read(
        &mut self,
        addr: SevenBitAddress,
        bytes: &[u8],
        buffer: &mut [u8],
    ) -> Result<(), Self::Error> {
        self.master.blocking_write(addr, bytes, true)?;
        self.master.blocking_read(addr, buffer)
    }

    /// Adjacent operations of the same kind are merged into one transfer. The
    /// engine can chain writes into reads with a repeated start, but a read is
    /// always its transaction's last phase, so a write after a read is
    /// [`Error::Unsupported`].
    fn transaction(
        &mut self,
        addr: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        if operations.is_empty() {
            return Ok(());
        }
        let split = operations
            .iter()
            .position(|op| matches!(op, Operation::Read(_)))
            .unwrap_or(operations.len());
        let (writes, reads) = operations.split_at_mut(split);
        if reads.iter().any(|op| matches!(op, Operation::Write(_))) {
            return Err(Error::Unsupported);
        }

        let mut outgoing = heapless::Vec::<u8, MAX_TRANSFER>::new();
        for op in writes.iter() {
            if let Operation::Write(bytes) = op {
                outgoing
                    .extend_from_slice(bytes)
                    .map_err(|_| Error::Overflow)?;
            }
        }
        if reads.is_empty() {
            return self.master.blocking_write(addr, &outgoing, false);
        }
        if !writes.is_empty() {
            self.master.blocking_write(addr, &outgoing, true)?;
        }

        let total: usize = reads
            .iter()
            .map(|op| match op {
                Operation::Read(buffer) => buffer.len(),
                Operation::Write(_) => 0,
            })
            .sum();
        self.master.initiate_read(addr, total)?;
        self.master.wait_blocking()?;

        let mut incoming = self.master.received()?;
        for op in reads.iter_mut() {
            if let Operation::Read(buffer) = op {
                let (head, tail) = incoming
                    .split_at_checked(buffer.len())
                    .ok_or(Error::Internal)?;
                buffer.copy_from_slice(head);
                incoming = tail;
            }
        }
        Ok(())
    }
}
