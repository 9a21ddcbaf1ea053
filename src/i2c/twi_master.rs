// Licensed under the Apache-2.0 license

//! Interrupt-driven TWI master engine.
//!
//! One [`TwiMaster`] owns one peripheral and one transaction slot. The caller arms
//! the slot with [`TwiMaster::initiate_write`] or [`TwiMaster::initiate_read`], which
//! request a start condition. From then on every bus event is fed to
//! [`TwiMaster::on_event`] (from the TWI interrupt, or from [`TwiMaster::poll`] in
//! polled mode), which is the only code that touches the slot until the status
//! turns terminal.
//!
//! A write issued with `suppress_stop` completes without releasing the bus, so the
//! next initiate on the same slave goes out as a repeated start. That is the usual
//! "set register pointer, then read" idiom of EEPROMs and RTC chips.
//!
//! ```rust,no_run
//! use twi_cmd::i2c::{I2cConfigBuilder, SimBus, SimDevice, TwiMaster};
//!
//! let bus = SimBus::new().with_device(SimDevice::new(0x50));
//! let mut twi = TwiMaster::new(bus, I2cConfigBuilder::new().build());
//! twi.init().unwrap();
//!
//! let mut data = [0u8; 4];
//! twi.blocking_write(0x50, &[0x10], true).unwrap();
//! twi.blocking_read(0x50, &mut data).unwrap();
//! ```

use core::future::poll_fn;
use core::task::Poll;

use embedded_hal::i2c::SevenBitAddress;

use crate::common::{Logger, NoOpLogger};
use crate::i2c::common::{
    twsr, BusEvent, ConfigError, Error, I2cConfig, ServiceMode, Status, TimingConfig,
    DIRECTION_READ, MAX_TRANSFER, TRACE_DEPTH,
};
use crate::i2c::traits::TwiHardware;
use crate::{log_debug, log_error};

/// One handled bus event, as kept by the debug trace.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TraceEntry {
    pub code: u8,
    pub target: u8,
    pub remaining: u8,
}

/// The transaction slot.
pub struct TransactionContext {
    target: u8,
    remaining: usize,
    cursor: usize,
    suppress_stop: bool,
    bus_held: bool,
    status: Status,
    last_event: Option<u8>,
    buffer: [u8; MAX_TRANSFER],
    trace: heapless::Vec<TraceEntry, TRACE_DEPTH>,
}

impl TransactionContext {
    const fn new() -> Self {
        Self {
            target: 0,
            remaining: 0,
            cursor: 0,
            suppress_stop: false,
            bus_held: false,
            status: Status::Complete,
            last_event: None,
            buffer: [0; MAX_TRANSFER],
            trace: heapless::Vec::new(),
        }
    }

    fn arm(&mut self, target: u8, count: usize, suppress_stop: bool) {
        self.target = target;
        self.remaining = count;
        self.cursor = 0;
        self.suppress_stop = suppress_stop;
        self.bus_held = false;
        self.last_event = None;
        self.trace.clear();
        self.status = Status::Working;
    }

    /// Address byte sent during the address phase: 7-bit address and direction bit.
    #[must_use]
    pub fn target(&self) -> u8 {
        self.target
    }

    #[must_use]
    pub fn address(&self) -> SevenBitAddress {
        self.target >> 1
    }

    #[must_use]
    pub fn is_read(&self) -> bool {
        self.target & DIRECTION_READ != 0
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    #[must_use]
    pub fn suppress_stop(&self) -> bool {
        self.suppress_stop
    }

    /// True after a write completed with its stop suppressed, until the next
    /// initiate or a stop. The peripheral keeps its last event pending meanwhile.
    #[must_use]
    pub fn bus_held(&self) -> bool {
        self.bus_held
    }

    #[must_use]
    pub fn status(&self) -> Status {
        self.status
    }

    /// Raw code of the last event the state machine handled.
    #[must_use]
    pub fn last_event(&self) -> Option<u8> {
        self.last_event
    }

    /// Events handled since the last initiate. Empty unless tracing is enabled.
    #[must_use]
    pub fn trace(&self) -> &[TraceEntry] {
        &self.trace
    }
}

pub struct TwiMaster<H: TwiHardware, L: Logger = NoOpLogger> {
    hardware: H,
    config: I2cConfig,
    logger: L,
    ctx: TransactionContext,
}

impl<H: TwiHardware> TwiMaster<H> {
    pub fn new(hardware: H, config: I2cConfig) -> Self {
        Self::with_logger(hardware, config, NoOpLogger)
    }
}

impl<H: TwiHardware, L: Logger> TwiMaster<H, L> {
    pub fn with_logger(hardware: H, config: I2cConfig, logger: L) -> Self {
        Self {
            hardware,
            config,
            logger,
            ctx: TransactionContext::new(),
        }
    }

    /// Program bus clock, own address and pullups, enable the peripheral and leave
    /// the slot idle with status `Complete`. The bus-event interrupt is enabled
    /// only in [`ServiceMode::Interrupt`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the bus speed cannot be derived from the CPU clock
    /// or the own address does not fit in 7 bits.
    pub fn init(&mut self) -> Result<(), ConfigError> {
        if self.config.own_address > 0x7F {
            return Err(ConfigError::InvalidOwnAddress);
        }
        let timing = TimingConfig::for_speed(self.config.cpu_clock, self.config.speed)?;
        self.hardware.init(
            &timing,
            self.config.own_address,
            self.config.internal_pullups,
        );
        self.ctx = TransactionContext::new();
        self.hardware
            .enable(self.config.mode == ServiceMode::Interrupt);
        log_debug!(
            self.logger,
            "twi: TWBR={} prescaler={} scl={}Hz",
            timing.bit_rate,
            timing.prescaler.factor(),
            timing.scl_frequency(self.config.cpu_clock).raw()
        );
        Ok(())
    }

    /// Start writing `bytes` to `address`. An empty slice addresses the slave only,
    /// which is how a bus scan probes for presence.
    ///
    /// With `suppress_stop` the bus stays held after the last byte so the next
    /// initiate continues the transaction with a repeated start.
    ///
    /// # Errors
    ///
    /// [`Error::Busy`] while a transaction is in flight, [`Error::InvalidAddress`]
    /// and [`Error::Overflow`] for bad arguments. Bus failures are reported later
    /// through [`TwiMaster::status`].
    pub fn initiate_write(
        &mut self,
        address: SevenBitAddress,
        bytes: &[u8],
        suppress_stop: bool,
    ) -> Result<(), Error> {
        self.check_ready(address, bytes.len())?;
        let slot = self
            .ctx
            .buffer
            .get_mut(..bytes.len())
            .ok_or(Error::Overflow)?;
        slot.copy_from_slice(bytes);
        self.ctx.arm(address << 1, bytes.len(), suppress_stop);
        self.hardware.start();
        Ok(())
    }

    /// Start reading `count` bytes from `address`. Reads always end with a stop.
    ///
    /// # Errors
    ///
    /// Same contract errors as [`TwiMaster::initiate_write`].
    pub fn initiate_read(&mut self, address: SevenBitAddress, count: usize) -> Result<(), Error> {
        self.check_ready(address, count)?;
        self.ctx.arm((address << 1) | DIRECTION_READ, count, false);
        self.hardware.start();
        Ok(())
    }

    fn check_ready(&self, address: SevenBitAddress, count: usize) -> Result<(), Error> {
        if self.is_busy() {
            return Err(Error::Busy);
        }
        if address > 0x7F {
            return Err(Error::InvalidAddress);
        }
        if count > MAX_TRANSFER {
            return Err(Error::Overflow);
        }
        Ok(())
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.ctx.status == Status::Working
    }

    #[must_use]
    pub fn status(&self) -> Status {
        self.ctx.status
    }

    #[must_use]
    pub fn context(&self) -> &TransactionContext {
        &self.ctx
    }

    #[must_use]
    pub fn config(&self) -> &I2cConfig {
        &self.config
    }

    #[must_use]
    pub fn hardware(&self) -> &H {
        &self.hardware
    }

    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.hardware
    }

    #[must_use]
    pub fn logger(&self) -> &L {
        &self.logger
    }

    /// Bytes stored by the last read. Empty after a write.
    ///
    /// # Errors
    ///
    /// [`Error::Busy`] while the transaction is still in flight; the event handler
    /// owns the buffer until then.
    pub fn received(&self) -> Result<&[u8], Error> {
        if self.is_busy() {
            return Err(Error::Busy);
        }
        if !self.ctx.is_read() {
            return Ok(&[]);
        }
        self.ctx.buffer.get(..self.ctx.cursor).ok_or(Error::Internal)
    }

    /// Non-blocking completion check. In polled mode a pending bus event is
    /// handled first.
    ///
    /// # Errors
    ///
    /// `WouldBlock` while working, `Other` with the terminal failure otherwise.
    pub fn poll(&mut self) -> nb::Result<(), Error> {
        if self.is_busy()
            && self.config.mode == ServiceMode::Polled
            && self.hardware.event_pending()
        {
            self.on_event();
        }
        match self.ctx.status.into_result() {
            Ok(()) => Ok(()),
            Err(Error::Busy) => Err(nb::Error::WouldBlock),
            Err(e) => Err(nb::Error::Other(e)),
        }
    }

    /// Spin until the transaction reaches a terminal status.
    ///
    /// If `timeout_polls` is configured and that many consecutive polls see no bus
    /// event, the bus is forced idle with [`TwiMaster::recover_bus`].
    ///
    /// # Errors
    ///
    /// The terminal failure, or [`Error::Timeout`].
    pub fn wait_blocking(&mut self) -> Result<(), Error> {
        let mut idle_polls: u32 = 0;
        loop {
            let progressed = self.hardware.event_pending();
            match self.poll() {
                Ok(()) => return Ok(()),
                Err(nb::Error::Other(e)) => return Err(e),
                Err(nb::Error::WouldBlock) => {}
            }
            if progressed {
                idle_polls = 0;
            } else {
                idle_polls = idle_polls.saturating_add(1);
            }
            if let Some(limit) = self.config.timeout_polls {
                if idle_polls >= limit {
                    log_error!(
                        self.logger,
                        "twi: no bus event after {} polls, addr {:02X}",
                        idle_polls,
                        self.ctx.address()
                    );
                    self.recover_bus();
                    return Err(Error::Timeout);
                }
            }
            core::hint::spin_loop();
        }
    }

    /// Resolves once the transaction reaches a terminal status.
    pub async fn wait(&mut self) -> Status {
        poll_fn(|cx| match self.poll() {
            Err(nb::Error::WouldBlock) => {
                cx.waker().wake_by_ref();
                Poll::Pending
            }
            _ => Poll::Ready(self.ctx.status),
        })
        .await
    }

    /// Write `bytes` and wait for the outcome.
    ///
    /// # Errors
    ///
    /// Contract errors from [`TwiMaster::initiate_write`] or the terminal failure.
    pub fn blocking_write(
        &mut self,
        address: SevenBitAddress,
        bytes: &[u8],
        suppress_stop: bool,
    ) -> Result<(), Error> {
        self.initiate_write(address, bytes, suppress_stop)?;
        self.wait_blocking()
    }

    /// Fill `buffer` from `address`. `buffer` is only written once the read
    /// completed successfully.
    ///
    /// # Errors
    ///
    /// Contract errors from [`TwiMaster::initiate_read`] or the terminal failure.
    pub fn blocking_read(
        &mut self,
        address: SevenBitAddress,
        buffer: &mut [u8],
    ) -> Result<(), Error> {
        self.initiate_read(address, buffer.len())?;
        self.wait_blocking()?;
        let data = self.received()?;
        if data.len() != buffer.len() {
            return Err(Error::Internal);
        }
        buffer.copy_from_slice(data);
        Ok(())
    }

    /// Release the bus with a stop. A transaction still in flight ends as
    /// `BusError`.
    pub fn recover_bus(&mut self) {
        self.hardware.stop();
        self.ctx.bus_held = false;
        if self.is_busy() {
            self.finish(Status::BusError);
        }
    }

    /// Protocol state machine. Call exactly once per bus event.
    pub fn on_event(&mut self) {
        let code = self.hardware.status() & twsr::STATUS_MASK;
        let event = BusEvent::from_code(code);
        self.ctx.last_event = Some(code);
        if self.config.trace {
            let entry = TraceEntry {
                code,
                target: self.ctx.target,
                remaining: u8::try_from(self.ctx.remaining).unwrap_or(u8::MAX),
            };
            // A full trace keeps the oldest entries.
            let _ = self.ctx.trace.push(entry);
        }

        if !self.is_busy() {
            self.on_idle_event(event);
            return;
        }

        let reading = self.ctx.is_read();
        match event {
            BusEvent::Start | BusEvent::RepeatedStart => {
                self.hardware.write_data(self.ctx.target);
                self.hardware.step();
            }
            BusEvent::MtSlaAck | BusEvent::MtDataAck if !reading => self.transmit_next(),
            BusEvent::MtSlaNack | BusEvent::MrSlaNack => self.fail(Status::NoSlaveAck),
            BusEvent::MtDataNack if !reading => self.fail(Status::SlaveDataNack),
            BusEvent::ArbitrationLost => {
                // The bus belongs to the other master now: no stop, drop to passive.
                self.hardware.step();
                self.finish(Status::ArbitrationLost);
            }
            BusEvent::MrSlaAck if reading => self.begin_receive(),
            BusEvent::MrDataAck | BusEvent::MrDataNack if reading => self.receive_next(),
            BusEvent::BusError => self.fail(Status::BusError),
            BusEvent::MtSlaAck
            | BusEvent::MtDataAck
            | BusEvent::MtDataNack
            | BusEvent::MrSlaAck
            | BusEvent::MrDataAck
            | BusEvent::MrDataNack
            | BusEvent::Slave(_)
            | BusEvent::NoInfo
            | BusEvent::Unknown(_) => {
                log_error!(
                    self.logger,
                    "twi: no transition for event {:02X} ({} addr {:02X})",
                    code,
                    if reading { "read" } else { "write" },
                    self.ctx.address()
                );
                self.fail(Status::RepeatedStartInternalError);
            }
        }
    }

    fn transmit_next(&mut self) {
        if self.ctx.remaining == 0 {
            if self.ctx.suppress_stop {
                // SCL stays low with the event pending until the next start.
                self.ctx.bus_held = true;
            } else {
                self.hardware.stop();
            }
            self.finish(Status::Complete);
            return;
        }
        let Some(&byte) = self.ctx.buffer.get(self.ctx.cursor) else {
            self.fail(Status::RepeatedStartInternalError);
            return;
        };
        self.hardware.write_data(byte);
        self.ctx.cursor += 1;
        self.ctx.remaining -= 1;
        self.hardware.step();
    }

    fn begin_receive(&mut self) {
        match self.ctx.remaining {
            0 => {
                self.hardware.stop();
                self.finish(Status::Complete);
            }
            // First byte is also the last: NACK it.
            1 => {
                self.hardware.set_ack(false);
                self.hardware.step();
            }
            _ => {
                self.hardware.set_ack(true);
                self.hardware.step();
            }
        }
    }

    fn receive_next(&mut self) {
        let byte = self.hardware.read_data();
        let Some(remaining) = self.ctx.remaining.checked_sub(1) else {
            self.fail(Status::RepeatedStartInternalError);
            return;
        };
        match self.ctx.buffer.get_mut(self.ctx.cursor) {
            Some(slot) => *slot = byte,
            None => {
                self.fail(Status::RepeatedStartInternalError);
                return;
            }
        }
        self.ctx.cursor += 1;
        self.ctx.remaining = remaining;

        // The ACK bit must be loaded before the byte is clocked in.
        if remaining == 1 {
            self.hardware.set_ack(false);
        }
        if remaining == 0 {
            self.hardware.stop();
            self.finish(Status::Complete);
        } else {
            self.hardware.step();
        }
    }

    fn on_idle_event(&mut self, event: BusEvent) {
        match event {
            // Re-delivery of the event that completed a held write. Acknowledging
            // it would clock the data register out again.
            BusEvent::MtSlaAck | BusEvent::MtDataAck if self.ctx.bus_held => {}
            BusEvent::BusError => {
                self.hardware.stop();
                self.ctx.bus_held = false;
            }
            BusEvent::NoInfo => {}
            BusEvent::Slave(code) => {
                log_debug!(self.logger, "twi: declining slave event {:02X}", code);
                self.hardware.set_ack(false);
                self.hardware.step();
            }
            other => {
                log_debug!(self.logger, "twi: stray event {:?} while idle", other);
                self.hardware.step();
            }
        }
    }

    fn fail(&mut self, status: Status) {
        self.hardware.stop();
        self.finish(status);
    }

    // Publishes the terminal status. Callers issue their bus action before
    // calling this, so no terminal status is visible while the hardware is
    // still being driven.
    fn finish(&mut self, status: Status) {
        self.ctx.status = status;
        if status == Status::Complete {
            log_debug!(
                self.logger,
                "twi: addr {:02X} complete, {} bytes",
                self.ctx.address(),
                self.ctx.cursor
            );
        } else {
            log_error!(
                self.logger,
                "twi: addr {:02X} {} after {} bytes",
                self.ctx.address(),
                status,
                self.ctx.cursor
            );
        }
        if let Some(callback) = self.config.on_complete {
            callback(status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::tests::RecordingLogger;
    use crate::i2c::common::I2cConfigBuilder;
    use crate::i2c::sim_bus::{BusOp, SimBus, SimDevice};
    use crate::i2c::traits::TwiHardwareCore;
    use core::future::Future;
    use hex_literal::hex;

    const EEPROM: u8 = 0x50;
    const RTC: u8 = 0x68;

    fn eeprom() -> SimDevice {
        SimDevice::new(EEPROM).with_registers(0x10, &hex!("de ad be ef"))
    }

    fn master_with(bus: SimBus, config: I2cConfig) -> TwiMaster<SimBus> {
        let mut twi = TwiMaster::new(bus, config);
        twi.init().unwrap();
        twi
    }

    fn master(bus: SimBus) -> TwiMaster<SimBus> {
        master_with(bus, I2cConfigBuilder::new().build())
    }

    fn block_on<F: Future>(fut: F) -> F::Output {
        use core::task::{Context, RawWaker, RawWakerVTable, Waker};

        fn clone(_: *const ()) -> RawWaker {
            RawWaker::new(core::ptr::null(), &VTABLE)
        }
        fn noop(_: *const ()) {}
        static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, noop, noop, noop);

        let waker = unsafe { Waker::from_raw(RawWaker::new(core::ptr::null(), &VTABLE)) };
        let mut cx = Context::from_waker(&waker);
        let mut fut = core::pin::pin!(fut);
        loop {
            if let Poll::Ready(value) = fut.as_mut().poll(&mut cx) {
                return value;
            }
        }
    }

    fn written(ops: &[BusOp]) -> Vec<u8> {
        ops.iter()
            .filter_map(|op| match op {
                BusOp::Write(byte) => Some(*byte),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn init_programs_the_peripheral_and_goes_idle() {
        let config = I2cConfigBuilder::new()
            .own_address(0x31)
            .internal_pullups(true)
            .build();
        let twi = master_with(SimBus::new(), config);

        let bus = twi.hardware();
        let timing = bus.timing().unwrap();
        assert_eq!(timing.bit_rate, 72);
        assert_eq!(bus.own_address(), 0x31);
        assert!(bus.pullups());
        assert!(!bus.interrupts_enabled());
        assert_eq!(twi.status(), Status::Complete);
        assert!(!twi.is_busy());
    }

    #[test]
    fn init_rejects_bad_configuration() {
        let config = I2cConfigBuilder::new().own_address(0x80).build();
        let mut twi = TwiMaster::new(SimBus::new(), config);
        assert_eq!(twi.init(), Err(ConfigError::InvalidOwnAddress));

        let config = I2cConfigBuilder::new()
            .cpu_clock(fugit::HertzU32::from_raw(1_000_000))
            .bus_frequency(fugit::HertzU32::from_raw(400_000))
            .build();
        let mut twi = TwiMaster::new(SimBus::new(), config);
        assert_eq!(twi.init(), Err(ConfigError::SpeedTooHigh));
        assert!(!twi.hardware().interrupts_enabled());
    }

    #[test]
    fn writes_transfer_every_byte_in_order() {
        for count in [0usize, 1, 2, 7, 64, MAX_TRANSFER] {
            let data: Vec<u8> = (0..count).map(|i| (i as u8).wrapping_mul(3)).collect();
            let mut twi = master(SimBus::new().with_device(SimDevice::new(EEPROM)));

            twi.blocking_write(EEPROM, &data, false).unwrap();

            let ops = twi.hardware().log();
            assert_eq!(ops.first(), Some(&BusOp::Start));
            assert_eq!(ops.get(1), Some(&BusOp::Address(EEPROM << 1)));
            assert_eq!(written(ops), data, "count {count}");
            assert_eq!(ops.last(), Some(&BusOp::Stop));
            assert_eq!(twi.status(), Status::Complete);
            assert_eq!(twi.context().remaining(), 0);
            assert_eq!(twi.context().cursor(), count);
        }
    }

    #[test]
    fn written_bytes_land_in_the_device() {
        let mut twi = master(SimBus::new().with_device(SimDevice::new(EEPROM)));
        twi.blocking_write(EEPROM, &hex!("20 01 02 03"), false).unwrap();
        let device = twi.hardware().device(EEPROM).unwrap();
        assert_eq!(device.register(0x20), 0x01);
        assert_eq!(device.register(0x22), 0x03);
    }

    #[test]
    fn zero_length_read_completes_on_address_ack() {
        let mut twi = master(SimBus::new().with_device(eeprom()));
        twi.blocking_read(EEPROM, &mut []).unwrap();

        assert_eq!(
            twi.hardware().log(),
            [
                BusOp::Start,
                BusOp::Address((EEPROM << 1) | 1),
                BusOp::Stop
            ]
        );
        assert_eq!(twi.received().unwrap(), &[] as &[u8]);
    }

    #[test]
    fn one_byte_read_nacks_the_only_byte() {
        let mut bus = SimBus::new().with_device(eeprom());
        bus.device_mut(EEPROM).unwrap().set_pointer(0x10);
        let mut twi = master(bus);

        let mut byte = [0u8; 1];
        twi.blocking_read(EEPROM, &mut byte).unwrap();

        assert_eq!(byte, [0xDE]);
        assert_eq!(
            twi.hardware().log(),
            [
                BusOp::Start,
                BusOp::Address((EEPROM << 1) | 1),
                BusOp::Ack(false),
                BusOp::Read {
                    byte: 0xDE,
                    acked: false
                },
                BusOp::Stop,
            ]
        );
    }

    #[test]
    fn multi_byte_read_acks_all_but_the_last_byte() {
        let mut bus = SimBus::new().with_device(eeprom());
        bus.device_mut(EEPROM).unwrap().set_pointer(0x10);
        let mut twi = master(bus);

        let mut data = [0u8; 3];
        twi.blocking_read(EEPROM, &mut data).unwrap();

        assert_eq!(data, hex!("de ad be"));
        let acks: Vec<bool> = twi
            .hardware()
            .log()
            .iter()
            .filter_map(|op| match op {
                BusOp::Read { acked, .. } => Some(*acked),
                _ => None,
            })
            .collect();
        assert_eq!(acks, [true, true, false]);
        // NACK is armed before the last byte is clocked in.
        let ops = twi.hardware().log();
        let arm = ops.iter().position(|op| *op == BusOp::Ack(false)).unwrap();
        let last = ops
            .iter()
            .position(|op| matches!(op, BusOp::Read { acked: false, .. }))
            .unwrap();
        assert!(arm < last);
    }

    #[test]
    fn missing_slave_reports_no_ack_in_both_directions() {
        let mut twi = master(SimBus::new());

        assert_eq!(twi.blocking_write(RTC, &[0x00], false), Err(Error::NoSlaveAck));
        assert_eq!(twi.status(), Status::NoSlaveAck);
        assert_eq!(twi.hardware().log().last(), Some(&BusOp::Stop));

        let mut data = [0u8; 2];
        assert_eq!(twi.blocking_read(RTC, &mut data), Err(Error::NoSlaveAck));
        assert_eq!(twi.status(), Status::NoSlaveAck);
        assert_eq!(twi.hardware().log().last(), Some(&BusOp::Stop));
    }

    #[test]
    fn busy_exactly_until_the_terminal_event() {
        let mut twi = master(SimBus::new().with_device(SimDevice::new(EEPROM)));
        assert!(!twi.is_busy());

        twi.initiate_write(EEPROM, &hex!("01 02 03"), false).unwrap();
        let mut events = 0;
        while twi.hardware().event_pending() {
            assert!(twi.is_busy());
            twi.on_event();
            events += 1;
        }
        assert!(!twi.is_busy());
        assert_eq!(twi.status(), Status::Complete);
        // start, address ack, three data acks
        assert_eq!(events, 5);
    }

    #[test]
    fn suppressed_stop_chains_write_and_read_with_repeated_start() {
        let mut twi = master(SimBus::new().with_device(eeprom()));

        twi.blocking_write(EEPROM, &[0x10], true).unwrap();
        assert!(twi.hardware().is_held());

        let mut data = [0xFFu8; 4];
        twi.blocking_read(EEPROM, &mut data).unwrap();

        assert_eq!(data, hex!("de ad be ef"));
        assert_eq!(twi.status(), Status::Complete);
        let ops = twi.hardware().log();
        let restart = ops
            .iter()
            .position(|op| *op == BusOp::RepeatedStart)
            .unwrap();
        assert!(!ops[..restart].contains(&BusOp::Stop));
        assert_eq!(ops.iter().filter(|op| **op == BusOp::Stop).count(), 1);
        assert_eq!(ops.last(), Some(&BusOp::Stop));
    }

    #[test]
    fn failed_read_leaves_the_buffer_untouched() {
        let mut twi = master(SimBus::new().with_device(eeprom()));
        let mut data = [0xAAu8; 1];

        assert_eq!(twi.blocking_read(RTC, &mut data), Err(Error::NoSlaveAck));
        assert_eq!(data, [0xAA]);
        assert_eq!(twi.status(), Status::NoSlaveAck);
    }

    #[test]
    fn arbitration_loss_releases_without_stop() {
        let mut bus = SimBus::new().with_device(SimDevice::new(EEPROM));
        // start, address ack, then the first data byte loses arbitration
        bus.inject_fault(2, twsr::ARB_LOST);
        let mut twi = master(bus);

        assert_eq!(
            twi.blocking_write(EEPROM, &hex!("01 02 03"), false),
            Err(Error::ArbitrationLost)
        );
        assert_eq!(twi.status(), Status::ArbitrationLost);
        let ops = twi.hardware().log();
        assert!(!ops.contains(&BusOp::Stop));
        assert_eq!(ops.last(), Some(&BusOp::Release));
        assert!(!twi.hardware().is_held());
    }

    #[test]
    fn slave_refusing_data_ends_with_data_nack() {
        let bus = SimBus::new().with_device(SimDevice::new(EEPROM).nack_after(1));
        let mut twi = master(bus);

        assert_eq!(
            twi.blocking_write(EEPROM, &hex!("00 11 22"), false),
            Err(Error::SlaveDataNack)
        );
        assert_eq!(twi.status(), Status::SlaveDataNack);
        assert_eq!(written(twi.hardware().log()), hex!("00 11"));
        assert_eq!(twi.context().remaining(), 1);
        assert_eq!(twi.hardware().log().last(), Some(&BusOp::Stop));
    }

    #[test]
    fn bus_error_stops_the_bus() {
        let mut bus = SimBus::new().with_device(eeprom());
        bus.inject_fault(1, twsr::BUS_ERROR);
        let mut twi = master(bus);

        let mut data = [0u8; 2];
        assert_eq!(twi.blocking_read(EEPROM, &mut data), Err(Error::Bus));
        assert_eq!(twi.status(), Status::BusError);
        assert_eq!(twi.hardware().log().last(), Some(&BusOp::Stop));
    }

    #[test]
    fn events_without_a_transition_end_as_internal_error() {
        let unexpected = [
            0xE0,              // undefined code
            twsr::NO_INFO,     // nothing to report
            twsr::SR_SLA_ACK,  // slave traffic mid-transaction
            twsr::MR_DATA_ACK, // receiver event during a write
        ];
        for code in unexpected {
            let mut bus = SimBus::new().with_device(SimDevice::new(EEPROM));
            bus.inject_fault(1, code);
            let mut twi = master(bus);

            assert_eq!(
                twi.blocking_write(EEPROM, &[0x01], false),
                Err(Error::Internal),
                "code {code:02X}"
            );
            assert_eq!(twi.status(), Status::RepeatedStartInternalError);
            assert_eq!(twi.context().last_event(), Some(code));
            assert_eq!(twi.hardware().log().last(), Some(&BusOp::Stop));
        }
    }

    #[test]
    fn transmitter_event_during_a_read_is_an_internal_error() {
        let mut bus = SimBus::new().with_device(eeprom());
        bus.inject_fault(1, twsr::MT_DATA_NACK);
        let mut twi = master(bus);

        let mut data = [0u8; 2];
        assert_eq!(twi.blocking_read(EEPROM, &mut data), Err(Error::Internal));
        assert_eq!(twi.status(), Status::RepeatedStartInternalError);
        assert_eq!(data, [0, 0]);
    }

    #[test]
    fn initiate_while_working_is_rejected() {
        let mut twi = master(SimBus::new().with_device(eeprom()));

        twi.initiate_write(EEPROM, &[0x10, 0x20], false).unwrap();
        assert_eq!(twi.initiate_read(EEPROM, 4), Err(Error::Busy));
        assert_eq!(twi.initiate_write(RTC, &[], false), Err(Error::Busy));
        assert_eq!(twi.received(), Err(Error::Busy));

        // The in-flight write is unaffected.
        assert!(!twi.context().is_read());
        assert_eq!(twi.context().address(), EEPROM);
        twi.wait_blocking().unwrap();
        assert_eq!(written(twi.hardware().log()), [0x10, 0x20]);
    }

    #[test]
    fn argument_errors_do_not_touch_the_bus() {
        let mut twi = master(SimBus::new());
        assert_eq!(twi.initiate_read(0x80, 1), Err(Error::InvalidAddress));
        assert_eq!(
            twi.initiate_write(EEPROM, &[0u8; MAX_TRANSFER + 1], false),
            Err(Error::Overflow)
        );
        assert_eq!(
            twi.initiate_read(EEPROM, MAX_TRANSFER + 1),
            Err(Error::Overflow)
        );
        assert!(twi.hardware().log().is_empty());
        assert_eq!(twi.status(), Status::Complete);
    }

    #[test]
    fn stalled_bus_times_out_and_recovers() {
        let mut bus = SimBus::new().with_device(SimDevice::new(EEPROM));
        bus.stall(true);
        let config = I2cConfigBuilder::new().timeout_polls(10).build();
        let mut twi = master_with(bus, config);

        assert_eq!(twi.blocking_write(EEPROM, &[0x01], false), Err(Error::Timeout));
        assert_eq!(twi.status(), Status::BusError);
        assert_eq!(twi.hardware().log().last(), Some(&BusOp::Stop));

        twi.hardware_mut().stall(false);
        twi.blocking_write(EEPROM, &[0x01], false).unwrap();
    }

    #[test]
    fn interrupt_mode_leaves_events_to_the_handler() {
        let config = I2cConfigBuilder::new()
            .mode(ServiceMode::Interrupt)
            .build();
        let mut twi = master_with(SimBus::new().with_device(SimDevice::new(EEPROM)), config);
        assert!(twi.hardware().interrupts_enabled());

        twi.initiate_write(EEPROM, &[0x42], false).unwrap();
        assert_eq!(twi.poll(), Err(nb::Error::WouldBlock));
        assert!(twi.hardware().event_pending());

        while twi.hardware().event_pending() {
            twi.on_event();
        }
        assert_eq!(twi.poll(), Ok(()));
    }

    #[test]
    fn interrupt_mode_holds_the_bus_between_chained_transactions() {
        let config = I2cConfigBuilder::new()
            .mode(ServiceMode::Interrupt)
            .build();
        let mut twi = master_with(SimBus::new().with_device(eeprom()), config);

        twi.initiate_write(EEPROM, &[0x10], true).unwrap();
        while twi.is_busy() {
            assert!(twi.hardware().event_pending());
            twi.on_event();
        }
        assert_eq!(twi.status(), Status::Complete);
        assert!(twi.context().bus_held());

        // The completing event stays pending, so the handler runs again.
        for _ in 0..4 {
            assert!(twi.hardware().event_pending());
            twi.on_event();
        }
        assert!(twi.hardware().is_held());
        assert_eq!(written(twi.hardware().log()), [0x10]);
        assert_eq!(twi.hardware().device(EEPROM).unwrap().register(0x10), 0xDE);

        twi.initiate_read(EEPROM, 4).unwrap();
        assert!(!twi.context().bus_held());
        while twi.hardware().event_pending() {
            twi.on_event();
        }
        assert_eq!(twi.status(), Status::Complete);
        assert_eq!(twi.received().unwrap(), hex!("de ad be ef"));

        let ops = twi.hardware().log();
        let restart = ops
            .iter()
            .position(|op| *op == BusOp::RepeatedStart)
            .unwrap();
        assert_eq!(written(&ops[..restart]), [0x10]);
        assert!(!ops[..restart].contains(&BusOp::Stop));
        assert_eq!(ops.last(), Some(&BusOp::Stop));
    }

    #[test]
    fn trace_records_handled_events_when_enabled() {
        let config = I2cConfigBuilder::new().trace(true).build();
        let mut twi = master_with(SimBus::new().with_device(SimDevice::new(EEPROM)), config);

        twi.blocking_write(EEPROM, &[0x07], false).unwrap();
        let codes: Vec<u8> = twi.context().trace().iter().map(|e| e.code).collect();
        assert_eq!(codes, [twsr::START, twsr::MT_SLA_ACK, twsr::MT_DATA_ACK]);
        assert_eq!(twi.context().trace()[1].remaining, 1);

        twi.blocking_write(EEPROM, &[], false).unwrap();
        assert_eq!(twi.context().trace().len(), 2);

        let mut quiet = master(SimBus::new().with_device(SimDevice::new(EEPROM)));
        quiet.blocking_write(EEPROM, &[0x07], false).unwrap();
        assert!(quiet.context().trace().is_empty());
    }

    #[test]
    fn completion_callback_sees_every_terminal_status() {
        use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

        static CALLS: AtomicUsize = AtomicUsize::new(0);
        static LAST: AtomicU8 = AtomicU8::new(0xFF);
        fn on_complete(status: Status) {
            CALLS.fetch_add(1, Ordering::SeqCst);
            LAST.store(status.code(), Ordering::SeqCst);
        }

        let config = I2cConfigBuilder::new().on_complete(on_complete).build();
        let mut twi = master_with(SimBus::new().with_device(SimDevice::new(EEPROM)), config);

        twi.blocking_write(EEPROM, &[0x01], false).unwrap();
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
        assert_eq!(LAST.load(Ordering::SeqCst), Status::Complete.code());

        let _ = twi.blocking_write(RTC, &[0x01], false);
        assert_eq!(CALLS.load(Ordering::SeqCst), 2);
        assert_eq!(LAST.load(Ordering::SeqCst), Status::NoSlaveAck.code());
    }

    #[test]
    fn async_wait_resolves_to_the_terminal_status() {
        let mut twi = master(SimBus::new().with_device(eeprom()));
        twi.initiate_write(EEPROM, &[0x10], true).unwrap();
        assert_eq!(block_on(twi.wait()), Status::Complete);

        twi.initiate_read(EEPROM, 2).unwrap();
        assert_eq!(block_on(twi.wait()), Status::Complete);
        assert_eq!(twi.received().unwrap(), hex!("de ad"));

        twi.initiate_read(RTC, 2).unwrap();
        assert_eq!(block_on(twi.wait()), Status::NoSlaveAck);
    }

    #[test]
    fn slave_events_after_arbitration_loss_are_declined() {
        let mut bus = SimBus::new().with_device(SimDevice::new(EEPROM));
        bus.inject_fault(1, twsr::ARB_LOST);
        let mut twi = master(bus);
        let _ = twi.blocking_write(EEPROM, &[0x01], false);
        assert_eq!(twi.status(), Status::ArbitrationLost);

        twi.hardware_mut().raise_event(twsr::SR_ARB_LOST_SLA_ACK);
        twi.on_event();

        assert_eq!(twi.status(), Status::ArbitrationLost);
        assert!(!twi.hardware().event_pending());
        assert_eq!(twi.hardware().log().last(), Some(&BusOp::Ack(false)));
    }

    #[test]
    fn failures_are_logged() {
        let mut twi = TwiMaster::with_logger(
            SimBus::new(),
            I2cConfigBuilder::new().build(),
            RecordingLogger::default(),
        );
        twi.init().unwrap();
        let _ = twi.blocking_read(RTC, &mut [0u8; 1]);

        let logger = twi.logger();
        assert!(logger.debug.iter().any(|m| m.contains("TWBR=72")));
        assert!(logger
            .error
            .iter()
            .any(|m| m.contains("68") && m.contains("I2C_NO_SLAVE_ACK")));
    }
}
