//! PCA9685 16-channel, 12-bit PWM controller over I2C
//!
//! Every register access has two framings. A single-register write goes out
//! as a plain `[reg, value]` write and falls back to an addressed write
//! (register byte, then payload, in one transaction). Channel writes use the
//! addressed block write first and fall back to the plain 5-byte write.
//! Some I2C controllers and level shifters reject one framing but not the
//! other.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{Error as _, I2c, Operation};
use heapless::Vec;

use crate::config::pwm;
use crate::error::{Error, InitStep};

/// Register map
pub mod regs {
    pub const MODE1: u8 = 0x00;
    pub const MODE2: u8 = 0x01;
    /// First channel register; channel `n` starts at `LED0_ON_L + 4 * n`
    pub const LED0_ON_L: u8 = 0x06;
    pub const PRESCALE: u8 = 0xFE;
}

/// MODE1 bits
pub mod mode1 {
    pub const RESTART: u8 = 0x80;
    /// Register auto-increment
    pub const AI: u8 = 0x20;
    pub const SLEEP: u8 = 0x10;
    pub const ALLCALL: u8 = 0x01;
}

/// MODE2 bits
pub mod mode2 {
    /// Totem-pole outputs
    pub const OUTDRV: u8 = 0x04;
}

pub const CHANNELS: u8 = 16;

/// Upper bound on controllers reported by [`discover`]
pub const MAX_DEVICES: usize = 16;

/// Oscillator settling time after clearing SLEEP [us]
const OSC_SETTLE_US: u32 = 500;

/// A PWM output stage that the actuator layer writes channel duty cycles to.
pub trait PwmOutput {
    /// Set the on/off ticks of one channel
    ///
    /// # Arguments
    /// * `channel` - Output channel (0-15)
    /// * `on` - Tick at which the output goes high (0-4095)
    /// * `off` - Tick at which the output goes low (0-4095)
    fn set_pwm(&mut self, channel: u8, on: u16, off: u16) -> Result<(), Error>;
}

impl<T: PwmOutput + ?Sized> PwmOutput for &mut T {
    fn set_pwm(&mut self, channel: u8, on: u16, off: u16) -> Result<(), Error> {
        (**self).set_pwm(channel, on, off)
    }
}

fn bus_error<E: embedded_hal::i2c::Error>(e: E) -> Error {
    Error::I2c(e.kind())
}

/// Prescaler value for an output frequency
///
/// The frequency is clamped to the range the controller supports (24-1526 Hz).
pub fn prescale_for(freq_hz: f32) -> u8 {
    let freq = freq_hz.clamp(pwm::MIN_FREQUENCY_HZ, pwm::MAX_FREQUENCY_HZ);
    let prescale = pwm::OSCILLATOR_HZ / (pwm::COUNTS as f32 * freq) - 1.0;
    libm::roundf(prescale) as u8
}

fn write_reg<I2C: I2c>(i2c: &mut I2C, address: u8, reg: u8, value: u8) -> Result<(), Error> {
    if let Err(e) = i2c.write(address, &[reg, value]) {
        debug!(
            "PCA9685 {:#x}: write reg {:#x} failed ({:?}), retrying addressed",
            address,
            reg,
            e.kind()
        );
        i2c.transaction(
            address,
            &mut [Operation::Write(&[reg]), Operation::Write(&[value])],
        )
        .map_err(bus_error)?;
    }
    Ok(())
}

fn read_reg<I2C: I2c>(i2c: &mut I2C, address: u8, reg: u8) -> Result<u8, Error> {
    let mut buf = [0u8; 1];
    if let Err(e) = i2c.write_read(address, &[reg], &mut buf) {
        debug!(
            "PCA9685 {:#x}: read reg {:#x} failed ({:?}), retrying split",
            address,
            reg,
            e.kind()
        );
        i2c.write(address, &[reg]).map_err(bus_error)?;
        i2c.read(address, &mut buf).map_err(bus_error)?;
    }
    Ok(buf[0])
}

/// One PCA9685 at a fixed 7-bit address
pub struct Pca9685<I2C> {
    i2c: I2C,
    address: u8,
}

impl<I2C: I2c> Pca9685<I2C> {
    pub fn new(i2c: I2C, address: u8) -> Self {
        Self { i2c, address }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Give the bus back
    pub fn release(self) -> I2C {
        self.i2c
    }

    pub fn write_register(&mut self, reg: u8, value: u8) -> Result<(), Error> {
        write_reg(&mut self.i2c, self.address, reg, value)
    }

    pub fn read_register(&mut self, reg: u8) -> Result<u8, Error> {
        read_reg(&mut self.i2c, self.address, reg)
    }

    /// Bring the controller up at 50 Hz with totem-pole outputs
    ///
    /// Sleep, prescaler and wake are mandatory: a failure aborts with
    /// [`Error::DeviceInit`] naming the step. The MODE2 read-back and
    /// OUTDRV write are best effort; their failures are only logged.
    pub fn init<D: DelayNs>(&mut self, delay: &mut D) -> Result<(), Error> {
        let address = self.address;
        info!("PCA9685 {:#x}: init", address);

        let steps = [
            (regs::MODE1, mode1::SLEEP | mode1::AI | mode1::ALLCALL, InitStep::Sleep),
            (regs::PRESCALE, pwm::INIT_PRESCALE, InitStep::Prescale),
            (regs::MODE1, mode1::AI | mode1::ALLCALL, InitStep::Wake),
        ];
        for (reg, value, step) in steps {
            if let Err(e) = self.write_register(reg, value) {
                error!("PCA9685 {:#x}: init step {:?} failed: {:?}", address, step, e);
                return Err(Error::DeviceInit(step));
            }
        }
        delay.delay_us(OSC_SETTLE_US);

        match self.read_register(regs::MODE2) {
            Ok(mode2) => info!("PCA9685 {:#x}: MODE2 = {:#x}", address, mode2),
            Err(e) => warn!("PCA9685 {:#x}: MODE2 read failed: {:?}", address, e),
        }

        if let Err(e) = self.write_register(regs::MODE2, mode2::OUTDRV) {
            warn!(
                "PCA9685 {:#x}: MODE2 write failed: {:?}, continuing with PWM writes",
                address, e
            );
        }

        Ok(())
    }

    /// Write the on/off ticks of one channel
    ///
    /// # Arguments
    /// * `channel` - Output channel (0-15)
    /// * `on` - Tick at which the output goes high (0-4095)
    /// * `off` - Tick at which the output goes low (0-4095)
    ///
    /// # Returns
    /// * `Err(InvalidRange)` without bus traffic for a bad channel or tick
    /// * `Err(I2c)` when both framings fail
    pub fn set_pwm(&mut self, channel: u8, on: u16, off: u16) -> Result<(), Error> {
        if channel >= CHANNELS || on > pwm::MAX_TICK || off > pwm::MAX_TICK {
            return Err(Error::InvalidRange);
        }

        let reg = regs::LED0_ON_L + 4 * channel;
        let [on_l, on_h] = on.to_le_bytes();
        let [off_l, off_h] = off.to_le_bytes();
        let data = [on_l, on_h, off_l, off_h];

        let block = self.i2c.transaction(
            self.address,
            &mut [Operation::Write(&[reg]), Operation::Write(&data)],
        );
        if block.is_ok() {
            trace!("PCA9685 {:#x}: ch{} = ({}, {})", self.address, channel, on, off);
            return Ok(());
        }

        let frame = [reg, on_l, on_h, off_l, off_h];
        self.i2c.write(self.address, &frame).map_err(|e| {
            warn!(
                "PCA9685 {:#x}: ch{} write failed: {:?}",
                self.address,
                channel,
                e.kind()
            );
            bus_error(e)
        })
    }

    /// Change the output frequency
    ///
    /// Sleeps the oscillator, writes the prescaler, restores MODE1, then
    /// restarts with auto-increment. The first failing step aborts.
    ///
    /// # Returns
    /// The prescaler value written
    pub fn set_frequency<D: DelayNs>(&mut self, freq_hz: f32, delay: &mut D) -> Result<u8, Error> {
        let prescale = prescale_for(freq_hz);

        let old = self.read_register(regs::MODE1)?;
        self.write_register(regs::MODE1, (old & !mode1::RESTART) | mode1::SLEEP)?;
        self.write_register(regs::PRESCALE, prescale)?;
        self.write_register(regs::MODE1, old)?;
        delay.delay_us(OSC_SETTLE_US);
        self.write_register(
            regs::MODE1,
            old | mode1::RESTART | mode1::AI | mode1::ALLCALL,
        )?;

        info!(
            "PCA9685 {:#x}: frequency {} Hz, prescale {}",
            self.address, freq_hz, prescale
        );
        Ok(prescale)
    }

    /// Put the oscillator to sleep (all outputs stop)
    pub fn sleep(&mut self) -> Result<(), Error> {
        self.write_register(regs::MODE1, mode1::SLEEP)
    }
}

impl<I2C: I2c> PwmOutput for Pca9685<I2C> {
    fn set_pwm(&mut self, channel: u8, on: u16, off: u16) -> Result<(), Error> {
        Pca9685::set_pwm(self, channel, on, off)
    }
}

/// Scan the bus for PCA9685 controllers
///
/// Every 7-bit address that acknowledges is verified by reading LED0_ON_L;
/// only addresses that answer the read are returned.
pub fn discover<I2C: I2c>(i2c: &mut I2C) -> Vec<u8, MAX_DEVICES> {
    let mut found = Vec::new();
    for address in 1..=0x7F_u8 {
        if i2c.write(address, &[]).is_err() {
            continue;
        }
        match read_reg(i2c, address, regs::LED0_ON_L) {
            Ok(_) => {
                info!("PCA9685-like device at {:#x}", address);
                if found.push(address).is_err() {
                    warn!("Discovery list full, stopping scan at {:#x}", address);
                    break;
                }
            }
            Err(_) => debug!("Device at {:#x} acked but failed verification", address),
        }
    }
    found
}

/// Discover and initialize every controller on the bus
///
/// # Returns
/// `(address, init result)` for each verified controller
pub fn init_discovered<I2C: I2c, D: DelayNs>(
    i2c: &mut I2C,
    delay: &mut D,
) -> Vec<(u8, Result<(), Error>), MAX_DEVICES> {
    let mut results = Vec::new();
    for address in discover(i2c) {
        let result = Pca9685::new(&mut *i2c, address).init(delay);
        match result {
            Ok(()) => info!("Initialized PCA9685 at {:#x}", address),
            Err(e) => error!("Init failed at {:#x}: {:?}", address, e),
        }
        // discover() never returns more than MAX_DEVICES
        let _ = results.push((address, result));
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::NoopDelay;
    use crate::sim::{BusOp, SimI2cBus};
    use core::cell::RefCell;
    use embassy_embedded_hal::shared_bus::blocking::i2c::I2cDevice;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    use embassy_sync::blocking_mutex::Mutex;
    use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};

    const ADDR: u8 = 0x40;

    fn write(bytes: &[u8]) -> std::vec::Vec<BusOp> {
        vec![BusOp::Write(bytes.to_vec())]
    }

    #[test]
    fn test_prescale_for() {
        assert_eq!(prescale_for(50.0), 121);
        assert_eq!(prescale_for(1000.0), 5);
        // clamped to 24..1526 Hz
        assert_eq!(prescale_for(1.0), prescale_for(24.0));
        assert_eq!(prescale_for(10_000.0), 3);
    }

    #[test]
    fn test_init_register_sequence() {
        let mut dev = Pca9685::new(SimI2cBus::new().with_pca9685(ADDR), ADDR);
        assert_eq!(dev.init(&mut NoopDelay), Ok(()));

        let bus = dev.release();
        let ops: std::vec::Vec<_> = bus.transfers().iter().map(|t| t.ops.clone()).collect();
        assert_eq!(
            ops,
            vec![
                write(&[0x00, 0x31]),
                write(&[0xFE, 121]),
                write(&[0x00, 0x21]),
                vec![BusOp::Write(vec![0x01]), BusOp::Read(1)],
                write(&[0x01, 0x04]),
            ]
        );
        assert_eq!(bus.register(ADDR, regs::MODE1), Some(0x21));
        assert_eq!(bus.register(ADDR, regs::PRESCALE), Some(121));
    }

    #[test]
    fn test_register_write_falls_back_to_addressed_write() {
        let mut bus = SimI2cBus::new().with_pca9685(ADDR);
        bus.fail_transfers(&[0]);
        let mut dev = Pca9685::new(bus, ADDR);

        assert_eq!(dev.init(&mut NoopDelay), Ok(()));
        let bus = dev.release();
        assert!(!bus.transfers()[0].acked);
        assert_eq!(
            bus.transfers()[1].ops,
            vec![BusOp::Write(vec![0x00]), BusOp::Write(vec![0x31])]
        );
    }

    #[test]
    fn test_init_mandatory_steps_are_fatal() {
        // plain and fallback write of each step
        for (failed, step) in [
            ([0, 1], InitStep::Sleep),
            ([1, 2], InitStep::Prescale),
            ([2, 3], InitStep::Wake),
        ] {
            let mut bus = SimI2cBus::new().with_pca9685(ADDR);
            bus.fail_transfers(&failed);
            let mut dev = Pca9685::new(bus, ADDR);
            assert_eq!(dev.init(&mut NoopDelay), Err(Error::DeviceInit(step)));
        }
    }

    #[test]
    fn test_init_mode2_failures_are_not_fatal() {
        let mut bus = SimI2cBus::new().with_pca9685(ADDR);
        // MODE2 read (combined, split write) and MODE2 write (plain, addressed)
        bus.fail_transfers(&[3, 4, 5, 6]);
        let mut dev = Pca9685::new(bus, ADDR);

        assert_eq!(dev.init(&mut NoopDelay), Ok(()));
        assert_eq!(dev.release().register(ADDR, regs::MODE1), Some(0x21));
    }

    #[test]
    fn test_set_pwm_uses_addressed_block_write() {
        let mut dev = Pca9685::new(SimI2cBus::new().with_pca9685(ADDR), ADDR);
        assert_eq!(dev.set_pwm(3, 0, 350), Ok(()));

        let bus = dev.release();
        assert_eq!(bus.transfers().len(), 1);
        assert_eq!(
            bus.transfers()[0].ops,
            vec![
                BusOp::Write(vec![0x12]),
                BusOp::Write(vec![0x00, 0x00, 0x5E, 0x01])
            ]
        );
        assert_eq!(bus.channel(ADDR, 3), Some((0, 350)));
    }

    #[test]
    fn test_set_pwm_falls_back_to_plain_write() {
        let mut bus = SimI2cBus::new().with_pca9685(ADDR);
        bus.reject_block_writes(true);
        let mut dev = Pca9685::new(bus, ADDR);
        assert_eq!(dev.set_pwm(15, 0, 4095), Ok(()));

        let bus = dev.release();
        assert_eq!(bus.transfers().len(), 2);
        assert_eq!(
            bus.transfers()[1].ops,
            write(&[0x42, 0x00, 0x00, 0xFF, 0x0F])
        );
        assert_eq!(bus.channel(ADDR, 15), Some((0, 4095)));
    }

    #[test]
    fn test_set_pwm_reports_error_when_both_framings_fail() {
        let mut bus = SimI2cBus::new().with_pca9685(ADDR);
        bus.fail_transfers(&[0, 1]);
        let mut dev = Pca9685::new(bus, ADDR);

        assert_eq!(
            dev.set_pwm(0, 0, 100),
            Err(Error::I2c(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)))
        );
        assert_eq!(dev.release().transfers().len(), 2);
    }

    #[test]
    fn test_set_pwm_rejects_out_of_range_without_bus_traffic() {
        let mut dev = Pca9685::new(SimI2cBus::new().with_pca9685(ADDR), ADDR);
        assert_eq!(dev.set_pwm(16, 0, 0), Err(Error::InvalidRange));
        assert_eq!(dev.set_pwm(0, 0, 4096), Err(Error::InvalidRange));
        assert!(dev.release().transfers().is_empty());
    }

    #[test]
    fn test_set_frequency_sequence() {
        let mut dev = Pca9685::new(SimI2cBus::new().with_pca9685(ADDR), ADDR);
        dev.init(&mut NoopDelay).unwrap();
        let mut bus = dev.release();
        bus.clear_log();

        let mut dev = Pca9685::new(bus, ADDR);
        assert_eq!(dev.set_frequency(1000.0, &mut NoopDelay), Ok(5));

        let bus = dev.release();
        let ops: std::vec::Vec<_> = bus.transfers().iter().map(|t| t.ops.clone()).collect();
        assert_eq!(
            ops,
            vec![
                vec![BusOp::Write(vec![0x00]), BusOp::Read(1)],
                write(&[0x00, 0x31]),
                write(&[0xFE, 5]),
                write(&[0x00, 0x21]),
                write(&[0x00, 0xA1]),
            ]
        );
        assert_eq!(bus.register(ADDR, regs::PRESCALE), Some(5));
    }

    #[test]
    fn test_set_frequency_aborts_on_first_failure() {
        let mut dev = Pca9685::new(SimI2cBus::new().with_pca9685(ADDR), ADDR);
        dev.init(&mut NoopDelay).unwrap();
        let mut bus = dev.release();
        bus.clear_log();
        // both framings of the prescaler write
        bus.fail_transfers(&[2, 3]);

        let mut dev = Pca9685::new(bus, ADDR);
        assert!(dev.set_frequency(1000.0, &mut NoopDelay).is_err());

        let bus = dev.release();
        assert_eq!(bus.transfers().len(), 4);
        assert_eq!(bus.register(ADDR, regs::PRESCALE), Some(121));
    }

    #[test]
    fn test_sleep() {
        let mut dev = Pca9685::new(SimI2cBus::new().with_pca9685(ADDR), ADDR);
        dev.sleep().unwrap();
        assert_eq!(dev.release().register(ADDR, regs::MODE1), Some(mode1::SLEEP));
    }

    #[test]
    fn test_discover_verifies_candidates() {
        let mut bus = SimI2cBus::new()
            .with_pca9685(0x60)
            .with_pca9685(0x40)
            .with_foreign_device(0x70);

        let found = discover(&mut bus);
        assert_eq!(found.as_slice(), &[0x40, 0x60]);
    }

    #[test]
    fn test_init_discovered() {
        let mut bus = SimI2cBus::new().with_pca9685(0x40).with_pca9685(0x60);
        let results = init_discovered(&mut bus, &mut NoopDelay);

        assert_eq!(results.as_slice(), &[(0x40, Ok(())), (0x60, Ok(()))]);
        assert_eq!(bus.register(0x40, regs::MODE2), Some(mode2::OUTDRV));
        assert_eq!(bus.register(0x60, regs::PRESCALE), Some(121));
    }

    #[test]
    fn test_two_controllers_share_one_bus() {
        let bus = Mutex::<NoopRawMutex, _>::new(RefCell::new(
            SimI2cBus::new().with_pca9685(0x40).with_pca9685(0x60),
        ));
        let mut servo = Pca9685::new(I2cDevice::new(&bus), 0x40);
        let mut motor = Pca9685::new(I2cDevice::new(&bus), 0x60);

        servo.set_pwm(0, 0, 350).unwrap();
        motor.set_pwm(7, 0, 2000).unwrap();

        bus.lock(|bus| {
            let bus = bus.borrow();
            assert_eq!(bus.channel(0x40, 0), Some((0, 350)));
            assert_eq!(bus.channel(0x60, 7), Some((0, 2000)));
            assert_eq!(bus.channel(0x60, 0), Some((0, 0)));
        });
    }
}
