//! テスト用モック

use std::collections::VecDeque;
use std::vec::Vec;

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};

use crate::error::Error;
use crate::pca9685::PwmOutput;
use crate::speed_sensor::PulseCounter;

/// `set_pwm` の呼び出し
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PwmWrite {
    pub channel: u8,
    pub on: u16,
    pub off: u16,
}

pub fn pwm_write(channel: u8, on: u16, off: u16) -> PwmWrite {
    PwmWrite { channel, on, off }
}

/// 書き込みを記録する PWM 出力
#[derive(Debug, Default)]
pub struct MockPwm {
    pub writes: Vec<PwmWrite>,
    /// このチャネルへの書き込みは NACK で失敗する
    pub failing_channel: Option<u8>,
}

impl MockPwm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(channel: u8) -> Self {
        Self {
            writes: Vec::new(),
            failing_channel: Some(channel),
        }
    }
}

impl PwmOutput for MockPwm {
    fn set_pwm(&mut self, channel: u8, on: u16, off: u16) -> Result<(), Error> {
        self.writes.push(pwm_write(channel, on, off));
        if self.failing_channel == Some(channel) {
            return Err(Error::I2c(ErrorKind::NoAcknowledge(
                NoAcknowledgeSource::Data,
            )));
        }
        Ok(())
    }
}

/// 決まった値を順に返すカウンタ（最後の値を繰り返す）
pub struct MockCounter {
    values: VecDeque<u16>,
    last: u16,
}

impl MockCounter {
    pub fn new(values: &[u16]) -> Self {
        Self {
            values: values.iter().copied().collect(),
            last: 0,
        }
    }
}

impl PulseCounter for MockCounter {
    fn count(&mut self) -> u16 {
        if let Some(v) = self.values.pop_front() {
            self.last = v;
        }
        self.last
    }
}

pub struct NoopDelay;

impl DelayNs for NoopDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}
