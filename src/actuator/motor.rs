//! Differential-drive DC motors behind an H-bridge on the motor PCA9685
//!
//! Each wheel uses three channels: A and B select the bridge direction
//! (full on / full off), PWM carries the duty cycle. Writes always go out in
//! the order A, B, PWM so the bridge never sees both inputs high.

use crate::config::{motor, pwm};
use crate::error::Error;
use crate::pca9685::PwmOutput;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MotorDirection {
    Forward,
    Backward,
    Stop,
}

/// Channel assignment of one wheel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WheelChannels {
    pub a: u8,
    pub b: u8,
    pub pwm: u8,
    /// Mirror-mounted wheel: "forward" drives B instead of A
    pub mirrored: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorChannels {
    /// 7-bit address of the motor PCA9685
    pub address: u8,
    pub left: WheelChannels,
    pub right: WheelChannels,
}

impl MotorChannels {
    pub const DEFAULT: Self = Self {
        address: pwm::MOTOR_ADDRESS,
        left: WheelChannels {
            a: motor::LEFT_A,
            b: motor::LEFT_B,
            pwm: motor::LEFT_PWM,
            mirrored: false,
        },
        right: WheelChannels {
            a: motor::RIGHT_A,
            b: motor::RIGHT_B,
            pwm: motor::RIGHT_PWM,
            mirrored: true,
        },
    };
}

impl Default for MotorChannels {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Duty ticks for a normalized speed: `round(|v| * 4095)`, saturating
pub fn pwm_ticks(value: f32) -> u16 {
    let max = pwm::MAX_TICK as f32;
    let ticks = libm::roundf(libm::fabsf(value) * max);
    // NaN saturates to 0
    ticks.clamp(0.0, max) as u16
}

/// Direction for a normalized speed; anything within 1e-6 of zero (or NaN) stops
pub fn direction(value: f32) -> MotorDirection {
    if !(libm::fabsf(value) >= motor::STOP_THRESHOLD) {
        MotorDirection::Stop
    } else if value > 0.0 {
        MotorDirection::Forward
    } else {
        MotorDirection::Backward
    }
}

fn direction_of_counts(counts: i32) -> MotorDirection {
    match counts {
        c if c > 0 => MotorDirection::Forward,
        c if c < 0 => MotorDirection::Backward,
        _ => MotorDirection::Stop,
    }
}

/// Both drive motors
pub struct Motor<P> {
    pwm: P,
    channels: MotorChannels,
}

impl<P: PwmOutput> Motor<P> {
    pub fn new(pwm: P, channels: MotorChannels) -> Self {
        Self { pwm, channels }
    }

    pub fn channels(&self) -> &MotorChannels {
        &self.channels
    }

    /// Give the PWM output back
    pub fn release(self) -> P {
        self.pwm
    }

    /// Drive both wheels from one normalized speed
    ///
    /// # Arguments
    /// * `value` - Speed in [-1, 1]; the sign selects the direction
    pub fn set_motor(&mut self, value: f32) -> Result<(), Error> {
        let dir = direction(value);
        let ticks = pwm_ticks(value);
        debug!("Motor: value={} -> {:?} {}", value, dir, ticks);

        let first = self.drive_wheel(self.channels.left, dir, ticks);
        let second = self.drive_wheel(self.channels.right, dir, ticks);
        first.and(second)
    }

    /// Drive each wheel from a signed tick count
    ///
    /// # Arguments
    /// * `left` - Left wheel ticks, clamped to ±4095
    /// * `right` - Right wheel ticks, clamped to ±4095
    pub fn set_pwm(&mut self, left: i32, right: i32) -> Result<(), Error> {
        let max = pwm::MAX_TICK as i32;
        let left = left.clamp(-max, max);
        let right = right.clamp(-max, max);
        debug!("Motor: pwm left={} right={}", left, right);

        let first = self.drive_wheel(
            self.channels.left,
            direction_of_counts(left),
            left.unsigned_abs() as u16,
        );
        let second = self.drive_wheel(
            self.channels.right,
            direction_of_counts(right),
            right.unsigned_abs() as u16,
        );
        first.and(second)
    }

    /// All six channels to zero
    pub fn stop(&mut self) -> Result<(), Error> {
        self.set_pwm(0, 0)
    }

    /// Both wheels forward at `|speed|` (0-1)
    pub fn forward(&mut self, speed: f32) -> Result<(), Error> {
        let ticks = pwm_ticks(speed);
        let first = self.drive_wheel(self.channels.left, MotorDirection::Forward, ticks);
        let second = self.drive_wheel(self.channels.right, MotorDirection::Forward, ticks);
        first.and(second)
    }

    /// Both wheels backward at `|speed|` (0-1)
    pub fn backward(&mut self, speed: f32) -> Result<(), Error> {
        let ticks = pwm_ticks(speed);
        let first = self.drive_wheel(self.channels.left, MotorDirection::Backward, ticks);
        let second = self.drive_wheel(self.channels.right, MotorDirection::Backward, ticks);
        first.and(second)
    }

    /// Write A, B, PWM for one wheel
    ///
    /// All three writes are attempted; the first failure is returned.
    fn drive_wheel(
        &mut self,
        wheel: WheelChannels,
        dir: MotorDirection,
        ticks: u16,
    ) -> Result<(), Error> {
        const ON: u16 = pwm::MAX_TICK;

        let (a, b, duty) = match (dir, wheel.mirrored) {
            (MotorDirection::Stop, _) => (0, 0, 0),
            (MotorDirection::Forward, false) | (MotorDirection::Backward, true) => (ON, 0, ticks),
            (MotorDirection::Backward, false) | (MotorDirection::Forward, true) => (0, ON, ticks),
        };

        let ra = self.pwm.set_pwm(wheel.a, 0, a);
        let rb = self.pwm.set_pwm(wheel.b, 0, b);
        let rp = self.pwm.set_pwm(wheel.pwm, 0, duty);
        ra.and(rb).and(rp)
    }
}
