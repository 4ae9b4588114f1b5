//! Steering servo on the servo PCA9685
//!
//! Angle 0-180 deg maps linearly onto `[min_pulse, max_pulse]` ticks of a
//! 50 Hz frame.

use embassy_time::{Duration, Timer};

use crate::config::{pwm, servo};
use crate::error::Error;
use crate::pca9685::PwmOutput;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServoConfig {
    /// 7-bit address of the servo PCA9685
    pub address: u8,
    pub channel: u8,
    /// Ticks at 0 deg
    pub min_pulse: u16,
    /// Ticks at 180 deg
    pub max_pulse: u16,
    pub frequency_hz: f32,
}

impl ServoConfig {
    pub const DEFAULT: Self = Self {
        address: pwm::SERVO_ADDRESS,
        channel: servo::CHANNEL,
        min_pulse: servo::DEFAULT_MIN_PULSE,
        max_pulse: servo::DEFAULT_MAX_PULSE,
        frequency_hz: servo::DEFAULT_FREQUENCY_HZ,
    };
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Pulse width for an angle
///
/// # Arguments
/// * `angle_deg` - Angle, clamped to 180
/// * `min_pulse` - Ticks at 0 deg
/// * `max_pulse` - Ticks at 180 deg
///
/// # Returns
/// * `min + (max - min) * angle / 180`, truncated
/// * `Err(InvalidRange)` if `min_pulse >= max_pulse` or `max_pulse` exceeds 4095
pub fn pulse_for(angle_deg: u16, min_pulse: u16, max_pulse: u16) -> Result<u16, Error> {
    check_range(min_pulse, max_pulse)?;
    let angle = angle_deg.min(servo::MAX_ANGLE_DEG) as u32;
    let range = (max_pulse - min_pulse) as u32;
    let pulse = min_pulse as u32 + range * angle / servo::MAX_ANGLE_DEG as u32;
    // max_pulse <= 4095 なので u16 に収まる
    Ok(pulse as u16)
}

/// パルス幅範囲の前提条件
fn check_range(min_pulse: u16, max_pulse: u16) -> Result<(), Error> {
    if min_pulse >= max_pulse || max_pulse > pwm::MAX_TICK {
        return Err(Error::InvalidRange);
    }
    Ok(())
}

/// Move a servo on `channel` to `angle_deg`
///
/// # Returns
/// The pulse written. `Err(InvalidRange)` performs no write.
pub fn set_angle<P: PwmOutput>(
    pwm: &mut P,
    channel: u8,
    angle_deg: u16,
    min_pulse: u16,
    max_pulse: u16,
) -> Result<u16, Error> {
    let pulse = pulse_for(angle_deg, min_pulse, max_pulse)?;
    pwm.set_pwm(channel, 0, pulse)?;
    debug!("Servo ch{}: {} deg -> {} ticks", channel, angle_deg, pulse);
    Ok(pulse)
}

/// Step a servo from `start` to `end` (inclusive when reachable)
///
/// The direction follows `start <= end`; a zero step is treated as 1.
/// Write failures on individual steps are logged and the sweep goes on.
#[allow(clippy::too_many_arguments)]
pub async fn sweep<P: PwmOutput>(
    pwm: &mut P,
    channel: u8,
    start_deg: u16,
    end_deg: u16,
    step_deg: u16,
    delay: Duration,
    min_pulse: u16,
    max_pulse: u16,
) -> Result<(), Error> {
    check_range(min_pulse, max_pulse)?;
    let step = step_deg.max(1);

    let mut angle = start_deg;
    loop {
        if start_deg <= end_deg && angle > end_deg {
            break;
        }
        if start_deg > end_deg && angle < end_deg {
            break;
        }

        if let Err(e) = set_angle(pwm, channel, angle, min_pulse, max_pulse) {
            warn!("Servo sweep: {} deg failed: {:?}", angle, e);
        }
        Timer::after(delay).await;

        let next = if start_deg <= end_deg {
            angle.checked_add(step)
        } else {
            angle.checked_sub(step)
        };
        match next {
            Some(next) => angle = next,
            None => break,
        }
    }
    Ok(())
}

/// Servo bound to its configuration
pub struct Servo<P> {
    pwm: P,
    config: ServoConfig,
}

impl<P: PwmOutput> Servo<P> {
    pub fn new(pwm: P, config: ServoConfig) -> Self {
        Self { pwm, config }
    }

    pub fn config(&self) -> &ServoConfig {
        &self.config
    }

    pub fn release(self) -> P {
        self.pwm
    }

    pub fn set_angle(&mut self, angle_deg: u16) -> Result<u16, Error> {
        let ServoConfig {
            channel,
            min_pulse,
            max_pulse,
            ..
        } = self.config;
        set_angle(&mut self.pwm, channel, angle_deg, min_pulse, max_pulse)
    }

    pub async fn sweep(
        &mut self,
        start_deg: u16,
        end_deg: u16,
        step_deg: u16,
        delay: Duration,
    ) -> Result<(), Error> {
        let ServoConfig {
            channel,
            min_pulse,
            max_pulse,
            ..
        } = self.config;
        sweep(
            &mut self.pwm,
            channel,
            start_deg,
            end_deg,
            step_deg,
            delay,
            min_pulse,
            max_pulse,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{pwm_write, MockPwm};
    use embassy_futures::block_on;

    const MIN: u16 = servo::DEFAULT_MIN_PULSE;
    const MAX: u16 = servo::DEFAULT_MAX_PULSE;

    fn angles(writes: &[crate::mock::PwmWrite]) -> Vec<u16> {
        // exact for multiples of 3 deg with the 200..500 range
        writes.iter().map(|w| (w.off - MIN) * 180 / (MAX - MIN)).collect()
    }

    #[test]
    fn test_pulse_endpoints() {
        assert_eq!(pulse_for(0, MIN, MAX), Ok(200));
        assert_eq!(pulse_for(90, MIN, MAX), Ok(350));
        assert_eq!(pulse_for(180, MIN, MAX), Ok(500));
    }

    #[test]
    fn test_pulse_bounded_and_monotonic() {
        for (min, max) in [(200, 500), (0, 4095), (102, 512), (1, 2)] {
            let mut prev = min;
            for angle in 0..=180 {
                let pulse = pulse_for(angle, min, max).unwrap();
                assert!(pulse >= min && pulse <= max);
                assert!(pulse >= prev);
                prev = pulse;
            }
            assert_eq!(pulse_for(180, min, max), Ok(max));
        }
    }

    #[test]
    fn test_pulse_truncates() {
        // 200 + 300 * 1 / 180 = 201.67
        assert_eq!(pulse_for(1, MIN, MAX), Ok(201));
    }

    #[test]
    fn test_angle_above_180_is_clamped() {
        assert_eq!(pulse_for(181, MIN, MAX), pulse_for(180, MIN, MAX));
        assert_eq!(pulse_for(u16::MAX, MIN, MAX), Ok(MAX));
    }

    #[test]
    fn test_invalid_range_writes_nothing() {
        let mut pwm = MockPwm::new();
        assert_eq!(set_angle(&mut pwm, 0, 90, 500, 500), Err(Error::InvalidRange));
        assert_eq!(set_angle(&mut pwm, 0, 90, 600, 500), Err(Error::InvalidRange));
        assert!(pwm.writes.is_empty());
    }

    #[test]
    fn test_pulse_range_above_counts_is_rejected() {
        assert_eq!(pulse_for(0, 5000, 6000), Err(Error::InvalidRange));
        assert_eq!(pulse_for(90, 100, 4096), Err(Error::InvalidRange));
        assert_eq!(pulse_for(180, 100, 4095), Ok(4095));

        let mut pwm = MockPwm::new();
        assert_eq!(set_angle(&mut pwm, 0, 90, 100, 9000), Err(Error::InvalidRange));
        let result = block_on(sweep(&mut pwm, 0, 0, 180, 45, Duration::from_ticks(0), 100, 9000));
        assert_eq!(result, Err(Error::InvalidRange));
        assert!(pwm.writes.is_empty());
    }

    #[test]
    fn test_set_angle_writes_one_channel() {
        let mut servo = Servo::new(MockPwm::new(), ServoConfig::DEFAULT);
        assert_eq!(servo.set_angle(90), Ok(350));
        assert_eq!(servo.pwm.writes, vec![pwm_write(0, 0, 350)]);
    }

    #[test]
    fn test_sweep_ascending() {
        let mut pwm = MockPwm::new();
        block_on(sweep(&mut pwm, 0, 0, 180, 45, Duration::from_ticks(0), MIN, MAX)).unwrap();
        assert_eq!(angles(&pwm.writes), vec![0, 45, 90, 135, 180]);
    }

    #[test]
    fn test_sweep_descending_stops_before_passing_end() {
        let mut pwm = MockPwm::new();
        block_on(sweep(&mut pwm, 0, 90, 10, 30, Duration::from_ticks(0), MIN, MAX)).unwrap();
        assert_eq!(angles(&pwm.writes), vec![90, 60, 30]);
    }

    #[test]
    fn test_sweep_zero_step_terminates() {
        let mut pwm = MockPwm::new();
        block_on(sweep(&mut pwm, 0, 3, 6, 0, Duration::from_ticks(0), MIN, MAX)).unwrap();
        assert_eq!(pwm.writes.len(), 4);
    }

    #[test]
    fn test_sweep_near_u16_max_terminates() {
        let mut pwm = MockPwm::new();
        block_on(sweep(&mut pwm, 0, u16::MAX - 1, u16::MAX, 5, Duration::from_ticks(0), MIN, MAX))
            .unwrap();
        assert_eq!(pwm.writes.len(), 1);
        assert_eq!(pwm.writes[0].off, MAX);
    }

    #[test]
    fn test_sweep_rejects_invalid_range() {
        let mut pwm = MockPwm::new();
        let result = block_on(sweep(&mut pwm, 0, 0, 180, 10, Duration::from_ticks(0), 300, 300));
        assert_eq!(result, Err(Error::InvalidRange));
        assert!(pwm.writes.is_empty());
    }
}
