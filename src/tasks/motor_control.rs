//! モーター制御タスク
//!
//! SPEED_CMD を待ち、速度キューを空になるまで処理して駆動モーターへ反映します。

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::Timer;

use crate::actuator::Motor;
use crate::can_protocol::{decode_command, ActuatorCommand, CanFrame};
use crate::config::PipelineConfig;
use crate::error::Error;
use crate::event_flags::flags;
use crate::pca9685::PwmOutput;
use crate::state::PipelineContext;

/// 速度コマンド1件をモーターへ反映
///
/// 4バイトは正規化速度 [-1, 1]、8バイトは左右PWMカウント。
/// 4バイト未満のペイロードは何もしない。
pub fn apply_speed_command<P: PwmOutput>(
    motor: &mut Motor<P>,
    frame: &CanFrame,
) -> Result<(), Error> {
    match decode_command(frame.payload()) {
        Some(ActuatorCommand::Scalar(value)) => motor.set_motor(value),
        Some(ActuatorCommand::DualPwm { left, right }) => motor.set_pwm(left, right),
        None => Ok(()),
    }
}

/// 速度キューを空にする
///
/// # Returns
/// 処理したコマンド数
pub fn drain<M: RawMutex, P: PwmOutput>(ctx: &PipelineContext<M>, motor: &mut Motor<P>) -> usize {
    let mut processed = 0;
    while let Ok(frame) = ctx.speed_queue.try_receive() {
        // 1件の失敗で後続コマンドを止めない
        if let Err(e) = apply_speed_command(motor, &frame) {
            warn!("Motor command failed: {:?}", e);
            ctx.stats.record_actuator_error();
        }
        processed += 1;
    }
    processed
}

/// モーター制御タスク
pub async fn motor_control_task<M: RawMutex, P: PwmOutput>(
    ctx: &PipelineContext<M>,
    mut motor: Motor<P>,
    config: &PipelineConfig,
) -> ! {
    info!("Motor control task started");

    // 起動時は停止状態から
    if let Err(e) = motor.stop() {
        warn!("Initial motor stop failed: {:?}", e);
    }

    loop {
        // NoWait/Timeout でビット未観測でも、キューに残っていれば処理する
        let _ = ctx.events.wait(flags::SPEED_CMD, config.wait_policy).await;
        let processed = drain(ctx, &mut motor);
        if processed > 0 {
            trace!("Motor: {} commands", processed);
        }
        Timer::after(config.timing.actuator_period).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::MotorChannels;
    use crate::can_protocol::{encode_dual_pwm, encode_scalar_command};
    use crate::config::CanIds;
    use crate::mock::{pwm_write, MockPwm};
    use crate::tasks::can_rx::dispatch;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    fn speed_frame(data: &[u8]) -> CanFrame {
        CanFrame::from_raw(0x2C, data).unwrap()
    }

    #[test]
    fn test_dual_pwm_commands_drain_in_order() {
        let ctx = PipelineContext::<NoopRawMutex>::new();
        let ids = CanIds::DEFAULT;
        dispatch(&ctx, &ids, speed_frame(&encode_dual_pwm(2000, 3000)));
        dispatch(&ctx, &ids, speed_frame(&encode_dual_pwm(-1000, 0)));

        let mut motor = Motor::new(MockPwm::new(), MotorChannels::DEFAULT);
        assert_eq!(ctx.events.try_take(flags::SPEED_CMD), Some(flags::SPEED_CMD));
        assert_eq!(drain(&ctx, &mut motor), 2);

        let writes = &motor_writes(motor);
        assert_eq!(writes.len(), 12);
        assert_eq!(
            writes.as_slice(),
            &[
                // forward / forward
                pwm_write(5, 0, 4095),
                pwm_write(6, 0, 0),
                pwm_write(7, 0, 2000),
                pwm_write(1, 0, 0),
                pwm_write(2, 0, 4095),
                pwm_write(0, 0, 3000),
                // reverse / stop
                pwm_write(5, 0, 0),
                pwm_write(6, 0, 4095),
                pwm_write(7, 0, 1000),
                pwm_write(1, 0, 0),
                pwm_write(2, 0, 0),
                pwm_write(0, 0, 0),
            ]
        );
        assert!(ctx.speed_queue.is_empty());
    }

    #[test]
    fn test_scalar_and_short_commands() {
        let ctx = PipelineContext::<NoopRawMutex>::new();
        let ids = CanIds::DEFAULT;
        dispatch(&ctx, &ids, speed_frame(&[0x01, 0x02]));
        dispatch(&ctx, &ids, speed_frame(&encode_scalar_command(0.5)));

        let mut motor = Motor::new(MockPwm::new(), MotorChannels::DEFAULT);
        assert_eq!(drain(&ctx, &mut motor), 2);

        // 2バイトのコマンドは無視され、書き込みは 0.5 の6件のみ
        let writes = motor_writes(motor);
        assert_eq!(writes.len(), 6);
        assert_eq!(writes[2], pwm_write(7, 0, 2048));
    }

    #[test]
    fn test_failed_command_does_not_stop_drain() {
        let ctx = PipelineContext::<NoopRawMutex>::new();
        let ids = CanIds::DEFAULT;
        dispatch(&ctx, &ids, speed_frame(&encode_scalar_command(0.5)));
        dispatch(&ctx, &ids, speed_frame(&encode_scalar_command(-0.5)));

        let mut motor = Motor::new(MockPwm::failing_on(7), MotorChannels::DEFAULT);
        assert_eq!(drain(&ctx, &mut motor), 2);
        assert_eq!(ctx.stats.snapshot().actuator_errors, 2);
        assert_eq!(motor_writes(motor).len(), 12);
    }

    fn motor_writes(motor: Motor<MockPwm>) -> Vec<crate::mock::PwmWrite> {
        motor.release().writes
    }
}
