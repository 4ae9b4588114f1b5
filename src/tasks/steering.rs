//! ステアリングタスク
//!
//! STEER_CMD を待ち、ステアリングキューを処理してサーボ角度を設定します。

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::Timer;

use crate::actuator::Servo;
use crate::can_protocol::{parse_scalar_command, CanFrame};
use crate::config::{servo, PipelineConfig};
use crate::error::Error;
use crate::event_flags::flags;
use crate::pca9685::PwmOutput;
use crate::state::PipelineContext;

/// 角度コマンド [deg] を整数角度へ（0〜180 に丸める）
///
/// NaN は `None`。
pub fn command_to_degrees(angle_deg: f32) -> Option<u16> {
    if angle_deg.is_nan() {
        return None;
    }
    let clamped = angle_deg.clamp(0.0, servo::MAX_ANGLE_DEG as f32);
    Some(libm::roundf(clamped) as u16)
}

/// ステアリングコマンド1件をサーボへ反映
///
/// # Returns
/// * `Ok(Some(pulse))` - 書き込んだパルス幅
/// * `Ok(None)` - 4バイト未満、または NaN のため無視
pub fn apply_steering_command<P: PwmOutput>(
    servo: &mut Servo<P>,
    frame: &CanFrame,
) -> Result<Option<u16>, Error> {
    let Some(angle) = parse_scalar_command(frame.payload()) else {
        return Ok(None);
    };
    let Some(degrees) = command_to_degrees(angle) else {
        warn!("Steering command is NaN, skipped");
        return Ok(None);
    };
    servo.set_angle(degrees).map(Some)
}

/// ステアリングキューを空にする
///
/// # Returns
/// 処理したコマンド数
pub fn drain<M: RawMutex, P: PwmOutput>(ctx: &PipelineContext<M>, servo: &mut Servo<P>) -> usize {
    let mut processed = 0;
    while let Ok(frame) = ctx.steer_queue.try_receive() {
        if let Err(e) = apply_steering_command(servo, &frame) {
            warn!("Steering command failed: {:?}", e);
            ctx.stats.record_actuator_error();
        }
        processed += 1;
    }
    processed
}

/// ステアリングタスク
pub async fn steering_task<M: RawMutex, P: PwmOutput>(
    ctx: &PipelineContext<M>,
    mut servo: Servo<P>,
    config: &PipelineConfig,
) -> ! {
    info!(
        "Steering task started (ch{}, {}..{} ticks)",
        servo.config().channel,
        servo.config().min_pulse,
        servo.config().max_pulse
    );

    loop {
        let _ = ctx.events.wait(flags::STEER_CMD, config.wait_policy).await;
        let processed = drain(ctx, &mut servo);
        if processed > 0 {
            trace!("Steering: {} commands", processed);
        }
        Timer::after(config.timing.actuator_period).await;
    }
}
