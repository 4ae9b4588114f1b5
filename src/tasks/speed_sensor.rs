//! 速度センサタスク
//!
//! パルスカウンタを周期的にサンプリングし、共有速度を更新して
//! SENSOR_UPDATE を立てます。

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::{Instant, Timer};

use crate::config::PipelineConfig;
use crate::event_flags::flags;
use crate::speed_sensor::{PulseCounter, SpeedSampler};
use crate::state::PipelineContext;

/// 1回分のサンプリング
///
/// 共有速度を書き込んでから SENSOR_UPDATE をセットする。
///
/// # Returns
/// 算出した車速 [m/s]
pub async fn sample_and_publish<M: RawMutex, C: PulseCounter>(
    ctx: &PipelineContext<M>,
    sampler: &mut SpeedSampler,
    counter: &mut C,
    now: Instant,
) -> f32 {
    let speed = sampler.sample(counter.count(), now);
    ctx.speed.store(speed).await;
    ctx.events.set(flags::SENSOR_UPDATE);
    speed
}

/// 速度センサタスク
pub async fn speed_sensor_task<M: RawMutex, C: PulseCounter>(
    ctx: &PipelineContext<M>,
    mut counter: C,
    config: &PipelineConfig,
) -> ! {
    info!(
        "Speed sensor task started (perimeter={}m, {} pulses/rev)",
        config.speed_sensor.wheel_perimeter_m, config.speed_sensor.pulses_per_rev
    );

    let mut sampler = SpeedSampler::new(config.speed_sensor);

    loop {
        Timer::after(config.timing.sample_period).await;
        let speed = sample_and_publish(ctx, &mut sampler, &mut counter, Instant::now()).await;
        trace!("Speed: {} m/s", speed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockCounter;
    use crate::speed_sensor::SpeedSensorConfig;
    use embassy_futures::block_on;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    #[test]
    fn test_first_sample_publishes_zero() {
        let ctx = PipelineContext::<NoopRawMutex>::new();
        let mut sampler = SpeedSampler::new(SpeedSensorConfig::DEFAULT);
        let mut counter = MockCounter::new(&[500]);

        let speed = block_on(sample_and_publish(
            &ctx,
            &mut sampler,
            &mut counter,
            Instant::from_millis(100),
        ));
        assert_eq!(speed, 0.0);
        assert_eq!(ctx.speed.try_load(), Some(0.0));
        assert_eq!(ctx.events.get(), flags::SENSOR_UPDATE);
    }

    #[test]
    fn test_speed_published_before_flag() {
        let ctx = PipelineContext::<NoopRawMutex>::new();
        let mut sampler = SpeedSampler::new(SpeedSensorConfig::DEFAULT);
        let mut counter = MockCounter::new(&[0, 30]);

        block_on(sample_and_publish(&ctx, &mut sampler, &mut counter, Instant::from_millis(0)));
        ctx.events.clear(flags::SENSOR_UPDATE);

        let speed = block_on(sample_and_publish(
            &ctx,
            &mut sampler,
            &mut counter,
            Instant::from_millis(1000),
        ));
        assert!((speed - 0.212).abs() < 1e-5);

        // フラグを観測した時点で新しい値が読める
        assert_eq!(ctx.events.try_take(flags::SENSOR_UPDATE), Some(flags::SENSOR_UPDATE));
        assert_eq!(block_on(ctx.speed.load()), speed);
    }

    #[test]
    fn test_wraparound_through_task_step() {
        let ctx = PipelineContext::<NoopRawMutex>::new();
        let mut sampler = SpeedSampler::new(SpeedSensorConfig::DEFAULT);
        let mut counter = MockCounter::new(&[65500, 100]);

        block_on(sample_and_publish(&ctx, &mut sampler, &mut counter, Instant::from_millis(0)));
        let speed = block_on(sample_and_publish(
            &ctx,
            &mut sampler,
            &mut counter,
            Instant::from_millis(100),
        ));
        let expected = 136.0 / 30.0 * 0.212 / 0.1;
        assert!((speed - expected).abs() < 1e-3);
        assert!(speed > 0.0);
    }

    #[test]
    fn test_too_short_interval_publishes_zero() {
        let ctx = PipelineContext::<NoopRawMutex>::new();
        let mut sampler = SpeedSampler::new(SpeedSensorConfig::DEFAULT);
        let mut counter = MockCounter::new(&[0, 10]);

        block_on(sample_and_publish(&ctx, &mut sampler, &mut counter, Instant::from_millis(5)));
        let speed = block_on(sample_and_publish(
            &ctx,
            &mut sampler,
            &mut counter,
            Instant::from_millis(5),
        ));
        assert_eq!(speed, 0.0);
        assert_eq!(ctx.speed.try_load(), Some(0.0));
    }
}
