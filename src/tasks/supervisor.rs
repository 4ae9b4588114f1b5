//! スーパーバイザタスク
//!
//! ハートビートLEDを点滅させ、一定回数ごとに統計と車速をログに出します。

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::Timer;
use embedded_hal::digital::{Error as _, OutputPin, PinState};

use crate::config::{timing, PipelineConfig};
use crate::state::{PipelineContext, StatsSnapshot};

/// ハートビート1回分
///
/// # Arguments
/// * `beat` - 通算のハートビート回数（偶数で点灯）
pub fn heartbeat<L: OutputPin>(led: &mut L, beat: u32) {
    let state = if beat % 2 == 0 {
        PinState::High
    } else {
        PinState::Low
    };
    if let Err(e) = led.set_state(state) {
        warn!("Heartbeat LED error: {:?}", e.kind());
    }
}

/// 統計と車速をログに出す
///
/// 共有速度がロック中なら車速は省略する。
pub fn report<M: RawMutex>(ctx: &PipelineContext<M>) -> StatsSnapshot {
    let stats = ctx.stats.snapshot();
    info!(
        "Stats: dropped speed={} steer={}, ignored={}, actuator errors={}, tx failures={}",
        stats.dropped_speed,
        stats.dropped_steer,
        stats.ignored_frames,
        stats.actuator_errors,
        stats.tx_failures
    );
    if let Some(speed) = ctx.speed.try_load() {
        info!("Speed: {} m/s", speed);
    }
    stats
}

/// スーパーバイザタスク
pub async fn supervisor_task<M: RawMutex, L: OutputPin>(
    ctx: &PipelineContext<M>,
    mut led: L,
    config: &PipelineConfig,
) -> ! {
    info!("Supervisor task started");

    let mut beat: u32 = 0;
    loop {
        heartbeat(&mut led, beat);
        beat = beat.wrapping_add(1);
        if beat % timing::SUPERVISOR_REPORT_EVERY == 0 {
            report(ctx);
        }
        Timer::after(config.timing.supervisor_period).await;
    }
}
