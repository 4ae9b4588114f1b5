//! Wheel speed measurement
//!
//! フリーランの16ビットパルスカウンタ（TIM1 外部クロックモード）から
//! 車速 [m/s] を算出します。

use embassy_time::Instant;

use crate::config::speed_sensor;

/// パルスカウンタ（ハードウェアタイマのカウント値）
pub trait PulseCounter {
    fn count(&mut self) -> u16;
}

/// 速度センサパラメータ
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedSensorConfig {
    /// ホイール外周 [m]
    pub wheel_perimeter_m: f32,
    /// 1回転あたりのパルス数
    pub pulses_per_rev: f32,
    /// カウンタの最大値（ラップアラウンド直前の値）
    pub timer_period: u32,
}

impl SpeedSensorConfig {
    pub const DEFAULT: Self = Self {
        wheel_perimeter_m: speed_sensor::WHEEL_PERIMETER_M,
        pulses_per_rev: speed_sensor::PULSES_PER_REV,
        timer_period: speed_sensor::TIMER_PERIOD,
    };
}

impl Default for SpeedSensorConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// 前回サンプルからのパルス数
///
/// ラップアラウンドは1回分だけ補正する。サンプリング間隔中に
/// カウンタが2周以上した場合は過小評価になる。
/// `timer_period` が `last` より小さい設定ではラップ前の区間を0として数える。
pub fn pulses(current: u16, last: u16, timer_period: u32) -> u32 {
    if current >= last {
        (current - last) as u32
    } else {
        timer_period
            .saturating_sub(last as u32)
            .saturating_add(current as u32 + 1)
    }
}

/// 前回サンプル（カウンタ値と時刻）
#[derive(Debug, Clone, Copy)]
struct LastSample {
    counter: u16,
    at: Instant,
}

/// 速度サンプラ
///
/// 初回呼び出しは状態を記録するだけで 0.0 を返す。
pub struct SpeedSampler {
    config: SpeedSensorConfig,
    last: Option<LastSample>,
}

impl SpeedSampler {
    pub const fn new(config: SpeedSensorConfig) -> Self {
        Self { config, last: None }
    }

    /// カウンタ値から速度を計算
    ///
    /// # Arguments
    /// * `counter` - 現在のカウンタ値
    /// * `now` - サンプル時刻
    ///
    /// # Returns
    /// 車速 [m/s]。初回、および前回から1ms以内の呼び出しでは 0.0
    pub fn sample(&mut self, counter: u16, now: Instant) -> f32 {
        let Some(last) = self.last else {
            self.last = Some(LastSample { counter, at: now });
            return 0.0;
        };

        // 時計が戻った場合も間隔ゼロとして扱う
        let dt = match now.checked_duration_since(last.at) {
            Some(elapsed) => elapsed.as_micros() as f32 / 1_000_000.0,
            None => 0.0,
        };
        if dt <= speed_sensor::MIN_SAMPLE_INTERVAL_S {
            trace!("Speed sample skipped: dt={}s", dt);
            return 0.0;
        }

        let pulses = pulses(counter, last.counter, self.config.timer_period);
        let rotations = pulses as f32 / self.config.pulses_per_rev;
        let distance_m = rotations * self.config.wheel_perimeter_m;
        let speed = distance_m / dt;

        self.last = Some(LastSample { counter, at: now });
        speed
    }

    /// 状態をクリア（次回は再び初回扱い）
    pub fn reset(&mut self) {
        self.last = None;
    }

    pub fn is_seeded(&self) -> bool {
        self.last.is_some()
    }
}
