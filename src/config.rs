//! Configuration module
//!
//! コンパイル時のデフォルト値（params.rs）と、
//! 各タスクへ渡す実行時設定 [`PipelineConfig`] を提供します。

pub mod params;

// params.rsから主要な定数を再エクスポート
pub use params::*;

use embassy_time::Duration;

use crate::actuator::motor::MotorChannels;
use crate::actuator::servo::ServoConfig;
use crate::event_flags::WaitPolicy;
use crate::speed_sensor::SpeedSensorConfig;

/// CAN ID設定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CanIds {
    pub cmd_speed: u32,
    pub cmd_steering: u32,
    pub status_speed: u32,
}

impl CanIds {
    pub const DEFAULT: Self = Self {
        cmd_speed: can::CMD_SPEED_ID,
        cmd_steering: can::CMD_STEERING_ID,
        status_speed: can::STATUS_SPEED_ID,
    };
}

impl Default for CanIds {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// 各タスクのスリープ周期
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskTiming {
    /// CAN受信FIFOのポーリング間隔
    pub can_rx_poll: Duration,
    /// アクチュエータタスクのドレイン後スリープ
    pub actuator_period: Duration,
    /// 速度サンプリング周期
    pub sample_period: Duration,
    /// ステータス送信タスクのスリープ
    pub can_tx_period: Duration,
    /// ハートビート周期
    pub supervisor_period: Duration,
}

impl TaskTiming {
    pub const DEFAULT: Self = Self {
        can_rx_poll: Duration::from_millis(timing::CAN_RX_POLL_MS),
        actuator_period: Duration::from_millis(timing::ACTUATOR_PERIOD_MS),
        sample_period: Duration::from_millis(timing::SAMPLE_PERIOD_MS),
        can_tx_period: Duration::from_millis(timing::CAN_TX_PERIOD_MS),
        supervisor_period: Duration::from_millis(timing::SUPERVISOR_PERIOD_MS),
    };
}

impl Default for TaskTiming {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// パイプライン全体の実行時設定
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
    pub can_ids: CanIds,
    pub motor: MotorChannels,
    pub servo: ServoConfig,
    pub speed_sensor: SpeedSensorConfig,
    pub timing: TaskTiming,
    /// イベントフラグ待ちの方式（ブロッキング推奨）
    pub wait_policy: WaitPolicy,
}

impl PipelineConfig {
    pub const DEFAULT: Self = Self {
        can_ids: CanIds::DEFAULT,
        motor: MotorChannels::DEFAULT,
        servo: ServoConfig::DEFAULT,
        speed_sensor: SpeedSensorConfig::DEFAULT,
        timing: TaskTiming::DEFAULT,
        wait_policy: WaitPolicy::Forever,
    };
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
