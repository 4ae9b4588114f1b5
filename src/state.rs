//! タスク間共有状態
//!
//! コマンドキュー・イベントフラグ・共有速度・統計カウンタを
//! [`PipelineContext`] にまとめ、各タスクへ参照で渡します。
//! ボード側では `static` に置くのが基本です:
//!
//! `static CTX: PipelineContext<CriticalSectionRawMutex> = PipelineContext::new();`

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::mutex::Mutex;
use portable_atomic::{AtomicU32, Ordering};

use crate::can_protocol::CanFrame;
use crate::config::QUEUE_CAPACITY;
use crate::event_flags::EventFlags;

/// コマンドキュー（満杯時は新しいメッセージを破棄）
pub type CommandQueue<M> = Channel<M, CanFrame, QUEUE_CAPACITY>;

/// 車速 [m/s]
///
/// 書き込みは速度サンプリングタスクのみ、読み出しはステータス送信タスクと
/// スーパーバイザ。ロックは値のコピーの間だけ保持し、待機やスリープを
/// またがない。
pub struct SharedSpeed<M: RawMutex> {
    value: Mutex<M, f32>,
}

impl<M: RawMutex> SharedSpeed<M> {
    pub const fn new() -> Self {
        Self {
            value: Mutex::new(0.0),
        }
    }

    pub async fn store(&self, speed_mps: f32) {
        *self.value.lock().await = speed_mps;
    }

    pub async fn load(&self) -> f32 {
        *self.value.lock().await
    }

    /// ロック中なら `None`
    pub fn try_load(&self) -> Option<f32> {
        self.value.try_lock().ok().map(|guard| *guard)
    }
}

impl<M: RawMutex> Default for SharedSpeed<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// パイプライン統計
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StatsSnapshot {
    pub dropped_speed: u32,
    pub dropped_steer: u32,
    pub ignored_frames: u32,
    pub actuator_errors: u32,
    pub tx_failures: u32,
}

/// ロックフリーの統計カウンタ
pub struct PipelineStats {
    dropped_speed: AtomicU32,
    dropped_steer: AtomicU32,
    ignored_frames: AtomicU32,
    actuator_errors: AtomicU32,
    tx_failures: AtomicU32,
}

impl PipelineStats {
    pub const fn new() -> Self {
        Self {
            dropped_speed: AtomicU32::new(0),
            dropped_steer: AtomicU32::new(0),
            ignored_frames: AtomicU32::new(0),
            actuator_errors: AtomicU32::new(0),
            tx_failures: AtomicU32::new(0),
        }
    }

    pub fn record_dropped_speed(&self) {
        self.dropped_speed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_steer(&self) {
        self.dropped_steer.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ignored_frame(&self) {
        self.ignored_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_actuator_error(&self) {
        self.actuator_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tx_failure(&self) {
        self.tx_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            dropped_speed: self.dropped_speed.load(Ordering::Relaxed),
            dropped_steer: self.dropped_steer.load(Ordering::Relaxed),
            ignored_frames: self.ignored_frames.load(Ordering::Relaxed),
            actuator_errors: self.actuator_errors.load(Ordering::Relaxed),
            tx_failures: self.tx_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}

/// 全タスクが共有するコンテキスト
pub struct PipelineContext<M: RawMutex> {
    /// 速度コマンド（CMD_SPEED）
    pub speed_queue: CommandQueue<M>,
    /// ステアリングコマンド（CMD_STEERING）
    pub steer_queue: CommandQueue<M>,
    /// SPEED_CMD / STEER_CMD / SENSOR_UPDATE
    pub events: EventFlags<M>,
    pub speed: SharedSpeed<M>,
    pub stats: PipelineStats,
}

impl<M: RawMutex> PipelineContext<M> {
    pub const fn new() -> Self {
        Self {
            speed_queue: Channel::new(),
            steer_queue: Channel::new(),
            events: EventFlags::new(),
            speed: SharedSpeed::new(),
            stats: PipelineStats::new(),
        }
    }
}

impl<M: RawMutex> Default for PipelineContext<M> {
    fn default() -> Self {
        Self::new()
    }
}
