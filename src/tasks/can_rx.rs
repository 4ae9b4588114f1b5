//! CAN受信タスク
//!
//! 受信FIFOを周期的にポーリングし、コマンドフレームをIDで振り分けて
//! 速度/ステアリングキューへ積み、対応するイベントビットを立てます。

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::Timer;
use embedded_can::nb::Can;
use embedded_can::{Error as _, Frame as _};

use crate::can_protocol::{id_from_raw, CanFrame};
use crate::config::{CanIds, PipelineConfig};
use crate::error::Error;
use crate::event_flags::flags;
use crate::state::{CommandQueue, PipelineContext};

/// コマンドの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandKind {
    Speed,
    Steering,
}

/// 1フレームの振り分け結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Dispatch {
    /// キューに積んだ
    Queued(CommandKind),
    /// キュー満杯のため破棄した
    Dropped(CommandKind),
    /// 対象外のID
    Ignored,
}

fn enqueue<M: RawMutex>(
    ctx: &PipelineContext<M>,
    queue: &CommandQueue<M>,
    kind: CommandKind,
    frame: CanFrame,
) -> Dispatch {
    let result = match queue.try_send(frame) {
        Ok(()) => Dispatch::Queued(kind),
        Err(_) => {
            match kind {
                CommandKind::Speed => ctx.stats.record_dropped_speed(),
                CommandKind::Steering => ctx.stats.record_dropped_steer(),
            }
            warn!("{:?} queue full, command dropped", kind);
            Dispatch::Dropped(kind)
        }
    };

    // 破棄時もビットは立てる（コンシューマにキューを吐き出させる）
    let bit = match kind {
        CommandKind::Speed => flags::SPEED_CMD,
        CommandKind::Steering => flags::STEER_CMD,
    };
    ctx.events.set(bit);
    result
}

/// 受信フレームをIDで振り分ける
///
/// IDは種別も含めて比較する。0x7FF 以下の設定値は標準ID、それ以上は拡張IDとして
/// 扱うため、同じ数値の拡張IDフレームはコマンドにならない。
pub fn dispatch<M: RawMutex>(ctx: &PipelineContext<M>, ids: &CanIds, frame: CanFrame) -> Dispatch {
    let id = Some(frame.id());
    match id {
        id if id == id_from_raw(ids.cmd_speed) => {
            enqueue(ctx, &ctx.speed_queue, CommandKind::Speed, frame)
        }
        id if id == id_from_raw(ids.cmd_steering) => {
            enqueue(ctx, &ctx.steer_queue, CommandKind::Steering, frame)
        }
        _ => {
            trace!("CAN frame {:#x} ignored", frame.raw_id());
            ctx.stats.record_ignored_frame();
            Dispatch::Ignored
        }
    }
}

/// 受信FIFOから最大1フレームを取り出して振り分ける
///
/// # Returns
/// * `None` - FIFOが空、または受信エラー（ログのみ）
pub fn poll_once<C: Can, M: RawMutex>(
    can: &mut C,
    ctx: &PipelineContext<M>,
    ids: &CanIds,
) -> Option<Dispatch> {
    match can.receive() {
        Ok(frame) => Some(dispatch(ctx, ids, CanFrame::from_frame(&frame))),
        Err(nb::Error::WouldBlock) => None,
        Err(nb::Error::Other(e)) => {
            warn!("CAN receive error: {:?}", Error::Can(e.kind()));
            None
        }
    }
}

/// CAN受信タスク
pub async fn can_rx_task<C: Can, M: RawMutex>(
    mut can: C,
    ctx: &PipelineContext<M>,
    config: &PipelineConfig,
) -> ! {
    info!(
        "CAN RX task started (speed={:#x}, steering={:#x})",
        config.can_ids.cmd_speed, config.can_ids.cmd_steering
    );

    loop {
        poll_once(&mut can, ctx, &config.can_ids);
        Timer::after(config.timing.can_rx_poll).await;
    }
}
