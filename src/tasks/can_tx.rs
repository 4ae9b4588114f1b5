//! CANステータス送信タスク
//!
//! SENSOR_UPDATE を待ち、共有速度を読み出して STATUS_SPEED フレームを送信します。

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::Timer;
use embedded_can::nb::Can;
use embedded_can::Error as _;

use crate::can_protocol::{status_speed_frame, CanFrame};
use crate::config::PipelineConfig;
use crate::error::Error;
use crate::event_flags::{flags, WaitPolicy};
use crate::state::PipelineContext;

/// 1フレームを送信メールボックスへ積む
///
/// # Returns
/// * `Err(CanTxFull)` - 空きメールボックスなし
/// * `Err(Can(kind))` - コントローラのエラー
pub fn transmit<C: Can>(can: &mut C, frame: &CanFrame) -> Result<(), Error> {
    let frame: C::Frame = frame.to_frame()?;
    match can.transmit(&frame) {
        Ok(None) => Ok(()),
        Ok(Some(displaced)) => {
            // 優先度の低い保留フレームが押し出された
            debug!(
                "CAN TX displaced {:#x}",
                CanFrame::from_frame(&displaced).raw_id()
            );
            Ok(())
        }
        Err(nb::Error::WouldBlock) => Err(Error::CanTxFull),
        Err(nb::Error::Other(e)) => Err(Error::Can(e.kind())),
    }
}

/// 1サイクル分の送信
///
/// # Returns
/// * `Ok(true)` - 送信した
/// * `Ok(false)` - SENSOR_UPDATE を観測できなかった（送信なし）
pub async fn publish_once<C: Can, M: RawMutex>(
    can: &mut C,
    ctx: &PipelineContext<M>,
    status_id: u32,
    policy: WaitPolicy,
) -> Result<bool, Error> {
    if ctx.events.wait(flags::SENSOR_UPDATE, policy).await.is_none() {
        return Ok(false);
    }

    // ロックは値のコピーだけ
    let speed = ctx.speed.load().await;
    let frame = status_speed_frame(status_id, speed)?;
    transmit(can, &frame)?;
    trace!("Status sent: {:#x} speed={}", status_id, speed);
    Ok(true)
}

/// CANステータス送信タスク
pub async fn can_tx_task<C: Can, M: RawMutex>(
    mut can: C,
    ctx: &PipelineContext<M>,
    config: &PipelineConfig,
) -> ! {
    info!(
        "CAN TX task started (status={:#x})",
        config.can_ids.status_speed
    );

    loop {
        if let Err(e) =
            publish_once(&mut can, ctx, config.can_ids.status_speed, config.wait_policy).await
        {
            // 送信失敗は次のサイクルで再送しない（最新値のみ送る）
            warn!("Status transmit failed: {:?}", e);
            ctx.stats.record_tx_failure();
        }
        Timer::after(config.timing.can_tx_period).await;
    }
}
